//! Named-argument maps.
//!
//! Bound arguments travel as a JSON object: record structs flatten through
//! serde, where clauses contribute their placeholder pairs, and sequence
//! values expand into positional placeholders just before execution.

use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};

use strata_core::QueryError;

/// Placeholder-name → value map.
pub type ArgMap = Map<String, Value>;

/// Flatten a serializable value into an arg map. Only objects flatten;
/// anything else is an invalid argument.
pub fn to_args<T: Serialize>(value: &T) -> Result<ArgMap, QueryError> {
    let value = serde_json::to_value(value).map_err(|e| QueryError::InvalidArg {
        reason: e.to_string(),
    })?;
    match value {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(ArgMap::new()),
        other => Err(QueryError::InvalidArg {
            reason: format!("expected an object of named args, got {other}"),
        }),
    }
}

/// Merge pre-flattened values into one map. A placeholder bound twice is
/// fine when the values agree and an error when they disagree.
pub fn merge_values(values: Vec<Value>) -> Result<ArgMap, QueryError> {
    let mut merged = ArgMap::new();
    for value in values {
        let map = match value {
            Value::Object(map) => map,
            Value::Null => continue,
            other => {
                return Err(QueryError::InvalidArg {
                    reason: format!("expected an object of named args, got {other}"),
                })
            }
        };
        merge_into(&mut merged, map)?;
    }
    Ok(merged)
}

/// Merge `incoming` into `target` with the duplicate-disagreement rule.
pub fn merge_into(target: &mut ArgMap, incoming: ArgMap) -> Result<(), QueryError> {
    for (key, value) in incoming {
        if let Some(existing) = target.get(&key) {
            if *existing != value {
                return Err(QueryError::DuplicateArg { name: key });
            }
            continue;
        }
        target.insert(key, value);
    }
    Ok(())
}

/// Prefix every key, used to scope one row's args inside a batch insert.
pub fn with_prefix(prefix: &str, map: ArgMap) -> ArgMap {
    map.into_iter()
        .map(|(key, value)| (format!("{prefix}{key}"), value))
        .collect()
}

/// Expand sequence-valued args into positional placeholders.
///
/// For every array value bound to `name`, `:name` in the statement becomes
/// `:name_0,:name_1,…` and the map gains one entry per element. Longer
/// names rewrite first so `:ids` never clobbers `:ids_active`. Empty
/// sequences are left unexpanded for the driver to reject.
pub fn expand_sequences(statement: &str, args: &mut ArgMap) -> String {
    let mut sequence_keys: Vec<String> = args
        .iter()
        .filter(|(_, value)| matches!(value, Value::Array(items) if !items.is_empty()))
        .map(|(key, _)| key.clone())
        .collect();
    sequence_keys.sort_by_key(|key| std::cmp::Reverse(key.len()));

    let mut rewritten = statement.to_string();
    for key in sequence_keys {
        let Some(Value::Array(items)) = args.remove(&key) else {
            continue;
        };
        let placeholders: Vec<String> = (0..items.len())
            .map(|i| format!(":{key}_{i}"))
            .collect();
        let pattern =
            Regex::new(&format!(r":{}\b", regex::escape(&key))).expect("escaped placeholder");
        rewritten = pattern
            .replace_all(&rewritten, placeholders.join(",").as_str())
            .into_owned();
        for (i, item) in items.into_iter().enumerate() {
            args.insert(format!("{key}_{i}"), item);
        }
    }
    rewritten
}

/// Stringify a bound value the way it should read in a cache key or a map
/// key: strings bare, everything else as compact JSON.
pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;
    use serde_json::json;

    #[derive(Serialize)]
    struct UserArgs {
        id: String,
        age: i64,
    }

    #[test]
    fn test_to_args_flattens_struct() {
        let args = to_args(&UserArgs {
            id: "u1".to_string(),
            age: 30,
        })
        .unwrap();
        assert_eq!(args.get("id").unwrap(), "u1");
        assert_eq!(args.get("age").unwrap(), 30);
    }

    #[test]
    fn test_to_args_rejects_scalars() {
        let err = to_args(&42i64).unwrap_err();
        assert!(matches!(err, QueryError::InvalidArg { .. }));
    }

    #[test]
    fn test_merge_agreeing_duplicates() {
        let merged = merge_values(vec![json!({"a": 1}), json!({"a": 1, "b": 2})]).unwrap();
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_merge_disagreeing_duplicates_error() {
        let err = merge_values(vec![json!({"a": 1}), json!({"a": 2})]).unwrap_err();
        assert!(matches!(err, QueryError::DuplicateArg { name } if name == "a"));
    }

    #[test]
    fn test_with_prefix() {
        let map = to_args(&UserArgs {
            id: "u1".to_string(),
            age: 30,
        })
        .unwrap();
        let prefixed = with_prefix("0_", map);
        assert!(prefixed.contains_key("0_id"));
        assert!(prefixed.contains_key("0_age"));
    }

    #[test]
    fn test_sequence_expansion() {
        let mut args = to_args(&json!({"names": ["a", "b", "c"]})).unwrap();
        let sql = expand_sequences("SELECT * FROM t WHERE name IN (:names)", &mut args);
        assert_eq!(sql, "SELECT * FROM t WHERE name IN (:names_0,:names_1,:names_2)");
        assert_eq!(args.get("names_0").unwrap(), "a");
        assert_eq!(args.get("names_1").unwrap(), "b");
        assert_eq!(args.get("names_2").unwrap(), "c");
        assert!(!args.contains_key("names"));
    }

    #[test]
    fn test_expansion_prefers_longer_names() {
        let mut args = to_args(&json!({"ids": [1, 2], "ids_active": [3]})).unwrap();
        let sql = expand_sequences("WHERE a IN (:ids) AND b IN (:ids_active)", &mut args);
        assert_eq!(sql, "WHERE a IN (:ids_0,:ids_1) AND b IN (:ids_active_0)");
    }

    #[test]
    fn test_strings_and_bytes_do_not_expand() {
        let mut args = to_args(&json!({"name": "abc"})).unwrap();
        let sql = expand_sequences("WHERE name = :name", &mut args);
        assert_eq!(sql, "WHERE name = :name");
        assert!(args.contains_key("name"));
    }

    #[test]
    fn test_empty_sequence_left_alone() {
        let mut args = to_args(&json!({"ids": []})).unwrap();
        let sql = expand_sequences("WHERE id IN (:ids)", &mut args);
        assert_eq!(sql, "WHERE id IN (:ids)");
        assert!(args.contains_key("ids"));
    }

    #[test]
    fn test_value_text() {
        assert_eq!(value_text(&json!("plain")), "plain");
        assert_eq!(value_text(&json!(42)), "42");
        assert_eq!(value_text(&json!(["a", 1])), r#"["a",1]"#);
    }
}
