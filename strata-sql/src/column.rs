//! Column metadata and the directive parser.
//!
//! A [`Column`] is derived once per record field at table registration and
//! is immutable afterward. The field's config string is a semicolon-
//! delimited directive list: bare flags (`primary`, `update`, `skip`, …) or
//! `key::value` pairs (`data_type::varchar(512)`, `fk::ds.tbl.col`, …).

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use strata_core::SchemaError;

use crate::record::FieldSpec;

/// Reserved SQL keywords that may not be used as column names.
const RESERVED_KEYWORDS: &[&str] = &[
    "ADD", "ALL", "ALTER", "AND", "ANY", "AS", "ASC", "BACKUP", "BETWEEN", "CASE", "CHECK",
    "COLUMN", "CONSTRAINT", "CREATE", "DATABASE", "DEFAULT", "DELETE", "DESC", "DISTINCT", "DROP",
    "EXEC", "EXISTS", "FOREIGN", "FROM", "FULL", "GROUP", "HAVING", "IN", "INDEX", "INNER",
    "INSERT", "IS", "JOIN", "KEY", "LEFT", "LIKE", "LIMIT", "NOT", "NULL", "OR", "ORDER", "OUTER",
    "PRIMARY", "PROCEDURE", "RIGHT", "ROWNUM", "SELECT", "SET", "TABLE", "TOP", "TRUNCATE",
    "UNION", "UNIQUE", "UPDATE", "VALUES", "VIEW", "WHERE",
];

fn invalid_name_patterns() -> &'static [Regex; 3] {
    static PATTERNS: OnceLock<[Regex; 3]> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            Regex::new(r"^\d+.*").expect("static pattern"),
            Regex::new(r".*\s+.*").expect("static pattern"),
            Regex::new(r".*[-\.@].*").expect("static pattern"),
        ]
    })
}

/// Validate a column name against reserved keywords and invalid shapes.
pub fn is_valid_column_name(name: &str) -> bool {
    let upper = name.to_uppercase();
    if RESERVED_KEYWORDS.iter().any(|kw| *kw == upper) {
        return false;
    }
    !invalid_name_patterns().iter().any(|p| p.is_match(name))
}

/// Convert a record type name to its snake-case table name.
pub fn to_snake_case(input: &str) -> String {
    static FIRST_CAP: OnceLock<Regex> = OnceLock::new();
    static ALL_CAP: OnceLock<Regex> = OnceLock::new();
    let first = FIRST_CAP.get_or_init(|| Regex::new("(.)([A-Z][a-z]+)").expect("static pattern"));
    let all = ALL_CAP.get_or_init(|| Regex::new("([a-z0-9])([A-Z])").expect("static pattern"));
    let pass = first.replace_all(input, "${1}_${2}");
    let pass = all.replace_all(&pass, "${1}_${2}");
    pass.to_lowercase()
}

/// Sort direction for order-by columns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderDirection {
    #[default]
    Ascending,
    Descending,
}

/// Encoding applied to client-side generated row IDs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum GeneratedIdKind {
    /// The raw UUID string.
    #[default]
    Uuid,
    /// SHA-1 of a fresh UUID, hex encoded.
    Hex,
    /// SHA-1 of a fresh UUID, URL-safe base64 encoded.
    Base64,
}

/// Foreign key target parsed from `fk::dataset.table.column`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub dataset: String,
    pub table: String,
    pub column: String,
}

/// Relational metadata for one record field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub dataset: String,
    pub table: String,
    pub sql_type: String,
    pub primary: bool,
    pub select: bool,
    pub join: bool,
    pub join_name: String,
    pub where_op: String,
    pub update: bool,
    pub delete: bool,
    pub order: bool,
    pub order_priority: i32,
    pub order_direction: OrderDirection,
    pub group_by_name: String,
    pub select_as: String,
    pub auto_generate_id: bool,
    pub auto_generate_id_type: GeneratedIdKind,
    pub skip: bool,
    pub column_order: usize,
    pub foreign_key: Option<ForeignKey>,
    pub default_value: String,
    pub nullable: bool,
}

impl Default for Column {
    fn default() -> Self {
        Self {
            name: String::new(),
            dataset: String::new(),
            table: String::new(),
            sql_type: "varchar(256)".to_string(),
            primary: false,
            // selectable unless opted out of the table entirely
            select: true,
            join: false,
            join_name: String::new(),
            where_op: String::new(),
            update: false,
            delete: false,
            order: false,
            order_priority: 0,
            order_direction: OrderDirection::Ascending,
            group_by_name: String::new(),
            select_as: String::new(),
            auto_generate_id: false,
            auto_generate_id_type: GeneratedIdKind::Uuid,
            skip: false,
            column_order: 0,
            foreign_key: None,
            default_value: String::new(),
            nullable: false,
        }
    }
}

impl Column {
    /// Build a column from a field spec. `Ok(None)` means the field opted
    /// out with the name `-`.
    pub fn from_field(field: &FieldSpec, index: usize) -> Result<Option<Self>, SchemaError> {
        if field.name == "-" {
            return Ok(None);
        }
        if !is_valid_column_name(field.name) {
            let upper = field.name.to_uppercase();
            if RESERVED_KEYWORDS.iter().any(|kw| *kw == upper) {
                return Err(SchemaError::ReservedKeyword {
                    column: field.name.to_string(),
                });
            }
            return Err(SchemaError::InvalidColumnName {
                column: field.name.to_string(),
            });
        }

        let mut column = Column {
            name: field.name.to_string(),
            sql_type: field.sql_type.to_string(),
            column_order: index,
            ..Column::default()
        };
        column.apply_directives(field.config)?;
        Ok(Some(column))
    }

    fn apply_directives(&mut self, config: &str) -> Result<(), SchemaError> {
        for raw in config.split(';') {
            let directive = raw.trim();
            if directive.is_empty() {
                continue;
            }
            if let Some((key, value)) = directive.split_once("::") {
                self.apply_pair(key.trim(), value.trim(), directive)?;
            } else {
                self.apply_flag(directive);
            }
        }
        Ok(())
    }

    fn apply_flag(&mut self, flag: &str) {
        match flag {
            "primary" => self.primary = true,
            "select" => self.select = true,
            "join" => self.join = true,
            "update" => self.update = true,
            "delete" => self.delete = true,
            "skip" => self.skip = true,
            "order" => self.order = true,
            "auto_generate_id" => self.auto_generate_id = true,
            "null" => self.nullable = true,
            // unknown flags are tolerated, matching permissive tag parsing
            _ => {}
        }
    }

    fn apply_pair(&mut self, key: &str, value: &str, directive: &str) -> Result<(), SchemaError> {
        match key {
            "join_name" => self.join_name = value.to_string(),
            "data_type" => self.sql_type = value.to_string(),
            "default" => self.default_value = value.to_string(),
            "where" => self.where_op = value.to_string(),
            "group_by_name" => self.group_by_name = value.to_string(),
            "select_as" => self.select_as = value.to_string(),
            "order_priority" => {
                self.order = true;
                self.order_priority =
                    value
                        .parse::<i32>()
                        .map_err(|_| SchemaError::InvalidDirective {
                            directive: directive.to_string(),
                            reason: "order_priority takes an integer".to_string(),
                        })?;
            }
            "order_type" => {
                self.order = true;
                self.order_direction = match value.to_lowercase().as_str() {
                    "asc" => OrderDirection::Ascending,
                    "desc" => OrderDirection::Descending,
                    _ => {
                        return Err(SchemaError::InvalidDirective {
                            directive: directive.to_string(),
                            reason: "order_type takes asc or desc".to_string(),
                        })
                    }
                };
            }
            "auto_generate_id_type" => {
                self.auto_generate_id = true;
                self.auto_generate_id_type = match value.to_lowercase().as_str() {
                    "uuid" => GeneratedIdKind::Uuid,
                    "hex" => GeneratedIdKind::Hex,
                    "base64" => GeneratedIdKind::Base64,
                    _ => {
                        return Err(SchemaError::InvalidDirective {
                            directive: directive.to_string(),
                            reason: "auto_generate_id_type takes uuid, hex, or base64".to_string(),
                        })
                    }
                };
            }
            "fk" => {
                let parts: Vec<&str> = value.split('.').collect();
                if parts.len() != 3 {
                    return Err(SchemaError::InvalidDirective {
                        directive: directive.to_string(),
                        reason: "fk takes dataset.table.column".to_string(),
                    });
                }
                self.foreign_key = Some(ForeignKey {
                    dataset: parts[0].to_string(),
                    table: parts[1].to_string(),
                    column: parts[2].to_string(),
                });
            }
            _ => {}
        }
        Ok(())
    }

    /// `dataset.table.column` path.
    pub fn full_path(&self) -> String {
        if self.dataset.is_empty() {
            format!("{}.{}", self.table, self.name)
        } else {
            format!("{}.{}.{}", self.dataset, self.table, self.name)
        }
    }

    /// `dataset.table` of the owning table.
    pub fn full_table_name(&self) -> String {
        format!("{}.{}", self.dataset, self.table)
    }

    /// Select-list rendering. With `alias`, `path AS table_column` (or the
    /// declared `select_as`); under group-by an aliased column is referenced
    /// by its alias alone.
    pub fn full_name(&self, group_by: bool, alias: bool) -> String {
        if group_by && !self.select_as.is_empty() {
            return self.select_as.clone();
        }
        let path = self.full_path();
        if !alias {
            return path;
        }
        let alias_name = if self.select_as.is_empty() {
            format!("{}_{}", self.table, self.name)
        } else {
            self.select_as.clone()
        };
        format!("{path} AS {alias_name}")
    }

    /// Name used in GROUP BY: `group_by_name`, else `select_as`, else the
    /// bare column name.
    pub fn group_by_target(&self) -> String {
        if !self.group_by_name.is_empty() {
            self.group_by_name.clone()
        } else if !self.select_as.is_empty() {
            self.select_as.clone()
        } else {
            self.name.clone()
        }
    }

    /// ORDER BY rendering, direction included.
    pub fn order_fragment(&self, group_by: bool) -> String {
        let target = if group_by && !self.select_as.is_empty() {
            self.select_as.clone()
        } else {
            self.full_path()
        };
        match self.order_direction {
            OrderDirection::Ascending => target,
            OrderDirection::Descending => format!("{target} DESC"),
        }
    }

    /// Table-level WHERE fragment with a bare `:name` placeholder.
    pub fn where_fragment(&self) -> String {
        let op = if self.where_op.is_empty() {
            "=".to_string()
        } else {
            self.where_op.to_uppercase()
        };
        match op.as_str() {
            "IN" | "NOT IN" => format!("{} {} (:{})", self.full_path(), op, self.name),
            _ => format!("{} {} :{}", self.full_path(), op, self.name),
        }
    }

    /// DDL fragment for CREATE TABLE and ALTER TABLE ADD.
    pub fn definition(&self) -> String {
        match self.default_value.as_str() {
            "updated_timestamp" => format!(
                "{} TIMESTAMP DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP",
                self.name
            ),
            "created_timestamp" => {
                format!("{} TIMESTAMP DEFAULT CURRENT_TIMESTAMP", self.name)
            }
            "" => {
                let null_clause = if self.nullable { "" } else { " NOT NULL" };
                format!("{} {}{}", self.name, self.sql_type, null_clause)
            }
            value => {
                let rendered = if value.parse::<f64>().is_ok() || value == "true" || value == "false"
                {
                    value.to_string()
                } else {
                    format!("'{value}'")
                };
                format!("{} {} DEFAULT {}", self.name, self.sql_type, rendered)
            }
        }
    }

    pub fn has_foreign_key(&self) -> bool {
        self.foreign_key.is_some()
    }

    /// FOREIGN KEY clause for CREATE TABLE.
    pub fn fk_fragment(&self) -> String {
        match &self.foreign_key {
            Some(fk) => format!(
                "\n\tFOREIGN KEY ({}) REFERENCES {}.{}({})",
                self.name, fk.dataset, fk.table, fk.column
            ),
            None => String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(name: &'static str, config: &'static str) -> FieldSpec {
        FieldSpec::new(name, config)
    }

    #[test]
    fn test_snake_case() {
        assert_eq!(to_snake_case("User"), "user");
        assert_eq!(to_snake_case("UserRole"), "user_role");
        assert_eq!(to_snake_case("HTTPServer2"), "http_server2");
    }

    #[test]
    fn test_skip_marker_yields_none() {
        let column = Column::from_field(&field("-", "primary"), 0).unwrap();
        assert!(column.is_none());
    }

    #[test]
    fn test_reserved_keyword_rejected() {
        let err = Column::from_field(&field("select", ""), 0).unwrap_err();
        assert!(matches!(err, SchemaError::ReservedKeyword { .. }));
    }

    #[test]
    fn test_invalid_shapes_rejected() {
        for bad in ["9lives", "has space", "has-dash", "has.dot", "has@at"] {
            assert!(!is_valid_column_name(bad), "{bad} should be invalid");
        }
        assert!(is_valid_column_name("priority"));
    }

    #[test]
    fn test_flag_directives() {
        let column = Column::from_field(
            &field("id", "primary;join;join_name::role_id;auto_generate_id"),
            0,
        )
        .unwrap()
        .unwrap();
        assert!(column.primary);
        assert!(column.join);
        assert!(column.auto_generate_id);
        assert_eq!(column.join_name, "role_id");
        assert_eq!(column.auto_generate_id_type, GeneratedIdKind::Uuid);
    }

    #[test]
    fn test_pair_directives() {
        let column = Column::from_field(
            &field(
                "name",
                "update;data_type::varchar(512);where::in;order_priority::3;order_type::desc",
            ),
            2,
        )
        .unwrap()
        .unwrap();
        assert!(column.update);
        assert_eq!(column.sql_type, "varchar(512)");
        assert_eq!(column.where_op, "in");
        assert!(column.order);
        assert_eq!(column.order_priority, 3);
        assert_eq!(column.order_direction, OrderDirection::Descending);
        assert_eq!(column.column_order, 2);
    }

    #[test]
    fn test_fk_directive() {
        let column = Column::from_field(&field("role_id", "fk::auth.role.id"), 0)
            .unwrap()
            .unwrap();
        let fk = column.foreign_key.as_ref().unwrap();
        assert_eq!(fk.dataset, "auth");
        assert_eq!(fk.table, "role");
        assert_eq!(fk.column, "id");
        assert_eq!(
            column.fk_fragment(),
            "\n\tFOREIGN KEY (role_id) REFERENCES auth.role(id)"
        );
    }

    #[test]
    fn test_malformed_fk_rejected() {
        let err = Column::from_field(&field("role_id", "fk::role.id"), 0).unwrap_err();
        assert!(matches!(err, SchemaError::InvalidDirective { .. }));
    }

    #[test]
    fn test_bad_order_priority_rejected() {
        let err = Column::from_field(&field("name", "order_priority::high"), 0).unwrap_err();
        assert!(matches!(err, SchemaError::InvalidDirective { .. }));
    }

    #[test]
    fn test_rendering_fragments() {
        let mut column = Column::from_field(&field("name", "update"), 1).unwrap().unwrap();
        column.dataset = "ds".to_string();
        column.table = "user".to_string();

        assert_eq!(column.full_path(), "ds.user.name");
        assert_eq!(column.full_name(false, true), "ds.user.name AS user_name");
        assert_eq!(column.full_name(false, false), "ds.user.name");
        assert_eq!(column.order_fragment(false), "ds.user.name");
        assert_eq!(column.where_fragment(), "ds.user.name = :name");
    }

    #[test]
    fn test_select_as_wins_under_group_by() {
        let mut column = Column::from_field(&field("total", "select_as::total_count"), 0)
            .unwrap()
            .unwrap();
        column.dataset = "ds".to_string();
        column.table = "orders".to_string();
        assert_eq!(column.full_name(true, true), "total_count");
        assert_eq!(column.group_by_target(), "total_count");
        assert_eq!(column.order_fragment(true), "total_count");
    }

    #[test]
    fn test_group_by_name_precedence() {
        let column = Column::from_field(
            &field("total", "group_by_name::bucket;select_as::total_count"),
            0,
        )
        .unwrap()
        .unwrap();
        assert_eq!(column.group_by_target(), "bucket");
    }

    #[test]
    fn test_definitions() {
        let plain = Column::from_field(&field("name", "data_type::varchar(512)"), 0)
            .unwrap()
            .unwrap();
        assert_eq!(plain.definition(), "name varchar(512) NOT NULL");

        let defaulted = Column::from_field(&field("priority", "default::0;data_type::int"), 0)
            .unwrap()
            .unwrap();
        assert_eq!(defaulted.definition(), "priority int DEFAULT 0");

        let text_default = Column::from_field(&field("kind", "default::basic"), 0)
            .unwrap()
            .unwrap();
        assert_eq!(text_default.definition(), "kind varchar(256) DEFAULT 'basic'");

        let updated = Column::from_field(&field("updated_timestamp", "skip;default::updated_timestamp"), 0)
            .unwrap()
            .unwrap();
        assert_eq!(
            updated.definition(),
            "updated_timestamp TIMESTAMP DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP"
        );

        let created = Column::from_field(&field("created_timestamp", "skip;default::created_timestamp"), 0)
            .unwrap()
            .unwrap();
        assert_eq!(
            created.definition(),
            "created_timestamp TIMESTAMP DEFAULT CURRENT_TIMESTAMP"
        );
    }

    #[test]
    fn test_in_where_fragment_parenthesised() {
        let mut column = Column::from_field(&field("name", "where::in"), 0).unwrap().unwrap();
        column.dataset = "ds".to_string();
        column.table = "user".to_string();
        assert_eq!(column.where_fragment(), "ds.user.name IN (:name)");
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(500))]

        /// Property: snake-casing is idempotent — a converted name converts
        /// to itself, so table names are stable however often they pass
        /// through the registration path.
        #[test]
        fn prop_snake_case_idempotent(name in "[A-Za-z][A-Za-z0-9]{0,12}") {
            let once = to_snake_case(&name);
            prop_assert_eq!(to_snake_case(&once), once);
        }

        /// Property: converted names never contain uppercase.
        #[test]
        fn prop_snake_case_lowercases(name in "[A-Za-z0-9]{1,16}") {
            prop_assert!(to_snake_case(&name)
                .chars()
                .all(|c| !c.is_ascii_uppercase()));
        }

        /// Property: reserved keywords are rejected in any casing.
        #[test]
        fn prop_reserved_keywords_rejected(
            index in 0usize..RESERVED_KEYWORDS.len(),
            lower in any::<bool>(),
        ) {
            let keyword = RESERVED_KEYWORDS[index];
            let name = if lower {
                keyword.to_lowercase()
            } else {
                keyword.to_string()
            };
            prop_assert!(!is_valid_column_name(&name));
        }

        /// Property: names starting with a digit are rejected.
        #[test]
        fn prop_leading_digit_rejected(name in "[0-9][A-Za-z0-9_]{0,8}") {
            prop_assert!(!is_valid_column_name(&name));
        }

        /// Property: embedded whitespace, dash, dot, or at-sign is rejected
        /// wherever it appears.
        #[test]
        fn prop_separator_rejected(
            prefix in "[a-z]{1,6}",
            sep in prop_oneof![Just(' '), Just('-'), Just('.'), Just('@')],
            suffix in "[a-z]{1,6}",
        ) {
            let name = format!("{prefix}{sep}{suffix}");
            prop_assert!(!is_valid_column_name(&name));
        }

        /// Property: unknown bare flags are tolerated and leave the column
        /// untouched.
        #[test]
        fn prop_unknown_flags_ignored(word in "x[a-z]{0,8}") {
            let mut column = Column::default();
            column.apply_directives(&word).unwrap();
            prop_assert_eq!(column, Column::default());
        }

        /// Property: every integer survives the order_priority directive.
        #[test]
        fn prop_order_priority_parses(priority in any::<i32>()) {
            let mut column = Column::default();
            column
                .apply_directives(&format!("order_priority::{priority}"))
                .unwrap();
            prop_assert!(column.order);
            prop_assert_eq!(column.order_priority, priority);
        }

        /// Property: data_type always wins over the declared default.
        #[test]
        fn prop_data_type_overrides(sql in "[a-z]{1,8}(\\([0-9]{1,3}\\))?") {
            let mut column = Column::default();
            column
                .apply_directives(&format!("data_type::{sql}"))
                .unwrap();
            prop_assert_eq!(column.sql_type, sql);
        }
    }
}
