//! Fluent query builder with cache integration.
//!
//! A query is composed from column metadata, rendered once into
//! parameterised SQL, and executed through the session. Results can be
//! cached under the table's group so any mutation of the table invalidates
//! them, and the built SQL text of a named query is itself cached to skip
//! re-rendering on repeated invocations.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use strata_cache::key::md5_hex;
use strata_cache::CacheBackend;
use strata_core::QueryError;

use crate::args::{merge_into, merge_values, value_text, ArgMap};
use crate::column::Column;
use crate::record::Record;
use crate::session::Session;
use crate::table::{JoinKind, Table};

/// Group holding cached query text, invalidated as a unit.
const QUERY_TEXT_GROUP: &str = "queries";
/// How long built SQL text stays cached.
const QUERY_TEXT_TTL: Duration = Duration::from_secs(30 * 60);
/// Default TTL for cached result sets.
const DEFAULT_RESULT_TTL: Duration = Duration::from_secs(5 * 60);

/// One WHERE predicate.
///
/// `index` disambiguates repeated predicates on the same column by feeding
/// the placeholder name, so `age > :0_age AND age < :1_age` binds cleanly.
#[derive(Debug, Clone)]
pub struct WhereClause {
    pub column: Column,
    pub op: String,
    pub join_op: String,
    pub level: i32,
    pub value: Value,
    pub flip: bool,
    pub index: usize,
}

impl WhereClause {
    pub fn placeholder(&self) -> String {
        format!("{}_{}", self.index, self.column.name)
    }

    /// The placeholder binding this predicate contributes, if any.
    pub fn arg(&self) -> Option<(String, Value)> {
        if self.value.is_null() {
            return None;
        }
        Some((self.placeholder(), self.value.clone()))
    }

    /// Render the predicate. `IN`-family operators parenthesise the
    /// placeholder so sequence expansion yields a valid list.
    pub fn render(&self) -> String {
        let lhs = self.column.full_name(false, false);
        let op_upper = self.op.to_uppercase();
        let placeholder = if matches!(op_upper.as_str(), "IN" | "NOT IN") {
            format!("(:{})", self.placeholder())
        } else {
            format!(":{}", self.placeholder())
        };
        if self.flip {
            format!("{} {} {}", placeholder, self.op, lhs)
        } else {
            format!("{} {} {}", lhs, self.op, placeholder)
        }
    }

    /// Stable rendering for fingerprints: shape plus combinators.
    fn signature(&self) -> String {
        format!("{}|{}|{}", self.level, self.join_op, self.render())
    }
}

/// Render a predicate list, parenthesising contiguous runs of the same
/// non-zero level and joining siblings with each predicate's operator.
pub(crate) fn render_where(clauses: &[WhereClause]) -> String {
    if clauses.is_empty() {
        return String::new();
    }
    let mut rendered = String::from("WHERE ");
    let mut position = 0;
    let mut first_group = true;
    while position < clauses.len() {
        let level = clauses[position].level;
        let mut end = position + 1;
        while end < clauses.len() && clauses[end].level == level {
            end += 1;
        }
        let mut segment = String::new();
        for (offset, clause) in clauses[position..end].iter().enumerate() {
            if offset > 0 {
                let join_op = if clause.join_op.is_empty() {
                    "AND"
                } else {
                    clause.join_op.as_str()
                };
                segment.push_str(&format!(" {join_op} "));
            }
            segment.push_str(&clause.render());
        }
        if level > 0 && end - position > 1 {
            segment = format!("({segment})");
        }
        if !first_group {
            let join_op = if clauses[position].join_op.is_empty() {
                "AND"
            } else {
                clauses[position].join_op.as_str()
            };
            rendered.push_str(&format!(" {join_op} "));
        }
        rendered.push_str(&segment);
        first_group = false;
        position = end;
    }
    rendered
}

struct JoinSpec {
    columns: HashMap<String, Column>,
    kind: JoinKind,
}

/// Composable, cache-aware SELECT plan over a registered table.
pub struct Query<T: Record> {
    name: String,
    table: Arc<Table<T>>,
    from_query: Option<Box<Query<T>>>,
    select_columns: Vec<Column>,
    distinct: bool,
    joins: Vec<JoinSpec>,
    where_clauses: Vec<WhereClause>,
    group_by: Vec<Column>,
    order_by: Vec<Column>,
    map_key_columns: Vec<Column>,
    limit: usize,
    result_cache: Option<Arc<dyn CacheBackend>>,
    use_cache: bool,
    skip_cache: bool,
    cache_ttl: Duration,
    sql: String,
    where_counters: HashMap<String, usize>,
    err: Option<QueryError>,
}

impl<T: Record> Query<T> {
    pub fn new(table: Arc<Table<T>>) -> Self {
        Self {
            name: String::new(),
            table,
            from_query: None,
            select_columns: Vec::new(),
            distinct: false,
            joins: Vec::new(),
            where_clauses: Vec::new(),
            group_by: Vec::new(),
            order_by: Vec::new(),
            map_key_columns: Vec::new(),
            limit: 0,
            result_cache: None,
            use_cache: false,
            skip_cache: false,
            cache_ttl: DEFAULT_RESULT_TTL,
            sql: String::new(),
            where_counters: HashMap::new(),
            err: None,
        }
    }

    /// Look up a column of the base table; a miss poisons the query so the
    /// error surfaces at run time with the offending name.
    pub fn column(&mut self, name: &str) -> Column {
        match self.table.column(name) {
            Some(column) => column.clone(),
            None => {
                self.err = Some(QueryError::InvalidArg {
                    reason: format!(
                        "missing column from table({}) {name}",
                        self.table.full_table_name()
                    ),
                });
                Column::default()
            }
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn select(mut self, columns: &[Column]) -> Self {
        for column in columns {
            if column.name.is_empty() {
                continue;
            }
            self.select_columns.push(column.clone());
        }
        self
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    /// Select from a nested query instead of the base table.
    pub fn from(mut self, query: Query<T>) -> Self {
        self.from_query = Some(Box::new(query));
        self
    }

    /// Join against a foreign table's columns. Joins with no overlapping
    /// columns are skipped at build time.
    pub fn join(mut self, columns: HashMap<String, Column>, kind: JoinKind) -> Self {
        self.joins.push(JoinSpec { columns, kind });
        self
    }

    /// Join on a single foreign column.
    pub fn join_column(self, column: Column, kind: JoinKind) -> Self {
        let mut columns = HashMap::new();
        columns.insert(column.name.clone(), column);
        self.join(columns, kind)
    }

    /// Add a predicate. `level` groups parenthesised runs, `join_op`
    /// combines the predicate with its predecessor.
    pub fn where_(
        self,
        column: Column,
        op: &str,
        join_op: &str,
        level: i32,
        value: impl Serialize,
    ) -> Self {
        self.push_where(column, op, join_op, level, value, false)
    }

    /// `where_` with flipped operand order (`:value op column`).
    pub fn unique_where(
        self,
        column: Column,
        op: &str,
        join_op: &str,
        level: i32,
        value: impl Serialize,
        flip: bool,
    ) -> Self {
        self.push_where(column, op, join_op, level, value, flip)
    }

    fn push_where(
        mut self,
        column: Column,
        op: &str,
        join_op: &str,
        level: i32,
        value: impl Serialize,
        flip: bool,
    ) -> Self {
        if column.name.is_empty() {
            return self;
        }
        let value = match serde_json::to_value(value) {
            Ok(value) => value,
            Err(err) => {
                self.err = Some(QueryError::InvalidArg {
                    reason: err.to_string(),
                });
                return self;
            }
        };
        let counter = self.where_counters.entry(column.full_path()).or_default();
        let index = *counter;
        *counter += 1;
        self.where_clauses.push(WhereClause {
            column,
            op: op.to_string(),
            join_op: join_op.to_string(),
            level: level.max(0),
            value,
            flip,
            index,
        });
        self
    }

    pub fn group_by(mut self, columns: &[Column]) -> Self {
        for column in columns {
            if column.name.is_empty() {
                continue;
            }
            // adopt the select-list rendering of the same column when one
            // was declared, so aliases line up
            let adopted = self
                .select_columns
                .iter()
                .find(|c| c.name.eq_ignore_ascii_case(&column.name))
                .cloned()
                .unwrap_or_else(|| column.clone());
            self.group_by.push(adopted);
        }
        self
    }

    pub fn order_by(mut self, columns: &[Column]) -> Self {
        for column in columns {
            if column.name.is_empty() {
                continue;
            }
            self.order_by.push(column.clone());
        }
        self
    }

    pub fn map_columns(mut self, columns: &[Column]) -> Self {
        self.map_key_columns.extend(columns.iter().cloned());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Cache results in a dedicated backend consulted before execution.
    pub fn set_cache(mut self, backend: Arc<dyn CacheBackend>) -> Self {
        self.result_cache = Some(backend);
        self
    }

    /// Cache results in the session cache under the table's group.
    pub fn use_cache(mut self) -> Self {
        self.use_cache = true;
        self
    }

    pub fn skip_cache(mut self) -> Self {
        self.skip_cache = true;
        self
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Auto-derived label when the query was not explicitly named.
    fn label(&self) -> String {
        if !self.name.is_empty() {
            return self.name.clone();
        }
        let mut parts = vec![self.table.name().to_string()];
        if !self.where_clauses.is_empty() {
            parts.push("where".to_string());
            parts.extend(self.where_clauses.iter().map(|w| w.column.name.clone()));
        }
        if !self.group_by.is_empty() {
            parts.push("group by".to_string());
            parts.extend(self.group_by.iter().map(|c| c.name.clone()));
        }
        parts.join("_").to_lowercase()
    }

    // ------------------------------------------------------------------
    // Rendering
    // ------------------------------------------------------------------

    /// Render the SQL text. Idempotent; `run` calls it on demand.
    pub fn build(&mut self) -> &str {
        if self.err.is_some() {
            return &self.sql;
        }
        let group_by_active = !self.group_by.is_empty();
        let select_list = self
            .table
            .selectable_columns(group_by_active, &self.select_columns);
        let select_keyword = if self.distinct {
            "SELECT DISTINCT"
        } else {
            "SELECT"
        };

        let mut statement = if let Some(from_query) = self.from_query.as_mut() {
            from_query.build();
            format!(
                "{select_keyword}\n\t{}\nFROM\n\t({})",
                select_list.join(",\n\t"),
                from_query.sql.replace('\n', "\n\t"),
            )
        } else {
            format!(
                "{select_keyword}\n\t{}\nFROM\n\t{}",
                select_list.join(",\n\t"),
                self.table.full_table_name(),
            )
        };

        for join in &self.joins {
            let overlapping = self.table.common_columns(&join.columns);
            if overlapping.is_empty() {
                continue;
            }
            statement = format!(
                "{statement}\n{}",
                self.table.join_fragment(&overlapping, join.kind)
            );
        }

        if !self.where_clauses.is_empty() {
            statement = format!("{statement}\n{}", render_where(&self.where_clauses));
        }

        if group_by_active {
            let names: Vec<String> = self.group_by.iter().map(|c| c.group_by_target()).collect();
            statement = format!("{statement}\nGROUP BY {}", names.join(","));
        }

        if !self.order_by.is_empty() {
            let mut order_columns: Vec<&Column> = self.order_by.iter().collect();
            order_columns.sort_by_key(|c| c.order_priority);
            let fragments: Vec<String> = order_columns
                .iter()
                .map(|c| c.order_fragment(group_by_active))
                .collect();
            statement = format!("{statement}\nORDER BY {}", fragments.join(","));
        }

        if self.limit > 0 {
            statement = format!("{statement}\nLIMIT {};", self.limit);
        }

        self.sql = statement;
        &self.sql
    }

    // ------------------------------------------------------------------
    // Args & fingerprint
    // ------------------------------------------------------------------

    /// Merge the where-clause bindings with caller-supplied structs.
    pub fn args(&self, extra: &[Value]) -> Result<ArgMap, QueryError> {
        let mut merged = ArgMap::new();
        for clause in &self.where_clauses {
            if let Some((key, value)) = clause.arg() {
                if let Some(existing) = merged.get(&key) {
                    if *existing != value {
                        return Err(QueryError::DuplicateArg { name: key });
                    }
                }
                merged.insert(key, value);
            }
        }
        let extras = merge_values(extra.to_vec())?;
        merge_into(&mut merged, extras)?;
        Ok(merged)
    }

    /// Deterministic fingerprint of the query shape plus bound args. Two
    /// queries with identical shape and arguments fingerprint identically
    /// in any process.
    pub fn fingerprint(&self, args: &ArgMap) -> String {
        let mut keys: Vec<String> = vec![self.table.full_table_name()];
        keys.extend(self.select_columns.iter().map(|c| c.name.clone()));
        keys.extend(self.where_clauses.iter().map(|w| w.signature()));
        keys.extend(self.group_by.iter().map(|c| c.full_path()));
        keys.extend(self.order_by.iter().map(|c| c.full_path()));
        // sorted pairs keep the digest independent of binding order
        let mut pairs: Vec<String> = args
            .iter()
            .map(|(k, v)| format!("{k}:{}", value_text(v)))
            .collect();
        pairs.sort();
        keys.extend(pairs);
        md5_hex(&keys.concat())
    }

    // ------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------

    /// Execute and decode, consulting the cache policy.
    pub async fn run(mut self, session: &Session, extra: &[Value]) -> Result<Vec<T>, QueryError> {
        if let Some(err) = self.err.take() {
            return Err(err);
        }
        let cache = session.cache();
        let text_key = format!("{}:{}", self.table.full_table_name(), self.name);

        if !self.name.is_empty() {
            if let Ok(text) = cache.get::<String>(QUERY_TEXT_GROUP, &text_key).await {
                if !text.is_empty() {
                    self.sql = text;
                }
            }
        }
        if self.sql.is_empty() {
            self.build();
        }
        if !self.name.is_empty() {
            if let Err(err) = cache
                .set_with_ttl(QUERY_TEXT_TTL, QUERY_TEXT_GROUP, &text_key, &self.sql)
                .await
            {
                debug!(query = %self.label(), error = %err, "failed caching query text");
            }
        }

        let args = self.args(extra)?;
        let result_key = self.fingerprint(&args);
        let group = self.table.full_table_name();

        if let Some(result_cache) = &self.result_cache {
            if let Ok(rows) = cache
                .get_from::<Vec<T>>(result_cache.as_ref(), &group, &result_key)
                .await
            {
                if !rows.is_empty() {
                    debug!(query = %self.label(), "explicit result cache hit");
                    return Ok(rows);
                }
            }
        }

        if self.use_cache && !self.skip_cache {
            let table = &self.table;
            let sql = &self.sql;
            let database = session.database();
            return cache
                .get_or_load::<Vec<T>, QueryError, _, _>(self.cache_ttl, &group, &result_key, || async {
                    table.named_select(database.as_ref(), sql, args.clone()).await
                })
                .await;
        }

        let rows = self
            .table
            .named_select(session.database().as_ref(), &self.sql, args)
            .await?;
        if let Some(result_cache) = &self.result_cache {
            if let Err(err) = cache
                .set_in(result_cache.as_ref(), &group, &result_key, &rows)
                .await
            {
                debug!(query = %self.label(), error = %err, "failed writing explicit result cache");
            }
        }
        Ok(rows)
    }

    /// Run with `LIMIT 1` and return the single row.
    pub async fn run_single(self, session: &Session, extra: &[Value]) -> Result<T, QueryError> {
        let rows = self.limit(1).run(session, extra).await?;
        rows.into_iter().next().ok_or(QueryError::EmptyResult)
    }

    /// Run and key rows by their map-key columns (default: primary keys).
    pub async fn run_map(
        mut self,
        session: &Session,
        extra: &[Value],
    ) -> Result<HashMap<String, T>, QueryError> {
        if self.map_key_columns.is_empty() {
            self.map_key_columns = self
                .table
                .primary_columns()
                .into_iter()
                .cloned()
                .collect();
        }
        let key_columns = self.map_key_columns.clone();
        let rows = self.run(session, extra).await?;

        let mut keyed = HashMap::new();
        for row in rows {
            let object = serde_json::to_value(&row).map_err(|e| QueryError::InvalidArg {
                reason: e.to_string(),
            })?;
            let Value::Object(fields) = object else {
                continue;
            };
            for column in &key_columns {
                if let Some(value) = fields.get(&column.name) {
                    keyed.insert(value_text(value), row.clone());
                }
            }
        }
        Ok(keyed)
    }
}
