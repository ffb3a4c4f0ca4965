//! Table definitions and CRUD statement generation.
//!
//! A `Table<T>` is built once from the record type's field metadata and is
//! immutable afterward. Statement generators are pure; executors merge
//! args, expand sequence placeholders, run through the [`Database`] trait,
//! and stamp the table's cache group on success so cached query results for
//! the table invalidate everywhere.

use std::collections::HashMap;
use std::marker::PhantomData;

use base64::engine::general_purpose::URL_SAFE as BASE64_URL;
use base64::Engine as _;
use serde_json::Value;
use sha1::{Digest, Sha1};
use tracing::debug;
use uuid::Uuid;

use strata_cache::CacheMonitor;
use strata_core::{QueryError, SchemaError};

use crate::args::{expand_sequences, merge_into, to_args, with_prefix, ArgMap};
use crate::column::{to_snake_case, Column, GeneratedIdKind};
use crate::database::{Database, Row};
use crate::record::Record;

/// SQL join flavor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum JoinKind {
    #[default]
    Inner,
    Left,
    Right,
}

impl JoinKind {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Inner => "JOIN",
            Self::Left => "LEFT JOIN",
            Self::Right => "RIGHT JOIN",
        }
    }

    /// Parse the loose spelling used at call sites: empty means inner.
    pub fn parse(kind: &str) -> Self {
        match kind.to_lowercase().as_str() {
            "left" => Self::Left,
            "right" => Self::Right,
            _ => Self::Inner,
        }
    }
}

/// Relational binding for a record type.
#[derive(Debug)]
pub struct Table<T: Record> {
    dataset: String,
    name: String,
    columns: HashMap<String, Column>,
    _record: PhantomData<fn() -> T>,
}

impl<T: Record> Table<T> {
    /// Derive the table from `T`'s field metadata.
    ///
    /// Fails when a field's directives are malformed, a column name is
    /// invalid, or no field is marked `primary`.
    pub fn new(dataset: &str) -> Result<Self, SchemaError> {
        let name = to_snake_case(T::type_name());
        let mut columns = HashMap::new();
        let mut has_primary = false;

        for (index, field) in T::fields().iter().enumerate() {
            let Some(mut column) = Column::from_field(field, index)? else {
                continue;
            };
            column.table = name.clone();
            column.dataset = dataset.to_string();
            if column.primary {
                has_primary = true;
            }
            columns.insert(column.name.clone(), column);
        }

        if !has_primary {
            return Err(SchemaError::MissingPrimaryKey {
                type_name: T::type_name().to_string(),
            });
        }

        Ok(Self {
            dataset: dataset.to_string(),
            name,
            columns,
            _record: PhantomData,
        })
    }

    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn full_table_name(&self) -> String {
        format!("{}.{}", self.dataset, self.name)
    }

    pub fn columns(&self) -> &HashMap<String, Column> {
        &self.columns
    }

    /// Columns in declaration order.
    pub fn ordered_columns(&self) -> Vec<&Column> {
        let mut ordered: Vec<&Column> = self.columns.values().collect();
        ordered.sort_by_key(|c| c.column_order);
        ordered
    }

    /// Look a column up by (snake-cased) name.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.get(&to_snake_case(name))
    }

    pub fn primary_columns(&self) -> Vec<&Column> {
        self.ordered_columns()
            .into_iter()
            .filter(|c| c.primary)
            .collect()
    }

    pub fn generated_id_columns(&self) -> Vec<&Column> {
        self.ordered_columns()
            .into_iter()
            .filter(|c| c.auto_generate_id)
            .collect()
    }

    pub fn has_generated_id(&self) -> bool {
        self.columns.values().any(|c| c.auto_generate_id)
    }

    /// Synthesize IDs for the auto-generated columns: SHA-1 of a fresh
    /// UUIDv4, encoded per column (`uuid` keeps the raw UUID).
    pub fn generate_ids(&self) -> HashMap<String, String> {
        let mut ids = HashMap::new();
        for column in self.generated_id_columns() {
            let seed = Uuid::new_v4().to_string();
            let id = match column.auto_generate_id_type {
                GeneratedIdKind::Uuid => seed,
                GeneratedIdKind::Hex => {
                    let mut hasher = Sha1::new();
                    hasher.update(seed.as_bytes());
                    hex::encode(hasher.finalize())
                }
                GeneratedIdKind::Base64 => {
                    let mut hasher = Sha1::new();
                    hasher.update(seed.as_bytes());
                    BASE64_URL.encode(hasher.finalize())
                }
            };
            ids.insert(column.name.clone(), id);
        }
        ids
    }

    // ------------------------------------------------------------------
    // DDL
    // ------------------------------------------------------------------

    /// Schema plus table creation statements, in execution order.
    pub fn create_statements(&self) -> Vec<String> {
        let ordered = self.ordered_columns();
        let definitions: Vec<String> = ordered.iter().map(|c| c.definition()).collect();

        let primaries: Vec<&str> = ordered
            .iter()
            .filter(|c| c.primary)
            .map(|c| c.name.as_str())
            .collect();
        let primary_clause = if primaries.len() == 1 {
            format!("\n\tPRIMARY KEY({})", primaries[0])
        } else {
            format!(
                "\n\tCONSTRAINT PK_{}_{} PRIMARY KEY ({})",
                self.dataset,
                self.name,
                primaries.join(",")
            )
        };

        let fk_clause: String = ordered
            .iter()
            .filter(|c| c.has_foreign_key())
            .map(|c| format!(",{}", c.fk_fragment()))
            .collect();

        let create_table = format!(
            "CREATE TABLE IF NOT EXISTS {}({},{}{}\n) ENGINE=InnoDB DEFAULT CHARSET=utf8",
            self.full_table_name(),
            definitions.join(","),
            primary_clause,
            fk_clause,
        );

        vec![
            format!("CREATE SCHEMA IF NOT EXISTS {}", self.dataset),
            create_table,
        ]
    }

    /// ALTER statements reconciling this definition against the columns
    /// currently on the table: one ADD statement for missing columns, one
    /// DROP statement for columns no longer declared.
    pub fn reconcile_statements(&self, existing: &[String]) -> Vec<String> {
        let alter = format!("ALTER TABLE {} ", self.full_table_name());
        let mut statements = Vec::new();

        let additions: Vec<String> = self
            .ordered_columns()
            .iter()
            .filter(|c| !existing.iter().any(|e| e == &c.name))
            .map(|c| format!("ADD {}", c.definition()))
            .collect();
        if !additions.is_empty() {
            statements.push(format!("{alter}{};", additions.join(",")));
        }

        let removals: Vec<String> = existing
            .iter()
            .filter(|e| !self.columns.contains_key(*e))
            .map(|e| format!("DROP COLUMN {e}"))
            .collect();
        if !removals.is_empty() {
            statements.push(format!("{alter}{};", removals.join(",")));
        }

        statements
    }

    // ------------------------------------------------------------------
    // Statement generators
    // ------------------------------------------------------------------

    /// Batch insert with `:<row>_<col>` placeholders; `skip` columns are
    /// left to their DB-side defaults.
    pub fn insert_statement(&self, rows: usize) -> String {
        let names: Vec<&str> = self
            .ordered_columns()
            .into_iter()
            .filter(|c| !c.skip)
            .map(|c| c.name.as_str())
            .collect();
        if names.is_empty() || rows == 0 {
            return String::new();
        }
        let row_values: Vec<String> = (0..rows)
            .map(|i| {
                let placeholders: Vec<String> =
                    names.iter().map(|n| format!(":{i}_{n}")).collect();
                format!("({})", placeholders.join(","))
            })
            .collect();
        format!(
            "INSERT INTO {}({}) VALUES {};",
            self.full_table_name(),
            names.join(","),
            row_values.join(","),
        )
    }

    /// Insert extended with `ON DUPLICATE KEY UPDATE` over update columns.
    pub fn upsert_statement(&self, rows: usize) -> String {
        let insert = self.insert_statement(rows);
        if insert.is_empty() {
            return insert;
        }
        let insert = insert.trim_end_matches(';');
        let set_values: Vec<String> = self
            .ordered_columns()
            .into_iter()
            .filter(|c| c.update)
            .map(|c| format!("{} = VALUES({})", c.name, c.name))
            .collect();
        format!(
            "{insert}\nON DUPLICATE KEY UPDATE {}",
            set_values.join(", ")
        )
    }

    /// `UPDATE … SET update-columns WHERE primary/auto-id columns`. Empty
    /// SET or WHERE yields an empty statement the caller treats as a no-op.
    pub fn update_statement(&self) -> String {
        let mut set_values = Vec::new();
        let mut where_values = Vec::new();
        for column in self.ordered_columns() {
            if (column.primary && !column.update) || column.auto_generate_id {
                where_values.push(format!("{} = :{}", column.name, column.name));
            }
            if column.update {
                set_values.push(format!("{} = :{}", column.name, column.name));
            }
        }
        if set_values.is_empty() || where_values.is_empty() {
            return String::new();
        }
        format!(
            "UPDATE {} SET {} WHERE {}",
            self.full_table_name(),
            set_values.join(", "),
            where_values.join(" AND "),
        )
    }

    /// Delete keyed by the first `delete`-flagged column, else by the full
    /// primary key set.
    pub fn delete_statement(&self) -> String {
        let mut primary_values = Vec::new();
        for column in self.ordered_columns() {
            if column.primary {
                primary_values.push(format!("{} = :{}", column.name, column.name));
                continue;
            }
            if column.delete {
                return format!(
                    "DELETE FROM {} WHERE {} = :{}",
                    self.full_table_name(),
                    column.name,
                    column.name,
                );
            }
        }
        format!(
            "DELETE FROM {} WHERE {}",
            self.full_table_name(),
            primary_values.join(" AND "),
        )
    }

    /// WHERE fragments (`col op :col`) for the named columns; unknown names
    /// are skipped.
    pub fn where_values(&self, columns: &[&str]) -> Vec<String> {
        columns
            .iter()
            .filter_map(|name| self.columns.get(*name))
            .map(|c| c.where_fragment())
            .collect()
    }

    /// Full WHERE clause over the named columns.
    pub fn where_statement(&self, conditional: &str, columns: &[&str]) -> String {
        let values = self.where_values(columns);
        if values.is_empty() {
            return String::new();
        }
        let conditional = if conditional.is_empty() {
            "AND".to_string()
        } else {
            conditional.to_uppercase()
        };
        format!("WHERE {}", values.join(&format!(" {conditional} ")))
    }

    /// ORDER BY over the named columns, else every `order`-flagged column,
    /// sorted by priority.
    pub fn order_by_statement(&self, group_by: bool, order_by: &[&str]) -> String {
        let mut columns: Vec<&Column> = if order_by.is_empty() {
            self.ordered_columns()
                .into_iter()
                .filter(|c| c.order)
                .collect()
        } else {
            order_by
                .iter()
                .filter_map(|name| self.columns.get(*name))
                .collect()
        };
        if columns.is_empty() {
            return String::new();
        }
        columns.sort_by_key(|c| c.order_priority);
        let fragments: Vec<String> = columns.iter().map(|c| c.order_fragment(group_by)).collect();
        format!("ORDER BY {}", fragments.join(","))
    }

    /// `SELECT COUNT(*)` with an optional WHERE over the named columns.
    pub fn count_statement(&self, conditional: &str, columns: &[&str]) -> String {
        let where_clause = self.where_statement(conditional, columns);
        if where_clause.is_empty() {
            format!("SELECT COUNT(*) as count FROM {}", self.full_table_name())
        } else {
            format!(
                "SELECT COUNT(*) as count FROM {} {}",
                self.full_table_name(),
                where_clause
            )
        }
    }

    /// Select-list renderings. Explicit columns intersect with this table's
    /// selectable set; no explicit columns means every `select` column.
    pub fn selectable_columns(&self, group_by: bool, explicit: &[Column]) -> Vec<String> {
        if !explicit.is_empty() {
            return explicit
                .iter()
                .filter_map(|c| self.columns.get(&c.name))
                .filter(|c| c.select)
                .map(|c| c.full_name(group_by, true))
                .collect();
        }
        self.ordered_columns()
            .into_iter()
            .filter(|c| c.select)
            .map(|c| c.full_name(group_by, true))
            .collect()
    }

    // ------------------------------------------------------------------
    // Join composition
    // ------------------------------------------------------------------

    /// Does a foreign column overlap one of ours? Matches `join_name` or
    /// `name` across both sides; returns our side's column name.
    pub fn matching_column(&self, foreign: &Column) -> Option<String> {
        if !foreign.join && !foreign.select {
            return None;
        }
        if foreign.table == self.name && foreign.dataset == self.dataset {
            return None;
        }
        for column in self.ordered_columns() {
            if !foreign.join_name.is_empty()
                && !column.join_name.is_empty()
                && foreign.join_name == column.join_name
            {
                return Some(foreign.join_name.clone());
            }
            if !foreign.join_name.is_empty() && foreign.join_name == column.name {
                return Some(column.name.clone());
            }
            if foreign.name == column.name {
                return Some(column.name.clone());
            }
            if !column.join_name.is_empty() && foreign.name == column.join_name {
                return Some(column.name.clone());
            }
        }
        None
    }

    /// Foreign columns that overlap this table.
    pub fn common_columns(&self, columns: &HashMap<String, Column>) -> HashMap<String, Column> {
        columns
            .iter()
            .filter(|(_, column)| self.matching_column(column).is_some())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// JOIN clauses for the overlapping columns. The first overlap against
    /// a foreign table emits `JOIN t ON a = b`; later overlaps on the same
    /// table chain with ` AND `.
    pub fn join_fragment(&self, columns: &HashMap<String, Column>, kind: JoinKind) -> String {
        if columns.is_empty() {
            return String::new();
        }
        let mut ordered: Vec<&Column> = columns.values().collect();
        ordered.sort_by(|a, b| {
            (a.full_table_name(), &a.name).cmp(&(b.full_table_name(), &b.name))
        });

        let mut table_joins: Vec<(String, Vec<String>)> = Vec::new();
        for column in ordered {
            let Some(local_name) = self.matching_column(column) else {
                continue;
            };
            if !column.join {
                continue;
            }
            let foreign_table = column.full_table_name();
            let condition = format!(
                "{}.{} = {}.{}",
                column.table, column.name, self.name, local_name
            );
            match table_joins.iter_mut().find(|(name, _)| *name == foreign_table) {
                Some((_, conditions)) => conditions.push(condition),
                None => table_joins.push((
                    foreign_table.clone(),
                    vec![format!("{} {} ON {}", kind.as_sql(), foreign_table, condition)],
                )),
            }
        }

        table_joins
            .into_iter()
            .map(|(_, conditions)| conditions.join(" AND "))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Standalone select-with-join statement over this table. Errors when
    /// none of the foreign columns overlap.
    pub fn select_join_statement(
        &self,
        kind: JoinKind,
        order_by: &[&str],
        group_by: bool,
        foreign_tables: &[HashMap<String, Column>],
    ) -> Result<String, QueryError> {
        let mut overlapping = HashMap::new();
        let mut all_columns = HashMap::new();
        for columns in foreign_tables {
            overlapping.extend(self.common_columns(columns));
            all_columns.extend(columns.clone());
        }
        if overlapping.is_empty() {
            return Err(QueryError::NoOverlappingColumns {
                table: self.full_table_name(),
            });
        }

        let join_clause = self.join_fragment(&overlapping, kind);
        let where_fragments: Vec<String> = {
            let mut ordered: Vec<&Column> = all_columns.values().collect();
            ordered.sort_by(|a, b| (a.full_table_name(), &a.name).cmp(&(b.full_table_name(), &b.name)));
            ordered
                .iter()
                .filter(|c| !c.where_op.is_empty())
                .map(|c| c.where_fragment())
                .collect()
        };
        let mut statement = format!(
            "SELECT {} FROM {} {}",
            self.selectable_columns(group_by, &[]).join(","),
            self.full_table_name(),
            join_clause,
        );
        if !where_fragments.is_empty() {
            statement = format!("{} WHERE {}", statement, where_fragments.join(" AND "));
        }
        let order_clause = self.order_by_statement(group_by, order_by);
        if !order_clause.is_empty() {
            statement = format!("{} {}", statement, order_clause);
        }
        Ok(statement)
    }

    // ------------------------------------------------------------------
    // Row decoding
    // ------------------------------------------------------------------

    /// Decode a driver row into `T`, matching the aliased label
    /// (`table_col` / `select_as`) first and the bare column name second.
    pub fn decode_row(&self, row: &Row) -> Result<T, QueryError> {
        let mut object = serde_json::Map::new();
        for column in self.ordered_columns() {
            let alias = format!("{}_{}", self.name, column.name);
            let value = row
                .get(&alias)
                .or_else(|| {
                    if column.select_as.is_empty() {
                        None
                    } else {
                        row.get(&column.select_as)
                    }
                })
                .or_else(|| row.get(&column.name));
            if let Some(value) = value {
                object.insert(column.name.clone(), value.clone());
            }
        }
        serde_json::from_value(Value::Object(object))
            .map_err(|e| QueryError::Decode(e.to_string()))
    }

    // ------------------------------------------------------------------
    // Executors
    // ------------------------------------------------------------------

    async fn stamp_mutation(&self, monitor: &CacheMonitor, op: &str) {
        if let Err(err) = monitor.update_group(&self.full_table_name(), op).await {
            debug!(table = %self.full_table_name(), op, error = %err, "failed stamping table mutation");
        }
    }

    fn batch_args(&self, rows: &[T]) -> Result<(ArgMap, String), QueryError> {
        let generated = if self.has_generated_id() {
            self.generate_ids()
        } else {
            HashMap::new()
        };
        let first_id = self
            .generated_id_columns()
            .first()
            .and_then(|c| generated.get(&c.name))
            .cloned()
            .unwrap_or_default();

        let mut args = ArgMap::new();
        for (index, row) in rows.iter().enumerate() {
            let mut row_args = to_args(row)?;
            for (column, id) in &generated {
                row_args.insert(column.clone(), Value::String(id.clone()));
            }
            merge_into(&mut args, with_prefix(&format!("{index}_"), row_args))?;
        }
        Ok((args, first_id))
    }

    /// Insert a batch. Returns the first generated ID, empty when the table
    /// has no auto-generated column.
    pub async fn insert(
        &self,
        db: &dyn Database,
        monitor: &CacheMonitor,
        rows: &[T],
    ) -> Result<String, QueryError> {
        if rows.is_empty() {
            return Ok(String::new());
        }
        let (mut args, first_id) = self.batch_args(rows)?;
        let statement = expand_sequences(&self.insert_statement(rows.len()), &mut args);
        db.execute(&statement, &args).await?;
        self.stamp_mutation(monitor, "insert").await;
        Ok(first_id)
    }

    /// Upsert a batch. Same ID contract as `insert`.
    pub async fn upsert(
        &self,
        db: &dyn Database,
        monitor: &CacheMonitor,
        rows: &[T],
    ) -> Result<String, QueryError> {
        if rows.is_empty() {
            return Ok(String::new());
        }
        let (mut args, first_id) = self.batch_args(rows)?;
        let statement = expand_sequences(&self.upsert_statement(rows.len()), &mut args);
        db.execute(&statement, &args).await?;
        self.stamp_mutation(monitor, "upsert").await;
        Ok(first_id)
    }

    /// Update one row keyed by its primary/auto-id columns. A table with
    /// nothing to set or nothing to key on is a no-op.
    pub async fn update(
        &self,
        db: &dyn Database,
        monitor: &CacheMonitor,
        row: &T,
    ) -> Result<(), QueryError> {
        let statement = self.update_statement();
        if statement.is_empty() {
            return Ok(());
        }
        let mut args = to_args(row)?;
        let statement = expand_sequences(&statement, &mut args);
        db.execute(&statement, &args).await?;
        self.stamp_mutation(monitor, "update").await;
        Ok(())
    }

    /// Delete one row.
    pub async fn delete(
        &self,
        db: &dyn Database,
        monitor: &CacheMonitor,
        row: &T,
    ) -> Result<(), QueryError> {
        let mut args = to_args(row)?;
        let statement = expand_sequences(&self.delete_statement(), &mut args);
        db.execute(&statement, &args).await?;
        self.stamp_mutation(monitor, "delete").await;
        Ok(())
    }

    /// Run a named-arg select and decode the rows. `extra` values flatten
    /// into the arg map alongside any already-merged args.
    pub async fn named_select(
        &self,
        db: &dyn Database,
        statement: &str,
        args: ArgMap,
    ) -> Result<Vec<T>, QueryError> {
        let mut args = args;
        let statement = expand_sequences(statement, &mut args);
        let rows = db.query(&statement, &args).await?;
        rows.iter().map(|row| self.decode_row(row)).collect()
    }

    /// Count rows matching the named columns.
    pub async fn count(
        &self,
        db: &dyn Database,
        conditional: &str,
        columns: &[&str],
        args: ArgMap,
    ) -> Result<i64, QueryError> {
        let mut args = args;
        let statement = expand_sequences(&self.count_statement(conditional, columns), &mut args);
        let rows = db.query(&statement, &args).await?;
        let count = rows
            .first()
            .and_then(|row| row.get("count"))
            .and_then(Value::as_i64)
            .unwrap_or(0);
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record_fields;
    use crate::database::MockDatabase;
    use serde::{Deserialize, Serialize};
    use std::sync::Arc;
    use strata_cache::{MemoryBackend, TypedCache};
    use strata_core::{MemoryCacheConfig, MonitorConfig};

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    #[serde(default)]
    struct User {
        id: String,
        name: String,
        age: i64,
    }

    impl Record for User {
        fn type_name() -> &'static str {
            "User"
        }

        fn fields() -> Vec<crate::record::FieldSpec> {
            record_fields![
                "id" => "primary",
                "name" => "update;data_type::varchar(512)",
                "age" => "update;order;order_priority::1" as "int",
            ]
        }
    }

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    #[serde(default)]
    struct Session {
        token: String,
        user_id: String,
        note: String,
    }

    impl Record for Session {
        fn type_name() -> &'static str {
            "Session"
        }

        fn fields() -> Vec<crate::record::FieldSpec> {
            record_fields![
                "token" => "primary;auto_generate_id;auto_generate_id_type::hex",
                "user_id" => "join;join_name::id",
                "note" => "update",
                "-" => "skip",
            ]
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct NoPrimary {
        value: String,
    }

    impl Record for NoPrimary {
        fn type_name() -> &'static str {
            "NoPrimary"
        }

        fn fields() -> Vec<crate::record::FieldSpec> {
            record_fields!["value" => "update"]
        }
    }

    fn monitor() -> Arc<CacheMonitor> {
        let backend: Arc<dyn strata_cache::CacheBackend> =
            Arc::new(MemoryBackend::new(MemoryCacheConfig::default()));
        Arc::clone(TypedCache::new(backend, MonitorConfig::default()).monitor())
    }

    #[test]
    fn test_registration_derives_snake_name() {
        let table = Table::<User>::new("ds").unwrap();
        assert_eq!(table.name(), "user");
        assert_eq!(table.full_table_name(), "ds.user");
        assert_eq!(table.columns().len(), 3);
    }

    #[test]
    fn test_registration_requires_primary() {
        let err = Table::<NoPrimary>::new("ds").unwrap_err();
        assert!(matches!(err, SchemaError::MissingPrimaryKey { .. }));
    }

    #[test]
    fn test_skip_marker_excludes_field() {
        let table = Table::<Session>::new("ds").unwrap();
        assert_eq!(table.columns().len(), 3);
        assert!(table.column("-").is_none());
    }

    #[test]
    fn test_insert_statement_shape() {
        let table = Table::<User>::new("ds").unwrap();
        assert_eq!(
            table.insert_statement(2),
            "INSERT INTO ds.user(id,name,age) VALUES (:0_id,:0_name,:0_age),(:1_id,:1_name,:1_age);"
        );
    }

    #[test]
    fn test_upsert_statement_shape() {
        let table = Table::<User>::new("ds").unwrap();
        assert_eq!(
            table.upsert_statement(1),
            "INSERT INTO ds.user(id,name,age) VALUES (:0_id,:0_name,:0_age)\nON DUPLICATE KEY UPDATE name = VALUES(name), age = VALUES(age)"
        );
    }

    #[test]
    fn test_update_statement_shape() {
        let table = Table::<User>::new("ds").unwrap();
        assert_eq!(
            table.update_statement(),
            "UPDATE ds.user SET name = :name, age = :age WHERE id = :id"
        );
    }

    #[test]
    fn test_delete_statement_uses_primaries() {
        let table = Table::<User>::new("ds").unwrap();
        assert_eq!(table.delete_statement(), "DELETE FROM ds.user WHERE id = :id");
    }

    #[test]
    fn test_create_statements() {
        let table = Table::<User>::new("ds").unwrap();
        let statements = table.create_statements();
        assert_eq!(statements[0], "CREATE SCHEMA IF NOT EXISTS ds");
        assert!(statements[1].starts_with("CREATE TABLE IF NOT EXISTS ds.user("));
        assert!(statements[1].contains("id varchar(256) NOT NULL"));
        assert!(statements[1].contains("name varchar(512) NOT NULL"));
        assert!(statements[1].contains("\n\tPRIMARY KEY(id)"));
        assert!(statements[1].ends_with("ENGINE=InnoDB DEFAULT CHARSET=utf8"));
    }

    #[test]
    fn test_reconcile_statements() {
        let table = Table::<User>::new("ds").unwrap();
        let statements = table.reconcile_statements(&[
            "id".to_string(),
            "name".to_string(),
            "legacy".to_string(),
        ]);
        assert_eq!(statements.len(), 2);
        assert_eq!(statements[0], "ALTER TABLE ds.user ADD age int NOT NULL;");
        assert_eq!(statements[1], "ALTER TABLE ds.user DROP COLUMN legacy;");
    }

    #[test]
    fn test_generated_ids_encodings() {
        let table = Table::<Session>::new("ds").unwrap();
        let ids = table.generate_ids();
        let token = ids.get("token").unwrap();
        // SHA-1 hex digest
        assert_eq!(token.len(), 40);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_where_and_order_statements() {
        let table = Table::<User>::new("ds").unwrap();
        assert_eq!(
            table.where_statement("or", &["id", "name"]),
            "WHERE ds.user.id = :id OR ds.user.name = :name"
        );
        assert_eq!(
            table.order_by_statement(false, &[]),
            "ORDER BY ds.user.age"
        );
        assert_eq!(
            table.count_statement("", &["id"]),
            "SELECT COUNT(*) as count FROM ds.user WHERE ds.user.id = :id"
        );
    }

    #[test]
    fn test_join_composition() {
        let users = Table::<User>::new("ds").unwrap();
        let sessions = Table::<Session>::new("ds").unwrap();

        let overlap = users.common_columns(sessions.columns());
        assert!(overlap.contains_key("user_id"));

        let fragment = users.join_fragment(&overlap, JoinKind::Left);
        assert_eq!(fragment, "LEFT JOIN ds.session ON session.user_id = user.id");
    }

    #[test]
    fn test_no_overlap_errors() {
        let users = Table::<User>::new("ds").unwrap();
        let unrelated: HashMap<String, Column> = HashMap::new();
        let err = users
            .select_join_statement(JoinKind::Inner, &[], false, &[unrelated])
            .unwrap_err();
        assert!(matches!(err, QueryError::NoOverlappingColumns { .. }));
    }

    #[test]
    fn test_decode_row_accepts_alias_or_bare() {
        let table = Table::<User>::new("ds").unwrap();
        let mut row = Row::new();
        row.insert("user_id".to_string(), serde_json::json!("u1"));
        row.insert("name".to_string(), serde_json::json!("Ada"));
        row.insert("user_age".to_string(), serde_json::json!(36));
        let user = table.decode_row(&row).unwrap();
        assert_eq!(
            user,
            User {
                id: "u1".to_string(),
                name: "Ada".to_string(),
                age: 36
            }
        );
    }

    #[tokio::test]
    async fn test_insert_executes_and_stamps_group() {
        let table = Table::<User>::new("ds").unwrap();
        let db = MockDatabase::new();
        let monitor = monitor();

        let user = User {
            id: "u1".to_string(),
            name: "Ada".to_string(),
            age: 36,
        };
        let id = table.insert(&db, &monitor, &[user]).await.unwrap();
        assert!(id.is_empty());

        let (statement, args) = db.last_statement().unwrap();
        assert!(statement.starts_with("INSERT INTO ds.user"));
        assert_eq!(args.get("0_id").unwrap(), "u1");
        assert_eq!(args.get("0_age").unwrap(), 36);

        // the table's cache group was stamped
        assert!(monitor.group_keys("ds.user").await.unwrap().contains("insert"));
    }

    #[tokio::test]
    async fn test_insert_batch_generates_id() {
        let table = Table::<Session>::new("ds").unwrap();
        let db = MockDatabase::new();
        let monitor = monitor();

        let session = Session {
            token: String::new(),
            user_id: "u1".to_string(),
            note: "first".to_string(),
        };
        let id = table.insert(&db, &monitor, &[session]).await.unwrap();
        assert_eq!(id.len(), 40);

        let (_, args) = db.last_statement().unwrap();
        assert_eq!(args.get("0_token").unwrap(), id.as_str());
    }

    #[tokio::test]
    async fn test_update_noop_without_updatable_columns() {
        #[derive(Debug, Clone, Default, Serialize, Deserialize)]
        #[serde(default)]
        struct Marker {
            id: String,
        }
        impl Record for Marker {
            fn type_name() -> &'static str {
                "Marker"
            }
            fn fields() -> Vec<crate::record::FieldSpec> {
                record_fields!["id" => "primary"]
            }
        }

        let table = Table::<Marker>::new("ds").unwrap();
        let db = MockDatabase::new();
        let monitor = monitor();
        table
            .update(&db, &monitor, &Marker { id: "m".to_string() })
            .await
            .unwrap();
        assert_eq!(db.statement_count(), 0);
    }

    #[tokio::test]
    async fn test_named_select_decodes() {
        let table = Table::<User>::new("ds").unwrap();
        let db = MockDatabase::new();
        let mut row = Row::new();
        row.insert("user_id".to_string(), serde_json::json!("u1"));
        row.insert("user_name".to_string(), serde_json::json!("Ada"));
        row.insert("user_age".to_string(), serde_json::json!(36));
        db.push_rows(vec![row]);

        let rows = table
            .named_select(&db, "SELECT * FROM ds.user", ArgMap::new())
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "Ada");
    }

    #[tokio::test]
    async fn test_count_reads_count_column() {
        let table = Table::<User>::new("ds").unwrap();
        let db = MockDatabase::new();
        let mut row = Row::new();
        row.insert("count".to_string(), serde_json::json!(7));
        db.push_rows(vec![row]);

        let count = table.count(&db, "", &[], ArgMap::new()).await.unwrap();
        assert_eq!(count, 7);
    }
}
