//! Session: the explicit home for shared handles.
//!
//! A session owns the database handle, the typed cache (with its monitor),
//! and the registry of table definitions. Everything the original design
//! threaded through an ambient context bag is a field here; building a
//! session without a database or cache is impossible by construction.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use strata_cache::{CacheMonitor, TypedCache};
use strata_core::{DatabaseConfig, QueryError, StrataError, StrataResult};

use crate::args::ArgMap;
use crate::database::Database;
use crate::query::Query;
use crate::record::Record;
use crate::table::Table;

/// Shared handles plus the typed table registry.
pub struct Session {
    database: Arc<dyn Database>,
    cache: TypedCache,
    config: DatabaseConfig,
    tables: RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl Session {
    pub fn new(database: Arc<dyn Database>, cache: TypedCache, config: DatabaseConfig) -> Self {
        Self {
            database,
            cache,
            config,
            tables: RwLock::new(HashMap::new()),
        }
    }

    pub fn database(&self) -> &Arc<dyn Database> {
        &self.database
    }

    pub fn cache(&self) -> &TypedCache {
        &self.cache
    }

    pub fn monitor(&self) -> &Arc<CacheMonitor> {
        self.cache.monitor()
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// Derive `T`'s table, run its DDL (and reconciliation when enabled),
    /// and register it for lookup.
    pub async fn register_table<T: Record>(&self, dataset: &str) -> StrataResult<Arc<Table<T>>> {
        let dataset = self.database.dataset(dataset);
        let table = Arc::new(Table::<T>::new(&dataset)?);

        for statement in table.create_statements() {
            self.database
                .execute(&statement, &ArgMap::new())
                .await
                .map_err(StrataError::from)?;
        }

        if self.config.update_tables {
            let existing = self
                .database
                .table_columns(table.dataset(), table.name())
                .await
                .map_err(StrataError::from)?;
            if !existing.is_empty() {
                for statement in table.reconcile_statements(&existing) {
                    self.database
                        .execute(&statement, &ArgMap::new())
                        .await
                        .map_err(StrataError::from)?;
                }
            }
        }

        self.tables.write().insert(
            TypeId::of::<T>(),
            Arc::clone(&table) as Arc<dyn Any + Send + Sync>,
        );
        Ok(table)
    }

    /// Look up the registered table for `T`.
    pub fn table<T: Record>(&self) -> Result<Arc<Table<T>>, QueryError> {
        let tables = self.tables.read();
        let entry = tables
            .get(&TypeId::of::<T>())
            .ok_or_else(|| QueryError::TableNotRegistered {
                name: T::type_name().to_string(),
            })?;
        Arc::clone(entry)
            .downcast::<Table<T>>()
            .map_err(|_| QueryError::TableNotRegistered {
                name: T::type_name().to_string(),
            })
    }

    /// Start a query over `T`'s table.
    pub fn query<T: Record>(&self) -> Result<Query<T>, QueryError> {
        Ok(Query::new(self.table::<T>()?))
    }

    // ------------------------------------------------------------------
    // Convenience CRUD over registered tables
    // ------------------------------------------------------------------

    /// Insert one row; returns the generated ID when the table synthesizes
    /// one.
    pub async fn insert<T: Record>(&self, row: &T) -> Result<String, QueryError> {
        let table = self.table::<T>()?;
        table
            .insert(
                self.database.as_ref(),
                self.monitor(),
                std::slice::from_ref(row),
            )
            .await
    }

    /// Upsert one row.
    pub async fn upsert<T: Record>(&self, row: &T) -> Result<String, QueryError> {
        let table = self.table::<T>()?;
        table
            .upsert(
                self.database.as_ref(),
                self.monitor(),
                std::slice::from_ref(row),
            )
            .await
    }

    /// Update one row.
    pub async fn update<T: Record>(&self, row: &T) -> Result<(), QueryError> {
        let table = self.table::<T>()?;
        table
            .update(self.database.as_ref(), self.monitor(), row)
            .await
    }

    /// Delete one row.
    pub async fn delete<T: Record>(&self, row: &T) -> Result<(), QueryError> {
        let table = self.table::<T>()?;
        table
            .delete(self.database.as_ref(), self.monitor(), row)
            .await
    }

    /// Delete several rows, stopping on the first failure.
    pub async fn delete_all<T: Record>(&self, rows: &[T]) -> Result<(), QueryError> {
        for row in rows {
            self.delete(row).await?;
        }
        Ok(())
    }

    /// Fetch a single row by its `id` column.
    pub async fn get_by_id<T: Record>(&self, id: &str) -> Result<T, QueryError> {
        let mut query = self.query::<T>()?;
        let id_column = query.column("id");
        query
            .where_(id_column, "=", "AND", 0, id)
            .run_single(self, &[])
            .await
    }

    /// List every row of `T`'s table.
    pub async fn list<T: Record>(&self) -> Result<Vec<T>, QueryError> {
        self.query::<T>()?.run(self, &[]).await
    }

    /// Close the database and cache handles.
    pub async fn close(&self) {
        self.database.close().await;
        self.cache.backend().close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record_fields;
    use crate::database::MockDatabase;
    use serde::{Deserialize, Serialize};
    use strata_cache::{CacheBackend, MemoryBackend};
    use strata_core::{MemoryCacheConfig, MonitorConfig};

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    #[serde(default)]
    struct Role {
        id: String,
        name: String,
        priority: i64,
    }

    impl Record for Role {
        fn type_name() -> &'static str {
            "Role"
        }

        fn fields() -> Vec<crate::record::FieldSpec> {
            record_fields![
                "id" => "primary;auto_generate_id",
                "name" => "update;data_type::varchar(512)",
                "priority" => "update;default::0" as "int",
            ]
        }
    }

    fn session_over(db: Arc<MockDatabase>) -> Session {
        let backend: Arc<dyn CacheBackend> =
            Arc::new(MemoryBackend::new(MemoryCacheConfig::default()));
        Session::new(
            db,
            TypedCache::new(backend, MonitorConfig::default()),
            DatabaseConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_register_table_runs_ddl() {
        let db = Arc::new(MockDatabase::new());
        let session = session_over(Arc::clone(&db));

        session.register_table::<Role>("auth").await.unwrap();

        let statements = db.statements();
        assert_eq!(statements.len(), 2);
        assert_eq!(statements[0].0, "CREATE SCHEMA IF NOT EXISTS auth");
        assert!(statements[1].0.starts_with("CREATE TABLE IF NOT EXISTS auth.role("));
    }

    #[tokio::test]
    async fn test_unregistered_table_errors() {
        let db = Arc::new(MockDatabase::new());
        let session = session_over(db);
        let err = session.table::<Role>().unwrap_err();
        assert!(matches!(err, QueryError::TableNotRegistered { .. }));
    }

    #[tokio::test]
    async fn test_insert_through_session_generates_id() {
        let db = Arc::new(MockDatabase::new());
        let session = session_over(Arc::clone(&db));
        session.register_table::<Role>("auth").await.unwrap();

        let id = session
            .insert(&Role {
                id: String::new(),
                name: "admin".to_string(),
                priority: 1,
            })
            .await
            .unwrap();
        assert!(!id.is_empty());

        let (statement, _) = db.last_statement().unwrap();
        assert!(statement.starts_with("INSERT INTO auth.role"));
    }

    #[tokio::test]
    async fn test_reconciliation_when_enabled() {
        let db = Arc::new(MockDatabase::new());
        db.set_existing_columns(vec![
            "id".to_string(),
            "name".to_string(),
            "stale_column".to_string(),
        ]);
        let backend: Arc<dyn CacheBackend> =
            Arc::new(MemoryBackend::new(MemoryCacheConfig::default()));
        let session = Session::new(
            Arc::clone(&db) as Arc<dyn Database>,
            TypedCache::new(backend, MonitorConfig::default()),
            DatabaseConfig::new().with_update_tables(true),
        );

        session.register_table::<Role>("auth").await.unwrap();

        let statements: Vec<String> = db.statements().into_iter().map(|(s, _)| s).collect();
        assert!(statements
            .iter()
            .any(|s| s.starts_with("ALTER TABLE auth.role ADD priority")));
        assert!(statements
            .iter()
            .any(|s| s.contains("DROP COLUMN stale_column")));
    }

    #[tokio::test]
    async fn test_get_by_id_maps_empty_to_error() {
        let db = Arc::new(MockDatabase::new());
        let session = session_over(db);
        session.register_table::<Role>("auth").await.unwrap();

        let err = session.get_by_id::<Role>("missing").await.unwrap_err();
        assert!(matches!(err, QueryError::EmptyResult));
    }
}
