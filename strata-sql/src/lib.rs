//! Metadata-driven relational mapper with a cache-aware query builder.
//!
//! Record types declare per-field directives; a [`Table`] derives column
//! metadata and CRUD statements from them, a [`Query`] composes
//! parameterised SQL over that metadata, and a [`Session`] wires both to a
//! [`Database`] implementation and the strata cache. Query results cached
//! under a table's group are invalidated by any mutation of that table,
//! across every process sharing the central cache tier.
//!
//! # Example
//!
//! ```ignore
//! #[derive(Clone, Serialize, Deserialize)]
//! struct User { id: String, name: String, age: i64 }
//!
//! impl Record for User {
//!     fn type_name() -> &'static str { "User" }
//!     fn fields() -> Vec<FieldSpec> {
//!         record_fields![
//!             "id" => "primary;auto_generate_id",
//!             "name" => "update;data_type::varchar(512)",
//!             "age" => "update" as "int",
//!         ]
//!     }
//! }
//!
//! let session = Session::new(database, cache, DatabaseConfig::default());
//! session.register_table::<User>("ds").await?;
//!
//! let mut query = session.query::<User>()?;
//! let age = query.column("age");
//! let adults = query
//!     .where_(age, ">=", "AND", 0, 18)
//!     .use_cache()
//!     .run(&session, &[])
//!     .await?;
//! ```

pub mod record;

pub mod args;
pub mod column;
pub mod database;
pub mod query;
pub mod session;
pub mod table;

pub use args::{expand_sequences, merge_values, to_args, with_prefix, ArgMap};
pub use column::{Column, ForeignKey, GeneratedIdKind, OrderDirection};
pub use database::{Database, MockDatabase, Row};
pub use query::{Query, WhereClause};
pub use record::{FieldSpec, Record};
pub use session::Session;
pub use table::{JoinKind, Table};

pub use strata_core::{DatabaseConfig, QueryError, SchemaError};
