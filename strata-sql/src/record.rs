//! Record registration contract.
//!
//! Table definitions are derived from per-field metadata each record type
//! declares about itself. Without runtime reflection, every record type
//! registers its own extractor: a type name plus an ordered field list,
//! with values flowing through serde for arg flattening and row decoding.

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Declared metadata for one record field. Field order in [`Record::fields`]
/// defines the column order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    /// Column name, or `-` to exclude the field.
    pub name: &'static str,
    /// Semicolon-delimited directive list.
    pub config: &'static str,
    /// SQL type used when no `data_type::` directive overrides it.
    pub sql_type: &'static str,
}

impl FieldSpec {
    pub const fn new(name: &'static str, config: &'static str) -> Self {
        Self {
            name,
            config,
            sql_type: "varchar(256)",
        }
    }

    pub const fn with_sql_type(mut self, sql_type: &'static str) -> Self {
        self.sql_type = sql_type;
        self
    }
}

/// A type that maps to a relational table.
///
/// Serde names must match the declared column names so args flatten and rows
/// decode symmetrically.
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Bare type name; the table name is its snake-case form.
    fn type_name() -> &'static str;

    /// Ordered field metadata.
    fn fields() -> Vec<FieldSpec>;
}

/// Declarative field list for [`Record::fields`] implementations.
///
/// ```ignore
/// fn fields() -> Vec<FieldSpec> {
///     record_fields![
///         "id" => "primary;auto_generate_id",
///         "name" => "update" as "varchar(512)",
///         "age" => "update" as "int",
///     ]
/// }
/// ```
#[macro_export]
macro_rules! record_fields {
    ($($name:literal => $config:literal $(as $sql:literal)?),* $(,)?) => {
        vec![
            $(
                $crate::record::FieldSpec::new($name, $config)$(.with_sql_type($sql))?
            ),*
        ]
    };
}
