//! Error types for strata operations.

use std::fmt;
use thiserror::Error;

/// Cache layer errors.
///
/// `Miss` and `Updated` are sentinels rather than failures: a miss means the
/// entry is absent or expired, an update means the entry's group was
/// invalidated since the caller last observed it. Transport problems are
/// reported separately so callers can distinguish "not there" from "could
/// not ask".
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache missed")]
    Miss,

    #[error("cache updated")]
    Updated,

    #[error("backend {name}: {message}")]
    Backend { name: String, message: String },

    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error("backend disabled")]
    Disabled,

    #[error("{0}")]
    Fanout(AggregateError),
}

impl CacheError {
    /// Build a transport error for the named backend.
    pub fn backend(name: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Backend {
            name: name.into(),
            message: message.to_string(),
        }
    }

    /// True for the absence sentinel.
    pub fn is_miss(&self) -> bool {
        matches!(self, Self::Miss)
    }

    /// True for the group-invalidation sentinel.
    pub fn is_updated(&self) -> bool {
        matches!(self, Self::Updated)
    }
}

/// Order-preserving collection of per-tier errors.
///
/// A fan-out across tiers only fails as a whole when every tier failed; the
/// aggregate keeps each tier's error in tier order so the report reads the
/// way the cascade ran.
#[derive(Debug, Default)]
pub struct AggregateError {
    errors: Vec<CacheError>,
}

impl AggregateError {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, err: CacheError) {
        self.errors.push(err);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn errors(&self) -> &[CacheError] {
        &self.errors
    }

    /// Collapse into a result: no errors is `Ok`.
    pub fn into_result(self) -> Result<(), CacheError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(CacheError::Fanout(self))
        }
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for err in &self.errors {
            if !first {
                write!(f, "; ")?;
            }
            write!(f, "{err}")?;
            first = false;
        }
        Ok(())
    }
}

/// Schema extraction errors, raised at table registration time.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("no field of {type_name} is marked primary")]
    MissingPrimaryKey { type_name: String },

    #[error("column name {column} is a reserved SQL keyword")]
    ReservedKeyword { column: String },

    #[error("invalid column name: {column}")]
    InvalidColumnName { column: String },

    #[error("invalid directive {directive}: {reason}")]
    InvalidDirective { directive: String, reason: String },
}

/// Query composition and execution errors.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("table {name} is not registered with the session")]
    TableNotRegistered { name: String },

    #[error("no database configured for the session")]
    DatabaseNotConfigured,

    #[error("no overlapping columns found for join against {table}")]
    NoOverlappingColumns { table: String },

    #[error("query returned no rows")]
    EmptyResult,

    #[error("argument {name} bound twice with different values")]
    DuplicateArg { name: String },

    #[error("invalid argument: {reason}")]
    InvalidArg { reason: String },

    #[error("row decode failed: {0}")]
    Decode(String),

    #[error("execution failed: {message}")]
    Execution { message: String },
}

impl QueryError {
    pub fn execution(message: impl fmt::Display) -> Self {
        Self::Execution {
            message: message.to_string(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Umbrella error for the whole workspace.
#[derive(Debug, Error)]
pub enum StrataError {
    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Result alias used across the workspace.
pub type StrataResult<T> = Result<T, StrataError>;
