// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Engine abstraction
//!
//! The analytical engine is an opaque collaborator. duckgate only needs to
//! open a connection, run a statement (directly or as a prepared statement),
//! interrupt whatever is running, and tear the connection down. Everything
//! else about the engine stays behind these traits.

pub mod memory;

#[cfg(feature = "duckdb-backend")]
pub mod duckdb;

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

pub use memory::{EngineRecorder, ExecutedStatement, MemoryEngine, MemoryEngineFactory, ScriptedResult};

#[cfg(feature = "duckdb-backend")]
pub use self::duckdb::{DuckDbEngine, DuckDbEngineFactory};

/// Reads the engine's reserved keywords
pub const RESERVED_KEYWORDS_SQL: &str =
    "SELECT keyword_name FROM duckdb_keywords() WHERE keyword_category = 'reserved'";

/// Lists user-visible tables and views, one name per row
pub const SHOW_TABLES_SQL: &str = "SHOW TABLES";

/// Default database name for a fresh connection
pub const IN_MEMORY_DATABASE: &str = ":memory:";

/// Errors raised by an engine implementation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// Statement or connection failure, message reported by the engine
    #[error("{0}")]
    Failed(String),

    /// The running statement observed an interrupt
    #[error("INTERRUPT Error: Interrupted!")]
    Interrupted,

    /// The connection was already torn down
    #[error("Connection Error: connection has been closed")]
    Closed,
}

impl From<EngineError> for crate::Error {
    fn from(err: EngineError) -> Self {
        crate::Error::EngineExecution(err.to_string())
    }
}

/// Where to connect and how to authenticate
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default = "default_database")]
    pub database: String,
    /// Remote-service token
    #[serde(
        rename = "mdToken",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub token: Option<String>,
}

fn default_database() -> String {
    IN_MEMORY_DATABASE.to_string()
}

impl Credentials {
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            token: None,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(IN_MEMORY_DATABASE)
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
}

impl Default for Credentials {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("database", &self.database)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Column metadata as reported by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawField {
    pub name: String,
    /// Engine type name, e.g. `VARCHAR` or `DECIMAL(18,3)`
    pub database_type: String,
}

impl RawField {
    pub fn new(name: impl Into<String>, database_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            database_type: database_type.into(),
        }
    }
}

/// One positional row, in field order
pub type RawRow = Vec<Value>;

/// Lazily produced chunks of rows
pub type RawChunks = Box<dyn Iterator<Item = Result<Vec<RawRow>, EngineError>> + Send>;

/// Row payload of a raw result
pub enum RawRows {
    /// Every row is already in memory
    Materialized(Vec<RawRow>),
    /// Rows arrive in engine-sized chunks as they are pulled
    Streaming(RawChunks),
}

impl fmt::Debug for RawRows {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawRows::Materialized(rows) => write!(f, "Materialized({} rows)", rows.len()),
            RawRows::Streaming(_) => write!(f, "Streaming(..)"),
        }
    }
}

/// What the engine hands back for a statement
#[derive(Debug)]
pub struct RawResult {
    pub fields: Vec<RawField>,
    pub rows: RawRows,
}

impl RawResult {
    pub fn materialized(fields: Vec<RawField>, rows: Vec<RawRow>) -> Self {
        Self {
            fields,
            rows: RawRows::Materialized(rows),
        }
    }

    pub fn streaming(fields: Vec<RawField>, chunks: RawChunks) -> Self {
        Self {
            fields,
            rows: RawRows::Streaming(chunks),
        }
    }

    /// Result of a statement that produces no rows (DDL and the like)
    pub fn empty() -> Self {
        Self::materialized(Vec::new(), Vec::new())
    }
}

/// Signals a running statement to stop
///
/// Must be callable from any thread while the engine itself is busy.
pub trait InterruptHandle: Send + Sync {
    fn interrupt(&self);
}

/// One live engine connection
///
/// Calls are blocking and are always made from the blocking pool, one at a
/// time.
pub trait Engine: Send {
    /// Run a statement through the direct text path
    fn execute(&mut self, sql: &str) -> Result<RawResult, EngineError>;

    /// Prepare a statement and bind `parameters` positionally
    fn execute_prepared(
        &mut self,
        sql: &str,
        parameters: &[Value],
    ) -> Result<RawResult, EngineError>;

    fn interrupt_handle(&self) -> Arc<dyn InterruptHandle>;

    /// Release the connection. Called at most once.
    fn close(&mut self) -> Result<(), EngineError>;
}

/// Opens engine connections
pub trait EngineFactory: Send + Sync {
    fn connect(&self, credentials: &Credentials) -> Result<Box<dyn Engine>, EngineError>;
}
