// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! duckgate - query coordination for an isolated embedded analytical engine
//!
//! duckgate mediates access to an embedded analytical engine (DuckDB) that
//! lives behind an isolation boundary: a dedicated execution context reached
//! only through asynchronous messages.
//!
//! # Features
//!
//! - **Single-flight execution**: at most one query runs per connection;
//!   concurrent submissions fail fast with `AlreadyRunning`
//! - **Cooperative cancellation**: one interrupt per cancel, optionally bounded
//!   by a caller deadline
//! - **Lazy streaming**: rows cross the boundary batch by batch with a schema
//!   known up front
//! - **View provisioning**: declarative parquet-backed views whose names are
//!   sanitized and kept clear of reserved keywords
//!
//! # Usage
//!
//! ```rust,no_run
//! use duckgate::{Client, Config, Credentials, MemoryEngineFactory};
//! use std::sync::Arc;
//!
//! # async fn run() -> duckgate::Result<()> {
//! let client = Client::new(Arc::new(MemoryEngineFactory::new()), Config::default())?;
//! client.initialize(Credentials::in_memory()).await?;
//! let rows = client.query("SELECT 'Hello' AS greeting").await?.collect_rows().await?;
//! # Ok(())
//! # }
//! ```
//!
//! With the `duckdb-backend` feature, use `DuckDbEngineFactory` to drive a
//! real DuckDB database.

pub mod adapter;
pub mod bridge;
pub mod catalog;
pub mod client;
pub mod config;
pub mod connection;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod provision;
pub mod service;
pub mod session;
pub mod value;

pub use adapter::{ResultAdapter, Row, RowBatch, SchemaField};
pub use bridge::Bridge;
pub use catalog::{CatalogPolicy, ReservedCatalog, ReservedIdentifierSet};
pub use client::{Client, QueryStream};
pub use config::Config;
pub use connection::{ConnectionManager, ConnectionState, ExecutionStrategy};
pub use coordinator::{
    CancelOutcome, QueryCoordinator, QueryHandle, QueryRequest, QueryState, QueryStatus,
};
pub use engine::{
    Credentials, Engine, EngineError, EngineFactory, EngineRecorder, MemoryEngineFactory,
    ScriptedResult,
};
pub use error::{Error, ErrorKind, Result};
pub use provision::{ProvisionReport, ViewOutcome, ViewProvisioner, ViewSpec};
pub use service::QueryService;
pub use session::Session;
pub use value::Value;

#[cfg(feature = "duckdb-backend")]
pub use engine::{DuckDbEngine, DuckDbEngineFactory};

/// duckgate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
