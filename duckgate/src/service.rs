// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Query service abstraction
//!
//! The same set of operations is served either in-process by a
//! [`Session`](crate::session::Session) or across the execution-context
//! boundary by a [`Bridge`](crate::bridge::Bridge). The client is written
//! against this trait only.

use crate::adapter::RowBatch;
use crate::coordinator::{CancelOutcome, QueryHandle, QueryRequest, QueryStatus};
use crate::engine::Credentials;
use crate::error::Result;
use crate::provision::{ProvisionReport, ViewSpec};
use async_trait::async_trait;
use std::time::Duration;

/// Operations available on one logical engine connection
#[async_trait]
pub trait QueryService: Send + Sync {
    /// Open the connection and provision configured views
    ///
    /// # Returns
    /// * `Ok(report)` - Per-view outcome of the configured views
    /// * `Err(Error::Initialization)` - If the engine could not be reached
    async fn initialize(&self, credentials: Credentials) -> Result<ProvisionReport>;

    /// Execute a query, failing with `AlreadyRunning` if one is in flight
    async fn execute(&self, request: QueryRequest) -> Result<QueryHandle>;

    /// Next batch of a cursor returned by `execute`
    ///
    /// # Returns
    /// * `Ok(Some(batch))` - The next non-empty batch
    /// * `Ok(None)` - The result is exhausted
    async fn fetch(&self, cursor: u64) -> Result<Option<RowBatch>>;

    /// Cancel the running query, optionally bounding the wait
    async fn cancel(&self, timeout: Option<Duration>) -> Result<CancelOutcome>;

    async fn status(&self) -> Result<QueryStatus>;

    async fn provision_views(&self, views: Vec<ViewSpec>) -> Result<ProvisionReport>;

    /// Names of tables and views visible on the connection
    async fn list_tables(&self) -> Result<Vec<String>>;

    /// Release the connection. Idempotent.
    async fn close(&self) -> Result<()>;
}
