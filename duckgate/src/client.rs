// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Consumer-facing client
//!
//! The strategy chosen in [`Config`] decides whether calls are served by an
//! in-process [`Session`] or relayed to the execution context through a
//! [`Bridge`]. Either way the caller sees the same API.

use crate::adapter::{Row, RowBatch, SchemaField};
use crate::bridge::Bridge;
use crate::config::Config;
use crate::connection::ExecutionStrategy;
use crate::coordinator::{CancelOutcome, QueryHandle, QueryRequest, QueryStatus};
use crate::engine::{Credentials, EngineFactory};
use crate::error::Result;
use crate::provision::{ProvisionReport, ViewSpec};
use crate::service::QueryService;
use crate::session::Session;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;

/// Handle on one logical engine connection
///
/// # Examples
///
/// ```no_run
/// use duckgate::{Client, Config, Credentials, MemoryEngineFactory};
/// use std::sync::Arc;
///
/// # async fn run() -> duckgate::Result<()> {
/// let client = Client::new(Arc::new(MemoryEngineFactory::new()), Config::default())?;
/// client.initialize(Credentials::in_memory()).await?;
///
/// let mut stream = client.query("SELECT 'Hello' AS greeting").await?;
/// while let Some(batch) = stream.next_batch().await? {
///     for row in batch {
///         println!("{:?}", row.get("greeting"));
///     }
/// }
/// client.close().await?;
/// # Ok(())
/// # }
/// ```
pub struct Client {
    service: Arc<dyn QueryService>,
    bridge: Option<Arc<Bridge>>,
    strategy: ExecutionStrategy,
}

impl Client {
    pub fn new(factory: Arc<dyn EngineFactory>, config: Config) -> Result<Self> {
        config.validate()?;
        let strategy = config.strategy;

        if strategy.is_relayed() {
            let bridge = Arc::new(Bridge::new(factory, config));
            Ok(Self {
                service: bridge.clone(),
                bridge: Some(bridge),
                strategy,
            })
        } else {
            Ok(Self {
                service: Arc::new(Session::new(factory, config)),
                bridge: None,
                strategy,
            })
        }
    }

    pub fn strategy(&self) -> ExecutionStrategy {
        self.strategy
    }

    /// Open the connection; also provisions the configured views
    pub async fn initialize(&self, credentials: Credentials) -> Result<ProvisionReport> {
        self.service.initialize(credentials).await
    }

    pub async fn query(&self, text: &str) -> Result<QueryStream> {
        self.execute(QueryRequest::new(text)).await
    }

    /// Execute a statement with positional parameters (prepared path)
    pub async fn query_with_params<I, V>(&self, text: &str, parameters: I) -> Result<QueryStream>
    where
        I: IntoIterator<Item = V>,
        V: Into<crate::value::Value>,
    {
        self.execute(QueryRequest::new(text).with_parameters(parameters))
            .await
    }

    pub async fn execute(&self, request: QueryRequest) -> Result<QueryStream> {
        let handle = self.service.execute(request).await?;
        Ok(QueryStream {
            service: self.service.clone(),
            handle,
            finished: false,
        })
    }

    /// Cancel the running query; a no-op when nothing runs
    pub async fn cancel(&self) -> Result<CancelOutcome> {
        self.service.cancel(None).await
    }

    /// Cancel, forcing the query state back to idle after `timeout`
    pub async fn cancel_with_timeout(&self, timeout: Duration) -> Result<CancelOutcome> {
        self.service.cancel(Some(timeout)).await
    }

    pub async fn status(&self) -> Result<QueryStatus> {
        self.service.status().await
    }

    pub async fn provision_views(&self, views: Vec<ViewSpec>) -> Result<ProvisionReport> {
        self.service.provision_views(views).await
    }

    pub async fn list_tables(&self) -> Result<Vec<String>> {
        self.service.list_tables().await
    }

    /// Close the connection; the client may be initialized again afterwards
    pub async fn close(&self) -> Result<()> {
        self.service.close().await
    }

    /// Close the connection and stop the execution context, if any
    pub async fn shutdown(&self) -> Result<()> {
        let closed = self.service.close().await;
        if let Some(bridge) = &self.bridge {
            bridge.terminate().await;
        }
        closed
    }
}

/// Lazily fetched rows of one query
///
/// Each [`next_batch`](QueryStream::next_batch) pulls one batch across the
/// boundary. Executing another query invalidates the stream.
pub struct QueryStream {
    service: Arc<dyn QueryService>,
    handle: QueryHandle,
    finished: bool,
}

impl QueryStream {
    pub fn schema(&self) -> &[SchemaField] {
        &self.handle.schema
    }

    pub fn request_id(&self) -> &str {
        &self.handle.request_id
    }

    pub fn cursor(&self) -> u64 {
        self.handle.cursor
    }

    /// Next batch, `None` once the rows are exhausted
    pub async fn next_batch(&mut self) -> Result<Option<RowBatch>> {
        if self.finished {
            return Ok(None);
        }
        match self.service.fetch(self.handle.cursor).await {
            Ok(Some(batch)) => Ok(Some(batch)),
            Ok(None) => {
                self.finished = true;
                Ok(None)
            }
            Err(e) => {
                self.finished = true;
                Err(e)
            }
        }
    }

    /// Drain the remaining rows
    pub async fn collect_rows(mut self) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        while let Some(batch) = self.next_batch().await? {
            rows.extend(batch);
        }
        Ok(rows)
    }

    /// Drain the remaining rows, deserializing each into `T`
    pub async fn deserialize_rows<T: DeserializeOwned>(self) -> Result<Vec<T>> {
        self.collect_rows()
            .await?
            .iter()
            .map(|row| row.deserialize::<T>())
            .collect()
    }
}
