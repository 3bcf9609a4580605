// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Session - everything that lives for one engine connection
//!
//! A session owns the connection manager, the reserved-identifier catalog
//! and the query coordinator. It can be driven directly in-process or be
//! hosted by the execution context behind the bridge.

use crate::adapter::{ResultAdapter, RowBatch};
use crate::catalog::{ReservedCatalog, ReservedIdentifierSet};
use crate::config::Config;
use crate::connection::{ConnectionManager, ConnectionState};
use crate::coordinator::{CancelOutcome, QueryCoordinator, QueryHandle, QueryRequest, QueryStatus};
use crate::engine::{Credentials, EngineFactory, SHOW_TABLES_SQL};
use crate::error::{Error, Result};
use crate::provision::{ProvisionReport, ViewProvisioner, ViewSpec};
use crate::service::QueryService;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub struct Session {
    id: Uuid,
    config: Config,
    connection: Arc<ConnectionManager>,
    catalog: ReservedCatalog,
    coordinator: QueryCoordinator,
}

impl Session {
    /// Create a session; a relayed strategy is driven here with direct binding
    pub fn new(factory: Arc<dyn EngineFactory>, config: Config) -> Self {
        let connection = Arc::new(ConnectionManager::new(factory, config.strategy.hosted()));
        let coordinator =
            QueryCoordinator::new(connection.clone(), ResultAdapter::new(config.batch_size));
        Self {
            id: Uuid::new_v4(),
            config,
            connection,
            catalog: ReservedCatalog::new(),
            coordinator,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn connection_id(&self) -> Option<Uuid> {
        self.connection.connection_id()
    }

    /// Open the connection and provision the configured views
    ///
    /// The connection stays open when provisioning fails under
    /// `CatalogPolicy::Required`; the error is returned and the caller
    /// decides whether to close.
    pub async fn initialize(&self, credentials: Credentials) -> Result<ProvisionReport> {
        let connection_id = self.connection.initialize(credentials).await?;
        log::info!("Session {} connected ({})", self.id, connection_id);

        if self.config.views.is_empty() {
            return Ok(ProvisionReport::default());
        }
        let report = self.provision_views(&self.config.views).await?;
        if !report.is_success() {
            log::warn!(
                "Session {}: {} of {} configured views failed to provision",
                self.id,
                report.failures().count(),
                report.outcomes.len()
            );
        }
        Ok(report)
    }

    pub async fn provision_views(&self, views: &[ViewSpec]) -> Result<ProvisionReport> {
        let reserved = self.reserved_identifiers().await?;
        Ok(ViewProvisioner::provision(&self.connection, views, &reserved).await)
    }

    /// Reserved identifiers of the live connection, per the catalog policy
    pub async fn reserved_identifiers(&self) -> Result<Arc<ReservedIdentifierSet>> {
        if !self.connection.is_ready() {
            return Err(Error::NotInitialized);
        }
        self.catalog
            .load_with_policy(&self.connection, self.config.catalog_policy)
            .await
    }

    pub async fn execute(&self, request: QueryRequest) -> Result<QueryHandle> {
        self.coordinator.execute(request).await
    }

    pub async fn fetch(&self, cursor: u64) -> Result<Option<RowBatch>> {
        self.coordinator.fetch(cursor).await
    }

    pub async fn cancel(&self, timeout: Option<Duration>) -> Result<CancelOutcome> {
        self.coordinator.cancel(timeout).await
    }

    pub fn status(&self) -> QueryStatus {
        self.coordinator.status()
    }

    pub async fn list_tables(&self) -> Result<Vec<String>> {
        self.connection.query_column(SHOW_TABLES_SQL).await
    }

    /// Close the connection, discarding query state and cached identifiers
    pub async fn close(&self) {
        // the connection is marked closed before the coordinator goes idle, so
        // no new query can start against it in between
        self.connection.close().await;
        self.coordinator.reset();
        self.catalog.invalidate();
        log::info!("Session {} closed", self.id);
    }
}

#[async_trait]
impl QueryService for Session {
    async fn initialize(&self, credentials: Credentials) -> Result<ProvisionReport> {
        Session::initialize(self, credentials).await
    }

    async fn execute(&self, request: QueryRequest) -> Result<QueryHandle> {
        Session::execute(self, request).await
    }

    async fn fetch(&self, cursor: u64) -> Result<Option<RowBatch>> {
        Session::fetch(self, cursor).await
    }

    async fn cancel(&self, timeout: Option<Duration>) -> Result<CancelOutcome> {
        Session::cancel(self, timeout).await
    }

    async fn status(&self) -> Result<QueryStatus> {
        Ok(Session::status(self))
    }

    async fn provision_views(&self, views: Vec<ViewSpec>) -> Result<ProvisionReport> {
        Session::provision_views(self, &views).await
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        Session::list_tables(self).await
    }

    async fn close(&self) -> Result<()> {
        Session::close(self).await;
        Ok(())
    }
}
