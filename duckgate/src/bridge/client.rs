// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Consumer side of the bridge

use super::context::{self, ContextHandle, Pending};
use super::protocol::{Envelope, Message, Reply, RequestId, Response};
use crate::adapter::RowBatch;
use crate::config::{duration_to_millis, Config};
use crate::coordinator::{CancelOutcome, QueryHandle, QueryRequest, QueryStatus};
use crate::engine::{Credentials, EngineFactory};
use crate::error::{Error, Result};
use crate::provision::{ProvisionReport, ViewSpec};
use crate::service::QueryService;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Removes a pending entry when its caller stops waiting
struct PendingGuard {
    pending: Pending,
    id: RequestId,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.id);
    }
}

/// Sends requests to the execution context and awaits their responses
///
/// The context is started lazily on the first request and can be stopped
/// with [`terminate`](Bridge::terminate); the next request starts a fresh one.
pub struct Bridge {
    factory: Arc<dyn EngineFactory>,
    config: Config,
    context: Mutex<Option<ContextHandle>>,
    next_id: AtomicU64,
    /// Whether the hosted session holds an open connection, as last reported
    connected: AtomicBool,
}

impl Bridge {
    pub fn new(factory: Arc<dyn EngineFactory>, config: Config) -> Self {
        Self {
            factory,
            config,
            context: Mutex::new(None),
            next_id: AtomicU64::new(1),
            connected: AtomicBool::new(false),
        }
    }

    /// Whether an execution context currently exists
    pub fn is_running(&self) -> bool {
        self.context.lock().is_some()
    }

    /// Send a request, bounded by the configured request timeout if any
    pub async fn send(&self, message: Message) -> Result<Reply> {
        match self.config.request_timeout() {
            Some(deadline) => self.send_with_timeout(message, deadline).await,
            None => self.roundtrip(message).await?.into_result(),
        }
    }

    /// Send a request and give up after `deadline`
    ///
    /// The request itself is not withdrawn; its late response is discarded.
    pub async fn send_with_timeout(&self, message: Message, deadline: Duration) -> Result<Reply> {
        match tokio::time::timeout(deadline, self.roundtrip(message)).await {
            Ok(response) => response?.into_result(),
            Err(_) => Err(Error::BridgeTimeout(deadline)),
        }
    }

    /// Stop the execution context
    ///
    /// The hosted session is closed and requests still waiting fail. Safe to
    /// call when no context exists.
    pub async fn terminate(&self) {
        let handle = self.context.lock().take();
        self.connected.store(false, Ordering::SeqCst);
        let Some(ContextHandle {
            requests, thread, ..
        }) = handle
        else {
            log::debug!("Terminate requested with no execution context running");
            return;
        };

        drop(requests);
        if let Some(thread) = thread {
            match tokio::task::spawn_blocking(move || thread.join()).await {
                Ok(Ok(())) => log::info!("Execution context terminated"),
                Ok(Err(_)) => log::error!("Execution context thread panicked"),
                Err(e) => log::error!("Failed to join execution context: {}", e),
            }
        }
    }

    async fn roundtrip(&self, message: Message) -> Result<Response> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let name = message.name();
        let (requests, pending) = self.ensure_context()?;

        let (tx, rx) = oneshot::channel();
        pending.lock().insert(id, tx);
        let _guard = PendingGuard {
            pending: pending.clone(),
            id,
        };

        log::debug!("Sending request {} ({})", id, name);
        let sent = requests.send(Envelope { id, message });
        // Holding a sender while waiting would keep a terminated context alive
        drop(requests);
        if sent.is_err() {
            return Err(Error::EngineExecution(
                "execution context is not accepting requests".to_string(),
            ));
        }

        rx.await.map_err(|_| {
            Error::EngineExecution(format!(
                "execution context stopped before answering request {} ({})",
                id, name
            ))
        })
    }

    fn ensure_context(&self) -> Result<(mpsc::UnboundedSender<Envelope>, Pending)> {
        let mut context = self.context.lock();
        if let Some(handle) = context.as_ref() {
            if !handle.requests.is_closed() {
                return Ok((handle.requests.clone(), handle.pending.clone()));
            }
            log::warn!("Execution context exited unexpectedly; starting a new one");
        }
        let handle = context::spawn(self.factory.clone(), self.config.clone())?;
        let senders = (handle.requests.clone(), handle.pending.clone());
        *context = Some(handle);
        Ok(senders)
    }
}

fn unexpected(reply: Reply, wanted: &str) -> Error {
    Error::EngineExecution(format!("expected a {} reply, got {:?}", wanted, reply))
}

#[async_trait]
impl QueryService for Bridge {
    async fn initialize(&self, credentials: Credentials) -> Result<ProvisionReport> {
        let result = self.send(Message::Initialize(credentials)).await;
        match &result {
            // the connection was never opened, or was already open before
            Err(Error::Initialization(_)) => {}
            // provisioning errors and timeouts may leave an open connection behind
            _ => self.connected.store(true, Ordering::SeqCst),
        }
        match result? {
            Reply::Initialized(report) => Ok(report),
            other => Err(unexpected(other, "initialize")),
        }
    }

    async fn execute(&self, request: QueryRequest) -> Result<QueryHandle> {
        match self.send(Message::Query(request)).await? {
            Reply::Query(handle) => Ok(handle),
            other => Err(unexpected(other, "query")),
        }
    }

    async fn fetch(&self, cursor: u64) -> Result<Option<RowBatch>> {
        match self.send(Message::Fetch { cursor }).await? {
            Reply::Batch(batch) => Ok(batch),
            other => Err(unexpected(other, "fetch")),
        }
    }

    async fn cancel(&self, timeout: Option<Duration>) -> Result<CancelOutcome> {
        let timeout_ms = timeout.map(duration_to_millis);
        match self.send(Message::Cancel { timeout_ms }).await? {
            Reply::Cancelled(outcome) => Ok(outcome),
            other => Err(unexpected(other, "cancel")),
        }
    }

    async fn status(&self) -> Result<QueryStatus> {
        match self.send(Message::Status).await? {
            Reply::Status(status) => Ok(status),
            other => Err(unexpected(other, "status")),
        }
    }

    async fn provision_views(&self, views: Vec<ViewSpec>) -> Result<ProvisionReport> {
        match self.send(Message::Provision { views }).await? {
            Reply::Provisioned(report) => Ok(report),
            other => Err(unexpected(other, "provision")),
        }
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        match self.send(Message::ListTables).await? {
            Reply::Tables(tables) => Ok(tables),
            other => Err(unexpected(other, "listTables")),
        }
    }

    async fn close(&self) -> Result<()> {
        if !self.is_running() || !self.connected.load(Ordering::SeqCst) {
            log::debug!("Close requested with no open connection; nothing to send");
            return Ok(());
        }
        match self.send(Message::Close).await? {
            Reply::Closed => {
                self.connected.store(false, Ordering::SeqCst);
                Ok(())
            }
            other => Err(unexpected(other, "close")),
        }
    }
}
