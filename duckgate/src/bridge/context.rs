// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! The isolated execution context
//!
//! A dedicated OS thread running a current-thread tokio runtime that hosts
//! one [`Session`]. Every incoming envelope is served on its own task, so a
//! `cancel` or `status` is answered while a `query` is still running.

use super::protocol::{Envelope, Message, Reply, RequestId, Response};
use crate::config::Config;
use crate::engine::EngineFactory;
use crate::error::{Error, Result};
use crate::session::Session;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::{mpsc, oneshot};

/// Callers waiting on a response, by request id
pub(super) type Pending = Arc<Mutex<HashMap<RequestId, oneshot::Sender<Response>>>>;

/// Consumer-side handle on a running context
pub(super) struct ContextHandle {
    pub(super) requests: mpsc::UnboundedSender<Envelope>,
    pub(super) pending: Pending,
    pub(super) thread: Option<JoinHandle<()>>,
}

/// Start a context thread and the task routing its responses
///
/// Must be called from within a tokio runtime.
pub(super) fn spawn(factory: Arc<dyn EngineFactory>, config: Config) -> Result<ContextHandle> {
    let (request_tx, request_rx) = mpsc::unbounded_channel();
    let (response_tx, response_rx) = mpsc::unbounded_channel();
    let pending: Pending = Arc::new(Mutex::new(HashMap::new()));

    let thread_name = config.context_thread_name.clone();
    let thread = std::thread::Builder::new()
        .name(thread_name.clone())
        .spawn(move || run(factory, config, request_rx, response_tx))
        .map_err(|e| {
            Error::EngineExecution(format!("failed to start execution context: {}", e))
        })?;

    tokio::spawn(route(response_rx, pending.clone()));
    log::info!("Execution context '{}' started", thread_name);

    Ok(ContextHandle {
        requests: request_tx,
        pending,
        thread: Some(thread),
    })
}

fn run(
    factory: Arc<dyn EngineFactory>,
    config: Config,
    requests: mpsc::UnboundedReceiver<Envelope>,
    responses: mpsc::UnboundedSender<Response>,
) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            log::error!("Execution context could not build its runtime: {}", e);
            return;
        }
    };

    let session = Arc::new(Session::new(factory, config));
    runtime.block_on(serve(session, requests, responses));
}

async fn serve(
    session: Arc<Session>,
    mut requests: mpsc::UnboundedReceiver<Envelope>,
    responses: mpsc::UnboundedSender<Response>,
) {
    log::debug!("Execution context serving session {}", session.id());

    while let Some(Envelope { id, message }) = requests.recv().await {
        let session = session.clone();
        let responses = responses.clone();
        tokio::spawn(async move {
            let name = message.name();
            let response = match dispatch(&session, message).await {
                Ok(reply) => Response::ok(id, reply),
                Err(e) => {
                    log::debug!("Request {} ({}) failed: {}", id, name, e);
                    Response::failed(id, &e)
                }
            };
            if responses.send(response).is_err() {
                log::debug!("Consumer gone; dropping response to request {}", id);
            }
        });
    }

    // Every sender is gone: the consumer terminated us
    session.close().await;
    log::info!("Execution context for session {} stopped", session.id());
}

async fn dispatch(session: &Session, message: Message) -> Result<Reply> {
    match message {
        Message::Initialize(credentials) => session.initialize(credentials).await.map(Reply::Initialized),
        Message::Query(request) => session.execute(request).await.map(Reply::Query),
        Message::Fetch { cursor } => session.fetch(cursor).await.map(Reply::Batch),
        Message::Cancel { timeout_ms } => session
            .cancel(timeout_ms.map(std::time::Duration::from_millis))
            .await
            .map(Reply::Cancelled),
        Message::Status => Ok(Reply::Status(session.status())),
        Message::Provision { views } => session.provision_views(&views).await.map(Reply::Provisioned),
        Message::ListTables => session.list_tables().await.map(Reply::Tables),
        Message::Close => {
            session.close().await;
            Ok(Reply::Closed)
        }
    }
}

/// Deliver each response to the caller waiting on its id
async fn route(mut responses: mpsc::UnboundedReceiver<Response>, pending: Pending) {
    while let Some(response) = responses.recv().await {
        let waiter = pending.lock().remove(&response.id);
        match waiter {
            Some(waiter) => {
                // The caller may have given up (timeout); nothing to do then
                let _ = waiter.send(response);
            }
            None => log::warn!("Dropping response to unknown request {}", response.id),
        }
    }

    let orphaned = std::mem::take(&mut *pending.lock());
    if !orphaned.is_empty() {
        log::warn!(
            "Execution context stopped with {} requests outstanding",
            orphaned.len()
        );
    }
}
