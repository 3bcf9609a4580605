// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Connection lifecycle manager
//!
//! Holds at most one live engine connection. Engine calls are blocking, so
//! every one of them runs on the tokio blocking pool; the async side only
//! ever holds the state lock for short, non-awaiting sections.

use super::strategy::ExecutionStrategy;
use crate::adapter;
use crate::engine::{Credentials, Engine, EngineError, EngineFactory, InterruptHandle, RawResult};
use crate::error::{Error, Result};
use crate::value::Value;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Lifecycle of the logical connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Uninitialized,
    Initializing,
    Ready,
    Closed,
}

/// One engine handle plus the means to interrupt it while it is busy
struct EngineConnection {
    id: Uuid,
    engine: Mutex<Box<dyn Engine>>,
    interrupt: Arc<dyn InterruptHandle>,
    torn_down: AtomicBool,
}

impl EngineConnection {
    fn new(engine: Box<dyn Engine>) -> Self {
        let interrupt = engine.interrupt_handle();
        Self {
            id: Uuid::new_v4(),
            engine: Mutex::new(engine),
            interrupt,
            torn_down: AtomicBool::new(false),
        }
    }

    fn run(
        &self,
        sql: &str,
        parameters: &[Value],
        prepared: bool,
    ) -> std::result::Result<RawResult, EngineError> {
        let mut engine = self.engine.lock();
        if self.torn_down.load(Ordering::SeqCst) {
            return Err(EngineError::Closed);
        }
        if prepared {
            engine.execute_prepared(sql, parameters)
        } else {
            engine.execute(sql)
        }
    }

    fn is_busy(&self) -> bool {
        self.engine.try_lock().is_none()
    }

    /// Close the engine; only the first call reaches it
    fn teardown(&self) {
        let mut engine = self.engine.lock();
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }
        match engine.close() {
            Ok(()) => log::info!("Engine connection {} closed", self.id),
            Err(e) => log::warn!("Engine connection {} failed to close cleanly: {}", self.id, e),
        }
    }
}

struct Slot {
    state: ConnectionState,
    connection: Option<Arc<EngineConnection>>,
}

/// Owner of the single logical engine connection
pub struct ConnectionManager {
    factory: Arc<dyn EngineFactory>,
    strategy: ExecutionStrategy,
    slot: Mutex<Slot>,
}

impl ConnectionManager {
    pub fn new(factory: Arc<dyn EngineFactory>, strategy: ExecutionStrategy) -> Self {
        Self {
            factory,
            strategy,
            slot: Mutex::new(Slot {
                state: ConnectionState::Uninitialized,
                connection: None,
            }),
        }
    }

    pub fn strategy(&self) -> ExecutionStrategy {
        self.strategy
    }

    pub fn state(&self) -> ConnectionState {
        self.slot.lock().state
    }

    pub fn is_ready(&self) -> bool {
        self.state() == ConnectionState::Ready
    }

    /// Identifier of the live connection, if any
    pub fn connection_id(&self) -> Option<Uuid> {
        let slot = self.slot.lock();
        match slot.state {
            ConnectionState::Ready => slot.connection.as_ref().map(|c| c.id),
            _ => None,
        }
    }

    /// Establish the connection
    ///
    /// Fails while another connection is initializing or ready. A close that
    /// lands while the factory is still connecting wins: the fresh handle is
    /// torn down and initialization reports failure.
    pub async fn initialize(&self, credentials: Credentials) -> Result<Uuid> {
        let previous = {
            let mut slot = self.slot.lock();
            match slot.state {
                ConnectionState::Initializing | ConnectionState::Ready => {
                    return Err(Error::Initialization(
                        "a connection is already open; close it before initializing again"
                            .to_string(),
                    ));
                }
                state => {
                    slot.state = ConnectionState::Initializing;
                    state
                }
            }
        };

        log::info!("Initializing engine connection to '{}'", credentials.database);
        let factory = self.factory.clone();
        let connected = tokio::task::spawn_blocking(move || factory.connect(&credentials)).await;

        let engine = match connected {
            Ok(Ok(engine)) => engine,
            Ok(Err(e)) => return Err(self.abort_initialize(previous, e.to_string())),
            Err(e) => {
                return Err(self.abort_initialize(previous, format!("engine connect task failed: {}", e)))
            }
        };

        let connection = Arc::new(EngineConnection::new(engine));
        {
            let mut slot = self.slot.lock();
            if slot.state == ConnectionState::Initializing {
                slot.state = ConnectionState::Ready;
                slot.connection = Some(connection.clone());
                log::info!("Engine connection {} ready", connection.id);
                return Ok(connection.id);
            }
        }

        log::warn!("Connection closed while initializing; discarding new engine handle");
        tokio::task::spawn_blocking(move || connection.teardown())
            .await
            .ok();
        Err(Error::Initialization(
            "connection was closed during initialization".to_string(),
        ))
    }

    fn abort_initialize(&self, previous: ConnectionState, message: String) -> Error {
        let mut slot = self.slot.lock();
        if slot.state == ConnectionState::Initializing {
            slot.state = previous;
        }
        log::warn!("Engine initialization failed: {}", message);
        Error::Initialization(message)
    }

    /// Release the connection
    ///
    /// Idempotent. A statement still in flight is interrupted and the engine
    /// is torn down once it returns; otherwise teardown completes before this
    /// returns.
    pub async fn close(&self) {
        let connection = {
            let mut slot = self.slot.lock();
            if slot.state == ConnectionState::Closed {
                log::debug!("Close requested on an already closed connection");
                return;
            }
            slot.state = ConnectionState::Closed;
            slot.connection.take()
        };

        let Some(connection) = connection else {
            return;
        };

        let busy = connection.is_busy();
        if busy {
            log::info!("Interrupting in-flight statement before closing {}", connection.id);
            connection.interrupt.interrupt();
        }

        let teardown = tokio::task::spawn_blocking(move || connection.teardown());
        if !busy {
            if let Err(e) = teardown.await {
                log::error!("Engine teardown task failed: {}", e);
            }
        }
    }

    /// Run one statement on the live connection
    pub async fn execute(&self, sql: String, parameters: Vec<Value>) -> Result<RawResult> {
        let connection = self.acquire()?;
        let prepared = self.strategy.uses_prepared_path(!parameters.is_empty());

        log::debug!(
            "Dispatching statement on {} ({} path, {} parameters)",
            connection.id,
            if prepared { "prepared" } else { "direct" },
            parameters.len()
        );

        tokio::task::spawn_blocking(move || connection.run(&sql, &parameters, prepared))
            .await
            .map_err(|e| Error::EngineExecution(format!("engine task failed: {}", e)))?
            .map_err(Error::from)
    }

    /// Run a statement and collect its first column as text
    pub async fn query_column(&self, sql: &str) -> Result<Vec<String>> {
        let connection = self.acquire()?;
        let prepared = self.strategy.uses_prepared_path(false);
        let sql = sql.to_string();

        tokio::task::spawn_blocking(move || {
            let raw = connection.run(&sql, &[], prepared)?;
            adapter::first_column(raw)
        })
        .await
        .map_err(|e| Error::EngineExecution(format!("engine task failed: {}", e)))?
    }

    /// Forward one interrupt to the engine; false when there is no connection
    pub fn interrupt(&self) -> bool {
        let connection = self.slot.lock().connection.clone();
        match connection {
            Some(connection) => {
                connection.interrupt.interrupt();
                true
            }
            None => false,
        }
    }

    fn acquire(&self) -> Result<Arc<EngineConnection>> {
        let slot = self.slot.lock();
        match (slot.state, slot.connection.as_ref()) {
            (ConnectionState::Ready, Some(connection)) => Ok(connection.clone()),
            _ => Err(Error::NotInitialized),
        }
    }
}
