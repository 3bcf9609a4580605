// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Query Coordinator - single-flight execution over one engine connection
//!
//! One query at a time may be `Running` (or `Cancelling`). The state belongs
//! to whichever query moved it out of `Idle`; only that query, a cancel
//! deadline, or a connection close may move it back.

use crate::adapter::{AdaptedResult, ResultAdapter, RowBatch, SchemaField};
use crate::connection::ConnectionManager;
use crate::error::{Error, Result};
use crate::value::Value;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use uuid::Uuid;

/// Coordinator state, one per connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryState {
    Idle,
    Running,
    Cancelling,
}

/// Snapshot returned by [`QueryCoordinator::status`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryStatus {
    pub is_running: bool,
    pub is_cancelling: bool,
}

impl From<QueryState> for QueryStatus {
    fn from(state: QueryState) -> Self {
        Self {
            is_running: state == QueryState::Running,
            is_cancelling: state == QueryState::Cancelling,
        }
    }
}

/// A statement submitted for execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub id: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Vec<Value>>,
}

impl QueryRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            text: text.into(),
            parameters: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_parameters<I, V>(mut self, parameters: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.parameters = Some(parameters.into_iter().map(Into::into).collect());
        self
    }

    pub fn has_parameters(&self) -> bool {
        self.parameters.as_ref().is_some_and(|p| !p.is_empty())
    }
}

/// Where to read the rows of an executed query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryHandle {
    pub cursor: u64,
    pub request_id: String,
    pub schema: Vec<SchemaField>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancelOutcome {
    /// Nothing was running; state untouched
    NotRunning,
    /// The running query was interrupted and has settled
    Acknowledged,
}

struct Flight {
    id: u64,
    cancel_requested: bool,
}

enum CursorState {
    Ready(AdaptedResult),
    /// Taken by a fetch that is still advancing it
    Busy,
    Exhausted,
}

struct Cursor {
    id: u64,
    state: CursorState,
}

struct Inner {
    state: QueryState,
    flight: Option<Flight>,
    cursor: Option<Cursor>,
}

/// Single-flight query execution over one connection
pub struct QueryCoordinator {
    connection: Arc<ConnectionManager>,
    adapter: ResultAdapter,
    inner: Mutex<Inner>,
    /// Mirrors `Inner::state` for observers
    state_tx: watch::Sender<QueryState>,
    /// Highest flight id that has settled
    settled_tx: watch::Sender<u64>,
    next_flight: AtomicU64,
    next_cursor: AtomicU64,
}

/// Returns the state to `Idle` when the owning execution ends, however it ends
struct FlightGuard<'a> {
    coordinator: &'a QueryCoordinator,
    flight_id: u64,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.coordinator.settle(self.flight_id);
    }
}

impl QueryCoordinator {
    pub fn new(connection: Arc<ConnectionManager>, adapter: ResultAdapter) -> Self {
        let (state_tx, _) = watch::channel(QueryState::Idle);
        let (settled_tx, _) = watch::channel(0);
        Self {
            connection,
            adapter,
            inner: Mutex::new(Inner {
                state: QueryState::Idle,
                flight: None,
                cursor: None,
            }),
            state_tx,
            settled_tx,
            next_flight: AtomicU64::new(1),
            next_cursor: AtomicU64::new(1),
        }
    }

    pub fn state(&self) -> QueryState {
        self.inner.lock().state
    }

    pub fn status(&self) -> QueryStatus {
        self.state().into()
    }

    /// Subscribe to state changes
    pub fn watch_state(&self) -> watch::Receiver<QueryState> {
        self.state_tx.subscribe()
    }

    /// Execute a query and install its result as the current cursor
    pub async fn execute(&self, request: QueryRequest) -> Result<QueryHandle> {
        let flight_id = self.begin()?;
        let _guard = FlightGuard {
            coordinator: self,
            flight_id,
        };

        log::debug!("Executing query {} (flight {})", request.id, flight_id);
        let parameters = request.parameters.clone().unwrap_or_default();
        let outcome = self.connection.execute(request.text.clone(), parameters).await;

        let raw = match outcome {
            Ok(raw) => raw,
            Err(e) => {
                log::warn!("Query {} failed: {}", request.id, e);
                return Err(e);
            }
        };
        if !self.owns_uncancelled(flight_id) {
            log::info!("Query {} completed after cancellation; result discarded", request.id);
            return Err(Error::cancelled());
        }

        let adapted = self.adapter.adapt(raw);
        let schema = adapted.schema().to_vec();
        let cursor = self.install_cursor(flight_id, adapted)?;
        log::debug!(
            "Query {} ready on cursor {} with {} columns",
            request.id,
            cursor,
            schema.len()
        );

        Ok(QueryHandle {
            cursor,
            request_id: request.id,
            schema,
        })
    }

    /// Next batch of the current cursor, `None` once it is exhausted
    pub async fn fetch(&self, cursor: u64) -> Result<Option<RowBatch>> {
        if !self.connection.is_ready() {
            return Err(Error::NotInitialized);
        }
        let Some(mut result) = self.take_cursor(cursor)? else {
            return Ok(None);
        };

        let (result, batch) = tokio::task::spawn_blocking(move || {
            let batch = result.next_batch();
            (result, batch)
        })
        .await
        .map_err(|e| Error::EngineExecution(format!("result task failed: {}", e)))?;

        match batch {
            Some(Ok(rows)) => {
                self.return_cursor(cursor, result);
                Ok(Some(rows))
            }
            Some(Err(e)) => {
                self.exhaust_cursor(cursor);
                Err(e)
            }
            None => {
                self.exhaust_cursor(cursor);
                Ok(None)
            }
        }
    }

    /// Cancel the running query
    ///
    /// Sends one interrupt and waits for the execution to settle. When
    /// `timeout` elapses first the state is forced back to `Idle` and
    /// [`Error::Cancellation`] is returned.
    pub async fn cancel(&self, timeout: Option<Duration>) -> Result<CancelOutcome> {
        if !self.connection.is_ready() {
            return Err(Error::NotInitialized);
        }

        let flight_id = {
            let mut inner = self.inner.lock();
            if inner.state != QueryState::Running {
                log::debug!("Cancel ignored: query state is {:?}", inner.state);
                return Ok(CancelOutcome::NotRunning);
            }
            let Some(flight) = inner.flight.as_mut() else {
                return Ok(CancelOutcome::NotRunning);
            };
            flight.cancel_requested = true;
            let flight_id = flight.id;
            self.set_state(&mut inner, QueryState::Cancelling);
            flight_id
        };

        log::info!("Cancelling flight {}", flight_id);
        let mut settled = self.settled_tx.subscribe();
        if !self.connection.interrupt() {
            log::warn!("No engine connection to interrupt for flight {}", flight_id);
        }

        let wait = settled.wait_for(|done| *done >= flight_id);
        match timeout {
            None => {
                let _ = wait.await;
            }
            Some(deadline) => {
                if tokio::time::timeout(deadline, wait).await.is_err() {
                    self.force_idle(flight_id);
                    return Err(Error::Cancellation(format!(
                        "engine did not acknowledge the interrupt within {:?}",
                        deadline
                    )));
                }
            }
        }

        log::info!("Flight {} cancelled", flight_id);
        Ok(CancelOutcome::Acknowledged)
    }

    /// Force `Idle` and drop the current cursor
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        if let Some(flight) = inner.flight.take() {
            log::info!("Resetting coordinator with flight {} in progress", flight.id);
            self.mark_settled(flight.id);
        }
        inner.cursor = None;
        self.set_state(&mut inner, QueryState::Idle);
    }

    fn begin(&self) -> Result<u64> {
        let mut inner = self.inner.lock();
        if inner.state != QueryState::Idle {
            return Err(Error::AlreadyRunning);
        }
        if !self.connection.is_ready() {
            return Err(Error::NotInitialized);
        }
        let flight_id = self.next_flight.fetch_add(1, Ordering::SeqCst);
        inner.flight = Some(Flight {
            id: flight_id,
            cancel_requested: false,
        });
        inner.cursor = None;
        self.set_state(&mut inner, QueryState::Running);
        Ok(flight_id)
    }

    fn owns_uncancelled(&self, flight_id: u64) -> bool {
        matches!(
            self.inner.lock().flight.as_ref(),
            Some(flight) if flight.id == flight_id && !flight.cancel_requested
        )
    }

    fn install_cursor(&self, flight_id: u64, result: AdaptedResult) -> Result<u64> {
        let mut inner = self.inner.lock();
        match inner.flight.as_ref() {
            Some(flight) if flight.id == flight_id && !flight.cancel_requested => {
                let id = self.next_cursor.fetch_add(1, Ordering::SeqCst);
                inner.cursor = Some(Cursor {
                    id,
                    state: CursorState::Ready(result),
                });
                Ok(id)
            }
            _ => Err(Error::cancelled()),
        }
    }

    /// Called by the flight guard when an execution ends
    fn settle(&self, flight_id: u64) {
        let mut inner = self.inner.lock();
        if inner.flight.as_ref().map(|f| f.id) == Some(flight_id) {
            inner.flight = None;
            self.set_state(&mut inner, QueryState::Idle);
        }
        self.mark_settled(flight_id);
    }

    fn force_idle(&self, flight_id: u64) {
        let mut inner = self.inner.lock();
        if inner.flight.as_ref().map(|f| f.id) == Some(flight_id) {
            log::warn!("Flight {} did not settle in time; forcing idle", flight_id);
            inner.flight = None;
            inner.cursor = None;
            self.set_state(&mut inner, QueryState::Idle);
        }
    }

    fn take_cursor(&self, cursor: u64) -> Result<Option<AdaptedResult>> {
        let mut inner = self.inner.lock();
        let current = match inner.cursor.as_mut() {
            Some(current) if current.id == cursor => current,
            _ => {
                return Err(Error::EngineExecution(format!(
                    "result set {} is no longer available",
                    cursor
                )))
            }
        };
        match std::mem::replace(&mut current.state, CursorState::Busy) {
            CursorState::Ready(result) => Ok(Some(result)),
            CursorState::Exhausted => {
                current.state = CursorState::Exhausted;
                Ok(None)
            }
            CursorState::Busy => Err(Error::EngineExecution(format!(
                "result set {} is already being read",
                cursor
            ))),
        }
    }

    fn return_cursor(&self, cursor: u64, result: AdaptedResult) {
        let mut inner = self.inner.lock();
        if let Some(current) = inner.cursor.as_mut().filter(|c| c.id == cursor) {
            current.state = CursorState::Ready(result);
        }
    }

    fn exhaust_cursor(&self, cursor: u64) {
        let mut inner = self.inner.lock();
        if let Some(current) = inner.cursor.as_mut().filter(|c| c.id == cursor) {
            current.state = CursorState::Exhausted;
        }
    }

    fn set_state(&self, inner: &mut Inner, state: QueryState) {
        inner.state = state;
        self.state_tx.send_replace(state);
    }

    fn mark_settled(&self, flight_id: u64) {
        self.settled_tx.send_if_modified(|done| {
            if flight_id > *done {
                *done = flight_id;
                true
            } else {
                false
            }
        });
    }
}
