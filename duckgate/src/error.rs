// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Error taxonomy shared by every layer of duckgate
//!
//! Errors have to survive the trip across the execution-context boundary, so
//! each variant maps onto a serializable [`ErrorKind`] and can be rebuilt on
//! the consumer side with [`Error::from_wire`].

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Result type used across the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Errors reported to duckgate callers
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// The engine connection could not be established
    #[error("Initialization error: {0}")]
    Initialization(String),

    /// An operation needed a ready connection and there was none
    #[error("Connection is not initialized")]
    NotInitialized,

    /// A query was submitted while another one was still in flight
    #[error("A query is already running")]
    AlreadyRunning,

    /// The engine rejected or failed a statement
    #[error("Query execution error: {0}")]
    EngineExecution(String),

    /// A cancellation could not be completed
    #[error("Cancellation error: {0}")]
    Cancellation(String),

    /// No response arrived from the execution context before the deadline
    #[error("No response from execution context within {0:?}")]
    BridgeTimeout(Duration),

    /// Invalid or unreadable configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Serializable discriminant of [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    Initialization,
    NotInitialized,
    AlreadyRunning,
    EngineExecution,
    Cancellation,
    BridgeTimeout,
    Config,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Initialization(_) => ErrorKind::Initialization,
            Error::NotInitialized => ErrorKind::NotInitialized,
            Error::AlreadyRunning => ErrorKind::AlreadyRunning,
            Error::EngineExecution(_) => ErrorKind::EngineExecution,
            Error::Cancellation(_) => ErrorKind::Cancellation,
            Error::BridgeTimeout(_) => ErrorKind::BridgeTimeout,
            Error::Config(_) => ErrorKind::Config,
        }
    }

    /// Payload carried on the wire next to the kind
    ///
    /// For [`Error::BridgeTimeout`] this is the deadline in milliseconds.
    pub fn wire_message(&self) -> String {
        match self {
            Error::Initialization(msg)
            | Error::EngineExecution(msg)
            | Error::Cancellation(msg)
            | Error::Config(msg) => msg.clone(),
            Error::BridgeTimeout(deadline) => deadline.as_millis().to_string(),
            Error::NotInitialized | Error::AlreadyRunning => self.to_string(),
        }
    }

    /// Rebuild an error from the kind and message carried by a response
    pub fn from_wire(kind: ErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        match kind {
            ErrorKind::Initialization => Error::Initialization(message),
            ErrorKind::NotInitialized => Error::NotInitialized,
            ErrorKind::AlreadyRunning => Error::AlreadyRunning,
            ErrorKind::EngineExecution => Error::EngineExecution(message),
            ErrorKind::Cancellation => Error::Cancellation(message),
            ErrorKind::BridgeTimeout => {
                Error::BridgeTimeout(Duration::from_millis(message.parse().unwrap_or_default()))
            }
            ErrorKind::Config => Error::Config(message),
        }
    }

    pub(crate) fn cancelled() -> Self {
        Error::EngineExecution("query was cancelled".to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Config(err.to_string())
    }
}
