// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Wire types exchanged with the execution context

use crate::adapter::RowBatch;
use crate::coordinator::{CancelOutcome, QueryHandle, QueryRequest, QueryStatus};
use crate::engine::Credentials;
use crate::error::{Error, ErrorKind, Result};
use crate::provision::{ProvisionReport, ViewSpec};
use serde::{Deserialize, Serialize};

/// Correlates a response with the request that caused it
pub type RequestId = u64;

/// Request sent to the execution context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum Message {
    Initialize(Credentials),
    Query(QueryRequest),
    Fetch {
        cursor: u64,
    },
    Cancel {
        #[serde(rename = "timeoutMs", default, skip_serializing_if = "Option::is_none")]
        timeout_ms: Option<u64>,
    },
    Status,
    Provision {
        views: Vec<ViewSpec>,
    },
    ListTables,
    Close,
}

impl Message {
    /// Wire name, for logging
    pub fn name(&self) -> &'static str {
        match self {
            Message::Initialize(_) => "initialize",
            Message::Query(_) => "query",
            Message::Fetch { .. } => "fetch",
            Message::Cancel { .. } => "cancel",
            Message::Status => "status",
            Message::Provision { .. } => "provision",
            Message::ListTables => "listTables",
            Message::Close => "close",
        }
    }
}

/// A request and its id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: RequestId,
    pub message: Message,
}

/// Successful result of a request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum Reply {
    Initialized(ProvisionReport),
    Query(QueryHandle),
    Batch(Option<RowBatch>),
    Cancelled(CancelOutcome),
    Status(QueryStatus),
    Provisioned(ProvisionReport),
    Tables(Vec<String>),
    Closed,
}

/// Response to one envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub id: RequestId,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Reply>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl Response {
    pub fn ok(id: RequestId, reply: Reply) -> Self {
        Self {
            id,
            success: true,
            result: Some(reply),
            error: None,
            error_kind: None,
        }
    }

    pub fn failed(id: RequestId, error: &Error) -> Self {
        Self {
            id,
            success: false,
            result: None,
            error: Some(error.wire_message()),
            error_kind: Some(error.kind()),
        }
    }

    /// Turn the response back into the caller's result
    pub fn into_result(self) -> Result<Reply> {
        match (self.success, self.result) {
            (true, Some(reply)) => Ok(reply),
            (true, None) => Err(Error::EngineExecution(format!(
                "response {} carried no result",
                self.id
            ))),
            (false, _) => {
                let kind = self.error_kind.unwrap_or(ErrorKind::EngineExecution);
                Err(Error::from_wire(kind, self.error.unwrap_or_default()))
            }
        }
    }
}
