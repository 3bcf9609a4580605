// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Execution-context bridge
//!
//! The engine session is hosted on a dedicated thread with its own
//! single-threaded runtime. Consumers talk to it only through request and
//! response envelopes; responses are matched to requests by id and may
//! arrive in any order.

mod client;
mod context;
pub mod protocol;

pub use client::Bridge;
pub use protocol::{Envelope, Message, Reply, RequestId, Response};
