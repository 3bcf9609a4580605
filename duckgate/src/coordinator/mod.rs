// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Query coordination module
//!
//! Enforces single-flight execution and cooperative cancellation on top of
//! the connection manager, and keeps the current result cursor.

mod query_coordinator;

pub use query_coordinator::{
    CancelOutcome, QueryCoordinator, QueryHandle, QueryRequest, QueryState, QueryStatus,
};
