// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Connection lifecycle management
//!
//! Owns the single logical engine connection and decides how statements are
//! dispatched to it.

pub mod manager;
pub mod strategy;

pub use manager::{ConnectionManager, ConnectionState};
pub use strategy::ExecutionStrategy;
