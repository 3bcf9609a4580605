//! Test utilities for duckgate integration tests
//!
//! - TestFixture: a client wired to a scripted engine, for any strategy

#![allow(dead_code)]

pub mod test_fixture;
