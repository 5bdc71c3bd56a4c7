//! Test utilities shared by unit and integration tests
//!
//! Fixtures for zones, deltas and fast-timing configurations, plus
//! timeout helpers for channel-driven async code.

pub mod async_helpers;
pub mod fixtures;

pub use async_helpers::*;
pub use fixtures::*;
