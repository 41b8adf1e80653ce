//! Shared test utilities for dirqueue integration tests.
//!
//! This module provides:
//! - `TestHarness`: an isolated on-disk queue with zero delays
//! - `ScriptedExecutor`: replays canned attempt results per directory
//! - Builders for catalogs and configs

pub mod builders;
pub mod executor;
pub mod harness;

pub use builders::*;
pub use executor::ScriptedExecutor;
pub use harness::TestHarness;
