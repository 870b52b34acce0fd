//! Shared helpers for integration tests.

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::TestHarness;
