//! # Retry Testing Utils
//!
//! Shared testing utilities for the retry orchestrator workspace.
//!
//! - **Builders**: execution records and integration policies with sensible defaults
//! - **Mock Repositories**: in-memory `ExecutionRepository` / `PolicyRepository`
//! - **Recording doubles**: dispatch queue, worker scheduler, outcome recorder and audit log
//! - **Scripted handlers**: `RetryableWorker` implementations with predetermined results
//!
//! ```toml
//! [dev-dependencies]
//! retry-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod mocks;
pub mod scripted;

pub use builders::*;
pub use mocks::*;
pub use scripted::*;
