//! Document store abstraction for evalhub.
//!
//! The core service treats persistence as a set of logical collections of
//! JSON documents keyed by string identifiers. This crate provides:
//!
//! - [`DocumentStore`] - the collection-scoped CRUD trait the core consumes
//! - [`MemoryStore`] - in-memory backend for tests and development
//! - [`TursoStore`] - persistent backend on Turso (libSQL)
//! - [`retry`] - bounded exponential-backoff execution of store operations
//!
//! Store failures are classified by [`StoreError`]: connectivity and timeout
//! failures are transient and eligible for retry, conflicts and validation
//! failures are not.

mod error;
mod memory;
pub mod retry;
mod traits;
mod turso;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use retry::{RetryError, RetryPolicy, run_with_retry};
pub use traits::{CasGuard, Collection, DocumentStore, Filter};
pub use turso::TursoStore;
