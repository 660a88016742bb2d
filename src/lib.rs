//! Library root for the `sundown` crate
//!
//! Tracks whether the running build of an application has been deprecated
//! by its update server. A small JSON descriptor is fetched periodically,
//! reconciled into a locally persisted record, and answered back through
//! synchronous queries that are only ever meaningful for the build they
//! were written for.

// Core error handling
pub mod errors;

// Wire format & transport seams
pub mod descriptor;
pub mod fetcher;

// Persisted state
pub mod state_store;
pub mod state_store_mem;
pub mod state_store_sled;
pub mod version_state;

// Query orchestration
pub mod client;

// Re-export the host-facing surface
pub use client::{QueryOutcome, VersionClient};
pub use descriptor::{DescriptorDecoder, JsonDescriptorDecoder, VersionDescriptor};
pub use errors::{SundownError, SundownResult};
pub use fetcher::{DescriptorFetcher, HttpFetcher};
pub use state_store::{Batch, BatchOp, StateStore, Value};
pub use state_store_mem::MemoryStateStore;
pub use state_store_sled::SledStateStore;
pub use version_state::{reconcile, BuildId, DeprecationStatus, VersionState};
