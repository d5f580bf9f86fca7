//! # coedit-collab — synchronization layer for collaborative plain text
//!
//! Coordinates concurrent client edits against shared documents: optimistic
//! concurrency control, atomic version assignment, operation-log persistence
//! with snapshot compaction, and acknowledgement fan-out.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐  batch + base_version  ┌─────────────────────┐
//! │ client     │ ─────────────────────► │ VersionCoordinator  │
//! │ (external) │ ◄───────────────────── │                     │
//! └────────────┘      OperationAck      └──────────┬──────────┘
//!                                                  │
//!                            ┌─────────────────────┼─────────────────┐
//!                            ▼                     ▼                 ▼
//!                    ┌──────────────┐     ┌────────────────┐  ┌────────────┐
//!                    │ DocumentCache│     │ SequenceStore  │  │ FanoutHub  │
//!                    │ (per-doc     │     │ (Memory/Rocks) │  │ (broadcast)│
//!                    │  engines)    │     └────────────────┘  └────────────┘
//!                    └──────┬───────┘
//!                           ▼
//!                    SequenceEngine (coedit-core)
//! ```
//!
//! ## Modules
//!
//! - [`coordinator`] — optimistic-concurrency write path and read paths
//! - [`cache`] — one live engine per document, lazy hydration and replay
//! - [`storage`] — the `SequenceStore` contract plus the bundled stores
//! - [`fanout`] — per-document ack broadcast (at-most-once, best-effort)
//! - [`protocol`] — shapes exchanged with external collaborators

pub mod cache;
pub mod coordinator;
pub mod fanout;
pub mod protocol;
pub mod storage;

// Re-exports for convenience
pub use cache::DocumentCache;
pub use coordinator::{CoordinatorConfig, SyncError, VersionCoordinator};
pub use fanout::{FanoutHub, FanoutStats};
pub use protocol::{
    DocumentState, DocumentStats, OperationAck, OperationsResponse, ParticipantInfo,
    ProtocolError,
};
pub use storage::{MemoryStore, RocksStore, SequenceStore, StoreConfig, StoreError};
