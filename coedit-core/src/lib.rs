//! # coedit-core — sequence CRDT for collaborative plain text
//!
//! The data model and merge algorithm underneath the coedit sync layer.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   append_operations   ┌──────────────────┐
//! │ coedit-collab│ ────────────────────► │ SequenceEngine   │
//! │ (coordinator)│                       │ (per document)   │
//! └──────────────┘                       └────────┬─────────┘
//!                                                 │
//!                                   ordered SequenceNode list
//!                                                 │
//!                                                 ▼
//!                                          current_text()
//! ```
//!
//! ## Modules
//!
//! - [`op`] — durable record types: operations, documents, snapshots
//! - [`engine`] — the CRDT sequence engine (insert/delete merge with
//!   deterministic tie-breaking)

pub mod engine;
pub mod op;

pub use engine::{SequenceEngine, SequenceNode};
pub use op::{
    epoch_seconds, Document, Operation, OperationInput, OperationKind, Snapshot,
};
