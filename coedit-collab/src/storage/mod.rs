//! Persistence layer: append-only operation log plus document and snapshot
//! records.
//!
//! ```text
//! ┌─────────────────┐   commit_batch   ┌──────────────────────────────────┐
//! │ VersionCoordin. │ ───────────────► │ SequenceStore                    │
//! │ (in-memory)     │                  │                                  │
//! └────────┬────────┘                  │  documents  — summary records    │
//!          │ on hydration              │  operations — log, version order │
//!          ▼                           │  snapshots  — compaction records │
//! ┌─────────────────┐                  └──────────────────────────────────┘
//! │ SequenceEngine  │                    impls: MemoryStore, RocksStore
//! │ (replayed)      │
//! └─────────────────┘
//! ```
//!
//! The store is the single source of truth; every in-memory engine is a
//! derived cache rebuilt from `list_operations`. Implementations must return
//! operations in ascending version order with no gaps.

pub mod memory;
pub mod rocks;

pub use memory::MemoryStore;
pub use rocks::{RocksStore, StoreConfig};

use coedit_core::{Document, Operation, Snapshot};
use uuid::Uuid;

/// Storage errors.
#[derive(Debug, Clone)]
pub enum StoreError {
    /// Document not found
    NotFound(Uuid),
    /// Document already provisioned
    AlreadyExists(Uuid),
    /// An appended operation broke the contiguous version chain
    VersionOutOfOrder {
        document_id: Uuid,
        expected: u64,
        found: u64,
    },
    /// Backend failure
    DatabaseError(String),
    /// Serialization failed
    SerializationError(String),
    /// Deserialization failed
    DeserializationError(String),
    /// Compression error
    CompressionError(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::NotFound(id) => write!(f, "Document not found: {id}"),
            StoreError::AlreadyExists(id) => write!(f, "Document already exists: {id}"),
            StoreError::VersionOutOfOrder {
                document_id,
                expected,
                found,
            } => write!(
                f,
                "Operation for document {document_id} out of order: expected version {expected}, got {found}"
            ),
            StoreError::DatabaseError(e) => write!(f, "Database error: {e}"),
            StoreError::SerializationError(e) => write!(f, "Serialization error: {e}"),
            StoreError::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            StoreError::CompressionError(e) => write!(f, "Compression error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::DatabaseError(e.to_string())
    }
}

/// The Sequence Store contract.
///
/// Appended operations are immutable: they are never updated or deleted.
/// `list_operations` must yield ascending, gapless versions; the replay path
/// treats a gap as storage corruption.
pub trait SequenceStore: Send + Sync {
    /// Provision an empty document at version 0.
    fn create_document(&self, document_id: Uuid) -> Result<Document, StoreError>;

    /// Read a document's summary record.
    fn read_document(&self, document_id: Uuid) -> Result<Document, StoreError>;

    /// Update a document's version and cached text.
    fn write_document(
        &self,
        document_id: Uuid,
        version: u64,
        text: &str,
    ) -> Result<(), StoreError>;

    /// Append one operation to the log. The operation's version must extend
    /// the document's chain by exactly one.
    fn append_operation(&self, op: &Operation) -> Result<Operation, StoreError>;

    /// Atomically persist a whole accepted batch together with the updated
    /// document record. The default implementation is a plain loop; the
    /// bundled stores override it with a genuinely atomic commit.
    fn commit_batch(
        &self,
        document_id: Uuid,
        operations: &[Operation],
        version: u64,
        text: &str,
    ) -> Result<(), StoreError> {
        for op in operations {
            self.append_operation(op)?;
        }
        self.write_document(document_id, version, text)
    }

    /// All operations with `version > since_version`, ascending.
    fn list_operations(
        &self,
        document_id: Uuid,
        since_version: u64,
    ) -> Result<Vec<Operation>, StoreError>;

    /// Total operations in a document's log.
    fn operation_count(&self, document_id: Uuid) -> Result<u64, StoreError>;

    /// Whether an operation id exists in a document's log. Used to validate
    /// client-submitted anchors.
    fn contains_operation(&self, document_id: Uuid, op_id: Uuid) -> Result<bool, StoreError>;

    /// The newest snapshot, if any.
    fn read_latest_snapshot(&self, document_id: Uuid)
        -> Result<Option<Snapshot>, StoreError>;

    /// Persist an immutable snapshot row.
    fn write_snapshot(&self, snapshot: &Snapshot) -> Result<(), StoreError>;

    /// All snapshots for a document, descending by version.
    fn list_snapshots(&self, document_id: Uuid) -> Result<Vec<Snapshot>, StoreError>;

    /// Ids of every document in the store.
    fn list_documents(&self) -> Result<Vec<Uuid>, StoreError>;
}
