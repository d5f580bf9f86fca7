//! Durable record types for the synchronization core.
//!
//! An [`Operation`] is the unit of history: immutable once accepted, tagged
//! with a strictly increasing per-document version, and referenced by id as
//! an anchor by later operations. [`Document`] and [`Snapshot`] are the
//! summary and compaction records kept next to the log.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of a sequence operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum OperationKind {
    /// Insert characters between the anchor pair
    Insert = 1,
    /// Remove a run of characters starting at the anchor position
    Delete = 2,
}

/// An accepted operation in a document's append-only log.
///
/// All fields are immutable once the operation has been durably accepted.
/// Operations are never updated or deleted from the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    /// Server-assigned id, the stable anchor reference for later operations
    pub id: Uuid,
    /// Owning document
    pub document_id: Uuid,
    pub kind: OperationKind,
    /// Logical clock value of the originating site
    pub counter: u64,
    /// Originating site (replica/session) identifier
    pub site: u64,
    /// Operation this one sits after (`None` = start of sequence)
    pub left_anchor: Option<Uuid>,
    /// Operation this one sits before (`None` = end of sequence)
    pub right_anchor: Option<Uuid>,
    /// Inserted characters; for deletes the character count is the run length
    pub value: String,
    /// Presentation tag relayed verbatim to other clients
    pub color: Option<String>,
    /// Per-document sequence number, assigned on accept; strictly increasing,
    /// never reused, never skipped
    pub version: u64,
    pub author_id: Uuid,
    /// Seconds since the Unix epoch
    pub created_at: u64,
}

impl Operation {
    /// The `(counter, site)` pair, compared lexicographically to order
    /// concurrent operations at the same anchor pair.
    pub fn tiebreak(&self) -> (u64, u64) {
        (self.counter, self.site)
    }

    /// Character count of the value. For deletes this is the run length to
    /// remove (minimum 1, matching the client contract).
    pub fn run_len(&self) -> usize {
        self.value.chars().count().max(1)
    }
}

/// A client-submitted operation, before the server assigns id and version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationInput {
    pub kind: OperationKind,
    pub counter: u64,
    pub site: u64,
    pub left_anchor: Option<Uuid>,
    pub right_anchor: Option<Uuid>,
    pub value: String,
    pub color: Option<String>,
}

/// Mutable per-document summary record.
///
/// `version` equals the highest applied operation version. `text` caches the
/// replayed state; the canonical value is always derivable by replaying the
/// operation log, so `text` is never a source of truth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub version: u64,
    pub text: String,
    /// Seconds since the Unix epoch
    pub updated_at: u64,
}

impl Document {
    /// A freshly provisioned document: version 0, empty text.
    pub fn empty(id: Uuid) -> Self {
        Self {
            id,
            version: 0,
            text: String::new(),
            updated_at: epoch_seconds(),
        }
    }
}

/// Immutable compaction record: the document text at a specific version.
///
/// Snapshots short-circuit full log replay on rehydration; they are never
/// required for correctness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: Uuid,
    pub document_id: Uuid,
    pub version: u64,
    pub text: String,
    pub author_id: Uuid,
    /// Seconds since the Unix epoch
    pub created_at: u64,
}

/// Wall-clock seconds since the Unix epoch.
pub fn epoch_seconds() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
