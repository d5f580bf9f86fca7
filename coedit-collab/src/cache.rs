//! Per-document engine cache with lazy hydration.
//!
//! Owns exactly one [`SequenceEngine`] slot per document id. The slot's
//! async mutex is the only per-document coordination primitive: the outer
//! map lock is held just long enough to look up or insert a slot, never
//! across hydration or a batch. Every entry is a derived cache; dropping one
//! only forces the next access to replay from the store.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use coedit_core::{Document, SequenceEngine};

use crate::coordinator::SyncError;
use crate::storage::SequenceStore;

/// A lockable engine slot. `None` until first hydration.
pub type EngineSlot = Arc<Mutex<Option<SequenceEngine>>>;

/// Map of live engine slots, keyed by document id.
#[derive(Default)]
pub struct DocumentCache {
    slots: RwLock<HashMap<Uuid, EngineSlot>>,
}

impl DocumentCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the slot for a document.
    pub async fn slot(&self, document_id: Uuid) -> EngineSlot {
        // Fast path: read lock
        {
            let slots = self.slots.read().await;
            if let Some(slot) = slots.get(&document_id) {
                return slot.clone();
            }
        }

        // Slow path: write lock, double-checked
        let mut slots = self.slots.write().await;
        slots
            .entry(document_id)
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone()
    }

    /// Drop a document's slot. The next access rehydrates from the store.
    pub async fn invalidate(&self, document_id: Uuid) -> bool {
        let mut slots = self.slots.write().await;
        slots.remove(&document_id).is_some()
    }

    /// Number of documents currently cached.
    pub async fn cached_count(&self) -> usize {
        self.slots.read().await.len()
    }
}

/// Rebuild a document's engine from the store.
///
/// Seeds from the latest snapshot when one exists, then replays every
/// operation past the snapshot version, verifying the version chain is
/// gapless. A gap means a lost or partially committed write and halts
/// hydration for the document.
pub fn hydrate_engine(
    store: &dyn SequenceStore,
    document: &Document,
) -> Result<SequenceEngine, SyncError> {
    let snapshot = store.read_latest_snapshot(document.id)?;
    let (mut engine, snapshot_version) = match snapshot {
        Some(snap) => {
            log::debug!(
                "hydrating document {} from snapshot at v{}",
                document.id,
                snap.version
            );
            (SequenceEngine::seeded(&snap.text), snap.version)
        }
        None => (SequenceEngine::new(), 0),
    };

    let mut replayed = snapshot_version;
    for op in store.list_operations(document.id, snapshot_version)? {
        if op.version != replayed + 1 {
            log::error!(
                "replay gap in document {}: expected v{}, found v{}",
                document.id,
                replayed + 1,
                op.version
            );
            return Err(SyncError::ReplayGap {
                document_id: document.id,
                expected: replayed + 1,
                found: op.version,
            });
        }
        engine.apply(&op);
        replayed = op.version;
    }

    // Consistency check: the replayed state should match the persisted
    // summary record. A mismatch points at a stale snapshot text.
    if replayed != document.version || engine.current_text() != document.text {
        log::warn!(
            "document {} replay reached v{} but record says v{}; cached text {} match",
            document.id,
            replayed,
            document.version,
            if engine.current_text() == document.text {
                "does"
            } else {
                "does NOT"
            }
        );
    }

    log::debug!(
        "hydrated document {} at v{} ({} nodes, {} live chars)",
        document.id,
        replayed,
        engine.node_count(),
        engine.live_len()
    );
    Ok(engine)
}
