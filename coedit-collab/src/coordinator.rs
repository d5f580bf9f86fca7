//! The version coordinator: single entry point for mutating a document.
//!
//! Enforces optimistic concurrency (a batch must be based on the document's
//! current version), assigns versions atomically, and serializes writers per
//! document through the cache's slot mutex. The whole batch either commits
//! durably or leaves no trace: on a failed commit the document's engine slot
//! is cleared so the next access replays the durable state.
//!
//! ```text
//! client batch ──► append_operations
//!                    │ 1. per-document lock (bounded wait)
//!                    │ 2. base_version check        ── VersionConflict
//!                    │ 3. hydrate engine if cold    ── ReplayGap
//!                    │ 4. assign ids + versions, apply to engine
//!                    │ 5. commit_batch (atomic)     ── Store error
//!                    │ 6. publish ack to fan-out hub (best-effort)
//!                    ▼
//!                 OperationAck { applied_version, operations }
//! ```

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use coedit_core::{epoch_seconds, Document, Operation, OperationInput, Snapshot};

use crate::cache::{hydrate_engine, DocumentCache};
use crate::fanout::FanoutHub;
use crate::protocol::{DocumentState, DocumentStats, OperationAck, OperationsResponse};
use crate::storage::{SequenceStore, StoreError};

/// Coordinator configuration.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Bound on the wait for a document's lock before surfacing `Busy`
    pub lock_timeout: Duration,
    /// Acks buffered per fan-out subscriber
    pub fanout_capacity: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(5),
            fanout_capacity: 256,
        }
    }
}

impl CoordinatorConfig {
    /// Config for testing (tight timeout, small buffers).
    pub fn for_testing() -> Self {
        Self {
            lock_timeout: Duration::from_millis(100),
            fanout_capacity: 16,
        }
    }
}

/// Synchronization errors.
#[derive(Debug, Clone)]
pub enum SyncError {
    /// Submitted base version is stale; refetch and retry
    VersionConflict { expected: u64, submitted: u64 },
    /// Unknown document id
    DocumentNotFound(Uuid),
    /// Snapshot declared a stale version; refetch and retry
    SnapshotVersionMismatch { expected: u64, submitted: u64 },
    /// Version hole in the stored log; storage corruption, not retryable
    ReplayGap {
        document_id: Uuid,
        expected: u64,
        found: u64,
    },
    /// Lock wait timed out under contention; retryable
    Busy(Uuid),
    /// Storage failure passthrough
    Store(StoreError),
}

impl std::fmt::Display for SyncError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncError::VersionConflict {
                expected,
                submitted,
            } => write!(
                f,
                "Stale base version: document is at v{expected}, submitted v{submitted}"
            ),
            SyncError::DocumentNotFound(id) => write!(f, "Document not found: {id}"),
            SyncError::SnapshotVersionMismatch {
                expected,
                submitted,
            } => write!(
                f,
                "Stale snapshot: document is at v{expected}, declared v{submitted}"
            ),
            SyncError::ReplayGap {
                document_id,
                expected,
                found,
            } => write!(
                f,
                "Replay gap in document {document_id}: expected v{expected}, found v{found}"
            ),
            SyncError::Busy(id) => write!(f, "Document {id} busy: lock wait timed out"),
            SyncError::Store(e) => write!(f, "Store error: {e}"),
        }
    }
}

impl std::error::Error for SyncError {}

impl From<StoreError> for SyncError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => SyncError::DocumentNotFound(id),
            other => SyncError::Store(other),
        }
    }
}

/// Per-document optimistic-concurrency write path plus the read paths that
/// serve reconnecting clients.
pub struct VersionCoordinator {
    store: Arc<dyn SequenceStore>,
    cache: DocumentCache,
    fanout: FanoutHub,
    config: CoordinatorConfig,
}

impl VersionCoordinator {
    pub fn new(store: Arc<dyn SequenceStore>, config: CoordinatorConfig) -> Self {
        let fanout = FanoutHub::new(config.fanout_capacity);
        Self {
            store,
            cache: DocumentCache::new(),
            fanout,
            config,
        }
    }

    /// Create with default configuration.
    pub fn with_defaults(store: Arc<dyn SequenceStore>) -> Self {
        Self::new(store, CoordinatorConfig::default())
    }

    pub fn store(&self) -> &Arc<dyn SequenceStore> {
        &self.store
    }

    /// The fan-out hub clients subscribe to for other writers' acks.
    pub fn fanout(&self) -> &FanoutHub {
        &self.fanout
    }

    /// Provision an empty document at version 0.
    pub async fn create_document(&self, document_id: Uuid) -> Result<DocumentState, SyncError> {
        let doc = self.store.create_document(document_id)?;
        log::info!("created document {document_id}");
        Ok(state_of(&doc))
    }

    /// Current summary state of a document.
    pub async fn get_document(&self, document_id: Uuid) -> Result<DocumentState, SyncError> {
        let doc = self.store.read_document(document_id)?;
        Ok(state_of(&doc))
    }

    /// Catch-up read: every operation newer than `since_version`, in
    /// ascending version order.
    pub async fn get_operations(
        &self,
        document_id: Uuid,
        since_version: u64,
    ) -> Result<OperationsResponse, SyncError> {
        self.store.read_document(document_id)?;
        let operations = self.store.list_operations(document_id, since_version)?;
        let to_version = operations
            .last()
            .map(|op| op.version)
            .unwrap_or(since_version);
        Ok(OperationsResponse {
            from_version: since_version,
            to_version,
            operations,
        })
    }

    /// Apply a client batch against the document's current version.
    ///
    /// Either the whole batch commits and the ack is published to the
    /// fan-out hub, or the document is left untouched.
    pub async fn append_operations(
        &self,
        document_id: Uuid,
        author_id: Uuid,
        base_version: u64,
        inputs: Vec<OperationInput>,
    ) -> Result<OperationAck, SyncError> {
        let slot = self.cache.slot(document_id).await;
        let mut guard =
            match tokio::time::timeout(self.config.lock_timeout, slot.lock()).await {
                Ok(guard) => guard,
                Err(_) => {
                    log::warn!(
                        "document {document_id} busy: lock wait exceeded {:?}",
                        self.config.lock_timeout
                    );
                    return Err(SyncError::Busy(document_id));
                }
            };

        let document = self.store.read_document(document_id)?;
        if document.version != base_version {
            return Err(SyncError::VersionConflict {
                expected: document.version,
                submitted: base_version,
            });
        }

        if inputs.is_empty() {
            return Ok(OperationAck {
                applied_version: document.version,
                operations: Vec::new(),
            });
        }

        if guard.is_none() {
            *guard = Some(hydrate_engine(self.store.as_ref(), &document)?);
        }
        let engine = guard.as_mut().expect("slot hydrated above");

        let mut accepted: Vec<Operation> = Vec::with_capacity(inputs.len());
        let mut batch_ids: HashSet<Uuid> = HashSet::new();
        for (i, input) in inputs.into_iter().enumerate() {
            let left_anchor =
                self.resolve_anchor(document_id, &batch_ids, input.left_anchor)?;
            let right_anchor =
                self.resolve_anchor(document_id, &batch_ids, input.right_anchor)?;
            let op = Operation {
                id: Uuid::new_v4(),
                document_id,
                kind: input.kind,
                counter: input.counter,
                site: input.site,
                left_anchor,
                right_anchor,
                value: input.value,
                color: input.color,
                version: document.version + 1 + i as u64,
                author_id,
                created_at: epoch_seconds(),
            };
            engine.apply(&op);
            batch_ids.insert(op.id);
            accepted.push(op);
        }

        let text = engine.current_text();
        let applied_version = document.version + accepted.len() as u64;

        if let Err(e) =
            self.store
                .commit_batch(document_id, &accepted, applied_version, &text)
        {
            // The engine absorbed an uncommitted batch; drop it so the next
            // access replays the durable state.
            *guard = None;
            log::error!("commit failed for document {document_id}: {e}");
            return Err(SyncError::from(e));
        }

        log::info!(
            "document {document_id} advanced to v{applied_version} (+{} ops)",
            accepted.len()
        );

        let ack = OperationAck {
            applied_version,
            operations: accepted,
        };
        self.fanout.publish(document_id, ack.clone()).await;
        Ok(ack)
    }

    /// Persist a compaction snapshot at the document's current version and
    /// overwrite the cached text with the caller's content.
    pub async fn save_snapshot(
        &self,
        document_id: Uuid,
        author_id: Uuid,
        version: u64,
        text: String,
    ) -> Result<Snapshot, SyncError> {
        let slot = self.cache.slot(document_id).await;
        let _guard = match tokio::time::timeout(self.config.lock_timeout, slot.lock()).await
        {
            Ok(guard) => guard,
            Err(_) => return Err(SyncError::Busy(document_id)),
        };

        let document = self.store.read_document(document_id)?;
        if document.version != version {
            return Err(SyncError::SnapshotVersionMismatch {
                expected: document.version,
                submitted: version,
            });
        }

        let snapshot = Snapshot {
            id: Uuid::new_v4(),
            document_id,
            version: document.version,
            text: text.clone(),
            author_id,
            created_at: epoch_seconds(),
        };
        self.store.write_snapshot(&snapshot)?;
        self.store.write_document(document_id, document.version, &text)?;

        log::info!("snapshot of document {document_id} at v{version}");
        Ok(snapshot)
    }

    /// Snapshots in descending version order.
    pub async fn list_snapshots(&self, document_id: Uuid) -> Result<Vec<Snapshot>, SyncError> {
        self.store.read_document(document_id)?;
        Ok(self.store.list_snapshots(document_id)?)
    }

    /// Monitoring view of one document.
    pub async fn document_stats(&self, document_id: Uuid) -> Result<DocumentStats, SyncError> {
        let document = self.store.read_document(document_id)?;
        let operation_count = self.store.operation_count(document_id)?;
        let last_snapshot_version = self
            .store
            .read_latest_snapshot(document_id)?
            .map(|s| s.version)
            .unwrap_or(0);
        let active_participants = self.fanout.participant_count(document_id).await;

        Ok(DocumentStats {
            document_id,
            version: document.version,
            operation_count,
            last_snapshot_version,
            active_participants,
        })
    }

    /// Keep a client-submitted anchor only when it references an accepted
    /// operation; anything else degrades to the sequence boundary.
    fn resolve_anchor(
        &self,
        document_id: Uuid,
        batch_ids: &HashSet<Uuid>,
        anchor: Option<Uuid>,
    ) -> Result<Option<Uuid>, SyncError> {
        let Some(id) = anchor else {
            return Ok(None);
        };
        if batch_ids.contains(&id) || self.store.contains_operation(document_id, id)? {
            Ok(Some(id))
        } else {
            log::debug!("dropping unknown anchor {id} for document {document_id}");
            Ok(None)
        }
    }
}

fn state_of(doc: &Document) -> DocumentState {
    DocumentState {
        document_id: doc.id,
        version: doc.version,
        text: doc.text.clone(),
        updated_at: doc.updated_at,
    }
}
