//! In-memory sequence store.
//!
//! Backs tests and single-process deployments that do not need durability.
//! All guarantees of the [`SequenceStore`] contract hold, including atomic
//! batch commits: every mutation runs under one write lock.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use coedit_core::{epoch_seconds, Document, Operation, Snapshot};
use uuid::Uuid;

use super::{SequenceStore, StoreError};

#[derive(Default)]
struct MemoryInner {
    documents: HashMap<Uuid, Document>,
    /// Per-document log in ascending version order
    operations: HashMap<Uuid, Vec<Operation>>,
    /// Per-document operation id index for anchor validation
    operation_ids: HashMap<Uuid, HashSet<Uuid>>,
    /// Per-document snapshots in insertion (= ascending version) order
    snapshots: HashMap<Uuid, Vec<Snapshot>>,
}

impl MemoryInner {
    fn last_version(&self, document_id: Uuid) -> u64 {
        self.operations
            .get(&document_id)
            .and_then(|log| log.last())
            .map(|op| op.version)
            .unwrap_or(0)
    }

    fn append(&mut self, op: &Operation) -> Result<(), StoreError> {
        if !self.documents.contains_key(&op.document_id) {
            return Err(StoreError::NotFound(op.document_id));
        }
        let expected = self.last_version(op.document_id) + 1;
        if op.version != expected {
            return Err(StoreError::VersionOutOfOrder {
                document_id: op.document_id,
                expected,
                found: op.version,
            });
        }
        self.operations
            .entry(op.document_id)
            .or_default()
            .push(op.clone());
        self.operation_ids
            .entry(op.document_id)
            .or_default()
            .insert(op.id);
        Ok(())
    }

    fn write_document(
        &mut self,
        document_id: Uuid,
        version: u64,
        text: &str,
    ) -> Result<(), StoreError> {
        let doc = self
            .documents
            .get_mut(&document_id)
            .ok_or(StoreError::NotFound(document_id))?;
        doc.version = version;
        doc.text = text.to_string();
        doc.updated_at = epoch_seconds();
        Ok(())
    }
}

/// Heap-backed [`SequenceStore`].
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, MemoryInner> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, MemoryInner> {
        self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl SequenceStore for MemoryStore {
    fn create_document(&self, document_id: Uuid) -> Result<Document, StoreError> {
        let mut inner = self.write();
        if inner.documents.contains_key(&document_id) {
            return Err(StoreError::AlreadyExists(document_id));
        }
        let doc = Document::empty(document_id);
        inner.documents.insert(document_id, doc.clone());
        Ok(doc)
    }

    fn read_document(&self, document_id: Uuid) -> Result<Document, StoreError> {
        self.read()
            .documents
            .get(&document_id)
            .cloned()
            .ok_or(StoreError::NotFound(document_id))
    }

    fn write_document(
        &self,
        document_id: Uuid,
        version: u64,
        text: &str,
    ) -> Result<(), StoreError> {
        self.write().write_document(document_id, version, text)
    }

    fn append_operation(&self, op: &Operation) -> Result<Operation, StoreError> {
        self.write().append(op)?;
        Ok(op.clone())
    }

    fn commit_batch(
        &self,
        document_id: Uuid,
        operations: &[Operation],
        version: u64,
        text: &str,
    ) -> Result<(), StoreError> {
        let mut inner = self.write();

        // Validate the whole chain before mutating anything, so a bad batch
        // leaves no partial state behind.
        let mut expected = inner.last_version(document_id) + 1;
        for op in operations {
            if op.version != expected {
                return Err(StoreError::VersionOutOfOrder {
                    document_id,
                    expected,
                    found: op.version,
                });
            }
            expected += 1;
        }

        for op in operations {
            inner.append(op)?;
        }
        inner.write_document(document_id, version, text)
    }

    fn list_operations(
        &self,
        document_id: Uuid,
        since_version: u64,
    ) -> Result<Vec<Operation>, StoreError> {
        let inner = self.read();
        if !inner.documents.contains_key(&document_id) {
            return Err(StoreError::NotFound(document_id));
        }
        Ok(inner
            .operations
            .get(&document_id)
            .map(|log| {
                log.iter()
                    .filter(|op| op.version > since_version)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn operation_count(&self, document_id: Uuid) -> Result<u64, StoreError> {
        Ok(self
            .read()
            .operations
            .get(&document_id)
            .map(|log| log.len() as u64)
            .unwrap_or(0))
    }

    fn contains_operation(&self, document_id: Uuid, op_id: Uuid) -> Result<bool, StoreError> {
        Ok(self
            .read()
            .operation_ids
            .get(&document_id)
            .is_some_and(|ids| ids.contains(&op_id)))
    }

    fn read_latest_snapshot(
        &self,
        document_id: Uuid,
    ) -> Result<Option<Snapshot>, StoreError> {
        Ok(self
            .read()
            .snapshots
            .get(&document_id)
            .and_then(|rows| rows.last())
            .cloned())
    }

    fn write_snapshot(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        let mut inner = self.write();
        if !inner.documents.contains_key(&snapshot.document_id) {
            return Err(StoreError::NotFound(snapshot.document_id));
        }
        inner
            .snapshots
            .entry(snapshot.document_id)
            .or_default()
            .push(snapshot.clone());
        Ok(())
    }

    fn list_snapshots(&self, document_id: Uuid) -> Result<Vec<Snapshot>, StoreError> {
        let mut rows = self
            .read()
            .snapshots
            .get(&document_id)
            .cloned()
            .unwrap_or_default();
        rows.reverse();
        Ok(rows)
    }

    fn list_documents(&self) -> Result<Vec<Uuid>, StoreError> {
        Ok(self.read().documents.keys().copied().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coedit_core::OperationKind;

    fn op(document_id: Uuid, version: u64) -> Operation {
        Operation {
            id: Uuid::new_v4(),
            document_id,
            kind: OperationKind::Insert,
            counter: version,
            site: 1,
            left_anchor: None,
            right_anchor: None,
            value: "x".to_string(),
            color: None,
            version,
            author_id: Uuid::nil(),
            created_at: epoch_seconds(),
        }
    }

    #[test]
    fn test_create_and_read_document() {
        let store = MemoryStore::new();
        let id = Uuid::new_v4();

        let created = store.create_document(id).unwrap();
        assert_eq!(created.version, 0);

        let read = store.read_document(id).unwrap();
        assert_eq!(read, created);
    }

    #[test]
    fn test_create_twice_fails() {
        let store = MemoryStore::new();
        let id = Uuid::new_v4();
        store.create_document(id).unwrap();
        assert!(matches!(
            store.create_document(id),
            Err(StoreError::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_read_unknown_document() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.read_document(Uuid::new_v4()),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_append_enforces_contiguous_versions() {
        let store = MemoryStore::new();
        let id = Uuid::new_v4();
        store.create_document(id).unwrap();

        store.append_operation(&op(id, 1)).unwrap();
        store.append_operation(&op(id, 2)).unwrap();

        let err = store.append_operation(&op(id, 4)).unwrap_err();
        assert!(matches!(
            err,
            StoreError::VersionOutOfOrder {
                expected: 3,
                found: 4,
                ..
            }
        ));
    }

    #[test]
    fn test_list_operations_since() {
        let store = MemoryStore::new();
        let id = Uuid::new_v4();
        store.create_document(id).unwrap();
        for v in 1..=5 {
            store.append_operation(&op(id, v)).unwrap();
        }

        let ops = store.list_operations(id, 3).unwrap();
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].version, 4);
        assert_eq!(ops[1].version, 5);

        assert_eq!(store.operation_count(id).unwrap(), 5);
    }

    #[test]
    fn test_contains_operation() {
        let store = MemoryStore::new();
        let id = Uuid::new_v4();
        store.create_document(id).unwrap();

        let first = op(id, 1);
        store.append_operation(&first).unwrap();

        assert!(store.contains_operation(id, first.id).unwrap());
        assert!(!store.contains_operation(id, Uuid::new_v4()).unwrap());
    }

    #[test]
    fn test_commit_batch_is_atomic() {
        let store = MemoryStore::new();
        let id = Uuid::new_v4();
        store.create_document(id).unwrap();

        // Batch with an internal gap commits nothing.
        let bad = vec![op(id, 1), op(id, 3)];
        assert!(store.commit_batch(id, &bad, 3, "xx").is_err());
        assert_eq!(store.operation_count(id).unwrap(), 0);
        assert_eq!(store.read_document(id).unwrap().version, 0);

        let good = vec![op(id, 1), op(id, 2)];
        store.commit_batch(id, &good, 2, "xx").unwrap();
        assert_eq!(store.operation_count(id).unwrap(), 2);

        let doc = store.read_document(id).unwrap();
        assert_eq!(doc.version, 2);
        assert_eq!(doc.text, "xx");
    }

    #[test]
    fn test_snapshots_latest_and_descending() {
        let store = MemoryStore::new();
        let id = Uuid::new_v4();
        store.create_document(id).unwrap();

        assert!(store.read_latest_snapshot(id).unwrap().is_none());

        for version in [2u64, 5, 9] {
            store
                .write_snapshot(&Snapshot {
                    id: Uuid::new_v4(),
                    document_id: id,
                    version,
                    text: format!("v{version}"),
                    author_id: Uuid::nil(),
                    created_at: epoch_seconds(),
                })
                .unwrap();
        }

        let latest = store.read_latest_snapshot(id).unwrap().unwrap();
        assert_eq!(latest.version, 9);

        let all = store.list_snapshots(id).unwrap();
        let versions: Vec<u64> = all.iter().map(|s| s.version).collect();
        assert_eq!(versions, vec![9, 5, 2]);
    }

    #[test]
    fn test_list_documents() {
        let store = MemoryStore::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        store.create_document(a).unwrap();
        store.create_document(b).unwrap();

        let docs = store.list_documents().unwrap();
        assert_eq!(docs.len(), 2);
        assert!(docs.contains(&a));
        assert!(docs.contains(&b));
    }
}
