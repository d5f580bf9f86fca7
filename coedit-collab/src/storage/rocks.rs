//! RocksDB-backed sequence store.
//!
//! Column families:
//! - `documents`  — summary records (bincode)
//! - `operations` — the append-only log, keyed by `doc_id:version`
//! - `op_index`   — operation id membership, keyed by `doc_id:op_id`
//! - `snapshots`  — compaction records (LZ4-compressed bincode), keyed by
//!   `doc_id:version:snapshot_id`
//!
//! Version keys are big-endian so a prefix iteration walks the log in
//! ascending version order. Batch commits use a RocksDB `WriteBatch`: either
//! the whole accepted batch and the updated document record land, or nothing
//! does.

use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode,
    IteratorMode, Options, SingleThreaded, WriteBatch, WriteOptions,
};
use std::path::PathBuf;

use coedit_core::{epoch_seconds, Document, Operation, Snapshot};
use uuid::Uuid;

use super::{SequenceStore, StoreError};

/// Column family names.
const CF_DOCUMENTS: &str = "documents";
const CF_OPERATIONS: &str = "operations";
const CF_OP_INDEX: &str = "op_index";
const CF_SNAPSHOTS: &str = "snapshots";

/// All column family names for initialization.
const COLUMN_FAMILIES: &[&str] = &[CF_DOCUMENTS, CF_OPERATIONS, CF_OP_INDEX, CF_SNAPSHOTS];

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database directory path
    pub path: PathBuf,
    /// Block cache size in bytes (default: 64MB)
    pub block_cache_size: usize,
    /// Bloom filter bits per key (default: 10)
    pub bloom_filter_bits: i32,
    /// Enable fsync on every write (default: false)
    pub sync_writes: bool,
    /// Max open files for RocksDB (default: 512)
    pub max_open_files: i32,
    /// Write buffer size per column family (default: 32MB)
    pub write_buffer_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("coedit_data"),
            block_cache_size: 64 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 512,
            write_buffer_size: 32 * 1024 * 1024,
        }
    }
}

impl StoreConfig {
    /// Config for testing (small caches, temp directory).
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 8 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 64,
            write_buffer_size: 4 * 1024 * 1024,
        }
    }
}

fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    bincode::serde::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| StoreError::SerializationError(e.to_string()))
}

fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
    let (value, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| StoreError::DeserializationError(e.to_string()))?;
    Ok(value)
}

fn num_cpus() -> i32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as i32)
        .unwrap_or(2)
}

/// Durable [`SequenceStore`] on RocksDB.
pub struct RocksStore {
    /// RocksDB instance (single-threaded mode; concurrency via the
    /// coordinator's per-document locks)
    db: DBWithThreadMode<SingleThreaded>,
    config: StoreConfig,
}

impl RocksStore {
    /// Open the store at the configured path, creating the database and
    /// column families as needed.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);
        db_opts.increase_parallelism(num_cpus());

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| {
                let cf_opts = Self::cf_options(name, &config);
                ColumnFamilyDescriptor::new(*name, cf_opts)
            })
            .collect();

        let db = DBWithThreadMode::<SingleThreaded>::open_cf_descriptors(
            &db_opts,
            &config.path,
            cf_descriptors,
        )?;

        Ok(Self { db, config })
    }

    /// Build column-family-specific options.
    fn cf_options(name: &str, config: &StoreConfig) -> Options {
        let mut opts = Options::default();

        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(config.bloom_filter_bits as f64, false);
        block_opts.set_block_size(16 * 1024);
        opts.set_block_based_table_factory(&block_opts);

        opts.set_compression_type(DBCompressionType::Lz4);
        opts.set_write_buffer_size(config.write_buffer_size);

        match name {
            CF_DOCUMENTS => {
                // Small records, frequent point reads
                opts.set_max_write_buffer_number(2);
                opts.optimize_for_point_lookup(config.block_cache_size as u64);
            }
            CF_OPERATIONS => {
                // Many small appends, prefix-scanned by doc_id on replay
                opts.set_max_write_buffer_number(4);
                opts.set_prefix_extractor(rocksdb::SliceTransform::create_fixed_prefix(16));
            }
            CF_OP_INDEX => {
                opts.set_max_write_buffer_number(2);
                opts.optimize_for_point_lookup(config.block_cache_size as u64);
            }
            CF_SNAPSHOTS => {
                // Large values, infrequent writes; rows carry their own LZ4
                opts.set_max_write_buffer_number(2);
                opts.set_compression_type(DBCompressionType::None);
                opts.set_prefix_extractor(rocksdb::SliceTransform::create_fixed_prefix(16));
            }
            _ => {}
        }

        opts
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::DatabaseError(format!("missing column family {name}")))
    }

    /// Key: `doc_id (16 bytes) + version (8 bytes BE)`.
    fn version_key(document_id: Uuid, version: u64) -> Vec<u8> {
        let mut key = Vec::with_capacity(24);
        key.extend_from_slice(document_id.as_bytes());
        key.extend_from_slice(&version.to_be_bytes());
        key
    }

    /// Key: `doc_id (16 bytes) + version (8 bytes BE) + snapshot_id (16 bytes)`.
    fn snapshot_key(snapshot: &Snapshot) -> Vec<u8> {
        let mut key = Self::version_key(snapshot.document_id, snapshot.version);
        key.extend_from_slice(snapshot.id.as_bytes());
        key
    }

    /// Key: `doc_id (16 bytes) + op_id (16 bytes)`.
    fn op_index_key(document_id: Uuid, op_id: Uuid) -> Vec<u8> {
        let mut key = Vec::with_capacity(32);
        key.extend_from_slice(document_id.as_bytes());
        key.extend_from_slice(op_id.as_bytes());
        key
    }

    /// Highest stored operation version for a document, 0 when the log is
    /// empty.
    fn last_version(&self, document_id: Uuid) -> Result<u64, StoreError> {
        let cf = self.cf(CF_OPERATIONS)?;
        let end_key = Self::version_key(document_id, u64::MAX);

        let mut iter = self.db.iterator_cf(
            &cf,
            IteratorMode::From(&end_key, rocksdb::Direction::Reverse),
        );
        match iter.next() {
            Some(item) => {
                let (key, _) = item.map_err(|e| StoreError::DatabaseError(e.to_string()))?;
                if key.len() < 24 || &key[..16] != document_id.as_bytes() {
                    return Ok(0);
                }
                let mut buf = [0u8; 8];
                buf.copy_from_slice(&key[16..24]);
                Ok(u64::from_be_bytes(buf))
            }
            None => Ok(0),
        }
    }

    fn write_opts(&self) -> WriteOptions {
        let mut opts = WriteOptions::default();
        opts.set_sync(self.config.sync_writes);
        opts
    }

    /// Stage one operation into a write batch.
    fn stage_operation(&self, batch: &mut WriteBatch, op: &Operation) -> Result<(), StoreError> {
        let cf_ops = self.cf(CF_OPERATIONS)?;
        let cf_index = self.cf(CF_OP_INDEX)?;
        batch.put_cf(
            &cf_ops,
            Self::version_key(op.document_id, op.version),
            encode(op)?,
        );
        batch.put_cf(&cf_index, Self::op_index_key(op.document_id, op.id), b"");
        Ok(())
    }

    fn stage_document(
        &self,
        batch: &mut WriteBatch,
        document_id: Uuid,
        version: u64,
        text: &str,
    ) -> Result<(), StoreError> {
        let cf_docs = self.cf(CF_DOCUMENTS)?;
        let doc = Document {
            id: document_id,
            version,
            text: text.to_string(),
            updated_at: epoch_seconds(),
        };
        batch.put_cf(&cf_docs, document_id.as_bytes(), encode(&doc)?);
        Ok(())
    }
}

impl SequenceStore for RocksStore {
    fn create_document(&self, document_id: Uuid) -> Result<Document, StoreError> {
        let cf = self.cf(CF_DOCUMENTS)?;
        if self.db.get_cf(&cf, document_id.as_bytes())?.is_some() {
            return Err(StoreError::AlreadyExists(document_id));
        }
        let doc = Document::empty(document_id);
        self.db
            .put_cf_opt(&cf, document_id.as_bytes(), encode(&doc)?, &self.write_opts())?;
        Ok(doc)
    }

    fn read_document(&self, document_id: Uuid) -> Result<Document, StoreError> {
        let cf = self.cf(CF_DOCUMENTS)?;
        match self.db.get_cf(&cf, document_id.as_bytes())? {
            Some(bytes) => decode(&bytes),
            None => Err(StoreError::NotFound(document_id)),
        }
    }

    fn write_document(
        &self,
        document_id: Uuid,
        version: u64,
        text: &str,
    ) -> Result<(), StoreError> {
        // Keep NotFound semantics: only provisioned documents are writable.
        self.read_document(document_id)?;
        let mut batch = WriteBatch::default();
        self.stage_document(&mut batch, document_id, version, text)?;
        self.db.write_opt(batch, &self.write_opts())?;
        Ok(())
    }

    fn append_operation(&self, op: &Operation) -> Result<Operation, StoreError> {
        self.read_document(op.document_id)?;

        let expected = self.last_version(op.document_id)? + 1;
        if op.version != expected {
            return Err(StoreError::VersionOutOfOrder {
                document_id: op.document_id,
                expected,
                found: op.version,
            });
        }

        let mut batch = WriteBatch::default();
        self.stage_operation(&mut batch, op)?;
        self.db.write_opt(batch, &self.write_opts())?;
        Ok(op.clone())
    }

    fn commit_batch(
        &self,
        document_id: Uuid,
        operations: &[Operation],
        version: u64,
        text: &str,
    ) -> Result<(), StoreError> {
        self.read_document(document_id)?;

        // Validate the whole chain before staging anything.
        let mut expected = self.last_version(document_id)? + 1;
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

        let mut batch = WriteBatch::default();
        for op in operations {
            self.stage_operation(&mut batch, op)?;
        }
        self.stage_document(&mut batch, document_id, version, text)?;
        self.db.write_opt(batch, &self.write_opts())?;
        Ok(())
    }

    fn list_operations(
        &self,
        document_id: Uuid,
        since_version: u64,
    ) -> Result<Vec<Operation>, StoreError> {
        self.read_document(document_id)?;

        let cf = self.cf(CF_OPERATIONS)?;
        let start_key = Self::version_key(document_id, since_version + 1);

        let mut operations = Vec::new();
        let iter = self.db.iterator_cf(
            &cf,
            IteratorMode::From(&start_key, rocksdb::Direction::Forward),
        );
        for item in iter {
            let (key, value) = item.map_err(|e| StoreError::DatabaseError(e.to_string()))?;
            if key.len() < 24 || &key[..16] != document_id.as_bytes() {
                break;
            }
            operations.push(decode::<Operation>(&value)?);
        }

        Ok(operations)
    }

    fn operation_count(&self, document_id: Uuid) -> Result<u64, StoreError> {
        let cf = self.cf(CF_OPERATIONS)?;
        let start_key = Self::version_key(document_id, 0);

        let mut count = 0u64;
        let iter = self.db.iterator_cf(
            &cf,
            IteratorMode::From(&start_key, rocksdb::Direction::Forward),
        );
        for item in iter {
            let (key, _) = item.map_err(|e| StoreError::DatabaseError(e.to_string()))?;
            if key.len() < 24 || &key[..16] != document_id.as_bytes() {
                break;
            }
            count += 1;
        }
        Ok(count)
    }

    fn contains_operation(&self, document_id: Uuid, op_id: Uuid) -> Result<bool, StoreError> {
        let cf = self.cf(CF_OP_INDEX)?;
        Ok(self
            .db
            .get_cf(&cf, Self::op_index_key(document_id, op_id))?
            .is_some())
    }

    fn read_latest_snapshot(
        &self,
        document_id: Uuid,
    ) -> Result<Option<Snapshot>, StoreError> {
        let cf = self.cf(CF_SNAPSHOTS)?;
        let mut end_key = Self::version_key(document_id, u64::MAX);
        end_key.extend_from_slice(&[0xFF; 16]);

        let mut iter = self.db.iterator_cf(
            &cf,
            IteratorMode::From(&end_key, rocksdb::Direction::Reverse),
        );
        match iter.next() {
            Some(item) => {
                let (key, value) = item.map_err(|e| StoreError::DatabaseError(e.to_string()))?;
                if key.len() < 40 || &key[..16] != document_id.as_bytes() {
                    return Ok(None);
                }
                let raw = lz4_flex::decompress_size_prepended(&value)
                    .map_err(|e| StoreError::CompressionError(e.to_string()))?;
                Ok(Some(decode(&raw)?))
            }
            None => Ok(None),
        }
    }

    fn write_snapshot(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        self.read_document(snapshot.document_id)?;

        let cf = self.cf(CF_SNAPSHOTS)?;
        let compressed = lz4_flex::compress_prepend_size(&encode(snapshot)?);
        self.db.put_cf_opt(
            &cf,
            Self::snapshot_key(snapshot),
            compressed,
            &self.write_opts(),
        )?;
        Ok(())
    }

    fn list_snapshots(&self, document_id: Uuid) -> Result<Vec<Snapshot>, StoreError> {
        let cf = self.cf(CF_SNAPSHOTS)?;
        let start_key = Self::version_key(document_id, 0);

        let mut snapshots = Vec::new();
        let iter = self.db.iterator_cf(
            &cf,
            IteratorMode::From(&start_key, rocksdb::Direction::Forward),
        );
        for item in iter {
            let (key, value) = item.map_err(|e| StoreError::DatabaseError(e.to_string()))?;
            if key.len() < 40 || &key[..16] != document_id.as_bytes() {
                break;
            }
            let raw = lz4_flex::decompress_size_prepended(&value)
                .map_err(|e| StoreError::CompressionError(e.to_string()))?;
            snapshots.push(decode::<Snapshot>(&raw)?);
        }

        snapshots.reverse();
        Ok(snapshots)
    }

    fn list_documents(&self) -> Result<Vec<Uuid>, StoreError> {
        let cf = self.cf(CF_DOCUMENTS)?;
        let mut doc_ids = Vec::new();

        let iter = self.db.iterator_cf(&cf, IteratorMode::Start);
        for item in iter {
            let (key, _) = item.map_err(|e| StoreError::DatabaseError(e.to_string()))?;
            if key.len() == 16 {
                let id = Uuid::from_bytes(key.as_ref().try_into().map_err(|_| {
                    StoreError::DeserializationError("Invalid UUID key".into())
                })?);
                doc_ids.push(id);
            }
        }

        Ok(doc_ids)
    }
}
