//! Thin RocksDB wrapper used by the durable ledger backend

use rocksdb::{Direction, IteratorMode, Options, WriteBatch, DB};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::StorageConfig;
use crate::errors::StorageError;

#[derive(Clone)]
pub struct RocksStore {
    db: Arc<DB>,
}

impl RocksStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        Self::open_with_config(path, &StorageConfig::default())
    }

    pub fn open_with_config<P: AsRef<Path>>(path: P, config: &StorageConfig) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if config.clear_on_start && path.exists() {
            warn!(path = %path.display(), "Clearing ledger database on start");
            DB::destroy(&Options::default(), path)
                .map_err(|e| StorageError::DatabaseOpenFailed(e.to_string()))?;
        }

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_write_buffer_size(config.write_buffer_size_mb * 1024 * 1024);
        opts.set_max_write_buffer_number(config.max_write_buffer_number as i32);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        let db = DB::open(&opts, path).map_err(|e| StorageError::DatabaseOpenFailed(e.to_string()))?;
        info!(path = %path.display(), "Opened ledger database");
        Ok(Self { db: Arc::new(db) })
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        self.db.get(key).map_err(|e| StorageError::ReadFailed(e.to_string()))
    }

    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        self.db.put(key, value).map_err(|e| StorageError::WriteFailed(e.to_string()))
    }

    pub fn delete(&self, key: &[u8]) -> Result<(), StorageError> {
        self.db.delete(key).map_err(|e| StorageError::WriteFailed(e.to_string()))
    }

    /// Write all puts and deletes as one atomic batch
    pub fn write_atomic(&self, puts: &[(Vec<u8>, Vec<u8>)], deletes: &[Vec<u8>]) -> Result<(), StorageError> {
        let mut batch = WriteBatch::default();
        for (key, value) in puts {
            batch.put(key, value);
        }
        for key in deletes {
            batch.delete(key);
        }
        self.db.write(batch).map_err(|e| StorageError::WriteFailed(e.to_string()))
    }

    /// Rows whose key starts with `prefix`, in key order, starting at `from`
    /// (inclusive) when given
    pub fn scan_prefix(
        &self,
        prefix: &[u8],
        from: Option<&[u8]>,
        limit: usize,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        let start = from.unwrap_or(prefix);
        let mut rows = Vec::new();

        for item in self.db.iterator(IteratorMode::From(start, Direction::Forward)) {
            let (key, value) = item.map_err(|e| StorageError::ReadFailed(e.to_string()))?;
            if !key.starts_with(prefix) {
                break;
            }
            rows.push((key.to_vec(), value.to_vec()));
            if rows.len() >= limit {
                break;
            }
        }

        Ok(rows)
    }
}
