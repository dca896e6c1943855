//! RocksDB wrapper for docindex storage.
//!
//! Provides:
//! - Database open with column family setup
//! - Catalog record writes (single and batched) and scans
//! - A settings table whose writes are fsynced before returning

use rocksdb::{IteratorMode, Options, WriteBatch, WriteOptions, DB};
use std::path::Path;
use tracing::{debug, info};

use docindex_types::CatalogRecord;

use crate::catalog::{Catalog, RecordIter};
use crate::column_families::{build_cf_descriptors, CF_RECORDS, CF_SETTINGS};
use crate::error::StorageError;
use crate::settings_store::SettingsStore;

/// Main storage interface: catalog records plus the settings table.
pub struct Storage {
    db: DB,
}

impl Storage {
    /// Open storage at the given path, creating if necessary
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        info!("Opening storage at {:?}", path);

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_background_jobs(4);

        let db = DB::open_cf_descriptors(&db_opts, path, build_cf_descriptors())?;
        Ok(Self { db })
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StorageError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StorageError::ColumnFamilyNotFound(name.to_string()))
    }

    fn durable() -> WriteOptions {
        let mut opts = WriteOptions::default();
        opts.set_sync(true);
        opts
    }

    /// Insert or replace one catalog record.
    pub fn put_record(&self, record: &CatalogRecord) -> Result<(), StorageError> {
        let cf = self.cf(CF_RECORDS)?;
        self.db
            .put_cf(cf, record.id.as_bytes(), record.to_bytes()?)?;
        debug!(record_id = %record.id, "Stored record");
        Ok(())
    }

    /// Insert or replace many records in one atomic write.
    pub fn put_records(&self, records: &[CatalogRecord]) -> Result<usize, StorageError> {
        let cf = self.cf(CF_RECORDS)?;
        let mut batch = WriteBatch::default();
        for record in records {
            batch.put_cf(cf, record.id.as_bytes(), record.to_bytes()?);
        }
        self.db.write(batch)?;
        debug!(count = records.len(), "Stored record batch");
        Ok(records.len())
    }

    /// Get a record by id.
    pub fn get_record(&self, id: &str) -> Result<Option<CatalogRecord>, StorageError> {
        let cf = self.cf(CF_RECORDS)?;
        match self.db.get_cf(cf, id.as_bytes())? {
            Some(bytes) => Ok(Some(CatalogRecord::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Record and settings counts plus on-disk size, for `status`.
    pub fn get_stats(&self) -> Result<StorageStats, StorageError> {
        Ok(StorageStats {
            record_count: self.count_cf_entries(self.cf(CF_RECORDS)?)?,
            settings_count: self.count_cf_entries(self.cf(CF_SETTINGS)?)?,
            disk_usage_bytes: self.get_disk_usage(),
        })
    }

    fn count_cf_entries(&self, cf: &rocksdb::ColumnFamily) -> Result<u64, StorageError> {
        let mut count = 0u64;
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            item?;
            count += 1;
        }
        Ok(count)
    }

    fn get_disk_usage(&self) -> u64 {
        std::fs::read_dir(self.db.path())
            .map(|entries| {
                entries
                    .flatten()
                    .filter_map(|e| e.metadata().ok())
                    .map(|m| m.len())
                    .sum()
            })
            .unwrap_or(0)
    }
}

impl Catalog for Storage {
    fn scan(&self) -> Result<RecordIter<'_>, StorageError> {
        let cf = self.cf(CF_RECORDS)?;
        let iter = self.db.iterator_cf(cf, IteratorMode::Start).map(
            |item| -> Result<CatalogRecord, StorageError> {
                let (_, value) = item?;
                Ok(CatalogRecord::from_bytes(&value)?)
            },
        );
        Ok(Box::new(iter))
    }

    fn fetch(&self, ids: &[String]) -> Result<Vec<CatalogRecord>, StorageError> {
        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(record) = self.get_record(id)? {
                records.push(record);
            }
        }
        Ok(records)
    }

    fn record_count(&self) -> Result<u64, StorageError> {
        self.count_cf_entries(self.cf(CF_RECORDS)?)
    }
}

impl SettingsStore for Storage {
    fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let cf = self.cf(CF_SETTINGS)?;
        self.db.put_cf_opt(cf, key.as_bytes(), value, &Self::durable())?;
        debug!(key, "Stored setting");
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let cf = self.cf(CF_SETTINGS)?;
        Ok(self.db.get_cf(cf, key.as_bytes())?)
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        let cf = self.cf(CF_SETTINGS)?;
        self.db.delete_cf_opt(cf, key.as_bytes(), &Self::durable())?;
        debug!(key, "Deleted setting");
        Ok(())
    }
}

/// Statistics about the storage.
#[derive(Debug, Default)]
pub struct StorageStats {
    /// Number of catalog records
    pub record_count: u64,
    /// Number of settings entries
    pub settings_count: u64,
    /// Total disk usage in bytes
    pub disk_usage_bytes: u64,
}
