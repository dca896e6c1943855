//! Column family definitions for RocksDB.
//!
//! - records: catalog rows keyed by record id (point lookups + full scans)
//! - settings: small key/value entries such as the reindex marker

use rocksdb::{ColumnFamilyDescriptor, Options};

/// Column family name for catalog records
pub const CF_RECORDS: &str = "records";

/// Column family name for the settings table
pub const CF_SETTINGS: &str = "settings";

/// All column family names
pub const ALL_CF_NAMES: &[&str] = &[CF_RECORDS, CF_SETTINGS];

/// Create column family options for records (compressed, scan-heavy)
fn records_options() -> Options {
    let mut opts = Options::default();
    opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
    opts
}

/// Build all column family descriptors
pub fn build_cf_descriptors() -> Vec<ColumnFamilyDescriptor> {
    vec![
        ColumnFamilyDescriptor::new(CF_RECORDS, records_options()),
        ColumnFamilyDescriptor::new(CF_SETTINGS, Options::default()),
    ]
}
