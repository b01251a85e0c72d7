//! RocksDB-backed store.
//!
//! Column families:
//! - `accidents` — accident records, keyed by id (8 bytes big-endian)
//! - `users`     — accounts, keyed by username bytes
//! - `requests`  — priority requests, keyed by id (8 bytes big-endian)
//! - `meta`      — id counters for users and requests
//!
//! Big-endian keys make iteration order equal to id order, so the last key
//! of `accidents` is the highest id ever written.

use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode,
    IteratorMode, Options, SingleThreaded, WriteBatch, WriteOptions,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use super::{
    check_new_request, check_status, check_username, AccidentLog, NewPriorityRequest,
    PriorityRequest, RecordStore, User,
};
use crate::error::{RecordError, StoreError};
use crate::store::AccidentReport;

const CF_ACCIDENTS: &str = "accidents";
const CF_USERS: &str = "users";
const CF_REQUESTS: &str = "requests";
const CF_META: &str = "meta";

const COLUMN_FAMILIES: &[&str] = &[CF_ACCIDENTS, CF_USERS, CF_REQUESTS, CF_META];

const META_NEXT_USER_ID: &[u8] = b"next_user_id";
const META_NEXT_REQUEST_ID: &[u8] = b"next_request_id";

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database directory path
    pub path: PathBuf,
    /// Block cache size in bytes (default: 32MB)
    pub block_cache_size: usize,
    /// Bloom filter bits per key (default: 10)
    pub bloom_filter_bits: i32,
    /// fsync every write (default: true, accidents are the source of truth)
    pub sync_writes: bool,
    /// Max open files for RocksDB (default: 256)
    pub max_open_files: i32,
    /// Write buffer size per column family (default: 16MB)
    pub write_buffer_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("traffiguard_data"),
            block_cache_size: 32 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: true,
            max_open_files: 256,
            write_buffer_size: 16 * 1024 * 1024,
        }
    }
}

impl StoreConfig {
    /// Small caches, no fsync.
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 4 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 64,
            write_buffer_size: 1024 * 1024,
        }
    }
}

/// RocksDB-backed [`AccidentLog`] and [`RecordStore`].
pub struct RocksStore {
    /// RocksDB instance (single-threaded mode, writes serialized by `write_lock`)
    db: DBWithThreadMode<SingleThreaded>,
    config: StoreConfig,
    /// Serializes read-modify-write sequences on users, requests and counters
    write_lock: Mutex<()>,
}

impl RocksStore {
    /// Open the store, creating the database and column families if needed.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Self::cf_options(name, &config)))
            .collect();

        let db = DBWithThreadMode::<SingleThreaded>::open_cf_descriptors(
            &db_opts,
            &config.path,
            cf_descriptors,
        )?;

        log::info!("Opened accident store at {}", config.path.display());

        Ok(Self {
            db,
            config,
            write_lock: Mutex::new(()),
        })
    }

    fn cf_options(name: &str, config: &StoreConfig) -> Options {
        let mut opts = Options::default();

        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(config.bloom_filter_bits as f64, false);
        opts.set_block_based_table_factory(&block_opts);
        opts.set_write_buffer_size(config.write_buffer_size);

        match name {
            CF_ACCIDENTS | CF_REQUESTS => {
                // Append-mostly, scanned in key order
                opts.set_compression_type(DBCompressionType::Lz4);
                opts.set_max_write_buffer_number(2);
            }
            CF_USERS => {
                opts.set_compression_type(DBCompressionType::Lz4);
                opts.optimize_for_point_lookup(config.block_cache_size as u64);
            }
            CF_META => {
                opts.set_compression_type(DBCompressionType::None);
            }
            _ => {}
        }

        opts
    }

    /// Get the database path.
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Flush memtables to disk.
    pub fn sync(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    // ─── Helpers ──────────────────────────────────────────────────────

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("Column family '{name}' not found")))
    }

    fn write_opts(&self) -> WriteOptions {
        let mut opts = WriteOptions::default();
        opts.set_sync(self.config.sync_writes);
        opts
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn read_counter(&self, key: &[u8]) -> Result<u64, StoreError> {
        let cf = self.cf(CF_META)?;
        match self.db.get_cf(cf, key)? {
            Some(bytes) => decode_id(&bytes),
            None => Ok(1),
        }
    }

    /// Decode every value of a column family in key order.
    fn scan<T: DeserializeOwned>(&self, cf_name: &str) -> Result<Vec<T>, StoreError> {
        let cf = self.cf(cf_name)?;
        let mut out = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item?;
            out.push(decode(&value)?);
        }
        Ok(out)
    }
}

impl AccidentLog for RocksStore {
    fn append(&self, report: &AccidentReport) -> Result<(), StoreError> {
        let cf = self.cf(CF_ACCIDENTS)?;
        self.db
            .put_cf_opt(cf, report.id.to_be_bytes(), encode(report)?, &self.write_opts())?;
        Ok(())
    }

    fn load_all(&self) -> Result<Vec<AccidentReport>, StoreError> {
        self.scan(CF_ACCIDENTS)
    }

    fn last_id(&self) -> Result<Option<u64>, StoreError> {
        let cf = self.cf(CF_ACCIDENTS)?;
        match self.db.iterator_cf(cf, IteratorMode::End).next() {
            Some(item) => {
                let (key, _) = item?;
                decode_id(&key).map(Some)
            }
            None => Ok(None),
        }
    }
}

impl RecordStore for RocksStore {
    fn create_user(&self, username: &str, password_hash: &str) -> Result<User, RecordError> {
        check_username(username)?;
        let _guard = self.guard();

        let cf_users = self.cf(CF_USERS)?;
        let cf_meta = self.cf(CF_META)?;
        if self.db.get_cf(cf_users, username.as_bytes()).map_err(StoreError::from)?.is_some() {
            return Err(RecordError::UsernameTaken(username.to_string()));
        }

        let id = self.read_counter(META_NEXT_USER_ID)?;
        let user = User {
            id,
            username: username.to_string(),
            password_hash: password_hash.to_string(),
        };

        // Record and counter land together or not at all
        let mut batch = WriteBatch::default();
        batch.put_cf(cf_users, username.as_bytes(), encode(&user)?);
        batch.put_cf(cf_meta, META_NEXT_USER_ID, (id + 1).to_be_bytes());
        self.db.write_opt(batch, &self.write_opts()).map_err(StoreError::from)?;

        Ok(user)
    }

    fn find_user_by_name(&self, username: &str) -> Result<Option<User>, RecordError> {
        let cf = self.cf(CF_USERS)?;
        match self.db.get_cf(cf, username.as_bytes()).map_err(StoreError::from)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn create_priority_request(
        &self,
        request: NewPriorityRequest,
    ) -> Result<PriorityRequest, RecordError> {
        check_new_request(&request)?;
        let _guard = self.guard();

        let cf_requests = self.cf(CF_REQUESTS)?;
        let cf_meta = self.cf(CF_META)?;
        let id = self.read_counter(META_NEXT_REQUEST_ID)?;
        let created = request.into_request(id);

        let mut batch = WriteBatch::default();
        batch.put_cf(cf_requests, id.to_be_bytes(), encode(&created)?);
        batch.put_cf(cf_meta, META_NEXT_REQUEST_ID, (id + 1).to_be_bytes());
        self.db.write_opt(batch, &self.write_opts()).map_err(StoreError::from)?;

        Ok(created)
    }

    fn list_priority_requests(&self) -> Result<Vec<PriorityRequest>, RecordError> {
        Ok(self.scan(CF_REQUESTS)?)
    }

    fn update_request_status(&self, id: u64, status: &str) -> Result<PriorityRequest, RecordError> {
        check_status(status)?;
        let _guard = self.guard();

        let cf = self.cf(CF_REQUESTS)?;
        let key = id.to_be_bytes();
        let mut request: PriorityRequest = match self.db.get_cf(cf, key).map_err(StoreError::from)? {
            Some(bytes) => decode(&bytes)?,
            None => return Err(RecordError::RequestNotFound(id)),
        };

        request.status = status.to_string();
        self.db
            .put_cf_opt(cf, key, encode(&request)?, &self.write_opts())
            .map_err(StoreError::from)?;
        Ok(request)
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    bincode::serde::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| StoreError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
    let (value, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| StoreError::Deserialization(e.to_string()))?;
    Ok(value)
}

fn decode_id(bytes: &[u8]) -> Result<u64, StoreError> {
    let buf: [u8; 8] = bytes
        .get(..8)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| StoreError::Deserialization(format!("Invalid id key of {} bytes", bytes.len())))?;
    Ok(u64::from_be_bytes(buf))
}
