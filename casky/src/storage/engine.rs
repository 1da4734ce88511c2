//! The engine façade: the public operations on a store, combining the
//! codec, the log, and the key directory under a single serialization
//! primitive.
//!
//! Concurrency mode is chosen at build time via the `thread-safe` feature:
//!
//! - default (no feature): `EngineCore` sits behind a `RefCell`, which is
//!   `!Sync` by construction, so the compiler itself enforces "callers must
//!   serialize all access externally" — there is no way to share an
//!   `Engine` across threads in this mode.
//! - `thread-safe`: `EngineCore` sits behind a `Mutex`, making `Engine: Send
//!   + Sync` so it can be wrapped in an `Arc` and shared by `caskyd`'s
//!   connection handlers. Every public operation holds the mutex for its
//!   full body.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

#[cfg(not(feature = "thread-safe"))]
use std::cell::RefCell;
#[cfg(feature = "thread-safe")]
use std::sync::Mutex;

use serde_derive::{Deserialize, Serialize};

use crate::codec::{Record, DEFAULT_MAX_FIELD_BYTES};
use crate::error::{CResult, Error};
use crate::stats::{Stats, StatsSnapshot};
use crate::storage::keydir::{KeyDirectory, Lookup};
use crate::storage::log::{Log, ScanStep};

/// Fixed on-disk overhead of one record's header (crc + timestamp +
/// expires_at + key_len + value_len), used for `Status`'s size accounting.
const RECORD_HEADER_BYTES: u64 = 4 + 8 + 8 + 4 + 4;

/// Build-time/open-time knobs. `sync_on_write` defaults to `false`.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    pub sync_on_write: bool,
    pub max_record_field_bytes: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { sync_on_write: false, max_record_field_bytes: DEFAULT_MAX_FIELD_BYTES }
    }
}

/// Engine status: disk footprint and live/garbage accounting, driving the
/// garbage-ratio compaction heuristic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub keys: u64,
    pub size: u64,
    pub total_disk_size: u64,
    pub live_disk_size: u64,
    pub garbage_disk_size: u64,
    pub corrupted: bool,
}

/// Outcome of `Engine::open`: the handle is valid in both cases, even when
/// recovery halted on a bad record partway through the log.
/// `Corrupt` carries the same engine plus the error that halted recovery,
/// so a caller can choose to proceed read-mostly and schedule a compaction.
pub enum OpenOutcome {
    Clean(Engine),
    Corrupt(Engine, Error),
}

impl OpenOutcome {
    /// Unwraps to the engine regardless of whether recovery hit corruption.
    pub fn into_engine(self) -> Engine {
        match self {
            OpenOutcome::Clean(e) => e,
            OpenOutcome::Corrupt(e, _) => e,
        }
    }

    pub fn is_corrupt(&self) -> bool {
        matches!(self, OpenOutcome::Corrupt(..))
    }
}

struct EngineCore {
    path: PathBuf,
    log: Log,
    keydir: KeyDirectory,
    sync_on_write: bool,
    #[allow(dead_code)]
    max_field_bytes: u32,
    corrupted: bool,
}

/// An open Casky database. See the module docs for the concurrency model.
pub struct Engine {
    #[cfg(not(feature = "thread-safe"))]
    core: RefCell<EngineCore>,
    #[cfg(feature = "thread-safe")]
    core: Mutex<EngineCore>,
    stats: Stats,
}

pub fn now_unix() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).expect("system clock before epoch").as_secs()
}

/// Whether this build serializes every public operation behind a mutex
/// (`thread-safe` feature) or leaves serialization to the caller (default).
/// `caskyd` uses this to decide what to print after `CASKY <version>` in
/// its connection banner.
#[cfg(feature = "thread-safe")]
pub const THREAD_SAFE: bool = true;
#[cfg(not(feature = "thread-safe"))]
pub const THREAD_SAFE: bool = false;

impl Engine {
    /// Opens or creates the database at `path`, replaying its log into a
    /// fresh directory.
    pub fn open(path: impl AsRef<Path>, config: EngineConfig) -> CResult<OpenOutcome> {
        Self::open_with_lock(path, config, true)
    }

    pub fn open_with_lock(
        path: impl AsRef<Path>,
        config: EngineConfig,
        try_lock: bool,
    ) -> CResult<OpenOutcome> {
        let mut log = Log::open_or_create_with_lock(path, try_lock)?;
        let (keydir, corrupted, err) = recover(&mut log, config.max_record_field_bytes);

        let core = EngineCore {
            path: log.path().to_path_buf(),
            log,
            keydir,
            sync_on_write: config.sync_on_write,
            max_field_bytes: config.max_record_field_bytes,
            corrupted,
        };
        let engine = Self::from_core(core);

        match err {
            Some(err) => Ok(OpenOutcome::Corrupt(engine, err)),
            None => Ok(OpenOutcome::Clean(engine)),
        }
    }

    /// Opens the database and, if the fraction of on-disk garbage exceeds
    /// `garbage_ratio_threshold`, immediately compacts it.
    pub fn open_with_compaction_threshold(
        path: impl AsRef<Path>,
        config: EngineConfig,
        garbage_ratio_threshold: f64,
    ) -> CResult<OpenOutcome> {
        let outcome = Self::open(path, config)?;
        let engine = outcome.into_engine();
        let status = engine.status()?;
        if status.total_disk_size > 0 && status.garbage_disk_size > 0 {
            let ratio = status.garbage_disk_size as f64 / status.total_disk_size as f64;
            if ratio >= garbage_ratio_threshold {
                log::info!(
                    "compacting to remove {} bytes of garbage ({:.0}% of {} bytes)",
                    status.garbage_disk_size,
                    ratio * 100.0,
                    status.total_disk_size
                );
                engine.compact()?;
            }
        }
        if status.corrupted {
            Ok(OpenOutcome::Corrupt(
                engine,
                Error::Corrupt("recovery halted on a bad record".to_string()),
            ))
        } else {
            Ok(OpenOutcome::Clean(engine))
        }
    }

    #[cfg(not(feature = "thread-safe"))]
    fn from_core(core: EngineCore) -> Self {
        Self { core: RefCell::new(core), stats: Stats::new() }
    }

    #[cfg(feature = "thread-safe")]
    fn from_core(core: EngineCore) -> Self {
        Self { core: Mutex::new(core), stats: Stats::new() }
    }

    #[cfg(not(feature = "thread-safe"))]
    fn with_core<R>(&self, f: impl FnOnce(&mut EngineCore) -> R) -> R {
        f(&mut self.core.borrow_mut())
    }

    #[cfg(feature = "thread-safe")]
    fn with_core<R>(&self, f: impl FnOnce(&mut EngineCore) -> R) -> R {
        f(&mut self.core.lock().expect("engine mutex poisoned"))
    }

    /// Flushes the log and drops the handle. `self` is consumed, so a
    /// second call cannot happen through the type system.
    pub fn close(self) -> CResult<()> {
        self.with_core(|core| core.log.flush())
    }

    pub fn put(&self, key: &[u8], value: &[u8], ttl_seconds: u64) -> CResult<()> {
        if key.is_empty() {
            return Err(Error::InvalidKey("key must not be empty".to_string()));
        }
        if value.is_empty() {
            // An empty value and a tombstone both encode as value_len == 0 on
            // disk, so an empty value can't round-trip: recovery would replay
            // it as a delete and silently lose whatever was just written.
            return Err(Error::InvalidKey("value must not be empty".to_string()));
        }
        let now = now_unix();
        let expires_at = if ttl_seconds > 0 { now + ttl_seconds } else { 0 };

        let result = self.with_core(|core| {
            // Memory is updated before the log append: a log failure here
            // leaves memory ahead of disk.
            core.keydir.put_in_memory(key.to_vec(), value.to_vec(), now, expires_at);
            let record = Record::new(now, expires_at, key.to_vec(), Some(value.to_vec()));
            core.log.append(&record.encode(), core.sync_on_write)
        });
        result?;
        self.stats.record_put();
        Ok(())
    }

    pub fn get(&self, key: &[u8]) -> CResult<Option<Vec<u8>>> {
        let now = now_unix();
        let value = self.with_core(|core| match core.keydir.get_in_memory(key, now) {
            Lookup::Found(v) => Some(v),
            Lookup::NotFound => None,
        });
        self.stats.record_get();
        Ok(value)
    }

    pub fn delete(&self, key: &[u8]) -> CResult<()> {
        if key.is_empty() {
            return Err(Error::InvalidKey("key must not be empty".to_string()));
        }
        let now = now_unix();
        let append_result = self.with_core(|core| {
            if !core.keydir.delete_in_memory(key) {
                return None;
            }
            let record = Record::new(now, 0, key.to_vec(), None);
            Some(core.log.append(&record.encode(), core.sync_on_write))
        });
        match append_result {
            None => Err(Error::KeyNotFound),
            Some(result) => {
                result?;
                self.stats.record_delete();
                Ok(())
            }
        }
    }

    /// Sweeps all buckets for expired entries. Memory-only: does not touch
    /// the log. Returns the number of entries removed.
    pub fn expire(&self) -> CResult<usize> {
        let now = now_unix();
        Ok(self.with_core(|core| core.keydir.sweep_expired(now)))
    }

    /// Rewrites the log from the live directory, holding the engine lock
    /// for the full duration. On any failure before the final rename, the
    /// temporary file is removed and the live log is untouched.
    pub fn compact(&self) -> CResult<()> {
        self.with_core(compact_core)
    }

    pub fn status(&self) -> CResult<Status> {
        self.with_core(|core| {
            let now = now_unix();
            let keys = core.keydir.len() as u64;
            let size: u64 = core
                .keydir
                .iter()
                .filter(|e| !(e.expires_at != 0 && e.expires_at <= now))
                .fold(0, |acc, e| acc + e.key.len() as u64 + e.value.len() as u64);
            let total_disk_size = core.log.file_size()?;
            let live_disk_size = size + RECORD_HEADER_BYTES * keys;
            let garbage_disk_size = total_disk_size.saturating_sub(live_disk_size);
            Ok(Status {
                keys,
                size,
                total_disk_size,
                live_disk_size,
                garbage_disk_size,
                corrupted: core.corrupted,
            })
        })
    }

    pub fn stats(&self) -> CResult<StatsSnapshot> {
        let status = self.status()?;
        Ok(self.stats.snapshot(status.keys, status.live_disk_size))
    }

    pub fn is_corrupted(&self) -> bool {
        self.with_core(|core| core.corrupted)
    }
}

/// Replays the log into a fresh directory. Stops at the first record that
/// fails to decode, applying nothing past that point.
fn recover(log: &mut Log, max_field_bytes: u32) -> (KeyDirectory, bool, Option<Error>) {
    let mut keydir = KeyDirectory::new();
    let mut scan = match log.scan_from_start(max_field_bytes) {
        Ok(scan) => scan,
        Err(err) => return (keydir, true, Some(err)),
    };

    loop {
        match scan.next_step() {
            ScanStep::Record(record) => match record.value {
                Some(value) => {
                    keydir.put_in_memory(record.key, value, record.timestamp, record.expires_at)
                }
                None => {
                    keydir.delete_in_memory(&record.key);
                }
            },
            ScanStep::EndOfStream => return (keydir, false, None),
            ScanStep::Corrupt(err) => {
                log::error!("recovery halted on a bad record: {}", err);
                return (keydir, true, Some(err));
            }
        }
    }
}

fn compact_core(core: &mut EngineCore) -> CResult<()> {
    let tmp_path = temp_path_for(&core.path);

    let result = (|| -> CResult<()> {
        let mut tmp_log = Log::open_or_create_with_lock(&tmp_path, false)?;
        tmp_log.truncate_at(0)?;

        let now = now_unix();
        for entry in core.keydir.iter() {
            if entry.expires_at != 0 && entry.expires_at <= now {
                continue;
            }
            let record = Record::new(
                entry.timestamp,
                entry.expires_at,
                entry.key.clone(),
                Some(entry.value.clone()),
            );
            tmp_log.append(&record.encode(), core.sync_on_write)?;
        }
        tmp_log.flush()?;
        drop(tmp_log);

        std::fs::rename(&tmp_path, &core.path)?;
        Ok(())
    })();

    if result.is_err() {
        let _ = std::fs::remove_file(&tmp_path);
        return result;
    }

    core.log = Log::open_or_create_with_lock(&core.path, false)?;
    core.corrupted = false;
    Ok(())
}

fn temp_path_for(path: &Path) -> PathBuf {
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).expect("clock").as_nanos();
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(format!(".{:x}.tmp", nanos));
    path.with_file_name(name)
}
