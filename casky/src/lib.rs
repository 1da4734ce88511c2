//! `casky` keeps key-value pairs in an append-only log file and an
//! in-memory directory of bucket chains mapping keys to their current
//! value. Deletes write a tombstone to the log. To remove old garbage,
//! logs are compacted by writing a new log containing only live data,
//! skipping replaced values and tombstones.
//!
//! ## Getting started
//!
//! ```rust
//! use casky::error::CResult;
//! use casky::storage::engine::{Engine, EngineConfig};
//!
//! fn run() -> CResult<()> {
//!     let dir = tempfile::tempdir().unwrap();
//!     let path = dir.path().join("demo.cask");
//!
//!     let engine = Engine::open_with_lock(&path, EngineConfig::default(), false)?.into_engine();
//!     engine.put(b"b", b"\x01", 0)?;
//!     engine.put(b"b", b"\x02", 0)?;
//!
//!     engine.put(b"e", b"\x05", 0)?;
//!     engine.delete(b"e")?;
//!
//!     assert_eq!(engine.get(b"b")?, Some(b"\x02".to_vec()));
//!     assert_eq!(engine.get(b"e")?, None);
//!
//!     engine.close()?;
//!     Ok(())
//! }
//!
//! run().unwrap();
//! ```

pub mod codec;
pub mod error;
pub mod stats;
pub mod storage;

/// The crate version, as reported by the `caskyd` daemon's `VER` command.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
