use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use fs4::FileExt;

use crate::codec::{DecodeOutcome, Record};
use crate::error::{CResult, Error};

/// A thin wrapper over the append-only log file: append, flush, optional
/// synchronous durability, and a rewind-and-scan reader for recovery.
///
/// Takes an advisory exclusive lock on the file for as long as it is open,
/// so a second `casky` process opening the same path fails fast at `open`
/// instead of silently racing the first writer.
pub struct Log {
    pub(crate) path: PathBuf,
    pub(crate) file: File,
}

impl Log {
    /// Opens the log file for append+read, creating it (and its parent
    /// directory) if absent. Fails with `InvalidPath` for an empty path.
    pub fn open_or_create(path: impl AsRef<Path>) -> CResult<Self> {
        Self::open_or_create_with_lock(path, true)
    }

    pub fn open_or_create_with_lock(path: impl AsRef<Path>, try_lock: bool) -> CResult<Self> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(Error::InvalidPath("path is empty".to_string()));
        }

        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir).map_err(|err| {
                    if !dir.exists() {
                        Error::InvalidPath(format!(
                            "parent directory {:?} does not exist: {}",
                            dir, err
                        ))
                    } else {
                        Error::Io(err)
                    }
                })?;
            }
        }

        let file = OpenOptions::new().read(true).write(true).create(true).open(path)?;

        if try_lock {
            file.try_lock_exclusive().map_err(Error::Io)?;
        }

        Ok(Self { path: path.to_path_buf(), file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_size(&self) -> CResult<u64> {
        Ok(self.file.metadata()?.len())
    }

    /// Appends `encoded` to the log, flushing user-space buffers and, if
    /// `sync` is set, issuing an fsync before returning. Appends from a
    /// single `Log` are strictly ordered in the byte stream in the order
    /// they complete, since each call seeks to the current end of file and
    /// writes under the caller's own serialization (the engine façade's
    /// lock).
    pub fn append(&mut self, encoded: &[u8], sync: bool) -> CResult<u64> {
        let pos = self.file.seek(SeekFrom::End(0))?;
        let mut writer = BufWriter::with_capacity(encoded.len().max(1), &mut self.file);
        writer.write_all(encoded)?;
        writer.flush()?;
        drop(writer);
        if sync {
            self.file.sync_all()?;
        }
        Ok(pos)
    }

    pub fn flush(&mut self) -> CResult<()> {
        Ok(self.file.sync_all()?)
    }

    /// Returns an iterator over every record from the start of the file,
    /// in file order, yielding the codec's decode outcome for each one.
    pub fn scan_from_start(&mut self, max_field_bytes: u32) -> CResult<LogScan<'_>> {
        self.file.seek(SeekFrom::Start(0))?;
        Ok(LogScan { reader: BufReader::new(&mut self.file), max_field_bytes, done: false })
    }

    /// Truncates the file at `pos`, discarding everything after it. Used by
    /// recovery to drop a trailing partial write.
    pub fn truncate_at(&mut self, pos: u64) -> CResult<()> {
        self.file.set_len(pos)?;
        Ok(())
    }
}

/// Scans a log file's records in file order starting from its own current
/// position (the engine façade always seeks to 0 via `scan_from_start`
/// before iterating).
pub struct LogScan<'a> {
    reader: BufReader<&'a mut File>,
    max_field_bytes: u32,
    done: bool,
}

/// One step of a log scan: either a verified record, the clean end of the
/// file, or the position and cause of a truncated/corrupt tail.
pub enum ScanStep {
    Record(Record),
    EndOfStream,
    Corrupt(Error),
}

impl<'a> LogScan<'a> {
    /// Returns the byte offset the underlying reader is positioned at.
    pub fn position(&mut self) -> CResult<u64> {
        Ok(self.reader.stream_position()?)
    }

    pub fn next_step(&mut self) -> ScanStep {
        if self.done {
            return ScanStep::EndOfStream;
        }
        match Record::decode_from(&mut self.reader, self.max_field_bytes) {
            Ok(DecodeOutcome::Record(record)) => ScanStep::Record(record),
            Ok(DecodeOutcome::EndOfStream) => {
                self.done = true;
                ScanStep::EndOfStream
            }
            Err(err) => {
                self.done = true;
                ScanStep::Corrupt(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::DEFAULT_MAX_FIELD_BYTES;
    use serial_test::serial;

    #[test]
    fn empty_path_is_invalid() {
        let err = Log::open_or_create("").unwrap_err();
        assert!(matches!(err, Error::InvalidPath(_)));
    }

    /// Exercises the lock against a fixed, non-tempdir path shared by every
    /// run of this test: a second process opening the same path should fail
    /// fast instead of racing the first. `#[serial]` keeps this from flaking
    /// if another test binary runs against the same path concurrently.
    #[test]
    #[serial]
    fn fixed_path_rejects_a_second_opener_across_runs() {
        let path = std::env::temp_dir().join("casky_serial_fixed_path_test.log");
        let _ = std::fs::remove_file(&path);

        let first = Log::open_or_create(&path).unwrap();
        assert!(Log::open_or_create(&path).is_err());
        drop(first);

        // Once the first handle is dropped the lock is released.
        assert!(Log::open_or_create(&path).is_ok());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn append_then_scan_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log");
        let mut log = Log::open_or_create_with_lock(&path, false).unwrap();

        let r1 = Record::new(1, 0, b"a".to_vec(), Some(b"1".to_vec()));
        let r2 = Record::new(2, 0, b"b".to_vec(), None);
        log.append(&r1.encode(), false).unwrap();
        log.append(&r2.encode(), false).unwrap();

        let mut scan = log.scan_from_start(DEFAULT_MAX_FIELD_BYTES).unwrap();
        match scan.next_step() {
            ScanStep::Record(r) => assert_eq!(r, r1),
            _ => panic!("expected r1"),
        }
        match scan.next_step() {
            ScanStep::Record(r) => assert_eq!(r, r2),
            _ => panic!("expected r2"),
        }
        assert!(matches!(scan.next_step(), ScanStep::EndOfStream));
    }

    #[test]
    fn concurrent_open_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log");
        let _first = Log::open_or_create(&path).unwrap();
        assert!(Log::open_or_create(&path).is_err());
    }

    #[test]
    fn truncated_tail_is_reported_as_corrupt_not_silently_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log");
        let mut log = Log::open_or_create_with_lock(&path, false).unwrap();
        let r1 = Record::new(1, 0, b"a".to_vec(), Some(b"1".to_vec()));
        log.append(&r1.encode(), false).unwrap();
        let full_len = log.file_size().unwrap();
        log.file.set_len(full_len - 1).unwrap();

        let mut scan = log.scan_from_start(DEFAULT_MAX_FIELD_BYTES).unwrap();
        assert!(matches!(scan.next_step(), ScanStep::Corrupt(Error::Corrupt(_))));
    }
}
