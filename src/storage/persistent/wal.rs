//! Write-ahead log for region mappings.
//!
//! Every mutation is appended (and optionally fsynced) before it becomes
//! visible in memory. On open the log is replayed; a torn entry at the tail
//! (crash mid-append) is cut off, a checksum failure anywhere is an error.
//!
//! # File Format
//! ```text
//! [MAGIC: 4 bytes][VERSION: 1 byte]
//! [ENTRY 1: codec-encoded WalEntry]
//! [ENTRY 2: codec-encoded WalEntry]
//! ...
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Result as IoResult, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::geofence::CallbackHandle;

use super::codec;

/// A single entry in the write-ahead log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalEntry {
    /// Monotonically increasing sequence number.
    pub sequence: u64,
    /// When this entry was written.
    pub timestamp: DateTime<Utc>,
    /// The mutation being logged.
    pub kind: WalEntryKind,
}

/// The type of WAL entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WalEntryKind {
    Put {
        region_id: String,
        handle: CallbackHandle,
    },
    Remove {
        region_id: String,
    },
    SetDispatcherHandle {
        handle: CallbackHandle,
    },
    /// Full state written by compaction; replaces everything before it.
    Snapshot {
        regions: Vec<(String, CallbackHandle)>,
        dispatcher_handle: Option<CallbackHandle>,
    },
}

struct WalWriter {
    writer: BufWriter<File>,
    sequence: u64,
}

/// Write-ahead log. Thread-safe via internal mutex.
pub struct WriteAheadLog {
    path: PathBuf,
    inner: Mutex<WalWriter>,
    sync_on_write: bool,
}

impl WriteAheadLog {
    /// Open or create a log file, returning it with the entries it holds.
    pub fn open(path: &Path, sync_on_write: bool) -> IoResult<(Self, Vec<WalEntry>)> {
        let fresh = !path.exists() || fs::metadata(path)?.len() < codec::HEADER_LEN;

        let entries = if fresh {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(path)?;
            codec::write_header(&mut file)?;
            if sync_on_write {
                file.sync_all()?;
            }
            Vec::new()
        } else {
            let (entries, valid_len) = Self::scan(path)?;
            let file_len = fs::metadata(path)?.len();
            if valid_len < file_len {
                warn!(
                    path = %path.display(),
                    discarded_bytes = file_len - valid_len,
                    "region store log ends with a torn entry; truncating"
                );
                let file = OpenOptions::new().write(true).open(path)?;
                file.set_len(valid_len)?;
                file.sync_all()?;
            }
            entries
        };

        let sequence = entries.last().map_or(0, |e| e.sequence);
        let file = OpenOptions::new().append(true).open(path)?;

        let wal = Self {
            path: path.to_path_buf(),
            inner: Mutex::new(WalWriter {
                writer: BufWriter::new(file),
                sequence,
            }),
            sync_on_write,
        };

        Ok((wal, entries))
    }

    /// Append an entry, returning its sequence number.
    pub fn append(&self, kind: WalEntryKind) -> IoResult<u64> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| std::io::Error::new(ErrorKind::Other, "poisoned WAL lock"))?;

        let candidate = inner.sequence + 1;
        let entry = WalEntry {
            sequence: candidate,
            timestamp: Utc::now(),
            kind,
        };

        let encoded = codec::encode(&entry)?;
        inner.writer.write_all(&encoded)?;
        inner.writer.flush()?;

        if self.sync_on_write {
            inner.writer.get_ref().sync_all()?;
        }

        inner.sequence = candidate;
        Ok(candidate)
    }

    /// Replace the whole log with a single snapshot entry.
    ///
    /// The new log is written beside the old one and renamed over it, so a
    /// crash leaves either the old or the new file intact. The append handle
    /// is opened on the new file before the rename; if any step fails the
    /// writer keeps pointing at the old log, which is still in place.
    pub fn rewrite(&self, snapshot: WalEntryKind) -> IoResult<()> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| std::io::Error::new(ErrorKind::Other, "poisoned WAL lock"))?;
        inner.writer.flush()?;

        let tmp_path = self.path.with_extension("wal.tmp");
        {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp_path)?;
            codec::write_header(&mut file)?;
            let entry = WalEntry {
                sequence: 1,
                timestamp: Utc::now(),
                kind: snapshot,
            };
            file.write_all(&codec::encode(&entry)?)?;
            file.sync_all()?;
        }
        let replacement = OpenOptions::new().append(true).open(&tmp_path)?;
        fs::rename(&tmp_path, &self.path)?;

        inner.writer = BufWriter::new(replacement);
        inner.sequence = 1;

        Ok(())
    }

    /// Get the current sequence number.
    pub fn current_sequence(&self) -> u64 {
        self.inner.lock().map_or(0, |inner| inner.sequence)
    }

    /// Get the log file size in bytes.
    pub fn size_bytes(&self) -> IoResult<u64> {
        Ok(fs::metadata(&self.path)?.len())
    }

    /// Read every complete entry and the byte length they span.
    fn scan(path: &Path) -> IoResult<(Vec<WalEntry>, u64)> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        codec::read_header(&mut reader)?;

        let mut entries = Vec::new();
        let mut valid_len = codec::HEADER_LEN;

        loop {
            match codec::decode::<WalEntry>(&mut reader) {
                Ok(entry) => {
                    valid_len = reader.stream_position()?;
                    entries.push(entry);
                }
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e),
            }
        }

        Ok((entries, valid_len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn put(id: &str, handle: i64) -> WalEntryKind {
        WalEntryKind::Put {
            region_id: id.to_string(),
            handle: CallbackHandle::new(handle),
        }
    }

    #[test]
    fn test_wal_append_and_reopen() {
        let dir = tempdir().unwrap();
        let wal_path = dir.path().join("regions.wal");

        {
            let (wal, entries) = WriteAheadLog::open(&wal_path, false).unwrap();
            assert!(entries.is_empty());
            wal.append(put("home", 1)).unwrap();
            wal.append(WalEntryKind::Remove {
                region_id: "home".to_string(),
            })
            .unwrap();
            assert_eq!(wal.current_sequence(), 2);
        }

        let (wal, entries) = WriteAheadLog::open(&wal_path, false).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].sequence, 1);
        assert_eq!(entries[0].kind, put("home", 1));
        assert_eq!(wal.current_sequence(), 2);
    }

    #[test]
    fn test_torn_tail_is_truncated_and_appendable() {
        let dir = tempdir().unwrap();
        let wal_path = dir.path().join("regions.wal");

        {
            let (wal, _) = WriteAheadLog::open(&wal_path, true).unwrap();
            wal.append(put("a", 1)).unwrap();
            wal.append(put("b", 2)).unwrap();
        }

        let len = fs::metadata(&wal_path).unwrap().len();
        let file = OpenOptions::new().write(true).open(&wal_path).unwrap();
        file.set_len(len - 3).unwrap();
        drop(file);

        {
            let (wal, entries) = WriteAheadLog::open(&wal_path, true).unwrap();
            assert_eq!(entries.len(), 1);
            wal.append(put("c", 3)).unwrap();
        }

        let (_, entries) = WriteAheadLog::open(&wal_path, true).unwrap();
        let kinds: Vec<WalEntryKind> = entries.into_iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![put("a", 1), put("c", 3)]);
    }

    #[test]
    fn test_rewrite_replaces_log() {
        let dir = tempdir().unwrap();
        let wal_path = dir.path().join("regions.wal");

        let (wal, _) = WriteAheadLog::open(&wal_path, false).unwrap();
        for i in 0..10 {
            wal.append(put("a", i)).unwrap();
        }
        let before = wal.size_bytes().unwrap();

        let snapshot = WalEntryKind::Snapshot {
            regions: vec![("a".to_string(), CallbackHandle::new(9))],
            dispatcher_handle: None,
        };
        wal.rewrite(snapshot.clone()).unwrap();
        assert!(wal.size_bytes().unwrap() < before);
        assert_eq!(wal.current_sequence(), 1);
        drop(wal);

        let (_, entries) = WriteAheadLog::open(&wal_path, false).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, snapshot);
    }

    #[test]
    fn test_appends_after_rewrite_reach_the_live_file() {
        let dir = tempdir().unwrap();
        let wal_path = dir.path().join("regions.wal");

        {
            let (wal, _) = WriteAheadLog::open(&wal_path, true).unwrap();
            wal.append(put("a", 1)).unwrap();
            wal.rewrite(WalEntryKind::Snapshot {
                regions: vec![("a".to_string(), CallbackHandle::new(1))],
                dispatcher_handle: None,
            })
            .unwrap();
            assert!(!wal_path.with_extension("wal.tmp").exists());

            let size_before = wal.size_bytes().unwrap();
            wal.append(put("b", 2)).unwrap();
            assert!(wal.size_bytes().unwrap() > size_before);
        }

        let (_, entries) = WriteAheadLog::open(&wal_path, true).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].kind, put("b", 2));
        assert_eq!(entries[1].sequence, 2);
    }

    #[test]
    fn test_failed_rewrite_keeps_old_log_writable() {
        let dir = tempdir().unwrap();
        let wal_path = dir.path().join("regions.wal");
        let (wal, _) = WriteAheadLog::open(&wal_path, true).unwrap();
        wal.append(put("a", 1)).unwrap();

        // A directory squatting on the temp path makes the rewrite fail.
        fs::create_dir(wal_path.with_extension("wal.tmp")).unwrap();
        assert!(wal
            .rewrite(WalEntryKind::Snapshot {
                regions: Vec::new(),
                dispatcher_handle: None,
            })
            .is_err());

        wal.append(put("b", 2)).unwrap();
        drop(wal);

        let (_, entries) = WriteAheadLog::open(&wal_path, true).unwrap();
        let kinds: Vec<WalEntryKind> = entries.into_iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![put("a", 1), put("b", 2)]);
    }
}
