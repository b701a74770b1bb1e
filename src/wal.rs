//! Write-ahead log with a snapshot watermark.
//!
//! Every mutating operation is appended here before any store is touched,
//! so crash recovery can re-drive the same code path the live write took.
//! Entries are text lines:
//!
//! ```text
//! log_id|schema_version|operation_type|json_payload\n
//! ```
//!
//! Log ids strictly increase in append order. Replay skips entries whose
//! id is at or below the snapshot watermark; the skip decision is keyed
//! solely by that comparison, never by log continuity, so gapped or
//! out-of-order ids are tolerated rather than treated as corruption.
//!
//! Append flushes synchronously and surfaces failures: `append` returning
//! `Ok` is the durability boundary.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::{Result, StorageError};
use crate::registry::IndexRegistry;

/// Schema version tag written into every entry.
pub const WAL_SCHEMA_VERSION: &str = "1";

/// One decoded log entry past the watermark.
#[derive(Clone, Debug, PartialEq)]
pub struct WalEntry {
    /// Strictly increasing id assigned at append time.
    pub log_id: u64,
    /// Schema version tag the entry was written under.
    pub version: String,
    /// Operation tag. Unrecognized tags are a forward-compatible no-op
    /// for replay.
    pub op: String,
    /// Serialized operation payload (JSON).
    pub payload: String,
}

/// Append-only operation log plus the snapshot watermark beside it.
///
/// The log holds two handles on the same file: an append handle and an
/// independent read cursor, so replay can interleave with appends without
/// reopening anything.
pub struct Wal {
    writer: File,
    reader: BufReader<File>,
    /// Highest log id assigned or observed.
    next_log_id: u64,
    /// Highest log id reflected in the last snapshot.
    last_snapshot_id: u64,
    watermark_path: PathBuf,
    snapshot_root: PathBuf,
}

impl Wal {
    /// Opens (creating if absent) the log at `wal_path`.
    ///
    /// Failure to open is an error the caller must treat as fatal: a
    /// database without a working WAL cannot honor its durability
    /// contract.
    pub fn open(wal_path: &Path, watermark_path: &Path, snapshot_root: &Path) -> Result<Self> {
        let writer = OpenOptions::new()
            .create(true)
            .append(true)
            .open(wal_path)
            .map_err(|e| {
                StorageError::wal(format!("failed to open {}: {}", wal_path.display(), e))
            })?;
        let reader = File::open(wal_path).map_err(|e| {
            StorageError::wal(format!("failed to open {}: {}", wal_path.display(), e))
        })?;

        info!(path = %wal_path.display(), "opened write-ahead log");
        Ok(Self {
            writer,
            reader: BufReader::new(reader),
            next_log_id: 0,
            last_snapshot_id: 0,
            watermark_path: watermark_path.to_path_buf(),
            snapshot_root: snapshot_root.to_path_buf(),
        })
    }

    /// Appends one entry and flushes it to disk before returning.
    ///
    /// Returns the assigned log id. A write or flush failure is returned
    /// as an error; the entry must then be considered not durable.
    pub fn append(&mut self, op: &str, payload: &str) -> Result<u64> {
        self.next_log_id += 1;
        let log_id = self.next_log_id;

        let line = format!("{}|{}|{}|{}\n", log_id, WAL_SCHEMA_VERSION, op, payload);
        self.writer
            .write_all(line.as_bytes())
            .map_err(|e| StorageError::wal(format!("append failed: {}", e)))?;
        self.writer
            .sync_data()
            .map_err(|e| StorageError::wal(format!("flush failed: {}", e)))?;

        debug!(log_id, op, "appended WAL entry");
        Ok(log_id)
    }

    /// Reads the next entry past the watermark, advancing the cursor.
    ///
    /// Returns `Ok(None)` when the log is exhausted; entries appended
    /// afterwards remain readable by further calls. Malformed lines are
    /// skipped with a warning.
    pub fn read_next(&mut self) -> Result<Option<WalEntry>> {
        let mut line = String::new();
        loop {
            line.clear();
            let n = self
                .reader
                .read_line(&mut line)
                .map_err(|e| StorageError::wal(format!("read failed: {}", e)))?;
            if n == 0 {
                debug!("no more WAL entries to read");
                return Ok(None);
            }

            let Some(entry) = parse_line(line.trim_end_matches('\n')) else {
                warn!(line = line.trim_end(), "skipping malformed WAL line");
                continue;
            };

            // Track the highest id seen so appends after replay continue
            // above it.
            if entry.log_id > self.next_log_id {
                self.next_log_id = entry.log_id;
            }

            if entry.log_id <= self.last_snapshot_id {
                debug!(log_id = entry.log_id, "skipping WAL entry below watermark");
                continue;
            }

            debug!(log_id = entry.log_id, op = %entry.op, "read WAL entry");
            return Ok(Some(entry));
        }
    }

    /// Moves the watermark to the current maximum log id and persists
    /// every index family plus the watermark itself.
    ///
    /// The watermark file is written last: a crash mid-snapshot leaves the
    /// old watermark in place and replay re-covers the tail.
    pub fn take_snapshot(&mut self, registry: &IndexRegistry) -> Result<()> {
        self.last_snapshot_id = self.next_log_id;
        registry.save_all(&self.snapshot_root)?;
        fs::write(&self.watermark_path, self.last_snapshot_id.to_string())?;
        info!(watermark = self.last_snapshot_id, "snapshot taken");
        Ok(())
    }

    /// Seeds the watermark from disk and loads every family's snapshot.
    ///
    /// A missing watermark file means no snapshot has ever been taken:
    /// the watermark stays 0 and the whole log replays.
    pub fn load_snapshot(&mut self, registry: &mut IndexRegistry) -> Result<()> {
        match fs::read_to_string(&self.watermark_path) {
            Ok(text) => {
                self.last_snapshot_id = text.trim().parse().map_err(|_| {
                    StorageError::corrupted(format!("invalid snapshot watermark '{}'", text.trim()))
                })?;
                info!(watermark = self.last_snapshot_id, "loaded snapshot watermark");
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %self.watermark_path.display(), "no snapshot watermark, replaying full WAL");
            }
            Err(e) => return Err(e.into()),
        }
        if self.next_log_id < self.last_snapshot_id {
            self.next_log_id = self.last_snapshot_id;
        }
        registry.load_all(&self.snapshot_root)
    }

    /// Highest log id reflected in the last snapshot.
    pub fn watermark(&self) -> u64 {
        self.last_snapshot_id
    }

    /// Highest log id assigned or observed so far.
    pub fn max_log_id(&self) -> u64 {
        self.next_log_id
    }

    /// Replaces the append handle so tests can force write failures.
    #[cfg(test)]
    pub(crate) fn swap_writer_for_test(&mut self, writer: File) {
        self.writer = writer;
    }
}

fn parse_line(line: &str) -> Option<WalEntry> {
    let mut parts = line.splitn(4, '|');
    let log_id = parts.next()?.parse().ok()?;
    let version = parts.next()?.to_string();
    let op = parts.next()?.to_string();
    let payload = parts.next()?.to_string();
    Some(WalEntry {
        log_id,
        version,
        op,
        payload,
    })
}
