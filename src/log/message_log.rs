//! Append-only message log.

use super::frame::{encode, FrameRead, FrameReader};
use super::query::{MessageFilter, MessageQuery};
use crate::error::Result;
use crate::types::{MessageRecord, Timestamp};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

/// Writer-side state, guarded by the append lock.
struct LogWriter {
    file: File,
    /// Offset where the next frame goes.
    size: u64,
    /// Timestamp of the last appended record.
    last_timestamp: Timestamp,
    /// Number of writes since last sync.
    writes_since_sync: u64,
}

/// Durable, append-only store of observed messages.
pub struct MessageLog {
    /// Path to the log file.
    path: PathBuf,

    writer: Mutex<LogWriter>,

    /// Bytes of fully written frames; queries read up to here.
    committed: AtomicU64,

    /// Valid records in the log.
    records: AtomicU64,

    /// Sync every N writes (0 = sync every write).
    sync_interval: u64,
}

/// What a recovery scan found.
struct Recovered {
    valid_end: u64,
    records: u64,
    skipped: u64,
    last_timestamp: Timestamp,
}

impl MessageLog {
    /// Default sync interval: every append reaches disk before returning.
    pub const DEFAULT_SYNC_INTERVAL: u64 = 1;

    /// Open or create a message log that syncs on every append.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_sync_interval(path, Self::DEFAULT_SYNC_INTERVAL)
    }

    /// Open or create a message log with custom sync interval.
    /// - sync_interval = 0 or 1: sync every append
    /// - sync_interval = 100: sync every 100 appends
    pub fn open_with_sync_interval(path: impl AsRef<Path>, sync_interval: u64) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        let file_size = file.metadata()?.len();
        let recovered = Self::recover(&file, file_size)?;

        if recovered.valid_end < file_size {
            warn!(
                path = %path.display(),
                valid_end = recovered.valid_end,
                file_size,
                "truncating partial record at end of message log"
            );
            file.set_len(recovered.valid_end)?;
            file.sync_all()?;
        }
        if recovered.skipped > 0 {
            warn!(
                path = %path.display(),
                skipped = recovered.skipped,
                "message log contains malformed records"
            );
        }
        debug!(
            path = %path.display(),
            records = recovered.records,
            bytes = recovered.valid_end,
            "opened message log"
        );

        Ok(Self {
            path,
            writer: Mutex::new(LogWriter {
                file,
                size: recovered.valid_end,
                last_timestamp: recovered.last_timestamp,
                writes_since_sync: 0,
            }),
            committed: AtomicU64::new(recovered.valid_end),
            records: AtomicU64::new(recovered.records),
            sync_interval: if sync_interval == 0 { 1 } else { sync_interval },
        })
    }

    /// Scan the whole file for the last complete frame and the last timestamp.
    fn recover(file: &File, file_size: u64) -> Result<Recovered> {
        let mut reader = BufReader::new(file.try_clone()?);
        reader.seek(SeekFrom::Start(0))?;
        let mut frames = FrameReader::new(reader, file_size);

        let mut recovered = Recovered {
            valid_end: 0,
            records: 0,
            skipped: 0,
            last_timestamp: Timestamp::default(),
        };

        loop {
            match frames.next_frame()? {
                FrameRead::Record { record, len } => {
                    recovered.valid_end += len;
                    recovered.records += 1;
                    recovered.last_timestamp = recovered.last_timestamp.max(record.timestamp);
                }
                FrameRead::Skipped { len, .. } => {
                    recovered.valid_end += len;
                    recovered.skipped += 1;
                }
                FrameRead::End | FrameRead::Torn { .. } => break,
            }
        }

        Ok(recovered)
    }

    /// Append a message. The capture timestamp is never earlier than the
    /// previous record's.
    pub fn append(&self, topic: &str, payload: impl Into<Vec<u8>>) -> Result<MessageRecord> {
        let mut writer = self.writer.lock();

        let record = MessageRecord {
            timestamp: Timestamp::now_after(writer.last_timestamp),
            topic: topic.to_string(),
            payload: payload.into(),
        };
        let frame = encode(&record)?;

        let offset = writer.size;
        writer.file.seek(SeekFrom::Start(offset))?;
        if let Err(e) = writer.file.write_all(&frame) {
            // Drop whatever part of the frame landed so the next append starts clean.
            if let Err(rollback) = writer.file.set_len(offset) {
                warn!(
                    path = %self.path.display(),
                    offset,
                    error = %rollback,
                    "failed to roll back partial append"
                );
            }
            return Err(e.into());
        }

        writer.writes_since_sync += 1;
        if writer.writes_since_sync >= self.sync_interval {
            writer.file.sync_data()?;
            writer.writes_since_sync = 0;
        }

        writer.size = offset + frame.len() as u64;
        writer.last_timestamp = record.timestamp;
        self.committed.store(writer.size, Ordering::Release);
        self.records.fetch_add(1, Ordering::Relaxed);

        Ok(record)
    }

    /// Force sync all pending writes to disk.
    pub fn sync(&self) -> Result<()> {
        let mut writer = self.writer.lock();
        writer.file.sync_all()?;
        writer.writes_since_sync = 0;
        Ok(())
    }

    /// Records matching `filter`, as of now, in append order.
    pub fn query(&self, filter: MessageFilter) -> MessageQuery {
        MessageQuery::new(
            self.path.clone(),
            self.committed.load(Ordering::Acquire),
            filter,
        )
    }

    /// Every record, in append order.
    pub fn records(&self) -> Result<Vec<MessageRecord>> {
        self.query(MessageFilter::all()).collect_records()
    }

    /// Number of valid records.
    pub fn len(&self) -> u64 {
        self.records.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Committed size in bytes.
    pub fn size(&self) -> u64 {
        self.committed.load(Ordering::Acquire)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
