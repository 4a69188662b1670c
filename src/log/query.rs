//! Filtered, lazy scans over a message log.

use super::frame::{FrameRead, FrameReader};
use crate::error::Result;
use crate::types::{MessageRecord, Timestamp};
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use tracing::warn;

/// Which records a query returns. Both criteria must hold.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MessageFilter {
    /// Only records on this topic.
    pub topic: Option<String>,

    /// Only records captured at or after this time.
    pub since: Option<Timestamp>,
}

impl MessageFilter {
    /// Match every record.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    pub fn since(mut self, since: Timestamp) -> Self {
        self.since = Some(since);
        self
    }

    pub fn matches(&self, record: &MessageRecord) -> bool {
        if let Some(ref topic) = self.topic {
            if &record.topic != topic {
                return false;
            }
        }
        if let Some(since) = self.since {
            if record.timestamp < since {
                return false;
            }
        }
        true
    }
}

/// A query bound to the records committed when it was created.
///
/// Iterating opens a fresh read handle, so the same query can be scanned
/// again from the start.
#[derive(Clone, Debug)]
pub struct MessageQuery {
    path: PathBuf,
    end: u64,
    filter: MessageFilter,
}

impl MessageQuery {
    pub(crate) fn new(path: PathBuf, end: u64, filter: MessageFilter) -> Self {
        Self { path, end, filter }
    }

    pub fn filter(&self) -> &MessageFilter {
        &self.filter
    }

    /// Byte length of the log visible to this query.
    pub fn end(&self) -> u64 {
        self.end
    }

    /// Start a scan in append order.
    pub fn iter(&self) -> Result<MessageIter> {
        let file = File::open(&self.path)?;
        Ok(MessageIter {
            frames: FrameReader::new(BufReader::new(file), self.end),
            filter: self.filter.clone(),
            done: false,
        })
    }

    /// Run the scan to completion.
    pub fn collect_records(&self) -> Result<Vec<MessageRecord>> {
        self.iter()?.collect()
    }
}

/// Iterator over matching records.
///
/// Damaged frames are skipped and the scan resumes at the next valid frame;
/// a torn trailing frame ends the scan.
pub struct MessageIter {
    frames: FrameReader<BufReader<File>>,
    filter: MessageFilter,
    done: bool,
}

impl Iterator for MessageIter {
    type Item = Result<MessageRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            let offset = self.frames.offset();
            match self.frames.next_frame() {
                Ok(FrameRead::Record { record, .. }) => {
                    if self.filter.matches(&record) {
                        return Some(Ok(record));
                    }
                }
                Ok(FrameRead::Skipped { len, reason }) => {
                    warn!(offset, len, %reason, "skipping malformed message record");
                }
                Ok(FrameRead::End) => self.done = true,
                Ok(FrameRead::Torn { reason }) => {
                    warn!(offset, %reason, "message log ends in a partial record");
                    self.done = true;
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e.into()));
                }
            }
        }
        None
    }
}
