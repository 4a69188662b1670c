//! On-disk framing for message records.
//!
//! ```text
//! magic "MSG\0" | version u8 | body_len u32 LE | body | crc32(body) u32 LE
//! ```
//!
//! The body is the MessagePack encoding of a [`MessageRecord`], so every
//! frame carries its own topic and timestamp.

use crate::error::Result;
use crate::types::MessageRecord;
use std::io::{self, Read, Seek, SeekFrom};

/// Magic bytes opening every frame.
pub(crate) const FRAME_MAGIC: &[u8; 4] = b"MSG\0";

/// Current frame format version.
pub(crate) const FRAME_VERSION: u8 = 1;

/// Fixed bytes around the body.
pub(crate) const FRAME_OVERHEAD: u64 = 4 + 1 + 4 + 4;

/// Bodies larger than this are treated as a corrupt length field.
const MAX_BODY_LEN: u32 = 64 * 1024 * 1024;

/// Bytes read per step while searching for the next frame after damage.
const RESYNC_CHUNK: usize = 64 * 1024;

/// Outcome of reading one frame.
#[derive(Debug)]
pub(crate) enum FrameRead {
    /// A complete, valid record.
    Record { record: MessageRecord, len: u64 },
    /// A complete frame whose body is unusable.
    Skipped { len: u64, reason: String },
    /// No bytes left.
    End,
    /// Trailing bytes that do not form a frame.
    Torn { reason: String },
}

/// Encode a record into one contiguous frame.
pub(crate) fn encode(record: &MessageRecord) -> Result<Vec<u8>> {
    let body = rmp_serde::to_vec(record)?;
    let mut frame = Vec::with_capacity(FRAME_OVERHEAD as usize + body.len());
    frame.extend_from_slice(FRAME_MAGIC);
    frame.push(FRAME_VERSION);
    frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
    frame.extend_from_slice(&body);
    frame.extend_from_slice(&crc32fast::hash(&body).to_le_bytes());
    Ok(frame)
}

/// Read the next frame. Only genuine I/O failures are returned as errors.
pub(crate) fn read_frame(reader: &mut impl Read) -> io::Result<FrameRead> {
    let mut magic = [0u8; 4];
    match read_full(reader, &mut magic)? {
        0 => return Ok(FrameRead::End),
        4 => {}
        _ => return Ok(torn("truncated frame header")),
    }
    if &magic != FRAME_MAGIC {
        return Ok(torn("bad frame magic"));
    }

    let mut header = [0u8; 5];
    if read_full(reader, &mut header)? < header.len() {
        return Ok(torn("truncated frame header"));
    }
    let version = header[0];
    let body_len = u32::from_le_bytes([header[1], header[2], header[3], header[4]]);
    if body_len > MAX_BODY_LEN {
        return Ok(torn("frame length out of range"));
    }

    let mut body = vec![0u8; body_len as usize];
    if read_full(reader, &mut body)? < body.len() {
        return Ok(torn("truncated frame body"));
    }
    let mut checksum = [0u8; 4];
    if read_full(reader, &mut checksum)? < checksum.len() {
        return Ok(torn("truncated frame checksum"));
    }

    let len = FRAME_OVERHEAD + body_len as u64;
    if version != FRAME_VERSION {
        return Ok(FrameRead::Skipped {
            len,
            reason: format!("unsupported frame version {version}"),
        });
    }

    let stored = u32::from_le_bytes(checksum);
    let computed = crc32fast::hash(&body);
    if stored != computed {
        return Ok(FrameRead::Skipped {
            len,
            reason: format!("checksum mismatch: expected {stored}, got {computed}"),
        });
    }

    match rmp_serde::from_slice::<MessageRecord>(&body) {
        Ok(record) => Ok(FrameRead::Record { record, len }),
        Err(e) => Ok(FrameRead::Skipped {
            len,
            reason: format!("undecodable body: {e}"),
        }),
    }
}

/// Sequential frame reader over the first `end` bytes of a log.
///
/// A frame that cannot be parsed is not necessarily the end of the log: the
/// reader searches forward for the next complete, valid frame and reports
/// the damaged bytes in between as [`FrameRead::Skipped`]. Only when no
/// valid frame follows is the damage reported as [`FrameRead::Torn`].
pub(crate) struct FrameReader<R> {
    reader: R,
    offset: u64,
    end: u64,
}

impl<R: Read + Seek> FrameReader<R> {
    /// `reader` must be positioned at offset 0.
    pub(crate) fn new(reader: R, end: u64) -> Self {
        Self {
            reader,
            offset: 0,
            end,
        }
    }

    /// Offset of the next frame.
    pub(crate) fn offset(&self) -> u64 {
        self.offset
    }

    pub(crate) fn next_frame(&mut self) -> io::Result<FrameRead> {
        let start = self.offset;
        let read = read_frame(&mut (&mut self.reader).take(self.end - start))?;

        match read {
            FrameRead::Record { len, .. } | FrameRead::Skipped { len, .. } => {
                self.offset += len;
                Ok(read)
            }
            FrameRead::End => Ok(FrameRead::End),
            FrameRead::Torn { reason } => match self.resync(start)? {
                Some(next) => {
                    self.reader.seek(SeekFrom::Start(next))?;
                    self.offset = next;
                    Ok(FrameRead::Skipped {
                        len: next - start,
                        reason: format!("{reason}; resumed at offset {next}"),
                    })
                }
                None => Ok(FrameRead::Torn { reason }),
            },
        }
    }

    /// Offset of the first valid frame after `from`, if any.
    fn resync(&mut self, from: u64) -> io::Result<Option<u64>> {
        let mut pos = from + 1;
        let mut chunk = vec![0u8; RESYNC_CHUNK];

        while pos + FRAME_OVERHEAD <= self.end {
            self.reader.seek(SeekFrom::Start(pos))?;
            let want = (RESYNC_CHUNK as u64).min(self.end - pos) as usize;
            let n = read_full(&mut self.reader, &mut chunk[..want])?;
            if n < FRAME_MAGIC.len() {
                break;
            }

            let candidates: Vec<u64> = chunk[..n]
                .windows(FRAME_MAGIC.len())
                .enumerate()
                .filter(|(_, w)| *w == &FRAME_MAGIC[..])
                .map(|(i, _)| pos + i as u64)
                .collect();
            for candidate in candidates {
                self.reader.seek(SeekFrom::Start(candidate))?;
                let mut rest = (&mut self.reader).take(self.end - candidate);
                if let FrameRead::Record { .. } = read_frame(&mut rest)? {
                    return Ok(Some(candidate));
                }
            }

            // Overlap so a magic split across chunks is still seen.
            pos += (n - (FRAME_MAGIC.len() - 1)) as u64;
        }

        Ok(None)
    }
}

fn torn(reason: &str) -> FrameRead {
    FrameRead::Torn {
        reason: reason.to_string(),
    }
}

/// Fill `buf` as far as the reader allows; returns the bytes read.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
