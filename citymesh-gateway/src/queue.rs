// Citymesh Gateway - Durable store-and-forward uplink
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Durable FIFO queue backing the uplink
//!
//! Frames live in a single flat file, oldest first:
//!
//! ```text
//! [len u16 LE][origin u32 BE][payload]  (repeated)
//! ```
//!
//! `len` counts the origin id plus the payload, so a frame occupies
//! `2 + len` bytes. Appends go straight to the end of
//! the file; removing the head rewrites the remainder to a sibling
//! file and renames it over the store, so a crash leaves either the
//! old store or the new one, never a hybrid. The whole store is
//! bounded by `max_buffer_bytes`; when it is full new frames are
//! rejected (drop-newest) so the oldest backlog survives.

use crate::error::QueueError;
use citymesh::NodeId;
use log::{info, warn};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Length prefix plus origin id, prepended to every payload
const FRAME_HEADER_LEN: usize = 2 + 4;

/// One buffered message: who originated it and its envelope bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    /// Mesh node that originated the buffered envelope
    pub origin: NodeId,
    /// Encoded envelope bytes, exactly as received
    pub payload: Vec<u8>,
}

/// File-backed FIFO of sensor-data frames
///
/// The file contents are mirrored in memory; every mutation persists
/// before it is reflected in the mirror, so a returned `Ok` means the
/// bytes are on disk.
#[derive(Debug)]
pub struct DurableQueue {
    path: PathBuf,
    buf: Vec<u8>,
    max_buffer_bytes: usize,
    max_frame_bytes: usize,
}

impl DurableQueue {
    /// Open the queue at `path`, creating an empty store if absent
    ///
    /// Existing contents are taken as-is; validation happens lazily
    /// when the head frame is read, so a corrupted store still opens
    /// and can be repaired with [`DurableQueue::discard_head`].
    pub fn open(
        path: impl Into<PathBuf>,
        max_buffer_bytes: usize,
        max_frame_bytes: usize,
    ) -> Result<Self, QueueError> {
        let path = path.into();
        let buf = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                fs::write(&path, [])?;
                Vec::new()
            }
            Err(e) => return Err(e.into()),
        };
        if !buf.is_empty() {
            info!(
                "queue: opened {} with {} byte backlog",
                path.display(),
                buf.len()
            );
        }
        Ok(Self {
            path,
            buf,
            max_buffer_bytes,
            max_frame_bytes,
        })
    }

    /// Append one frame at the tail
    ///
    /// Rejects with `FrameTooLarge` when origin plus payload exceed
    /// the per-frame limit and with `Full` when the store would grow
    /// past its byte budget. On either rejection the store is
    /// untouched.
    pub fn append(&mut self, origin: NodeId, payload: &[u8]) -> Result<(), QueueError> {
        // The prefix must be able to represent the frame, whatever
        // max_frame_bytes is configured to.
        let len = 4 + payload.len();
        let max = self.max_frame_bytes.min(u16::MAX as usize);
        if len > max {
            return Err(QueueError::FrameTooLarge { len, max });
        }
        let frame_len = 2 + len;
        if self.buf.len() + frame_len > self.max_buffer_bytes {
            return Err(QueueError::Full {
                needed: self.buf.len() + frame_len,
                capacity: self.max_buffer_bytes,
            });
        }

        let mut frame = Vec::with_capacity(frame_len);
        frame.extend_from_slice(&(len as u16).to_le_bytes());
        frame.extend_from_slice(&origin.to_be_bytes());
        frame.extend_from_slice(payload);

        let mut file = fs::OpenOptions::new().append(true).open(&self.path)?;
        file.write_all(&frame)?;
        file.sync_data()?;

        self.buf.extend_from_slice(&frame);
        Ok(())
    }

    /// Read the oldest frame without removing it
    pub fn peek_oldest(&self) -> Result<QueueEntry, QueueError> {
        self.parse_head().map(|(_, entry)| entry)
    }

    /// Remove and return the oldest frame
    pub fn dequeue_oldest(&mut self) -> Result<QueueEntry, QueueError> {
        let (frame_len, entry) = self.parse_head()?;
        let remaining = self.buf[frame_len..].to_vec();
        self.persist_replace(&remaining)?;
        self.buf = remaining;
        Ok(entry)
    }

    /// Drop the head of the store, valid or not
    ///
    /// With a parseable head frame this is a dequeue that discards
    /// the entry. When the head prefix does not parse the frame
    /// boundary is unknowable, so the whole store is truncated. Meant
    /// for explicit recovery; nothing calls it automatically.
    pub fn discard_head(&mut self) -> Result<(), QueueError> {
        match self.parse_head() {
            Ok((frame_len, _)) => {
                let remaining = self.buf[frame_len..].to_vec();
                self.persist_replace(&remaining)?;
                self.buf = remaining;
                Ok(())
            }
            Err(QueueError::Empty) => Ok(()),
            Err(QueueError::Corrupt { reason }) => {
                warn!("queue: head unparseable ({}), truncating store", reason);
                self.persist_replace(&[])?;
                self.buf.clear();
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Current store size in bytes
    pub fn current_size(&self) -> usize {
        self.buf.len()
    }

    /// True when the store holds no bytes
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Number of parseable frames from the head of the store
    pub fn frame_count(&self) -> usize {
        let mut count = 0;
        let mut offset = 0;
        while let Some(frame_len) = Self::frame_len_at(&self.buf[offset..], self.max_frame_bytes) {
            count += 1;
            offset += frame_len;
        }
        count
    }

    fn parse_head(&self) -> Result<(usize, QueueEntry), QueueError> {
        if self.buf.is_empty() {
            return Err(QueueError::Empty);
        }
        if self.buf.len() < FRAME_HEADER_LEN {
            return Err(QueueError::Corrupt {
                reason: format!("{} bytes left, header needs {}", self.buf.len(), FRAME_HEADER_LEN),
            });
        }
        let len = u16::from_le_bytes([self.buf[0], self.buf[1]]) as usize;
        // len covers origin + payload, so anything that cannot hold
        // the 4-byte origin is garbage.
        if len <= 4 {
            return Err(QueueError::Corrupt {
                reason: format!("frame length {} too short for origin", len),
            });
        }
        if len > self.max_frame_bytes {
            return Err(QueueError::Corrupt {
                reason: format!("frame length {} exceeds limit {}", len, self.max_frame_bytes),
            });
        }
        let frame_len = 2 + len;
        if frame_len > self.buf.len() {
            return Err(QueueError::Corrupt {
                reason: format!("frame overruns store: {} > {}", frame_len, self.buf.len()),
            });
        }
        let origin = u32::from_be_bytes([self.buf[2], self.buf[3], self.buf[4], self.buf[5]]);
        let payload = self.buf[FRAME_HEADER_LEN..frame_len].to_vec();
        Ok((frame_len, QueueEntry { origin, payload }))
    }

    fn frame_len_at(bytes: &[u8], max_frame_bytes: usize) -> Option<usize> {
        if bytes.len() < FRAME_HEADER_LEN {
            return None;
        }
        let len = u16::from_le_bytes([bytes[0], bytes[1]]) as usize;
        if len <= 4 || len > max_frame_bytes {
            return None;
        }
        let frame_len = 2 + len;
        if frame_len > bytes.len() {
            return None;
        }
        Some(frame_len)
    }

    /// Write `contents` to a sibling file and rename it over the store
    fn persist_replace(&self, contents: &[u8]) -> Result<(), QueueError> {
        let tmp = sibling_tmp(&self.path);
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(contents)?;
            file.sync_data()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

fn sibling_tmp(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}
