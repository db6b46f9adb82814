//! Envelope wire codec
//!
//! Encoding writes into a caller-supplied buffer and fails with
//! [`EncodeError::BufferTooSmall`] instead of truncating; decoding
//! validates every length prefix before trusting it.
//!
//! # Wire format
//!
//! ```text
//! envelope:    [tag: 1]
//!   0x01       [flags: 1] [role: 1] [service_id: 4 BE]
//!   0x02       [id_len: 1] [sensor_id: N] [timestamp_utc: 8 BE]
//!              [sequence_num: 4 BE] readings...
//! reading:     [key_len: 1, nonzero] [key: N] [value: f32 BE]
//! ```
//!
//! Readings run to the end of the buffer. Neither side needs the
//! entry count up front: the encoder iterates the mapping lazily via
//! [`ReadingEncoder`], the decoder inserts entries into a
//! caller-supplied mapping until the input is exhausted.

use crate::error::{DecodeError, EncodeError};
use crate::protocol::{
    Discovery, Envelope, ReadingSet, Role, SensorData, MAX_KEY_LEN, MAX_SENSOR_ID_LEN,
    TAG_DISCOVERY, TAG_SENSOR_DATA,
};
use std::collections::btree_map;

const FLAG_REQUEST: u8 = 0x01;
const FLAG_RESPONSE: u8 = 0x02;

/// Encoded size of one reading entry
fn entry_len(key: &str) -> usize {
    1 + key.len() + 4
}

/// Resumable encoder for a reading set
///
/// Each call to [`write_into`](Self::write_into) emits as many whole
/// entries as fit in the destination buffer. When the next entry does
/// not fit, the call fails deterministically and the entry is retained,
/// so a later call with a fresh buffer resumes where encoding stopped.
/// The encoder owns its iteration state and is independent of any
/// output stream's lifetime.
pub struct ReadingEncoder<'a> {
    iter: btree_map::Iter<'a, String, f32>,
    pending: Option<(&'a String, f32)>,
}

impl<'a> ReadingEncoder<'a> {
    /// Start encoding the given reading set
    pub fn new(readings: &'a ReadingSet) -> Self {
        Self {
            iter: readings.iter(),
            pending: None,
        }
    }

    /// True once every entry has been written
    pub fn is_finished(&mut self) -> bool {
        if self.pending.is_some() {
            return false;
        }
        match self.iter.next() {
            Some((k, v)) => {
                self.pending = Some((k, *v));
                false
            }
            None => true,
        }
    }

    /// Encoded size of the entry blocking further progress, if any
    pub fn pending_len(&mut self) -> Option<usize> {
        if self.is_finished() {
            None
        } else {
            self.pending.as_ref().map(|(k, _)| entry_len(k))
        }
    }

    /// Write entries into `buf`, returning the number of bytes written
    ///
    /// Emits whole entries until the set is exhausted or the next
    /// entry no longer fits; the blocking entry stays pending and a
    /// later call with a fresh buffer resumes there. Fails with
    /// [`EncodeError::BufferTooSmall`] only when not even the first
    /// entry of this call fits, so a too-small destination is a
    /// deterministic error rather than a silent truncation.
    pub fn write_into(&mut self, buf: &mut [u8]) -> Result<usize, EncodeError> {
        let mut pos = 0;

        loop {
            let (key, value) = match self
                .pending
                .take()
                .or_else(|| self.iter.next().map(|(k, v)| (k, *v)))
            {
                Some(entry) => entry,
                None => return Ok(pos),
            };

            if key.is_empty() {
                return Err(EncodeError::EmptyKey);
            }
            if key.len() > MAX_KEY_LEN {
                return Err(EncodeError::KeyTooLong {
                    len: key.len(),
                    max: MAX_KEY_LEN,
                });
            }

            let need = entry_len(key);
            if pos + need > buf.len() {
                self.pending = Some((key, value));
                if pos == 0 {
                    return Err(EncodeError::BufferTooSmall {
                        needed: need,
                        available: buf.len(),
                    });
                }
                return Ok(pos);
            }

            buf[pos] = key.len() as u8;
            pos += 1;
            buf[pos..pos + key.len()].copy_from_slice(key.as_bytes());
            pos += key.len();
            buf[pos..pos + 4].copy_from_slice(&value.to_be_bytes());
            pos += 4;
        }
    }
}

/// Decode reading entries from `input` into `readings`
///
/// Existing keys are overwritten. Empty input is not an error and
/// leaves the mapping unmodified. Returns the number of entries
/// decoded.
pub fn decode_readings(input: &[u8], readings: &mut ReadingSet) -> Result<usize, DecodeError> {
    let mut pos = 0;
    let mut count = 0;

    while pos < input.len() {
        let key_len = input[pos] as usize;
        if key_len == 0 {
            return Err(DecodeError::EmptyKey { offset: pos });
        }
        let need = 1 + key_len + 4;
        if pos + need > input.len() {
            return Err(DecodeError::Truncated {
                needed: need,
                available: input.len() - pos,
            });
        }

        let key = std::str::from_utf8(&input[pos + 1..pos + 1 + key_len])
            .map_err(|_| DecodeError::BadUtf8 { offset: pos + 1 })?
            .to_string();
        let value = f32::from_be_bytes(
            input[pos + 1 + key_len..pos + need]
                .try_into()
                .expect("slice length checked above"),
        );

        readings.insert(key, value);
        pos += need;
        count += 1;
    }

    Ok(count)
}

impl Envelope {
    /// Exact encoded size of this envelope in bytes
    pub fn encoded_len(&self) -> usize {
        match self {
            Envelope::Discovery(_) => 1 + 1 + 1 + 4,
            Envelope::SensorData(data) => {
                let readings: usize = data.readings.keys().map(|k| entry_len(k)).sum();
                1 + 1 + data.sensor_id.len() + 8 + 4 + readings
            }
        }
    }

    /// Encode into `buf`, returning the number of bytes written
    ///
    /// Fails without partial output being reported when `buf` cannot
    /// hold the complete envelope.
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize, EncodeError> {
        match self {
            Envelope::Discovery(d) => encode_discovery(d, buf),
            Envelope::SensorData(s) => encode_sensor_data(s, buf),
        }
    }

    /// Encode into a fresh vector bounded by `max_len`
    pub fn encode_to_vec(&self, max_len: usize) -> Result<Vec<u8>, EncodeError> {
        let mut buf = vec![0u8; max_len.min(self.encoded_len())];
        let n = self.encode(&mut buf)?;
        buf.truncate(n);
        Ok(buf)
    }

    /// Decode an envelope from `input`
    pub fn decode(input: &[u8]) -> Result<Envelope, DecodeError> {
        if input.is_empty() {
            return Err(DecodeError::Truncated {
                needed: 1,
                available: 0,
            });
        }

        match input[0] {
            TAG_DISCOVERY => decode_discovery(&input[1..]),
            TAG_SENSOR_DATA => decode_sensor_data(&input[1..]),
            tag => Err(DecodeError::UnknownTag(tag)),
        }
    }
}

fn encode_discovery(d: &Discovery, buf: &mut [u8]) -> Result<usize, EncodeError> {
    const LEN: usize = 7;
    if buf.len() < LEN {
        return Err(EncodeError::BufferTooSmall {
            needed: LEN,
            available: buf.len(),
        });
    }

    let mut flags = 0u8;
    if d.request {
        flags |= FLAG_REQUEST;
    }
    if d.response {
        flags |= FLAG_RESPONSE;
    }

    buf[0] = TAG_DISCOVERY;
    buf[1] = flags;
    buf[2] = d.role as u8;
    buf[3..7].copy_from_slice(&d.service_id.to_be_bytes());
    Ok(LEN)
}

fn decode_discovery(body: &[u8]) -> Result<Envelope, DecodeError> {
    if body.len() < 6 {
        return Err(DecodeError::Truncated {
            needed: 6,
            available: body.len(),
        });
    }

    let flags = body[0];
    let role = Role::from_u8(body[1]).ok_or(DecodeError::UnknownRole(body[1]))?;
    let service_id = u32::from_be_bytes(body[2..6].try_into().expect("length checked"));

    Ok(Envelope::Discovery(Discovery {
        role,
        service_id,
        request: flags & FLAG_REQUEST != 0,
        response: flags & FLAG_RESPONSE != 0,
    }))
}

fn encode_sensor_data(data: &SensorData, buf: &mut [u8]) -> Result<usize, EncodeError> {
    let id = data.sensor_id.as_bytes();
    if id.len() > MAX_SENSOR_ID_LEN {
        return Err(EncodeError::SensorIdTooLong {
            len: id.len(),
            max: MAX_SENSOR_ID_LEN,
        });
    }

    let header_len = 1 + 1 + id.len() + 8 + 4;
    if buf.len() < header_len {
        return Err(EncodeError::BufferTooSmall {
            needed: header_len,
            available: buf.len(),
        });
    }

    let mut pos = 0;
    buf[pos] = TAG_SENSOR_DATA;
    pos += 1;
    buf[pos] = id.len() as u8;
    pos += 1;
    buf[pos..pos + id.len()].copy_from_slice(id);
    pos += id.len();
    buf[pos..pos + 8].copy_from_slice(&data.timestamp_utc.to_be_bytes());
    pos += 8;
    buf[pos..pos + 4].copy_from_slice(&data.sequence_num.to_be_bytes());
    pos += 4;

    let mut encoder = ReadingEncoder::new(&data.readings);
    pos += encoder.write_into(&mut buf[pos..])?;
    if let Some(needed) = encoder.pending_len() {
        // A whole-envelope encode must not drop trailing entries.
        return Err(EncodeError::BufferTooSmall {
            needed,
            available: buf.len() - pos,
        });
    }

    Ok(pos)
}

fn decode_sensor_data(body: &[u8]) -> Result<Envelope, DecodeError> {
    if body.is_empty() {
        return Err(DecodeError::Truncated {
            needed: 1,
            available: 0,
        });
    }

    let id_len = body[0] as usize;
    let header_len = 1 + id_len + 8 + 4;
    if body.len() < header_len {
        return Err(DecodeError::Truncated {
            needed: header_len,
            available: body.len(),
        });
    }

    let sensor_id = std::str::from_utf8(&body[1..1 + id_len])
        .map_err(|_| DecodeError::BadUtf8 { offset: 1 })?
        .to_string();
    let timestamp_utc =
        u64::from_be_bytes(body[1 + id_len..9 + id_len].try_into().expect("length checked"));
    let sequence_num =
        u32::from_be_bytes(body[9 + id_len..13 + id_len].try_into().expect("length checked"));

    let mut readings = ReadingSet::new();
    decode_readings(&body[header_len..], &mut readings)?;

    Ok(Envelope::SensorData(SensorData {
        sensor_id,
        timestamp_utc,
        sequence_num,
        readings,
    }))
}
