//! Binary record codec.
//!
//! Every record is a self-delimiting frame, so a reader can walk a shard
//! without any external index.
//!
//! # Frame Format
//!
//! ```text
//! UINT32        – Body length in bytes
//! UINT32        – CRC-32 of the body
//! body:
//!     UINT8     – Format version (1)
//!     UINT8     – Kind (1 = image, 2 = feature)
//!     UINT16    – Identifier length
//!     UINT8[n]  – Identifier (UTF-8)
//!     UINT32    – Label (0xFFFFFFFF = unlabeled)
//!     image:
//!         UINT32    – Width
//!         UINT32    – Height
//!         UINT8     – Channels
//!         UINT8[w*h*c] – Pixels, HWC interleaved
//!     feature:
//!         UINT32    – Dimension
//!         REAL32[d] – Values
//! ```
//!
//! All integers and floats are little-endian.

use std::io::{self, Read};

use ml_types::{Example, FeatureVector, ImageShape, Label, Record};

use crate::error::{DatasetError, Result};

/// Current body format version.
pub const FORMAT_VERSION: u8 = 1;

/// Size of the length + checksum header.
pub const FRAME_HEADER_LEN: usize = 8;

const KIND_IMAGE: u8 = 1;
const KIND_FEATURE: u8 = 2;

/// Encodes a record into one complete frame.
///
/// Pixel bytes are copied verbatim and feature values keep their exact
/// `f32` bit patterns, so [`decode`] returns an identical record.
///
/// # Errors
///
/// Returns [`DatasetError::RecordTooLarge`] if the body exceeds `u32::MAX` bytes.
///
/// # Example
///
/// ```
/// use ml_dataset::codec::{decode, encode};
/// use ml_types::{FeatureVector, Label, Record};
///
/// let record = Record::from(FeatureVector::new("a", vec![0.5, 1.5], Label::Class(1)).unwrap());
/// let bytes = encode(&record).unwrap();
/// assert_eq!(decode(&bytes).unwrap(), record);
/// ```
pub fn encode(record: &Record) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    encode_into(record, &mut out)?;
    Ok(out)
}

/// Appends one complete frame for `record` to `out`.
///
/// # Errors
///
/// Returns [`DatasetError::RecordTooLarge`] if the body exceeds `u32::MAX` bytes.
pub fn encode_into(record: &Record, out: &mut Vec<u8>) -> Result<()> {
    let body = encode_body(record);
    let len = u32::try_from(body.len()).map_err(|_| DatasetError::RecordTooLarge {
        size: body.len(),
    })?;

    out.reserve(FRAME_HEADER_LEN + body.len());
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&crc32fast::hash(&body).to_le_bytes());
    out.extend_from_slice(&body);
    Ok(())
}

fn encode_body(record: &Record) -> Vec<u8> {
    let id = record.id().as_bytes();
    let payload_len = match record {
        Record::Image(e) => 9 + e.pixels().len(),
        Record::Feature(f) => 4 + f.dim() * 4,
    };
    let mut body = Vec::with_capacity(4 + id.len() + 4 + payload_len);

    body.push(FORMAT_VERSION);
    body.push(match record {
        Record::Image(_) => KIND_IMAGE,
        Record::Feature(_) => KIND_FEATURE,
    });

    // Identifier length is bounded by `ml_types::MAX_ID_LEN`
    #[allow(clippy::cast_possible_truncation)]
    body.extend_from_slice(&(id.len() as u16).to_le_bytes());
    body.extend_from_slice(id);
    body.extend_from_slice(&record.label().to_wire().to_le_bytes());

    match record {
        Record::Image(example) => {
            let shape = example.shape();
            body.extend_from_slice(&shape.width.to_le_bytes());
            body.extend_from_slice(&shape.height.to_le_bytes());
            body.push(shape.channels);
            body.extend_from_slice(example.pixels());
        }
        Record::Feature(vector) => {
            // Dimension fits: the body length check in `encode_into` rejects larger vectors
            #[allow(clippy::cast_possible_truncation)]
            body.extend_from_slice(&(vector.dim() as u32).to_le_bytes());
            for value in vector.values() {
                body.extend_from_slice(&value.to_le_bytes());
            }
        }
    }

    body
}

/// Decodes exactly one complete frame.
///
/// # Errors
///
/// Returns [`DatasetError::CorruptRecord`] if the length prefix disagrees
/// with the buffer, the checksum fails, or the body is malformed. Never
/// returns partial data.
pub fn decode(bytes: &[u8]) -> Result<Record> {
    let Some((header, body)) = bytes.split_first_chunk::<FRAME_HEADER_LEN>() else {
        return Err(DatasetError::corrupt_record(format!(
            "frame of {} bytes is shorter than its header",
            bytes.len()
        )));
    };

    let (len, crc) = parse_header(header);
    if body.len() != len as usize {
        return Err(DatasetError::corrupt_record(format!(
            "length prefix says {len} bytes, frame holds {}",
            body.len()
        )));
    }

    decode_body(body, crc)
}

/// Splits a frame header into `(body_len, crc32)`.
#[must_use]
pub fn parse_header(header: &[u8; FRAME_HEADER_LEN]) -> (u32, u32) {
    let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    let crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
    (len, crc)
}

/// Verifies the checksum and decodes a frame body.
///
/// # Errors
///
/// Returns [`DatasetError::CorruptRecord`] on checksum or layout errors.
pub fn decode_body(body: &[u8], expected_crc: u32) -> Result<Record> {
    let actual = crc32fast::hash(body);
    if actual != expected_crc {
        return Err(DatasetError::corrupt_record(format!(
            "checksum mismatch: expected {expected_crc:#010x}, got {actual:#010x}"
        )));
    }

    let mut cursor = BodyCursor::new(body);

    let version = cursor.u8()?;
    if version != FORMAT_VERSION {
        return Err(DatasetError::corrupt_record(format!(
            "unsupported format version {version}"
        )));
    }

    let kind = cursor.u8()?;
    let id_len = cursor.u16()? as usize;
    let id = std::str::from_utf8(cursor.bytes(id_len)?)
        .map_err(|e| DatasetError::corrupt_record(format!("identifier is not UTF-8: {e}")))?
        .to_string();
    let label = Label::from_wire(cursor.u32()?);

    let record = match kind {
        KIND_IMAGE => {
            let width = cursor.u32()?;
            let height = cursor.u32()?;
            let channels = cursor.u8()?;
            let shape = ImageShape::new(width, height, channels);
            let len = shape.checked_pixel_len().ok_or_else(|| {
                DatasetError::corrupt_record(format!("image shape {shape} overflows pixel count"))
            })?;
            let pixels = cursor.bytes(len)?.to_vec();
            Record::Image(Example::new(id, shape, pixels, label).map_err(invalid)?)
        }
        KIND_FEATURE => {
            let dim = cursor.u32()? as usize;
            let raw = cursor.bytes(dim.saturating_mul(4))?;
            let values = raw
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect();
            Record::Feature(FeatureVector::new(id, values, label).map_err(invalid)?)
        }
        other => {
            return Err(DatasetError::corrupt_record(format!(
                "unknown record kind {other}"
            )));
        }
    };

    if cursor.remaining() != 0 {
        return Err(DatasetError::corrupt_record(format!(
            "{} trailing bytes after record body",
            cursor.remaining()
        )));
    }

    Ok(record)
}

fn invalid(err: ml_types::MlTypesError) -> DatasetError {
    DatasetError::corrupt_record(format!("invalid record contents: {err}"))
}

/// Outcome of reading one frame from a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameRead {
    /// A complete frame: body bytes and the checksum from its header.
    Frame {
        /// Body bytes.
        body: Vec<u8>,
        /// CRC-32 from the header.
        crc: u32,
    },

    /// Clean end of stream at a frame boundary.
    Eof,

    /// The stream ends inside a frame.
    Truncated {
        /// Bytes the frame needed.
        expected: u64,
        /// Bytes actually available.
        available: u64,
    },
}

/// Reads one frame, given the number of bytes left in the stream.
///
/// `remaining` lets a length prefix that overruns the file be reported as
/// truncation without allocating the claimed body.
///
/// # Errors
///
/// Returns I/O errors from the underlying reader.
pub fn read_frame<R: Read>(reader: &mut R, remaining: u64) -> io::Result<FrameRead> {
    let mut header = [0u8; FRAME_HEADER_LEN];
    let got = read_full(reader, &mut header)?;
    if got == 0 {
        return Ok(FrameRead::Eof);
    }
    if got < FRAME_HEADER_LEN {
        return Ok(FrameRead::Truncated {
            expected: FRAME_HEADER_LEN as u64,
            available: got as u64,
        });
    }

    let (len, crc) = parse_header(&header);
    let needed = FRAME_HEADER_LEN as u64 + u64::from(len);
    if needed > remaining {
        return Ok(FrameRead::Truncated {
            expected: needed,
            available: remaining,
        });
    }

    let mut body = vec![0u8; len as usize];
    let got = read_full(reader, &mut body)?;
    if got < body.len() {
        return Ok(FrameRead::Truncated {
            expected: needed,
            available: (FRAME_HEADER_LEN + got) as u64,
        });
    }

    Ok(FrameRead::Frame { body, crc })
}

/// Fills `buf` as far as the reader allows, returning the bytes read.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

struct BodyCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> BodyCursor<'a> {
    const fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    const fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(DatasetError::corrupt_record(format!(
                "record body ends at byte {} but {n} more bytes are needed",
                self.buf.len()
            )));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.bytes(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        let b = self.bytes(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }
}
