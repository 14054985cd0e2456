//! Binary frame format for cache files.
//!
//! Every file is one frame:
//!
//! ```text
//! offset  size  field
//! 0       4     magic "SKYC"
//! 4       1     format version
//! 5       1     frame kind
//! 6       2     reserved (zero)
//! 8       4     uncompressed payload length (LE)
//! 12      4     compressed payload length (LE)
//! 16      4     CRC-32 of the uncompressed payload (LE)
//! 20      ..    deflate-compressed payload
//! ```
//!
//! Floats are stored as their raw little-endian bits, so NaN payloads
//! survive a round trip unchanged.

use std::io::{Read, Write};

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use sky_common::HourRecords;

use crate::error::{Result, StorageError};

pub const MAGIC: &[u8; 4] = b"SKYC";
pub const FORMAT_VERSION: u8 = 1;
pub const HEADER_LEN: usize = 20;

/// Upper bound on the buffer reserved up front from a header's length.
const MAX_PREALLOC: usize = 64 << 20;

/// What a frame's payload holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    HourRecords = 1,
    MonthlyAccumulator = 2,
}

impl FrameKind {
    fn from_u8(value: u8) -> Result<Self> {
        match value {
            1 => Ok(FrameKind::HourRecords),
            2 => Ok(FrameKind::MonthlyAccumulator),
            other => Err(StorageError::Codec(format!("unknown frame kind {}", other))),
        }
    }
}

/// Compress and frame a payload.
pub fn encode_frame(kind: FrameKind, payload: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::fast());
    encoder
        .write_all(payload)
        .map_err(|e| StorageError::Codec(format!("deflate: {}", e)))?;
    let compressed = encoder
        .finish()
        .map_err(|e| StorageError::Codec(format!("deflate: {}", e)))?;

    let raw_len = u32::try_from(payload.len())
        .map_err(|_| StorageError::Codec("payload exceeds 4 GiB".into()))?;
    let mut out = Vec::with_capacity(HEADER_LEN + compressed.len());
    out.extend_from_slice(MAGIC);
    out.push(FORMAT_VERSION);
    out.push(kind as u8);
    out.extend_from_slice(&[0, 0]);
    out.extend_from_slice(&raw_len.to_le_bytes());
    out.extend_from_slice(&(compressed.len() as u32).to_le_bytes());
    out.extend_from_slice(&crc32fast::hash(payload).to_le_bytes());
    out.extend_from_slice(&compressed);
    Ok(out)
}

/// Validate and decompress a frame, checking it holds the expected kind.
pub fn decode_frame(data: &[u8], expected: FrameKind) -> Result<Vec<u8>> {
    if data.len() < HEADER_LEN {
        return Err(StorageError::Codec(format!(
            "file is {} bytes, shorter than the header",
            data.len()
        )));
    }
    if &data[0..4] != MAGIC {
        return Err(StorageError::Codec("bad magic".into()));
    }
    if data[4] != FORMAT_VERSION {
        return Err(StorageError::UnsupportedVersion(data[4]));
    }
    let kind = FrameKind::from_u8(data[5])?;
    if kind != expected {
        return Err(StorageError::Codec(format!(
            "expected {:?} frame, found {:?}",
            expected, kind
        )));
    }

    let raw_len = read_u32(data, 8) as usize;
    let compressed_len = read_u32(data, 12) as usize;
    let expected_crc = read_u32(data, 16);
    let body = &data[HEADER_LEN..];
    if body.len() != compressed_len {
        return Err(StorageError::Codec(format!(
            "payload is {} bytes, header says {}",
            body.len(),
            compressed_len
        )));
    }

    // Inflate at most one byte past the declared length.
    let mut payload = Vec::with_capacity(raw_len.min(MAX_PREALLOC));
    DeflateDecoder::new(body)
        .take(raw_len as u64 + 1)
        .read_to_end(&mut payload)
        .map_err(|e| StorageError::Codec(format!("inflate: {}", e)))?;
    if payload.len() != raw_len {
        return Err(StorageError::Codec(format!(
            "inflated {} bytes, header says {}",
            payload.len(),
            raw_len
        )));
    }
    let actual = crc32fast::hash(&payload);
    if actual != expected_crc {
        return Err(StorageError::ChecksumMismatch {
            expected: expected_crc,
            actual,
        });
    }
    Ok(payload)
}

fn read_u32(data: &[u8], offset: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&data[offset..offset + 4]);
    u32::from_le_bytes(buf)
}

/// Little-endian cursor over a decoded payload.
pub struct PayloadReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PayloadReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take_column(&mut self, n: usize, width: usize) -> Result<&'a [u8]> {
        let len = n
            .checked_mul(width)
            .ok_or_else(|| StorageError::Codec(format!("column of {} values overflows", n)))?;
        self.take(len)
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| {
                StorageError::Codec(format!(
                    "payload ends at {} bytes, needed {} more at {}",
                    self.data.len(),
                    n,
                    self.pos
                ))
            })?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub fn u32(&mut self) -> Result<u32> {
        Ok(read_u32(self.take(4)?, 0))
    }

    pub fn u64(&mut self) -> Result<u64> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(buf))
    }

    pub fn f32(&mut self) -> Result<f32> {
        Ok(f32::from_bits(self.u32()?))
    }

    pub fn f32_column(&mut self, n: usize) -> Result<Vec<f32>> {
        let bytes = self.take_column(n, 4)?;
        Ok(bytes
            .chunks_exact(4)
            .map(|c| f32::from_bits(u32::from_le_bytes([c[0], c[1], c[2], c[3]])))
            .collect())
    }

    pub fn f64_column(&mut self, n: usize) -> Result<Vec<f64>> {
        let bytes = self.take_column(n, 8)?;
        Ok(bytes
            .chunks_exact(8)
            .map(|c| {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(c);
                f64::from_bits(u64::from_le_bytes(buf))
            })
            .collect())
    }

    pub fn u32_column(&mut self, n: usize) -> Result<Vec<u32>> {
        let bytes = self.take_column(n, 4)?;
        Ok(bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }

    pub fn u8_column(&mut self, n: usize) -> Result<Vec<u8>> {
        Ok(self.take(n)?.to_vec())
    }

    /// Fail if anything is left over.
    pub fn finish(self) -> Result<()> {
        if self.pos != self.data.len() {
            return Err(StorageError::Codec(format!(
                "{} trailing bytes",
                self.data.len() - self.pos
            )));
        }
        Ok(())
    }
}

pub fn put_f32_column(out: &mut Vec<u8>, values: &[f32]) {
    out.reserve(values.len() * 4);
    for v in values {
        out.extend_from_slice(&v.to_bits().to_le_bytes());
    }
}

pub fn put_f64_column(out: &mut Vec<u8>, values: &[f64]) {
    out.reserve(values.len() * 8);
    for v in values {
        out.extend_from_slice(&v.to_bits().to_le_bytes());
    }
}

pub fn put_u32_column(out: &mut Vec<u8>, values: &[u32]) {
    out.reserve(values.len() * 4);
    for v in values {
        out.extend_from_slice(&v.to_le_bytes());
    }
}

/// Encode one hour of records.
pub fn encode_hour(records: &HourRecords) -> Result<Vec<u8>> {
    let cells = records.cell_count();
    records.validate(cells)?;

    let mut payload = Vec::with_capacity(16 + cells * 19);
    payload.extend_from_slice(&records.valid_hour.to_le_bytes());
    payload.extend_from_slice(&(cells as u32).to_le_bytes());
    payload.extend_from_slice(&records.moon_illumination.to_bits().to_le_bytes());
    put_f32_column(&mut payload, &records.cloud_cover);
    put_f32_column(&mut payload, &records.humidity);
    put_f32_column(&mut payload, &records.aod);
    put_f32_column(&mut payload, &records.moon_altitude);
    payload.extend_from_slice(&records.score);
    payload.extend_from_slice(&records.dark);
    payload.extend_from_slice(&records.milky_way);

    encode_frame(FrameKind::HourRecords, &payload)
}

pub fn decode_hour(data: &[u8]) -> Result<HourRecords> {
    let payload = decode_frame(data, FrameKind::HourRecords)?;
    let mut r = PayloadReader::new(&payload);

    let valid_hour = r.u32()?;
    let cells = r.u32()? as usize;
    let moon_illumination = r.f32()?;
    let records = HourRecords {
        valid_hour,
        cloud_cover: r.f32_column(cells)?,
        humidity: r.f32_column(cells)?,
        aod: r.f32_column(cells)?,
        moon_altitude: r.f32_column(cells)?,
        score: r.u8_column(cells)?,
        dark: r.u8_column(cells)?,
        milky_way: r.u8_column(cells)?,
        moon_illumination,
    };
    r.finish()?;
    records.validate(cells)?;
    Ok(records)
}
