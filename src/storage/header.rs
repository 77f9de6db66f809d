//! Fixed-length segment header and its integrity fields.
//!
//! ```text
//! [0]      file type
//! [1]      encoding
//! [2..6]   segment number        u32 LE
//! [6..10]  data length           u32 LE
//! [10..12] decimal length        u16 LE
//! [12..16] name checksum         i32 LE
//! [16..36] size checksum         20 ASCII digits
//! [36..56] modified checksum     20 ASCII digits
//! [56..60] reserved
//! [60..64] capacity              u32 LE (unary only)
//! ```
//!
//! The checksums are lossy float reinterpretations, not hashes. They catch a
//! file that changed length or modification time without passing through a
//! commit.

use std::fs::{File, Metadata};
use std::io::Read;
use std::path::Path;
use std::time::{Duration, UNIX_EPOCH};
use chrono::Utc;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{DatasetName, Encoding, FileType, ValueKind, MAX_TEXT_BYTES};

pub const HEADER_LEN: usize = 60;
pub const UNARY_HEADER_LEN: usize = 64;

/// Highest segment number a dataset may be split into.
pub const MAX_SEGMENT_NUMBER: u32 = u16::MAX as u32;

const OFF_FILE_TYPE: usize = 0;
const OFF_ENCODING: usize = 1;
const OFF_SEGMENT_NO: usize = 2;
const OFF_DATA_LENGTH: usize = 6;
const OFF_DECIMAL_LENGTH: usize = 10;
const OFF_NAME_CHECKSUM: usize = 12;
const OFF_SIZE_CHECKSUM: usize = 16;
const OFF_MODIFIED_CHECKSUM: usize = 36;
const OFF_CAPACITY: usize = 60;
const CHECKSUM_DIGITS: usize = 20;

/// Caller-chosen layout of a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentSpec {
    pub file_type: FileType,
    pub encoding: Encoding,
    pub segment_no: u32,
    pub data_length: u32,
    pub decimal_length: u16,
}

impl SegmentSpec {
    /// Spec for any fixed-width encoding.
    pub fn new(encoding: Encoding, segment_no: u32) -> Result<Self> {
        let (data_length, decimal_length) = encoding.fixed_widths().ok_or_else(|| {
            Error::validation(format!(
                "{:?} needs an explicit width, use SegmentSpec::text",
                encoding
            ))
        })?;
        let spec = SegmentSpec {
            file_type: encoding.file_type(),
            encoding,
            segment_no,
            data_length,
            decimal_length,
        };
        spec.validate()?;
        Ok(spec)
    }

    /// Text fact column holding up to `max_bytes` payload bytes per record.
    pub fn text(max_bytes: u32, segment_no: u32) -> Result<Self> {
        let spec = SegmentSpec {
            file_type: FileType::Fact,
            encoding: Encoding::Text,
            segment_no,
            data_length: max_bytes + 1,
            decimal_length: 0,
        };
        spec.validate()?;
        Ok(spec)
    }

    pub fn header_len(&self) -> usize {
        HeaderCodec::header_len(self.file_type)
    }

    pub fn record_width(&self) -> usize {
        self.data_length as usize + self.decimal_length as usize
    }

    pub fn value_kind(&self) -> Option<ValueKind> {
        self.encoding.value_kind()
    }

    pub fn validate(&self) -> Result<()> {
        check_layout(self).map_err(|msg| Error::validation(msg))
    }
}

fn check_layout(spec: &SegmentSpec) -> std::result::Result<(), String> {
    if spec.encoding.file_type() != spec.file_type {
        return Err(format!(
            "encoding {:?} does not belong to {:?} files",
            spec.encoding, spec.file_type
        ));
    }
    if spec.segment_no > MAX_SEGMENT_NUMBER {
        return Err(format!(
            "segment number {} exceeds {}",
            spec.segment_no, MAX_SEGMENT_NUMBER
        ));
    }
    match spec.encoding.fixed_widths() {
        Some((data, decimals)) => {
            if spec.data_length != data || spec.decimal_length != decimals {
                return Err(format!(
                    "{:?} is {}+{} bytes wide, got {}+{}",
                    spec.encoding, data, decimals, spec.data_length, spec.decimal_length
                ));
            }
        }
        None => {
            if spec.data_length < 2
                || spec.data_length > MAX_TEXT_BYTES + 1
                || spec.decimal_length != 0
            {
                return Err(format!(
                    "text width must hold 1..={} bytes, got data length {}",
                    MAX_TEXT_BYTES, spec.data_length
                ));
            }
        }
    }
    Ok(())
}

/// Decoded header of an existing segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentHeader {
    pub spec: SegmentSpec,
    pub name_checksum: i32,
    pub size_checksum: i64,
    pub modified_checksum: i64,
    /// Reserved record count, unary files only.
    pub capacity: Option<u32>,
}

impl SegmentHeader {
    pub fn len(&self) -> usize {
        self.spec.header_len()
    }

    pub fn record_width(&self) -> usize {
        self.spec.record_width()
    }

    /// Live records in a file of `file_len` bytes.
    pub fn record_count(&self, file_len: u64) -> u32 {
        let body = file_len.saturating_sub(self.len() as u64);
        (body / self.record_width() as u64).min(u32::MAX as u64) as u32
    }
}

pub struct HeaderCodec;

impl HeaderCodec {
    pub fn header_len(file_type: FileType) -> usize {
        match file_type {
            FileType::Unary => UNARY_HEADER_LEN,
            _ => HEADER_LEN,
        }
    }

    /// Sum of the UTF-16 code units of `"{db}|{dataset}"`, taken as an f32
    /// and stored as its bit pattern.
    pub fn name_checksum(names: &DatasetName) -> i32 {
        let sum = names
            .qualified()
            .encode_utf16()
            .fold(0i32, |acc, unit| acc.wrapping_add(unit as i32));
        (sum as f32).to_bits() as i32
    }

    /// `value` taken as an f64 and stored as its bit pattern.
    pub fn long_checksum(value: i64) -> i64 {
        (value as f64).to_bits() as i64
    }

    pub fn encode(
        spec: &SegmentSpec,
        names: &DatasetName,
        size_or_capacity: u64,
        modified_millis: i64,
    ) -> Vec<u8> {
        let mut buf = vec![0u8; spec.header_len()];
        buf[OFF_FILE_TYPE] = spec.file_type.code();
        buf[OFF_ENCODING] = spec.encoding.code();
        buf[OFF_SEGMENT_NO..OFF_SEGMENT_NO + 4].copy_from_slice(&spec.segment_no.to_le_bytes());
        buf[OFF_DATA_LENGTH..OFF_DATA_LENGTH + 4].copy_from_slice(&spec.data_length.to_le_bytes());
        buf[OFF_DECIMAL_LENGTH..OFF_DECIMAL_LENGTH + 2]
            .copy_from_slice(&spec.decimal_length.to_le_bytes());
        buf[OFF_NAME_CHECKSUM..OFF_NAME_CHECKSUM + 4]
            .copy_from_slice(&Self::name_checksum(names).to_le_bytes());
        Self::stamp_size(&mut buf, size_or_capacity);
        Self::stamp_modified(&mut buf, modified_millis);
        if spec.file_type == FileType::Unary {
            buf[OFF_CAPACITY..OFF_CAPACITY + 4]
                .copy_from_slice(&(size_or_capacity as u32).to_le_bytes());
        }
        buf
    }

    /// Rewrite the size checksum of an encoded header in place.
    pub fn stamp_size(buf: &mut [u8], size: u64) {
        write_digits(
            &mut buf[OFF_SIZE_CHECKSUM..OFF_SIZE_CHECKSUM + CHECKSUM_DIGITS],
            Self::long_checksum(size as i64),
        );
    }

    /// Rewrite the modified checksum of an encoded header in place.
    pub fn stamp_modified(buf: &mut [u8], modified_millis: i64) {
        write_digits(
            &mut buf[OFF_MODIFIED_CHECKSUM..OFF_MODIFIED_CHECKSUM + CHECKSUM_DIGITS],
            Self::long_checksum(modified_millis),
        );
    }

    /// Parse header bytes without checking them against the file.
    pub fn decode(bytes: &[u8]) -> Result<SegmentHeader> {
        if bytes.len() < HEADER_LEN {
            return Err(Error::integrity(format!("header truncated to {} bytes", bytes.len())));
        }
        let file_type = FileType::from_code(bytes[OFF_FILE_TYPE]).ok_or_else(|| {
            Error::integrity(format!("unknown file type {}", bytes[OFF_FILE_TYPE]))
        })?;
        let encoding = Encoding::from_code(bytes[OFF_ENCODING]).ok_or_else(|| {
            Error::integrity(format!("unknown encoding {:#04x}", bytes[OFF_ENCODING]))
        })?;
        if bytes.len() < Self::header_len(file_type) {
            return Err(Error::integrity(format!("header truncated to {} bytes", bytes.len())));
        }

        let spec = SegmentSpec {
            file_type,
            encoding,
            segment_no: read_u32(bytes, OFF_SEGMENT_NO),
            data_length: read_u32(bytes, OFF_DATA_LENGTH),
            decimal_length: u16::from_le_bytes([
                bytes[OFF_DECIMAL_LENGTH],
                bytes[OFF_DECIMAL_LENGTH + 1],
            ]),
        };
        check_layout(&spec).map_err(Error::integrity)?;

        let capacity = (file_type == FileType::Unary).then(|| read_u32(bytes, OFF_CAPACITY));

        Ok(SegmentHeader {
            spec,
            name_checksum: read_u32(bytes, OFF_NAME_CHECKSUM) as i32,
            size_checksum: read_digits(
                &bytes[OFF_SIZE_CHECKSUM..OFF_SIZE_CHECKSUM + CHECKSUM_DIGITS],
            )?,
            modified_checksum: read_digits(
                &bytes[OFF_MODIFIED_CHECKSUM..OFF_MODIFIED_CHECKSUM + CHECKSUM_DIGITS],
            )?,
            capacity,
        })
    }

    /// Read the header of `path` and check it against the file's current
    /// length, modification time and the expected dataset name.
    pub fn decode_and_validate<P: AsRef<Path>>(
        path: P,
        names: &DatasetName,
    ) -> Result<SegmentHeader> {
        let path = path.as_ref();
        let mut file = File::open(path)?;
        let metadata = file.metadata()?;

        let mut buf = vec![0u8; UNARY_HEADER_LEN.min(metadata.len() as usize)];
        file.read_exact(&mut buf)?;
        let header = Self::decode(&buf)?;

        Self::validate(&header, names, metadata.len(), Self::modified_millis(&metadata)?)
            .map_err(|e| Error::new(e.kind, format!("{}: {}", path.display(), e.context)))?;
        Ok(header)
    }

    pub fn validate(
        header: &SegmentHeader,
        names: &DatasetName,
        file_len: u64,
        modified_millis: i64,
    ) -> Result<()> {
        let expected_name = Self::name_checksum(names);
        if header.name_checksum != expected_name {
            return Err(Error::integrity(format!(
                "name checksum {} does not match {} ({})",
                header.name_checksum,
                expected_name,
                names.qualified()
            )));
        }

        let size = match header.capacity {
            Some(capacity) => capacity as u64,
            None => file_len,
        };
        if header.size_checksum != Self::long_checksum(size as i64) {
            return Err(Error::integrity(format!(
                "size checksum does not match {} bytes on disk",
                size
            )));
        }

        if header.modified_checksum != Self::long_checksum(modified_millis) {
            return Err(Error::integrity(format!(
                "modified-time checksum does not match mtime {}",
                modified_millis
            )));
        }
        Ok(())
    }

    pub fn modified_millis(metadata: &Metadata) -> Result<i64> {
        let modified = metadata.modified()?;
        let since_epoch = modified.duration_since(UNIX_EPOCH).map_err(|_| {
            Error::new(ErrorKind::Io, "file modified before the unix epoch".to_string())
        })?;
        Ok(since_epoch.as_millis() as i64)
    }

    /// Pin the file's mtime to the instant recorded in its header.
    pub fn set_modified(file: &File, modified_millis: i64) -> Result<()> {
        let at = UNIX_EPOCH + Duration::from_millis(modified_millis.max(0) as u64);
        file.set_modified(at)?;
        Ok(())
    }

    pub fn now_millis() -> i64 {
        Utc::now().timestamp_millis()
    }
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_le_bytes(raw)
}

fn write_digits(field: &mut [u8], value: i64) {
    let digits = format!("{:0width$}", value, width = CHECKSUM_DIGITS);
    field.copy_from_slice(digits.as_bytes());
}

fn read_digits(field: &[u8]) -> Result<i64> {
    std::str::from_utf8(field)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| Error::integrity("checksum field is not a decimal number"))
}
