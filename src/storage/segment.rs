use std::fs::{File, OpenOptions};
use std::io::{BufWriter, ErrorKind as IoErrorKind, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use crate::core::error::{Error, Result};
use crate::core::types::{DatasetName, Encoding, FileType, RecordRange, Value, ValueKind};
use crate::mmap::mmap_file::MmapFile;
use crate::storage::codec::ValueCodec;
use crate::storage::header::{HeaderCodec, SegmentHeader, SegmentSpec};

/// Record ids are non-negative i32 values.
pub const MAX_RECORDS: u32 = i32::MAX as u32;

/// One entry of a unary segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnaryEntry {
    /// Document encoding only.
    pub message_type: Option<u16>,
    pub id: i32,
    /// Document encoding only.
    pub count: Option<u16>,
}

impl UnaryEntry {
    pub fn olap(id: i32) -> Self {
        UnaryEntry { message_type: None, id, count: None }
    }

    pub fn document(message_type: u16, id: i32, count: u16) -> Self {
        UnaryEntry { message_type: Some(message_type), id, count: Some(count) }
    }

    fn encode(&self, encoding: Encoding, out: &mut Vec<u8>) -> Result<()> {
        match (encoding, self.message_type, self.count) {
            (Encoding::Olap, None, None) => out.extend_from_slice(&self.id.to_le_bytes()),
            (Encoding::Document, Some(message_type), Some(count)) => {
                out.extend_from_slice(&message_type.to_le_bytes());
                out.extend_from_slice(&self.id.to_le_bytes());
                out.extend_from_slice(&count.to_le_bytes());
            }
            _ => {
                return Err(Error::validation(format!(
                    "entry {:?} does not match {:?} encoding",
                    self, encoding
                )))
            }
        }
        Ok(())
    }

    fn decode(encoding: Encoding, bytes: &[u8]) -> Self {
        match encoding {
            Encoding::Document => UnaryEntry {
                message_type: Some(u16::from_le_bytes([bytes[0], bytes[1]])),
                id: i32::from_le_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]),
                count: Some(u16::from_le_bytes([bytes[6], bytes[7]])),
            },
            _ => UnaryEntry::olap(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
        }
    }
}

/// One association of a one-to-many link segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkPair {
    pub source: i32,
    pub target: i32,
}

impl LinkPair {
    fn decode(bytes: &[u8]) -> Self {
        LinkPair {
            source: i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            target: i32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        }
    }
}

/// A segment file mapped into memory.
///
/// All byte-offset arithmetic over segment files lives here; callers
/// address records by position only.
pub struct Segment {
    path: PathBuf,
    names: DatasetName,
    header: SegmentHeader,
    file: File,
    map: MmapFile,
    record_count: u32,
}

impl Segment {
    /// Create a new segment file. Fixed-width files are allocated at full
    /// capacity and filled with nulls; append-only files start empty.
    pub fn create<P: AsRef<Path>>(
        path: P,
        names: &DatasetName,
        spec: SegmentSpec,
        capacity: u32,
    ) -> Result<Self> {
        let path = path.as_ref();
        names.validate()?;
        spec.validate()?;
        if capacity == 0 || capacity > MAX_RECORDS {
            return Err(Error::validation(format!(
                "capacity must be within 1..={}, got {}",
                MAX_RECORDS, capacity
            )));
        }

        let width = spec.record_width();
        let append_only = spec.encoding.is_append_only();
        let file_len = if append_only {
            spec.header_len() as u64
        } else {
            spec.header_len() as u64 + capacity as u64 * width as u64
        };
        // Unary headers carry their capacity; every other file checksums its length.
        let size_or_capacity = if spec.file_type == FileType::Unary {
            capacity as u64
        } else {
            file_len
        };

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| match e.kind() {
                IoErrorKind::AlreadyExists => {
                    Error::validation(format!("segment {} already exists", path.display()))
                }
                _ => Error::from(e),
            })?;

        let modified_millis = HeaderCodec::now_millis();
        let header_bytes = HeaderCodec::encode(&spec, names, size_or_capacity, modified_millis);

        {
            let mut writer = BufWriter::with_capacity(1024 * 1024, &file);
            writer.write_all(&header_bytes)?;
            if !append_only {
                let kind = spec.value_kind().ok_or_else(|| {
                    Error::validation(format!("{:?} has no scalar records", spec.encoding))
                })?;
                let null = ValueCodec::null_bytes(kind, width);
                let mut chunk = Vec::with_capacity(width * 4096);
                for _ in 0..4096.min(capacity) {
                    chunk.extend_from_slice(&null);
                }
                let mut remaining = capacity as usize;
                while remaining > 0 {
                    let records = remaining.min(4096);
                    writer.write_all(&chunk[..records * width])?;
                    remaining -= records;
                }
            }
            writer.flush()?;
        }
        file.sync_all()?;
        HeaderCodec::set_modified(&file, modified_millis)?;

        info!(
            path = %path.display(),
            dataset = %names.qualified(),
            encoding = ?spec.encoding,
            segment_no = spec.segment_no,
            capacity,
            "created segment"
        );

        let header = HeaderCodec::decode(&header_bytes)?;
        Self::from_parts(path.to_path_buf(), names.clone(), header, file, true)
    }

    pub fn open_for_read<P: AsRef<Path>>(path: P, names: &DatasetName) -> Result<Self> {
        Self::open(path.as_ref(), names, false)
    }

    pub fn open_for_write<P: AsRef<Path>>(path: P, names: &DatasetName) -> Result<Self> {
        Self::open(path.as_ref(), names, true)
    }

    fn open(path: &Path, names: &DatasetName, writable: bool) -> Result<Self> {
        let header = HeaderCodec::decode_and_validate(path, names)?;
        let file = OpenOptions::new().read(true).write(writable).open(path)?;
        debug!(path = %path.display(), writable, "opened segment");
        Self::from_parts(path.to_path_buf(), names.clone(), header, file, writable)
    }

    fn from_parts(
        path: PathBuf,
        names: DatasetName,
        header: SegmentHeader,
        file: File,
        writable: bool,
    ) -> Result<Self> {
        let map = if writable {
            MmapFile::open_read_write(&file)?
        } else {
            MmapFile::open_read_only(&file)?
        };
        let record_count = header.record_count(map.len as u64);
        Ok(Segment { path, names, header, file, map, record_count })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn names(&self) -> &DatasetName {
        &self.names
    }

    pub fn header(&self) -> &SegmentHeader {
        &self.header
    }

    pub fn spec(&self) -> &SegmentSpec {
        &self.header.spec
    }

    pub fn file_type(&self) -> FileType {
        self.header.spec.file_type
    }

    pub fn encoding(&self) -> Encoding {
        self.header.spec.encoding
    }

    pub fn segment_no(&self) -> u32 {
        self.header.spec.segment_no
    }

    pub fn lock_key(&self) -> String {
        self.names.lock_key(self.segment_no())
    }

    pub fn record_width(&self) -> usize {
        self.header.record_width()
    }

    /// Live records: `(file length - header length) / record width`.
    pub fn record_count(&self) -> u32 {
        self.record_count
    }

    /// Most records the segment may hold. One-to-many link files have no
    /// stored capacity and grow up to `MAX_RECORDS`.
    pub fn capacity(&self) -> u32 {
        match self.header.capacity {
            Some(capacity) => capacity,
            None if self.encoding().is_append_only() => MAX_RECORDS,
            None => self.record_count,
        }
    }

    pub fn is_writable(&self) -> bool {
        self.map.is_writable()
    }

    pub fn value_kind(&self) -> Result<ValueKind> {
        self.encoding().value_kind().ok_or_else(|| {
            Error::validation(format!("{:?} records are not scalar values", self.encoding()))
        })
    }

    fn offset(&self, position: u32) -> Result<usize> {
        if position >= self.record_count {
            return Err(Error::out_of_range(position as u64, self.record_count));
        }
        Ok(self.header.len() + position as usize * self.record_width())
    }

    pub fn check_position(&self, position: u32) -> Result<()> {
        self.offset(position).map(|_| ())
    }

    pub fn read_at(&self, position: u32) -> Result<&[u8]> {
        let start = self.offset(position)?;
        Ok(&self.map.data()[start..start + self.record_width()])
    }

    pub fn write_at(&mut self, position: u32, bytes: &[u8]) -> Result<()> {
        let width = self.record_width();
        if bytes.len() != width {
            return Err(Error::validation(format!(
                "record is {} bytes, got {}",
                width,
                bytes.len()
            )));
        }
        let start = self.offset(position)?;
        self.map.data_mut()?[start..start + width].copy_from_slice(bytes);
        Ok(())
    }

    pub fn read_value(&self, position: u32) -> Result<Value> {
        let kind = self.value_kind()?;
        Ok(ValueCodec::decode(kind, self.read_at(position)?))
    }

    /// Store `value` (or the null pattern for `Value::Null`). Domain checks
    /// belong to the caller.
    pub fn write_value(&mut self, position: u32, value: &Value) -> Result<()> {
        let kind = self.value_kind()?;
        let width = self.record_width();
        let start = self.offset(position)?;
        let slot = &mut self.map.data_mut()?[start..start + width];
        ValueCodec::encode(kind, value, slot)
    }

    /// Integer view of a record, `None` for null.
    pub fn integer_at(&self, position: u32) -> Result<Option<i64>> {
        let kind = self.value_kind()?;
        Ok(ValueCodec::decode_integer(kind, self.read_at(position)?))
    }

    pub fn unary_entry_at(&self, position: u32) -> Result<UnaryEntry> {
        self.expect_encoding(&[Encoding::Olap, Encoding::Document])?;
        Ok(UnaryEntry::decode(self.encoding(), self.read_at(position)?))
    }

    pub fn link_pair_at(&self, position: u32) -> Result<LinkPair> {
        self.expect_encoding(&[Encoding::OneToMany])?;
        Ok(LinkPair::decode(self.read_at(position)?))
    }

    pub fn expect_encoding(&self, allowed: &[Encoding]) -> Result<()> {
        if allowed.contains(&self.encoding()) {
            Ok(())
        } else {
            Err(Error::validation(format!(
                "{} is {:?}, expected one of {:?}",
                self.path.display(),
                self.encoding(),
                allowed
            )))
        }
    }

    /// Visit every record of `range` with its position and raw bytes.
    pub fn scan<F>(&self, range: RecordRange, mut visit: F) -> Result<()>
    where
        F: FnMut(u32, &[u8]),
    {
        if range.is_empty() {
            return Ok(());
        }
        if range.end > self.record_count {
            return Err(Error::out_of_range(range.end as u64 - 1, self.record_count));
        }
        let width = self.record_width();
        let start = self.header.len() + range.start as usize * width;
        let end = self.header.len() + range.end as usize * width;
        for (i, record) in self.map.data()[start..end].chunks_exact(width).enumerate() {
            visit(range.start + i as u32, record);
        }
        Ok(())
    }

    pub fn full_range(&self) -> RecordRange {
        RecordRange::new(0, self.record_count)
    }

    /// Append unary entries past the current end of file.
    pub fn append_entries(&mut self, entries: &[UnaryEntry]) -> Result<RecordRange> {
        self.expect_encoding(&[Encoding::Olap, Encoding::Document])?;
        let mut bytes = Vec::with_capacity(entries.len() * self.record_width());
        for entry in entries {
            entry.encode(self.encoding(), &mut bytes)?;
        }
        self.append_raw(&bytes, entries.len() as u32)
    }

    /// Append one-to-many link pairs past the current end of file.
    pub fn append_pairs(&mut self, pairs: &[LinkPair]) -> Result<RecordRange> {
        self.expect_encoding(&[Encoding::OneToMany])?;
        let mut bytes = Vec::with_capacity(pairs.len() * self.record_width());
        for pair in pairs {
            bytes.extend_from_slice(&pair.source.to_le_bytes());
            bytes.extend_from_slice(&pair.target.to_le_bytes());
        }
        self.append_raw(&bytes, pairs.len() as u32)
    }

    fn append_raw(&mut self, bytes: &[u8], records: u32) -> Result<RecordRange> {
        if !self.is_writable() {
            return Err(Error::invalid_state("segment is mapped read-only"));
        }
        let first = self.record_count;
        let capacity = self.capacity();
        if first as u64 + records as u64 > capacity as u64 {
            return Err(Error::validation(format!(
                "appending {} record(s) to {} exceeds capacity {}",
                records, first, capacity
            )));
        }
        if records == 0 {
            return Ok(RecordRange::new(first, first));
        }

        let end = self.header.len() as u64 + first as u64 * self.record_width() as u64;
        self.file.seek(SeekFrom::Start(end))?;
        self.file.write_all(bytes)?;

        self.map = MmapFile::open_read_write(&self.file)?;
        self.record_count = self.header.record_count(self.map.len as u64);
        Ok(RecordRange::new(first, self.record_count))
    }

    pub fn flush(&self) -> Result<()> {
        self.map.flush()
    }

    /// Persist pending writes and restamp the header: flush the mapping,
    /// write the new modified checksum (and the size checksum of files with
    /// no stored capacity), pin the file mtime to the same instant and
    /// fsync. Returns the stamped instant.
    pub fn commit_stamp(&mut self) -> Result<i64> {
        let header_len = self.header.len();
        let modified_millis = HeaderCodec::now_millis();

        self.map.flush()?;
        let file_len = self.map.len as u64;
        let has_capacity = self.header.capacity.is_some();
        let header = &mut self.map.data_mut()?[..header_len];
        if !has_capacity {
            HeaderCodec::stamp_size(header, file_len);
        }
        HeaderCodec::stamp_modified(header, modified_millis);
        self.map.flush()?;
        self.file.sync_all()?;
        HeaderCodec::set_modified(&self.file, modified_millis)?;
        self.file.sync_all()?;

        if !has_capacity {
            self.header.size_checksum = HeaderCodec::long_checksum(file_len as i64);
        }
        self.header.modified_checksum = HeaderCodec::long_checksum(modified_millis);
        debug!(path = %self.path.display(), modified_millis, "stamped segment");
        Ok(modified_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::{Duration, UNIX_EPOCH};
    use tempfile::TempDir;

    fn names() -> DatasetName {
        DatasetName::new("retail", "amount")
    }

    #[test]
    fn create_allocates_null_records() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("amount_00000.fct");
        let spec = SegmentSpec::new(Encoding::Int, 0).unwrap();

        let segment = Segment::create(&path, &names(), spec, 100).unwrap();
        assert_eq!(segment.record_count(), 100);
        assert_eq!(fs::metadata(&path).unwrap().len(), 60 + 400);
        assert_eq!(segment.read_value(99).unwrap(), Value::Null);
    }

    #[test]
    fn create_refuses_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("amount_00000.fct");
        let spec = SegmentSpec::new(Encoding::Int, 0).unwrap();
        Segment::create(&path, &names(), spec, 10).unwrap();

        let err = Segment::create(&path, &names(), spec, 10).err().unwrap();
        assert!(err.is_validation());
    }

    #[test]
    fn committed_writes_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("amount_00000.fct");
        let spec = SegmentSpec::new(Encoding::Double, 0).unwrap();

        let mut segment = Segment::create(&path, &names(), spec, 8).unwrap();
        segment.write_value(3, &Value::Double(2.5)).unwrap();
        segment.commit_stamp().unwrap();
        drop(segment);

        let segment = Segment::open_for_read(&path, &names()).unwrap();
        assert_eq!(segment.read_value(3).unwrap(), Value::Double(2.5));
        assert_eq!(segment.read_value(4).unwrap(), Value::Null);
    }

    #[test]
    fn positions_are_bounds_checked() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("amount_00000.fct");
        let spec = SegmentSpec::new(Encoding::Short, 0).unwrap();
        let mut segment = Segment::create(&path, &names(), spec, 4).unwrap();

        assert!(segment.read_at(4).unwrap_err().is_out_of_range());
        assert!(segment.write_value(4, &Value::Short(1)).unwrap_err().is_out_of_range());
        assert!(segment.write_at(0, &[1, 2, 3]).unwrap_err().is_validation());
    }

    #[test]
    fn appended_length_is_tamper() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("amount_00000.fct");
        let spec = SegmentSpec::new(Encoding::Byte, 0).unwrap();
        drop(Segment::create(&path, &names(), spec, 16).unwrap());

        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&[0]).unwrap();
        drop(file);

        let err = Segment::open_for_read(&path, &names()).err().unwrap();
        assert!(err.is_integrity());
    }

    #[test]
    fn touched_mtime_is_tamper() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("amount_00000.fct");
        let spec = SegmentSpec::new(Encoding::Byte, 0).unwrap();
        drop(Segment::create(&path, &names(), spec, 16).unwrap());

        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_modified(UNIX_EPOCH + Duration::from_secs(1_000_000)).unwrap();
        drop(file);

        let err = Segment::open_for_write(&path, &names()).err().unwrap();
        assert!(err.is_integrity());
    }

    #[test]
    fn wrong_dataset_name_is_tamper() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("amount_00000.fct");
        let spec = SegmentSpec::new(Encoding::Byte, 0).unwrap();
        drop(Segment::create(&path, &names(), spec, 16).unwrap());

        let err = Segment::open_for_read(&path, &DatasetName::new("retail", "qty")).err().unwrap();
        assert!(err.is_integrity());
    }

    #[test]
    fn unary_appends_grow_within_capacity() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("events_00000.una");
        let spec = SegmentSpec::new(Encoding::Document, 0).unwrap();

        let mut segment = Segment::create(&path, &names(), spec, 3).unwrap();
        assert_eq!(segment.record_count(), 0);

        let range = segment
            .append_entries(&[UnaryEntry::document(7, 42, 2), UnaryEntry::document(8, 43, 1)])
            .unwrap();
        assert_eq!(range, RecordRange::new(0, 2));
        assert_eq!(segment.unary_entry_at(1).unwrap(), UnaryEntry::document(8, 43, 1));

        let err = segment
            .append_entries(&[UnaryEntry::document(1, 1, 1), UnaryEntry::document(1, 2, 1)])
            .unwrap_err();
        assert!(err.is_validation());

        segment.commit_stamp().unwrap();
        drop(segment);
        let segment = Segment::open_for_read(&path, &names()).unwrap();
        assert_eq!(segment.record_count(), 2);
        assert_eq!(segment.capacity(), 3);
    }

    #[test]
    fn link_pairs_survive_commit_and_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tags_00000.lnk");
        let spec = SegmentSpec::new(Encoding::OneToMany, 0).unwrap();

        let mut segment = Segment::create(&path, &names(), spec, 4).unwrap();
        assert_eq!(segment.record_count(), 0);
        assert_eq!(segment.capacity(), MAX_RECORDS);
        drop(segment);

        // An empty link file reopens cleanly.
        let mut segment = Segment::open_for_write(&path, &names()).unwrap();
        let range = segment
            .append_pairs(&[LinkPair { source: 1, target: 10 }, LinkPair { source: 1, target: 11 }])
            .unwrap();
        assert_eq!(range, RecordRange::new(0, 2));
        segment.commit_stamp().unwrap();
        drop(segment);

        let mut segment = Segment::open_for_write(&path, &names()).unwrap();
        assert_eq!(segment.record_count(), 2);
        segment.append_pairs(&[LinkPair { source: 2, target: 12 }]).unwrap();
        segment.commit_stamp().unwrap();
        drop(segment);

        let segment = Segment::open_for_read(&path, &names()).unwrap();
        assert_eq!(segment.record_count(), 3);
        assert_eq!(fs::metadata(&path).unwrap().len(), 60 + 3 * 8);
        assert_eq!(segment.link_pair_at(1).unwrap(), LinkPair { source: 1, target: 11 });
        assert_eq!(segment.link_pair_at(2).unwrap(), LinkPair { source: 2, target: 12 });
    }

    #[test]
    fn uncommitted_link_append_is_tamper() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tags_00000.lnk");
        let spec = SegmentSpec::new(Encoding::OneToMany, 0).unwrap();

        let mut segment = Segment::create(&path, &names(), spec, 4).unwrap();
        segment.append_pairs(&[LinkPair { source: 0, target: 1 }]).unwrap();
        drop(segment);

        let err = Segment::open_for_read(&path, &names()).err().unwrap();
        assert!(err.is_integrity());
    }

    #[test]
    fn olap_entries_must_not_carry_document_fields() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hits_00000.una");
        let spec = SegmentSpec::new(Encoding::Olap, 0).unwrap();
        let mut segment = Segment::create(&path, &names(), spec, 3).unwrap();

        assert!(segment.append_entries(&[UnaryEntry::document(1, 1, 1)]).is_err());
        segment.append_entries(&[UnaryEntry::olap(9)]).unwrap();
        assert_eq!(segment.unary_entry_at(0).unwrap(), UnaryEntry::olap(9));
    }

    #[test]
    fn scan_visits_range_in_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("amount_00000.fct");
        let spec = SegmentSpec::new(Encoding::Short, 0).unwrap();
        let mut segment = Segment::create(&path, &names(), spec, 10).unwrap();
        for p in 0..10u32 {
            segment.write_value(p, &Value::Short(p as i16 * 10)).unwrap();
        }

        let mut seen = Vec::new();
        segment
            .scan(RecordRange::new(3, 6), |p, bytes| {
                seen.push((p, ValueCodec::decode(ValueKind::Short, bytes)));
            })
            .unwrap();
        assert_eq!(
            seen,
            vec![(3, Value::Short(30)), (4, Value::Short(40)), (5, Value::Short(50))]
        );
        assert!(segment.scan(RecordRange::new(5, 11), |_, _| {}).is_err());
    }
}
