use std::path::Path;
use tracing::info;
use crate::core::error::{Error, Result};
use crate::core::types::{DatasetName, Encoding, RecordRange};
use crate::storage::header::SegmentSpec;
use crate::storage::segment::{LinkPair, Segment, UnaryEntry};

/// Single-writer appender for unary and one-to-many link segments.
///
/// Appended records are visible to new readers only after `commit`, which
/// restamps the header; until then the file fails validation.
pub struct SegmentAppender {
    segment: Segment,
    appended: u32,
}

impl SegmentAppender {
    pub fn create<P: AsRef<Path>>(
        path: P,
        names: &DatasetName,
        spec: SegmentSpec,
        capacity: u32,
    ) -> Result<Self> {
        if !spec.encoding.is_append_only() {
            return Err(Error::validation(format!(
                "{:?} segments are fixed-width, use WriteSession",
                spec.encoding
            )));
        }
        let segment = Segment::create(path, names, spec, capacity)?;
        Ok(SegmentAppender { segment, appended: 0 })
    }

    pub fn open<P: AsRef<Path>>(path: P, names: &DatasetName) -> Result<Self> {
        let segment = Segment::open_for_write(path, names)?;
        if !segment.encoding().is_append_only() {
            return Err(Error::validation(format!(
                "{} is not append-only",
                segment.path().display()
            )));
        }
        Ok(SegmentAppender { segment, appended: 0 })
    }

    pub fn record_count(&self) -> u32 {
        self.segment.record_count()
    }

    pub fn remaining(&self) -> u32 {
        self.segment.capacity() - self.segment.record_count()
    }

    /// Append olap target ids.
    pub fn append_ids(&mut self, ids: &[i32]) -> Result<RecordRange> {
        self.segment.expect_encoding(&[Encoding::Olap])?;
        check_ids(ids.iter().copied())?;
        let entries: Vec<UnaryEntry> = ids.iter().map(|id| UnaryEntry::olap(*id)).collect();
        self.append(&entries)
    }

    /// Append document entries (message type, target id, count).
    pub fn append_documents(&mut self, entries: &[UnaryEntry]) -> Result<RecordRange> {
        self.segment.expect_encoding(&[Encoding::Document])?;
        check_ids(entries.iter().map(|e| e.id))?;
        self.append(entries)
    }

    /// Append (source, target) associations.
    pub fn append_links(&mut self, pairs: &[LinkPair]) -> Result<RecordRange> {
        self.segment.expect_encoding(&[Encoding::OneToMany])?;
        check_ids(pairs.iter().flat_map(|p| [p.source, p.target]))?;
        let range = self.segment.append_pairs(pairs)?;
        self.appended += range.len();
        Ok(range)
    }

    fn append(&mut self, entries: &[UnaryEntry]) -> Result<RecordRange> {
        let range = self.segment.append_entries(entries)?;
        self.appended += range.len();
        Ok(range)
    }

    /// Fsync and restamp the header.
    pub fn commit(mut self) -> Result<()> {
        self.segment.commit_stamp()?;
        info!(
            path = %self.segment.path().display(),
            appended = self.appended,
            records = self.segment.record_count(),
            "committed appends"
        );
        Ok(())
    }
}

fn check_ids<I: Iterator<Item = i32>>(ids: I) -> Result<()> {
    for id in ids {
        if id < 0 {
            return Err(Error::validation(format!("record ids are non-negative, got {}", id)));
        }
    }
    Ok(())
}
