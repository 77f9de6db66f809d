use std::fmt;
use roaring::RoaringBitmap;
use crate::core::error::{Error, Result};
use crate::core::types::{Encoding, IdFilter, RecordRange, ValueKind};
use crate::storage::codec::ValueCodec;
use crate::storage::segment::Segment;

/// One in-range document entry: message type, target id and count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DocumentCount {
    pub message_type: u16,
    pub id: u32,
    pub count: u16,
}

impl fmt::Display for DocumentCount {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{},{},{}", self.message_type, self.id, self.count)
    }
}

/// Turns segment columns into bitmaps.
///
/// Every builder has a `_range` form that scans only part of a segment;
/// results over disjoint ranges OR together into the full-segment result.
pub struct BitmapBuilder;

impl BitmapBuilder {
    /// One bitmap per domain value `0..=cardinality`; bit `p` of
    /// `bitmaps[v]` is set when position `p` holds `v`. Nulls and values
    /// outside the domain are skipped.
    pub fn build_distribution(segment: &Segment, cardinality: u32) -> Result<Vec<RoaringBitmap>> {
        Self::build_distribution_range(segment, cardinality, segment.full_range())
    }

    pub fn build_distribution_range(
        segment: &Segment,
        cardinality: u32,
        range: RecordRange,
    ) -> Result<Vec<RoaringBitmap>> {
        let kind = integer_kind(segment)?;
        let mut bitmaps = vec![RoaringBitmap::new(); cardinality as usize + 1];
        segment.scan(range, |position, bytes| {
            if let Some(value) = ValueCodec::decode_integer(kind, bytes) {
                if value >= 0 && value <= cardinality as i64 {
                    bitmaps[value as usize].push(position);
                }
            }
        })?;
        Ok(bitmaps)
    }

    /// Target ids of an olap unary segment that fall within `filter`.
    pub fn build_unary_bitmap(segment: &Segment, filter: IdFilter) -> Result<RoaringBitmap> {
        Self::build_unary_bitmap_range(segment, filter, segment.full_range())
    }

    pub fn build_unary_bitmap_range(
        segment: &Segment,
        filter: IdFilter,
        range: RecordRange,
    ) -> Result<RoaringBitmap> {
        segment.expect_encoding(&[Encoding::Olap])?;
        let mut bitmap = RoaringBitmap::new();
        if filter.is_full() {
            segment.scan(range, |_, bytes| {
                let id = read_i32(bytes, 0);
                if id >= 0 {
                    bitmap.insert(id as u32);
                }
            })?;
        } else {
            segment.scan(range, |_, bytes| {
                let id = read_i32(bytes, 0);
                if id >= 0 && filter.contains(id as u32) {
                    bitmap.insert(id as u32);
                }
            })?;
        }
        Ok(bitmap)
    }

    /// Target ids of a document segment within `filter`, plus the matching
    /// entries in file order.
    pub fn build_document_bitmap_and_counts(
        segment: &Segment,
        filter: IdFilter,
    ) -> Result<(RoaringBitmap, Vec<DocumentCount>)> {
        Self::build_document_bitmap_and_counts_range(segment, filter, segment.full_range())
    }

    pub fn build_document_bitmap_and_counts_range(
        segment: &Segment,
        filter: IdFilter,
        range: RecordRange,
    ) -> Result<(RoaringBitmap, Vec<DocumentCount>)> {
        segment.expect_encoding(&[Encoding::Document])?;
        let mut bitmap = RoaringBitmap::new();
        let mut counts = Vec::new();
        segment.scan(range, |_, bytes| {
            let id = read_i32(bytes, 2);
            if id >= 0 && filter.contains(id as u32) {
                bitmap.insert(id as u32);
                counts.push(DocumentCount {
                    message_type: u16::from_le_bytes([bytes[0], bytes[1]]),
                    id: id as u32,
                    count: u16::from_le_bytes([bytes[6], bytes[7]]),
                });
            }
        })?;
        Ok((bitmap, counts))
    }

    /// Positions of a numeric column whose value lies in `[min, max]`.
    pub fn build_value_filter(segment: &Segment, min: f64, max: f64) -> Result<RoaringBitmap> {
        Self::build_value_filter_range(segment, min, max, segment.full_range())
    }

    pub fn build_value_filter_range(
        segment: &Segment,
        min: f64,
        max: f64,
        range: RecordRange,
    ) -> Result<RoaringBitmap> {
        let kind = segment.value_kind()?;
        if kind == ValueKind::Text {
            return Err(Error::validation("value filters need a numeric column"));
        }
        let mut bitmap = RoaringBitmap::new();
        segment.scan(range, |position, bytes| {
            if let Some(v) = ValueCodec::decode(kind, bytes).as_f64() {
                if v >= min && v <= max {
                    bitmap.push(position);
                }
            }
        })?;
        Ok(bitmap)
    }

    /// Map source positions through a link segment to target record ids.
    pub fn follow_links(segment: &Segment, sources: &RoaringBitmap) -> Result<RoaringBitmap> {
        let mut targets = RoaringBitmap::new();
        match segment.encoding() {
            Encoding::OneToOne => {
                for position in sources.iter().take_while(|p| *p < segment.record_count()) {
                    if let Some(target) = segment.integer_at(position)? {
                        if target >= 0 {
                            targets.insert(target as u32);
                        }
                    }
                }
            }
            Encoding::OneToMany => {
                segment.scan(segment.full_range(), |_, bytes| {
                    let source = read_i32(bytes, 0);
                    let target = read_i32(bytes, 4);
                    if source >= 0 && target >= 0 && sources.contains(source as u32) {
                        targets.insert(target as u32);
                    }
                })?;
            }
            other => {
                return Err(Error::validation(format!("{:?} is not a link encoding", other)));
            }
        }
        Ok(targets)
    }
}

fn integer_kind(segment: &Segment) -> Result<ValueKind> {
    match segment.value_kind()? {
        kind @ (ValueKind::Byte | ValueKind::Short | ValueKind::Int | ValueKind::Long) => Ok(kind),
        kind => Err(Error::validation(format!(
            "distributions need an integer column, {} is {:?}",
            segment.path().display(),
            kind
        ))),
    }
}

fn read_i32(bytes: &[u8], offset: usize) -> i32 {
    i32::from_le_bytes([bytes[offset], bytes[offset + 1], bytes[offset + 2], bytes[offset + 3]])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{DatasetName, Value};
    use crate::storage::header::SegmentSpec;
    use crate::storage::segment::{LinkPair, UnaryEntry};
    use rand::Rng;
    use tempfile::TempDir;

    fn names() -> DatasetName {
        DatasetName::new("retail", "cols")
    }

    fn dimension(dir: &TempDir, values: &[Value]) -> Segment {
        let spec = SegmentSpec::new(Encoding::DimByte, 0).unwrap();
        let path = dir.path().join("region_00000.dim");
        let mut segment = Segment::create(path, &names(), spec, values.len() as u32).unwrap();
        for (p, v) in values.iter().enumerate() {
            segment.write_value(p as u32, v).unwrap();
        }
        segment
    }

    #[test]
    fn distribution_counts_match_column() {
        let dir = TempDir::new().unwrap();
        let mut rng = rand::thread_rng();
        let values: Vec<Value> = (0..500)
            .map(|_| match rng.gen_range(0..12) {
                0 => Value::Null,
                v => Value::Byte(v as i8),
            })
            .collect();
        let segment = dimension(&dir, &values);

        let bitmaps = BitmapBuilder::build_distribution(&segment, 11).unwrap();
        assert_eq!(bitmaps.len(), 12);
        assert!(bitmaps[0].is_empty());

        let non_null = values.iter().filter(|v| !v.is_null()).count() as u64;
        let total: u64 = bitmaps.iter().map(|b| b.len()).sum();
        assert_eq!(total, non_null);

        for (k, bitmap) in bitmaps.iter().enumerate().skip(1) {
            let expected = values.iter().filter(|v| **v == Value::Byte(k as i8)).count() as u64;
            assert_eq!(bitmap.len(), expected, "value {}", k);
        }
    }

    #[test]
    fn ranges_or_into_full_result() {
        let dir = TempDir::new().unwrap();
        let values: Vec<Value> = (0..100).map(|i| Value::Byte((i % 5) as i8)).collect();
        let segment = dimension(&dir, &values);

        let full = BitmapBuilder::build_distribution(&segment, 4).unwrap();
        let (head, tail) = (RecordRange::new(0, 37), RecordRange::new(37, 100));
        let low = BitmapBuilder::build_distribution_range(&segment, 4, head).unwrap();
        let high = BitmapBuilder::build_distribution_range(&segment, 4, tail).unwrap();
        for k in 0..5 {
            assert_eq!(&low[k] | &high[k], full[k]);
        }
    }

    #[test]
    fn values_above_cardinality_are_skipped() {
        let dir = TempDir::new().unwrap();
        let segment = dimension(&dir, &[Value::Byte(1), Value::Byte(9), Value::Byte(2)]);
        let bitmaps = BitmapBuilder::build_distribution(&segment, 2).unwrap();
        assert_eq!(bitmaps.iter().map(|b| b.len()).sum::<u64>(), 2);
    }

    #[test]
    fn unary_filter_and_fast_path_agree() {
        let dir = TempDir::new().unwrap();
        let spec = SegmentSpec::new(Encoding::Olap, 0).unwrap();
        let path = dir.path().join("hits_00000.una");
        let mut segment = Segment::create(&path, &names(), spec, 10).unwrap();
        let ids = [3, 900, 12, 3, 450];
        let entries: Vec<UnaryEntry> = ids.iter().map(|id| UnaryEntry::olap(*id)).collect();
        segment.append_entries(&entries).unwrap();

        let all = BitmapBuilder::build_unary_bitmap(&segment, IdFilter::all()).unwrap();
        assert_eq!(all.iter().collect::<Vec<_>>(), vec![3, 12, 450, 900]);

        let some = BitmapBuilder::build_unary_bitmap(&segment, IdFilter::new(10, 500)).unwrap();
        assert_eq!(some.iter().collect::<Vec<_>>(), vec![12, 450]);
    }

    #[test]
    fn documents_report_in_range_counts() {
        let dir = TempDir::new().unwrap();
        let spec = SegmentSpec::new(Encoding::Document, 0).unwrap();
        let path = dir.path().join("docs_00000.una");
        let mut segment = Segment::create(&path, &names(), spec, 10).unwrap();
        segment
            .append_entries(&[
                UnaryEntry::document(1, 10, 3),
                UnaryEntry::document(2, 20, 1),
                UnaryEntry::document(1, 30, 7),
            ])
            .unwrap();

        let filter = IdFilter::new(15, 40);
        let (bitmap, counts) =
            BitmapBuilder::build_document_bitmap_and_counts(&segment, filter).unwrap();
        assert_eq!(bitmap.iter().collect::<Vec<_>>(), vec![20, 30]);
        let lines: Vec<String> = counts.iter().map(|c| c.to_string()).collect();
        assert_eq!(lines, vec!["2,20,1", "1,30,7"]);
    }

    #[test]
    fn builders_check_encoding() {
        let dir = TempDir::new().unwrap();
        let segment = dimension(&dir, &[Value::Byte(1)]);
        assert!(BitmapBuilder::build_unary_bitmap(&segment, IdFilter::all()).is_err());

        let spec = SegmentSpec::new(Encoding::Double, 0).unwrap();
        let fact = Segment::create(dir.path().join("price_00000.fct"), &names(), spec, 2).unwrap();
        assert!(BitmapBuilder::build_distribution(&fact, 3).unwrap_err().is_validation());
    }

    #[test]
    fn value_filter_selects_positions() {
        let dir = TempDir::new().unwrap();
        let spec = SegmentSpec::new(Encoding::Double, 0).unwrap();
        let path = dir.path().join("price_00000.fct");
        let mut fact = Segment::create(&path, &names(), spec, 5).unwrap();
        for (p, v) in [1.0, 5.5, 9.0, 5.0].iter().enumerate() {
            fact.write_value(p as u32, &Value::Double(*v)).unwrap();
        }
        let bitmap = BitmapBuilder::build_value_filter(&fact, 5.0, 9.0).unwrap();
        assert_eq!(bitmap.iter().collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn links_map_sources_to_targets() {
        let dir = TempDir::new().unwrap();
        let spec = SegmentSpec::new(Encoding::OneToOne, 0).unwrap();
        let one_path = dir.path().join("store_00000.lnk");
        let mut one = Segment::create(&one_path, &names(), spec, 4).unwrap();
        for (p, t) in [7, 8, 7, 9].iter().enumerate() {
            one.write_value(p as u32, &Value::Int(*t)).unwrap();
        }
        let sources: RoaringBitmap = [0u32, 2, 3].into_iter().collect();
        let targets = BitmapBuilder::follow_links(&one, &sources).unwrap();
        assert_eq!(targets.iter().collect::<Vec<_>>(), vec![7, 9]);

        let spec = SegmentSpec::new(Encoding::OneToMany, 0).unwrap();
        let many_path = dir.path().join("tags_00000.lnk");
        let mut many = Segment::create(&many_path, &names(), spec, 4).unwrap();
        many.append_pairs(&[
            LinkPair { source: 0, target: 100 },
            LinkPair { source: 0, target: 101 },
            LinkPair { source: 1, target: 102 },
        ])
        .unwrap();
        many.commit_stamp().unwrap();
        drop(many);

        let many = Segment::open_for_read(&many_path, &names()).unwrap();
        assert_eq!(many.record_count(), 3);
        let sources: RoaringBitmap = [0u32].into_iter().collect();
        let targets = BitmapBuilder::follow_links(&many, &sources).unwrap();
        assert_eq!(targets.iter().collect::<Vec<_>>(), vec![100, 101]);

        // Sources with no pairs contribute nothing.
        let sources: RoaringBitmap = [1u32, 5].into_iter().collect();
        let targets = BitmapBuilder::follow_links(&many, &sources).unwrap();
        assert_eq!(targets.iter().collect::<Vec<_>>(), vec![102]);
    }
}
