use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use roaring::RoaringBitmap;
use strata::core::config::{Config, ExecutionMode, WriteMode};
use strata::core::database::Database;
use strata::core::types::{Encoding, FileType, IdFilter, Value};
use strata::index::distribution::BitmapBuilder;
use strata::query::aggregate::Aggregate;
use strata::query::algebra::SetAlgebra;
use strata::storage::header::{HeaderCodec, SegmentSpec};
use strata::storage::segment::LinkPair;
use strata::writer::session::SessionStatus;
use tempfile::TempDir;

const RECORDS: u32 = 1000;

fn open(dir: &TempDir, mode: WriteMode) -> Database {
    let mut config = Config::new(dir.path(), "retail");
    config.mode = mode;
    config.min_records_per_range = 64;
    config.max_parallel_read_threads = 4;
    Database::open(config).unwrap()
}

fn write_cyclic(db: &Database, dataset: &str, cardinality: u32) {
    let spec = SegmentSpec::new(Encoding::DimByte, 0).unwrap();
    let mut session = db.create_segment(dataset, spec, RECORDS).unwrap();
    let positions: Vec<u32> = (0..RECORDS).collect();
    let values: Vec<Value> = positions
        .iter()
        .map(|p| Value::Byte((p % cardinality) as i8 + 1))
        .collect();
    let outcome = session.set_write_positions(&positions, &values, false, false).unwrap();
    assert!(outcome.is_complete());
    assert_eq!(session.write_to_segment(true).unwrap().len(), RECORDS as usize);
    assert_eq!(session.status(), SessionStatus::Complete);
}

#[test]
fn cyclic_dimension_distribution() {
    let dir = TempDir::new().unwrap();
    let db = open(&dir, WriteMode::Online);
    write_cyclic(&db, "region", 31);

    let segment = db.open_segment("region", FileType::Dimension, 0).unwrap();
    let bitmaps = BitmapBuilder::build_distribution(&segment, 31).unwrap();
    assert_eq!(bitmaps.len(), 32);
    assert_eq!(bitmaps[0].len(), 0);
    // 1000 = 31 * 32 + 8: the first eight values occur once more.
    for (k, bitmap) in bitmaps.iter().enumerate().skip(1) {
        let expected = if k <= 8 { 33 } else { 32 };
        assert_eq!(bitmap.len(), expected, "value {}", k);
    }

    for mode in [ExecutionMode::Bounded, ExecutionMode::Unbounded] {
        let reader = strata::parallel::range_reader::ParallelRangeReader::new(4, 64, mode).unwrap();
        assert_eq!(reader.read_distribution(&segment, 31).unwrap(), bitmaps);
    }
}

#[test]
fn group_by_two_dimensions() {
    let dir = TempDir::new().unwrap();
    let db = open(&dir, WriteMode::Batch);
    write_cyclic(&db, "region", 31);
    write_cyclic(&db, "channel", 3);

    let groups = SetAlgebra::intersect(&[
        db.distribution("region", 31).unwrap(),
        db.distribution("channel", 3).unwrap(),
    ]);
    assert_eq!(groups.len(), 31 * 3);

    let expected: RoaringBitmap = (0..RECORDS).filter(|p| p % 31 == 0 && p % 3 == 0).collect();
    assert_eq!(groups["1|1"], expected);

    let total: u64 = groups.values().map(|b| b.len()).sum();
    assert_eq!(total, RECORDS as u64);
}

#[test]
fn aggregates_over_groups() {
    let dir = TempDir::new().unwrap();
    let db = open(&dir, WriteMode::Online);
    write_cyclic(&db, "channel", 3);

    let spec = SegmentSpec::new(Encoding::Long, 0).unwrap();
    let mut amount = db.create_segment("amount", spec, RECORDS).unwrap();
    let positions: Vec<u32> = (0..RECORDS).collect();
    let values: Vec<Value> = positions.iter().map(|p| Value::Long(*p as i64)).collect();
    amount.set_write_positions(&positions, &values, false, false).unwrap();
    amount.write_to_segment(true).unwrap();

    let fact = db.open_segment("amount", FileType::Fact, 0).unwrap();
    let groups = db.distribution("channel", 3).unwrap();
    let aggregates = Aggregate::over_groups(&fact, &groups).unwrap();

    let expected_sum: f64 = (0..RECORDS).filter(|p| p % 3 == 0).map(|p| p as f64).sum();
    assert_eq!(aggregates["1"].sum, expected_sum);
    assert_eq!(aggregates["1"].count, 334);
    assert_eq!(aggregates["3"].max, Some(998.0));
}

#[test]
fn rollback_restores_committed_values() {
    let dir = TempDir::new().unwrap();
    let db = open(&dir, WriteMode::Online);
    write_cyclic(&db, "region", 31);

    let mut session = db.open_session("region", FileType::Dimension, 0).unwrap();
    let nines = [Value::Byte(9), Value::Byte(9), Value::Byte(9)];
    session.set_write_positions(&[0, 1, 2], &nines, false, false).unwrap();
    session.write_to_segment(false).unwrap();
    assert_eq!(session.read_value(1).unwrap(), Value::Byte(9));

    session.rollback().unwrap();
    assert_eq!(session.status(), SessionStatus::Complete);
    assert!(db.locked_positions("region", 0).is_empty());

    let segment = db.open_segment("region", FileType::Dimension, 0).unwrap();
    assert_eq!(segment.read_value(0).unwrap(), Value::Byte(1));
    assert_eq!(segment.read_value(1).unwrap(), Value::Byte(2));
    assert_eq!(segment.read_value(2).unwrap(), Value::Byte(3));
}

#[test]
fn deleted_records_leave_distributions() {
    let dir = TempDir::new().unwrap();
    let db = open(&dir, WriteMode::Batch);
    write_cyclic(&db, "channel", 3);

    let mut session = db.open_session("channel", FileType::Dimension, 0).unwrap();
    session.delete_records(&[0, 3, 6], false, false).unwrap();
    session.write_to_segment(true).unwrap();

    let groups = db.distribution("channel", 3).unwrap();
    assert_eq!(groups["1"].len(), 334 - 3);
    assert!(!groups["1"].contains(3));
}

#[test]
fn resized_file_fails_validation() {
    let dir = TempDir::new().unwrap();
    let db = open(&dir, WriteMode::Online);
    write_cyclic(&db, "region", 31);

    let path = db.layout().segment_path("region", FileType::Dimension, 0);
    let mut file = OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(&[0]).unwrap();
    drop(file);

    let err = db.open_segment("region", FileType::Dimension, 0).err().unwrap();
    assert!(err.is_integrity());
}

#[test]
fn rewritten_record_fails_validation() {
    let dir = TempDir::new().unwrap();
    let db = open(&dir, WriteMode::Online);
    write_cyclic(&db, "region", 31);

    std::thread::sleep(std::time::Duration::from_millis(20));
    let path = db.layout().segment_path("region", FileType::Dimension, 0);
    let mut file = OpenOptions::new().write(true).open(&path).unwrap();
    file.seek(SeekFrom::Start(HeaderCodec::header_len(FileType::Dimension) as u64)).unwrap();
    file.write_all(&[7]).unwrap();
    file.sync_all().unwrap();
    drop(file);

    let err = db.open_segment("region", FileType::Dimension, 0).err().unwrap();
    assert!(err.is_integrity());
}

#[test]
fn wrong_dataset_name_fails_validation() {
    let dir = TempDir::new().unwrap();
    let db = open(&dir, WriteMode::Online);
    write_cyclic(&db, "region", 31);

    let path = db.layout().segment_path("region", FileType::Dimension, 0);
    let renamed = db.layout().segment_path("country", FileType::Dimension, 0);
    std::fs::rename(&path, &renamed).unwrap();

    let err = db.open_segment("country", FileType::Dimension, 0).err().unwrap();
    assert!(err.is_integrity());
}

#[test]
fn links_and_unary_segments() {
    let dir = TempDir::new().unwrap();
    let db = open(&dir, WriteMode::Online);
    write_cyclic(&db, "channel", 3);

    let mut tags = db
        .create_appender("tags", SegmentSpec::new(Encoding::OneToMany, 0).unwrap(), 16)
        .unwrap();
    tags.append_links(&[
        LinkPair { source: 0, target: 40 },
        LinkPair { source: 1, target: 41 },
        LinkPair { source: 3, target: 42 },
    ])
    .unwrap();
    tags.commit().unwrap();

    let mut tags = db.open_appender("tags", FileType::Link, 0).unwrap();
    tags.append_links(&[LinkPair { source: 6, target: 43 }]).unwrap();
    tags.commit().unwrap();

    let channel_one = db.distribution("channel", 3).unwrap().remove("1").unwrap();
    let links = db.open_segment("tags", FileType::Link, 0).unwrap();
    assert_eq!(links.record_count(), 4);
    assert_eq!(links.link_pair_at(2).unwrap(), LinkPair { source: 3, target: 42 });
    assert_eq!(links.link_pair_at(3).unwrap(), LinkPair { source: 6, target: 43 });
    let targets = BitmapBuilder::follow_links(&links, &channel_one).unwrap();
    assert_eq!(targets.iter().collect::<Vec<_>>(), vec![40, 42, 43]);

    let mut visits = db
        .create_appender("visits", SegmentSpec::new(Encoding::Olap, 0).unwrap(), 8)
        .unwrap();
    visits.append_ids(&[40, 5, 42]).unwrap();
    visits.commit().unwrap();
    let visits = db.open_segment("visits", FileType::Unary, 0).unwrap();
    let seen = db.reader().read_unary(&visits, IdFilter::new(10, 100)).unwrap();
    assert_eq!(&seen & &targets, targets);
}

#[test]
fn config_file_drives_database() {
    let dir = TempDir::new().unwrap();
    let config_path = dir.path().join("strata.json");
    let mut config = Config::new(dir.path().join("data"), "warehouse");
    config.mode = WriteMode::Batch;
    config.max_parallel_read_threads = 2;
    config.save(&config_path).unwrap();

    let db = Database::open(Config::load(&config_path).unwrap()).unwrap();
    assert_eq!(db.config().db_name, "warehouse");
    assert_eq!(db.config().mode, WriteMode::Batch);
    assert!(db.layout().db_dir.ends_with("warehouse"));
}
