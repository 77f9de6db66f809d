use std::sync::Arc;
use tracing::info;
use crate::core::config::Config;
use crate::core::error::Result;
use crate::core::types::{DatasetName, FileType};
use crate::mvcc::coordinator::LockCoordinator;
use crate::parallel::range_reader::ParallelRangeReader;
use crate::query::algebra::{BitmapCollection, SetAlgebra};
use crate::storage::header::SegmentSpec;
use crate::storage::layout::StorageLayout;
use crate::storage::segment::Segment;
use crate::writer::appender::SegmentAppender;
use crate::writer::session::{SessionConfig, WriteSession};

/// Entry point tying a storage directory to one lock coordinator and one
/// parallel reader.
///
/// Every session opened through the same `Database` shares its coordinator,
/// so they see each other's claims. Processes that need several databases
/// to share locks can pass a coordinator to `open_with_coordinator`.
pub struct Database {
    config: Config,

    layout: Arc<StorageLayout>,
    sessions: SessionConfig,

    coordinator: Arc<LockCoordinator>,
    reader: ParallelRangeReader,
}

impl Database {
    pub fn open(config: Config) -> Result<Self> {
        Self::open_with_coordinator(config, Arc::new(LockCoordinator::new()))
    }

    pub fn open_with_coordinator(
        config: Config,
        coordinator: Arc<LockCoordinator>,
    ) -> Result<Self> {
        config.validate()?;
        DatasetName::new(config.db_name.clone(), "_").validate()?;

        let layout = Arc::new(StorageLayout::new(config.storage_path.clone(), &config.db_name)?);
        let reader = ParallelRangeReader::from_config(&config)?;
        let sessions = SessionConfig::from(&config);

        info!(
            path = %layout.db_dir.display(),
            mode = ?config.mode,
            threads = config.max_parallel_read_threads,
            "opened database"
        );

        Ok(Self { config, layout, sessions, coordinator, reader })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    pub fn coordinator(&self) -> &Arc<LockCoordinator> {
        &self.coordinator
    }

    pub fn reader(&self) -> &ParallelRangeReader {
        &self.reader
    }

    pub fn names(&self, dataset: &str) -> DatasetName {
        DatasetName::new(self.config.db_name.clone(), dataset)
    }

    /// Create a fixed-width segment and open a write session on it.
    pub fn create_segment(
        &self,
        dataset: &str,
        spec: SegmentSpec,
        capacity: u32,
    ) -> Result<WriteSession> {
        let path = self.layout.segment_path(dataset, spec.file_type, spec.segment_no);
        let coordinator = self.coordinator.clone();
        WriteSession::create(path, dataset, spec, capacity, &self.sessions, coordinator)
    }

    pub fn open_session(
        &self,
        dataset: &str,
        file_type: FileType,
        segment_no: u32,
    ) -> Result<WriteSession> {
        let path = self.layout.segment_path(dataset, file_type, segment_no);
        WriteSession::open(path, dataset, &self.sessions, self.coordinator.clone())
    }

    /// Open a session with its own mode or retry budget.
    pub fn open_session_with(
        &self,
        dataset: &str,
        file_type: FileType,
        segment_no: u32,
        sessions: &SessionConfig,
    ) -> Result<WriteSession> {
        let path = self.layout.segment_path(dataset, file_type, segment_no);
        WriteSession::open(path, dataset, sessions, self.coordinator.clone())
    }

    pub fn create_appender(
        &self,
        dataset: &str,
        spec: SegmentSpec,
        capacity: u32,
    ) -> Result<SegmentAppender> {
        let path = self.layout.segment_path(dataset, spec.file_type, spec.segment_no);
        SegmentAppender::create(path, &self.names(dataset), spec, capacity)
    }

    pub fn open_appender(
        &self,
        dataset: &str,
        file_type: FileType,
        segment_no: u32,
    ) -> Result<SegmentAppender> {
        let path = self.layout.segment_path(dataset, file_type, segment_no);
        SegmentAppender::open(path, &self.names(dataset))
    }

    /// Open one segment for reading; the header is validated first.
    pub fn open_segment(
        &self,
        dataset: &str,
        file_type: FileType,
        segment_no: u32,
    ) -> Result<Segment> {
        let path = self.layout.segment_path(dataset, file_type, segment_no);
        Segment::open_for_read(path, &self.names(dataset))
    }

    /// Every segment of a dataset, in segment-number order.
    pub fn open_segments(&self, dataset: &str, file_type: FileType) -> Result<Vec<Segment>> {
        self.layout
            .find_segments(dataset, file_type)?
            .into_iter()
            .map(|segment_no| self.open_segment(dataset, file_type, segment_no))
            .collect()
    }

    /// Distribution of a dimension dataset, unioned across its segments and
    /// keyed by domain value. Empty values are left out.
    pub fn distribution(&self, dataset: &str, cardinality: u32) -> Result<BitmapCollection> {
        let segments = self.open_segments(dataset, FileType::Dimension)?;
        let per_file: Vec<BitmapCollection> = self
            .reader
            .read_distributions(&segments, cardinality)?
            .iter()
            .map(|bitmaps| SetAlgebra::from_distribution(bitmaps))
            .collect();
        Ok(SetAlgebra::union(&per_file))
    }

    /// Positions of a segment currently claimed by any session.
    pub fn locked_positions(&self, dataset: &str, segment_no: u32) -> Vec<u32> {
        let key = self.names(dataset).lock_key(segment_no);
        self.coordinator.snapshot_originals(&key).into_keys().collect()
    }
}
