use std::sync::Arc;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use roaring::RoaringBitmap;
use tracing::debug;
use crate::core::config::{Config, ExecutionMode};
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{IdFilter, RecordRange};
use crate::index::distribution::{BitmapBuilder, DocumentCount};
use crate::storage::segment::Segment;

/// Runs bitmap builders over disjoint record ranges in parallel.
///
/// Each range task fills a private result; results are OR-merged once every
/// task has finished. Both execution modes block until all tasks complete.
pub struct ParallelRangeReader {
    max_threads: usize,
    min_records_per_range: u32,
    mode: ExecutionMode,
    pool: Option<Arc<ThreadPool>>,
}

impl ParallelRangeReader {
    pub fn new(
        max_threads: usize,
        min_records_per_range: u32,
        mode: ExecutionMode,
    ) -> Result<Self> {
        if max_threads == 0 || min_records_per_range == 0 {
            return Err(Error::validation(
                "parallel reads need at least one thread and one record per range",
            ));
        }
        let pool = match mode {
            ExecutionMode::Bounded => Some(Arc::new(
                ThreadPoolBuilder::new()
                    .num_threads(max_threads)
                    .thread_name(|i| format!("strata-read-{}", i))
                    .build()?,
            )),
            ExecutionMode::Unbounded => None,
        };
        Ok(ParallelRangeReader { max_threads, min_records_per_range, mode, pool })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            config.max_parallel_read_threads,
            config.min_records_per_range,
            config.execution_mode,
        )
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Split `[0, record_count)` into at most `max_threads` near-equal
    /// ranges. No range is shorter than `min_records_per_range` unless the
    /// whole segment is.
    pub fn partition(&self, record_count: u32) -> Vec<RecordRange> {
        if record_count == 0 {
            return Vec::new();
        }
        let by_floor = (record_count / self.min_records_per_range).max(1) as usize;
        let parts = by_floor.min(self.max_threads) as u32;
        let base = record_count / parts;
        let extra = record_count % parts;

        let mut ranges = Vec::with_capacity(parts as usize);
        let mut start = 0;
        for i in 0..parts {
            let len = base + u32::from(i < extra);
            ranges.push(RecordRange::new(start, start + len));
            start += len;
        }
        ranges
    }

    pub fn read_distribution(
        &self,
        segment: &Segment,
        cardinality: u32,
    ) -> Result<Vec<RoaringBitmap>> {
        let mut results = self.read_distributions(std::slice::from_ref(segment), cardinality)?;
        Ok(results.pop().unwrap_or_default())
    }

    /// One distribution per segment. Ranges of every file share one run.
    pub fn read_distributions(
        &self,
        segments: &[Segment],
        cardinality: u32,
    ) -> Result<Vec<Vec<RoaringBitmap>>> {
        let jobs = self.jobs(segments);
        let partials = self.run(&jobs, |(file, range)| {
            BitmapBuilder::build_distribution_range(&segments[*file], cardinality, *range)
        })?;

        let mut merged = vec![vec![RoaringBitmap::new(); cardinality as usize + 1]; segments.len()];
        for ((file, _), partial) in jobs.iter().zip(partials) {
            for (into, from) in merged[*file].iter_mut().zip(partial) {
                *into |= from;
            }
        }
        Ok(merged)
    }

    pub fn read_unary(&self, segment: &Segment, filter: IdFilter) -> Result<RoaringBitmap> {
        let mut results = self.read_unaries(std::slice::from_ref(segment), filter)?;
        Ok(results.pop().unwrap_or_default())
    }

    pub fn read_unaries(
        &self,
        segments: &[Segment],
        filter: IdFilter,
    ) -> Result<Vec<RoaringBitmap>> {
        let jobs = self.jobs(segments);
        let partials = self.run(&jobs, |(file, range)| {
            BitmapBuilder::build_unary_bitmap_range(&segments[*file], filter, *range)
        })?;

        let mut merged = vec![RoaringBitmap::new(); segments.len()];
        for ((file, _), partial) in jobs.iter().zip(partials) {
            merged[*file] |= partial;
        }
        Ok(merged)
    }

    /// Target-id bitmap and entries of a document segment. Entries keep file
    /// order.
    pub fn read_documents(
        &self,
        segment: &Segment,
        filter: IdFilter,
    ) -> Result<(RoaringBitmap, Vec<DocumentCount>)> {
        let jobs = self.jobs(std::slice::from_ref(segment));
        let partials = self.run(&jobs, |(_, range)| {
            BitmapBuilder::build_document_bitmap_and_counts_range(segment, filter, *range)
        })?;

        let mut bitmap = RoaringBitmap::new();
        let mut counts = Vec::new();
        for (partial_bitmap, partial_counts) in partials {
            bitmap |= partial_bitmap;
            counts.extend(partial_counts);
        }
        Ok((bitmap, counts))
    }

    pub fn read_value_filter(
        &self,
        segment: &Segment,
        min: f64,
        max: f64,
    ) -> Result<RoaringBitmap> {
        let jobs = self.jobs(std::slice::from_ref(segment));
        let partials = self.run(&jobs, |(_, range)| {
            BitmapBuilder::build_value_filter_range(segment, min, max, *range)
        })?;
        Ok(partials.into_iter().fold(RoaringBitmap::new(), |acc, b| acc | b))
    }

    fn jobs(&self, segments: &[Segment]) -> Vec<(usize, RecordRange)> {
        let jobs: Vec<(usize, RecordRange)> = segments
            .iter()
            .enumerate()
            .flat_map(|(file, segment)| {
                self.partition(segment.record_count())
                    .into_iter()
                    .map(move |range| (file, range))
            })
            .collect();
        debug!(
            files = segments.len(),
            ranges = jobs.len(),
            mode = ?self.mode,
            "partitioned parallel read"
        );
        jobs
    }

    /// Run `task` over every job and return the results in job order.
    fn run<J, T, F>(&self, jobs: &[J], task: F) -> Result<Vec<T>>
    where
        J: Sync,
        T: Send,
        F: Fn(&J) -> Result<T> + Sync,
    {
        match &self.pool {
            Some(pool) => pool.install(|| jobs.par_iter().map(&task).collect()),
            None => {
                let task = &task;
                crossbeam::scope(|scope| {
                    let handles: Vec<_> = jobs
                        .iter()
                        .map(|job| scope.spawn(move |_| task(job)))
                        .collect();
                    handles
                        .into_iter()
                        .map(|handle| handle.join().unwrap_or_else(|_| Err(range_panicked())))
                        .collect::<Result<Vec<T>>>()
                })
                .unwrap_or_else(|_| Err(range_panicked()))
            }
        }
    }
}

fn range_panicked() -> Error {
    Error::new(ErrorKind::Internal, "range reader thread panicked".to_string())
}
