use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};
use crate::core::config::{Config, WriteMode};
use crate::core::error::{Error, Result};
use crate::core::types::{DatasetName, Encoding, FileType, Value, ValueKind};
use crate::mvcc::coordinator::{Claim, LockCoordinator, SessionId};
use crate::storage::codec::ValueCodec;
use crate::storage::header::SegmentSpec;
use crate::storage::segment::Segment;

/// Write session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Inactive,
    Active,
    Complete,
    Failed,
}

/// Bounded wait for positions held by other sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub limit_millis: u64,
    pub increment_millis: u64,
}

impl RetryPolicy {
    pub fn new(limit_millis: u64, increment_millis: u64) -> Self {
        RetryPolicy { limit_millis, increment_millis }
    }

    /// Claim attempts made before giving up; at least one.
    pub fn attempts(&self) -> u64 {
        (self.limit_millis / self.increment_millis.max(1)).max(1)
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub db_name: String,
    pub mode: WriteMode,
    pub retry: RetryPolicy,
}

impl SessionConfig {
    pub fn new(db_name: impl Into<String>, mode: WriteMode) -> Self {
        let defaults = Config::default();
        SessionConfig {
            db_name: db_name.into(),
            mode,
            retry: RetryPolicy::new(defaults.retry_limit_millis, defaults.retry_increment_millis),
        }
    }

    pub fn with_retry(mut self, limit_millis: u64, increment_millis: u64) -> Self {
        self.retry = RetryPolicy::new(limit_millis, increment_millis);
        self
    }
}

impl From<&Config> for SessionConfig {
    fn from(config: &Config) -> Self {
        SessionConfig {
            db_name: config.db_name.clone(),
            mode: config.mode,
            retry: RetryPolicy::new(config.retry_limit_millis, config.retry_increment_millis),
        }
    }
}

/// Result of staging a batch of positions.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome {
    /// Every position was staged.
    Staged(Vec<u32>),
    /// Positions held elsewhere were skipped and will not be written.
    Partial {
        staged: Vec<u32>,
        skipped: BTreeMap<u32, Value>,
    },
    /// Positions held elsewhere wait in the retry queue for
    /// `write_to_segment`.
    Deferred { staged: Vec<u32>, queued: Vec<u32> },
}

impl StageOutcome {
    pub fn staged(&self) -> &[u32] {
        match self {
            StageOutcome::Staged(staged) => staged,
            StageOutcome::Partial { staged, .. } => staged,
            StageOutcome::Deferred { staged, .. } => staged,
        }
    }

    /// Positions not staged by this call.
    pub fn unstaged(&self) -> Vec<u32> {
        match self {
            StageOutcome::Staged(_) => Vec::new(),
            StageOutcome::Partial { skipped, .. } => skipped.keys().copied().collect(),
            StageOutcome::Deferred { queued, .. } => queued.clone(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.unstaged().is_empty()
    }
}

/// A writer's unit of work against one fixed-width segment.
///
/// Values are validated and staged by `set_write_positions`, written to the
/// mapped file by `write_to_segment`, and made durable by `commit` (or undone
/// and made durable by `rollback`). In online mode every staged position is
/// claimed in the shared `LockCoordinator` until commit or rollback.
///
/// Errors never trigger an automatic rollback; a failed session keeps its
/// claims until the caller settles it.
pub struct WriteSession {
    id: SessionId,
    names: DatasetName,
    key: String,
    mode: WriteMode,
    retry: RetryPolicy,
    coordinator: Arc<LockCoordinator>,

    segment: Option<Segment>,
    kind: ValueKind,
    data_length: u32,
    non_negative: bool,
    record_count: u32,

    staged: Vec<(u32, Value)>,
    claimed: BTreeSet<u32>,
    written: BTreeSet<u32>,
    retry_queue: VecDeque<(u32, Value)>,
    batch_originals: BTreeMap<u32, Value>,
    dirty: bool,
    status: SessionStatus,
}

impl WriteSession {
    /// Open a session on an existing segment.
    pub fn open<P: AsRef<Path>>(
        path: P,
        dataset: &str,
        config: &SessionConfig,
        coordinator: Arc<LockCoordinator>,
    ) -> Result<Self> {
        let names = DatasetName::new(config.db_name.clone(), dataset);
        let segment = Segment::open_for_write(path, &names)?;
        Self::with_segment(segment, config, coordinator)
    }

    /// Create a new segment and open a session on it.
    pub fn create<P: AsRef<Path>>(
        path: P,
        dataset: &str,
        spec: SegmentSpec,
        capacity: u32,
        config: &SessionConfig,
        coordinator: Arc<LockCoordinator>,
    ) -> Result<Self> {
        if spec.value_kind().is_none() {
            return Err(Error::validation(format!(
                "{:?} segments are append-only, use SegmentAppender",
                spec.encoding
            )));
        }
        let names = DatasetName::new(config.db_name.clone(), dataset);
        let segment = Segment::create(path, &names, spec, capacity)?;
        Self::with_segment(segment, config, coordinator)
    }

    fn with_segment(
        segment: Segment,
        config: &SessionConfig,
        coordinator: Arc<LockCoordinator>,
    ) -> Result<Self> {
        let kind = segment.value_kind()?;
        let id = coordinator.next_session_id();
        debug!(
            session = id.0,
            path = %segment.path().display(),
            mode = ?config.mode,
            records = segment.record_count(),
            "opened write session"
        );

        Ok(WriteSession {
            id,
            names: segment.names().clone(),
            key: segment.lock_key(),
            mode: config.mode,
            retry: config.retry,
            coordinator,
            kind,
            data_length: segment.spec().data_length,
            non_negative: segment.file_type() == FileType::Dimension
                || segment.encoding() == Encoding::OneToOne,
            record_count: segment.record_count(),
            segment: Some(segment),
            staged: Vec::new(),
            claimed: BTreeSet::new(),
            written: BTreeSet::new(),
            retry_queue: VecDeque::new(),
            batch_originals: BTreeMap::new(),
            dirty: false,
            status: SessionStatus::Inactive,
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn mode(&self) -> WriteMode {
        self.mode
    }

    pub fn names(&self) -> &DatasetName {
        &self.names
    }

    pub fn lock_key(&self) -> &str {
        &self.key
    }

    pub fn record_count(&self) -> u32 {
        self.record_count
    }

    pub fn claimed_positions(&self) -> Vec<u32> {
        self.claimed.iter().copied().collect()
    }

    pub fn written_positions(&self) -> Vec<u32> {
        self.written.iter().copied().collect()
    }

    pub fn queued_positions(&self) -> Vec<u32> {
        self.retry_queue.iter().map(|(p, _)| *p).collect()
    }

    /// Current value through this session's mapping, including its own
    /// uncommitted writes.
    pub fn read_value(&self, position: u32) -> Result<Value> {
        self.segment()?.read_value(position)
    }

    /// Validate and stage `values` for `positions`.
    ///
    /// In online mode each position is claimed; a position held by another
    /// session is queued when `retry` is set, skipped when only
    /// `allow_partial` is set, and otherwise fails the whole call with
    /// `LockConflict` after releasing the claims this call made.
    pub fn set_write_positions(
        &mut self,
        positions: &[u32],
        values: &[Value],
        allow_partial: bool,
        retry: bool,
    ) -> Result<StageOutcome> {
        self.ensure_staging()?;
        self.validate(positions, values, false)?;
        self.stage(positions, values, allow_partial, retry)
    }

    /// Stage the null value for `positions`.
    pub fn delete_records(
        &mut self,
        positions: &[u32],
        allow_partial: bool,
        retry: bool,
    ) -> Result<StageOutcome> {
        self.ensure_staging()?;
        let nulls = vec![Value::Null; positions.len()];
        self.validate(positions, &nulls, true)?;
        self.stage(positions, &nulls, allow_partial, retry)
    }

    fn stage(
        &mut self,
        positions: &[u32],
        values: &[Value],
        allow_partial: bool,
        retry: bool,
    ) -> Result<StageOutcome> {
        let outcome = match self.mode {
            WriteMode::Batch => self.stage_batch(positions, values),
            WriteMode::Online => self.stage_online(positions, values, allow_partial, retry),
        };
        if outcome.is_ok() {
            self.status = SessionStatus::Active;
        }
        outcome
    }

    fn stage_batch(&mut self, positions: &[u32], values: &[Value]) -> Result<StageOutcome> {
        let segment = self.segment.as_ref().ok_or_else(closed)?;
        let mut originals = Vec::new();
        for &position in positions {
            if !self.batch_originals.contains_key(&position) {
                originals.push((position, segment.read_value(position)?));
            }
        }
        self.batch_originals.extend(originals);
        self.staged
            .extend(positions.iter().copied().zip(values.iter().cloned()));
        Ok(StageOutcome::Staged(positions.to_vec()))
    }

    fn stage_online(
        &mut self,
        positions: &[u32],
        values: &[Value],
        allow_partial: bool,
        retry: bool,
    ) -> Result<StageOutcome> {
        let mut fresh = Vec::new();
        let mut staged = Vec::new();
        let mut queued = Vec::new();
        let mut skipped = BTreeMap::new();
        let mut conflicts: Vec<u32> = Vec::new();

        {
            let segment = self.segment.as_ref().ok_or_else(closed)?;
            for (&position, value) in positions.iter().zip(values) {
                let claim = self.coordinator.try_claim(
                    &self.key,
                    self.id,
                    position,
                    value.clone(),
                    |p| segment.read_value(p),
                );
                match claim {
                    Ok(Claim::Claimed { fresh: is_fresh }) => {
                        if is_fresh {
                            fresh.push(position);
                        }
                        staged.push((position, value.clone()));
                    }
                    Ok(Claim::AlreadyLocked { owner }) => {
                        debug!(
                            session = self.id.0,
                            position,
                            holder = owner.0,
                            "position already locked"
                        );
                        if retry {
                            queued.push((position, value.clone()));
                        } else if allow_partial {
                            skipped.insert(position, value.clone());
                        } else if !conflicts.contains(&position) {
                            conflicts.push(position);
                        }
                    }
                    Err(e) => {
                        self.coordinator.release(&self.key, self.id, &fresh);
                        self.status = SessionStatus::Failed;
                        return Err(e);
                    }
                }
            }
        }

        if !conflicts.is_empty() {
            self.coordinator.release(&self.key, self.id, &fresh);
            warn!(session = self.id.0, key = %self.key, ?conflicts, "lock conflict");
            return Err(Error::lock_conflict(conflicts));
        }

        // Re-touched positions publish their new value only once nothing aborts.
        self.coordinator.update_pending(&self.key, self.id, &staged);
        self.claimed.extend(fresh);
        let staged_positions: Vec<u32> = staged.iter().map(|(p, _)| *p).collect();
        self.staged.extend(staged);

        if !queued.is_empty() {
            let queued_positions = queued.iter().map(|(p, _)| *p).collect();
            self.retry_queue.extend(queued);
            return Ok(StageOutcome::Deferred {
                staged: staged_positions,
                queued: queued_positions,
            });
        }
        if !skipped.is_empty() {
            return Ok(StageOutcome::Partial { staged: staged_positions, skipped });
        }
        Ok(StageOutcome::Staged(staged_positions))
    }

    /// Apply staged values to the mapped segment in input order, then drain
    /// the retry queue. Returns the positions written by this call.
    pub fn write_to_segment(&mut self, auto_commit: bool) -> Result<Vec<u32>> {
        self.ensure_staging()?;
        self.status = SessionStatus::Active;

        let mut written = Vec::with_capacity(self.staged.len());
        let staged = std::mem::take(&mut self.staged);
        {
            let segment = self.segment.as_mut().ok_or_else(closed)?;
            for (position, value) in &staged {
                if let Err(e) = segment.write_value(*position, value) {
                    self.status = SessionStatus::Failed;
                    return Err(e);
                }
                written.push(*position);
            }
        }
        self.dirty |= !written.is_empty();
        self.written.extend(written.iter().copied());

        if !self.retry_queue.is_empty() {
            self.drain_retry_queue(&mut written)?;
        }

        debug!(session = self.id.0, written = written.len(), "wrote staged values");

        if auto_commit {
            self.commit()?;
        }
        Ok(written)
    }

    fn drain_retry_queue(&mut self, written: &mut Vec<u32>) -> Result<()> {
        let attempts = self.retry.attempts();
        let pause = Duration::from_millis(self.retry.increment_millis);
        let budget = self.retry.limit_millis;
        let Self {
            id,
            key,
            coordinator,
            segment,
            retry_queue,
            claimed,
            written: session_written,
            dirty,
            status,
            ..
        } = self;
        let segment = segment.as_mut().ok_or_else(closed)?;

        for attempt in 1..=attempts {
            thread::sleep(pause);

            let mut still_locked = VecDeque::with_capacity(retry_queue.len());
            while let Some((position, value)) = retry_queue.pop_front() {
                let claim = coordinator.try_claim(key, *id, position, value.clone(), |p| {
                    segment.read_value(p)
                });
                let outcome = claim.and_then(|claim| match claim {
                    Claim::Claimed { fresh } => {
                        if fresh {
                            claimed.insert(position);
                        } else {
                            coordinator.update_pending(key, *id, &[(position, value.clone())]);
                        }
                        segment.write_value(position, &value).map(|_| true)
                    }
                    Claim::AlreadyLocked { .. } => Ok(false),
                });
                match outcome {
                    Ok(true) => {
                        *dirty = true;
                        session_written.insert(position);
                        written.push(position);
                    }
                    Ok(false) => still_locked.push_back((position, value)),
                    Err(e) => {
                        still_locked.push_back((position, value));
                        still_locked.extend(retry_queue.drain(..));
                        *retry_queue = still_locked;
                        *status = SessionStatus::Failed;
                        return Err(e);
                    }
                }
            }
            *retry_queue = still_locked;

            if retry_queue.is_empty() {
                debug!(session = id.0, attempt, "retry queue drained");
                return Ok(());
            }
        }

        let outstanding: Vec<u32> = retry_queue.iter().map(|(p, _)| *p).collect();
        *status = SessionStatus::Failed;
        warn!(session = id.0, key = %key, ?outstanding, "retry budget exhausted");
        Err(Error::session_timeout(outstanding, budget))
    }

    /// Flush the mapping, restamp the header, unmap and release every claim.
    pub fn commit(&mut self) -> Result<()> {
        self.ensure_settleable()?;
        if self.status == SessionStatus::Inactive {
            self.status = SessionStatus::Active;
        }

        if self.dirty {
            let coordinator = self.coordinator.clone();
            let _serialized = coordinator.commit_guard();
            let segment = self.segment.as_mut().ok_or_else(closed)?;
            if let Err(e) = segment.commit_stamp() {
                self.status = SessionStatus::Failed;
                return Err(e);
            }
        }
        self.segment = None;

        let claimed: Vec<u32> = self.claimed.iter().copied().collect();
        self.coordinator.release(&self.key, self.id, &claimed);
        info!(
            session = self.id.0,
            key = %self.key,
            written = self.written.len(),
            released = claimed.len(),
            "committed session"
        );

        self.claimed.clear();
        self.staged.clear();
        self.retry_queue.clear();
        self.batch_originals.clear();
        self.dirty = false;
        if self.status != SessionStatus::Failed {
            self.status = SessionStatus::Complete;
        }
        Ok(())
    }

    /// Restore the original value of every position this session claimed
    /// (or, in batch mode, staged), then commit the restored state.
    pub fn rollback(&mut self) -> Result<()> {
        self.ensure_settleable()?;

        let originals = match self.mode {
            WriteMode::Online => self.coordinator.originals_owned_by(&self.key, self.id),
            WriteMode::Batch => self.batch_originals.clone(),
        };

        {
            let segment = self.segment.as_mut().ok_or_else(closed)?;
            for (position, original) in &originals {
                if let Err(e) = segment.write_value(*position, original) {
                    self.status = SessionStatus::Failed;
                    return Err(e);
                }
            }
        }
        self.dirty |= !originals.is_empty();
        info!(
            session = self.id.0,
            key = %self.key,
            restored = originals.len(),
            "rolled back session"
        );

        self.staged.clear();
        self.written.clear();
        self.commit()
    }

    fn segment(&self) -> Result<&Segment> {
        self.segment.as_ref().ok_or_else(closed)
    }

    fn ensure_staging(&self) -> Result<()> {
        match self.status {
            SessionStatus::Inactive | SessionStatus::Active => Ok(()),
            status => Err(Error::invalid_state(format!(
                "session {} is {:?}",
                self.id.0, status
            ))),
        }
    }

    fn ensure_settleable(&self) -> Result<()> {
        if self.status == SessionStatus::Complete || self.segment.is_none() {
            return Err(Error::invalid_state(format!(
                "session {} is already settled",
                self.id.0
            )));
        }
        Ok(())
    }

    fn validate(&self, positions: &[u32], values: &[Value], nulls: bool) -> Result<()> {
        if positions.len() != values.len() {
            return Err(Error::validation(format!(
                "{} positions but {} values",
                positions.len(),
                values.len()
            )));
        }
        for &position in positions {
            if position >= self.record_count {
                return Err(Error::validation(format!(
                    "position {} outside [0, {})",
                    position, self.record_count
                )));
            }
        }
        if !nulls {
            for value in values {
                ValueCodec::check_domain(self.kind, value, self.data_length, self.non_negative)?;
            }
        }
        Ok(())
    }
}

fn closed() -> Error {
    Error::invalid_state("session mapping is closed")
}
