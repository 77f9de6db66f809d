use std::fs;
use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};
use crate::core::error::{Error, Result};

/// How a write session stages values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteMode {
    /// Unlocked bulk population of a fresh segment.
    Batch,
    /// Per-record optimistic locking through the lock coordinator.
    Online,
}

/// How range readers are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionMode {
    /// At most `max_parallel_read_threads` ranges in flight.
    Bounded,
    /// One thread per range, all at once.
    Unbounded,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage_path: PathBuf,
    /// Logical namespace; part of every segment's name checksum.
    pub db_name: String,
    pub mode: WriteMode,

    pub retry_limit_millis: u64,
    pub retry_increment_millis: u64,

    pub max_parallel_read_threads: usize,
    pub min_records_per_range: u32,
    pub execution_mode: ExecutionMode,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            storage_path: PathBuf::from("./data"),
            db_name: "default".to_string(),
            mode: WriteMode::Online,

            retry_limit_millis: 5_000,                 // give up after 5s
            retry_increment_millis: 50,                // re-check every 50ms

            max_parallel_read_threads: num_cpus::get(),
            min_records_per_range: 100_000,            // don't split below 100k records
            execution_mode: ExecutionMode::Bounded,
        }
    }
}

impl Config {
    pub fn new(storage_path: impl Into<PathBuf>, db_name: impl Into<String>) -> Self {
        Config {
            storage_path: storage_path.into(),
            db_name: db_name.into(),
            ..Config::default()
        }
    }

    /// Load from a JSON file. Missing fields fall back to defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = fs::read(path)?;
        let config: Config = serde_json::from_slice(&data)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let data = serde_json::to_vec_pretty(self)?;
        fs::write(path, data)?;
        Ok(())
    }

    /// Apply `STRATA_*` overrides from the process environment.
    pub fn with_env(self) -> Result<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply `STRATA_*` overrides from an arbitrary lookup.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("STRATA_STORAGE_PATH") {
            self.storage_path = PathBuf::from(path);
        }
        if let Some(name) = lookup("STRATA_DB_NAME") {
            self.db_name = name;
        }
        if let Some(mode) = lookup("STRATA_MODE") {
            self.mode = match mode.to_ascii_lowercase().as_str() {
                "batch" => WriteMode::Batch,
                "online" => WriteMode::Online,
                other => return Err(Error::validation(format!("unknown write mode '{}'", other))),
            };
        }
        if let Some(value) = lookup("STRATA_RETRY_LIMIT_MILLIS") {
            self.retry_limit_millis = parse_number("STRATA_RETRY_LIMIT_MILLIS", &value)?;
        }
        if let Some(value) = lookup("STRATA_RETRY_INCREMENT_MILLIS") {
            self.retry_increment_millis = parse_number("STRATA_RETRY_INCREMENT_MILLIS", &value)?;
        }
        if let Some(value) = lookup("STRATA_MAX_PARALLEL_READ_THREADS") {
            self.max_parallel_read_threads =
                parse_number("STRATA_MAX_PARALLEL_READ_THREADS", &value)?;
        }
        if let Some(value) = lookup("STRATA_MIN_RECORDS_PER_RANGE") {
            self.min_records_per_range = parse_number("STRATA_MIN_RECORDS_PER_RANGE", &value)?;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.db_name.is_empty() {
            return Err(Error::validation("db_name must not be empty"));
        }
        if self.retry_increment_millis == 0 {
            return Err(Error::validation("retry_increment_millis must be positive"));
        }
        if self.max_parallel_read_threads == 0 {
            return Err(Error::validation("max_parallel_read_threads must be positive"));
        }
        if self.min_records_per_range == 0 {
            return Err(Error::validation("min_records_per_range must be positive"));
        }
        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::validation(format!("{} is not a number: '{}'", key, value)))
}
