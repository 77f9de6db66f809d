use std::fs;
use std::path::PathBuf;
use crate::core::error::Result;
use crate::core::types::FileType;

/// Directory structure for segment files
#[derive(Debug, Clone)]
pub struct StorageLayout {
    pub base_dir: PathBuf,      // Root directory
    pub db_dir: PathBuf,        // One directory per database name
}

impl StorageLayout {
    pub fn new(base_dir: PathBuf, db_name: &str) -> Result<Self> {
        let db_dir = base_dir.join(db_name);
        fs::create_dir_all(&db_dir)?;

        Ok(StorageLayout { base_dir, db_dir })
    }

    /// `{db_dir}/{dataset}_{segment:05}.{ext}`
    pub fn segment_path(&self, dataset: &str, file_type: FileType, segment_no: u32) -> PathBuf {
        self.db_dir
            .join(format!("{}_{:05}.{}", dataset, segment_no, file_type.extension()))
    }

    /// Segment numbers present on disk for a dataset, ascending.
    pub fn find_segments(&self, dataset: &str, file_type: FileType) -> Result<Vec<u32>> {
        let mut segments = Vec::new();
        let prefix = format!("{}_", dataset);

        if self.db_dir.exists() {
            for entry in fs::read_dir(&self.db_dir)? {
                let path = entry?.path();
                if path.extension().and_then(|s| s.to_str()) != Some(file_type.extension()) {
                    continue;
                }
                // Format: {dataset}_00000.ext
                let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };
                if let Some(number) = stem.strip_prefix(&prefix) {
                    if number.len() == 5 {
                        if let Ok(segment_no) = number.parse::<u32>() {
                            segments.push(segment_no);
                        }
                    }
                }
            }
        }

        segments.sort();
        Ok(segments)
    }
}
