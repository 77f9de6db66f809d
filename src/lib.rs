pub mod core;
pub mod storage;
pub mod mmap;
pub mod mvcc;
pub mod writer;
pub mod index;
pub mod query;
pub mod parallel;

pub use crate::core::config::{Config, ExecutionMode, WriteMode};
pub use crate::core::database::Database;
pub use crate::core::error::{Error, ErrorKind, Result};
pub use crate::core::types::{
    DatasetName, Encoding, FileType, IdFilter, RecordRange, Value, ValueKind,
};

/*
┌──────────────────────────────── STRATA LAYERS ────────────────────────────────┐
│                                                                               │
│  Database (core::database)                                                    │
│  • config: Config            • layout: StorageLayout                          │
│  • coordinator: Arc<LockCoordinator>   • reader: ParallelRangeReader          │
│                                                                               │
│  WRITE PATH                              READ PATH                            │
│  WriteSession ── claims ──► LockCoordinator                                   │
│      │                                   ParallelRangeReader                  │
│      │ write_value / commit_stamp            │ partition [0, count)           │
│      ▼                                       ▼                                │
│  Segment (storage::segment) ◄──────── BitmapBuilder (index::distribution)     │
│  • HeaderCodec: 60/64-byte header            │                                │
│  • ValueCodec: null sentinels                ▼                                │
│  • MmapFile: mapped records           SetAlgebra / Aggregate (query)          │
│                                                                               │
│  SegmentAppender: unary and one-to-many link files, append then commit        │
└───────────────────────────────────────────────────────────────────────────────┘
*/
