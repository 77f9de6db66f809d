use std::fmt;
use serde::{Deserialize, Serialize};
use crate::core::error::{Error, Result};

/// Kind of dataset a segment file holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileType {
    Dimension,
    Fact,
    Unary,
    Link,
}

impl FileType {
    pub fn code(self) -> u8 {
        match self {
            FileType::Dimension => 1,
            FileType::Fact => 2,
            FileType::Unary => 3,
            FileType::Link => 4,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(FileType::Dimension),
            2 => Some(FileType::Fact),
            3 => Some(FileType::Unary),
            4 => Some(FileType::Link),
            _ => None,
        }
    }

    /// File extension used by the storage layout.
    pub fn extension(self) -> &'static str {
        match self {
            FileType::Dimension => "dim",
            FileType::Fact => "fct",
            FileType::Unary => "una",
            FileType::Link => "lnk",
        }
    }
}

/// On-disk encoding of one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Encoding {
    DimByte,
    DimShort,
    DimInt,

    Byte,
    Short,
    Int,
    Long,
    Float,
    Double,
    Decimal,
    Text,

    /// One i32 target record id per entry.
    Olap,
    /// u16 message type, i32 target id, u16 count.
    Document,

    OneToOne,
    /// Append-only (source, target) id pairs.
    OneToMany,
}

impl Encoding {
    pub fn code(self) -> u8 {
        match self {
            Encoding::DimByte => 0x01,
            Encoding::DimShort => 0x02,
            Encoding::DimInt => 0x03,
            Encoding::Byte => 0x11,
            Encoding::Short => 0x12,
            Encoding::Int => 0x13,
            Encoding::Long => 0x14,
            Encoding::Float => 0x15,
            Encoding::Double => 0x16,
            Encoding::Decimal => 0x17,
            Encoding::Text => 0x18,
            Encoding::Olap => 0x21,
            Encoding::Document => 0x22,
            Encoding::OneToOne => 0x31,
            Encoding::OneToMany => 0x32,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        let encoding = match code {
            0x01 => Encoding::DimByte,
            0x02 => Encoding::DimShort,
            0x03 => Encoding::DimInt,
            0x11 => Encoding::Byte,
            0x12 => Encoding::Short,
            0x13 => Encoding::Int,
            0x14 => Encoding::Long,
            0x15 => Encoding::Float,
            0x16 => Encoding::Double,
            0x17 => Encoding::Decimal,
            0x18 => Encoding::Text,
            0x21 => Encoding::Olap,
            0x22 => Encoding::Document,
            0x31 => Encoding::OneToOne,
            0x32 => Encoding::OneToMany,
            _ => return None,
        };
        Some(encoding)
    }

    pub fn file_type(self) -> FileType {
        match self {
            Encoding::DimByte | Encoding::DimShort | Encoding::DimInt => FileType::Dimension,
            Encoding::Olap | Encoding::Document => FileType::Unary,
            Encoding::OneToOne | Encoding::OneToMany => FileType::Link,
            _ => FileType::Fact,
        }
    }

    /// Scalar kind stored per record. Unary and one-to-many link records are
    /// composite and have no scalar kind.
    pub fn value_kind(self) -> Option<ValueKind> {
        match self {
            Encoding::DimByte | Encoding::Byte => Some(ValueKind::Byte),
            Encoding::DimShort | Encoding::Short => Some(ValueKind::Short),
            Encoding::DimInt | Encoding::Int | Encoding::OneToOne => Some(ValueKind::Int),
            Encoding::Long => Some(ValueKind::Long),
            Encoding::Float => Some(ValueKind::Float),
            Encoding::Double => Some(ValueKind::Double),
            Encoding::Decimal => Some(ValueKind::Decimal),
            Encoding::Text => Some(ValueKind::Text),
            Encoding::Olap | Encoding::Document | Encoding::OneToMany => None,
        }
    }

    /// (data length, decimal length) for fixed encodings; `None` for text,
    /// whose width is chosen per dataset.
    pub fn fixed_widths(self) -> Option<(u32, u16)> {
        match self {
            Encoding::DimByte | Encoding::Byte => Some((1, 0)),
            Encoding::DimShort | Encoding::Short => Some((2, 0)),
            Encoding::DimInt | Encoding::Int | Encoding::OneToOne => Some((4, 0)),
            Encoding::Float => Some((4, 0)),
            Encoding::Long | Encoding::Double => Some((8, 0)),
            Encoding::Decimal => Some((8, 1)),
            Encoding::Olap => Some((4, 0)),
            Encoding::Document | Encoding::OneToMany => Some((8, 0)),
            Encoding::Text => None,
        }
    }

    /// Unary and one-to-many link files grow by appending.
    pub fn is_append_only(self) -> bool {
        matches!(self, Encoding::Olap | Encoding::Document | Encoding::OneToMany)
    }
}

/// Closed set of scalar value kinds handled by the generic read/write engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    Byte,
    Short,
    Int,
    Long,
    Float,
    Double,
    Decimal,
    Text,
}

/// Longest text payload a record may carry.
pub const MAX_TEXT_BYTES: u32 = 40;

/// Largest decimal scale.
pub const MAX_DECIMAL_SCALE: u8 = 18;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Decimal { mantissa: i64, scale: u8 },
    Text(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn kind(&self) -> Option<ValueKind> {
        match self {
            Value::Null => None,
            Value::Byte(_) => Some(ValueKind::Byte),
            Value::Short(_) => Some(ValueKind::Short),
            Value::Int(_) => Some(ValueKind::Int),
            Value::Long(_) => Some(ValueKind::Long),
            Value::Float(_) => Some(ValueKind::Float),
            Value::Double(_) => Some(ValueKind::Double),
            Value::Decimal { .. } => Some(ValueKind::Decimal),
            Value::Text(_) => Some(ValueKind::Text),
        }
    }

    /// Integer view for integer-like kinds.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::Byte(v) => Some(v as i64),
            Value::Short(v) => Some(v as i64),
            Value::Int(v) => Some(v as i64),
            Value::Long(v) => Some(v),
            _ => None,
        }
    }

    /// Numeric view used by aggregation.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::Byte(v) => Some(v as f64),
            Value::Short(v) => Some(v as f64),
            Value::Int(v) => Some(v as f64),
            Value::Long(v) => Some(v as f64),
            Value::Float(v) => Some(v as f64),
            Value::Double(v) => Some(v),
            Value::Decimal { mantissa, scale } => Some(mantissa as f64 / 10f64.powi(scale as i32)),
            Value::Null | Value::Text(_) => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Byte(v) => write!(f, "{}", v),
            Value::Short(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::Long(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::Decimal { mantissa, scale } => {
                write!(f, "{}", *mantissa as f64 / 10f64.powi(*scale as i32))
            }
            Value::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<i8> for Value {
    fn from(v: i8) -> Self {
        Value::Byte(v)
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Value::Short(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Long(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

/// Database and dataset a segment belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatasetName {
    pub db: String,
    pub dataset: String,
}

impl DatasetName {
    pub fn new(db: impl Into<String>, dataset: impl Into<String>) -> Self {
        DatasetName {
            db: db.into(),
            dataset: dataset.into(),
        }
    }

    /// `"{db}|{dataset}"`, the string the name checksum is computed over.
    pub fn qualified(&self) -> String {
        format!("{}|{}", self.db, self.dataset)
    }

    /// Key the lock coordinator files a segment's positions under.
    pub fn lock_key(&self, segment_no: u32) -> String {
        format!("{}|{}#{}", self.db, self.dataset, segment_no)
    }

    pub fn validate(&self) -> Result<()> {
        if self.db.is_empty() || self.dataset.is_empty() {
            return Err(Error::validation("database and dataset names must not be empty"));
        }
        if self.db.contains('|') || self.dataset.contains('|') {
            return Err(Error::validation(format!(
                "names may not contain '|': {}",
                self.qualified()
            )));
        }
        Ok(())
    }
}

/// Half-open range of record positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordRange {
    pub start: u32,
    pub end: u32,
}

impl RecordRange {
    pub fn new(start: u32, end: u32) -> Self {
        RecordRange { start, end }
    }

    pub fn len(&self) -> u32 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Inclusive filter on target record ids stored in unary and link columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdFilter {
    pub low: u32,
    pub high: u32,
}

impl IdFilter {
    pub fn new(low: u32, high: u32) -> Self {
        IdFilter { low, high }
    }

    pub fn all() -> Self {
        IdFilter { low: 0, high: i32::MAX as u32 }
    }

    /// Spans every id an i32 column can hold.
    pub fn is_full(&self) -> bool {
        self.low == 0 && self.high >= i32::MAX as u32
    }

    pub fn contains(&self, id: u32) -> bool {
        id >= self.low && id <= self.high
    }
}
