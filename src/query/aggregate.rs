use std::collections::BTreeMap;
use rayon::prelude::*;
use roaring::RoaringBitmap;
use crate::core::error::{Error, Result};
use crate::core::types::ValueKind;
use crate::query::algebra::BitmapCollection;
use crate::storage::codec::ValueCodec;
use crate::storage::segment::Segment;

/// Summary of a numeric column over a set of positions. Nulls are not
/// counted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aggregate {
    pub count: u64,
    pub sum: f64,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl Aggregate {
    pub fn empty() -> Self {
        Aggregate { count: 0, sum: 0.0, min: None, max: None }
    }

    pub fn add(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.min = Some(self.min.map_or(value, |m| m.min(value)));
        self.max = Some(self.max.map_or(value, |m| m.max(value)));
    }

    pub fn merge(mut self, other: Aggregate) -> Aggregate {
        self.count += other.count;
        self.sum += other.sum;
        self.min = match (self.min, other.min) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.max = match (self.max, other.max) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        self
    }

    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }

    /// Aggregate `segment` over the positions in `positions`.
    pub fn over(segment: &Segment, positions: &RoaringBitmap) -> Result<Aggregate> {
        let kind = numeric_kind(segment)?;
        let mut aggregate = Aggregate::empty();
        for position in positions {
            if let Some(value) = ValueCodec::decode(kind, segment.read_at(position)?).as_f64() {
                aggregate.add(value);
            }
        }
        Ok(aggregate)
    }

    /// One aggregate per group, computed in parallel.
    pub fn over_groups(
        segment: &Segment,
        groups: &BitmapCollection,
    ) -> Result<BTreeMap<String, Aggregate>> {
        numeric_kind(segment)?;
        groups
            .par_iter()
            .map(|(key, positions)| Ok((key.clone(), Aggregate::over(segment, positions)?)))
            .collect()
    }
}

fn numeric_kind(segment: &Segment) -> Result<ValueKind> {
    match segment.value_kind()? {
        ValueKind::Text => Err(Error::validation(format!(
            "{} holds text, aggregates need numbers",
            segment.path().display()
        ))),
        kind => Ok(kind),
    }
}
