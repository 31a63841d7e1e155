//! Fractional sort orders.
//!
//! Orders are real numbers so a block can be placed between two neighbours
//! without renumbering anything else. Bulk assignment steps by [`SortOrder::STEP`].

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SortOrder(f64);

impl SortOrder {
    pub const STEP: f64 = 1.0;
    pub const ZERO: SortOrder = SortOrder(0.0);

    pub fn new(value: f64) -> Self {
        Self(value)
    }

    pub fn value(self) -> f64 {
        self.0
    }

    /// The order `steps` bulk steps after this one.
    pub fn step(self, steps: usize) -> Self {
        Self(self.0 + Self::STEP * steps as f64)
    }

    pub fn offset(self, by: f64) -> Self {
        Self(self.0 + by)
    }

    /// Midpoint strictly between `low` and `high`, or `None` once the gap is
    /// too small to represent.
    pub fn between(low: SortOrder, high: SortOrder) -> Option<SortOrder> {
        if low >= high {
            return None;
        }
        let mid = low.0 + (high.0 - low.0) / 2.0;
        if mid > low.0 && mid < high.0 {
            Some(SortOrder(mid))
        } else {
            None
        }
    }

    /// The `index`-th of `count` evenly spaced orders strictly inside `(low, high)`.
    pub fn spread(low: SortOrder, high: SortOrder, index: usize, count: usize) -> SortOrder {
        let fraction = (index + 1) as f64 / (count + 1) as f64;
        SortOrder(low.0 + (high.0 - low.0) * fraction)
    }
}

impl PartialEq for SortOrder {
    fn eq(&self, other: &Self) -> bool {
        self.0.total_cmp(&other.0) == Ordering::Equal
    }
}

impl Eq for SortOrder {}

impl PartialOrd for SortOrder {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SortOrder {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl Hash for SortOrder {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state);
    }
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<f64> for SortOrder {
    fn from(value: f64) -> Self {
        Self(value)
    }
}

/// Half-open `[start, end)` range of orders. An absent end means document end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderWindow {
    pub start: SortOrder,
    pub end: Option<SortOrder>,
}

impl OrderWindow {
    pub fn new(start: SortOrder, end: Option<SortOrder>) -> Self {
        Self { start, end }
    }

    pub fn unbounded() -> Self {
        Self {
            start: SortOrder::new(f64::NEG_INFINITY),
            end: None,
        }
    }

    pub fn contains(&self, order: SortOrder) -> bool {
        order >= self.start && self.end.is_none_or(|end| order < end)
    }
}
