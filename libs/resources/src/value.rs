//! Resource value shapes and their per-shape arithmetic.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ResourceError;

/// A closed integer interval, `begin..=end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Range {
    pub begin: u64,
    pub end: u64,
}

impl Range {
    pub fn new(begin: u64, end: u64) -> Self {
        debug_assert!(begin <= end, "range begin must not exceed end");
        Self { begin, end }
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.begin, self.end)
    }
}

/// The value of a named resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    /// A non-negative real quantity.
    Scalar(f64),
    /// A union of closed integer intervals, kept sorted and coalesced.
    Ranges(Vec<Range>),
    /// Labelled items.
    Set(BTreeSet<String>),
}

impl Value {
    /// Adds `other` into `self`. Mismatched shapes are a programmer error:
    /// the master never changes the shape of a named resource.
    pub(crate) fn add_in_place(&mut self, other: &Value) {
        match (self, other) {
            (Value::Scalar(a), Value::Scalar(b)) => *a += b,
            (Value::Ranges(a), Value::Ranges(b)) => {
                a.extend(b.iter().copied());
                *a = coalesce(std::mem::take(a));
            }
            (Value::Set(a), Value::Set(b)) => {
                a.extend(b.iter().cloned());
            }
            (a, b) => panic!("cannot add mismatched resource shapes {:?} and {:?}", a, b),
        }
    }

    /// Subtracts `other` from `self`. Subtracting more than is present is a
    /// programmer error.
    pub(crate) fn sub_in_place(&mut self, other: &Value) {
        match (self, other) {
            (Value::Scalar(a), Value::Scalar(b)) => {
                assert!(*a + 1e-9 >= *b, "scalar subtraction below zero");
                *a = (*a - b).max(0.0);
            }
            (Value::Ranges(a), Value::Ranges(b)) => {
                *a = subtract_ranges(std::mem::take(a), b);
            }
            (Value::Set(a), Value::Set(b)) => {
                for item in b {
                    assert!(a.remove(item), "set item {:?} not present", item);
                }
            }
            (a, b) => panic!(
                "cannot subtract mismatched resource shapes {:?} and {:?}",
                a, b
            ),
        }
    }

    /// True when the value has been consumed entirely.
    pub(crate) fn is_none(&self) -> bool {
        match self {
            Value::Scalar(v) => *v <= 1e-9,
            Value::Ranges(ranges) => ranges.is_empty(),
            Value::Set(items) => items.is_empty(),
        }
    }
}

/// Sorts and merges overlapping or adjacent ranges.
fn coalesce(mut ranges: Vec<Range>) -> Vec<Range> {
    ranges.sort();
    let mut out: Vec<Range> = Vec::with_capacity(ranges.len());
    for range in ranges {
        match out.last_mut() {
            Some(last) if range.begin <= last.end.saturating_add(1) => {
                last.end = last.end.max(range.end);
            }
            _ => out.push(range),
        }
    }
    out
}

/// Removes `sub` from `ranges`, splitting intervals as needed.
fn subtract_ranges(ranges: Vec<Range>, sub: &[Range]) -> Vec<Range> {
    let mut out = ranges;
    for s in sub {
        let mut next = Vec::with_capacity(out.len() + 1);
        let mut found = false;
        for r in out {
            if s.begin >= r.begin && s.end <= r.end {
                found = true;
                if r.begin < s.begin {
                    next.push(Range::new(r.begin, s.begin - 1));
                }
                if s.end < r.end {
                    next.push(Range::new(s.end + 1, r.end));
                }
            } else {
                next.push(r);
            }
        }
        assert!(found, "range {} not contained in resource", s);
        out = next;
    }
    out
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Scalar(v) => write!(f, "{}", v),
            Value::Ranges(ranges) => {
                write!(f, "[")?;
                for (i, range) in ranges.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", range)?;
                }
                write!(f, "]")
            }
            Value::Set(items) => {
                write!(f, "{{")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl FromStr for Value {
    type Err = ResourceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(inner) = s.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
            let mut ranges = Vec::new();
            for part in inner.split(',') {
                let part = part.trim();
                if part.is_empty() {
                    continue;
                }
                let (begin, end) = part
                    .split_once('-')
                    .ok_or_else(|| ResourceError::InvalidRange(part.to_string()))?;
                let begin: u64 = begin
                    .trim()
                    .parse()
                    .map_err(|_| ResourceError::InvalidRange(part.to_string()))?;
                let end: u64 = end
                    .trim()
                    .parse()
                    .map_err(|_| ResourceError::InvalidRange(part.to_string()))?;
                if begin > end {
                    return Err(ResourceError::InvalidRange(part.to_string()));
                }
                ranges.push(Range::new(begin, end));
            }
            return Ok(Value::Ranges(coalesce(ranges)));
        }

        if let Some(inner) = s.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
            let items = inner
                .split(',')
                .map(|item| item.trim().to_string())
                .filter(|item| !item.is_empty())
                .collect();
            return Ok(Value::Set(items));
        }

        let scalar: f64 = s
            .parse()
            .map_err(|_| ResourceError::InvalidScalar(s.to_string()))?;
        if scalar < 0.0 || !scalar.is_finite() {
            return Err(ResourceError::InvalidScalar(s.to_string()));
        }
        Ok(Value::Scalar(scalar))
    }
}
