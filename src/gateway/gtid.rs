//! GTID set arithmetic
//!
//! A GTID set maps a source UUID to a sorted list of disjoint, non-adjacent
//! inclusive intervals of transaction numbers. The text form is the one the
//! server prints: `uuid:1-5:7,uuid2:1-3`.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::GatewayError;

/// Set of global transaction identifiers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GtidSet {
    intervals: BTreeMap<Uuid, Vec<(u64, u64)>>,
}

fn normalize(mut ranges: Vec<(u64, u64)>) -> Vec<(u64, u64)> {
    ranges.retain(|(s, e)| s <= e);
    ranges.sort_unstable();
    let mut merged: Vec<(u64, u64)> = Vec::with_capacity(ranges.len());
    for (start, end) in ranges {
        match merged.last_mut() {
            Some(last) if start <= last.1.saturating_add(1) => {
                last.1 = last.1.max(end);
            }
            _ => merged.push((start, end)),
        }
    }
    merged
}

fn subtract_ranges(from: &[(u64, u64)], remove: &[(u64, u64)]) -> Vec<(u64, u64)> {
    let mut result = Vec::new();
    for &(start, end) in from {
        let mut cursor = start;
        let mut exhausted = false;
        for &(rs, re) in remove {
            if re < cursor || rs > end {
                continue;
            }
            if rs > cursor {
                result.push((cursor, rs - 1));
            }
            if re >= end {
                exhausted = true;
                break;
            }
            cursor = re + 1;
        }
        if !exhausted && cursor <= end {
            result.push((cursor, end));
        }
    }
    result
}

impl GtidSet {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    /// Add a single transaction.
    pub fn add(&mut self, source: Uuid, number: u64) {
        self.add_interval(source, number, number);
    }

    /// Add an inclusive interval of transactions.
    pub fn add_interval(&mut self, source: Uuid, start: u64, end: u64) {
        if start == 0 || start > end {
            return;
        }
        let ranges = self.intervals.entry(source).or_default();
        ranges.push((start, end));
        let merged = normalize(std::mem::take(ranges));
        *ranges = merged;
    }

    /// Whether `source:number` is in the set.
    pub fn contains(&self, source: &Uuid, number: u64) -> bool {
        self.intervals
            .get(source)
            .map(|r| r.iter().any(|&(s, e)| s <= number && number <= e))
            .unwrap_or(false)
    }

    /// Highest transaction number recorded for `source`.
    pub fn last_number(&self, source: &Uuid) -> u64 {
        self.intervals
            .get(source)
            .and_then(|r| r.last())
            .map(|&(_, e)| e)
            .unwrap_or(0)
    }

    /// `self ∪ other`
    pub fn union(&self, other: &GtidSet) -> GtidSet {
        let mut result = self.clone();
        for (source, ranges) in &other.intervals {
            let entry = result.intervals.entry(*source).or_default();
            entry.extend_from_slice(ranges);
            let merged = normalize(std::mem::take(entry));
            *entry = merged;
        }
        result
    }

    /// `self − other`
    pub fn subtract(&self, other: &GtidSet) -> GtidSet {
        let mut result = GtidSet::new();
        for (source, ranges) in &self.intervals {
            let remaining = match other.intervals.get(source) {
                Some(remove) => subtract_ranges(ranges, remove),
                None => ranges.clone(),
            };
            if !remaining.is_empty() {
                result.intervals.insert(*source, remaining);
            }
        }
        result
    }

    /// `self ∩ other`
    pub fn intersect(&self, other: &GtidSet) -> GtidSet {
        self.subtract(&self.subtract(other))
    }

    /// Whether every transaction of `self` is in `other`.
    pub fn is_subset_of(&self, other: &GtidSet) -> bool {
        self.subtract(other).is_empty()
    }

    /// Number of transactions in the set.
    pub fn count(&self) -> u64 {
        self.intervals
            .values()
            .flat_map(|r| r.iter())
            .map(|&(s, e)| e - s + 1)
            .sum()
    }

    /// Every transaction in the set, ordered by source then number.
    pub fn iter(&self) -> impl Iterator<Item = (Uuid, u64)> + '_ {
        self.intervals
            .iter()
            .flat_map(|(source, ranges)| ranges.iter().flat_map(move |&(s, e)| (s..=e).map(move |n| (*source, n))))
    }
}

impl fmt::Display for GtidSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (source, ranges) in &self.intervals {
            if !first {
                f.write_str(",")?;
            }
            first = false;
            write!(f, "{}", source)?;
            for &(s, e) in ranges {
                if s == e {
                    write!(f, ":{}", s)?;
                } else {
                    write!(f, ":{}-{}", s, e)?;
                }
            }
        }
        Ok(())
    }
}

impl FromStr for GtidSet {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut set = GtidSet::new();
        let bad = |detail: &str| GatewayError::unexpected_result(format!("invalid GTID set '{}': {}", s, detail));

        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let mut pieces = part.split(':');
            let source = pieces
                .next()
                .and_then(|u| Uuid::parse_str(u.trim()).ok())
                .ok_or_else(|| bad("bad source uuid"))?;
            let mut any = false;
            for range in pieces {
                any = true;
                let (start, end) = match range.split_once('-') {
                    Some((a, b)) => (a.parse::<u64>(), b.parse::<u64>()),
                    None => (range.parse::<u64>(), range.parse::<u64>()),
                };
                let (start, end) = match (start, end) {
                    (Ok(a), Ok(b)) if a >= 1 && a <= b => (a, b),
                    _ => return Err(bad("bad interval")),
                };
                set.add_interval(source, start, end);
            }
            if !any {
                return Err(bad("source without intervals"));
            }
        }
        Ok(set)
    }
}

impl TryFrom<String> for GtidSet {
    type Error = GatewayError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<GtidSet> for String {
    fn from(value: GtidSet) -> Self {
        value.to_string()
    }
}
