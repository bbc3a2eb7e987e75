use std::str::FromStr;

use crate::CycleError;

/// Membership predicate over cycle indices.
pub trait RangeFilter {
    fn contains(&self, index: i32) -> bool;
}

impl<F> RangeFilter for F
where
    F: Fn(i32) -> bool,
{
    fn contains(&self, index: i32) -> bool {
        self(index)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct IndexRange {
    first: Option<i32>,
    last: Option<i32>,
}

impl IndexRange {
    fn contains(&self, value: i32) -> bool {
        if matches!(self.first, Some(first) if value < first) {
            return false;
        }
        if matches!(self.last, Some(last) if value > last) {
            return false;
        }
        true
    }

    /// `N`, `A-B`, `A-` or `-B`. The first hyphen splits the bounds.
    fn parse(token: &str) -> Option<Self> {
        let token = token.trim();
        let Some((first, last)) = token.split_once('-') else {
            let value = token.parse().ok()?;
            return Some(Self {
                first: Some(value),
                last: Some(value),
            });
        };
        Some(Self {
            first: parse_bound(first)?,
            last: parse_bound(last)?,
        })
    }
}

fn parse_bound(text: &str) -> Option<Option<i32>> {
    let text = text.trim();
    if text.is_empty() {
        return Some(None);
    }
    text.parse().ok().map(Some)
}

/// Comma-separated list of cycle indices and inclusive ranges, e.g. `"1-5, 8, 12-"`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IndexRangeFilter {
    ranges: Vec<IndexRange>,
}

impl IndexRangeFilter {
    /// Lenient parse: entries that do not parse are dropped.
    pub fn new(spec: &str) -> Self {
        let ranges = spec
            .split(',')
            .filter(|token| !token.is_empty())
            .filter_map(IndexRange::parse)
            .collect();
        Self { ranges }
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Every non-negative index up to the largest bound that the filter contains.
    pub fn items(&self) -> Vec<i32> {
        let max_bound = self
            .ranges
            .iter()
            .fold(0, |max, range| match (range.first, range.last) {
                (_, Some(last)) if last > max => last,
                (Some(first), _) if first > max => first,
                _ => max,
            });
        (0..=max_bound).filter(|i| self.contains(*i)).collect()
    }
}

impl FromStr for IndexRangeFilter {
    type Err = CycleError;

    /// Strict parse: any malformed entry is an error. Blank entries are skipped.
    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let mut ranges = Vec::new();
        for token in spec.split(',') {
            if token.trim().is_empty() {
                continue;
            }
            let range = IndexRange::parse(token)
                .ok_or_else(|| CycleError::InvalidRange(token.trim().to_string()))?;
            ranges.push(range);
        }
        Ok(Self { ranges })
    }
}

impl RangeFilter for IndexRangeFilter {
    fn contains(&self, index: i32) -> bool {
        self.ranges.iter().any(|r| r.contains(index))
    }
}
