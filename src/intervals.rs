//! Target intervals and region lists read from BED-like text.
//!
//! Two line shapes are accepted:
//!
//! - `chr<TAB>start<TAB>end[...]`: BED, 0-based half-open
//! - `chr<TAB|SPACE>pos`: a single 1-based position
//!
//! Blank lines and `#`, `track` and `browser` lines are skipped.

use crate::types::RegionSpec;
use crate::{Error, Result};
use std::collections::HashMap;
use std::path::Path;

/// Sorted, merged intervals per reference name, used both to reject
/// alignments that miss every target and to skip untargeted positions.
#[derive(Debug, Clone, Default)]
pub struct TargetIntervals {
    by_reference: HashMap<String, Vec<(u64, u64)>>,
}

impl TargetIntervals {
    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::InvalidInput(format!("{}: {}", path.display(), e)))?;
        let mut intervals = Vec::new();
        for (number, line) in text.lines().enumerate() {
            if let Some(interval) = parse_line(line).map_err(|e| {
                Error::InvalidInput(format!("{}:{}: {}", path.display(), number + 1, e))
            })? {
                intervals.push(interval);
            }
        }
        tracing::debug!("Loaded {} target intervals from {:?}", intervals.len(), path);
        Ok(Self::from_intervals(intervals))
    }

    pub fn from_intervals<I>(intervals: I) -> Self
    where
        I: IntoIterator<Item = (String, u64, u64)>,
    {
        let mut by_reference: HashMap<String, Vec<(u64, u64)>> = HashMap::new();
        for (name, start, end) in intervals {
            by_reference.entry(name).or_default().push((start, end));
        }
        for ranges in by_reference.values_mut() {
            *ranges = merge_ranges(std::mem::take(ranges));
        }
        Self { by_reference }
    }

    /// Whether `[start, end)` on `name` touches any target.
    pub fn overlaps(&self, name: &str, start: u64, end: u64) -> bool {
        let Some(ranges) = self.by_reference.get(name) else {
            return false;
        };
        // First range whose end lies past `start`.
        let i = ranges.partition_point(|&(_, e)| e <= start);
        ranges.get(i).is_some_and(|&(s, _)| s < end)
    }

    pub fn contains(&self, name: &str, position: u64) -> bool {
        self.overlaps(name, position, position + 1)
    }

    pub fn is_empty(&self) -> bool {
        self.by_reference.values().all(Vec::is_empty)
    }
}

/// Read a region list, one region per line, preserving file order.
pub fn read_regions_file(path: &Path) -> Result<Vec<RegionSpec>> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| Error::InvalidInput(format!("{}: {}", path.display(), e)))?;

    let mut regions = Vec::new();
    for (number, line) in text.lines().enumerate() {
        let parsed = parse_line(line)
            .map_err(|e| Error::InvalidInput(format!("{}:{}: {}", path.display(), number + 1, e)))?;
        if let Some((name, start, end)) = parsed {
            regions.push(RegionSpec::new(name, Some(start), Some(end)));
        }
    }
    if regions.is_empty() {
        return Err(Error::InvalidInput(format!(
            "no regions read from {}",
            path.display()
        )));
    }
    Ok(regions)
}

fn parse_line(line: &str) -> std::result::Result<Option<(String, u64, u64)>, String> {
    let line = line.trim_end();
    if line.is_empty()
        || line.starts_with('#')
        || line.starts_with("track")
        || line.starts_with("browser")
    {
        return Ok(None);
    }

    let fields: Vec<&str> = line.split(['\t', ' ']).filter(|f| !f.is_empty()).collect();
    match fields.as_slice() {
        [name, position] => {
            let position: u64 = position
                .parse()
                .map_err(|_| format!("invalid position '{}'", position))?;
            if position == 0 {
                return Err("positions are 1-based".to_string());
            }
            Ok(Some((name.to_string(), position - 1, position)))
        }
        [name, start, end, ..] => {
            let start: u64 = start
                .parse()
                .map_err(|_| format!("invalid start '{}'", start))?;
            let end: u64 = end.parse().map_err(|_| format!("invalid end '{}'", end))?;
            if end <= start {
                return Err(format!("empty interval {}-{}", start, end));
            }
            Ok(Some((name.to_string(), start, end)))
        }
        _ => Err(format!("expected 2 or 3+ columns, found '{}'", line)),
    }
}

/// Merge overlapping or adjacent ranges
fn merge_ranges(mut ranges: Vec<(u64, u64)>) -> Vec<(u64, u64)> {
    if ranges.is_empty() {
        return ranges;
    }

    ranges.sort_unstable();

    let mut merged = Vec::with_capacity(ranges.len());
    let mut current = ranges[0];

    for range in ranges.into_iter().skip(1) {
        if range.0 <= current.1 {
            current.1 = current.1.max(range.1);
        } else {
            merged.push(current);
            current = range;
        }
    }
    merged.push(current);

    merged
}
