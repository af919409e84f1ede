//! Synchronized pileup over several position-sorted record streams.
//!
//! [`PileupEngine`] merges N filtered streams (one per input file) and yields
//! one [`PileupColumns`] per covered reference position, positions strictly
//! increasing. Each file keeps its own window of active records; a file
//! without coverage at the emitted position contributes an empty column.
//!
//! Per file and position, mates of the same template are first collapsed to
//! one observation, then at most `max_depth` entries are kept in arrival
//! order. The number of records a file may hold active at once is bounded by
//! the depth ceiling; going past it is an error.

mod column;
mod overlap;

pub use column::PileupEntry;

use crate::Result;
use crate::config::PileupOptions;
use crate::types::AlignedRecord;
use column::FilePileup;
use serde::Serialize;
use std::ops::AddAssign;

/// Per-file entries at one reference position.
#[derive(Debug, Clone, Copy)]
pub struct PileupColumns<'a> {
    pub reference_id: usize,
    pub position: u64,
    /// One column per input file, in input order.
    pub columns: &'a [Vec<PileupEntry>],
}

impl PileupColumns<'_> {
    pub fn depth(&self) -> usize {
        self.columns.iter().map(Vec::len).sum()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub columns: u64,
    pub depth_capped_columns: u64,
    pub depth_capped_entries: u64,
    pub overlaps_reconciled: u64,
}

impl AddAssign for EngineStats {
    fn add_assign(&mut self, other: Self) {
        self.columns += other.columns;
        self.depth_capped_columns += other.depth_capped_columns;
        self.depth_capped_entries += other.depth_capped_entries;
        self.overlaps_reconciled += other.overlaps_reconciled;
    }
}

pub struct PileupEngine<I> {
    files: Vec<FilePileup<I>>,
    columns: Vec<Vec<PileupEntry>>,
    position: Option<(usize, u64)>,
    max_depth: usize,
    reconcile_overlaps: bool,
    stats: EngineStats,
}

impl<I> PileupEngine<I>
where
    I: Iterator<Item = Result<AlignedRecord>>,
{
    /// `sources` pairs a display name with each file's filtered stream.
    pub fn new(sources: Vec<(String, I)>, options: &PileupOptions) -> Self {
        let columns = sources.iter().map(|_| Vec::new()).collect();
        let files = sources
            .into_iter()
            .map(|(name, source)| FilePileup::new(name, source, options.depth_ceiling))
            .collect();

        Self {
            files,
            columns,
            position: None,
            max_depth: options.max_depth,
            reconcile_overlaps: options.reconcile_overlaps,
            stats: EngineStats::default(),
        }
    }

    /// The next covered position, or `None` once every stream is drained.
    pub fn advance(&mut self) -> Result<Option<PileupColumns<'_>>> {
        let Some(next) = self.next_position()? else {
            return Ok(None);
        };

        for file in &mut self.files {
            file.load(next)?;
        }
        self.position = Some(next);

        let (reference_id, position) = next;
        for (file, column) in self.files.iter_mut().zip(&mut self.columns) {
            column.clear();
            file.collect(position, column);

            if self.reconcile_overlaps {
                self.stats.overlaps_reconciled += overlap::reconcile(column) as u64;
            }

            if self.max_depth > 0 && column.len() > self.max_depth {
                let dropped = column.len() - self.max_depth;
                column.truncate(self.max_depth);
                self.stats.depth_capped_columns += 1;
                self.stats.depth_capped_entries += dropped as u64;
                tracing::debug!(
                    "Max depth {} reached at {}:{}, {} entries dropped",
                    self.max_depth,
                    reference_id,
                    position + 1,
                    dropped
                );
            }
        }
        self.stats.columns += 1;

        Ok(Some(PileupColumns {
            reference_id,
            position,
            columns: &self.columns,
        }))
    }

    fn next_position(&mut self) -> Result<Option<(usize, u64)>> {
        if let Some((reference_id, position)) = self.position {
            let mut covered = false;
            for file in &mut self.files {
                file.retire(position + 1);
                covered |= file.has_active();
            }
            if covered {
                return Ok(Some((reference_id, position + 1)));
            }
        }

        let mut next: Option<(usize, u64)> = None;
        for file in &mut self.files {
            if let Some(placement) = file.peek()? {
                next = Some(next.map_or(placement, |n| n.min(placement)));
            }
        }
        Ok(next)
    }

    /// The per-file streams, in input order.
    pub fn sources(&self) -> impl Iterator<Item = &I> {
        self.files.iter().map(|file| file.source())
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::parse_cigar;
    use noodles::sam::alignment::record::Flags;
    use std::vec::IntoIter;

    fn record(name: &str, start: u64, cigar: &str) -> AlignedRecord {
        let cigar = parse_cigar(cigar).unwrap();
        let len = cigar
            .iter()
            .filter(|op| op.kind().consumes_read())
            .map(|op| op.len())
            .sum();
        AlignedRecord::new(name, 0, start, cigar, vec![b'A'; len], vec![30; len])
    }

    fn engine(
        files: Vec<Vec<AlignedRecord>>,
        options: &PileupOptions,
    ) -> PileupEngine<std::iter::Map<IntoIter<AlignedRecord>, fn(AlignedRecord) -> Result<AlignedRecord>>>
    {
        let sources = files
            .into_iter()
            .enumerate()
            .map(|(i, records)| {
                let stream = records
                    .into_iter()
                    .map(Ok as fn(AlignedRecord) -> Result<AlignedRecord>);
                (format!("file{i}"), stream)
            })
            .collect();
        PileupEngine::new(sources, options)
    }

    /// (position, per-file depths) for every emitted column.
    fn drain<I>(engine: &mut PileupEngine<I>) -> Vec<(u64, Vec<usize>)>
    where
        I: Iterator<Item = Result<AlignedRecord>>,
    {
        let mut out = Vec::new();
        while let Some(columns) = engine.advance().unwrap() {
            out.push((
                columns.position,
                columns.columns.iter().map(Vec::len).collect(),
            ));
        }
        out
    }

    #[test]
    fn test_positions_cover_reads_and_skip_gaps() {
        let options = PileupOptions::permissive();
        let mut engine = engine(
            vec![vec![record("a", 5, "3M"), record("b", 6, "3M"), record("c", 20, "2M")]],
            &options,
        );

        let columns = drain(&mut engine);
        let positions: Vec<u64> = columns.iter().map(|(p, _)| *p).collect();
        assert_eq!(positions, vec![5, 6, 7, 8, 20, 21]);
        assert_eq!(columns[1].1, vec![2]);
        assert_eq!(columns[3].1, vec![1]);
        assert_eq!(engine.stats().columns, 6);
    }

    #[test]
    fn test_files_merged_by_position() {
        let options = PileupOptions::permissive();
        let mut engine = engine(
            vec![
                vec![record("a", 10, "2M")],
                vec![record("b", 11, "2M")],
            ],
            &options,
        );

        assert_eq!(
            drain(&mut engine),
            vec![(10, vec![1, 0]), (11, vec![1, 1]), (12, vec![0, 1])]
        );
    }

    #[test]
    fn test_reference_change_restarts_positions() {
        let options = PileupOptions::permissive();
        let mut other = record("b", 2, "2M");
        other.reference_sequence_id = Some(1);
        let mut engine = engine(vec![vec![record("a", 100, "1M"), other]], &options);

        let mut seen = Vec::new();
        while let Some(columns) = engine.advance().unwrap() {
            seen.push((columns.reference_id, columns.position));
        }
        assert_eq!(seen, vec![(0, 100), (1, 2), (1, 3)]);
    }

    #[test]
    fn test_max_depth_keeps_arrival_order() {
        let options = PileupOptions {
            max_depth: 5,
            ..PileupOptions::permissive()
        };
        let records = (0..8).map(|i| record(&format!("r{i}"), 0, "1M")).collect();
        let mut engine = engine(vec![records], &options);

        let columns = engine.advance().unwrap().unwrap();
        let names: Vec<_> = columns.columns[0]
            .iter()
            .map(|e| String::from_utf8(e.record.name.clone()).unwrap())
            .collect();
        assert_eq!(names, vec!["r0", "r1", "r2", "r3", "r4"]);

        assert!(engine.advance().unwrap().is_none());
        assert_eq!(engine.stats().depth_capped_columns, 1);
        assert_eq!(engine.stats().depth_capped_entries, 3);
    }

    #[test]
    fn test_overlapping_mates_counted_once() {
        let paired = Flags::SEGMENTED | Flags::PROPERLY_SEGMENTED;
        let r1 = record("frag", 0, "4M").with_flags(paired | Flags::FIRST_SEGMENT);
        let r2 = record("frag", 2, "4M").with_flags(paired | Flags::LAST_SEGMENT);

        let on = PileupOptions {
            reconcile_overlaps: true,
            ..PileupOptions::permissive()
        };
        let mut engine_on = engine(vec![vec![r1.clone(), r2.clone()]], &on);
        let depths: Vec<usize> = drain(&mut engine_on).iter().map(|(_, d)| d[0]).collect();
        assert_eq!(depths, vec![1, 1, 1, 1, 1, 1]);
        assert_eq!(engine_on.stats().overlaps_reconciled, 2);

        let off = PileupOptions::permissive();
        let mut engine_off = engine(vec![vec![r1, r2]], &off);
        let depths: Vec<usize> = drain(&mut engine_off).iter().map(|(_, d)| d[0]).collect();
        assert_eq!(depths, vec![1, 1, 2, 2, 1, 1]);
    }

    #[test]
    fn test_reconciled_mate_not_counted_against_max_depth() {
        let paired = Flags::SEGMENTED | Flags::PROPERLY_SEGMENTED;
        let mut first = record("A", 0, "1M").with_flags(paired | Flags::FIRST_SEGMENT);
        first.quality_scores = vec![20];
        let mut second = record("A", 0, "1M").with_flags(paired | Flags::LAST_SEGMENT);
        second.quality_scores = vec![35];

        let options = PileupOptions {
            max_depth: 2,
            reconcile_overlaps: true,
            ..PileupOptions::permissive()
        };
        let mut engine = engine(
            vec![vec![first, record("B", 0, "1M"), second, record("C", 0, "1M")]],
            &options,
        );

        let columns = engine.advance().unwrap().unwrap();
        let kept: Vec<_> = columns.columns[0]
            .iter()
            .map(|e| (String::from_utf8(e.record.name.clone()).unwrap(), e.quality()))
            .collect();
        assert_eq!(kept, vec![("B".to_string(), 30), ("A".to_string(), 35)]);

        assert!(engine.advance().unwrap().is_none());
        let stats = engine.stats();
        assert_eq!(stats.overlaps_reconciled, 1);
        assert_eq!(stats.depth_capped_entries, 1);
    }

    #[test]
    fn test_unsorted_stream_fails() {
        let options = PileupOptions::permissive();
        let mut engine = engine(
            vec![vec![record("a", 10, "1M"), record("b", 3, "1M")]],
            &options,
        );
        let error = engine.advance().err().unwrap();
        assert_eq!(error.category(), "UnsortedInput");
    }
}
