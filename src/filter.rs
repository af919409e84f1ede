use crate::config::{BaqMode, PileupOptions};
use crate::intervals::TargetIntervals;
use crate::quality::{BaqRecalibrator, MapqCapper, rescale_legacy_qualities};
use crate::reference::ReferenceWindow;
use crate::types::{AlignedRecord, AlignmentHeader};
use crate::Result;
use serde::Serialize;
use std::cell::RefCell;
use std::ops::AddAssign;
use std::rc::Rc;

/// Collaborators and settings a [`ReadFilter`] consults for one input file.
#[derive(Clone)]
pub struct FilterContext<'a> {
    pub options: &'a PileupOptions,
    pub header: &'a AlignmentHeader,
    pub targets: Option<&'a TargetIntervals>,
    pub reference: Option<Rc<RefCell<ReferenceWindow>>>,
    pub baq: Option<Rc<RefCell<dyn BaqRecalibrator>>>,
}

impl<'a> FilterContext<'a> {
    pub fn new(options: &'a PileupOptions, header: &'a AlignmentHeader) -> Self {
        Self {
            options,
            header,
            targets: None,
            reference: None,
            baq: None,
        }
    }
}

/// Per-stage rejection counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FilterStats {
    pub seen: u64,
    pub accepted: u64,
    pub unmapped: u64,
    pub missing_required_flags: u64,
    pub forbidden_flags: u64,
    pub off_target: u64,
    pub excluded_read_group: u64,
    pub mapq_cap_rejected: u64,
    pub low_mapping_quality: u64,
    pub orphan: u64,
}

impl FilterStats {
    pub fn rejected(&self) -> u64 {
        self.seen - self.accepted
    }
}

impl AddAssign for FilterStats {
    fn add_assign(&mut self, other: Self) {
        self.seen += other.seen;
        self.accepted += other.accepted;
        self.unmapped += other.unmapped;
        self.missing_required_flags += other.missing_required_flags;
        self.forbidden_flags += other.forbidden_flags;
        self.off_target += other.off_target;
        self.excluded_read_group += other.excluded_read_group;
        self.mapq_cap_rejected += other.mapq_cap_rejected;
        self.low_mapping_quality += other.low_mapping_quality;
        self.orphan += other.orphan;
    }
}

/// Admits records from one file's stream, adjusting qualities on the way.
///
/// Each call to `next` draws from the source until a record passes every
/// stage. Errors from the source are passed through.
pub struct ReadFilter<'a, I> {
    source: I,
    context: FilterContext<'a>,
    capper: Option<MapqCapper>,
    stats: FilterStats,
}

impl<'a, I> ReadFilter<'a, I>
where
    I: Iterator<Item = Result<AlignedRecord>>,
{
    pub fn new(source: I, context: FilterContext<'a>) -> Self {
        let capper = context
            .options
            .caps_mapping_quality()
            .then(|| MapqCapper::new(context.options.cap_mapq_threshold));
        Self {
            source,
            context,
            capper,
            stats: FilterStats::default(),
        }
    }

    pub fn stats(&self) -> FilterStats {
        self.stats
    }

    fn baq_enabled(&self) -> bool {
        self.context.options.baq != BaqMode::Off && self.context.baq.is_some()
    }

    /// Run every stage; `Ok(false)` means the record was rejected.
    fn admit(&mut self, record: &mut AlignedRecord) -> Result<bool> {
        let options = self.context.options;

        let Some((reference_id, start)) = record.placement() else {
            self.stats.unmapped += 1;
            return Ok(false);
        };
        if record.flags.is_unmapped() {
            self.stats.unmapped += 1;
            return Ok(false);
        }

        if !record.flags.contains(options.required_flags) {
            self.stats.missing_required_flags += 1;
            return Ok(false);
        }

        if record.flags.intersects(options.forbidden_flags) {
            self.stats.forbidden_flags += 1;
            return Ok(false);
        }

        if let Some(targets) = self.context.targets {
            let end = record.alignment_end().unwrap_or(start + 1);
            let on_target = self
                .context
                .header
                .reference_name(reference_id)
                .is_some_and(|name| targets.overlaps(name, start, end));
            if !on_target {
                self.stats.off_target += 1;
                return Ok(false);
            }
        }

        if let Some(read_group) = &record.read_group {
            if options.excluded_read_groups.contains(read_group) {
                self.stats.excluded_read_group += 1;
                return Ok(false);
            }
        }

        if options.legacy_qualities {
            rescale_legacy_qualities(&mut record.quality_scores);
        }

        let needs_reference = self.baq_enabled() || self.capper.is_some();
        let reference = match (&self.context.reference, needs_reference) {
            (Some(window), true) => window.borrow_mut().sequence(reference_id)?,
            _ => None,
        };

        if let Some(reference) = &reference {
            if options.baq != BaqMode::Off {
                if let Some(baq) = &self.context.baq {
                    baq.borrow_mut().recalibrate(record, reference, options.baq)?;
                }
            }

            if let Some(capper) = &self.capper {
                match capper.cap(record, reference) {
                    Some(cap) => record.mapping_quality = record.mapping_quality.min(cap),
                    None => {
                        self.stats.mapq_cap_rejected += 1;
                        return Ok(false);
                    }
                }
            }
        }

        if record.mapping_quality < options.min_mapping_quality {
            self.stats.low_mapping_quality += 1;
            return Ok(false);
        }

        if options.exclude_orphans
            && record.flags.is_segmented()
            && !record.flags.is_properly_segmented()
        {
            self.stats.orphan += 1;
            return Ok(false);
        }

        Ok(true)
    }
}

impl<I> Iterator for ReadFilter<'_, I>
where
    I: Iterator<Item = Result<AlignedRecord>>,
{
    type Item = Result<AlignedRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let mut record = match self.source.next()? {
                Ok(record) => record,
                Err(e) => return Some(Err(e)),
            };
            self.stats.seen += 1;

            match self.admit(&mut record) {
                Ok(true) => {
                    self.stats.accepted += 1;
                    return Some(Ok(record));
                }
                Ok(false) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::MemoryReference;
    use crate::types::{ReferenceSequence, parse_cigar};
    use crate::Error;
    use noodles::sam::alignment::record::Flags;

    fn header() -> AlignmentHeader {
        AlignmentHeader {
            reference_sequences: vec![ReferenceSequence {
                name: "chr1".to_string(),
                length: 100,
            }],
            read_groups: vec![],
        }
    }

    fn record(name: &str, start: u64) -> AlignedRecord {
        AlignedRecord::new(name, 0, start, parse_cigar("4M").unwrap(), b"ACGT", vec![40; 4])
    }

    fn names(filter: impl Iterator<Item = Result<AlignedRecord>>) -> Vec<String> {
        filter
            .map(|r| String::from_utf8(r.unwrap().name).unwrap())
            .collect()
    }

    #[test]
    fn test_default_forbidden_flags() {
        let options = PileupOptions::default();
        let header = header();
        let records = vec![
            record("ok", 0),
            record("dup", 1).with_flags(Flags::DUPLICATE),
            record("secondary", 2).with_flags(Flags::SECONDARY),
            record("qcfail", 3).with_flags(Flags::QC_FAIL),
            record("supplementary", 4).with_flags(Flags::SUPPLEMENTARY),
        ];

        let mut filter = ReadFilter::new(records.into_iter().map(Ok), FilterContext::new(&options, &header));
        let kept = names(filter.by_ref());
        assert_eq!(kept, vec!["ok", "supplementary"]);
        assert_eq!(filter.stats().forbidden_flags, 3);
        assert_eq!(filter.stats().rejected(), 3);
    }

    #[test]
    fn test_unplaced_records_rejected() {
        let options = PileupOptions::permissive();
        let header = header();
        let mut unplaced = record("unplaced", 0);
        unplaced.reference_sequence_id = None;
        let records = vec![
            unplaced,
            record("unmapped", 0).with_flags(Flags::UNMAPPED),
            record("ok", 0),
        ];

        let mut filter = ReadFilter::new(records.into_iter().map(Ok), FilterContext::new(&options, &header));
        assert_eq!(names(filter.by_ref()), vec!["ok"]);
        assert_eq!(filter.stats().unmapped, 2);
    }

    #[test]
    fn test_required_flags_need_every_bit() {
        let options = PileupOptions {
            required_flags: Flags::SEGMENTED | Flags::PROPERLY_SEGMENTED,
            ..PileupOptions::permissive()
        };
        let header = header();
        let records = vec![
            record("paired-only", 0).with_flags(Flags::SEGMENTED),
            record("proper", 1).with_flags(Flags::SEGMENTED | Flags::PROPERLY_SEGMENTED),
        ];

        let filter = ReadFilter::new(records.into_iter().map(Ok), FilterContext::new(&options, &header));
        assert_eq!(names(filter), vec!["proper"]);
    }

    #[test]
    fn test_orphans_and_mapping_quality() {
        let options = PileupOptions {
            min_mapping_quality: 20,
            ..PileupOptions::default()
        };
        let header = header();
        let records = vec![
            record("orphan", 0).with_flags(Flags::SEGMENTED),
            record("pair", 1).with_flags(Flags::SEGMENTED | Flags::PROPERLY_SEGMENTED),
            record("low", 2).with_mapping_quality(10),
            record("single", 3),
        ];

        let mut filter = ReadFilter::new(records.into_iter().map(Ok), FilterContext::new(&options, &header));
        assert_eq!(names(filter.by_ref()), vec!["pair", "single"]);
        assert_eq!(filter.stats().orphan, 1);
        assert_eq!(filter.stats().low_mapping_quality, 1);
    }

    #[test]
    fn test_targets_and_excluded_read_groups() {
        let mut options = PileupOptions::permissive();
        options.excluded_read_groups.insert("bad".to_string());
        let header = header();
        let targets = TargetIntervals::from_intervals([("chr1".to_string(), 10, 20)]);
        let records = vec![
            record("before", 0),
            record("touching", 8),
            record("excluded", 12).with_read_group("bad"),
            record("kept", 12).with_read_group("good"),
            record("after", 20),
        ];

        let mut context = FilterContext::new(&options, &header);
        context.targets = Some(&targets);
        let mut filter = ReadFilter::new(records.into_iter().map(Ok), context);
        assert_eq!(names(filter.by_ref()), vec!["touching", "kept"]);
        assert_eq!(filter.stats().off_target, 2);
        assert_eq!(filter.stats().excluded_read_group, 1);
    }

    #[test]
    fn test_legacy_qualities_rescaled() {
        let options = PileupOptions {
            legacy_qualities: true,
            ..PileupOptions::permissive()
        };
        let header = header();
        let records = vec![AlignedRecord::new(
            "r",
            0,
            0,
            parse_cigar("4M").unwrap(),
            b"ACGT",
            vec![20, 31, 40, 71],
        )];

        let mut filter = ReadFilter::new(records.into_iter().map(Ok), FilterContext::new(&options, &header));
        let record = filter.next().unwrap().unwrap();
        assert_eq!(record.quality_scores, vec![0, 0, 9, 40]);
    }

    #[test]
    fn test_mapping_quality_capping_needs_reference() {
        let options = PileupOptions {
            cap_mapq_threshold: 50,
            ..PileupOptions::permissive()
        };
        let header = header();
        let records = || {
            vec![
                AlignedRecord::new("clean", 0, 0, parse_cigar("4M").unwrap(), b"ACGT", vec![40; 4]),
                AlignedRecord::new("noisy", 0, 0, parse_cigar("4M").unwrap(), b"TTTT", vec![40; 4]),
            ]
        };

        let without = ReadFilter::new(records().into_iter().map(Ok), FilterContext::new(&options, &header));
        assert_eq!(names(without), vec!["clean", "noisy"]);

        let window = ReferenceWindow::new(
            Box::new(MemoryReference::new().with_sequence("chr1", "ACGTACGT")),
            vec!["chr1".to_string()],
        );
        let mut context = FilterContext::new(&options, &header);
        context.reference = Some(Rc::new(RefCell::new(window)));
        let mut filter = ReadFilter::new(records().into_iter().map(Ok), context);

        let clean = filter.next().unwrap().unwrap();
        assert_eq!(clean.mapping_quality, 50);
        assert!(filter.next().is_none());
        assert_eq!(filter.stats().mapq_cap_rejected, 1);
    }

    #[test]
    fn test_baq_hook_runs_with_reference() {
        struct HalveQualities;

        impl BaqRecalibrator for HalveQualities {
            fn recalibrate(
                &mut self,
                record: &mut AlignedRecord,
                _reference: &[u8],
                _mode: BaqMode,
            ) -> Result<()> {
                for q in &mut record.quality_scores {
                    *q /= 2;
                }
                Ok(())
            }
        }

        let options = PileupOptions {
            baq: BaqMode::On,
            ..PileupOptions::permissive()
        };
        let header = header();
        let window = ReferenceWindow::new(
            Box::new(MemoryReference::new().with_sequence("chr1", "ACGTACGT")),
            vec!["chr1".to_string()],
        );
        let mut context = FilterContext::new(&options, &header);
        context.reference = Some(Rc::new(RefCell::new(window)));
        context.baq = Some(Rc::new(RefCell::new(HalveQualities)));

        let mut filter = ReadFilter::new(vec![Ok(record("r", 0))].into_iter(), context);
        let record = filter.next().unwrap().unwrap();
        assert_eq!(record.quality_scores, vec![20; 4]);
    }

    #[test]
    fn test_source_errors_pass_through() {
        let options = PileupOptions::default();
        let header = header();
        let source = vec![
            Ok(record("a", 0)),
            Err(Error::Internal("truncated".to_string())),
        ];
        let mut filter = ReadFilter::new(source.into_iter(), FilterContext::new(&options, &header));
        assert!(filter.next().unwrap().is_ok());
        assert!(filter.next().unwrap().is_err());
    }
}
