//! Region-by-region pileup over many files with a warm resource cache.

use crate::cache::{CacheStats, ResourceCache};
use crate::config::{BaqMode, PileupOptions};
use crate::filter::{FilterContext, FilterStats, ReadFilter};
use crate::intervals::TargetIntervals;
use crate::output::{PileupSink, Site};
use crate::pileup::{EngineStats, PileupEngine};
use crate::quality::BaqRecalibrator;
use crate::reference::{ReferenceProvider, ReferenceWindow};
use crate::sample::{ReadGroupMap, SampleGrouper};
use crate::storage::AlignmentStore;
use crate::types::{AlignmentHeader, Region, RegionSpec};
use crate::{Error, Result};
use serde::Serialize;
use std::cell::RefCell;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Counters for one call to [`RegionDriver::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    pub regions: u64,
    pub positions_emitted: u64,
    pub positions_outside_region: u64,
    pub positions_off_target: u64,
    pub filter: FilterStats,
    pub engine: EngineStats,
}

pub struct RegionDriver<S: AlignmentStore> {
    cache: ResourceCache<S>,
    files: Vec<PathBuf>,
    options: PileupOptions,
    grouper: SampleGrouper,
    reference_names: Vec<String>,
    reference: Option<Rc<RefCell<ReferenceWindow>>>,
    targets: Option<TargetIntervals>,
    baq: Option<Rc<RefCell<dyn BaqRecalibrator>>>,
}

impl<S: AlignmentStore> RegionDriver<S> {
    /// Open every file (header only) and build the sample map.
    pub fn new(store: S, files: Vec<PathBuf>, options: PileupOptions) -> Result<Self> {
        options.validate()?;
        if files.is_empty() {
            return Err(Error::InvalidInput("no input file given".to_string()));
        }

        let mut seen = HashSet::new();
        for path in &files {
            if !seen.insert(path) {
                return Err(Error::InvalidInput(format!(
                    "{} given more than once",
                    path.display()
                )));
            }
        }

        let mut cache = ResourceCache::new(store);
        let mut headers = Vec::with_capacity(files.len());
        for path in &files {
            headers.push(cache.acquire(path, false)?.header().clone());
        }

        let labelled: Vec<(&Path, &AlignmentHeader)> = files
            .iter()
            .map(PathBuf::as_path)
            .zip(headers.iter())
            .collect();
        let map = ReadGroupMap::build(&labelled, options.ignore_read_groups);

        let reference_names = headers[0]
            .reference_sequences
            .iter()
            .map(|rs| rs.name.clone())
            .collect();

        tracing::info!("Opened {} input files", files.len());

        Ok(Self {
            cache,
            files,
            options,
            grouper: SampleGrouper::new(map),
            reference_names,
            reference: None,
            targets: None,
            baq: None,
        })
    }

    pub fn with_reference(mut self, provider: Box<dyn ReferenceProvider>) -> Self {
        let window = ReferenceWindow::new(provider, self.reference_names.clone());
        self.reference = Some(Rc::new(RefCell::new(window)));
        self
    }

    pub fn with_targets(mut self, targets: TargetIntervals) -> Self {
        self.targets = Some(targets);
        self
    }

    pub fn with_baq(mut self, baq: Rc<RefCell<dyn BaqRecalibrator>>) -> Self {
        self.baq = Some(baq);
        self
    }

    pub fn samples(&self) -> &[String] {
        self.grouper.map().samples()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Pile up each region in order, or every file end to end when
    /// `regions` is empty.
    pub fn run(&mut self, regions: &[RegionSpec], sink: &mut dyn PileupSink) -> Result<RunStats> {
        if self.options.baq != BaqMode::Off && self.baq.is_none() {
            return Err(Error::InvalidInput(
                "BAQ requested without a recalibrator".to_string(),
            ));
        }

        let mut stats = RunStats::default();

        if regions.is_empty() {
            tracing::info!("Piling up all alignments of {} files", self.files.len());
            self.pile(None, sink, &mut stats)?;
        } else {
            for spec in regions {
                let region = self.resolve(spec)?;
                tracing::info!("Piling up {}", spec);
                self.pile(Some(region), sink, &mut stats)?;
                stats.regions += 1;
            }
        }

        tracing::info!(
            "Pileup finished: {} sites written, {} of {} alignments used",
            stats.positions_emitted,
            stats.filter.accepted,
            stats.filter.seen
        );
        tracing::debug!(
            "Run stats: {}",
            serde_json::to_string(&stats).unwrap_or_default()
        );

        Ok(stats)
    }

    /// Resolve `spec` against every file; all must agree on the reference id.
    fn resolve(&mut self, spec: &RegionSpec) -> Result<Region> {
        let mut resolved: Option<Region> = None;

        for path in &self.files {
            let entry = self.cache.acquire(path, true)?;
            let region =
                spec.resolve(entry.header())
                    .map_err(|reason| Error::RegionResolution {
                        region: spec.to_string(),
                        path: path.clone(),
                        reason,
                    })?;

            match resolved {
                None => resolved = Some(region),
                Some(first) if first.reference_id != region.reference_id => {
                    return Err(Error::RegionResolution {
                        region: spec.to_string(),
                        path: path.clone(),
                        reason: format!(
                            "reference id {} differs from {} in {}",
                            region.reference_id,
                            first.reference_id,
                            self.files[0].display()
                        ),
                    });
                }
                Some(_) => {}
            }
        }

        resolved.ok_or_else(|| Error::Internal("no input files".to_string()))
    }

    fn pile(
        &mut self,
        region: Option<Region>,
        sink: &mut dyn PileupSink,
        stats: &mut RunStats,
    ) -> Result<()> {
        let Self {
            cache,
            files,
            options,
            grouper,
            reference_names,
            reference,
            targets,
            baq,
        } = self;
        let options: &PileupOptions = options;
        let targets = targets.as_ref();

        let streams = cache.open_streams(files, region.as_ref())?;
        let sources = streams
            .into_iter()
            .map(|stream| {
                let context = FilterContext {
                    options,
                    header: stream.header,
                    targets,
                    reference: reference.clone(),
                    baq: baq.clone(),
                };
                (
                    stream.path.display().to_string(),
                    ReadFilter::new(stream.records, context),
                )
            })
            .collect();
        let mut engine = PileupEngine::new(sources, options);

        while let Some(columns) = engine.advance()? {
            let (reference_id, position) = (columns.reference_id, columns.position);

            if let Some(region) = &region {
                if !region.contains(reference_id, position) {
                    stats.positions_outside_region += 1;
                    continue;
                }
            }

            let reference_name = reference_names
                .get(reference_id)
                .map(String::as_str)
                .ok_or_else(|| {
                    Error::Internal(format!("reference id {} not in header", reference_id))
                })?;

            if let Some(targets) = targets {
                if !targets.contains(reference_name, position) {
                    stats.positions_off_target += 1;
                    continue;
                }
            }

            let samples = grouper.group(&columns)?;

            let sequence = match reference {
                Some(window) => window.borrow_mut().sequence(reference_id)?,
                None => None,
            };
            let reference_base = sequence
                .as_deref()
                .and_then(|sequence| sequence.get(position as usize))
                .copied()
                .unwrap_or(b'N');

            sink.write_site(&Site {
                reference_id,
                reference_name,
                position,
                reference_base,
                reference: sequence.as_deref(),
                samples,
            })?;
            stats.positions_emitted += 1;
        }

        stats.engine += engine.stats();
        for filter in engine.sources() {
            stats.filter += filter.stats();
        }

        Ok(())
    }

    /// Tear down the cache, closing every file.
    pub fn close(self) -> CacheStats {
        self.cache.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::CollectingSink;
    use crate::reference::MemoryReference;
    use crate::storage::MemoryStore;
    use crate::types::{AlignedRecord, ReferenceSequence, parse_cigar};

    fn header() -> AlignmentHeader {
        AlignmentHeader {
            reference_sequences: vec![
                ReferenceSequence {
                    name: "chr1".to_string(),
                    length: 50,
                },
                ReferenceSequence {
                    name: "chr2".to_string(),
                    length: 50,
                },
            ],
            read_groups: vec![],
        }
    }

    fn record(name: &str, reference_id: usize, start: u64) -> AlignedRecord {
        AlignedRecord::new(
            name,
            reference_id,
            start,
            parse_cigar("4M").unwrap(),
            b"ACGT",
            vec![30; 4],
        )
    }

    fn driver() -> RegionDriver<MemoryStore> {
        let mut store = MemoryStore::new();
        store.insert(
            "a.bam",
            header(),
            vec![record("a1", 0, 2), record("a2", 1, 10)],
        );
        store.insert("b.bam", header(), vec![record("b1", 0, 4)]);
        RegionDriver::new(
            store,
            vec![PathBuf::from("a.bam"), PathBuf::from("b.bam")],
            PileupOptions::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_region_bounds_positions() {
        let mut driver = driver();
        let mut sink = CollectingSink::default();
        let stats = driver
            .run(&[RegionSpec::new("chr1", Some(3), Some(6))], &mut sink)
            .unwrap();

        let positions: Vec<u64> = sink.sites.iter().map(|s| s.position).collect();
        assert_eq!(positions, vec![3, 4, 5]);
        assert_eq!(sink.sites[1].depth(), 2);
        assert_eq!(stats.regions, 1);
        assert_eq!(stats.positions_emitted, 3);
        assert!(stats.positions_outside_region > 0);
    }

    #[test]
    fn test_whole_file_pass_without_regions() {
        let mut driver = driver();
        let mut sink = CollectingSink::default();
        let stats = driver.run(&[], &mut sink).unwrap();

        let placements: Vec<(usize, u64)> = sink
            .sites
            .iter()
            .map(|s| (s.reference_id, s.position))
            .collect();
        assert_eq!(
            placements,
            vec![
                (0, 2),
                (0, 3),
                (0, 4),
                (0, 5),
                (0, 6),
                (0, 7),
                (1, 10),
                (1, 11),
                (1, 12),
                (1, 13)
            ]
        );
        assert_eq!(stats.filter.accepted, 3);
        assert_eq!(stats.regions, 0);
    }

    #[test]
    fn test_unknown_region_name() {
        let mut driver = driver();
        let mut sink = CollectingSink::default();
        let error = driver
            .run(&[RegionSpec::new("chrX", None, None)], &mut sink)
            .unwrap_err();
        assert_eq!(error.category(), "RegionResolutionError");
        assert!(sink.sites.is_empty());
    }

    #[test]
    fn test_reference_bases_and_targets() {
        let targets = TargetIntervals::from_intervals([("chr1".to_string(), 4, 5)]);
        let mut driver = driver()
            .with_reference(Box::new(
                MemoryReference::new().with_sequence("chr1", "NNACGTAC"),
            ))
            .with_targets(targets);

        let mut sink = CollectingSink::default();
        let stats = driver.run(&[RegionSpec::new("chr1", None, None)], &mut sink).unwrap();

        assert_eq!(sink.sites.len(), 1);
        assert_eq!(sink.sites[0].position, 4);
        assert_eq!(sink.sites[0].reference_base, b'G');
        assert!(stats.positions_off_target > 0);
    }

    #[test]
    fn test_duplicate_inputs_rejected() {
        let mut store = MemoryStore::new();
        store.insert("a.bam", header(), vec![]);
        let result = RegionDriver::new(
            store,
            vec![PathBuf::from("a.bam"), PathBuf::from("a.bam")],
            PileupOptions::default(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_disagreeing_reference_ids() {
        let mut swapped = header();
        swapped.reference_sequences.reverse();

        let mut store = MemoryStore::new();
        store.insert("a.bam", header(), vec![]);
        store.insert("b.bam", swapped, vec![]);
        let mut driver = RegionDriver::new(
            store,
            vec![PathBuf::from("a.bam"), PathBuf::from("b.bam")],
            PileupOptions::default(),
        )
        .unwrap();

        let error = driver
            .run(&[RegionSpec::new("chr2", None, None)], &mut CollectingSink::default())
            .unwrap_err();
        assert!(matches!(error, Error::RegionResolution { .. }));
    }

    #[test]
    fn test_baq_without_hook_rejected() {
        let mut store = MemoryStore::new();
        store.insert("a.bam", header(), vec![]);
        let options = PileupOptions {
            baq: BaqMode::On,
            ..PileupOptions::default()
        };
        let mut driver = RegionDriver::new(store, vec![PathBuf::from("a.bam")], options).unwrap();
        assert!(driver.run(&[], &mut CollectingSink::default()).is_err());
    }
}
