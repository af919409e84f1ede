//! Partitioning of per-file pileup columns into per-sample buckets.

use crate::pileup::{PileupColumns, PileupEntry};
use crate::types::AlignmentHeader;
use crate::{Error, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The entries of one sample at the current position.
#[derive(Debug, Clone, Default)]
pub struct SampleBucket {
    pub name: String,
    pub entries: Vec<PileupEntry>,
}

#[derive(Debug, Clone)]
struct FileSamples {
    path: PathBuf,
    by_read_group: HashMap<String, usize>,
    default_sample: Option<usize>,
}

/// Read group to sample resolution for every input file.
///
/// Built once from the headers and never changed during a run.
#[derive(Debug, Clone, Default)]
pub struct ReadGroupMap {
    samples: Vec<String>,
    files: Vec<FileSamples>,
    ignore_read_groups: bool,
}

impl ReadGroupMap {
    /// Each `@RG` with a sample name maps to that sample; samples with the
    /// same name in different files are merged. A file with no such `@RG`,
    /// or any file when `ignore_read_groups` is set, is a sample of its own
    /// named after its path.
    pub fn build(files: &[(&Path, &AlignmentHeader)], ignore_read_groups: bool) -> Self {
        let mut samples = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut intern = |name: &str| -> usize {
            *index.entry(name.to_string()).or_insert_with(|| {
                samples.push(name.to_string());
                samples.len() - 1
            })
        };

        let mut file_samples = Vec::with_capacity(files.len());
        for (path, header) in files {
            let mut by_read_group = HashMap::new();
            if !ignore_read_groups {
                for read_group in &header.read_groups {
                    if let Some(sample) = &read_group.sample {
                        by_read_group.insert(read_group.id.clone(), intern(sample));
                    }
                }
            }

            let default_sample = by_read_group
                .is_empty()
                .then(|| intern(&path.display().to_string()));

            file_samples.push(FileSamples {
                path: path.to_path_buf(),
                by_read_group,
                default_sample,
            });
        }

        tracing::info!(
            "{} samples in {} input files",
            samples.len(),
            file_samples.len()
        );

        Self {
            samples,
            files: file_samples,
            ignore_read_groups,
        }
    }

    pub fn samples(&self) -> &[String] {
        &self.samples
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    /// Sample index for a record of file `file` tagged with `read_group`.
    ///
    /// A tag the header does not map to a sample is an error, even when the
    /// file has a default sample. Untagged records, and every record when read
    /// groups are ignored, go to the default sample.
    pub fn resolve(&self, file: usize, read_group: Option<&str>) -> Result<usize> {
        let samples = self
            .files
            .get(file)
            .ok_or_else(|| Error::Internal(format!("no input file with index {}", file)))?;

        match read_group {
            Some(read_group) if !self.ignore_read_groups => samples
                .by_read_group
                .get(read_group)
                .copied()
                .ok_or_else(|| Error::SampleMapping {
                    read_group: read_group.to_string(),
                    path: samples.path.clone(),
                }),
            _ => samples.default_sample.ok_or_else(|| Error::MissingReadGroup {
                path: samples.path.clone(),
            }),
        }
    }
}

/// Re-partitions per-file columns into per-sample buckets.
pub struct SampleGrouper {
    map: ReadGroupMap,
    buckets: Vec<SampleBucket>,
}

impl SampleGrouper {
    pub fn new(map: ReadGroupMap) -> Self {
        let buckets = map
            .samples()
            .iter()
            .map(|name| SampleBucket {
                name: name.clone(),
                entries: Vec::new(),
            })
            .collect();
        Self { map, buckets }
    }

    pub fn map(&self) -> &ReadGroupMap {
        &self.map
    }

    /// Buckets for `columns`, one per sample in sample order. Entries keep
    /// file order, then arrival order.
    pub fn group(&mut self, columns: &PileupColumns<'_>) -> Result<&[SampleBucket]> {
        for bucket in &mut self.buckets {
            bucket.entries.clear();
        }

        for (file, column) in columns.columns.iter().enumerate() {
            for entry in column {
                let sample = self.map.resolve(file, entry.record.read_group.as_deref())?;
                self.buckets[sample].entries.push(entry.clone());
            }
        }

        Ok(&self.buckets)
    }
}
