//! Consumers of per-sample pileup sites.
//!
//! The driver hands every emitted position to a [`PileupSink`] as a [`Site`].
//! Two sinks ship with the crate:
//!
//! - [`TextFormatter`] - mpileup-style text, one line per site
//! - [`JsonLinesSink`] - one JSON object per site
//!
//! Variant callers and other backends implement [`PileupSink`] themselves.

mod json;
mod text;

pub use json::JsonLinesSink;
pub use text::TextFormatter;

use crate::Result;
use crate::sample::SampleBucket;

/// Output switches for the text format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextOptions {
    /// Entries with a lower base quality are left out.
    pub min_base_quality: u8,
    pub show_mapping_quality: bool,
    pub show_positions: bool,
}

impl Default for TextOptions {
    fn default() -> Self {
        Self {
            min_base_quality: 13,
            show_mapping_quality: false,
            show_positions: false,
        }
    }
}

/// One reference position with its per-sample entries.
#[derive(Debug, Clone, Copy)]
pub struct Site<'a> {
    pub reference_id: usize,
    pub reference_name: &'a str,
    /// 0-based.
    pub position: u64,
    /// `N` when no reference is available.
    pub reference_base: u8,
    /// The whole current reference sequence, if known.
    pub reference: Option<&'a [u8]>,
    pub samples: &'a [SampleBucket],
}

impl Site<'_> {
    /// Reference base `offset` positions after this site.
    pub fn reference_base_at(&self, offset: u64) -> u8 {
        self.reference
            .and_then(|reference| reference.get((self.position + offset) as usize))
            .copied()
            .unwrap_or(b'N')
    }
}

pub trait PileupSink {
    fn write_site(&mut self, site: &Site<'_>) -> Result<()>;

    /// Flush anything buffered. Called once after the last site.
    fn finish(&mut self) -> Result<()>;
}

impl<S: PileupSink + ?Sized> PileupSink for Box<S> {
    fn write_site(&mut self, site: &Site<'_>) -> Result<()> {
        (**self).write_site(site)
    }

    fn finish(&mut self) -> Result<()> {
        (**self).finish()
    }
}

/// Collects sites in memory as owned values.
#[derive(Debug, Default)]
pub struct CollectingSink {
    pub sites: Vec<CollectedSite>,
    pub finished: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectedSite {
    pub reference_id: usize,
    pub position: u64,
    pub reference_base: u8,
    /// Per sample: sample name and the read names of its entries.
    pub samples: Vec<(String, Vec<String>)>,
}

impl CollectedSite {
    pub fn depth(&self) -> usize {
        self.samples.iter().map(|(_, reads)| reads.len()).sum()
    }
}

impl PileupSink for CollectingSink {
    fn write_site(&mut self, site: &Site<'_>) -> Result<()> {
        self.sites.push(CollectedSite {
            reference_id: site.reference_id,
            position: site.position,
            reference_base: site.reference_base,
            samples: site
                .samples
                .iter()
                .map(|bucket| {
                    let reads = bucket
                        .entries
                        .iter()
                        .map(|entry| String::from_utf8_lossy(&entry.record.name).into_owned())
                        .collect();
                    (bucket.name.clone(), reads)
                })
                .collect(),
        });
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.finished = true;
        Ok(())
    }
}
