use crate::intervals::{self, TargetIntervals};
use crate::output::TextOptions;
use crate::types::RegionSpec;
use crate::{Error, Result};
use clap::{Parser, ValueEnum};
use noodles::sam::alignment::record::Flags;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Parser)]
#[command(name = "mpileupr")]
#[command(about = "Multi-sample pileup over many regions with cached BAM handles")]
pub struct Config {
    /// Input BAM files (coordinate-sorted)
    pub inputs: Vec<PathBuf>,

    /// File listing input BAM paths, one per line
    #[arg(short = 'b', long = "bam-list")]
    pub bam_list: Option<PathBuf>,

    /// Region to pile up (chr, chr:beg or chr:beg-end; 1-based); repeatable
    #[arg(short = 'r', long = "region")]
    pub regions: Vec<String>,

    /// BED file of regions processed one after another with a warm cache
    #[arg(long = "regions-file")]
    pub regions_file: Option<PathBuf>,

    /// Skip alignments and positions outside these targets (BED, or "chr pos" lines)
    #[arg(short = 'l', long = "positions")]
    pub positions: Option<PathBuf>,

    /// Indexed FASTA reference
    #[arg(short = 'f', long = "fasta-ref", env = "MPILEUPR_FASTA_REF")]
    pub fasta_ref: Option<PathBuf>,

    /// Output file [standard output]
    #[arg(short = 'o', long)]
    pub output: Option<PathBuf>,

    /// Output format
    #[arg(long = "output-format", value_enum, default_value = "text")]
    pub output_format: OutputFormat,

    /// Skip alignments with mapping quality below this
    #[arg(short = 'q', long = "min-MQ", default_value = "0")]
    pub min_mq: u8,

    /// Skip bases with base quality below this (text output)
    #[arg(short = 'Q', long = "min-BQ", default_value = "13")]
    pub min_bq: u8,

    /// Maximum per-file depth reported at a position; 0 for unlimited
    #[arg(short = 'd', long = "max-depth", default_value = "250")]
    pub max_depth: usize,

    /// Hard ceiling on alignments held per file at one position
    #[arg(long = "depth-ceiling", default_value = "1000000")]
    pub depth_ceiling: usize,

    /// Mapping quality capping threshold; effective above 10
    #[arg(short = 'C', long = "adjust-MQ", default_value = "0")]
    pub adjust_mq: u8,

    /// Base qualities use the Illumina 1.3+ encoding
    #[arg(short = '6', long = "illumina1.3+")]
    pub illumina13: bool,

    /// Do not discard anomalous read pairs
    #[arg(short = 'A', long = "count-orphans")]
    pub count_orphans: bool,

    /// File of read group ids to exclude
    #[arg(short = 'G', long = "exclude-RG")]
    pub exclude_rg: Option<PathBuf>,

    /// Ignore read groups: one input file is one sample
    #[arg(short = 'R', long = "ignore-RG")]
    pub ignore_rg: bool,

    /// Required flags: skip alignments missing any of these bits
    #[arg(long = "rf", visible_alias = "incl-flags", value_parser = parse_flags, default_value = "0")]
    pub incl_flags: Flags,

    /// Filter flags: skip alignments with any of these bits
    #[arg(
        long = "ff",
        visible_alias = "excl-flags",
        value_parser = parse_flags,
        default_value = "UNMAP,SECONDARY,QCFAIL,DUP"
    )]
    pub excl_flags: Flags,

    /// Disable read-pair overlap detection
    #[arg(short = 'x', long = "ignore-overlaps")]
    pub ignore_overlaps: bool,

    /// Output mapping qualities (text output)
    #[arg(short = 's', long = "output-MQ")]
    pub output_mq: bool,

    /// Output base positions on reads (text output)
    #[arg(short = 'O', long = "output-BP")]
    pub output_bp: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_level: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Base alignment quality handling.
///
/// The CLI never enables BAQ; it runs only when a recalibrator is attached
/// with `RegionDriver::with_baq`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BaqMode {
    #[default]
    Off,
    /// Apply BAQ, keeping existing BQ tags.
    On,
    /// Recompute BAQ from scratch.
    Redo,
}

/// Immutable run configuration shared by reference with every filter,
/// engine and grouper of a run.
#[derive(Debug, Clone)]
pub struct PileupOptions {
    pub min_mapping_quality: u8,
    pub min_base_quality: u8,
    pub required_flags: Flags,
    pub forbidden_flags: Flags,
    /// Per-file cap on reported entries at one position; 0 is unlimited.
    pub max_depth: usize,
    pub depth_ceiling: usize,
    pub legacy_qualities: bool,
    pub baq: BaqMode,
    /// Mapping-quality capping threshold; capping runs only above 10.
    pub cap_mapq_threshold: u8,
    pub exclude_orphans: bool,
    pub ignore_read_groups: bool,
    pub reconcile_overlaps: bool,
    pub excluded_read_groups: HashSet<String>,
}

impl Default for PileupOptions {
    fn default() -> Self {
        Self {
            min_mapping_quality: 0,
            min_base_quality: 13,
            required_flags: Flags::empty(),
            forbidden_flags: default_forbidden_flags(),
            max_depth: 250,
            depth_ceiling: 1_000_000,
            legacy_qualities: false,
            baq: BaqMode::Off,
            cap_mapq_threshold: 0,
            exclude_orphans: true,
            ignore_read_groups: false,
            reconcile_overlaps: true,
            excluded_read_groups: HashSet::new(),
        }
    }
}

impl PileupOptions {
    /// Every predicate switched off: all placed records pass.
    pub fn permissive() -> Self {
        Self {
            forbidden_flags: Flags::empty(),
            exclude_orphans: false,
            max_depth: 0,
            reconcile_overlaps: false,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.depth_ceiling == 0 {
            return Err(Error::InvalidInput(
                "depth ceiling must be positive".to_string(),
            ));
        }
        if self.max_depth > self.depth_ceiling {
            return Err(Error::InvalidInput(format!(
                "max depth {} exceeds the depth ceiling {}",
                self.max_depth, self.depth_ceiling
            )));
        }
        Ok(())
    }

    pub fn caps_mapping_quality(&self) -> bool {
        self.cap_mapq_threshold > 10
    }
}

pub fn default_forbidden_flags() -> Flags {
    Flags::UNMAPPED | Flags::SECONDARY | Flags::QC_FAIL | Flags::DUPLICATE
}

impl Config {
    pub fn pileup_options(&self) -> Result<PileupOptions> {
        let excluded_read_groups = match &self.exclude_rg {
            Some(path) => read_excluded_read_groups(path)?,
            None => HashSet::new(),
        };

        let options = PileupOptions {
            min_mapping_quality: self.min_mq,
            min_base_quality: self.min_bq,
            required_flags: self.incl_flags,
            forbidden_flags: self.excl_flags,
            max_depth: self.max_depth,
            depth_ceiling: self.depth_ceiling,
            legacy_qualities: self.illumina13,
            baq: BaqMode::Off,
            cap_mapq_threshold: self.adjust_mq,
            exclude_orphans: !self.count_orphans,
            ignore_read_groups: self.ignore_rg,
            reconcile_overlaps: !self.ignore_overlaps,
            excluded_read_groups,
        };
        options.validate()?;
        Ok(options)
    }

    /// Positional inputs followed by any listed in `--bam-list`.
    pub fn input_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = self.inputs.clone();
        if let Some(list) = &self.bam_list {
            files.extend(read_file_list(list)?);
        }
        if files.is_empty() {
            return Err(Error::InvalidInput("no input file given".to_string()));
        }
        Ok(files)
    }

    pub fn region_specs(&self) -> Result<Vec<RegionSpec>> {
        let mut regions = self
            .regions
            .iter()
            .map(|r| r.parse())
            .collect::<Result<Vec<RegionSpec>>>()?;
        if let Some(path) = &self.regions_file {
            regions.extend(intervals::read_regions_file(path)?);
        }
        Ok(regions)
    }

    pub fn targets(&self) -> Result<Option<TargetIntervals>> {
        self.positions
            .as_deref()
            .map(TargetIntervals::from_path)
            .transpose()
    }

    pub fn text_options(&self) -> TextOptions {
        TextOptions {
            min_base_quality: self.min_bq,
            show_mapping_quality: self.output_mq,
            show_positions: self.output_bp,
        }
    }
}

/// Parse a flag mask given as decimal, `0x` hex, or comma-separated names.
pub fn parse_flags(s: &str) -> std::result::Result<Flags, String> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        return u16::from_str_radix(hex, 16)
            .map(Flags::from)
            .map_err(|e| format!("invalid flag mask '{}': {}", s, e));
    }
    if s.starts_with(|c: char| c.is_ascii_digit()) {
        return s
            .parse::<u16>()
            .map(Flags::from)
            .map_err(|e| format!("invalid flag mask '{}': {}", s, e));
    }

    let mut flags = Flags::empty();
    for name in s.split(',').map(str::trim).filter(|n| !n.is_empty()) {
        flags |= match name.to_ascii_uppercase().as_str() {
            "PAIRED" => Flags::SEGMENTED,
            "PROPER_PAIR" => Flags::PROPERLY_SEGMENTED,
            "UNMAP" => Flags::UNMAPPED,
            "MUNMAP" => Flags::MATE_UNMAPPED,
            "REVERSE" => Flags::REVERSE_COMPLEMENTED,
            "MREVERSE" => Flags::MATE_REVERSE_COMPLEMENTED,
            "READ1" => Flags::FIRST_SEGMENT,
            "READ2" => Flags::LAST_SEGMENT,
            "SECONDARY" => Flags::SECONDARY,
            "QCFAIL" => Flags::QC_FAIL,
            "DUP" => Flags::DUPLICATE,
            "SUPPLEMENTARY" => Flags::SUPPLEMENTARY,
            other => return Err(format!("unknown flag name '{}'", other)),
        };
    }
    Ok(flags)
}

fn read_file_list(path: &Path) -> Result<Vec<PathBuf>> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| Error::InvalidInput(format!("{}: {}", path.display(), e)))?;

    let mut files = Vec::new();
    for line in text.lines().map(str::trim_end).filter(|l| !l.is_empty()) {
        let file = PathBuf::from(line);
        if !file.exists() {
            return Err(Error::InvalidInput(format!(
                "the file list {} appears broken, could not locate: {}",
                path.display(),
                line
            )));
        }
        files.push(file);
    }
    if files.is_empty() {
        return Err(Error::InvalidInput(format!(
            "no files read from {}",
            path.display()
        )));
    }
    Ok(files)
}

fn read_excluded_read_groups(path: &Path) -> Result<HashSet<String>> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| Error::InvalidInput(format!("{}: {}", path.display(), e)))?;
    Ok(text.split_whitespace().map(str::to_string).collect())
}
