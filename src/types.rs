use crate::{Error, Result};
use noodles::sam::alignment::record::Flags;
use noodles::sam::alignment::record::cigar::Op;
use noodles::sam::alignment::record::cigar::op::Kind;
use std::fmt;
use std::str::FromStr;

/// Mapping quality value meaning "not available".
pub const MISSING_MAPPING_QUALITY: u8 = 255;

/// One entry of a file's reference dictionary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceSequence {
    pub name: String,
    pub length: u64,
}

/// A declared `@RG` header line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadGroup {
    pub id: String,
    pub sample: Option<String>,
    pub platform: Option<String>,
}

/// The parts of an alignment file header the pileup core reads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlignmentHeader {
    pub reference_sequences: Vec<ReferenceSequence>,
    pub read_groups: Vec<ReadGroup>,
}

impl AlignmentHeader {
    pub fn reference_sequence_id(&self, name: &str) -> Option<usize> {
        self.reference_sequences.iter().position(|rs| rs.name == name)
    }

    pub fn reference_name(&self, reference_id: usize) -> Option<&str> {
        self.reference_sequences
            .get(reference_id)
            .map(|rs| rs.name.as_str())
    }
}

/// A region as requested by the user, not yet resolved against a header.
///
/// Coordinates are 0-based half-open; `None` means "from the start" or
/// "to the end" of the reference sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionSpec {
    pub reference_name: String,
    pub start: Option<u64>,
    pub end: Option<u64>,
}

impl RegionSpec {
    pub fn new(reference_name: impl Into<String>, start: Option<u64>, end: Option<u64>) -> Self {
        Self {
            reference_name: reference_name.into(),
            start,
            end,
        }
    }

    /// Resolve against a header, clamping the end to the reference length.
    pub fn resolve(&self, header: &AlignmentHeader) -> std::result::Result<Region, String> {
        let reference_id = header
            .reference_sequence_id(&self.reference_name)
            .ok_or_else(|| format!("reference sequence not found: {}", self.reference_name))?;
        let length = header.reference_sequences[reference_id].length;

        let begin = self.start.unwrap_or(0);
        let end = self.end.map_or(length, |end| end.min(length));
        if begin >= end {
            return Err(format!("empty interval {}..{} (length {})", begin, end, length));
        }

        Ok(Region {
            reference_id,
            begin,
            end,
        })
    }
}

impl FromStr for RegionSpec {
    type Err = Error;

    /// Parses `chr`, `chr:beg` or `chr:beg-end` with 1-based inclusive coordinates.
    fn from_str(s: &str) -> Result<Self> {
        let region: noodles::core::Region = s
            .parse()
            .map_err(|e| Error::InvalidInput(format!("invalid region '{}': {}", s, e)))?;

        let reference_name = String::from_utf8(region.name().to_vec())
            .map_err(|e| Error::InvalidInput(format!("invalid region name in '{}': {}", s, e)))?;
        let interval = region.interval();
        let start = interval.start().map(|p| usize::from(p) as u64 - 1);
        let end = interval.end().map(|p| usize::from(p) as u64);

        Ok(Self {
            reference_name,
            start,
            end,
        })
    }
}

impl fmt::Display for RegionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.reference_name)?;
        match (self.start, self.end) {
            (None, None) => Ok(()),
            (start, None) => write!(f, ":{}", start.unwrap_or(0) + 1),
            (start, Some(end)) => write!(f, ":{}-{}", start.unwrap_or(0) + 1, end),
        }
    }
}

/// A region resolved to a reference id: 0-based, half-open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub reference_id: usize,
    pub begin: u64,
    pub end: u64,
}

impl Region {
    pub fn contains(&self, reference_id: usize, position: u64) -> bool {
        reference_id == self.reference_id && position >= self.begin && position < self.end
    }
}

/// An alignment record as seen by the pileup core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlignedRecord {
    pub name: Vec<u8>,
    pub flags: Flags,
    pub reference_sequence_id: Option<usize>,
    /// 0-based leftmost aligned reference position.
    pub alignment_start: Option<u64>,
    pub mapping_quality: u8,
    pub cigar: Vec<Op>,
    /// Bases as upper-case ASCII.
    pub sequence: Vec<u8>,
    /// Raw Phred scores, one per base.
    pub quality_scores: Vec<u8>,
    pub read_group: Option<String>,
}

impl AlignedRecord {
    /// A mapped, unpaired, forward-strand record with mapping quality 60.
    pub fn new(
        name: impl Into<Vec<u8>>,
        reference_sequence_id: usize,
        alignment_start: u64,
        cigar: Vec<Op>,
        sequence: impl Into<Vec<u8>>,
        quality_scores: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            name: name.into(),
            flags: Flags::empty(),
            reference_sequence_id: Some(reference_sequence_id),
            alignment_start: Some(alignment_start),
            mapping_quality: 60,
            cigar,
            sequence: sequence.into(),
            quality_scores: quality_scores.into(),
            read_group: None,
        }
    }

    pub fn with_flags(mut self, flags: Flags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_mapping_quality(mut self, mapping_quality: u8) -> Self {
        self.mapping_quality = mapping_quality;
        self
    }

    pub fn with_read_group(mut self, read_group: impl Into<String>) -> Self {
        self.read_group = Some(read_group.into());
        self
    }

    /// Reference id and start, if the record is placed.
    pub fn placement(&self) -> Option<(usize, u64)> {
        Some((self.reference_sequence_id?, self.alignment_start?))
    }

    /// Number of reference bases consumed by the CIGAR.
    pub fn reference_span(&self) -> u64 {
        self.cigar
            .iter()
            .filter(|op| op.kind().consumes_reference())
            .map(|op| op.len() as u64)
            .sum()
    }

    /// Exclusive end on the reference; a record spanning no reference bases
    /// still occupies its start position.
    pub fn alignment_end(&self) -> Option<u64> {
        let start = self.alignment_start?;
        Some(start + self.reference_span().max(1))
    }

    pub fn is_reverse(&self) -> bool {
        self.flags.is_reverse_complemented()
    }

    pub fn base_at(&self, query_offset: usize) -> Option<u8> {
        self.sequence.get(query_offset).copied()
    }

    pub fn quality_at(&self, query_offset: usize) -> Option<u8> {
        self.quality_scores.get(query_offset).copied()
    }
}

/// Parse a textual CIGAR such as `5S20M2I10M`.
pub fn parse_cigar(cigar: &str) -> Result<Vec<Op>> {
    if cigar == "*" {
        return Ok(Vec::new());
    }

    let mut ops = Vec::new();
    let mut num_start = 0;

    for (i, c) in cigar.char_indices() {
        if c.is_ascii_digit() {
            continue;
        }
        let len: usize = cigar[num_start..i]
            .parse()
            .map_err(|_| Error::InvalidInput(format!("invalid CIGAR length in '{}'", cigar)))?;
        let kind = match c {
            'M' => Kind::Match,
            'I' => Kind::Insertion,
            'D' => Kind::Deletion,
            'N' => Kind::Skip,
            'S' => Kind::SoftClip,
            'H' => Kind::HardClip,
            'P' => Kind::Pad,
            '=' => Kind::SequenceMatch,
            'X' => Kind::SequenceMismatch,
            _ => {
                return Err(Error::InvalidInput(format!(
                    "unknown CIGAR operation '{}' in '{}'",
                    c, cigar
                )));
            }
        };
        ops.push(Op::new(kind, len));
        num_start = i + 1;
    }

    if num_start != cigar.len() {
        return Err(Error::InvalidInput(format!(
            "trailing length without operation in '{}'",
            cigar
        )));
    }

    Ok(ops)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> AlignmentHeader {
        AlignmentHeader {
            reference_sequences: vec![
                ReferenceSequence {
                    name: "chr1".to_string(),
                    length: 1000,
                },
                ReferenceSequence {
                    name: "chr2".to_string(),
                    length: 500,
                },
            ],
            read_groups: vec![],
        }
    }

    #[test]
    fn test_region_spec_parse_one_based() {
        let spec: RegionSpec = "chr1:101-200".parse().unwrap();
        assert_eq!(spec, RegionSpec::new("chr1", Some(100), Some(200)));
        assert_eq!(spec.to_string(), "chr1:101-200");
    }

    #[test]
    fn test_region_spec_whole_reference() {
        let spec: RegionSpec = "chr2".parse().unwrap();
        assert_eq!(spec.start, None);
        assert_eq!(spec.end, None);

        let region = spec.resolve(&header()).unwrap();
        assert_eq!(
            region,
            Region {
                reference_id: 1,
                begin: 0,
                end: 500
            }
        );
    }

    #[test]
    fn test_region_resolve_clamps_end() {
        let spec = RegionSpec::new("chr2", Some(400), Some(10_000));
        let region = spec.resolve(&header()).unwrap();
        assert_eq!(region.end, 500);
    }

    #[test]
    fn test_region_resolve_unknown_reference() {
        let spec = RegionSpec::new("chrUn", None, None);
        assert!(spec.resolve(&header()).is_err());
    }

    #[test]
    fn test_parse_cigar() {
        let ops = parse_cigar("5S20M2I10M3D4M").unwrap();
        assert_eq!(ops.len(), 6);
        assert_eq!(ops[0].kind(), Kind::SoftClip);
        assert_eq!(ops[3].len(), 10);
        assert_eq!(ops[4].kind(), Kind::Deletion);

        assert!(parse_cigar("10Q").is_err());
        assert!(parse_cigar("10M5").is_err());
        assert!(parse_cigar("*").unwrap().is_empty());
    }

    #[test]
    fn test_alignment_end() {
        let record = AlignedRecord::new(
            "r1",
            0,
            100,
            parse_cigar("5S10M2I3D5M").unwrap(),
            vec![b'A'; 22],
            vec![30; 22],
        );
        assert_eq!(record.reference_span(), 18);
        assert_eq!(record.alignment_end(), Some(118));

        let clipped = AlignedRecord::new("r2", 0, 7, parse_cigar("4S").unwrap(), b"ACGT", vec![30; 4]);
        assert_eq!(clipped.alignment_end(), Some(8));
    }
}
