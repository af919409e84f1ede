//! Base and mapping quality adjustments applied while records are filtered.

use crate::Result;
use crate::config::BaqMode;
use crate::types::AlignedRecord;
use noodles::sam::alignment::record::cigar::op::Kind;

/// Bases below this quality are not counted as evidence when capping.
const MIN_EVIDENCE_QUALITY: u8 = 13;

/// Per-mismatch contribution is capped at this quality.
const MAX_MISMATCH_QUALITY: u8 = 33;

/// Base alignment quality routine supplied by the caller.
///
/// Called once per admitted record whose reference sequence is known, after
/// legacy-quality rescaling and before mapping-quality capping.
pub trait BaqRecalibrator {
    fn recalibrate(
        &mut self,
        record: &mut AlignedRecord,
        reference: &[u8],
        mode: BaqMode,
    ) -> Result<()>;
}

/// Rescale Illumina 1.3+ qualities to Phred+0 in place.
pub fn rescale_legacy_qualities(quality_scores: &mut [u8]) {
    for q in quality_scores {
        *q = q.saturating_sub(31);
    }
}

/// Mapping-quality cap derived from how many high-quality mismatches and
/// clipped bases a record carries.
#[derive(Debug, Clone, Copy)]
pub struct MapqCapper {
    threshold: u8,
}

impl MapqCapper {
    pub fn new(threshold: u8) -> Self {
        Self { threshold }
    }

    /// The cap for `record`, or `None` if the mismatch burden exceeds the
    /// threshold and the record should be dropped.
    ///
    /// `reference` is the whole sequence the record is placed on.
    pub fn cap(&self, record: &AlignedRecord, reference: &[u8]) -> Option<u8> {
        let threshold = f64::from(self.threshold);
        let Some(start) = record.alignment_start else {
            return Some(record.mapping_quality);
        };

        let mut x = start as usize;
        let mut y = 0usize;
        let mut mismatches = 0u32;
        let mut aligned = 0u64;
        let mut mismatch_quality = 0u64;
        let mut clip_quality = 0u64;

        'ops: for op in &record.cigar {
            let len = op.len();
            match op.kind() {
                Kind::Match | Kind::SequenceMatch | Kind::SequenceMismatch => {
                    for j in 0..len {
                        let Some(&ref_base) = reference.get(x + j) else {
                            break 'ops;
                        };
                        let read_base = record.base_at(y + j).unwrap_or(b'N');
                        let q = record.quality_at(y + j).unwrap_or(0);

                        let (c1, c2) = (nt16(read_base), nt16(ref_base));
                        if c1 != 15 && c2 != 15 && q >= MIN_EVIDENCE_QUALITY {
                            aligned += 1;
                            if c1 != 0 && c2 != 0 && c1 != c2 {
                                mismatches += 1;
                                mismatch_quality += u64::from(q.min(MAX_MISMATCH_QUALITY));
                            }
                        }
                    }
                    x += len;
                    y += len;
                    aligned += len as u64;
                }
                Kind::Deletion => {
                    if x + len > reference.len() {
                        break;
                    }
                    x += len;
                }
                Kind::SoftClip => {
                    clip_quality += (y..y + len)
                        .map(|i| u64::from(record.quality_at(i).unwrap_or(0)))
                        .sum::<u64>();
                    y += len;
                }
                Kind::HardClip => clip_quality += u64::from(MIN_EVIDENCE_QUALITY) * len as u64,
                Kind::Insertion => y += len,
                Kind::Skip => x += len,
                Kind::Pad => {}
            }
        }

        let mut t = 1.0f64;
        for i in 0..mismatches {
            t *= aligned as f64 / f64::from(i + 1);
        }
        let mut t = mismatch_quality as f64 - 4.343 * t.ln() + clip_quality as f64 / 5.0;
        if t > threshold {
            return None;
        }
        if t < 0.0 {
            t = 0.0;
        }
        let t = ((threshold - t) / threshold).sqrt() * threshold;
        Some((t + 0.499) as u8)
    }
}

/// 4-bit nucleotide code: A=1, C=2, G=4, T=8, ambiguity codes as unions, N=15.
pub(crate) fn nt16(base: u8) -> u8 {
    match base.to_ascii_uppercase() {
        b'=' => 0,
        b'A' => 1,
        b'C' => 2,
        b'M' => 3,
        b'G' => 4,
        b'R' => 5,
        b'S' => 6,
        b'V' => 7,
        b'T' | b'U' => 8,
        b'W' => 9,
        b'Y' => 10,
        b'H' => 11,
        b'K' => 12,
        b'D' => 13,
        b'B' => 14,
        _ => 15,
    }
}
