use super::{PileupSink, Site, TextOptions};
use crate::Result;
use crate::pileup::PileupEntry;
use crate::quality::nt16;
use std::io::Write;

/// Writes mpileup text: `name pos ref`, then per sample
/// `count bases quals [mapqs] [positions]`, tab separated.
pub struct TextFormatter<W: Write> {
    writer: W,
    options: TextOptions,
    line: Vec<u8>,
}

impl<W: Write> TextFormatter<W> {
    pub fn new(writer: W, options: TextOptions) -> Self {
        Self {
            writer,
            options,
            line: Vec::new(),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn write_bases(&mut self, site: &Site<'_>, entry: &PileupEntry) {
        let line = &mut self.line;
        let reverse = entry.record.is_reverse();
        let stranded = |c: u8| {
            if reverse {
                c.to_ascii_lowercase()
            } else {
                c.to_ascii_uppercase()
            }
        };

        if entry.is_head {
            line.push(b'^');
            line.push(phred_char(entry.mapping_quality()));
        }

        if entry.is_deletion {
            line.push(match (entry.is_reference_skip, reverse) {
                (true, true) => b'<',
                (true, false) => b'>',
                (false, _) => b'*',
            });
        } else {
            let base = entry.base();
            let matches_reference = base == b'='
                || (site.reference.is_some() && nt16(base) == nt16(site.reference_base));
            line.push(match (matches_reference, reverse) {
                (true, true) => b',',
                (true, false) => b'.',
                (false, _) => stranded(base),
            });
        }

        if entry.indel > 0 {
            line.push(b'+');
            line.extend_from_slice(entry.indel.to_string().as_bytes());
            for j in 1..=entry.indel as usize {
                line.push(stranded(
                    entry.record.base_at(entry.query_offset + j).unwrap_or(b'N'),
                ));
            }
        } else if entry.indel < 0 {
            line.extend_from_slice(entry.indel.to_string().as_bytes());
            for j in 1..=entry.indel.unsigned_abs() {
                line.push(stranded(site.reference_base_at(u64::from(j))));
            }
        }

        if entry.is_tail {
            line.push(b'$');
        }
    }
}

fn phred_char(q: u8) -> u8 {
    q.min(93) + 33
}

impl<W: Write> PileupSink for TextFormatter<W> {
    fn write_site(&mut self, site: &Site<'_>) -> Result<()> {
        self.line.clear();
        write!(
            self.line,
            "{}\t{}\t{}",
            site.reference_name,
            site.position + 1,
            site.reference_base as char
        )?;

        let min_base_quality = self.options.min_base_quality;
        for bucket in site.samples {
            let kept: Vec<&PileupEntry> = bucket
                .entries
                .iter()
                .filter(|entry| entry.quality() >= min_base_quality)
                .collect();
            write!(self.line, "\t{}\t", kept.len())?;

            if bucket.entries.is_empty() {
                self.line.extend_from_slice(b"*\t*");
                if self.options.show_mapping_quality {
                    self.line.extend_from_slice(b"\t*");
                }
                if self.options.show_positions {
                    self.line.extend_from_slice(b"\t*");
                }
                continue;
            }

            for entry in &kept {
                self.write_bases(site, entry);
            }

            self.line.push(b'\t');
            for entry in &kept {
                self.line.push(phred_char(entry.quality()));
            }

            if self.options.show_mapping_quality {
                self.line.push(b'\t');
                for entry in &kept {
                    self.line.push(phred_char(entry.mapping_quality()));
                }
            }

            if self.options.show_positions {
                self.line.push(b'\t');
                for (i, entry) in kept.iter().enumerate() {
                    if i > 0 {
                        self.line.push(b',');
                    }
                    write!(self.line, "{}", entry.query_offset + 1)?;
                }
            }
        }

        self.line.push(b'\n');
        self.writer.write_all(&self.line)?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}
