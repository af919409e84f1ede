use super::{PileupSink, Site};
use crate::Result;
use crate::pileup::PileupEntry;
use serde::Serialize;
use std::io::{self, Write};

#[derive(Serialize)]
struct SiteRecord<'a> {
    chrom: &'a str,
    /// 1-based, like the text output.
    pos: u64,
    #[serde(rename = "ref")]
    reference_base: char,
    samples: Vec<SampleRecord<'a>>,
}

#[derive(Serialize)]
struct SampleRecord<'a> {
    name: &'a str,
    depth: usize,
    entries: Vec<EntryRecord<'a>>,
}

#[derive(Serialize)]
struct EntryRecord<'a> {
    read: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    read_group: Option<&'a str>,
    base: char,
    quality: u8,
    mapping_quality: u8,
    query_offset: usize,
    indel: i32,
    reverse: bool,
    head: bool,
    tail: bool,
    deletion: bool,
    reference_skip: bool,
}

impl<'a> From<&'a PileupEntry> for EntryRecord<'a> {
    fn from(entry: &'a PileupEntry) -> Self {
        Self {
            read: String::from_utf8_lossy(&entry.record.name).into_owned(),
            read_group: entry.record.read_group.as_deref(),
            base: if entry.is_deletion {
                '*'
            } else {
                entry.base() as char
            },
            quality: entry.quality(),
            mapping_quality: entry.mapping_quality(),
            query_offset: entry.query_offset,
            indel: entry.indel,
            reverse: entry.record.is_reverse(),
            head: entry.is_head,
            tail: entry.is_tail,
            deletion: entry.is_deletion,
            reference_skip: entry.is_reference_skip,
        }
    }
}

/// Writes one JSON object per site, newline delimited.
pub struct JsonLinesSink<W: Write> {
    writer: W,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> PileupSink for JsonLinesSink<W> {
    fn write_site(&mut self, site: &Site<'_>) -> Result<()> {
        let record = SiteRecord {
            chrom: site.reference_name,
            pos: site.position + 1,
            reference_base: site.reference_base as char,
            samples: site
                .samples
                .iter()
                .map(|bucket| SampleRecord {
                    name: &bucket.name,
                    depth: bucket.entries.len(),
                    entries: bucket.entries.iter().map(EntryRecord::from).collect(),
                })
                .collect(),
        };

        serde_json::to_writer(&mut self.writer, &record).map_err(io::Error::from)?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::SampleBucket;
    use crate::types::{AlignedRecord, parse_cigar};
    use std::rc::Rc;

    #[test]
    fn test_one_object_per_line() {
        let record = AlignedRecord::new("read1", 0, 4, parse_cigar("3M").unwrap(), b"ACG", vec![35; 3])
            .with_read_group("rg1");
        let entry = PileupEntry {
            record: Rc::new(record),
            query_offset: 1,
            indel: 0,
            is_head: false,
            is_tail: false,
            is_deletion: false,
            is_reference_skip: false,
        };
        let samples = vec![
            SampleBucket {
                name: "NA1".to_string(),
                entries: vec![entry],
            },
            SampleBucket {
                name: "NA2".to_string(),
                entries: vec![],
            },
        ];
        let site = Site {
            reference_id: 0,
            reference_name: "chr1",
            position: 5,
            reference_base: b'C',
            reference: None,
            samples: &samples,
        };

        let mut sink = JsonLinesSink::new(Vec::new());
        sink.write_site(&site).unwrap();
        sink.write_site(&site).unwrap();
        sink.finish().unwrap();

        let output = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 2);

        let value: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(value["chrom"], "chr1");
        assert_eq!(value["pos"], 6);
        assert_eq!(value["ref"], "C");
        assert_eq!(value["samples"][0]["depth"], 1);
        assert_eq!(value["samples"][0]["entries"][0]["base"], "C");
        assert_eq!(value["samples"][0]["entries"][0]["read_group"], "rg1");
        assert_eq!(value["samples"][1]["entries"].as_array().unwrap().len(), 0);
    }
}
