use super::{AlignmentStore, RecordStream};
use crate::types::{
    AlignedRecord, AlignmentHeader, MISSING_MAPPING_QUALITY, ReadGroup, ReferenceSequence, Region,
};
use crate::{Error, Result};
use noodles::bam;
use noodles::bam::bai;
use noodles::bgzf::{self, VirtualPosition};
use noodles::core::Position;
use noodles::sam;
use noodles::sam::alignment::RecordBuf;
use noodles::sam::alignment::record::data::field::Tag;
use noodles::sam::alignment::record_buf::data::field::Value;
use noodles::sam::header::record::value::map::read_group::tag as rg_tag;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

/// BAM files on the local filesystem, indexed by BAI.
#[derive(Debug, Default, Clone, Copy)]
pub struct BamStore;

/// An open BAM reader with its header already consumed.
pub struct BamHandle {
    reader: bam::io::Reader<bgzf::Reader<File>>,
    header: sam::Header,
    records_start: VirtualPosition,
}

impl BamStore {
    pub fn new() -> Self {
        Self
    }

    /// Find the BAI for a BAM, trying `file.bam.bai` then `file.bai`.
    fn index_path(path: &Path) -> Option<PathBuf> {
        let appended = PathBuf::from(format!("{}.bai", path.display()));
        if appended.exists() {
            return Some(appended);
        }

        let replaced = path.with_extension("bai");
        if replaced.exists() {
            return Some(replaced);
        }

        None
    }
}

impl AlignmentStore for BamStore {
    type Handle = BamHandle;
    type Index = bai::Index;

    fn open(&self, path: &Path) -> Result<BamHandle> {
        let file = File::open(path).map_err(|e| Error::open(path, e))?;

        // bam::io::Reader::new wraps the file in a BGZF reader internally - don't double-wrap
        let mut reader = bam::io::Reader::new(file);
        let header = reader.read_header().map_err(|e| Error::header(path, e))?;
        let records_start = reader.get_ref().virtual_position();

        Ok(BamHandle {
            reader,
            header,
            records_start,
        })
    }

    fn read_header(&self, _path: &Path, handle: &mut BamHandle) -> Result<AlignmentHeader> {
        Ok(convert_header(&handle.header))
    }

    fn load_index(&self, path: &Path) -> Result<bai::Index> {
        let index_path =
            Self::index_path(path).ok_or_else(|| Error::index(path, "no .bai index found"))?;
        tracing::debug!("Loading index {:?}", index_path);
        bai::read(&index_path).map_err(|e| Error::index(path, e))
    }

    fn query<'a>(
        &'a self,
        handle: &'a mut BamHandle,
        index: &'a bai::Index,
        region: &Region,
    ) -> Result<RecordStream<'a>> {
        let BamHandle { reader, header, .. } = handle;

        let (name, _) = header
            .reference_sequences()
            .get_index(region.reference_id)
            .ok_or_else(|| {
                Error::InvalidInput(format!(
                    "reference sequence id {} not in header",
                    region.reference_id
                ))
            })?;

        // Regions are 0-based half-open, noodles uses 1-based closed
        let start = Position::try_from(region.begin as usize + 1)
            .map_err(|e| Error::InvalidInput(format!("invalid start position: {}", e)))?;
        let end = Position::try_from(region.end as usize)
            .map_err(|e| Error::InvalidInput(format!("invalid end position: {}", e)))?;
        let query_region = noodles::core::Region::new(name.to_vec(), start..=end);

        let header: &'a sam::Header = header;
        let records = reader.query(header, index, &query_region)?;

        Ok(Box::new(records.map(move |result| {
            result
                .and_then(|record| convert_record(header, &record))
                .map_err(Error::from)
        })))
    }

    fn scan<'a>(&'a self, handle: &'a mut BamHandle) -> Result<RecordStream<'a>> {
        let BamHandle {
            reader,
            header,
            records_start,
        } = handle;

        reader.get_mut().seek(*records_start)?;

        let header: &'a sam::Header = header;
        Ok(Box::new(reader.records().map(move |result| {
            result
                .and_then(|record| convert_record(header, &record))
                .map_err(Error::from)
        })))
    }
}

fn convert_header(header: &sam::Header) -> AlignmentHeader {
    let reference_sequences = header
        .reference_sequences()
        .iter()
        .map(|(name, reference_sequence)| ReferenceSequence {
            name: name.to_string(),
            length: usize::from(reference_sequence.length()) as u64,
        })
        .collect();

    let read_groups = header
        .read_groups()
        .iter()
        .map(|(id, read_group)| {
            let fields = read_group.other_fields();
            ReadGroup {
                id: id.to_string(),
                sample: fields.get(&rg_tag::SAMPLE).map(|s| s.to_string()),
                platform: fields.get(&rg_tag::PLATFORM).map(|p| p.to_string()),
            }
        })
        .collect();

    AlignmentHeader {
        reference_sequences,
        read_groups,
    }
}

fn convert_record(header: &sam::Header, record: &bam::Record) -> io::Result<AlignedRecord> {
    let record = RecordBuf::try_from_alignment_record(header, record)?;

    let read_group = match record.data().get(&Tag::READ_GROUP) {
        Some(Value::String(read_group)) => {
            Some(String::from_utf8_lossy(read_group.as_ref()).into_owned())
        }
        _ => None,
    };

    Ok(AlignedRecord {
        name: record.name().map(|name| name.to_vec()).unwrap_or_default(),
        flags: record.flags(),
        reference_sequence_id: record.reference_sequence_id(),
        alignment_start: record
            .alignment_start()
            .map(|position| usize::from(position) as u64 - 1),
        mapping_quality: record
            .mapping_quality()
            .map_or(MISSING_MAPPING_QUALITY, u8::from),
        cigar: record.cigar().as_ref().to_vec(),
        sequence: record.sequence().as_ref().to_vec(),
        quality_scores: record.quality_scores().as_ref().to_vec(),
        read_group,
    })
}
