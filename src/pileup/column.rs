use crate::types::AlignedRecord;
use crate::{Error, Result};
use noodles::sam::alignment::record::cigar::Op;
use noodles::sam::alignment::record::cigar::op::Kind;
use std::rc::Rc;

/// One record's contribution to a single reference position.
#[derive(Debug, Clone)]
pub struct PileupEntry {
    pub record: Rc<AlignedRecord>,
    /// Offset into the read. For deletions and skips, the offset of the
    /// next aligned query base.
    pub query_offset: usize,
    /// Positive if an insertion follows this position, negative if a
    /// deletion does, zero otherwise.
    pub indel: i32,
    pub is_head: bool,
    pub is_tail: bool,
    pub is_deletion: bool,
    pub is_reference_skip: bool,
}

impl PileupEntry {
    pub fn base(&self) -> u8 {
        self.record.base_at(self.query_offset).unwrap_or(b'N')
    }

    pub fn quality(&self) -> u8 {
        self.record.quality_at(self.query_offset).unwrap_or(0)
    }

    pub fn mapping_quality(&self) -> u8 {
        self.record.mapping_quality
    }
}

/// A record in a file's active window with its CIGAR cursor.
///
/// The cursor only moves forward, so positions must be asked for in
/// increasing order.
#[derive(Debug)]
pub(crate) struct ActiveRead {
    record: Rc<AlignedRecord>,
    start: u64,
    end: u64,
    op_index: usize,
    op_ref_start: u64,
    op_query_start: usize,
}

impl ActiveRead {
    pub(crate) fn new(record: Rc<AlignedRecord>) -> Option<Self> {
        let start = record.alignment_start?;
        let end = record.alignment_end()?;
        Some(Self {
            record,
            start,
            end,
            op_index: 0,
            op_ref_start: start,
            op_query_start: 0,
        })
    }

    pub(crate) fn end(&self) -> u64 {
        self.end
    }

    pub(crate) fn entry_at(&mut self, position: u64) -> PileupEntry {
        let record = Rc::clone(&self.record);

        while let Some(&op) = record.cigar.get(self.op_index) {
            let len = op.len() as u64;
            if op.kind().consumes_reference() {
                if position < self.op_ref_start + len {
                    return self.entry_in_op(record, op, position);
                }
                self.op_ref_start += len;
            }
            if op.kind().consumes_read() {
                self.op_query_start += op.len();
            }
            self.op_index += 1;
        }

        // Nothing on the reference: the record covers its start once, with no aligned base.
        PileupEntry {
            record,
            query_offset: 0,
            indel: 0,
            is_head: true,
            is_tail: true,
            is_deletion: true,
            is_reference_skip: false,
        }
    }

    fn entry_in_op(&self, record: Rc<AlignedRecord>, op: Op, position: u64) -> PileupEntry {
        let offset_in_op = position - self.op_ref_start;
        let (query_offset, is_deletion, is_reference_skip) = match op.kind() {
            Kind::Deletion => (self.op_query_start, true, false),
            Kind::Skip => (self.op_query_start, true, true),
            _ => (self.op_query_start + offset_in_op as usize, false, false),
        };

        let indel = if offset_in_op + 1 == op.len() as u64 {
            following_indel(&record.cigar, self.op_index)
        } else {
            0
        };

        PileupEntry {
            query_offset,
            indel,
            is_head: position == self.start,
            is_tail: position + 1 == self.end,
            is_deletion,
            is_reference_skip,
            record,
        }
    }
}

/// Indel that starts right after the op at `index`.
fn following_indel(cigar: &[Op], index: usize) -> i32 {
    let Some(next) = cigar.get(index + 1) else {
        return 0;
    };

    match next.kind() {
        Kind::Deletion if cigar[index].kind() != Kind::Deletion => -(next.len() as i32),
        Kind::Insertion => next.len() as i32,
        Kind::Pad => {
            let mut inserted = 0;
            for op in &cigar[index + 2..] {
                match op.kind() {
                    Kind::Insertion => inserted += op.len() as i32,
                    Kind::Deletion
                    | Kind::Match
                    | Kind::Skip
                    | Kind::SequenceMatch
                    | Kind::SequenceMismatch => break,
                    _ => {}
                }
            }
            inserted
        }
        _ => 0,
    }
}

/// One input file's active window over its filtered record stream.
pub(crate) struct FilePileup<I> {
    name: String,
    source: I,
    pending: Option<AlignedRecord>,
    exhausted: bool,
    last_placement: Option<(usize, u64)>,
    active: Vec<ActiveRead>,
    depth_ceiling: usize,
}

impl<I> FilePileup<I>
where
    I: Iterator<Item = Result<AlignedRecord>>,
{
    pub(crate) fn new(name: String, source: I, depth_ceiling: usize) -> Self {
        Self {
            name,
            source,
            pending: None,
            exhausted: false,
            last_placement: None,
            active: Vec::new(),
            depth_ceiling,
        }
    }

    pub(crate) fn source(&self) -> &I {
        &self.source
    }

    pub(crate) fn has_active(&self) -> bool {
        !self.active.is_empty()
    }

    /// Placement of the next record not yet in the window.
    pub(crate) fn peek(&mut self) -> Result<Option<(usize, u64)>> {
        while self.pending.is_none() && !self.exhausted {
            let Some(result) = self.source.next() else {
                self.exhausted = true;
                break;
            };
            let record = result?;
            let Some(placement) = record.placement() else {
                tracing::debug!("Skipping unplaced record in {}", self.name);
                continue;
            };

            if let Some(last) = self.last_placement {
                if placement < last {
                    return Err(Error::UnsortedInput {
                        source_name: self.name.clone(),
                        reason: format!(
                            "record {} at {}:{} follows {}:{}",
                            String::from_utf8_lossy(&record.name),
                            placement.0,
                            placement.1,
                            last.0,
                            last.1
                        ),
                    });
                }
            }
            self.last_placement = Some(placement);
            self.pending = Some(record);
        }

        Ok(self.pending.as_ref().and_then(AlignedRecord::placement))
    }

    /// Drop records that end at or before `position`.
    pub(crate) fn retire(&mut self, position: u64) {
        self.active.retain(|read| read.end() > position);
    }

    /// Move every record starting at `at` into the window.
    pub(crate) fn load(&mut self, at: (usize, u64)) -> Result<()> {
        while self.peek()? == Some(at) {
            let Some(record) = self.pending.take() else {
                break;
            };
            if let Some(read) = ActiveRead::new(Rc::new(record)) {
                self.active.push(read);
            }

            if self.active.len() > self.depth_ceiling {
                return Err(Error::DepthCeilingExceeded {
                    source_name: self.name.clone(),
                    reference_id: at.0,
                    position: at.1,
                    depth: self.active.len(),
                    ceiling: self.depth_ceiling,
                });
            }
        }
        Ok(())
    }

    /// Entries of every active record at `position`, in arrival order.
    pub(crate) fn collect(&mut self, position: u64, column: &mut Vec<PileupEntry>) {
        column.extend(self.active.iter_mut().map(|read| read.entry_at(position)));
    }
}
