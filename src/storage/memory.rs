use super::{AlignmentStore, RecordStream};
use crate::types::{AlignedRecord, AlignmentHeader, Region};
use crate::{Error, Result};
use std::cell::Cell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// One in-memory alignment file.
#[derive(Debug, Clone, Default)]
pub struct MemoryFile {
    pub header: AlignmentHeader,
    pub records: Vec<AlignedRecord>,
    pub indexed: bool,
}

/// Marker for a loaded in-memory index.
#[derive(Debug, Clone, Copy)]
pub struct MemoryIndex;

/// Alignment files held in memory, keyed by path.
///
/// Counts opens and index loads so callers can check how often the backing
/// "files" were touched.
#[derive(Debug, Default)]
pub struct MemoryStore {
    files: HashMap<PathBuf, Rc<MemoryFile>>,
    opens: Cell<usize>,
    index_loads: Cell<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an indexed file. Records are served in the order given.
    pub fn insert(
        &mut self,
        path: impl Into<PathBuf>,
        header: AlignmentHeader,
        records: Vec<AlignedRecord>,
    ) {
        self.files.insert(
            path.into(),
            Rc::new(MemoryFile {
                header,
                records,
                indexed: true,
            }),
        );
    }

    /// Register a file that has no index.
    pub fn insert_unindexed(
        &mut self,
        path: impl Into<PathBuf>,
        header: AlignmentHeader,
        records: Vec<AlignedRecord>,
    ) {
        self.files.insert(
            path.into(),
            Rc::new(MemoryFile {
                header,
                records,
                indexed: false,
            }),
        );
    }

    pub fn open_count(&self) -> usize {
        self.opens.get()
    }

    pub fn index_load_count(&self) -> usize {
        self.index_loads.get()
    }

    fn file(&self, path: &Path) -> Option<&Rc<MemoryFile>> {
        self.files.get(path)
    }
}

impl AlignmentStore for MemoryStore {
    type Handle = Rc<MemoryFile>;
    type Index = MemoryIndex;

    fn open(&self, path: &Path) -> Result<Rc<MemoryFile>> {
        let file = self
            .file(path)
            .ok_or_else(|| Error::open(path, "no such file"))?;
        self.opens.set(self.opens.get() + 1);
        Ok(Rc::clone(file))
    }

    fn read_header(&self, _path: &Path, handle: &mut Rc<MemoryFile>) -> Result<AlignmentHeader> {
        Ok(handle.header.clone())
    }

    fn load_index(&self, path: &Path) -> Result<MemoryIndex> {
        let file = self
            .file(path)
            .ok_or_else(|| Error::index(path, "no such file"))?;
        if !file.indexed {
            return Err(Error::index(path, "file is not indexed"));
        }
        self.index_loads.set(self.index_loads.get() + 1);
        Ok(MemoryIndex)
    }

    fn query<'a>(
        &'a self,
        handle: &'a mut Rc<MemoryFile>,
        _index: &'a MemoryIndex,
        region: &Region,
    ) -> Result<RecordStream<'a>> {
        let region = *region;
        Ok(Box::new(
            handle
                .records
                .iter()
                .filter(move |record| {
                    record.reference_sequence_id == Some(region.reference_id)
                        && record
                            .alignment_start
                            .zip(record.alignment_end())
                            .is_some_and(|(start, end)| start < region.end && end > region.begin)
                })
                .cloned()
                .map(Ok),
        ))
    }

    fn scan<'a>(&'a self, handle: &'a mut Rc<MemoryFile>) -> Result<RecordStream<'a>> {
        Ok(Box::new(handle.records.iter().cloned().map(Ok)))
    }
}
