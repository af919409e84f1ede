//! Open files, parsed headers and loaded indices, kept for the life of a run.
//!
//! Entries are only ever added; the cache is torn down once by [`ResourceCache::close`].

use crate::storage::{AlignmentStore, RecordStream};
use crate::types::{AlignmentHeader, Region};
use crate::{Error, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Counters describing how often storage was actually touched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub files_opened: usize,
    pub headers_parsed: usize,
    pub indices_loaded: usize,
    pub hits: usize,
}

pub struct CacheEntry<S: AlignmentStore> {
    path: PathBuf,
    handle: S::Handle,
    header: AlignmentHeader,
    index: Option<S::Index>,
}

impl<S: AlignmentStore> CacheEntry<S> {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &AlignmentHeader {
        &self.header
    }

    pub fn has_index(&self) -> bool {
        self.index.is_some()
    }
}

/// One file's record stream for the current region.
pub struct FileStream<'a> {
    pub path: &'a Path,
    pub header: &'a AlignmentHeader,
    pub records: RecordStream<'a>,
}

pub struct ResourceCache<S: AlignmentStore> {
    store: S,
    entries: Vec<CacheEntry<S>>,
    by_path: HashMap<PathBuf, usize>,
    stats: CacheStats,
}

impl<S: AlignmentStore> ResourceCache<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            entries: Vec::new(),
            by_path: HashMap::new(),
            stats: CacheStats::default(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Return the entry for `path`, opening the file and parsing its header
    /// on first use. The index is loaded the first time `need_index` is set.
    pub fn acquire(&mut self, path: &Path, need_index: bool) -> Result<&CacheEntry<S>> {
        let slot = self.slot(path, need_index)?;
        Ok(&self.entries[slot])
    }

    fn slot(&mut self, path: &Path, need_index: bool) -> Result<usize> {
        let slot = match self.by_path.get(path) {
            Some(&slot) => {
                self.stats.hits += 1;
                tracing::debug!("Cache hit for {:?}", path);
                slot
            }
            None => {
                tracing::debug!("Cache miss for {:?}, opening", path);
                let mut handle = self.store.open(path)?;
                self.stats.files_opened += 1;
                let header = self.store.read_header(path, &mut handle)?;
                self.stats.headers_parsed += 1;

                self.entries.push(CacheEntry {
                    path: path.to_path_buf(),
                    handle,
                    header,
                    index: None,
                });
                let slot = self.entries.len() - 1;
                self.by_path.insert(path.to_path_buf(), slot);
                slot
            }
        };

        if need_index && self.entries[slot].index.is_none() {
            let index = self.store.load_index(path)?;
            self.stats.indices_loaded += 1;
            self.entries[slot].index = Some(index);
        }

        Ok(slot)
    }

    /// Lend one record stream per path, in the order given.
    ///
    /// With a region, each stream is an indexed query; without one, each file
    /// is scanned from its first record.
    pub fn open_streams<'a>(
        &'a mut self,
        paths: &[PathBuf],
        region: Option<&Region>,
    ) -> Result<Vec<FileStream<'a>>> {
        let mut slots = Vec::with_capacity(paths.len());
        for path in paths {
            let slot = self.slot(path, region.is_some())?;
            if slots.contains(&slot) {
                return Err(Error::InvalidInput(format!(
                    "{} given more than once",
                    path.display()
                )));
            }
            slots.push(slot);
        }

        let Self { store, entries, .. } = self;
        let store: &'a S = store;
        let mut lendable: Vec<Option<&'a mut CacheEntry<S>>> =
            entries.iter_mut().map(Some).collect();

        let mut streams = Vec::with_capacity(slots.len());
        for slot in slots {
            let entry = lendable[slot]
                .take()
                .ok_or_else(|| Error::Internal(format!("cache slot {} lent twice", slot)))?;
            let CacheEntry {
                path,
                handle,
                header,
                index,
            } = entry;
            let path: &'a PathBuf = path;
            let header: &'a AlignmentHeader = header;

            let records = match region {
                Some(region) => {
                    let index = index
                        .as_ref()
                        .ok_or_else(|| Error::index(path.as_path(), "index not loaded"))?;
                    store
                        .query(handle, index, region)
                        .map_err(|e| Error::RegionResolution {
                            region: describe(header, region),
                            path: path.clone(),
                            reason: e.to_string(),
                        })?
                }
                None => store.scan(handle)?,
            };

            streams.push(FileStream {
                path: path.as_path(),
                header,
                records,
            });
        }

        Ok(streams)
    }

    /// Tear the cache down, dropping every handle and index.
    pub fn close(self) -> CacheStats {
        tracing::debug!("Closing {} cached files", self.entries.len());
        self.stats
    }
}

fn describe(header: &AlignmentHeader, region: &Region) -> String {
    let name = header
        .reference_name(region.reference_id)
        .map_or_else(|| region.reference_id.to_string(), str::to_string);
    format!("{}:{}-{}", name, region.begin + 1, region.end)
}
