//! Record-stream reader abstraction for alignment files.
//!
//! The pileup core never talks to a file format directly. It goes through an
//! [`AlignmentStore`], which knows how to open a file, read its header, load
//! its index, and stream records either for one region or for the whole file.
//!
//! # Implementations
//!
//! - [`BamStore`] - BAM files with BAI indices, via noodles
//! - [`MemoryStore`] - in-memory alignments, for tests and embedding callers
//!
//! # Example
//!
//! ```no_run
//! use mpileupr::storage::{AlignmentStore, BamStore};
//! use std::path::Path;
//!
//! let store = BamStore::new();
//! let path = Path::new("sample.bam");
//! let mut handle = store.open(path)?;
//! let header = store.read_header(path, &mut handle)?;
//! # Ok::<(), mpileupr::Error>(())
//! ```

mod bam;
mod memory;

pub use bam::{BamHandle, BamStore};
pub use memory::{MemoryFile, MemoryIndex, MemoryStore};

use crate::Result;
use crate::types::{AlignedRecord, AlignmentHeader, Region};
use std::path::Path;

/// Position-sorted records lent out of an open handle.
pub type RecordStream<'a> = Box<dyn Iterator<Item = Result<AlignedRecord>> + 'a>;

/// Storage backend trait for alignment files
pub trait AlignmentStore {
    /// An open file, positioned anywhere.
    type Handle;

    /// A loaded random-access index.
    type Index;

    /// Open a file for reading
    fn open(&self, path: &Path) -> Result<Self::Handle>;

    /// Parse the file header
    fn read_header(&self, path: &Path, handle: &mut Self::Handle) -> Result<AlignmentHeader>;

    /// Load the index that belongs to `path`
    fn load_index(&self, path: &Path) -> Result<Self::Index>;

    /// Records overlapping `region`, in coordinate order
    fn query<'a>(
        &'a self,
        handle: &'a mut Self::Handle,
        index: &'a Self::Index,
        region: &Region,
    ) -> Result<RecordStream<'a>>;

    /// Every record in the file from the first one, without an index
    fn scan<'a>(&'a self, handle: &'a mut Self::Handle) -> Result<RecordStream<'a>>;
}
