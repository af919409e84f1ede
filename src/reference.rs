//! Reference sequences for BAQ, mapping-quality capping and the reference
//! column of the output.

use crate::{Error, Result};
use noodles::fasta;
use std::fs::File;
use std::path::Path;
use std::rc::Rc;

/// Source of whole reference sequences by name.
pub trait ReferenceProvider {
    /// Upper-cased sequence for `name`, or `None` if the provider has no such
    /// sequence.
    fn fetch(&mut self, name: &str) -> Result<Option<Vec<u8>>>;
}

/// An indexed FASTA file (`.fai` next to it).
pub struct FastaReference {
    reader: fasta::io::IndexedReader<fasta::io::BufReader<File>>,
}

impl FastaReference {
    pub fn from_path(path: &Path) -> Result<Self> {
        let reader = fasta::io::indexed_reader::Builder::default()
            .build_from_path(path)
            .map_err(|e| Error::Reference(format!("{}: {}", path.display(), e)))?;
        Ok(Self { reader })
    }

    fn has_sequence(&self, name: &str) -> bool {
        // FAI Index wraps Vec<Record>, access via as_ref()
        self.reader
            .index()
            .as_ref()
            .iter()
            .any(|record| record.name() == name.as_bytes())
    }
}

impl ReferenceProvider for FastaReference {
    fn fetch(&mut self, name: &str) -> Result<Option<Vec<u8>>> {
        if !self.has_sequence(name) {
            return Ok(None);
        }

        let region = noodles::core::Region::new(name, ..);
        let record = self
            .reader
            .query(&region)
            .map_err(|e| Error::Reference(format!("failed to read {}: {}", name, e)))?;

        let mut sequence = record.sequence().as_ref().to_vec();
        sequence.make_ascii_uppercase();
        Ok(Some(sequence))
    }
}

/// Sequences held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryReference {
    sequences: Vec<(String, Vec<u8>)>,
}

impl MemoryReference {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sequence(mut self, name: impl Into<String>, sequence: impl AsRef<[u8]>) -> Self {
        self.sequences
            .push((name.into(), sequence.as_ref().to_ascii_uppercase()));
        self
    }
}

impl ReferenceProvider for MemoryReference {
    fn fetch(&mut self, name: &str) -> Result<Option<Vec<u8>>> {
        Ok(self
            .sequences
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, sequence)| sequence.clone()))
    }
}

/// One-slot cache of the reference sequence currently being piled up.
///
/// Shared between the driver and the read filters; the slot only changes
/// when a record or column on a different reference id is seen.
pub struct ReferenceWindow {
    provider: Box<dyn ReferenceProvider>,
    names: Vec<String>,
    current: Option<(usize, Option<Rc<[u8]>>)>,
    fetches: usize,
}

impl ReferenceWindow {
    /// `names` maps reference ids to the names the provider knows them by.
    pub fn new(provider: Box<dyn ReferenceProvider>, names: Vec<String>) -> Self {
        Self {
            provider,
            names,
            current: None,
            fetches: 0,
        }
    }

    /// Sequence for `reference_id`, or `None` if the provider lacks it.
    pub fn sequence(&mut self, reference_id: usize) -> Result<Option<Rc<[u8]>>> {
        if let Some((id, sequence)) = &self.current {
            if *id == reference_id {
                return Ok(sequence.clone());
            }
        }

        let sequence = match self.names.get(reference_id) {
            Some(name) => {
                self.fetches += 1;
                let sequence = self.provider.fetch(name)?;
                if sequence.is_none() {
                    tracing::warn!("Reference sequence {} not found in reference", name);
                }
                sequence.map(Rc::from)
            }
            None => None,
        };

        self.current = Some((reference_id, sequence.clone()));
        Ok(sequence)
    }

    /// Base at `position`, `N` when the sequence or position is unknown.
    pub fn base(&mut self, reference_id: usize, position: u64) -> Result<u8> {
        Ok(self
            .sequence(reference_id)?
            .and_then(|sequence| sequence.get(position as usize).copied())
            .unwrap_or(b'N'))
    }

    /// Number of sequences pulled from the provider so far.
    pub fn fetches(&self) -> usize {
        self.fetches
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn window() -> ReferenceWindow {
        let provider = MemoryReference::new()
            .with_sequence("chr1", "acgtacgt")
            .with_sequence("chr2", "GGGG");
        ReferenceWindow::new(
            Box::new(provider),
            vec!["chr1".to_string(), "chr2".to_string(), "chr3".to_string()],
        )
    }

    #[test]
    fn test_window_keeps_one_slot() {
        let mut window = window();
        assert_eq!(window.base(0, 1).unwrap(), b'C');
        assert_eq!(window.base(0, 3).unwrap(), b'T');
        assert_eq!(window.fetches(), 1);

        assert_eq!(window.base(1, 0).unwrap(), b'G');
        assert_eq!(window.base(0, 0).unwrap(), b'A');
        assert_eq!(window.fetches(), 3);
    }

    #[test]
    fn test_unknown_sequence_yields_n() {
        let mut window = window();
        assert_eq!(window.base(2, 0).unwrap(), b'N');
        assert_eq!(window.base(7, 0).unwrap(), b'N');
        assert_eq!(window.base(0, 100).unwrap(), b'N');
        assert!(window.sequence(2).unwrap().is_none());
    }

    #[test]
    fn test_fasta_reference() {
        let dir = tempfile::tempdir().unwrap();
        let fasta_path = dir.path().join("ref.fa");
        let mut fasta = File::create(&fasta_path).unwrap();
        writeln!(fasta, ">chr1").unwrap();
        writeln!(fasta, "acgt").unwrap();
        writeln!(fasta, "ACGT").unwrap();

        let mut fai = File::create(dir.path().join("ref.fa.fai")).unwrap();
        writeln!(fai, "chr1\t8\t6\t4\t5").unwrap();

        let mut reference = FastaReference::from_path(&fasta_path).unwrap();
        assert_eq!(reference.fetch("chr1").unwrap(), Some(b"ACGTACGT".to_vec()));
        assert_eq!(reference.fetch("chr9").unwrap(), None);
    }

    #[test]
    fn test_missing_fasta_is_reference_error() {
        let error = FastaReference::from_path(Path::new("missing.fa")).err().unwrap();
        assert_eq!(error.category(), "ReferenceError");
    }
}
