use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to open {}: {reason}", path.display())]
    Open { path: PathBuf, reason: String },

    #[error("failed to read header of {}: {reason}", path.display())]
    Header { path: PathBuf, reason: String },

    #[error("failed to load index for {}: {reason}", path.display())]
    Index { path: PathBuf, reason: String },

    #[error("failed to resolve region '{region}' in {}: {reason}", path.display())]
    RegionResolution {
        region: String,
        path: PathBuf,
        reason: String,
    },

    #[error(
        "read group {read_group} used in file {} but absent from the header",
        path.display()
    )]
    SampleMapping { read_group: String, path: PathBuf },

    #[error(
        "alignment without a read group in {}, which declares read groups",
        path.display()
    )]
    MissingReadGroup { path: PathBuf },

    #[error(
        "{depth} active alignments in {source_name} at {reference_id}:{position} exceed the hard ceiling of {ceiling}"
    )]
    DepthCeilingExceeded {
        source_name: String,
        reference_id: usize,
        position: u64,
        depth: usize,
        ceiling: usize,
    },

    #[error("alignments in {source_name} are not coordinate-sorted: {reason}")]
    UnsortedInput { source_name: String, reason: String },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("reference error: {0}")]
    Reference(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Coarse classification used when a fatal error is reported.
    pub fn category(&self) -> &'static str {
        match self {
            Error::Open { .. } | Error::Header { .. } | Error::Index { .. } => "ResourceError",
            Error::RegionResolution { .. } => "RegionResolutionError",
            Error::SampleMapping { .. } | Error::MissingReadGroup { .. } => "SampleMappingError",
            Error::DepthCeilingExceeded { .. } => "DepthCeilingExceeded",
            Error::UnsortedInput { .. } => "UnsortedInput",
            Error::InvalidInput(_) => "InvalidInput",
            Error::Reference(_) => "ReferenceError",
            Error::Io(_) | Error::Internal(_) => "InternalError",
        }
    }

    pub(crate) fn open(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Error::Open {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn header(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Error::Header {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn index(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Error::Index {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}
