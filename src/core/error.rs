use thiserror::Error;

/// Boxed underlying cause carried by [`CodexError::ResolutionFailed`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum CodexError {
    #[error("Schema violation at {path}: {reason}")]
    SchemaViolation { path: String, reason: String },

    #[error("Source {source_id}: invalid exclusion range (start={start} > end={end})")]
    InvalidRange {
        source_id: String,
        start: u64,
        end: u64,
    },

    #[error("Source {source_id}: exclusion #{index} is missing start or end")]
    IncompleteRange { source_id: String, index: usize },

    #[error(
        "Source {source_id}: exclusions overlap ({first_start}-{first_end} and {second_start}-{second_end})"
    )]
    OverlappingRanges {
        source_id: String,
        first_start: u64,
        first_end: u64,
        second_start: u64,
        second_end: u64,
    },

    #[error("Unknown function '{name}': not present in the functions map")]
    UnknownFunction { name: String },

    #[error("Failed to resolve {locator}: {cause}")]
    ResolutionFailed {
        locator: String,
        #[source]
        cause: BoxError,
    },

    #[error("Integrity mismatch for source {source_id}: expected {expected}, observed {observed}")]
    IntegrityMismatch {
        source_id: String,
        expected: String,
        observed: String,
    },

    #[error("Source {source_id} has no declared baseline digest (observed {observed})")]
    MissingBaseline { source_id: String, observed: String },

    #[error("Invalid descriptor '{name}': {reason}")]
    InvalidDescriptor { name: String, reason: String },

    #[error("Unsupported text encoding: {0}")]
    UnsupportedEncoding(String),

    #[error("Unsupported spec_version {found} (supported: {supported})")]
    UnsupportedVersion { found: String, supported: String },

    #[error("Transport setup failed: {0}")]
    Transport(#[source] BoxError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),
}

impl CodexError {
    pub fn schema(path: impl Into<String>, reason: impl Into<String>) -> Self {
        CodexError::SchemaViolation {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn resolution(locator: impl Into<String>, cause: impl Into<BoxError>) -> Self {
        CodexError::ResolutionFailed {
            locator: locator.into(),
            cause: cause.into(),
        }
    }

    /// True for errors that belong to one source and can be isolated in
    /// permissive mode.
    pub fn is_per_source(&self) -> bool {
        matches!(
            self,
            CodexError::InvalidRange { .. }
                | CodexError::IncompleteRange { .. }
                | CodexError::OverlappingRanges { .. }
                | CodexError::UnknownFunction { .. }
                | CodexError::ResolutionFailed { .. }
                | CodexError::IntegrityMismatch { .. }
                | CodexError::MissingBaseline { .. }
                | CodexError::UnsupportedEncoding(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, CodexError>;
