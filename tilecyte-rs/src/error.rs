use thiserror::Error;

/// Failure taxonomy for the tile pipeline.
///
/// `Configuration` aborts the whole run. `InsufficientData`, `UnmappedChannel`
/// and `DegenerateInput` fail a single tile, which the montage then reports as
/// a gap. `InconsistentGeometry` fails one region.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("insufficient data: {0}")]
    InsufficientData(String),

    #[error("channel {channel:?} has no {mapping} mapping")]
    UnmappedChannel { channel: String, mapping: &'static str },

    #[error("degenerate input: {0}")]
    DegenerateInput(String),

    #[error("inconsistent geometry: {0}")]
    InconsistentGeometry(String),

    #[error("artifact {0} was already recorded")]
    DuplicateArtifact(String),

    #[error("i/o error: {0}")]
    Io(String),
}

impl Error {
    /// Whether the error is confined to one tile (the run carries on).
    pub fn is_tile_local(&self) -> bool {
        matches!(
            self,
            Error::InsufficientData(_) | Error::UnmappedChannel { .. } | Error::DegenerateInput(_)
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Error::Configuration(_) => "configuration",
            Error::InsufficientData(_) => "insufficient_data",
            Error::UnmappedChannel { .. } => "unmapped_channel",
            Error::DegenerateInput(_) => "degenerate_input",
            Error::InconsistentGeometry(_) => "inconsistent_geometry",
            Error::DuplicateArtifact(_) => "duplicate_artifact",
            Error::Io(_) => "io",
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
