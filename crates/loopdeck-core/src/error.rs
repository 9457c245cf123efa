//! Loader pipeline error types

use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by the background loader/analyzer pipeline.
///
/// A failed load aborts that attempt and leaves the live track untouched;
/// the error crosses to the control thread inside the result message and is
/// never raised on the audio callback.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Failed to open {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unrecognized audio format: {0}")]
    Probe(String),

    #[error("No decodable audio track in file")]
    NoAudioTrack,

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Sample rate conversion failed: {0}")]
    Resample(String),

    #[error("Failed to persist processed audio to {}: {reason}", path.display())]
    Persist { path: PathBuf, reason: String },

    #[error("Decoded file contains no samples")]
    EmptyFile,
}

/// Result alias for loader operations.
pub type LoadResult<T> = Result<T, LoadError>;
