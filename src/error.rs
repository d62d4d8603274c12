//! Error taxonomy for a pipeline run.
//!
//! [`PipelineError`] ends a run in `Failed`. [`ItemFailure`] is recovered at
//! the granularity of one segment, sample or frame and only shows up in the
//! run report.

use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

use crate::collab::CollabError;
use crate::config::ConfigError;
use crate::event::Source;
use crate::mux::MuxError;
use crate::render::FontError;

/// Fatal errors; each one aborts the run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Holds the lock file path.
    #[error("output directory is locked by {0}; remove it if no other run is active")]
    OutputLocked(PathBuf),

    #[error("audio extraction failed: {0}")]
    Extraction(#[source] CollabError),

    #[error("speech recognition failed: {0}")]
    Recognition(#[source] CollabError),

    #[error("video processing failed: {0}")]
    Video(#[source] CollabError),

    #[error(transparent)]
    Font(#[from] FontError),

    #[error("mux failed: {0}")]
    Mux(#[from] MuxError),

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// A per-item failure the run recovered from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ItemFailure {
    /// Translation failed; the source text was kept.
    Translation {
        source: Source,
        start: f64,
        message: String,
    },
    /// Detection failed for one sample; it produced no event.
    Detection { timestamp: f64, message: String },
    /// Rendering failed for one frame; it was encoded unmodified.
    Render { timestamp: f64, message: String },
}

impl std::fmt::Display for ItemFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Translation {
                source,
                start,
                message,
            } => write!(f, "translation of {source} event at {start:.1}s: {message}"),
            Self::Detection { timestamp, message } => {
                write!(f, "detection at {timestamp:.1}s: {message}")
            }
            Self::Render { timestamp, message } => {
                write!(f, "render at {timestamp:.3}s: {message}")
            }
        }
    }
}

/// Result of one item: always a usable value, plus the failure that was
/// recovered from, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct Recovered<T> {
    pub value: T,
    pub failure: Option<ItemFailure>,
}

impl<T> Recovered<T> {
    pub fn ok(value: T) -> Self {
        Self {
            value,
            failure: None,
        }
    }

    pub fn fallback(value: T, failure: ItemFailure) -> Self {
        Self {
            value,
            failure: Some(failure),
        }
    }
}
