//! Reattaching the original audio to a rendered, video-only file.

use std::path::Path;

use thiserror::Error;

use crate::collab::{CollabError, StreamCopier};

/// Smallest accepted duration difference, in seconds.
pub const MIN_DURATION_TOLERANCE: f64 = 0.5;

#[derive(Debug, Error)]
pub enum MuxError {
    #[error("rendered video is {rendered:.3}s but source is {original:.3}s (tolerance {tolerance:.3}s)")]
    DurationMismatch {
        rendered: f64,
        original: f64,
        tolerance: f64,
    },

    #[error("failed to probe {what}: {source}")]
    Probe {
        what: &'static str,
        source: CollabError,
    },

    #[error("stream copy failed: {0}")]
    Copy(#[source] CollabError),
}

/// Duration tolerance for a video at `frame_rate`: two frame periods, but at
/// least [`MIN_DURATION_TOLERANCE`].
pub fn tolerance_for(frame_rate: f64) -> f64 {
    if frame_rate > 0.0 {
        (2.0 / frame_rate).max(MIN_DURATION_TOLERANCE)
    } else {
        MIN_DURATION_TOLERANCE
    }
}

/// Combine the video stream of `rendered` with the audio of `original` into
/// `output`.
///
/// Durations must agree within `tolerance`; a mismatch is reported instead of
/// stretching either stream.
pub async fn remux(
    copier: &dyn StreamCopier,
    rendered: &Path,
    original: &Path,
    output: &Path,
    tolerance: f64,
) -> Result<(), MuxError> {
    let rendered_secs = copier
        .duration(rendered)
        .await
        .map_err(|source| MuxError::Probe {
            what: "rendered video",
            source,
        })?;
    let original_secs = copier
        .duration(original)
        .await
        .map_err(|source| MuxError::Probe {
            what: "source video",
            source,
        })?;

    if (rendered_secs - original_secs).abs() > tolerance {
        return Err(MuxError::DurationMismatch {
            rendered: rendered_secs,
            original: original_secs,
            tolerance,
        });
    }

    tracing::debug!(rendered_secs, original_secs, "durations agree, copying streams");

    copier
        .copy_streams(rendered, original, output)
        .await
        .map_err(MuxError::Copy)
}
