//! Timestamped text units produced by either input stream.

use serde::Serialize;
use thiserror::Error;

/// Default display time for an on-screen detection, in seconds.
pub const DEFAULT_ON_SCREEN_DURATION: f64 = 2.0;

/// Where an event came from.
///
/// Declaration order is the merge tie-break priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Source {
    /// Spoken dialogue from the speech recognizer.
    Speech,
    /// Text detected in the video image.
    OnScreen,
}

impl Source {
    pub fn label(self) -> &'static str {
        match self {
            Self::Speech => "speech",
            Self::OnScreen => "on-screen",
        }
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Reasons an event could not be built.
#[derive(Debug, Error, PartialEq)]
pub enum EventError {
    /// Text was empty after trimming; callers skip the event silently.
    #[error("event text is empty")]
    EmptyText,

    #[error("invalid event time range: {start}s..{end}s")]
    InvalidRange { start: f64, end: f64 },
}

/// A single subtitle event with a start, an end and trimmed text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubtitleEvent {
    start: f64,
    end: f64,
    text: String,
    source: Source,
}

impl SubtitleEvent {
    /// Build a speech event from a recognized segment.
    pub fn speech(start: f64, end: f64, text: &str) -> Result<Self, EventError> {
        Self::new(start, end, text, Source::Speech)
    }

    /// Build an on-screen event from a single detection instant.
    ///
    /// The end time is synthesized as `timestamp + duration`.
    pub fn on_screen(timestamp: f64, text: &str, duration: f64) -> Result<Self, EventError> {
        Self::new(timestamp, timestamp + duration, text, Source::OnScreen)
    }

    fn new(start: f64, end: f64, text: &str, source: Source) -> Result<Self, EventError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(EventError::EmptyText);
        }
        if !start.is_finite() || !end.is_finite() || start < 0.0 || end < start {
            return Err(EventError::InvalidRange { start, end });
        }
        Ok(Self {
            start,
            end,
            text: text.to_string(),
            source,
        })
    }

    pub fn start(&self) -> f64 {
        self.start
    }

    pub fn end(&self) -> f64 {
        self.end
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn source(&self) -> Source {
        self.source
    }

    /// Whether the event is on screen at playback time `t` (inclusive bounds).
    pub fn is_active_at(&self, t: f64) -> bool {
        self.start <= t && t <= self.end
    }

    /// Same timing and source, different text.
    ///
    /// Returns `EmptyText` if the replacement trims to nothing.
    pub fn with_text(&self, text: &str) -> Result<Self, EventError> {
        Self::new(self.start, self.end, text, self.source)
    }
}
