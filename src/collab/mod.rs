//! Interfaces to the external engines the pipeline drives.
//!
//! The pipeline only sees these traits. Concrete adapters live in the
//! submodules: OpenAI for speech and translation, tesseract for on-screen
//! text, ffmpeg for everything that touches media containers.

pub mod ffmpeg;
pub mod openai;
pub mod tesseract;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure reported by an external engine.
#[derive(Debug, Error)]
pub enum CollabError {
    #[error("{tool} exited unsuccessfully: {detail}")]
    Tool { tool: &'static str, detail: String },

    #[error("{service} request failed: {detail}")]
    Service { service: &'static str, detail: String },

    #[error("unexpected output from {tool}: {detail}")]
    Output { tool: &'static str, detail: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Image(#[from] image::ImageError),
}

pub type Result<T> = std::result::Result<T, CollabError>;

/// A speech segment as returned by the recognizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognizedSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

/// Stream properties of a video, fixed for the run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    pub frame_rate: f64,
    pub frame_count: u64,
}

impl VideoInfo {
    pub fn duration(&self) -> f64 {
        if self.frame_rate > 0.0 {
            self.frame_count as f64 / self.frame_rate
        } else {
            0.0
        }
    }

    /// Playback time of the frame at `index`.
    pub fn timestamp_of(&self, index: u64) -> f64 {
        if self.frame_rate > 0.0 {
            index as f64 / self.frame_rate
        } else {
            0.0
        }
    }
}

/// Turns an audio file into timed segments. Fails atomically.
#[async_trait]
pub trait Recognizer: Send + Sync {
    async fn transcribe(&self, audio: &Path, language: &str) -> Result<Vec<RecognizedSegment>>;
}

/// Translates one piece of text.
#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(&self, text: &str, source: &str, target: &str) -> Result<String>;
}

/// Reads text out of a single frame. An empty string means nothing was found.
#[async_trait]
pub trait TextDetector: Send + Sync {
    async fn detect(&self, frame: &RgbImage) -> Result<String>;
}

/// Pulls the audio track of a video into a file under `dest_dir`.
#[async_trait]
pub trait AudioExtractor: Send + Sync {
    async fn extract_audio(&self, video: &Path, dest_dir: &Path) -> Result<PathBuf>;
}

/// Sequential decoded frames of one video.
#[async_trait]
pub trait FrameReader: Send {
    fn info(&self) -> VideoInfo;

    /// Next frame in presentation order, or `None` at end of stream.
    async fn next_frame(&mut self) -> Result<Option<RgbImage>>;
}

/// Video-only encoder fed one frame at a time.
#[async_trait]
pub trait FrameWriter: Send {
    async fn write_frame(&mut self, frame: &RgbImage) -> Result<()>;

    /// Flush and close the output file.
    async fn finish(&mut self) -> Result<()>;
}

/// Opens videos for decoding and creates video-only encoders.
#[async_trait]
pub trait VideoBackend: Send + Sync {
    async fn open(&self, path: &Path) -> Result<Box<dyn FrameReader>>;

    async fn create_writer(&self, path: &Path, info: &VideoInfo) -> Result<Box<dyn FrameWriter>>;
}

/// Container-level operations used by the muxer.
#[async_trait]
pub trait StreamCopier: Send + Sync {
    /// Duration of the media file in seconds.
    async fn duration(&self, path: &Path) -> Result<f64>;

    /// Write `out` with the video stream of `video` and the audio stream of
    /// `audio_source`, without re-encoding.
    async fn copy_streams(&self, video: &Path, audio_source: &Path, out: &Path) -> Result<()>;
}
