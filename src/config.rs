//! Run configuration.
//!
//! A [`Config`] is built once (see `cli.rs` for the argument side) and handed
//! to the pipeline, which never mutates it.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::event::DEFAULT_ON_SCREEN_DURATION;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("input file not found: {0}")]
    InputNotFound(PathBuf),

    #[error("max line length must be at least 1")]
    InvalidLineLength,

    #[error("{name} must be a positive number of seconds, got {value}")]
    InvalidSeconds { name: &'static str, value: f64 },

    #[error("output name must not be empty")]
    EmptyOutputName,
}

/// Everything a single pipeline run needs to know.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub input: PathBuf,
    pub output_dir: PathBuf,
    /// Base filename for every output.
    pub output_name: String,
    pub source_language: String,
    pub target_language: String,
    /// Recognizer model; trades accuracy for speed.
    pub model_size: String,
    pub translate_model: String,
    /// Characters per line in the subtitle file.
    pub max_line_length: u32,
    pub ocr_interval_secs: f64,
    pub ocr_language: String,
    pub on_screen_duration_secs: f64,
    pub enable_on_screen_detection: bool,
    pub enable_burn_in: bool,
    pub export_srt: bool,
    pub export_transcript: bool,
    pub export_ocr_text: bool,
    pub font_path: Option<PathBuf>,
}

impl Config {
    /// Defaults for `input`, writing next to it.
    pub fn new(input: impl Into<PathBuf>) -> Self {
        let input = input.into();
        let output_dir = input
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf();
        let output_name = input
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("output")
            .to_string();

        Self {
            input,
            output_dir,
            output_name,
            source_language: "zh".to_string(),
            target_language: "vi".to_string(),
            model_size: "whisper-1".to_string(),
            translate_model: "gpt-4o-mini".to_string(),
            max_line_length: 50,
            ocr_interval_secs: 2.0,
            ocr_language: "chi_sim".to_string(),
            on_screen_duration_secs: DEFAULT_ON_SCREEN_DURATION,
            enable_on_screen_detection: true,
            enable_burn_in: false,
            export_srt: true,
            export_transcript: true,
            export_ocr_text: false,
            font_path: None,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.input.is_file() {
            return Err(ConfigError::InputNotFound(self.input.clone()));
        }
        if self.max_line_length == 0 {
            return Err(ConfigError::InvalidLineLength);
        }
        for (name, value) in [
            ("ocr interval", self.ocr_interval_secs),
            ("on-screen duration", self.on_screen_duration_secs),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigError::InvalidSeconds { name, value });
            }
        }
        if self.output_name.trim().is_empty() {
            return Err(ConfigError::EmptyOutputName);
        }
        Ok(())
    }

    pub fn srt_path(&self) -> PathBuf {
        self.output_file(&format!("{}.srt", self.target_language))
    }

    pub fn transcript_path(&self) -> PathBuf {
        self.output_file("transcript.txt")
    }

    pub fn ocr_text_path(&self) -> PathBuf {
        self.output_file("ocr.txt")
    }

    pub fn burned_video_path(&self) -> PathBuf {
        self.output_file(&format!("{}.burned.mp4", self.target_language))
    }

    fn output_file(&self, suffix: &str) -> PathBuf {
        self.output_dir.join(format!("{}.{suffix}", self.output_name))
    }
}
