//! Subtitle synthesis for videos.
//!
//! Speech and on-screen text are recognized, translated, merged into one
//! timed [`Track`] and exported as subtitle files or burned into a copy of
//! the video. The external engines are reached through the traits in
//! [`collab`]; [`pipeline::Pipeline`] drives a run.

pub mod cli;
pub mod collab;
pub mod config;
pub mod error;
pub mod event;
pub mod export;
pub mod mux;
pub mod pipeline;
pub mod render;
pub mod track;
pub mod wrap;

pub use config::{Config, ConfigError};
pub use error::{ItemFailure, PipelineError, Recovered};
pub use event::{Source, SubtitleEvent};
pub use pipeline::{
    CancellationToken, Collaborators, Outcome, Pipeline, Progress, RunHandle, RunReport, Stage,
};
pub use track::Track;
