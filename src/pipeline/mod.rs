//! The pipeline controller.
//!
//! A run walks `Extracting → Recognizing → DetectingText → Translating →
//! Merging → Exporting` and ends `Completed`, `Stopped` or `Failed`. The
//! cancellation token is polled at every stage boundary and inside every
//! per-item loop; whatever the outcome, the run's scratch directory, any
//! partial output and the output-directory lock are removed before
//! [`Pipeline::run`] returns.

mod cancel;
mod progress;

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tempfile::TempDir;
use time::OffsetDateTime;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

pub use cancel::CancellationToken;
pub use progress::{Progress, ProgressReporter};

use crate::collab::{
    AudioExtractor, Recognizer, StreamCopier, TextDetector, Translator, VideoBackend,
};
use crate::config::Config;
use crate::error::{ItemFailure, PipelineError, Recovered};
use crate::event::{EventError, Source, SubtitleEvent};
use crate::export;
use crate::mux;
use crate::render::{font_size_for, FontFace, FrameRenderer, RenderFrame, RenderStyle, Typeface};
use crate::track::{merge, Track};

const LOCK_FILE: &str = ".subfuse.lock";

/// Share of the export range spent writing text files before rendering.
const TEXT_EXPORT_SHARE: f64 = 0.05;
/// Share of the export range reserved for the final remux.
const MUX_SHARE: f64 = 0.05;

/// Non-terminal pipeline states, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Stage {
    Idle,
    Extracting,
    Recognizing,
    DetectingText,
    Translating,
    Merging,
    Exporting,
}

impl Stage {
    pub fn label(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Extracting => "extracting",
            Self::Recognizing => "recognizing",
            Self::DetectingText => "detecting text",
            Self::Translating => "translating",
            Self::Merging => "merging",
            Self::Exporting => "exporting",
        }
    }

    /// Fixed slice of overall progress owned by this stage, in percent.
    pub fn progress_range(self) -> (f32, f32) {
        match self {
            Self::Idle => (0.0, 0.0),
            Self::Extracting => (0.0, 10.0),
            Self::Recognizing => (10.0, 25.0),
            Self::DetectingText => (25.0, 45.0),
            Self::Translating => (45.0, 65.0),
            Self::Merging => (65.0, 65.0),
            Self::Exporting => (65.0, 100.0),
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// How a run ended.
#[derive(Debug)]
pub enum Outcome {
    Completed,
    /// The caller asked to stop; not an error.
    Stopped,
    Failed(PipelineError),
}

/// Everything the caller gets back from one run.
#[derive(Debug)]
pub struct RunReport {
    pub outcome: Outcome,
    /// Stage that was active when the run ended.
    pub stage: Stage,
    /// The merged track, if the run got that far.
    pub track: Option<Track>,
    /// Final files written, in the order they were produced.
    pub outputs: Vec<PathBuf>,
    /// Per-item failures the run recovered from.
    pub recovered: Vec<ItemFailure>,
    /// Events dropped for empty text or unusable times.
    pub discarded: usize,
}

impl RunReport {
    pub fn is_completed(&self) -> bool {
        matches!(self.outcome, Outcome::Completed)
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self.outcome, Outcome::Stopped)
    }

    pub fn error(&self) -> Option<&PipelineError> {
        match &self.outcome {
            Outcome::Failed(e) => Some(e),
            _ => None,
        }
    }
}

/// The external engines a run talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub audio: Arc<dyn AudioExtractor>,
    pub recognizer: Arc<dyn Recognizer>,
    pub translator: Arc<dyn Translator>,
    pub detector: Arc<dyn TextDetector>,
    pub video: Arc<dyn VideoBackend>,
    pub copier: Arc<dyn StreamCopier>,
}

/// Why the stage sequence stopped early.
enum Halt {
    Stopped,
    Failed(PipelineError),
}

impl From<PipelineError> for Halt {
    fn from(e: PipelineError) -> Self {
        Self::Failed(e)
    }
}

impl From<mux::MuxError> for Halt {
    fn from(e: mux::MuxError) -> Self {
        Self::Failed(e.into())
    }
}

/// Handle to a run started with [`Pipeline::spawn`].
pub struct RunHandle {
    token: CancellationToken,
    progress: UnboundedReceiver<Progress>,
    task: JoinHandle<RunReport>,
}

impl RunHandle {
    /// Ask the run to stop at its next check point.
    pub fn stop(&self) {
        self.token.cancel();
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Next progress update, or `None` once the run has ended.
    pub async fn next_progress(&mut self) -> Option<Progress> {
        self.progress.recv().await
    }

    pub async fn join(self) -> Result<RunReport, tokio::task::JoinError> {
        self.task.await
    }
}

pub struct Pipeline {
    config: Config,
    collab: Collaborators,
    typeface: Option<Arc<dyn Typeface>>,
}

impl Pipeline {
    pub fn new(config: Config, collab: Collaborators) -> Self {
        Self {
            config,
            collab,
            typeface: None,
        }
    }

    /// Use `typeface` for burn-in instead of loading a font at export time.
    pub fn with_typeface(mut self, typeface: Arc<dyn Typeface>) -> Self {
        self.typeface = Some(typeface);
        self
    }

    /// Run on a tokio worker with a fresh token and progress channel.
    pub fn spawn(self) -> RunHandle {
        let token = CancellationToken::new();
        let (tx, rx) = unbounded_channel();
        let worker_token = token.clone();
        let task = tokio::spawn(async move { self.run(worker_token, Some(tx)).await });

        RunHandle {
            token,
            progress: rx,
            task,
        }
    }

    /// Execute one run to a terminal state.
    pub async fn run(
        &self,
        token: CancellationToken,
        progress: Option<UnboundedSender<Progress>>,
    ) -> RunReport {
        let mut run = Run {
            config: &self.config,
            collab: &self.collab,
            typeface: self.typeface.clone(),
            token,
            progress: ProgressReporter::new(progress),
            stage: Stage::Idle,
            recovered: Vec::new(),
            outputs: Vec::new(),
            discarded: 0,
            track: None,
        };

        let outcome = match run.prepare() {
            Ok((lock, scratch)) => {
                let result = run.execute(scratch.path()).await;
                if let Err(e) = scratch.close() {
                    tracing::warn!(error = %e, "failed to remove scratch directory");
                }
                drop(lock);
                result
            }
            Err(halt) => Err(halt),
        };

        let outcome = match outcome {
            Ok(()) => {
                run.progress.finish("done");
                tracing::info!(
                    outputs = run.outputs.len(),
                    recovered = run.recovered.len(),
                    "run completed"
                );
                Outcome::Completed
            }
            Err(Halt::Stopped) => {
                tracing::info!(stage = %run.stage, "run stopped");
                Outcome::Stopped
            }
            Err(Halt::Failed(e)) => {
                tracing::error!(stage = %run.stage, error = %e, "run failed");
                Outcome::Failed(e)
            }
        };

        RunReport {
            outcome,
            stage: run.stage,
            track: run.track,
            outputs: run.outputs,
            recovered: run.recovered,
            discarded: run.discarded,
        }
    }
}

/// Mutable state of one run.
struct Run<'a> {
    config: &'a Config,
    collab: &'a Collaborators,
    typeface: Option<Arc<dyn Typeface>>,
    token: CancellationToken,
    progress: ProgressReporter,
    stage: Stage,
    recovered: Vec<ItemFailure>,
    outputs: Vec<PathBuf>,
    discarded: usize,
    track: Option<Track>,
}

impl Run<'_> {
    fn prepare(&mut self) -> Result<(OutputLock, TempDir), Halt> {
        self.config.validate().map_err(PipelineError::from)?;
        let lock = OutputLock::acquire(&self.config.output_dir)?;
        let scratch = tempfile::Builder::new()
            .prefix("subfuse-")
            .tempdir()
            .map_err(|source| PipelineError::Write {
                path: std::env::temp_dir(),
                source,
            })?;
        Ok((lock, scratch))
    }

    fn checkpoint(&self) -> Result<(), Halt> {
        if self.token.is_cancelled() {
            Err(Halt::Stopped)
        } else {
            Ok(())
        }
    }

    fn enter(&mut self, stage: Stage) -> Result<(), Halt> {
        self.checkpoint()?;
        self.stage = stage;
        tracing::info!(%stage, "entering stage");
        self.progress.report(stage, 0.0, stage.label());
        Ok(())
    }

    fn recover(&mut self, failure: ItemFailure) {
        tracing::warn!(%failure, "recovered");
        self.recovered.push(failure);
    }

    async fn execute(&mut self, scratch: &Path) -> Result<(), Halt> {
        self.enter(Stage::Extracting)?;
        let audio = self
            .collab
            .audio
            .extract_audio(&self.config.input, scratch)
            .await
            .map_err(PipelineError::Extraction)?;
        tracing::debug!(audio = %audio.display(), "audio extracted");
        self.checkpoint()?;

        self.enter(Stage::Recognizing)?;
        let speech = self.recognize(&audio).await?;

        let on_screen = if self.config.enable_on_screen_detection {
            self.enter(Stage::DetectingText)?;
            self.detect_text().await?
        } else {
            tracing::info!("on-screen detection disabled");
            Vec::new()
        };

        self.enter(Stage::Translating)?;
        let (speech, on_screen) = self.translate(speech, on_screen).await?;

        self.enter(Stage::Merging)?;
        let track = merge(speech, on_screen);
        tracing::info!(events = track.len(), "track merged");
        self.track = Some(track.clone());

        self.enter(Stage::Exporting)?;
        self.export(&track, scratch).await
    }

    async fn recognize(&mut self, audio: &Path) -> Result<Vec<SubtitleEvent>, Halt> {
        let segments = self
            .collab
            .recognizer
            .transcribe(audio, &self.config.source_language)
            .await
            .map_err(PipelineError::Recognition)?;
        self.checkpoint()?;

        let mut events = Vec::with_capacity(segments.len());
        for segment in segments {
            match SubtitleEvent::speech(segment.start, segment.end, &segment.text) {
                Ok(event) => events.push(event),
                Err(EventError::EmptyText) => self.discarded += 1,
                Err(e) => {
                    tracing::warn!(error = %e, "skipping malformed segment");
                    self.discarded += 1;
                }
            }
        }

        tracing::info!(segments = events.len(), "speech recognized");
        self.progress.report(Stage::Recognizing, 1.0, "speech recognized");
        Ok(events)
    }

    async fn detect_text(&mut self) -> Result<Vec<SubtitleEvent>, Halt> {
        let mut events = Vec::new();

        let mut reader = match self.collab.video.open(&self.config.input).await {
            Ok(reader) => reader,
            Err(e) => {
                self.recover(ItemFailure::Detection {
                    timestamp: 0.0,
                    message: format!("cannot open video: {e}"),
                });
                return Ok(events);
            }
        };
        let info = reader.info();
        let every = ((info.frame_rate * self.config.ocr_interval_secs).round() as u64).max(1);

        let mut index = 0u64;
        loop {
            self.checkpoint()?;

            let frame = match reader.next_frame().await {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    self.recover(ItemFailure::Detection {
                        timestamp: info.timestamp_of(index),
                        message: format!("decoding stopped: {e}"),
                    });
                    break;
                }
            };

            if index % every == 0 {
                let timestamp = info.timestamp_of(index);
                let sample = self.detect_sample(&frame, timestamp).await;
                self.checkpoint()?;
                if let Some(failure) = sample.failure {
                    self.recover(failure);
                }
                if let Some(event) = sample.value {
                    tracing::debug!(timestamp, text = event.text(), "on-screen text");
                    events.push(event);
                }
                let fraction = if info.frame_count > 0 {
                    index as f64 / info.frame_count as f64
                } else {
                    0.0
                };
                self.progress.report(
                    Stage::DetectingText,
                    fraction,
                    format!("scanning frames ({} found)", events.len()),
                );
            }
            index += 1;
        }

        tracing::info!(found = events.len(), frames = index, "on-screen detection done");
        Ok(events)
    }

    async fn detect_sample(
        &mut self,
        frame: &image::RgbImage,
        timestamp: f64,
    ) -> Recovered<Option<SubtitleEvent>> {
        match self.collab.detector.detect(frame).await {
            Ok(text) => {
                match sample_event(timestamp, &text, self.config.on_screen_duration_secs) {
                    Ok(event) => Recovered::ok(event),
                    Err(e) => {
                        tracing::warn!(timestamp, error = %e, "skipping unusable detection");
                        self.discarded += 1;
                        Recovered::ok(None)
                    }
                }
            }
            Err(e) => Recovered::fallback(
                None,
                ItemFailure::Detection {
                    timestamp,
                    message: e.to_string(),
                },
            ),
        }
    }

    async fn translate(
        &mut self,
        speech: Vec<SubtitleEvent>,
        on_screen: Vec<SubtitleEvent>,
    ) -> Result<(Vec<SubtitleEvent>, Vec<SubtitleEvent>), Halt> {
        if self.config.source_language == self.config.target_language {
            tracing::info!(language = %self.config.target_language, "source and target match, skipping translation");
            return Ok((speech, on_screen));
        }

        let total = speech.len() + on_screen.len();
        let mut done = 0usize;
        let mut out = (Vec::with_capacity(speech.len()), Vec::with_capacity(on_screen.len()));

        for (events, translated) in [(speech, &mut out.0), (on_screen, &mut out.1)] {
            for event in events {
                self.checkpoint()?;
                let result = self.translate_event(event).await;
                self.checkpoint()?;
                if let Some(failure) = result.failure {
                    self.recover(failure);
                }
                translated.push(result.value);

                done += 1;
                self.progress.report(
                    Stage::Translating,
                    done as f64 / total as f64,
                    format!("translated {done}/{total}"),
                );
            }
        }

        Ok(out)
    }

    async fn translate_event(&self, event: SubtitleEvent) -> Recovered<SubtitleEvent> {
        let failure = |message: String| ItemFailure::Translation {
            source: event.source(),
            start: event.start(),
            message,
        };

        let translated = self
            .collab
            .translator
            .translate(
                event.text(),
                &self.config.source_language,
                &self.config.target_language,
            )
            .await;

        match translated {
            Ok(text) => match event.with_text(&text) {
                Ok(translated) => {
                    tracing::debug!(from = event.text(), to = translated.text(), "translated");
                    Recovered::ok(translated)
                }
                Err(_) => {
                    let failure = failure("empty translation".to_string());
                    Recovered::fallback(event, failure)
                }
            },
            Err(e) => {
                let failure = failure(e.to_string());
                Recovered::fallback(event, failure)
            }
        }
    }

    async fn export(&mut self, track: &Track, scratch: &Path) -> Result<(), Halt> {
        let config = self.config;

        if config.export_srt {
            self.checkpoint()?;
            let content = export::format_subtitle_file(track, config.max_line_length);
            self.write_output(&config.srt_path(), &content)?;
        }

        if config.export_transcript {
            self.checkpoint()?;
            let content = export::format_transcript(
                track,
                &config.output_name,
                OffsetDateTime::now_utc(),
            );
            self.write_output(&config.transcript_path(), &content)?;
        }

        if config.export_ocr_text && track.from_source(Source::OnScreen).next().is_some() {
            self.checkpoint()?;
            let content = export::format_on_screen_text(track);
            self.write_output(&config.ocr_text_path(), &content)?;
        }

        self.progress
            .report(Stage::Exporting, TEXT_EXPORT_SHARE, "text files written");

        if config.enable_burn_in {
            self.checkpoint()?;
            self.burn_in(track, scratch).await?;
        }

        self.checkpoint()
    }

    fn write_output(&mut self, path: &Path, content: &str) -> Result<(), Halt> {
        export::write_atomic(path, content).map_err(|source| PipelineError::Write {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::info!(path = %path.display(), "wrote file");
        self.outputs.push(path.to_path_buf());
        Ok(())
    }

    async fn burn_in(&mut self, track: &Track, scratch: &Path) -> Result<(), Halt> {
        let config = self.config;
        let video = self.collab.video.clone();

        let mut reader = video
            .open(&config.input)
            .await
            .map_err(PipelineError::Video)?;
        let info = reader.info();
        tracing::debug!(
            width = info.width,
            height = info.height,
            duration = info.duration(),
            "burning in"
        );

        let typeface: Arc<dyn Typeface> = match &self.typeface {
            Some(typeface) => typeface.clone(),
            None => {
                let px = font_size_for(info.height);
                let face = FontFace::locate(config.font_path.as_deref(), px)
                    .map_err(PipelineError::from)?;
                tracing::debug!(px, "font loaded");
                Arc::new(face)
            }
        };
        let renderer = FrameRenderer::new(typeface, RenderStyle::for_frame(info.width, info.height));

        let rendered = scratch.join("rendered.mp4");
        let mut writer = video
            .create_writer(&rendered, &info)
            .await
            .map_err(PipelineError::Video)?;

        let render_share = 1.0 - TEXT_EXPORT_SHARE - MUX_SHARE;
        let mut index = 0u64;
        while let Some(image) = reader.next_frame().await.map_err(PipelineError::Video)? {
            self.checkpoint()?;

            let mut frame = RenderFrame::new(image, info.timestamp_of(index));
            if let Err(e) = renderer.render(&mut frame, track) {
                self.recover(ItemFailure::Render {
                    timestamp: frame.timestamp,
                    message: e.to_string(),
                });
            }
            writer
                .write_frame(&frame.image)
                .await
                .map_err(PipelineError::Video)?;
            index += 1;

            if info.frame_count > 0 && index % 30 == 0 {
                let fraction = (index as f64 / info.frame_count as f64).min(1.0);
                self.progress.report(
                    Stage::Exporting,
                    TEXT_EXPORT_SHARE + render_share * fraction,
                    format!("rendered frame {index}/{}", info.frame_count),
                );
            }
        }
        writer.finish().await.map_err(PipelineError::Video)?;
        tracing::info!(frames = index, "frames rendered");
        self.checkpoint()?;

        self.progress
            .report(Stage::Exporting, 1.0 - MUX_SHARE, "adding original audio");
        let target = config.burned_video_path();
        let partial = PartialFile::for_target(&target);
        mux::remux(
            &*self.collab.copier,
            &rendered,
            &config.input,
            partial.path(),
            mux::tolerance_for(info.frame_rate),
        )
        .await?;
        self.checkpoint()?;

        partial
            .commit(&target)
            .map_err(|source| PipelineError::Write {
                path: target.clone(),
                source,
            })?;
        tracing::info!(path = %target.display(), "wrote video");
        self.outputs.push(target);
        Ok(())
    }
}

/// Event for one detection sample. Empty text means nothing was on screen.
fn sample_event(
    timestamp: f64,
    text: &str,
    duration: f64,
) -> Result<Option<SubtitleEvent>, EventError> {
    match SubtitleEvent::on_screen(timestamp, text, duration) {
        Ok(event) => Ok(Some(event)),
        Err(EventError::EmptyText) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Exclusive claim on an output directory for the length of a run.
struct OutputLock {
    path: PathBuf,
}

impl OutputLock {
    fn acquire(dir: &Path) -> Result<Self, PipelineError> {
        let write_err = |source| PipelineError::Write {
            path: dir.to_path_buf(),
            source,
        };
        std::fs::create_dir_all(dir).map_err(write_err)?;

        let path = dir.join(LOCK_FILE);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => Ok(Self { path }),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(PipelineError::OutputLocked(path))
            }
            Err(e) => Err(write_err(e)),
        }
    }
}

impl Drop for OutputLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to release output lock");
        }
    }
}

/// An output being written next to its final name. Removed on drop unless
/// committed.
struct PartialFile {
    path: PathBuf,
    committed: bool,
}

impl PartialFile {
    fn for_target(target: &Path) -> Self {
        let stem = target
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("output");
        let ext = target.extension().and_then(|s| s.to_str()).unwrap_or("mp4");
        Self {
            path: target.with_file_name(format!(".{stem}.partial.{ext}")),
            committed: false,
        }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn commit(mut self, target: &Path) -> std::io::Result<()> {
        std::fs::rename(&self.path, target)?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if !self.committed && self.path.exists() {
            if let Err(e) = std::fs::remove_file(&self.path) {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to remove partial output");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_are_ordered() {
        assert!(Stage::Extracting < Stage::Recognizing);
        assert!(Stage::DetectingText < Stage::Translating);
        assert!(Stage::Merging < Stage::Exporting);
    }

    #[test]
    fn stage_ranges_tile_the_bar() {
        let stages = [
            Stage::Extracting,
            Stage::Recognizing,
            Stage::DetectingText,
            Stage::Translating,
            Stage::Merging,
            Stage::Exporting,
        ];
        let mut prev_end = 0.0;
        for stage in stages {
            let (lo, hi) = stage.progress_range();
            assert_eq!(lo, prev_end, "{stage} starts where the previous stage ended");
            assert!(hi >= lo);
            prev_end = hi;
        }
        assert_eq!(prev_end, 100.0);
    }

    #[test]
    fn lock_is_exclusive_and_released() {
        let dir = tempfile::tempdir().unwrap();

        let lock = OutputLock::acquire(dir.path()).unwrap();
        let err = match OutputLock::acquire(dir.path()) {
            Err(err @ PipelineError::OutputLocked(_)) => err,
            other => panic!("expected OutputLocked, got {:?}", other.map(|_| ())),
        };
        assert!(err.to_string().contains(".subfuse.lock"), "{err}");

        drop(lock);
        assert!(OutputLock::acquire(dir.path()).is_ok());
    }

    #[test]
    fn blank_detections_are_not_errors() {
        assert_eq!(sample_event(1.0, "  \n", 2.0), Ok(None));

        let event = sample_event(1.0, " 中文 ", 2.0).unwrap().unwrap();
        assert_eq!((event.start(), event.end(), event.text()), (1.0, 3.0, "中文"));

        assert!(matches!(
            sample_event(f64::NAN, "中文", 2.0),
            Err(EventError::InvalidRange { .. })
        ));
    }

    #[test]
    fn partial_file_is_removed_unless_committed() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("clip.vi.burned.mp4");

        let partial = PartialFile::for_target(&target);
        assert_eq!(partial.path(), dir.path().join(".clip.vi.burned.partial.mp4"));
        std::fs::write(partial.path(), b"half").unwrap();
        let partial_path = partial.path().to_path_buf();
        drop(partial);
        assert!(!partial_path.exists());

        let partial = PartialFile::for_target(&target);
        std::fs::write(partial.path(), b"whole").unwrap();
        partial.commit(&target).unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"whole");
    }
}
