//! End-to-end runs against in-memory collaborators.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use image::{Rgb, RgbImage};
use tempfile::TempDir;
use tokio::sync::mpsc::unbounded_channel;
use tokio::sync::Notify;

use subfuse::collab::{
    AudioExtractor, CollabError, FrameReader, FrameWriter, RecognizedSegment, Recognizer,
    Result as CollabResult, StreamCopier, TextDetector, Translator, VideoBackend, VideoInfo,
};
use subfuse::mux::MuxError;
use subfuse::render::Typeface;
use subfuse::{
    CancellationToken, Collaborators, Config, ItemFailure, Outcome, Pipeline, PipelineError,
    Source, Stage,
};

const WIDTH: u32 = 160;
const HEIGHT: u32 = 120;
const FPS: f64 = 2.0;
const FRAMES: u64 = 8;

#[derive(Default)]
struct FakeAudio {
    written: Mutex<Option<PathBuf>>,
}

#[async_trait]
impl AudioExtractor for FakeAudio {
    async fn extract_audio(&self, _video: &Path, dest_dir: &Path) -> CollabResult<PathBuf> {
        let path = dest_dir.join("audio.wav");
        std::fs::write(&path, b"RIFF")?;
        *self.written.lock().unwrap() = Some(path.clone());
        Ok(path)
    }
}

/// Pauses inside a collaborator call until the test releases it.
#[derive(Default)]
struct Gate {
    entered: Notify,
    release: Notify,
}

struct FakeRecognizer {
    segments: Option<Vec<RecognizedSegment>>,
    gate: Option<Arc<Gate>>,
}

#[async_trait]
impl Recognizer for FakeRecognizer {
    async fn transcribe(&self, _audio: &Path, _language: &str) -> CollabResult<Vec<RecognizedSegment>> {
        if let Some(gate) = &self.gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
        self.segments.clone().ok_or(CollabError::Service {
            service: "recognizer",
            detail: "quota exceeded".to_string(),
        })
    }
}

struct FakeTranslator {
    dictionary: HashMap<&'static str, &'static str>,
}

#[async_trait]
impl Translator for FakeTranslator {
    async fn translate(&self, text: &str, _source: &str, _target: &str) -> CollabResult<String> {
        self.dictionary
            .get(text)
            .map(|t| t.to_string())
            .ok_or(CollabError::Service {
                service: "translator",
                detail: format!("no translation for {text}"),
            })
    }
}

/// Reads the frame index back out of the red channel of pixel (0, 0).
#[derive(Default)]
struct FakeDetector {
    texts: HashMap<u8, &'static str>,
    fail_on: Option<u8>,
    calls: AtomicUsize,
}

#[async_trait]
impl TextDetector for FakeDetector {
    async fn detect(&self, frame: &RgbImage) -> CollabResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let index = frame.get_pixel(0, 0).0[0];
        if self.fail_on == Some(index) {
            return Err(CollabError::Tool {
                tool: "tesseract",
                detail: "engine crashed".to_string(),
            });
        }
        Ok(self.texts.get(&index).copied().unwrap_or("").to_string())
    }
}

fn info() -> VideoInfo {
    VideoInfo {
        width: WIDTH,
        height: HEIGHT,
        frame_rate: FPS,
        frame_count: FRAMES,
    }
}

struct FakeReader {
    next: u64,
    /// Index of a frame decoded at half size.
    odd_frame: Option<u64>,
}

#[async_trait]
impl FrameReader for FakeReader {
    fn info(&self) -> VideoInfo {
        info()
    }

    async fn next_frame(&mut self) -> CollabResult<Option<RgbImage>> {
        if self.next >= FRAMES {
            return Ok(None);
        }
        let (w, h) = if self.odd_frame == Some(self.next) {
            (WIDTH / 2, HEIGHT / 2)
        } else {
            (WIDTH, HEIGHT)
        };
        let frame = RgbImage::from_pixel(w, h, Rgb([self.next as u8, 0, 0]));
        self.next += 1;
        Ok(Some(frame))
    }
}

#[derive(Default)]
struct FakeVideo {
    written: Arc<Mutex<Vec<RgbImage>>>,
    cancel_after: Option<(usize, CancellationToken)>,
    odd_frame: Option<u64>,
}

struct FakeWriter {
    path: PathBuf,
    written: Arc<Mutex<Vec<RgbImage>>>,
    cancel_after: Option<(usize, CancellationToken)>,
}

#[async_trait]
impl VideoBackend for FakeVideo {
    async fn open(&self, _path: &Path) -> CollabResult<Box<dyn FrameReader>> {
        Ok(Box::new(FakeReader {
            next: 0,
            odd_frame: self.odd_frame,
        }))
    }

    async fn create_writer(&self, path: &Path, _info: &VideoInfo) -> CollabResult<Box<dyn FrameWriter>> {
        Ok(Box::new(FakeWriter {
            path: path.to_path_buf(),
            written: self.written.clone(),
            cancel_after: self.cancel_after.clone(),
        }))
    }
}

#[async_trait]
impl FrameWriter for FakeWriter {
    async fn write_frame(&mut self, frame: &RgbImage) -> CollabResult<()> {
        let mut written = self.written.lock().unwrap();
        written.push(frame.clone());
        if let Some((n, token)) = &self.cancel_after {
            if written.len() == *n {
                token.cancel();
            }
        }
        Ok(())
    }

    async fn finish(&mut self) -> CollabResult<()> {
        std::fs::write(&self.path, b"video")?;
        Ok(())
    }
}

struct FakeCopier {
    rendered_secs: f64,
    copies: AtomicUsize,
}

impl FakeCopier {
    fn new(rendered_secs: f64) -> Self {
        Self {
            rendered_secs,
            copies: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl StreamCopier for FakeCopier {
    async fn duration(&self, path: &Path) -> CollabResult<f64> {
        if path.file_name().and_then(|n| n.to_str()) == Some("rendered.mp4") {
            Ok(self.rendered_secs)
        } else {
            Ok(FRAMES as f64 / FPS)
        }
    }

    async fn copy_streams(&self, _video: &Path, _audio_source: &Path, out: &Path) -> CollabResult<()> {
        self.copies.fetch_add(1, Ordering::SeqCst);
        std::fs::write(out, b"muxed")?;
        Ok(())
    }
}

/// Paints every non-space char as an 8x12 solid cell.
struct BlockFace;

impl Typeface for BlockFace {
    fn measure(&self, text: &str) -> u32 {
        text.chars().count() as u32 * 8
    }

    fn draw(&self, canvas: &mut RgbImage, x: i32, y: i32, text: &str, color: Rgb<u8>) {
        for (i, c) in text.chars().enumerate() {
            if c.is_whitespace() {
                continue;
            }
            for dy in 0..12 {
                for dx in 0..7 {
                    let (px, py) = (x + i as i32 * 8 + dx, y + dy);
                    if px >= 0 && py >= 0 && (px as u32) < canvas.width() && (py as u32) < canvas.height() {
                        canvas.put_pixel(px as u32, py as u32, color);
                    }
                }
            }
        }
    }
}

struct Harness {
    _dir: TempDir,
    config: Config,
    audio: Arc<FakeAudio>,
    recognizer: Arc<FakeRecognizer>,
    translator: Arc<FakeTranslator>,
    detector: Arc<FakeDetector>,
    video: Arc<FakeVideo>,
    copier: Arc<FakeCopier>,
}

impl Harness {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("clip.mp4");
        std::fs::write(&input, b"").unwrap();

        let mut config = Config::new(&input);
        config.output_dir = dir.path().join("out");
        config.ocr_interval_secs = 1.0;

        Self {
            _dir: dir,
            config,
            audio: Arc::new(FakeAudio::default()),
            recognizer: Arc::new(FakeRecognizer {
                segments: Some(vec![RecognizedSegment {
                    start: 0.0,
                    end: 2.5,
                    text: " 你好 ".to_string(),
                }]),
                gate: None,
            }),
            translator: Arc::new(FakeTranslator {
                dictionary: HashMap::from([("你好", "Xin chào"), ("中文", "Tiếng Trung")]),
            }),
            detector: Arc::new(FakeDetector {
                texts: HashMap::from([(2, "中文")]),
                ..Default::default()
            }),
            video: Arc::new(FakeVideo::default()),
            copier: Arc::new(FakeCopier::new(FRAMES as f64 / FPS)),
        }
    }

    fn pipeline(&self) -> Pipeline {
        let collab = Collaborators {
            audio: self.audio.clone(),
            recognizer: self.recognizer.clone(),
            translator: self.translator.clone(),
            detector: self.detector.clone(),
            video: self.video.clone(),
            copier: self.copier.clone(),
        };
        Pipeline::new(self.config.clone(), collab).with_typeface(Arc::new(BlockFace))
    }

    fn out_dir(&self) -> PathBuf {
        self.config.output_dir.clone()
    }

    fn audio_path(&self) -> PathBuf {
        self.audio.written.lock().unwrap().clone().unwrap()
    }

    fn lock_path(&self) -> PathBuf {
        self.out_dir().join(".subfuse.lock")
    }
}

fn has_white(frame: &RgbImage) -> bool {
    frame.pixels().any(|p| *p == Rgb([255, 255, 255]))
}

#[tokio::test]
async fn speech_and_on_screen_text_are_merged_and_exported() {
    let h = Harness::new();
    let report = h.pipeline().run(CancellationToken::new(), None).await;

    assert!(report.is_completed(), "{:?}", report.outcome);
    assert!(report.recovered.is_empty());

    let track = report.track.unwrap();
    let summary: Vec<(f64, f64, &str, Source)> = track
        .events()
        .iter()
        .map(|e| (e.start(), e.end(), e.text(), e.source()))
        .collect();
    assert_eq!(
        summary,
        vec![
            (0.0, 2.5, "Xin chào", Source::Speech),
            (1.0, 3.0, "Tiếng Trung", Source::OnScreen),
        ]
    );

    let srt = std::fs::read_to_string(h.config.srt_path()).unwrap();
    assert!(srt.contains("00:00:00,000 --> 00:00:02,500"));
    assert!(srt.contains("Xin chào"));
    assert!(srt.contains("Tiếng Trung"));

    let transcript = std::fs::read_to_string(h.config.transcript_path()).unwrap();
    assert!(transcript.contains("[0.0s - 2.5s] Xin chào"));

    assert_eq!(
        report.outputs,
        vec![h.config.srt_path(), h.config.transcript_path()]
    );
    assert!(!h.audio_path().exists());
    assert!(!h.lock_path().exists());
}

#[tokio::test]
async fn burn_in_renders_active_frames_and_remuxes() {
    let mut h = Harness::new();
    h.config.enable_burn_in = true;
    h.config.export_ocr_text = true;

    let report = h.pipeline().run(CancellationToken::new(), None).await;
    assert!(report.is_completed(), "{:?}", report.outcome);

    let burned = h.config.burned_video_path();
    assert_eq!(std::fs::read(&burned).unwrap(), b"muxed");
    assert_eq!(report.outputs.last(), Some(&burned));
    assert!(report.outputs.contains(&h.config.ocr_text_path()));
    assert_eq!(h.copier.copies.load(Ordering::SeqCst), 1);

    let frames = h.video.written.lock().unwrap();
    assert_eq!(frames.len(), FRAMES as usize);
    // t = 0.0 has speech, t = 3.5 has nothing active
    assert!(has_white(&frames[0]));
    assert!(!has_white(&frames[7]));
    assert_eq!(frames[7], RgbImage::from_pixel(WIDTH, HEIGHT, Rgb([7, 0, 0])));

    let leftovers: Vec<_> = std::fs::read_dir(h.out_dir())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|n| n.starts_with('.'))
        .collect();
    assert!(leftovers.is_empty(), "{leftovers:?}");
}

#[tokio::test]
async fn failed_translation_keeps_source_text() {
    let mut h = Harness::new();
    h.translator = Arc::new(FakeTranslator {
        dictionary: HashMap::from([("你好", "Xin chào")]),
    });

    let report = h.pipeline().run(CancellationToken::new(), None).await;
    assert!(report.is_completed(), "{:?}", report.outcome);

    let track = report.track.unwrap();
    let texts: Vec<&str> = track.events().iter().map(|e| e.text()).collect();
    assert_eq!(texts, vec!["Xin chào", "中文"]);

    assert_eq!(report.recovered.len(), 1);
    assert!(matches!(
        &report.recovered[0],
        ItemFailure::Translation { source: Source::OnScreen, start, .. } if *start == 1.0
    ));
}

#[tokio::test]
async fn stop_during_export_leaves_no_video() {
    let mut h = Harness::new();
    h.config.enable_burn_in = true;
    let token = CancellationToken::new();
    h.video = Arc::new(FakeVideo {
        cancel_after: Some((3, token.clone())),
        ..Default::default()
    });

    let report = h.pipeline().run(token, None).await;

    assert!(report.is_stopped(), "{:?}", report.outcome);
    assert_eq!(report.stage, Stage::Exporting);
    assert!(report.error().is_none());
    assert_eq!(h.video.written.lock().unwrap().len(), 3);
    assert_eq!(h.copier.copies.load(Ordering::SeqCst), 0);

    assert!(!h.config.burned_video_path().exists());
    assert!(!h.audio_path().exists());
    assert!(!h.lock_path().exists());
}

#[tokio::test]
async fn stop_before_start_does_nothing() {
    let h = Harness::new();
    let token = CancellationToken::new();
    token.cancel();

    let report = h.pipeline().run(token, None).await;

    assert!(report.is_stopped());
    assert!(report.track.is_none());
    assert!(h.audio.written.lock().unwrap().is_none());
    assert!(!h.config.srt_path().exists());
}

#[tokio::test]
async fn locked_output_dir_is_refused() {
    let h = Harness::new();
    std::fs::create_dir_all(h.out_dir()).unwrap();
    std::fs::write(h.lock_path(), b"").unwrap();

    let report = h.pipeline().run(CancellationToken::new(), None).await;

    assert!(matches!(report.error(), Some(PipelineError::OutputLocked(_))));
    assert!(h.lock_path().exists());
    assert!(!h.config.srt_path().exists());
}

#[tokio::test]
async fn detection_can_be_disabled() {
    let mut h = Harness::new();
    h.config.enable_on_screen_detection = false;

    let report = h.pipeline().run(CancellationToken::new(), None).await;

    assert!(report.is_completed());
    assert_eq!(h.detector.calls.load(Ordering::SeqCst), 0);
    let track = report.track.unwrap();
    assert_eq!(track.len(), 1);
    assert_eq!(track.events()[0].source(), Source::Speech);
}

#[tokio::test]
async fn recognition_failure_fails_the_run() {
    let mut h = Harness::new();
    h.recognizer = Arc::new(FakeRecognizer {
        segments: None,
        gate: None,
    });

    let report = h.pipeline().run(CancellationToken::new(), None).await;

    assert!(matches!(report.error(), Some(PipelineError::Recognition(_))));
    assert_eq!(report.stage, Stage::Recognizing);
    assert!(report.outputs.is_empty());
    assert!(!h.audio_path().exists());
    assert!(!h.lock_path().exists());
}

#[tokio::test]
async fn duration_mismatch_fails_the_mux() {
    let mut h = Harness::new();
    h.config.enable_burn_in = true;
    h.copier = Arc::new(FakeCopier::new(10.0));

    let report = h.pipeline().run(CancellationToken::new(), None).await;

    assert!(matches!(
        report.error(),
        Some(PipelineError::Mux(MuxError::DurationMismatch { .. }))
    ));
    assert!(!h.config.burned_video_path().exists());
    assert_eq!(h.copier.copies.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn progress_only_moves_forward() {
    let h = Harness::new();
    let (tx, mut rx) = unbounded_channel();

    let report = h.pipeline().run(CancellationToken::new(), Some(tx)).await;
    assert!(report.is_completed());

    let mut percents = Vec::new();
    while let Ok(update) = rx.try_recv() {
        percents.push(update.percent);
    }
    assert!(percents.windows(2).all(|w| w[0] <= w[1]), "{percents:?}");
    assert_eq!(percents.last(), Some(&100.0));
}

#[tokio::test]
async fn spawned_run_stops_after_in_flight_call() {
    let mut h = Harness::new();
    let gate = Arc::new(Gate::default());
    h.recognizer = Arc::new(FakeRecognizer {
        segments: Some(vec![RecognizedSegment {
            start: 0.0,
            end: 1.0,
            text: "你好".to_string(),
        }]),
        gate: Some(gate.clone()),
    });

    let mut handle = h.pipeline().spawn();
    gate.entered.notified().await;
    handle.stop();
    gate.release.notify_one();

    while handle.next_progress().await.is_some() {}
    let report = handle.join().await.unwrap();

    assert!(matches!(report.outcome, Outcome::Stopped), "{:?}", report.outcome);
    assert_eq!(report.stage, Stage::Recognizing);
    assert!(report.track.is_none());
    assert_eq!(h.detector.calls.load(Ordering::SeqCst), 0);
    assert!(!h.config.srt_path().exists());
    assert!(!h.audio_path().exists());
    assert!(!h.lock_path().exists());
}

#[tokio::test]
async fn failed_detection_sample_is_skipped() {
    let mut h = Harness::new();
    h.detector = Arc::new(FakeDetector {
        texts: HashMap::from([(2, "中文")]),
        fail_on: Some(0),
        ..Default::default()
    });

    let report = h.pipeline().run(CancellationToken::new(), None).await;

    assert!(report.is_completed(), "{:?}", report.outcome);
    assert_eq!(report.recovered.len(), 1);
    assert!(matches!(
        &report.recovered[0],
        ItemFailure::Detection { timestamp, message } if *timestamp == 0.0 && message.contains("engine crashed")
    ));

    let track = report.track.unwrap();
    let summary: Vec<(f64, &str, Source)> = track
        .events()
        .iter()
        .map(|e| (e.start(), e.text(), e.source()))
        .collect();
    assert_eq!(
        summary,
        vec![
            (0.0, "Xin chào", Source::Speech),
            (1.0, "Tiếng Trung", Source::OnScreen),
        ]
    );
}

#[tokio::test]
async fn unrenderable_frame_is_passed_through() {
    let mut h = Harness::new();
    h.config.enable_burn_in = true;
    // t = 0.5, while speech is on screen
    h.video = Arc::new(FakeVideo {
        odd_frame: Some(1),
        ..Default::default()
    });

    let report = h.pipeline().run(CancellationToken::new(), None).await;

    assert!(report.is_completed(), "{:?}", report.outcome);
    assert_eq!(report.recovered.len(), 1);
    assert!(matches!(
        &report.recovered[0],
        ItemFailure::Render { timestamp, .. } if *timestamp == 0.5
    ));

    let frames = h.video.written.lock().unwrap();
    assert_eq!(frames.len(), FRAMES as usize);
    assert_eq!(
        frames[1],
        RgbImage::from_pixel(WIDTH / 2, HEIGHT / 2, Rgb([1, 0, 0]))
    );
    assert!(has_white(&frames[0]));
    assert!(has_white(&frames[2]));
    assert!(h.config.burned_video_path().exists());
}
