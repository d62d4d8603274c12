use std::env;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

use subfuse::cli::Args;
use subfuse::collab::ffmpeg::{ensure_ffmpeg, FfmpegAudioExtractor, FfmpegStreamCopier, FfmpegVideo};
use subfuse::collab::openai::{ChatTranslator, WhisperRecognizer};
use subfuse::collab::tesseract::TesseractDetector;
use subfuse::{Collaborators, Config, Outcome, Pipeline};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let (non_blocking, _guard) = tracing_appender::non_blocking(std::io::stderr());

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    tracing::debug!(?args, "parsed arguments");
    let config = Config::try_from(args)?;

    let api_key = env::var("OPENAI_API_KEY")
        .context("Set OPENAI_API_KEY environment variable for OpenAI access")?;

    ensure_ffmpeg()?;

    let collab = Collaborators {
        audio: Arc::new(FfmpegAudioExtractor),
        recognizer: Arc::new(WhisperRecognizer::new(&api_key, &config.model_size)),
        translator: Arc::new(ChatTranslator::new(&api_key, &config.translate_model)),
        detector: Arc::new(TesseractDetector::new(&config.ocr_language)),
        video: Arc::new(FfmpegVideo::default()),
        copier: Arc::new(FfmpegStreamCopier),
    };

    tracing::info!(
        input = ?config.input.display(),
        output_dir = ?config.output_dir.display(),
        source = %config.source_language,
        target = %config.target_language,
        "starting run"
    );

    let mut handle = Pipeline::new(config, collab).spawn();

    let token = handle.token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    });

    let progress = ProgressBar::new(100);
    progress.set_style(
        ProgressStyle::with_template("{spinner} [{bar:30}] {pos:>3}% {msg}")?
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ")
            .progress_chars("=> "),
    );

    while let Some(update) = handle.next_progress().await {
        progress.set_position(update.percent.round() as u64);
        progress.set_message(update.message);
    }

    let report = handle.join().await.context("pipeline task panicked")?;

    for failure in &report.recovered {
        progress.println(format!("warning: {failure}"));
    }

    match report.outcome {
        Outcome::Completed => {
            let outputs: Vec<String> = report
                .outputs
                .iter()
                .map(|p| p.display().to_string())
                .collect();
            progress.finish_with_message(format!("Done. Wrote {}", outputs.join(", ")));
            Ok(())
        }
        Outcome::Stopped => {
            progress.abandon_with_message(format!("Stopped during {}", report.stage));
            Ok(())
        }
        Outcome::Failed(e) => {
            progress.abandon_with_message(format!("Failed during {}", report.stage));
            Err(e.into())
        }
    }
}
