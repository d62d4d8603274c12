//! CLI argument definitions using clap.

use std::path::PathBuf;

use clap::Parser;

use crate::config::{Config, ConfigError};

#[derive(Debug, Parser)]
#[command(name = "subfuse", version)]
#[command(about = "Translate speech and on-screen text of a video into subtitles")]
pub struct Args {
    /// Input video file
    pub input: PathBuf,

    /// Directory for all outputs (default: next to the input)
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Base filename for outputs (default: input file stem)
    #[arg(long)]
    pub output_name: Option<String>,

    /// Language spoken and shown in the video
    #[arg(long, default_value = "zh")]
    pub source_lang: String,

    /// Language to translate subtitles into
    #[arg(long, default_value = "vi")]
    pub target_lang: String,

    /// Speech recognition model
    #[arg(long, default_value = "whisper-1")]
    pub model: String,

    /// Chat model for translation
    #[arg(long, default_value = "gpt-4o-mini")]
    pub translate_model: String,

    /// Characters per subtitle line
    #[arg(long, default_value_t = 50)]
    pub max_line_length: u32,

    /// Seconds between sampled frames for on-screen text
    #[arg(long, default_value_t = 2.0)]
    pub ocr_interval: f64,

    /// Tesseract language for on-screen text
    #[arg(long, default_value = "chi_sim")]
    pub ocr_lang: String,

    /// Seconds each on-screen text event stays visible
    #[arg(long, default_value_t = crate::event::DEFAULT_ON_SCREEN_DURATION)]
    pub on_screen_duration: f64,

    /// Skip on-screen text detection
    #[arg(long)]
    pub no_ocr: bool,

    /// Render subtitles into a new video
    #[arg(long)]
    pub burn_in: bool,

    /// Do not write the subtitle file
    #[arg(long)]
    pub no_srt: bool,

    /// Do not write the transcript
    #[arg(long)]
    pub no_transcript: bool,

    /// Also write detected on-screen text to its own file
    #[arg(long)]
    pub ocr_text: bool,

    /// Font used for burn-in (default: first system font found)
    #[arg(long)]
    pub font: Option<PathBuf>,
}

impl TryFrom<Args> for Config {
    type Error = ConfigError;

    fn try_from(args: Args) -> Result<Self, ConfigError> {
        let mut config = Config::new(args.input);
        if let Some(dir) = args.output_dir {
            config.output_dir = dir;
        }
        if let Some(name) = args.output_name {
            config.output_name = name;
        }

        config.source_language = args.source_lang;
        config.target_language = args.target_lang;
        config.model_size = args.model;
        config.translate_model = args.translate_model;
        config.max_line_length = args.max_line_length;
        config.ocr_interval_secs = args.ocr_interval;
        config.ocr_language = args.ocr_lang;
        config.on_screen_duration_secs = args.on_screen_duration;
        config.enable_on_screen_detection = !args.no_ocr;
        config.enable_burn_in = args.burn_in;
        config.export_srt = !args.no_srt;
        config.export_transcript = !args.no_transcript;
        config.export_ocr_text = args.ocr_text;
        config.font_path = args.font;

        config.validate()?;
        Ok(config)
    }
}
