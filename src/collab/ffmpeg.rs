//! Audio extraction, frame decode/encode and stream copy via the ffmpeg CLI.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use async_trait::async_trait;
use image::RgbImage;
use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, ChildStdout};

use super::{
    AudioExtractor, CollabError, FrameReader, FrameWriter, Result, StreamCopier, VideoBackend,
    VideoInfo,
};

/// Check that `ffmpeg` and `ffprobe` are on the PATH.
pub fn ensure_ffmpeg() -> anyhow::Result<()> {
    use anyhow::{anyhow, Context};

    for tool in ["ffmpeg", "ffprobe"] {
        let status = Command::new(tool)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .with_context(|| format!("{tool} is required (install via brew/apt/choco)"))?;
        if !status.success() {
            return Err(anyhow!("{tool} not available in PATH"));
        }
    }
    Ok(())
}

async fn run_tool(tool: &'static str, cmd: &mut tokio::process::Command) -> Result<Vec<u8>> {
    let output = cmd.kill_on_drop(true).output().await?;
    if !output.status.success() {
        return Err(CollabError::Tool {
            tool,
            detail: format!(
                "{}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        });
    }
    Ok(output.stdout)
}

/// Extracts 16kHz mono PCM WAV, the format the recognizers expect.
#[derive(Debug, Default)]
pub struct FfmpegAudioExtractor;

#[async_trait]
impl AudioExtractor for FfmpegAudioExtractor {
    async fn extract_audio(&self, video: &Path, dest_dir: &Path) -> Result<PathBuf> {
        let wav_out = dest_dir.join("audio_16k_mono.wav");
        run_tool(
            "ffmpeg",
            tokio::process::Command::new("ffmpeg")
                .args(["-y", "-v", "error", "-i"])
                .arg(video)
                .args(["-vn", "-acodec", "pcm_s16le", "-ar", "16000", "-ac", "1"])
                .arg(&wav_out),
        )
        .await?;
        Ok(wav_out)
    }
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    nb_frames: Option<String>,
    duration: Option<String>,
    #[serde(default)]
    tags: ProbeTags,
    #[serde(default)]
    side_data_list: Vec<ProbeSideData>,
}

#[derive(Debug, Default, Deserialize)]
struct ProbeTags {
    rotate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeSideData {
    rotation: Option<f64>,
}

impl ProbeStream {
    /// Display rotation in degrees, normalized to 0..360.
    ///
    /// Newer containers carry it as display-matrix side data, older ones as a
    /// `rotate` tag.
    fn rotation(&self) -> i64 {
        let degrees = self
            .side_data_list
            .iter()
            .find_map(|d| d.rotation)
            .or_else(|| self.tags.rotate.as_deref().and_then(|r| r.trim().parse().ok()))
            .unwrap_or(0.0);
        (degrees.round() as i64).rem_euclid(360)
    }
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

async fn probe(path: &Path) -> Result<ProbeOutput> {
    let stdout = run_tool(
        "ffprobe",
        tokio::process::Command::new("ffprobe")
            .args(["-v", "error", "-select_streams", "v:0", "-show_entries"])
            .arg(concat!(
                "stream=width,height,r_frame_rate,avg_frame_rate,nb_frames,duration",
                ":stream_tags=rotate:stream_side_data=rotation:format=duration"
            ))
            .args(["-of", "json"])
            .arg(path),
    )
    .await?;
    serde_json::from_slice(&stdout).map_err(|e| CollabError::Output {
        tool: "ffprobe",
        detail: e.to_string(),
    })
}

/// Parse an ffprobe rate such as `30000/1001` or `25`.
fn parse_rate(rate: &str) -> Option<f64> {
    let value = match rate.split_once('/') {
        Some((num, den)) => {
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num.trim().parse::<f64>().ok()? / den
        }
        None => rate.trim().parse().ok()?,
    };
    (value.is_finite() && value > 0.0).then_some(value)
}

fn video_info(probe: &ProbeOutput) -> Result<VideoInfo> {
    let invalid = |detail: &str| CollabError::Output {
        tool: "ffprobe",
        detail: detail.to_string(),
    };

    let stream = probe.streams.first().ok_or_else(|| invalid("no video stream"))?;
    let (width, height) = stream
        .width
        .zip(stream.height)
        .filter(|&(w, h)| w > 0 && h > 0)
        .ok_or_else(|| invalid("missing frame size"))?;
    // The decoder autorotates, so quarter turns arrive with swapped sides.
    let (width, height) = match stream.rotation() {
        90 | 270 => (height, width),
        _ => (width, height),
    };
    let frame_rate = stream
        .avg_frame_rate
        .as_deref()
        .and_then(parse_rate)
        .or_else(|| stream.r_frame_rate.as_deref().and_then(parse_rate))
        .ok_or_else(|| invalid("missing frame rate"))?;

    let duration = stream
        .duration
        .as_deref()
        .or(probe.format.as_ref().and_then(|f| f.duration.as_deref()))
        .and_then(|d| d.parse::<f64>().ok());
    let frame_count = stream
        .nb_frames
        .as_deref()
        .and_then(|n| n.parse::<u64>().ok())
        .or_else(|| duration.map(|d| (d * frame_rate).round() as u64))
        .ok_or_else(|| invalid("cannot determine frame count"))?;

    Ok(VideoInfo {
        width,
        height,
        frame_rate,
        frame_count,
    })
}

/// Decodes and encodes raw RGB frames through ffmpeg pipes.
#[derive(Debug, Default)]
pub struct FfmpegVideo {
    /// Encoder passed to `-c:v`.
    pub codec: Option<String>,
}

#[async_trait]
impl VideoBackend for FfmpegVideo {
    async fn open(&self, path: &Path) -> Result<Box<dyn FrameReader>> {
        let info = video_info(&probe(path).await?)?;

        let mut child = tokio::process::Command::new("ffmpeg")
            .args(["-v", "error", "-i"])
            .arg(path)
            .args(["-map", "0:v:0", "-f", "rawvideo", "-pix_fmt", "rgb24", "-"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        let stdout = child.stdout.take().ok_or_else(|| CollabError::Output {
            tool: "ffmpeg",
            detail: "decoder stdout unavailable".to_string(),
        })?;

        tracing::debug!(path = %path.display(), ?info, "opened video");
        Ok(Box::new(FfmpegFrameReader {
            child,
            stdout,
            info,
        }))
    }

    async fn create_writer(&self, path: &Path, info: &VideoInfo) -> Result<Box<dyn FrameWriter>> {
        let codec = self.codec.as_deref().unwrap_or("libx264");
        let mut child = tokio::process::Command::new("ffmpeg")
            .args(encoder_args(info, codec))
            .arg(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        let stdin = child.stdin.take();

        Ok(Box::new(FfmpegFrameWriter { child, stdin }))
    }
}

/// Arguments for a rawvideo-on-stdin encoder, up to the output path.
///
/// yuv420p needs even sides, so odd frames get one black row or column of
/// padding on the bottom or right.
fn encoder_args(info: &VideoInfo, codec: &str) -> Vec<String> {
    let size = format!("{}x{}", info.width, info.height);
    let rate = info.frame_rate.to_string();
    let (size, rate): (&str, &str) = (&size, &rate);
    [
        "-y", "-v", "error", "-f", "rawvideo", "-pix_fmt", "rgb24", "-s", size, "-r", rate,
        "-i", "-", "-an", "-vf", "pad=ceil(iw/2)*2:ceil(ih/2)*2", "-c:v", codec,
        "-pix_fmt", "yuv420p",
    ]
    .iter()
    .map(|a| a.to_string())
    .collect()
}

struct FfmpegFrameReader {
    child: Child,
    stdout: ChildStdout,
    info: VideoInfo,
}

#[async_trait]
impl FrameReader for FfmpegFrameReader {
    fn info(&self) -> VideoInfo {
        self.info
    }

    async fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        let len = self.info.width as usize * self.info.height as usize * 3;
        let mut buf = vec![0u8; len];

        match self.stdout.read_exact(&mut buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                let status = self.child.wait().await?;
                if !status.success() {
                    return Err(CollabError::Tool {
                        tool: "ffmpeg",
                        detail: format!("decoder {status}"),
                    });
                }
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        }

        RgbImage::from_raw(self.info.width, self.info.height, buf)
            .map(Some)
            .ok_or_else(|| CollabError::Output {
                tool: "ffmpeg",
                detail: "short frame buffer".to_string(),
            })
    }
}

struct FfmpegFrameWriter {
    child: Child,
    stdin: Option<ChildStdin>,
}

#[async_trait]
impl FrameWriter for FfmpegFrameWriter {
    async fn write_frame(&mut self, frame: &RgbImage) -> Result<()> {
        let stdin = self.stdin.as_mut().ok_or_else(|| CollabError::Output {
            tool: "ffmpeg",
            detail: "encoder already finished".to_string(),
        })?;
        stdin.write_all(frame.as_raw()).await?;
        Ok(())
    }

    async fn finish(&mut self) -> Result<()> {
        if let Some(mut stdin) = self.stdin.take() {
            stdin.shutdown().await?;
        }
        let status = self.child.wait().await?;
        if !status.success() {
            return Err(CollabError::Tool {
                tool: "ffmpeg",
                detail: format!("encoder {status}"),
            });
        }
        Ok(())
    }
}

/// Probes durations and remuxes streams with `-c copy`.
#[derive(Debug, Default)]
pub struct FfmpegStreamCopier;

#[async_trait]
impl StreamCopier for FfmpegStreamCopier {
    async fn duration(&self, path: &Path) -> Result<f64> {
        let probe = probe(path).await?;
        probe
            .format
            .and_then(|f| f.duration)
            .and_then(|d| d.parse::<f64>().ok())
            .ok_or_else(|| CollabError::Output {
                tool: "ffprobe",
                detail: format!("no duration for {}", path.display()),
            })
    }

    async fn copy_streams(&self, video: &Path, audio_source: &Path, out: &Path) -> Result<()> {
        run_tool(
            "ffmpeg",
            tokio::process::Command::new("ffmpeg")
                .args(["-y", "-v", "error", "-i"])
                .arg(video)
                .arg("-i")
                .arg(audio_source)
                .args(["-map", "0:v:0", "-map", "1:a:0?", "-c", "copy", "-shortest"])
                .arg(out),
        )
        .await?;
        Ok(())
    }
}
