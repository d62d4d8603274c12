//! Subtitle, transcript and OCR text files.

use std::io::Write;
use std::path::Path;

use srtlib::{Subtitle, Subtitles, Timestamp};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::event::{Source, SubtitleEvent};
use crate::track::Track;
use crate::wrap::{char_width, wrap};

/// One block read back from a subtitle file.
#[derive(Debug, Clone, PartialEq)]
pub struct SubtitleBlock {
    pub index: usize,
    pub start: f64,
    pub end: f64,
    pub text: String,
}

/// Convert a track to numbered subtitles, wrapping text to `max_line_length`
/// characters per line.
pub fn to_subtitles(track: &Track, max_line_length: u32) -> Vec<Subtitle> {
    track
        .events()
        .iter()
        .zip(1..)
        .map(|(event, i)| create_subtitle(event, i, max_line_length))
        .collect()
}

fn create_subtitle(event: &SubtitleEvent, index: usize, max_line_length: u32) -> Subtitle {
    let text = wrap(event.text(), max_line_length, char_width).join("\n");
    Subtitle::new(
        index,
        secs_to_timestamp(event.start()),
        secs_to_timestamp(event.end()),
        text,
    )
}

fn secs_to_timestamp(secs: f64) -> Timestamp {
    Timestamp::from_milliseconds((secs * 1000.0).round() as u32)
}

fn timestamp_to_secs(ts: &Timestamp) -> f64 {
    let (h, m, s, ms) = ts.get();
    f64::from(h) * 3600.0 + f64::from(m) * 60.0 + f64::from(s) + f64::from(ms) / 1000.0
}

/// Subtitle file contents: each block followed by a blank line.
pub fn format_subtitle_file(track: &Track, max_line_length: u32) -> String {
    to_subtitles(track, max_line_length)
        .iter()
        .map(|s| format!("{s}\n\n"))
        .collect()
}

/// Parse subtitle file contents back into blocks.
pub fn parse_subtitle_file(content: &str) -> Result<Vec<SubtitleBlock>, srtlib::ParsingError> {
    let subtitles = Subtitles::parse_from_str(content.trim().to_string())?;
    Ok(subtitles
        .to_vec()
        .into_iter()
        .map(|s| SubtitleBlock {
            index: s.num,
            start: timestamp_to_secs(&s.start_time),
            end: timestamp_to_secs(&s.end_time),
            text: s.text,
        })
        .collect())
}

/// Plain transcript: a header, then speech and on-screen events grouped by
/// source as `[start s - end s] text`.
pub fn format_transcript(track: &Track, title: &str, generated_at: OffsetDateTime) -> String {
    let mut out = format!("=== TRANSCRIPT: {title} ===\n");
    if let Ok(stamp) = generated_at.format(&Rfc3339) {
        out.push_str(&format!("generated {stamp}\n"));
    }

    for (source, heading) in [
        (Source::Speech, "--- SPEECH ---"),
        (Source::OnScreen, "--- ON-SCREEN TEXT ---"),
    ] {
        let mut events = track.from_source(source).peekable();
        if events.peek().is_none() {
            continue;
        }
        out.push('\n');
        out.push_str(heading);
        out.push('\n');
        for event in events {
            out.push_str(&format!(
                "[{:.1}s - {:.1}s] {}\n",
                event.start(),
                event.end(),
                event.text()
            ));
        }
    }

    out
}

/// On-screen text only, one `[start s] text` line per detection.
pub fn format_on_screen_text(track: &Track) -> String {
    let mut out = String::from("=== ON-SCREEN TEXT ===\n\n");
    for event in track.from_source(Source::OnScreen) {
        out.push_str(&format!("[{:.1}s] {}\n", event.start(), event.text()));
    }
    out
}

/// Write `contents` to `path` through a sibling temp file, so a reader never
/// sees a half-written file.
pub fn write_atomic(path: &Path, contents: &str) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(contents.as_bytes())?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
