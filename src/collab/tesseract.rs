//! On-screen text detection with the tesseract CLI.

use async_trait::async_trait;
use image::RgbImage;

use super::{CollabError, Result, TextDetector};

/// Runs `tesseract <frame.png> stdout -l <language>` for each sample.
pub struct TesseractDetector {
    language: String,
}

impl TesseractDetector {
    pub fn new(language: impl Into<String>) -> Self {
        Self {
            language: language.into(),
        }
    }
}

#[async_trait]
impl TextDetector for TesseractDetector {
    async fn detect(&self, frame: &RgbImage) -> Result<String> {
        let dir = tempfile::tempdir()?;
        let png = dir.path().join("frame.png");
        frame.save(&png)?;

        let output = tokio::process::Command::new("tesseract")
            .arg(&png)
            .arg("stdout")
            .arg("-l")
            .arg(&self.language)
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            return Err(CollabError::Tool {
                tool: "tesseract",
                detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(normalize(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Join non-blank output lines with single spaces.
fn normalize(raw: &str) -> String {
    raw.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
