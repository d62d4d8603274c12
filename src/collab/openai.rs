//! OpenAI Whisper transcription and chat-completion translation.

use std::path::Path;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use serde_json::json;

use super::{CollabError, RecognizedSegment, Recognizer, Result, Translator};

const TRANSCRIPTIONS_URL: &str = "https://api.openai.com/v1/audio/transcriptions";
const CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";

#[derive(Debug, Deserialize)]
struct WhisperVerboseJson {
    /// Absent unless `verbose_json` is honored by the endpoint.
    segments: Option<Vec<WhisperSegment>>,
}

#[derive(Debug, Deserialize)]
struct WhisperSegment {
    start: f64,
    end: f64,
    text: String,
}

/// Speech recognition through the Whisper transcription endpoint.
pub struct WhisperRecognizer {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl WhisperRecognizer {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl Recognizer for WhisperRecognizer {
    async fn transcribe(&self, audio: &Path, language: &str) -> Result<Vec<RecognizedSegment>> {
        let buf = tokio::fs::read(audio).await?;

        let part = reqwest::multipart::Part::bytes(buf)
            .file_name(
                audio
                    .file_name()
                    .and_then(|s| s.to_str())
                    .unwrap_or("audio.wav")
                    .to_string(),
            )
            .mime_str("audio/wav")?;

        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone())
            .text("response_format", "verbose_json".to_string())
            .text("language", language.to_string())
            .text("timestamp_granularities[]", "segment".to_string());

        tracing::debug!(model = %self.model, language, "requesting transcription");

        let resp = self
            .client
            .post(TRANSCRIPTIONS_URL)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(CollabError::Service {
                service: "whisper",
                detail: format!("{status}: {text}"),
            });
        }

        let json: WhisperVerboseJson = resp.json().await?;
        let segments = json.segments.ok_or_else(|| CollabError::Output {
            tool: "whisper",
            detail: "no segments returned (verbose_json unsupported?)".to_string(),
        })?;

        Ok(segments
            .into_iter()
            .map(|s| RecognizedSegment {
                start: s.start,
                end: s.end,
                text: s.text,
            })
            .collect())
    }
}

/// Per-text translation through a chat model.
pub struct ChatTranslator {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl ChatTranslator {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl Translator for ChatTranslator {
    async fn translate(&self, text: &str, source: &str, target: &str) -> Result<String> {
        let system = format!(
            "You are a professional translator. Translate from language '{source}' to language '{target}'. \
             Keep meaning and tone. Reply with the translation only, no explanations."
        );

        let body = json!({
            "model": self.model,
            "temperature": 0,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": text}
            ]
        });

        let resp = self
            .client
            .post(CHAT_URL)
            .bearer_auth(&self.api_key)
            .header(CONTENT_TYPE, "application/json")
            .body(body.to_string())
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(CollabError::Service {
                service: "chat",
                detail: format!("{status}: {text}"),
            });
        }

        let raw: serde_json::Value = resp.json().await?;
        let content = raw["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| CollabError::Output {
                tool: "chat",
                detail: "unexpected chat response structure".to_string(),
            })?;

        Ok(content.trim().to_string())
    }
}
