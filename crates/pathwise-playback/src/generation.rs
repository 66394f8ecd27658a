//! Content generation collaborator.
//!
//! [`ContentGenerator`] is the seam to whatever produces remediation text,
//! narration audio and illustrations. [`HttpContentGenerator`] talks to an
//! OpenAI-compatible API; [`NullGenerator`] is always unavailable and keeps
//! the engine on authored and template content.

use std::future::Future;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;

use crate::config::GenerationConfig;

/// Failures of a generation call.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GenerationError {
    #[error("generator unavailable: {0}")]
    Unavailable(String),

    #[error("generation timed out after {0:?}")]
    Timeout(Duration),

    #[error("generator rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("malformed generator response: {0}")]
    Malformed(String),
}

/// Produces content on demand.
#[async_trait::async_trait]
pub trait ContentGenerator: Send + Sync {
    /// Generates explanatory text for `prompt`.
    async fn generate_text(&self, prompt: &str) -> Result<String, GenerationError>;

    /// Synthesizes speech for `text` in `voice`. Returns encoded audio.
    async fn generate_audio(&self, text: &str, voice: &str) -> Result<Vec<u8>, GenerationError>;

    /// Renders an image for `prompt` in `style`. Returns encoded image bytes.
    async fn generate_image(&self, prompt: &str, style: &str) -> Result<Vec<u8>, GenerationError>;
}

/// Runs `call` under `limit`; an elapsed limit is a generation failure.
pub async fn with_timeout<T, F>(limit: Duration, call: F) -> Result<T, GenerationError>
where
    F: Future<Output = Result<T, GenerationError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(GenerationError::Timeout(limit)),
    }
}

/// A generator with no backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullGenerator;

#[async_trait::async_trait]
impl ContentGenerator for NullGenerator {
    async fn generate_text(&self, _prompt: &str) -> Result<String, GenerationError> {
        Err(GenerationError::Unavailable("no generation backend configured".into()))
    }

    async fn generate_audio(&self, _text: &str, _voice: &str) -> Result<Vec<u8>, GenerationError> {
        Err(GenerationError::Unavailable("no generation backend configured".into()))
    }

    async fn generate_image(&self, _prompt: &str, _style: &str) -> Result<Vec<u8>, GenerationError> {
        Err(GenerationError::Unavailable("no generation backend configured".into()))
    }
}

/// OpenAI-compatible HTTP generator.
///
/// Uses `chat/completions` for text, `audio/speech` for narration and
/// `images/generations` (URL responses, fetched afterwards) for images.
#[derive(Debug, Clone)]
pub struct HttpContentGenerator {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    text_model: String,
    speech_model: String,
    image_model: String,
}

impl HttpContentGenerator {
    /// Returns `None` when no base URL is configured.
    pub fn from_config(config: &GenerationConfig) -> Option<Self> {
        let base_url = config.base_url.as_deref()?.trim_end_matches('/').to_string();
        Some(HttpContentGenerator {
            client: reqwest::Client::new(),
            base_url,
            api_key: config.api_key.clone().unwrap_or_default(),
            text_model: config.text_model.clone(),
            speech_model: config.speech_model.clone(),
            image_model: config.image_model.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn post(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<reqwest::Response, GenerationError> {
        let response = self
            .client
            .post(self.endpoint(path))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|err| GenerationError::Unavailable(format!("request failed: {}", err)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ImageResponse {
    data: Vec<ImageData>,
}

#[derive(Debug, Deserialize)]
struct ImageData {
    url: Option<String>,
}

#[async_trait::async_trait]
impl ContentGenerator for HttpContentGenerator {
    async fn generate_text(&self, prompt: &str) -> Result<String, GenerationError> {
        let body = json!({
            "model": self.text_model,
            "messages": [
                {
                    "role": "system",
                    "content": "You write short, friendly corrective explanations for learners."
                },
                { "role": "user", "content": prompt }
            ]
        });
        let parsed: ChatResponse = self
            .post("chat/completions", body)
            .await?
            .json()
            .await
            .map_err(|err| GenerationError::Malformed(err.to_string()))?;

        parsed
            .choices
            .first()
            .and_then(|choice| choice.message.content.as_deref())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .ok_or_else(|| GenerationError::Malformed("missing assistant content".into()))
    }

    async fn generate_audio(&self, text: &str, voice: &str) -> Result<Vec<u8>, GenerationError> {
        let body = json!({
            "model": self.speech_model,
            "input": text,
            "voice": voice,
        });
        let bytes = self
            .post("audio/speech", body)
            .await?
            .bytes()
            .await
            .map_err(|err| GenerationError::Malformed(err.to_string()))?;
        if bytes.is_empty() {
            return Err(GenerationError::Malformed("empty audio body".into()));
        }
        Ok(bytes.to_vec())
    }

    async fn generate_image(&self, prompt: &str, style: &str) -> Result<Vec<u8>, GenerationError> {
        let body = json!({
            "model": self.image_model,
            "prompt": format!("{prompt}\n\nStyle: {style}"),
            "n": 1,
            "response_format": "url",
        });
        let parsed: ImageResponse = self
            .post("images/generations", body)
            .await?
            .json()
            .await
            .map_err(|err| GenerationError::Malformed(err.to_string()))?;
        let url = parsed
            .data
            .first()
            .and_then(|d| d.url.clone())
            .ok_or_else(|| GenerationError::Malformed("missing image url".into()))?;

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|err| GenerationError::Unavailable(format!("image fetch failed: {}", err)))?;
        if !response.status().is_success() {
            return Err(GenerationError::Rejected {
                status: response.status().as_u16(),
                body: format!("image fetch from {url}"),
            });
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|err| GenerationError::Malformed(err.to_string()))?;
        Ok(bytes.to_vec())
    }
}
