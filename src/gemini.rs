//! Client for the hosted generative model (Gemini `generateContent`). One
//! analysis is one request: the image, the instruction, a fixed generation
//! config and the safety thresholds

use crate::analysis::{AnalysisRequest, AnalysisResponse};
use crate::config::Settings;
use anyhow::{Context, Result};
use base64::{engine::general_purpose, Engine as _};
use reqwest::StatusCode;
use serde::Serialize;
use std::fmt::Debug;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors surfaced by the model service, classified
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("could not reach the model service: {0}")]
    Transport(String),

    #[error("the model service did not answer in time")]
    Timeout,

    #[error("the model service quota is exhausted: {0}")]
    Quota(String),

    #[error("the model service returned {status}: {message}")]
    Provider { status: u16, message: String },

    #[error("the analysis was blocked by the safety filter ({0})")]
    Blocked(String),

    #[error("the model returned an empty analysis")]
    Empty,

    #[error("unexpected response from the model service: {0}")]
    Decode(String),
}

/// Header carrying the API key, so it never appears in a URL
const API_KEY_HEADER: &str = "x-goog-api-key";

impl From<reqwest::Error> for ModelError {
    fn from(err: reqwest::Error) -> Self {
        let err = err.without_url();
        if err.is_timeout() {
            ModelError::Timeout
        } else if err.is_decode() {
            ModelError::Decode(err.to_string())
        } else {
            ModelError::Transport(err.to_string())
        }
    }
}

/// Sampling parameters sent with every request
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub temperature: f64,
    pub top_p: f64,
    pub top_k: u32,
    pub max_output_tokens: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        GenerationConfig {
            temperature: 0.4,
            top_p: 1.0,
            top_k: 32,
            max_output_tokens: 4096,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SafetySetting {
    pub category: &'static str,
    pub threshold: &'static str,
}

/// Block medium and above in every harm category
pub fn default_safety_settings() -> Vec<SafetySetting> {
    [
        "HARM_CATEGORY_HARASSMENT",
        "HARM_CATEGORY_HATE_SPEECH",
        "HARM_CATEGORY_DANGEROUS_CONTENT",
        "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    ]
    .into_iter()
    .map(|category| SafetySetting {
        category,
        threshold: "BLOCK_MEDIUM_AND_ABOVE",
    })
    .collect()
}

mod protocol {
    use super::{GenerationConfig, SafetySetting};
    use serde::{Deserialize, Serialize};

    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct GenerateContentRequest<'a> {
        pub contents: Vec<Content<'a>>,
        pub generation_config: &'a GenerationConfig,
        pub safety_settings: &'a [SafetySetting],
    }

    #[derive(Serialize)]
    pub struct Content<'a> {
        pub role: &'static str,
        pub parts: Vec<Part<'a>>,
    }

    #[derive(Serialize)]
    #[serde(untagged)]
    pub enum Part<'a> {
        InlineData { inline_data: Blob<'a> },
        Text { text: &'a str },
    }

    #[derive(Serialize)]
    pub struct Blob<'a> {
        pub mime_type: &'a str,
        pub data: String,
    }

    #[derive(Deserialize, Default)]
    #[serde(rename_all = "camelCase", default)]
    pub struct GenerateContentResponse {
        pub candidates: Vec<Candidate>,
        pub prompt_feedback: Option<PromptFeedback>,
    }

    #[derive(Deserialize, Default)]
    #[serde(rename_all = "camelCase", default)]
    pub struct Candidate {
        pub content: Option<CandidateContent>,
        pub finish_reason: Option<String>,
    }

    #[derive(Deserialize, Default)]
    #[serde(default)]
    pub struct CandidateContent {
        pub parts: Vec<CandidatePart>,
    }

    #[derive(Deserialize, Default)]
    #[serde(default)]
    pub struct CandidatePart {
        pub text: Option<String>,
    }

    #[derive(Deserialize, Default)]
    #[serde(rename_all = "camelCase", default)]
    pub struct PromptFeedback {
        pub block_reason: Option<String>,
    }

    #[derive(Deserialize)]
    pub struct ErrorBody {
        pub error: ErrorDetail,
    }

    #[derive(Deserialize)]
    pub struct ErrorDetail {
        pub message: String,
    }
}

use protocol::*;

/// A handle to the hosted model
pub struct GeminiClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    generation_config: GenerationConfig,
    safety_settings: Vec<SafetySetting>,
}

impl Debug for GeminiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "GeminiClient {{ endpoint: {:?}, api_key: <redacted> }}", self.endpoint)
    }
}

impl GeminiClient {
    pub fn new(settings: &Settings, api_key: String) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(settings.request_timeout())
            .build()
            .context("failed to build http client")?;

        Ok(GeminiClient {
            http,
            endpoint: settings.endpoint(),
            api_key,
            generation_config: GenerationConfig::default(),
            safety_settings: default_safety_settings(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Send the image and instruction, and return the model's text
    #[tracing::instrument(
        skip(self, request),
        fields(mime = request.image.mime_type(), size = request.image.bytes().len())
    )]
    pub async fn generate(
        &self,
        request: &AnalysisRequest,
    ) -> std::result::Result<AnalysisResponse, ModelError> {
        let body = GenerateContentRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![
                    Part::InlineData {
                        inline_data: Blob {
                            mime_type: request.image.mime_type(),
                            data: general_purpose::STANDARD.encode(request.image.bytes()),
                        },
                    },
                    Part::Text {
                        text: request.instruction,
                    },
                ],
            }],
            generation_config: &self.generation_config,
            safety_settings: &self.safety_settings,
        };

        debug!("sending analysis request to {}", self.endpoint);

        let response = self
            .http
            .post(&self.endpoint)
            .header(API_KEY_HEADER, &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorBody>(&text)
                .map(|body| body.error.message)
                .unwrap_or(text);
            warn!("model service returned {status}");
            return Err(match status {
                StatusCode::TOO_MANY_REQUESTS => ModelError::Quota(message),
                _ => ModelError::Provider {
                    status: status.as_u16(),
                    message,
                },
            });
        }

        let parsed: GenerateContentResponse =
            serde_json::from_str(&text).map_err(|e| ModelError::Decode(e.to_string()))?;
        let analysis = extract_text(parsed)?;

        info!("model returned {} bytes of analysis", analysis.text.len());
        Ok(analysis)
    }
}

/// Join the text parts of the first candidate
fn extract_text(
    response: GenerateContentResponse,
) -> std::result::Result<AnalysisResponse, ModelError> {
    if let Some(reason) = response.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(ModelError::Blocked(reason));
    }

    let Some(candidate) = response.candidates.into_iter().next() else {
        return Err(ModelError::Empty);
    };

    let text: String = candidate
        .content
        .map(|content| content.parts)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|part| part.text)
        .collect();

    if text.trim().is_empty() {
        return match candidate.finish_reason.as_deref() {
            Some("SAFETY") => Err(ModelError::Blocked("SAFETY".to_string())),
            _ => Err(ModelError::Empty),
        };
    }

    Ok(AnalysisResponse { text })
}
