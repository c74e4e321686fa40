//! Gemini REST implementation of [`AiClient`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use converse_core::config::AiConfig;
use converse_core::types::Role;

use crate::client::{AiClient, AiRequest};
use crate::error::AiError;

const API_KEY_HEADER: &str = "x-goog-api-key";

/// Client for the Gemini `generateContent` endpoint.
#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl std::fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>, config: &AiConfig) -> Result<Self, AiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| AiError::Connectivity(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Read the API key from the environment variable named in the config.
    pub fn api_key_from_env(config: &AiConfig) -> Option<String> {
        std::env::var(&config.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
    }

    /// Endpoint URL for `model`. The key travels in a header, never in the URL.
    fn endpoint(&self, model: &str) -> String {
        format!("{}/{}:generateContent", self.base_url, model)
    }

    async fn send_request(
        &self,
        model: &str,
        body: &GenerateContentRequest,
    ) -> Result<String, AiError> {
        let response = self
            .client
            .post(self.endpoint(model))
            .header(API_KEY_HEADER, &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|err| {
                AiError::Connectivity(format!("Gemini API request failed: {}", err.without_url()))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read Gemini error body".to_string());
            return Err(map_http_error(status, &body_text));
        }

        let parsed: GenerateContentResponse = response
            .json()
            .await
            .map_err(|err| AiError::Malformed(format!("Failed to parse Gemini response: {err}")))?;

        Ok(extract_text_response(parsed))
    }
}

#[async_trait]
impl AiClient for GeminiClient {
    async fn generate(&self, request: &AiRequest) -> Result<String, AiError> {
        let body = build_body(request);
        tracing::debug!(
            model = %request.model,
            turns = body.contents.len(),
            images = request.images.len(),
            documents = request.documents.len(),
            "Sending Gemini request"
        );
        self.send_request(&request.model, &body).await
    }
}

fn build_body(request: &AiRequest) -> GenerateContentRequest {
    let mut contents: Vec<Content> = request
        .history
        .iter()
        .map(|turn| Content {
            role: gemini_role(turn.role).to_string(),
            parts: vec![Part::Text {
                text: turn.content.clone(),
            }],
        })
        .collect();

    let mut parts = Vec::new();
    if !request.content.trim().is_empty() {
        parts.push(Part::Text {
            text: request.content.clone(),
        });
    }
    for image in &request.images {
        parts.push(Part::InlineData {
            inline_data: InlineDataPayload {
                mime_type: image.mime_type.clone(),
                data: image.data.clone(),
            },
        });
    }
    for document in &request.documents {
        parts.push(Part::Text {
            text: format!("[Document: {}]", document.name),
        });
        parts.push(Part::InlineData {
            inline_data: InlineDataPayload {
                mime_type: document.mime_type.clone(),
                data: document.data.clone(),
            },
        });
    }
    contents.push(Content {
        role: "user".to_string(),
        parts,
    });

    let system_instruction = (!request.system_instruction.trim().is_empty()).then(|| Content {
        role: "system".to_string(),
        parts: vec![Part::Text {
            text: request.system_instruction.clone(),
        }],
    });

    GenerateContentRequest {
        contents,
        system_instruction,
    }
}

fn gemini_role(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "model",
    }
}

#[derive(Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
}

#[derive(Serialize)]
struct Content {
    role: String,
    parts: Vec<Part>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Part {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineDataPayload,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineDataPayload {
    mime_type: String,
    data: String,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    candidates: Option<Vec<Candidate>>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<ContentResponse>,
}

#[derive(Deserialize)]
struct ContentResponse {
    #[serde(default)]
    parts: Vec<PartResponse>,
}

#[derive(Deserialize)]
struct PartResponse {
    text: Option<String>,
}

#[derive(Deserialize)]
struct ErrorWrapper {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
    status: Option<String>,
}

/// Concatenated text of the first candidate. Empty when there is none; the
/// orchestrator substitutes its fallback reply.
fn extract_text_response(response: GenerateContentResponse) -> String {
    response
        .candidates
        .and_then(|candidates| candidates.into_iter().next())
        .and_then(|candidate| candidate.content)
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|part| part.text)
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default()
}

fn map_http_error(status: StatusCode, body: &str) -> AiError {
    match serde_json::from_str::<ErrorWrapper>(body) {
        Ok(wrapper) => {
            let message = wrapper.error.message.unwrap_or_else(|| body.to_string());
            AiError::from_status(status.as_u16(), wrapper.error.status.as_deref(), message)
        }
        Err(_) => AiError::from_status(status.as_u16(), None, body),
    }
}

// =============================================================================
// Tests
// =============================================================================
