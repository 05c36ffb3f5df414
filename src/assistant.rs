use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::common::types::default_avatar;
use crate::common::{ChatMessage, Contact, ContactStatus};
use crate::config::AssistantConfig;
use crate::error::AssistantError;

/// Peer id of the built-in assistant contact.
pub const AI_PEER_ID: &str = "concord-ai";
pub const AI_HANDLE: &str = "concordai";
pub const AI_NAME: &str = "Concord AI";

pub const EMPTY_REPLY_FALLBACK: &str = "The signal faded into the digital fog...";
pub const ERROR_REPLY_FALLBACK: &str = "Lost sync with the Noir Peak central node.";

/// A single-turn text completion service.
#[async_trait]
pub trait Completion: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, AssistantError>;
}

/// Contact card of the assistant, seeded into the contact list at login.
pub fn assistant_contact() -> Contact {
    Contact {
        id: AI_PEER_ID.to_string(),
        handle: AI_HANDLE.to_string(),
        name: AI_NAME.to_string(),
        avatar: default_avatar(AI_HANDLE),
        bio: "Digital ghost of Noir Peak.".to_string(),
        status: ContactStatus::Online,
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    system_instruction: Content<'a>,
    contents: Vec<Content<'a>>,
}

#[derive(Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Deserialize, Default)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

impl GenerateResponse {
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|candidate| candidate.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .map(|part| part.text.as_str())
                    .collect::<String>()
            })
            .unwrap_or_default()
    }
}

/// Gemini `generateContent` over plain HTTP.
pub struct GeminiClient {
    http: reqwest::Client,
    url: String,
    api_key: Option<String>,
    persona: String,
}

impl GeminiClient {
    pub fn new(config: &AssistantConfig) -> Result<Self, AssistantError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;
        let api_key = if config.enabled {
            config.api_key()
        } else {
            None
        };
        if config.enabled && api_key.is_none() {
            log::warn!(
                "{} is not set; the assistant will answer with its fallback line",
                config.api_key_env
            );
        }
        Ok(Self {
            http,
            url: format!(
                "{}/models/{}:generateContent",
                config.endpoint.trim_end_matches('/'),
                config.model
            ),
            api_key,
            persona: config.persona.clone(),
        })
    }
}

#[async_trait]
impl Completion for GeminiClient {
    async fn complete(&self, prompt: &str) -> Result<String, AssistantError> {
        let api_key = self.api_key.as_deref().ok_or(AssistantError::Disabled)?;
        let body = GenerateRequest {
            system_instruction: Content {
                role: None,
                parts: vec![Part {
                    text: &self.persona,
                }],
            },
            contents: vec![Content {
                role: Some("user"),
                parts: vec![Part { text: prompt }],
            }],
        };
        let resp = self
            .http
            .post(&self.url)
            .header("x-goog-api-key", api_key)
            .json(&body)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(AssistantError::Status(resp.status().as_u16()));
        }
        let parsed: GenerateResponse = resp.json().await?;
        let text = parsed.text();
        if text.trim().is_empty() {
            return Err(AssistantError::EmptyResponse);
        }
        Ok(text)
    }
}

/// The AI peer: turns a prompt into a message from [`AI_PEER_ID`], never failing.
#[derive(Clone)]
pub struct Assistant {
    completion: Arc<dyn Completion>,
}

impl Assistant {
    pub fn new(completion: Arc<dyn Completion>) -> Self {
        Self { completion }
    }

    pub async fn reply_text(&self, prompt: &str) -> String {
        match self.completion.complete(prompt).await {
            Ok(text) => text,
            Err(AssistantError::EmptyResponse) => EMPTY_REPLY_FALLBACK.to_string(),
            Err(err) => {
                log::warn!("Assistant completion failed: {err}");
                ERROR_REPLY_FALLBACK.to_string()
            }
        }
    }

    /// Answer to `prompt`, addressed to `recipient_id`.
    pub async fn reply(&self, prompt: &str, recipient_id: &str) -> ChatMessage {
        let text = self.reply_text(prompt).await;
        ChatMessage {
            id: format!("msg_{}", uuid::Uuid::new_v4().simple()),
            sender_id: AI_PEER_ID.to_string(),
            sender_name: AI_NAME.to_string(),
            target_id: recipient_id.to_string(),
            text,
            timestamp: chrono::Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_text_joins_first_candidate_parts() {
        let parsed: GenerateResponse = serde_json::from_value(serde_json::json!({
            "candidates": [
                { "content": { "parts": [ { "text": "Rain " }, { "text": "again." } ] } },
                { "content": { "parts": [ { "text": "ignored" } ] } }
            ]
        }))
        .expect("valid response");
        assert_eq!(parsed.text(), "Rain again.");
    }

    #[test]
    fn blocked_response_has_no_text() {
        let parsed: GenerateResponse =
            serde_json::from_value(serde_json::json!({ "candidates": [ {} ] }))
                .expect("valid response");
        assert_eq!(parsed.text(), "");
    }

    #[tokio::test]
    async fn missing_key_falls_back() {
        let config = AssistantConfig {
            api_key_env: "CONCORD_TEST_KEY_THAT_IS_NEVER_SET".to_string(),
            ..AssistantConfig::default()
        };
        let client = GeminiClient::new(&config).expect("client");
        let assistant = Assistant::new(Arc::new(client));
        let message = assistant.reply("hello", "usr_a").await;
        assert_eq!(message.text, ERROR_REPLY_FALLBACK);
        assert_eq!(message.sender_id, AI_PEER_ID);
        assert_eq!(message.target_id, "usr_a");
    }
}
