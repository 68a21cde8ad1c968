//! Google Gemini `generateContent`
//!
//! History is flattened into a single prompt rather than sent as turns.

use std::fmt::Write as _;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::{ChatBackend, ChatMessage, http_client};
use crate::db::MessageRole;
use crate::{Error, Result};

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
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

/// Gemini chat backend
pub struct GeminiBackend {
    client: reqwest::Client,
    model: String,
    api_key: SecretString,
}

impl GeminiBackend {
    #[must_use]
    pub fn new(model: &str, api_key: SecretString, timeout: Duration) -> Self {
        Self {
            client: http_client(timeout),
            model: model.to_string(),
            api_key,
        }
    }
}

/// Flatten a message list into one prompt
///
/// `{system}\n\nPrevious conversation:\n{history}\n\nUser: {msg}\nAssistant:`
#[must_use]
pub fn flatten_prompt(messages: &[ChatMessage]) -> String {
    let system = messages
        .iter()
        .filter(|m| m.role == MessageRole::System)
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join("\n");

    let turns: Vec<&ChatMessage> = messages
        .iter()
        .filter(|m| m.role != MessageRole::System)
        .collect();
    let (current, history) = match turns.split_last() {
        Some((last, rest)) if last.role == MessageRole::User => (last.content.as_str(), rest),
        _ => ("", turns.as_slice()),
    };

    let mut transcript = String::new();
    for m in history {
        let speaker = if m.role == MessageRole::User {
            "User"
        } else {
            "Assistant"
        };
        let _ = writeln!(transcript, "{speaker}: {}", m.content);
    }

    format!(
        "{system}\n\nPrevious conversation:\n{}\n\nUser: {current}\nAssistant:",
        transcript.trim_end()
    )
}

#[async_trait]
impl ChatBackend for GeminiBackend {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn available(&self) -> bool {
        !self.api_key.expose_secret().is_empty()
    }

    async fn chat(&self, messages: &[ChatMessage]) -> Result<String> {
        let prompt = flatten_prompt(messages);
        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent",
            self.model
        );

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", self.api_key.expose_secret())
            .json(&GenerateRequest {
                contents: vec![Content {
                    parts: vec![Part { text: &prompt }],
                }],
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Llm(format!("gemini error {status}: {body}")));
        }

        let reply: GenerateResponse = response.json().await?;
        Ok(reply
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| {
                c.parts
                    .into_iter()
                    .map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default())
    }
}
