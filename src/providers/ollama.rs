//! Ollama local model server

use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{ChatBackend, ChatMessage, http_client};
use crate::skills::IntentClassifier;
use crate::{Error, Result};

/// Model families tried when the configured model is not installed
const FALLBACK_FAMILIES: &[&str] = &["phi3", "mistral", "llama3", "gemma", "qwen", "tinyllama"];

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagModel>,
}

#[derive(Deserialize)]
struct TagModel {
    name: String,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    num_predict: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

/// Choose which installed model to use
///
/// The configured name wins if any installed tag contains it, then the
/// first fallback family present, then whatever is installed first.
#[must_use]
pub fn pick_model(preferred: &str, installed: &[String]) -> Option<String> {
    if let Some(m) = installed.iter().find(|m| m.contains(preferred)) {
        return Some(m.clone());
    }

    FALLBACK_FAMILIES
        .iter()
        .find_map(|family| installed.iter().find(|m| m.contains(family)))
        .or_else(|| installed.first())
        .cloned()
}

/// Chat backend for a local Ollama server
pub struct OllamaBackend {
    client: reqwest::Client,
    host: String,
    preferred: String,
    resolved: RwLock<Option<String>>,
}

impl OllamaBackend {
    #[must_use]
    pub fn new(host: &str, model: &str, timeout: Duration) -> Self {
        Self {
            client: http_client(timeout),
            host: host.trim_end_matches('/').to_string(),
            preferred: model.to_string(),
            resolved: RwLock::new(None),
        }
    }

    async fn installed_models(&self) -> Result<Vec<String>> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.host))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::Llm(format!(
                "ollama tags returned {}",
                response.status()
            )));
        }

        let tags: TagsResponse = response.json().await?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    fn model(&self) -> String {
        self.resolved
            .read()
            .ok()
            .and_then(|m| m.clone())
            .unwrap_or_else(|| self.preferred.clone())
    }
}

#[async_trait]
impl ChatBackend for OllamaBackend {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn available(&self) -> bool {
        let installed = match self.installed_models().await {
            Ok(models) => models,
            Err(e) => {
                tracing::debug!(error = %e, "ollama not reachable");
                return false;
            }
        };

        let Some(model) = pick_model(&self.preferred, &installed) else {
            tracing::debug!("ollama has no models installed");
            return false;
        };

        if !model.contains(&self.preferred) {
            tracing::warn!(preferred = %self.preferred, using = %model, "ollama model not found, switching");
        }
        tracing::debug!(model = %model, installed = ?installed, "ollama available");
        if let Ok(mut resolved) = self.resolved.write() {
            *resolved = Some(model);
        }
        true
    }

    async fn chat(&self, messages: &[ChatMessage]) -> Result<String> {
        let model = self.model();
        let request = ChatRequest {
            model: &model,
            messages: messages
                .iter()
                .map(|m| WireMessage {
                    role: m.role.as_str(),
                    content: &m.content,
                })
                .collect(),
            stream: false,
        };

        let response = self
            .client
            .post(format!("{}/api/chat", self.host))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Llm(format!("ollama error {status}: {body}")));
        }

        let reply: ChatResponse = response.json().await?;
        Ok(reply.message.content)
    }
}

/// Intent classifier backed by a small Ollama model
pub struct OllamaClassifier {
    client: reqwest::Client,
    host: String,
    model: String,
}

impl OllamaClassifier {
    /// Tokens allowed for the answer (a single skill name)
    const NUM_PREDICT: u32 = 20;

    #[must_use]
    pub fn new(host: &str, model: &str, timeout: Duration) -> Self {
        Self {
            client: http_client(timeout),
            host: host.trim_end_matches('/').to_string(),
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl IntentClassifier for OllamaClassifier {
    async fn classify(&self, prompt: &str) -> Result<String> {
        let request = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            options: GenerateOptions {
                num_predict: Self::NUM_PREDICT,
                temperature: 0.0,
            },
        };

        let response = self
            .client
            .post(format!("{}/api/generate", self.host))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Llm(format!("ollama classify error {status}: {body}")));
        }

        let reply: GenerateResponse = response.json().await?;
        Ok(reply.response)
    }
}
