//! OpenAI-compatible chat completions (LM Studio, Groq, NVIDIA, `OpenRouter`)

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::{ChatBackend, ChatMessage, http_client};
use crate::{Error, Result};

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ModelsResponse {
    #[serde(default)]
    data: Vec<serde_json::Value>,
}

/// Any server exposing `/chat/completions`
pub struct OpenAiCompatible {
    name: String,
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<SecretString>,
    headers: Vec<(&'static str, &'static str)>,
}

impl OpenAiCompatible {
    /// Keyless local server; availability is probed via `/models`
    #[must_use]
    pub fn local(name: &str, base_url: &str, model: &str, timeout: Duration) -> Self {
        Self {
            name: name.to_string(),
            client: http_client(timeout),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key: None,
            headers: Vec::new(),
        }
    }

    /// Hosted API; available whenever a key is configured
    #[must_use]
    pub fn cloud(
        name: &str,
        base_url: &str,
        model: &str,
        api_key: SecretString,
        timeout: Duration,
    ) -> Self {
        Self {
            api_key: Some(api_key),
            ..Self::local(name, base_url, model, timeout)
        }
    }

    /// Extra header sent with every request
    #[must_use]
    pub fn with_header(mut self, name: &'static str, value: &'static str) -> Self {
        self.headers.push((name, value));
        self
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let builder = self
            .headers
            .iter()
            .fold(builder, |b, (k, v)| b.header(*k, *v));
        match &self.api_key {
            Some(key) => builder.bearer_auth(key.expose_secret()),
            None => builder,
        }
    }
}

#[async_trait]
impl ChatBackend for OpenAiCompatible {
    fn name(&self) -> &str {
        &self.name
    }

    async fn available(&self) -> bool {
        if let Some(key) = &self.api_key {
            return !key.expose_secret().is_empty();
        }

        let response = self
            .request(self.client.get(format!("{}/models", self.base_url)))
            .send()
            .await;

        match response {
            Ok(r) if r.status().is_success() => r
                .json::<ModelsResponse>()
                .await
                .is_ok_and(|m| !m.data.is_empty()),
            Ok(r) => {
                tracing::debug!(backend = %self.name, status = %r.status(), "models probe failed");
                false
            }
            Err(e) => {
                tracing::debug!(backend = %self.name, error = %e, "not reachable");
                false
            }
        }
    }

    async fn chat(&self, messages: &[ChatMessage]) -> Result<String> {
        let request = CompletionRequest {
            model: &self.model,
            messages: messages
                .iter()
                .map(|m| WireMessage {
                    role: m.role.as_str(),
                    content: &m.content,
                })
                .collect(),
            temperature: 0.7,
            max_tokens: 1024,
        };

        let response = self
            .request(
                self.client
                    .post(format!("{}/chat/completions", self.base_url)),
            )
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Llm(format!("{} error {status}: {body}", self.name)));
        }

        let completion: CompletionResponse = response.json().await?;
        Ok(completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default())
    }
}
