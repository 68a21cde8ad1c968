//! Language model backends and the fallback chain
//!
//! Every backend speaks the same contract: a cheap availability probe and a
//! chat call over an ordered message list.

mod chain;
mod gemini;
mod ollama;
mod openai;

use std::sync::Arc;

use async_trait::async_trait;

use crate::Result;
use crate::config::{ApiKeys, LlmConfig};
use crate::db::MessageRole;

pub use chain::{APOLOGY, ChatReply, ResponseProvider};
pub use gemini::GeminiBackend;
pub use ollama::{OllamaBackend, OllamaClassifier, pick_model};
pub use openai::OpenAiCompatible;

/// One message of a chat request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    #[must_use]
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }
}

/// A language model the chain can fall back through
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Stable name for logs and the availability cache
    fn name(&self) -> &str;

    /// Cheap capability probe (credentials present, server reachable)
    async fn available(&self) -> bool;

    /// Produce the assistant reply for an ordered message list
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or the response is malformed
    async fn chat(&self, messages: &[ChatMessage]) -> Result<String>;
}

/// Backend identifiers accepted in config
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Ollama,
    LmStudio,
    Groq,
    Nvidia,
    OpenRouter,
    Gemini,
}

impl BackendKind {
    /// Local first, then fast cloud, then large cloud
    pub const DEFAULT_ORDER: [Self; 6] = [
        Self::Ollama,
        Self::LmStudio,
        Self::Groq,
        Self::Nvidia,
        Self::OpenRouter,
        Self::Gemini,
    ];

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "ollama" => Some(Self::Ollama),
            "lmstudio" | "lm_studio" | "lm-studio" => Some(Self::LmStudio),
            "groq" => Some(Self::Groq),
            "nvidia" | "nim" => Some(Self::Nvidia),
            "openrouter" => Some(Self::OpenRouter),
            "gemini" | "google" => Some(Self::Gemini),
            _ => None,
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Ollama => "ollama",
            Self::LmStudio => "lmstudio",
            Self::Groq => "groq",
            Self::Nvidia => "nvidia",
            Self::OpenRouter => "openrouter",
            Self::Gemini => "gemini",
        }
    }

    /// Runs on this machine
    #[must_use]
    pub const fn is_local(self) -> bool {
        matches!(self, Self::Ollama | Self::LmStudio)
    }
}

/// Build the configured backends in priority order
///
/// Cloud backends without an API key are left out; local backends are left
/// out when `prefer_local` is off.
#[must_use]
pub fn build_backends(config: &LlmConfig, keys: &ApiKeys) -> Vec<Arc<dyn ChatBackend>> {
    let mut backends: Vec<Arc<dyn ChatBackend>> = Vec::new();

    for kind in &config.backends {
        if kind.is_local() && !config.prefer_local {
            tracing::debug!(backend = kind.name(), "local backends disabled, skipping");
            continue;
        }

        let backend: Option<Arc<dyn ChatBackend>> = match kind {
            BackendKind::Ollama => Some(Arc::new(OllamaBackend::new(
                &config.ollama_host,
                &config.ollama_model,
                config.request_timeout,
            ))),
            BackendKind::LmStudio => Some(Arc::new(OpenAiCompatible::local(
                "lmstudio",
                &config.lmstudio_host,
                &config.lmstudio_model,
                config.request_timeout,
            ))),
            BackendKind::Groq => keys.groq.clone().map(|key| {
                Arc::new(OpenAiCompatible::cloud(
                    "groq",
                    "https://api.groq.com/openai/v1",
                    &config.groq_model,
                    key,
                    config.request_timeout,
                )) as Arc<dyn ChatBackend>
            }),
            BackendKind::Nvidia => keys.nvidia.clone().map(|key| {
                Arc::new(OpenAiCompatible::cloud(
                    "nvidia",
                    "https://integrate.api.nvidia.com/v1",
                    &config.nvidia_model,
                    key,
                    config.request_timeout,
                )) as Arc<dyn ChatBackend>
            }),
            BackendKind::OpenRouter => keys.openrouter.clone().map(|key| {
                Arc::new(
                    OpenAiCompatible::cloud(
                        "openrouter",
                        "https://openrouter.ai/api/v1",
                        &config.openrouter_model,
                        key,
                        config.request_timeout,
                    )
                    .with_header("HTTP-Referer", "https://github.com/buddy-assistant"),
                ) as Arc<dyn ChatBackend>
            }),
            BackendKind::Gemini => keys.gemini.clone().map(|key| {
                Arc::new(GeminiBackend::new(
                    &config.gemini_model,
                    key,
                    config.request_timeout,
                )) as Arc<dyn ChatBackend>
            }),
        };

        match backend {
            Some(b) => backends.push(b),
            None => tracing::debug!(backend = kind.name(), "no API key, skipping"),
        }
    }

    tracing::info!(
        backends = ?backends.iter().map(|b| b.name().to_string()).collect::<Vec<_>>(),
        "chat backends configured"
    );
    backends
}

/// HTTP client with the per-request timeout applied
fn http_client(timeout: std::time::Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}
