//! Speech-to-text (STT) processing

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use super::capture::Utterance;
use crate::{Error, Result};

/// Confidence reported when the engine gives no likelihood
///
/// Sits below any sensible floor so such transcripts are rejected.
pub const NO_CONFIDENCE: f32 = -1.0;

/// Text recognized from an utterance
#[derive(Debug, Clone, PartialEq)]
pub struct Transcript {
    pub text: String,
    /// In `[0.0, 1.0]`, or [`NO_CONFIDENCE`]
    pub confidence: f32,
}

impl Transcript {
    #[must_use]
    pub fn new(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            text: text.into(),
            confidence,
        }
    }

    /// Transcript carrying nothing usable
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            text: String::new(),
            confidence: NO_CONFIDENCE,
        }
    }

    /// Non-empty text at or above the confidence floor
    #[must_use]
    pub fn is_acceptable(&self, floor: f32) -> bool {
        !self.text.trim().is_empty() && self.confidence >= floor
    }
}

/// Converts an utterance into a transcript
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Engine name for logs
    fn name(&self) -> &'static str;

    /// Transcribe captured audio
    ///
    /// # Errors
    ///
    /// Returns error if the engine fails
    async fn transcribe(&self, utterance: &Utterance) -> Result<Transcript>;
}

/// Response from `OpenAI` Whisper `verbose_json` transcription
#[derive(serde::Deserialize)]
struct WhisperResponse {
    text: String,
    #[serde(default)]
    segments: Vec<WhisperSegment>,
}

#[derive(serde::Deserialize)]
struct WhisperSegment {
    avg_logprob: f64,
}

/// Response from Deepgram transcription API
#[derive(serde::Deserialize)]
struct DeepgramResponse {
    results: DeepgramResults,
}

#[derive(serde::Deserialize)]
struct DeepgramResults {
    channels: Vec<DeepgramChannel>,
}

#[derive(serde::Deserialize)]
struct DeepgramChannel {
    alternatives: Vec<DeepgramAlternative>,
}

#[derive(serde::Deserialize)]
struct DeepgramAlternative {
    transcript: String,
    confidence: Option<f32>,
}

/// Map segment log-probabilities to a confidence in `[0.0, 1.0]`
///
/// `exp(mean(avg_logprob))`, or [`NO_CONFIDENCE`] when there are no segments.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
pub fn confidence_from_logprobs(logprobs: &[f64]) -> f32 {
    if logprobs.is_empty() {
        return NO_CONFIDENCE;
    }
    let mean = logprobs.iter().sum::<f64>() / logprobs.len() as f64;
    mean.exp().clamp(0.0, 1.0) as f32
}

/// `OpenAI` Whisper transcription
pub struct WhisperTranscriber {
    client: reqwest::Client,
    api_key: SecretString,
    model: String,
}

impl WhisperTranscriber {
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new(api_key: Option<SecretString>, model: String) -> Result<Self> {
        let api_key = api_key
            .filter(|k| !k.expose_secret().is_empty())
            .ok_or_else(|| Error::Config("OpenAI API key required for Whisper".to_string()))?;

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model,
        })
    }
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    fn name(&self) -> &'static str {
        "whisper"
    }

    async fn transcribe(&self, utterance: &Utterance) -> Result<Transcript> {
        let audio = utterance.to_wav()?;
        tracing::debug!(audio_bytes = audio.len(), "starting Whisper transcription");

        let form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(audio)
                    .file_name("audio.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| Error::Stt(e.to_string()))?,
            )
            .text("model", self.model.clone())
            .text("response_format", "verbose_json")
            .text("language", "en");

        let response = self
            .client
            .post("https://api.openai.com/v1/audio/transcriptions")
            .bearer_auth(self.api_key.expose_secret())
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Whisper request failed");
                e
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Whisper API error");
            return Err(Error::Stt(format!("Whisper API error {status}: {body}")));
        }

        let result: WhisperResponse = response.json().await?;
        let logprobs: Vec<f64> = result.segments.iter().map(|s| s.avg_logprob).collect();
        let transcript = Transcript::new(
            result.text.trim(),
            confidence_from_logprobs(&logprobs),
        );

        tracing::info!(
            transcript = %transcript.text,
            confidence = transcript.confidence,
            "transcription complete"
        );
        Ok(transcript)
    }
}

/// Deepgram transcription
pub struct DeepgramTranscriber {
    client: reqwest::Client,
    api_key: SecretString,
    model: String,
}

impl DeepgramTranscriber {
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new(api_key: Option<SecretString>, model: String) -> Result<Self> {
        let api_key = api_key
            .filter(|k| !k.expose_secret().is_empty())
            .ok_or_else(|| Error::Config("Deepgram API key required".to_string()))?;

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model,
        })
    }
}

#[async_trait]
impl Transcriber for DeepgramTranscriber {
    fn name(&self) -> &'static str {
        "deepgram"
    }

    async fn transcribe(&self, utterance: &Utterance) -> Result<Transcript> {
        let audio = utterance.to_wav()?;
        tracing::debug!(audio_bytes = audio.len(), "starting Deepgram transcription");

        let url = format!(
            "https://api.deepgram.com/v1/listen?model={}&punctuate=true",
            self.model
        );

        let response = self
            .client
            .post(&url)
            .header(
                "Authorization",
                format!("Token {}", self.api_key.expose_secret()),
            )
            .header("Content-Type", "audio/wav")
            .body(audio)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Deepgram request failed");
                e
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Deepgram API error");
            return Err(Error::Stt(format!("Deepgram API error {status}: {body}")));
        }

        let result: DeepgramResponse = response.json().await?;
        let transcript = result
            .results
            .channels
            .first()
            .and_then(|c| c.alternatives.first())
            .map_or_else(Transcript::empty, |a| {
                Transcript::new(
                    a.transcript.trim(),
                    a.confidence.map_or(NO_CONFIDENCE, |c| c.clamp(0.0, 1.0)),
                )
            });

        tracing::info!(
            transcript = %transcript.text,
            confidence = transcript.confidence,
            "transcription complete"
        );
        Ok(transcript)
    }
}

/// Deterministic transcriber keyed by utterance content hash
///
/// Unknown audio transcribes to an empty, zero-confidence result.
#[derive(Default)]
pub struct LookupTranscriber {
    table: RwLock<HashMap<String, Transcript>>,
}

impl LookupTranscriber {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the transcript for a given utterance
    pub fn insert(&self, utterance: &Utterance, transcript: Transcript) {
        self.insert_hash(utterance.content_hash(), transcript);
    }

    /// Register the transcript for a content hash
    pub fn insert_hash(&self, hash: String, transcript: Transcript) {
        if let Ok(mut table) = self.table.write() {
            table.insert(hash, transcript);
        }
    }
}

#[async_trait]
impl Transcriber for LookupTranscriber {
    fn name(&self) -> &'static str {
        "lookup"
    }

    async fn transcribe(&self, utterance: &Utterance) -> Result<Transcript> {
        let hash = utterance.content_hash();
        let transcript = self
            .table
            .read()
            .map_err(|e| Error::Stt(e.to_string()))?
            .get(&hash)
            .cloned()
            .unwrap_or_else(Transcript::empty);
        tracing::debug!(hash = %hash, text = %transcript.text, "lookup transcription");
        Ok(transcript)
    }
}
