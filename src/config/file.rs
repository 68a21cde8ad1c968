//! TOML configuration file loading
//!
//! Supports `~/.config/buddy/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct BuddyConfigFile {
    /// Override for the data directory (database)
    #[serde(default)]
    pub data_dir: Option<String>,

    /// Microphone capture configuration
    #[serde(default)]
    pub audio: AudioFileConfig,

    /// Wake trigger configuration
    #[serde(default)]
    pub wake: WakeFileConfig,

    /// Endpoint detection and transcript acceptance
    #[serde(default)]
    pub listen: ListenFileConfig,

    /// Speech-to-text configuration
    #[serde(default)]
    pub stt: SttFileConfig,

    /// Text-to-speech configuration
    #[serde(default)]
    pub tts: TtsFileConfig,

    /// Language model chain configuration
    #[serde(default)]
    pub llm: LlmFileConfig,

    /// Session loop configuration
    #[serde(default)]
    pub session: SessionFileConfig,

    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,
}

/// Microphone capture configuration
#[derive(Debug, Default, Deserialize)]
pub struct AudioFileConfig {
    pub sample_rate: Option<u32>,
    pub chunk_size: Option<usize>,
    pub queue_capacity: Option<usize>,
    /// "drop_oldest", "drop_newest" or "block"
    pub overflow: Option<String>,
}

/// Wake trigger configuration
#[derive(Debug, Default, Deserialize)]
pub struct WakeFileConfig {
    pub phrase: Option<String>,
    pub threshold: Option<f32>,
    pub window_ms: Option<u32>,
}

/// Endpoint detection configuration
#[derive(Debug, Default, Deserialize)]
pub struct ListenFileConfig {
    pub vad_threshold: Option<f32>,
    pub silence_ms: Option<u32>,
    pub min_speech_ms: Option<u32>,
    pub max_duration_secs: Option<f64>,
    pub confidence_floor: Option<f32>,
}

/// Speech-to-text configuration
#[derive(Debug, Default, Deserialize)]
pub struct SttFileConfig {
    /// "whisper" or "deepgram"
    pub provider: Option<String>,
    pub model: Option<String>,
}

/// Text-to-speech configuration
#[derive(Debug, Default, Deserialize)]
pub struct TtsFileConfig {
    /// "openai", "elevenlabs" or "console"
    pub provider: Option<String>,
    pub model: Option<String>,
    pub voice: Option<String>,
    pub speed: Option<f32>,
    /// WAV file played as the wake acknowledgment
    pub cue_path: Option<String>,
}

/// Language model chain configuration
#[derive(Debug, Default, Deserialize)]
pub struct LlmFileConfig {
    /// "friendly", "professional" or "playful"
    pub personality: Option<String>,
    pub history_len: Option<usize>,
    /// Backend priority order, e.g. `["ollama", "groq", "gemini"]`
    pub backends: Option<Vec<String>>,
    pub prefer_local: Option<bool>,
    pub classifier_model: Option<String>,
    pub availability_ttl_secs: Option<u64>,
    pub request_timeout_secs: Option<u64>,
    pub ollama_host: Option<String>,
    pub ollama_model: Option<String>,
    pub lmstudio_host: Option<String>,
    pub lmstudio_model: Option<String>,
    pub groq_model: Option<String>,
    pub nvidia_model: Option<String>,
    pub openrouter_model: Option<String>,
    pub gemini_model: Option<String>,
}

/// Session loop configuration
#[derive(Debug, Default, Deserialize)]
pub struct SessionFileConfig {
    pub followup_phrases: Option<Vec<String>>,
    pub followup_timeout_secs: Option<f64>,
    pub watchdog_timeout_secs: Option<u64>,
    pub watchdog_interval_secs: Option<u64>,
    pub crash_threshold: Option<u32>,
    pub crash_cooldown_secs: Option<u64>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub openai: Option<String>,
    pub groq: Option<String>,
    pub nvidia: Option<String>,
    pub openrouter: Option<String>,
    pub gemini: Option<String>,
    pub elevenlabs: Option<String>,
    pub deepgram: Option<String>,
}

/// Load the TOML config file from the standard path
///
/// Returns `BuddyConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> BuddyConfigFile {
    config_file_path().map_or_else(BuddyConfigFile::default, |path| load_from(&path))
}

/// Load a TOML config file from an explicit path
///
/// Missing or malformed files fall back to defaults.
pub fn load_from(path: &Path) -> BuddyConfigFile {
    if !path.exists() {
        return BuddyConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                BuddyConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            BuddyConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/buddy/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("buddy").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_overlay_parses() {
        let file: BuddyConfigFile = toml::from_str(
            r#"
            [listen]
            silence_ms = 900

            [llm]
            backends = ["groq", "gemini"]
            "#,
        )
        .unwrap();

        assert_eq!(file.listen.silence_ms, Some(900));
        assert_eq!(file.listen.min_speech_ms, None);
        assert_eq!(
            file.llm.backends,
            Some(vec!["groq".to_string(), "gemini".to_string()])
        );
        assert!(file.audio.sample_rate.is_none());
    }

    #[test]
    fn test_malformed_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[listen\nsilence_ms = ").unwrap();

        let file = load_from(&path);
        assert!(file.listen.silence_ms.is_none());
    }

    #[test]
    fn test_missing_file_is_default() {
        let file = load_from(Path::new("/nonexistent/buddy/config.toml"));
        assert!(file.data_dir.is_none());
    }
}
