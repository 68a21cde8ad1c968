//! Configuration management for the Buddy assistant
//!
//! Values resolve with precedence env > TOML file > defaults.

pub mod file;

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::persona::Personality;
use crate::providers::BackendKind;
use crate::voice::OverflowPolicy;
use crate::{Error, Result};

use file::BuddyConfigFile;

/// Phrases that indicate the assistant is asking the user something
pub const DEFAULT_FOLLOWUP_PHRASES: &[&str] = &[
    "what would you like",
    "what should i",
    "would you like me to",
    "anything else",
    "what else",
    "tell me more",
    "which one",
    "please specify",
    "can you clarify",
];

/// Assistant configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to data directory (database)
    pub data_dir: PathBuf,

    /// Microphone capture
    pub audio: AudioConfig,

    /// Wake trigger
    pub wake: WakeConfig,

    /// Endpoint detection and transcript acceptance
    pub listen: ListenConfig,

    /// Speech-to-text
    pub stt: SttConfig,

    /// Text-to-speech
    pub tts: TtsConfig,

    /// Language model chain
    pub llm: LlmConfig,

    /// Session loop and crash recovery
    pub session: SessionConfig,

    /// API keys
    pub api_keys: ApiKeys,
}

/// Microphone capture configuration
#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// Capture sample rate in Hz
    pub sample_rate: u32,

    /// Samples per chunk
    pub chunk_size: usize,

    /// Maximum chunks held by the queue
    pub queue_capacity: usize,

    /// What to do when the queue is full
    pub overflow: OverflowPolicy,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            chunk_size: 512,
            queue_capacity: 256,
            overflow: OverflowPolicy::DropOldest,
        }
    }
}

impl AudioConfig {
    /// Duration of a single chunk
    #[must_use]
    pub fn chunk_duration(&self) -> Duration {
        let nanos = self.chunk_size as u64 * 1_000_000_000 / u64::from(self.sample_rate.max(1));
        Duration::from_nanos(nanos)
    }

    /// Number of whole chunks covering `ms` milliseconds (at least one).
    /// Rounds up so a threshold is never shorter than configured.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn chunks_for_ms(&self, ms: u32) -> u32 {
        let samples = u64::from(ms) * u64::from(self.sample_rate) / 1000;
        let chunks = samples.div_ceil(self.chunk_size.max(1) as u64);
        (chunks as u32).max(1)
    }
}

/// Wake trigger configuration
#[derive(Debug, Clone)]
pub struct WakeConfig {
    /// Phrase announced to the user (the acoustic model decides what matches)
    pub phrase: String,

    /// Score above which a wake is reported
    pub threshold: f32,

    /// Length of the score window in milliseconds
    pub window_ms: u32,
}

impl Default for WakeConfig {
    fn default() -> Self {
        Self {
            phrase: "hey buddy".to_string(),
            threshold: 0.5,
            window_ms: 500,
        }
    }
}

/// Endpoint detection configuration
#[derive(Debug, Clone)]
pub struct ListenConfig {
    /// Speech probability above which a chunk counts as speech
    pub vad_threshold: f32,

    /// Silence after confirmed speech that ends the utterance
    pub silence_ms: u32,

    /// Consecutive speech required before speech is confirmed
    pub min_speech_ms: u32,

    /// Hard stop for a listening window
    pub max_duration: Duration,

    /// Transcripts below this confidence are discarded
    pub confidence_floor: f32,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            vad_threshold: 0.5,
            silence_ms: 700,
            min_speech_ms: 250,
            max_duration: Duration::from_secs(15),
            confidence_floor: 0.4,
        }
    }
}

/// Speech-to-text engine selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SttProviderKind {
    #[default]
    Whisper,
    Deepgram,
}

impl SttProviderKind {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "whisper" | "openai" => Some(Self::Whisper),
            "deepgram" => Some(Self::Deepgram),
            _ => None,
        }
    }
}

/// Speech-to-text configuration
#[derive(Debug, Clone)]
pub struct SttConfig {
    pub provider: SttProviderKind,
    pub model: String,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            provider: SttProviderKind::Whisper,
            model: "whisper-1".to_string(),
        }
    }
}

/// Text-to-speech engine selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TtsProviderKind {
    #[default]
    OpenAi,
    ElevenLabs,
    /// Print responses instead of speaking them
    Console,
}

impl TtsProviderKind {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Some(Self::OpenAi),
            "elevenlabs" => Some(Self::ElevenLabs),
            "console" | "none" => Some(Self::Console),
            _ => None,
        }
    }
}

/// Text-to-speech configuration
#[derive(Debug, Clone)]
pub struct TtsConfig {
    pub provider: TtsProviderKind,
    pub model: String,
    pub voice: String,
    pub speed: f32,
    /// WAV file played on wake; a short tone is synthesized when unset
    pub cue_path: Option<PathBuf>,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            provider: TtsProviderKind::OpenAi,
            model: "tts-1".to_string(),
            voice: "alloy".to_string(),
            speed: 1.0,
            cue_path: None,
        }
    }
}

/// Language model chain configuration
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub personality: Personality,

    /// Messages of history included in each chat request
    pub history_len: usize,

    /// Backend priority order
    pub backends: Vec<BackendKind>,

    /// Include local backends (Ollama, LM Studio) in the chain
    pub prefer_local: bool,

    /// Ollama model used for intent classification
    pub classifier_model: String,

    /// How long an availability probe result is trusted
    pub availability_ttl: Duration,

    /// Per-request timeout for backend HTTP calls
    pub request_timeout: Duration,

    pub ollama_host: String,
    pub ollama_model: String,
    pub lmstudio_host: String,
    pub lmstudio_model: String,
    pub groq_model: String,
    pub nvidia_model: String,
    pub openrouter_model: String,
    pub gemini_model: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            personality: Personality::Friendly,
            history_len: 10,
            backends: BackendKind::DEFAULT_ORDER.to_vec(),
            prefer_local: true,
            classifier_model: "gemma:2b".to_string(),
            availability_ttl: Duration::from_secs(60),
            request_timeout: Duration::from_secs(30),
            ollama_host: "http://localhost:11434".to_string(),
            ollama_model: "llama3.2".to_string(),
            lmstudio_host: "http://localhost:1234/v1".to_string(),
            lmstudio_model: "falcon-h1r-7b".to_string(),
            groq_model: "llama-3.1-8b-instant".to_string(),
            nvidia_model: "meta/llama-3.1-70b-instruct".to_string(),
            openrouter_model: "google/gemini-2.0-flash-exp:free".to_string(),
            gemini_model: "gemini-2.0-flash".to_string(),
        }
    }
}

/// Session loop configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Phrases that force a follow-up listening window
    pub followup_phrases: Vec<String>,

    /// Default follow-up window when the heuristic forces continuation
    pub followup_timeout: Duration,

    /// Heartbeat age that triggers a watchdog warning
    pub watchdog_timeout: Duration,

    /// How often the watchdog checks the heartbeat
    pub watchdog_interval: Duration,

    /// Consecutive crashes tolerated before cooling down
    pub crash_threshold: u32,

    /// Pause inserted once the crash threshold is exceeded
    pub crash_cooldown: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            followup_phrases: DEFAULT_FOLLOWUP_PHRASES
                .iter()
                .map(ToString::to_string)
                .collect(),
            followup_timeout: Duration::from_secs(10),
            watchdog_timeout: Duration::from_secs(30),
            watchdog_interval: Duration::from_secs(5),
            crash_threshold: 5,
            crash_cooldown: Duration::from_secs(5),
        }
    }
}

/// API keys for external services
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    /// `OpenAI` API key (Whisper and TTS)
    pub openai: Option<SecretString>,

    /// Groq API key
    pub groq: Option<SecretString>,

    /// NVIDIA NIM API key
    pub nvidia: Option<SecretString>,

    /// `OpenRouter` API key
    pub openrouter: Option<SecretString>,

    /// Google Gemini API key
    pub gemini: Option<SecretString>,

    /// `ElevenLabs` API key (optional TTS)
    pub elevenlabs: Option<SecretString>,

    /// Deepgram API key (optional STT)
    pub deepgram: Option<SecretString>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            audio: AudioConfig::default(),
            wake: WakeConfig::default(),
            listen: ListenConfig::default(),
            stt: SttConfig::default(),
            tts: TtsConfig::default(),
            llm: LlmConfig::default(),
            session: SessionConfig::default(),
            api_keys: ApiKeys::default(),
        }
    }
}

impl Config {
    /// Load configuration from env and the standard config file
    ///
    /// # Errors
    ///
    /// Returns error if a configured value is invalid
    pub fn load() -> Result<Self> {
        Self::from_file(file::load_config_file())
    }

    /// Build configuration from a parsed config file, applying env overrides
    ///
    /// # Errors
    ///
    /// Returns error if a configured value is invalid
    #[allow(clippy::too_many_lines)]
    pub fn from_file(fc: BuddyConfigFile) -> Result<Self> {
        let defaults = Self::default();

        // Data directory (~/.local/share/buddy on Linux)
        let data_dir = env("BUDDY_DATA_DIR")
            .or(fc.data_dir)
            .map_or(defaults.data_dir, PathBuf::from);
        std::fs::create_dir_all(&data_dir).ok();

        let overflow = match env("BUDDY_AUDIO_OVERFLOW").or(fc.audio.overflow) {
            Some(s) => OverflowPolicy::parse(&s)
                .ok_or_else(|| Error::Config(format!("unknown overflow policy: {s}")))?,
            None => defaults.audio.overflow,
        };
        let audio = AudioConfig {
            sample_rate: fc.audio.sample_rate.unwrap_or(defaults.audio.sample_rate),
            chunk_size: fc.audio.chunk_size.unwrap_or(defaults.audio.chunk_size),
            queue_capacity: fc
                .audio
                .queue_capacity
                .unwrap_or(defaults.audio.queue_capacity),
            overflow,
        };
        if audio.chunk_size == 0 || audio.queue_capacity == 0 {
            return Err(Error::Config(
                "audio.chunk_size and audio.queue_capacity must be positive".to_string(),
            ));
        }

        let wake = WakeConfig {
            phrase: env("BUDDY_WAKE_PHRASE")
                .or(fc.wake.phrase)
                .unwrap_or(defaults.wake.phrase),
            threshold: env("WAKE_WORD_THRESHOLD")
                .and_then(|s| s.parse().ok())
                .or(fc.wake.threshold)
                .unwrap_or(defaults.wake.threshold),
            window_ms: fc.wake.window_ms.unwrap_or(defaults.wake.window_ms),
        };

        let listen = ListenConfig {
            vad_threshold: fc
                .listen
                .vad_threshold
                .unwrap_or(defaults.listen.vad_threshold),
            silence_ms: fc.listen.silence_ms.unwrap_or(defaults.listen.silence_ms),
            min_speech_ms: fc
                .listen
                .min_speech_ms
                .unwrap_or(defaults.listen.min_speech_ms),
            max_duration: secs(fc.listen.max_duration_secs, defaults.listen.max_duration),
            confidence_floor: fc
                .listen
                .confidence_floor
                .unwrap_or(defaults.listen.confidence_floor),
        };

        let stt_provider = match env("BUDDY_STT_PROVIDER").or(fc.stt.provider) {
            Some(s) => SttProviderKind::parse(&s)
                .ok_or_else(|| Error::Config(format!("unknown STT provider: {s}")))?,
            None => defaults.stt.provider,
        };
        let stt = SttConfig {
            provider: stt_provider,
            model: env("WHISPER_MODEL")
                .or(fc.stt.model)
                .unwrap_or(defaults.stt.model),
        };

        let tts_provider = match env("BUDDY_TTS_PROVIDER").or(fc.tts.provider) {
            Some(s) => TtsProviderKind::parse(&s)
                .ok_or_else(|| Error::Config(format!("unknown TTS provider: {s}")))?,
            None => defaults.tts.provider,
        };
        let tts = TtsConfig {
            provider: tts_provider,
            model: fc.tts.model.unwrap_or(defaults.tts.model),
            voice: env("TTS_VOICE")
                .or(fc.tts.voice)
                .unwrap_or(defaults.tts.voice),
            speed: fc.tts.speed.unwrap_or(defaults.tts.speed),
            cue_path: fc.tts.cue_path.map(PathBuf::from),
        };

        let personality = match env("BUDDY_PERSONALITY").or(fc.llm.personality) {
            Some(s) => Personality::parse(&s)
                .ok_or_else(|| Error::Config(format!("unknown personality: {s}")))?,
            None => defaults.llm.personality,
        };
        let backends = match env("BUDDY_BACKENDS")
            .map(|s| s.split(',').map(str::to_string).collect::<Vec<_>>())
            .or(fc.llm.backends)
        {
            Some(names) => names
                .iter()
                .filter(|n| !n.trim().is_empty())
                .map(|n| {
                    BackendKind::parse(n)
                        .ok_or_else(|| Error::Config(format!("unknown backend: {n}")))
                })
                .collect::<Result<Vec<_>>>()?,
            None => defaults.llm.backends.clone(),
        };
        let d = defaults.llm;
        let llm = LlmConfig {
            personality,
            history_len: fc.llm.history_len.unwrap_or(d.history_len),
            backends,
            prefer_local: fc.llm.prefer_local.unwrap_or(d.prefer_local),
            classifier_model: fc.llm.classifier_model.unwrap_or(d.classifier_model),
            availability_ttl: fc
                .llm
                .availability_ttl_secs
                .map_or(d.availability_ttl, Duration::from_secs),
            request_timeout: fc
                .llm
                .request_timeout_secs
                .map_or(d.request_timeout, Duration::from_secs),
            ollama_host: env("OLLAMA_HOST")
                .or(fc.llm.ollama_host)
                .unwrap_or(d.ollama_host),
            ollama_model: env("OLLAMA_MODEL")
                .or(fc.llm.ollama_model)
                .unwrap_or(d.ollama_model),
            lmstudio_host: env("LMSTUDIO_HOST")
                .or(fc.llm.lmstudio_host)
                .unwrap_or(d.lmstudio_host),
            lmstudio_model: env("LMSTUDIO_MODEL")
                .or(fc.llm.lmstudio_model)
                .unwrap_or(d.lmstudio_model),
            groq_model: fc.llm.groq_model.unwrap_or(d.groq_model),
            nvidia_model: fc.llm.nvidia_model.unwrap_or(d.nvidia_model),
            openrouter_model: fc.llm.openrouter_model.unwrap_or(d.openrouter_model),
            gemini_model: fc.llm.gemini_model.unwrap_or(d.gemini_model),
        };

        let s = defaults.session;
        let session = SessionConfig {
            followup_phrases: fc
                .session
                .followup_phrases
                .map(|p| p.into_iter().map(|s| s.to_lowercase()).collect())
                .unwrap_or(s.followup_phrases),
            followup_timeout: secs(fc.session.followup_timeout_secs, s.followup_timeout),
            watchdog_timeout: fc
                .session
                .watchdog_timeout_secs
                .map_or(s.watchdog_timeout, Duration::from_secs),
            watchdog_interval: fc
                .session
                .watchdog_interval_secs
                .map_or(s.watchdog_interval, Duration::from_secs),
            crash_threshold: fc.session.crash_threshold.unwrap_or(s.crash_threshold),
            crash_cooldown: fc
                .session
                .crash_cooldown_secs
                .map_or(s.crash_cooldown, Duration::from_secs),
        };

        // API keys (env > toml > None)
        let keys = fc.api_keys;
        let api_keys = ApiKeys {
            openai: secret("OPENAI_API_KEY", keys.openai),
            groq: secret("GROQ_API_KEY", keys.groq),
            nvidia: secret("NVIDIA_API_KEY", keys.nvidia),
            openrouter: secret("OPENROUTER_API_KEY", keys.openrouter),
            gemini: secret("GEMINI_API_KEY", keys.gemini),
            elevenlabs: secret("ELEVENLABS_API_KEY", keys.elevenlabs),
            deepgram: secret("DEEPGRAM_API_KEY", keys.deepgram),
        };

        Ok(Self {
            data_dir,
            audio,
            wake,
            listen,
            stt,
            tts,
            llm,
            session,
            api_keys,
        })
    }

    /// Path of the conversation database
    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("buddy.db")
    }
}

/// Default data directory: `~/.local/share/buddy`
fn default_data_dir() -> PathBuf {
    directories::BaseDirs::new()
        .map_or_else(|| PathBuf::from(".buddy"), |d| d.data_dir().join("buddy"))
}

/// Non-empty env var
fn env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn secret(name: &str, fallback: Option<String>) -> Option<SecretString> {
    env(name)
        .or(fallback)
        .filter(|k| !k.is_empty())
        .map(SecretString::from)
}

fn secs(value: Option<f64>, default: Duration) -> Duration {
    value
        .and_then(|s| Duration::try_from_secs_f64(s).ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_math() {
        let audio = AudioConfig::default();
        assert_eq!(audio.chunk_duration(), Duration::from_millis(32));
        // 700ms of 32ms chunks, rounded up
        assert_eq!(audio.chunks_for_ms(700), 22);
        assert_eq!(audio.chunks_for_ms(250), 8);
        assert_eq!(audio.chunks_for_ms(64), 2);
        assert_eq!(audio.chunks_for_ms(500), 16);
        assert_eq!(audio.chunks_for_ms(0), 1);
    }

    #[test]
    fn test_file_values_apply() {
        let fc: BuddyConfigFile = toml::from_str(
            r#"
            data_dir = "/tmp/buddy-config-test"

            [listen]
            confidence_floor = 0.6
            max_duration_secs = 8.5

            [llm]
            personality = "playful"
            backends = ["gemini", "groq"]

            [session]
            followup_phrases = ["Shall I"]
            "#,
        )
        .unwrap();

        let config = Config::from_file(fc).unwrap();
        assert!((config.listen.confidence_floor - 0.6).abs() < f32::EPSILON);
        assert_eq!(config.listen.max_duration, Duration::from_millis(8500));
        assert_eq!(config.llm.personality, Personality::Playful);
        assert_eq!(
            config.llm.backends,
            vec![BackendKind::Gemini, BackendKind::Groq]
        );
        assert_eq!(config.session.followup_phrases, vec!["shall i".to_string()]);
    }

    #[test]
    fn test_unknown_backend_rejected() {
        let fc: BuddyConfigFile = toml::from_str(
            r#"
            data_dir = "/tmp/buddy-config-test"
            [llm]
            backends = ["skynet"]
            "#,
        )
        .unwrap();

        assert!(matches!(Config::from_file(fc), Err(Error::Config(_))));
    }

    #[test]
    fn test_defaults_follow_original_tuning() {
        let config = Config::default();
        assert_eq!(config.listen.silence_ms, 700);
        assert_eq!(config.listen.min_speech_ms, 250);
        assert_eq!(config.session.crash_threshold, 5);
        assert_eq!(config.llm.backends.first(), Some(&BackendKind::Ollama));
    }
}
