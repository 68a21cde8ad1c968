//! Voice processing module
//!
//! Handles audio capture, wake word detection, endpoint detection,
//! transcription, and spoken output.

mod capture;
mod endpoint;
mod narrator;
mod playback;
mod stt;
mod tts;
mod wake_word;

pub use capture::{
    AudioChunk, AudioSource, CHUNK_SIZE, ChunkQueue, MicrophoneSource, OverflowPolicy,
    SAMPLE_RATE, Utterance,
};
pub use endpoint::{EndpointDetector, EndpointEvent, EnergyVad, SpeechClassifier};
pub use narrator::{ConsoleNarrator, Narrator, SpokenNarrator};
pub use playback::{AudioPlayback, PLAYBACK_SAMPLE_RATE, acknowledgment_tone, decode_mp3, load_wav};
pub use stt::{
    DeepgramTranscriber, LookupTranscriber, NO_CONFIDENCE, Transcriber, Transcript,
    WhisperTranscriber, confidence_from_logprobs,
};
pub use tts::{TextToSpeech, split_sentences};
pub use wake_word::{ENERGY_THRESHOLD, EnergyScorer, ManualTrigger, WakeScorer, WakeTrigger};
