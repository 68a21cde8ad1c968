//! Buddy - a wake-word voice assistant
//!
//! This library provides the pieces of the voice loop:
//! - Audio capture, wake word and endpoint detection, STT and TTS
//! - Keyword and classifier based routing to built-in skills
//! - A fallback chain over local and hosted language models
//! - Persistent conversation history
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                   SessionController                     │
//! │  IDLE → WAKE → LISTENING → PROCESSING → SPEAKING        │
//! └──────┬──────────────┬────────────────┬─────────────────┘
//!        │              │                │
//! ┌──────▼──────┐ ┌─────▼──────┐ ┌───────▼──────────────┐
//! │    voice    │ │   skills   │ │      providers        │
//! │ capture,    │ │ router,    │ │ ollama → lmstudio →   │
//! │ wake, VAD,  │ │ time,      │ │ groq → nvidia →       │
//! │ STT, TTS    │ │ reminder   │ │ openrouter → gemini   │
//! └─────────────┘ └─────┬──────┘ └───────┬──────────────┘
//!                       │                │
//!                 ┌─────▼────────────────▼─────┐
//!                 │   db (conversation, reminders) │
//!                 └────────────────────────────┘
//! ```

pub mod config;
pub mod daemon;
pub mod db;
pub mod error;
pub mod health;
pub mod persona;
pub mod providers;
pub mod session;
pub mod skills;
pub mod voice;

pub use config::Config;
pub use daemon::Daemon;
pub use db::{ConversationStore, DbConn, DbPool};
pub use error::{Error, Result};
pub use health::Watchdog;
pub use persona::Personality;
pub use providers::{ChatBackend, ResponseProvider};
pub use session::{SessionController, SessionParts, SessionState};
pub use skills::{IntentRouter, Response, Skill, SkillRegistry};
