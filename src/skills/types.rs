//! Skill type definitions

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::Result;
use crate::db::ConversationStore;

/// Follow-up window when a response does not set its own
pub const DEFAULT_FOLLOWUP_TIMEOUT: Duration = Duration::from_secs(10);

/// What a skill (or the chat chain) hands back to the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Text to speak
    pub text: String,
    /// Listen again after speaking without waiting for the wake phrase
    pub continue_listening: bool,
    /// How long to wait for speech onset during the follow-up
    pub followup_timeout: Duration,
}

impl Response {
    /// A response that returns to idle after speaking
    #[must_use]
    pub fn simple(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            continue_listening: false,
            followup_timeout: DEFAULT_FOLLOWUP_TIMEOUT,
        }
    }

    /// A response that expects an answer from the user
    #[must_use]
    pub fn with_followup(text: impl Into<String>, timeout: Duration) -> Self {
        Self {
            text: text.into(),
            continue_listening: true,
            followup_timeout: timeout,
        }
    }
}

impl From<String> for Response {
    fn from(text: String) -> Self {
        Self::simple(text)
    }
}

impl From<&str> for Response {
    fn from(text: &str) -> Self {
        Self::simple(text)
    }
}

/// Capabilities the session lends to skills
///
/// Cloneable so background tasks spawned by a skill can keep announcing
/// after the handler returns.
#[derive(Clone)]
pub struct SessionHandle {
    announcements: mpsc::UnboundedSender<String>,
    store: ConversationStore,
}

impl SessionHandle {
    #[must_use]
    pub const fn new(
        announcements: mpsc::UnboundedSender<String>,
        store: ConversationStore,
    ) -> Self {
        Self {
            announcements,
            store,
        }
    }

    /// Queue text to be spoken the next time the session is idle
    ///
    /// Returns `false` if the session has shut down.
    pub fn announce(&self, text: impl Into<String>) -> bool {
        self.announcements.send(text.into()).is_ok()
    }

    #[must_use]
    pub const fn store(&self) -> &ConversationStore {
        &self.store
    }
}

/// Per-call context passed to a skill
#[derive(Clone)]
pub struct SkillContext {
    /// Transcript confidence (1.0 for typed input)
    pub confidence: f32,
    pub session: SessionHandle,
}

/// A specialized handler the router can dispatch to
#[async_trait]
pub trait Skill: Send + Sync {
    /// Unique lower-case identifier, also the classifier's answer
    fn name(&self) -> &str;

    /// One line shown to the intent classifier
    fn description(&self) -> &str;

    /// Case-insensitive substrings that select this skill directly
    fn keywords(&self) -> &[&str];

    /// Handle an utterance; `None` means "not mine after all"
    ///
    /// # Errors
    ///
    /// Returns error if the skill fails; the router treats it as no match
    async fn handle(&self, text: &str, ctx: &SkillContext) -> Result<Option<Response>>;

    /// Any keyword occurs in the text, ignoring case
    fn matches(&self, text: &str) -> bool {
        let text = text.to_lowercase();
        self.keywords()
            .iter()
            .any(|kw| text.contains(&kw.to_lowercase()))
    }
}
