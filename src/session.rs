//! The voice session state machine
//!
//! ```text
//! IDLE -> WAKE -> LISTENING -> PROCESSING -> SPEAKING -> IDLE
//!                     ^                          |
//!                     +------ follow-up ---------+
//! ```
//!
//! One step runs at a time on the caller's task. Errors and panics inside a
//! step are caught by [`SessionController::tick`], counted by the watchdog,
//! and the machine restarts from IDLE.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::mpsc;

use crate::Result;
use crate::config::SessionConfig;
use crate::db::ConversationStore;
use crate::health::Watchdog;
use crate::providers::ResponseProvider;
use crate::skills::{IntentRouter, Response, SessionHandle, SkillContext};
use crate::voice::{
    AudioSource, EndpointDetector, ManualTrigger, Narrator, Transcriber, Utterance, WakeTrigger,
};

/// How long one IDLE step waits for audio
const IDLE_POLL: Duration = Duration::from_millis(100);

/// Confidence attached to typed input
pub const TYPED_CONFIDENCE: f32 = 1.0;

/// Reply when the transcription service fails outright
const STT_FAILED: &str = "Sorry, I didn't catch that.";

/// Session states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Wake,
    Listening,
    Processing,
    Speaking,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "IDLE",
            Self::Wake => "WAKE",
            Self::Listening => "LISTENING",
            Self::Processing => "PROCESSING",
            Self::Speaking => "SPEAKING",
        };
        f.write_str(name)
    }
}

/// Everything the controller drives
pub struct SessionParts {
    pub source: Box<dyn AudioSource>,
    pub wake: WakeTrigger,
    pub endpoint: EndpointDetector,
    pub transcriber: Arc<dyn Transcriber>,
    pub router: IntentRouter,
    pub provider: ResponseProvider,
    pub narrator: Arc<dyn Narrator>,
    pub store: ConversationStore,
    pub watchdog: Watchdog,
    pub confidence_floor: f32,
}

/// Drives one voice session
pub struct SessionController {
    state: SessionState,
    source: Box<dyn AudioSource>,
    wake: WakeTrigger,
    manual: ManualTrigger,
    endpoint: EndpointDetector,
    transcriber: Arc<dyn Transcriber>,
    router: IntentRouter,
    provider: ResponseProvider,
    narrator: Arc<dyn Narrator>,
    handle: SessionHandle,
    announcements: mpsc::UnboundedReceiver<String>,
    watchdog: Watchdog,
    confidence_floor: f32,
    followup_phrases: Vec<String>,
    followup_timeout: Duration,
    utterance: Option<Utterance>,
    response: Option<Response>,
    onset_timeout: Option<Duration>,
}

impl SessionController {
    #[must_use]
    pub fn new(parts: SessionParts, config: &SessionConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let manual = parts.wake.manual_trigger();

        Self {
            state: SessionState::Idle,
            source: parts.source,
            wake: parts.wake,
            manual,
            endpoint: parts.endpoint,
            transcriber: parts.transcriber,
            router: parts.router,
            provider: parts.provider,
            narrator: parts.narrator,
            handle: SessionHandle::new(tx, parts.store),
            announcements: rx,
            watchdog: parts.watchdog,
            confidence_floor: parts.confidence_floor,
            followup_phrases: config
                .followup_phrases
                .iter()
                .map(|p| p.to_lowercase())
                .collect(),
            followup_timeout: config.followup_timeout,
            utterance: None,
            response: None,
            onset_timeout: None,
        }
    }

    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Handle lent to skills and background workers
    #[must_use]
    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Trigger that wakes the session without the wake phrase
    #[must_use]
    pub fn manual_trigger(&self) -> ManualTrigger {
        self.manual.clone()
    }

    #[must_use]
    pub const fn watchdog(&self) -> &Watchdog {
        &self.watchdog
    }

    /// Open the audio device and loop until `shutdown` resolves
    ///
    /// # Errors
    ///
    /// Returns error if the audio device cannot be opened
    pub async fn run(&mut self, shutdown: impl Future<Output = ()>) -> Result<()> {
        self.source.start()?;
        self.source.set_recording(true);
        tracing::info!(state = %self.state, "session started");

        tokio::pin!(shutdown);
        loop {
            let state = tokio::select! {
                () = &mut shutdown => None,
                state = self.tick() => Some(state),
            };
            if state.is_none() {
                tracing::info!("shutdown requested");
                break;
            }
        }

        self.source.stop();
        Ok(())
    }

    /// Run one step, recovering to IDLE if it fails or panics
    pub async fn tick(&mut self) -> SessionState {
        let outcome = AssertUnwindSafe(self.step()).catch_unwind().await;
        match outcome {
            Ok(Ok(state)) => {
                self.watchdog.record_success();
                state
            }
            Ok(Err(e)) => self.recover(&e).await,
            Err(panic) => self.recover(&panic_message(panic.as_ref())).await,
        }
    }

    /// Run one state's work and move to the next state
    ///
    /// # Errors
    ///
    /// Returns error if speaking fails; the caller is expected to recover
    pub async fn step(&mut self) -> Result<SessionState> {
        self.watchdog.heartbeat();

        let next = match self.state {
            SessionState::Idle => self.on_idle().await?,
            SessionState::Wake => self.on_wake().await,
            SessionState::Listening => self.on_listening().await,
            SessionState::Processing => self.on_processing().await,
            SessionState::Speaking => self.on_speaking().await?,
        };

        self.transition(next);
        Ok(next)
    }

    /// Route typed text and speak the reply, bypassing audio
    ///
    /// # Errors
    ///
    /// Returns error if speaking fails
    pub async fn handle_text(&mut self, text: &str) -> Result<Response> {
        let text = text.trim();
        self.transition(SessionState::Processing);
        let response = self.respond(text, TYPED_CONFIDENCE).await;

        self.transition(SessionState::Speaking);
        let spoken = self.narrator.speak(&response.text).await;
        self.transition(SessionState::Idle);

        spoken.map(|()| response)
    }

    /// Speak any queued announcements
    ///
    /// # Errors
    ///
    /// Returns error if speaking fails
    pub async fn speak_announcements(&mut self) -> Result<usize> {
        let mut spoken = 0;
        while let Ok(text) = self.announcements.try_recv() {
            tracing::info!(text = %text, "announcement");
            self.source.set_recording(false);
            let result = self.narrator.speak(&text).await;
            self.source.set_recording(true);
            result?;
            spoken += 1;
        }
        Ok(spoken)
    }

    /// Route text to a skill or the chat chain
    ///
    /// Replies that ask something keep the conversation open even when the
    /// producer did not request it.
    pub async fn respond(&self, text: &str, confidence: f32) -> Response {
        let ctx = SkillContext {
            confidence,
            session: self.handle.clone(),
        };

        let mut response = match self.router.route(text, &ctx).await {
            Some(response) => response,
            None => Response::simple(self.provider.chat(text).await),
        };

        if !response.continue_listening && self.invites_followup(&response.text) {
            tracing::debug!("reply invites follow-up");
            response.continue_listening = true;
            response.followup_timeout = self.followup_timeout;
        }
        response
    }

    /// Ends with a question or contains a follow-up phrase
    #[must_use]
    pub fn invites_followup(&self, text: &str) -> bool {
        let text = text.trim();
        if text.ends_with('?') {
            return true;
        }
        let lower = text.to_lowercase();
        self.followup_phrases.iter().any(|p| lower.contains(p))
    }

    async fn on_idle(&mut self) -> Result<SessionState> {
        self.speak_announcements().await?;

        if self.wake.take_manual() {
            tracing::info!("manual wake");
            return Ok(SessionState::Wake);
        }

        match self.source.next_chunk(IDLE_POLL).await {
            Some(chunk) if self.wake.detect(&chunk) => {
                tracing::info!("wake phrase detected");
                Ok(SessionState::Wake)
            }
            _ => Ok(SessionState::Idle),
        }
    }

    async fn on_wake(&mut self) -> SessionState {
        self.source.set_recording(false);
        if let Err(e) = self.narrator.cue().await {
            tracing::warn!(error = %e, "acknowledgment cue failed");
        }
        self.source.set_recording(true);
        self.wake.reset();
        self.onset_timeout = None;
        SessionState::Listening
    }

    async fn on_listening(&mut self) -> SessionState {
        let onset = self.onset_timeout.take();
        match self.endpoint.listen(self.source.as_mut(), onset).await {
            Some(utterance) if !utterance.is_empty() => {
                tracing::debug!(
                    duration_ms = utterance.duration().as_millis(),
                    "utterance captured"
                );
                self.utterance = Some(utterance);
                SessionState::Processing
            }
            _ => {
                tracing::debug!("no speech");
                SessionState::Idle
            }
        }
    }

    async fn on_processing(&mut self) -> SessionState {
        let Some(utterance) = self.utterance.take() else {
            return SessionState::Idle;
        };

        let transcript = match self.transcriber.transcribe(&utterance).await {
            Ok(transcript) => transcript,
            Err(e) => {
                tracing::warn!(transcriber = self.transcriber.name(), error = %e, "transcription failed");
                self.response = Some(Response::simple(STT_FAILED));
                return SessionState::Speaking;
            }
        };

        if !transcript.is_acceptable(self.confidence_floor) {
            tracing::info!(
                text = %transcript.text,
                confidence = transcript.confidence,
                floor = self.confidence_floor,
                "transcript rejected"
            );
            return SessionState::Idle;
        }

        tracing::info!(text = %transcript.text, confidence = transcript.confidence, "heard");
        self.response = Some(self.respond(&transcript.text, transcript.confidence).await);
        SessionState::Speaking
    }

    async fn on_speaking(&mut self) -> Result<SessionState> {
        let Some(response) = self.response.take() else {
            return Ok(SessionState::Idle);
        };

        if !response.text.trim().is_empty() {
            self.narrator.speak(&response.text).await?;
        }

        if response.continue_listening {
            self.onset_timeout = Some(response.followup_timeout);
            Ok(SessionState::Listening)
        } else {
            Ok(SessionState::Idle)
        }
    }

    /// Enter `next`, switching recording for the new state
    fn transition(&mut self, next: SessionState) {
        if next == self.state {
            return;
        }
        tracing::info!(from = %self.state, to = %next, "state transition");

        match next {
            SessionState::Idle | SessionState::Listening => self.source.set_recording(true),
            SessionState::Processing | SessionState::Speaking => {
                self.source.set_recording(false);
            }
            SessionState::Wake => {}
        }
        self.state = next;
    }

    async fn recover(&mut self, error: &dyn fmt::Display) -> SessionState {
        let cooldown = self.watchdog.record_crash(error);

        self.utterance = None;
        self.response = None;
        self.onset_timeout = None;
        self.wake.reset();
        self.transition(SessionState::Idle);

        if let Some(cooldown) = cooldown {
            tokio::time::sleep(cooldown).await;
        }
        SessionState::Idle
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
