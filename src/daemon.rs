//! Daemon - the application object
//!
//! Owns one of each component and wires them into a session. Voice mode
//! drives the microphone; text mode drives the same session from stdin.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};

use crate::config::{SttProviderKind, TtsProviderKind};
use crate::db::{self, ConversationStore, DbPool, ReminderRepo};
use crate::health::Watchdog;
use crate::providers::{OllamaClassifier, ResponseProvider, build_backends};
use crate::session::{SessionController, SessionParts, TYPED_CONFIDENCE};
use crate::skills::{
    MemorySkill, ReminderSkill, SkillRegistry, TimeSkill, WORKER_INTERVAL, spawn_worker,
};
use crate::voice::{
    AudioSource, ChunkQueue, ConsoleNarrator, DeepgramTranscriber, EndpointDetector, EnergyScorer,
    EnergyVad, LookupTranscriber, MicrophoneSource, Narrator, SpokenNarrator, TextToSpeech,
    Transcriber, WakeTrigger, WhisperTranscriber,
};
use crate::{Config, Result};

/// The Buddy daemon
pub struct Daemon {
    config: Config,
    db: DbPool,
    store: ConversationStore,
}

impl Daemon {
    /// Open the database and prepare the shared store
    ///
    /// # Errors
    ///
    /// Returns error if the database cannot be opened or rebuilt
    pub fn new(config: Config) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        let db_path = config.db_path();
        let db = db::init(&db_path)?;

        tracing::info!(path = %db_path.display(), "database initialized");

        let store = ConversationStore::new(db.clone());
        Ok(Self { config, db, store })
    }

    /// Build a daemon over an existing pool
    #[must_use]
    pub fn with_pool(config: Config, db: DbPool) -> Self {
        let store = ConversationStore::new(db.clone());
        Self { config, db, store }
    }

    #[must_use]
    pub const fn store(&self) -> &ConversationStore {
        &self.store
    }

    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Run the voice loop until interrupted
    ///
    /// # Errors
    ///
    /// Returns error if the audio devices cannot be opened
    #[allow(clippy::future_not_send)]
    pub async fn run_voice(&self) -> Result<()> {
        tracing::info!(
            wake_phrase = %self.config.wake.phrase,
            personality = self.config.llm.personality.name(),
            "starting voice session"
        );

        let queue = ChunkQueue::new(self.config.audio.queue_capacity, self.config.audio.overflow);
        let source = MicrophoneSource::new(
            self.config.audio.sample_rate,
            self.config.audio.chunk_size,
            queue,
        )?;

        let narrator = self.narrator()?;
        let transcriber = self.transcriber()?;
        let mut session = self.session(Box::new(source), transcriber, narrator)?;

        let _workers = self.spawn_background(&session);

        #[cfg(unix)]
        spawn_wake_signal(session.manual_trigger());

        session.run(shutdown_signal()).await
    }

    /// Run the session over stdin lines, printing replies
    ///
    /// # Errors
    ///
    /// Returns error if stdin cannot be read
    #[allow(clippy::future_not_send)]
    pub async fn run_text(&self) -> Result<()> {
        let source = ChunkQueue::new(1, self.config.audio.overflow);
        let mut session = self.session(
            Box::new(source),
            Arc::new(LookupTranscriber::new()),
            Arc::new(ConsoleNarrator),
        )?;
        let _workers = self.spawn_background(&session);

        tracing::info!("text mode, type a message (ctrl-d to quit)");
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut announcements = tokio::time::interval(WORKER_INTERVAL);

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line? else { break };
                    if line.trim().is_empty() {
                        continue;
                    }
                    session.watchdog().heartbeat();
                    if let Err(e) = session.handle_text(&line).await {
                        tracing::warn!(error = %e, "failed to print reply");
                    }
                }
                _ = announcements.tick() => {
                    session.watchdog().heartbeat();
                    session.speak_announcements().await?;
                }
            }
        }

        Ok(())
    }

    /// Route one message and return the reply text
    ///
    /// # Errors
    ///
    /// Returns error if the skills cannot be registered
    pub async fn ask(&self, text: &str) -> Result<String> {
        let session = self.session(
            Box::new(ChunkQueue::new(1, self.config.audio.overflow)),
            Arc::new(LookupTranscriber::new()),
            Arc::new(ConsoleNarrator),
        )?;
        Ok(session.respond(text, TYPED_CONFIDENCE).await.text)
    }

    /// Assemble a session over the given audio source and output
    ///
    /// # Errors
    ///
    /// Returns error if the skills cannot be registered
    pub fn session(
        &self,
        source: Box<dyn AudioSource>,
        transcriber: Arc<dyn Transcriber>,
        narrator: Arc<dyn Narrator>,
    ) -> Result<SessionController> {
        let audio = &self.config.audio;
        let window = audio.chunks_for_ms(self.config.wake.window_ms);
        let wake = WakeTrigger::new(
            Box::new(EnergyScorer),
            self.config.wake.threshold,
            usize::try_from(window).unwrap_or(1),
        );
        let endpoint = EndpointDetector::new(Box::new(EnergyVad), audio, &self.config.listen);

        let parts = SessionParts {
            source,
            wake,
            endpoint,
            transcriber,
            router: self.router()?.build(),
            provider: self.provider(),
            narrator,
            store: self.store.clone(),
            watchdog: Watchdog::from_config(&self.config.session),
            confidence_floor: self.config.listen.confidence_floor,
        };

        Ok(SessionController::new(parts, &self.config.session))
    }

    /// Built-in skills in keyword priority order
    ///
    /// # Errors
    ///
    /// Returns error if two skills share a name
    pub fn router(&self) -> Result<SkillRegistry> {
        let mut registry = SkillRegistry::new();
        registry
            .register(Arc::new(MemorySkill))?
            .register(Arc::new(ReminderSkill::new(ReminderRepo::new(self.db.clone()))))?
            .register(Arc::new(TimeSkill))?;

        if self.config.llm.prefer_local {
            registry.classifier(Arc::new(OllamaClassifier::new(
                &self.config.llm.ollama_host,
                &self.config.llm.classifier_model,
                self.config.llm.request_timeout,
            )));
        }
        Ok(registry)
    }

    /// Chat chain with the configured personality
    #[must_use]
    pub fn provider(&self) -> ResponseProvider {
        let llm = &self.config.llm;
        ResponseProvider::new(
            build_backends(llm, &self.config.api_keys),
            self.store.clone(),
            llm.personality.system_prompt().to_string(),
            llm.history_len,
            llm.availability_ttl,
        )
    }

    /// Configured speech-to-text engine
    ///
    /// # Errors
    ///
    /// Returns error if the engine's API key is missing
    pub fn transcriber(&self) -> Result<Arc<dyn Transcriber>> {
        let keys = &self.config.api_keys;
        let model = self.config.stt.model.clone();
        Ok(match self.config.stt.provider {
            SttProviderKind::Whisper => {
                Arc::new(WhisperTranscriber::new(keys.openai.clone(), model)?)
            }
            SttProviderKind::Deepgram => {
                Arc::new(DeepgramTranscriber::new(keys.deepgram.clone(), model)?)
            }
        })
    }

    /// Configured narrator
    ///
    /// # Errors
    ///
    /// Returns error if the TTS key is missing or the output device fails
    pub fn narrator(&self) -> Result<Arc<dyn Narrator>> {
        if self.config.tts.provider == TtsProviderKind::Console {
            return Ok(Arc::new(ConsoleNarrator));
        }
        let tts = TextToSpeech::from_config(&self.config.tts, &self.config.api_keys)?;
        Ok(Arc::new(SpokenNarrator::new(tts, &self.config.tts)?))
    }

    /// Start the watchdog and the reminder worker
    fn spawn_background(&self, session: &SessionController) -> [tokio::task::JoinHandle<()>; 2] {
        [
            session
                .watchdog()
                .spawn(self.config.session.watchdog_interval),
            spawn_worker(
                ReminderRepo::new(self.db.clone()),
                session.handle(),
                WORKER_INTERVAL,
            ),
        ]
    }
}

/// Resolves on ctrl-c
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

/// `SIGUSR1` wakes the session without the wake phrase
#[cfg(unix)]
fn spawn_wake_signal(trigger: crate::voice::ManualTrigger) {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::user_defined1()) {
        Ok(mut signals) => {
            tokio::spawn(async move {
                while signals.recv().await.is_some() {
                    tracing::info!("wake requested by signal");
                    trigger.fire();
                }
            });
        }
        Err(e) => tracing::warn!(error = %e, "SIGUSR1 wake unavailable"),
    }
}
