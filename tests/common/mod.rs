//! Shared test utilities
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use buddy::config::SessionConfig;
use buddy::db::{self, ConversationStore};
use buddy::providers::{ChatBackend, ChatMessage, ResponseProvider};
use buddy::skills::{IntentClassifier, Response, Skill, SkillContext, SkillRegistry};
use buddy::voice::{
    AudioChunk, CHUNK_SIZE, ChunkQueue, EndpointDetector, EnergyScorer, EnergyVad, Narrator,
    OverflowPolicy, Transcriber, Transcript, Utterance, WakeTrigger,
};
use buddy::{Config, DbPool, Error, Result, SessionController, SessionParts, Watchdog};

/// Set up an in-memory test database
#[must_use]
pub fn setup_test_db() -> DbPool {
    db::init_memory().expect("failed to init test db")
}

/// Push one complete utterance: speech followed by enough silence to end it
pub fn push_utterance(queue: &ChunkQueue) {
    for _ in 0..10 {
        assert!(queue.push(AudioChunk::constant(CHUNK_SIZE, 0.2)));
    }
    for _ in 0..22 {
        assert!(queue.push(AudioChunk::silence(CHUNK_SIZE)));
    }
}

/// Push `count` chunks of silence
pub fn push_silence(queue: &ChunkQueue, count: usize) {
    for _ in 0..count {
        queue.push(AudioChunk::silence(CHUNK_SIZE));
    }
}

/// Transcriber returning queued transcripts in order, then empty ones
#[derive(Default)]
pub struct ScriptedTranscriber {
    script: Mutex<Vec<Transcript>>,
    pub calls: AtomicUsize,
}

impl ScriptedTranscriber {
    pub fn new(script: Vec<Transcript>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transcriber for ScriptedTranscriber {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn transcribe(&self, _utterance: &Utterance) -> Result<Transcript> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut script = self.script.lock().unwrap();
        if script.is_empty() {
            Ok(Transcript::empty())
        } else {
            Ok(script.remove(0))
        }
    }
}

/// Narrator recording what it was asked to say
#[derive(Default)]
pub struct RecordingNarrator {
    spoken: Mutex<Vec<String>>,
    cues: AtomicUsize,
    fail_speak: bool,
    panic_speak: bool,
}

impl RecordingNarrator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail_speak: true,
            ..Self::default()
        })
    }

    pub fn panicking() -> Arc<Self> {
        Arc::new(Self {
            panic_speak: true,
            ..Self::default()
        })
    }

    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }

    pub fn cues(&self) -> usize {
        self.cues.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Narrator for RecordingNarrator {
    async fn speak(&self, text: &str) -> Result<()> {
        assert!(!self.panic_speak, "speaker exploded");
        if self.fail_speak {
            return Err(Error::Tts("speaker unplugged".to_string()));
        }
        self.spoken.lock().unwrap().push(text.to_string());
        Ok(())
    }

    async fn cue(&self) -> Result<()> {
        self.cues.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Chat backend with a fixed outcome
pub struct FakeBackend {
    name: &'static str,
    reply: Option<&'static str>,
    pub calls: AtomicUsize,
    pub last_messages: Mutex<Vec<ChatMessage>>,
}

impl FakeBackend {
    pub fn replying(name: &'static str, reply: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            reply: Some(reply),
            calls: AtomicUsize::new(0),
            last_messages: Mutex::new(Vec::new()),
        })
    }

    pub fn failing(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            reply: None,
            calls: AtomicUsize::new(0),
            last_messages: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatBackend for FakeBackend {
    fn name(&self) -> &str {
        self.name
    }

    async fn available(&self) -> bool {
        true
    }

    async fn chat(&self, messages: &[ChatMessage]) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_messages.lock().unwrap() = messages.to_vec();
        self.reply
            .map(ToString::to_string)
            .ok_or_else(|| Error::Llm(format!("{} is down", self.name)))
    }
}

/// What a fake skill does when invoked
#[derive(Clone)]
pub enum SkillBehavior {
    Reply(Response),
    Decline,
    Fail,
    Panic,
}

/// Skill with a scripted outcome that counts invocations
pub struct FakeSkill {
    name: &'static str,
    description: &'static str,
    keywords: Vec<&'static str>,
    behavior: SkillBehavior,
    pub calls: AtomicUsize,
}

impl FakeSkill {
    pub fn new(
        name: &'static str,
        keywords: &[&'static str],
        behavior: SkillBehavior,
    ) -> Arc<Self> {
        Arc::new(Self {
            name,
            description: "test skill",
            keywords: keywords.to_vec(),
            behavior,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn replying(name: &'static str, keywords: &[&'static str], text: &str) -> Arc<Self> {
        Self::new(name, keywords, SkillBehavior::Reply(Response::simple(text)))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Skill for FakeSkill {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        self.description
    }

    fn keywords(&self) -> &[&str] {
        &self.keywords
    }

    async fn handle(&self, _text: &str, _ctx: &SkillContext) -> Result<Option<Response>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            SkillBehavior::Reply(response) => Ok(Some(response.clone())),
            SkillBehavior::Decline => Ok(None),
            SkillBehavior::Fail => Err(Error::Skill(format!("{} failed", self.name))),
            SkillBehavior::Panic => panic!("{} panicked", self.name),
        }
    }
}

/// Classifier with a canned answer that records prompts
pub struct FakeClassifier {
    answer: Option<&'static str>,
    pub prompts: Mutex<Vec<String>>,
}

impl FakeClassifier {
    pub fn answering(answer: &'static str) -> Arc<Self> {
        Arc::new(Self {
            answer: Some(answer),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            answer: None,
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl IntentClassifier for FakeClassifier {
    async fn classify(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.answer
            .map(ToString::to_string)
            .ok_or_else(|| Error::Llm("classifier offline".to_string()))
    }
}

/// A session over a chunk queue with scripted collaborators
pub struct Harness {
    pub session: SessionController,
    pub queue: ChunkQueue,
    pub narrator: Arc<RecordingNarrator>,
    pub transcriber: Arc<ScriptedTranscriber>,
    pub store: ConversationStore,
}

/// Builder for [`Harness`]
pub struct HarnessBuilder {
    skills: Vec<Arc<dyn Skill>>,
    classifier: Option<Arc<dyn IntentClassifier>>,
    backends: Vec<Arc<dyn ChatBackend>>,
    transcripts: Vec<Transcript>,
    narrator: Arc<RecordingNarrator>,
    session: SessionConfig,
    pool: DbPool,
}

impl HarnessBuilder {
    pub fn new() -> Self {
        Self {
            skills: Vec::new(),
            classifier: None,
            backends: Vec::new(),
            transcripts: Vec::new(),
            narrator: RecordingNarrator::new(),
            session: SessionConfig {
                crash_cooldown: Duration::from_millis(10),
                ..SessionConfig::default()
            },
            pool: setup_test_db(),
        }
    }

    pub fn skill(mut self, skill: Arc<dyn Skill>) -> Self {
        self.skills.push(skill);
        self
    }

    pub fn classifier(mut self, classifier: Arc<dyn IntentClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn backend(mut self, backend: Arc<dyn ChatBackend>) -> Self {
        self.backends.push(backend);
        self
    }

    pub fn heard(mut self, text: &str, confidence: f32) -> Self {
        self.transcripts.push(Transcript::new(text, confidence));
        self
    }

    pub fn narrator(mut self, narrator: Arc<RecordingNarrator>) -> Self {
        self.narrator = narrator;
        self
    }

    pub fn session_config(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }

    pub fn pool(mut self, pool: DbPool) -> Self {
        self.pool = pool;
        self
    }

    pub fn build(self) -> Harness {
        let config = Config::default();
        let queue = ChunkQueue::new(2048, OverflowPolicy::DropOldest);
        let store = ConversationStore::new(self.pool);
        let transcriber = ScriptedTranscriber::new(self.transcripts);

        let mut registry = SkillRegistry::new();
        for skill in self.skills {
            registry.register(skill).expect("unique skill names");
        }
        if let Some(classifier) = self.classifier {
            registry.classifier(classifier);
        }

        let provider = ResponseProvider::new(
            self.backends,
            store.clone(),
            "You are a test assistant.".to_string(),
            10,
            Duration::from_secs(60),
        );

        let parts = SessionParts {
            source: Box::new(queue.clone()),
            wake: WakeTrigger::new(Box::new(EnergyScorer), config.wake.threshold, 15),
            endpoint: EndpointDetector::new(Box::new(EnergyVad), &config.audio, &config.listen),
            transcriber: transcriber.clone(),
            router: registry.build(),
            provider,
            narrator: self.narrator.clone(),
            store: store.clone(),
            watchdog: Watchdog::from_config(&self.session),
            confidence_floor: config.listen.confidence_floor,
        };

        Harness {
            session: SessionController::new(parts, &self.session),
            queue,
            narrator: self.narrator,
            transcriber,
            store,
        }
    }
}

impl Harness {
    /// Wake manually and advance to LISTENING
    pub async fn wake(&mut self) {
        self.session.manual_trigger().fire();
        assert_eq!(self.session.tick().await, buddy::SessionState::Wake);
        assert_eq!(self.session.tick().await, buddy::SessionState::Listening);
    }
}
