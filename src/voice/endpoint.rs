//! End-of-utterance detection for the listening phase
//!
//! Speech is confirmed after a run of consecutive speech chunks; the
//! utterance ends after a run of silence following confirmed speech, or at
//! the hard max-duration stop. Every chunk seen while listening is kept so
//! the transcriber gets the speech onset.

use std::time::Duration;

use tokio::time::Instant;

use super::capture::{AudioChunk, AudioSource, Utterance};
use super::wake_word::ENERGY_THRESHOLD;
use crate::config::{AudioConfig, ListenConfig};

/// Poll interval while waiting for chunks
const POLL: Duration = Duration::from_millis(100);

/// Per-chunk voice activity
pub trait SpeechClassifier: Send {
    /// Probability in `[0.0, 1.0]` that the chunk contains speech
    fn speech_probability(&mut self, chunk: &AudioChunk) -> f32;

    fn reset(&mut self) {}
}

/// RMS-energy voice activity detector
#[derive(Debug, Default)]
pub struct EnergyVad;

impl SpeechClassifier for EnergyVad {
    fn speech_probability(&mut self, chunk: &AudioChunk) -> f32 {
        (chunk.rms() / (2.0 * ENERGY_THRESHOLD)).clamp(0.0, 1.0)
    }
}

/// Result of feeding one chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointEvent {
    /// Keep listening
    Continue,
    /// Confirmed speech followed by silence, or max duration with speech
    Complete,
    /// Window closed without confirmed speech
    Empty,
}

/// Chunk-count thresholds derived from config
#[derive(Debug, Clone, Copy)]
struct Limits {
    min_speech: u32,
    silence: u32,
    max_chunks: u32,
}

/// Decides when the user has finished speaking
pub struct EndpointDetector {
    classifier: Box<dyn SpeechClassifier>,
    threshold: f32,
    limits: Limits,
    chunk_duration: Duration,
    max_duration: Duration,
    sample_rate: u32,
    buffer: Vec<AudioChunk>,
    speech_run: u32,
    silence_run: u32,
    confirmed: bool,
    onset_limit: Option<u32>,
}

impl EndpointDetector {
    #[must_use]
    pub fn new(
        classifier: Box<dyn SpeechClassifier>,
        audio: &AudioConfig,
        listen: &ListenConfig,
    ) -> Self {
        let chunk_duration = audio.chunk_duration();
        let max_chunks = chunks_in(listen.max_duration, chunk_duration);

        Self {
            classifier,
            threshold: listen.vad_threshold,
            limits: Limits {
                min_speech: audio.chunks_for_ms(listen.min_speech_ms),
                silence: audio.chunks_for_ms(listen.silence_ms),
                max_chunks,
            },
            chunk_duration,
            max_duration: listen.max_duration,
            sample_rate: audio.sample_rate,
            buffer: Vec::new(),
            speech_run: 0,
            silence_run: 0,
            confirmed: false,
            onset_limit: None,
        }
    }

    /// Reset for a new listening window
    ///
    /// `onset_timeout` bounds how long to wait for speech to start (used for
    /// follow-up turns); it never extends the max duration.
    pub fn begin(&mut self, onset_timeout: Option<Duration>) {
        self.buffer.clear();
        self.speech_run = 0;
        self.silence_run = 0;
        self.confirmed = false;
        self.onset_limit = onset_timeout.map(|t| chunks_in(t, self.chunk_duration));
        self.classifier.reset();
    }

    /// Classify one chunk and retain it
    pub fn feed(&mut self, chunk: AudioChunk) -> EndpointEvent {
        let probability = self.classifier.speech_probability(&chunk);
        let is_speech = probability >= self.threshold;
        self.buffer.push(chunk);

        if is_speech {
            self.speech_run += 1;
            self.silence_run = 0;
            if !self.confirmed && self.speech_run >= self.limits.min_speech {
                self.confirmed = true;
                tracing::debug!(chunks = self.buffer.len(), "speech confirmed");
            }
        } else if self.confirmed {
            self.silence_run += 1;
        } else {
            // Sporadic noise: a gap before confirmation starts over
            self.speech_run = 0;
        }

        tracing::trace!(
            probability,
            is_speech,
            speech_run = self.speech_run,
            silence_run = self.silence_run,
            "endpoint chunk"
        );

        let seen = self.chunks_seen();
        if self.confirmed {
            if self.silence_run >= self.limits.silence {
                tracing::debug!(chunks = seen, "end of speech");
                return EndpointEvent::Complete;
            }
            if seen >= self.limits.max_chunks {
                tracing::debug!(chunks = seen, "max duration reached with speech");
                return EndpointEvent::Complete;
            }
            return EndpointEvent::Continue;
        }

        if seen >= self.limits.max_chunks {
            tracing::debug!(chunks = seen, "max duration reached without speech");
            return EndpointEvent::Empty;
        }
        if self.onset_limit.is_some_and(|limit| seen >= limit) {
            tracing::debug!(chunks = seen, "no speech onset within follow-up window");
            return EndpointEvent::Empty;
        }

        EndpointEvent::Continue
    }

    /// Take the buffered audio; `None` if speech was never confirmed
    pub fn finish(&mut self) -> Option<Utterance> {
        let chunks = std::mem::take(&mut self.buffer);
        let confirmed = std::mem::replace(&mut self.confirmed, false);
        self.speech_run = 0;
        self.silence_run = 0;
        if !confirmed {
            return None;
        }
        Some(Utterance::from_chunks(chunks, self.sample_rate))
    }

    /// Whether speech has been confirmed in the current window
    #[must_use]
    pub const fn is_confirmed(&self) -> bool {
        self.confirmed
    }

    /// Run a full listening window against a source
    ///
    /// Always returns by the max duration, measured both in audio time and
    /// wall-clock time so a stalled device cannot hang the session.
    pub async fn listen(
        &mut self,
        source: &mut dyn AudioSource,
        onset_timeout: Option<Duration>,
    ) -> Option<Utterance> {
        self.begin(onset_timeout);

        let started = Instant::now();
        let deadline = started + self.max_duration;
        let onset_deadline = onset_timeout.map(|t| started + t);

        loop {
            let now = Instant::now();
            if now >= deadline {
                tracing::debug!("listening window timed out");
                break;
            }
            if !self.confirmed && onset_deadline.is_some_and(|d| now >= d) {
                tracing::debug!("follow-up window timed out");
                break;
            }

            let wait = (deadline - now).min(POLL);
            let Some(chunk) = source.next_chunk(wait).await else {
                continue;
            };

            match self.feed(chunk) {
                EndpointEvent::Continue => {}
                EndpointEvent::Complete | EndpointEvent::Empty => break,
            }
        }

        self.finish()
    }

    fn chunks_seen(&self) -> u32 {
        u32::try_from(self.buffer.len()).unwrap_or(u32::MAX)
    }
}

/// Whole chunks needed to cover `span` (rounded up, at least one)
fn chunks_in(span: Duration, chunk: Duration) -> u32 {
    let chunk = chunk.as_nanos().max(1);
    u32::try_from(span.as_nanos().div_ceil(chunk))
        .unwrap_or(u32::MAX)
        .max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> EndpointDetector {
        EndpointDetector::new(
            Box::new(EnergyVad),
            &AudioConfig::default(),
            &ListenConfig::default(),
        )
    }

    fn speech() -> AudioChunk {
        AudioChunk::constant(512, 0.2)
    }

    fn silence() -> AudioChunk {
        AudioChunk::silence(512)
    }

    #[test]
    fn test_speech_then_silence_completes() {
        let mut ep = detector();
        ep.begin(None);

        // 3 leading silent chunks are retained as onset padding
        for _ in 0..3 {
            assert_eq!(ep.feed(silence()), EndpointEvent::Continue);
        }
        for _ in 0..10 {
            assert_eq!(ep.feed(speech()), EndpointEvent::Continue);
        }
        assert!(ep.is_confirmed());

        let mut event = EndpointEvent::Continue;
        let mut silent = 0;
        while event == EndpointEvent::Continue {
            event = ep.feed(silence());
            silent += 1;
        }
        assert_eq!(event, EndpointEvent::Complete);
        // 700ms at 32ms per chunk, rounded up
        assert_eq!(silent, 22);

        let utterance = ep.finish().unwrap();
        assert_eq!(utterance.samples().len(), (3 + 10 + 22) * 512);
    }

    #[test]
    fn test_min_speech_is_not_shortened() {
        // 7 chunks is 224ms, below the 250ms minimum
        let mut ep = detector();
        ep.begin(None);
        for _ in 0..7 {
            ep.feed(speech());
        }
        assert!(!ep.is_confirmed());

        let mut ep = detector();
        ep.begin(None);
        for _ in 0..8 {
            ep.feed(speech());
        }
        assert!(ep.is_confirmed());
    }

    #[test]
    fn test_sporadic_noise_is_ignored() {
        let mut ep = detector();
        ep.begin(None);

        // Bursts shorter than the minimum speech run never confirm
        for _ in 0..40 {
            for _ in 0..3 {
                ep.feed(speech());
            }
            ep.feed(silence());
        }
        assert!(!ep.is_confirmed());
    }

    #[test]
    fn test_max_duration_without_speech_is_empty() {
        let mut ep = detector();
        ep.begin(None);

        let mut fed = 0;
        let event = loop {
            fed += 1;
            let event = ep.feed(silence());
            if event != EndpointEvent::Continue {
                break event;
            }
        };

        assert_eq!(event, EndpointEvent::Empty);
        // 15s / 32ms
        assert_eq!(fed, 469);
        assert!(ep.finish().is_none());
    }

    #[test]
    fn test_max_duration_with_speech_returns_audio() {
        let mut ep = detector();
        ep.begin(None);

        let mut event = EndpointEvent::Continue;
        while event == EndpointEvent::Continue {
            event = ep.feed(speech());
        }
        assert_eq!(event, EndpointEvent::Complete);
        assert!(ep.finish().is_some());
    }

    #[test]
    fn test_onset_limit_for_followups() {
        let mut ep = detector();
        ep.begin(Some(Duration::from_millis(320)));

        for _ in 0..9 {
            assert_eq!(ep.feed(silence()), EndpointEvent::Continue);
        }
        assert_eq!(ep.feed(silence()), EndpointEvent::Empty);
    }
}
