//! Wake word detection
//!
//! Scores each idle chunk and fires when the smoothed score crosses the
//! threshold. A manual trigger bypasses the acoustic path.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::capture::AudioChunk;

/// Energy level treated as voiced audio
pub const ENERGY_THRESHOLD: f32 = 0.03;

/// Per-chunk wake phrase likelihood
///
/// Implementations wrap whatever acoustic model is available.
pub trait WakeScorer: Send {
    /// Likelihood in `[0.0, 1.0]` that the wake phrase ends in this chunk
    fn score(&mut self, chunk: &AudioChunk) -> f32;

    /// Drop internal state
    fn reset(&mut self) {}
}

/// Fires on sustained voiced audio
///
/// Stand-in for a keyword model: any utterance long enough to fill the
/// trigger window wakes the assistant.
#[derive(Debug, Default)]
pub struct EnergyScorer;

impl WakeScorer for EnergyScorer {
    fn score(&mut self, chunk: &AudioChunk) -> f32 {
        (chunk.rms() / (2.0 * ENERGY_THRESHOLD)).clamp(0.0, 1.0)
    }
}

/// Cloneable handle that requests a wake without audio
#[derive(Debug, Clone, Default)]
pub struct ManualTrigger {
    pending: Arc<AtomicBool>,
}

impl ManualTrigger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a wake on the next idle check
    pub fn fire(&self) {
        self.pending.store(true, Ordering::SeqCst);
    }

    /// Consume a pending request
    pub fn take(&self) -> bool {
        self.pending.swap(false, Ordering::SeqCst)
    }
}

/// Detects the wake phrase in idle audio
pub struct WakeTrigger {
    scorer: Box<dyn WakeScorer>,
    threshold: f32,
    window: VecDeque<f32>,
    window_len: usize,
    manual: ManualTrigger,
}

impl WakeTrigger {
    /// Create a trigger averaging scores over `window_len` chunks
    #[must_use]
    pub fn new(scorer: Box<dyn WakeScorer>, threshold: f32, window_len: usize) -> Self {
        let window_len = window_len.max(1);
        tracing::debug!(threshold, window_len, "wake trigger initialized");

        Self {
            scorer,
            threshold,
            window: VecDeque::with_capacity(window_len),
            window_len,
            manual: ManualTrigger::new(),
        }
    }

    /// Handle for programmatic wakes
    #[must_use]
    pub fn manual_trigger(&self) -> ManualTrigger {
        self.manual.clone()
    }

    /// Consume a pending manual wake, resetting scores if there was one
    pub fn take_manual(&mut self) -> bool {
        let fired = self.manual.take();
        if fired {
            self.reset();
        }
        fired
    }

    /// Score a chunk; true means the wake phrase was heard
    ///
    /// Score buffers reset after a positive detection so the same audio
    /// cannot immediately re-trigger.
    pub fn detect(&mut self, chunk: &AudioChunk) -> bool {
        if self.take_manual() {
            tracing::info!("manual wake");
            return true;
        }

        let score = self.scorer.score(chunk);
        if self.window.len() == self.window_len {
            self.window.pop_front();
        }
        self.window.push_back(score);

        if self.window.len() < self.window_len {
            return false;
        }

        #[allow(clippy::cast_precision_loss)]
        let mean = self.window.iter().sum::<f32>() / self.window.len() as f32;
        tracing::trace!(score, mean, "wake score");

        if mean >= self.threshold {
            tracing::info!(score = mean, "wake word detected");
            self.reset();
            return true;
        }

        false
    }

    /// Clear score buffers
    pub fn reset(&mut self) {
        self.window.clear();
        self.scorer.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trigger(window: usize) -> WakeTrigger {
        WakeTrigger::new(Box::new(EnergyScorer), 0.5, window)
    }

    #[test]
    fn test_silence_never_wakes() {
        let mut wake = trigger(3);
        for _ in 0..50 {
            assert!(!wake.detect(&AudioChunk::silence(512)));
        }
    }

    #[test]
    fn test_sustained_voice_wakes_then_resets() {
        let mut wake = trigger(3);
        let loud = AudioChunk::constant(512, 0.2);

        assert!(!wake.detect(&loud));
        assert!(!wake.detect(&loud));
        assert!(wake.detect(&loud));

        // Buffer was cleared: a single further chunk is not enough
        assert!(!wake.detect(&loud));
    }

    #[test]
    fn test_manual_trigger_converges() {
        let mut wake = trigger(3);
        let handle = wake.manual_trigger();

        handle.fire();
        assert!(wake.detect(&AudioChunk::silence(512)));
        assert!(!wake.detect(&AudioChunk::silence(512)));
    }
}
