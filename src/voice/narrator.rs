//! Spoken output for the session loop

use std::io::Write;

use async_trait::async_trait;

use super::playback::{AudioPlayback, acknowledgment_tone, load_wav};
use super::tts::{TextToSpeech, split_sentences};
use crate::config::TtsConfig;
use crate::Result;

/// Turns response text into audio the user hears
#[async_trait]
pub trait Narrator: Send + Sync {
    /// Speak text, returning once playback has finished
    ///
    /// # Errors
    ///
    /// Returns error if synthesis or playback fails
    async fn speak(&self, text: &str) -> Result<()>;

    /// Play the wake acknowledgment
    ///
    /// # Errors
    ///
    /// Returns error if playback fails
    async fn cue(&self) -> Result<()>;
}

/// TTS-backed narrator playing through the default output device
pub struct SpokenNarrator {
    tts: TextToSpeech,
    playback: AudioPlayback,
    cue: Vec<f32>,
}

impl SpokenNarrator {
    /// Open the output device and prepare the cue sound
    ///
    /// Falls back to the built-in chime if the configured cue cannot be read.
    ///
    /// # Errors
    ///
    /// Returns error if the output device cannot be opened
    pub fn new(tts: TextToSpeech, config: &TtsConfig) -> Result<Self> {
        let playback = AudioPlayback::new()?;
        let cue = config
            .cue_path
            .as_deref()
            .and_then(|path| match load_wav(path) {
                Ok(samples) => Some(samples),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to load cue, using chime");
                    None
                }
            })
            .unwrap_or_else(acknowledgment_tone);

        Ok(Self { tts, playback, cue })
    }
}

#[async_trait]
impl Narrator for SpokenNarrator {
    async fn speak(&self, text: &str) -> Result<()> {
        // Synthesize the next sentence while the current one plays
        let sentences = split_sentences(text);
        let mut pending = match sentences.first() {
            Some(first) => Some(self.tts.synthesize(first).await?),
            None => return Ok(()),
        };

        for next in sentences.iter().skip(1).map(Some).chain(std::iter::once(None)) {
            let Some(audio) = pending.take() else {
                break;
            };
            let playing = self.playback.play_mp3(&audio);
            match next {
                Some(sentence) => {
                    let (played, synthesized) =
                        tokio::join!(playing, self.tts.synthesize(sentence));
                    played?;
                    pending = Some(synthesized?);
                }
                None => playing.await?,
            }
        }

        Ok(())
    }

    async fn cue(&self) -> Result<()> {
        self.playback.play(self.cue.clone()).await
    }
}

/// Prints responses to stdout (text mode, no audio device)
#[derive(Debug, Default)]
pub struct ConsoleNarrator;

#[async_trait]
impl Narrator for ConsoleNarrator {
    async fn speak(&self, text: &str) -> Result<()> {
        let mut out = std::io::stdout().lock();
        writeln!(out, "Buddy: {text}")?;
        out.flush()?;
        Ok(())
    }

    async fn cue(&self) -> Result<()> {
        tracing::debug!("listening");
        Ok(())
    }
}
