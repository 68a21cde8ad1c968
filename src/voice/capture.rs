//! Audio capture from microphone into a bounded chunk queue

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream, StreamConfig};
use sha2::{Digest, Sha256};
use tokio::sync::Notify;

use crate::{Error, Result};

/// Sample rate for audio capture (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// Samples per chunk (~32ms at 16kHz)
pub const CHUNK_SIZE: usize = 512;

/// How long a blocked producer waits before rechecking the recording flag
const BLOCK_RECHECK: Duration = Duration::from_millis(50);

/// Fixed-size block of mono 16-bit PCM samples
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    samples: Vec<i16>,
}

impl AudioChunk {
    #[must_use]
    pub const fn new(samples: Vec<i16>) -> Self {
        Self { samples }
    }

    /// Chunk of digital silence
    #[must_use]
    pub fn silence(len: usize) -> Self {
        Self::new(vec![0; len])
    }

    /// Chunk filled with a constant amplitude in `[-1.0, 1.0]`
    #[must_use]
    pub fn constant(len: usize, amplitude: f32) -> Self {
        Self::new(vec![f32_to_i16(amplitude); len])
    }

    #[must_use]
    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// RMS energy normalized to `[0.0, 1.0]`
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn rms(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }

        let sum_squares: f32 = self
            .samples
            .iter()
            .map(|&s| {
                let v = f32::from(s) / 32768.0;
                v * v
            })
            .sum();
        (sum_squares / self.samples.len() as f32).sqrt()
    }
}

/// A complete captured utterance, immutable once assembled
#[derive(Debug, Clone)]
pub struct Utterance {
    samples: Vec<i16>,
    sample_rate: u32,
}

impl Utterance {
    /// Concatenate chunks into an utterance
    #[must_use]
    pub fn from_chunks(chunks: Vec<AudioChunk>, sample_rate: u32) -> Self {
        let samples = chunks.into_iter().flat_map(|c| c.samples).collect();
        Self {
            samples,
            sample_rate,
        }
    }

    #[must_use]
    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Audio length
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.samples.len() as f64 / f64::from(self.sample_rate.max(1)))
    }

    /// Hex SHA-256 over the little-endian PCM bytes
    #[must_use]
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        for s in &self.samples {
            hasher.update(s.to_le_bytes());
        }
        hex::encode(hasher.finalize())
    }

    /// Encode as a 16-bit mono WAV file for STT APIs
    ///
    /// # Errors
    ///
    /// Returns error if WAV encoding fails
    pub fn to_wav(&self) -> Result<Vec<u8>> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec)
                .map_err(|e| Error::Audio(e.to_string()))?;

            for &sample in &self.samples {
                writer
                    .write_sample(sample)
                    .map_err(|e| Error::Audio(e.to_string()))?;
            }

            writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
        }

        Ok(cursor.into_inner())
    }
}

/// Behavior when the chunk queue is full
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Evict the oldest queued chunk (stale audio has no value)
    DropOldest,
    /// Discard the incoming chunk
    DropNewest,
    /// Block the producer until the consumer makes room
    Block,
}

impl OverflowPolicy {
    /// Parse a policy name (`drop_oldest`, `drop_newest`, `block`)
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "drop_oldest" => Some(Self::DropOldest),
            "drop_newest" => Some(Self::DropNewest),
            "block" => Some(Self::Block),
            _ => None,
        }
    }
}

struct QueueInner {
    chunks: Mutex<VecDeque<AudioChunk>>,
    not_full: Condvar,
    available: Notify,
    capacity: usize,
    policy: OverflowPolicy,
    recording: AtomicBool,
    dropped: AtomicU64,
}

/// Bounded single-consumer queue between the capture callback and the session
///
/// `push` is synchronous so it can run on the audio driver's thread.
#[derive(Clone)]
pub struct ChunkQueue {
    inner: Arc<QueueInner>,
}

impl ChunkQueue {
    /// Create an empty queue; recording starts disabled
    #[must_use]
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                chunks: Mutex::new(VecDeque::with_capacity(capacity)),
                not_full: Condvar::new(),
                available: Notify::new(),
                capacity: capacity.max(1),
                policy,
                recording: AtomicBool::new(false),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Offer a chunk from the producer
    ///
    /// Returns false if the chunk was discarded (recording off, or full under
    /// `DropNewest`).
    pub fn push(&self, chunk: AudioChunk) -> bool {
        if !self.is_recording() {
            return false;
        }

        let Ok(mut chunks) = self.inner.chunks.lock() else {
            return false;
        };

        while chunks.len() >= self.inner.capacity {
            match self.inner.policy {
                OverflowPolicy::DropOldest => {
                    chunks.pop_front();
                    self.inner.dropped.fetch_add(1, Ordering::Relaxed);
                }
                OverflowPolicy::DropNewest => {
                    self.inner.dropped.fetch_add(1, Ordering::Relaxed);
                    return false;
                }
                OverflowPolicy::Block => {
                    chunks = match self.inner.not_full.wait_timeout(chunks, BLOCK_RECHECK) {
                        Ok((guard, _)) => guard,
                        Err(_) => return false,
                    };
                    if !self.is_recording() {
                        return false;
                    }
                }
            }
        }

        // A stop that raced the check above has already flushed the queue
        if !self.is_recording() {
            return false;
        }

        chunks.push_back(chunk);
        drop(chunks);
        self.inner.available.notify_one();
        true
    }

    /// Pop the oldest chunk without waiting
    #[must_use]
    pub fn try_pop(&self) -> Option<AudioChunk> {
        let chunk = self.inner.chunks.lock().ok()?.pop_front();
        if chunk.is_some() {
            self.inner.not_full.notify_one();
        }
        chunk
    }

    /// Wait up to `timeout` for the next chunk
    pub async fn next_chunk(&self, timeout: Duration) -> Option<AudioChunk> {
        tokio::time::timeout(timeout, async {
            loop {
                let notified = self.inner.available.notified();
                if let Some(chunk) = self.try_pop() {
                    return chunk;
                }
                notified.await;
            }
        })
        .await
        .ok()
    }

    /// Enable or disable recording; disabling flushes queued audio
    ///
    /// The flag flips under the queue lock, so no push can land between the
    /// flush and the stop.
    pub fn set_recording(&self, recording: bool) {
        let guard = self.inner.chunks.lock();
        self.inner.recording.store(recording, Ordering::SeqCst);
        if !recording {
            if let Ok(mut chunks) = guard {
                chunks.clear();
            }
            self.inner.not_full.notify_all();
        }
    }

    #[must_use]
    pub fn is_recording(&self) -> bool {
        self.inner.recording.load(Ordering::SeqCst)
    }

    /// Discard all queued chunks
    pub fn clear(&self) {
        if let Ok(mut chunks) = self.inner.chunks.lock() {
            chunks.clear();
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.chunks.lock().map(|c| c.len()).unwrap_or(0)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Chunks discarded because the queue was full
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }
}

/// Continuous source of audio chunks
///
/// Not `Send`: device streams must stay on the thread that created them.
#[async_trait(?Send)]
pub trait AudioSource {
    /// Open the device and begin recording (idempotent)
    ///
    /// # Errors
    ///
    /// Returns error if the device cannot be opened
    fn start(&mut self) -> Result<()>;

    /// Release the device (safe when not started)
    fn stop(&mut self);

    /// Pause or resume queuing without releasing the device
    fn set_recording(&mut self, recording: bool);

    /// Next chunk, or `None` if nothing arrived within `timeout`
    async fn next_chunk(&mut self, timeout: Duration) -> Option<AudioChunk>;
}

/// A bare queue is a source fed by someone else (tests, replay)
#[async_trait(?Send)]
impl AudioSource for ChunkQueue {
    fn start(&mut self) -> Result<()> {
        ChunkQueue::set_recording(self, true);
        Ok(())
    }

    fn stop(&mut self) {
        ChunkQueue::set_recording(self, false);
    }

    fn set_recording(&mut self, recording: bool) {
        ChunkQueue::set_recording(self, recording);
    }

    async fn next_chunk(&mut self, timeout: Duration) -> Option<AudioChunk> {
        ChunkQueue::next_chunk(self, timeout).await
    }
}

/// Captures audio from the default input device
pub struct MicrophoneSource {
    config: StreamConfig,
    chunk_size: usize,
    queue: ChunkQueue,
    stream: Option<Stream>,
}

impl MicrophoneSource {
    /// Probe the default input device
    ///
    /// # Errors
    ///
    /// Returns error if no input device supports the sample rate
    pub fn new(sample_rate: u32, chunk_size: usize, queue: ChunkQueue) -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Audio("no input device available".to_string()))?;

        let supports_rate = |c: &cpal::SupportedStreamConfigRange| {
            c.min_sample_rate() <= SampleRate(sample_rate)
                && c.max_sample_rate() >= SampleRate(sample_rate)
        };

        let mut ranges: Vec<_> = device
            .supported_input_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .filter(supports_rate)
            .collect();
        // Prefer mono; otherwise the first channel is used
        ranges.sort_by_key(cpal::SupportedStreamConfigRange::channels);

        let supported = ranges
            .into_iter()
            .next()
            .ok_or_else(|| Error::Audio("no suitable audio config found".to_string()))?;

        let config = supported.with_sample_rate(SampleRate(sample_rate)).config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate,
            channels = config.channels,
            chunk_size,
            "audio capture initialized"
        );

        Ok(Self {
            config,
            chunk_size,
            queue,
            stream: None,
        })
    }

    /// The queue this source feeds
    #[must_use]
    pub const fn queue(&self) -> &ChunkQueue {
        &self.queue
    }

    /// Check if the device stream is open
    #[must_use]
    pub const fn is_capturing(&self) -> bool {
        self.stream.is_some()
    }
}

#[async_trait(?Send)]
impl AudioSource for MicrophoneSource {
    fn start(&mut self) -> Result<()> {
        if self.stream.is_some() {
            self.queue.set_recording(true);
            return Ok(());
        }

        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Audio("no input device".to_string()))?;

        let queue = self.queue.clone();
        let channels = usize::from(self.config.channels.max(1));
        let chunk_size = self.chunk_size;
        let mut staging: Vec<i16> = Vec::with_capacity(chunk_size);

        let stream = device
            .build_input_stream(
                &self.config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if !queue.is_recording() {
                        staging.clear();
                        return;
                    }
                    for frame in data.chunks(channels) {
                        staging.push(f32_to_i16(frame[0]));
                        if staging.len() == chunk_size {
                            let block = std::mem::replace(
                                &mut staging,
                                Vec::with_capacity(chunk_size),
                            );
                            queue.push(AudioChunk::new(block));
                        }
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio capture error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;
        self.stream = Some(stream);
        self.queue.set_recording(true);

        tracing::debug!("audio capture started");
        Ok(())
    }

    fn stop(&mut self) {
        self.queue.set_recording(false);
        if let Some(stream) = self.stream.take() {
            drop(stream);
            tracing::debug!("audio capture stopped");
        }
    }

    fn set_recording(&mut self, recording: bool) {
        self.queue.set_recording(recording);
    }

    async fn next_chunk(&mut self, timeout: Duration) -> Option<AudioChunk> {
        self.queue.next_chunk(timeout).await
    }
}

impl Drop for MicrophoneSource {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Convert an f32 sample in `[-1.0, 1.0]` to i16
#[allow(clippy::cast_possible_truncation)]
fn f32_to_i16(sample: f32) -> i16 {
    (sample * 32767.0).clamp(-32768.0, 32767.0) as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recording_queue(capacity: usize, policy: OverflowPolicy) -> ChunkQueue {
        let queue = ChunkQueue::new(capacity, policy);
        queue.set_recording(true);
        queue
    }

    fn tagged(tag: i16) -> AudioChunk {
        AudioChunk::new(vec![tag; 4])
    }

    #[test]
    fn test_rms() {
        assert!(AudioChunk::silence(100).rms() < 0.001);
        assert!(AudioChunk::constant(100, 0.5).rms() > 0.45);
    }

    #[test]
    fn test_drop_oldest_keeps_latest() {
        let queue = recording_queue(2, OverflowPolicy::DropOldest);
        assert!(queue.push(tagged(1)));
        assert!(queue.push(tagged(2)));
        assert!(queue.push(tagged(3)));

        assert_eq!(queue.dropped(), 1);
        assert_eq!(queue.try_pop(), Some(tagged(2)));
        assert_eq!(queue.try_pop(), Some(tagged(3)));
        assert!(queue.try_pop().is_none());
    }

    #[test]
    fn test_drop_newest_rejects_incoming() {
        let queue = recording_queue(1, OverflowPolicy::DropNewest);
        assert!(queue.push(tagged(1)));
        assert!(!queue.push(tagged(2)));
        assert_eq!(queue.try_pop(), Some(tagged(1)));
    }

    #[test]
    fn test_not_recording_discards_and_flushes() {
        let queue = recording_queue(4, OverflowPolicy::DropOldest);
        queue.push(tagged(1));
        queue.set_recording(false);

        assert!(queue.is_empty());
        assert!(!queue.push(tagged(2)));

        queue.set_recording(true);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_next_chunk_times_out() {
        let queue = recording_queue(4, OverflowPolicy::DropOldest);
        let got = queue.next_chunk(Duration::from_millis(20)).await;
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn test_next_chunk_wakes_on_push() {
        let queue = recording_queue(4, OverflowPolicy::Block);
        let producer = queue.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            producer.push(tagged(7));
        });

        let got = queue.next_chunk(Duration::from_secs(2)).await;
        handle.join().unwrap();
        assert_eq!(got, Some(tagged(7)));
    }

    #[test]
    fn test_block_releases_when_recording_stops() {
        let queue = recording_queue(1, OverflowPolicy::Block);
        queue.push(tagged(1));

        let producer = queue.clone();
        let handle = std::thread::spawn(move || producer.push(tagged(2)));
        std::thread::sleep(Duration::from_millis(20));
        queue.set_recording(false);

        assert!(!handle.join().unwrap());
    }

    #[test]
    fn test_stop_never_leaves_audio_behind() {
        let queue = recording_queue(64, OverflowPolicy::DropOldest);
        let running = Arc::new(AtomicBool::new(true));

        let producer = queue.clone();
        let flag = running.clone();
        let handle = std::thread::spawn(move || {
            let mut tag = 0_i16;
            while flag.load(Ordering::Relaxed) {
                producer.push(tagged(tag));
                tag = tag.wrapping_add(1);
            }
        });

        for _ in 0..500 {
            queue.set_recording(false);
            for _ in 0..20 {
                assert_eq!(queue.len(), 0);
                std::thread::yield_now();
            }
            queue.set_recording(true);
            std::thread::yield_now();
        }

        running.store(false, Ordering::Relaxed);
        handle.join().unwrap();
    }

    #[test]
    fn test_utterance_hash_and_wav() {
        let a = Utterance::from_chunks(vec![tagged(1), tagged(2)], SAMPLE_RATE);
        let b = Utterance::from_chunks(vec![tagged(1), tagged(2)], SAMPLE_RATE);
        let c = Utterance::from_chunks(vec![tagged(2), tagged(1)], SAMPLE_RATE);

        assert_eq!(a.content_hash(), b.content_hash());
        assert_ne!(a.content_hash(), c.content_hash());
        assert_eq!(a.samples().len(), 8);

        let wav = a.to_wav().unwrap();
        assert_eq!(&wav[0..4], b"RIFF");
    }
}
