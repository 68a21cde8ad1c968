//! Voice pipeline integration tests
//!
//! Tests voice components without requiring audio hardware

use std::io::Cursor;
use std::time::Duration;

use buddy::config::{AudioConfig, ListenConfig};
use buddy::voice::{
    AudioChunk, AudioSource, CHUNK_SIZE, ChunkQueue, EndpointDetector, EnergyScorer, EnergyVad,
    LookupTranscriber, OverflowPolicy, SAMPLE_RATE, Transcriber, Transcript, WakeTrigger,
};

mod common;
use common::{push_silence, push_utterance};

fn recording_queue(capacity: usize, policy: OverflowPolicy) -> ChunkQueue {
    let queue = ChunkQueue::new(capacity, policy);
    queue.set_recording(true);
    queue
}

fn detector() -> EndpointDetector {
    EndpointDetector::new(
        Box::new(EnergyVad),
        &AudioConfig::default(),
        &ListenConfig::default(),
    )
}

#[tokio::test]
async fn test_wake_from_queued_audio() {
    let mut queue = recording_queue(64, OverflowPolicy::DropOldest);
    let mut wake = WakeTrigger::new(Box::new(EnergyScorer), 0.5, 15);

    push_silence(&queue, 20);
    for _ in 0..15 {
        queue.push(AudioChunk::constant(CHUNK_SIZE, 0.2));
    }

    let mut woke_at = None;
    let mut seen = 0;
    while let Some(chunk) = AudioSource::next_chunk(&mut queue, Duration::from_millis(10)).await {
        seen += 1;
        if wake.detect(&chunk) {
            woke_at = Some(seen);
            break;
        }
    }

    // the mean crosses the threshold once most of the window is voiced
    let woke_at = woke_at.expect("wake phrase should be detected");
    assert!(woke_at > 20 && woke_at <= 35, "woke at chunk {woke_at}");
}

#[tokio::test]
async fn test_listen_captures_onset_and_trailing_silence() {
    let mut queue = recording_queue(256, OverflowPolicy::DropOldest);
    push_silence(&queue, 3);
    push_utterance(&queue);

    let utterance = detector().listen(&mut queue, None).await.unwrap();
    assert_eq!(utterance.samples().len(), (3 + 10 + 22) * CHUNK_SIZE);
    assert_eq!(utterance.sample_rate(), SAMPLE_RATE);
    assert!(queue.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_listen_gives_up_on_stalled_source() {
    let mut queue = recording_queue(8, OverflowPolicy::DropOldest);
    let started = tokio::time::Instant::now();

    assert!(detector().listen(&mut queue, None).await.is_none());
    assert!(started.elapsed() >= Duration::from_secs(15));
    assert!(started.elapsed() < Duration::from_secs(16));
}

#[tokio::test(start_paused = true)]
async fn test_followup_onset_window() {
    let mut queue = recording_queue(8, OverflowPolicy::DropOldest);
    let started = tokio::time::Instant::now();

    let utterance = detector()
        .listen(&mut queue, Some(Duration::from_secs(2)))
        .await;
    assert!(utterance.is_none());
    assert!(started.elapsed() < Duration::from_secs(3));
}

#[tokio::test]
async fn test_queue_drop_oldest_under_pressure() {
    let queue = recording_queue(4, OverflowPolicy::DropOldest);
    for i in 0..10_i16 {
        assert!(queue.push(AudioChunk::new(vec![i; 4])));
    }

    assert_eq!(queue.len(), 4);
    assert_eq!(queue.dropped(), 6);
    let first = queue.next_chunk(Duration::from_millis(10)).await.unwrap();
    assert_eq!(first.samples()[0], 6);
}

#[test]
fn test_queue_drop_newest_under_pressure() {
    let queue = recording_queue(2, OverflowPolicy::DropNewest);
    assert!(queue.push(AudioChunk::new(vec![1])));
    assert!(queue.push(AudioChunk::new(vec![2])));
    assert!(!queue.push(AudioChunk::new(vec![3])));

    assert_eq!(queue.try_pop().unwrap().samples(), [1]);
    assert_eq!(queue.try_pop().unwrap().samples(), [2]);
    assert!(queue.try_pop().is_none());
}

#[test]
fn test_recording_off_flushes_queue() {
    let queue = recording_queue(8, OverflowPolicy::DropOldest);
    push_silence(&queue, 5);
    assert_eq!(queue.len(), 5);

    queue.set_recording(false);
    assert!(queue.is_empty());
    assert!(!queue.push(AudioChunk::silence(CHUNK_SIZE)));
}

#[tokio::test]
async fn test_captured_utterance_transcribes_by_content() {
    let mut queue = recording_queue(256, OverflowPolicy::DropOldest);
    push_utterance(&queue);
    let utterance = detector().listen(&mut queue, None).await.unwrap();

    let stt = LookupTranscriber::new();
    stt.insert(&utterance, Transcript::new("what time is it", 0.92));

    let transcript = stt.transcribe(&utterance).await.unwrap();
    assert_eq!(transcript.text, "what time is it");
    assert!(transcript.is_acceptable(0.4));

    push_silence(&queue, 3);
    push_utterance(&queue);
    let other = detector().listen(&mut queue, None).await.unwrap();
    let unknown = stt.transcribe(&other).await.unwrap();
    assert!(unknown.text.is_empty());
    assert!(!unknown.is_acceptable(0.4));
}

#[tokio::test]
async fn test_utterance_wav_is_readable() {
    let mut queue = recording_queue(256, OverflowPolicy::DropOldest);
    push_utterance(&queue);
    let utterance = detector().listen(&mut queue, None).await.unwrap();

    let wav = utterance.to_wav().unwrap();
    let reader = hound::WavReader::new(Cursor::new(wav)).unwrap();
    let spec = reader.spec();
    assert_eq!(spec.channels, 1);
    assert_eq!(spec.sample_rate, SAMPLE_RATE);
    assert_eq!(spec.bits_per_sample, 16);

    let samples: Vec<i16> = reader.into_samples::<i16>().map(|s| s.unwrap()).collect();
    assert_eq!(samples, utterance.samples());
}
