use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use buddy::voice::{AudioPlayback, AudioSource, ChunkQueue, MicrophoneSource, PLAYBACK_SAMPLE_RATE};
use buddy::{Config, Daemon};

/// Buddy - wake-word voice assistant
#[derive(Parser)]
#[command(name = "buddy", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Type instead of talking (replies are printed)
    #[arg(long, env = "BUDDY_TEXT_MODE")]
    text: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
    /// Speak text through the configured TTS
    Say {
        #[arg(default_value = "Hello! This is a test of the text to speech system.")]
        text: String,
    },
    /// Route one message and print the reply
    Ask {
        text: String,
    },
    /// Show recent conversation history
    History {
        /// Number of messages
        #[arg(short = 'n', long, default_value = "20")]
        count: usize,
    },
    /// Delete the conversation history
    ClearHistory,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info,buddy=info",
        1 => "info,buddy=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    if let Some(Command::TestMic { duration }) = cli.command {
        return test_mic(duration).await;
    }
    if let Some(Command::TestSpeaker) = cli.command {
        return test_speaker().await;
    }

    let config = Config::load()?;
    tracing::debug!(?config, "loaded configuration");
    let daemon = Daemon::new(config)?;

    match cli.command {
        Some(Command::Say { text }) => {
            daemon.narrator()?.speak(&text).await?;
        }
        Some(Command::Ask { text }) => {
            println!("{}", daemon.ask(&text).await?);
        }
        Some(Command::History { count }) => {
            for message in daemon.store().get_recent(count)? {
                println!(
                    "[{}] {}: {}",
                    message.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    message.role.as_str(),
                    message.content
                );
            }
        }
        Some(Command::ClearHistory) => {
            let removed = daemon.store().clear()?;
            println!("Removed {removed} messages");
        }
        Some(Command::TestMic { .. } | Command::TestSpeaker) => {}
        None if cli.text => daemon.run_text().await?,
        None => {
            tracing::info!(
                "buddy ready - say \"{}\" (ctrl-c to quit)",
                daemon.config().wake.phrase
            );
            daemon.run_voice().await?;
        }
    }

    Ok(())
}

/// Print a level meter for each second of microphone input
#[allow(clippy::future_not_send)]
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let config = Config::load()?;
    let queue = ChunkQueue::new(config.audio.queue_capacity, config.audio.overflow);
    let mut source = MicrophoneSource::new(config.audio.sample_rate, config.audio.chunk_size, queue)?;
    source.start()?;

    println!("Sample rate: {} Hz", config.audio.sample_rate);
    println!("---");

    for i in 0..duration {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
        let mut peak = 0.0_f32;
        let mut chunks = 0_u32;

        while tokio::time::Instant::now() < deadline {
            if let Some(chunk) = source.next_chunk(Duration::from_millis(100)).await {
                peak = peak.max(chunk.rms());
                chunks += 1;
            }
        }

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (peak * 100.0).min(50.0) as usize;
        let meter: String = "#".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!("[{:2}s] chunks: {chunks:3} | RMS peak: {peak:.4} | [{meter}]", i + 1);
    }

    source.stop();

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");

    Ok(())
}

/// Play a 440 Hz tone for two seconds
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let playback = AudioPlayback::new()?;

    let frequency = 440.0_f32;
    #[allow(clippy::cast_precision_loss)]
    let rate = PLAYBACK_SAMPLE_RATE as f32;
    let num_samples = PLAYBACK_SAMPLE_RATE as usize * 2;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..num_samples)
        .map(|i| (2.0 * std::f32::consts::PI * frequency * i as f32 / rate).sin() * 0.3)
        .collect();

    println!("Playing {} samples at {PLAYBACK_SAMPLE_RATE} Hz...", samples.len());
    playback.play(samples).await?;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");

    Ok(())
}
