use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use beacon_voice::config::Overrides;
use beacon_voice::session::Mode;
use beacon_voice::voice::vad::rms;
use beacon_voice::voice::{
    AudioOutput, CodecBackend, CpalMicrophone, CpalOutput, EnergyClassifier, HttpClipLoader,
    Microphone, PlaybackEvent, PlaybackScheduler, SpeechClassifier,
};
use beacon_voice::{Config, Daemon};

/// Beacon Voice - voice interaction orchestrator for AI assistants
#[derive(Parser)]
#[command(name = "beacon-voice", version, about)]
struct Cli {
    /// Transport WebSocket URL
    #[arg(long, env = "BEACON_VOICE_TRANSPORT_URL")]
    transport_url: Option<String>,

    /// Control API port
    #[arg(long, env = "BEACON_VOICE_PORT")]
    port: Option<u16>,

    /// Interaction mode (command or duplex)
    #[arg(long, env = "BEACON_VOICE_MODE")]
    mode: Option<Mode>,

    /// Activate the voice session immediately
    #[arg(long)]
    activate: bool,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
#[allow(clippy::enum_variant_names)]
enum Command {
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,beacon_voice=info",
        1 => "info,beacon_voice=debug",
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
    let overrides = Overrides {
        transport_url: cli.transport_url,
        port: cli.port,
        mode: cli.mode,
    };

    // Load configuration
    let config = Config::load_with_overrides(&overrides)?;
    tracing::debug!(?config, "loaded configuration");

    // Handle subcommands
    if let Some(cmd) = cli.command {
        return match cmd {
            Command::TestMic { duration } => test_mic(&config, duration).await,
            Command::TestSpeaker => test_speaker(&config).await,
        };
    }

    tracing::info!(
        transport = %config.transport.url,
        mode = %config.voice.mode,
        "starting beacon voice"
    );

    let daemon = Daemon::new(config).activate_on_start(cli.activate);

    // Run until interrupted
    daemon.run().await?;

    Ok(())
}

/// Test microphone input with a level meter and speech probability
#[allow(clippy::future_not_send)]
async fn test_mic(config: &Config, duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let sample_rate = config.vad.sample_rate;
    let buffer = Arc::new(Mutex::new(Vec::<f32>::new()));
    let sink = Arc::clone(&buffer);

    let mut microphone = CpalMicrophone::new();
    microphone.open(
        sample_rate,
        Box::new(move |samples: &[f32]| {
            if let Ok(mut buffer) = sink.lock() {
                buffer.extend_from_slice(samples);
            }
        }),
    )?;

    println!("Sample rate: {sample_rate} Hz");
    println!("---");

    let mut classifier = EnergyClassifier::default();

    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let samples = buffer
            .lock()
            .map(|mut b| std::mem::take(&mut *b))
            .unwrap_or_default();
        let energy = rms(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);
        let prob = classifier.probability(&samples);

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] RMS: {:.4} | Peak: {:.4} | Speech: {:.2} | [{}]",
            i + 1,
            energy,
            peak,
            prob,
            meter
        );
    }

    microphone.close();

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!(
        "Speech above {:.2} starts a segment, below {:.2} counts as silence.",
        config.vad.speech_on_prob, config.vad.speech_off_prob
    );

    Ok(())
}

/// Test speaker output with a sine wave played through the gapless scheduler
#[allow(clippy::future_not_send)]
async fn test_speaker(config: &Config) -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let sample_rate = config.voice.output_sample_rate;
    let output = CpalOutput::open(sample_rate)?;
    let timeline = output.timeline().clone();

    let mut scheduler = PlaybackScheduler::new(
        Box::new(output),
        Arc::new(HttpClipLoader::new(None, sample_rate)),
        Arc::new(|_: PlaybackEvent| {}),
    );

    // 25 frames of 80 ms, scheduled back-to-back
    let frame_len = sample_rate as usize * 80 / 1000;
    let frequency = 440.0_f32;
    #[allow(clippy::cast_precision_loss)]
    let tone = |i: usize| {
        (2.0 * std::f32::consts::PI * frequency * i as f32 / sample_rate as f32).sin() * 0.3
    };

    for frame in 0..25 {
        let samples: Vec<f32> = (frame * frame_len..(frame + 1) * frame_len)
            .map(tone)
            .collect();
        scheduler.schedule_stream(samples);
    }

    println!("Playing 2 seconds at {sample_rate} Hz...");
    tokio::time::sleep(Duration::from_millis(2300)).await;
    println!("Played until sample {}", timeline.now());

    let codec = beacon_voice::voice::codec::default_backend();
    match codec.encoder() {
        Ok(_) => println!("Duplex codec: {}", codec.name()),
        Err(e) => println!("Duplex mode unavailable: {e}"),
    }

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");
    println!("  3. Try: pavucontrol (to check output levels)");

    Ok(())
}
