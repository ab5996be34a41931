use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use confab_engine::audio::{
    self, AudioBackend, CpalBackend, INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE, PlaybackScheduler,
};
use confab_engine::{SessionConfig, SessionController, SessionState};

/// Confab - talk to an AI speech model from your terminal
#[derive(Parser)]
#[command(name = "confab", version, about)]
struct Cli {
    /// Model identifier
    #[arg(long, env = "CONFAB_MODEL")]
    model: Option<String>,

    /// Voice identifier for synthesized speech
    #[arg(long, env = "CONFAB_VOICE")]
    voice: Option<String>,

    /// System instruction for the conversation
    #[arg(long, env = "CONFAB_SYSTEM_PROMPT")]
    system_prompt: Option<String>,

    /// Proxy endpoint; credentials are injected by the proxy
    #[arg(long, env = "CONFAB_PROXY")]
    proxy: Option<String>,

    /// API key, embedded in the connection URL when no proxy is set
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Path to a TOML config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

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

        /// Save the recording to a WAV file
        #[arg(long, value_name = "PATH")]
        save: Option<PathBuf>,
    },
    /// Test speaker output
    TestSpeaker,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "warn,confab_engine=info",
        1 => "info,confab_engine=debug",
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

async fn run(cli: Cli) -> anyhow::Result<()> {
    if let Some(cmd) = cli.command {
        return match cmd {
            Command::TestMic { duration, save } => test_mic(duration, save).await,
            Command::TestSpeaker => test_speaker().await,
        };
    }

    let mut config = SessionConfig::load_from(cli.config.as_deref())?;
    if let Some(model) = cli.model {
        config.model = model;
    }
    if let Some(voice) = cli.voice {
        config.voice = voice;
    }
    if let Some(prompt) = cli.system_prompt {
        config.system_instruction = Some(prompt);
    }
    if let Some(proxy) = cli.proxy {
        config.proxy = Some(proxy);
    }
    if let Some(key) = cli.api_key {
        config.api_key = Some(key);
    }

    tracing::info!(model = %config.model, voice = %config.voice, "starting session");

    let mut controller = SessionController::new(config);
    let mut states = controller.subscribe();
    controller.connect().await?;

    println!("Session live - speak whenever you like. Ctrl-C hangs up.");

    let mut meter = tokio::time::interval(Duration::from_millis(200));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }

            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *states.borrow_and_update();
                println!("\rstate: {state}                    ");
                if state == SessionState::Error {
                    if let Some(cause) = controller.last_error() {
                        eprintln!("session failed: {cause}");
                    }
                    break;
                }
            }

            _ = meter.tick() => {
                if controller.state() == SessionState::Listening {
                    print_level(controller.input_level());
                }
            }
        }
    }

    controller.disconnect().await;

    let dropped = controller.protocol_errors();
    if dropped > 0 {
        tracing::warn!(dropped, "malformed frames were dropped this session");
    }

    Ok(())
}

/// Draw a one-line input level meter
fn print_level(level: u8) {
    let bars = usize::from(level) / 5;
    print!("\rmic: [{:<20}] {level:>3}", "#".repeat(bars));
    let _ = std::io::stdout().flush();
}

/// Test microphone input
async fn test_mic(duration: u64, save: Option<PathBuf>) -> anyhow::Result<()> {
    println!("Recording for {duration} seconds - speak into your microphone");

    let mut backend = CpalBackend::new();
    // Room for every frame; the recording path keeps them all
    let (frame_tx, mut frames) = tokio::sync::mpsc::channel(64);
    backend.start_capture(frame_tx)?;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(duration);
    let mut recording: Vec<i16> = Vec::new();

    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => break,
            Some(frame) = frames.recv() => {
                print_level(audio::input_level(&frame));
                recording.extend_from_slice(&frame);
            }
        }
    }
    println!();
    backend.stop_capture();

    println!(
        "Captured {} samples ({:.1}s)",
        recording.len(),
        recording.len() as f64 / f64::from(INPUT_SAMPLE_RATE)
    );

    if let Some(path) = save {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: INPUT_SAMPLE_RATE,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec)?;
        for sample in &recording {
            writer.write_sample(*sample)?;
        }
        writer.finalize()?;
        println!("Saved to {}", path.display());
    }

    Ok(())
}

/// Test speaker output
async fn test_speaker() -> anyhow::Result<()> {
    println!("Playing a one second test tone...");

    let (event_tx, mut events) = tokio::sync::mpsc::unbounded_channel();
    let scheduler = PlaybackScheduler::new(OUTPUT_SAMPLE_RATE, event_tx);

    let mut backend = CpalBackend::new();
    backend.start_output(scheduler.clone())?;

    let tone: Vec<f32> = (0..OUTPUT_SAMPLE_RATE)
        .map(|i| {
            let t = f64::from(i) / f64::from(OUTPUT_SAMPLE_RATE);
            (0.2 * (2.0 * std::f64::consts::PI * 440.0 * t).sin()) as f32
        })
        .collect();
    scheduler.enqueue(tone);

    // The scheduler reports when the tone has fully played out
    let _ = events.recv().await;
    backend.stop_output();

    println!("Done");
    Ok(())
}
