//! tts: speak text through the resident Kokoro service, or load the model
//! in-process when the service is not running.
//!
//! Examples:
//!   echo "Hello world" | tts
//!   tts "Hello world"
//!   tts -v bf_emma -s 1.2 "Hello world"
//!   tts -o output.wav "Hello world"

use std::io::{IsTerminal, Read};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use kokoro_speaker::audio::ArtifactStore;
use kokoro_speaker::client::{Dispatcher, Route, ServiceClient, SynthesizerLoader};
use kokoro_speaker::config::Config;
use kokoro_speaker::lifecycle::ServiceMarker;
use kokoro_speaker::playback::RodioPlayer;
use kokoro_speaker::synth::kokoro::KokoroSynthesizer;
use kokoro_speaker::synth::SpeechSynthesizer;
use kokoro_speaker::{Delivery, SynthesisOutcome, SynthesisRequest, TtsError};

#[derive(Parser, Debug)]
#[command(name = "tts", about = "Kokoro text-to-speech")]
struct Args {
    /// Text to speak (read from stdin when omitted)
    text: Option<String>,

    /// Voice preset
    #[arg(short, long)]
    voice: Option<String>,

    /// Speech speed multiplier
    #[arg(short, long)]
    speed: Option<f32>,

    /// Write a WAV file instead of playing
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Generate a WAV file but do not play it; prints the file path
    #[arg(long)]
    no_play: bool,

    /// Service port (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Phonemizer language for the in-process fallback: a=American English, b=British English
    #[arg(short, long)]
    lang: Option<String>,

    /// Path to config.yaml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Report whether the service is running and exit
    #[arg(long)]
    status: bool,

    /// Ask a running service to stop and exit
    #[arg(long)]
    stop: bool,

    /// Check that the model files are installed and exit
    #[arg(long)]
    check: bool,

    /// Enable verbose (debug) logging
    #[arg(long)]
    verbose: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();

    let filter = if args.verbose {
        EnvFilter::new("debug,ort=info")
    } else {
        EnvFilter::new("warn,ort=error")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<(), TtsError> {
    let mut config = Config::load(args.config.as_deref());
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(lang) = args.lang.clone() {
        config.tts.lang = lang;
    }

    let client = ServiceClient::new(config.server.base_url(), &config.client)?;

    if args.check {
        return check_models(&config);
    }
    if args.status {
        report_status(&config, &client).await;
        return Ok(());
    }
    if args.stop {
        if client.shutdown().await {
            println!("TTS server stopping");
        } else {
            println!("TTS server not running");
        }
        return Ok(());
    }

    let stdin = std::io::stdin();
    let interactive = stdin.is_terminal();
    let text = read_text(args.text.clone(), &mut stdin.lock(), interactive)?;
    let request = build_request(text, &args, &config)?;

    let tts_config = config.tts.clone();
    let loader: SynthesizerLoader = Box::new(move || {
        eprintln!("TTS server not running, loading model directly...");
        eprintln!("Tip: start the server for instant TTS: kokoro-speaker-server --daemon");
        let synth = KokoroSynthesizer::load(&tts_config)?;
        Ok(Box::new(synth) as Box<dyn SpeechSynthesizer>)
    });

    let dispatcher = Dispatcher::new(
        client,
        loader,
        Arc::new(RodioPlayer),
        ArtifactStore::system_temp(),
    );

    let (outcome, route) = dispatcher.dispatch(&request, args.output.as_deref()).await?;

    if route == Route::Local {
        tracing::debug!("Served without the resident service");
    }

    match outcome {
        SynthesisOutcome::Played => {}
        SynthesisOutcome::Artifact(path) if args.output.is_some() => {
            println!("Audio saved to: {}", path.display());
        }
        SynthesisOutcome::Artifact(path) => println!("{}", path.display()),
    }
    Ok(())
}

/// Text from the argument, or from `input` when it is piped. Blank text is
/// rejected here, before any service or model is touched.
fn read_text(arg: Option<String>, input: &mut dyn Read, interactive: bool) -> Result<String, TtsError> {
    let text = match arg {
        Some(text) => text,
        None if interactive => return Err(TtsError::EmptyText),
        None => {
            let mut buf = String::new();
            input.read_to_string(&mut buf)?;
            buf.trim().to_string()
        }
    };

    if text.trim().is_empty() {
        return Err(TtsError::EmptyText);
    }
    Ok(text)
}

/// Combine CLI flags with config defaults into a validated request.
fn build_request(text: String, args: &Args, config: &Config) -> Result<SynthesisRequest, TtsError> {
    let delivery = Delivery::from_play_flag(args.output.is_none() && !args.no_play);
    let voice = args.voice.clone().or_else(|| Some(config.tts.voice.clone()));
    let speed = args.speed.or(Some(config.tts.speed));
    SynthesisRequest::new(text, voice, speed, delivery)
}

async fn report_status(config: &Config, client: &ServiceClient) {
    let marker = ServiceMarker::new(config.server.marker_path());
    let pid = marker.running_pid();
    let healthy = client.health().await;

    match (pid, healthy) {
        (Some(pid), true) => println!("TTS server running (PID: {pid}) at {}", client.base_url()),
        (None, true) => println!("TTS server responding at {} (no marker)", client.base_url()),
        (Some(pid), false) => println!("TTS server PID {pid} recorded but not responding"),
        (None, false) => println!("TTS server not running"),
    }
}

fn check_models(config: &Config) -> Result<(), TtsError> {
    let missing = config.tts.missing_model_files();
    if missing.is_empty() {
        println!("All model files are installed in {}", config.tts.model_dir().display());
        return Ok(());
    }

    for path in &missing {
        eprintln!("  - missing {}", path.display());
    }
    Err(TtsError::Load(format!("{} model file(s) missing", missing.len())))
}
