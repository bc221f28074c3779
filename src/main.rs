//! kokoro-speaker-server: keeps the Kokoro model resident and serves speech
//! over loopback HTTP.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use kokoro_speaker::audio::ArtifactStore;
use kokoro_speaker::config::{Config, LOOPBACK};
use kokoro_speaker::lifecycle::ServiceMarker;
use kokoro_speaker::playback::RodioPlayer;
use kokoro_speaker::server::{self, ServiceState};
use kokoro_speaker::synth::kokoro::KokoroSynthesizer;

#[derive(Parser, Debug)]
#[command(name = "kokoro-speaker-server", about = "Kokoro TTS server")]
struct Args {
    /// Path to config.yaml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Phonemizer language: a=American English, b=British English (overrides config)
    #[arg(short, long)]
    lang: Option<String>,

    /// Detach and run in the background
    #[arg(long)]
    daemon: bool,

    /// Enable verbose (debug) logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Initialize logging (suppress noisy ort internals)
    let filter = if args.verbose {
        EnvFilter::new("debug,ort=info")
    } else {
        EnvFilter::new("info,ort=warn")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = Config::load(args.config.as_deref());
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(lang) = args.lang {
        config.tts.lang = lang;
    }

    if args.daemon {
        return match spawn_detached() {
            Ok(pid) => {
                println!("TTS server started on port {} (PID: {pid})", config.server.port);
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!("Failed to start background server: {e}");
                ExitCode::FAILURE
            }
        };
    }

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    // Load the model before binding: never serve with a broken capability.
    info!("Loading Kokoro TTS model...");
    let synth = tokio::task::spawn_blocking({
        let tts_config = config.tts.clone();
        move || KokoroSynthesizer::load(&tts_config)
    })
    .await??;

    let addr = format!("{LOOPBACK}:{}", config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| format!("Failed to bind {addr}: {e}"))?;

    let (state, shutdown_rx) = ServiceState::new(
        Box::new(synth),
        Arc::new(RodioPlayer),
        ArtifactStore::new(config.server.artifact_dir()),
    );

    let marker = ServiceMarker::new(config.server.marker_path());
    let _marker_guard = marker.register_cleanup_on_exit();

    server::serve(listener, state, shutdown_rx).await?;
    Ok(())
}

/// Re-launch this binary in its own process group with null stdio. The child
/// gets the same arguments minus `--daemon`.
fn spawn_detached() -> std::io::Result<u32> {
    use std::process::{Command, Stdio};

    let exe = std::env::current_exe()?;
    let mut cmd = Command::new(exe);
    cmd.args(daemon_child_args(std::env::args_os().skip(1)));
    cmd.stdin(Stdio::null()).stdout(Stdio::null()).stderr(Stdio::null());

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    let mut child = cmd.spawn()?;

    // Catch argument and bind errors that end the child right away.
    std::thread::sleep(std::time::Duration::from_millis(300));
    if let Some(status) = child.try_wait()? {
        return Err(std::io::Error::other(format!("server exited immediately ({status})")));
    }
    Ok(child.id())
}

/// Arguments for the detached child: everything except `--daemon`.
fn daemon_child_args(args: impl IntoIterator<Item = OsString>) -> Vec<OsString> {
    args.into_iter()
        .filter(|arg| {
            let arg = arg.to_string_lossy();
            arg != "--daemon" && !arg.starts_with("--daemon=")
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn child_args(args: &[&str]) -> Vec<String> {
        daemon_child_args(args.iter().map(OsString::from))
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn daemon_flag_is_dropped() {
        assert_eq!(child_args(&["--daemon", "-v"]), ["-v"]);
        assert_eq!(child_args(&["--daemon=true", "-c", "cfg.yaml"]), ["-c", "cfg.yaml"]);
    }

    #[test]
    fn port_forms_are_forwarded_unchanged() {
        assert_eq!(child_args(&["--port=9000", "--daemon"]), ["--port=9000"]);
        assert_eq!(child_args(&["-p9000", "--daemon"]), ["-p9000"]);
        assert_eq!(child_args(&["--daemon", "--port", "9000"]), ["--port", "9000"]);
    }

    #[test]
    fn forwarded_args_parse_back_to_the_same_settings() {
        let forwarded = child_args(&["--daemon", "-p9000", "--lang=b"]);
        let args = Args::try_parse_from(std::iter::once("kokoro-speaker-server".to_string()).chain(forwarded))
            .unwrap();
        assert_eq!(args.port, Some(9000));
        assert_eq!(args.lang.as_deref(), Some("b"));
        assert!(!args.daemon);
    }
}
