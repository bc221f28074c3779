//! HTTP API for the resident TTS service.
//!
//! - `GET  /health`   liveness, never waits on synthesis
//! - `POST /speak`    JSON `{text, voice, speed, play}` (or a raw text body)
//! - `GET  /speak`    same, as `?text=&voice=&speed=&play=`
//! - `GET  /voices`   voice ids known to the loaded model
//! - `POST /shutdown` stop serving after in-flight requests finish

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::audio::ArtifactStore;
use crate::delivery::deliver;
use crate::error::TtsError;
use crate::playback::Player;
use crate::request::{parse_speed, Delivery, SynthesisOutcome, SynthesisRequest, PLAYED_TOKEN};
use crate::synth::{render_shared, shared, SharedSynthesizer, SpeechSynthesizer};

/// Service-scoped state handed to every handler.
#[derive(Clone)]
pub struct ServiceState {
    synth: SharedSynthesizer,
    player: Arc<dyn Player>,
    artifacts: ArtifactStore,
    voices: Arc<Vec<String>>,
    shutdown: mpsc::Sender<()>,
}

/// Receiving end of the shutdown channel, consumed by [`serve`].
pub type ShutdownReceiver = mpsc::Receiver<()>;

impl ServiceState {
    /// Wrap an already-loaded synthesizer. Returns the state and the
    /// receiver that [`serve`] waits on.
    pub fn new(
        synth: Box<dyn SpeechSynthesizer>,
        player: Arc<dyn Player>,
        artifacts: ArtifactStore,
    ) -> (Self, ShutdownReceiver) {
        let voices = Arc::new(synth.voices());
        let (shutdown, shutdown_rx) = mpsc::channel(1);
        let state = Self {
            synth: shared(synth),
            player,
            artifacts,
            voices,
            shutdown,
        };
        (state, shutdown_rx)
    }
}

// --- Request types ---

#[derive(Deserialize)]
struct SpeakBody {
    #[serde(default)]
    text: String,
    voice: Option<String>,
    speed: Option<f32>,
    #[serde(default = "default_play")]
    play: bool,
}

fn default_play() -> bool {
    true
}

#[derive(Deserialize)]
struct SpeakQuery {
    text: Option<String>,
    voice: Option<String>,
    speed: Option<String>,
    play: Option<String>,
}

impl SpeakQuery {
    fn into_request(self) -> Result<SynthesisRequest, TtsError> {
        let speed = self.speed.as_deref().map(parse_speed).transpose()?;
        let play = self
            .play
            .as_deref()
            .map_or(true, |p| p == "1" || p.eq_ignore_ascii_case("true"));
        SynthesisRequest::new(
            self.text.unwrap_or_default(),
            self.voice,
            speed,
            Delivery::from_play_flag(play),
        )
    }
}

/// JSON body, or the whole body as text when it is not JSON.
fn parse_body(body: &str) -> Result<SynthesisRequest, TtsError> {
    let value: serde_json::Value = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(_) => return SynthesisRequest::new(body.trim(), None, None, Delivery::Play),
    };

    if let serde_json::Value::String(text) = value {
        return SynthesisRequest::new(text, None, None, Delivery::Play);
    }

    let body: SpeakBody = serde_json::from_value(value)
        .map_err(|e| TtsError::Service {
            status: StatusCode::BAD_REQUEST.as_u16(),
            message: format!("Invalid request body: {e}"),
        })?;
    SynthesisRequest::new(body.text, body.voice, body.speed, Delivery::from_play_flag(body.play))
}

impl IntoResponse for TtsError {
    fn into_response(self) -> Response {
        let status = if self.is_invalid_request() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        let message = match self {
            TtsError::Service { message, .. } => message,
            other => other.to_string(),
        };
        (status, message).into_response()
    }
}

/// Build the axum router.
pub fn router(state: ServiceState) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/speak", get(handle_speak_query).post(handle_speak_body))
        .route("/voices", get(handle_voices))
        .route("/shutdown", post(handle_shutdown))
        .with_state(state)
}

/// Serve until a termination signal arrives or `/shutdown` is called.
/// In-flight requests complete before this returns.
pub async fn serve(
    listener: TcpListener,
    state: ServiceState,
    shutdown_rx: ShutdownReceiver,
) -> std::io::Result<()> {
    let addr = listener.local_addr()?;
    info!("TTS server listening on http://{addr}");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal(shutdown_rx))
        .await?;

    info!("TTS server stopped");
    Ok(())
}

async fn shutdown_signal(mut shutdown_rx: ShutdownReceiver) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Interrupt received, shutting down"),
        _ = terminate => info!("SIGTERM received, shutting down"),
        _ = shutdown_rx.recv() => info!("Shutdown requested, finishing in-flight requests"),
    }
}

// --- Handlers ---

async fn handle_health() -> &'static str {
    "ok"
}

async fn handle_voices(State(state): State<ServiceState>) -> Json<Vec<String>> {
    Json(state.voices.as_ref().clone())
}

async fn handle_shutdown(State(state): State<ServiceState>) -> &'static str {
    // A full channel means a shutdown is already pending.
    let _ = state.shutdown.try_send(());
    "shutting down"
}

async fn handle_speak_query(
    State(state): State<ServiceState>,
    Query(query): Query<SpeakQuery>,
) -> Result<String, TtsError> {
    let request = query.into_request()?;
    speak(state, request).await
}

async fn handle_speak_body(State(state): State<ServiceState>, body: String) -> Result<String, TtsError> {
    let request = parse_body(&body)?;
    speak(state, request).await
}

/// Synthesize, then play or write the artifact. The synthesizer lock is held
/// only while rendering, on the blocking pool.
async fn speak(state: ServiceState, request: SynthesisRequest) -> Result<String, TtsError> {
    let t0 = Instant::now();
    info!(
        "HTTP /speak: \"{}\" ({} chars, voice={}, speed={}, {:?})",
        request.preview(),
        request.text().len(),
        request.voice(),
        request.speed(),
        request.delivery(),
    );

    let result = tokio::task::spawn_blocking(move || {
        let clip = render_shared(&state.synth, &request)?;
        deliver(&clip, request.delivery(), state.player.as_ref(), &state.artifacts)
    })
    .await?;

    let elapsed_ms = t0.elapsed().as_millis();
    match result {
        Ok(SynthesisOutcome::Played) => {
            info!("Played in {elapsed_ms}ms");
            Ok(PLAYED_TOKEN.to_string())
        }
        Ok(SynthesisOutcome::Artifact(path)) => {
            info!("Wrote {} in {elapsed_ms}ms", path.display());
            Ok(path.to_string_lossy().into_owned())
        }
        Err(e) => {
            warn!("Speak request failed after {elapsed_ms}ms: {e}");
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;

    use tokio::task::JoinHandle;

    use crate::synth::testing::{FakeSynth, RecordingPlayer};

    struct TestService {
        base: String,
        artifacts: tempfile::TempDir,
        handle: JoinHandle<std::io::Result<()>>,
    }

    impl TestService {
        async fn start(synth: FakeSynth, player: RecordingPlayer) -> Self {
            let artifacts = tempfile::tempdir().unwrap();
            let (state, shutdown_rx) = ServiceState::new(
                Box::new(synth),
                Arc::new(player),
                ArtifactStore::new(artifacts.path()),
            );
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let base = format!("http://{}", listener.local_addr().unwrap());
            let handle = tokio::spawn(serve(listener, state, shutdown_rx));
            Self {
                base,
                artifacts,
                handle,
            }
        }

        fn url(&self, path: &str) -> String {
            format!("{}{path}", self.base)
        }

        fn artifact_count(&self) -> usize {
            std::fs::read_dir(self.artifacts.path()).unwrap().count()
        }
    }

    #[tokio::test]
    async fn health_is_ok() {
        let svc = TestService::start(FakeSynth::new(), RecordingPlayer::default()).await;
        let resp = reqwest::get(svc.url("/health")).await.unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.text().await.unwrap(), "ok");
    }

    #[tokio::test]
    async fn file_delivery_returns_readable_wav() {
        let synth = FakeSynth::new();
        let svc = TestService::start(synth.clone(), RecordingPlayer::default()).await;

        let resp = reqwest::Client::new()
            .post(svc.url("/speak"))
            .json(&serde_json::json!({
                "text": "Hello world",
                "voice": "default",
                "speed": 1.0,
                "play": false
            }))
            .send()
            .await
            .unwrap();

        assert_eq!(resp.status(), 200);
        let path = PathBuf::from(resp.text().await.unwrap());
        assert!(path.starts_with(std::fs::canonicalize(svc.artifacts.path()).unwrap()));
        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().bits_per_sample, 16);
        assert!(reader.len() > 0);
        assert_eq!(synth.call_count(), 1);
    }

    #[tokio::test]
    async fn play_delivery_leaves_no_artifact() {
        let player = RecordingPlayer::default();
        let svc = TestService::start(FakeSynth::new(), player.clone()).await;

        let resp = reqwest::Client::new()
            .post(svc.url("/speak"))
            .json(&serde_json::json!({ "text": "Hello world", "play": true }))
            .send()
            .await
            .unwrap();

        assert_eq!(resp.status(), 200);
        assert_eq!(resp.text().await.unwrap(), PLAYED_TOKEN);
        assert_eq!(player.play_count(), 1);
        assert_eq!(svc.artifact_count(), 0);
    }

    #[tokio::test]
    async fn raw_text_body_defaults_to_play() {
        let player = RecordingPlayer::default();
        let svc = TestService::start(FakeSynth::new(), player.clone()).await;

        let resp = reqwest::Client::new()
            .post(svc.url("/speak"))
            .body("Just some words")
            .send()
            .await
            .unwrap();

        assert_eq!(resp.status(), 200);
        assert_eq!(resp.text().await.unwrap(), PLAYED_TOKEN);
        assert_eq!(player.play_count(), 1);
    }

    #[tokio::test]
    async fn query_form_returns_artifact() {
        let svc = TestService::start(FakeSynth::new(), RecordingPlayer::default()).await;

        let resp = reqwest::Client::new()
            .get(svc.url("/speak"))
            .query(&[("text", "Hello world"), ("voice", "bf_emma"), ("speed", "1.5"), ("play", "0")])
            .send()
            .await
            .unwrap();

        assert_eq!(resp.status(), 200);
        let path = PathBuf::from(resp.text().await.unwrap());
        assert!(path.exists());
        assert_eq!(svc.artifact_count(), 1);
    }

    #[tokio::test]
    async fn empty_text_is_rejected_before_synthesis() {
        let synth = FakeSynth::new();
        let svc = TestService::start(synth.clone(), RecordingPlayer::default()).await;
        let client = reqwest::Client::new();

        let resp = client
            .post(svc.url("/speak"))
            .json(&serde_json::json!({ "text": "", "play": false }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
        assert_eq!(resp.text().await.unwrap(), "Missing text");

        let resp = client.get(svc.url("/speak?text=")).send().await.unwrap();
        assert_eq!(resp.status(), 400);

        let resp = client.get(svc.url("/speak")).send().await.unwrap();
        assert_eq!(resp.status(), 400);

        let resp = client.post(svc.url("/speak")).json(&serde_json::json!({})).send().await.unwrap();
        assert_eq!(resp.status(), 400);

        assert_eq!(synth.call_count(), 0);
    }

    #[tokio::test]
    async fn bad_speed_is_rejected_before_synthesis() {
        let synth = FakeSynth::new();
        let svc = TestService::start(synth.clone(), RecordingPlayer::default()).await;
        let client = reqwest::Client::new();

        let resp = client.get(svc.url("/speak?text=hi&speed=fast")).send().await.unwrap();
        assert_eq!(resp.status(), 400);

        let resp = client
            .post(svc.url("/speak"))
            .json(&serde_json::json!({ "text": "hi", "speed": -1.0 }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);

        let resp = client
            .post(svc.url("/speak"))
            .json(&serde_json::json!({ "text": "hi", "speed": "fast" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);

        assert_eq!(synth.call_count(), 0);
    }

    #[tokio::test]
    async fn synthesis_failure_is_500_and_service_survives() {
        let svc = TestService::start(FakeSynth::failing("model exploded"), RecordingPlayer::default()).await;
        let client = reqwest::Client::new();

        let resp = client
            .post(svc.url("/speak"))
            .json(&serde_json::json!({ "text": "Hello" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 500);
        assert!(resp.text().await.unwrap().contains("model exploded"));

        let resp = client.get(svc.url("/health")).send().await.unwrap();
        assert_eq!(resp.status(), 200);
    }

    #[tokio::test]
    async fn unknown_voice_is_500() {
        let svc = TestService::start(FakeSynth::new(), RecordingPlayer::default()).await;
        let resp = reqwest::get(svc.url("/speak?text=hi&voice=missing")).await.unwrap();
        assert_eq!(resp.status(), 500);
        assert!(resp.text().await.unwrap().contains("missing"));
    }

    #[tokio::test]
    async fn playback_failure_is_500() {
        let svc = TestService::start(FakeSynth::new(), RecordingPlayer::failing("no audio device")).await;
        let resp = reqwest::get(svc.url("/speak?text=hi&play=1")).await.unwrap();
        assert_eq!(resp.status(), 500);
        assert!(resp.text().await.unwrap().contains("no audio device"));
        assert_eq!(svc.artifact_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn health_is_not_blocked_by_synthesis() {
        let synth = FakeSynth::slow(Duration::from_millis(1500));
        let svc = TestService::start(synth.clone(), RecordingPlayer::default()).await;
        let client = reqwest::Client::new();

        let speak = {
            let client = client.clone();
            let url = svc.url("/speak?text=slow&play=0");
            tokio::spawn(async move { client.get(url).send().await })
        };

        // Let the speak request reach the synthesizer.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(synth.call_count(), 1);

        let t0 = Instant::now();
        let checks: Vec<_> = (0..5)
            .map(|_| {
                let client = client.clone();
                let url = svc.url("/health");
                tokio::spawn(async move { client.get(url).send().await })
            })
            .collect();
        for check in checks {
            assert_eq!(check.await.unwrap().unwrap().status(), 200);
        }
        assert!(t0.elapsed() < Duration::from_millis(700), "health waited on synthesis");

        assert_eq!(speak.await.unwrap().unwrap().status(), 200);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn identical_requests_produce_independent_artifacts() {
        let synth = FakeSynth::new();
        let svc = TestService::start(synth.clone(), RecordingPlayer::default()).await;
        let client = reqwest::Client::new();

        let requests: Vec<_> = (0..3)
            .map(|_| {
                let client = client.clone();
                let url = svc.url("/speak?text=same&play=0");
                tokio::spawn(async move { client.get(url).send().await.unwrap().text().await.unwrap() })
            })
            .collect();

        let mut paths = Vec::new();
        for r in requests {
            paths.push(r.await.unwrap());
        }
        paths.sort();
        paths.dedup();
        assert_eq!(paths.len(), 3);
        assert_eq!(synth.call_count(), 3);
    }

    #[tokio::test]
    async fn voices_are_listed() {
        let svc = TestService::start(FakeSynth::new(), RecordingPlayer::default()).await;
        let voices: Vec<String> = reqwest::get(svc.url("/voices")).await.unwrap().json().await.unwrap();
        assert_eq!(voices, vec!["af_heart", "bf_emma"]);
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        let svc = TestService::start(FakeSynth::new(), RecordingPlayer::default()).await;
        let resp = reqwest::get(svc.url("/nope")).await.unwrap();
        assert_eq!(resp.status(), 404);
    }

    #[tokio::test]
    async fn shutdown_endpoint_stops_serving() {
        let svc = TestService::start(FakeSynth::new(), RecordingPlayer::default()).await;

        let resp = reqwest::Client::new().post(svc.url("/shutdown")).send().await.unwrap();
        assert_eq!(resp.status(), 200);

        let result = tokio::time::timeout(Duration::from_secs(5), svc.handle)
            .await
            .expect("server did not stop");
        assert!(result.unwrap().is_ok());
    }

    #[test]
    fn parse_body_accepts_json_and_raw_text() {
        let req = parse_body(r#"{"text": "hi", "voice": "bf_emma", "speed": 1.2, "play": false}"#).unwrap();
        assert_eq!(req.voice(), "bf_emma");
        assert_eq!(req.delivery(), Delivery::File);

        let req = parse_body("plain words").unwrap();
        assert_eq!(req.text(), "plain words");
        assert_eq!(req.delivery(), Delivery::Play);

        let req = parse_body(r#""quoted""#).unwrap();
        assert_eq!(req.text(), "quoted");
    }
}
