//! Client side: talk to the resident service, fall back to local synthesis.
//!
//! Any transport failure (refused, timeout, unreachable, not our service)
//! means "service absent" and triggers the local path. Invalid requests and
//! synthesis failures reported by the service are surfaced as errors; they
//! would fail the same way locally.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use reqwest::{Client, StatusCode};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::audio::{move_artifact, ArtifactStore};
use crate::config::ClientConfig;
use crate::delivery::{deliver, deliver_to};
use crate::error::TtsError;
use crate::playback::Player;
use crate::request::{Delivery, SynthesisOutcome, SynthesisRequest, PLAYED_TOKEN};
use crate::synth::{render, SpeechSynthesizer};

#[derive(Serialize)]
struct SpeakBody<'a> {
    text: &'a str,
    voice: &'a str,
    speed: f32,
    play: bool,
}

/// HTTP client for the resident service.
#[derive(Clone)]
pub struct ServiceClient {
    base_url: String,
    http: Client,
}

impl ServiceClient {
    pub fn new(base_url: impl Into<String>, config: &ClientConfig) -> Result<Self, TtsError> {
        let http = Client::builder()
            .connect_timeout(config.connect_timeout())
            .timeout(config.timeout())
            .build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// True when `/health` answers 200.
    pub async fn health(&self) -> bool {
        match self.http.get(self.url("/health")).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!("Health check failed: {e}");
                false
            }
        }
    }

    /// Ask the service to stop. Returns false when it was not reachable.
    pub async fn shutdown(&self) -> bool {
        match self.http.post(self.url("/shutdown")).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!("Shutdown request failed: {e}");
                false
            }
        }
    }

    /// Send the request to the service.
    ///
    /// `Ok(None)` means the service is absent and the caller should fall
    /// back. Errors are failures the service reported for this request.
    pub async fn probe_and_send(
        &self,
        request: &SynthesisRequest,
    ) -> Result<Option<SynthesisOutcome>, TtsError> {
        let body = SpeakBody {
            text: request.text(),
            voice: request.voice(),
            speed: request.speed(),
            play: request.delivery().is_play(),
        };

        let resp = match self.http.post(self.url("/speak")).json(&body).send().await {
            Ok(resp) => resp,
            Err(e) => {
                debug!("TTS service unreachable at {}: {e}", self.base_url);
                return Ok(None);
            }
        };

        let status = resp.status();
        let text = match resp.text().await {
            Ok(text) => text,
            Err(e) => {
                warn!("TTS service response could not be read: {e}");
                return Ok(None);
            }
        };

        if status.is_success() {
            let text = text.trim();
            if text == PLAYED_TOKEN && request.delivery().is_play() {
                return Ok(Some(SynthesisOutcome::Played));
            }
            if !request.delivery().is_play() && !text.is_empty() {
                return Ok(Some(SynthesisOutcome::Artifact(PathBuf::from(text))));
            }
            warn!("Unexpected TTS service reply: {text:?}");
            return Ok(None);
        }

        if status == StatusCode::BAD_REQUEST || status.is_server_error() {
            return Err(TtsError::Service {
                status: status.as_u16(),
                message: text,
            });
        }

        // Something else is listening on the port.
        warn!("Unexpected status {status} from {}, treating service as absent", self.base_url);
        Ok(None)
    }
}

/// Loads the synthesis capability in-process for the slow path.
pub type SynthesizerLoader =
    Box<dyn Fn() -> Result<Box<dyn SpeechSynthesizer>, TtsError> + Send + Sync>;

/// Which path served a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Service,
    Local,
}

/// Prefers the resident service, falls back to local synthesis.
pub struct Dispatcher {
    client: ServiceClient,
    loader: SynthesizerLoader,
    player: Arc<dyn Player>,
    artifacts: ArtifactStore,
}

impl Dispatcher {
    pub fn new(
        client: ServiceClient,
        loader: SynthesizerLoader,
        player: Arc<dyn Player>,
        artifacts: ArtifactStore,
    ) -> Self {
        Self {
            client,
            loader,
            player,
            artifacts,
        }
    }

    /// Serve `request`, writing any artifact to `destination` when given.
    ///
    /// `destination` only applies to file delivery; play requests ignore it
    /// on both routes. With file delivery and no destination, the returned
    /// path is a temp artifact now owned by the caller.
    pub async fn dispatch(
        &self,
        request: &SynthesisRequest,
        destination: Option<&Path>,
    ) -> Result<(SynthesisOutcome, Route), TtsError> {
        let t0 = Instant::now();

        if let Some(outcome) = self.client.probe_and_send(request).await? {
            let outcome = match (outcome, destination) {
                (SynthesisOutcome::Artifact(path), Some(dest)) => {
                    move_artifact(&path, dest)?;
                    SynthesisOutcome::Artifact(dest.to_path_buf())
                }
                (outcome, _) => outcome,
            };
            info!("Served by TTS service in {}ms", t0.elapsed().as_millis());
            return Ok((outcome, Route::Service));
        }

        info!("TTS service not running, synthesizing locally");
        let outcome = self.synthesize_locally(request, destination)?;
        info!("Served locally in {}ms", t0.elapsed().as_millis());
        Ok((outcome, Route::Local))
    }

    /// Slow path: load the model, synthesize, deliver. Blocking.
    fn synthesize_locally(
        &self,
        request: &SynthesisRequest,
        destination: Option<&Path>,
    ) -> Result<SynthesisOutcome, TtsError> {
        let mut synth = (self.loader)()?;
        let clip = render(&mut *synth, request)?;

        match (request.delivery(), destination) {
            (Delivery::File, Some(dest)) => deliver_to(&clip, dest),
            (delivery, _) => deliver(&clip, delivery, self.player.as_ref(), &self.artifacts),
        }
    }
}
