//! Synthesis request and outcome types.

use std::path::PathBuf;

use crate::error::TtsError;

pub const DEFAULT_VOICE: &str = "af_heart";
pub const DEFAULT_SPEED: f32 = 1.0;

/// Body token returned by the service when audio was played.
pub const PLAYED_TOKEN: &str = "ok";

/// What to do with synthesized audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Play through the local audio output.
    Play,
    /// Produce a WAV artifact and hand its path to the caller.
    File,
}

impl Delivery {
    pub fn from_play_flag(play: bool) -> Self {
        if play {
            Self::Play
        } else {
            Self::File
        }
    }

    pub fn is_play(self) -> bool {
        self == Self::Play
    }
}

/// A validated synthesis request. Only constructible through [`SynthesisRequest::new`].
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisRequest {
    text: String,
    voice: String,
    speed: f32,
    delivery: Delivery,
}

impl SynthesisRequest {
    pub fn new(
        text: impl Into<String>,
        voice: Option<String>,
        speed: Option<f32>,
        delivery: Delivery,
    ) -> Result<Self, TtsError> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(TtsError::EmptyText);
        }

        let speed = speed.unwrap_or(DEFAULT_SPEED);
        if !speed.is_finite() || speed <= 0.0 {
            return Err(TtsError::InvalidSpeed(speed.to_string()));
        }

        // "default" is an alias, not a voice pack name.
        let voice = voice
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("default"))
            .unwrap_or_else(|| DEFAULT_VOICE.to_string());

        Ok(Self {
            text,
            voice,
            speed,
            delivery,
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn voice(&self) -> &str {
        &self.voice
    }

    pub fn speed(&self) -> f32 {
        self.speed
    }

    pub fn delivery(&self) -> Delivery {
        self.delivery
    }

    /// Short single-line preview for log lines.
    pub fn preview(&self) -> String {
        let preview: String = self.text.chars().take(80).collect();
        let ellipsis = if self.text.chars().count() > 80 { "..." } else { "" };
        format!("{}{ellipsis}", preview.replace('\n', " "))
    }
}

/// Successful result of a synthesis request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SynthesisOutcome {
    Played,
    /// WAV file now owned by the receiver.
    Artifact(PathBuf),
}

/// Parse a speed value from its text form (query string, CLI).
pub fn parse_speed(raw: &str) -> Result<f32, TtsError> {
    raw.trim()
        .parse::<f32>()
        .map_err(|_| TtsError::InvalidSpeed(raw.to_string()))
}
