//! Error type shared by the service, the dispatcher and the synthesizer.

#[derive(thiserror::Error, Debug)]
pub enum TtsError {
    #[error("Missing text")]
    EmptyText,
    #[error("Invalid speed: {0}")]
    InvalidSpeed(String),
    #[error("Voice not found: {0}")]
    VoiceNotFound(String),
    #[error("Failed to load TTS model: {0}")]
    Load(String),
    #[error("Synthesis failed: {0}")]
    Synthesis(String),
    #[error("No audio generated")]
    NoAudio,
    #[error("Playback failed: {0}")]
    Playback(String),
    #[error("TTS service returned {status}: {message}")]
    Service { status: u16, message: String },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl TtsError {
    /// True for errors caused by the request itself. These fail the same way
    /// everywhere, so they are never retried through another path.
    pub fn is_invalid_request(&self) -> bool {
        match self {
            Self::EmptyText | Self::InvalidSpeed(_) => true,
            Self::Service { status, .. } => (400..500).contains(status),
            _ => false,
        }
    }
}
