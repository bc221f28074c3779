//! kokoro-speaker: resident Kokoro text-to-speech service.
//!
//! The service (`kokoro-speaker-server`) loads the model once and serves
//! `/speak` over loopback HTTP. The `tts` client uses it when it is running
//! and otherwise loads the model in-process.

pub mod audio;
pub mod client;
pub mod config;
pub mod delivery;
pub mod error;
pub mod lifecycle;
pub mod playback;
pub mod request;
pub mod server;
pub mod synth;

pub use error::TtsError;
pub use request::{Delivery, SynthesisOutcome, SynthesisRequest};
