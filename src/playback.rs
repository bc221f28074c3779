//! Audio playback capability.

use rodio::buffer::SamplesBuffer;
use rodio::{OutputStreamBuilder, Sink};
use tracing::debug;

use crate::audio::AudioClip;
use crate::error::TtsError;

/// Plays audio synchronously: `play` returns once the clip has finished.
pub trait Player: Send + Sync {
    fn play(&self, clip: &AudioClip) -> Result<(), TtsError>;
}

/// Plays through the default output device with rodio.
///
/// The output stream is opened per call, so the player itself holds no
/// device handle and can be shared across threads.
#[derive(Debug, Default, Clone, Copy)]
pub struct RodioPlayer;

impl Player for RodioPlayer {
    fn play(&self, clip: &AudioClip) -> Result<(), TtsError> {
        if clip.is_empty() {
            return Ok(());
        }

        let stream = OutputStreamBuilder::open_default_stream()
            .map_err(|e| TtsError::Playback(format!("Failed to open audio output: {e}")))?;

        // rodio 0.21: Sink::connect_new takes &Mixer
        let sink = Sink::connect_new(stream.mixer());
        sink.append(SamplesBuffer::new(1, clip.sample_rate, clip.samples.clone()));

        debug!("Playing {:.1}s of audio", clip.duration_secs());
        sink.sleep_until_end();
        Ok(())
    }
}
