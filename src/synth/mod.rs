//! Speech synthesis capability.
//!
//! - `kokoro`: Kokoro-82M ONNX inference with misaki-rs phonemization

pub mod kokoro;

use std::sync::{Arc, Mutex, PoisonError};

use crate::audio::AudioClip;
use crate::error::TtsError;
use crate::request::SynthesisRequest;

/// Text-to-speech engine. Loading is slow; once loaded, calls are fast.
///
/// Implementations are not assumed to be reentrant, hence `&mut self`.
pub trait SpeechSynthesizer: Send {
    fn synthesize(&mut self, text: &str, voice: &str, speed: f32) -> Result<AudioClip, TtsError>;

    /// Voice identifiers this engine accepts.
    fn voices(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Synthesizer shared between concurrent request handlers. Every call goes
/// through the one mutex.
pub type SharedSynthesizer = Arc<Mutex<Box<dyn SpeechSynthesizer>>>;

pub fn shared(synth: Box<dyn SpeechSynthesizer>) -> SharedSynthesizer {
    Arc::new(Mutex::new(synth))
}

/// Run a validated request through the synthesizer. Empty output is an error.
pub fn render(
    synth: &mut dyn SpeechSynthesizer,
    request: &SynthesisRequest,
) -> Result<AudioClip, TtsError> {
    let clip = synth.synthesize(request.text(), request.voice(), request.speed())?;
    if clip.is_empty() {
        return Err(TtsError::NoAudio);
    }
    Ok(clip)
}

/// [`render`] under the shared lock. Blocking; call from a blocking task.
pub fn render_shared(
    synth: &SharedSynthesizer,
    request: &SynthesisRequest,
) -> Result<AudioClip, TtsError> {
    let mut guard = synth.lock().unwrap_or_else(PoisonError::into_inner);
    render(&mut **guard, request)
}


#[cfg(test)]
mod tests {
    use super::testing::FakeSynth;
    use super::*;
    use crate::request::Delivery;

    struct Silent;

    impl SpeechSynthesizer for Silent {
        fn synthesize(&mut self, _: &str, _: &str, _: f32) -> Result<AudioClip, TtsError> {
            Ok(AudioClip::new(Vec::new(), 24000))
        }
    }

    #[test]
    fn render_rejects_empty_output() {
        let req = SynthesisRequest::new("hi", None, None, Delivery::Play).unwrap();
        let err = render(&mut Silent, &req).unwrap_err();
        assert!(matches!(err, TtsError::NoAudio));
    }

    #[test]
    fn render_shared_passes_request_fields() {
        let fake = FakeSynth::new();
        let synth = shared(Box::new(fake.clone()));
        let req = SynthesisRequest::new("Hello world", Some("bf_emma".into()), Some(2.0), Delivery::File).unwrap();

        let clip = render_shared(&synth, &req).unwrap();

        assert_eq!(clip.sample_rate, 24000);
        assert_eq!(clip.samples.len(), (11.0 * 240.0 / 2.0) as usize);
        assert_eq!(fake.call_count(), 1);
    }
}
