//! Kokoro TTS engine: text → phonemes → ONNX inference → f32 audio.
//!
//! Pipeline:
//! 1. Text → sentences (split on .!?)
//! 2. Sentence → phonemes (misaki-rs G2P)
//! 3. Phonemes → token IDs (tokenizer.json vocabulary)
//! 4. Token IDs + voice style + speed → ONNX inference → f32 audio (24kHz)
//! 5. Sentence audio concatenated into one clip

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Instant;

use ndarray::{Array2, Array3};
use ndarray_npy::NpzReader;
use ort::value::Tensor;
use tracing::{debug, info};

use super::SpeechSynthesizer;
use crate::audio::AudioClip;
use crate::config::TTSConfig;
use crate::error::TtsError;

pub const SAMPLE_RATE: u32 = 24000;
const MAX_TOKENS: usize = 510; // Voice style array first dimension
const STYLE_DIM: usize = 256;

/// Loaded voice style data: shape (510, 256) f32, indexed by token count.
struct VoiceData {
    styles: Array2<f32>,
}

/// Native Kokoro synthesizer. Construct with [`KokoroSynthesizer::load`].
pub struct KokoroSynthesizer {
    session: ort::session::Session,
    phonemizer: misaki_rs::G2P,
    vocab: HashMap<char, i64>,
    voices: HashMap<String, VoiceData>,
}

impl KokoroSynthesizer {
    /// Load the tokenizer, voices, ONNX model and phonemizer.
    /// Blocking and slow; call from a blocking context.
    pub fn load(config: &TTSConfig) -> Result<Self, TtsError> {
        let t0 = Instant::now();
        let language = g2p_language(&config.lang)?;

        let tokenizer_path = config.tokenizer_path();
        info!("Loading tokenizer from {}", tokenizer_path.display());
        let vocab = load_tokenizer(&tokenizer_path)?;
        info!("Tokenizer loaded: {} tokens", vocab.len());

        let voices_path = config.voices_path();
        info!("Loading voices from {}", voices_path.display());
        let voices = load_voices(&voices_path)?;
        info!("Loaded {} voices", voices.len());

        let model_path = config.model_path();
        info!("Loading ONNX model from {}", model_path.display());
        let session = ort::session::Session::builder()
            .map_err(|e| TtsError::Load(format!("Failed to create ONNX session builder: {e}")))?
            .with_optimization_level(ort::session::builder::GraphOptimizationLevel::Level3)
            .map_err(|e| TtsError::Load(format!("Failed to set optimization level: {e}")))?
            .with_intra_threads(config.intra_threads)
            .map_err(|e| TtsError::Load(format!("Failed to set thread count: {e}")))?
            .commit_from_file(&model_path)
            .map_err(|e| TtsError::Load(format!("Failed to load ONNX model: {e}")))?;

        info!("Initializing misaki-rs phonemizer ({})...", config.lang);
        let phonemizer = misaki_rs::G2P::new(language);

        info!("Kokoro TTS loaded in {}ms", t0.elapsed().as_millis());

        Ok(Self {
            session,
            phonemizer,
            vocab,
            voices,
        })
    }

    /// Generate audio samples for a single sentence.
    fn generate_sentence(&mut self, text: &str, voice: &str, speed: f32) -> Result<Vec<f32>, TtsError> {
        // 1. Text → phonemes via misaki-rs G2P
        let (phonemes, _tokens) = self
            .phonemizer
            .g2p(text)
            .map_err(|e| TtsError::Synthesis(format!("Phonemization failed: {e}")))?;

        if phonemes.is_empty() {
            return Ok(Vec::new());
        }

        // 2. Phonemes → token IDs, padded with 0 on both ends
        let token_ids = tokenize(&self.vocab, &phonemes);
        let n_tokens = token_ids.len();

        // 3. Voice style vector for this token count
        let voice_data = self
            .voices
            .get(voice)
            .ok_or_else(|| TtsError::VoiceNotFound(voice.to_string()))?;
        let style_idx = n_tokens.saturating_sub(2).min(voice_data.styles.nrows() - 1);
        let style_vec: Vec<f32> = voice_data.styles.row(style_idx).to_vec();

        // 4. ONNX input tensors
        let tokens_array = Array2::from_shape_vec((1, n_tokens), token_ids)
            .map_err(|e| TtsError::Synthesis(format!("Failed to create tokens tensor: {e}")))?;
        let tokens_tensor = Tensor::from_array(tokens_array)
            .map_err(|e| TtsError::Synthesis(format!("Failed to create tokens ort tensor: {e}")))?;

        let style_array = Array2::from_shape_vec((1, STYLE_DIM), style_vec)
            .map_err(|e| TtsError::Synthesis(format!("Failed to create style tensor: {e}")))?;
        let style_tensor = Tensor::from_array(style_array)
            .map_err(|e| TtsError::Synthesis(format!("Failed to create style ort tensor: {e}")))?;

        let speed_array = ndarray::Array1::from_vec(vec![speed]);
        let speed_tensor = Tensor::from_array(speed_array)
            .map_err(|e| TtsError::Synthesis(format!("Failed to create speed ort tensor: {e}")))?;

        // 5. Inference
        let outputs = self
            .session
            .run(ort::inputs![
                "tokens" => tokens_tensor,
                "style" => style_tensor,
                "speed" => speed_tensor
            ])
            .map_err(|e| TtsError::Synthesis(format!("ONNX inference failed: {e}")))?;

        // 6. First output is the waveform
        let first_output = outputs
            .iter()
            .next()
            .ok_or_else(|| TtsError::Synthesis("No output tensor from model".into()))?;

        let (_shape, audio_slice) = first_output
            .1
            .try_extract_tensor::<f32>()
            .map_err(|e| TtsError::Synthesis(format!("Failed to extract audio tensor: {e}")))?;

        let samples: Vec<f32> = audio_slice.to_vec();
        debug!(
            "Generated {} samples ({:.1}s)",
            samples.len(),
            samples.len() as f32 / SAMPLE_RATE as f32
        );

        Ok(samples)
    }
}

impl SpeechSynthesizer for KokoroSynthesizer {
    fn synthesize(&mut self, text: &str, voice: &str, speed: f32) -> Result<AudioClip, TtsError> {
        if !self.voices.contains_key(voice) {
            return Err(TtsError::VoiceNotFound(voice.to_string()));
        }

        let t0 = Instant::now();
        let sentences = split_sentences(text.trim());
        let mut samples = Vec::new();

        for (i, sentence) in sentences.iter().enumerate() {
            let chunk = self.generate_sentence(sentence, voice, speed)?;
            debug!("Sentence {}/{}: {} samples", i + 1, sentences.len(), chunk.len());
            samples.extend(chunk);
        }

        info!(
            "Synthesized {} sentences with {voice} in {}ms",
            sentences.len(),
            t0.elapsed().as_millis()
        );
        Ok(AudioClip::new(samples, SAMPLE_RATE))
    }

    fn voices(&self) -> Vec<String> {
        let mut names: Vec<String> = self.voices.keys().cloned().collect();
        names.sort();
        names
    }
}

// --- Helper functions ---

/// Map a language code (`a`/`b`, or `en-us`/`en-gb`) to the G2P language.
pub fn g2p_language(code: &str) -> Result<misaki_rs::Language, TtsError> {
    match code.trim().to_ascii_lowercase().as_str() {
        "a" | "en-us" => Ok(misaki_rs::Language::EnglishUS),
        "b" | "en-gb" => Ok(misaki_rs::Language::EnglishGB),
        other => Err(TtsError::Load(format!(
            "Unsupported language code '{other}' (use a=American English, b=British English)"
        ))),
    }
}

/// Map phonemes to token IDs, skipping unknown characters, padded with 0 on
/// both ends and capped at the style table length.
fn tokenize(vocab: &HashMap<char, i64>, phonemes: &str) -> Vec<i64> {
    let mut token_ids: Vec<i64> = Vec::with_capacity(phonemes.len() + 2);
    token_ids.push(0);
    token_ids.extend(phonemes.chars().filter_map(|ch| vocab.get(&ch).copied()));
    token_ids.push(0);
    token_ids.truncate(MAX_TOKENS);
    token_ids
}

/// Load tokenizer vocabulary from tokenizer.json.
fn load_tokenizer(path: &Path) -> Result<HashMap<char, i64>, TtsError> {
    let contents = fs::read_to_string(path)
        .map_err(|e| TtsError::Load(format!("Failed to read tokenizer {}: {e}", path.display())))?;
    parse_tokenizer(&contents)
}

fn parse_tokenizer(contents: &str) -> Result<HashMap<char, i64>, TtsError> {
    let data: serde_json::Value = serde_json::from_str(contents)
        .map_err(|e| TtsError::Load(format!("Failed to parse tokenizer JSON: {e}")))?;

    let vocab = data["model"]["vocab"]
        .as_object()
        .ok_or_else(|| TtsError::Load("Missing model.vocab in tokenizer.json".into()))?;

    let mut map = HashMap::new();
    for (token, id) in vocab {
        let id = id
            .as_i64()
            .ok_or_else(|| TtsError::Load(format!("Token ID for {token:?} is not an integer")))?;
        // Each token should be a single character
        if let Some(ch) = token.chars().next() {
            map.insert(ch, id);
        }
    }

    Ok(map)
}

/// Load all voice styles from an NPZ file.
fn load_voices(path: &Path) -> Result<HashMap<String, VoiceData>, TtsError> {
    let file = fs::File::open(path)
        .map_err(|e| TtsError::Load(format!("Failed to open voices file {}: {e}", path.display())))?;

    let mut npz = NpzReader::new(file)
        .map_err(|e| TtsError::Load(format!("Failed to read NPZ voices file: {e}")))?;

    let names: Vec<String> = npz
        .names()
        .map_err(|e| TtsError::Load(format!("Failed to list NPZ entries: {e}")))?
        .into_iter()
        .map(|n| n.trim_end_matches(".npy").to_string())
        .collect();

    let mut voices = HashMap::new();
    for name in names {
        let arr: Array3<f32> = npz
            .by_name(&format!("{name}.npy"))
            .map_err(|e| TtsError::Load(format!("Failed to read voice '{name}': {e}")))?;

        // Shape is (510, 1, 256). Squeeze the middle dimension.
        let dim0 = arr.shape()[0];
        let dim2 = arr.shape()[2];
        if dim0 == 0 || dim2 != STYLE_DIM {
            return Err(TtsError::Load(format!(
                "Voice '{name}' has unexpected shape {:?}",
                arr.shape()
            )));
        }
        let styles = arr
            .into_shape_with_order((dim0, dim2))
            .map_err(|e| TtsError::Load(format!("Failed to reshape voice '{name}': {e}")))?;

        voices.insert(name, VoiceData { styles });
    }

    Ok(voices)
}

/// Split text into sentences at .!? boundaries.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let bytes = text.as_bytes();

    for (i, &b) in bytes.iter().enumerate() {
        if (b == b'.' || b == b'!' || b == b'?')
            && i + 1 < bytes.len()
            && bytes[i + 1].is_ascii_whitespace()
        {
            let end = i + 1;
            let s = text[start..end].trim();
            if !s.is_empty() {
                sentences.push(s);
            }
            start = end;
        }
    }

    let s = text[start..].trim();
    if !s.is_empty() {
        sentences.push(s);
    }

    sentences
}
