//! Audio buffers and WAV artifacts.
//!
//! Both the service and the local fallback write 16-bit PCM mono WAV, so an
//! artifact looks the same whichever path produced it.

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempPath;
use tracing::{debug, warn};

use crate::error::TtsError;

/// Raw synthesized audio.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioClip {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Write the clip as a 16-bit PCM mono WAV file.
    pub fn write_wav(&self, path: &Path) -> Result<(), TtsError> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut writer = hound::WavWriter::create(path, spec)?;
        for &sample in &self.samples {
            // f32 [-1, 1] → i16
            let s = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer.write_sample(s)?;
        }
        writer.finalize()?;

        debug!(
            "Wrote {:.1}s of audio to {}",
            self.duration_secs(),
            path.display()
        );
        Ok(())
    }
}

/// Directory where temporary WAV artifacts are created.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store rooted at the system temp directory.
    pub fn system_temp() -> Self {
        Self::new(std::env::temp_dir())
    }

    /// Write `clip` to a fresh `kokoro-*.wav` file.
    ///
    /// The returned [`TempPath`] deletes the file when dropped; call
    /// [`TempPath::keep`] (or [`keep_artifact`]) to hand it to a caller.
    pub fn write(&self, clip: &AudioClip) -> Result<TempPath, TtsError> {
        fs::create_dir_all(&self.dir)?;
        let path = tempfile::Builder::new()
            .prefix("kokoro-")
            .suffix(".wav")
            .tempfile_in(&self.dir)?
            .into_temp_path();
        clip.write_wav(&path)?;
        Ok(path)
    }
}

/// Release a temp artifact so it outlives this process. Ownership moves to
/// whoever receives the returned path.
pub fn keep_artifact(path: TempPath) -> Result<PathBuf, TtsError> {
    path.keep().map_err(|e| TtsError::Io(e.error))
}

/// Move an artifact to `dest`, copying when a rename is not possible
/// (e.g. across filesystems).
pub fn move_artifact(src: &Path, dest: &Path) -> Result<(), TtsError> {
    if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    if fs::rename(src, dest).is_ok() {
        return Ok(());
    }

    fs::copy(src, dest)?;
    if let Err(e) = fs::remove_file(src) {
        warn!("Failed to remove {} after copy: {e}", src.display());
    }
    Ok(())
}
