//! Turning a synthesized clip into a [`SynthesisOutcome`].
//!
//! Artifact ownership: a path handed back to a caller belongs to the caller
//! and is never deleted by the producer. Anything not handed back is removed
//! by the producer. Play delivery works from memory and creates no file.

use std::path::{Path, PathBuf};

use crate::audio::{keep_artifact, ArtifactStore, AudioClip};
use crate::error::TtsError;
use crate::playback::Player;
use crate::request::{Delivery, SynthesisOutcome};

/// Play the clip or write it to a kept artifact. Blocking.
pub fn deliver(
    clip: &AudioClip,
    delivery: Delivery,
    player: &dyn Player,
    artifacts: &ArtifactStore,
) -> Result<SynthesisOutcome, TtsError> {
    match delivery {
        Delivery::Play => {
            player.play(clip)?;
            Ok(SynthesisOutcome::Played)
        }
        Delivery::File => {
            let path = keep_artifact(artifacts.write(clip)?)?;
            Ok(SynthesisOutcome::Artifact(absolute(path)))
        }
    }
}

/// Write the clip straight to a caller-chosen destination. Blocking.
pub fn deliver_to(clip: &AudioClip, dest: &Path) -> Result<SynthesisOutcome, TtsError> {
    if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    clip.write_wav(dest)?;
    Ok(SynthesisOutcome::Artifact(dest.to_path_buf()))
}

fn absolute(path: PathBuf) -> PathBuf {
    std::fs::canonicalize(&path).unwrap_or(path)
}
