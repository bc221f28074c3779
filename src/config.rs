//! Configuration management for kokoro-speaker.
//!
//! Loads config from YAML files in standard locations. Every section has
//! defaults, so an absent or partial file is fine.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::request::{DEFAULT_SPEED, DEFAULT_VOICE};

pub const DEFAULT_PORT: u16 = 7865;
pub const LOOPBACK: &str = "127.0.0.1";

const APP_DIR: &str = "kokoro-speaker";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TTSConfig {
    pub voice: String,
    pub speed: f32,
    /// Phonemizer language: `a` American English, `b` British English.
    pub lang: String,
    /// Directory holding the model files. Empty means `<data_dir>/kokoro-speaker`.
    pub model_dir: String,
    pub model_file: String,
    pub voices_file: String,
    pub tokenizer_file: String,
    pub intra_threads: usize,
}

impl Default for TTSConfig {
    fn default() -> Self {
        Self {
            voice: DEFAULT_VOICE.into(),
            speed: DEFAULT_SPEED,
            lang: "a".into(),
            model_dir: String::new(),
            model_file: "kokoro-v1.0.onnx".into(),
            voices_file: "voices-v1.0.bin".into(),
            tokenizer_file: "tokenizer.json".into(),
            intra_threads: 4,
        }
    }
}

impl TTSConfig {
    pub fn model_dir(&self) -> PathBuf {
        if self.model_dir.is_empty() {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(APP_DIR)
        } else {
            PathBuf::from(&self.model_dir)
        }
    }

    pub fn model_path(&self) -> PathBuf {
        self.model_dir().join(&self.model_file)
    }

    pub fn voices_path(&self) -> PathBuf {
        self.model_dir().join(&self.voices_file)
    }

    pub fn tokenizer_path(&self) -> PathBuf {
        self.model_dir().join(&self.tokenizer_file)
    }

    /// Model files that do not exist on disk.
    pub fn missing_model_files(&self) -> Vec<PathBuf> {
        [self.model_path(), self.voices_path(), self.tokenizer_path()]
            .into_iter()
            .filter(|p| !p.exists())
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    /// Empty means `~/.kokoro-speaker.pid`.
    pub marker_path: String,
    /// Empty means the system temp directory.
    pub artifact_dir: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            marker_path: String::new(),
            artifact_dir: String::new(),
        }
    }
}

impl ServerConfig {
    pub fn marker_path(&self) -> PathBuf {
        if self.marker_path.is_empty() {
            dirs::home_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join(".kokoro-speaker.pid")
        } else {
            PathBuf::from(&self.marker_path)
        }
    }

    pub fn artifact_dir(&self) -> PathBuf {
        if self.artifact_dir.is_empty() {
            std::env::temp_dir()
        } else {
            PathBuf::from(&self.artifact_dir)
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{LOOPBACK}:{}", self.port)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub connect_timeout_ms: u64,
    /// Upper bound for one fast-path request, synthesis included.
    pub timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 500,
            timeout_secs: 60,
        }
    }
}

impl ClientConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub tts: TTSConfig,
    pub server: ServerConfig,
    pub client: ClientConfig,
}

impl Config {
    /// Load configuration from YAML file.
    ///
    /// Searches standard locations if no path is provided:
    /// 1. ./config.yaml
    /// 2. ~/.config/kokoro-speaker/config.yaml
    /// 3. /etc/kokoro-speaker/config.yaml
    pub fn load(path: Option<&Path>) -> Self {
        let resolved = path.map(PathBuf::from).or_else(|| {
            let candidates = [
                std::env::current_dir().ok().map(|d| d.join("config.yaml")),
                dirs::home_dir().map(|h| h.join(".config").join(APP_DIR).join("config.yaml")),
                Some(PathBuf::from("/etc").join(APP_DIR).join("config.yaml")),
            ];
            candidates.into_iter().flatten().find(|p| p.exists())
        });

        let Some(config_path) = resolved else {
            info!("No config file found, using defaults");
            return Self::default();
        };

        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match Self::parse(&contents) {
                Ok(config) => {
                    info!("Loaded config from {}", config_path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {e}, using defaults", config_path.display());
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read {}: {e}, using defaults", config_path.display());
                Self::default()
            }
        }
    }

    pub fn parse(contents: &str) -> Result<Self, serde_yml::Error> {
        serde_yml::from_str(contents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_yaml_keeps_defaults() {
        let config = Config::parse("server:\n  port: 9000\ntts:\n  voice: bf_emma\n").unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.tts.voice, "bf_emma");
        assert_eq!(config.tts.speed, 1.0);
        assert_eq!(config.tts.lang, "a");
        assert_eq!(config.client.timeout_secs, 60);
        assert_eq!(config.server.base_url(), "http://127.0.0.1:9000");
    }

    #[test]
    fn model_paths_join_model_dir() {
        let tts = TTSConfig {
            model_dir: "/opt/kokoro".into(),
            ..TTSConfig::default()
        };
        assert_eq!(tts.model_path(), PathBuf::from("/opt/kokoro/kokoro-v1.0.onnx"));
        assert_eq!(tts.voices_path(), PathBuf::from("/opt/kokoro/voices-v1.0.bin"));
        assert_eq!(tts.missing_model_files().len(), 3);
    }

    #[test]
    fn unreadable_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "server: [not, a, map]").unwrap();
        let config = Config::load(Some(&path));
        assert_eq!(config.server.port, DEFAULT_PORT);
    }
}
