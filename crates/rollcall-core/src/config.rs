use crate::cooldown::MAX_COOLDOWN_SECS;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Names the optional TOML config file.
pub const CONFIG_ENV: &str = "ROLLCALL_CONFIG";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid setting {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Runtime configuration.
///
/// Layered as: built-in defaults, then the TOML file named by
/// `ROLLCALL_CONFIG` (if set), then `ROLLCALL_*` environment variables.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Directory of reference images, one per identity.
    pub enrollment_dir: PathBuf,
    /// Directory receiving the per-day attendance CSV files.
    pub ledger_dir: PathBuf,
    /// Minimum gap between two records for the same identity.
    pub cooldown_seconds: u64,
    /// Maximum Euclidean distance for a face to count as a match.
    pub match_tolerance: f32,
    /// V4L2 device path.
    pub camera_device: String,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Frames to discard after opening the camera (AGC/AE settling).
    pub warmup_frames: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enrollment_dir: PathBuf::from("knownFaces"),
            ledger_dir: PathBuf::from("attendance_logs"),
            cooldown_seconds: 10,
            // ~0.40 cosine similarity for L2-normalised ArcFace embeddings.
            match_tolerance: 1.10,
            camera_device: "/dev/video0".to_string(),
            model_dir: default_model_dir(),
            warmup_frames: 4,
        }
    }
}

impl Config {
    /// Load from the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with(|key| std::env::var(key).ok())
    }

    /// Load using `lookup` in place of the process environment.
    pub fn load_with<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match lookup(CONFIG_ENV) {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        config.apply_env(&lookup);
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply `ROLLCALL_*` overrides. Unparseable numbers keep the current value.
    fn apply_env<F>(&mut self, lookup: &F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("ROLLCALL_ENROLLMENT_DIR") {
            self.enrollment_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("ROLLCALL_LEDGER_DIR") {
            self.ledger_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("ROLLCALL_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        if let Some(v) = lookup("ROLLCALL_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        self.cooldown_seconds = parsed(lookup, "ROLLCALL_COOLDOWN_SECONDS", self.cooldown_seconds);
        self.match_tolerance = parsed(lookup, "ROLLCALL_MATCH_TOLERANCE", self.match_tolerance);
        self.warmup_frames = parsed(lookup, "ROLLCALL_WARMUP_FRAMES", self.warmup_frames);
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !self.match_tolerance.is_finite() || self.match_tolerance < 0.0 {
            return Err(ConfigError::Invalid {
                key: "match_tolerance",
                reason: format!("must be a non-negative number, got {}", self.match_tolerance),
            });
        }
        if self.cooldown_seconds > MAX_COOLDOWN_SECS {
            return Err(ConfigError::Invalid {
                key: "cooldown_seconds",
                reason: format!(
                    "must be at most {MAX_COOLDOWN_SECS}, got {}",
                    self.cooldown_seconds
                ),
            });
        }
        Ok(())
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> PathBuf {
        self.model_dir.join("det_10g.onnx")
    }

    /// Path to the ArcFace recognition model.
    pub fn arcface_model_path(&self) -> PathBuf {
        self.model_dir.join("w600k_r50.onnx")
    }
}

/// `$XDG_DATA_HOME/rollcall/models`, falling back to `~/.local/share`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall/models")
}

fn parsed<F, T>(lookup: &F, key: &str, current: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "ignoring unparseable setting");
            current
        }),
        None => current,
    }
}
