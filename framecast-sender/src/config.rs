//! Sender configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Top-level configuration for the sender.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SenderAppConfig {
    /// Target hub settings.
    pub target: TargetConfig,
    /// Synthetic capture settings.
    pub capture: CaptureConfig,
    /// Logging.
    pub logging: LoggingConfig,
}

/// Target hub settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    /// Hub host.
    pub host: String,
    /// Hub port.
    pub port: u16,
    /// Connect attempts before giving up.
    pub max_attempts: u32,
    /// Delay between attempts in milliseconds.
    pub retry_backoff_ms: u64,
}

/// Synthetic capture settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Frame width.
    pub width: u32,
    /// Frame height.
    pub height: u32,
    /// Frames per second.
    pub fps: u32,
}

/// Logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level.
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for SenderAppConfig {
    fn default() -> Self {
        Self {
            target: TargetConfig::default(),
            capture: CaptureConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 7440,
            max_attempts: 3,
            retry_backoff_ms: 1000,
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            fps: 15,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".into() }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl SenderAppConfig {
    /// Load from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let cfg = SenderAppConfig::default();
        let text = toml::to_string_pretty(&cfg).unwrap();
        assert!(text.contains("host"));
        assert!(text.contains("fps"));
    }

    #[test]
    fn roundtrip_config() {
        let cfg = SenderAppConfig::default();
        let text = toml::to_string_pretty(&cfg).unwrap();
        let parsed: SenderAppConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.target.port, 7440);
        assert_eq!(parsed.capture.width, 640);
    }

    #[test]
    fn partial_config_uses_defaults() {
        let parsed: SenderAppConfig = toml::from_str("[target]\nport = 9000\n").unwrap();
        assert_eq!(parsed.target.port, 9000);
        assert_eq!(parsed.target.host, "127.0.0.1");
        assert_eq!(parsed.capture.fps, 15);
    }
}
