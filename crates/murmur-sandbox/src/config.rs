//! Sandbox configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (MURMUR_*)
//! - TOML configuration file

use anyhow::{Context, Result};
use murmur_core::{PresenceConfig, TypingConfig};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Sandbox configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// The local user.
    #[serde(default = "default_user")]
    pub user_id: String,

    /// Channels to track.
    #[serde(default = "default_channels")]
    pub channels: Vec<String>,

    /// Typing configuration.
    #[serde(default)]
    pub typing: TypingSection,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsSection,
}

/// Typing timings, in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypingSection {
    /// Entries older than this are swept.
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,

    /// Unchanged state is re-sent after this long.
    #[serde(default = "default_resend")]
    pub resend_ms: u64,

    /// Sweep period.
    #[serde(default = "default_sweep")]
    pub sweep_interval_ms: u64,

    /// Observer debounce window.
    #[serde(default = "default_debounce")]
    pub debounce_ms: u64,

    /// Upper bound on one signal send.
    #[serde(default = "default_send_timeout")]
    pub send_timeout_ms: u64,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSection {
    /// Enable metrics export.
    #[serde(default)]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    std::env::var("MURMUR_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn default_port() -> u16 {
    std::env::var("MURMUR_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080)
}

fn default_user() -> String {
    std::env::var("MURMUR_USER").unwrap_or_else(|_| "sandbox".to_string())
}

fn default_channels() -> Vec<String> {
    vec!["lobby".to_string()]
}

fn default_timeout() -> u64 {
    5_000
}

fn default_resend() -> u64 {
    3_000
}

fn default_sweep() -> u64 {
    1_000
}

fn default_debounce() -> u64 {
    1_000
}

fn default_send_timeout() -> u64 {
    5_000
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            user_id: default_user(),
            channels: default_channels(),
            typing: TypingSection::default(),
            metrics: MetricsSection::default(),
        }
    }
}

impl Default for TypingSection {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout(),
            resend_ms: default_resend(),
            sweep_interval_ms: default_sweep(),
            debounce_ms: default_debounce(),
            send_timeout_ms: default_send_timeout(),
        }
    }
}

impl Default for MetricsSection {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from file or defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        let config_paths = [
            "murmur.toml",
            "/etc/murmur/murmur.toml",
            "~/.config/murmur/murmur.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        // Fall back to defaults with environment overrides
        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid host:port {}:{}", self.host, self.port))
    }

    /// Presence settings for the reconciler.
    #[must_use]
    pub fn presence(&self) -> PresenceConfig {
        PresenceConfig::new(self.user_id.clone(), self.channels.clone())
    }

    /// Typing settings for the typing services.
    #[must_use]
    pub fn typing(&self) -> TypingConfig {
        TypingConfig {
            local_user: self.user_id.clone(),
            timeout: Duration::from_millis(self.typing.timeout_ms),
            resend: Duration::from_millis(self.typing.resend_ms),
            sweep_interval: Duration::from_millis(self.typing.sweep_interval_ms),
            debounce: Duration::from_millis(self.typing.debounce_ms),
            send_timeout: Duration::from_millis(self.typing.send_timeout_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_typing_timings() {
        let config = Config::default();
        let typing = config.typing();

        assert_eq!(typing.timeout, Duration::from_secs(5));
        assert_eq!(typing.resend, Duration::from_secs(3));
        assert!(typing.resend < typing.timeout);
        assert!(!config.metrics.enabled);
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            host = "0.0.0.0"
            port = 9000
            user_id = "alice"
            channels = ["lobby", "random"]

            [typing]
            timeout_ms = 8000
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert_eq!(config.presence().channels, vec!["lobby", "random"]);
        assert_eq!(config.presence().local_user, "alice");
        assert_eq!(config.typing().timeout, Duration::from_secs(8));
        assert_eq!(config.typing().resend, Duration::from_secs(3));
    }

    #[test]
    fn test_config_bind_addr() {
        let mut config = Config::default();
        config.host = "127.0.0.1".into();
        config.port = 7070;
        assert_eq!(config.bind_addr().unwrap().port(), 7070);

        config.host = "not a host".into();
        assert!(config.bind_addr().is_err());
    }
}
