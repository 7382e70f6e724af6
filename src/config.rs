//! Configuration Module
//!
//! This module defines all configuration structures for the relay.
//! Configuration is loaded from TOML files and parsed using serde.

use crate::error::RelayError;
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable that overrides `sftp.password`
pub const PASSWORD_ENV: &str = "SFTP_RELAY_PASSWORD";

/// Main configuration structure
///
/// Contains all configuration sections for the relay.
/// Loaded from a TOML file (e.g., config/default.toml).
///
/// # Example TOML
/// ```toml
/// [batch]
/// batch_size = 100
///
/// [sftp]
/// host = "sftp.example.com"
/// port = 22
/// username = "relay"
/// private_key_path = "/etc/relay/id_ed25519"
///
/// [upload]
/// remote_directory = "/upload"
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    pub sftp: SftpConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Batch partitioning configuration
///
/// # Fields
/// - `batch_size`: Maximum number of messages sharing one session (must be > 0)
#[derive(Debug, Clone, Deserialize)]
pub struct BatchConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
        }
    }
}

/// Which transport the binary drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    #[default]
    Sftp,
    /// Dry run: files are kept in process memory
    Memory,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransportConfig {
    #[serde(default)]
    pub kind: TransportKind,
}

/// Remote endpoint configuration
///
/// Settings for the SFTP server every batch session connects to.
/// Exactly one of `password` or `private_key_path` must be set; the
/// password may also come from the `SFTP_RELAY_PASSWORD` environment variable.
#[derive(Debug, Clone, Deserialize)]
pub struct SftpConfig {
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: Option<Secret>,
    #[serde(default)]
    pub private_key_path: Option<PathBuf>,
    #[serde(default)]
    pub private_key_passphrase: Option<Secret>,
    /// Pinned host key fingerprint, OpenSSH style (`SHA256:<base64>`)
    #[serde(default)]
    pub host_key_sha256: Option<String>,
    #[serde(default)]
    pub connect_timeout_ms: Option<u64>,
    #[serde(default)]
    pub transfer_timeout_ms: Option<u64>,
}

impl Default for SftpConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_port(),
            username: String::new(),
            password: None,
            private_key_path: None,
            private_key_passphrase: None,
            host_key_sha256: None,
            connect_timeout_ms: None,
            transfer_timeout_ms: None,
        }
    }
}

/// How a session authenticates
#[derive(Debug, Clone)]
pub enum Credential {
    Password(Secret),
    PrivateKey {
        path: PathBuf,
        passphrase: Option<Secret>,
    },
}

impl SftpConfig {
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }

    pub fn transfer_timeout(&self) -> Option<Duration> {
        self.transfer_timeout_ms.map(Duration::from_millis)
    }

    /// Resolve the configured credential, preferring a private key
    pub fn credential(&self) -> Result<Credential, RelayError> {
        match (&self.private_key_path, &self.password) {
            (Some(path), _) => Ok(Credential::PrivateKey {
                path: path.clone(),
                passphrase: self.private_key_passphrase.clone(),
            }),
            (None, Some(password)) => Ok(Credential::Password(password.clone())),
            (None, None) => Err(RelayError::invalid_config(
                "sftp: either password or private_key_path must be set",
            )),
        }
    }

    pub fn validate(&self) -> Result<(), RelayError> {
        if self.host.trim().is_empty() {
            return Err(RelayError::invalid_config("sftp.host is required"));
        }
        if self.port == 0 {
            return Err(RelayError::invalid_config("sftp.port must be > 0"));
        }
        if self.username.trim().is_empty() {
            return Err(RelayError::invalid_config("sftp.username is required"));
        }
        self.credential()?;
        Ok(())
    }
}

/// Destination layout for uploaded files
///
/// # Fields
/// - `remote_directory`: Directory on the server receiving the files
/// - `file_name_template`: File name pattern, `{message_id}` is substituted
/// - `atomic_rename`: Write to a staging name first, then rename into place
#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    #[serde(default = "default_remote_directory")]
    pub remote_directory: String,
    #[serde(default = "default_file_name_template")]
    pub file_name_template: String,
    #[serde(default = "default_atomic_rename")]
    pub atomic_rename: bool,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            remote_directory: default_remote_directory(),
            file_name_template: default_file_name_template(),
            atomic_rename: default_atomic_rename(),
        }
    }
}

impl UploadConfig {
    pub fn validate(&self) -> Result<(), RelayError> {
        if self.remote_directory.trim().is_empty() {
            return Err(RelayError::invalid_config("upload.remote_directory is required"));
        }
        if !self.file_name_template.contains("{message_id}") {
            return Err(RelayError::invalid_config(
                "upload.file_name_template must contain {message_id}",
            ));
        }
        if self.file_name_template.contains('/') {
            return Err(RelayError::invalid_config(
                "upload.file_name_template must not contain '/'",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is not set
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// String that never shows up in `Debug` output
#[derive(Clone, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

fn default_batch_size() -> usize {
    100
}

fn default_port() -> u16 {
    22
}

fn default_remote_directory() -> String {
    "/upload".to_string()
}

fn default_file_name_template() -> String {
    "{message_id}.txt".to_string()
}

fn default_atomic_rename() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// The `SFTP_RELAY_PASSWORD` environment variable, when set, replaces
    /// any password in the file. The result is validated before returning.
    ///
    /// # Example
    /// ```no_run
    /// let config = sftp_relay::Config::load("config/default.toml")?;
    /// # Ok::<(), anyhow::Error>(())
    /// ```
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let mut config = Self::from_toml(&content)?;

        if let Ok(password) = std::env::var(PASSWORD_ENV) {
            config.sftp.password = Some(Secret::new(password));
        }

        config.validate()?;
        Ok(config)
    }

    /// Parse without touching the environment or validating
    pub fn from_toml(content: &str) -> Result<Self, RelayError> {
        Ok(toml::from_str(content)?)
    }

    pub fn validate(&self) -> Result<(), RelayError> {
        if self.batch.batch_size == 0 {
            return Err(RelayError::invalid_config("batch.batch_size must be > 0"));
        }
        if self.transport.kind == TransportKind::Sftp {
            self.sftp.validate()?;
        }
        self.upload.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
        [batch]
        batch_size = 25

        [sftp]
        host = "sftp.internal"
        port = 2222
        username = "relay"
        password = "hunter2"
        transfer_timeout_ms = 5000

        [upload]
        remote_directory = "/inbound"
    "#;

    #[test]
    fn parses_full_config() {
        let config = Config::from_toml(FULL).unwrap();
        assert_eq!(config.batch.batch_size, 25);
        assert_eq!(config.sftp.endpoint(), "sftp.internal:2222");
        assert_eq!(config.sftp.transfer_timeout(), Some(Duration::from_millis(5000)));
        assert_eq!(config.upload.remote_directory, "/inbound");
        assert!(config.upload.atomic_rename);
        assert_eq!(config.transport.kind, TransportKind::Sftp);
        config.validate().unwrap();
    }

    #[test]
    fn applies_defaults() {
        let config = Config::from_toml(
            r#"
            [sftp]
            host = "h"
            username = "u"
            password = "p"
            "#,
        )
        .unwrap();
        assert_eq!(config.batch.batch_size, 100);
        assert_eq!(config.sftp.port, 22);
        assert_eq!(config.upload.remote_directory, "/upload");
        assert_eq!(config.upload.file_name_template, "{message_id}.txt");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn rejects_zero_batch_size() {
        let mut config = Config::from_toml(FULL).unwrap();
        config.batch.batch_size = 0;
        assert!(matches!(
            config.validate(),
            Err(RelayError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn rejects_missing_credentials() {
        let mut config = Config::from_toml(FULL).unwrap();
        config.sftp.password = None;
        assert!(matches!(
            config.validate(),
            Err(RelayError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn rejects_missing_host() {
        let mut config = Config::from_toml(FULL).unwrap();
        config.sftp.host = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn memory_transport_skips_sftp_checks() {
        let config = Config::from_toml(
            r#"
            [transport]
            kind = "memory"

            [sftp]
            "#,
        )
        .unwrap();
        assert_eq!(config.transport.kind, TransportKind::Memory);
        config.validate().unwrap();
    }

    #[test]
    fn private_key_takes_precedence() {
        let mut config = Config::from_toml(FULL).unwrap();
        config.sftp.private_key_path = Some(PathBuf::from("/keys/id"));
        assert!(matches!(
            config.sftp.credential().unwrap(),
            Credential::PrivateKey { .. }
        ));
    }

    #[test]
    fn password_is_redacted_in_debug_output() {
        let config = Config::from_toml(FULL).unwrap();
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("Secret(***)"));
    }

    #[test]
    fn template_must_reference_message_id() {
        let mut config = Config::from_toml(FULL).unwrap();
        config.upload.file_name_template = "static.txt".to_string();
        assert!(config.validate().is_err());
    }
}
