//! Configuration management
//!
//! This module provides YAML-based configuration management with support for:
//! - Environment variable overrides
//! - Multiple configuration file locations
//! - Default values for all settings
//! - Managed identity definitions

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;

use crate::models::{Subject, TLS_CERT_FILE, TLS_KEY_FILE};
use crate::services::jitter::JitterPolicy;
use crate::utils::validation::{validate_name, validate_name_prefix, validate_payload_key};

/// Minimum validity a signer accepts for a requested certificate
pub const MIN_EXPIRATION_SECONDS: u32 = 3600;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub authority: Option<AuthorityConfig>,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub rotation: RotationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Identities whose client certificates are managed
    #[serde(default)]
    pub identities: Vec<IdentityConfig>,
}

/// CSR authority SSL configuration (nested format)
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct AuthoritySslConfig {
    /// Path to client certificate
    #[serde(alias = "cert_path")]
    pub cert_path: Option<PathBuf>,
    /// Path to client private key
    #[serde(alias = "key_path")]
    pub key_path: Option<PathBuf>,
    /// Path to CA certificate
    #[serde(alias = "ca_path")]
    pub ca_path: Option<PathBuf>,
    /// Verify SSL certificates
    #[serde(default = "default_ssl_verify")]
    pub verify: bool,
}

/// CSR authority connection configuration
/// Supports both flat format (ssl_cert, ssl_key, ssl_ca) and nested format (ssl.cert_path, etc.)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthorityConfig {
    pub url: String,
    /// Timeout in seconds (supports both timeout_secs and timeout field names)
    #[serde(default = "default_timeout", alias = "timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_ssl_verify")]
    pub ssl_verify: bool,
    /// Flat format: ssl_cert path
    pub ssl_cert: Option<PathBuf>,
    /// Flat format: ssl_key path
    pub ssl_key: Option<PathBuf>,
    /// Flat format: ssl_ca path
    pub ssl_ca: Option<PathBuf>,
    /// Nested format: ssl configuration block
    #[serde(default)]
    pub ssl: Option<AuthoritySslConfig>,
}

impl AuthorityConfig {
    /// Get the effective SSL cert path (checks nested config first, then flat)
    pub fn effective_ssl_cert(&self) -> Option<&PathBuf> {
        self.ssl
            .as_ref()
            .and_then(|s| s.cert_path.as_ref())
            .or(self.ssl_cert.as_ref())
    }

    /// Get the effective SSL key path (checks nested config first, then flat)
    pub fn effective_ssl_key(&self) -> Option<&PathBuf> {
        self.ssl
            .as_ref()
            .and_then(|s| s.key_path.as_ref())
            .or(self.ssl_key.as_ref())
    }

    /// Get the effective SSL CA path (checks nested config first, then flat)
    pub fn effective_ssl_ca(&self) -> Option<&PathBuf> {
        self.ssl
            .as_ref()
            .and_then(|s| s.ca_path.as_ref())
            .or(self.ssl_ca.as_ref())
    }

    /// Get the effective SSL verify setting (checks nested config first, then flat)
    pub fn effective_ssl_verify(&self) -> bool {
        self.ssl.as_ref().map(|s| s.verify).unwrap_or(self.ssl_verify)
    }
}

fn default_timeout() -> u64 {
    30
}

fn default_ssl_verify() -> bool {
    true
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
        }
    }
}

fn default_database_url() -> String {
    "sqlite://./data/certrotate.db?mode=rwc".to_string()
}

fn default_max_connections() -> u32 {
    5
}

/// Rotation policy configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RotationConfig {
    /// Rotate once less than this fraction of the lifetime remains (before jitter)
    #[serde(default = "default_base_percentage")]
    pub base_percentage: f64,
    /// Spread of the jittered threshold as a fraction of `base_percentage`
    #[serde(default = "default_spread_factor")]
    pub spread_factor: f64,
    /// Interval between level-triggered reconciliation passes
    #[serde(default = "default_resync_interval")]
    pub resync_interval_secs: u64,
    /// Deadline for each store or authority call
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,
    /// Cap on new signing requests per hour across all identities
    #[serde(default)]
    pub max_requests_per_hour: Option<u32>,
    /// Interval between polls while a signing request is outstanding
    #[serde(default = "default_pending_poll_interval")]
    pub pending_poll_interval_secs: u64,
    /// How long a single `--once` run waits for outstanding requests
    #[serde(default = "default_once_timeout")]
    pub once_timeout_secs: u64,
}

impl RotationConfig {
    pub fn jitter_policy(&self) -> JitterPolicy {
        JitterPolicy::new(self.base_percentage, self.spread_factor)
    }

    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_secs)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    /// Poll interval while a request is outstanding, never longer than the resync interval
    pub fn pending_poll_interval(&self) -> Duration {
        Duration::from_secs(self.pending_poll_interval_secs.min(self.resync_interval_secs))
    }

    pub fn once_timeout(&self) -> Duration {
        Duration::from_secs(self.once_timeout_secs)
    }
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            base_percentage: default_base_percentage(),
            spread_factor: default_spread_factor(),
            resync_interval_secs: default_resync_interval(),
            call_timeout_secs: default_call_timeout(),
            max_requests_per_hour: None,
            pending_poll_interval_secs: default_pending_poll_interval(),
            once_timeout_secs: default_once_timeout(),
        }
    }
}

fn default_base_percentage() -> f64 {
    0.2
}

fn default_spread_factor() -> f64 {
    0.25
}

fn default_resync_interval() -> u64 {
    300
}

fn default_call_timeout() -> u64 {
    30
}

fn default_pending_poll_interval() -> u64 {
    10
}

fn default_once_timeout() -> u64 {
    600
}

/// A managed identity and the certificate it requests
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IdentityConfig {
    /// Identity key; also the store key of the credential record
    pub name: String,
    pub subject: Subject,
    #[serde(default)]
    pub dns_names: Vec<String>,
    pub signer_name: String,
    /// Requested validity of issued certificates; signers may not honor it
    #[serde(default)]
    pub expiration_seconds: Option<u32>,
    /// Prefix of generated request names; defaults to `<name>-`
    #[serde(default)]
    pub request_name_prefix: Option<String>,
    /// Labels attached to every request created for this identity
    #[serde(default)]
    pub request_labels: BTreeMap<String, String>,
    /// Data stored next to the credential; a change forces rotation
    #[serde(default)]
    pub additional_data: BTreeMap<String, String>,
}

impl IdentityConfig {
    pub fn new(name: impl Into<String>, subject: Subject, signer_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            subject,
            dns_names: Vec::new(),
            signer_name: signer_name.into(),
            expiration_seconds: None,
            request_name_prefix: None,
            request_labels: BTreeMap::new(),
            additional_data: BTreeMap::new(),
        }
    }

    pub fn request_name_prefix(&self) -> String {
        self.request_name_prefix
            .clone()
            .unwrap_or_else(|| format!("{}-", self.name))
    }

    /// Additional data as raw payload bytes
    pub fn additional_data_bytes(&self) -> BTreeMap<String, Vec<u8>> {
        self.additional_data
            .iter()
            .map(|(k, v)| (k.clone(), v.as_bytes().to_vec()))
            .collect()
    }

    fn validate(&self) -> Result<()> {
        if !validate_name(&self.name) {
            anyhow::bail!("Invalid identity name: {:?}", self.name);
        }
        if self.subject.common_name.is_empty() {
            anyhow::bail!("Identity {} has an empty subject common name", self.name);
        }
        if self.signer_name.is_empty() {
            anyhow::bail!("Identity {} has an empty signer name", self.name);
        }
        if let Some(seconds) = self.expiration_seconds {
            if seconds < MIN_EXPIRATION_SECONDS {
                anyhow::bail!(
                    "Identity {} requests expiration_seconds {}; the minimum is {}",
                    self.name,
                    seconds,
                    MIN_EXPIRATION_SECONDS
                );
            }
        }
        if !validate_name_prefix(&self.request_name_prefix()) {
            anyhow::bail!(
                "Identity {} has an invalid request name prefix: {:?}",
                self.name,
                self.request_name_prefix()
            );
        }
        for key in self.additional_data.keys() {
            if !validate_payload_key(key) {
                anyhow::bail!("Identity {} has an invalid additional data key: {:?}", self.name, key);
            }
            if key == TLS_CERT_FILE || key == TLS_KEY_FILE {
                anyhow::bail!(
                    "Identity {} additional data cannot override {}",
                    self.name,
                    key
                );
            }
        }
        Ok(())
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    /// Log output target (console or file)
    #[serde(default = "default_log_target")]
    pub target: LogTarget,
    /// Directory for log files (used when target is "file")
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// Log file name prefix (default: "certrotate")
    #[serde(default = "default_log_prefix")]
    pub log_prefix: String,
    /// Enable daily log rotation (default: true for production)
    #[serde(default = "default_log_rotation")]
    pub daily_rotation: bool,
}

/// Log output target
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogTarget {
    /// Log to console (stdout/stderr) - default for development
    #[default]
    Console,
    /// Log to file with optional rotation - recommended for production
    File,
    /// Log to both console and file
    Both,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> LogFormat {
    LogFormat::default()
}

fn default_log_target() -> LogTarget {
    LogTarget::default()
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("/var/log/certrotate")
}

fn default_log_prefix() -> String {
    "certrotate".to_string()
}

fn default_log_rotation() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            target: default_log_target(),
            log_dir: default_log_dir(),
            log_prefix: default_log_prefix(),
            daily_rotation: default_log_rotation(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            authority: None,
            database: DatabaseConfig::default(),
            rotation: RotationConfig::default(),
            logging: LoggingConfig::default(),
            identities: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Load configuration from file and environment variables
    ///
    /// Configuration is loaded in the following order (later overrides earlier):
    /// 1. Default values
    /// 2. Configuration file (YAML)
    /// 3. Environment variables (prefixed with CERTROTATE_)
    pub fn load() -> Result<Self> {
        // Try to load .env file if it exists
        let _ = dotenvy::dotenv();

        // Check for config path override from environment
        let config_path = std::env::var("CERTROTATE_CONFIG")
            .map(PathBuf::from)
            .ok()
            .or_else(Self::find_config_file);

        let mut config = match config_path {
            Some(ref path) if path.exists() => {
                eprintln!("[CONFIG] Loading configuration from: {:?}", path);
                Self::from_file(path)?
            }
            Some(ref path) => {
                eprintln!("[CONFIG] Config file path set but file not found: {:?}", path);
                AppConfig::default()
            }
            None => {
                eprintln!("[CONFIG] No config file found, using defaults");
                AppConfig::default()
            }
        };

        // Apply environment variable overrides
        config.apply_env_overrides();

        // Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Parse a configuration file without applying overrides
    pub fn from_file(path: &PathBuf) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        serde_norway::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    /// Find the configuration file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        let paths = [
            // Current directory
            PathBuf::from("certrotate.yaml"),
            PathBuf::from("config/certrotate.yaml"),
            // System config directory
            PathBuf::from("/etc/certrotate/config.yaml"),
            // User config directory
            dirs::config_dir()
                .map(|p| p.join("certrotate/config.yaml"))
                .unwrap_or_default(),
        ];

        paths.into_iter().find(|p| p.exists())
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        // Authority overrides
        if let Ok(url) = std::env::var("CERTROTATE_AUTHORITY_URL") {
            match self.authority {
                Some(ref mut authority) => authority.url = url,
                None => {
                    self.authority = Some(AuthorityConfig {
                        url,
                        timeout_secs: default_timeout(),
                        ssl_verify: default_ssl_verify(),
                        ssl_cert: None,
                        ssl_key: None,
                        ssl_ca: None,
                        ssl: None,
                    });
                }
            }
        }
        if let Ok(cert) = std::env::var("CERTROTATE_AUTHORITY_SSL_CERT") {
            if let Some(ref mut authority) = self.authority {
                authority.ssl_cert = Some(PathBuf::from(cert));
            }
        }
        if let Ok(key) = std::env::var("CERTROTATE_AUTHORITY_SSL_KEY") {
            if let Some(ref mut authority) = self.authority {
                authority.ssl_key = Some(PathBuf::from(key));
            }
        }
        if let Ok(ca) = std::env::var("CERTROTATE_AUTHORITY_SSL_CA") {
            if let Some(ref mut authority) = self.authority {
                authority.ssl_ca = Some(PathBuf::from(ca));
            }
        }

        // Database overrides
        if let Ok(url) = std::env::var("CERTROTATE_DATABASE_URL") {
            self.database.url = url;
        }

        // Rotation overrides
        if let Ok(secs) = std::env::var("CERTROTATE_RESYNC_INTERVAL_SECS") {
            if let Ok(n) = secs.parse() {
                self.rotation.resync_interval_secs = n;
            }
        }
        if let Ok(secs) = std::env::var("CERTROTATE_PENDING_POLL_INTERVAL_SECS") {
            if let Ok(n) = secs.parse() {
                self.rotation.pending_poll_interval_secs = n;
            }
        }
        if let Ok(max) = std::env::var("CERTROTATE_MAX_REQUESTS_PER_HOUR") {
            if let Ok(n) = max.parse() {
                self.rotation.max_requests_per_hour = Some(n);
            }
        }

        // Logging overrides
        if let Ok(level) = std::env::var("RUST_LOG") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("CERTROTATE_LOG_FORMAT") {
            self.logging.format = match format.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                "compact" => LogFormat::Compact,
                _ => LogFormat::Pretty,
            };
        }
        if let Ok(target) = std::env::var("CERTROTATE_LOG_TARGET") {
            self.logging.target = match target.to_lowercase().as_str() {
                "file" => LogTarget::File,
                "both" => LogTarget::Both,
                _ => LogTarget::Console,
            };
        }
        if let Ok(dir) = std::env::var("CERTROTATE_LOG_DIR") {
            self.logging.log_dir = PathBuf::from(dir);
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }

        let rotation = &self.rotation;
        if !(rotation.base_percentage > 0.0 && rotation.base_percentage < 1.0) {
            anyhow::bail!(
                "Rotation base_percentage must be between 0 and 1, got {}",
                rotation.base_percentage
            );
        }
        if rotation.spread_factor < 0.0 {
            anyhow::bail!(
                "Rotation spread_factor cannot be negative, got {}",
                rotation.spread_factor
            );
        }
        if rotation.resync_interval_secs == 0 {
            anyhow::bail!("Rotation resync_interval_secs cannot be 0");
        }
        if rotation.call_timeout_secs == 0 {
            anyhow::bail!("Rotation call_timeout_secs cannot be 0");
        }
        if rotation.pending_poll_interval_secs == 0 {
            anyhow::bail!("Rotation pending_poll_interval_secs cannot be 0");
        }
        if rotation.once_timeout_secs == 0 {
            anyhow::bail!("Rotation once_timeout_secs cannot be 0");
        }
        if rotation.max_requests_per_hour == Some(0) {
            anyhow::bail!("Rotation max_requests_per_hour cannot be 0");
        }

        if !self.identities.is_empty() {
            match self.authority {
                Some(ref authority) if !authority.url.is_empty() => {}
                _ => anyhow::bail!("A CSR authority URL is required when identities are configured"),
            }
        }

        let mut seen = HashSet::new();
        for identity in &self.identities {
            identity.validate()?;
            if !seen.insert(identity.name.as_str()) {
                anyhow::bail!("Duplicate identity name: {}", identity.name);
            }
        }

        Ok(())
    }
}
