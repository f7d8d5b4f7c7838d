use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;

use crate::error::ConfigError;

/// Environment variable that overrides `google.access_token`.
pub const GOOGLE_TOKEN_ENV: &str = "CALSYNC_GOOGLE_TOKEN";

/// Google event IDs may be at most this long.
const MAX_REMOTE_ID_LENGTH: usize = 1024;
/// ...and at least this long.
const MIN_REMOTE_ID_LENGTH: usize = 5;

/// Configuration validation errors
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Result of config validation
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationResult {
    /// Returns true if there are no errors (warnings are OK)
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Get a user-friendly message summarizing all errors
    pub fn error_summary(&self) -> String {
        self.errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Sync record database
    #[serde(default)]
    pub store: StoreConfig,

    /// Google Calendar provider settings
    #[serde(default)]
    pub google: GoogleConfig,

    /// Orchestrator behaviour
    #[serde(default)]
    pub sync: SyncSettings,

    /// Caller-side retry policy for transient failures
    #[serde(default)]
    pub retry: RetrySettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path to the SQLite database holding sync records
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        let path = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("calsync")
            .join("sync.db");
        Self { path }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleConfig {
    /// Calendar API root, overridable for proxies and tests
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// OAuth access token. Acquiring and refreshing it happens elsewhere;
    /// `CALSYNC_GOOGLE_TOKEN` takes precedence when set.
    #[serde(default)]
    pub access_token: Option<String>,

    /// Calendar used when the caller does not name one
    #[serde(default = "default_calendar_id")]
    pub default_calendar_id: String,
}

fn default_api_base_url() -> String {
    "https://www.googleapis.com/calendar/v3".to_string()
}

fn default_calendar_id() -> String {
    "primary".to_string()
}

impl Default for GoogleConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            access_token: None,
            default_calendar_id: default_calendar_id(),
        }
    }
}

impl GoogleConfig {
    /// Effective access token: environment first, then the config file.
    pub fn resolved_access_token(&self) -> Option<String> {
        std::env::var(GOOGLE_TOKEN_ENV)
            .ok()
            .filter(|t| !t.trim().is_empty())
            .or_else(|| self.access_token.clone().filter(|t| !t.trim().is_empty()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Provenance tag written on records created without an explicit one
    #[serde(default = "default_source_system")]
    pub source_system: String,

    /// Derive remote IDs from the local key instead of letting the provider assign them
    #[serde(default = "default_explicit_ids")]
    pub explicit_ids: bool,

    /// Upper bound for derived remote IDs
    #[serde(default = "default_max_id_length")]
    pub max_id_length: usize,

    /// Default page size for record listings
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

fn default_source_system() -> String {
    "manual".to_string()
}

fn default_explicit_ids() -> bool {
    true
}

fn default_max_id_length() -> usize {
    MAX_REMOTE_ID_LENGTH
}

fn default_page_size() -> u32 {
    50
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            source_system: default_source_system(),
            explicit_ids: default_explicit_ids(),
            max_id_length: default_max_id_length(),
            page_size: default_page_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    100
}

fn default_max_delay_ms() -> u64 {
    5000
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl Config {
    /// Load configuration from the default location, creating it if it doesn't exist
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from `path`, writing the defaults there if it doesn't exist
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            let config = Self::default();
            config.save_to(path)?;
            tracing::info!(path = %path.display(), "Wrote default configuration");
            return Ok(config);
        }

        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        Ok(toml::from_str(&contents)?)
    }

    /// Load configuration from `path` (or the default location) and validate it
    ///
    /// Warnings are logged; errors fail the load.
    pub fn load_validated(path: Option<&Path>) -> Result<(Self, ValidationResult), ConfigError> {
        let config = match path {
            Some(p) => Self::load_from(p)?,
            None => Self::load()?,
        };
        let validation = config.validate();

        if !validation.is_valid() {
            return Err(ConfigError::Invalid(validation.error_summary()));
        }

        for warning in &validation.warnings {
            tracing::warn!("Config warning: {}", warning);
        }

        Ok((config, validation))
    }

    /// Validate the configuration
    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        self.validate_url(&self.google.api_base_url, "google.api_base_url", &mut result);

        if self.google.default_calendar_id.trim().is_empty() {
            result.add_error("google.default_calendar_id", "Calendar ID must not be empty");
        }

        if self.google.resolved_access_token().is_none() {
            result.add_warning(
                "google.access_token",
                format!(
                    "No access token configured (set {} or google.access_token) - remote calls will fail",
                    GOOGLE_TOKEN_ENV
                ),
            );
        }

        if self.sync.source_system.trim().is_empty() {
            result.add_error("sync.source_system", "Source system must not be empty");
        }

        if self.sync.max_id_length < MIN_REMOTE_ID_LENGTH {
            result.add_error(
                "sync.max_id_length",
                format!("Must be at least {}", MIN_REMOTE_ID_LENGTH),
            );
        } else if self.sync.max_id_length > MAX_REMOTE_ID_LENGTH {
            result.add_error(
                "sync.max_id_length",
                format!("Must be at most {}", MAX_REMOTE_ID_LENGTH),
            );
        }

        if self.sync.page_size == 0 {
            result.add_error("sync.page_size", "Page size must be greater than 0");
        } else if self.sync.page_size > 1000 {
            result.add_warning("sync.page_size", "Page size is unusually large (>1000)");
        }

        if self.retry.initial_delay_ms > self.retry.max_delay_ms {
            result.add_error(
                "retry.initial_delay_ms",
                "Initial delay must not exceed retry.max_delay_ms",
            );
        }
        if self.retry.max_retries == 0 {
            result.add_warning("retry.max_retries", "Retries disabled (0 attempts)");
        }

        if self.store.path.as_os_str().is_empty() {
            result.add_error("store.path", "Store path must not be empty");
        }

        result
    }

    /// Validate a URL field
    fn validate_url(&self, url_str: &str, field_name: &str, result: &mut ValidationResult) {
        match Url::parse(url_str) {
            Ok(url) => {
                if url.scheme() != "http" && url.scheme() != "https" {
                    result.add_error(
                        field_name,
                        format!("URL must use http or https scheme, got: {}", url.scheme()),
                    );
                }

                if url.host().is_none() {
                    result.add_error(field_name, "URL must have a host");
                }
            }
            Err(e) => {
                result.add_error(field_name, format!("Invalid URL: {}", e));
            }
        }
    }

    /// Save configuration to `path`, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let contents = toml::to_string_pretty(self)?;

        std::fs::write(path, contents).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Get the path to the configuration file
    pub fn config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir()
            .ok_or(ConfigError::NoConfigDir)?
            .join("calsync");

        Ok(config_dir.join("config.toml"))
    }
}
