//! Configuration types for Flowwatch components.
//!
//! A watcher is one polling trigger: an instance to poll, its filters and
//! limits, and the name of the watermark scope it owns. Watchers come either
//! from CLI flags (a single one) or from a `watchers.toml` file:
//!
//! ```toml
//! [[watchers]]
//! name = "prod"
//! base_url = "https://n8n.example.com"
//! poll_interval_secs = 30
//! max_per_cycle = 50
//!
//! [watchers.credentials]
//! api_key_env = "N8N_PROD_API_KEY"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use url::Url;

use crate::error::AppError;

/// Names matching this are never reported unless overridden.
pub const DEFAULT_EXCLUDE_PATTERN: &str = r"(?:^\[internal\]|^_|backup)";

pub const MIN_POLL_INTERVAL_SECS: u64 = 2;
pub const MAX_POLL_INTERVAL_SECS: u64 = 3600;
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;

pub const MIN_REQUEST_TIMEOUT_MS: u64 = 1000;
pub const MAX_REQUEST_TIMEOUT_MS: u64 = 60_000;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 15_000;

/// Upper bound for `max_per_cycle`; 0 means unlimited.
pub const MAX_ITEMS_PER_CYCLE: usize = 10_000;

const USER_AGENT: &str = "Flowwatch/0.1 (workflow-change-poller)";

/// HTTP client configuration for calls to the instance and webhooks.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            user_agent: USER_AGENT.to_string(),
        }
    }
}

/// How the transport authenticates against the instance.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Credentials {
    #[default]
    None,
    /// Sent as the `X-N8N-API-KEY` header.
    ApiKey(String),
    Basic { user: String, password: String },
    Bearer(String),
}

/// Credential references as written in config files.
///
/// `*_env` fields name an environment variable holding the secret, so the
/// file itself can stay secret-free.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CredentialsConfig {
    pub api_key: Option<String>,
    pub api_key_env: Option<String>,
    pub basic_user: Option<String>,
    pub basic_password: Option<String>,
    pub basic_password_env: Option<String>,
    pub bearer_token: Option<String>,
    pub bearer_token_env: Option<String>,
}

impl CredentialsConfig {
    /// Resolves references into concrete credentials.
    ///
    /// Precedence: API key, then basic auth, then bearer token.
    pub fn resolve(&self) -> Result<Credentials, AppError> {
        if let Some(key) = secret(&self.api_key, &self.api_key_env)? {
            return Ok(Credentials::ApiKey(key));
        }

        if let Some(user) = self.basic_user.clone().filter(|u| !u.is_empty()) {
            let password = secret(&self.basic_password, &self.basic_password_env)?
                .unwrap_or_default();
            return Ok(Credentials::Basic { user, password });
        }

        if let Some(token) = secret(&self.bearer_token, &self.bearer_token_env)? {
            return Ok(Credentials::Bearer(token));
        }

        Ok(Credentials::None)
    }
}

fn secret(inline: &Option<String>, env: &Option<String>) -> Result<Option<String>, AppError> {
    if let Some(value) = inline.as_ref().filter(|v| !v.is_empty()) {
        return Ok(Some(value.clone()));
    }

    match env {
        Some(var) => std::env::var(var).map(Some).map_err(|_| {
            AppError::InvalidConfig(format!("environment variable {} is not set", var))
        }),
        None => Ok(None),
    }
}

/// One polling trigger.
#[derive(Debug, Clone, Deserialize)]
pub struct WatcherConfig {
    /// Watermark scope; each watcher owns its state.
    pub name: String,
    /// Base address of the instance, e.g. `https://n8n.example.com`.
    pub base_url: String,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Case-insensitive, unanchored. `None` uses [`DEFAULT_EXCLUDE_PATTERN`],
    /// an empty string disables name exclusion.
    #[serde(default)]
    pub exclude_pattern: Option<String>,
    /// Name of the workflow hosting this watcher; always excluded.
    #[serde(default)]
    pub self_name: Option<String>,
    #[serde(default = "default_true")]
    pub include_detail: bool,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
    #[serde(default)]
    pub max_per_cycle: usize,
    #[serde(default)]
    pub credentials: CredentialsConfig,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

fn default_request_timeout() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_MS
}

fn default_true() -> bool {
    true
}

impl WatcherConfig {
    /// A watcher with default settings for `base_url`.
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            exclude_pattern: None,
            self_name: None,
            include_detail: true,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            max_per_cycle: 0,
            credentials: CredentialsConfig::default(),
            enabled: true,
        }
    }

    /// Checks bounds, the URL and the exclusion pattern.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.name.trim().is_empty() {
            return Err(AppError::InvalidConfig("watcher name is empty".to_string()));
        }

        let url = Url::parse(&self.base_url)
            .map_err(|e| AppError::InvalidUrl(format!("{} ({})", self.base_url, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(AppError::InvalidUrl(format!(
                "{} (scheme must be http or https)",
                self.base_url
            )));
        }

        check_range(
            "poll_interval_secs",
            self.poll_interval_secs,
            MIN_POLL_INTERVAL_SECS,
            MAX_POLL_INTERVAL_SECS,
        )?;
        check_range(
            "request_timeout_ms",
            self.request_timeout_ms,
            MIN_REQUEST_TIMEOUT_MS,
            MAX_REQUEST_TIMEOUT_MS,
        )?;
        if self.max_per_cycle > MAX_ITEMS_PER_CYCLE {
            return Err(AppError::InvalidConfig(format!(
                "max_per_cycle must be at most {}, got {}",
                MAX_ITEMS_PER_CYCLE, self.max_per_cycle
            )));
        }

        self.exclusion_regex()?;
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn http_config(&self) -> HttpConfig {
        HttpConfig {
            timeout: Duration::from_millis(self.request_timeout_ms),
            ..HttpConfig::default()
        }
    }

    /// Compiles the name exclusion filter.
    ///
    /// Returns `None` when neither a pattern nor a self name applies.
    pub fn exclusion_regex(&self) -> Result<Option<Regex>, AppError> {
        let base = match self.exclude_pattern.as_deref() {
            Some(p) => p.to_string(),
            None => DEFAULT_EXCLUDE_PATTERN.to_string(),
        };
        let own = self
            .self_name
            .as_deref()
            .filter(|n| !n.is_empty())
            .map(|n| format!("^{}$", regex::escape(n)));

        let pattern = match (base.is_empty(), own) {
            (true, None) => return Ok(None),
            (true, Some(own)) => own,
            (false, None) => base,
            (false, Some(own)) => format!("(?:{})|{}", base, own),
        };

        let regex = RegexBuilder::new(&pattern).case_insensitive(true).build()?;
        Ok(Some(regex))
    }
}

fn check_range(field: &str, value: u64, min: u64, max: u64) -> Result<(), AppError> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(AppError::InvalidConfig(format!(
            "{} must be between {} and {}, got {}",
            field, min, max, value
        )))
    }
}

/// Contents of a `watchers.toml` file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WatchersConfig {
    #[serde(default)]
    pub watchers: Vec<WatcherConfig>,
}

impl WatchersConfig {
    /// Watchers with `enabled = true`.
    pub fn enabled_watchers(&self) -> Vec<&WatcherConfig> {
        self.watchers.iter().filter(|w| w.enabled).collect()
    }

    /// Finds a watcher by name (case-insensitive).
    pub fn find_by_name(&self, name: &str) -> Option<&WatcherConfig> {
        self.watchers
            .iter()
            .find(|w| w.name.eq_ignore_ascii_case(name))
    }

    /// Validates every watcher and rejects duplicate names.
    pub fn validate(&self) -> Result<(), AppError> {
        let mut names = std::collections::HashSet::new();
        for watcher in &self.watchers {
            watcher.validate()?;
            if !names.insert(watcher.name.to_lowercase()) {
                return Err(AppError::InvalidConfig(format!(
                    "duplicate watcher name: {}",
                    watcher.name
                )));
            }
        }
        Ok(())
    }
}

/// `<config dir>/flowwatch/watchers.toml`, if the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("flowwatch").join("watchers.toml"))
}

/// `<data dir>/flowwatch/state.json`, if the platform has a data dir.
pub fn default_state_path() -> Option<PathBuf> {
    dirs::data_dir().map(|d| d.join("flowwatch").join("state.json"))
}

/// Loads and validates a watchers file.
///
/// With `path = None` the default location is used and a missing file yields
/// `Ok(None)`. An explicit path that does not exist is an error.
pub fn load_watchers_config(path: Option<&Path>) -> Result<Option<WatchersConfig>, AppError> {
    let (path, explicit) = match path {
        Some(p) => (p.to_path_buf(), true),
        None => match default_config_path() {
            Some(p) => (p, false),
            None => return Ok(None),
        },
    };

    if !path.exists() {
        if explicit {
            return Err(AppError::InvalidConfig(format!(
                "config file not found: {}",
                path.display()
            )));
        }
        return Ok(None);
    }

    let content = std::fs::read_to_string(&path)?;
    let config = parse_watchers_config(&content)?;
    tracing::debug!(
        path = %path.display(),
        watchers = config.watchers.len(),
        "loaded watchers config"
    );
    Ok(Some(config))
}

/// Parses and validates `watchers.toml` content.
pub fn parse_watchers_config(content: &str) -> Result<WatchersConfig, AppError> {
    let config: WatchersConfig =
        toml::from_str(content).map_err(|e| AppError::InvalidConfig(e.to_string()))?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn watcher() -> WatcherConfig {
        WatcherConfig::new("prod", "https://n8n.example.com")
    }

    #[test]
    fn test_http_config_defaults() {
        let config = HttpConfig::default();
        assert_eq!(config.timeout, Duration::from_millis(15_000));
        assert!(config.user_agent.starts_with("Flowwatch/"));
    }

    #[test]
    fn test_watcher_defaults_are_valid() {
        let w = watcher();
        assert!(w.validate().is_ok());
        assert_eq!(w.poll_interval(), Duration::from_secs(60));
        assert!(w.include_detail);
        assert_eq!(w.max_per_cycle, 0);
        assert_eq!(w.http_config().timeout, Duration::from_millis(15_000));
    }

    #[test]
    fn test_watcher_bounds() {
        let mut w = watcher();
        w.poll_interval_secs = 1;
        assert!(matches!(w.validate(), Err(AppError::InvalidConfig(_))));
        w.poll_interval_secs = 3600;
        assert!(w.validate().is_ok());

        w.request_timeout_ms = 60_001;
        assert!(matches!(w.validate(), Err(AppError::InvalidConfig(_))));
        w.request_timeout_ms = 1000;
        assert!(w.validate().is_ok());

        w.max_per_cycle = 10_001;
        assert!(matches!(w.validate(), Err(AppError::InvalidConfig(_))));
    }

    #[test]
    fn test_watcher_rejects_bad_urls() {
        let mut w = watcher();
        w.base_url = "not-a-url".to_string();
        assert!(matches!(w.validate(), Err(AppError::InvalidUrl(_))));
        w.base_url = "ftp://n8n.example.com".to_string();
        assert!(matches!(w.validate(), Err(AppError::InvalidUrl(_))));
    }

    #[test]
    fn test_default_exclusion() {
        let regex = watcher().exclusion_regex().unwrap().unwrap();
        assert!(regex.is_match("Nightly BACKUP of workflows"));
        assert!(regex.is_match("[internal] cleanup"));
        assert!(regex.is_match("_scratch"));
        assert!(!regex.is_match("Order sync"));
    }

    #[test]
    fn test_self_name_is_escaped_and_anchored() {
        let mut w = watcher();
        w.self_name = Some("Watch (changes)".to_string());
        let regex = w.exclusion_regex().unwrap().unwrap();
        assert!(regex.is_match("watch (changes)"));
        assert!(!regex.is_match("Watch (changes) v2"));
        assert!(regex.is_match("backup"));
    }

    #[test]
    fn test_empty_pattern_disables_exclusion() {
        let mut w = watcher();
        w.exclude_pattern = Some(String::new());
        assert!(w.exclusion_regex().unwrap().is_none());

        w.self_name = Some("Self".to_string());
        let regex = w.exclusion_regex().unwrap().unwrap();
        assert!(regex.is_match("self"));
        assert!(!regex.is_match("backup"));
    }

    #[test]
    fn test_invalid_pattern() {
        let mut w = watcher();
        w.exclude_pattern = Some("(unclosed".to_string());
        assert!(matches!(w.validate(), Err(AppError::InvalidPattern(_))));
    }

    #[test]
    fn test_credentials_precedence() {
        let creds = CredentialsConfig {
            api_key: Some("key".into()),
            basic_user: Some("user".into()),
            ..Default::default()
        };
        assert_eq!(creds.resolve().unwrap(), Credentials::ApiKey("key".into()));

        let creds = CredentialsConfig {
            basic_user: Some("user".into()),
            basic_password: Some("pw".into()),
            bearer_token: Some("tok".into()),
            ..Default::default()
        };
        assert_eq!(
            creds.resolve().unwrap(),
            Credentials::Basic {
                user: "user".into(),
                password: "pw".into()
            }
        );

        assert_eq!(
            CredentialsConfig::default().resolve().unwrap(),
            Credentials::None
        );
    }

    #[test]
    fn test_credentials_missing_env_var() {
        let creds = CredentialsConfig {
            api_key_env: Some("FLOWWATCH_TEST_SURELY_UNSET_VAR".into()),
            ..Default::default()
        };
        assert!(matches!(creds.resolve(), Err(AppError::InvalidConfig(_))));
    }

    #[test]
    fn test_parse_watchers_config() {
        let content = r#"
            [[watchers]]
            name = "prod"
            base_url = "https://n8n.example.com"
            poll_interval_secs = 30
            max_per_cycle = 50

            [watchers.credentials]
            api_key = "secret"

            [[watchers]]
            name = "staging"
            base_url = "https://staging.example.com"
            include_detail = false
            enabled = false
        "#;

        let config = parse_watchers_config(content).unwrap();
        assert_eq!(config.watchers.len(), 2);
        assert_eq!(config.enabled_watchers().len(), 1);

        let prod = config.find_by_name("PROD").unwrap();
        assert_eq!(prod.poll_interval_secs, 30);
        assert_eq!(prod.max_per_cycle, 50);
        assert_eq!(
            prod.credentials.resolve().unwrap(),
            Credentials::ApiKey("secret".into())
        );

        let staging = config.find_by_name("staging").unwrap();
        assert!(!staging.include_detail);
        assert_eq!(staging.request_timeout_ms, DEFAULT_REQUEST_TIMEOUT_MS);
    }

    #[test]
    fn test_parse_watchers_config_duplicate_names() {
        let content = r#"
            [[watchers]]
            name = "prod"
            base_url = "https://a.example.com"

            [[watchers]]
            name = "Prod"
            base_url = "https://b.example.com"
        "#;
        assert!(matches!(
            parse_watchers_config(content),
            Err(AppError::InvalidConfig(msg)) if msg.contains("duplicate")
        ));
    }

    #[test]
    fn test_load_watchers_config_explicit_missing_path() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(load_watchers_config(Some(&missing)).is_err());
    }

    #[test]
    fn test_load_watchers_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("watchers.toml");
        std::fs::write(
            &path,
            "[[watchers]]\nname = \"prod\"\nbase_url = \"https://n8n.example.com\"\n",
        )
        .unwrap();

        let config = load_watchers_config(Some(&path)).unwrap().unwrap();
        assert_eq!(config.watchers[0].name, "prod");
    }
}
