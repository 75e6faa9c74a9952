//! # Repository Configuration
//!
//! Configuration for one synchronized repository: where the mirror lives
//! locally, which remote folder it tracks, what to ignore, and how often to
//! poll. Configuration is read-only once built; changing settings means
//! building a new [`RepositoryConfig`] and restarting the repository worker.
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::config::RepositoryConfig;
//! use std::time::Duration;
//!
//! let config = RepositoryConfig::builder()
//!     .id("docs")
//!     .local_root("/home/alice/CmisSync/docs")
//!     .remote_root("/Sites/docs")
//!     .ignore_pattern("/private")
//!     .poll_interval(Duration::from_secs(30))
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(config.change_batch_size, 1000);
//! ```
//!
//! Hosts that persist settings as JSON load them with
//! [`RepositoryConfig::from_json_str`], which applies the same validation.

use crate::error::{Error, Result};
use crate::logging::redact_if_sensitive;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Upper bound on events requested per change-log round-trip.
pub const DEFAULT_CHANGE_BATCH_SIZE: u32 = 1000;
const MAX_CHANGE_BATCH_SIZE: u32 = 10_000;
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
const APP_DIR_NAME: &str = "cmis-sync";

/// Settings of one synchronized repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Stable identifier, also used to name the index database
    pub id: String,
    /// Name shown to users; defaults to `id`
    #[serde(default)]
    pub display_name: Option<String>,
    /// Absolute local directory receiving the mirror
    pub local_root: PathBuf,
    /// Absolute remote folder path (e.g. `/Sites/docs`)
    pub remote_root: String,
    /// Path-prefix patterns relative to the remote root
    #[serde(default)]
    pub ignore_patterns: Vec<String>,
    /// Maximum change events requested per round-trip
    #[serde(default = "default_batch_size")]
    pub change_batch_size: u32,
    /// Delay between background passes
    #[serde(
        default = "default_poll_interval",
        rename = "poll_interval_secs",
        with = "duration_secs"
    )]
    pub poll_interval: Duration,
    /// Explicit index database location
    #[serde(default)]
    pub index_path: Option<PathBuf>,
    /// Upper bound on the duration of one pass
    #[serde(default, rename = "pass_timeout_secs", with = "optional_duration_secs")]
    pub pass_timeout: Option<Duration>,
}

fn default_batch_size() -> u32 {
    DEFAULT_CHANGE_BATCH_SIZE
}

fn default_poll_interval() -> Duration {
    DEFAULT_POLL_INTERVAL
}

impl RepositoryConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> RepositoryConfigBuilder {
        RepositoryConfigBuilder::default()
    }

    /// Parses and validates a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| Error::Config(format!("Invalid repository configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::Config("Repository id cannot be empty".to_string()));
        }

        if self
            .id
            .chars()
            .any(|c| matches!(c, '/' | '\\' | ':' | '\0'))
        {
            return Err(Error::Config(format!(
                "Repository id '{}' must not contain path separators",
                self.id
            )));
        }

        if !self.local_root.is_absolute() {
            return Err(Error::Config(format!(
                "Local root must be an absolute path, got {}",
                self.local_root.display()
            )));
        }

        if !self.remote_root.starts_with('/') {
            return Err(Error::Config(format!(
                "Remote root must start with '/', got '{}'",
                self.remote_root
            )));
        }

        if self.change_batch_size == 0 || self.change_batch_size > MAX_CHANGE_BATCH_SIZE {
            return Err(Error::Config(format!(
                "Change batch size must be between 1 and {}",
                MAX_CHANGE_BATCH_SIZE
            )));
        }

        if self.poll_interval < Duration::from_secs(1) {
            return Err(Error::Config(
                "Poll interval must be at least 1 second".to_string(),
            ));
        }

        if let Some(timeout) = self.pass_timeout {
            if timeout.is_zero() {
                return Err(Error::Config(
                    "Pass timeout must be greater than zero".to_string(),
                ));
            }
        }

        if self.ignore_patterns.iter().any(|p| p.trim_matches('/').is_empty()) {
            return Err(Error::Config(
                "Ignore patterns cannot be empty or '/'".to_string(),
            ));
        }

        Ok(())
    }

    pub fn display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.id)
    }

    /// Index database location: the explicit path, or
    /// `<data dir>/cmis-sync/<id>.db`.
    pub fn resolved_index_path(&self) -> PathBuf {
        match &self.index_path {
            Some(path) => path.clone(),
            None => default_data_dir().join(format!("{}.db", self.id)),
        }
    }
}

/// Per-user application data directory.
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join(".local").join("share")))
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR_NAME)
}

/// Builder for [`RepositoryConfig`].
#[derive(Debug, Default)]
pub struct RepositoryConfigBuilder {
    id: Option<String>,
    display_name: Option<String>,
    local_root: Option<PathBuf>,
    remote_root: Option<String>,
    ignore_patterns: Vec<String>,
    change_batch_size: Option<u32>,
    poll_interval: Option<Duration>,
    index_path: Option<PathBuf>,
    pass_timeout: Option<Duration>,
}

impl RepositoryConfigBuilder {
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn local_root<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.local_root = Some(path.into());
        self
    }

    pub fn remote_root(mut self, path: impl Into<String>) -> Self {
        self.remote_root = Some(path.into());
        self
    }

    pub fn ignore_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.ignore_patterns.push(pattern.into());
        self
    }

    pub fn ignore_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignore_patterns
            .extend(patterns.into_iter().map(Into::into));
        self
    }

    pub fn change_batch_size(mut self, size: u32) -> Self {
        self.change_batch_size = Some(size);
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    pub fn index_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.index_path = Some(path.into());
        self
    }

    pub fn pass_timeout(mut self, timeout: Duration) -> Self {
        self.pass_timeout = Some(timeout);
        self
    }

    /// Builds and validates the configuration.
    pub fn build(self) -> Result<RepositoryConfig> {
        let id = self
            .id
            .ok_or_else(|| Error::Config("Repository id is required. Use .id() to set it.".into()))?;
        let local_root = self.local_root.ok_or_else(|| {
            Error::Config("Local root is required. Use .local_root() to set it.".into())
        })?;
        let remote_root = self.remote_root.ok_or_else(|| {
            Error::Config("Remote root is required. Use .remote_root() to set it.".into())
        })?;

        let config = RepositoryConfig {
            id,
            display_name: self.display_name,
            local_root,
            remote_root,
            ignore_patterns: self.ignore_patterns,
            change_batch_size: self.change_batch_size.unwrap_or(DEFAULT_CHANGE_BATCH_SIZE),
            poll_interval: self.poll_interval.unwrap_or(DEFAULT_POLL_INTERVAL),
            index_path: self.index_path,
            pass_timeout: self.pass_timeout,
        };

        config.validate()?;
        Ok(config)
    }
}

/// Connection settings for a CMIS Browser Binding endpoint.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CmisConnection {
    /// Browser binding URL, e.g. `https://cmis.example.com/alfresco/api/-default-/public/cmis/versions/1.1/browser`
    pub url: String,
    pub repository_id: String,
    pub username: String,
    pub password: String,
}

impl CmisConnection {
    pub fn new(
        url: impl Into<String>,
        repository_id: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            repository_id: repository_id.into(),
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.url.starts_with("http://") || self.url.starts_with("https://")) {
            return Err(Error::Config(format!(
                "CMIS URL must use http or https, got '{}'",
                self.url
            )));
        }
        if self.repository_id.is_empty() {
            return Err(Error::Config("CMIS repository id cannot be empty".into()));
        }
        Ok(())
    }

    /// URL of the repository inside the browser binding.
    pub fn repository_url(&self) -> String {
        format!(
            "{}/{}",
            self.url.trim_end_matches('/'),
            urlencoding::encode(&self.repository_id)
        )
    }
}

impl fmt::Debug for CmisConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CmisConnection")
            .field("url", &self.url)
            .field("repository_id", &self.repository_id)
            .field("username", &self.username)
            .field("password", &redact_if_sensitive("password", &self.password))
            .finish()
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

mod optional_duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer.serialize_some(&duration.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(deserializer).map(|secs| secs.map(Duration::from_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn absolute_root() -> PathBuf {
        std::env::temp_dir().join("cmis-sync-config-test")
    }

    #[test]
    fn test_builder_defaults() {
        let config = RepositoryConfig::builder()
            .id("docs")
            .local_root(absolute_root())
            .remote_root("/Sites/docs")
            .build()
            .unwrap();

        assert_eq!(config.change_batch_size, DEFAULT_CHANGE_BATCH_SIZE);
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.display_name(), "docs");
        assert!(config.resolved_index_path().ends_with("cmis-sync/docs.db"));
    }

    #[test]
    fn test_builder_requires_fields() {
        let err = RepositoryConfig::builder().id("docs").build().unwrap_err();
        assert!(err.to_string().contains("Local root is required"));
    }

    #[test]
    fn test_validation_rules() {
        let relative = RepositoryConfig::builder()
            .id("docs")
            .local_root("relative/dir")
            .remote_root("/docs")
            .build();
        assert!(matches!(relative, Err(Error::Config(_))));

        let bad_remote = RepositoryConfig::builder()
            .id("docs")
            .local_root(absolute_root())
            .remote_root("docs")
            .build();
        assert!(matches!(bad_remote, Err(Error::Config(_))));

        let zero_batch = RepositoryConfig::builder()
            .id("docs")
            .local_root(absolute_root())
            .remote_root("/docs")
            .change_batch_size(0)
            .build();
        assert!(matches!(zero_batch, Err(Error::Config(_))));

        let root_ignore = RepositoryConfig::builder()
            .id("docs")
            .local_root(absolute_root())
            .remote_root("/docs")
            .ignore_pattern("/")
            .build();
        assert!(matches!(root_ignore, Err(Error::Config(_))));

        let bad_id = RepositoryConfig::builder()
            .id("a/b")
            .local_root(absolute_root())
            .remote_root("/docs")
            .build();
        assert!(matches!(bad_id, Err(Error::Config(_))));
    }

    #[test]
    fn test_from_json_str() {
        let json = serde_json::json!({
            "id": "docs",
            "local_root": absolute_root(),
            "remote_root": "/Sites/docs",
            "ignore_patterns": ["/private"],
            "poll_interval_secs": 60,
            "pass_timeout_secs": 600
        })
        .to_string();

        let config = RepositoryConfig::from_json_str(&json).unwrap();
        assert_eq!(config.poll_interval, Duration::from_secs(60));
        assert_eq!(config.pass_timeout, Some(Duration::from_secs(600)));
        assert_eq!(config.ignore_patterns, vec!["/private".to_string()]);

        let invalid = RepositoryConfig::from_json_str(r#"{"id": "docs"}"#);
        assert!(matches!(invalid, Err(Error::Config(_))));
    }

    #[test]
    fn test_connection_debug_redacts_password() {
        let connection = CmisConnection::new("https://cmis.example.com/browser", "repo 1", "alice", "hunter2");

        let debug = format!("{:?}", connection);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("[REDACTED]"));
        assert_eq!(
            connection.repository_url(),
            "https://cmis.example.com/browser/repo%201"
        );
        assert!(connection.validate().is_ok());
        assert!(CmisConnection::new("ftp://x", "r", "u", "p").validate().is_err());
    }
}
