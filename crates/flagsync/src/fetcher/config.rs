use reqwest::Url;
use std::time::Duration;

use flagsync_core::{Result, SyncError, DEFAULT_FLAGS_KEY};

pub const DEFAULT_BASE_URL: &str = "https://api.flagsync.dev";

const CONFIG_ENDPOINT: &str = "/v1/user-configs";
const SETTINGS_ENDPOINT: &str = "/v1/sdk-settings";
const METADATA_ENDPOINT: &str = "/v1/metadata";

/// Configuration for [`ConfigFetcher`](super::ConfigFetcher)
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    pub base_url: String,
    /// Client-side SDK key, sent with every request
    pub client_key: String,
    /// SDK name. Usually, language name.
    pub sdk_name: String,
    /// Version of SDK.
    pub sdk_version: String,
    pub config_path: String,
    pub settings_path: String,
    /// Metadata for a dimension lives at `{metadata_path}/{dimension}`
    pub metadata_path: String,
    /// Top-level key of the flags collection in a config response
    pub flags_key: String,
    /// Cache key namespace
    pub namespace: String,
    /// Freshness lifetime for fetched entries, unless the server says otherwise
    pub ttl: Duration,
    /// Start in offline mode
    pub offline: bool,
    /// Initial user; `None` fetches the anonymous configuration
    pub user_id: Option<String>,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            client_key: String::new(),
            sdk_name: "rust".to_string(),
            sdk_version: env!("CARGO_PKG_VERSION").to_string(),
            config_path: CONFIG_ENDPOINT.to_string(),
            settings_path: SETTINGS_ENDPOINT.to_string(),
            metadata_path: METADATA_ENDPOINT.to_string(),
            flags_key: DEFAULT_FLAGS_KEY.to_string(),
            namespace: "default".to_string(),
            ttl: Duration::from_secs(300),
            offline: false,
            user_id: None,
        }
    }
}

impl FetcherConfig {
    pub fn new(client_key: impl Into<String>) -> Self {
        Self {
            client_key: client_key.into(),
            ..Self::default()
        }
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn sdk(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.sdk_name = name.into();
        self.sdk_version = version.into();
        self
    }

    pub fn config_path(mut self, path: impl Into<String>) -> Self {
        self.config_path = path.into();
        self
    }

    pub fn settings_path(mut self, path: impl Into<String>) -> Self {
        self.settings_path = path.into();
        self
    }

    pub fn metadata_path(mut self, path: impl Into<String>) -> Self {
        self.metadata_path = path.into();
        self
    }

    pub fn flags_key(mut self, key: impl Into<String>) -> Self {
        self.flags_key = key.into();
        self
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn offline(mut self, offline: bool) -> Self {
        self.offline = offline;
        self
    }

    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub(crate) fn config_url(&self) -> Result<String> {
        self.endpoint(&self.config_path)
    }

    pub(crate) fn settings_url(&self) -> Result<String> {
        self.endpoint(&self.settings_path)
    }

    pub(crate) fn metadata_url(&self, dimension: &str) -> Result<String> {
        let path = format!("{}/{}", self.metadata_path.trim_end_matches('/'), dimension);
        self.endpoint(&path)
    }

    fn endpoint(&self, path: &str) -> Result<String> {
        let url = Url::parse_with_params(
            &format!("{}{}", self.base_url.trim_end_matches('/'), path),
            &[
                ("clientKey", self.client_key.as_str()),
                ("sdkName", self.sdk_name.as_str()),
                ("sdkVersion", self.sdk_version.as_str()),
            ],
        )
        .map_err(|e| SyncError::InvalidUrl(e.to_string()))?;
        Ok(url.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoints() {
        let config = FetcherConfig::new("key-1")
            .base_url("https://flags.example.com/")
            .sdk("rust", "9.9.9");

        assert_eq!(
            config.config_url().unwrap(),
            "https://flags.example.com/v1/user-configs?clientKey=key-1&sdkName=rust&sdkVersion=9.9.9"
        );
        assert!(config
            .metadata_url("mobile")
            .unwrap()
            .starts_with("https://flags.example.com/v1/metadata/mobile?"));
        assert!(config
            .settings_url()
            .unwrap()
            .starts_with("https://flags.example.com/v1/sdk-settings?"));
    }

    #[test]
    fn test_bad_base_url() {
        let config = FetcherConfig::new("k").base_url("not a url");
        assert!(matches!(config.config_url(), Err(SyncError::InvalidUrl(_))));
    }
}
