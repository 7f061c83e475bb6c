//! Cache key trait and the configuration key

use std::fmt;

/// Prefix applied to every configuration cache key
pub const KEY_PREFIX: &str = "flagsync";

/// User id used when the host has not identified a user
pub const ANONYMOUS_USER: &str = "anonymous";

/// Trait for types that can be used as cache keys
pub trait CacheKey: Send + Sync {
    /// Generate the key string
    fn cache_key(&self) -> String;

    /// Optional namespace for the key
    fn namespace(&self) -> Option<&str> {
        None
    }

    /// Get the full key including namespace
    fn full_key(&self) -> String {
        match self.namespace() {
            Some(ns) => format!("{}:{}", ns, self.cache_key()),
            None => self.cache_key(),
        }
    }
}

impl CacheKey for String {
    fn cache_key(&self) -> String {
        self.clone()
    }
}

impl CacheKey for &str {
    fn cache_key(&self) -> String {
        self.to_string()
    }
}

impl CacheKey for &String {
    fn cache_key(&self) -> String {
        (*self).clone()
    }
}

/// Key of one cached configuration: (client identity, user identity, namespace)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConfigKey {
    client_id: String,
    user_id: String,
    ns: String,
}

impl ConfigKey {
    /// Create a key for an identified user
    pub fn new(
        client_id: impl Into<String>,
        user_id: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            user_id: user_id.into(),
            ns: namespace.into(),
        }
    }

    /// Create a key for the anonymous user
    pub fn anonymous(client_id: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self::new(client_id, ANONYMOUS_USER, namespace)
    }

    /// Same client and namespace, different user
    pub fn for_user(&self, user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..self.clone()
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }
}

impl CacheKey for ConfigKey {
    fn cache_key(&self) -> String {
        format!("{}:{}", self.client_id, self.user_id)
    }

    fn namespace(&self) -> Option<&str> {
        Some(&self.ns)
    }

    fn full_key(&self) -> String {
        format!("{}:{}:{}", KEY_PREFIX, self.ns, self.cache_key())
    }
}

impl CacheKey for &ConfigKey {
    fn cache_key(&self) -> String {
        (*self).cache_key()
    }

    fn namespace(&self) -> Option<&str> {
        (*self).namespace()
    }

    fn full_key(&self) -> String {
        (*self).full_key()
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_key())
    }
}
