//! Runtime configuration.

use crate::Result;
use crate::error::{ConfigError, Error};
use serde::{Deserialize, Serialize};

/// Default number of cached instances per context.
pub const DEFAULT_MAX_CACHE: usize = 1000;

/// Eviction policy of the entry cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CachePolicy {
    /// Order by last touch.
    #[default]
    Mru,
    /// Order by timestamp, tracking access counts. Slow; meant for small caches.
    Timestamp,
}

impl CachePolicy {
    /// Entries evicted per culling batch when `cull_n` is not configured.
    pub const fn default_cull_n(&self) -> usize {
        match self {
            CachePolicy::Mru => 1,
            CachePolicy::Timestamp => 4,
        }
    }
}

/// Settings shared by the registry and every context built from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub max_cache: usize,
    pub cache_policy: CachePolicy,
    pub cull_n: Option<usize>,
    /// Prepended to generated reverse relation names
    pub related_name_prefix: String,
    /// Appended to generated reverse relation names
    pub related_name_postfix: String,
    /// Initial force-sync flag of new instances
    pub force_sync: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_cache: DEFAULT_MAX_CACHE,
            cache_policy: CachePolicy::Mru,
            cull_n: None,
            related_name_prefix: String::new(),
            related_name_postfix: "_set".to_string(),
            force_sync: true,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON document; missing keys keep their defaults.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(text).map_err(|e| {
            Error::Config(ConfigError {
                message: format!("invalid configuration: {}", e),
                source: Some(Box::new(e)),
            })
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn max_cache(mut self, max: usize) -> Self {
        self.max_cache = max;
        self
    }

    pub fn cache_policy(mut self, policy: CachePolicy) -> Self {
        self.cache_policy = policy;
        self
    }

    pub fn cull_n(mut self, n: usize) -> Self {
        self.cull_n = Some(n);
        self
    }

    pub fn related_name_affixes(mut self, prefix: impl Into<String>, postfix: impl Into<String>) -> Self {
        self.related_name_prefix = prefix.into();
        self.related_name_postfix = postfix.into();
        self
    }

    pub fn force_sync(mut self, on: bool) -> Self {
        self.force_sync = on;
        self
    }

    /// Batch size used when culling.
    pub fn effective_cull_n(&self) -> usize {
        self.cull_n.unwrap_or_else(|| self.cache_policy.default_cull_n())
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_cache == 0 {
            return Err(Error::config("max_cache must be at least 1"));
        }
        if self.cull_n == Some(0) {
            return Err(Error::config("cull_n must be at least 1"));
        }
        Ok(())
    }

    /// Reverse relation name generated for relations declared on `model`.
    pub fn default_related_name(&self, model: &str) -> String {
        format!(
            "{}{}{}",
            self.related_name_prefix,
            model.to_lowercase(),
            self.related_name_postfix
        )
    }
}
