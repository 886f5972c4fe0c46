use serde::Deserialize;

/// Root engine configuration. Loaded from environment variables with the
/// prefix `SHOPSPLIT__` and an optional `shopsplit.toml` file.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub analytics: AnalyticsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Prefix for the per-user assignment record key.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalyticsConfig {
    /// Capacity of the in-flight event channel.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
}

// Default functions
fn default_key_prefix() -> String {
    "shopsplit:assignments:".to_string()
}
fn default_channel_capacity() -> usize {
    10_000
}
fn default_batch_size() -> usize {
    100
}
fn default_flush_interval_ms() -> u64 {
    500
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            key_prefix: default_key_prefix(),
        }
    }
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            batch_size: default_batch_size(),
            flush_interval_ms: default_flush_interval_ms(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            analytics: AnalyticsConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables and an optional config file.
    pub fn load() -> crate::error::SplitResult<Self> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name("shopsplit").required(false))
            .add_source(
                config::Environment::with_prefix("SHOPSPLIT")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(","),
            );

        let config = builder
            .build()
            .map_err(|e| crate::error::SplitError::Config(e.to_string()))?;
        config
            .try_deserialize()
            .map_err(|e| crate::error::SplitError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.storage.key_prefix, "shopsplit:assignments:");
        assert_eq!(config.analytics.batch_size, 100);
        assert_eq!(config.analytics.flush_interval_ms, 500);
    }
}
