//! ETL configuration

use kmtrack_common::{KmError, Result};
use serde::{Deserialize, Serialize};
use std::env;

/// Rows per warehouse insert chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 500;
/// Concurrent chunk submissions per load.
pub const DEFAULT_CONCURRENCY: usize = 4;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EtlConfig {
    pub chunk_size: usize,
    pub concurrency: usize,
    /// Key prefix for post-transform snapshots.
    pub staging_prefix: String,
    /// Key prefix raw exports are expected under.
    pub raw_prefix: String,
}

impl Default for EtlConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            concurrency: DEFAULT_CONCURRENCY,
            staging_prefix: "staging".to_string(),
            raw_prefix: "raw".to_string(),
        }
    }
}

impl EtlConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults.
    ///
    /// - `ETL_CHUNK_SIZE`: rows per insert chunk
    /// - `ETL_CONCURRENCY`: concurrent chunk submissions
    /// - `ETL_STAGING_PREFIX`: blob key prefix for snapshots
    /// - `ETL_RAW_PREFIX`: blob key prefix for raw exports
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(v) = env::var("ETL_CHUNK_SIZE") {
            config.chunk_size = v
                .parse()
                .map_err(|_| KmError::Config(format!("Invalid ETL_CHUNK_SIZE: {v}")))?;
        }
        if let Ok(v) = env::var("ETL_CONCURRENCY") {
            config.concurrency = v
                .parse()
                .map_err(|_| KmError::Config(format!("Invalid ETL_CONCURRENCY: {v}")))?;
        }
        if let Ok(v) = env::var("ETL_STAGING_PREFIX") {
            config.staging_prefix = v;
        }
        if let Ok(v) = env::var("ETL_RAW_PREFIX") {
            config.raw_prefix = v;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(KmError::Config("chunk_size must be at least 1".to_string()));
        }
        if self.concurrency == 0 {
            return Err(KmError::Config(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if self.staging_prefix.is_empty() {
            return Err(KmError::Config("staging_prefix must not be empty".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EtlConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.chunk_size, 500);
        assert_eq!(config.concurrency, 4);
    }

    #[test]
    fn test_zero_chunk_size_is_rejected() {
        let config = EtlConfig {
            chunk_size: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(KmError::Config(_))));
    }
}
