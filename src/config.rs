//! Processing limits and worker settings.

use crate::error::{ReportError, Result};
use std::env;
use std::thread;

/// Rows per batch when nothing else is configured.
pub const DEFAULT_CHUNK_SIZE: usize = 10_000;

/// Distinct keys the aggregator may track before giving up.
pub const DEFAULT_MAX_TRACKED_KEYS: usize = 2_000_000;

/// Raw combined-report bytes one batch may buffer.
pub const DEFAULT_MAX_BATCH_BYTES: usize = 256 * 1024 * 1024;

/// Settings for one [`ReportProcessor`](crate::ReportProcessor).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorConfig {
    /// Rows per aggregation and detail batch.
    pub chunk_size: usize,

    /// Worker threads used for per-batch arithmetic.
    pub workers: usize,

    /// Ceiling on distinct aggregation keys.
    pub max_tracked_keys: usize,

    /// Ceiling on raw bytes buffered for a single batch.
    pub max_batch_bytes: usize,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        ProcessorConfig {
            chunk_size: DEFAULT_CHUNK_SIZE,
            workers: default_workers(),
            max_tracked_keys: DEFAULT_MAX_TRACKED_KEYS,
            max_batch_bytes: DEFAULT_MAX_BATCH_BYTES,
        }
    }
}

impl ProcessorConfig {
    /// Loads settings from the environment, falling back to defaults for
    /// unset or unparsable values.
    ///
    /// - `PO_CHUNK_SIZE`
    /// - `PO_WORKERS`
    /// - `PO_MAX_KEYS`
    /// - `PO_MAX_BATCH_BYTES`
    pub fn from_env() -> Self {
        let defaults = ProcessorConfig::default();
        ProcessorConfig {
            chunk_size: env_usize("PO_CHUNK_SIZE").unwrap_or(defaults.chunk_size),
            workers: env_usize("PO_WORKERS").unwrap_or(defaults.workers),
            max_tracked_keys: env_usize("PO_MAX_KEYS").unwrap_or(defaults.max_tracked_keys),
            max_batch_bytes: env_usize("PO_MAX_BATCH_BYTES").unwrap_or(defaults.max_batch_bytes),
        }
    }

    /// Returns a copy with a different batch size.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Returns a copy with a different worker count.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Checks that every setting is usable.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(ReportError::InvalidConfig(
                "chunk_size must be at least 1".to_string(),
            ));
        }
        if self.workers == 0 {
            return Err(ReportError::InvalidConfig(
                "workers must be at least 1".to_string(),
            ));
        }
        if self.max_tracked_keys == 0 || self.max_batch_bytes == 0 {
            return Err(ReportError::InvalidConfig(
                "memory ceilings must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_workers() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn env_usize(name: &str) -> Option<usize> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = ProcessorConfig::default();
        assert_eq!(config.chunk_size, 10_000);
        assert!(config.workers >= 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_chunk_size_is_rejected() {
        let config = ProcessorConfig::default().with_chunk_size(0);
        assert!(matches!(
            config.validate(),
            Err(ReportError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_zero_workers_is_rejected() {
        let config = ProcessorConfig::default().with_workers(0);
        assert!(config.validate().is_err());
    }
}
