//! Per-stream configuration.

use serde::{Deserialize, Serialize};

use crate::types::VARINT_MAX;

/// Default receive buffer capacity per stream.
pub const DEFAULT_RECEIVE_BUFFER_CAPACITY: usize = 64 * 1024;

/// Configuration applied to each stream at creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// How many received bytes may be buffered before the stream stops
    /// accepting transport deliveries (the receive window pauses until
    /// the application drains the buffer).
    pub receive_buffer_capacity: usize,

    /// Error code used when the stream aborts a direction internally,
    /// e.g. from a canceled read or during dispose.
    pub default_error_code: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            receive_buffer_capacity: DEFAULT_RECEIVE_BUFFER_CAPACITY,
            default_error_code: 0,
        }
    }
}

impl StreamConfig {
    /// Validate the configuration, collecting every problem found.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.receive_buffer_capacity == 0 {
            errors.push("receive_buffer_capacity must be at least 1 byte".to_string());
        }
        if self.default_error_code > VARINT_MAX {
            errors.push(format!(
                "default_error_code {} exceeds the 2^62-1 ceiling",
                self.default_error_code
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(StreamConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_capacity_rejected() {
        let config = StreamConfig {
            receive_buffer_capacity: 0,
            ..StreamConfig::default()
        };
        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("receive_buffer_capacity")));
    }

    #[test]
    fn oversized_error_code_rejected() {
        let config = StreamConfig {
            default_error_code: u64::MAX,
            ..StreamConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
