use std::time::Duration;

use serde::Deserialize;

use crate::{
    error::{DeliveryError, SystemError},
    retry::RetryPolicy,
};

const fn default_scan_interval() -> u64 {
    10
}

const fn default_batch_size() -> usize {
    64
}

const fn default_max_concurrent() -> usize {
    8
}

const fn default_recipients_per_call() -> usize {
    50
}

const fn default_lease() -> u64 {
    300
}

const fn default_transport_timeout() -> u64 {
    60
}

const fn default_shutdown_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DispatcherConfig {
    /// How often the queue is scanned (in seconds)
    #[serde(default = "default_scan_interval")]
    pub scan_interval_secs: u64,

    /// Most `Outgoing` entries claimed per scan
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Entries delivered in parallel
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Recipients handed to the transport in one call
    #[serde(default = "default_recipients_per_call")]
    pub recipients_per_call: usize,

    /// How long a claim is held before another worker may take it
    /// (in seconds)
    #[serde(default = "default_lease")]
    pub lease_secs: u64,

    /// Upper bound on a single transport call (in seconds). Must be shorter
    /// than the lease.
    #[serde(default = "default_transport_timeout")]
    pub transport_timeout_secs: u64,

    /// How long shutdown waits for a scan in progress (in seconds)
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,

    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            scan_interval_secs: default_scan_interval(),
            batch_size: default_batch_size(),
            max_concurrent: default_max_concurrent(),
            recipients_per_call: default_recipients_per_call(),
            lease_secs: default_lease(),
            transport_timeout_secs: default_transport_timeout(),
            shutdown_timeout_secs: default_shutdown_timeout(),
            retry: RetryPolicy::default(),
        }
    }
}

impl DispatcherConfig {
    #[must_use]
    pub const fn lease(&self) -> Duration {
        Duration::from_secs(self.lease_secs)
    }

    #[must_use]
    pub const fn transport_timeout(&self) -> Duration {
        Duration::from_secs(self.transport_timeout_secs)
    }

    /// # Errors
    /// [`SystemError::Configuration`] for zero sizes, a transport timeout
    /// that does not fit inside the lease, or retry settings out of range.
    pub fn validate(&self) -> Result<(), DeliveryError> {
        let invalid = |msg: &str| -> Result<(), DeliveryError> {
            Err(SystemError::Configuration(msg.to_string()).into())
        };

        if self.batch_size == 0 {
            return invalid("batch_size must be at least 1");
        }
        if self.max_concurrent == 0 {
            return invalid("max_concurrent must be at least 1");
        }
        if self.recipients_per_call == 0 {
            return invalid("recipients_per_call must be at least 1");
        }
        if self.scan_interval_secs == 0 {
            return invalid("scan_interval_secs must be at least 1");
        }
        if self.transport_timeout_secs == 0 || self.transport_timeout_secs >= self.lease_secs {
            return invalid("transport_timeout_secs must be positive and shorter than lease_secs");
        }
        if self.retry.max_attempts == 0 {
            return invalid("retry.max_attempts must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.retry.retry_jitter_factor) {
            return invalid("retry.retry_jitter_factor must be between 0.0 and 1.0");
        }
        if self.retry.max_retry_delay_secs > RetryPolicy::MAX_RETRY_DELAY_SECS {
            return invalid("retry.max_retry_delay_secs must be at most one year");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(DispatcherConfig::default().validate().is_ok());
    }

    #[test]
    fn test_timeout_must_fit_in_lease() {
        let config = DispatcherConfig {
            lease_secs: 30,
            transport_timeout_secs: 30,
            ..DispatcherConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.is_system());
        assert!(err.to_string().contains("shorter than lease_secs"));
    }

    #[test]
    fn test_retry_settings_out_of_range_are_refused() {
        for jitter in [f64::NAN, f64::INFINITY, -0.1, 1.5] {
            let config = DispatcherConfig {
                retry: RetryPolicy {
                    retry_jitter_factor: jitter,
                    ..RetryPolicy::default()
                },
                ..DispatcherConfig::default()
            };
            let err = config.validate().unwrap_err();
            assert!(err.to_string().contains("retry_jitter_factor"), "{jitter} accepted");
        }

        let config = DispatcherConfig {
            retry: RetryPolicy {
                max_retry_delay_secs: u64::MAX,
                ..RetryPolicy::default()
            },
            ..DispatcherConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max_retry_delay_secs"));

        let config = DispatcherConfig {
            retry: RetryPolicy {
                retry_jitter_factor: 1.0,
                max_retry_delay_secs: RetryPolicy::MAX_RETRY_DELAY_SECS,
                ..RetryPolicy::default()
            },
            ..DispatcherConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_ron_overrides() {
        let config: DispatcherConfig = ron::from_str(
            "(batch_size: 5, recipients_per_call: 2, retry: (max_attempts: 3, retry_jitter_factor: 0.0))",
        )
        .unwrap();
        assert_eq!(config.batch_size, 5);
        assert_eq!(config.recipients_per_call, 2);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.max_concurrent, 8);
        assert!(config.validate().is_ok());
    }
}
