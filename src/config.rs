//! # Connection Configuration
//!
//! Configuration for a single SCP connection. All parameters are fixed at
//! connection time; reconnect to change them.
//!
//! ## Quick Start
//!
//! The defaults match a stock SpiNNaker board:
//!
//! ```
//! use scp_runtime::ConnectionConfig;
//!
//! let config = ConnectionConfig::default();
//! assert_eq!(config.scp_data_length, 256);
//! ```
//!
//! ## Builder Pattern
//!
//! ```
//! use scp_runtime::ConnectionConfig;
//! use std::time::Duration;
//!
//! let config = ConnectionConfig::builder()
//!     .scp_data_length(256)
//!     .timeout(Duration::from_millis(500))
//!     .n_tries(5)
//!     .n_outstanding(8)
//!     .build();
//! ```
//!
//! ## Configuration Options
//!
//! | Option | Default | Description |
//! |--------|---------|-------------|
//! | `scp_data_length` | 256 | Maximum SCP data-field length (bytes) |
//! | `timeout` | 500 ms | Per-attempt response timeout |
//! | `n_tries` | 5 | Transmission attempts before giving up |
//! | `n_outstanding` | 8 | Simultaneously outstanding commands |
//!
//! `scp_data_length` and `n_outstanding` should in general be queried from
//! the machine rather than guessed; larger windows than the machine supports
//! cause silent loss and retransmission churn.

use std::time::Duration;

use crate::error::{ConfigError, Error, Result};

/// UDP port the SC&MP monitor listens on.
pub const SCP_PORT: u16 = 17893;

/// Default maximum SCP data-field length in bytes.
pub const DEFAULT_SCP_DATA_LENGTH: usize = 256;

/// Default per-attempt response timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(500);

/// Default number of transmission attempts before a request fails.
pub const DEFAULT_N_TRIES: u32 = 5;

/// Default number of simultaneously outstanding commands.
pub const DEFAULT_N_OUTSTANDING: usize = 8;

/// Connection configuration
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Maximum data-field length per SCP packet (default: 256)
    pub scp_data_length: usize,
    /// Per-attempt response timeout (default: 500 ms)
    pub timeout: Duration,
    /// Transmission attempts per request before failing with `Timeout` (default: 5)
    pub n_tries: u32,
    /// Size of the outstanding-command window (default: 8)
    pub n_outstanding: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            scp_data_length: DEFAULT_SCP_DATA_LENGTH,
            timeout: DEFAULT_TIMEOUT,
            n_tries: DEFAULT_N_TRIES,
            n_outstanding: DEFAULT_N_OUTSTANDING,
        }
    }
}

impl ConnectionConfig {
    /// Create a new builder
    pub fn builder() -> ConnectionConfigBuilder {
        ConnectionConfigBuilder::default()
    }

    /// Reject configurations the transport cannot run with.
    pub(crate) fn validate(&self) -> Result<()> {
        if self.scp_data_length == 0 {
            return Err(Error::Config(ConfigError::new("scp_data_length must be positive")));
        }
        if self.n_tries == 0 {
            return Err(Error::Config(ConfigError::new("n_tries must be positive")));
        }
        if self.n_outstanding == 0 {
            return Err(Error::Config(ConfigError::new("n_outstanding must be positive")));
        }
        if self.timeout.is_zero() {
            return Err(Error::Config(ConfigError::new("timeout must be positive")));
        }
        Ok(())
    }
}

/// Builder for ConnectionConfig
#[derive(Default)]
pub struct ConnectionConfigBuilder {
    config: ConnectionConfig,
}

impl ConnectionConfigBuilder {
    /// Set the maximum SCP data-field length
    pub fn scp_data_length(mut self, len: usize) -> Self {
        self.config.scp_data_length = len;
        self
    }

    /// Set the per-attempt response timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Set the number of transmission attempts per request
    pub fn n_tries(mut self, n: u32) -> Self {
        self.config.n_tries = n;
        self
    }

    /// Set the outstanding-command window size
    pub fn n_outstanding(mut self, n: usize) -> Self {
        self.config.n_outstanding = n;
        self
    }

    /// Build the configuration
    pub fn build(self) -> ConnectionConfig {
        self.config
    }
}
