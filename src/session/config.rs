//! Session configuration.

use std::time::Duration;

use crate::protocol::{opcode, DEFAULT_MAX_RESPONSE_SIZE};
use crate::writer::DEFAULT_CHUNK_SIZE;

/// Default deadline for ordinary requests.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Default deadline for the exchange-mode command, the first of a session.
pub const DEFAULT_EXCHANGE_TIMEOUT: Duration = Duration::from_secs(20);

/// Default deadline for an RSSI read.
pub const DEFAULT_RSSI_TIMEOUT: Duration = Duration::from_secs(5);

/// Default pause between notification setup and the first command.
pub const DEFAULT_INIT_GRACE_PERIOD: Duration = Duration::from_millis(500);

/// Default deadline for the platform to reach `Ready`.
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for a session and its handshake.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Outbound chunk size (peripheral write limit).
    pub chunk_size: usize,
    /// Deadline for every opcode except `SET_EXCHANGE`.
    pub request_timeout: Duration,
    /// Deadline for `SET_EXCHANGE`.
    pub exchange_timeout: Duration,
    /// Deadline for an RSSI read.
    pub rssi_timeout: Duration,
    /// Largest accepted response message.
    pub max_response_size: usize,
    /// Pause before the first handshake command.
    pub init_grace_period: Duration,
    /// Deadline for the link to become `Ready`.
    pub ready_timeout: Duration,
}

impl SessionConfig {
    /// Deadline for a request with the given opcode.
    pub fn timeout_for(&self, op: u16) -> Duration {
        if op == opcode::SET_EXCHANGE {
            self.exchange_timeout
        } else {
            self.request_timeout
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            exchange_timeout: DEFAULT_EXCHANGE_TIMEOUT,
            rssi_timeout: DEFAULT_RSSI_TIMEOUT,
            max_response_size: DEFAULT_MAX_RESPONSE_SIZE,
            init_grace_period: DEFAULT_INIT_GRACE_PERIOD,
            ready_timeout: DEFAULT_READY_TIMEOUT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = SessionConfig::default();
        assert_eq!(config.chunk_size, 18);
        assert_eq!(config.rssi_timeout, Duration::from_secs(5));
        assert!(config.exchange_timeout > config.request_timeout);
    }

    #[test]
    fn test_timeout_for_opcode() {
        let config = SessionConfig::default();
        assert_eq!(
            config.timeout_for(opcode::SET_EXCHANGE),
            DEFAULT_EXCHANGE_TIMEOUT
        );
        assert_eq!(
            config.timeout_for(opcode::RD_VIRT_STRING),
            DEFAULT_REQUEST_TIMEOUT
        );
    }
}
