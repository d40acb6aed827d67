use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Reconnect backoff — flat delay between connection attempts (the device link,
/// unlike a BLE peripheral scan, doesn't benefit from exponential backoff: the
/// socket-level connect either succeeds quickly or the device is out of range).
pub const RECONNECT_BACKOFF_MS: u64 = 1000;

/// Max bytes read from the socket per recv() call.
pub const RECV_CHUNK_SIZE: usize = 256;

/// Outbound/inbound channel capacity between the blocking I/O worker and the
/// async event loop.
pub const CHANNEL_CAPACITY: usize = 64;

/// Bluetooth device-name prefix/substring used during autodiscovery.
pub const DISCOVERY_NAME_PREFIX: &str = "BH";
pub const DISCOVERY_NAME_SUBSTRING: &str = "BHT";

/// User-facing configuration for a [`crate::link::engine::LinkEngine`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Explicit peer address, or `None` to autodiscover.
    pub address: Option<String>,
    /// RFCOMM channel.
    pub port: u8,
    /// Keepalive period.
    pub lifesign_interval: Duration,
    /// Whether the link should reconnect after a transport failure.
    pub reconnect: bool,
    /// RPC timeout.
    pub timeout: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            address: None,
            port: 1,
            lifesign_interval: Duration::from_secs(2),
            reconnect: true,
            timeout: Duration::from_secs(20),
        }
    }
}
