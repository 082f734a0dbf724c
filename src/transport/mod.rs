//! Transport module - the seam to the platform BLE stack.
//!
//! The platform owns connection establishment, service discovery, and GATT I/O.
//! The session sees it only through:
//! - [`Transport`] - write a chunk to the write characteristic, start an RSSI read,
//!   release the link
//! - [`TransportEvent`] - callbacks (state changes, notifications, RSSI results)
//!   delivered over an unbounded channel, so platform callback threads never block

mod mock;

use std::future::Future;
use std::io;

use bytes::Bytes;
use tokio::sync::mpsc;
use uuid::Uuid;

pub use mock::{MockRequest, MockTransport, Responder};

/// Peripheral GATT service.
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0xe63215e5_7003_49d8_96b0_b024798fb901);

/// Write-only characteristic carrying request chunks.
pub const WRITE_CHARACTERISTIC: Uuid = Uuid::from_u128(0xe63215e6_7003_49d8_96b0_b024798fb901);

/// Notify-only characteristic carrying response chunks.
pub const NOTIFY_CHARACTERISTIC: Uuid = Uuid::from_u128(0xe63215e7_7003_49d8_96b0_b024798fb901);

/// Client Characteristic Configuration Descriptor (enables notifications).
pub const CCCD_UUID: Uuid = Uuid::from_u128(0x00002902_0000_1000_8000_00805f9b34fb);

/// Raw I/O the session needs from the platform.
pub trait Transport: Send + Sync + 'static {
    /// Write one chunk to the write characteristic.
    ///
    /// Resolves once the platform confirms the write was accepted.
    fn write(&self, chunk: Bytes) -> impl Future<Output = io::Result<()>> + Send;

    /// Start a remote RSSI read. The value arrives as [`TransportEvent::Rssi`].
    fn request_rssi(&self) -> io::Result<()>;

    /// Release the link. Called once when the session shuts down.
    fn close(&self);
}

/// Platform callbacks, in arrival order.
#[derive(Debug)]
pub enum TransportEvent {
    /// Link layer connected; service discovery starts.
    Connected,
    /// GATT services discovered; notifications are being enabled.
    ServicesDiscovered,
    /// CCCD written; the notify characteristic is live.
    NotificationsEnabled,
    /// Bytes received on the notify characteristic.
    Notification(Bytes),
    /// Result of a [`Transport::request_rssi`] call.
    Rssi(io::Result<i16>),
    /// Platform-reported link error.
    Error(io::Error),
    /// Link lost or closed by the peer.
    Disconnected,
}

/// Sending half handed to platform callbacks.
pub type EventSender = mpsc::UnboundedSender<TransportEvent>;

/// Receiving half consumed by the session.
pub type EventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

/// Create a transport event channel.
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_characteristics_share_service_base() {
        let service = SERVICE_UUID.as_u128();
        let write = WRITE_CHARACTERISTIC.as_u128();
        let notify = NOTIFY_CHARACTERISTIC.as_u128();

        assert_eq!(write - service, 1 << 96);
        assert_eq!(notify - service, 2 << 96);
        assert_eq!(
            SERVICE_UUID.to_string(),
            "e63215e5-7003-49d8-96b0-b024798fb901"
        );
    }

    #[test]
    fn test_cccd_is_standard_descriptor() {
        assert_eq!(CCCD_UUID.to_string(), "00002902-0000-1000-8000-00805f9b34fb");
    }
}
