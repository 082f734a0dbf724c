//! Client builder and device operations.
//!
//! The [`ClientBuilder`] provides a fluent API for configuring the session.
//! [`ClientBuilder::connect`] manages the lifecycle:
//! 1. Open a session over the platform transport
//! 2. Wait for the link to become `Ready`
//! 3. Run the initialization handshake
//! 4. Hand back a [`DeviceClient`] for typed device operations
//!
//! # Example
//!
//! ```
//! use std::collections::HashMap;
//! use std::time::Duration;
//!
//! use bytes::Bytes;
//! use dosimeter_link::protocol::virt_string;
//! use dosimeter_link::transport::MockTransport;
//! use dosimeter_link::ClientBuilder;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> dosimeter_link::Result<()> {
//! let (transport, events) = MockTransport::new();
//! let mut strings = HashMap::new();
//! strings.insert(virt_string::ENERGY_CALIB, Bytes::from_static(&[0u8; 12]));
//! transport.set_responder(MockTransport::device_responder(strings));
//! transport.connect_ready();
//!
//! let client = ClientBuilder::new()
//!     .init_grace_period(Duration::ZERO)
//!     .connect(transport, events)
//!     .await?;
//!
//! let calibration = client.energy_calibration().await?;
//! assert_eq!(calibration.a1, 0.0);
//! client.close();
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use bytes::{Buf, Bytes};
use chrono::{Datelike, Local, Timelike, Utc};

use crate::codec::{decode_realtime, EnergyCalibration, RealTimeData, SpectrumData};
use crate::control::{check_return_code, run_init_sequence};
use crate::error::{LinkError, Result};
use crate::protocol::{
    opcode, pack_local_time, pack_register_write, pack_u32, virt_string, vsfr, RETURN_CODE_OK,
};
use crate::session::{ConnectionState, Session, SessionConfig};
use crate::transport::{EventReceiver, Transport};

/// Builder for configuring and connecting a device client.
pub struct ClientBuilder {
    config: SessionConfig,
}

impl ClientBuilder {
    /// Create a new client builder with default settings.
    pub fn new() -> Self {
        Self {
            config: SessionConfig::default(),
        }
    }

    /// Replace the whole session configuration.
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the outbound chunk size.
    ///
    /// Default: 18 bytes
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.config.chunk_size = size;
        self
    }

    /// Set the deadline for ordinary requests.
    ///
    /// Default: 10 seconds
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Set the deadline for the exchange-mode command.
    ///
    /// Default: 20 seconds
    pub fn exchange_timeout(mut self, timeout: Duration) -> Self {
        self.config.exchange_timeout = timeout;
        self
    }

    /// Set the deadline for RSSI reads.
    ///
    /// Default: 5 seconds
    pub fn rssi_timeout(mut self, timeout: Duration) -> Self {
        self.config.rssi_timeout = timeout;
        self
    }

    /// Set the largest accepted response.
    ///
    /// Default: 256 KiB
    pub fn max_response_size(mut self, size: usize) -> Self {
        self.config.max_response_size = size;
        self
    }

    /// Set the pause between notification setup and the handshake.
    ///
    /// Default: 500 ms
    pub fn init_grace_period(mut self, period: Duration) -> Self {
        self.config.init_grace_period = period;
        self
    }

    /// Set how long to wait for the link to become ready.
    ///
    /// Default: 30 seconds
    pub fn ready_timeout(mut self, timeout: Duration) -> Self {
        self.config.ready_timeout = timeout;
        self
    }

    /// Open a session and run the handshake.
    ///
    /// On any failure the session is closed before the error is returned.
    pub async fn connect<T: Transport>(
        self,
        transport: T,
        events: EventReceiver,
    ) -> Result<DeviceClient<T>> {
        let ready_timeout = self.config.ready_timeout;
        let grace = self.config.init_grace_period;
        let session = Session::open(transport, events, self.config);

        let started = async {
            session.wait_ready(ready_timeout).await?;
            run_init_sequence(&session, grace, Local::now().naive_local()).await
        };

        if let Err(e) = started.await {
            tracing::error!("Device initialization failed: {}", e);
            session.close();
            return Err(e);
        }

        Ok(DeviceClient { session })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A connected, initialized device.
pub struct DeviceClient<T: Transport> {
    session: Session<T>,
}

impl<T: Transport> DeviceClient<T> {
    /// Read a virtual string by id.
    pub async fn read_virt_string(&self, id: u32) -> Result<Bytes> {
        let payload = self
            .session
            .execute(opcode::RD_VIRT_STRING, &pack_u32(id))
            .await?;
        parse_virt_string(id, payload)
    }

    /// Write a 32-bit virtual register.
    pub async fn write_register(&self, address: u32, value: u32) -> Result<()> {
        let payload = self
            .session
            .execute(opcode::WR_VIRT_SFR, &pack_register_write(address, value))
            .await?;
        check_return_code(opcode::WR_VIRT_SFR, &payload)
    }

    /// Newest realtime reading in the data buffer, if any.
    pub async fn real_time_data(&self) -> Result<Option<RealTimeData>> {
        let data = self.read_virt_string(virt_string::DATA_BUF).await?;
        Ok(decode_realtime(&data, Utc::now()))
    }

    /// Accumulated spectrum with its calibration.
    pub async fn spectrum(&self) -> Result<SpectrumData> {
        let data = self.read_virt_string(virt_string::SPECTRUM).await?;
        SpectrumData::decode(&data)
    }

    pub async fn energy_calibration(&self) -> Result<EnergyCalibration> {
        let data = self.read_virt_string(virt_string::ENERGY_CALIB).await?;
        EnergyCalibration::decode(&data)
    }

    /// Set the peripheral clock.
    pub async fn set_local_time<D: Datelike + Timelike>(&self, time: &D) -> Result<()> {
        self.session
            .execute(opcode::SET_TIME, &pack_local_time(time))
            .await?;
        Ok(())
    }

    /// Write the device-time register.
    pub async fn set_device_time(&self, value: u32) -> Result<()> {
        self.write_register(vsfr::DEVICE_TIME, value).await
    }

    /// Signal strength in dBm.
    pub async fn read_rssi(&self) -> Result<i16> {
        self.session.read_rssi().await
    }

    pub fn state(&self) -> ConnectionState {
        self.session.state()
    }

    /// The underlying session, for raw `execute` calls.
    pub fn session(&self) -> &Session<T> {
        &self.session
    }

    /// Disconnect. Outstanding calls fail with `Disconnected`.
    pub fn close(&self) {
        self.session.close();
    }
}

/// Validate a `RD_VIRT_STRING` response and return its data.
///
/// Layout: u32 return code, u32 length, data. One NUL past the declared length
/// is accepted and stripped.
fn parse_virt_string(id: u32, payload: Bytes) -> Result<Bytes> {
    if payload.len() < 8 {
        return Err(LinkError::malformed(format!(
            "virtual string {:#x}: response of {} bytes",
            id,
            payload.len()
        )));
    }

    let mut head = &payload[..8];
    let code = head.get_u32_le();
    let len = head.get_u32_le() as usize;
    if code != RETURN_CODE_OK {
        return Err(LinkError::ProtocolReturnCode {
            opcode: opcode::RD_VIRT_STRING,
            code,
        });
    }

    let data = payload.slice(8..);
    match data.len().checked_sub(len) {
        Some(0) => Ok(data),
        Some(1) if data[len] == 0 => Ok(data.slice(..len)),
        Some(extra) => Err(LinkError::malformed(format!(
            "virtual string {:#x}: {} bytes past declared length {}",
            id, extra, len
        ))),
        None => Err(LinkError::malformed(format!(
            "virtual string {:#x}: declared {} bytes, got {}",
            id,
            len,
            data.len()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn virt_string_payload(code: u32, len: u32, data: &[u8]) -> Bytes {
        let mut payload = Vec::new();
        payload.extend_from_slice(&code.to_le_bytes());
        payload.extend_from_slice(&len.to_le_bytes());
        payload.extend_from_slice(data);
        Bytes::from(payload)
    }

    #[test]
    fn test_builder_default() {
        let builder = ClientBuilder::default();
        assert_eq!(builder.config.chunk_size, 18);
    }

    #[test]
    fn test_builder_method_chaining() {
        let builder = ClientBuilder::new()
            .chunk_size(20)
            .request_timeout(Duration::from_secs(3))
            .exchange_timeout(Duration::from_secs(6))
            .rssi_timeout(Duration::from_secs(1))
            .max_response_size(4096)
            .init_grace_period(Duration::ZERO)
            .ready_timeout(Duration::from_secs(2));

        assert_eq!(builder.config.chunk_size, 20);
        assert_eq!(builder.config.request_timeout, Duration::from_secs(3));
        assert_eq!(builder.config.exchange_timeout, Duration::from_secs(6));
        assert_eq!(builder.config.rssi_timeout, Duration::from_secs(1));
        assert_eq!(builder.config.max_response_size, 4096);
        assert!(builder.config.init_grace_period.is_zero());
        assert_eq!(builder.config.ready_timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_parse_virt_string_exact() {
        let data = parse_virt_string(0x202, virt_string_payload(1, 3, &[7, 8, 9])).unwrap();
        assert_eq!(&data[..], &[7, 8, 9]);
    }

    #[test]
    fn test_parse_virt_string_trailing_nul() {
        let data = parse_virt_string(0x202, virt_string_payload(1, 2, &[7, 8, 0])).unwrap();
        assert_eq!(&data[..], &[7, 8]);

        let err = parse_virt_string(0x202, virt_string_payload(1, 1, &[7, 8, 0])).unwrap_err();
        assert!(matches!(err, LinkError::MalformedResponse(_)));
    }

    #[test]
    fn test_parse_virt_string_short_data() {
        let err = parse_virt_string(0x100, virt_string_payload(1, 10, &[1, 2])).unwrap_err();
        assert!(matches!(err, LinkError::MalformedResponse(_)));

        let err = parse_virt_string(0x100, Bytes::from_static(&[1, 0, 0, 0])).unwrap_err();
        assert!(matches!(err, LinkError::MalformedResponse(_)));
    }

    #[test]
    fn test_parse_virt_string_return_code() {
        let err = parse_virt_string(0x200, virt_string_payload(0, 0, &[])).unwrap_err();
        assert!(matches!(
            err,
            LinkError::ProtocolReturnCode {
                opcode: opcode::RD_VIRT_STRING,
                code: 0
            }
        ));
    }
}
