//! Per-connection initialization handshake.
//!
//! ```text
//! Ready ─► grace period ─► SET_EXCHANGE ─► SET_TIME ─► WR_VIRT_SFR(DEVICE_TIME, 0)
//!                                                        │
//!                                      return code == 1 ◄┘
//! ```

use std::time::Duration;

use bytes::Buf;
use chrono::NaiveDateTime;

use crate::error::{LinkError, Result};
use crate::protocol::{opcode, pack_local_time, pack_register_write, vsfr, RETURN_CODE_OK};
use crate::session::Session;
use crate::transport::Transport;

/// Fixed argument of the exchange-mode command.
pub const EXCHANGE_ARGS: [u8; 4] = [0x01, 0xFF, 0x12, 0xFF];

/// One command of the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitStep {
    /// Put the peripheral in exchange mode.
    Exchange,
    /// Set the peripheral clock from local wall-clock time.
    SetTime,
    /// Zero the device-time register.
    DeviceTime,
}

/// Handshake steps, in the order they are sent.
pub const INIT_SEQUENCE: [InitStep; 3] = [InitStep::Exchange, InitStep::SetTime, InitStep::DeviceTime];

impl InitStep {
    pub fn opcode(self) -> u16 {
        match self {
            InitStep::Exchange => opcode::SET_EXCHANGE,
            InitStep::SetTime => opcode::SET_TIME,
            InitStep::DeviceTime => opcode::WR_VIRT_SFR,
        }
    }

    /// Argument bytes for this step, with `now` as the local wall-clock time.
    pub fn args(self, now: &NaiveDateTime) -> Vec<u8> {
        match self {
            InitStep::Exchange => EXCHANGE_ARGS.to_vec(),
            InitStep::SetTime => pack_local_time(now).to_vec(),
            InitStep::DeviceTime => pack_register_write(vsfr::DEVICE_TIME, 0).to_vec(),
        }
    }
}

/// Run the handshake over a `Ready` session.
///
/// Each step is a full round trip; the first failure aborts the sequence.
pub async fn run_init_sequence<T: Transport>(
    session: &Session<T>,
    grace: Duration,
    now: NaiveDateTime,
) -> Result<()> {
    if !grace.is_zero() {
        tokio::time::sleep(grace).await;
    }

    let mut last = None;
    for step in INIT_SEQUENCE {
        let op = step.opcode();
        tracing::info!("Init step {:?} ({})", step, opcode::name(op));
        let payload = session.execute(op, &step.args(&now)).await?;
        last = Some((op, payload));
    }

    if let Some((op, payload)) = last {
        check_return_code(op, &payload)?;
    }
    tracing::info!("Initialization complete");
    Ok(())
}

/// Verify the leading little-endian return code of a command response.
pub fn check_return_code(op: u16, mut payload: &[u8]) -> Result<()> {
    if payload.len() < 4 {
        return Err(LinkError::malformed(format!(
            "{} response of {} bytes has no return code",
            opcode::name(op),
            payload.len()
        )));
    }
    let code = payload.get_u32_le();
    if code != RETURN_CODE_OK {
        return Err(LinkError::ProtocolReturnCode { opcode: op, code });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn sample_time() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 15)
            .unwrap()
            .and_hms_opt(13, 45, 30)
            .unwrap()
    }

    #[test]
    fn test_sequence_order() {
        let opcodes: Vec<u16> = INIT_SEQUENCE.iter().map(|s| s.opcode()).collect();
        assert_eq!(
            opcodes,
            vec![opcode::SET_EXCHANGE, opcode::SET_TIME, opcode::WR_VIRT_SFR]
        );
    }

    #[test]
    fn test_step_args() {
        let now = sample_time();
        assert_eq!(InitStep::Exchange.args(&now), vec![0x01, 0xFF, 0x12, 0xFF]);
        assert_eq!(InitStep::SetTime.args(&now), vec![15, 3, 24, 0, 30, 45, 13, 0]);
        assert_eq!(
            InitStep::DeviceTime.args(&now),
            vec![0x04, 0x05, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn test_check_return_code() {
        assert!(check_return_code(opcode::WR_VIRT_SFR, &[1, 0, 0, 0]).is_ok());
        assert!(check_return_code(opcode::WR_VIRT_SFR, &[1, 0, 0, 0, 0xAA]).is_ok());

        let err = check_return_code(opcode::WR_VIRT_SFR, &[0, 0, 0, 0]).unwrap_err();
        assert!(matches!(
            err,
            LinkError::ProtocolReturnCode {
                opcode: opcode::WR_VIRT_SFR,
                code: 0
            }
        ));

        let err = check_return_code(opcode::WR_VIRT_SFR, &[1, 0]).unwrap_err();
        assert!(matches!(err, LinkError::MalformedResponse(_)));
    }
}
