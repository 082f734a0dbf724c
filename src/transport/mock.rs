//! Scripted in-memory transport.
//!
//! Reassembles the chunks the session writes back into request frames and hands
//! each complete request to a [`Responder`], whose reply chunks are delivered as
//! notifications. Used by the test suites and for exercising hosts without a radio.
//!
//! # Example
//!
//! ```
//! use std::collections::HashMap;
//! use dosimeter_link::transport::MockTransport;
//!
//! let (transport, _events) = MockTransport::new();
//! transport.set_responder(MockTransport::device_responder(HashMap::new()));
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use parking_lot::Mutex;

use super::{event_channel, EventReceiver, EventSender, Transport, TransportEvent};
use crate::protocol::{
    encode_response, opcode, Header, Response, LENGTH_PREFIX_SIZE, RETURN_CODE_OK,
};

/// Notification size used by the built-in replies.
pub const MOCK_NOTIFICATION_SIZE: usize = 20;

/// A request frame reassembled from written chunks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockRequest {
    /// Request header.
    pub header: Header,
    /// Argument bytes.
    pub args: Bytes,
}

/// Produces notification chunks for a request (empty = stay silent).
pub type Responder = Box<dyn FnMut(&MockRequest) -> Vec<Bytes> + Send>;

#[derive(Default)]
struct MockState {
    chunks: Vec<Bytes>,
    requests: Vec<MockRequest>,
    partial: BytesMut,
    responder: Option<Responder>,
    fail_writes: bool,
    rssi: Option<i16>,
    rssi_requests: usize,
    closed: bool,
}

/// In-memory [`Transport`] with scripted replies.
#[derive(Clone)]
pub struct MockTransport {
    events: EventSender,
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    /// Create a transport and the event receiver to hand to the session.
    pub fn new() -> (Self, EventReceiver) {
        let (events, rx) = event_channel();
        let transport = Self {
            events,
            state: Arc::new(Mutex::new(MockState::default())),
        };
        (transport, rx)
    }

    /// Emit the full connect → discover → notify-enable sequence.
    pub fn connect_ready(&self) {
        self.emit(TransportEvent::Connected);
        self.emit(TransportEvent::ServicesDiscovered);
        self.emit(TransportEvent::NotificationsEnabled);
    }

    /// Deliver an arbitrary platform event.
    pub fn emit(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }

    /// Deliver a notification chunk.
    pub fn notify(&self, chunk: impl Into<Bytes>) {
        self.emit(TransportEvent::Notification(chunk.into()));
    }

    /// Install the reply script.
    pub fn set_responder(&self, responder: Responder) {
        self.state.lock().responder = Some(responder);
    }

    /// Make every subsequent write fail.
    pub fn fail_writes(&self, fail: bool) {
        self.state.lock().fail_writes = fail;
    }

    /// Value reported for RSSI reads (`None` = never answer).
    pub fn set_rssi(&self, rssi: Option<i16>) {
        self.state.lock().rssi = rssi;
    }

    /// Chunks written so far.
    pub fn chunks(&self) -> Vec<Bytes> {
        self.state.lock().chunks.clone()
    }

    /// Requests reassembled so far.
    pub fn requests(&self) -> Vec<MockRequest> {
        self.state.lock().requests.clone()
    }

    /// Opcodes of the requests received so far, in order.
    pub fn opcodes(&self) -> Vec<u16> {
        self.state
            .lock()
            .requests
            .iter()
            .map(|r| r.header.opcode)
            .collect()
    }

    /// Number of RSSI reads started.
    pub fn rssi_requests(&self) -> usize {
        self.state.lock().rssi_requests
    }

    /// Whether `close` was called.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Split a response frame into notification-sized chunks.
    pub fn reply(header: &Header, payload: &[u8], chunk_size: usize) -> Vec<Bytes> {
        let frame = encode_response(header, payload);
        let chunk_size = chunk_size.max(1);
        (0..frame.len())
            .step_by(chunk_size)
            .map(|start| frame.slice(start..(start + chunk_size).min(frame.len())))
            .collect()
    }

    /// Responder emulating the peripheral's handshake and virtual-string reads.
    ///
    /// `SET_EXCHANGE` and `SET_TIME` get empty replies, `WR_VIRT_SFR` answers with
    /// return code 1, `RD_VIRT_STRING` serves `strings` (unknown ids return code 0).
    pub fn device_responder(strings: HashMap<u32, Bytes>) -> Responder {
        Box::new(move |request: &MockRequest| {
            let payload = match request.header.opcode {
                opcode::WR_VIRT_SFR => RETURN_CODE_OK.to_le_bytes().to_vec(),
                opcode::RD_VIRT_STRING => {
                    let id = request
                        .args
                        .get(..4)
                        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                        .unwrap_or_default();
                    virt_string_reply(strings.get(&id))
                }
                _ => Vec::new(),
            };
            Self::reply(&request.header, &payload, MOCK_NOTIFICATION_SIZE)
        })
    }

    fn accept_chunk(&self, chunk: Bytes) -> io::Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "link closed"));
        }
        if state.fail_writes {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "write rejected"));
        }

        state.partial.extend_from_slice(&chunk);
        state.chunks.push(chunk);

        while let Some(request) = take_request(&mut state.partial) {
            state.requests.push(request.clone());
            let replies = match state.responder.as_mut() {
                Some(responder) => responder(&request),
                None => Vec::new(),
            };
            for reply in replies {
                let _ = self.events.send(TransportEvent::Notification(reply));
            }
        }
        Ok(())
    }
}

fn virt_string_reply(data: Option<&Bytes>) -> Vec<u8> {
    let mut payload = Vec::new();
    match data {
        Some(data) => {
            payload.put_u32_le(RETURN_CODE_OK);
            payload.put_u32_le(data.len() as u32);
            payload.extend_from_slice(data);
        }
        None => {
            payload.put_u32_le(0);
            payload.put_u32_le(0);
        }
    }
    payload
}

fn take_request(partial: &mut BytesMut) -> Option<MockRequest> {
    if partial.len() < LENGTH_PREFIX_SIZE {
        return None;
    }
    let declared = u32::from_le_bytes([partial[0], partial[1], partial[2], partial[3]]) as usize;
    if partial.len() < LENGTH_PREFIX_SIZE + declared {
        return None;
    }
    let frame = partial.split_to(LENGTH_PREFIX_SIZE + declared).freeze();
    // Requests share the response layout.
    let Response { header, payload } = Response::from_message(frame.slice(LENGTH_PREFIX_SIZE..))?;
    Some(MockRequest {
        header,
        args: payload,
    })
}

impl Transport for MockTransport {
    fn write(&self, chunk: Bytes) -> impl Future<Output = io::Result<()>> + Send {
        std::future::ready(self.accept_chunk(chunk))
    }

    fn request_rssi(&self) -> io::Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "link closed"));
        }
        state.rssi_requests += 1;
        if let Some(rssi) = state.rssi {
            let _ = self.events.send(TransportEvent::Rssi(Ok(rssi)));
        }
        Ok(())
    }

    fn close(&self) {
        self.state.lock().closed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::build_request;

    #[tokio::test]
    async fn test_chunks_reassemble_into_request() {
        let (transport, _events) = MockTransport::new();
        let frame = build_request(opcode::RD_VIRT_STRING, 2, &[0x00, 0x02, 0x00, 0x00]);

        for piece in frame.bytes().chunks(5) {
            transport.write(Bytes::copy_from_slice(piece)).await.unwrap();
        }

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].header, frame.header());
        assert_eq!(&requests[0].args[..], frame.args());
        assert_eq!(transport.chunks().len(), 3);
    }

    #[tokio::test]
    async fn test_device_responder_serves_strings() {
        let (transport, mut events) = MockTransport::new();
        let mut strings = HashMap::new();
        strings.insert(0x202, Bytes::from_static(&[1, 2, 3]));
        transport.set_responder(MockTransport::device_responder(strings));

        let frame = build_request(opcode::RD_VIRT_STRING, 0, &0x202u32.to_le_bytes());
        transport.write(frame.bytes().clone()).await.unwrap();

        let mut received = Vec::new();
        while let Ok(TransportEvent::Notification(chunk)) = events.try_recv() {
            received.extend_from_slice(&chunk);
        }
        assert_eq!(&received[..4], &15u32.to_le_bytes());
        assert_eq!(&received[4..8], &frame.header().encode());
        assert_eq!(&received[8..12], &1u32.to_le_bytes());
        assert_eq!(&received[12..16], &3u32.to_le_bytes());
        assert_eq!(&received[16..], &[1, 2, 3]);
    }

    #[tokio::test]
    async fn test_failed_and_closed_writes() {
        let (transport, _events) = MockTransport::new();
        transport.fail_writes(true);
        assert!(transport.write(Bytes::from_static(b"x")).await.is_err());

        transport.fail_writes(false);
        transport.close();
        assert!(transport.is_closed());
        assert!(transport.write(Bytes::from_static(b"x")).await.is_err());
        assert!(transport.request_rssi().is_err());
    }

    #[test]
    fn test_reply_chunking() {
        let header = Header::request(opcode::SET_TIME, 1);
        let chunks = MockTransport::reply(&header, &[0u8; 30], 20);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].len(), 20);
        assert_eq!(chunks[1].len(), 18);
    }
}
