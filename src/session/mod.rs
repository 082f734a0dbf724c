//! Session module - one connection's request/response engine.
//!
//! A [`Session`] owns everything that lives as long as the link:
//! - the connection state machine ([`ConnectionState`])
//! - the single primary request slot and the independent RSSI slot
//! - the 5-bit sequence counter and the response assembler
//! - the writer task and the transport event loop
//!
//! # Architecture
//!
//! ```text
//!                     ┌──────────── Mutex<SessionState> ────────────┐
//! execute() ─install─►│ pending │ rssi │ sequence │ assembler │ conn │
//!     │               └────▲─────────▲──────────────────────▲────────┘
//!     │                    │ resolve │ resolve              │ transition
//!     ▼                    │         │                      │
//! WriterHandle ─► Writer Task      Event Loop ◄── TransportEvent (unbounded mpsc)
//!                     │                                     ▲
//!                     └──────── Transport::write ──────────►│ platform
//! ```
//!
//! The lock is never held across an await. Timers are plain tasks that hold a
//! weak reference and only act if the token they were armed for is still pending.

mod config;
mod state;

use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

use crate::error::{LinkError, Result};
use crate::protocol::{
    build_request, opcode, Header, ResponseAssembler, SequenceCounter, HEADER_SIZE,
};
use crate::transport::{EventReceiver, Transport, TransportEvent};
use crate::writer::{spawn_writer_task, WriterHandle};

pub use config::{
    SessionConfig, DEFAULT_EXCHANGE_TIMEOUT, DEFAULT_INIT_GRACE_PERIOD, DEFAULT_READY_TIMEOUT,
    DEFAULT_REQUEST_TIMEOUT, DEFAULT_RSSI_TIMEOUT,
};
pub use state::{ConnectionState, LinkEvent};

/// The outstanding primary request.
struct PendingRequest {
    token: u64,
    header: Header,
    tx: oneshot::Sender<Result<Bytes>>,
    timer: JoinHandle<()>,
}

impl PendingRequest {
    fn resolve(self, result: Result<Bytes>) {
        self.timer.abort();
        let _ = self.tx.send(result);
    }
}

/// The outstanding RSSI read.
struct PendingRssi {
    token: u64,
    tx: oneshot::Sender<Result<i16>>,
    timer: JoinHandle<()>,
}

impl PendingRssi {
    fn resolve(self, result: Result<i16>) {
        self.timer.abort();
        let _ = self.tx.send(result);
    }
}

/// Mutable per-connection state, guarded by one lock.
struct SessionState {
    connection: ConnectionState,
    sequence: SequenceCounter,
    pending: Option<PendingRequest>,
    rssi: Option<PendingRssi>,
    assembler: ResponseAssembler,
    next_token: u64,
}

impl SessionState {
    fn token(&mut self) -> u64 {
        self.next_token = self.next_token.wrapping_add(1);
        self.next_token
    }
}

struct Shared<T: Transport> {
    transport: Arc<T>,
    config: SessionConfig,
    state: Mutex<SessionState>,
    state_tx: watch::Sender<ConnectionState>,
    writer: WriterHandle,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Handle to one connection. Cheap to clone; all clones share the link.
pub struct Session<T: Transport> {
    shared: Arc<Shared<T>>,
}

impl<T: Transport> Clone for Session<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T: Transport> Session<T> {
    /// Start a session over `transport`, consuming its event stream.
    ///
    /// The session begins in `Connecting` and follows the platform's events
    /// towards `Ready`. Must be called within a Tokio runtime.
    pub fn open(transport: T, events: EventReceiver, config: SessionConfig) -> Self {
        let transport = Arc::new(transport);
        let (writer, writer_task) = spawn_writer_task(transport.clone(), config.chunk_size);
        let (state_tx, _) = watch::channel(ConnectionState::Connecting);

        let shared = Arc::new(Shared {
            transport,
            state: Mutex::new(SessionState {
                connection: ConnectionState::Connecting,
                sequence: SequenceCounter::new(),
                pending: None,
                rssi: None,
                assembler: ResponseAssembler::with_max_response(config.max_response_size),
                next_token: 0,
            }),
            config,
            state_tx,
            writer,
            tasks: Mutex::new(Vec::with_capacity(2)),
        });

        let event_task = tokio::spawn(event_loop(Arc::downgrade(&shared), events));
        {
            let mut tasks = shared.tasks.lock();
            tasks.push(writer_task);
            tasks.push(event_task);
        }

        // The event loop may already have torn the link down.
        if shared.state.lock().connection.is_terminal() {
            shared.abort_tasks();
        }

        tracing::debug!("Session opened");
        Session { shared }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.shared.state.lock().connection
    }

    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }

    /// Wait until the link is `Ready`.
    ///
    /// Fails with `Disconnected` if the link dies first, or `Timeout` after `timeout`.
    pub async fn wait_ready(&self, timeout: Duration) -> Result<()> {
        let mut rx = self.shared.state_tx.subscribe();
        let wait = async move {
            loop {
                let state = *rx.borrow_and_update();
                match state {
                    ConnectionState::Ready => return Ok(()),
                    ConnectionState::Disconnected => return Err(LinkError::Disconnected),
                    _ => {}
                }
                if rx.changed().await.is_err() {
                    return Err(LinkError::Disconnected);
                }
            }
        };

        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| LinkError::Timeout {
                operation: "link ready".to_string(),
                after: timeout,
            })?
    }

    /// Send one request and wait for its correlated response payload.
    ///
    /// # Errors
    ///
    /// - `NotConnected` unless the link is `Ready`
    /// - `RequestAlreadyInFlight` if another request is pending (that one is untouched)
    /// - `TransportWriteFailed` if a chunk write fails
    /// - `Timeout` if no response arrives in time
    /// - `MalformedResponse` if the response is invalid or belongs to another request
    /// - `Disconnected` if the link goes down meanwhile
    pub async fn execute(&self, op: u16, args: &[u8]) -> Result<Bytes> {
        let after = self.shared.config.timeout_for(op);

        let (token, frame, rx) = {
            let mut state = self.shared.state.lock();
            if !state.connection.is_ready() {
                return Err(LinkError::NotConnected);
            }
            if state.pending.is_some() {
                return Err(LinkError::RequestAlreadyInFlight);
            }

            let counter = state.sequence.advance();
            let frame = build_request(op, counter, args);
            let token = state.token();
            let (tx, rx) = oneshot::channel();

            let weak = Arc::downgrade(&self.shared);
            let timer = tokio::spawn(async move {
                tokio::time::sleep(after).await;
                if let Some(shared) = weak.upgrade() {
                    shared.expire_request(token, after);
                }
            });

            state.assembler.reset();
            state.pending = Some(PendingRequest {
                token,
                header: frame.header(),
                tx,
                timer,
            });
            (token, frame, rx)
        };

        tracing::debug!(
            "Sending {} (seq {:#04x}, {} bytes)",
            opcode::name(op),
            frame.header().sequence,
            frame.len()
        );

        if let Err(e) = self.shared.writer.send(frame.into_bytes()).await {
            self.shared.fail_request(token, e);
        }

        rx.await.unwrap_or(Err(LinkError::Disconnected))
    }

    /// Read the link's signal strength in dBm.
    ///
    /// Uses its own slot, so it may overlap a primary request.
    pub async fn read_rssi(&self) -> Result<i16> {
        let after = self.shared.config.rssi_timeout;

        let (token, rx) = {
            let mut state = self.shared.state.lock();
            if !state.connection.is_ready() {
                return Err(LinkError::NotConnected);
            }
            if state.rssi.is_some() {
                return Err(LinkError::RequestAlreadyInFlight);
            }

            let token = state.token();
            let (tx, rx) = oneshot::channel();
            let weak = Arc::downgrade(&self.shared);
            let timer = tokio::spawn(async move {
                tokio::time::sleep(after).await;
                if let Some(shared) = weak.upgrade() {
                    shared.expire_rssi(token, after);
                }
            });
            state.rssi = Some(PendingRssi { token, tx, timer });
            (token, rx)
        };

        if let Err(e) = self.shared.transport.request_rssi() {
            tracing::warn!("RSSI read could not start: {}", e);
            self.shared.fail_rssi(token, LinkError::Transport(e));
        }

        rx.await.unwrap_or(Err(LinkError::Disconnected))
    }

    /// Tear the link down. Pending operations fail with `Disconnected`.
    ///
    /// Idempotent.
    pub fn close(&self) {
        self.shared.shutdown(LinkEvent::Disconnected, "closed by caller");
    }
}

impl<T: Transport> Shared<T> {
    fn handle_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => self.transition(LinkEvent::Connected),
            TransportEvent::ServicesDiscovered => self.transition(LinkEvent::ServicesDiscovered),
            TransportEvent::NotificationsEnabled => {
                self.transition(LinkEvent::NotificationsEnabled)
            }
            TransportEvent::Notification(chunk) => self.on_notification(&chunk),
            TransportEvent::Rssi(result) => self.on_rssi(result),
            TransportEvent::Error(e) => {
                tracing::error!("Transport error: {}", e);
                self.shutdown(LinkEvent::Error, "transport error");
            }
            TransportEvent::Disconnected => {
                self.shutdown(LinkEvent::Disconnected, "peer disconnected")
            }
        }
    }

    fn transition(&self, event: LinkEvent) {
        let mut state = self.state.lock();
        let current = state.connection;
        match current.next(event) {
            Some(next) => {
                tracing::debug!("Connection {} -> {}", current, next);
                state.connection = next;
                self.state_tx.send_replace(next);
            }
            None => {
                tracing::warn!("Ignoring {:?} while {}", event, current);
            }
        }
    }

    fn on_notification(&self, chunk: &[u8]) {
        let mut state = self.state.lock();

        let Some(expected) = state.pending.as_ref().map(|p| p.header) else {
            state.assembler.reset();
            tracing::debug!("Discarding orphan notification ({} bytes)", chunk.len());
            return;
        };

        let result = match state.assembler.push(chunk) {
            Ok(None) => return,
            Ok(Some(message)) => correlate(&expected, message),
            Err(e) => {
                tracing::warn!("Response reassembly failed: {}", e);
                Err(e)
            }
        };

        if let Some(pending) = state.pending.take() {
            pending.resolve(result);
        }
    }

    fn on_rssi(&self, result: std::io::Result<i16>) {
        let mut state = self.state.lock();
        match state.rssi.take() {
            Some(pending) => pending.resolve(result.map_err(LinkError::Transport)),
            None => tracing::debug!("Discarding RSSI result with no read pending"),
        }
    }

    /// Fail the primary request if `token` still owns the slot.
    fn fail_request(&self, token: u64, error: LinkError) {
        let mut state = self.state.lock();
        if state.pending.as_ref().is_some_and(|p| p.token == token) {
            if let Some(pending) = state.pending.take() {
                state.assembler.reset();
                pending.resolve(Err(error));
            }
        }
    }

    fn fail_rssi(&self, token: u64, error: LinkError) {
        let mut state = self.state.lock();
        if state.rssi.as_ref().is_some_and(|p| p.token == token) {
            if let Some(pending) = state.rssi.take() {
                pending.resolve(Err(error));
            }
        }
    }

    fn expire_request(&self, token: u64, after: Duration) {
        let mut state = self.state.lock();
        if !state.pending.as_ref().is_some_and(|p| p.token == token) {
            return;
        }
        let Some(pending) = state.pending.take() else {
            return;
        };
        state.assembler.reset();

        let name = opcode::name(pending.header.opcode);
        tracing::warn!(
            "{} (seq {:#04x}) timed out after {:?}",
            name,
            pending.header.sequence,
            after
        );
        let _ = pending.tx.send(Err(LinkError::Timeout {
            operation: format!("{} response", name),
            after,
        }));
    }

    fn expire_rssi(&self, token: u64, after: Duration) {
        let mut state = self.state.lock();
        if !state.rssi.as_ref().is_some_and(|p| p.token == token) {
            return;
        }
        if let Some(pending) = state.rssi.take() {
            tracing::warn!("RSSI read timed out after {:?}", after);
            let _ = pending.tx.send(Err(LinkError::Timeout {
                operation: "RSSI".to_string(),
                after,
            }));
        }
    }

    /// Apply a terminal link event and fail everything outstanding. Runs at most once.
    fn shutdown(&self, event: LinkEvent, reason: &str) {
        {
            let mut state = self.state.lock();
            let current = state.connection;
            // `Disconnected` has no way out, so a second shutdown is a no-op.
            let Some(next) = current.next(event) else {
                return;
            };
            tracing::debug!("Connection {} -> {}", current, next);
            state.connection = next;
            state.assembler.reset();
            if let Some(pending) = state.pending.take() {
                pending.resolve(Err(LinkError::Disconnected));
            }
            if let Some(pending) = state.rssi.take() {
                pending.resolve(Err(LinkError::Disconnected));
            }
            self.state_tx.send_replace(next);
        }

        tracing::info!("Session shut down: {}", reason);
        self.transport.close();
        self.abort_tasks();
    }

    fn abort_tasks(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

impl<T: Transport> Drop for Shared<T> {
    fn drop(&mut self) {
        if !self.state.get_mut().connection.is_terminal() {
            self.transport.close();
        }
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}

/// Check a reassembled message against the request it should answer.
///
/// All four header bytes must match, the reserved byte included.
fn correlate(expected: &Header, message: Bytes) -> Result<Bytes> {
    if message.len() < HEADER_SIZE {
        return Err(LinkError::malformed(format!(
            "response of {} bytes has no header",
            message.len()
        )));
    }

    let sent = expected.encode();
    if message[..HEADER_SIZE] != sent {
        let received = &message[..HEADER_SIZE];
        return Err(LinkError::malformed(format!(
            "sent opcode {:#06x} seq {:#04x}, received opcode {:#06x} seq {:#04x} (reserved {:#04x})",
            expected.opcode,
            expected.sequence,
            u16::from_le_bytes([received[0], received[1]]),
            received[3],
            received[2]
        )));
    }

    Ok(message.slice(HEADER_SIZE..))
}

async fn event_loop<T: Transport>(shared: Weak<Shared<T>>, mut events: EventReceiver) {
    while let Some(event) = events.recv().await {
        let Some(session) = shared.upgrade() else {
            return;
        };
        session.handle_event(event);
        if session.state.lock().connection.is_terminal() {
            return;
        }
    }

    if let Some(session) = shared.upgrade() {
        session.shutdown(LinkEvent::Disconnected, "transport event stream ended");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::encode_response;
    use crate::transport::{event_channel, MockRequest, MockTransport};

    fn fast_config() -> SessionConfig {
        SessionConfig {
            request_timeout: Duration::from_millis(100),
            exchange_timeout: Duration::from_millis(100),
            rssi_timeout: Duration::from_millis(100),
            ..SessionConfig::default()
        }
    }

    async fn ready_session() -> (Session<MockTransport>, MockTransport) {
        let (transport, events) = MockTransport::new();
        let session = Session::open(transport.clone(), events, fast_config());
        transport.connect_ready();
        session.wait_ready(Duration::from_secs(1)).await.unwrap();
        (session, transport)
    }

    #[test]
    fn test_correlate_match() {
        let header = Header::request(opcode::RD_VIRT_STRING, 4);
        let frame = encode_response(&header, &[9, 8, 7]);
        let payload = correlate(&header, frame.slice(4..)).unwrap();
        assert_eq!(&payload[..], &[9, 8, 7]);
    }

    #[test]
    fn test_correlate_mismatch_names_both_headers() {
        let sent = Header::request(opcode::RD_VIRT_STRING, 4);
        let received = Header::request(opcode::RD_VIRT_STRING, 5);
        let frame = encode_response(&received, &[]);

        let err = correlate(&sent, frame.slice(4..)).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("0x84"));
        assert!(msg.contains("0x85"));
    }

    #[test]
    fn test_correlate_rejects_nonzero_reserved_byte() {
        let sent = Header::request(opcode::WR_VIRT_SFR, 3);
        let mut message = sent.encode().to_vec();
        message[2] = 0x5A;
        message.extend_from_slice(&[1, 0, 0, 0]);

        let err = correlate(&sent, Bytes::from(message)).unwrap_err();
        assert!(matches!(err, LinkError::MalformedResponse(_)));
        assert!(err.to_string().contains("0x5a"));
    }

    #[test]
    fn test_correlate_short_message() {
        let header = Header::request(opcode::SET_TIME, 0);
        let err = correlate(&header, Bytes::from_static(&[0x04, 0x0A])).unwrap_err();
        assert!(matches!(err, LinkError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn test_execute_before_ready() {
        let (transport, events) = MockTransport::new();
        let session = Session::open(transport, events, fast_config());

        assert_eq!(session.state(), ConnectionState::Connecting);
        let result = session.execute(opcode::SET_TIME, &[]).await;
        assert!(matches!(result, Err(LinkError::NotConnected)));
    }

    #[tokio::test]
    async fn test_execute_round_trip() {
        let (session, transport) = ready_session().await;
        transport.set_responder(Box::new(|req: &MockRequest| {
            MockTransport::reply(&req.header, b"ok", 20)
        }));

        let payload = session.execute(opcode::SET_TIME, &[1, 2, 3]).await.unwrap();
        assert_eq!(&payload[..], b"ok");
        assert_eq!(transport.opcodes(), vec![opcode::SET_TIME]);
    }

    #[tokio::test]
    async fn test_wait_ready_times_out() {
        let (transport, events) = MockTransport::new();
        let session = Session::open(transport.clone(), events, fast_config());
        transport.emit(TransportEvent::Connected);

        let result = session.wait_ready(Duration::from_millis(50)).await;
        assert!(matches!(result, Err(LinkError::Timeout { .. })));
        assert_eq!(session.state(), ConnectionState::DiscoveringServices);
    }

    #[tokio::test]
    async fn test_wait_ready_fails_on_disconnect() {
        let (transport, events) = MockTransport::new();
        let session = Session::open(transport.clone(), events, fast_config());
        transport.emit(TransportEvent::Connected);
        transport.emit(TransportEvent::Disconnected);

        let result = session.wait_ready(Duration::from_secs(1)).await;
        assert!(matches!(result, Err(LinkError::Disconnected)));
        assert!(transport.is_closed());
    }

    #[tokio::test]
    async fn test_rssi_result_and_error() {
        let (session, transport) = ready_session().await;

        transport.set_rssi(Some(-61));
        assert_eq!(session.read_rssi().await.unwrap(), -61);

        transport.set_rssi(None);
        let pending = tokio::spawn({
            let session = session.clone();
            async move { session.read_rssi().await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        transport.emit(TransportEvent::Rssi(Err(std::io::Error::other("radio busy"))));

        let result = pending.await.unwrap();
        assert!(matches!(result, Err(LinkError::Transport(_))));
    }

    #[tokio::test]
    async fn test_transport_error_before_ready_is_terminal() {
        let (transport, events) = MockTransport::new();
        let session = Session::open(transport.clone(), events, fast_config());
        transport.emit(TransportEvent::Connected);
        transport.emit(TransportEvent::Error(std::io::Error::other("gatt 133")));

        let result = session.wait_ready(Duration::from_secs(1)).await;
        assert!(matches!(result, Err(LinkError::Disconnected)));
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert!(transport.is_closed());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (session, transport) = ready_session().await;
        session.close();
        session.close();

        assert!(transport.is_closed());
        assert_eq!(session.state(), ConnectionState::Disconnected);
        let result = session.execute(opcode::SET_TIME, &[]).await;
        assert!(matches!(result, Err(LinkError::NotConnected)));
    }

    #[tokio::test]
    async fn test_event_stream_end_shuts_down() {
        let (transport, _unused) = MockTransport::new();
        let (events_tx, events) = event_channel();
        let session = Session::open(transport.clone(), events, fast_config());
        for event in [
            TransportEvent::Connected,
            TransportEvent::ServicesDiscovered,
            TransportEvent::NotificationsEnabled,
        ] {
            events_tx.send(event).unwrap();
        }
        session.wait_ready(Duration::from_secs(1)).await.unwrap();

        drop(events_tx);

        let mut rx = session.shared.state_tx.subscribe();
        tokio::time::timeout(Duration::from_secs(1), rx.wait_for(|s| s.is_terminal()))
            .await
            .unwrap()
            .unwrap();
        assert!(transport.is_closed());
    }
}
