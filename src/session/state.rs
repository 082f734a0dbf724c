//! Connection state machine.
//!
//! ```text
//! Connecting ─Connected─► DiscoveringServices ─ServicesDiscovered─► EnablingNotifications
//!                                                                        │
//!            Disconnected ◄─Disconnected/Error (from any live state)     NotificationsEnabled
//!                                                                        ▼
//!                                                                      Ready
//! ```
//!
//! Transitions are pure; the session applies them under its lock.

use std::fmt;

/// Lifecycle of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Terminal. Also the state of a session that never started.
    Disconnected,
    /// Link-layer connect in progress.
    Connecting,
    /// Waiting for GATT service discovery.
    DiscoveringServices,
    /// Waiting for the CCCD write.
    EnablingNotifications,
    /// Requests may be issued.
    Ready,
}

/// State-relevant platform events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    Connected,
    ServicesDiscovered,
    NotificationsEnabled,
    Disconnected,
    Error,
}

impl ConnectionState {
    /// Next state after `event`, or `None` if the event does not apply here.
    pub fn next(self, event: LinkEvent) -> Option<ConnectionState> {
        use ConnectionState::*;

        match (self, event) {
            (Disconnected, _) => None,
            (_, LinkEvent::Disconnected | LinkEvent::Error) => Some(Disconnected),
            (Connecting, LinkEvent::Connected) => Some(DiscoveringServices),
            (DiscoveringServices, LinkEvent::ServicesDiscovered) => Some(EnablingNotifications),
            (EnablingNotifications, LinkEvent::NotificationsEnabled) => Some(Ready),
            _ => None,
        }
    }

    #[inline]
    pub fn is_ready(self) -> bool {
        self == ConnectionState::Ready
    }

    #[inline]
    pub fn is_terminal(self) -> bool {
        self == ConnectionState::Disconnected
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::DiscoveringServices => "discovering services",
            ConnectionState::EnablingNotifications => "enabling notifications",
            ConnectionState::Ready => "ready",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let mut state = ConnectionState::Connecting;
        for event in [
            LinkEvent::Connected,
            LinkEvent::ServicesDiscovered,
            LinkEvent::NotificationsEnabled,
        ] {
            state = state.next(event).unwrap();
        }
        assert!(state.is_ready());
    }

    #[test]
    fn test_out_of_order_events_ignored() {
        assert_eq!(
            ConnectionState::Connecting.next(LinkEvent::NotificationsEnabled),
            None
        );
        assert_eq!(
            ConnectionState::Ready.next(LinkEvent::Connected),
            None
        );
        assert_eq!(
            ConnectionState::DiscoveringServices.next(LinkEvent::Connected),
            None
        );
    }

    #[test]
    fn test_error_and_disconnect_are_terminal() {
        for state in [
            ConnectionState::Connecting,
            ConnectionState::DiscoveringServices,
            ConnectionState::EnablingNotifications,
            ConnectionState::Ready,
        ] {
            assert_eq!(
                state.next(LinkEvent::Error),
                Some(ConnectionState::Disconnected)
            );
            assert_eq!(
                state.next(LinkEvent::Disconnected),
                Some(ConnectionState::Disconnected)
            );
        }
    }

    #[test]
    fn test_disconnected_never_resurrects() {
        let state = ConnectionState::Disconnected;
        assert!(state.is_terminal());
        assert_eq!(state.next(LinkEvent::Connected), None);
        assert_eq!(state.next(LinkEvent::NotificationsEnabled), None);
    }
}
