//! Session state machine

use std::fmt::{Display, Formatter};

/// Lifecycle of the client session.
///
/// `Connecting -> Connected -> Disconnected -> Connecting -> ... -> Closed`.
/// `Closed` is terminal and only entered on caller shutdown.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SessionState {
    Connecting,
    Connected,
    Disconnected,
    Closed,
}

impl SessionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, SessionState::Connected)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, SessionState::Closed)
    }
}

impl Display for SessionState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionState::Connecting => "CONNECTING",
            SessionState::Connected => "CONNECTED",
            SessionState::Disconnected => "DISCONNECTED",
            SessionState::Closed => "CLOSED",
        };
        f.write_str(s)
    }
}
