use std::fmt;

/// Lifecycle of a single connection.
///
/// `Connecting -> Open -> Closing -> Closed`. Only a fatal protocol error may
/// skip `Closing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

impl ConnectionState {
    pub fn is_open(self) -> bool {
        self == ConnectionState::Open
    }

    /// `Closing` or `Closed`: no new work is accepted.
    pub fn is_terminating(self) -> bool {
        matches!(self, ConnectionState::Closing | ConnectionState::Closed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Why a connection was closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The client ended its stream.
    ClientClosed,
    /// Reading from or writing to the transport failed.
    Transport(String),
    /// The peer violated the framing protocol. Fatal: skips `Closing`.
    Protocol(String),
    /// The relay is shutting down.
    Shutdown,
}

impl CloseReason {
    pub fn is_fatal(&self) -> bool {
        matches!(self, CloseReason::Protocol(_))
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::ClientClosed => f.write_str("client closed"),
            CloseReason::Transport(e) => write!(f, "transport error: {e}"),
            CloseReason::Protocol(e) => write!(f, "protocol error: {e}"),
            CloseReason::Shutdown => f.write_str("shutdown"),
        }
    }
}

/// Transition table for [`ConnectionState`]. Every transition is idempotent:
/// a call that does not apply returns `false` and changes nothing.
#[derive(Debug)]
pub struct Lifecycle {
    state: ConnectionState,
    reason: Option<CloseReason>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Connecting,
            reason: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn reason(&self) -> Option<&CloseReason> {
        self.reason.as_ref()
    }

    /// `Connecting -> Open`.
    pub fn open(&mut self) -> bool {
        if self.state == ConnectionState::Connecting {
            self.state = ConnectionState::Open;
            true
        } else {
            false
        }
    }

    /// `Connecting | Open -> Closing`, or straight to `Closed` for a fatal
    /// reason. The first reason wins.
    pub fn begin_close(&mut self, reason: CloseReason) -> bool {
        if self.state.is_terminating() {
            return false;
        }
        self.state = if reason.is_fatal() {
            ConnectionState::Closed
        } else {
            ConnectionState::Closing
        };
        self.reason = Some(reason);
        true
    }

    /// `Closing -> Closed`.
    pub fn finish_close(&mut self) -> bool {
        if self.state == ConnectionState::Closing {
            self.state = ConnectionState::Closed;
            true
        } else {
            false
        }
    }
}
