//! HTTP/2 stream state machine (RFC 7540 §5.1).

use crate::h2::flow_control::FlowControl;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    ReservedLocal,
    ReservedRemote,
    Open,
    HalfClosedLocal,
    HalfClosedRemote,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEvent {
    SendHeaders { end_stream: bool },
    RecvHeaders { end_stream: bool },
    SendPushPromise,
    RecvPushPromise,
    SendData { end_stream: bool },
    RecvData { end_stream: bool },
    SendRstStream,
    RecvRstStream,
}

#[derive(Debug)]
pub struct StreamTransitionError;

pub struct Stream {
    pub id: u32,
    pub state: StreamState,
    pub send_window: FlowControl,
    pub recv_window: FlowControl,
}

impl Stream {
    /// `send_window` and `recv_window` are seeded independently: the
    /// send side is bounded by the peer's current
    /// `SETTINGS_INITIAL_WINDOW_SIZE` (how much they've told us they can
    /// receive), the recv side by our own (RFC 7540 §6.9.2).
    pub fn new(id: u32, send_window: u32, recv_window: u32) -> Self {
        Self {
            id,
            state: StreamState::Idle,
            send_window: FlowControl::new(send_window),
            recv_window: FlowControl::new(recv_window),
        }
    }

    /// Advances the stream's state per RFC 7540's state diagram. Only
    /// transitions reachable in a server (no client-initiated push) are
    /// modeled; anything else is a protocol error for the caller to
    /// surface as RST_STREAM/GOAWAY.
    pub fn transition(&mut self, event: StreamEvent) -> Result<(), StreamTransitionError> {
        use StreamEvent::*;
        use StreamState::*;

        self.state = match (self.state, event) {
            (Idle, RecvHeaders { end_stream: false }) => Open,
            (Idle, RecvHeaders { end_stream: true }) => HalfClosedRemote,
            (Idle, SendPushPromise) => ReservedLocal,
            (Idle, RecvPushPromise) => ReservedRemote,

            (ReservedLocal, SendHeaders { end_stream: false }) => HalfClosedRemote,
            (ReservedLocal, SendHeaders { end_stream: true }) => Closed,
            (ReservedRemote, RecvHeaders { end_stream: false }) => HalfClosedLocal,
            (ReservedRemote, RecvHeaders { end_stream: true }) => Closed,

            (Open, RecvData { end_stream: true }) | (Open, RecvHeaders { end_stream: true }) => HalfClosedRemote,
            (Open, SendData { end_stream: true }) | (Open, SendHeaders { end_stream: true }) => HalfClosedLocal,
            (Open, _) => Open,

            (HalfClosedRemote, SendData { end_stream: true }) | (HalfClosedRemote, SendHeaders { end_stream: true }) => Closed,
            (HalfClosedRemote, SendData { end_stream: false }) | (HalfClosedRemote, SendHeaders { end_stream: false }) => HalfClosedRemote,

            (HalfClosedLocal, RecvData { end_stream: true }) | (HalfClosedLocal, RecvHeaders { end_stream: true }) => Closed,
            (HalfClosedLocal, RecvData { end_stream: false }) | (HalfClosedLocal, RecvHeaders { end_stream: false }) => HalfClosedLocal,

            (_, SendRstStream) | (_, RecvRstStream) => Closed,

            _ => return Err(StreamTransitionError),
        };
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.state == StreamState::Closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_to_open_on_headers_without_end_stream() {
        let mut s = Stream::new(1, 65535, 65535);
        s.transition(StreamEvent::RecvHeaders { end_stream: false }).unwrap();
        assert_eq!(s.state, StreamState::Open);
    }

    #[test]
    fn request_response_cycle_closes_stream() {
        let mut s = Stream::new(1, 65535, 65535);
        s.transition(StreamEvent::RecvHeaders { end_stream: true }).unwrap();
        assert_eq!(s.state, StreamState::HalfClosedRemote);
        s.transition(StreamEvent::SendHeaders { end_stream: true }).unwrap();
        assert_eq!(s.state, StreamState::Closed);
        assert!(s.is_closed());
    }

    #[test]
    fn rst_stream_closes_from_any_state() {
        let mut s = Stream::new(1, 65535, 65535);
        s.transition(StreamEvent::RecvHeaders { end_stream: false }).unwrap();
        s.transition(StreamEvent::RecvRstStream).unwrap();
        assert!(s.is_closed());
    }
}
