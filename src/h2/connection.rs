//! HTTP/2 connection driver (RFC 7540 §3, §5, §6): preface validation,
//! frame intake and dispatch, SETTINGS negotiation, HPACK-backed
//! HEADERS processing, and GOAWAY emission. Buffer-oriented like
//! `http1::connection`: callers hand it bytes read off the socket and
//! drain the bytes it wants written, rather than it owning any fd.

use std::collections::HashMap;
use std::sync::Arc;

use crate::h2::flow_control::FlowControl;
use crate::h2::frame::{
    self, flags, ErrorCode, FrameError, FrameHeader, FrameType, SettingsParameter, CONNECTION_PREFACE,
};
use crate::h2::settings::Settings;
use crate::h2::stream::{Stream, StreamEvent, StreamState};
use crate::hpack::{DecodedHeader, Decoder, Encoder, HeaderToEncode};
use crate::http1::types::{Context, Method, Request, Response, MAX_HEADERS, MAX_PARAMS};
use crate::router::Router;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    PrefacePending,
    Active,
    GoawaySent,
    GoawayReceived,
    Closed,
}

struct StreamSlot {
    stream: Stream,
    header_block: Vec<u8>,
    headers_done: bool,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
    /// Response body bytes queued for sending but not yet claimed against
    /// the connection/stream send windows; drained by `flush_pending` as
    /// WINDOW_UPDATE frames arrive.
    pending_response: Vec<u8>,
}

impl StreamSlot {
    fn new(id: u32, send_window: u32, recv_window: u32) -> Self {
        Self {
            stream: Stream::new(id, send_window, recv_window),
            header_block: Vec::new(),
            headers_done: false,
            headers: Vec::new(),
            body: Vec::new(),
            pending_response: Vec::new(),
        }
    }
}

/// Drives one HTTP/2 connection's worth of frame exchange against a
/// shared router. `out` accumulates bytes the caller must write to the
/// socket after each `process_*` call returns.
pub struct Http2Connection {
    state: ConnectionState,
    local_settings: Settings,
    remote_settings: Settings,
    decoder: Decoder,
    encoder: Encoder,
    conn_send_window: FlowControl,
    conn_recv_window: FlowControl,
    streams: HashMap<u32, StreamSlot>,
    last_peer_stream_id: u32,
    last_stream_processed: u32,
    router: Arc<Router>,
}

impl Http2Connection {
    pub fn new(router: Arc<Router>) -> Self {
        let local = Settings::default();
        Self {
            state: ConnectionState::Idle,
            decoder: Decoder::new(local.header_table_size as usize, local.max_header_list_size.unwrap_or(8192) as usize),
            encoder: Encoder::new(local.header_table_size as usize),
            conn_send_window: FlowControl::new(local.initial_window_size),
            conn_recv_window: FlowControl::new(local.initial_window_size),
            local_settings: local,
            remote_settings: Settings::default(),
            streams: HashMap::new(),
            last_peer_stream_id: 0,
            last_stream_processed: 0,
            router,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Emits the server's initial SETTINGS frame; call once after
    /// accepting the connection (and, for prior-knowledge h2c or ALPN
    /// negotiation, before reading the client preface).
    pub fn send_initial_settings(&mut self, out: &mut Vec<u8>) {
        frame::write_settings_frame(&self.local_settings.to_params(), out);
        self.state = ConnectionState::PrefacePending;
    }

    /// Consumes the 24-byte client connection preface from the front of
    /// `input`, returning how many bytes were consumed. `Ok(None)` means
    /// more bytes are needed; `Err` means the preface didn't match.
    pub fn consume_preface(&mut self, input: &[u8]) -> Result<Option<usize>, ErrorCode> {
        if input.len() < CONNECTION_PREFACE.len() {
            if !CONNECTION_PREFACE.starts_with(input) {
                return Err(ErrorCode::ProtocolError);
            }
            return Ok(None);
        }
        if &input[..CONNECTION_PREFACE.len()] != CONNECTION_PREFACE.as_slice() {
            return Err(ErrorCode::ProtocolError);
        }
        self.state = ConnectionState::Active;
        Ok(Some(CONNECTION_PREFACE.len()))
    }

    /// Feeds one complete frame (header already parsed, `payload` sized
    /// to `header.length`) into the connection, appending any frames the
    /// response requires to `out`. Returns the GOAWAY error code on a
    /// connection-fatal error; the caller is responsible for sending
    /// GOAWAY and closing.
    pub fn process_frame(&mut self, header: FrameHeader, payload: &[u8], out: &mut Vec<u8>) -> Result<(), ErrorCode> {
        if header.length > self.local_settings.max_frame_size {
            return Err(ErrorCode::FrameSizeError);
        }

        match header.frame_type {
            FrameType::Settings => self.on_settings(&header, payload, out),
            FrameType::WindowUpdate => self.on_window_update(&header, payload, out),
            FrameType::Headers => self.on_headers(&header, payload, out),
            FrameType::Continuation => self.on_continuation(&header, payload, out),
            FrameType::Data => self.on_data(&header, payload, out),
            FrameType::RstStream => self.on_rst_stream(&header, payload),
            FrameType::Priority => self.on_priority(&header, payload),
            FrameType::Ping => self.on_ping(&header, payload, out),
            FrameType::GoAway => self.on_goaway(&header, payload),
            FrameType::PushPromise => Err(ErrorCode::ProtocolError),
            FrameType::Unknown(_) => Ok(()),
        }
    }

    fn on_settings(&mut self, header: &FrameHeader, payload: &[u8], out: &mut Vec<u8>) -> Result<(), ErrorCode> {
        if header.flags & flags::SETTINGS_ACK != 0 {
            if header.length != 0 {
                return Err(ErrorCode::FrameSizeError);
            }
            return Ok(());
        }
        let params = frame::parse_settings_frame(payload).map_err(frame_err_to_code)?;
        self.remote_settings.apply(&params)?;
        self.encoder.set_max_table_size(self.remote_settings.header_table_size as usize);
        frame::write_settings_ack(out);
        Ok(())
    }

    fn on_window_update(&mut self, header: &FrameHeader, payload: &[u8], out: &mut Vec<u8>) -> Result<(), ErrorCode> {
        let increment = frame::parse_window_update_frame(payload).map_err(frame_err_to_code)?;
        if increment == 0 {
            return Err(ErrorCode::ProtocolError);
        }
        if header.stream_id == 0 {
            self.conn_send_window.inc_window(increment).map_err(|_| ErrorCode::FlowControlError)?;
            self.flush_all_pending(out);
        } else if let Some(slot) = self.streams.get_mut(&header.stream_id) {
            slot.stream.send_window.inc_window(increment).map_err(|_| ErrorCode::FlowControlError)?;
            self.flush_pending(header.stream_id, out);
        }
        Ok(())
    }

    fn on_priority(&mut self, _header: &FrameHeader, payload: &[u8]) -> Result<(), ErrorCode> {
        frame::parse_priority_frame(payload).map_err(frame_err_to_code)?;
        Ok(())
    }

    fn on_rst_stream(&mut self, header: &FrameHeader, payload: &[u8]) -> Result<(), ErrorCode> {
        frame::parse_rst_stream_frame(payload).map_err(frame_err_to_code)?;
        if let Some(slot) = self.streams.get_mut(&header.stream_id) {
            let _ = slot.stream.transition(StreamEvent::RecvRstStream);
        }
        Ok(())
    }

    fn on_ping(&mut self, header: &FrameHeader, payload: &[u8], out: &mut Vec<u8>) -> Result<(), ErrorCode> {
        let opaque = frame::parse_ping_frame(payload).map_err(frame_err_to_code)?;
        if header.flags & flags::PING_ACK == 0 {
            frame::write_ping_frame(opaque, true, out);
        }
        Ok(())
    }

    fn on_goaway(&mut self, _header: &FrameHeader, payload: &[u8]) -> Result<(), ErrorCode> {
        frame::parse_goaway_frame(payload).map_err(frame_err_to_code)?;
        self.state = ConnectionState::GoawayReceived;
        Ok(())
    }

    /// A stream's send window starts at the peer's *current*
    /// `SETTINGS_INITIAL_WINDOW_SIZE` (how much they've told us they can
    /// receive), its recv window at our own — independent of each other
    /// and of the connection-level windows, which SETTINGS never resizes
    /// (RFC 7540 §6.9.2).
    fn stream_slot(&mut self, id: u32) -> &mut StreamSlot {
        let send_window = self.remote_settings.initial_window_size;
        let recv_window = self.local_settings.initial_window_size;
        self.streams.entry(id).or_insert_with(|| StreamSlot::new(id, send_window, recv_window))
    }

    fn on_headers(&mut self, header: &FrameHeader, payload: &[u8], out: &mut Vec<u8>) -> Result<(), ErrorCode> {
        if header.stream_id == 0 || header.stream_id % 2 == 0 {
            return Err(ErrorCode::ProtocolError);
        }
        self.last_peer_stream_id = self.last_peer_stream_id.max(header.stream_id);

        let parsed = frame::parse_headers_frame(header, payload).map_err(frame_err_to_code)?;
        let end_stream = header.flags & flags::HEADERS_END_STREAM != 0;
        let end_headers = header.flags & flags::HEADERS_END_HEADERS != 0;

        let slot = self.stream_slot(header.stream_id);
        slot.stream.transition(StreamEvent::RecvHeaders { end_stream }).map_err(|_| ErrorCode::ProtocolError)?;
        slot.header_block.extend_from_slice(parsed.header_block);

        if end_headers {
            self.finish_headers(header.stream_id, end_stream, out)?;
        }
        Ok(())
    }

    fn on_continuation(&mut self, header: &FrameHeader, payload: &[u8], out: &mut Vec<u8>) -> Result<(), ErrorCode> {
        let end_headers = header.flags & flags::CONTINUATION_END_HEADERS != 0;
        let slot = self.streams.get_mut(&header.stream_id).ok_or(ErrorCode::ProtocolError)?;
        if slot.headers_done {
            return Err(ErrorCode::ProtocolError);
        }
        slot.header_block.extend_from_slice(payload);
        let end_stream = slot.stream.state == StreamState::HalfClosedRemote;
        if end_headers {
            self.finish_headers(header.stream_id, end_stream, out)?;
        }
        Ok(())
    }

    fn finish_headers(&mut self, stream_id: u32, end_stream: bool, out: &mut Vec<u8>) -> Result<(), ErrorCode> {
        let block = {
            let slot = self.streams.get_mut(&stream_id).ok_or(ErrorCode::ProtocolError)?;
            slot.headers_done = true;
            std::mem::take(&mut slot.header_block)
        };

        let decoded = self.decoder.decode(&block, MAX_HEADERS).map_err(|_| ErrorCode::CompressionError)?;
        {
            let slot = self.streams.get_mut(&stream_id).unwrap();
            slot.headers = decoded.into_iter().map(|h| (h.name, h.value)).collect();
        }

        if end_stream {
            self.dispatch_request(stream_id, out)?;
        }
        Ok(())
    }

    fn on_data(&mut self, header: &FrameHeader, payload: &[u8], out: &mut Vec<u8>) -> Result<(), ErrorCode> {
        let data = frame::parse_data_frame(header, payload).map_err(frame_err_to_code)?;
        let end_stream = header.flags & flags::DATA_END_STREAM != 0;

        self.conn_recv_window
            .buffer_data(header.length, ErrorCode::FlowControlError)?;

        let slot = self.streams.get_mut(&header.stream_id).ok_or(ErrorCode::ProtocolError)?;
        slot.stream.recv_window.buffer_data(header.length, ErrorCode::FlowControlError)?;
        slot.stream
            .transition(StreamEvent::RecvData { end_stream })
            .map_err(|_| ErrorCode::ProtocolError)?;
        slot.body.extend_from_slice(data);

        if header.length > 0 {
            frame::write_window_update_frame(0, header.length, out);
            frame::write_window_update_frame(header.stream_id, header.length, out);
            // We just granted the peer back the window we consumed above.
            let _ = self.conn_recv_window.inc_window(header.length);
            let slot = self.streams.get_mut(&header.stream_id).ok_or(ErrorCode::ProtocolError)?;
            let _ = slot.stream.recv_window.inc_window(header.length);
        }

        if end_stream {
            self.dispatch_request(header.stream_id, out)?;
        }
        Ok(())
    }

    /// Routes the now-complete request and writes its response as
    /// HEADERS (+ DATA) frames. Pseudo-headers (`:method`, `:path`, ...)
    /// are stripped before the handler sees the header list.
    fn dispatch_request(&mut self, stream_id: u32, out: &mut Vec<u8>) -> Result<(), ErrorCode> {
        let slot = self.streams.get(&stream_id).ok_or(ErrorCode::ProtocolError)?;

        let mut method = Method::Get;
        let mut path = "/";
        let mut regular_headers: Vec<(&str, &str)> = Vec::with_capacity(slot.headers.len());

        for (name, value) in &slot.headers {
            match name.as_str() {
                ":method" => method = Method::from_bytes(value.as_bytes()),
                ":path" => path = value.as_str(),
                ":scheme" | ":authority" => {}
                _ => regular_headers.push((name.as_str(), value.as_str())),
            }
        }

        let mut header_arr: [(&str, &str); MAX_HEADERS] = [("", ""); MAX_HEADERS];
        let header_count = regular_headers.len().min(MAX_HEADERS);
        header_arr[..header_count].copy_from_slice(&regular_headers[..header_count]);

        let request = Request {
            method,
            version: crate::http1::types::Version::Http11,
            url: path,
            path,
            query: None,
            fragment: None,
            headers: header_arr,
            header_count: header_count as u8,
            body: &slot.body,
            content_length: Some(slot.body.len() as u64),
            chunked: false,
            keep_alive: true,
            upgrade: false,
            upgrade_protocol: None,
        };

        let response = match self.router.match_route(method, path) {
            Some((handler, params, param_count)) => {
                let ctx = Context { req: request, params, param_count };
                handler(ctx)
            }
            None => Response::not_found(),
        };

        self.write_response(stream_id, response, out);
        Ok(())
    }

    /// Writes the response HEADERS frame and as much of the body as the
    /// connection/stream send windows currently allow, chunked to
    /// `remote_settings.max_frame_size`. Any body left over after the
    /// windows are exhausted is queued in `slot.pending_response` and
    /// drained later by `flush_pending`/`flush_all_pending` as
    /// WINDOW_UPDATE frames arrive from the peer — the stream does not
    /// transition to half-closed-local until the final DATA frame
    /// actually goes out.
    fn write_response(&mut self, stream_id: u32, response: Response, out: &mut Vec<u8>) {
        let status_str = response.status.to_string();
        let body = response.body.as_bytes().to_vec();
        let content_length = body.len().to_string();

        let mut headers = vec![
            HeaderToEncode { name: ":status", value: &status_str, sensitive: false },
            HeaderToEncode { name: "content-type", value: response.content_type, sensitive: false },
            HeaderToEncode { name: "content-length", value: &content_length, sensitive: false },
        ];
        for (k, v) in &response.headers {
            headers.push(HeaderToEncode { name: k, value: v, sensitive: false });
        }

        let mut header_block = Vec::new();
        self.encoder.encode(&headers, &mut header_block);

        let body_empty = body.is_empty();
        frame::write_headers_frame(stream_id, &header_block, body_empty, true, out);

        if body_empty {
            if let Some(slot) = self.streams.get_mut(&stream_id) {
                let _ = slot.stream.transition(StreamEvent::SendHeaders { end_stream: true });
                self.last_stream_processed = self.last_stream_processed.max(stream_id);
            }
            return;
        }

        if let Some(slot) = self.streams.get_mut(&stream_id) {
            slot.pending_response = body;
        }
        self.flush_pending(stream_id, out);
    }

    /// Claims as much connection/stream send-window capacity as is
    /// available (capped at `max_frame_size`) and emits DATA frames for
    /// `stream_id`'s queued response body until either the window is
    /// exhausted or the body is fully sent. Returns `true` once the body
    /// is fully sent (including having written the end-stream frame).
    fn flush_pending(&mut self, stream_id: u32, out: &mut Vec<u8>) -> bool {
        let max_frame_size = self.remote_settings.max_frame_size;
        loop {
            let pending_len = match self.streams.get(&stream_id) {
                Some(slot) => slot.pending_response.len(),
                None => return true,
            };
            if pending_len == 0 {
                return true;
            }

            let conn_avail = self.conn_send_window.available();
            let stream_avail = self.streams.get(&stream_id).unwrap().stream.send_window.available();
            let chunk_len = (pending_len as u32).min(max_frame_size).min(conn_avail).min(stream_avail);
            if chunk_len == 0 {
                return false;
            }

            self.conn_send_window.claim_capacity(chunk_len);
            self.conn_send_window.send_data(chunk_len);

            let slot = self.streams.get_mut(&stream_id).unwrap();
            slot.stream.send_window.claim_capacity(chunk_len);
            slot.stream.send_window.send_data(chunk_len);
            let chunk: Vec<u8> = slot.pending_response.drain(..chunk_len as usize).collect();
            let end_stream = slot.pending_response.is_empty();

            frame::write_data_frame(stream_id, &chunk, end_stream, out);

            if end_stream {
                let _ = slot.stream.transition(StreamEvent::SendData { end_stream: true });
                self.last_stream_processed = self.last_stream_processed.max(stream_id);
                return true;
            }
        }
    }

    /// Resumes flushing every stream with a nonempty `pending_response`
    /// after a connection-level WINDOW_UPDATE.
    fn flush_all_pending(&mut self, out: &mut Vec<u8>) {
        let waiting: Vec<u32> =
            self.streams.iter().filter(|(_, slot)| !slot.pending_response.is_empty()).map(|(id, _)| *id).collect();
        for stream_id in waiting {
            self.flush_pending(stream_id, out);
        }
    }

    /// Sends GOAWAY and marks the connection as shutting down.
    pub fn send_goaway(&mut self, code: ErrorCode, debug_data: &[u8], out: &mut Vec<u8>) {
        frame::write_goaway_frame(self.last_stream_processed, code, debug_data, out);
        self.state = ConnectionState::GoawaySent;
    }

    pub fn streams_open(&self) -> usize {
        self.streams.values().filter(|s| !s.stream.is_closed()).count()
    }
}

fn frame_err_to_code(e: FrameError) -> ErrorCode {
    match e {
        FrameError::Incomplete => ErrorCode::ProtocolError,
        FrameError::FrameSizeError => ErrorCode::FrameSizeError,
        FrameError::ProtocolError => ErrorCode::ProtocolError,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::Router;

    fn handler(_ctx: Context) -> Response {
        Response::ok(b"hello".to_vec())
    }

    fn test_router() -> Arc<Router> {
        let mut r = Router::new();
        r.get("/hello", handler);
        Arc::new(r)
    }

    #[test]
    fn consume_preface_accepts_exact_bytes() {
        let router = test_router();
        let mut conn = Http2Connection::new(router);
        let consumed = conn.consume_preface(CONNECTION_PREFACE).unwrap();
        assert_eq!(consumed, Some(24));
        assert_eq!(conn.state(), ConnectionState::Active);
    }

    #[test]
    fn consume_preface_rejects_mismatch() {
        let router = test_router();
        let mut conn = Http2Connection::new(router);
        let bogus = b"GET / HTTP/1.1\r\n\r\n\r\n\r\n\r\n";
        assert!(conn.consume_preface(bogus).is_err());
    }

    #[test]
    fn settings_ack_round_trip() {
        let router = test_router();
        let mut conn = Http2Connection::new(router);
        let params = vec![SettingsParameter { id: 3, value: 50 }];
        let mut payload = Vec::new();
        for p in &params {
            payload.extend_from_slice(&p.id.to_be_bytes());
            payload.extend_from_slice(&p.value.to_be_bytes());
        }
        let header = FrameHeader { length: payload.len() as u32, frame_type: FrameType::Settings, flags: 0, stream_id: 0 };
        let mut out = Vec::new();
        conn.process_frame(header, &payload, &mut out).unwrap();

        let ack_header = frame::parse_frame_header(&out).unwrap();
        assert_eq!(ack_header.frame_type, FrameType::Settings);
        assert_eq!(ack_header.flags & flags::SETTINGS_ACK, flags::SETTINGS_ACK);
    }

    #[test]
    fn full_request_response_round_trip_via_headers_frame() {
        let router = test_router();
        let mut conn = Http2Connection::new(router);

        let mut encoder = Encoder::new(4096);
        let req_headers = vec![
            HeaderToEncode { name: ":method", value: "GET", sensitive: false },
            HeaderToEncode { name: ":path", value: "/hello", sensitive: false },
        ];
        let mut block = Vec::new();
        encoder.encode(&req_headers, &mut block);

        let header = FrameHeader {
            length: block.len() as u32,
            frame_type: FrameType::Headers,
            flags: flags::HEADERS_END_HEADERS | flags::HEADERS_END_STREAM,
            stream_id: 1,
        };
        let mut out = Vec::new();
        conn.process_frame(header, &block, &mut out).unwrap();

        let resp_header = frame::parse_frame_header(&out).unwrap();
        assert_eq!(resp_header.frame_type, FrameType::Headers);
        assert_eq!(resp_header.stream_id, 1);
    }
}
