//! HTTP/2 frame format (RFC 7540 §4, §6), grounded on the donor's
//! `http2_frame.h`: 10 frame types, the 9-byte frame header, error
//! codes, settings identifiers, and parse/write functions for every
//! frame type the connection driver needs.

pub const CONNECTION_PREFACE: &[u8; 24] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";
pub const FRAME_HEADER_LEN: usize = 9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Data,
    Headers,
    Priority,
    RstStream,
    Settings,
    PushPromise,
    Ping,
    GoAway,
    WindowUpdate,
    Continuation,
    Unknown(u8),
}

impl FrameType {
    pub fn from_u8(b: u8) -> Self {
        match b {
            0x0 => FrameType::Data,
            0x1 => FrameType::Headers,
            0x2 => FrameType::Priority,
            0x3 => FrameType::RstStream,
            0x4 => FrameType::Settings,
            0x5 => FrameType::PushPromise,
            0x6 => FrameType::Ping,
            0x7 => FrameType::GoAway,
            0x8 => FrameType::WindowUpdate,
            0x9 => FrameType::Continuation,
            other => FrameType::Unknown(other),
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            FrameType::Data => 0x0,
            FrameType::Headers => 0x1,
            FrameType::Priority => 0x2,
            FrameType::RstStream => 0x3,
            FrameType::Settings => 0x4,
            FrameType::PushPromise => 0x5,
            FrameType::Ping => 0x6,
            FrameType::GoAway => 0x7,
            FrameType::WindowUpdate => 0x8,
            FrameType::Continuation => 0x9,
            FrameType::Unknown(b) => b,
        }
    }
}

pub mod flags {
    pub const DATA_END_STREAM: u8 = 0x1;
    pub const DATA_PADDED: u8 = 0x8;

    pub const HEADERS_END_STREAM: u8 = 0x1;
    pub const HEADERS_END_HEADERS: u8 = 0x4;
    pub const HEADERS_PADDED: u8 = 0x8;
    pub const HEADERS_PRIORITY: u8 = 0x20;

    pub const SETTINGS_ACK: u8 = 0x1;
    pub const PING_ACK: u8 = 0x1;

    pub const PUSH_PROMISE_END_HEADERS: u8 = 0x4;
    pub const PUSH_PROMISE_PADDED: u8 = 0x8;

    pub const CONTINUATION_END_HEADERS: u8 = 0x4;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCode {
    NoError = 0x0,
    ProtocolError = 0x1,
    InternalError = 0x2,
    FlowControlError = 0x3,
    SettingsTimeout = 0x4,
    StreamClosed = 0x5,
    FrameSizeError = 0x6,
    RefusedStream = 0x7,
    Cancel = 0x8,
    CompressionError = 0x9,
    ConnectError = 0xa,
    EnhanceYourCalm = 0xb,
    InadequateSecurity = 0xc,
    Http11Required = 0xd,
}

impl ErrorCode {
    pub fn from_u32(v: u32) -> Self {
        match v {
            0x0 => ErrorCode::NoError,
            0x1 => ErrorCode::ProtocolError,
            0x2 => ErrorCode::InternalError,
            0x3 => ErrorCode::FlowControlError,
            0x4 => ErrorCode::SettingsTimeout,
            0x5 => ErrorCode::StreamClosed,
            0x6 => ErrorCode::FrameSizeError,
            0x7 => ErrorCode::RefusedStream,
            0x8 => ErrorCode::Cancel,
            0x9 => ErrorCode::CompressionError,
            0xa => ErrorCode::ConnectError,
            0xb => ErrorCode::EnhanceYourCalm,
            0xc => ErrorCode::InadequateSecurity,
            0xd => ErrorCode::Http11Required,
            _ => ErrorCode::InternalError,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum SettingsId {
    HeaderTableSize = 0x1,
    EnablePush = 0x2,
    MaxConcurrentStreams = 0x3,
    InitialWindowSize = 0x4,
    MaxFrameSize = 0x5,
    MaxHeaderListSize = 0x6,
}

impl SettingsId {
    pub fn from_u16(v: u16) -> Option<Self> {
        match v {
            0x1 => Some(SettingsId::HeaderTableSize),
            0x2 => Some(SettingsId::EnablePush),
            0x3 => Some(SettingsId::MaxConcurrentStreams),
            0x4 => Some(SettingsId::InitialWindowSize),
            0x5 => Some(SettingsId::MaxFrameSize),
            0x6 => Some(SettingsId::MaxHeaderListSize),
            _ => None, // Unknown settings identifiers are ignored per RFC 7540 §6.5.2.
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FrameHeader {
    pub length: u32,
    pub frame_type: FrameType,
    pub flags: u8,
    pub stream_id: u32,
}

#[derive(Debug)]
pub enum FrameError {
    Incomplete,
    FrameSizeError,
    ProtocolError,
}

pub fn parse_frame_header(data: &[u8]) -> Result<FrameHeader, FrameError> {
    if data.len() < FRAME_HEADER_LEN {
        return Err(FrameError::Incomplete);
    }
    let length = ((data[0] as u32) << 16) | ((data[1] as u32) << 8) | data[2] as u32;
    let frame_type = FrameType::from_u8(data[3]);
    let flags = data[4];
    let stream_id = u32::from_be_bytes([data[5], data[6], data[7], data[8]]) & 0x7fff_ffff;
    Ok(FrameHeader { length, frame_type, flags, stream_id })
}

pub fn write_frame_header(header: &FrameHeader, out: &mut Vec<u8>) {
    out.push((header.length >> 16) as u8);
    out.push((header.length >> 8) as u8);
    out.push(header.length as u8);
    out.push(header.frame_type.to_u8());
    out.push(header.flags);
    out.extend_from_slice(&(header.stream_id & 0x7fff_ffff).to_be_bytes());
}

/// Peeks at the front of `data` for one complete frame. `Ok(None)` means
/// fewer than `FRAME_HEADER_LEN + length` bytes are buffered so far; the
/// caller should wait for more reads. On `Some`, the second element is
/// the total byte length (header + payload) to drain from the buffer.
pub fn try_parse_frame(data: &[u8]) -> Result<Option<(FrameHeader, usize)>, FrameError> {
    if data.len() < FRAME_HEADER_LEN {
        return Ok(None);
    }
    let header = parse_frame_header(data)?;
    let total = FRAME_HEADER_LEN + header.length as usize;
    if data.len() < total {
        return Ok(None);
    }
    Ok(Some((header, total)))
}

#[derive(Debug, Clone, Copy)]
pub struct PrioritySpec {
    pub exclusive: bool,
    pub stream_dependency: u32,
    pub weight: u8,
}

impl Default for PrioritySpec {
    fn default() -> Self {
        Self { exclusive: false, stream_dependency: 0, weight: 15 }
    }
}

fn strip_padding(payload: &[u8], padded: bool) -> Result<(&[u8], usize), FrameError> {
    if !padded {
        return Ok((payload, 0));
    }
    if payload.is_empty() {
        return Err(FrameError::ProtocolError);
    }
    let pad_len = payload[0] as usize;
    if pad_len + 1 > payload.len() {
        return Err(FrameError::ProtocolError);
    }
    Ok((&payload[1..payload.len() - pad_len], pad_len))
}

pub fn parse_data_frame<'a>(header: &FrameHeader, payload: &'a [u8]) -> Result<&'a [u8], FrameError> {
    let (data, _pad) = strip_padding(payload, header.flags & flags::DATA_PADDED != 0)?;
    Ok(data)
}

pub fn write_data_frame(stream_id: u32, data: &[u8], end_stream: bool, out: &mut Vec<u8>) {
    let flag = if end_stream { flags::DATA_END_STREAM } else { 0 };
    write_frame_header(&FrameHeader { length: data.len() as u32, frame_type: FrameType::Data, flags: flag, stream_id }, out);
    out.extend_from_slice(data);
}

pub struct ParsedHeaders<'a> {
    pub priority: Option<PrioritySpec>,
    pub header_block: &'a [u8],
}

pub fn parse_headers_frame<'a>(header: &FrameHeader, payload: &'a [u8]) -> Result<ParsedHeaders<'a>, FrameError> {
    let (unpadded, _pad) = strip_padding(payload, header.flags & flags::HEADERS_PADDED != 0)?;
    let mut rest = unpadded;
    let mut priority = None;

    if header.flags & flags::HEADERS_PRIORITY != 0 {
        if rest.len() < 5 {
            return Err(FrameError::ProtocolError);
        }
        let raw = u32::from_be_bytes([rest[0], rest[1], rest[2], rest[3]]);
        priority = Some(PrioritySpec {
            exclusive: raw & 0x8000_0000 != 0,
            stream_dependency: raw & 0x7fff_ffff,
            weight: rest[4],
        });
        rest = &rest[5..];
    }

    Ok(ParsedHeaders { priority, header_block: rest })
}

pub fn write_headers_frame(stream_id: u32, header_block: &[u8], end_stream: bool, end_headers: bool, out: &mut Vec<u8>) {
    let mut flag = flags::HEADERS_END_STREAM * end_stream as u8;
    if end_headers {
        flag |= flags::HEADERS_END_HEADERS;
    }
    write_frame_header(&FrameHeader { length: header_block.len() as u32, frame_type: FrameType::Headers, flags: flag, stream_id }, out);
    out.extend_from_slice(header_block);
}

pub fn parse_priority_frame(payload: &[u8]) -> Result<PrioritySpec, FrameError> {
    if payload.len() != 5 {
        return Err(FrameError::FrameSizeError);
    }
    let raw = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
    Ok(PrioritySpec { exclusive: raw & 0x8000_0000 != 0, stream_dependency: raw & 0x7fff_ffff, weight: payload[4] })
}

pub fn parse_rst_stream_frame(payload: &[u8]) -> Result<ErrorCode, FrameError> {
    if payload.len() != 4 {
        return Err(FrameError::FrameSizeError);
    }
    Ok(ErrorCode::from_u32(u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]])))
}

pub fn write_rst_stream_frame(stream_id: u32, code: ErrorCode, out: &mut Vec<u8>) {
    write_frame_header(&FrameHeader { length: 4, frame_type: FrameType::RstStream, flags: 0, stream_id }, out);
    out.extend_from_slice(&(code as u32).to_be_bytes());
}

#[derive(Debug, Clone, Copy)]
pub struct SettingsParameter {
    pub id: u16,
    pub value: u32,
}

pub fn parse_settings_frame(payload: &[u8]) -> Result<Vec<SettingsParameter>, FrameError> {
    if payload.len() % 6 != 0 {
        return Err(FrameError::FrameSizeError);
    }
    let mut out = Vec::with_capacity(payload.len() / 6);
    for chunk in payload.chunks_exact(6) {
        let id = u16::from_be_bytes([chunk[0], chunk[1]]);
        let value = u32::from_be_bytes([chunk[2], chunk[3], chunk[4], chunk[5]]);
        out.push(SettingsParameter { id, value });
    }
    Ok(out)
}

pub fn write_settings_frame(params: &[SettingsParameter], out: &mut Vec<u8>) {
    write_frame_header(&FrameHeader { length: (params.len() * 6) as u32, frame_type: FrameType::Settings, flags: 0, stream_id: 0 }, out);
    for p in params {
        out.extend_from_slice(&p.id.to_be_bytes());
        out.extend_from_slice(&p.value.to_be_bytes());
    }
}

pub fn write_settings_ack(out: &mut Vec<u8>) {
    write_frame_header(&FrameHeader { length: 0, frame_type: FrameType::Settings, flags: flags::SETTINGS_ACK, stream_id: 0 }, out);
}

pub fn parse_ping_frame(payload: &[u8]) -> Result<u64, FrameError> {
    if payload.len() != 8 {
        return Err(FrameError::FrameSizeError);
    }
    Ok(u64::from_be_bytes(payload.try_into().unwrap()))
}

pub fn write_ping_frame(opaque: u64, ack: bool, out: &mut Vec<u8>) {
    let flag = if ack { flags::PING_ACK } else { 0 };
    write_frame_header(&FrameHeader { length: 8, frame_type: FrameType::Ping, flags: flag, stream_id: 0 }, out);
    out.extend_from_slice(&opaque.to_be_bytes());
}

pub struct ParsedGoAway<'a> {
    pub last_stream_id: u32,
    pub error_code: ErrorCode,
    pub debug_data: &'a [u8],
}

pub fn parse_goaway_frame(payload: &[u8]) -> Result<ParsedGoAway<'_>, FrameError> {
    if payload.len() < 8 {
        return Err(FrameError::FrameSizeError);
    }
    let last_stream_id = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]) & 0x7fff_ffff;
    let error_code = ErrorCode::from_u32(u32::from_be_bytes([payload[4], payload[5], payload[6], payload[7]]));
    Ok(ParsedGoAway { last_stream_id, error_code, debug_data: &payload[8..] })
}

pub fn write_goaway_frame(last_stream_id: u32, error_code: ErrorCode, debug_data: &[u8], out: &mut Vec<u8>) {
    let length = 8 + debug_data.len();
    write_frame_header(&FrameHeader { length: length as u32, frame_type: FrameType::GoAway, flags: 0, stream_id: 0 }, out);
    out.extend_from_slice(&(last_stream_id & 0x7fff_ffff).to_be_bytes());
    out.extend_from_slice(&(error_code as u32).to_be_bytes());
    out.extend_from_slice(debug_data);
}

pub fn parse_window_update_frame(payload: &[u8]) -> Result<u32, FrameError> {
    if payload.len() != 4 {
        return Err(FrameError::FrameSizeError);
    }
    Ok(u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]) & 0x7fff_ffff)
}

pub fn write_window_update_frame(stream_id: u32, increment: u32, out: &mut Vec<u8>) {
    write_frame_header(&FrameHeader { length: 4, frame_type: FrameType::WindowUpdate, flags: 0, stream_id }, out);
    out.extend_from_slice(&(increment & 0x7fff_ffff).to_be_bytes());
}

pub struct ParsedPushPromise<'a> {
    pub promised_stream_id: u32,
    pub header_block: &'a [u8],
}

pub fn parse_push_promise_frame<'a>(header: &FrameHeader, payload: &'a [u8]) -> Result<ParsedPushPromise<'a>, FrameError> {
    let (unpadded, _pad) = strip_padding(payload, header.flags & flags::PUSH_PROMISE_PADDED != 0)?;
    if unpadded.len() < 4 {
        return Err(FrameError::ProtocolError);
    }
    let promised_stream_id = u32::from_be_bytes([unpadded[0], unpadded[1], unpadded[2], unpadded[3]]) & 0x7fff_ffff;
    Ok(ParsedPushPromise { promised_stream_id, header_block: &unpadded[4..] })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_header_round_trips() {
        let header = FrameHeader { length: 42, frame_type: FrameType::Headers, flags: 0x5, stream_id: 7 };
        let mut buf = Vec::new();
        write_frame_header(&header, &mut buf);
        assert_eq!(buf.len(), FRAME_HEADER_LEN);

        let parsed = parse_frame_header(&buf).unwrap();
        assert_eq!(parsed.length, 42);
        assert_eq!(parsed.frame_type, FrameType::Headers);
        assert_eq!(parsed.flags, 0x5);
        assert_eq!(parsed.stream_id, 7);
    }

    #[test]
    fn try_parse_frame_waits_for_full_payload() {
        let header = FrameHeader { length: 10, frame_type: FrameType::Data, flags: 0, stream_id: 3 };
        let mut buf = Vec::new();
        write_frame_header(&header, &mut buf);
        buf.extend_from_slice(&[0u8; 10]);

        assert!(try_parse_frame(&buf[..FRAME_HEADER_LEN + 4]).unwrap().is_none());

        let (parsed, total) = try_parse_frame(&buf).unwrap().unwrap();
        assert_eq!(total, buf.len());
        assert_eq!(parsed.stream_id, 3);
    }

    #[test]
    fn settings_frame_round_trips() {
        let params = vec![
            SettingsParameter { id: SettingsId::MaxConcurrentStreams as u16, value: 100 },
            SettingsParameter { id: SettingsId::InitialWindowSize as u16, value: 65535 },
        ];
        let mut out = Vec::new();
        write_settings_frame(&params, &mut out);

        let header = parse_frame_header(&out).unwrap();
        let parsed = parse_settings_frame(&out[FRAME_HEADER_LEN..FRAME_HEADER_LEN + header.length as usize]).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].value, 100);
    }

    #[test]
    fn goaway_round_trips_with_debug_data() {
        let mut out = Vec::new();
        write_goaway_frame(9, ErrorCode::ProtocolError, b"oops", &mut out);
        let header = parse_frame_header(&out).unwrap();
        let parsed = parse_goaway_frame(&out[FRAME_HEADER_LEN..FRAME_HEADER_LEN + header.length as usize]).unwrap();
        assert_eq!(parsed.last_stream_id, 9);
        assert_eq!(parsed.error_code, ErrorCode::ProtocolError);
        assert_eq!(parsed.debug_data, b"oops");
    }

    #[test]
    fn data_frame_strips_padding() {
        let payload = [3u8, b'h', b'i', b'!', 0, 0, 0];
        let header = FrameHeader { length: payload.len() as u32, frame_type: FrameType::Data, flags: flags::DATA_PADDED, stream_id: 1 };
        let data = parse_data_frame(&header, &payload).unwrap();
        assert_eq!(data, b"hi!");
    }
}
