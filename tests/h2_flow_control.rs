//! Scenario S5: a client that advertises a small
//! `SETTINGS_INITIAL_WINDOW_SIZE` forces the server to split a
//! response body across DATA frames, buffering the remainder until a
//! stream-level WINDOW_UPDATE arrives. Grounded on
//! `carllerche-h2`'s `tests/flow_control.rs` (split-send-on-small-window
//! scenario) and RFC 7540 §6.9.2's independent send/recv seeding.

use std::sync::Arc;

use faster_engine::h2::frame::{self, flags, SettingsId, SettingsParameter};
use faster_engine::h2::{FrameHeader, FrameType, Http2Connection, CONNECTION_PREFACE};
use faster_engine::hpack::{Encoder, HeaderToEncode};
use faster_engine::http1::{Context, Response};
use faster_engine::router::Router;

const BODY: &[u8] = b"012345678901234567890123456789"; // 30 bytes

fn big(_ctx: Context) -> Response {
    Response::ok(BODY.to_vec())
}

fn test_router() -> Arc<Router> {
    let mut router = Router::new();
    router.get("/big", big);
    Arc::new(router)
}

fn data_frames(out: &[u8]) -> Vec<(bool, Vec<u8>)> {
    let mut frames = Vec::new();
    let mut cursor = 0;
    while cursor < out.len() {
        let (header, total) = frame::try_parse_frame(&out[cursor..]).unwrap().unwrap();
        let payload = &out[cursor + 9..cursor + total];
        if header.frame_type == FrameType::Data {
            let end_stream = header.flags & flags::DATA_END_STREAM != 0;
            frames.push((end_stream, payload.to_vec()));
        }
        cursor += total;
    }
    frames
}

#[test]
fn small_initial_window_splits_the_response_body() {
    let mut conn = Http2Connection::new(test_router());
    let mut out = Vec::new();
    conn.send_initial_settings(&mut out);
    conn.consume_preface(CONNECTION_PREFACE).unwrap();
    out.clear();

    // Client advertises a 10-byte initial window before opening any streams.
    let settings_params = [SettingsParameter { id: SettingsId::InitialWindowSize as u16, value: 10 }];
    let mut settings_payload = Vec::new();
    for p in &settings_params {
        settings_payload.extend_from_slice(&p.id.to_be_bytes());
        settings_payload.extend_from_slice(&p.value.to_be_bytes());
    }
    let settings_header = FrameHeader {
        length: settings_payload.len() as u32,
        frame_type: FrameType::Settings,
        flags: 0,
        stream_id: 0,
    };
    conn.process_frame(settings_header, &settings_payload, &mut out).unwrap();
    out.clear();

    let mut encoder = Encoder::new(4096);
    let req_headers = vec![
        HeaderToEncode { name: ":method", value: "GET", sensitive: false },
        HeaderToEncode { name: ":path", value: "/big", sensitive: false },
    ];
    let mut block = Vec::new();
    encoder.encode(&req_headers, &mut block);
    let headers_header = FrameHeader {
        length: block.len() as u32,
        frame_type: FrameType::Headers,
        flags: flags::HEADERS_END_HEADERS | flags::HEADERS_END_STREAM,
        stream_id: 1,
    };
    conn.process_frame(headers_header, &block, &mut out).unwrap();

    let frames = data_frames(&out);
    assert_eq!(frames.len(), 1, "only the window-sized first chunk should go out");
    assert_eq!(frames[0].1.len(), 10);
    assert!(!frames[0].0, "the stream must not end until the rest of the body is sent");
    assert_eq!(conn.streams_open(), 1);

    // Grant the rest of the window; the remaining 21 bytes should flush.
    out.clear();
    let remaining = (BODY.len() - 10) as u32;
    let wu_payload = remaining.to_be_bytes();
    let wu_header = FrameHeader { length: 4, frame_type: FrameType::WindowUpdate, flags: 0, stream_id: 1 };
    conn.process_frame(wu_header, &wu_payload, &mut out).unwrap();

    let frames = data_frames(&out);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].1.len(), remaining as usize);
    assert!(frames[0].0, "the final chunk must carry end_stream");
    assert_eq!(conn.streams_open(), 0);
}

#[test]
fn window_update_overflow_is_rejected() {
    let mut conn = Http2Connection::new(test_router());
    let mut out = Vec::new();
    conn.send_initial_settings(&mut out);
    conn.consume_preface(CONNECTION_PREFACE).unwrap();
    out.clear();

    // Push the connection-level send window to the RFC 7540 ceiling
    // (default initial window is 65535), then try to push it over: the
    // connection must error rather than silently clamp (RFC 7540 §6.9.1).
    let to_ceiling: u32 = i32::MAX as u32 - 65_535;
    let header = FrameHeader { length: 4, frame_type: FrameType::WindowUpdate, flags: 0, stream_id: 0 };
    conn.process_frame(header, &to_ceiling.to_be_bytes(), &mut out).unwrap();

    let one_more: u32 = 1;
    let result = conn.process_frame(header, &one_more.to_be_bytes(), &mut out);
    assert!(result.is_err(), "window increment past 2^31-1 must be a FLOW_CONTROL_ERROR, not a silent clamp");
}
