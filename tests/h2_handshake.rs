//! Scenario S3: client preface + a single HEADERS-only GET gets a
//! HEADERS response back over the same `Http2Connection`, grounded on
//! `carllerche-h2`'s `tests/flow_control.rs` pattern of feeding raw
//! frame bytes straight into the connection driver rather than a real
//! socket.

use std::sync::Arc;

use faster_engine::h2::{ConnectionState, FrameHeader, FrameType, Http2Connection, CONNECTION_PREFACE};
use faster_engine::h2::frame::{self, flags};
use faster_engine::hpack::{Decoder, Encoder, HeaderToEncode};
use faster_engine::http1::{Context, Response};
use faster_engine::router::Router;

fn hello(ctx: Context) -> Response {
    assert_eq!(ctx.req.path, "/hello");
    Response::ok(b"hi there".to_vec())
}

fn test_router() -> Arc<Router> {
    let mut router = Router::new();
    router.get("/hello", hello);
    Arc::new(router)
}

fn encode_request_headers() -> Vec<u8> {
    let mut encoder = Encoder::new(4096);
    let headers = vec![
        HeaderToEncode { name: ":method", value: "GET", sensitive: false },
        HeaderToEncode { name: ":path", value: "/hello", sensitive: false },
        HeaderToEncode { name: ":scheme", value: "https", sensitive: false },
    ];
    let mut block = Vec::new();
    encoder.encode(&headers, &mut block);
    block
}

#[test]
fn preface_then_single_request_gets_a_response() {
    let mut conn = Http2Connection::new(test_router());

    let mut out = Vec::new();
    conn.send_initial_settings(&mut out);
    assert_eq!(conn.state(), ConnectionState::PrefacePending);
    out.clear();

    let consumed = conn.consume_preface(CONNECTION_PREFACE).unwrap();
    assert_eq!(consumed, Some(CONNECTION_PREFACE.len()));
    assert_eq!(conn.state(), ConnectionState::Active);

    let block = encode_request_headers();
    let header = FrameHeader {
        length: block.len() as u32,
        frame_type: FrameType::Headers,
        flags: flags::HEADERS_END_HEADERS | flags::HEADERS_END_STREAM,
        stream_id: 1,
    };
    conn.process_frame(header, &block, &mut out).unwrap();

    let mut decoder = Decoder::new(4096, 8192);
    let mut cursor = 0;
    let mut saw_status_200 = false;
    let mut saw_body = false;

    while cursor < out.len() {
        let (resp_header, total) = frame::try_parse_frame(&out[cursor..]).unwrap().unwrap();
        let payload = &out[cursor + 9..cursor + total];

        match resp_header.frame_type {
            FrameType::Headers => {
                assert_eq!(resp_header.stream_id, 1);
                let parsed = frame::parse_headers_frame(&resp_header, payload).unwrap();
                let decoded = decoder.decode(parsed.header_block, 100).unwrap();
                saw_status_200 = decoded.iter().any(|h| h.name == ":status" && h.value == "200");
            }
            FrameType::Data => {
                assert_eq!(resp_header.stream_id, 1);
                assert_eq!(payload, b"hi there");
                saw_body = true;
            }
            other => panic!("unexpected frame type in response: {other:?}"),
        }
        cursor += total;
    }

    assert!(saw_status_200, "response HEADERS frame must carry :status: 200");
    assert!(saw_body, "response DATA frame must carry the handler's body");
}

#[test]
fn mismatched_preface_is_a_protocol_error() {
    let mut conn = Http2Connection::new(test_router());
    let bogus = b"GET / HTTP/1.1\r\n\r\n\r\n\r\n\r\n";
    assert!(conn.consume_preface(bogus).is_err());
}
