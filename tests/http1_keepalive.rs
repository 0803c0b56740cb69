//! Scenario S1: a keep-alive HTTP/1.1 connection serves two requests
//! back to back without closing, and the write buffer carries
//! `Connection: keep-alive`. Drives `http1::connection` directly against
//! a `Conn`'s inline buffers, matching `carllerche-h2`'s pattern of
//! testing the protocol driver without a real socket.

use faster_engine::http1::{Context, Response};
use faster_engine::router::Router;

fn hello(ctx: Context) -> Response {
    assert_eq!(ctx.req.path, "/hello");
    Response::ok(b"hi".to_vec())
}

fn build_router() -> Router {
    let mut router = Router::new();
    router.get("/hello", hello);
    router
}

fn fill_request(conn: &mut faster_engine::conn::Conn, raw: &[u8]) {
    conn.read_buf[..raw.len()].copy_from_slice(raw);
    conn.parse_pos = raw.len() as u16;
}

#[test]
fn keep_alive_connection_serves_two_requests() {
    use faster_engine::http1::connection::{drive_read, is_keep_alive, DriveOutcome};
    use faster_engine::conn::Conn;

    let router = build_router();
    let mut conn = Conn::empty();
    let mut requests_served = 0u32;

    let first = b"GET /hello HTTP/1.1\r\nHost: localhost\r\nConnection: keep-alive\r\n\r\n";
    fill_request(&mut conn, first);

    match drive_read(&mut conn, &router, &mut requests_served) {
        DriveOutcome::ResponseReady => {}
        _ => panic!("expected a response for the first request"),
    }
    assert!(is_keep_alive(&conn), "connection should stay open after the first request");

    let response_len = conn.parse_pos as usize;
    let response_text = std::str::from_utf8(&conn.write_buf[..response_len]).unwrap();
    assert!(response_text.starts_with("HTTP/1.1 200 OK"));
    assert!(response_text.contains("Connection: keep-alive"));
    assert!(response_text.ends_with("hi"));

    let second = b"GET /hello HTTP/1.1\r\nHost: localhost\r\n\r\n";
    fill_request(&mut conn, second);

    match drive_read(&mut conn, &router, &mut requests_served) {
        DriveOutcome::ResponseReady => {}
        _ => panic!("expected a response for the second request"),
    }
    assert!(is_keep_alive(&conn));
    assert_eq!(requests_served, 2);
}

#[test]
fn connection_close_header_ends_the_keep_alive() {
    use faster_engine::http1::connection::{drive_read, is_keep_alive, DriveOutcome};
    use faster_engine::conn::Conn;

    let router = build_router();
    let mut conn = Conn::empty();
    let mut requests_served = 0u32;

    let req = b"GET /hello HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n";
    fill_request(&mut conn, req);

    match drive_read(&mut conn, &router, &mut requests_served) {
        DriveOutcome::ResponseReady => {}
        _ => panic!("expected a response"),
    }
    assert!(!is_keep_alive(&conn));

    let response_len = conn.parse_pos as usize;
    let response_text = std::str::from_utf8(&conn.write_buf[..response_len]).unwrap();
    assert!(response_text.contains("Connection: close"));
}

#[test]
fn unmatched_route_returns_404_but_stays_keep_alive() {
    use faster_engine::http1::connection::{drive_read, DriveOutcome};
    use faster_engine::conn::Conn;

    let router = build_router();
    let mut conn = Conn::empty();
    let mut requests_served = 0u32;

    let req = b"GET /missing HTTP/1.1\r\nHost: localhost\r\n\r\n";
    fill_request(&mut conn, req);

    match drive_read(&mut conn, &router, &mut requests_served) {
        DriveOutcome::ResponseReady => {}
        _ => panic!("expected a response"),
    }

    let response_len = conn.parse_pos as usize;
    let response_text = std::str::from_utf8(&conn.write_buf[..response_len]).unwrap();
    assert!(response_text.starts_with("HTTP/1.1 404 Not Found"));
}

