//! Per-connection HTTP/1 keep-alive driver (spec §4.8): read until a
//! request parses, route it, serialize the response, and either reset
//! for the next request or close. `worker.rs` owns the fd and the
//! reactor registration; this module only touches the bytes already in
//! `Conn`'s inline buffers.

use std::io::Write;

use crate::conn::Conn;
use crate::http1::parser::{parse_request, ParseError};
use crate::http1::types::{Context, Response, MAX_PARAMS, MAX_REQUEST_SIZE};
use crate::router::Router;

/// What the caller should do next after feeding a chunk of bytes or
/// attempting to flush pending output.
pub enum DriveOutcome {
    /// Not enough bytes yet; keep waiting for READ readiness.
    NeedMore,
    /// A response has been serialized into `conn.write_buf`; register
    /// for WRITE readiness.
    ResponseReady,
    /// The client requested a protocol upgrade; the caller should hand
    /// the fd off to the appropriate connection driver (h2, currently
    /// only reached via ALPN rather than `h2c` upgrade — see
    /// `server.rs`) and stop driving it as HTTP/1.
    Upgrade,
    /// Fatal for this connection; close the fd.
    Close,
}

fn status_line(version_is_11: bool, status: u16) -> &'static str {
    let _ = version_is_11;
    match status {
        200 => "200 OK",
        204 => "204 No Content",
        400 => "400 Bad Request",
        404 => "404 Not Found",
        413 => "413 Payload Too Large",
        500 => "500 Internal Server Error",
        _ => "200 OK",
    }
}

fn write_response(conn: &mut Conn, response: &Response, keep_alive: bool) -> bool {
    let mut cursor = std::io::Cursor::new(&mut conn.write_buf[..]);
    let wrote = write!(
        cursor,
        "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: {}\r\n",
        status_line(true, response.status),
        response.content_type,
        response.body.len(),
        if keep_alive { "keep-alive" } else { "close" },
    )
    .is_ok();
    if !wrote {
        return false;
    }
    for (k, v) in &response.headers {
        if write!(cursor, "{}: {}\r\n", k, v).is_err() {
            return false;
        }
    }
    if write!(cursor, "\r\n").is_err() {
        return false;
    }
    if cursor.write_all(response.body.as_bytes()).is_err() {
        return false;
    }
    conn.write_pos = 0;
    conn.parse_pos = cursor.position() as u16;
    true
}

/// Attempts to parse one request out of `conn.read_buf[..conn.parse_pos]`
/// and, if complete, route and serialize a response. Leaves `parse_pos`
/// repurposed as the pending write length on success, matching the
/// teacher's field reuse in `Conn`.
pub fn drive_read(conn: &mut Conn, router: &Router, requests_served: &mut u32) -> DriveOutcome {
    let readable_len = conn.parse_pos as usize;
    if readable_len > MAX_REQUEST_SIZE {
        let resp = Response::payload_too_large();
        write_response(conn, &resp, false);
        return DriveOutcome::ResponseReady;
    }

    let slice = &mut conn.read_buf[..readable_len];
    match parse_request(slice) {
        Ok((req, _consumed)) => {
            if req.upgrade {
                return DriveOutcome::Upgrade;
            }

            *requests_served += 1;
            let keep_alive = req.keep_alive && *requests_served < 10_000;

            let mut ctx = Context {
                req,
                params: [("", ""); MAX_PARAMS],
                param_count: 0,
            };

            let response = match router.match_route(ctx.req.method, ctx.req.path) {
                Some((handler, params, param_count)) => {
                    ctx.params = params;
                    ctx.param_count = param_count;
                    handler(ctx)
                }
                None => Response::not_found(),
            };

            conn.route_id = if keep_alive { 1 } else { 0 };
            if write_response(conn, &response, keep_alive) {
                DriveOutcome::ResponseReady
            } else {
                DriveOutcome::Close
            }
        }
        Err(ParseError::Incomplete) => DriveOutcome::NeedMore,
        Err(ParseError::InvalidFormat) => {
            let resp = Response::bad_request();
            write_response(conn, &resp, false);
            DriveOutcome::ResponseReady
        }
        Err(ParseError::TooLarge) => {
            let resp = Response::payload_too_large();
            write_response(conn, &resp, false);
            DriveOutcome::ResponseReady
        }
    }
}

/// True if the just-flushed response was keep-alive and the connection
/// should reset for another request rather than close.
pub fn is_keep_alive(conn: &Conn) -> bool {
    conn.route_id == 1
}
