//! Per-worker connection driver (spec §4.1, §4.8, §4.9). Each worker
//! owns one reactor, one connection slab, and one or more listeners
//! (plaintext HTTP/1, TLS-terminated HTTP/1 or HTTP/2 chosen by ALPN).
//! Plain connections are driven entirely through `Conn`'s inline
//! buffers via `http1::connection`; TLS connections carry additional
//! per-connection state in a side table since `Conn` has no room for an
//! `SslStream` or HPACK tables.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};

use crate::conn::{Conn, ConnState, READ_BUF_SIZE};
use crate::error::EngineResult;
use crate::h2;
use crate::http1::connection::{self as h1, DriveOutcome};
use crate::listener::{UdpWorkerListener, WorkerListener};
use crate::metrics::WorkerMetrics;
use crate::net::tcp;
use crate::reactor::{Event, Interest, PlatformReactor, Reactor};
use crate::router::Router;
use crate::slab::ConnectionSlab;
use crate::tls::{TlsContext, TlsSocket, TlsSocketState};

const STALE_CONN_TIMEOUT_SECS: u32 = 30;
const PRUNE_INTERVAL_SECS: u32 = 1;
const KEEP_ALIVE_REQUEST_CAP: u32 = 10_000;
const POLL_TIMEOUT_MS: i32 = 1000;

/// One listen socket this worker answers on, and whether connections
/// accepted from it are TLS-terminated.
pub struct ListenerEntry {
    pub listener: WorkerListener,
    pub tls: Option<Arc<TlsContext>>,
}

/// Listener tokens live above every slab index a worker could ever hand
/// out; `u64::MAX - 15` leaves 15 listener slots, far more than any
/// configuration needs (plaintext HTTP/1 + TLS is two).
const LISTENER_TOKEN_BASE: u64 = u64::MAX - 15;

/// The UDP listener (spec §4.9, reserved for HTTP/3/QUIC) gets its own
/// token below `LISTENER_TOKEN_BASE` so `listener_index_for_token`'s
/// range check never mistakes it for a TCP listener slot.
const UDP_LISTENER_TOKEN: u64 = u64::MAX - 16;

fn listener_index_for_token(token: u64) -> Option<usize> {
    if token >= LISTENER_TOKEN_BASE {
        Some((token - LISTENER_TOKEN_BASE) as usize)
    } else {
        None
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum TlsAppProtocol {
    Pending,
    Http1,
    Http2,
}

/// Per-connection state for a TLS-terminated connection, keyed by slab
/// index alongside the plain `Conn` (which still owns the fd and
/// timestamp bookkeeping).
struct TlsConnState {
    tls: TlsSocket,
    protocol: TlsAppProtocol,
    h2: Option<h2::Http2Connection>,
    h2_recv: Vec<u8>,
    closing: bool,
}

impl TlsConnState {
    fn new(tls: TlsSocket) -> Self {
        Self { tls, protocol: TlsAppProtocol::Pending, h2: None, h2_recv: Vec::new(), closing: false }
    }
}

pub struct Worker {
    id: usize,
    router: Arc<Router>,
    metrics: Arc<WorkerMetrics>,
    listeners: Vec<ListenerEntry>,
    udp: Option<UdpWorkerListener>,
    slab_capacity: usize,
}

impl Worker {
    pub fn new(
        id: usize,
        router: Arc<Router>,
        metrics: Arc<WorkerMetrics>,
        listeners: Vec<ListenerEntry>,
        udp: Option<UdpWorkerListener>,
    ) -> Self {
        Self { id, router, metrics, listeners, udp, slab_capacity: 100_000 }
    }

    pub fn run(&mut self, shutdown: Arc<AtomicBool>) -> EngineResult<()> {
        let reactor = PlatformReactor::new()?;
        for (i, entry) in self.listeners.iter().enumerate() {
            reactor.add_fd(entry.listener.poll_fd(), Interest::READ | Interest::EDGE, LISTENER_TOKEN_BASE + i as u64)?;
        }
        if let Some(udp) = &self.udp {
            reactor.add_fd(udp.socket.as_raw(), Interest::READ | Interest::EDGE, UDP_LISTENER_TOKEN)?;
        }
        let mut udp_buf = vec![0u8; self.udp.as_ref().map(|u| u.max_datagram_size).unwrap_or(0)];

        let mut slab = ConnectionSlab::new(self.slab_capacity);
        let mut tls_sessions: HashMap<usize, TlsConnState> = HashMap::new();
        let mut events = Vec::with_capacity(1024);
        let mut last_prune = now_secs();

        info!(worker = self.id, listeners = self.listeners.len(), "worker entering event loop");

        while !shutdown.load(Ordering::Acquire) {
            let n = match reactor.poll(&mut events, POLL_TIMEOUT_MS) {
                Ok(n) => n,
                Err(e) => {
                    warn!(worker = self.id, error = %e, "reactor poll failed");
                    continue;
                }
            };

            for i in 0..n {
                let event = events[i];
                if event.token == UDP_LISTENER_TOKEN {
                    if let Some(udp) = &self.udp {
                        drain_udp(self.id, udp, &mut udp_buf);
                    }
                } else if let Some(listener_idx) = listener_index_for_token(event.token) {
                    if shutdown.load(Ordering::Acquire) {
                        continue;
                    }
                    self.accept_ready(&reactor, listener_idx, &mut slab, &mut tls_sessions);
                } else {
                    let idx = event.token as usize;
                    let now = now_secs();
                    let keep_open = if tls_sessions.contains_key(&idx) {
                        handle_tls_event(&reactor, &mut slab, &mut tls_sessions, &self.router, &self.metrics, idx, event, now)
                    } else {
                        handle_plain_event(&reactor, &mut slab, &self.router, &self.metrics, idx, event, now)
                    };
                    if !keep_open {
                        close_connection(&reactor, &mut slab, &mut tls_sessions, &self.metrics, idx);
                    }
                }
            }

            let now = now_secs();
            if now.saturating_sub(last_prune) >= PRUNE_INTERVAL_SECS {
                self.prune_stale(&reactor, &mut slab, &mut tls_sessions, now);
                last_prune = now;
            }
        }

        debug!(worker = self.id, "worker exiting gracefully");
        for idx in 0..slab.capacity() {
            if let Some(conn) = slab.get(idx) {
                if conn.fd >= 0 {
                    unsafe {
                        libc::close(conn.fd);
                    }
                }
            }
        }
        Ok(())
    }

    fn accept_ready(
        &self,
        reactor: &PlatformReactor,
        listener_idx: usize,
        slab: &mut ConnectionSlab,
        tls_sessions: &mut HashMap<usize, TlsConnState>,
    ) {
        let entry = &self.listeners[listener_idx];
        let sockets = match entry.listener.drain_ready() {
            Ok(s) => s,
            Err(e) => {
                warn!(worker = self.id, error = %e, "accept failed");
                return;
            }
        };

        for socket in sockets {
            let fd = socket.release();
            let Some(idx) = slab.allocate(fd) else {
                debug!(worker = self.id, "connection slab full, dropping accepted connection");
                unsafe {
                    libc::close(fd);
                }
                continue;
            };

            if let Err(e) = reactor.add_fd(fd, Interest::READ | Interest::EDGE, idx as u64) {
                warn!(worker = self.id, error = %e, "failed to register connection with reactor");
                slab.free(idx);
                unsafe {
                    libc::close(fd);
                }
                continue;
            }

            if let Some(conn) = slab.get_mut(idx) {
                conn.last_active = now_secs();
                conn.requests_served = 0;
            }
            self.metrics.inc_conn();

            if let Some(ctx) = &entry.tls {
                match TlsSocket::accept(ctx) {
                    Ok(tls) => {
                        tls_sessions.insert(idx, TlsConnState::new(tls));
                    }
                    Err(e) => {
                        warn!(worker = self.id, error = %e, "TLS accept failed");
                        close_connection(reactor, slab, tls_sessions, &self.metrics, idx);
                    }
                }
            }
        }
    }

    fn prune_stale(
        &self,
        reactor: &PlatformReactor,
        slab: &mut ConnectionSlab,
        tls_sessions: &mut HashMap<usize, TlsConnState>,
        now: u32,
    ) {
        for idx in 0..slab.capacity() {
            let stale = match slab.get(idx) {
                Some(conn) if conn.fd >= 0 && now.saturating_sub(conn.last_active) > STALE_CONN_TIMEOUT_SECS => true,
                _ => false,
            };
            if stale {
                close_connection(reactor, slab, tls_sessions, &self.metrics, idx);
            }
        }
    }
}

fn now_secs() -> u32 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs() as u32
}

/// Drains every datagram ready on the UDP listener right now, per spec
/// §4.2: loop `recvfrom` into the pre-allocated `max_datagram_size`
/// buffer until `EAGAIN`. Actual HTTP/3/QUIC packet processing is out
/// of scope — the datagram is discarded once read, reserving the
/// listener for a future QUIC demuxer.
fn drain_udp(worker_id: usize, udp: &UdpWorkerListener, buf: &mut [u8]) {
    loop {
        match udp.socket.recv_from(buf) {
            Ok(Some(_)) => {}
            Ok(None) => break,
            Err(e) => {
                warn!(worker = worker_id, error = %e, "udp recv failed");
                break;
            }
        }
    }
}

fn close_connection(
    reactor: &PlatformReactor,
    slab: &mut ConnectionSlab,
    tls_sessions: &mut HashMap<usize, TlsConnState>,
    metrics: &WorkerMetrics,
    idx: usize,
) {
    let fd = match slab.get(idx) {
        Some(conn) if conn.fd >= 0 => conn.fd,
        _ => return,
    };
    let _ = reactor.remove_fd(fd);
    unsafe {
        libc::close(fd);
    }
    tls_sessions.remove(&idx);
    slab.free(idx);
    metrics.dec_conn();
}

/// Copies decrypted (or plaintext) bytes into `conn.read_buf` at the
/// current parse checkpoint. `false` means the fixed buffer has no
/// room left — the connection is closed rather than grown, since these
/// buffers are sized for massive concurrent connection counts rather
/// than arbitrarily large requests.
fn append_plain_bytes(conn: &mut Conn, data: &[u8]) -> bool {
    let start = conn.parse_pos as usize;
    let end = start + data.len();
    if end > READ_BUF_SIZE {
        return false;
    }
    conn.read_buf[start..end].copy_from_slice(data);
    conn.parse_pos = end as u16;
    true
}

fn handle_plain_event(
    reactor: &PlatformReactor,
    slab: &mut ConnectionSlab,
    router: &Router,
    metrics: &WorkerMetrics,
    idx: usize,
    event: Event,
    now: u32,
) -> bool {
    let Some(conn) = slab.get_mut(idx) else { return false };
    let fd = conn.fd;

    if event.readiness.contains(Interest::ERROR) {
        return false;
    }

    // `parse_pos`/`write_pos` are reused for two different meanings
    // depending on `conn.state` (bytes buffered for parsing vs. bytes of
    // a serialized response still being flushed) — check which mode
    // we're in before touching either, or a response draining across
    // several `WRITE` events would be reinterpreted as request bytes.
    if conn.state == ConnState::Writing {
        conn.last_active = now;
        return flush_plain_response(reactor, conn, metrics, idx);
    }

    if event.readiness.contains(Interest::READ) {
        loop {
            let start = conn.parse_pos as usize;
            if start >= READ_BUF_SIZE {
                return false;
            }
            match tcp::read_nonblocking(fd, &mut conn.read_buf[start..]) {
                Ok(0) => break,
                Ok(n) => conn.parse_pos = (start + n) as u16,
                Err(_) => return false,
            }
        }
        if event.readiness.contains(Interest::HUP) && conn.parse_pos == 0 {
            return false;
        }
    }
    conn.state = ConnState::Reading;

    let mut requests_served = conn.requests_served;
    let outcome = h1::drive_read(conn, router, &mut requests_served);
    conn.requests_served = requests_served.min(KEEP_ALIVE_REQUEST_CAP);
    conn.last_active = now;

    match outcome {
        DriveOutcome::NeedMore => {
            if event.readiness.contains(Interest::HUP) {
                return false;
            }
            true
        }
        DriveOutcome::ResponseReady => {
            metrics.inc_req();
            conn.state = ConnState::Writing;
            flush_plain_response(reactor, conn, metrics, idx)
        }
        DriveOutcome::Upgrade | DriveOutcome::Close => false,
    }
}

/// Writes `conn.write_buf[..conn.parse_pos]` out, handling a partial
/// write by registering for `WRITE` readiness and leaving the rest for
/// the next event; resets the buffers for the next pipelined request
/// once fully flushed on a keep-alive connection.
fn flush_plain_response(reactor: &PlatformReactor, conn: &mut Conn, metrics: &WorkerMetrics, idx: usize) -> bool {
    let total = conn.parse_pos as usize;
    let start = conn.write_pos as usize;
    if start >= total {
        return reset_plain_for_next_request(reactor, conn, idx);
    }

    match tcp::write_nonblocking(conn.fd, &conn.write_buf[start..total]) {
        Ok(0) => {
            let _ = reactor.modify_fd(conn.fd, Interest::READ | Interest::WRITE | Interest::EDGE, idx as u64);
            true
        }
        Ok(n) => {
            metrics.add_bytes(n);
            conn.write_pos += n as u16;
            if (conn.write_pos as usize) < total {
                let _ = reactor.modify_fd(conn.fd, Interest::READ | Interest::WRITE | Interest::EDGE, idx as u64);
                true
            } else {
                reset_plain_for_next_request(reactor, conn, idx)
            }
        }
        Err(_) => false,
    }
}

fn reset_plain_for_next_request(reactor: &PlatformReactor, conn: &mut Conn, idx: usize) -> bool {
    if !h1::is_keep_alive(conn) {
        return false;
    }
    conn.parse_pos = 0;
    conn.write_pos = 0;
    conn.state = ConnState::Reading;
    let _ = reactor.modify_fd(conn.fd, Interest::READ | Interest::EDGE, idx as u64);
    true
}

fn handle_tls_event(
    reactor: &PlatformReactor,
    slab: &mut ConnectionSlab,
    tls_sessions: &mut HashMap<usize, TlsConnState>,
    router: &Arc<Router>,
    metrics: &WorkerMetrics,
    idx: usize,
    event: Event,
    now: u32,
) -> bool {
    let Some(conn) = slab.get_mut(idx) else { return false };
    let fd = conn.fd;
    let Some(session) = tls_sessions.get_mut(&idx) else { return false };

    if event.readiness.contains(Interest::ERROR) {
        return false;
    }

    if event.readiness.contains(Interest::READ) {
        loop {
            match tcp::read_nonblocking(fd, &mut conn.read_buf) {
                Ok(0) => break,
                Ok(n) => session.tls.feed_incoming(&conn.read_buf[..n]),
                Err(_) => return false,
            }
        }
    }

    if !session.tls.is_handshake_complete() {
        match session.tls.drive_handshake() {
            Ok(true) => negotiate_protocol(session, router),
            Ok(false) => {}
            Err(e) => {
                debug!("TLS handshake failed: {e}");
                return false;
            }
        }
    }

    if session.tls.is_handshake_complete() && !session.closing {
        if !drain_decrypted(conn, session) {
            return false;
        }

        match session.protocol {
            TlsAppProtocol::Http1 => {
                if !drive_http1_over_tls(conn, session, router, metrics) {
                    return false;
                }
            }
            TlsAppProtocol::Http2 => {
                if !drive_h2_frames(session) {
                    session.closing = true;
                }
            }
            TlsAppProtocol::Pending => {}
        }
    }

    let _ = session.tls.flush();
    let outgoing = session.tls.drain_outgoing();
    if !outgoing.is_empty() {
        if tcp::write_nonblocking(fd, &outgoing).is_err() {
            return false;
        }
        metrics.add_bytes(outgoing.len());
    }

    if session.tls.state() == TlsSocketState::Closed || session.tls.state() == TlsSocketState::Error {
        return false;
    }
    if session.closing && !session.tls.needs_write_event() {
        return false;
    }

    let interest = if session.tls.needs_write_event() {
        Interest::READ | Interest::WRITE | Interest::EDGE
    } else {
        Interest::READ | Interest::EDGE
    };
    let _ = reactor.modify_fd(fd, interest, idx as u64);
    conn.last_active = now;
    true
}

fn negotiate_protocol(session: &mut TlsConnState, router: &Arc<Router>) {
    session.protocol = match session.tls.alpn_protocol().as_deref() {
        Some("h2") => {
            let mut h2_conn = h2::Http2Connection::new(router.clone());
            let mut out = Vec::new();
            h2_conn.send_initial_settings(&mut out);
            session.tls.queue_write(&out);
            session.h2 = Some(h2_conn);
            TlsAppProtocol::Http2
        }
        _ => TlsAppProtocol::Http1,
    };
}

/// Drains decrypted application data into the protocol-appropriate
/// buffer. Returns `false` on a fatal TLS read error.
fn drain_decrypted(conn: &mut Conn, session: &mut TlsConnState) -> bool {
    let mut scratch = [0u8; 4096];
    loop {
        match session.tls.read(&mut scratch) {
            Ok(0) => break,
            Ok(n) => match session.protocol {
                TlsAppProtocol::Http1 => {
                    if !append_plain_bytes(conn, &scratch[..n]) {
                        return false;
                    }
                }
                TlsAppProtocol::Http2 => session.h2_recv.extend_from_slice(&scratch[..n]),
                TlsAppProtocol::Pending => {}
            },
            Err(_) => return false,
        }
        if session.tls.state() == TlsSocketState::Closed {
            break;
        }
    }
    true
}

fn drive_http1_over_tls(conn: &mut Conn, session: &mut TlsConnState, router: &Router, metrics: &WorkerMetrics) -> bool {
    let mut requests_served = conn.requests_served;
    let outcome = h1::drive_read(conn, router, &mut requests_served);
    conn.requests_served = requests_served.min(KEEP_ALIVE_REQUEST_CAP);

    match outcome {
        DriveOutcome::NeedMore => true,
        DriveOutcome::ResponseReady => {
            metrics.inc_req();
            let keep_alive = h1::is_keep_alive(conn);
            session.tls.queue_write(&conn.write_buf[..conn.parse_pos as usize]);
            conn.parse_pos = 0;
            conn.write_pos = 0;
            session.closing = !keep_alive;
            true
        }
        DriveOutcome::Upgrade | DriveOutcome::Close => false,
    }
}

/// Feeds every complete frame buffered in `session.h2_recv` through the
/// HTTP/2 connection driver, queuing whatever it writes back. Returns
/// `false` once the connection is GOAWAY-fatal; the caller still
/// flushes the queued GOAWAY bytes before closing.
fn drive_h2_frames(session: &mut TlsConnState) -> bool {
    let Some(h2_conn) = session.h2.as_mut() else { return false };

    if h2_conn.state() == h2::ConnectionState::PrefacePending {
        match h2_conn.consume_preface(&session.h2_recv) {
            Ok(Some(consumed)) => {
                session.h2_recv.drain(..consumed);
            }
            Ok(None) => return true,
            Err(code) => {
                let mut out = Vec::new();
                h2_conn.send_goaway(code, b"", &mut out);
                session.tls.queue_write(&out);
                return false;
            }
        }
    }

    loop {
        match h2::frame::try_parse_frame(&session.h2_recv) {
            Ok(Some((header, total))) => {
                let payload = session.h2_recv[h2::frame::FRAME_HEADER_LEN..total].to_vec();
                let mut out = Vec::new();
                let result = h2_conn.process_frame(header, &payload, &mut out);
                session.h2_recv.drain(..total);
                if !out.is_empty() {
                    session.tls.queue_write(&out);
                }
                if let Err(code) = result {
                    let mut goaway = Vec::new();
                    h2_conn.send_goaway(code, b"", &mut goaway);
                    session.tls.queue_write(&goaway);
                    return false;
                }
            }
            Ok(None) => return true,
            Err(_) => {
                let mut goaway = Vec::new();
                h2_conn.send_goaway(h2::ErrorCode::FrameSizeError, b"", &mut goaway);
                session.tls.queue_write(&goaway);
                return false;
            }
        }
    }
}
