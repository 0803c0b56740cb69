//! Listener strategies (spec §4.2): either every worker binds its own
//! `SO_REUSEPORT` socket and lets the kernel load-balance `accept()`
//! calls, or a single acceptor thread owns the one listen socket and
//! hands accepted fds to workers over the pipe-based queues in
//! `buffers::spsc` — used when `SO_REUSEPORT` is unavailable or
//! disabled by configuration.

use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use crate::buffers::spsc::{fd_queue, FdReceiver, FdSender};
use crate::config::{TcpListenerConfig, UdpListenerConfig};
use crate::error::{EngineError, EngineResult};
use crate::net::tcp;
use crate::net::{TcpSocket, UdpSocket};

/// What a single worker uses to learn about new connections.
pub enum WorkerListener {
    /// This worker owns a kernel-load-balanced listen socket directly.
    ReusePort(TcpSocket),
    /// This worker receives already-`accept()`ed fds from the acceptor
    /// thread over a pipe.
    Distributed(FdReceiver),
}

impl WorkerListener {
    /// The fd to register with the reactor for readability (a listen
    /// socket in `ReusePort` mode, the receive end of the pipe in
    /// `Distributed` mode).
    pub fn poll_fd(&self) -> i32 {
        match self {
            WorkerListener::ReusePort(sock) => sock.as_raw(),
            WorkerListener::Distributed(rx) => rx.raw_fd(),
        }
    }

    /// Drains every connection ready right now. `ReusePort` calls
    /// `accept()` until it would block (the socket is edge-triggered);
    /// `Distributed` drains the pipe the same way.
    pub fn drain_ready(&self) -> EngineResult<Vec<TcpSocket>> {
        let mut out = Vec::new();
        match self {
            WorkerListener::ReusePort(sock) => loop {
                match tcp::accept_connection(sock.as_raw())? {
                    Some(client) => out.push(client),
                    None => break,
                }
            },
            WorkerListener::Distributed(rx) => loop {
                match rx.recv()? {
                    Some(fd) => out.push(TcpSocket::from_raw(fd)),
                    None => break,
                }
            },
        }
        Ok(out)
    }
}

fn resolve_addr(config: &TcpListenerConfig) -> EngineResult<SocketAddr> {
    let spec = format!("{}:{}", config.host, config.port);
    spec.to_socket_addrs()
        .map_err(|e| EngineError::Config(format!("invalid listen address {spec}: {e}")))?
        .next()
        .ok_or_else(|| EngineError::Config(format!("invalid listen address {spec}")))
}

fn resolve_udp_addr(config: &UdpListenerConfig) -> EngineResult<SocketAddr> {
    let spec = format!("{}:{}", config.host, config.port);
    spec.to_socket_addrs()
        .map_err(|e| EngineError::Config(format!("invalid listen address {spec}: {e}")))?
        .next()
        .ok_or_else(|| EngineError::Config(format!("invalid listen address {spec}")))
}

/// A UDP listener handed to one worker: the bound, non-blocking socket
/// plus the pre-allocated receive buffer size the worker loop should use
/// (spec §4.2 — "each worker pre-allocates one receive buffer of
/// `max_datagram_size` and loops `recvfrom` until `EAGAIN`").
pub struct UdpWorkerListener {
    pub socket: UdpSocket,
    pub max_datagram_size: usize,
}

/// Builds one `UdpWorkerListener` per worker, always with `SO_REUSEPORT`
/// when there is more than one worker (spec §4.2: "same multi-worker
/// shape, always SO_REUSEPORT when multi-worker").
pub fn build_udp_listeners(config: &UdpListenerConfig, num_workers: usize) -> EngineResult<Vec<UdpWorkerListener>> {
    let addr = resolve_udp_addr(config)?;
    let reuseport = config.use_reuseport || num_workers > 1;

    let mut listeners = Vec::with_capacity(num_workers);
    for _ in 0..num_workers {
        let socket = UdpSocket::bind(addr, reuseport)?;
        listeners.push(UdpWorkerListener { socket, max_datagram_size: config.max_datagram_size });
    }
    Ok(listeners)
}

/// Builds one `WorkerListener` per worker per the configured strategy.
/// In `Distributed` mode this also spawns the acceptor thread and
/// returns its join handle so the caller can wait on it during shutdown.
pub fn build_worker_listeners(
    config: &TcpListenerConfig,
    num_workers: usize,
    shutdown: Arc<AtomicBool>,
) -> EngineResult<(Vec<WorkerListener>, Option<thread::JoinHandle<()>>)> {
    let addr = resolve_addr(config)?;

    if config.use_reuseport {
        let mut listeners = Vec::with_capacity(num_workers);
        for _ in 0..num_workers {
            let fd = tcp::create_listen_socket(addr, config.backlog, true)?;
            listeners.push(WorkerListener::ReusePort(TcpSocket::from_raw(fd)));
        }
        return Ok((listeners, None));
    }

    let mut senders = Vec::with_capacity(num_workers);
    let mut listeners = Vec::with_capacity(num_workers);
    for _ in 0..num_workers {
        let (tx, rx) = fd_queue()?;
        senders.push(tx);
        listeners.push(WorkerListener::Distributed(rx));
    }

    let listen_fd = tcp::create_listen_socket(addr, config.backlog, false)?;
    let handle = spawn_acceptor(listen_fd, senders, shutdown);
    Ok((listeners, Some(handle)))
}

/// Runs the single acceptor loop: accepts connections and round-robins
/// their fds across `senders`, one per worker.
fn spawn_acceptor(listen_fd: i32, senders: Vec<FdSender>, shutdown: Arc<AtomicBool>) -> thread::JoinHandle<()> {
    thread::Builder::new()
        .name("engine-acceptor".to_string())
        .spawn(move || {
            let listen_socket = TcpSocket::from_raw(listen_fd);
            let mut next = 0usize;
            while !shutdown.load(Ordering::Acquire) {
                match tcp::accept_connection(listen_socket.as_raw()) {
                    Ok(Some(client)) => {
                        let fd = client.release();
                        if senders[next % senders.len()].send(fd).is_err() {
                            unsafe {
                                libc::close(fd);
                            }
                        }
                        next = next.wrapping_add(1);
                    }
                    Ok(None) => {
                        thread::sleep(std::time::Duration::from_millis(1));
                    }
                    Err(_) => break,
                }
            }
        })
        .expect("failed to spawn acceptor thread")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_addr_parses_host_and_port() {
        let config = TcpListenerConfig::new("127.0.0.1", 9000);
        let addr = resolve_addr(&config).unwrap();
        assert_eq!(addr.port(), 9000);
    }
}
