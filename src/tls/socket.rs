//! Non-blocking TLS socket driven through OpenSSL memory BIOs, grounded
//! on the donor's `TlsSocket`: ciphertext moves through an in-process
//! read/write adapter instead of a live fd, so the handshake and I/O
//! steps can be retried from the reactor's readiness callback without
//! ever blocking a worker thread.

use std::collections::VecDeque;
use std::io::{self, Read, Write};

use openssl::ssl::{ErrorCode as SslErrorCode, HandshakeError, MidHandshakeSslStream, Ssl, SslStream};

use crate::error::{EngineError, EngineResult};
use crate::tls::context::TlsContext;

/// Mirrors the donor's `TlsState` enum exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsSocketState {
    HandshakeNeeded,
    HandshakeInProgress,
    Connected,
    Error,
    Closed,
}

/// In-process stand-in for the network fd: ciphertext read off the real
/// socket is pushed into `incoming`; ciphertext OpenSSL wants sent is
/// appended to `outgoing` for the caller to drain and write out.
struct MemoryBio {
    incoming: VecDeque<u8>,
    outgoing: Vec<u8>,
}

impl MemoryBio {
    fn new() -> Self {
        Self { incoming: VecDeque::new(), outgoing: Vec::new() }
    }
}

impl Read for MemoryBio {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.incoming.is_empty() {
            return Err(io::Error::new(io::ErrorKind::WouldBlock, "no ciphertext buffered"));
        }
        let n = buf.len().min(self.incoming.len());
        for slot in buf.iter_mut().take(n) {
            *slot = self.incoming.pop_front().unwrap();
        }
        Ok(n)
    }
}

impl Write for MemoryBio {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.outgoing.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

enum Driver {
    Handshaking(MidHandshakeSslStream<MemoryBio>),
    Connected(SslStream<MemoryBio>),
    Errored,
}

pub struct TlsSocket {
    driver: Driver,
    state: TlsSocketState,
    error_message: Option<String>,
    /// Plaintext queued by the application, not yet handed to
    /// `SSL_write`; `write_offset` is how much of it has been consumed.
    write_buffer: Vec<u8>,
    write_offset: usize,
}

impl TlsSocket {
    /// Begins a server-side handshake over a freshly accepted connection.
    pub fn accept(ctx: &TlsContext) -> EngineResult<Self> {
        let ssl = ctx.new_ssl()?;
        let bio = MemoryBio::new();
        let driver = match ssl.accept(bio) {
            Ok(stream) => Driver::Connected(stream),
            Err(HandshakeError::WouldBlock(mid)) => Driver::Handshaking(mid),
            Err(HandshakeError::Failure(mid)) => {
                return Ok(Self {
                    error_message: Some(mid.error().to_string()),
                    driver: Driver::Errored,
                    state: TlsSocketState::Error,
                    write_buffer: Vec::new(),
                    write_offset: 0,
                })
            }
            Err(HandshakeError::SetupFailure(e)) => return Err(EngineError::TlsStack(e)),
        };

        let state = match &driver {
            Driver::Connected(_) => TlsSocketState::Connected,
            _ => TlsSocketState::HandshakeInProgress,
        };

        Ok(Self { driver, state, error_message: None, write_buffer: Vec::new(), write_offset: 0 })
    }

    pub fn state(&self) -> TlsSocketState {
        self.state
    }

    pub fn is_handshake_complete(&self) -> bool {
        self.state == TlsSocketState::Connected
    }

    /// Feeds ciphertext read off the real socket into the handshake/read
    /// path. Call before `drive_handshake`/`read` whenever the reactor
    /// reports readability.
    pub fn feed_incoming(&mut self, data: &[u8]) {
        let bio = match &mut self.driver {
            Driver::Handshaking(mid) => mid.get_mut(),
            Driver::Connected(stream) => stream.get_mut(),
            Driver::Errored => return,
        };
        bio.incoming.extend(data.iter().copied());
    }

    /// Drains ciphertext OpenSSL wants written to the real socket.
    pub fn drain_outgoing(&mut self) -> Vec<u8> {
        let bio = match &mut self.driver {
            Driver::Handshaking(mid) => mid.get_mut(),
            Driver::Connected(stream) => stream.get_mut(),
            Driver::Errored => return Vec::new(),
        };
        std::mem::take(&mut bio.outgoing)
    }

    pub fn has_pending_output(&self) -> bool {
        match &self.driver {
            Driver::Handshaking(mid) => !mid.get_ref().outgoing.is_empty(),
            Driver::Connected(stream) => !stream.get_ref().outgoing.is_empty(),
            Driver::Errored => false,
        }
    }

    pub fn needs_write_event(&self) -> bool {
        self.has_pending_output() || self.write_offset < self.write_buffer.len()
    }

    /// Advances a handshake in progress. Returns `Ok(true)` once
    /// complete; `Ok(false)` means feed more ciphertext and call again.
    pub fn drive_handshake(&mut self) -> EngineResult<bool> {
        let mid = match std::mem::replace(&mut self.driver, Driver::Errored) {
            Driver::Handshaking(mid) => mid,
            other @ Driver::Connected(_) => {
                self.driver = other;
                return Ok(true);
            }
            Driver::Errored => {
                return Err(EngineError::Other(
                    self.error_message.clone().unwrap_or_else(|| "TLS handshake already failed".into()),
                ))
            }
        };

        match mid.handshake() {
            Ok(stream) => {
                self.driver = Driver::Connected(stream);
                self.state = TlsSocketState::Connected;
                Ok(true)
            }
            Err(HandshakeError::WouldBlock(mid)) => {
                self.driver = Driver::Handshaking(mid);
                self.state = TlsSocketState::HandshakeInProgress;
                Ok(false)
            }
            Err(HandshakeError::Failure(mid)) => {
                self.error_message = Some(mid.error().to_string());
                self.state = TlsSocketState::Error;
                Err(EngineError::Other(self.error_message.clone().unwrap()))
            }
            Err(HandshakeError::SetupFailure(e)) => {
                self.state = TlsSocketState::Error;
                Err(EngineError::TlsStack(e))
            }
        }
    }

    /// Reads decrypted application data. `Ok(0)` can mean either a
    /// would-block (more ciphertext needed) or a clean TLS close; the
    /// caller distinguishes via `state()` after the call.
    pub fn read(&mut self, buf: &mut [u8]) -> EngineResult<usize> {
        let Driver::Connected(stream) = &mut self.driver else {
            return Err(EngineError::Other("TLS handshake not complete".into()));
        };
        match stream.ssl_read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.code() == SslErrorCode::WANT_READ || e.code() == SslErrorCode::WANT_WRITE => Ok(0),
            Err(e) if e.code() == SslErrorCode::ZERO_RETURN => {
                self.state = TlsSocketState::Closed;
                Ok(0)
            }
            Err(e) => {
                self.state = TlsSocketState::Error;
                Err(EngineError::Tls(e))
            }
        }
    }

    /// Queues plaintext for encryption; actual `SSL_write` calls happen
    /// in `flush`, which is resumable across would-block boundaries.
    pub fn queue_write(&mut self, data: &[u8]) {
        self.write_buffer.extend_from_slice(data);
    }

    /// Drives queued plaintext through `SSL_write`, advancing
    /// `write_offset`. Returns `true` once the whole buffer has been
    /// consumed by SSL (not necessarily flushed to the real socket yet —
    /// call `drain_outgoing` after to get the ciphertext to send).
    pub fn flush(&mut self) -> EngineResult<bool> {
        let Driver::Connected(stream) = &mut self.driver else {
            return Err(EngineError::Other("TLS handshake not complete".into()));
        };

        while self.write_offset < self.write_buffer.len() {
            match stream.ssl_write(&self.write_buffer[self.write_offset..]) {
                Ok(n) => self.write_offset += n,
                Err(e) if e.code() == SslErrorCode::WANT_READ || e.code() == SslErrorCode::WANT_WRITE => {
                    return Ok(false)
                }
                Err(e) => {
                    self.state = TlsSocketState::Error;
                    return Err(EngineError::Tls(e));
                }
            }
        }

        self.write_buffer.clear();
        self.write_offset = 0;
        Ok(true)
    }

    pub fn alpn_protocol(&self) -> Option<String> {
        match &self.driver {
            Driver::Connected(stream) => stream
                .ssl()
                .selected_alpn_protocol()
                .map(|b| String::from_utf8_lossy(b).into_owned()),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        self.error_message.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_bio_read_reports_would_block_when_empty() {
        let mut bio = MemoryBio::new();
        let mut buf = [0u8; 16];
        let err = bio.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }

    #[test]
    fn memory_bio_write_buffers_into_outgoing() {
        let mut bio = MemoryBio::new();
        bio.write_all(b"hello").unwrap();
        assert_eq!(bio.outgoing, b"hello");
    }
}
