//! Central error taxonomy for the engine.
//!
//! `ErrorKind` is the stable, numbered-in-spirit disposition table: every
//! subsystem produces one of these kinds, and the disposition (rearm, close
//! the connection, GOAWAY, abort startup) is a pure function of the kind.
//! `EngineError` is the `thiserror`-derived Rust-ergonomics wrapper carrying
//! the actual cause.

use std::io;

use crate::h2::ErrorCode as H2ErrorCode;

/// Stable disposition classification, independent of the underlying cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    IoWouldBlock,
    IoClosed,
    IoSyscallFailed,
    TlsWantIo,
    TlsFatal,
    Http1Malformed,
    Http1TooLarge,
    Http2ProtocolError,
    Http2FlowControl,
    Http2Compression,
    Http2FrameSize,
    RouterNotFound,
    Config,
}

impl ErrorKind {
    /// Whether this kind should close the owning connection.
    pub fn closes_connection(self) -> bool {
        !matches!(self, ErrorKind::IoWouldBlock | ErrorKind::TlsWantIo)
    }

    /// The GOAWAY error code this kind maps to, if it is HTTP/2-fatal.
    pub fn goaway_code(self) -> Option<H2ErrorCode> {
        match self {
            ErrorKind::Http2ProtocolError => Some(H2ErrorCode::ProtocolError),
            ErrorKind::Http2FlowControl => Some(H2ErrorCode::FlowControlError),
            ErrorKind::Http2Compression => Some(H2ErrorCode::CompressionError),
            ErrorKind::Http2FrameSize => Some(H2ErrorCode::FrameSizeError),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("TLS error: {0}")]
    Tls(#[from] openssl::ssl::Error),

    #[error("TLS stack error: {0}")]
    TlsStack(#[from] openssl::error::ErrorStack),

    #[error("HTTP/1 parse error: {0:?}")]
    Http1Parse(crate::http1::parser::ParseError),

    #[error("HTTP/2 connection error: {0:?}")]
    Http2(H2ErrorCode),

    #[error("HPACK error: {0:?}")]
    Hpack(crate::hpack::HpackError),

    #[error("connection slab exhausted")]
    SlabFull,

    #[error("worker thread panicked: {0}")]
    WorkerPanic(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Io(e) => match e.kind() {
                io::ErrorKind::WouldBlock => ErrorKind::IoWouldBlock,
                io::ErrorKind::UnexpectedEof | io::ErrorKind::ConnectionReset => {
                    ErrorKind::IoClosed
                }
                _ => ErrorKind::IoSyscallFailed,
            },
            EngineError::Tls(_) | EngineError::TlsStack(_) => ErrorKind::TlsFatal,
            EngineError::Http1Parse(crate::http1::parser::ParseError::TooLarge) => {
                ErrorKind::Http1TooLarge
            }
            EngineError::Http1Parse(_) => ErrorKind::Http1Malformed,
            EngineError::Http2(code) => match code {
                H2ErrorCode::FlowControlError => ErrorKind::Http2FlowControl,
                H2ErrorCode::CompressionError => ErrorKind::Http2Compression,
                H2ErrorCode::FrameSizeError => ErrorKind::Http2FrameSize,
                _ => ErrorKind::Http2ProtocolError,
            },
            EngineError::Hpack(_) => ErrorKind::Http2Compression,
            EngineError::SlabFull | EngineError::WorkerPanic(_) | EngineError::Other(_) => {
                ErrorKind::IoSyscallFailed
            }
            EngineError::Config(_) => ErrorKind::Config,
        }
    }
}

impl From<crate::http1::parser::ParseError> for EngineError {
    fn from(e: crate::http1::parser::ParseError) -> Self {
        EngineError::Http1Parse(e)
    }
}

impl From<crate::hpack::HpackError> for EngineError {
    fn from(e: crate::hpack::HpackError) -> Self {
        EngineError::Hpack(e)
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
