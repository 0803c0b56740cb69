//! Platform-portable event-driven I/O reactor (spec §4.1).
//!
//! One reactor per worker thread; handlers run synchronously on that
//! thread. `Interest`/`Events` are a readiness-model view; the Windows
//! completion-port backend (`iocp.rs`) translates completions back into
//! this same shape so the rest of the engine never branches on platform.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::EngineResult;

pub mod timer;

#[cfg(target_os = "linux")]
pub mod epoll;
#[cfg(target_os = "linux")]
pub use epoll::Epoll as PlatformReactor;

#[cfg(any(target_os = "macos", target_os = "freebsd", target_os = "netbsd", target_os = "openbsd"))]
pub mod kqueue;
#[cfg(any(target_os = "macos", target_os = "freebsd", target_os = "netbsd", target_os = "openbsd"))]
pub use kqueue::Kqueue as PlatformReactor;

#[cfg(windows)]
pub mod iocp;
#[cfg(windows)]
pub use iocp::Iocp as PlatformReactor;

/// Registration-time interest / delivery-time readiness flags, modeled as
/// a plain bitmask (matching the teacher's direct use of `EPOLLIN`/
/// `EPOLLOUT` constants rather than pulling in a flags crate).
///
/// `EDGE` is only meaningful at registration: per spec §3, "the `EDGE`
/// flag is a registration-time request for edge-triggered notification;
/// delivery flags never include it."
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Interest(u32);

impl Interest {
    pub const READ: Interest = Interest(0b0001);
    pub const WRITE: Interest = Interest(0b0010);
    pub const ERROR: Interest = Interest(0b0100);
    pub const HUP: Interest = Interest(0b1000);
    pub const EDGE: Interest = Interest(0b1_0000);
    pub const NONE: Interest = Interest(0);

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn from_bits(bits: u32) -> Self {
        Interest(bits)
    }

    pub fn contains(self, other: Interest) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for Interest {
    type Output = Interest;
    fn bitor(self, rhs: Interest) -> Interest {
        Interest(self.0 | rhs.0)
    }
}

impl std::ops::BitAnd for Interest {
    type Output = Interest;
    fn bitand(self, rhs: Interest) -> Interest {
        Interest(self.0 & rhs.0)
    }
}

/// One delivered readiness event.
#[derive(Clone, Copy)]
pub struct Event {
    pub token: u64,
    pub readiness: Interest,
}

/// The four-method contract spec §9's "Inheritance used for event-loop
/// polymorphism" note asks for: a narrow interface instead of a class
/// hierarchy, with one concrete type chosen at compile time per platform.
pub trait Reactor {
    fn add_fd(&self, fd: i32, interest: Interest, token: u64) -> EngineResult<()>;
    fn modify_fd(&self, fd: i32, interest: Interest, token: u64) -> EngineResult<()>;
    fn remove_fd(&self, fd: i32) -> EngineResult<()>;

    /// Blocks up to `timeout_ms` (negative = forever) and fills `events`.
    /// Returns the number of events filled. `EINTR` is swallowed as `Ok(0)`.
    fn poll(&self, events: &mut Vec<Event>, timeout_ms: i32) -> EngineResult<usize>;
}

/// Drives a `Reactor` until `stop()` is observed, invoking `on_event` for
/// each delivered readiness notification and `on_tick` once per loop
/// iteration (used for stale-connection pruning and timer dispatch).
pub struct EventLoop<R: Reactor> {
    reactor: R,
    shutdown: Arc<AtomicBool>,
    events: Vec<Event>,
}

impl<R: Reactor> EventLoop<R> {
    pub fn new(reactor: R, shutdown: Arc<AtomicBool>) -> Self {
        Self {
            reactor,
            shutdown,
            events: Vec::with_capacity(1024),
        }
    }

    pub fn reactor(&self) -> &R {
        &self.reactor
    }

    pub fn stop_flag(&self) -> &Arc<AtomicBool> {
        &self.shutdown
    }

    /// Runs until `stop()` is observed. Bounded stop latency of one poll
    /// timeout, per spec §5 ("no more than one poll timeout of latency,
    /// bounded at 100 ms by convention").
    pub fn run(
        &mut self,
        poll_timeout_ms: i32,
        mut on_event: impl FnMut(&R, Event),
        mut on_tick: impl FnMut(&R),
    ) -> EngineResult<()> {
        while !self.shutdown.load(Ordering::Acquire) {
            let n = self.reactor.poll(&mut self.events, poll_timeout_ms)?;
            for ev in self.events.drain(..n) {
                on_event(&self.reactor, ev);
            }
            on_tick(&self.reactor);
        }
        Ok(())
    }

    pub fn stop(shutdown: &Arc<AtomicBool>) {
        shutdown.store(true, Ordering::Release);
    }
}
