//! Acceptor-to-worker fd handoff (spec §4.2, acceptor-distributor
//! fallback path for platforms without `SO_REUSEPORT`). A dedicated
//! acceptor thread owns the listening socket and round-robins accepted
//! connections to worker threads over a non-blocking pipe per worker;
//! each pipe carries raw fds as 4-byte native-endian integers, which the
//! worker's reactor watches for readability like any other fd.
//!
//! Grounded on the teacher's `create_pipe`/`send_fd_over_pipe`/
//! `recv_fd_from_pipe` free functions, generalized into a `FdQueue` type
//! so `listener.rs` can hold one per worker without repeating the wire
//! format at each call site.

use std::io;
use std::os::raw::{c_int, c_void};

use crate::error::EngineResult;

/// One end of an acceptor -> worker fd pipe. `Sender` lives with the
/// acceptor thread, `Receiver` is registered with the owning worker's
/// reactor for `Interest::READ`.
pub struct FdSender {
    write_fd: c_int,
}

pub struct FdReceiver {
    read_fd: c_int,
}

/// Creates one pipe and splits it into the two halves above. The read
/// end is always non-blocking; the write end stays blocking since the
/// acceptor thread does a bounded number of 4-byte writes and must not
/// silently drop a connection under backpressure.
pub fn fd_queue() -> EngineResult<(FdSender, FdReceiver)> {
    let mut fds = [0 as c_int; 2];
    unsafe {
        if libc::pipe(fds.as_mut_ptr()) < 0 {
            return Err(io::Error::last_os_error().into());
        }
        let flags = libc::fcntl(fds[0], libc::F_GETFL, 0);
        if flags < 0 || libc::fcntl(fds[0], libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            let err = io::Error::last_os_error();
            libc::close(fds[0]);
            libc::close(fds[1]);
            return Err(err.into());
        }
    }
    Ok((FdSender { write_fd: fds[1] }, FdReceiver { read_fd: fds[0] }))
}

impl FdSender {
    pub fn raw_fd(&self) -> c_int {
        self.write_fd
    }

    /// Hands one accepted fd to the worker on the other end. Blocks
    /// only for the duration of a 4-byte pipe write, which the kernel
    /// buffers well past any realistic per-worker backlog.
    pub fn send(&self, client_fd: c_int) -> EngineResult<()> {
        let bytes = client_fd.to_ne_bytes();
        unsafe {
            let n = libc::write(self.write_fd, bytes.as_ptr() as *const c_void, 4);
            if n < 0 {
                Err(io::Error::last_os_error().into())
            } else {
                Ok(())
            }
        }
    }
}

impl FdReceiver {
    pub fn raw_fd(&self) -> c_int {
        self.read_fd
    }

    /// Drains at most one handed-off fd. Returns `Ok(None)` on
    /// `EWOULDBLOCK` (nothing queued) and on a short/zero read, which
    /// can only happen if the write end closed mid-handoff.
    pub fn recv(&self) -> EngineResult<Option<c_int>> {
        let mut buf = [0u8; 4];
        unsafe {
            let n = libc::read(self.read_fd, buf.as_mut_ptr() as *mut c_void, 4);
            if n < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::WouldBlock {
                    Ok(None)
                } else {
                    Err(err.into())
                }
            } else if n == 4 {
                Ok(Some(c_int::from_ne_bytes(buf)))
            } else {
                Ok(None)
            }
        }
    }
}

impl Drop for FdSender {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.write_fd);
        }
    }
}

impl Drop for FdReceiver {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.read_fd);
        }
    }
}
