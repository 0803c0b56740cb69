//! Non-blocking TCP socket primitives: raw syscalls plus an RAII wrapper.
//!
//! Grounded on the teacher's `syscalls.rs`, split out of the monolithic file
//! so the reactor and listener modules depend on socket mechanics without
//! dragging in epoll/kqueue internals.

use std::io;
use std::mem;
use std::net::SocketAddr;
use std::ptr;

use libc::{c_int, c_void, socklen_t};

use crate::error::EngineResult;

/// Owns exactly one OS socket fd. Closed once: on drop, or via `release()`
/// which hands ownership to the caller without closing.
#[derive(Debug)]
pub struct TcpSocket {
    fd: c_int,
}

impl TcpSocket {
    /// Takes ownership of an already-open fd (e.g. from `accept`).
    pub fn from_raw(fd: c_int) -> Self {
        Self { fd }
    }

    pub fn as_raw(&self) -> c_int {
        self.fd
    }

    /// Extracts the fd without closing it. The caller now owns it.
    pub fn release(mut self) -> c_int {
        let fd = self.fd;
        self.fd = -1;
        fd
    }

    pub fn set_nodelay(&self) -> io::Result<()> {
        set_nodelay(self.fd)
    }

    /// Reads into `buf`. `Ok(0)` on a non-blocking would-block; a genuine
    /// peer EOF is also `Ok(0)` — callers distinguish via the reactor event
    /// (HUP) or by tracking whether any bytes were ever requested.
    pub fn read(&self, buf: &mut [u8]) -> EngineResult<usize> {
        read_nonblocking(self.fd, buf)
    }

    pub fn write(&self, buf: &[u8]) -> EngineResult<usize> {
        write_nonblocking(self.fd, buf)
    }

    pub fn writev(&self, bufs: &[&[u8]]) -> EngineResult<usize> {
        writev_nonblocking(self.fd, bufs)
    }
}

impl Drop for TcpSocket {
    fn drop(&mut self) {
        if self.fd >= 0 {
            unsafe {
                libc::close(self.fd);
            }
        }
    }
}

fn set_nonblocking(fd: c_int) -> io::Result<()> {
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL, 0);
        if flags < 0 || libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

fn set_nodelay(fd: c_int) -> io::Result<()> {
    let one: c_int = 1;
    unsafe {
        if libc::setsockopt(
            fd,
            libc::IPPROTO_TCP,
            libc::TCP_NODELAY,
            &one as *const _ as *const c_void,
            mem::size_of_val(&one) as socklen_t,
        ) < 0
        {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

fn setsockopt_bool(fd: c_int, level: c_int, name: c_int, value: bool) {
    let v: c_int = value as c_int;
    unsafe {
        libc::setsockopt(
            fd,
            level,
            name,
            &v as *const _ as *const c_void,
            mem::size_of_val(&v) as socklen_t,
        );
    }
}

fn bind_addr(fd: c_int, addr: &SocketAddr) -> io::Result<()> {
    unsafe {
        match addr {
            SocketAddr::V4(a) => {
                #[cfg(target_os = "macos")]
                let sin = libc::sockaddr_in {
                    sin_len: mem::size_of::<libc::sockaddr_in>() as u8,
                    sin_family: libc::AF_INET as libc::sa_family_t,
                    sin_port: a.port().to_be(),
                    sin_addr: libc::in_addr {
                        s_addr: u32::from_ne_bytes(a.ip().octets()),
                    },
                    sin_zero: [0; 8],
                };
                #[cfg(target_os = "linux")]
                let sin = libc::sockaddr_in {
                    sin_family: libc::AF_INET as libc::sa_family_t,
                    sin_port: a.port().to_be(),
                    sin_addr: libc::in_addr {
                        s_addr: u32::from_ne_bytes(a.ip().octets()),
                    },
                    sin_zero: [0; 8],
                };
                if libc::bind(
                    fd,
                    &sin as *const _ as *const libc::sockaddr,
                    mem::size_of_val(&sin) as socklen_t,
                ) < 0
                {
                    return Err(io::Error::last_os_error());
                }
            }
            SocketAddr::V6(a) => {
                #[cfg(target_os = "macos")]
                let sin6 = libc::sockaddr_in6 {
                    sin6_len: mem::size_of::<libc::sockaddr_in6>() as u8,
                    sin6_family: libc::AF_INET6 as libc::sa_family_t,
                    sin6_port: a.port().to_be(),
                    sin6_flowinfo: a.flowinfo(),
                    sin6_addr: libc::in6_addr {
                        s6_addr: a.ip().octets(),
                    },
                    sin6_scope_id: a.scope_id(),
                };
                #[cfg(target_os = "linux")]
                let sin6 = libc::sockaddr_in6 {
                    sin6_family: libc::AF_INET6 as libc::sa_family_t,
                    sin6_port: a.port().to_be(),
                    sin6_flowinfo: a.flowinfo(),
                    sin6_addr: libc::in6_addr {
                        s6_addr: a.ip().octets(),
                    },
                    sin6_scope_id: a.scope_id(),
                };
                if libc::bind(
                    fd,
                    &sin6 as *const _ as *const libc::sockaddr,
                    mem::size_of_val(&sin6) as socklen_t,
                ) < 0
                {
                    return Err(io::Error::last_os_error());
                }
            }
        }
    }
    Ok(())
}

/// Builds a listen socket. `reuseport` enables kernel load-balanced
/// multi-worker binding (spec §4.2); `backlog` mirrors `TcpListenerConfig`.
pub fn create_listen_socket(addr: SocketAddr, backlog: i32, reuseport: bool) -> io::Result<c_int> {
    let domain = if addr.is_ipv6() {
        libc::AF_INET6
    } else {
        libc::AF_INET
    };

    unsafe {
        #[cfg(target_os = "linux")]
        let fd = libc::socket(domain, libc::SOCK_STREAM | libc::SOCK_NONBLOCK, 0);
        #[cfg(not(target_os = "linux"))]
        let fd = libc::socket(domain, libc::SOCK_STREAM, 0);

        if fd < 0 {
            return Err(io::Error::last_os_error());
        }

        #[cfg(not(target_os = "linux"))]
        if let Err(e) = set_nonblocking(fd) {
            libc::close(fd);
            return Err(e);
        }

        setsockopt_bool(fd, libc::SOL_SOCKET, libc::SO_REUSEADDR, true);
        if reuseport {
            setsockopt_bool(fd, libc::SOL_SOCKET, libc::SO_REUSEPORT, true);
        }
        #[cfg(target_os = "macos")]
        setsockopt_bool(fd, libc::SOL_SOCKET, libc::SO_NOSIGPIPE, true);

        if let Err(e) = bind_addr(fd, &addr) {
            libc::close(fd);
            return Err(e);
        }

        if libc::listen(fd, backlog) < 0 {
            let err = io::Error::last_os_error();
            libc::close(fd);
            return Err(err);
        }

        Ok(fd)
    }
}

/// Accepts one connection. `Ok(None)` on would-block (edge-triggered
/// listeners must loop on this until `None`).
pub fn accept_connection(listen_fd: c_int) -> EngineResult<Option<TcpSocket>> {
    #[cfg(target_os = "linux")]
    unsafe {
        let fd = libc::accept4(
            listen_fd,
            ptr::null_mut(),
            ptr::null_mut(),
            libc::SOCK_NONBLOCK,
        );
        if fd < 0 {
            let err = io::Error::last_os_error();
            return if err.kind() == io::ErrorKind::WouldBlock {
                Ok(None)
            } else {
                Err(err.into())
            };
        }
        Ok(Some(TcpSocket::from_raw(fd)))
    }

    #[cfg(not(target_os = "linux"))]
    unsafe {
        let fd = libc::accept(listen_fd, ptr::null_mut(), ptr::null_mut());
        if fd < 0 {
            let err = io::Error::last_os_error();
            return if err.kind() == io::ErrorKind::WouldBlock {
                Ok(None)
            } else {
                Err(err.into())
            };
        }
        if let Err(e) = set_nonblocking(fd) {
            libc::close(fd);
            return Err(e.into());
        }
        setsockopt_bool(fd, libc::SOL_SOCKET, libc::SO_NOSIGPIPE, true);
        Ok(Some(TcpSocket::from_raw(fd)))
    }
}

pub fn read_nonblocking(fd: c_int, buf: &mut [u8]) -> EngineResult<usize> {
    unsafe {
        let res = libc::read(fd, buf.as_mut_ptr() as *mut c_void, buf.len());
        if res < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock {
                Ok(0)
            } else {
                Err(err.into())
            }
        } else {
            Ok(res as usize)
        }
    }
}

pub fn write_nonblocking(fd: c_int, buf: &[u8]) -> EngineResult<usize> {
    unsafe {
        let res = libc::write(fd, buf.as_ptr() as *const c_void, buf.len());
        if res < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock {
                Ok(0)
            } else {
                Err(err.into())
            }
        } else {
            Ok(res as usize)
        }
    }
}

/// Scatter-gather write: headers + body in one syscall.
pub fn writev_nonblocking(fd: c_int, bufs: &[&[u8]]) -> EngineResult<usize> {
    if bufs.is_empty() {
        return Ok(0);
    }
    let mut iovecs: [libc::iovec; 8] = unsafe { mem::zeroed() };
    let iov_count = bufs.len().min(8);
    for (i, b) in bufs.iter().take(iov_count).enumerate() {
        iovecs[i] = libc::iovec {
            iov_base: b.as_ptr() as *mut c_void,
            iov_len: b.len(),
        };
    }
    unsafe {
        let res = libc::writev(fd, iovecs.as_ptr(), iov_count as c_int);
        if res < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock {
                Ok(0)
            } else {
                Err(err.into())
            }
        } else {
            Ok(res as usize)
        }
    }
}
