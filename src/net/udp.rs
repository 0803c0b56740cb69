//! Non-blocking UDP socket, reserved for the HTTP/3/QUIC listener (spec
//! §4.2/§4.9 — packet *processing* is out of scope, the listener shape is
//! not).

use std::io;
use std::mem;
use std::net::{SocketAddr, SocketAddrV4, SocketAddrV6};

use libc::{c_int, c_void, socklen_t};

use crate::error::EngineResult;

#[derive(Debug)]
pub struct UdpSocket {
    fd: c_int,
}

impl UdpSocket {
    pub fn bind(addr: SocketAddr, reuseport: bool) -> io::Result<Self> {
        let domain = if addr.is_ipv6() {
            libc::AF_INET6
        } else {
            libc::AF_INET
        };
        unsafe {
            let fd = libc::socket(domain, libc::SOCK_DGRAM, 0);
            if fd < 0 {
                return Err(io::Error::last_os_error());
            }
            let flags = libc::fcntl(fd, libc::F_GETFL, 0);
            if flags < 0 || libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
                let err = io::Error::last_os_error();
                libc::close(fd);
                return Err(err);
            }
            let one: c_int = 1;
            libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_REUSEADDR,
                &one as *const _ as *const c_void,
                mem::size_of_val(&one) as socklen_t,
            );
            if reuseport {
                libc::setsockopt(
                    fd,
                    libc::SOL_SOCKET,
                    libc::SO_REUSEPORT,
                    &one as *const _ as *const c_void,
                    mem::size_of_val(&one) as socklen_t,
                );
            }

            let bind_res = match addr {
                SocketAddr::V4(a) => bind_v4(fd, a),
                SocketAddr::V6(a) => bind_v6(fd, a),
            };
            if let Err(e) = bind_res {
                libc::close(fd);
                return Err(e);
            }
            Ok(Self { fd })
        }
    }

    pub fn as_raw(&self) -> c_int {
        self.fd
    }

    /// Receives one datagram. Loops by the caller until `Ok(None)`
    /// (`EAGAIN`), matching edge-triggered registration.
    pub fn recv_from(&self, buf: &mut [u8]) -> EngineResult<Option<(usize, SocketAddr)>> {
        let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
        let mut addr_len = mem::size_of::<libc::sockaddr_storage>() as socklen_t;
        unsafe {
            let n = libc::recvfrom(
                self.fd,
                buf.as_mut_ptr() as *mut c_void,
                buf.len(),
                0,
                &mut storage as *mut _ as *mut libc::sockaddr,
                &mut addr_len,
            );
            if n < 0 {
                let err = io::Error::last_os_error();
                return if err.kind() == io::ErrorKind::WouldBlock {
                    Ok(None)
                } else {
                    Err(err.into())
                };
            }
            let addr = sockaddr_storage_to_std(&storage);
            Ok(Some((n as usize, addr)))
        }
    }

    pub fn send_to(&self, buf: &[u8], dest: SocketAddr) -> EngineResult<usize> {
        unsafe {
            let n = match dest {
                SocketAddr::V4(a) => {
                    let sin = v4_sockaddr(a);
                    libc::sendto(
                        self.fd,
                        buf.as_ptr() as *const c_void,
                        buf.len(),
                        0,
                        &sin as *const _ as *const libc::sockaddr,
                        mem::size_of_val(&sin) as socklen_t,
                    )
                }
                SocketAddr::V6(a) => {
                    let sin6 = v6_sockaddr(a);
                    libc::sendto(
                        self.fd,
                        buf.as_ptr() as *const c_void,
                        buf.len(),
                        0,
                        &sin6 as *const _ as *const libc::sockaddr,
                        mem::size_of_val(&sin6) as socklen_t,
                    )
                }
            };
            if n < 0 {
                Err(io::Error::last_os_error().into())
            } else {
                Ok(n as usize)
            }
        }
    }
}

impl Drop for UdpSocket {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}

fn v4_sockaddr(a: SocketAddrV4) -> libc::sockaddr_in {
    libc::sockaddr_in {
        #[cfg(target_os = "macos")]
        sin_len: mem::size_of::<libc::sockaddr_in>() as u8,
        sin_family: libc::AF_INET as libc::sa_family_t,
        sin_port: a.port().to_be(),
        sin_addr: libc::in_addr {
            s_addr: u32::from_ne_bytes(a.ip().octets()),
        },
        sin_zero: [0; 8],
    }
}

fn v6_sockaddr(a: SocketAddrV6) -> libc::sockaddr_in6 {
    libc::sockaddr_in6 {
        #[cfg(target_os = "macos")]
        sin6_len: mem::size_of::<libc::sockaddr_in6>() as u8,
        sin6_family: libc::AF_INET6 as libc::sa_family_t,
        sin6_port: a.port().to_be(),
        sin6_flowinfo: a.flowinfo(),
        sin6_addr: libc::in6_addr {
            s6_addr: a.ip().octets(),
        },
        sin6_scope_id: a.scope_id(),
    }
}

fn bind_v4(fd: c_int, a: SocketAddrV4) -> io::Result<()> {
    let sin = v4_sockaddr(a);
    unsafe {
        if libc::bind(
            fd,
            &sin as *const _ as *const libc::sockaddr,
            mem::size_of_val(&sin) as socklen_t,
        ) < 0
        {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

fn bind_v6(fd: c_int, a: SocketAddrV6) -> io::Result<()> {
    let sin6 = v6_sockaddr(a);
    unsafe {
        if libc::bind(
            fd,
            &sin6 as *const _ as *const libc::sockaddr,
            mem::size_of_val(&sin6) as socklen_t,
        ) < 0
        {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

unsafe fn sockaddr_storage_to_std(storage: &libc::sockaddr_storage) -> SocketAddr {
    match storage.ss_family as i32 {
        libc::AF_INET => {
            let sin = &*(storage as *const _ as *const libc::sockaddr_in);
            SocketAddr::V4(SocketAddrV4::new(
                std::net::Ipv4Addr::from(u32::from_ne_bytes(sin.sin_addr.s_addr.to_ne_bytes())),
                u16::from_be(sin.sin_port),
            ))
        }
        _ => {
            let sin6 = &*(storage as *const _ as *const libc::sockaddr_in6);
            SocketAddr::V6(SocketAddrV6::new(
                std::net::Ipv6Addr::from(sin6.sin6_addr.s6_addr),
                u16::from_be(sin6.sin6_port),
                sin6.sin6_flowinfo,
                sin6.sin6_scope_id,
            ))
        }
    }
}
