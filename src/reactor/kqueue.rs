//! BSD/macOS kqueue backend. `EV_CLEAR` gives edge-triggered semantics;
//! `EV_EOF` on the read filter is surfaced as `Interest::HUP` (spec §4.1).
//! Grounded on the teacher's `macos_epoll` module.

use std::io;
use std::ptr;

use libc::{c_int, kevent, timespec, EVFILT_READ, EVFILT_WRITE, EV_ADD, EV_CLEAR, EV_DELETE, EV_ENABLE, EV_EOF};

use crate::error::EngineResult;
use crate::reactor::{Event, Interest, Reactor};

pub struct Kqueue {
    fd: c_int,
}

impl Kqueue {
    pub fn new() -> EngineResult<Self> {
        unsafe {
            let fd = libc::kqueue();
            if fd < 0 {
                return Err(io::Error::last_os_error().into());
            }
            Ok(Self { fd })
        }
    }

    fn apply(&self, fd: c_int, token: u64, interest: Interest, action: u16) -> EngineResult<()> {
        let mut changes = [unsafe { std::mem::zeroed::<kevent>() }; 2];
        let mut n = 0;

        if interest.contains(Interest::READ) || action == EV_DELETE {
            changes[n] = kevent {
                ident: fd as usize,
                filter: EVFILT_READ,
                flags: action,
                fflags: 0,
                data: 0,
                udata: token as *mut libc::c_void,
            };
            n += 1;
        }
        if interest.contains(Interest::WRITE) || action == EV_DELETE {
            changes[n] = kevent {
                ident: fd as usize,
                filter: EVFILT_WRITE,
                flags: action,
                fflags: 0,
                data: 0,
                udata: token as *mut libc::c_void,
            };
            n += 1;
        }

        unsafe {
            let res = libc::kevent(self.fd, changes.as_ptr(), n as c_int, ptr::null_mut(), 0, ptr::null());
            if res < 0 && action != EV_DELETE {
                return Err(io::Error::last_os_error().into());
            }
        }
        Ok(())
    }
}

impl Reactor for Kqueue {
    fn add_fd(&self, fd: c_int, interest: Interest, token: u64) -> EngineResult<()> {
        self.apply(fd, token, interest, EV_ADD | EV_ENABLE | EV_CLEAR)
    }

    fn modify_fd(&self, fd: c_int, interest: Interest, token: u64) -> EngineResult<()> {
        self.apply(fd, token, interest, EV_ADD | EV_ENABLE | EV_CLEAR)
    }

    fn remove_fd(&self, fd: c_int) -> EngineResult<()> {
        self.apply(fd, 0, Interest::READ | Interest::WRITE, EV_DELETE)
    }

    fn poll(&self, events: &mut Vec<Event>, timeout_ms: i32) -> EngineResult<usize> {
        const MAX_BATCH: usize = 1024;
        let mut raw = [unsafe { std::mem::zeroed::<kevent>() }; MAX_BATCH];

        let ts = if timeout_ms >= 0 {
            Some(timespec {
                tv_sec: (timeout_ms / 1000) as libc::time_t,
                tv_nsec: ((timeout_ms % 1000) * 1_000_000) as libc::c_long,
            })
        } else {
            None
        };
        let ts_ptr = ts.as_ref().map_or(ptr::null(), |t| t as *const timespec);

        let n = unsafe {
            let res = libc::kevent(self.fd, ptr::null(), 0, raw.as_mut_ptr(), MAX_BATCH as c_int, ts_ptr);
            if res < 0 {
                let err = io::Error::last_os_error();
                if err.raw_os_error() == Some(libc::EINTR) {
                    return Ok(0);
                }
                return Err(err.into());
            }
            res as usize
        };

        events.clear();
        for kev in raw.iter().take(n) {
            let mut readiness = Interest::NONE;
            if kev.filter == EVFILT_READ {
                readiness = readiness | Interest::READ;
            }
            if kev.filter == EVFILT_WRITE {
                readiness = readiness | Interest::WRITE;
            }
            if kev.flags & EV_EOF != 0 {
                readiness = readiness | Interest::HUP;
            }
            events.push(Event {
                token: kev.udata as u64,
                readiness,
            });
        }
        Ok(n)
    }
}

impl Drop for Kqueue {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}
