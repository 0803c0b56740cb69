//! Overflow buffer pool (spec §4.10). The per-connection inline
//! `read_buf`/`write_buf` in [`crate::conn::Conn`] cover the common case;
//! HTTP/2 DATA frames and HPACK-decoded header lists that exceed the
//! inline size borrow a pooled chunk instead of allocating fresh on every
//! request. Buffers are returned to the pool on drop, bounded by
//! `max_chunks` so a burst of large bodies can't grow the pool unbounded.

use std::sync::{Arc, Mutex};

pub struct BufferPool {
    inner: Arc<Inner>,
}

struct Inner {
    chunk_size: usize,
    max_chunks: usize,
    free: Mutex<Vec<Vec<u8>>>,
}

impl BufferPool {
    pub fn new(chunk_size: usize, max_chunks: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                chunk_size,
                max_chunks,
                free: Mutex::new(Vec::with_capacity(max_chunks)),
            }),
        }
    }

    /// Checks out a zeroed buffer of `chunk_size` bytes, reusing a freed
    /// one when available.
    pub fn acquire(&self) -> PooledBuffer {
        let buf = {
            let mut free = self.inner.free.lock().unwrap();
            free.pop()
        }
        .unwrap_or_else(|| vec![0u8; self.inner.chunk_size]);

        PooledBuffer {
            buf: Some(buf),
            pool: self.inner.clone(),
        }
    }
}

impl Clone for BufferPool {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// An owned chunk that returns itself to its pool on drop, unless the
/// pool is already at `max_chunks` in which case it's simply freed.
pub struct PooledBuffer {
    buf: Option<Vec<u8>>,
    pool: Arc<Inner>,
}

impl std::ops::Deref for PooledBuffer {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        self.buf.as_deref().unwrap()
    }
}

impl std::ops::DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.buf.as_deref_mut().unwrap()
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(mut buf) = self.buf.take() {
            let mut free = self.pool.free.lock().unwrap();
            if free.len() < self.pool.max_chunks {
                buf.iter_mut().for_each(|b| *b = 0);
                free.push(buf);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reuses_freed_buffer() {
        let pool = BufferPool::new(1024, 4);
        let ptr = {
            let buf = pool.acquire();
            buf.as_ptr()
        };
        let buf2 = pool.acquire();
        assert_eq!(buf2.as_ptr(), ptr);
    }

    #[test]
    fn caps_pool_size() {
        let pool = BufferPool::new(64, 1);
        let a = pool.acquire();
        let b = pool.acquire();
        drop(a);
        drop(b);
        assert_eq!(pool.inner.free.lock().unwrap().len(), 1);
    }
}
