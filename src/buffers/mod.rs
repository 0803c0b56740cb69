pub mod pool;
pub mod ring;
pub mod spsc;

pub use pool::{BufferPool, PooledBuffer};
pub use ring::RingBuffer;
pub use spsc::{fd_queue, FdReceiver, FdSender};
