// src/lib.rs
pub mod buffers;
pub mod config;
pub mod conn;
pub mod error;
pub mod h2;
pub mod hpack;
pub mod http1;
pub mod listener;
pub mod metrics;
pub mod net;
pub mod reactor;
pub mod router;
pub mod server;
pub mod slab;
pub mod tls;
pub mod worker;

#[global_allocator]
#[cfg(feature = "mimalloc")]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

// Re-exports for users
pub use error::{EngineError, EngineResult};
pub use http1::{Context, Method, Request, Response};
pub use router::Router;
pub use server::Server;
