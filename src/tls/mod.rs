pub mod context;
pub mod socket;

pub use context::TlsContext;
pub use socket::{TlsSocket, TlsSocketState};
