pub mod connection;
pub mod parser;
pub mod types;

pub use connection::{drive_read, is_keep_alive, DriveOutcome};
pub use types::{Context, Method, Request, Response, Version, MAX_HEADERS, MAX_PARAMS, MAX_REQUEST_SIZE};
