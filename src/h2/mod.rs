pub mod connection;
pub mod flow_control;
pub mod frame;
pub mod settings;
pub mod stream;

pub use connection::{ConnectionState, Http2Connection};
pub use flow_control::FlowControl;
pub use frame::{ErrorCode, FrameHeader, FrameType, SettingsId, CONNECTION_PREFACE};
pub use settings::Settings;
pub use stream::{Stream, StreamEvent, StreamState};
