pub mod tcp;
pub mod udp;

pub use tcp::TcpSocket;
pub use udp::UdpSocket;
