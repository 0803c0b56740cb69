//! Enumerated configuration structs (spec §6). No file format is parsed —
//! these are plain builder-style Rust types, matching the teacher's
//! `Server::bind(..).workers(..)` convention.

#[derive(Debug, Clone)]
pub enum CertSource {
    File(String),
    Memory(Vec<u8>),
}

#[derive(Debug, Clone)]
pub enum KeySource {
    File(String),
    Memory(Vec<u8>),
}

#[derive(Debug, Clone)]
pub struct TlsConfig {
    pub cert: CertSource,
    pub key: KeySource,
    pub alpn_protocols: Vec<String>,
    pub allow_tls12: bool,
    pub allow_tls13: bool,
    pub cipher_list_12: Option<String>,
    pub cipher_suites_13: Option<String>,
    pub verify_client: bool,
    pub ca_file: Option<String>,
}

impl TlsConfig {
    pub fn new(cert: CertSource, key: KeySource) -> Self {
        Self {
            cert,
            key,
            alpn_protocols: vec!["h2".into(), "http/1.1".into()],
            allow_tls12: true,
            allow_tls13: true,
            cipher_list_12: None,
            cipher_suites_13: None,
            verify_client: false,
            ca_file: None,
        }
    }

    pub fn alpn_protocols(mut self, protos: Vec<String>) -> Self {
        self.alpn_protocols = protos;
        self
    }

    pub fn verify_client(mut self, yes: bool) -> Self {
        self.verify_client = yes;
        self
    }

    pub fn ca_file(mut self, path: impl Into<String>) -> Self {
        self.ca_file = Some(path.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct TcpListenerConfig {
    pub host: String,
    pub port: u16,
    pub backlog: i32,
    pub num_workers: usize,
    pub use_reuseport: bool,
}

impl TcpListenerConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            backlog: 1024,
            num_workers: 0,
            use_reuseport: true,
        }
    }

    pub fn backlog(mut self, backlog: i32) -> Self {
        self.backlog = backlog;
        self
    }

    pub fn workers(mut self, n: usize) -> Self {
        self.num_workers = n;
        self
    }

    pub fn use_reuseport(mut self, yes: bool) -> Self {
        self.use_reuseport = yes;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    V4,
    V6,
}

#[derive(Debug, Clone)]
pub struct UdpListenerConfig {
    pub host: String,
    pub port: u16,
    pub num_workers: usize,
    pub use_reuseport: bool,
    pub recv_buffer_size: usize,
    pub max_datagram_size: usize,
    pub address_family: AddressFamily,
    pub enable_pktinfo: bool,
    pub enable_tos: bool,
}

impl UdpListenerConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            num_workers: 0,
            use_reuseport: true,
            recv_buffer_size: 1 << 20,
            max_datagram_size: 65535,
            address_family: AddressFamily::V4,
            enable_pktinfo: false,
            enable_tos: false,
        }
    }
}

/// Default worker count per the resolved Open Question: hardware_concurrency - 2, min 1.
pub fn default_worker_count() -> usize {
    num_cpus::get().saturating_sub(2).max(1)
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub tls_port: u16,
    pub enable_tls: bool,
    pub cert_source: Option<CertSource>,
    pub key_source: Option<KeySource>,
    pub alpn_protocols: Vec<String>,
    pub enable_http1_cleartext: bool,
    pub http1_port: u16,
    pub enable_http3: bool,
    pub http3_port: u16,
    pub num_workers: usize,
    pub use_reuseport: bool,
}

impl ServerConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            tls_port: 443,
            enable_tls: false,
            cert_source: None,
            key_source: None,
            alpn_protocols: vec!["h2".into(), "http/1.1".into()],
            enable_http1_cleartext: true,
            http1_port: 8080,
            enable_http3: false,
            http3_port: 0,
            num_workers: 0,
            use_reuseport: true,
        }
    }

    pub fn workers(mut self, n: usize) -> Self {
        self.num_workers = n;
        self
    }

    pub fn resolved_workers(&self) -> usize {
        if self.num_workers == 0 {
            default_worker_count()
        } else {
            self.num_workers
        }
    }

    pub fn tls(mut self, cert: CertSource, key: KeySource, port: u16) -> Self {
        self.enable_tls = true;
        self.cert_source = Some(cert);
        self.key_source = Some(key);
        self.tls_port = port;
        self
    }
}
