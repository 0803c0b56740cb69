//! Top-level server orchestration (spec §4.9): resolves `ServerConfig`
//! into one or two `TcpListenerConfig`s (cleartext HTTP/1 and/or TLS),
//! builds per-worker listeners via `listener::build_worker_listeners`,
//! and spawns one pinned worker thread per `ServerConfig::resolved_workers()`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use tracing::{info, warn};

use crate::config::{ServerConfig, TcpListenerConfig, TlsConfig, UdpListenerConfig};
use crate::error::{EngineError, EngineResult};
use crate::listener::{self, UdpWorkerListener, WorkerListener};
use crate::metrics::WorkerMetrics;
use crate::router::Router;
use crate::tls::TlsContext;
use crate::worker::{ListenerEntry, Worker};

pub struct Server {
    config: ServerConfig,
}

impl Server {
    pub fn bind(host_port: &str) -> Self {
        let Parts { host, port } = parse_host_port(host_port).expect("invalid bind address");
        let mut config = ServerConfig::new(host);
        config.http1_port = port;
        Self { config }
    }

    pub fn from_config(config: ServerConfig) -> Self {
        Self { config }
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.config = self.config.workers(workers);
        self
    }

    pub fn tls(mut self, tls: TlsConfig, port: u16) -> Self {
        self.config.enable_tls = true;
        self.config.cert_source = Some(tls.cert);
        self.config.key_source = Some(tls.key);
        self.config.alpn_protocols = tls.alpn_protocols;
        self.config.tls_port = port;
        self
    }

    pub fn serve(self, router: Router) -> EngineResult<()> {
        let num_workers = self.config.resolved_workers();
        let core_ids = core_affinity::get_core_ids().unwrap_or_default();
        let shutdown_flag = Arc::new(AtomicBool::new(false));
        let router = Arc::new(router);

        let shutdown_signal = shutdown_flag.clone();
        ctrlc::set_handler(move || {
            info!("received shutdown signal, draining active connections");
            shutdown_signal.store(true, Ordering::Release);
        })
        .expect("error setting Ctrl-C handler");

        let worker_metrics: Vec<Arc<WorkerMetrics>> =
            (0..num_workers).map(|_| Arc::new(WorkerMetrics::new())).collect();

        spawn_metrics_reporter(worker_metrics.clone(), shutdown_flag.clone());

        let mut plain_listeners = None;
        let mut plain_acceptor = None;
        if self.config.enable_http1_cleartext {
            let tcp_config = TcpListenerConfig::new(self.config.host.clone(), self.config.http1_port)
                .workers(num_workers)
                .use_reuseport(self.config.use_reuseport);
            let (listeners, acceptor) = listener::build_worker_listeners(&tcp_config, num_workers, shutdown_flag.clone())?;
            plain_listeners = Some(listeners);
            plain_acceptor = acceptor;
        }

        let mut tls_listeners = None;
        let mut tls_acceptor = None;
        let mut tls_context = None;
        if self.config.enable_tls {
            let cert = self
                .config
                .cert_source
                .clone()
                .ok_or_else(|| EngineError::Config("TLS enabled without a certificate source".into()))?;
            let key = self
                .config
                .key_source
                .clone()
                .ok_or_else(|| EngineError::Config("TLS enabled without a key source".into()))?;
            let tls_config = TlsConfig::new(cert, key).alpn_protocols(self.config.alpn_protocols.clone());
            let ctx = Arc::new(TlsContext::server(&tls_config)?);

            let tcp_config = TcpListenerConfig::new(self.config.host.clone(), self.config.tls_port)
                .workers(num_workers)
                .use_reuseport(self.config.use_reuseport);
            let (listeners, acceptor) = listener::build_worker_listeners(&tcp_config, num_workers, shutdown_flag.clone())?;
            tls_listeners = Some(listeners);
            tls_acceptor = acceptor;
            tls_context = Some(ctx);
        }

        let mut udp_listeners = None;
        if self.config.enable_http3 {
            let mut udp_config = UdpListenerConfig::new(self.config.host.clone(), self.config.http3_port);
            udp_config.num_workers = num_workers;
            udp_config.use_reuseport = self.config.use_reuseport;
            udp_listeners = Some(listener::build_udp_listeners(&udp_config, num_workers)?);
        }

        info!(
            workers = num_workers,
            cleartext = self.config.enable_http1_cleartext,
            tls = self.config.enable_tls,
            http3_listener = self.config.enable_http3,
            "starting server"
        );

        let mut plain_listeners: Vec<Option<WorkerListener>> = match plain_listeners {
            Some(v) => v.into_iter().map(Some).collect(),
            None => (0..num_workers).map(|_| None).collect(),
        };
        let mut tls_listeners: Vec<Option<WorkerListener>> = match tls_listeners {
            Some(v) => v.into_iter().map(Some).collect(),
            None => (0..num_workers).map(|_| None).collect(),
        };
        let mut udp_listeners: Vec<Option<UdpWorkerListener>> = match udp_listeners {
            Some(v) => v.into_iter().map(Some).collect(),
            None => (0..num_workers).map(|_| None).collect(),
        };

        let mut handles = Vec::with_capacity(num_workers);
        for i in 0..num_workers {
            let core_id = core_ids.get(i % core_ids.len().max(1)).copied();
            let router = router.clone();
            let metrics = worker_metrics[i].clone();
            let shutdown = shutdown_flag.clone();

            let mut entries = Vec::with_capacity(2);
            if let Some(plain) = plain_listeners[i].take() {
                entries.push(ListenerEntry { listener: plain, tls: None });
            }
            if let Some(tls_listener) = tls_listeners[i].take() {
                entries.push(ListenerEntry { listener: tls_listener, tls: tls_context.clone() });
            }
            let udp = udp_listeners[i].take();

            let handle = thread::Builder::new()
                .name(format!("engine-worker-{i}"))
                .spawn(move || {
                    if let Some(id) = core_id {
                        core_affinity::set_for_current(id);
                    }
                    let mut worker = Worker::new(i, router, metrics, entries, udp);
                    if let Err(e) = worker.run(shutdown) {
                        warn!(worker = i, error = %e, "worker exited with error");
                    }
                })
                .map_err(EngineError::Io)?;

            handles.push(handle);
        }

        for handle in handles {
            let _ = handle.join();
        }
        if let Some(h) = plain_acceptor {
            let _ = h.join();
        }
        if let Some(h) = tls_acceptor {
            let _ = h.join();
        }

        Ok(())
    }
}

fn spawn_metrics_reporter(worker_metrics: Vec<Arc<WorkerMetrics>>, shutdown: Arc<AtomicBool>) {
    thread::Builder::new()
        .name("engine-metrics".to_string())
        .spawn(move || {
            while !shutdown.load(Ordering::Acquire) {
                thread::sleep(std::time::Duration::from_secs(5));
                if shutdown.load(Ordering::Acquire) {
                    break;
                }
                let mut total_reqs = 0;
                let mut total_active = 0;
                for m in &worker_metrics {
                    total_reqs += m.req_count.load(Ordering::Relaxed);
                    total_active += m.active_conns.load(Ordering::Relaxed);
                }
                info!(active_connections = total_active, total_requests = total_reqs, "metrics tick");
            }
        })
        .ok();
}

struct Parts {
    host: String,
    port: u16,
}

fn parse_host_port(hp: &str) -> EngineResult<Parts> {
    let parts: Vec<&str> = hp.split(':').collect();
    let host = parts.first().unwrap_or(&"0.0.0.0").to_string();
    let port = parts
        .get(1)
        .ok_or_else(|| EngineError::Config("missing port in address".to_string()))?
        .parse::<u16>()
        .map_err(|_| EngineError::Config("invalid port number".to_string()))?;

    Ok(Parts { host, port })
}
