//! The server: listener, acceptor loop, worker pool and graceful stop.

use crate::base::{Error, Result};
use crate::server::conn::{serve_connection, ConnOptions, Job};
use crate::server::pool::ConnectionPool;
use crate::server::router::{Router, View};
use crate::socket::{tls, Socket};
use boring::ssl::SslAcceptor;
use http::Method;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;

const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_BUFFER_SIZE: usize = 1024;
const TLS_ACCEPT_TIMEOUT: Duration = Duration::from_secs(10);
const JOB_QUEUE_DEPTH: usize = 64;

/// Grace period for outstanding writes between "stop accepting" and
/// closing the remaining connections.
const STOP_GRACE: Duration = Duration::from_millis(500);

/// An HTTP/1.1 server over TCP or TLS.
///
/// Register views with [`route`](Self::route), then drive it with
/// [`run`](Self::run); [`stop`](Self::stop) shuts it down gracefully from
/// another task.
pub struct Server {
    addr: String,
    router: Router,
    acceptor: Option<SslAcceptor>,

    read_timeout: Duration,
    write_timeout: Duration,
    buffer_size: usize,

    listener: Mutex<Option<TcpListener>>,
    local_addr: Mutex<Option<SocketAddr>>,
    pool: Arc<ConnectionPool>,
    shutdown: watch::Sender<bool>,
}

impl Server {
    /// A plain-TCP server on `addr` (e.g. `"127.0.0.1:8080"`).
    pub fn new(addr: &str) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            addr: addr.to_owned(),
            router: Router::new(),
            acceptor: None,
            read_timeout: DEFAULT_READ_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            buffer_size: DEFAULT_BUFFER_SIZE,
            listener: Mutex::new(None),
            local_addr: Mutex::new(None),
            pool: Arc::new(ConnectionPool::new()),
            shutdown,
        }
    }

    /// A TLS server using PEM certificate chain and key files.
    pub fn with_tls(addr: &str, cert_file: &Path, key_file: &Path) -> Result<Self> {
        let acceptor = tls::acceptor_from_pem(cert_file, key_file)?;
        let mut server = Self::new(addr);
        server.acceptor = Some(acceptor);
        Ok(server)
    }

    pub fn set_read_timeout(&mut self, seconds: u64) {
        if seconds > 0 {
            self.read_timeout = Duration::from_secs(seconds);
        }
    }

    pub fn set_write_timeout(&mut self, seconds: u64) {
        if seconds > 0 {
            self.write_timeout = Duration::from_secs(seconds);
        }
    }

    pub fn set_buffer_size(&mut self, size: usize) {
        if size > 0 {
            self.buffer_size = size;
        }
    }

    /// Register a view for GET requests on `pattern`.
    pub fn route(&mut self, pattern: &str, view: impl View) -> &mut Self {
        self.router.route(pattern, view, &[Method::GET]);
        self
    }

    /// Register a view for the given methods on `pattern`.
    pub fn route_methods(
        &mut self,
        pattern: &str,
        view: impl View,
        methods: &[Method],
    ) -> &mut Self {
        self.router.route(pattern, view, methods);
        self
    }

    /// Bind the listener ahead of [`run`](Self::run), e.g. to learn an
    /// ephemeral port.
    pub async fn bind(&self) -> Result<SocketAddr> {
        let listener = TcpListener::bind(&self.addr).await.map_err(|e| {
            tracing::error!(addr = %self.addr, error = %e, "bind failed");
            Error::Connect
        })?;
        let addr = listener.local_addr().map_err(|_| Error::Internal)?;
        if let Ok(mut slot) = self.listener.lock() {
            *slot = Some(listener);
        }
        if let Ok(mut slot) = self.local_addr.lock() {
            *slot = Some(addr);
        }
        Ok(addr)
    }

    /// The bound address, once [`bind`](Self::bind) or [`run`](Self::run)
    /// has bound the listener.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.lock().ok().and_then(|slot| *slot)
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.pool.size()
    }

    /// Accept and serve until [`stop`](Self::stop) is called. Handler code
    /// runs on `workers` worker tasks fed from a shared queue.
    pub async fn run(&self, workers: usize) -> Result<()> {
        let listener = match self.listener.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        };
        let listener = match listener {
            Some(listener) => listener,
            None => {
                self.bind().await?;
                match self.listener.lock() {
                    Ok(mut slot) => slot.take().ok_or(Error::Internal)?,
                    Err(_) => return Err(Error::Internal),
                }
            }
        };

        let (job_tx, job_rx) = mpsc::channel::<Job>(JOB_QUEUE_DEPTH);
        let job_rx = Arc::new(tokio::sync::Mutex::new(job_rx));
        let router = Arc::new(self.router.clone());

        let mut worker_handles = Vec::new();
        for id in 0..workers.max(1) {
            let rx = Arc::clone(&job_rx);
            let router = Arc::clone(&router);
            worker_handles.push(tokio::spawn(worker_loop(id, rx, router)));
        }

        let opts = ConnOptions {
            read_timeout: self.read_timeout,
            write_timeout: self.write_timeout,
            buffer_size: self.buffer_size,
        };

        let mut shutdown_rx = self.shutdown.subscribe();
        tracing::debug!(addr = %self.addr, workers, "server running");

        loop {
            if *shutdown_rx.borrow() {
                break;
            }
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            tracing::debug!(%peer, "connection accepted");
                            self.spawn_connection(stream, job_tx.clone(), opts.clone());
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "accept failed");
                        }
                    }
                }
                _ = shutdown_rx.changed() => break,
            }
        }

        // Graceful stop: no new connections, a bounded drain for in-flight
        // writes, then close whatever is left.
        drop(listener);
        drop(job_tx);
        tokio::time::sleep(STOP_GRACE).await;
        self.pool.clear().await;
        for handle in worker_handles {
            handle.abort();
        }
        tracing::debug!("server stopped");
        Ok(())
    }

    /// Ask a running server to stop.
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }

    fn spawn_connection(&self, stream: TcpStream, jobs: mpsc::Sender<Job>, opts: ConnOptions) {
        let acceptor = self.acceptor.clone();
        let pool = Arc::clone(&self.pool);

        let task = tokio::spawn(async move {
            let socket = match acceptor {
                Some(acceptor) => {
                    match timeout(TLS_ACCEPT_TIMEOUT, tokio_boring::accept(&acceptor, stream))
                        .await
                    {
                        Ok(Ok(ssl)) => Socket::Ssl(ssl),
                        Ok(Err(e)) => {
                            tracing::debug!(error = ?e, "TLS accept failed");
                            return;
                        }
                        Err(_) => {
                            tracing::debug!("TLS accept timed out");
                            return;
                        }
                    }
                }
                None => Socket::Tcp(stream),
            };
            serve_connection(socket, jobs, opts).await;
        });

        let id = pool.add(task.abort_handle());
        let pool = Arc::clone(&self.pool);
        tokio::spawn(async move {
            let _ = task.await;
            pool.remove(id);
        });
    }
}

/// Drain the shared job queue: dispatch through the router, reply to the
/// connection task. Exits when the queue closes at shutdown.
async fn worker_loop(
    id: usize,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Job>>>,
    router: Arc<Router>,
) {
    loop {
        let job = {
            let mut rx = rx.lock().await;
            rx.recv().await
        };
        let Some(job) = job else {
            tracing::debug!(worker = id, "worker exiting");
            return;
        };
        let response = router.dispatch(&job.request);
        let _ = job.reply.send(response);
    }
}
