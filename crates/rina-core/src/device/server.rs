//! TCP control device.
//!
//! Each accepted connection is one control session. Request frames read
//! from the socket are submitted to the session; a blocking pump drains the
//! session's response queue and a writer task sends each response back as a
//! frame.
//!
//! # Shutdown
//!
//! When a connection ends, for any reason, the session's cancellation token
//! is cancelled. Responses already queued are still written, so a client
//! that half-closes after its last request reads every response before EOF.
//!
//! A request the session rejects is answered with an error frame carrying
//! its errno; the connection stays open.

use super::frame::{error_frame, read_frame, write_frame};
use crate::cancel::CancellationToken;
use crate::config::ControlConfig;
use crate::control::ControlSession;
use crate::error::{Result, RinaError};
use crate::registry::Registry;
use crate::wire::peek_header;
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Handle to a running control device. Dropping shuts it down.
pub struct ControlServerHandle {
    pub addr: SocketAddr,
    pub port: u16,
    shutdown_tx: Option<oneshot::Sender<()>>,
    conn_shutdown_tx: watch::Sender<bool>,
    task_handle: Option<JoinHandle<()>>,
}

impl ControlServerHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting connections and close the open ones.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        let _ = self.conn_shutdown_tx.send(true);
    }
}

impl Drop for ControlServerHandle {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(handle) = self.task_handle.take() {
            handle.abort();
        }
    }
}

/// Control device listening for control agents.
pub struct ControlServer;

impl ControlServer {
    /// Bind `addr` (port 0 picks a free port) and start serving `registry`.
    pub async fn start(registry: Arc<Registry>, addr: SocketAddr) -> Result<ControlServerHandle> {
        let listener = TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;

        info!("Control device listening on {}", addr);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let (conn_shutdown_tx, conn_shutdown_rx) = watch::channel(false);

        let task_handle = tokio::spawn(Self::accept_loop(
            listener,
            registry,
            shutdown_rx,
            conn_shutdown_rx,
            Arc::new(AtomicUsize::new(0)),
        ));

        Ok(ControlServerHandle {
            addr,
            port: addr.port(),
            shutdown_tx: Some(shutdown_tx),
            conn_shutdown_tx,
            task_handle: Some(task_handle),
        })
    }

    async fn accept_loop(
        listener: TcpListener,
        registry: Arc<Registry>,
        mut shutdown_rx: oneshot::Receiver<()>,
        conn_shutdown_rx: watch::Receiver<bool>,
        active_connections: Arc<AtomicUsize>,
    ) {
        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    info!("Control device shutting down");
                    break;
                }
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, peer_addr)) => {
                            let current = active_connections.load(Ordering::Relaxed);
                            if current >= ControlConfig::MAX_CONNECTIONS {
                                warn!(
                                    "Rejecting control connection from {}: at max capacity ({})",
                                    peer_addr,
                                    ControlConfig::MAX_CONNECTIONS
                                );
                                continue;
                            }

                            active_connections.fetch_add(1, Ordering::Relaxed);
                            let registry = Arc::clone(&registry);
                            let conns = Arc::clone(&active_connections);
                            let conn_shutdown = conn_shutdown_rx.clone();

                            tokio::spawn(async move {
                                debug!("Control connection from {}", peer_addr);
                                if let Err(e) = Self::handle_connection(stream, registry, conn_shutdown).await {
                                    debug!("Control connection {} ended: {}", peer_addr, e);
                                }
                                conns.fetch_sub(1, Ordering::Relaxed);
                            });
                        }
                        Err(e) => {
                            error!("Control device accept error: {}", e);
                        }
                    }
                }
            }
        }
    }

    async fn handle_connection(
        stream: TcpStream,
        registry: Arc<Registry>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> Result<()> {
        let session = Arc::new(ControlSession::new(registry));
        let cancel = CancellationToken::new();
        let (reader, writer) = stream.into_split();
        let (tx, rx) = mpsc::channel::<Bytes>(ControlConfig::OUTBOUND_BACKLOG);

        let pump = tokio::task::spawn_blocking({
            let session = Arc::clone(&session);
            let cancel = cancel.clone();
            let tx = tx.clone();
            move || pump_responses(&session, &cancel, tx)
        });
        let mut writer_task = tokio::spawn(write_responses(writer, rx));

        let ending =
            Self::read_requests(reader, &session, &tx, &mut writer_task, &mut shutdown_rx).await;
        drop(tx);

        // The pump keeps handing out queued responses after cancellation and
        // stops once the queue is empty; the writer then sees the channel
        // close and finishes.
        cancel.cancel();
        let result = match ending {
            Ok(Ending::WriterFinished(written)) => written,
            Ok(Ending::Closed) => Self::drain(&mut writer_task).await,
            Err(e) => {
                if let Err(drain_err) = Self::drain(&mut writer_task).await {
                    debug!("Dropped responses after read failure: {}", drain_err);
                }
                Err(e)
            }
        };
        if let Err(e) = pump.await {
            warn!("Control session pump failed: {}", e);
        }

        result
    }

    /// Wait for the writer to flush everything still queued.
    async fn drain(writer_task: &mut JoinHandle<Result<()>>) -> Result<()> {
        match tokio::time::timeout(ControlConfig::DRAIN_TIMEOUT, &mut *writer_task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(RinaError::Other(format!("response writer failed: {}", e))),
            Err(_) => {
                writer_task.abort();
                Err(RinaError::Other(
                    "timed out flushing queued responses".to_string(),
                ))
            }
        }
    }

    async fn read_requests(
        mut reader: tokio::net::tcp::OwnedReadHalf,
        session: &ControlSession,
        responses: &mpsc::Sender<Bytes>,
        writer_task: &mut JoinHandle<Result<()>>,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> Result<Ending> {
        loop {
            let frame = tokio::select! {
                result = read_frame(&mut reader) => {
                    match result? {
                        Some(f) => f,
                        None => return Ok(Ending::Closed),
                    }
                }
                written = &mut *writer_task => {
                    return Ok(Ending::WriterFinished(match written {
                        Ok(result) => result,
                        Err(e) => Err(RinaError::Other(format!("response writer failed: {}", e))),
                    }));
                }
                _ = shutdown_rx.changed() => {
                    return Ok(Ending::Closed);
                }
            };

            if let Err(e) = session.submit(&frame) {
                let event_id = peek_header(&frame).map_or(0, |(_, event_id)| event_id);
                debug!(event_id, errno = e.errno(), "Control request rejected: {}", e);
                if responses.send(error_frame(event_id, e.errno())).await.is_err() {
                    return Ok(Ending::Closed);
                }
            }
        }
    }
}

/// Why a connection's request loop stopped.
enum Ending {
    /// Peer closed its side, the server is shutting down, or the writer
    /// went away.
    Closed,
    /// The writer task completed on its own with this result.
    WriterFinished(Result<()>),
}

/// Move responses from the session queue to the writer until cancelled.
fn pump_responses(session: &ControlSession, cancel: &CancellationToken, tx: mpsc::Sender<Bytes>) {
    let mut capacity = ControlConfig::DEFAULT_READ_CAPACITY;
    loop {
        match session.receive(capacity, cancel) {
            Ok(response) => {
                if tx.blocking_send(response).is_err() {
                    break;
                }
            }
            Err(RinaError::InsufficientBuffer { needed, .. }) => capacity = needed,
            Err(RinaError::Cancelled) => break,
            Err(e) => {
                warn!("Control session read failed: {}", e);
                break;
            }
        }
    }
}

async fn write_responses(mut writer: OwnedWriteHalf, mut rx: mpsc::Receiver<Bytes>) -> Result<()> {
    while let Some(response) = rx.recv().await {
        write_frame(&mut writer, &response).await?;
    }
    Ok(())
}
