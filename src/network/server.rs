//! Relay server
//!
//! Accepts client connections, runs one frame reader task per connection
//! and a single event processor task that all readers feed.

use std::net::SocketAddr;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::connection::ConnectionHandle;
use super::reader::FrameReader;
use super::NetworkConfig;
use crate::dispatch::{self, DispatchSender, EventProcessor};
use crate::pool::{Router, Tracker, Verifier};

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Server already running")]
    AlreadyRunning,

    #[error("Server not running")]
    NotRunning,

    #[error("Bind failed: {0}")]
    BindFailed(String),
}

pub type ServerResult<T> = Result<T, ServerError>;

/// Relay server
pub struct Server<T, V> {
    /// Server configuration
    config: NetworkConfig,
    /// Consumer loop, handed to its task on start
    processor: Option<EventProcessor<T, V>>,
    /// Shutdown signal for the accept loop
    shutdown_tx: Option<mpsc::Sender<()>>,
    /// Accept loop task
    accept_task: Option<JoinHandle<()>>,
    /// Event processor task
    processor_task: Option<JoinHandle<EventProcessor<T, V>>>,
    /// Bound address once started
    local_addr: Option<SocketAddr>,
}

impl<T, V> Server<T, V>
where
    T: Tracker + Router + 'static,
    V: Verifier + 'static,
{
    /// Create a new server
    pub fn new(config: NetworkConfig, tracker: T, verifier: V) -> Self {
        let processor = EventProcessor::new(tracker, verifier, config.writer());

        Self {
            config,
            processor: Some(processor),
            shutdown_tx: None,
            accept_task: None,
            processor_task: None,
            local_addr: None,
        }
    }

    /// Bind the listener and start accepting clients
    pub async fn start(&mut self) -> ServerResult<SocketAddr> {
        let Some(processor) = self.processor.take() else {
            return Err(ServerError::AlreadyRunning);
        };

        let bind_addr = format!("{}:{}", self.config.bind_address, self.config.port);
        let listener = match TcpListener::bind(&bind_addr).await {
            Ok(listener) => listener,
            Err(e) => {
                self.processor = Some(processor);
                return Err(ServerError::BindFailed(format!(
                    "Failed to bind to {}: {}",
                    bind_addr, e
                )));
            }
        };

        let local_addr = listener.local_addr()?;
        tracing::info!("Server listening on {}", local_addr);

        let (dispatch_tx, dispatch_rx) = dispatch::channel(self.config.dispatch_capacity);
        self.processor_task = Some(tokio::spawn(processor.run(dispatch_rx)));

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        self.shutdown_tx = Some(shutdown_tx);

        let config = self.config.clone();

        // Spawn the accept loop
        self.accept_task = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, addr)) => {
                                tracing::info!("New connection from {}", addr);
                                handle_client(stream, addr, dispatch_tx.clone(), &config);
                            }
                            Err(e) => {
                                tracing::error!("Accept error: {}", e);
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        tracing::info!("Server shutdown requested");
                        break;
                    }
                }
            }
        }));

        self.local_addr = Some(local_addr);
        Ok(local_addr)
    }

    /// Stop accepting clients.
    ///
    /// Connections already open keep being served until they end; the
    /// event processor stops after the last one.
    pub async fn stop(&mut self) -> ServerResult<()> {
        let Some(tx) = self.shutdown_tx.take() else {
            return Err(ServerError::NotRunning);
        };

        let _ = tx.send(()).await;
        if let Some(task) = self.accept_task.take() {
            let _ = task.await;
        }

        self.local_addr = None;
        Ok(())
    }

    /// Address the server is listening on
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Check if the server is running
    pub fn is_running(&self) -> bool {
        self.shutdown_tx.is_some()
    }

    /// Wait for the event processor to finish and get it back
    pub async fn join(&mut self) -> Option<EventProcessor<T, V>> {
        let task = self.processor_task.take()?;
        task.await.ok()
    }
}

/// Set up a client connection and spawn its reader task
fn handle_client(
    stream: TcpStream,
    addr: SocketAddr,
    dispatch: DispatchSender,
    config: &NetworkConfig,
) {
    if let Err(e) = stream.set_nodelay(true) {
        tracing::warn!("Failed to set TCP_NODELAY for {}: {}", addr, e);
    }

    let (read, write) = stream.into_split();
    let conn = ConnectionHandle::new(Box::new(write), Some(addr));

    let reader = FrameReader::new(read, conn, dispatch)
        .with_max_message_size(config.max_message_size)
        .with_debug(config.debug);

    tokio::spawn(async move {
        let outcome = reader.run().await;
        tracing::info!("Client {} disconnected: {:?}", addr, outcome);
    });
}
