//! WebSocket alert server.
//!
//! Architecture:
//! ```text
//! Vehicle A ──┐  ws://host/ws/alerts?lat=..&lon=..
//!             ├── connection task ── ConnectionRegistry (handle, location, mpsc)
//! Vehicle B ──┘         │
//!                       │ {"type":"report",..}
//!                       ▼
//!               AlertDispatcher ── AccidentStore ── RocksStore | MemoryStore
//!                       │
//!          ┌────────────┼────────────┐
//!          ▼            ▼            ▼
//!      Vehicle A    Vehicle C    (out of range: skipped)
//! ```
//!
//! Each connection runs in its own task, selecting over inbound frames and
//! its alert channel. The registry entry is removed exactly when that task
//! ends, whether the peer closed cleanly or the transport failed.

use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::dispatcher::{AlertDispatcher, DispatchConfig, DispatchStats};
use crate::error::ServerError;
use crate::geo::{Coordinate, DEFAULT_RADIUS_KM};
use crate::protocol::{self, ClientMessage, ServerMessage};
use crate::registry::{ConnectionRegistry, RegistryStats};
use crate::storage::{AccidentLog, MemoryStore, RecordStore, RocksStore, StoreConfig};
use crate::store::AccidentStore;

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;
type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Alert radius around each accident, km
    pub alert_radius_km: f64,
    /// Alerts buffered per connection before sends start waiting
    pub channel_capacity: usize,
    /// How long a send may wait on a full connection queue
    pub delivery_timeout_ms: u64,
    /// Persistence storage path (None = in-memory only)
    pub storage_path: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8000".to_string(),
            alert_radius_km: DEFAULT_RADIUS_KM,
            channel_capacity: 64,
            delivery_timeout_ms: 500,
            storage_path: None,
        }
    }
}

impl ServerConfig {
    /// Ephemeral port, in-memory storage, short delivery timeout.
    pub fn for_testing() -> Self {
        Self {
            bind_addr: "127.0.0.1:0".to_string(),
            channel_capacity: 16,
            delivery_timeout_ms: 100,
            ..Self::default()
        }
    }

    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            radius_km: self.alert_radius_km,
            delivery_timeout: Duration::from_millis(self.delivery_timeout_ms),
        }
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub connections: RegistryStats,
    pub dispatch: DispatchStats,
}

/// How a connection ended.
#[derive(Debug, Clone, PartialEq)]
enum Disconnect {
    /// Close frame or end of stream
    Closed,
    /// Transport error or failed write
    Fault(String),
}

/// The alert server.
pub struct AlertServer {
    config: ServerConfig,
    registry: Arc<ConnectionRegistry>,
    dispatcher: Arc<AlertDispatcher>,
    /// Users and priority requests, backed by the same storage as accidents
    records: Arc<dyn RecordStore>,
}

impl AlertServer {
    /// Create a server, opening RocksDB if `storage_path` is set.
    pub fn new(config: ServerConfig) -> Result<Self, ServerError> {
        let (log, records): (Arc<dyn AccidentLog>, Arc<dyn RecordStore>) =
            match &config.storage_path {
                Some(path) => {
                    let rocks = Arc::new(RocksStore::open(StoreConfig {
                        path: path.clone(),
                        ..StoreConfig::default()
                    })?);
                    (rocks.clone(), rocks)
                }
                None => {
                    let memory = Arc::new(MemoryStore::new());
                    (memory.clone(), memory)
                }
            };

        let store = Arc::new(AccidentStore::open(log)?);
        let registry = Arc::new(ConnectionRegistry::new());
        let dispatcher = Arc::new(AlertDispatcher::new(
            registry.clone(),
            store,
            config.dispatch_config(),
        ));

        Ok(Self {
            config,
            registry,
            dispatcher,
            records,
        })
    }

    /// Create with default configuration (in-memory, no persistence).
    pub fn with_defaults() -> Result<Self, ServerError> {
        Self::new(ServerConfig::default())
    }

    /// Create with persistence enabled at the given path.
    pub fn with_storage(
        bind_addr: impl Into<String>,
        path: impl Into<PathBuf>,
    ) -> Result<Self, ServerError> {
        Self::new(ServerConfig {
            bind_addr: bind_addr.into(),
            storage_path: Some(path.into()),
            ..ServerConfig::default()
        })
    }

    /// Bind and serve forever.
    pub async fn run(&self) -> Result<(), ServerError> {
        self.run_until(std::future::pending()).await
    }

    /// Bind and serve until `shutdown` resolves.
    pub async fn run_until(&self, shutdown: impl Future<Output = ()>) -> Result<(), ServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!(
            "Alert server listening on {} (radius {} km)",
            listener.local_addr()?,
            self.config.alert_radius_km
        );
        self.serve_until(listener, shutdown).await
    }

    /// Accept connections from an already-bound listener until `shutdown`.
    pub async fn serve_until(
        &self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()>,
    ) -> Result<(), ServerError> {
        tokio::pin!(shutdown);

        loop {
            let (stream, addr) = tokio::select! {
                accepted = listener.accept() => accepted?,
                _ = &mut shutdown => {
                    log::info!("Alert server shutting down");
                    return Ok(());
                }
            };
            log::debug!("New TCP connection from {addr}");

            let registry = self.registry.clone();
            let dispatcher = self.dispatcher.clone();
            let capacity = self.config.channel_capacity;

            tokio::spawn(async move {
                if let Err(e) =
                    Self::handle_connection(stream, addr, registry, dispatcher, capacity).await
                {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Handle a single WebSocket connection.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        registry: Arc<ConnectionRegistry>,
        dispatcher: Arc<AlertDispatcher>,
        capacity: usize,
    ) -> Result<(), BoxError> {
        let mut location = None;
        let ws_stream = tokio_tungstenite::accept_hdr_async(
            stream,
            |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                match connect_location(req) {
                    Ok(coord) => {
                        location = Some(coord);
                        Ok(resp)
                    }
                    Err(reason) => {
                        log::warn!("Rejected handshake from {addr}: {reason}");
                        Err(bad_request(reason))
                    }
                }
            },
        )
        .await?;
        let location = location.ok_or("handshake accepted without a location")?;

        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        let (handle, mut alert_rx) = registry.open(location, capacity).await;
        log::info!("{handle} connected from {addr} at {location}");

        // Frames are handled in order by a worker so this loop keeps
        // draining alert_rx while a report fans out, including to ourselves.
        let (frame_tx, frame_rx) = mpsc::channel::<String>(capacity.max(1));
        let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<ServerMessage>();
        tokio::spawn(Self::frame_worker(frame_rx, reply_tx, location, dispatcher));

        let disconnect = loop {
            tokio::select! {
                // Incoming WebSocket message
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            if let Err(e) = frame_tx.try_send(text.as_str().to_owned()) {
                                log::warn!("{handle} frame dropped: {e}");
                                let reply = ServerMessage::error("too many frames in flight");
                                if let Err(e) = send_frame(&mut ws_sender, &reply).await {
                                    break Disconnect::Fault(e.to_string());
                                }
                            }
                        }

                        Some(Ok(Message::Binary(_))) => {
                            let reply = ServerMessage::error("binary frames are not supported");
                            if let Err(e) = send_frame(&mut ws_sender, &reply).await {
                                break Disconnect::Fault(e.to_string());
                            }
                        }

                        Some(Ok(Message::Ping(data))) => {
                            if let Err(e) = ws_sender.send(Message::Pong(data)).await {
                                break Disconnect::Fault(e.to_string());
                            }
                        }

                        Some(Ok(Message::Close(_))) | None => break Disconnect::Closed,

                        Some(Err(e)) => break Disconnect::Fault(e.to_string()),

                        _ => {}
                    }
                }

                // Reply to one of our own frames
                Some(reply) = reply_rx.recv() => {
                    if let Err(e) = send_frame(&mut ws_sender, &reply).await {
                        break Disconnect::Fault(e.to_string());
                    }
                }

                // Outgoing alert
                alert = alert_rx.recv() => {
                    match alert {
                        Some(alert) => {
                            log::debug!("{handle} <- accident {}", alert.accident_id);
                            if let Err(e) = send_frame(&mut ws_sender, &ServerMessage::from(&alert)).await {
                                break Disconnect::Fault(e.to_string());
                            }
                        }
                        // The registry holds a sender until we remove ourselves
                        None => break Disconnect::Fault("alert channel closed".to_string()),
                    }
                }
            }
        };

        // Ends the worker once its current frame is done
        drop(frame_tx);
        registry.remove(handle).await;
        match disconnect {
            Disconnect::Closed => log::info!("{handle} disconnected ({addr})"),
            Disconnect::Fault(reason) => log::warn!("{handle} dropped ({addr}): {reason}"),
        }

        Ok(())
    }

    /// Handle one connection's frames in arrival order.
    async fn frame_worker(
        mut frame_rx: mpsc::Receiver<String>,
        reply_tx: mpsc::UnboundedSender<ServerMessage>,
        location: Coordinate,
        dispatcher: Arc<AlertDispatcher>,
    ) {
        while let Some(text) = frame_rx.recv().await {
            let reply = Self::handle_frame(&text, location, &dispatcher).await;
            if reply_tx.send(reply).is_err() {
                break;
            }
        }
    }

    /// Turn one inbound text frame into the reply for its sender.
    async fn handle_frame(
        text: &str,
        location: Coordinate,
        dispatcher: &AlertDispatcher,
    ) -> ServerMessage {
        match protocol::decode::<ClientMessage>(text) {
            Ok(ClientMessage::Report {
                latitude,
                longitude,
                description,
            }) => match dispatcher
                .report(Coordinate::new(latitude, longitude), description)
                .await
            {
                Ok(report) => ServerMessage::reported(report.id),
                Err(e) => ServerMessage::error(e.to_string()),
            },

            Ok(ClientMessage::Nearby { max_km }) => match dispatcher.list_near(location, max_km) {
                Ok(reports) => ServerMessage::nearby(&reports),
                Err(e) => ServerMessage::error(e.to_string()),
            },

            Err(e) => {
                log::warn!("Unreadable frame: {e}");
                ServerMessage::error(e.to_string())
            }
        }
    }

    /// Get server statistics.
    pub async fn stats(&self) -> ServerStats {
        ServerStats {
            connections: self.registry.stats().await,
            dispatch: self.dispatcher.stats(),
        }
    }

    /// Get the configured bind address.
    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Arc<AlertDispatcher> {
        &self.dispatcher
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// User and priority-request store.
    pub fn records(&self) -> &Arc<dyn RecordStore> {
        &self.records
    }
}

/// Validated location from the handshake URI, or a reason to reject it.
fn connect_location(req: &Request) -> Result<Coordinate, String> {
    let coord = protocol::parse_location_query(req.uri().query()).map_err(|e| e.to_string())?;
    coord.validate().map_err(|e| e.to_string())?;
    Ok(coord)
}

fn bad_request(reason: String) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(reason));
    *response.status_mut() = StatusCode::BAD_REQUEST;
    response
}

async fn send_frame(sink: &mut WsSink, msg: &ServerMessage) -> Result<(), BoxError> {
    let text = protocol::encode(msg)?;
    sink.send(Message::Text(text.into())).await?;
    Ok(())
}
