//! Telemetry listener and per-subscriber connection handling
//!
//! Frames are serialized once per publish and fanned out over a broadcast
//! channel of `Bytes`, so subscribers share one allocation. A slow
//! subscriber lags independently and only its own frames are dropped; a
//! failed send closes only that subscriber. Inbound bytes accumulate per
//! connection and each complete newline-terminated line goes to the command
//! router in order; replies are line-delimited, not length-prefixed.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, watch, Semaphore};
use tokio::task::JoinHandle;

use crate::command::{drain_line, CommandRouter};
use crate::config::PublisherConfig;
use crate::domain::TelemetryFrame;
use crate::error::Result;
use crate::health::HealthRegistry;

const COMPONENT: &str = "telemetry_server";
const BROADCAST_CAPACITY: usize = 256;

/// Returns the snapshot frames sent to each newly accepted subscriber,
/// in order, before any incremental frames
pub type SnapshotProvider = Box<dyn Fn() -> Vec<TelemetryFrame> + Send + Sync>;

/// TCP fan-out server for telemetry frames with a line-delimited command plane
pub struct TelemetryServer {
    config: PublisherConfig,
    router: Arc<CommandRouter>,
    health: Arc<HealthRegistry>,
    frames: broadcast::Sender<Bytes>,
    subscribers: AtomicUsize,
    next_connection_id: AtomicU64,
    snapshot_provider: RwLock<Option<SnapshotProvider>>,
    connection_semaphore: Option<Arc<Semaphore>>,
    shutdown: watch::Sender<bool>,
    local_addr: Mutex<Option<SocketAddr>>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl TelemetryServer {
    pub fn new(
        config: PublisherConfig,
        router: Arc<CommandRouter>,
        health: Arc<HealthRegistry>,
    ) -> Self {
        let (frames, _) = broadcast::channel(BROADCAST_CAPACITY);
        let (shutdown, _) = watch::channel(false);
        let connection_semaphore = if config.max_connections > 0 {
            Some(Arc::new(Semaphore::new(config.max_connections as usize)))
        } else {
            None
        };

        Self {
            config,
            router,
            health,
            frames,
            subscribers: AtomicUsize::new(0),
            next_connection_id: AtomicU64::new(1),
            snapshot_provider: RwLock::new(None),
            connection_semaphore,
            shutdown,
            local_addr: Mutex::new(None),
            accept_task: Mutex::new(None),
        }
    }

    /// Bind and start accepting subscribers; bind failure is fatal upstream
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let bind = format!("{}:{}", self.config.bind_address, self.config.port);
        let listener = TcpListener::bind(&bind).await?;
        let addr = listener.local_addr()?;
        *self.local_addr.lock().expect("server mutex poisoned") = Some(addr);

        tracing::info!(addr = %addr, "Telemetry server listening");
        self.health.update(COMPONENT, true, "server listening");

        let server = Arc::clone(self);
        let mut shutdown = self.shutdown.subscribe();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => match result {
                        Ok((socket, peer_addr)) => server.accept_connection(socket, peer_addr),
                        Err(e) => tracing::error!(error = %e, "Failed to accept connection"),
                    },
                    _ = shutdown.changed() => break,
                }
            }
        });
        *self.accept_task.lock().expect("server mutex poisoned") = Some(handle);
        Ok(())
    }

    /// Refuse new connections and let in-flight sends drain
    pub async fn stop(&self) {
        let _ = self.shutdown.send(true);
        let handle = self.accept_task.lock().expect("server mutex poisoned").take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        self.health.update(COMPONENT, false, "server stopped");
    }

    /// Whether any subscriber is currently connected
    pub fn has_subscribers(&self) -> bool {
        self.subscribers.load(Ordering::SeqCst) > 0
    }

    /// Number of connected subscribers
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.load(Ordering::SeqCst)
    }

    /// Bound address, once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().expect("server mutex poisoned")
    }

    /// Register the snapshot source for newly accepted subscribers
    pub fn set_snapshot_provider(&self, provider: SnapshotProvider) {
        *self
            .snapshot_provider
            .write()
            .expect("server mutex poisoned") = Some(provider);
    }

    /// Serialize the frame once and send it to every current subscriber
    pub fn publish(&self, frame: &TelemetryFrame) {
        if !self.has_subscribers() {
            return;
        }
        match frame.encode() {
            Ok(payload) => {
                let _ = self.frames.send(payload);
                self.health
                    .update(COMPONENT, true, "frame delivered to subscribers");
            }
            Err(e) => tracing::error!(error = %e, "Failed to encode frame"),
        }
    }

    fn accept_connection(self: &Arc<Self>, socket: TcpStream, peer_addr: SocketAddr) {
        let permit = if let Some(ref sem) = self.connection_semaphore {
            match sem.clone().try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    tracing::warn!(peer = %peer_addr, "Connection rejected: limit reached");
                    return;
                }
            }
        } else {
            None
        };

        let _ = socket.set_nodelay(true);
        let connection_id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);

        // Subscribe before the task runs so no published frame can fall into
        // the gap between registration and the first recv.
        let frames = self.frames.subscribe();
        self.subscribers.fetch_add(1, Ordering::SeqCst);
        self.health
            .update(COMPONENT, true, format!("client connected: {connection_id}"));
        tracing::debug!(connection_id, peer = %peer_addr, "Subscriber connected");

        let server = Arc::clone(self);
        tokio::spawn(async move {
            server.handle_connection(socket, connection_id, frames).await;
            server.subscribers.fetch_sub(1, Ordering::SeqCst);
            server.health.update(
                COMPONENT,
                true,
                format!("client disconnected: {connection_id}"),
            );
            tracing::debug!(connection_id, "Subscriber closed");
            drop(permit);
        });
    }

    async fn handle_connection(
        &self,
        socket: TcpStream,
        connection_id: u64,
        mut frames: broadcast::Receiver<Bytes>,
    ) {
        let (mut reader, mut writer) = socket.into_split();

        // Snapshot-on-connect: the cached state goes out before anything else.
        for payload in self.snapshot_payloads() {
            if writer.write_all(&payload).await.is_err() {
                return;
            }
        }

        let mut inbound = BytesMut::with_capacity(1024);
        let mut shutdown = self.shutdown.subscribe();

        loop {
            tokio::select! {
                read = reader.read_buf(&mut inbound) => {
                    match read {
                        Ok(0) => break,
                        Ok(_) => {
                            while let Some(line) = drain_line(&mut inbound) {
                                let reply = self.router.handle_line(&line).await;
                                if reply.is_empty() {
                                    continue;
                                }
                                if writer.write_all(reply.as_bytes()).await.is_err()
                                    || writer.write_all(b"\n").await.is_err()
                                {
                                    return;
                                }
                            }
                        }
                        Err(e) => {
                            tracing::debug!(connection_id, error = %e, "Subscriber read failed");
                            break;
                        }
                    }
                }
                frame = frames.recv() => {
                    match frame {
                        Ok(payload) => {
                            if writer.write_all(&payload).await.is_err() {
                                tracing::debug!(connection_id, "Subscriber send failed; closing");
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(connection_id, skipped, "Subscriber lagging; frames dropped");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
    }

    fn snapshot_payloads(&self) -> Vec<Bytes> {
        let provider = self
            .snapshot_provider
            .read()
            .expect("server mutex poisoned");
        let Some(provider) = provider.as_ref() else {
            return Vec::new();
        };

        provider()
            .iter()
            .filter_map(|frame| match frame.encode() {
                Ok(payload) => Some(payload),
                Err(e) => {
                    tracing::error!(error = %e, "Failed to encode snapshot frame");
                    None
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SensorConfig;
    use crate::domain::{Channel, Reading};
    use crate::gateway::mock::MockTransport;
    use crate::gateway::DeviceGateway;
    use crate::supervisor::ReloadSignal;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, BufReader};

    async fn start_server(
        max_connections: u16,
    ) -> (Arc<TelemetryServer>, SocketAddr, Arc<Mutex<Vec<(u16, u16)>>>) {
        let health = Arc::new(HealthRegistry::new(
            "unused.json",
            Duration::from_secs(3600),
        ));
        let transport = MockTransport::new();
        let writes = transport.writes();
        let gateway = Arc::new(DeviceGateway::new(
            SensorConfig::default(),
            Box::new(transport),
            Arc::clone(&health),
        ));
        let router = Arc::new(CommandRouter::new(
            gateway,
            Arc::clone(&health),
            ReloadSignal::default(),
        ));

        let config = PublisherConfig {
            bind_address: "127.0.0.1".to_string(),
            port: 0,
            max_connections,
            ..PublisherConfig::default()
        };
        let server = Arc::new(TelemetryServer::new(config, router, health));
        server.start().await.unwrap();
        let addr = server.local_addr().unwrap();
        (server, addr, writes)
    }

    async fn wait_for_subscribers(server: &TelemetryServer, count: usize) {
        for _ in 0..200 {
            if server.subscriber_count() == count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("subscriber count never reached {count}");
    }

    async fn read_frame(stream: &mut TcpStream) -> (usize, serde_json::Value) {
        let mut prefix = [0u8; 4];
        stream.read_exact(&mut prefix).await.unwrap();
        let len = u32::from_be_bytes(prefix) as usize;
        let mut payload = vec![0u8; len];
        stream.read_exact(&mut payload).await.unwrap();
        (len, serde_json::from_slice(&payload).unwrap())
    }

    fn cached_reading(tag: &str) -> Reading {
        Reading {
            label: tag.to_string(),
            timestamp: "2024-01-14 10:30:45".to_string(),
            ..Reading::default()
        }
    }

    #[tokio::test]
    async fn test_new_subscriber_receives_snapshot_first() {
        let (server, addr, _) = start_server(0).await;

        let snapshot = TelemetryFrame::snapshot(
            Channel::Realtime,
            "frame-1".to_string(),
            vec![cached_reading("R1"), cached_reading("R2")],
        );
        let expected = serde_json::to_vec(&snapshot).unwrap();
        server.set_snapshot_provider(Box::new(move || vec![snapshot.clone()]));

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let (len, value) = read_frame(&mut stream).await;

        assert_eq!(len, expected.len());
        assert_eq!(value["channel"], "realtime");
        assert_eq!(value["snapshot"], true);
        assert_eq!(value["correlationId"], "frame-1");
        assert_eq!(value["readings"].as_array().unwrap().len(), 2);
        assert_eq!(value["readings"][0]["label"], "R1");

        server.stop().await;
    }

    #[tokio::test]
    async fn test_published_frames_arrive_in_order_after_snapshot() {
        let (server, addr, _) = start_server(0).await;

        let snapshot = TelemetryFrame::snapshot(
            Channel::Realtime,
            "frame-1".to_string(),
            vec![cached_reading("R1")],
        );
        server.set_snapshot_provider(Box::new(move || vec![snapshot.clone()]));

        let mut stream = TcpStream::connect(addr).await.unwrap();
        wait_for_subscribers(&server, 1).await;

        let f2 = TelemetryFrame::incremental(
            Channel::Realtime,
            "frame-2".to_string(),
            cached_reading("R2"),
        );
        let f3 = TelemetryFrame::incremental(
            Channel::Realtime,
            "frame-3".to_string(),
            cached_reading("R3"),
        );
        server.publish(&f2);
        server.publish(&f3);

        let (_, first) = read_frame(&mut stream).await;
        let (_, second) = read_frame(&mut stream).await;
        let (_, third) = read_frame(&mut stream).await;

        assert_eq!(first["correlationId"], "frame-1");
        assert_eq!(second["correlationId"], "frame-2");
        assert_eq!(second["snapshot"], false);
        assert_eq!(third["correlationId"], "frame-3");

        server.stop().await;
    }

    #[tokio::test]
    async fn test_command_replies_are_line_delimited_and_in_order() {
        let (server, addr, writes) = start_server(0).await;

        let stream = TcpStream::connect(addr).await.unwrap();
        wait_for_subscribers(&server, 1).await;
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half);

        // An unknown command does not poison the connection; later commands
        // still dispatch.
        write_half
            .write_all(b"{\"type\":\"unknown_x\"}\n{\"type\":\"mode_select\",\"mode\":2}\n")
            .await
            .unwrap();

        let mut reply = String::new();
        lines.read_line(&mut reply).await.unwrap();
        assert_eq!(
            reply.trim_end(),
            r#"{"status":"error","message":"unknown command"}"#
        );

        reply.clear();
        lines.read_line(&mut reply).await.unwrap();
        assert_eq!(reply.trim_end(), r#"{"status":"ok","message":"mode updated"}"#);

        assert_eq!(writes.lock().unwrap().as_slice(), &[(15, 2)]);
        server.stop().await;
    }

    #[tokio::test]
    async fn test_command_split_across_segments_dispatches_once() {
        let (server, addr, writes) = start_server(0).await;

        let stream = TcpStream::connect(addr).await.unwrap();
        wait_for_subscribers(&server, 1).await;
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half);

        write_half
            .write_all(b"{\"type\":\"write_register\",")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        write_half
            .write_all(b"\"address\":7,\"value\":3}\n")
            .await
            .unwrap();

        let mut reply = String::new();
        lines.read_line(&mut reply).await.unwrap();
        assert_eq!(
            reply.trim_end(),
            r#"{"status":"ok","message":"register write queued"}"#
        );
        assert_eq!(writes.lock().unwrap().as_slice(), &[(7, 3)]);

        server.stop().await;
    }

    #[tokio::test]
    async fn test_subscriber_count_tracks_connections() {
        let (server, addr, _) = start_server(0).await;
        assert!(!server.has_subscribers());

        let stream = TcpStream::connect(addr).await.unwrap();
        wait_for_subscribers(&server, 1).await;
        assert!(server.has_subscribers());

        drop(stream);
        wait_for_subscribers(&server, 0).await;
        assert!(!server.has_subscribers());

        server.stop().await;
    }

    #[tokio::test]
    async fn test_connection_limit_rejects_excess_subscribers() {
        let (server, addr, _) = start_server(1).await;

        let _first = TcpStream::connect(addr).await.unwrap();
        wait_for_subscribers(&server, 1).await;

        // The second connection is accepted at the socket level and then
        // dropped; the peer observes EOF.
        let mut second = TcpStream::connect(addr).await.unwrap();
        let mut buf = [0u8; 1];
        let read = second.read(&mut buf).await.unwrap();
        assert_eq!(read, 0);
        assert_eq!(server.subscriber_count(), 1);

        server.stop().await;
    }
}
