//! Role-negotiated video fan-out
//!
//! Every connection starts as a Subscriber. A payload prefixed with `ROLE:`
//! is a control message and switches the role; anything else from a
//! Publisher is queued for relay, anything else from a Subscriber is logged
//! and discarded. A single relay worker drains the queue and forwards each
//! packet to the current subscriber set. The queue is bounded and drops the
//! oldest packet under pressure.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::Result;
use crate::health::HealthRegistry;

const COMPONENT: &str = "video_relay";
const QUEUE_CAPACITY: usize = 256;
const CLIENT_BUFFER: usize = 64;
const ROLE_PREFIX: &[u8] = b"ROLE:";

/// Role of a video client; upgraded by the `ROLE:PUBLISHER` control message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoRole {
    Publisher,
    Subscriber,
}

/// One opaque frame received from the publisher
#[derive(Debug, Clone)]
pub struct VideoPacket {
    pub data: Bytes,
    pub received_at: Instant,
}

struct VideoClient {
    role: VideoRole,
    tx: mpsc::Sender<Bytes>,
}

/// Bounded drop-oldest packet queue between reader tasks and the relay worker
struct PacketQueue {
    packets: Mutex<VecDeque<VideoPacket>>,
    notify: Notify,
    capacity: usize,
}

impl PacketQueue {
    fn new(capacity: usize) -> Self {
        Self {
            packets: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            capacity,
        }
    }

    fn push(&self, packet: VideoPacket) {
        {
            let mut packets = self.packets.lock().expect("video queue mutex poisoned");
            if packets.len() == self.capacity {
                packets.pop_front();
                tracing::debug!("Video queue full; oldest packet dropped");
            }
            packets.push_back(packet);
        }
        self.notify.notify_one();
    }

    fn take(&self) -> Option<VideoPacket> {
        self.packets
            .lock()
            .expect("video queue mutex poisoned")
            .pop_front()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.packets.lock().expect("video queue mutex poisoned").len()
    }
}

/// TCP listener relaying publisher bytes to subscriber-role clients
pub struct VideoRelay {
    health: Arc<HealthRegistry>,
    clients: Mutex<HashMap<u64, VideoClient>>,
    queue: PacketQueue,
    next_client_id: AtomicU64,
    shutdown: watch::Sender<bool>,
    local_addr: Mutex<Option<SocketAddr>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl VideoRelay {
    pub fn new(health: Arc<HealthRegistry>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            health,
            clients: Mutex::new(HashMap::new()),
            queue: PacketQueue::new(QUEUE_CAPACITY),
            next_client_id: AtomicU64::new(1),
            shutdown,
            local_addr: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Bind the listener and spawn the accept loop and relay worker
    pub async fn start(self: &Arc<Self>, port: u16) -> Result<()> {
        let listener = match TcpListener::bind(("0.0.0.0", port)).await {
            Ok(listener) => listener,
            Err(e) => {
                self.health.update(COMPONENT, false, "start failed");
                return Err(e.into());
            }
        };
        let addr = listener.local_addr()?;
        *self.local_addr.lock().expect("video mutex poisoned") = Some(addr);

        tracing::info!(addr = %addr, "Video relay listening");
        self.health
            .update(COMPONENT, true, format!("listening on port {}", addr.port()));

        let relay = Arc::clone(self);
        let mut shutdown = self.shutdown.subscribe();
        let accept = tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => match result {
                        Ok((socket, _)) => relay.accept_client(socket),
                        Err(e) => tracing::error!(error = %e, "Failed to accept video client"),
                    },
                    _ = shutdown.changed() => break,
                }
            }
        });

        let relay = Arc::clone(self);
        let worker = tokio::spawn(async move { relay.relay_loop().await });

        let mut tasks = self.tasks.lock().expect("video mutex poisoned");
        tasks.push(accept);
        tasks.push(worker);
        Ok(())
    }

    /// Stop accepting, wake the worker, and join all tasks
    pub async fn stop(&self) {
        let _ = self.shutdown.send(true);
        let handles: Vec<JoinHandle<()>> = {
            let mut tasks = self.tasks.lock().expect("video mutex poisoned");
            tasks.drain(..).collect()
        };
        for handle in handles {
            let _ = handle.await;
        }
    }

    /// Bound address, once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().expect("video mutex poisoned")
    }

    /// Number of connected video clients
    pub fn client_count(&self) -> usize {
        self.clients.lock().expect("video mutex poisoned").len()
    }

    fn accept_client(self: &Arc<Self>, socket: TcpStream) {
        let client_id = self.next_client_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(CLIENT_BUFFER);

        // New clients are subscribers until they claim otherwise.
        self.clients
            .lock()
            .expect("video mutex poisoned")
            .insert(
                client_id,
                VideoClient {
                    role: VideoRole::Subscriber,
                    tx,
                },
            );
        tracing::info!(client_id, "Video client connected");
        self.health
            .update(COMPONENT, true, format!("client connected: {client_id}"));

        let relay = Arc::clone(self);
        let handle = tokio::spawn(async move {
            relay.handle_client(socket, client_id, rx).await;
            relay
                .clients
                .lock()
                .expect("video mutex poisoned")
                .remove(&client_id);
            tracing::info!(client_id, "Video client disconnected");
            relay
                .health
                .update(COMPONENT, true, format!("client disconnected: {client_id}"));
        });
        self.tasks.lock().expect("video mutex poisoned").push(handle);
    }

    async fn handle_client(&self, socket: TcpStream, client_id: u64, mut rx: mpsc::Receiver<Bytes>) {
        let (mut reader, mut writer) = socket.into_split();
        let mut inbound = BytesMut::with_capacity(8 * 1024);
        let mut shutdown = self.shutdown.subscribe();

        loop {
            tokio::select! {
                read = reader.read_buf(&mut inbound) => {
                    match read {
                        Ok(0) => break,
                        Ok(_) => self.process_payload(client_id, inbound.split().freeze()),
                        Err(e) => {
                            tracing::debug!(client_id, error = %e, "Video read failed");
                            break;
                        }
                    }
                }
                packet = rx.recv() => {
                    match packet {
                        Some(data) => {
                            if writer.write_all(&data).await.is_err() {
                                tracing::debug!(client_id, "Video send failed; closing");
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
    }

    fn process_payload(&self, client_id: u64, payload: Bytes) {
        if payload.starts_with(ROLE_PREFIX) {
            let role = if &payload[ROLE_PREFIX.len()..] == b"PUBLISHER" {
                VideoRole::Publisher
            } else {
                VideoRole::Subscriber
            };
            let mut clients = self.clients.lock().expect("video mutex poisoned");
            if let Some(client) = clients.get_mut(&client_id) {
                client.role = role;
                tracing::info!(client_id, ?role, "Video client role updated");
            }
            return;
        }

        let is_publisher = {
            let clients = self.clients.lock().expect("video mutex poisoned");
            clients
                .get(&client_id)
                .map_or(false, |client| client.role == VideoRole::Publisher)
        };
        if !is_publisher {
            tracing::warn!(client_id, "Subscriber attempted to push video data; ignored");
            return;
        }

        self.queue.push(VideoPacket {
            data: payload,
            received_at: Instant::now(),
        });
    }

    async fn relay_loop(&self) {
        let mut shutdown = self.shutdown.subscribe();

        loop {
            let packet = loop {
                if let Some(packet) = self.queue.take() {
                    break packet;
                }
                tokio::select! {
                    _ = self.queue.notify.notified() => {}
                    _ = shutdown.changed() => return,
                }
            };

            // Snapshot the subscriber set; a failed or full client queue only
            // affects that client.
            let targets: Vec<mpsc::Sender<Bytes>> = {
                let clients = self.clients.lock().expect("video mutex poisoned");
                clients
                    .values()
                    .filter(|client| client.role == VideoRole::Subscriber)
                    .map(|client| client.tx.clone())
                    .collect()
            };

            for tx in targets {
                let _ = tx.try_send(packet.data.clone());
            }

            self.health.update(COMPONENT, true, "video packet broadcast");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    async fn start_relay() -> (Arc<VideoRelay>, SocketAddr) {
        let health = Arc::new(HealthRegistry::new(
            "unused.json",
            Duration::from_secs(3600),
        ));
        let relay = Arc::new(VideoRelay::new(health));
        relay.start(0).await.unwrap();
        let port = relay.local_addr().unwrap().port();
        (relay, SocketAddr::from(([127, 0, 0, 1], port)))
    }

    async fn wait_for_clients(relay: &VideoRelay, count: usize) {
        for _ in 0..200 {
            if relay.client_count() == count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("client count never reached {count}");
    }

    // Control messages and data travel in separate segments; give the relay
    // a beat to process the first before sending the second.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[test]
    fn test_queue_drops_oldest_under_pressure() {
        let queue = PacketQueue::new(2);
        for tag in [b"a", b"b", b"c"] {
            queue.push(VideoPacket {
                data: Bytes::from_static(tag),
                received_at: Instant::now(),
            });
        }

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.take().unwrap().data.as_ref(), b"b");
        assert_eq!(queue.take().unwrap().data.as_ref(), b"c");
        assert!(queue.take().is_none());
    }

    #[tokio::test]
    async fn test_publisher_bytes_reach_subscribers_verbatim() {
        let (relay, addr) = start_relay().await;

        let mut publisher = TcpStream::connect(addr).await.unwrap();
        let mut subscriber = TcpStream::connect(addr).await.unwrap();
        wait_for_clients(&relay, 2).await;

        publisher.write_all(b"ROLE:PUBLISHER").await.unwrap();
        settle().await;

        let payload: Vec<u8> = (0..1000).map(|i| (i % 251) as u8).collect();
        publisher.write_all(&payload).await.unwrap();

        let mut received = vec![0u8; payload.len()];
        subscriber.read_exact(&mut received).await.unwrap();
        assert_eq!(received, payload);

        // The publisher itself receives nothing back.
        let mut probe = [0u8; 1];
        assert!(timeout(Duration::from_millis(100), publisher.read(&mut probe))
            .await
            .is_err());

        // A second publisher's bytes are relayed too.
        let mut second = TcpStream::connect(addr).await.unwrap();
        wait_for_clients(&relay, 3).await;
        second.write_all(b"ROLE:PUBLISHER").await.unwrap();
        settle().await;
        second.write_all(b"hello").await.unwrap();

        let mut received = [0u8; 5];
        subscriber.read_exact(&mut received).await.unwrap();
        assert_eq!(&received, b"hello");

        relay.stop().await;
    }

    #[tokio::test]
    async fn test_subscriber_pushes_are_discarded() {
        let (relay, addr) = start_relay().await;

        let mut pusher = TcpStream::connect(addr).await.unwrap();
        let mut watcher = TcpStream::connect(addr).await.unwrap();
        wait_for_clients(&relay, 2).await;

        // Both clients are subscribers; bytes from one must not reach the other.
        pusher.write_all(b"not for relay").await.unwrap();
        settle().await;

        let mut probe = [0u8; 1];
        assert!(timeout(Duration::from_millis(100), watcher.read(&mut probe))
            .await
            .is_err());

        relay.stop().await;
    }

    #[tokio::test]
    async fn test_role_can_be_downgraded() {
        let (relay, addr) = start_relay().await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        let mut watcher = TcpStream::connect(addr).await.unwrap();
        wait_for_clients(&relay, 2).await;

        client.write_all(b"ROLE:PUBLISHER").await.unwrap();
        settle().await;
        client.write_all(b"ROLE:SUBSCRIBER").await.unwrap();
        settle().await;

        client.write_all(b"after downgrade").await.unwrap();
        settle().await;

        let mut probe = [0u8; 1];
        assert!(timeout(Duration::from_millis(100), watcher.read(&mut probe))
            .await
            .is_err());

        relay.stop().await;
    }
}
