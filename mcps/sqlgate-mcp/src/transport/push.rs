//! Push-stream client registry
//!
//! Long-lived GET streams (event-stream and NDJSON) register a client here.
//! Each client owns a bounded channel feeding its response body and a
//! keepalive task. A failed write removes the client first and then aborts
//! its keepalive, so nothing writes to a sink that is gone.

use axum::body::Bytes;
use chrono::{DateTime, Utc};
use futures_util::Stream;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::convert::Infallible;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Fixed keepalive period
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Frames a slow client may fall behind before it is treated as dead
pub const CLIENT_BUFFER: usize = 64;

/// Wire framing of a push stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// `data: <json>\n\n`
    EventStream,
    /// `<json>\n`
    NdJson,
}

impl Framing {
    pub fn content_type(self) -> &'static str {
        match self {
            Framing::EventStream => "text/event-stream",
            Framing::NdJson => "application/x-ndjson",
        }
    }

    pub fn frame(self, payload: &Value) -> Bytes {
        match self {
            Framing::EventStream => Bytes::from(format!("data: {}\n\n", payload)),
            Framing::NdJson => Bytes::from(format!("{}\n", payload)),
        }
    }

    fn keepalive(self) -> Bytes {
        match self {
            Framing::EventStream => Bytes::from_static(b": keepalive\n\n"),
            Framing::NdJson => self.frame(&json!({
                "type": "keepalive",
                "timestamp": Utc::now().to_rfc3339(),
            })),
        }
    }
}

struct ConnectedClient {
    sink: mpsc::Sender<Bytes>,
    connected_at: DateTime<Utc>,
    keepalive: Option<JoinHandle<()>>,
}

impl ConnectedClient {
    fn cancel(self) {
        if let Some(task) = self.keepalive {
            task.abort();
        }
    }
}

struct HubInner {
    framing: Framing,
    keepalive_interval: Duration,
    buffer: usize,
    next_id: AtomicU64,
    clients: Mutex<HashMap<u64, ConnectedClient>>,
}

/// Registry of clients attached to one push transport
#[derive(Clone)]
pub struct PushHub {
    inner: Arc<HubInner>,
}

impl PushHub {
    pub fn new(framing: Framing) -> Self {
        Self::with_settings(framing, KEEPALIVE_INTERVAL, CLIENT_BUFFER)
    }

    pub fn with_settings(framing: Framing, keepalive_interval: Duration, buffer: usize) -> Self {
        Self {
            inner: Arc::new(HubInner {
                framing,
                keepalive_interval,
                buffer: buffer.max(1),
                next_id: AtomicU64::new(0),
                clients: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn framing(&self) -> Framing {
        self.inner.framing
    }

    fn clients(&self) -> MutexGuard<'_, HashMap<u64, ConnectedClient>> {
        self.inner.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a client; `announcement` builds its first message from its id
    pub fn attach(&self, announcement: impl FnOnce(u64) -> Value) -> ClientStream {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (sink, rx) = mpsc::channel(self.inner.buffer);

        // A fresh channel always has room for the first frame
        let _ = sink.try_send(self.inner.framing.frame(&announcement(id)));

        self.clients().insert(
            id,
            ConnectedClient {
                sink,
                connected_at: Utc::now(),
                keepalive: None,
            },
        );

        let task = tokio::spawn(keepalive(Arc::downgrade(&self.inner), id));
        match self.clients().get_mut(&id) {
            Some(client) => client.keepalive = Some(task),
            None => task.abort(),
        }

        tracing::info!(client = id, framing = ?self.inner.framing, "Push client connected");
        ClientStream {
            id,
            rx,
            hub: Arc::downgrade(&self.inner),
        }
    }

    /// Write a pre-framed message to one client, pruning it on failure
    pub fn send_to(&self, id: u64, frame: Bytes) -> bool {
        let failed = {
            let mut clients = self.clients();
            let Some(client) = clients.get(&id) else {
                return false;
            };
            match client.sink.try_send(frame) {
                Ok(()) => return true,
                Err(e) => {
                    tracing::warn!(client = id, "Push write failed: {}", e);
                    clients.remove(&id)
                }
            }
        };
        if let Some(client) = failed {
            client.cancel();
        }
        false
    }

    /// Frame and write a payload to one client
    pub fn send(&self, id: u64, payload: &Value) -> bool {
        self.send_to(id, self.inner.framing.frame(payload))
    }

    /// Fan a message out to every client; returns how many received it
    pub fn broadcast(&self, event: &str, data: Value) -> usize {
        let frame = self.inner.framing.frame(&json!({
            "type": event,
            "data": data,
            "timestamp": Utc::now().to_rfc3339(),
        }));

        let (delivered, dead) = {
            let mut clients = self.clients();
            let failed: Vec<u64> = clients
                .iter()
                .filter(|(_, client)| client.sink.try_send(frame.clone()).is_err())
                .map(|(id, _)| *id)
                .collect();
            let dead: Vec<ConnectedClient> = failed.iter().filter_map(|id| clients.remove(id)).collect();
            (clients.len(), dead)
        };

        if !dead.is_empty() {
            tracing::warn!("Pruned {} push client(s) during broadcast", dead.len());
        }
        dead.into_iter().for_each(ConnectedClient::cancel);
        delivered
    }

    /// Remove a client; returns whether it was attached
    pub fn detach(&self, id: u64) -> bool {
        let removed = self.clients().remove(&id);
        match removed {
            Some(client) => {
                let lifetime = Utc::now() - client.connected_at;
                client.cancel();
                tracing::info!(
                    client = id,
                    "Push client disconnected after {}s",
                    lifetime.num_seconds()
                );
                true
            }
            None => false,
        }
    }

    /// Detach every client, ending their streams
    pub fn close_all(&self) -> usize {
        let drained: Vec<ConnectedClient> = self.clients().drain().map(|(_, c)| c).collect();
        let count = drained.len();
        drained.into_iter().for_each(ConnectedClient::cancel);
        if count > 0 {
            tracing::info!(framing = ?self.inner.framing, "Closed {} push client(s)", count);
        }
        count
    }

    pub fn client_count(&self) -> usize {
        self.clients().len()
    }

    pub fn client_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.clients().keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

async fn keepalive(hub: Weak<HubInner>, id: u64) {
    let period = match hub.upgrade() {
        Some(inner) => inner.keepalive_interval,
        None => return,
    };
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let Some(inner) = hub.upgrade() else {
            return;
        };
        let live = PushHub { inner };
        let frame = live.framing().keepalive();
        if !live.send_to(id, frame) {
            return;
        }
    }
}

/// Response body of one push client; dropping it detaches the client
pub struct ClientStream {
    id: u64,
    rx: mpsc::Receiver<Bytes>,
    hub: Weak<HubInner>,
}

impl ClientStream {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Stream for ClientStream {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx).map(|frame| frame.map(Ok))
    }
}

impl Drop for ClientStream {
    fn drop(&mut self) {
        if let Some(inner) = self.hub.upgrade() {
            PushHub { inner }.detach(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    fn announce(id: u64) -> Value {
        json!({"type": "connected", "clientId": id})
    }

    async fn next_text(stream: &mut ClientStream) -> Option<String> {
        stream
            .next()
            .await
            .map(|frame| String::from_utf8(frame.unwrap().to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_framing() {
        let payload = json!({"a": 1});
        assert_eq!(Framing::EventStream.frame(&payload), Bytes::from("data: {\"a\":1}\n\n"));
        assert_eq!(Framing::NdJson.frame(&payload), Bytes::from("{\"a\":1}\n"));
    }

    #[tokio::test]
    async fn test_announcement_first_then_ids_increase() {
        let hub = PushHub::new(Framing::NdJson);
        let mut first = hub.attach(announce);
        let second = hub.attach(announce);

        assert_eq!(first.id(), 1);
        assert_eq!(second.id(), 2);
        assert_eq!(hub.client_ids(), vec![1, 2]);
        let text = next_text(&mut first).await.unwrap();
        assert!(text.ends_with('\n'));
        let message: Value = serde_json::from_str(text.trim_end()).unwrap();
        assert_eq!(message, announce(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_keepalive_every_interval() {
        let hub = PushHub::new(Framing::EventStream);
        let mut stream = hub.attach(announce);
        next_text(&mut stream).await.unwrap();

        tokio::time::sleep(KEEPALIVE_INTERVAL + Duration::from_millis(1)).await;
        assert_eq!(next_text(&mut stream).await.unwrap(), ": keepalive\n\n");

        tokio::time::sleep(KEEPALIVE_INTERVAL).await;
        assert_eq!(next_text(&mut stream).await.unwrap(), ": keepalive\n\n");
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_client_pruned_within_one_interval() {
        let hub = PushHub::with_settings(Framing::NdJson, KEEPALIVE_INTERVAL, 1);
        // Never read: the announcement fills the only slot
        let mut stalled = hub.attach(announce);
        assert_eq!(hub.client_count(), 1);

        tokio::time::sleep(KEEPALIVE_INTERVAL + Duration::from_millis(1)).await;
        assert_eq!(hub.client_count(), 0);

        // The buffered announcement drains, then the stream ends
        assert!(next_text(&mut stalled).await.unwrap().contains("connected"));
        assert!(next_text(&mut stalled).await.is_none());

        tokio::time::sleep(KEEPALIVE_INTERVAL * 3).await;
        assert!(!hub.send(stalled.id(), &json!({})));
    }

    #[tokio::test]
    async fn test_broadcast_prunes_failed_writers() {
        let hub = PushHub::with_settings(Framing::NdJson, KEEPALIVE_INTERVAL, 1);
        let mut reader = hub.attach(announce);
        let _stalled = hub.attach(announce);
        next_text(&mut reader).await.unwrap();

        let delivered = hub.broadcast("tools_changed", json!({"count": 10}));

        assert_eq!(delivered, 1);
        assert_eq!(hub.client_ids(), vec![reader.id()]);
        let message: Value = serde_json::from_str(next_text(&mut reader).await.unwrap().trim_end()).unwrap();
        assert_eq!(message["type"], "tools_changed");
        assert_eq!(message["data"]["count"], 10);
    }

    #[tokio::test]
    async fn test_drop_detaches() {
        let hub = PushHub::new(Framing::EventStream);
        let stream = hub.attach(announce);
        let id = stream.id();
        drop(stream);
        assert_eq!(hub.client_count(), 0);
        assert!(!hub.detach(id));
    }

    #[tokio::test]
    async fn test_close_all_ends_streams() {
        let hub = PushHub::new(Framing::EventStream);
        let mut a = hub.attach(announce);
        let mut b = hub.attach(announce);

        assert_eq!(hub.close_all(), 2);
        assert_eq!(hub.client_count(), 0);
        for stream in [&mut a, &mut b] {
            assert!(next_text(stream).await.is_some());
            assert!(next_text(stream).await.is_none());
        }
        assert_eq!(hub.close_all(), 0);
    }
}
