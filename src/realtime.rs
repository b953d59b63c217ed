// Realtime update channel
//
// `RealtimeHub` fans server-pushed reservation events out to subscribers keyed
// by (namespace, event kind). Each subscriber owns an mpsc receiver and an
// unsubscribe-on-drop handle. `spawn_connector` feeds the hub from a WebSocket
// with reconnect backoff; while it is disconnected nothing is delivered.
// Events carry no ordering guarantee relative to local writes (last write wins).

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::config::RealtimeConfig;
use crate::model::Reservation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ReservationUpdated,
    ReservationCancelled,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::ReservationUpdated => "reservation_updated",
            EventKind::ReservationCancelled => "reservation_cancelled",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "reservation_updated" => Some(EventKind::ReservationUpdated),
            "reservation_cancelled" => Some(EventKind::ReservationCancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeEvent {
    ReservationUpdated(Reservation),
    ReservationCancelled(String),
}

impl RealtimeEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            RealtimeEvent::ReservationUpdated(_) => EventKind::ReservationUpdated,
            RealtimeEvent::ReservationCancelled(_) => EventKind::ReservationCancelled,
        }
    }

    pub fn reservation_id(&self) -> &str {
        match self {
            RealtimeEvent::ReservationUpdated(r) => &r.id,
            RealtimeEvent::ReservationCancelled(id) => id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Topic {
    pub namespace: String,
    pub kind: EventKind,
}

impl Topic {
    pub fn new(namespace: impl Into<String>, kind: EventKind) -> Self {
        Self {
            namespace: namespace.into(),
            kind,
        }
    }
}

// Client -> server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientFrame {
    pub action: String,
    pub namespace: String,
    pub event: String,
}

impl ClientFrame {
    fn subscribe(topic: &Topic) -> Self {
        Self {
            action: "subscribe".to_string(),
            namespace: topic.namespace.clone(),
            event: topic.kind.as_str().to_string(),
        }
    }

    fn unsubscribe(topic: &Topic) -> Self {
        Self {
            action: "unsubscribe".to_string(),
            namespace: topic.namespace.clone(),
            event: topic.kind.as_str().to_string(),
        }
    }
}

// Server -> client
#[derive(Debug, Clone, Deserialize)]
pub struct ServerFrame {
    pub namespace: String,
    pub event: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

#[derive(Deserialize)]
struct IdPayload {
    id: String,
}

impl ServerFrame {
    pub fn parse(text: &str) -> Result<(String, RealtimeEvent), String> {
        let frame: ServerFrame = serde_json::from_str(text).map_err(|e| e.to_string())?;
        let kind = EventKind::parse(&frame.event)
            .ok_or_else(|| format!("unknown event {}", frame.event))?;

        let event = match kind {
            EventKind::ReservationUpdated => RealtimeEvent::ReservationUpdated(
                serde_json::from_value(frame.payload).map_err(|e| e.to_string())?,
            ),
            EventKind::ReservationCancelled => {
                // Bare id string, or an object carrying the id
                let id = match frame.payload {
                    serde_json::Value::String(id) => id,
                    other => {
                        serde_json::from_value::<IdPayload>(other)
                            .map_err(|e| e.to_string())?
                            .id
                    }
                };
                RealtimeEvent::ReservationCancelled(id)
            }
        };
        Ok((frame.namespace, event))
    }
}

#[derive(Default)]
struct HubState {
    subscribers: HashMap<Topic, Vec<(u64, mpsc::UnboundedSender<RealtimeEvent>)>>,
    next_id: u64,
    control: Option<mpsc::UnboundedSender<ClientFrame>>,
}

#[derive(Default)]
struct HubInner {
    state: Mutex<HubState>,
}

impl HubInner {
    fn remove(&self, topic: &Topic, id: u64) {
        let mut state = self.state.lock();
        let Some(subscribers) = state.subscribers.get_mut(topic) else {
            return;
        };
        subscribers.retain(|(sub_id, _)| *sub_id != id);
        if subscribers.is_empty() {
            state.subscribers.remove(topic);
            if let Some(control) = &state.control {
                let _ = control.send(ClientFrame::unsubscribe(topic));
            }
        }
    }
}

#[derive(Clone, Default)]
pub struct RealtimeHub {
    inner: Arc<HubInner>,
}

impl RealtimeHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, topic: Topic) -> Subscription {
        self.subscribe_many([topic])
    }

    // One receiver for several topics, so events keep their arrival order across kinds
    pub fn subscribe_many(&self, topics: impl IntoIterator<Item = Topic>) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.inner.state.lock();
        state.next_id += 1;
        let id = state.next_id;

        let mut subscribed = Vec::new();
        for topic in topics {
            if subscribed.contains(&topic) {
                continue;
            }
            let subscribers = state.subscribers.entry(topic.clone()).or_default();
            let first = subscribers.is_empty();
            subscribers.push((id, tx.clone()));
            if first {
                if let Some(control) = &state.control {
                    let _ = control.send(ClientFrame::subscribe(&topic));
                }
            }
            debug!(namespace = %topic.namespace, event = topic.kind.as_str(), "subscribed");
            subscribed.push(topic);
        }

        Subscription {
            id,
            topics: subscribed,
            rx,
            hub: Arc::downgrade(&self.inner),
        }
    }

    // Delivers to every live subscriber of (namespace, kind); returns how many got it
    pub fn publish(&self, namespace: &str, event: RealtimeEvent) -> usize {
        let topic = Topic::new(namespace, event.kind());
        let mut state = self.inner.state.lock();
        let Some(subscribers) = state.subscribers.get_mut(&topic) else {
            return 0;
        };
        subscribers.retain(|(_, tx)| tx.send(event.clone()).is_ok());
        subscribers.len()
    }

    pub fn active_topics(&self) -> Vec<Topic> {
        self.inner.state.lock().subscribers.keys().cloned().collect()
    }

    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        self.inner
            .state
            .lock()
            .subscribers
            .get(topic)
            .map_or(0, Vec::len)
    }

    // Frames for subscribe/unsubscribe edges go to the connector through this channel
    fn attach_control(&self, control: mpsc::UnboundedSender<ClientFrame>) {
        self.inner.state.lock().control = Some(control);
    }
}

// Live subscription; dropping it unsubscribes
pub struct Subscription {
    id: u64,
    topics: Vec<Topic>,
    rx: mpsc::UnboundedReceiver<RealtimeEvent>,
    hub: Weak<HubInner>,
}

impl Subscription {
    pub fn topics(&self) -> &[Topic] {
        &self.topics
    }

    pub async fn recv(&mut self) -> Option<RealtimeEvent> {
        self.rx.recv().await
    }

    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            for topic in &self.topics {
                hub.remove(topic, self.id);
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Backoff,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Backoff => write!(f, "backoff"),
        }
    }
}

pub struct RealtimeHandle {
    state: watch::Receiver<ConnectionState>,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl RealtimeHandle {
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    // Resolves once the connector reaches `target`
    pub async fn wait_for(&mut self, target: ConnectionState) -> bool {
        self.state.wait_for(|s| *s == target).await.is_ok()
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.task.await {
            warn!(?e, "realtime connector task ended abnormally");
        }
    }
}

pub fn reconnect_delay(attempt: u32, config: &RealtimeConfig) -> Duration {
    let base = (config.initial_backoff_ms as f64 * config.backoff_multiplier.powf(attempt as f64))
        .min(config.max_backoff_ms as f64);
    // up to 10% jitter so clients do not reconnect in lockstep
    let jitter = rand::random::<f64>() * base * 0.1;
    Duration::from_millis((base + jitter) as u64)
}

// Spawns the WebSocket loop. Returns None when no URL is configured.
pub fn spawn_connector(config: RealtimeConfig, hub: RealtimeHub) -> Option<RealtimeHandle> {
    let url = config.url.clone()?;
    let (control_tx, control_rx) = mpsc::unbounded_channel();
    hub.attach_control(control_tx);

    let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let connector = Connector {
        url,
        config,
        hub,
        control_rx,
        state_tx,
        shutdown_rx,
    };
    let task = tokio::spawn(connector.run());

    Some(RealtimeHandle {
        state: state_rx,
        shutdown_tx,
        task,
    })
}

enum LoopExit {
    Shutdown,
    Disconnected,
}

struct Connector {
    url: String,
    config: RealtimeConfig,
    hub: RealtimeHub,
    control_rx: mpsc::UnboundedReceiver<ClientFrame>,
    state_tx: watch::Sender<ConnectionState>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Connector {
    async fn run(mut self) {
        info!(url = %self.url, "realtime connector starting");
        let mut attempt = 0u32;

        loop {
            if *self.shutdown_rx.borrow() {
                break;
            }
            self.state_tx.send_replace(ConnectionState::Connecting);

            let timeout = Duration::from_millis(self.config.connect_timeout_ms);
            match tokio::time::timeout(timeout, tokio_tungstenite::connect_async(self.url.as_str()))
                .await
            {
                Ok(Ok((stream, _response))) => {
                    info!("realtime channel connected");
                    attempt = 0;
                    self.state_tx.send_replace(ConnectionState::Connected);
                    if let LoopExit::Shutdown = self.connection_loop(stream).await {
                        break;
                    }
                    warn!("realtime channel disconnected");
                }
                Ok(Err(e)) => error!(error = %e, "realtime connect failed"),
                Err(_) => error!(timeout_ms = self.config.connect_timeout_ms, "realtime connect timed out"),
            }

            self.state_tx.send_replace(ConnectionState::Backoff);
            let delay = reconnect_delay(attempt, &self.config);
            attempt = attempt.saturating_add(1);
            debug!(?delay, attempt, "waiting before reconnect");

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.shutdown_rx.changed() => break,
            }
        }

        self.state_tx.send_replace(ConnectionState::Disconnected);
        info!("realtime connector stopped");
    }

    async fn connection_loop<S>(&mut self, stream: tokio_tungstenite::WebSocketStream<S>) -> LoopExit
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
    {
        let (mut write, mut read) = stream.split();

        // The server forgets our subscriptions when the socket drops
        for topic in self.hub.active_topics() {
            if let Err(e) = send_frame(&mut write, &ClientFrame::subscribe(&topic)).await {
                warn!(error = %e, "failed to resubscribe");
                return LoopExit::Disconnected;
            }
        }

        loop {
            tokio::select! {
                Some(frame) = self.control_rx.recv() => {
                    if let Err(e) = send_frame(&mut write, &frame).await {
                        warn!(error = %e, "failed to send control frame");
                        return LoopExit::Disconnected;
                    }
                }
                message = read.next() => match message {
                    Some(Ok(Message::Text(text))) => match ServerFrame::parse(&text) {
                        Ok((namespace, event)) => {
                            debug!(%namespace, event = event.kind().as_str(), reservation_id = event.reservation_id(), "realtime event");
                            self.hub.publish(&namespace, event);
                        }
                        Err(e) => warn!(error = %e, "undecodable realtime frame"),
                    },
                    Some(Ok(Message::Close(frame))) => {
                        info!(?frame, "realtime channel closed by server");
                        return LoopExit::Disconnected;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        error!(error = %e, "realtime channel error");
                        return LoopExit::Disconnected;
                    }
                    None => return LoopExit::Disconnected,
                },
                _ = self.shutdown_rx.changed() => {
                    let _ = write.send(Message::Close(None)).await;
                    return LoopExit::Shutdown;
                }
            }
        }
    }
}

async fn send_frame<W>(write: &mut W, frame: &ClientFrame) -> Result<(), String>
where
    W: futures::Sink<Message> + Unpin,
    W::Error: fmt::Display,
{
    let text = serde_json::to_string(frame).map_err(|e| e.to_string())?;
    write
        .send(Message::Text(text))
        .await
        .map_err(|e| e.to_string())
}
