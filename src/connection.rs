//! Connection manager and ref-counted subscription registry.
//!
//! [`ConnectionManager`] owns the single persistent connection to the game
//! server and multiplexes topic subscriptions over it. It is an explicitly
//! constructed service instance — create one per client session (or one per
//! test) and share clones of the handle; there is no process-wide singleton.
//!
//! A background transport loop task multiplexes outgoing frames and incoming
//! messages with `tokio::select!`. Incoming [`ServerFrame::Message`]s are
//! fanned out synchronously, on the loop task, to every listener registered
//! for the topic, so all downstream reconciliation is effectively
//! single-threaded.
//!
//! # Example
//!
//! ```rust,ignore
//! let manager = ConnectionManager::new();
//! let sub = manager.subscribe(topics::LOBBY, |body| { /* fold event */ });
//! manager
//!     .connect(|| WebSocketTransport::connect("ws://localhost:8080/ws", &token))
//!     .await;
//! // ... later
//! sub.unsubscribe();
//! manager.disconnect();
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::error::{Result, SerpentiaError};
use crate::protocol::{topics, ClientFrame, ServerFrame};
use crate::transport::Transport;

/// Callback invoked with the body of every message on a subscribed topic.
pub type MessageListener = Arc<dyn Fn(&Value) + Send + Sync>;

type LifecycleListener = Arc<dyn Fn() + Send + Sync>;
type ErrorListener = Arc<dyn Fn(&SerpentiaError) + Send + Sync>;

// ── Connection state ────────────────────────────────────────────────

/// Observable lifecycle state of the persistent connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

// ── Registry internals ──────────────────────────────────────────────

#[derive(Default)]
struct TopicEntry {
    /// Listener callbacks in registration order (fan-out order).
    listeners: Vec<(Uuid, MessageListener)>,
    /// Whether a Subscribe frame is live on the current connection.
    active: bool,
}

/// Ref-counted topic → listeners mapping.
///
/// At most one underlying subscription exists per topic regardless of
/// listener count. `order` records first-interest order and drives the
/// deterministic drain of queued/re-established subscriptions on connect.
#[derive(Default)]
struct Registry {
    topics: HashMap<String, TopicEntry>,
    order: Vec<String>,
}

// ── Shared state ────────────────────────────────────────────────────

struct ManagerInner {
    state: StdMutex<ConnectionState>,
    frame_tx: StdMutex<Option<mpsc::UnboundedSender<ClientFrame>>>,
    registry: StdMutex<Registry>,
    /// Incremented on every successful attach; a stale transport loop must
    /// not clobber the state of a newer connection.
    generation: AtomicU64,
    task: StdMutex<Option<tokio::task::JoinHandle<()>>>,
    on_connected: StdMutex<Vec<LifecycleListener>>,
    on_disconnected: StdMutex<Vec<LifecycleListener>>,
    on_error: StdMutex<Vec<ErrorListener>>,
}

impl ManagerInner {
    fn new() -> Self {
        Self {
            state: StdMutex::new(ConnectionState::Disconnected),
            frame_tx: StdMutex::new(None),
            registry: StdMutex::new(Registry::default()),
            generation: AtomicU64::new(0),
            task: StdMutex::new(None),
            on_connected: StdMutex::new(Vec::new()),
            on_disconnected: StdMutex::new(Vec::new()),
            on_error: StdMutex::new(Vec::new()),
        }
    }

    fn state(&self) -> ConnectionState {
        self.state.lock().map(|s| *s).unwrap_or(ConnectionState::Disconnected)
    }

    fn set_state(&self, next: ConnectionState) {
        if let Ok(mut s) = self.state.lock() {
            *s = next;
        }
    }

    /// Queue a frame to the transport loop. Returns `false` if no loop is
    /// attached (the frame is dropped, by design).
    fn try_send_frame(&self, frame: ClientFrame) -> bool {
        let guard = match self.frame_tx.lock() {
            Ok(g) => g,
            Err(_) => return false,
        };
        match guard.as_ref() {
            Some(tx) => tx.send(frame).is_ok(),
            None => false,
        }
    }

    fn report_error(&self, err: &SerpentiaError) {
        let listeners: Vec<ErrorListener> = self
            .on_error
            .lock()
            .map(|l| l.clone())
            .unwrap_or_default();
        for listener in listeners {
            listener(err);
        }
    }

    /// Fan a topic message out to the registered listeners, in registration
    /// order. Listeners are cloned out of the lock first so a callback can
    /// freely subscribe/unsubscribe without deadlocking; an unsubscribe
    /// therefore does not cancel a callback already in flight.
    fn dispatch(&self, topic: &str, body: &Value) {
        let listeners: Vec<MessageListener> = self
            .registry
            .lock()
            .ok()
            .and_then(|r| {
                r.topics
                    .get(topic)
                    .map(|e| e.listeners.iter().map(|(_, l)| Arc::clone(l)).collect())
            })
            .unwrap_or_default();
        if listeners.is_empty() {
            debug!(%topic, "message on topic with no listeners");
        }
        for listener in &listeners {
            listener(body);
        }
    }

    fn dispatch_frame(&self, text: &str) {
        match serde_json::from_str::<ServerFrame>(text) {
            Ok(ServerFrame::Message { topic, body }) => self.dispatch(&topic, &body),
            Ok(ServerFrame::Error { message }) => {
                warn!(%message, "server reported protocol error");
                self.report_error(&SerpentiaError::Server { message });
            }
            Err(e) => {
                warn!("failed to deserialize server frame: {e} — raw: {text}");
            }
        }
    }

    /// Transition to Disconnected after the transport loop for `generation`
    /// exits. A loop from a previous connection is a no-op here.
    fn finish_disconnect(&self, generation: u64) {
        if self.generation.load(Ordering::Acquire) != generation {
            debug!("stale transport loop exited; ignoring");
            return;
        }
        self.set_state(ConnectionState::Disconnected);
        if let Ok(mut tx) = self.frame_tx.lock() {
            *tx = None;
        }
        // Keep listener interest; mark every live subscription as needing
        // re-establishment on the next successful connect.
        if let Ok(mut registry) = self.registry.lock() {
            for entry in registry.topics.values_mut() {
                entry.active = false;
            }
        }
        let listeners: Vec<LifecycleListener> = self
            .on_disconnected
            .lock()
            .map(|l| l.clone())
            .unwrap_or_default();
        for listener in listeners {
            listener();
        }
    }
}

impl Drop for ManagerInner {
    fn drop(&mut self) {
        // `Drop` is synchronous, so the only safe action is to abort the
        // transport loop task; there is no executor context to drive a
        // graceful close here.
        if let Ok(mut task) = self.task.lock() {
            if let Some(task) = task.take() {
                task.abort();
            }
        }
    }
}

// ── Subscription handle ─────────────────────────────────────────────

/// Disposer for one listener registration.
///
/// Dropping the handle does NOT unsubscribe; call
/// [`unsubscribe`](SubscriptionHandle::unsubscribe) explicitly. Calling it
/// more than once is a no-op. The handle holds only a weak reference to the
/// manager, so it never keeps a torn-down connection alive.
pub struct SubscriptionHandle {
    inner: Weak<ManagerInner>,
    topic: String,
    id: Uuid,
    disposed: AtomicBool,
}

impl SubscriptionHandle {
    /// Topic this handle is registered on.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Remove this listener. On the last listener for the topic, the
    /// underlying subscription is torn down as well.
    pub fn unsubscribe(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        let teardown = {
            let Ok(mut registry) = inner.registry.lock() else {
                return;
            };
            let Some(entry) = registry.topics.get_mut(&self.topic) else {
                return;
            };
            entry.listeners.retain(|(id, _)| *id != self.id);
            if entry.listeners.is_empty() {
                let was_active = entry.active;
                registry.topics.remove(&self.topic);
                registry.order.retain(|t| t != &self.topic);
                was_active
            } else {
                false
            }
        };
        if teardown {
            debug!(topic = %self.topic, "last listener removed, dropping subscription");
            inner.try_send_frame(ClientFrame::Unsubscribe {
                topic: self.topic.clone(),
            });
        }
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("topic", &self.topic)
            .field("disposed", &self.disposed.load(Ordering::Acquire))
            .finish()
    }
}

// ── Connection manager ──────────────────────────────────────────────

/// Owner of the persistent, topic-multiplexed server connection.
///
/// Cheap to clone; all clones share one connection and one registry.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionManager {
    /// Create a manager with no connection. Register listeners and lifecycle
    /// callbacks freely before calling [`connect`](Self::connect).
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ManagerInner::new()),
        }
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    /// Establish the persistent connection by awaiting `dial` (which carries
    /// the session credential, e.g. a `WebSocketTransport::connect` call).
    ///
    /// Idempotent: if a connection attempt is already in flight or live,
    /// this call returns immediately without dialing. Dial failures are
    /// reported through the error callback and never propagate to the
    /// caller. No retry is attempted — retry/backoff policy belongs to the
    /// caller.
    ///
    /// Must be called from within a tokio runtime (the transport loop is
    /// spawned onto it).
    pub async fn connect<T, F, Fut>(&self, dial: F)
    where
        T: Transport,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        {
            let Ok(mut state) = self.inner.state.lock() else {
                return;
            };
            if *state != ConnectionState::Disconnected {
                debug!(state = ?*state, "connect requested while not disconnected; ignoring");
                return;
            }
            *state = ConnectionState::Connecting;
        }

        match dial().await {
            Ok(transport) => self.attach(transport),
            Err(e) => {
                error!("connection attempt failed: {e}");
                self.inner.set_state(ConnectionState::Disconnected);
                self.inner.report_error(&e);
            }
        }
    }

    /// Wire a freshly dialed transport: spawn the loop, replay queued and
    /// re-established subscriptions in first-interest order, then notify.
    fn attach(&self, transport: impl Transport) {
        let (frame_tx, frame_rx) = mpsc::unbounded_channel::<ClientFrame>();

        let generation = self.inner.generation.fetch_add(1, Ordering::AcqRel) + 1;
        if let Ok(mut tx) = self.inner.frame_tx.lock() {
            *tx = Some(frame_tx);
        }
        self.inner.set_state(ConnectionState::Connected);

        // Drain subscription interest before any caller can publish on the
        // new connection: the frame channel preserves ordering, so every
        // Subscribe frame precedes later Send frames.
        let to_subscribe: Vec<String> = {
            match self.inner.registry.lock() {
                Ok(mut registry) => {
                    let order = registry.order.clone();
                    order
                        .into_iter()
                        .filter(|topic| {
                            registry
                                .topics
                                .get_mut(topic)
                                .map(|e| {
                                    let needed = !e.listeners.is_empty() && !e.active;
                                    if needed {
                                        e.active = true;
                                    }
                                    needed
                                })
                                .unwrap_or(false)
                        })
                        .collect()
                }
                Err(_) => Vec::new(),
            }
        };
        for topic in to_subscribe {
            debug!(%topic, "activating subscription");
            self.inner.try_send_frame(ClientFrame::Subscribe { topic });
        }

        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(transport_loop(transport, frame_rx, inner, generation));
        if let Ok(mut slot) = self.inner.task.lock() {
            if let Some(old) = slot.replace(task) {
                old.abort();
            }
        }

        let listeners: Vec<LifecycleListener> = self
            .inner
            .on_connected
            .lock()
            .map(|l| l.clone())
            .unwrap_or_default();
        for listener in listeners {
            listener();
        }
    }

    /// Tear down the connection. Safe to call when not connected.
    ///
    /// Listener interest survives: the registry re-establishes every topic
    /// with at least one listener on the next successful [`connect`](Self::connect).
    pub fn disconnect(&self) {
        let had_connection = self
            .inner
            .frame_tx
            .lock()
            .map(|mut tx| tx.take().is_some())
            .unwrap_or(false);
        if !had_connection {
            debug!("disconnect requested while not connected; no-op");
            return;
        }
        // Dropping the sender makes the transport loop close the transport
        // and run its disconnect epilogue (state, registry, callbacks).
        self.inner.set_state(ConnectionState::Disconnected);
    }

    // ── State accessors ─────────────────────────────────────────────

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    /// Returns `true` while the connection is believed live.
    pub fn is_connected(&self) -> bool {
        self.inner.state() == ConnectionState::Connected
    }

    // ── Lifecycle callbacks ─────────────────────────────────────────

    /// Run `f` after every successful connection establishment.
    pub fn on_connected(&self, f: impl Fn() + Send + Sync + 'static) {
        if let Ok(mut l) = self.inner.on_connected.lock() {
            l.push(Arc::new(f));
        }
    }

    /// Run `f` after the connection drops, for any reason.
    pub fn on_disconnected(&self, f: impl Fn() + Send + Sync + 'static) {
        if let Ok(mut l) = self.inner.on_disconnected.lock() {
            l.push(Arc::new(f));
        }
    }

    /// Run `f` for dial failures, transport errors and server protocol
    /// errors. Errors never propagate through `connect`/`publish`.
    pub fn on_error(&self, f: impl Fn(&SerpentiaError) + Send + Sync + 'static) {
        if let Ok(mut l) = self.inner.on_error.lock() {
            l.push(Arc::new(f));
        }
    }

    // ── Messaging ───────────────────────────────────────────────────

    /// Publish a JSON body to a destination.
    ///
    /// A silent no-op (not an error) when the connection is not currently
    /// active — callers needing delivery must check
    /// [`is_connected`](Self::is_connected) first.
    pub fn publish(&self, destination: impl Into<String>, body: Value) {
        let destination = destination.into();
        if !self.is_connected() {
            debug!(%destination, "publish while disconnected dropped");
            return;
        }
        if !self.inner.try_send_frame(ClientFrame::Send { destination, body }) {
            debug!("publish dropped: transport loop gone");
        }
    }

    /// Trigger the match start for a room (host action).
    pub fn start_game(&self, room_id: &str) {
        self.publish(topics::start_game(room_id), Value::Null);
    }

    /// Register a listener for `topic`; fan-out is in registration order.
    ///
    /// The first listener on a topic opens the underlying subscription; if
    /// the connection is not up yet, interest is queued and activated
    /// automatically (in request order) once a connection succeeds.
    pub fn subscribe(
        &self,
        topic: impl Into<String>,
        listener: impl Fn(&Value) + Send + Sync + 'static,
    ) -> SubscriptionHandle {
        let topic = topic.into();
        let id = Uuid::new_v4();
        let needs_activation = {
            match self.inner.registry.lock() {
                Ok(mut registry) => {
                    if !registry.topics.contains_key(&topic) {
                        registry.order.push(topic.clone());
                    }
                    let entry = registry.topics.entry(topic.clone()).or_default();
                    entry.listeners.push((id, Arc::new(listener)));
                    let needs = !entry.active;
                    if needs && self.is_connected() {
                        entry.active = true;
                        true
                    } else {
                        false
                    }
                }
                Err(_) => false,
            }
        };
        if needs_activation {
            debug!(%topic, "activating subscription");
            self.inner.try_send_frame(ClientFrame::Subscribe {
                topic: topic.clone(),
            });
        }
        SubscriptionHandle {
            inner: Arc::downgrade(&self.inner),
            topic,
            id,
            disposed: AtomicBool::new(false),
        }
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &self.inner.state())
            .finish()
    }
}

// ── Transport loop ──────────────────────────────────────────────────

/// Background loop multiplexing outgoing frames and incoming messages.
///
/// Exits when:
/// - the frame channel closes ([`ConnectionManager::disconnect`] or manager dropped)
/// - the transport returns `None` (server closed the connection)
/// - a transport error occurs
async fn transport_loop(
    mut transport: impl Transport,
    mut frame_rx: mpsc::UnboundedReceiver<ClientFrame>,
    inner: Arc<ManagerInner>,
    generation: u64,
) {
    debug!(generation, "transport loop started");

    loop {
        tokio::select! {
            // Branch 1: outgoing frame queued by the manager
            frame = frame_rx.recv() => {
                match frame {
                    Some(frame) => {
                        match serde_json::to_string(&frame) {
                            Ok(json) => {
                                if let Err(e) = transport.send(json).await {
                                    error!("transport send error: {e}");
                                    inner.report_error(&e);
                                    break;
                                }
                            }
                            Err(e) => {
                                // Serialization failures here are programming
                                // bugs; don't kill the loop over one frame.
                                error!("failed to serialize client frame: {e}");
                            }
                        }
                    }
                    None => {
                        debug!("frame channel closed, shutting down transport loop");
                        let _ = transport.close().await;
                        break;
                    }
                }
            }

            // Branch 2: incoming frame from the server
            incoming = transport.recv() => {
                match incoming {
                    Some(Ok(text)) => inner.dispatch_frame(&text),
                    Some(Err(e)) => {
                        error!("transport receive error: {e}");
                        inner.report_error(&e);
                        break;
                    }
                    None => {
                        debug!("transport closed by server");
                        break;
                    }
                }
            }
        }
    }

    inner.finish_disconnect(generation);
    debug!(generation, "transport loop exited");
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    /// Scripted transport: yields `incoming` items from `recv()` in order,
    /// records everything sent.
    struct MockTransport {
        incoming: VecDeque<Option<std::result::Result<String, SerpentiaError>>>,
        sent: Arc<StdMutex<Vec<String>>>,
        closed: Arc<AtomicBool>,
    }

    impl MockTransport {
        fn new(
            incoming: Vec<Option<std::result::Result<String, SerpentiaError>>>,
        ) -> (Self, Arc<StdMutex<Vec<String>>>, Arc<AtomicBool>) {
            let sent = Arc::new(StdMutex::new(Vec::new()));
            let closed = Arc::new(AtomicBool::new(false));
            let transport = Self {
                incoming: VecDeque::from(incoming),
                sent: Arc::clone(&sent),
                closed: Arc::clone(&closed),
            };
            (transport, sent, closed)
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn send(&mut self, frame: String) -> std::result::Result<(), SerpentiaError> {
            self.sent.lock().unwrap().push(frame);
            Ok(())
        }

        async fn recv(&mut self) -> Option<std::result::Result<String, SerpentiaError>> {
            if let Some(item) = self.incoming.pop_front() {
                item
            } else {
                // Scripted input exhausted — park until shutdown.
                std::future::pending().await
            }
        }

        async fn close(&mut self) -> std::result::Result<(), SerpentiaError> {
            self.closed.store(true, Ordering::Relaxed);
            Ok(())
        }
    }

    fn message_json(topic: &str, body: Value) -> String {
        serde_json::to_string(&ServerFrame::Message {
            topic: topic.into(),
            body,
        })
        .unwrap()
    }

    async fn settle() {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }

    fn sent_frames(sent: &Arc<StdMutex<Vec<String>>>) -> Vec<ClientFrame> {
        sent.lock()
            .unwrap()
            .iter()
            .map(|s| serde_json::from_str(s).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn queued_subscriptions_activate_in_request_order() {
        let manager = ConnectionManager::new();
        let _a = manager.subscribe("/topic/game/alpha", |_| {});
        let _b = manager.subscribe("/topic/lobby", |_| {});
        let _c = manager.subscribe("/topic/game/beta", |_| {});

        let (transport, sent, _closed) = MockTransport::new(vec![]);
        manager.connect(|| async { Ok(transport) }).await;
        settle().await;

        let frames = sent_frames(&sent);
        let topics: Vec<String> = frames
            .iter()
            .map(|f| match f {
                ClientFrame::Subscribe { topic } => topic.clone(),
                other => panic!("expected Subscribe, got {other:?}"),
            })
            .collect();
        assert_eq!(topics, vec!["/topic/game/alpha", "/topic/lobby", "/topic/game/beta"]);
    }

    #[tokio::test]
    async fn second_listener_does_not_resubscribe() {
        let manager = ConnectionManager::new();
        let (transport, sent, _closed) = MockTransport::new(vec![]);
        manager.connect(|| async { Ok(transport) }).await;

        let _a = manager.subscribe("/topic/lobby", |_| {});
        let _b = manager.subscribe("/topic/lobby", |_| {});
        settle().await;

        let frames = sent_frames(&sent);
        let subs = frames
            .iter()
            .filter(|f| matches!(f, ClientFrame::Subscribe { .. }))
            .count();
        assert_eq!(subs, 1, "one underlying subscription per topic");
    }

    #[tokio::test]
    async fn fan_out_reaches_all_listeners_in_registration_order() {
        let manager = ConnectionManager::new();
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let seen_a = Arc::clone(&seen);
        let seen_b = Arc::clone(&seen);
        let _a = manager.subscribe("/topic/lobby", move |_| {
            seen_a.lock().unwrap().push("a");
        });
        let _b = manager.subscribe("/topic/lobby", move |_| {
            seen_b.lock().unwrap().push("b");
        });

        let (transport, _sent, _closed) = MockTransport::new(vec![Some(Ok(message_json(
            "/topic/lobby",
            serde_json::json!({"type": "CLEARED"}),
        )))]);
        manager.connect(|| async { Ok(transport) }).await;
        settle().await;

        assert_eq!(*seen.lock().unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn unsubscribe_twice_is_noop_and_last_listener_tears_down() {
        let manager = ConnectionManager::new();
        let (transport, sent, _closed) = MockTransport::new(vec![]);
        manager.connect(|| async { Ok(transport) }).await;

        let a = manager.subscribe("/topic/lobby", |_| {});
        let b = manager.subscribe("/topic/lobby", |_| {});
        settle().await;

        a.unsubscribe();
        a.unsubscribe(); // re-entrant disposal is a no-op
        settle().await;
        let frames = sent_frames(&sent);
        assert!(
            !frames.iter().any(|f| matches!(f, ClientFrame::Unsubscribe { .. })),
            "topic still has a listener, no teardown yet"
        );

        b.unsubscribe();
        settle().await;
        let frames = sent_frames(&sent);
        let unsubs = frames
            .iter()
            .filter(|f| matches!(f, ClientFrame::Unsubscribe { .. }))
            .count();
        assert_eq!(unsubs, 1);
    }

    #[tokio::test]
    async fn publish_while_disconnected_is_silent_noop() {
        let manager = ConnectionManager::new();
        manager.publish("/app/room/r1/move", serde_json::json!({"player": "alice"}));
        assert!(!manager.is_connected());

        // Now connect and verify nothing from before was queued.
        let (transport, sent, _closed) = MockTransport::new(vec![]);
        manager.connect(|| async { Ok(transport) }).await;
        settle().await;
        assert!(sent_frames(&sent).is_empty());
    }

    #[tokio::test]
    async fn resubscribes_after_reconnect() {
        let manager = ConnectionManager::new();
        let _sub = manager.subscribe("/topic/game/r1", |_| {});

        // First connection drops when the server closes the transport.
        let (transport, _sent, _closed) = MockTransport::new(vec![None]);
        manager.connect(|| async { Ok(transport) }).await;
        settle().await;
        assert!(!manager.is_connected());

        // Reconnect: interest is re-established transparently.
        let (transport, sent, _closed) = MockTransport::new(vec![]);
        manager.connect(|| async { Ok(transport) }).await;
        settle().await;
        assert!(manager.is_connected());
        let frames = sent_frames(&sent);
        assert!(frames.iter().any(
            |f| matches!(f, ClientFrame::Subscribe { topic } if topic == "/topic/game/r1")
        ));
    }

    #[tokio::test]
    async fn dial_failure_reports_error_and_stays_disconnected() {
        let manager = ConnectionManager::new();
        let errors = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&errors);
        manager.on_error(move |e| sink.lock().unwrap().push(e.to_string()));

        manager
            .connect(|| async {
                Err::<MockTransport, _>(SerpentiaError::TransportSend("refused".into()))
            })
            .await;

        assert!(!manager.is_connected());
        assert_eq!(errors.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn connect_is_idempotent_while_connected() {
        let manager = ConnectionManager::new();
        let (transport, _sent, _closed) = MockTransport::new(vec![]);
        manager.connect(|| async { Ok(transport) }).await;
        settle().await;

        let dialed = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&dialed);
        manager
            .connect(move || async move {
                flag.store(true, Ordering::Release);
                Ok(MockTransport::new(vec![]).0)
            })
            .await;
        assert!(!dialed.load(Ordering::Acquire), "second dial must not run");
    }

    #[tokio::test]
    async fn disconnect_is_safe_when_not_connected() {
        let manager = ConnectionManager::new();
        manager.disconnect();
        manager.disconnect();
        assert!(!manager.is_connected());
    }

    #[tokio::test]
    async fn disconnect_closes_transport_and_notifies() {
        let manager = ConnectionManager::new();
        let dropped = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&dropped);
        manager.on_disconnected(move || flag.store(true, Ordering::Release));

        let (transport, _sent, closed) = MockTransport::new(vec![]);
        manager.connect(|| async { Ok(transport) }).await;
        settle().await;

        manager.disconnect();
        settle().await;

        assert!(!manager.is_connected());
        assert!(closed.load(Ordering::Relaxed), "transport close() called");
        assert!(dropped.load(Ordering::Acquire), "on_disconnected fired");
    }

    #[tokio::test]
    async fn malformed_server_frame_does_not_kill_loop() {
        let manager = ConnectionManager::new();
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _sub = manager.subscribe("/topic/lobby", move |body| {
            sink.lock().unwrap().push(body.clone());
        });

        let (transport, _sent, _closed) = MockTransport::new(vec![
            Some(Ok("{not json".into())),
            Some(Ok(message_json(
                "/topic/lobby",
                serde_json::json!({"type": "CLEARED"}),
            ))),
        ]);
        manager.connect(|| async { Ok(transport) }).await;
        settle().await;

        assert!(manager.is_connected());
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn server_error_frame_is_reported_not_fatal() {
        let manager = ConnectionManager::new();
        let errors = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&errors);
        manager.on_error(move |e| sink.lock().unwrap().push(e.to_string()));

        let (transport, _sent, _closed) = MockTransport::new(vec![Some(Ok(
            serde_json::to_string(&ServerFrame::Error {
                message: "bad destination".into(),
            })
            .unwrap(),
        ))]);
        manager.connect(|| async { Ok(transport) }).await;
        settle().await;

        assert!(manager.is_connected());
        assert_eq!(errors.lock().unwrap().len(), 1);
    }
}
