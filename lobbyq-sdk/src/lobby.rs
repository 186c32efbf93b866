//! The lobby facade: the one surface presentation code talks to.
//!
//! A [`LobbyClient`] owns the session, the subscription registry, the
//! typing aggregator and the unread reconciler, and runs one background
//! task that is the sole writer of all of them: it selects over session
//! events, the presence sweep tick, and the unread fallback poll. The
//! same task is the supervisory reconnect loop — the session itself never
//! retries; this loop reopens with exponential backoff and replays the
//! registry's current topic into every fresh session.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::api::ApiClient;
use crate::dispatch::Dispatcher;
use crate::error::{ApiError, SendMessageError};
use crate::event::{Alert, SessionEvent, TypingUser, UpdateEntry};
use crate::frame::{ChatMessage, LobbyId};
use crate::presence::{SWEEP_INTERVAL, TypingThrottle, TypingTracker};
use crate::registry::SubscriptionRegistry;
use crate::session::{self, ConnectConfig, Identity, SessionHandle, SessionState};
use crate::unread::{UnreadCounter, UnreadSource};

/// Cadence of the unread fallback pull. It only fires a request while the
/// push channel is not ready.
pub const UNREAD_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Backoff for the supervisory reconnect loop.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LobbyConfig {
    pub connect: ConnectConfig,
    /// Base URL of the request/response fallback API.
    pub api_base: String,
    /// Bearer token for the fallback API, if it wants one.
    pub api_token: Option<String>,
    pub reconnect: ReconnectPolicy,
}

/// Everything the delivery layer knows about the active lobby. All writes
/// happen on the facade task; readers take cheap snapshots.
pub struct LobbyState {
    pub status: SessionState,
    pub authenticated: bool,
    /// Chat log for the active topic, newest first, by arrival order.
    pub messages: Vec<ChatMessage>,
    /// Non-chat events for the active topic, newest first.
    pub updates: Vec<UpdateEntry>,
    pub typing: TypingTracker,
    pub unread: UnreadCounter,
}

impl LobbyState {
    pub fn new() -> Self {
        Self {
            status: SessionState::Disconnected,
            authenticated: false,
            messages: Vec::new(),
            updates: Vec::new(),
            typing: TypingTracker::new(),
            unread: UnreadCounter::new(),
        }
    }

    /// Switching topics restarts the per-topic state. The unread counter
    /// is account-scoped and survives.
    fn clear_topic(&mut self) {
        self.messages.clear();
        self.updates.clear();
        self.typing.clear();
    }
}

impl Default for LobbyState {
    fn default() -> Self {
        Self::new()
    }
}

pub struct LobbyClient {
    identity: Identity,
    state: Arc<Mutex<LobbyState>>,
    registry: Arc<Mutex<SubscriptionRegistry>>,
    session: Arc<Mutex<Option<SessionHandle>>>,
    api: ApiClient,
    throttle: Mutex<TypingThrottle>,
    shutdown_tx: mpsc::Sender<()>,
    worker: Option<JoinHandle<()>>,
}

impl LobbyClient {
    /// Spawn the facade for an already-authenticated identity. Returns the
    /// client plus the alert (toast) stream.
    ///
    /// Connection problems do not fail this call; they show up as
    /// `connection_status()` staying away from `Ready` while the
    /// supervisory loop retries.
    pub fn spawn(config: LobbyConfig, identity: Identity) -> (Self, mpsc::Receiver<Alert>) {
        let (alert_tx, alert_rx) = mpsc::channel(64);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let state = Arc::new(Mutex::new(LobbyState::new()));
        let registry = Arc::new(Mutex::new(SubscriptionRegistry::new()));
        let session = Arc::new(Mutex::new(None));

        let mut api = ApiClient::new(&config.api_base);
        if let Some(token) = &config.api_token {
            api = api.with_token(token);
        }

        let shared = Shared {
            identity: identity.clone(),
            config,
            state: state.clone(),
            registry: registry.clone(),
            session: session.clone(),
            api: api.clone(),
            dispatcher: Dispatcher::new(identity.clone(), alert_tx),
        };
        let worker = tokio::spawn(run_facade(shared, shutdown_rx));

        (
            Self {
                identity,
                state,
                registry,
                session,
                api,
                throttle: Mutex::new(TypingThrottle::new()),
                shutdown_tx,
                worker: Some(worker),
            },
            alert_rx,
        )
    }

    // ── Snapshots ──

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn connection_status(&self) -> SessionState {
        self.state.lock().status
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.lock().authenticated
    }

    pub fn current_topic(&self) -> Option<LobbyId> {
        self.registry.lock().current_topic()
    }

    /// Chat log for the active topic, newest first.
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.state.lock().messages.clone()
    }

    /// Non-chat update log for the active topic, newest first.
    pub fn lobby_updates(&self) -> Vec<UpdateEntry> {
        self.state.lock().updates.clone()
    }

    /// Members typing right now, as of the last sweep or refresh.
    pub fn typing_users(&self) -> Vec<TypingUser> {
        self.state.lock().typing.typists()
    }

    pub fn unread_count(&self) -> u32 {
        self.state.lock().unread.count()
    }

    // ── Actions ──

    /// Switch the active topic. Clears per-topic state, unsubscribes the
    /// old topic and subscribes the new one; both are idempotent, and if
    /// the connection is down the registry replays on reconnect.
    pub async fn switch_topic(&self, lobby_id: LobbyId) {
        let old = {
            let mut registry = self.registry.lock();
            if registry.is_subscribed(lobby_id) {
                return;
            }
            registry.subscribe(lobby_id)
        };
        self.state.lock().clear_topic();

        let handle = self.session.lock().clone();
        if let Some(handle) = handle {
            if let Some(old) = old {
                let _ = handle.unsubscribe(old).await;
            }
            if handle.subscribe(lobby_id).await.is_err() {
                tracing::debug!(lobby_id, "subscribe deferred to reconnect");
            }
        }
    }

    /// Leave the active topic, clearing per-topic state. Best-effort on
    /// the wire.
    pub async fn leave_topic(&self) {
        let left = {
            let mut registry = self.registry.lock();
            let Some(current) = registry.current_topic() else {
                return;
            };
            registry.unsubscribe(current);
            current
        };
        self.state.lock().clear_topic();

        let handle = self.session.lock().clone();
        if let Some(handle) = handle {
            let _ = handle.unsubscribe(left).await;
        }
    }

    /// Send a chat message to the active topic.
    ///
    /// Always goes through the request/response path — that is the
    /// durability path for the sender's own message, and it works whether
    /// or not the push channel is up. The push channel's job is fanning
    /// the persisted message back out to subscribers.
    pub async fn send_message(&self, text: &str) -> Result<ChatMessage, SendMessageError> {
        let topic = self
            .registry
            .lock()
            .current_topic()
            .ok_or(SendMessageError::NoTopic)?;
        let message = self.api.post_message(topic, text).await?;
        Ok(message)
    }

    /// Signal that the local user is typing. Fire-and-forget: throttled
    /// client-side, dropped while disconnected, failures logged and never
    /// surfaced.
    pub async fn send_typing_ping(&self) {
        let Some(topic) = self.registry.lock().current_topic() else {
            return;
        };
        // The throttle window restarts on every call, sent or not.
        if !self.throttle.lock().should_send(Instant::now()) {
            return;
        }
        let handle = self.session.lock().clone();
        match handle {
            Some(handle) => {
                if let Err(e) = handle.typing(topic).await {
                    tracing::debug!(error = %e, "typing ping not sent");
                }
            }
            None => tracing::debug!("typing ping skipped while disconnected"),
        }
    }

    /// Force one pull-based reconciliation of the unread count.
    /// The fetched value overwrites, exactly like a push.
    pub async fn reconcile_unread(&self) -> Result<u32, ApiError> {
        let count = self.api.fetch_unread().await?;
        self.state.lock().unread.on_push(count);
        Ok(count)
    }

    /// Mark one notification read: optimistic local decrement (clamped at
    /// zero) plus the PATCH confirmation. The counter does no rollback on
    /// its own, so this method, as the caller, restores the count when the
    /// confirmation fails.
    pub async fn mark_notification_read(&self, notification_id: u64) -> Result<(), ApiError> {
        self.state.lock().unread.on_mark_one_read();
        match self.api.mark_read(notification_id).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.state.lock().unread.on_increment_local();
                Err(e)
            }
        }
    }

    /// Mark everything read; restores the previous count if the
    /// confirmation fails.
    pub async fn mark_all_notifications_read(&self) -> Result<(), ApiError> {
        let before = {
            let mut state = self.state.lock();
            let before = state.unread.count();
            state.unread.on_mark_all_read();
            before
        };
        match self.api.mark_all_read().await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.state.lock().unread.on_push(before);
                Err(e)
            }
        }
    }

    /// Ordered teardown: stop the facade task (the sweep and poll timers
    /// die with it), then close the session, which attempts its
    /// best-effort unsubscribe before dropping the transport.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(()).await;
        if let Some(worker) = self.worker.take() {
            let _ = worker.await;
        }
    }
}

impl Drop for LobbyClient {
    fn drop(&mut self) {
        // Backstop for callers that skip shutdown(); the orderly path is
        // shutdown().
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
    }
}

struct Shared {
    identity: Identity,
    config: LobbyConfig,
    state: Arc<Mutex<LobbyState>>,
    registry: Arc<Mutex<SubscriptionRegistry>>,
    session: Arc<Mutex<Option<SessionHandle>>>,
    api: ApiClient,
    dispatcher: Dispatcher,
}

impl Shared {
    fn set_status(&self, status: SessionState) {
        self.state.lock().status = status;
    }

    /// The pull path is a fallback, not a second live source: skip it
    /// whenever the push channel is ready.
    async fn poll_unread_if_stale(&self) {
        if self.state.lock().status == SessionState::Ready {
            return;
        }
        match self.api.fetch_unread().await {
            Ok(count) => self.state.lock().unread.on_push(count),
            Err(e) => tracing::debug!(error = %e, "unread fallback fetch failed"),
        }
    }
}

async fn run_facade(shared: Shared, mut shutdown_rx: mpsc::Receiver<()>) {
    let mut delay = shared.config.reconnect.initial_delay;
    let mut poll = tokio::time::interval(UNREAD_POLL_INTERVAL);
    poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        shared.set_status(SessionState::Connecting);
        let conn = tokio::select! {
            result = session::establish_connection(&shared.config.connect) => result,
            _ = shutdown_rx.recv() => {
                shared.set_status(SessionState::Disconnected);
                return;
            }
        };
        let conn = match conn {
            Ok(conn) => {
                delay = shared.config.reconnect.initial_delay;
                conn
            }
            Err(e) => {
                tracing::warn!(error = %e, delay_secs = delay.as_secs(), "connect failed, retrying");
                shared.set_status(SessionState::Disconnected);
                if !backoff_wait(&shared, &mut poll, &mut shutdown_rx, delay).await {
                    return;
                }
                delay = next_delay(delay, &shared.config.reconnect);
                continue;
            }
        };

        let (handle, mut events) = session::connect_with_stream(conn, shared.identity.clone());
        *shared.session.lock() = Some(handle.clone());
        shared.set_status(SessionState::AwaitingAuthAck);

        // Replay the registry's topic into the fresh session. If this
        // beats the auth ack it is buffered and flushed, which is fine.
        let replay = shared.registry.lock().current_topic();
        if let Some(topic) = replay {
            let _ = handle.subscribe(topic).await;
        }

        let mut sweep = tokio::time::interval(SWEEP_INTERVAL);
        let mut closing = false;
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(SessionEvent::Connected) => {
                        shared.set_status(SessionState::AwaitingAuthAck);
                    }
                    Some(SessionEvent::Ready) => {
                        let mut state = shared.state.lock();
                        state.status = SessionState::Ready;
                        state.authenticated = true;
                    }
                    Some(SessionEvent::Frame(frame)) => {
                        let mut state = shared.state.lock();
                        shared.dispatcher.dispatch(frame, &mut state);
                    }
                    Some(SessionEvent::Disconnected { reason }) => {
                        tracing::info!(%reason, "session disconnected");
                        break;
                    }
                    None => break,
                },
                _ = sweep.tick() => {
                    shared.state.lock().typing.sweep(Instant::now());
                }
                _ = poll.tick() => {
                    shared.poll_unread_if_stale().await;
                }
                _ = shutdown_rx.recv() => {
                    closing = true;
                    shared.set_status(SessionState::Closing);
                    let _ = handle.close().await;
                    // Give the session a moment to run its best-effort
                    // unsubscribe and confirm the close.
                    let drain = async {
                        while let Some(event) = events.recv().await {
                            if matches!(event, SessionEvent::Disconnected { .. }) {
                                break;
                            }
                        }
                    };
                    let _ = tokio::time::timeout(Duration::from_secs(5), drain).await;
                    break;
                }
            }
        }

        shared.session.lock().take();
        {
            // Presence is connection-scoped ephemera and the sweep stops
            // with the session; don't let stale typists outlive it.
            let mut state = shared.state.lock();
            state.status = SessionState::Disconnected;
            state.authenticated = false;
            state.typing.clear();
        }
        if closing {
            return;
        }

        tracing::info!(delay_secs = delay.as_secs(), "disconnected, will reconnect");
        if !backoff_wait(&shared, &mut poll, &mut shutdown_rx, delay).await {
            return;
        }
        delay = next_delay(delay, &shared.config.reconnect);
    }
}

/// Sleep out a backoff delay while keeping the unread fallback poll alive.
/// Returns false when shutdown was requested.
async fn backoff_wait(
    shared: &Shared,
    poll: &mut tokio::time::Interval,
    shutdown_rx: &mut mpsc::Receiver<()>,
    delay: Duration,
) -> bool {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return true,
            _ = poll.tick() => shared.poll_unread_if_stale().await,
            _ = shutdown_rx.recv() => return false,
        }
    }
}

fn next_delay(delay: Duration, policy: &ReconnectPolicy) -> Duration {
    let jitter = time_jitter(delay.as_millis() as u64 / 4);
    Duration::from_millis(
        (((delay.as_millis() as f64) * policy.backoff_factor) as u64 + jitter)
            .min(policy.max_delay.as_millis() as u64),
    )
}

/// Cheap jitter without a rand dependency: sub-second clock noise.
fn time_jitter(max: u64) -> u64 {
    if max == 0 {
        return 0;
    }
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos() as u64;
    nanos % max
}
