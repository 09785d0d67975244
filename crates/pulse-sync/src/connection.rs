//! # Connection Manager
//!
//! Owns the single link to the server: connect, acknowledged requests,
//! server pushes, liveness probing, token refresh and reconnection.
//!
//! ## State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   ┌──────────────┐  connect()   ┌────────────┐   link open   ┌────────┐│
//! │   │ Disconnected │ ───────────► │ Connecting │ ────────────► │Connected│
//! │   └──────────────┘              └─────┬──────┘               └───┬────┘│
//! │          ▲                            │ failure / timeout        │     │
//! │          │                            ▼                          │     │
//! │          │                      ┌───────────┐                    │     │
//! │          │   reconnect timer    │   Error   │                    │     │
//! │          │ ◄─────────────────── └───────────┘                    │     │
//! │          │                                                       │     │
//! │          └────────────── link closed (server / error) ───────────┘     │
//! │                          └─► reconnect timer unless client-initiated   │
//! │                                                                         │
//! │   destroy(): any state ──► Disconnected (terminal)                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Background Tasks
//! ```text
//! reader     ── drains TransportEvents, resolves acks, dispatches pushes
//! ping       ── Envelope::Ping every ping interval, Pong sets latency
//! health     ── `health:check` request every check interval
//! reconnect  ── one pending retry timer
//! ```
//! All four are aborted by `disconnect()` and `destroy()`. Long-running
//! tasks hold a weak reference, so dropping every handle stops them too.
//!
//! ## Stale Links
//! Every `disconnect()` and `destroy()` bumps an epoch. A connect attempt
//! or reader that started under an older epoch discards its result instead
//! of touching state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

use backoff::backoff::Backoff;
use chrono::Utc;
use futures_util::future::BoxFuture;
use pulse_core::protocol::{EventRequest, Heartbeat, TokenUpdate, HEALTH_CHECK_EVENT};
use pulse_core::validation::validate_event_name;
use pulse_core::{ConnectionMetrics, ConnectionState, ConnectionStatus, Envelope, EventResponse};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};
use url::Url;
use uuid::Uuid;

use crate::auth::AuthProvider;
use crate::config::ClientConfig;
use crate::error::{AuthErrorKind, ConnectionErrorKind, SyncError, SyncResult};
use crate::events::{names, EventManager, Subscription};
use crate::reconnect::ReconnectStrategy;
use crate::tasks::{
    TaskSet, HEALTH_TASK, PING_TASK, READER_TASK, RECONNECT_TASK, TOKEN_REFRESH_TASK,
};
use crate::transport::{ConnectRequest, DisconnectReason, Transport, TransportEvent, TransportLink};
use crate::util::{lock, millis, read, write};

/// Who started a connect attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    /// `connect()` called by the application.
    Explicit,
    /// Fired by the reconnect timer.
    Scheduled,
}

struct Inner {
    config: ClientConfig,
    endpoint: Url,
    transport: Arc<dyn Transport>,
    auth: Arc<dyn AuthProvider>,
    events: EventManager,
    /// Raw server pushes, separate from lifecycle events.
    pushes: EventManager,
    state: RwLock<ConnectionState>,
    /// `connection_uptime_ms` is derived, never stored.
    counters: Mutex<ConnectionMetrics>,
    connected_at: Mutex<Option<Instant>>,
    outgoing: Mutex<Option<mpsc::Sender<Envelope>>>,
    pending: Mutex<HashMap<String, oneshot::Sender<EventResponse>>>,
    strategy: Mutex<ReconnectStrategy>,
    tasks: TaskSet,
    epoch: AtomicU64,
    exhausted_reported: AtomicBool,
    destroyed: AtomicBool,
}

/// Cheaply clonable handle; clones share one connection.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("endpoint", &self.inner.endpoint.as_str())
            .field("transport", &self.inner.transport.name())
            .field("status", &self.state().status)
            .finish()
    }
}

impl ConnectionManager {
    pub fn new(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        auth: Arc<dyn AuthProvider>,
        events: EventManager,
    ) -> SyncResult<Self> {
        let endpoint = config.endpoint()?;
        let strategy =
            ReconnectStrategy::new(config.reconnect_interval(), config.reconnect.max_attempts);
        let pushes = EventManager::new(config.max_listeners);

        Ok(ConnectionManager {
            inner: Arc::new(Inner {
                config,
                endpoint,
                transport,
                auth,
                events,
                pushes,
                state: RwLock::new(ConnectionState::default()),
                counters: Mutex::new(ConnectionMetrics::default()),
                connected_at: Mutex::new(None),
                outgoing: Mutex::new(None),
                pending: Mutex::new(HashMap::new()),
                strategy: Mutex::new(strategy),
                tasks: TaskSet::new(),
                epoch: AtomicU64::new(0),
                exhausted_reported: AtomicBool::new(false),
                destroyed: AtomicBool::new(false),
            }),
        })
    }

    fn downgrade(&self) -> Weak<Inner> {
        Arc::downgrade(&self.inner)
    }

    fn upgrade(weak: &Weak<Inner>) -> Option<Self> {
        weak.upgrade().map(|inner| ConnectionManager { inner })
    }

    // =========================================================================
    // Connect / Disconnect
    // =========================================================================

    /// Opens the link.
    ///
    /// ## When This Fails
    /// - No token from the [`AuthProvider`]: `Auth(Invalid)`, no retry.
    ///   Attempts fired by the reconnect timer keep retrying instead.
    /// - Transport error or timeout: a retry is scheduled when
    ///   `auto_reconnect` is on and attempts remain
    /// - Another attempt is already in flight
    ///
    /// Connecting while connected is a no-op.
    pub fn connect(&self) -> BoxFuture<'static, SyncResult<()>> {
        self.connect_with(Attempt::Explicit)
    }

    fn connect_with(&self, attempt: Attempt) -> BoxFuture<'static, SyncResult<()>> {
        Box::pin(self.clone().connect_inner(attempt))
    }

    async fn connect_inner(self, attempt: Attempt) -> SyncResult<()> {
        if self.is_destroyed() {
            return Err(SyncError::Destroyed);
        }

        {
            let mut state = write(&self.inner.state);
            match state.status {
                ConnectionStatus::Connected => return Ok(()),
                ConnectionStatus::Connecting => {
                    return Err(SyncError::connection_failed(
                        "connection attempt already in progress",
                    ))
                }
                ConnectionStatus::Disconnected | ConnectionStatus::Error => {
                    state.status = ConnectionStatus::Connecting;
                    state.error = None;
                }
            }
        }

        // An explicit attempt supersedes a pending retry.
        self.inner.tasks.cancel(RECONNECT_TASK);
        let epoch = self.inner.epoch.load(Ordering::SeqCst);
        self.emit_status(None);

        let Some(token) = self.inner.auth.get_token().await else {
            let err = SyncError::auth(AuthErrorKind::Invalid, "no authentication token available");
            if self.is_current(epoch) {
                warn!(?attempt, "Connect aborted: no authentication token");
                self.record_connect_failure(&err);
                // The token may be back by the next retry.
                if attempt == Attempt::Scheduled {
                    self.schedule_reconnect();
                }
            }
            return Err(err);
        };

        let request = ConnectRequest {
            endpoint: self.inner.endpoint.clone(),
            token,
            transports: self.inner.config.connection.transports.clone(),
        };

        info!(
            endpoint = %self.inner.endpoint,
            transport = self.inner.transport.name(),
            "Connecting"
        );

        let connect_timeout = self.inner.config.timeout();
        let result = match timeout(connect_timeout, self.inner.transport.connect(request)).await {
            Ok(result) => result,
            Err(_) => Err(SyncError::timeout(format!(
                "connect timed out after {}ms",
                millis(connect_timeout)
            ))),
        };

        match result {
            Ok(link) => {
                if !self.is_current(epoch) {
                    debug!("Connect superseded by disconnect, dropping link");
                    return Err(SyncError::connection_lost("disconnected while connecting"));
                }
                self.install(link, epoch);
                Ok(())
            }
            Err(err) => {
                self.handle_connect_failure(&err, epoch, attempt);
                Err(err)
            }
        }
    }

    fn install(&self, link: TransportLink, epoch: u64) {
        let TransportLink { outgoing, incoming } = link;

        *lock(&self.inner.outgoing) = Some(outgoing);
        lock(&self.inner.strategy).reset();
        self.inner.exhausted_reported.store(false, Ordering::SeqCst);
        *lock(&self.inner.connected_at) = Some(Instant::now());
        self.transition(ConnectionStatus::Connected, None);

        let weak = self.downgrade();
        self.inner
            .tasks
            .spawn(READER_TASK, read_loop(weak, incoming, epoch));
        self.start_health_monitoring();

        info!(endpoint = %self.inner.endpoint, "Connected");
        self.emit_status(None);
    }

    fn handle_connect_failure(&self, err: &SyncError, epoch: u64, attempt: Attempt) {
        if !self.is_current(epoch) {
            return;
        }

        warn!(error = %err, ?attempt, "Connection attempt failed");
        self.record_connect_failure(err);

        // Rejected credentials won't get better by retrying.
        if matches!(err, SyncError::Auth { .. }) {
            if attempt == Attempt::Scheduled {
                self.give_up(err);
            }
            return;
        }
        self.schedule_reconnect();
    }

    fn record_connect_failure(&self, err: &SyncError) {
        self.transition(ConnectionStatus::Error, Some(err.to_string()));
        self.count_error();
        self.emit_error(err, false);
        self.emit_status(None);
    }

    /// Ends the retry chain. The fatal error is emitted once per chain.
    fn give_up(&self, err: &SyncError) {
        if self.inner.exhausted_reported.swap(true, Ordering::SeqCst) {
            return;
        }
        error!(error = %err, "Giving up on reconnecting");
        self.transition(ConnectionStatus::Error, Some(err.to_string()));
        self.emit_error(err, true);
    }

    /// Closes the link from the client side. Never triggers a reconnect.
    ///
    /// Stops health monitoring, cancels any pending retry and fails
    /// in-flight requests. Idempotent.
    pub fn disconnect(&self) {
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        self.inner.tasks.cancel_all();
        let had_link = lock(&self.inner.outgoing).take().is_some();
        self.fail_pending();
        *lock(&self.inner.connected_at) = None;
        lock(&self.inner.strategy).reset();
        self.inner.exhausted_reported.store(false, Ordering::SeqCst);

        let previous = {
            let mut state = write(&self.inner.state);
            let previous = state.status;
            state.status = ConnectionStatus::Disconnected;
            state.error = None;
            state.reconnect_attempts = 0;
            previous
        };

        if previous != ConnectionStatus::Disconnected {
            info!(had_link, "Disconnected");
            self.emit_status(Some(&DisconnectReason::ClientInitiated.to_string()));
        }
    }

    fn handle_link_closed(&self, reason: DisconnectReason, epoch: u64) {
        if !self.is_current(epoch) {
            return;
        }

        self.stop_health_monitoring();
        lock(&self.inner.outgoing).take();
        self.fail_pending();
        *lock(&self.inner.connected_at) = None;

        let error = match reason {
            DisconnectReason::ClientInitiated => None,
            _ => Some(reason.to_string()),
        };
        warn!(%reason, "Connection closed");
        self.transition(ConnectionStatus::Disconnected, error);
        self.emit_status(Some(&reason.to_string()));

        if reason != DisconnectReason::ClientInitiated {
            self.schedule_reconnect();
        }
    }

    // =========================================================================
    // Reconnection
    // =========================================================================

    fn schedule_reconnect(&self) {
        if self.is_destroyed() || !self.inner.config.reconnect.auto_reconnect {
            return;
        }

        let next = {
            let mut strategy = lock(&self.inner.strategy);
            strategy.next_backoff().map(|delay| (delay, strategy.attempts()))
        };

        let Some((delay, attempt)) = next else {
            let max_attempts = lock(&self.inner.strategy).max_attempts();
            self.give_up(&SyncError::connection_failed(format!(
                "maximum reconnection attempts ({}) reached",
                max_attempts
            )));
            return;
        };

        write(&self.inner.state).reconnect_attempts = attempt;
        let delay_ms = millis(delay);
        info!(attempt, delay_ms, "Scheduling reconnect");
        self.inner.events.emit(
            names::CONNECTION_RECONNECTING,
            &json!({ "attempt": attempt, "delayMs": delay_ms }),
        );

        let weak = self.downgrade();
        self.inner.tasks.spawn(RECONNECT_TASK, async move {
            tokio::time::sleep(delay).await;
            let Some(manager) = ConnectionManager::upgrade(&weak) else {
                return;
            };
            // The attempt may schedule the next retry under the same name.
            manager.inner.tasks.forget(RECONNECT_TASK);
            if let Err(e) = manager.connect_with(Attempt::Scheduled).await {
                debug!(error = %e, attempt, "Reconnect attempt failed");
            }
        });
    }

    // =========================================================================
    // Requests
    // =========================================================================

    /// Sends `event` and waits for the correlated acknowledgement.
    ///
    /// A negative acknowledgement still resolves `Ok`; inspect
    /// [`EventResponse::success`]. Timeouts don't trigger reconnection.
    pub async fn send_event(&self, event: &str, payload: Value) -> SyncResult<EventResponse> {
        if self.is_destroyed() {
            return Err(SyncError::Destroyed);
        }
        validate_event_name(event)?;

        let sender = self.live_sender()?;
        let id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        lock(&self.inner.pending).insert(id.clone(), tx);

        let envelope = Envelope::Event(EventRequest {
            id: id.clone(),
            name: event.to_string(),
            payload,
        });
        if sender.send(envelope).await.is_err() {
            lock(&self.inner.pending).remove(&id);
            return Err(SyncError::connection_lost(format!(
                "link closed before '{}' was sent",
                event
            )));
        }
        lock(&self.inner.counters).messages_sent += 1;
        debug!(event, id = %id, "Request sent");

        let request_timeout = self.inner.config.timeout();
        match timeout(request_timeout, rx).await {
            Ok(Ok(response)) => {
                {
                    let mut counters = lock(&self.inner.counters);
                    counters.messages_received += 1;
                    if !response.success {
                        counters.error_count += 1;
                    }
                }
                if !response.success {
                    debug!(event, code = ?response.error_code(), "Request rejected");
                }
                Ok(response)
            }
            Ok(Err(_)) => Err(SyncError::connection_lost(format!(
                "connection closed before '{}' was acknowledged",
                event
            ))),
            Err(_) => {
                lock(&self.inner.pending).remove(&id);
                self.count_error();
                warn!(event, id = %id, "Request timed out");
                Err(SyncError::timeout(format!(
                    "request '{}' timed out after {}ms",
                    event,
                    millis(request_timeout)
                )))
            }
        }
    }

    /// Registers a listener for server pushes named `event`.
    pub fn subscribe<F>(&self, event: &str, callback: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.inner.pushes.on(event, callback)
    }

    /// Number of active push listeners.
    pub fn subscription_count(&self) -> usize {
        self.inner.pushes.total_listener_count()
    }

    // =========================================================================
    // Authentication
    // =========================================================================

    /// Pushes a caller-supplied token over the live link.
    pub async fn update_token(&self, token: &str) -> SyncResult<()> {
        self.push(Envelope::TokenUpdate(TokenUpdate {
            token: token.to_string(),
        }))
        .await?;
        debug!("Token update sent");
        Ok(())
    }

    /// Asks the [`AuthProvider`] for a fresh token and hands it to the
    /// server.
    ///
    /// ## When This Occurs
    /// - The server sent `TokenRefreshRequired`
    /// - The application calls it directly
    pub async fn refresh_token(&self) -> SyncResult<()> {
        match self.inner.auth.refresh_token().await {
            Ok(token) => {
                if let Err(e) = self.update_token(&token).await {
                    warn!(error = %e, "Refreshed token could not be delivered");
                }
                self.inner.auth.on_token_refresh(&token).await;
                info!("Authentication token refreshed");
                self.inner
                    .events
                    .emit(names::AUTH_TOKEN_REFRESHED, &json!({}));
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "Token refresh failed");
                self.inner.auth.on_token_expired().await;
                let payload = serde_json::to_value(err.to_base()).unwrap_or(Value::Null);
                self.inner.events.emit(names::AUTH_TOKEN_EXPIRED, &payload);
                Err(err)
            }
        }
    }

    // =========================================================================
    // Health Monitoring
    // =========================================================================

    fn start_health_monitoring(&self) {
        if let Some(period) = self.inner.config.ping_interval() {
            let weak = self.downgrade();
            self.inner.tasks.spawn(PING_TASK, async move {
                let mut ticker = interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    let Some(manager) = ConnectionManager::upgrade(&weak) else {
                        break;
                    };
                    let ping = Envelope::Ping(Heartbeat {
                        sent_at: Utc::now().timestamp_millis(),
                    });
                    match manager.try_push(ping) {
                        Ok(()) => trace!("Ping sent"),
                        Err(e) => debug!(error = %e, "Ping skipped"),
                    }
                }
            });
        }

        if let Some(period) = self.inner.config.health_check_interval() {
            let weak = self.downgrade();
            self.inner.tasks.spawn(HEALTH_TASK, async move {
                let mut ticker = interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    let Some(manager) = ConnectionManager::upgrade(&weak) else {
                        break;
                    };
                    manager.run_health_check().await;
                }
            });
        }
    }

    fn stop_health_monitoring(&self) {
        self.inner.tasks.cancel(PING_TASK);
        self.inner.tasks.cancel(HEALTH_TASK);
    }

    async fn run_health_check(&self) {
        let started = Instant::now();
        match self.send_event(HEALTH_CHECK_EVENT, json!({})).await {
            Ok(response) if response.success => {
                let elapsed = millis(started.elapsed());
                let mut counters = lock(&self.inner.counters);
                counters.latency_ms = if counters.latency_ms == 0 {
                    elapsed
                } else {
                    counters.latency_ms.min(elapsed)
                };
                trace!(latency_ms = counters.latency_ms, "Health check passed");
            }
            // Rejections are already counted by send_event.
            Ok(response) => warn!(code = ?response.error_code(), "Health check rejected"),
            Err(e) => {
                if !matches!(
                    e,
                    SyncError::Connection {
                        kind: ConnectionErrorKind::Timeout,
                        ..
                    }
                ) {
                    self.count_error();
                }
                warn!(error = %e, "Health check failed");
            }
        }
    }

    fn record_pong(&self, heartbeat: Heartbeat) {
        let latency = Utc::now()
            .timestamp_millis()
            .saturating_sub(heartbeat.sent_at)
            .max(0);
        lock(&self.inner.counters).latency_ms = u64::try_from(latency).unwrap_or(0);
    }

    // =========================================================================
    // Incoming Messages
    // =========================================================================

    fn handle_envelope(&self, envelope: Envelope) {
        match envelope {
            Envelope::Ack(ack) => {
                let waiter = lock(&self.inner.pending).remove(&ack.id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(ack.response);
                    }
                    None => debug!(id = %ack.id, "Ack for unknown or expired request"),
                }
            }
            Envelope::Push(push) => {
                trace!(event = %push.event, "Server push");
                self.inner.pushes.emit(&push.event, &push.payload);
            }
            Envelope::Pong(heartbeat) => self.record_pong(heartbeat),
            Envelope::Ping(heartbeat) => {
                if let Err(e) = self.try_push(Envelope::Pong(heartbeat)) {
                    debug!(error = %e, "Could not answer server ping");
                }
            }
            Envelope::TokenRefreshRequired => {
                info!("Server requested token refresh");
                let manager = self.clone();
                self.inner.tasks.spawn(TOKEN_REFRESH_TASK, async move {
                    let _ = manager.refresh_token().await;
                });
            }
            other => debug!(msg_type = other.type_name(), "Ignoring unexpected message"),
        }
    }

    // =========================================================================
    // State & Metrics
    // =========================================================================

    pub fn state(&self) -> ConnectionState {
        read(&self.inner.state).clone()
    }

    pub fn is_connected(&self) -> bool {
        read(&self.inner.state).is_connected()
    }

    pub fn metrics(&self) -> ConnectionMetrics {
        let mut metrics = *lock(&self.inner.counters);
        metrics.connection_uptime_ms = lock(&self.inner.connected_at)
            .map(|since| millis(since.elapsed()))
            .unwrap_or(0);
        metrics
    }

    pub fn endpoint(&self) -> &Url {
        &self.inner.endpoint
    }

    pub fn transport_name(&self) -> &'static str {
        self.inner.transport.name()
    }

    /// Names of background tasks currently running.
    pub fn running_tasks(&self) -> Vec<&'static str> {
        self.inner.tasks.running()
    }

    // =========================================================================
    // Teardown
    // =========================================================================

    /// Tears everything down for good. Later calls fail with
    /// [`SyncError::Destroyed`]. Idempotent.
    pub fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        self.inner.tasks.cancel_all();
        lock(&self.inner.outgoing).take();
        self.fail_pending();
        *lock(&self.inner.connected_at) = None;
        *lock(&self.inner.counters) = ConnectionMetrics::default();
        let previous = std::mem::take(&mut *write(&self.inner.state));
        self.inner.pushes.destroy();

        if previous.status != ConnectionStatus::Disconnected {
            self.emit_status(Some("destroyed"));
        }
        info!("Connection manager destroyed");
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::SeqCst)
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn is_current(&self, epoch: u64) -> bool {
        !self.is_destroyed() && self.inner.epoch.load(Ordering::SeqCst) == epoch
    }

    fn live_sender(&self) -> SyncResult<mpsc::Sender<Envelope>> {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }
        lock(&self.inner.outgoing)
            .clone()
            .ok_or(SyncError::NotConnected)
    }

    async fn push(&self, envelope: Envelope) -> SyncResult<()> {
        let sender = self.live_sender()?;
        sender
            .send(envelope)
            .await
            .map_err(|_| SyncError::connection_lost("link closed"))
    }

    fn try_push(&self, envelope: Envelope) -> SyncResult<()> {
        self.live_sender()?
            .try_send(envelope)
            .map_err(|e| SyncError::Transport(format!("outgoing buffer unavailable: {}", e)))
    }

    /// Dropping the waiters resolves every in-flight request as lost.
    fn fail_pending(&self) {
        let dropped = {
            let mut pending = lock(&self.inner.pending);
            let count = pending.len();
            pending.clear();
            count
        };
        if dropped > 0 {
            debug!(dropped, "Failed in-flight requests");
        }
    }

    fn count_error(&self) {
        lock(&self.inner.counters).error_count += 1;
    }

    fn transition(&self, status: ConnectionStatus, error: Option<String>) {
        let mut state = write(&self.inner.state);
        state.status = status;
        state.error = error;
        if status == ConnectionStatus::Connected {
            state.last_connected = Some(Utc::now());
            state.reconnect_attempts = 0;
        }
    }

    fn emit_status(&self, reason: Option<&str>) {
        let state = self.state();
        let mut payload = json!({
            "status": state.status,
            "reconnectAttempts": state.reconnect_attempts,
        });
        if let Some(reason) = reason {
            payload["reason"] = json!(reason);
        }
        if let Some(error) = &state.error {
            payload["error"] = json!(error);
        }
        self.inner.events.emit(names::CONNECTION_STATUS, &payload);
    }

    fn emit_error(&self, err: &SyncError, fatal: bool) {
        let mut payload = serde_json::to_value(err.to_base()).unwrap_or_else(|_| json!({}));
        if let Value::Object(map) = &mut payload {
            map.insert("fatal".to_string(), json!(fatal));
            map.insert(
                "attempts".to_string(),
                json!(read(&self.inner.state).reconnect_attempts),
            );
        }
        self.inner.events.emit(names::CONNECTION_ERROR, &payload);
    }
}

/// Drains one link until it closes.
async fn read_loop(
    weak: Weak<Inner>,
    mut incoming: mpsc::Receiver<TransportEvent>,
    epoch: u64,
) {
    let reason = loop {
        let event = incoming.recv().await;
        let Some(manager) = ConnectionManager::upgrade(&weak) else {
            return;
        };
        match event {
            Some(TransportEvent::Message(envelope)) => manager.handle_envelope(envelope),
            Some(TransportEvent::Closed(reason)) => break reason,
            None => break DisconnectReason::Error("transport task ended".to_string()),
        }
    };

    if let Some(manager) = ConnectionManager::upgrade(&weak) {
        manager.handle_link_closed(reason, epoch);
    }
}
