//! # Sync Client
//!
//! Composition root and public API: wires the [`EventManager`], the
//! [`ConnectionManager`] and the [`StorageManager`] together and owns the
//! offline queue.
//!
//! ## Send Path
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  send_event(name, payload)                                              │
//! │         │                                                               │
//! │         ├── connected ──► ConnectionManager::send_event ──► ack         │
//! │         │                        │                                      │
//! │         │                        └── link lost ──┐                      │
//! │         │                                        ▼                      │
//! │         └── offline ─────────────────────► OfflineQueue + `operations`  │
//! │                                                  │                      │
//! │                                                  └─► QUEUED response    │
//! │                                                                         │
//! │  connection:status == connected ──► replay pass (oldest first)          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Replay Rules
//! - One pass at a time. A trigger while a pass runs is a no-op.
//! - A pass works on the operations queued when it started. Anything queued
//!   during the pass waits for the next trigger.
//! - Losing the link halts the pass. The unprocessed operations go back to
//!   the head of the queue in their original order.
//! - A rejected operation is retried on later passes until it reaches its
//!   `max_retries`, then dropped with one `offline:operation_failed` event.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use chrono::{DateTime, Utc};
use pulse_core::schema::OPERATIONS_COLLECTION;
use pulse_core::validation::validate_event_name;
use pulse_core::{
    ClientState, ConnectionMetrics, ConnectionState, ErrorCode, EventResponse, QueuedOperation,
    SyncBaseError,
};
use pulse_db::{QueryOptions, SqliteConfig, StorageAdapter, StorageInfo, StorageManager};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::auth::{AuthProvider, StaticTokenProvider};
use crate::config::ClientConfig;
use crate::connection::ConnectionManager;
use crate::error::{SyncError, SyncResult};
use crate::events::{names, EventDebugInfo, EventManager, Subscription};
use crate::queue::OfflineQueue;
use crate::transport::{Transport, WebSocketTransport};
use crate::util::lock;

// =============================================================================
// Reports
// =============================================================================

/// Outcome of one replay pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplaySummary {
    /// Delivered and removed from the queue.
    pub synced: usize,
    /// Dropped after using up their retries.
    pub failed: usize,
    /// Rejected, kept for a later pass.
    pub requeued: usize,
    /// The link dropped mid-pass.
    pub halted: bool,
    /// Another pass was running, or there was no connection.
    pub skipped: bool,
}

/// Snapshot for troubleshooting.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugInfo {
    pub endpoint: String,
    pub transport: &'static str,
    pub offline_support: bool,
    pub client_state: ClientState,
    pub metrics: ConnectionMetrics,
    pub events: EventDebugInfo,
    pub queue_size: usize,
    /// `None` without offline support or when storage failed to open.
    pub storage: Option<StorageInfo>,
    pub running_tasks: Vec<&'static str>,
}

// =============================================================================
// Sync Client
// =============================================================================

struct ClientInner {
    config: ClientConfig,
    events: EventManager,
    connection: ConnectionManager,
    storage: Option<Arc<StorageManager>>,
    /// Set once storage initialized; writes are skipped otherwise.
    storage_ready: AtomicBool,
    queue: Mutex<OfflineQueue>,
    processing: AtomicBool,
    initialized: AtomicBool,
    authenticated: AtomicBool,
    destroyed: AtomicBool,
    last_activity: Mutex<Option<DateTime<Utc>>>,
    init_lock: tokio::sync::Mutex<()>,
    status_subscription: Mutex<Option<Subscription>>,
    replay_task: Mutex<Option<JoinHandle<()>>>,
}

/// Real-time sync client with offline queueing.
///
/// Cheap to clone; clones share one connection, queue and event bus.
///
/// ## Example
/// ```rust,ignore
/// let client = SyncClient::new(ClientConfig::load_or_default(None), provider)?;
/// client.initialize().await?;
///
/// let response = client.send_event("chat:send", json!({ "text": "hi" })).await?;
/// if response.is_queued() {
///     // delivered once the connection comes back
/// }
/// ```
#[derive(Clone)]
pub struct SyncClient {
    inner: Arc<ClientInner>,
}

impl SyncClient {
    /// Client over WebSocket with default storage.
    pub fn new(config: ClientConfig, auth: Arc<dyn AuthProvider>) -> SyncResult<Self> {
        SyncClientBuilder::new(config).with_auth_provider(auth).build()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Opens storage, restores the offline queue and connects.
    ///
    /// Storage problems are logged and the client runs without
    /// persistence. Connection errors are returned and leave the client
    /// uninitialized, but a retry may already be scheduled. If that retry
    /// connects, the client becomes initialized then and replays its queue.
    ///
    /// Calling it again after success is a no-op.
    pub async fn initialize(&self) -> SyncResult<()> {
        let inner = &self.inner;
        if inner.is_destroyed() {
            return Err(SyncError::Destroyed);
        }

        let _guard = inner.init_lock.lock().await;
        if inner.initialized.load(Ordering::SeqCst) {
            return Ok(());
        }
        if inner.is_destroyed() {
            return Err(SyncError::Destroyed);
        }

        if inner.config.offline_support {
            inner.prepare_storage().await;
        }
        inner.watch_connection();

        match inner.connection.connect().await {
            Ok(()) => {
                inner.authenticated.store(true, Ordering::SeqCst);
                inner.touch();
                inner.mark_initialized();
                Ok(())
            }
            Err(e) => {
                inner.initialized.store(false, Ordering::SeqCst);
                inner.authenticated.store(false, Ordering::SeqCst);
                error!(error = %e, "Sync client failed to initialize");
                Err(e)
            }
        }
    }

    /// Connects if not already connected. Queued operations replay on
    /// success.
    pub async fn connect(&self) -> SyncResult<()> {
        if self.inner.is_destroyed() {
            return Err(SyncError::Destroyed);
        }
        self.inner.connection.connect().await
    }

    /// Closes the connection without scheduling a reconnect.
    pub fn disconnect(&self) {
        self.inner.connection.disconnect();
    }

    /// Tears the client down for good. Idempotent.
    ///
    /// In-memory queue contents are discarded. Operations already mirrored
    /// to storage stay there for the next session.
    pub async fn destroy(&self) {
        let inner = &self.inner;
        if inner.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(task) = lock(&inner.replay_task).take() {
            task.abort();
        }
        let discarded = lock(&inner.queue).clear();
        if let Some(subscription) = lock(&inner.status_subscription).take() {
            subscription.unsubscribe();
        }

        inner.connection.destroy();
        if let Some(storage) = &inner.storage {
            storage.close().await;
        }

        inner.storage_ready.store(false, Ordering::SeqCst);
        inner.initialized.store(false, Ordering::SeqCst);
        inner.authenticated.store(false, Ordering::SeqCst);
        *lock(&inner.last_activity) = None;

        inner.events.emit(
            names::CLIENT_DESTROYED,
            &json!({ "discardedOperations": discarded }),
        );
        inner.events.destroy();
        info!(discarded, "Sync client destroyed");
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.is_destroyed()
    }

    // =========================================================================
    // Events
    // =========================================================================

    /// Sends `event`, or queues it while offline.
    ///
    /// ## Returns
    /// - The server's response when connected (negative acks included)
    /// - [`EventResponse::queued`] when the event was captured for replay
    ///
    /// ## Errors
    /// - Invalid event name
    /// - Offline with offline support disabled: [`SyncError::NotConnected`]
    /// - Request timeouts and other request failures, which are not queued
    pub async fn send_event(&self, event: &str, payload: Value) -> SyncResult<EventResponse> {
        let inner = &self.inner;
        if inner.is_destroyed() {
            return Err(SyncError::Destroyed);
        }
        validate_event_name(event)?;
        inner.touch();

        if inner.connection.is_connected() {
            match inner.connection.send_event(event, payload.clone()).await {
                Err(e) if e.is_connectivity_loss() && inner.config.offline_support => {
                    debug!(event, error = %e, "Send failed, queueing for replay");
                }
                other => return other,
            }
        } else if !inner.config.offline_support {
            return Err(SyncError::NotConnected);
        }

        Ok(inner.enqueue(event, payload).await)
    }

    /// Registers a listener for server pushes named `event`.
    pub fn subscribe<F>(&self, event: &str, callback: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.inner.connection.subscribe(event, callback)
    }

    /// Registers a listener for client lifecycle events
    /// (see [`names`](crate::events::names)).
    pub fn on<F>(&self, event: &str, callback: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.inner.events.on(event, callback)
    }

    pub fn once<F>(&self, event: &str, callback: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.inner.events.once(event, callback)
    }

    pub fn off(&self, subscription: &Subscription) -> bool {
        self.inner.events.off(subscription)
    }

    pub fn events(&self) -> &EventManager {
        &self.inner.events
    }

    // =========================================================================
    // Offline Queue
    // =========================================================================

    /// Runs a replay pass now.
    pub async fn process_offline_queue(&self) -> SyncResult<ReplaySummary> {
        if self.inner.is_destroyed() {
            return Err(SyncError::Destroyed);
        }
        Ok(self.inner.process_queue().await)
    }

    /// Drops every queued operation, in memory and in storage. Returns how
    /// many were dropped.
    pub async fn clear_offline_queue(&self) -> SyncResult<usize> {
        let inner = &self.inner;
        if inner.is_destroyed() {
            return Err(SyncError::Destroyed);
        }

        let cleared = lock(&inner.queue).clear();
        if let Some(storage) = inner.ready_storage() {
            if let Err(e) = storage.clear(OPERATIONS_COLLECTION).await {
                warn!(error = %e, "Failed to clear persisted operations");
            }
        }

        info!(cleared, "Offline queue cleared");
        inner
            .events
            .emit(names::OFFLINE_QUEUE_UPDATED, &json!({ "size": 0 }));
        Ok(cleared)
    }

    /// Queued operations in replay order.
    pub fn queued_operations(&self) -> Vec<QueuedOperation> {
        lock(&self.inner.queue).snapshot()
    }

    pub fn queue_size(&self) -> usize {
        self.inner.queue_len()
    }

    // =========================================================================
    // Authentication
    // =========================================================================

    /// Pushes a new token to the provider's session and the server.
    pub async fn update_token(&self, token: &str) -> SyncResult<()> {
        self.inner.connection.update_token(token).await
    }

    /// Asks the auth provider for a fresh token and forwards it.
    pub async fn refresh_token(&self) -> SyncResult<()> {
        self.inner.connection.refresh_token().await
    }

    // =========================================================================
    // State & Diagnostics
    // =========================================================================

    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.load(Ordering::SeqCst)
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connection.is_connected()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.connection.state()
    }

    pub fn metrics(&self) -> ConnectionMetrics {
        self.inner.connection.metrics()
    }

    pub fn client_state(&self) -> ClientState {
        let inner = &self.inner;
        ClientState {
            is_initialized: inner.initialized.load(Ordering::SeqCst),
            is_connected: inner.connection.is_connected(),
            is_authenticated: inner.authenticated.load(Ordering::SeqCst),
            connection_state: inner.connection.state(),
            active_subscriptions: inner.connection.subscription_count(),
            queued_operations: lock(&inner.queue).snapshot(),
            last_activity: *lock(&inner.last_activity),
        }
    }

    pub async fn debug_info(&self) -> DebugInfo {
        let inner = &self.inner;
        let storage = match inner.ready_storage() {
            Some(storage) => Some(storage.storage_info().await),
            None => None,
        };

        DebugInfo {
            endpoint: inner.connection.endpoint().to_string(),
            transport: inner.connection.transport_name(),
            offline_support: inner.config.offline_support,
            client_state: self.client_state(),
            metrics: inner.connection.metrics(),
            events: inner.events.debug_info(),
            queue_size: inner.queue_len(),
            storage,
            running_tasks: inner.connection.running_tasks(),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn storage(&self) -> Option<&Arc<StorageManager>> {
        self.inner.storage.as_ref()
    }
}

impl std::fmt::Debug for SyncClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncClient")
            .field("endpoint", &self.inner.connection.endpoint().as_str())
            .field("status", &self.inner.connection.state().status)
            .field("queued", &self.inner.queue_len())
            .field("destroyed", &self.inner.is_destroyed())
            .finish()
    }
}

// =============================================================================
// Internals
// =============================================================================

impl ClientInner {
    fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    fn touch(&self) {
        *lock(&self.last_activity) = Some(Utc::now());
    }

    fn queue_len(&self) -> usize {
        lock(&self.queue).len()
    }

    fn ready_storage(&self) -> Option<&Arc<StorageManager>> {
        self.storage
            .as_ref()
            .filter(|_| self.storage_ready.load(Ordering::SeqCst))
    }

    /// Emits `client:initialized` the first time it runs.
    fn mark_initialized(&self) {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return;
        }
        let queued = self.queue_len();
        info!(endpoint = %self.connection.endpoint(), queued, "Sync client initialized");
        self.events
            .emit(names::CLIENT_INITIALIZED, &json!({ "queuedOperations": queued }));
    }

    /// Opens storage and merges persisted operations into the queue.
    async fn prepare_storage(&self) {
        let Some(storage) = &self.storage else {
            return;
        };

        if let Err(e) = storage.initialize().await {
            warn!(error = %e, "Storage unavailable, offline queue kept in memory only");
            return;
        }
        self.storage_ready.store(true, Ordering::SeqCst);

        let stored: Vec<QueuedOperation> = match storage
            .get_many(OPERATIONS_COLLECTION, QueryOptions::by_index("timestamp"))
            .await
        {
            Ok(stored) => stored,
            Err(e) => {
                warn!(error = %e, "Failed to load persisted operations");
                Vec::new()
            }
        };

        // Anything queued before storage was ready only lives in memory.
        let pending = lock(&self.queue).take_all();
        for operation in &pending {
            self.persist(operation).await;
        }

        let restored = stored.len();
        let mut merged = stored;
        for operation in pending {
            if !merged.iter().any(|op| op.id == operation.id) {
                merged.push(operation);
            }
        }

        let size = {
            let mut queue = lock(&self.queue);
            for operation in queue.take_all() {
                if !merged.iter().any(|op| op.id == operation.id) {
                    merged.push(operation);
                }
            }
            queue.hydrate(merged);
            queue.len()
        };

        if restored > 0 {
            info!(restored, size, "Offline queue restored from storage");
        }
    }

    /// Starts replaying whenever the connection comes up.
    fn watch_connection(self: &Arc<Self>) {
        let mut slot = lock(&self.status_subscription);
        if slot.is_some() {
            return;
        }

        let weak: Weak<ClientInner> = Arc::downgrade(self);
        *slot = Some(self.events.on(names::CONNECTION_STATUS, move |payload| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if payload["status"] != "connected" || inner.is_destroyed() {
                return;
            }

            inner.authenticated.store(true, Ordering::SeqCst);
            inner.touch();
            // Also covers a retry that lands after initialize() gave up.
            inner.mark_initialized();
            if inner.config.offline_support && inner.queue_len() > 0 {
                inner.spawn_replay();
            }
        }));
    }

    fn spawn_replay(self: &Arc<Self>) {
        let mut slot = lock(&self.replay_task);
        if slot.as_ref().is_some_and(|task| !task.is_finished()) {
            debug!("Replay already scheduled");
            return;
        }

        let weak = Arc::downgrade(self);
        *slot = Some(tokio::spawn(async move {
            if let Some(inner) = weak.upgrade() {
                inner.process_queue().await;
            }
        }));
    }

    async fn enqueue(&self, event: &str, payload: Value) -> EventResponse {
        let (operation, size) = {
            let mut queue = lock(&self.queue);
            let operation = queue
                .push(QueuedOperation::new(event, payload, self.config.queue.max_retries))
                .clone();
            (operation, queue.len())
        };
        self.persist(&operation).await;

        info!(id = %operation.id, event, size, "Event queued for replay");
        self.events.emit(
            names::OFFLINE_QUEUE_UPDATED,
            &json!({ "size": size, "operationId": operation.id }),
        );
        EventResponse::queued(&operation.id)
    }

    async fn persist(&self, operation: &QueuedOperation) {
        if let Some(storage) = self.ready_storage() {
            if let Err(e) = storage.set(OPERATIONS_COLLECTION, operation).await {
                warn!(id = %operation.id, error = %e, "Failed to persist queued operation");
            }
        }
    }

    async fn forget(&self, operation: &QueuedOperation) {
        if let Some(storage) = self.ready_storage() {
            if let Err(e) = storage.delete(OPERATIONS_COLLECTION, &operation.id).await {
                warn!(id = %operation.id, error = %e, "Failed to delete persisted operation");
            }
        }
    }

    // =========================================================================
    // Replay
    // =========================================================================

    async fn process_queue(&self) -> ReplaySummary {
        let Some(_guard) = ProcessingGuard::acquire(&self.processing) else {
            debug!("Replay already running, skipping");
            return ReplaySummary {
                skipped: true,
                ..Default::default()
            };
        };
        if self.is_destroyed() || !self.connection.is_connected() {
            return ReplaySummary {
                skipped: true,
                ..Default::default()
            };
        }

        let batch = lock(&self.queue).take_all();
        if batch.is_empty() {
            return ReplaySummary::default();
        }
        info!(count = batch.len(), "Replaying offline queue");

        let mut summary = ReplaySummary::default();
        let mut retained = Vec::new();
        let mut pending = batch.into_iter();

        while let Some(mut operation) = pending.next() {
            let result = self
                .connection
                .send_event(&operation.event, operation.payload.clone())
                .await;

            let failure = match result {
                Ok(response) if response.success => {
                    self.forget(&operation).await;
                    summary.synced += 1;
                    debug!(id = %operation.id, event = %operation.event, "Queued operation delivered");
                    self.events.emit(
                        names::OFFLINE_OPERATION_SYNCED,
                        &json!({ "operationId": operation.id, "event": operation.event }),
                    );
                    continue;
                }
                Err(e) if e.is_connectivity_loss() || matches!(e, SyncError::Destroyed) => {
                    warn!(error = %e, remaining = pending.len() + 1, "Link lost during replay, halting");
                    summary.halted = true;
                    retained.push(operation);
                    retained.extend(pending);
                    break;
                }
                Ok(response) => rejection(&operation, &response),
                Err(e) => e.to_base(),
            };

            if operation.record_failure() {
                self.forget(&operation).await;
                summary.failed += 1;
                warn!(
                    id = %operation.id,
                    event = %operation.event,
                    retries = operation.retry_count,
                    error = %failure,
                    "Queued operation dropped after exhausting retries"
                );
                self.events.emit(
                    names::OFFLINE_OPERATION_FAILED,
                    &json!({ "operation": operation, "error": failure }),
                );
            } else {
                self.persist(&operation).await;
                summary.requeued += 1;
                debug!(
                    id = %operation.id,
                    retry_count = operation.retry_count,
                    error = %failure,
                    "Queued operation rejected, will retry"
                );
                retained.push(operation);
            }
        }

        let size = {
            let mut queue = lock(&self.queue);
            queue.restore_front(retained);
            queue.sort();
            queue.len()
        };
        self.events
            .emit(names::OFFLINE_QUEUE_UPDATED, &json!({ "size": size }));

        info!(
            synced = summary.synced,
            failed = summary.failed,
            requeued = summary.requeued,
            halted = summary.halted,
            size,
            "Replay pass finished"
        );
        summary
    }
}

fn rejection(operation: &QueuedOperation, response: &EventResponse) -> SyncBaseError {
    match &response.error {
        Some(err) => {
            let base = SyncBaseError::new(err.code.clone(), err.message.clone());
            match &err.details {
                Some(details) => base.with_details(details.clone()),
                None => base,
            }
        }
        None => SyncBaseError::new(
            ErrorCode::RequestFailed.as_str(),
            format!("server rejected '{}'", operation.event),
        ),
    }
}

/// Holds the replay flag for the length of a pass.
struct ProcessingGuard<'a>(&'a AtomicBool);

impl<'a> ProcessingGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| ProcessingGuard(flag))
    }
}

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

// =============================================================================
// Builder Pattern
// =============================================================================

/// Builder for [`SyncClient`].
///
/// Only an auth provider is required. The transport defaults to
/// [`WebSocketTransport`]; storage defaults to SQLite at the configured
/// (or platform default) path when offline support is on.
pub struct SyncClientBuilder {
    config: ClientConfig,
    transport: Option<Arc<dyn Transport>>,
    auth: Option<Arc<dyn AuthProvider>>,
    storage: Option<Arc<StorageManager>>,
    storage_adapter: Option<Arc<dyn StorageAdapter>>,
}

impl SyncClientBuilder {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            transport: None,
            auth: None,
            storage: None,
            storage_adapter: None,
        }
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_auth_provider(mut self, auth: Arc<dyn AuthProvider>) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Shorthand for a [`StaticTokenProvider`].
    pub fn with_token(self, token: impl Into<String>) -> Self {
        self.with_auth_provider(Arc::new(StaticTokenProvider::new(token)))
    }

    /// Uses an already configured storage manager.
    pub fn with_storage(mut self, storage: Arc<StorageManager>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Uses `adapter` with the configured schema.
    pub fn with_storage_adapter(mut self, adapter: Arc<dyn StorageAdapter>) -> Self {
        self.storage_adapter = Some(adapter);
        self
    }

    pub fn build(self) -> SyncResult<SyncClient> {
        self.config.validate()?;
        let config = self.config;

        let auth = self
            .auth
            .ok_or_else(|| SyncError::Config("an auth provider is required".into()))?;
        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(WebSocketTransport::new()));

        let events = EventManager::new(config.max_listeners);
        let connection = ConnectionManager::new(config.clone(), transport, auth, events.clone())?;

        let storage = if config.offline_support {
            Some(match (self.storage, self.storage_adapter) {
                (Some(storage), _) => storage,
                (None, Some(adapter)) => {
                    Arc::new(StorageManager::new(adapter, config.storage_schema()))
                }
                (None, None) => Arc::new(default_storage(&config)),
            })
        } else {
            None
        };

        debug!(
            endpoint = %connection.endpoint(),
            transport = connection.transport_name(),
            offline_support = config.offline_support,
            backend = storage.as_ref().map(|s| s.backend()),
            "Sync client built"
        );

        Ok(SyncClient {
            inner: Arc::new(ClientInner {
                config,
                events,
                connection,
                storage,
                storage_ready: AtomicBool::new(false),
                queue: Mutex::new(OfflineQueue::new()),
                processing: AtomicBool::new(false),
                initialized: AtomicBool::new(false),
                authenticated: AtomicBool::new(false),
                destroyed: AtomicBool::new(false),
                last_activity: Mutex::new(None),
                init_lock: tokio::sync::Mutex::new(()),
                status_subscription: Mutex::new(None),
                replay_task: Mutex::new(None),
            }),
        })
    }
}

fn default_storage(config: &ClientConfig) -> StorageManager {
    let schema = config.storage_schema();
    match config
        .storage
        .database_path
        .clone()
        .or_else(ClientConfig::default_database_path)
    {
        Some(path) => {
            if let Some(parent) = path.parent() {
                if let Err(e) = std::fs::create_dir_all(parent) {
                    warn!(path = %parent.display(), error = %e, "Failed to create data directory");
                }
            }
            StorageManager::sqlite(SqliteConfig::new(path), schema)
        }
        None => {
            warn!("No data directory available, offline queue won't survive restarts");
            StorageManager::in_memory(schema)
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
