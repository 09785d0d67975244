//! Mock transport for testing.
//!
//! Plays the server side of a link in-process: acknowledges events,
//! answers pings, and lets tests inject pushes, scripted failures and
//! server-side closes. Everything the client sends is captured.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use pulse_core::protocol::{Ack, EventRequest, PushEvent};
use pulse_core::{Envelope, EventResponse};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;

use super::{
    ConnectRequest, DisconnectReason, Transport, TransportEvent, TransportLink, CHANNEL_CAPACITY,
};
use crate::error::{SyncError, SyncResult};

/// Scriptable in-process server.
///
/// Clones share state, so a test keeps one handle while the client owns
/// another.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
}

#[derive(Debug, Default)]
struct MockTransportInner {
    unreachable: bool,
    fail_next_connects: usize,
    hang_connects: bool,
    connect_times: Vec<Instant>,
    requests: Vec<ConnectRequest>,
    received: Vec<Envelope>,
    responses: HashMap<String, EventResponse>,
    silent_events: HashSet<String>,
    close_on_event: HashSet<String>,
    no_pong: bool,
    to_client: Option<mpsc::Sender<TransportEvent>>,
}

/// What the server side does with one client envelope.
enum Reply {
    Send(Envelope),
    Close,
    Nothing,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockTransportInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // =========================================================================
    // Scripting
    // =========================================================================

    /// Fail the next `n` connect attempts.
    pub fn fail_next_connects(&self, n: usize) {
        self.lock().fail_next_connects = n;
    }

    /// Fail every connect until cleared.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.lock().unreachable = unreachable;
    }

    /// Connect attempts never complete (exercise connect timeouts).
    pub fn hang_connects(&self, hang: bool) {
        self.lock().hang_connects = hang;
    }

    /// Answer every `event` request with `response`.
    pub fn respond_with(&self, event: &str, response: EventResponse) {
        self.lock().responses.insert(event.to_string(), response);
    }

    /// Never acknowledge `event` (exercise request timeouts).
    pub fn never_ack(&self, event: &str) {
        self.lock().silent_events.insert(event.to_string());
    }

    /// Drop the connection, without acknowledging, the next time `event`
    /// arrives. One-shot.
    pub fn close_on_next(&self, event: &str) {
        self.lock().close_on_event.insert(event.to_string());
    }

    /// Stop echoing pings.
    pub fn disable_pong(&self) {
        self.lock().no_pong = true;
    }

    // =========================================================================
    // Server Actions
    // =========================================================================

    /// Sends a server push. Returns false when no link is open.
    pub async fn push(&self, event: &str, payload: Value) -> bool {
        self.send_to_client(Envelope::Push(PushEvent {
            event: event.to_string(),
            payload,
        }))
        .await
    }

    pub async fn send_to_client(&self, envelope: Envelope) -> bool {
        let sender = self.lock().to_client.clone();
        match sender {
            Some(tx) => tx.send(TransportEvent::Message(envelope)).await.is_ok(),
            None => false,
        }
    }

    /// Closes the open link from the server side.
    pub async fn close_connection(&self) -> bool {
        let sender = self.lock().to_client.take();
        match sender {
            Some(tx) => tx
                .send(TransportEvent::Closed(DisconnectReason::ServerClosed))
                .await
                .is_ok(),
            None => false,
        }
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    pub fn connect_count(&self) -> usize {
        self.lock().connect_times.len()
    }

    /// When each connect attempt started.
    pub fn connect_times(&self) -> Vec<Instant> {
        self.lock().connect_times.clone()
    }

    pub fn last_request(&self) -> Option<ConnectRequest> {
        self.lock().requests.last().cloned()
    }

    /// Every envelope the client sent, in order.
    pub fn received(&self) -> Vec<Envelope> {
        self.lock().received.clone()
    }

    /// Event requests the client sent, in order.
    pub fn sent_events(&self) -> Vec<EventRequest> {
        self.lock()
            .received
            .iter()
            .filter_map(|e| match e {
                Envelope::Event(request) => Some(request.clone()),
                _ => None,
            })
            .collect()
    }

    /// Names of the event requests the client sent, in order.
    pub fn sent_event_names(&self) -> Vec<String> {
        self.sent_events().into_iter().map(|r| r.name).collect()
    }

    pub fn has_open_link(&self) -> bool {
        self.lock()
            .to_client
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    // =========================================================================
    // Server Loop
    // =========================================================================

    fn reply_to(&self, envelope: &Envelope) -> Reply {
        let mut inner = self.lock();
        inner.received.push(envelope.clone());

        match envelope {
            Envelope::Event(request) => {
                if inner.close_on_event.remove(&request.name) {
                    return Reply::Close;
                }
                if inner.silent_events.contains(&request.name) {
                    return Reply::Nothing;
                }
                let response = inner
                    .responses
                    .get(&request.name)
                    .cloned()
                    .unwrap_or_else(|| EventResponse::ok(request.payload.clone()));
                Reply::Send(Envelope::Ack(Ack {
                    id: request.id.clone(),
                    response,
                }))
            }
            Envelope::Ping(heartbeat) if !inner.no_pong => Reply::Send(Envelope::Pong(*heartbeat)),
            _ => Reply::Nothing,
        }
    }

    async fn serve(
        self,
        mut from_client: mpsc::Receiver<Envelope>,
        to_client: mpsc::Sender<TransportEvent>,
    ) {
        while let Some(envelope) = from_client.recv().await {
            match self.reply_to(&envelope) {
                Reply::Send(reply) => {
                    if to_client.send(TransportEvent::Message(reply)).await.is_err() {
                        break;
                    }
                }
                Reply::Close => {
                    debug!("Mock server closing link");
                    {
                        let mut inner = self.lock();
                        if inner
                            .to_client
                            .as_ref()
                            .is_some_and(|tx| tx.same_channel(&to_client))
                        {
                            inner.to_client = None;
                        }
                    }
                    let _ = to_client
                        .send(TransportEvent::Closed(DisconnectReason::ServerClosed))
                        .await;
                    break;
                }
                Reply::Nothing => {}
            }
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn connect(&self, request: ConnectRequest) -> SyncResult<TransportLink> {
        let hang = {
            let mut inner = self.lock();
            inner.connect_times.push(Instant::now());
            inner.requests.push(request);

            if inner.unreachable {
                return Err(SyncError::connection_failed("mock: server unreachable"));
            }
            if inner.fail_next_connects > 0 {
                inner.fail_next_connects -= 1;
                return Err(SyncError::connection_failed("mock: connection refused"));
            }
            inner.hang_connects
        };

        if hang {
            std::future::pending::<()>().await;
        }

        let (outgoing_tx, outgoing_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (incoming_tx, incoming_rx) = mpsc::channel(CHANNEL_CAPACITY);

        self.lock().to_client = Some(incoming_tx.clone());
        tokio::spawn(self.clone().serve(outgoing_rx, incoming_tx));

        Ok(TransportLink {
            outgoing: outgoing_tx,
            incoming: incoming_rx,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::protocol::Heartbeat;
    use serde_json::json;
    use url::Url;

    fn request() -> ConnectRequest {
        ConnectRequest {
            endpoint: Url::parse("ws://mock/socket").unwrap(),
            token: "token".into(),
            transports: vec!["websocket".into()],
        }
    }

    async fn next_message(link: &mut TransportLink) -> Envelope {
        match link.incoming.recv().await {
            Some(TransportEvent::Message(envelope)) => envelope,
            other => panic!("expected message, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn mock_acks_events_with_payload() {
        let mock = MockTransport::new();
        let mut link = mock.connect(request()).await.unwrap();

        let event = Envelope::event("chat:send", json!({ "text": "hi" }));
        link.outgoing.send(event.clone()).await.unwrap();

        match next_message(&mut link).await {
            Envelope::Ack(ack) => {
                assert!(ack.response.success);
                assert_eq!(ack.response.data, Some(json!({ "text": "hi" })));
            }
            other => panic!("expected ack, got {other:?}"),
        }
        assert_eq!(mock.sent_event_names(), vec!["chat:send"]);
        assert_eq!(mock.last_request().unwrap().token, "token");
    }

    #[tokio::test]
    async fn mock_echoes_pings() {
        let mock = MockTransport::new();
        let mut link = mock.connect(request()).await.unwrap();

        let heartbeat = Heartbeat { sent_at: 42 };
        link.outgoing.send(Envelope::Ping(heartbeat)).await.unwrap();
        assert_eq!(next_message(&mut link).await, Envelope::Pong(heartbeat));
    }

    #[tokio::test]
    async fn mock_fails_scripted_connects() {
        let mock = MockTransport::new();
        mock.fail_next_connects(2);

        assert!(mock.connect(request()).await.is_err());
        assert!(mock.connect(request()).await.is_err());
        assert!(mock.connect(request()).await.is_ok());
        assert_eq!(mock.connect_count(), 3);
    }

    #[tokio::test]
    async fn mock_closes_on_scripted_event() {
        let mock = MockTransport::new();
        let mut link = mock.connect(request()).await.unwrap();
        mock.close_on_next("boom");

        link.outgoing
            .send(Envelope::event("boom", Value::Null))
            .await
            .unwrap();
        assert_eq!(
            link.incoming.recv().await,
            Some(TransportEvent::Closed(DisconnectReason::ServerClosed))
        );
        assert!(!mock.has_open_link());
    }

    #[tokio::test]
    async fn mock_push_reaches_client() {
        let mock = MockTransport::new();
        assert!(!mock.push("x", Value::Null).await);

        let mut link = mock.connect(request()).await.unwrap();
        assert!(mock.push("notification:new", json!({ "id": 1 })).await);
        assert_eq!(
            next_message(&mut link).await,
            Envelope::Push(PushEvent {
                event: "notification:new".into(),
                payload: json!({ "id": 1 }),
            })
        );
    }
}
