//! Per-connection protocol state machine.
//!
//! All protocol decisions live here, with one named transition per inbound
//! event and outbound frames returned as values. The socket task in
//! `realtime::server` owns the I/O and the timers; keeping them out of this
//! type makes every transition testable without a live socket.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;

use crate::core::broker::{ConnectionId, Delivery, Predicate, SubscriptionBroker};
use crate::graphql::document::subscription_field;
use crate::graphql::schema::SimulatorSchema;
use crate::realtime::model::{
    ClientFrame, ConnectionAckPayload, ErrorPayload, ServerFrame, StartPayload,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Upgraded, waiting for `connection_init` before the timer fires.
    AwaitingInit,
    /// Handshake accepted; subscriptions and keepalive are live.
    Connected,
    /// Terminal. All owned subscriptions are gone from the broker.
    Closed,
}

pub struct Connection {
    id: ConnectionId,
    state: ConnectionState,
    /// Ids owned by this connection. Uniqueness is scoped here, not globally.
    subscriptions: HashSet<String>,
    schema: Arc<SimulatorSchema>,
    broker: Arc<SubscriptionBroker>,
    delivery_tx: mpsc::UnboundedSender<Delivery>,
    connection_timeout_ms: u64,
}

impl Connection {
    pub fn new(
        id: ConnectionId,
        schema: Arc<SimulatorSchema>,
        broker: Arc<SubscriptionBroker>,
        delivery_tx: mpsc::UnboundedSender<Delivery>,
        connection_timeout_ms: u64,
    ) -> Self {
        Self {
            id,
            state: ConnectionState::AwaitingInit,
            subscriptions: HashSet::new(),
            schema,
            broker,
            delivery_tx,
            connection_timeout_ms,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == ConnectionState::Closed
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Whether a broker delivery for this subscription id should still be
    /// forwarded. Guards against deliveries queued just before a `stop`.
    pub fn owns(&self, subscription_id: &str) -> bool {
        self.state == ConnectionState::Connected && self.subscriptions.contains(subscription_id)
    }

    /// Dispatch entry point for every parsed inbound frame.
    pub fn on_frame(&mut self, frame: ClientFrame) -> Vec<ServerFrame> {
        match (self.state, frame) {
            (ConnectionState::Closed, _) => Vec::new(),
            (ConnectionState::AwaitingInit, ClientFrame::ConnectionInit { payload }) => {
                self.on_connection_init(payload)
            }
            (ConnectionState::AwaitingInit, _) => {
                self.on_protocol_error("the first message must be connection_init")
            }
            (ConnectionState::Connected, ClientFrame::ConnectionInit { .. }) => {
                // Repeated init is tolerated; the ack already went out once.
                log::debug!("Connection {}: ignoring repeated connection_init", self.id);
                Vec::new()
            }
            (ConnectionState::Connected, ClientFrame::Start { id, payload }) => {
                self.on_start(id, payload)
            }
            (ConnectionState::Connected, ClientFrame::Stop { id }) => self.on_stop(id),
        }
    }

    fn on_connection_init(&mut self, payload: Value) -> Vec<ServerFrame> {
        match self.schema.auth().validate(&payload) {
            Ok(()) => {
                self.state = ConnectionState::Connected;
                log::debug!("Connection {}: handshake accepted", self.id);
                vec![ServerFrame::ConnectionAck {
                    payload: ConnectionAckPayload {
                        connection_timeout_ms: self.connection_timeout_ms,
                    },
                }]
            }
            Err(message) => {
                log::info!("Connection {}: handshake rejected: {}", self.id, message);
                self.close();
                vec![ServerFrame::ConnectionError {
                    payload: ErrorPayload::single("UnauthorizedException", message),
                }]
            }
        }
    }

    fn on_start(&mut self, id: String, payload: StartPayload) -> Vec<ServerFrame> {
        if self.subscriptions.contains(&id) {
            // The existing subscription stays untouched.
            return vec![ServerFrame::Error {
                id: Some(id.clone()),
                payload: ErrorPayload::single(
                    "DuplicateSubscriptionId",
                    format!("subscription id '{id}' is already in use on this connection"),
                ),
            }];
        }

        let variables = match payload.variables {
            Some(Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        };
        let field = match subscription_field(
            &payload.query,
            &variables,
            payload.operation_name.as_deref(),
        ) {
            Ok(field) => field,
            Err(message) => {
                return vec![ServerFrame::Error {
                    id: Some(id),
                    payload: ErrorPayload::single("InvalidSubscription", message),
                }];
            }
        };

        let predicate = Predicate::equals(field.arguments);
        for topic in self.schema.topics_for_subscription(&field.name) {
            self.broker
                .subscribe(&topic, self.id, &id, predicate.clone(), self.delivery_tx.clone());
        }
        self.subscriptions.insert(id.clone());
        log::debug!("Connection {}: subscription '{}' on field '{}'", self.id, id, field.name);

        vec![ServerFrame::StartAck { id }]
    }

    /// Stop is idempotent: an unknown id still completes normally, tolerating
    /// races with server-initiated teardown.
    fn on_stop(&mut self, id: String) -> Vec<ServerFrame> {
        if self.subscriptions.remove(&id) {
            self.broker.unsubscribe(self.id, &id);
            log::debug!("Connection {}: subscription '{}' stopped", self.id, id);
        }
        vec![ServerFrame::Complete { id }]
    }

    /// Malformed or out-of-place frames. Fatal before the handshake, a
    /// recoverable error frame afterwards.
    pub fn on_protocol_error(&mut self, message: &str) -> Vec<ServerFrame> {
        match self.state {
            ConnectionState::AwaitingInit => {
                self.close();
                vec![ServerFrame::ConnectionError {
                    payload: ErrorPayload::single("BadRequest", message),
                }]
            }
            ConnectionState::Connected => vec![ServerFrame::Error {
                id: None,
                payload: ErrorPayload::single("BadRequest", message),
            }],
            ConnectionState::Closed => Vec::new(),
        }
    }

    /// The init timer fired before `connection_init` arrived.
    pub fn on_init_timeout(&mut self) -> Vec<ServerFrame> {
        if self.state != ConnectionState::AwaitingInit {
            return Vec::new();
        }
        log::info!("Connection {}: closed, connection_init never arrived", self.id);
        self.close();
        vec![ServerFrame::ConnectionError {
            payload: ErrorPayload::single(
                "ConnectionInitTimeout",
                "connection_init was not received within the timeout window",
            ),
        }]
    }

    /// Terminal transition. Removing the connection from the broker and
    /// clearing its subscription set happen together, so no registration can
    /// outlive its connection. Safe to call more than once.
    pub fn close(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }
        self.broker.remove_connection(self.id);
        self.subscriptions.clear();
        self.state = ConnectionState::Closed;
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::graphql::schema::SimulatorSchema;

    const TIMEOUT_MS: u64 = 300_000;

    fn schema() -> Arc<SimulatorSchema> {
        Arc::new(
            SimulatorSchema::new().subscription("onCreateTodo", &["createTodo"]),
        )
    }

    fn rejecting_schema() -> Arc<SimulatorSchema> {
        struct RejectAll;
        impl crate::graphql::schema::AuthValidator for RejectAll {
            fn validate(&self, _payload: &Value) -> Result<(), String> {
                Err("no thanks".to_string())
            }
        }
        Arc::new(SimulatorSchema::new().with_auth(Arc::new(RejectAll)))
    }

    fn connection(
        schema: Arc<SimulatorSchema>,
        broker: Arc<SubscriptionBroker>,
    ) -> (Connection, mpsc::UnboundedReceiver<Delivery>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Connection::new(1, schema, broker, tx, TIMEOUT_MS), rx)
    }

    fn init_frame() -> ClientFrame {
        ClientFrame::ConnectionInit { payload: json!({}) }
    }

    fn start_frame(id: &str, owner: Option<&str>) -> ClientFrame {
        let query = match owner {
            Some(owner) => format!("subscription {{ onCreateTodo(owner: \"{owner}\") {{ id }} }}"),
            None => "subscription { onCreateTodo { id } }".to_string(),
        };
        ClientFrame::Start {
            id: id.to_string(),
            payload: StartPayload {
                query,
                variables: None,
                operation_name: None,
            },
        }
    }

    #[tokio::test]
    async fn valid_init_yields_exactly_one_ack() {
        let broker = Arc::new(SubscriptionBroker::new());
        let (mut conn, _rx) = connection(schema(), broker);

        let frames = conn.on_frame(init_frame());
        assert_eq!(frames.len(), 1);
        assert!(matches!(
            &frames[0],
            ServerFrame::ConnectionAck { payload } if payload.connection_timeout_ms == TIMEOUT_MS
        ));
        assert!(conn.is_connected());

        // A second init produces nothing, so only one ack is ever sent.
        assert!(conn.on_frame(init_frame()).is_empty());
    }

    #[tokio::test]
    async fn rejected_auth_closes_with_connection_error() {
        let broker = Arc::new(SubscriptionBroker::new());
        let (mut conn, _rx) = connection(rejecting_schema(), broker);

        let frames = conn.on_frame(init_frame());
        assert!(matches!(frames[0], ServerFrame::ConnectionError { .. }));
        assert!(conn.is_closed());
    }

    #[tokio::test]
    async fn start_before_init_is_fatal() {
        let broker = Arc::new(SubscriptionBroker::new());
        let (mut conn, _rx) = connection(schema(), broker.clone());

        let frames = conn.on_frame(start_frame("sub-1", None));
        assert!(matches!(frames[0], ServerFrame::ConnectionError { .. }));
        assert!(conn.is_closed());
        assert_eq!(broker.subscriber_count("createTodo"), 0);
    }

    #[tokio::test]
    async fn init_timeout_closes_and_blocks_later_deliveries() {
        let broker = Arc::new(SubscriptionBroker::new());
        let (mut conn, mut rx) = connection(schema(), broker.clone());

        let frames = conn.on_init_timeout();
        assert!(matches!(frames[0], ServerFrame::ConnectionError { .. }));
        assert!(conn.is_closed());

        // Nothing was ever registered, so a matching publish delivers nothing.
        assert_eq!(broker.publish("createTodo", &json!({"id": "t1"})), 0);
        assert!(rx.try_recv().is_err());
        // The timer firing after a completed handshake is a no-op.
        let (mut connected, _rx2) = connection(schema(), broker);
        connected.on_frame(init_frame());
        assert!(connected.on_init_timeout().is_empty());
        assert!(connected.is_connected());
    }

    #[tokio::test]
    async fn subscription_registers_topics_and_receives_matching_events() {
        let broker = Arc::new(SubscriptionBroker::new());
        let (mut conn, mut rx) = connection(schema(), broker.clone());
        conn.on_frame(init_frame());

        let frames = conn.on_frame(start_frame("sub-1", Some("ann")));
        assert!(matches!(&frames[0], ServerFrame::StartAck { id } if id == "sub-1"));
        assert!(conn.owns("sub-1"));
        // The trigger mapping routed the registration to the mutation topic.
        assert_eq!(broker.subscriber_count("createTodo"), 1);
        assert_eq!(broker.subscriber_count("onCreateTodo"), 0);

        broker.publish("createTodo", &json!({"id": "t1", "owner": "ann"}));
        broker.publish("createTodo", &json!({"id": "t2", "owner": "bob"}));

        let delivery = rx.try_recv().unwrap();
        assert_eq!(delivery.subscription_id, "sub-1");
        assert_eq!(delivery.payload["id"], json!("t1"));
        assert!(rx.try_recv().is_err(), "non-matching owner must not deliver");
    }

    #[tokio::test]
    async fn duplicate_id_is_rejected_and_original_survives() {
        let broker = Arc::new(SubscriptionBroker::new());
        let (mut conn, mut rx) = connection(schema(), broker.clone());
        conn.on_frame(init_frame());
        conn.on_frame(start_frame("sub-1", None));

        let frames = conn.on_frame(start_frame("sub-1", None));
        match &frames[0] {
            ServerFrame::Error { id, payload } => {
                assert_eq!(id.as_deref(), Some("sub-1"));
                assert_eq!(payload.errors[0].error_type, "DuplicateSubscriptionId");
            }
            other => panic!("unexpected frame: {other:?}"),
        }

        // Still exactly one registration, and it still delivers.
        assert_eq!(broker.subscriber_count("createTodo"), 1);
        broker.publish("createTodo", &json!({"id": "t1"}));
        assert_eq!(rx.try_recv().unwrap().subscription_id, "sub-1");
    }

    #[tokio::test]
    async fn stop_for_unknown_id_still_completes() {
        let broker = Arc::new(SubscriptionBroker::new());
        let (mut conn, _rx) = connection(schema(), broker);
        conn.on_frame(init_frame());

        let frames = conn.on_frame(ClientFrame::Stop { id: "ghost".to_string() });
        assert!(matches!(&frames[0], ServerFrame::Complete { id } if id == "ghost"));
    }

    #[tokio::test]
    async fn stop_unregisters_from_the_broker() {
        let broker = Arc::new(SubscriptionBroker::new());
        let (mut conn, mut rx) = connection(schema(), broker.clone());
        conn.on_frame(init_frame());
        conn.on_frame(start_frame("sub-1", None));

        conn.on_frame(ClientFrame::Stop { id: "sub-1".to_string() });
        assert!(!conn.owns("sub-1"));
        assert_eq!(broker.subscriber_count("createTodo"), 0);
        assert_eq!(broker.publish("createTodo", &json!({"id": "t1"})), 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn invalid_subscription_document_is_scoped_to_the_id() {
        let broker = Arc::new(SubscriptionBroker::new());
        let (mut conn, _rx) = connection(schema(), broker);
        conn.on_frame(init_frame());

        let frames = conn.on_frame(ClientFrame::Start {
            id: "sub-1".to_string(),
            payload: StartPayload {
                query: "query { listTodos { id } }".to_string(),
                variables: None,
                operation_name: None,
            },
        });
        match &frames[0] {
            ServerFrame::Error { id, payload } => {
                assert_eq!(id.as_deref(), Some("sub-1"));
                assert_eq!(payload.errors[0].error_type, "InvalidSubscription");
            }
            other => panic!("unexpected frame: {other:?}"),
        }
        assert!(conn.is_connected(), "a bad subscription must not kill the connection");
    }

    #[tokio::test]
    async fn close_removes_every_owned_registration_at_once() {
        let broker = Arc::new(SubscriptionBroker::new());
        let (mut conn, mut rx) = connection(schema(), broker.clone());
        conn.on_frame(init_frame());
        conn.on_frame(start_frame("sub-1", None));
        conn.on_frame(ClientFrame::Start {
            id: "sub-2".to_string(),
            payload: StartPayload {
                query: "subscription { onPing { id } }".to_string(),
                variables: None,
                operation_name: None,
            },
        });
        assert_eq!(broker.subscriber_count("createTodo"), 1);
        assert_eq!(broker.subscriber_count("onPing"), 1);

        conn.close();
        conn.close(); // idempotent

        assert!(conn.is_closed());
        assert_eq!(broker.subscriber_count("createTodo"), 0);
        assert_eq!(broker.subscriber_count("onPing"), 0);
        assert_eq!(broker.publish("createTodo", &json!({"id": "t1"})), 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn frames_after_close_are_ignored() {
        let broker = Arc::new(SubscriptionBroker::new());
        let (mut conn, _rx) = connection(schema(), broker);
        conn.on_frame(init_frame());
        conn.close();

        assert!(conn.on_frame(start_frame("sub-1", None)).is_empty());
        assert!(conn.on_frame(ClientFrame::Stop { id: "sub-1".to_string() }).is_empty());
        assert!(conn.on_protocol_error("junk").is_empty());
    }
}
