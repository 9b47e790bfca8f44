//! The HTTP operation endpoint: `POST /graphql`.
//!
//! Executes one operation per request and answers with the `{data, errors}`
//! envelope. Mutation fanout is published from a spawned task after the
//! response payload is computed, so a broken subscriber can never alter or
//! delay the HTTP reply. Only an unparseable request body produces a non-200
//! status (axum's `Json` extractor rejects it before the handler runs).

use std::sync::Arc;

use axum::extract::State;
use axum::Json;

use crate::graphql::executor::{execute, GraphQLRequest, GraphQLResponse};
use crate::simulator::AppState;

pub async fn graphql_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<GraphQLRequest>,
) -> Json<GraphQLResponse> {
    let outcome = execute(&state.schema, &request).await;

    if !outcome.events.is_empty() {
        let broker = state.broker.clone();
        let events = outcome.events;
        // Fire-and-forget: fanout runs after (and independently of) the
        // response. Failures stay inside this task.
        tokio::spawn(async move {
            for event in events {
                let delivered = broker.publish(&event.topic, &event.payload);
                log::debug!(
                    "Mutation '{}' fanned out to {} subscriber(s)",
                    event.topic,
                    delivered
                );
            }
        });
    }

    Json(outcome.response)
}
