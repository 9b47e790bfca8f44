//! Operation execution: one resolver call per root field, collected into a
//! `{data, errors}` envelope.
//!
//! Execution failures (parse errors, missing resolvers, resolver errors) are
//! always reported inside the `errors` array; they never become transport
//! failures. For mutations the resolved payloads are additionally handed back
//! as broker events so the HTTP layer can publish them after responding.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::graphql::document::{parse_operation, OperationKind};
use crate::graphql::schema::SimulatorSchema;

/// Wire shape of `POST /graphql` bodies.
#[derive(Debug, Clone, Deserialize)]
pub struct GraphQLRequest {
    pub query: String,
    #[serde(default)]
    pub variables: Option<Value>,
    #[serde(rename = "operationName", default)]
    pub operation_name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphQLError {
    pub message: String,
    #[serde(rename = "errorType", skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<String>>,
}

impl GraphQLError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_type: None,
            path: None,
        }
    }

    fn at_field(message: impl Into<String>, field: &str) -> Self {
        Self {
            message: message.into(),
            error_type: None,
            path: Some(vec![field.to_string()]),
        }
    }
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct GraphQLResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<GraphQLError>,
}

/// One broker event extracted from a successful mutation field.
#[derive(Debug, Clone)]
pub struct MutationEvent {
    /// The mutated root field name, used as the broker topic.
    pub topic: String,
    /// The resolved payload.
    pub payload: Value,
}

/// The response plus the fanout events it produced. Response correctness
/// never depends on what happens to the events.
#[derive(Debug)]
pub struct ExecutionOutcome {
    pub response: GraphQLResponse,
    pub events: Vec<MutationEvent>,
}

impl ExecutionOutcome {
    fn failed(error: GraphQLError) -> Self {
        Self {
            response: GraphQLResponse {
                data: None,
                errors: vec![error],
            },
            events: Vec::new(),
        }
    }
}

/// Execute one GraphQL operation against the loaded schema.
pub async fn execute(schema: &SimulatorSchema, request: &GraphQLRequest) -> ExecutionOutcome {
    let variables = match &request.variables {
        Some(Value::Object(map)) => map.clone(),
        Some(Value::Null) | None => serde_json::Map::new(),
        Some(_) => {
            return ExecutionOutcome::failed(GraphQLError::new("variables must be a JSON object"))
        }
    };

    let operation =
        match parse_operation(&request.query, &variables, request.operation_name.as_deref()) {
            Ok(operation) => operation,
            Err(message) => return ExecutionOutcome::failed(GraphQLError::new(message)),
        };

    let mut data = serde_json::Map::new();
    let mut errors = Vec::new();
    let mut events = Vec::new();

    for field in &operation.fields {
        let key = field.response_key().to_string();

        // Subscriptions execute over the realtime channel; over HTTP the
        // selected field resolves to null with no resolver call.
        if operation.kind == OperationKind::Subscription {
            data.insert(key, Value::Null);
            continue;
        }

        let Some(resolver) = schema.resolver_for(operation.kind, &field.name) else {
            data.insert(key, Value::Null);
            errors.push(GraphQLError::at_field(
                format!("no resolver registered for field '{}'", field.name),
                field.response_key(),
            ));
            continue;
        };

        match resolver(field.arguments.clone()).await {
            Ok(value) => {
                if operation.kind == OperationKind::Mutation {
                    events.push(MutationEvent {
                        topic: field.name.clone(),
                        payload: value.clone(),
                    });
                }
                data.insert(key, value);
            }
            Err(message) => {
                log::debug!("Resolver for '{}' failed: {}", field.name, message);
                data.insert(key, Value::Null);
                errors.push(GraphQLError::at_field(message, field.response_key()));
            }
        }
    }

    ExecutionOutcome {
        response: GraphQLResponse {
            data: Some(Value::Object(data)),
            errors,
        },
        events,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::graphql::schema::{resolver, SimulatorSchema};

    fn demo_schema() -> SimulatorSchema {
        SimulatorSchema::new()
            .query(
                "listTodos",
                resolver(|_args| async { Ok(json!([{"id": "t1"}, {"id": "t2"}])) }),
            )
            .mutation(
                "createTodo",
                resolver(|args| async move {
                    let name = args
                        .get("input")
                        .and_then(|input| input.get("name"))
                        .cloned()
                        .unwrap_or(Value::Null);
                    Ok(json!({"id": "t3", "name": name}))
                }),
            )
            .mutation("failTodo", resolver(|_args| async { Err("boom".to_string()) }))
    }

    fn request(query: &str, variables: Value) -> GraphQLRequest {
        GraphQLRequest {
            query: query.to_string(),
            variables: Some(variables),
            operation_name: None,
        }
    }

    #[tokio::test]
    async fn query_resolves_data_without_events() {
        let outcome = execute(&demo_schema(), &request("{ listTodos { id } }", json!({}))).await;
        assert!(outcome.response.errors.is_empty());
        assert_eq!(
            outcome.response.data.unwrap()["listTodos"],
            json!([{"id": "t1"}, {"id": "t2"}])
        );
        assert!(outcome.events.is_empty());
    }

    #[tokio::test]
    async fn mutation_yields_response_and_event() {
        let outcome = execute(
            &demo_schema(),
            &request(
                "mutation M($input: TodoInput!) { createTodo(input: $input) { id name } }",
                json!({"input": {"name": "ship it"}}),
            ),
        )
        .await;

        assert!(outcome.response.errors.is_empty());
        let data = outcome.response.data.unwrap();
        assert_eq!(data["createTodo"]["name"], json!("ship it"));

        assert_eq!(outcome.events.len(), 1);
        assert_eq!(outcome.events[0].topic, "createTodo");
        assert_eq!(outcome.events[0].payload["id"], json!("t3"));
    }

    #[tokio::test]
    async fn resolver_error_lands_in_errors_array() {
        let outcome =
            execute(&demo_schema(), &request("mutation { failTodo { id } }", json!({}))).await;
        assert_eq!(outcome.response.data.unwrap()["failTodo"], Value::Null);
        assert_eq!(outcome.response.errors.len(), 1);
        assert_eq!(outcome.response.errors[0].message, "boom");
        // A failed mutation field publishes nothing.
        assert!(outcome.events.is_empty());
    }

    #[tokio::test]
    async fn missing_resolver_is_an_execution_error() {
        let outcome = execute(&demo_schema(), &request("{ nosuch { id } }", json!({}))).await;
        assert_eq!(outcome.response.errors.len(), 1);
        assert!(outcome.response.errors[0].message.contains("nosuch"));
    }

    #[tokio::test]
    async fn parse_failure_is_reported_in_response() {
        let outcome = execute(&demo_schema(), &request("query {", json!({}))).await;
        assert!(outcome.response.data.is_none());
        assert_eq!(outcome.response.errors.len(), 1);
    }

    #[tokio::test]
    async fn subscription_over_http_resolves_to_null() {
        let outcome = execute(
            &demo_schema(),
            &request("subscription { onCreateTodo { id } }", json!({})),
        )
        .await;
        assert!(outcome.response.errors.is_empty());
        assert_eq!(outcome.response.data.unwrap()["onCreateTodo"], Value::Null);
        assert!(outcome.events.is_empty());
    }
}
