//! Externally supplied schema bindings: resolver registries, the
//! subscription trigger map, and the realtime auth validator.
//!
//! The simulator never synthesizes resolvers itself. The surrounding tool
//! loads a schema, builds resolver closures for it, and hands everything over
//! as one [`SimulatorSchema`] at composition time.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde_json::Value;

use crate::graphql::document::OperationKind;

/// Coerced arguments of one root field, keyed by argument name.
pub type FieldArguments = serde_json::Map<String, Value>;

/// What a resolver produces: a payload value, or an execution error message
/// that lands in the response `errors` array.
pub type ResolverResult = Result<Value, String>;

/// A boxed async resolver for one root field.
pub type ResolverFn = Arc<dyn Fn(FieldArguments) -> BoxFuture<'static, ResolverResult> + Send + Sync>;

/// Wrap an async closure into a [`ResolverFn`].
pub fn resolver<F, Fut>(f: F) -> ResolverFn
where
    F: Fn(FieldArguments) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ResolverResult> + Send + 'static,
{
    Arc::new(move |arguments| Box::pin(f(arguments)))
}

/// Decides whether a realtime handshake is accepted.
///
/// The simulator delegates every auth decision here; it never interprets the
/// `connection_init` payload itself.
pub trait AuthValidator: Send + Sync {
    /// Returns `Err(message)` to reject the connection.
    fn validate(&self, payload: &Value) -> Result<(), String>;
}

/// Accepts every handshake. The default for local development.
pub struct AllowAll;

impl AuthValidator for AllowAll {
    fn validate(&self, _payload: &Value) -> Result<(), String> {
        Ok(())
    }
}

/// Compares the supplied `x-api-key` (top-level or nested under
/// `authorization`) against a configured key.
pub struct ApiKeyValidator {
    key: String,
}

impl ApiKeyValidator {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

impl AuthValidator for ApiKeyValidator {
    fn validate(&self, payload: &Value) -> Result<(), String> {
        let supplied = payload
            .get("authorization")
            .and_then(|auth| auth.get("x-api-key"))
            .or_else(|| payload.get("x-api-key"))
            .and_then(Value::as_str);
        match supplied {
            Some(key) if key == self.key => Ok(()),
            _ => Err("invalid or missing api key".to_string()),
        }
    }
}

/// The loaded schema: resolver registries per operation kind, the
/// subscription trigger map, and the auth validator.
pub struct SimulatorSchema {
    queries: HashMap<String, ResolverFn>,
    mutations: HashMap<String, ResolverFn>,
    /// subscription root field -> mutation root fields that fire it
    subscription_triggers: HashMap<String, Vec<String>>,
    auth: Arc<dyn AuthValidator>,
}

impl SimulatorSchema {
    pub fn new() -> Self {
        Self {
            queries: HashMap::new(),
            mutations: HashMap::new(),
            subscription_triggers: HashMap::new(),
            auth: Arc::new(AllowAll),
        }
    }

    pub fn with_auth(mut self, auth: Arc<dyn AuthValidator>) -> Self {
        self.auth = auth;
        self
    }

    pub fn query(mut self, field: &str, resolver: ResolverFn) -> Self {
        self.queries.insert(field.to_string(), resolver);
        self
    }

    pub fn mutation(mut self, field: &str, resolver: ResolverFn) -> Self {
        self.mutations.insert(field.to_string(), resolver);
        self
    }

    /// Declare a subscription root field and the mutations that trigger it.
    /// With an empty trigger list the field listens for a mutation of its own
    /// name.
    pub fn subscription(mut self, field: &str, triggers: &[&str]) -> Self {
        self.subscription_triggers
            .insert(field.to_string(), triggers.iter().map(|t| t.to_string()).collect());
        self
    }

    pub fn resolver_for(&self, kind: OperationKind, field: &str) -> Option<&ResolverFn> {
        match kind {
            OperationKind::Query => self.queries.get(field),
            OperationKind::Mutation => self.mutations.get(field),
            OperationKind::Subscription => None,
        }
    }

    /// The broker topics a subscription root field registers under.
    pub fn topics_for_subscription(&self, field: &str) -> Vec<String> {
        match self.subscription_triggers.get(field) {
            Some(triggers) if !triggers.is_empty() => triggers.clone(),
            _ => vec![field.to_string()],
        }
    }

    pub fn auth(&self) -> &dyn AuthValidator {
        self.auth.as_ref()
    }
}

impl Default for SimulatorSchema {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn api_key_validator_accepts_nested_and_flat_keys() {
        let validator = ApiKeyValidator::new("da2-fake");
        assert!(validator.validate(&json!({"x-api-key": "da2-fake"})).is_ok());
        assert!(validator
            .validate(&json!({"authorization": {"x-api-key": "da2-fake"}}))
            .is_ok());
        assert!(validator.validate(&json!({"x-api-key": "wrong"})).is_err());
        assert!(validator.validate(&json!({})).is_err());
    }

    #[test]
    fn trigger_map_falls_back_to_field_name() {
        let schema = SimulatorSchema::new()
            .subscription("onCreateTodo", &["createTodo", "importTodos"])
            .subscription("onPing", &[]);

        assert_eq!(schema.topics_for_subscription("onCreateTodo"), vec!["createTodo", "importTodos"]);
        assert_eq!(schema.topics_for_subscription("onPing"), vec!["onPing"]);
        assert_eq!(schema.topics_for_subscription("undeclared"), vec!["undeclared"]);
    }
}
