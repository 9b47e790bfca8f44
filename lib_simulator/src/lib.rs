// Declare the modules to re-export
pub mod core;
pub mod errors;
pub mod graphql;
pub mod http;
pub mod realtime;
pub mod simulator;

// Re-export the pieces callers compose
pub use crate::core::broker::{ConnectionId, Delivery, Predicate, SubscriptionBroker};
pub use crate::core::ports::{resolve_port, BASE_PORT, MAX_PORT};
pub use crate::errors::SimulatorError;
pub use crate::graphql::executor::{GraphQLError, GraphQLRequest, GraphQLResponse};
pub use crate::graphql::schema::{
    resolver, AllowAll, ApiKeyValidator, AuthValidator, FieldArguments, ResolverFn, ResolverResult,
    SimulatorSchema,
};
pub use crate::simulator::{Simulator, SimulatorConfig, SimulatorEndpoint};
