pub mod document;
pub mod executor;
pub mod schema;
