//! The GraphQL face of the engine: descriptors, schema synthesis and request handling.

pub mod backend;
pub mod descriptor;
pub mod filter;
pub mod interface;
pub mod limits;
pub mod loader;
pub mod scalar;
pub mod schema;
pub mod service;

// Re-export commonly used `async_graphql` types.
pub use async_graphql::{
    dynamic::{FieldValue, Schema, TypeRef},
    value, Error, Name, Number, Request, Response, Result, ServerError, Value,
};

// Re-export `async_graphql` directly as an escape hatch.
pub extern crate async_graphql;
