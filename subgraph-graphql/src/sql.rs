//! A [`DataSource`](crate::graphql::backend::DataSource) over a relational store.
//!
//! Queries are compiled by [`ops`] into statements against the abstract [`db`] interface, which
//! is instantiated for PostgreSQL and, in tests, an in-memory mock.

pub mod data_source;
pub mod db;
mod ops;

pub use data_source::*;
