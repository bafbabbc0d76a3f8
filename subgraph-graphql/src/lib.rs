//! Subgraph GraphQL serves the query API of a legacy subgraph-style GraphQL service on top of a
//! relational store populated by an external indexer. It consists of two sections:
//!
//! * A frontend which, given a declarative [descriptor](graphql::descriptor) of the store's tables,
//!   columns and relationships, plus a list of polymorphic groups, synthesizes a complete
//!   [dynamic schema](graphql::schema) at startup: one object type per entity, per-entity filter
//!   inputs and order-by enumerations, and an interface type per polymorphic group. Clients written
//!   against the legacy API see the same filter suffix grammar, ordering and pagination semantics
//!   they always have.
//! * A [backend](graphql::backend), which is responsible for translating typed query arguments into
//!   queries against the relational store. The backend is agnostic to the specifics of the data
//!   model; it works from the same descriptors the frontend does. Polymorphic fields are served by
//!   synthesizing a discriminated `UNION ALL` across every implementing table, so pagination is
//!   correct over the combined result set.
//!
//! This crate comes with a [sql] backend, which provides a PostgreSQL target as well as a mock
//! database, which is useful for lightweight testing. Sibling lookups arising from relation
//! traversal are coalesced by a per-request [batch cache](graphql::loader).

use std::sync::Once;
use tracing_subscriber::EnvFilter;

pub mod config;
pub mod graphql;
pub mod prelude;
#[cfg(feature = "sql")]
pub mod sql;

/// Initialize tracing.
pub fn init_logging() {
    static ONCE: Once = Once::new();

    ONCE.call_once(|| {
        // Another handler may already be installed by the embedding application.
        let _ = color_eyre::install();
        tracing_subscriber::fmt()
            .with_ansi(true)
            .with_env_filter(EnvFilter::from_default_env())
            .init();
    });
}
