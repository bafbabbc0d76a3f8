//! The entrypoint for serving requests.
//!
//! A [`Service`] owns the synthesized schema along with everything a request needs on top of it:
//! the request-shape [limits](super::limits), checked before anything executes, and a fresh
//! [`BatchCache`] which is attached to each request and dropped with it.

use super::{
    backend::DataSource,
    descriptor::{BuildError, Catalog},
    limits,
    loader::BatchCache,
    schema, Request, Response, Schema, ServerError,
};
use crate::config::Config;
use std::sync::Arc;

/// A GraphQL service over a data source.
pub struct Service<D> {
    schema: Schema,
    catalog: Arc<Catalog>,
    source: Arc<D>,
    config: Config,
}

impl<D: DataSource> Service<D> {
    /// Synthesize the schema for `catalog` and serve it from `source`.
    pub fn new(
        catalog: impl Into<Arc<Catalog>>,
        source: impl Into<Arc<D>>,
        config: Config,
    ) -> Result<Self, BuildError> {
        let catalog = catalog.into();
        let source = source.into();
        let schema = schema::build(catalog.clone(), source.clone(), config.debug)?;
        tracing::info!(
            entities = catalog.entities().count(),
            interfaces = catalog.interfaces().count(),
            "built schema"
        );
        Ok(Self {
            schema,
            catalog,
            source,
            config,
        })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The schema in SDL.
    pub fn sdl(&self) -> String {
        self.schema.sdl()
    }

    /// Execute a request.
    ///
    /// A request which exceeds any of the configured limits fails without executing any part of
    /// it.
    pub async fn execute(&self, request: impl Into<Request>) -> Response {
        let request = request.into();
        if let Err(err) = limits::check(&request.query, &self.config.limits) {
            tracing::warn!("rejecting request: {err}");
            return Response::from_errors(vec![ServerError::new(err.to_string(), None)]);
        }

        let cache = BatchCache::new(
            self.catalog.clone(),
            self.source.clone(),
            self.config.max_batch_size,
        );
        self.schema.execute(request.data(cache)).await
    }
}
