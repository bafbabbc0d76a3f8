//! Instantiation of a GraphQL [`DataSource`](gql::DataSource) for a SQL database.

use super::{db, ops};
use crate::graphql::{
    backend::{self as gql, BatchKey, EntityRow, QueryArgs},
    descriptor::{Catalog, Target},
};
use async_trait::async_trait;
use derive_more::From;
use std::fmt::Debug;

#[cfg(feature = "postgres")]
/// A data source implemented using a PostgreSQL database.
pub type PostgresDataSource = SqlDataSource<db::postgres::Connection>;

/// A data source implemented using a SQL database.
#[derive(Clone, Debug, From)]
pub struct SqlDataSource<Db>(Db);

impl<Db: db::Connection> SqlDataSource<Db> {
    /// The underlying connection to the database.
    pub fn inner(&self) -> &Db {
        &self.0
    }

    /// Unwrap this data source to get at the underlying connection.
    pub fn into_inner(self) -> Db {
        self.0
    }
}

#[async_trait]
impl<Db: 'static + db::Connection + Send + Sync> gql::DataSource for SqlDataSource<Db> {
    type Error = ops::Error;

    async fn query(
        &self,
        catalog: &Catalog,
        target: Target,
        args: QueryArgs,
    ) -> Result<Vec<EntityRow>, Self::Error> {
        ops::select::execute(&self.0, catalog, target, args).await
    }

    async fn load(
        &self,
        catalog: &Catalog,
        target: Target,
        keys: &[BatchKey],
    ) -> Result<Vec<EntityRow>, Self::Error> {
        ops::batch::execute(&self.0, catalog, target, keys).await
    }
}
