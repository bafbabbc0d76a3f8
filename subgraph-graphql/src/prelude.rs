//! Common items that you will always want in scope when serving a subgraph API.

pub use crate::{
    config::{Config, Limits},
    graphql::{
        async_graphql::{self, value},
        backend::DataSource,
        descriptor::{Catalog, ColumnDef, EntityDef, InterfaceDef, RelationDef, RelationKind},
        service::Service,
    },
};
