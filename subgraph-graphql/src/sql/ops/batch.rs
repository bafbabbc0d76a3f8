//! Batched lookups of rows by key.
//!
//! A batch of keys becomes a single query whose filter is the disjunction of one conjunction of
//! column equalities per key. For a polymorphic group, the filter is applied within each branch of
//! the union.

use super::{
    super::db::{Clause, Connection},
    select::{fetch, ColumnMap, Equalities},
    Error,
};
use crate::graphql::{
    backend::{BatchKey, EntityRow},
    descriptor::{Catalog, Target},
};

/// Load every row of `target` matching any of `keys`.
pub async fn execute<C: Connection>(
    conn: &C,
    catalog: &Catalog,
    target: Target,
    keys: &[BatchKey],
) -> Result<Vec<EntityRow>, Error> {
    if keys.is_empty() {
        return Ok(vec![]);
    }
    tracing::debug!(entity = %catalog.type_name(target), keys = keys.len(), "batched lookup");

    let columns = ColumnMap::new(catalog, target);
    let (from, filter) = columns.from(&Equalities::any_key(keys))?;
    fetch(conn, &columns, from, filter.map(Clause::Where).into_iter().collect()).await
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{graphql::value, init_logging, sql::data_source::test::registry_db};

    fn key(columns: &[(&str, async_graphql::Value)]) -> BatchKey {
        BatchKey::new(
            columns
                .iter()
                .map(|(col, val)| (col.to_string(), val.clone())),
        )
        .unwrap()
    }

    #[async_std::test]
    async fn test_batch() {
        init_logging();
        let (catalog, conn) = registry_db().await;
        let target = catalog.lookup("Domain").unwrap();

        let keys = [
            key(&[("id", value!("d1"))]),
            key(&[("id", value!("d3"))]),
            key(&[("id", value!("missing"))]),
            // A key on a different set of columns.
            key(&[("owner", value!("a2")), ("ttl", value!(60))]),
        ];
        let before = conn.statements();
        let mut rows = execute(&conn, &catalog, target, &keys).await.unwrap();
        assert_eq!(conn.statements(), before + 1);

        rows.sort_by_key(|row| row.get("id").unwrap().to_string());
        assert_eq!(
            rows.iter()
                .map(|row| row.get("id").unwrap().clone())
                .collect::<Vec<_>>(),
            [value!("d1"), value!("d2"), value!("d3")]
        );
        for key in &keys[..2] {
            assert!(rows.iter().any(|row| row.matches(key)));
        }
        assert!(!rows.iter().any(|row| row.matches(&keys[2])));

        // No keys, no query.
        assert!(execute(&conn, &catalog, target, &[])
            .await
            .unwrap()
            .is_empty());
        assert_eq!(conn.statements(), before + 1);
    }

    #[async_std::test]
    async fn test_batch_union() {
        init_logging();
        let (catalog, conn) = registry_db().await;
        let target = catalog.lookup("DomainEvent").unwrap();

        let keys = [key(&[("id", value!("e1"))]), key(&[("id", value!("e2"))])];
        let rows = execute(&conn, &catalog, target, &keys).await.unwrap();
        let mut types = rows
            .iter()
            .map(|row| catalog.entity(row.entity).name.as_str())
            .collect::<Vec<_>>();
        types.sort();
        assert_eq!(types, ["NewResolver", "Transfer"]);
    }
}
