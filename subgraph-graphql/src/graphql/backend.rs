//! Interfaces provided by a backend data source consumed by the GraphQL API.
//!
//! The entrypoint is [`DataSource`], which describes the interface by which the GraphQL API
//! interacts with the backend data provider. This is the glue between the GraphQL and SQL views of
//! the data model: the SQL model implements [`DataSource`] and the GraphQL layer interacts with the
//! SQL layer exclusively through this trait. Both sides describe the data model with the same
//! [`Catalog`].

use super::{
    descriptor::{Catalog, EntityId, Target},
    filter::Filter,
};
use async_graphql::Value;
use async_trait::async_trait;
use derive_more::Display;
use indexmap::IndexMap;
use std::error::Error;
use std::hash::{Hash, Hasher};

/// The number of rows returned by a plural field when `first` is not given.
pub const DEFAULT_FIRST: i64 = 100;

/// The largest allowed value of `first`.
pub const MAX_FIRST: i64 = 1000;

/// Errors reported by a [`DataSource`].
pub trait QueryError: Error + Send + Sync + 'static {
    /// Whether this error reflects a failure of the data source, rather than a problem with the
    /// request.
    ///
    /// Details of internal errors are hidden from clients unless the service runs in debug mode.
    fn is_internal(&self) -> bool;
}

/// A source of data which can be served by the GraphQL API.
#[async_trait]
pub trait DataSource: Send + Sync + 'static {
    /// Errors reported while attempting to load data.
    type Error: QueryError;

    /// Load a page of rows of `target` matching `args`.
    async fn query(
        &self,
        catalog: &Catalog,
        target: Target,
        args: QueryArgs,
    ) -> Result<Vec<EntityRow>, Self::Error>;

    /// Load every row of `target` matching any of `keys`, in one round trip.
    ///
    /// The order of the results is unspecified. Keys which match no row are simply absent from the
    /// results.
    async fn load(
        &self,
        catalog: &Catalog,
        target: Target,
        keys: &[BatchKey],
    ) -> Result<Vec<EntityRow>, Self::Error>;
}

/// The direction of an ordering.
#[derive(Clone, Copy, Debug, Default, Display, PartialEq, Eq, Hash)]
pub enum OrderDirection {
    #[default]
    #[display(fmt = "asc")]
    Asc,
    #[display(fmt = "desc")]
    Desc,
}

/// Arguments of a plural query.
#[derive(Clone, Debug, PartialEq)]
pub struct QueryArgs {
    pub filter: Option<Filter>,
    /// The name (in the API) of the column to order by, before the primary key tie-break.
    pub order_by: Option<String>,
    pub order_direction: OrderDirection,
    pub first: i64,
    pub skip: i64,
    /// Equality conditions on columns of the target, arising from relation traversal.
    pub pushdown: Vec<(String, Value)>,
}

impl Default for QueryArgs {
    fn default() -> Self {
        Self {
            filter: None,
            order_by: None,
            order_direction: OrderDirection::Asc,
            first: DEFAULT_FIRST,
            skip: 0,
            pushdown: vec![],
        }
    }
}

/// A row of an entity, as served to the API.
#[derive(Clone, Debug, PartialEq)]
pub struct EntityRow {
    /// The concrete entity this row belongs to.
    ///
    /// For rows loaded through a polymorphic group, this is decided by the discriminator.
    pub entity: EntityId,
    /// Column values keyed by the column's name in the API.
    pub values: IndexMap<String, Value>,
}

impl EntityRow {
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values.get(column)
    }

    /// Whether this row matches every column of `key`.
    pub fn matches(&self, key: &BatchKey) -> bool {
        key.columns().iter().all(|(col, val)| {
            self.get(col)
                .map(|v| canonical(v) == canonical(val))
                .unwrap_or(false)
        })
    }

    /// The key of this row with respect to `columns`.
    ///
    /// Returns [`None`] if any of the columns is null or missing.
    pub fn key<'a>(&self, columns: impl IntoIterator<Item = &'a str>) -> Option<BatchKey> {
        BatchKey::new(
            columns
                .into_iter()
                .map(|col| Some((col.to_string(), self.get(col)?.clone())))
                .collect::<Option<Vec<_>>>()?,
        )
    }
}

/// A normalized, order-independent key fragment identifying rows of some target.
///
/// Two keys are equal if they constrain the same columns to equal values, regardless of the order
/// in which the columns were given or the representation of integral numbers.
#[derive(Clone, Debug)]
pub struct BatchKey {
    columns: Vec<(String, Value)>,
    encoded: String,
}

impl BatchKey {
    /// Build a key from column-value pairs.
    ///
    /// Returns [`None`] if there are no columns or any of the values is null, since such a key can
    /// never match a row.
    pub fn new(columns: impl IntoIterator<Item = (String, Value)>) -> Option<Self> {
        let mut columns = columns
            .into_iter()
            .map(|(col, val)| (col, canonical(&val)))
            .collect::<Vec<_>>();
        if columns.is_empty() || columns.iter().any(|(_, val)| *val == Value::Null) {
            return None;
        }
        columns.sort_by(|(a, _), (b, _)| a.cmp(b));
        columns.dedup_by(|(a, _), (b, _)| a == b);
        let encoded = columns
            .iter()
            .map(|(col, val)| format!("{col}={val}"))
            .collect::<Vec<_>>()
            .join("&");
        Some(Self { columns, encoded })
    }

    /// The constrained columns, sorted by name.
    pub fn columns(&self) -> &[(String, Value)] {
        &self.columns
    }

    /// The names of the constrained columns, sorted.
    pub fn column_names(&self) -> impl '_ + Iterator<Item = &str> {
        self.columns.iter().map(|(col, _)| col.as_str())
    }

    /// The canonical encoding of this key.
    pub fn encoded(&self) -> &str {
        &self.encoded
    }
}

impl PartialEq for BatchKey {
    fn eq(&self, other: &Self) -> bool {
        self.encoded == other.encoded
    }
}

impl Eq for BatchKey {}

impl Hash for BatchKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.encoded.hash(state)
    }
}

/// Normalize numbers so that `5` and `5.0` compare equal.
fn canonical(value: &Value) -> Value {
    match value {
        Value::Number(n) => match n.as_f64() {
            Some(f) if n.as_i64().is_none() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                Value::from(f as i64)
            }
            _ => value.clone(),
        },
        Value::List(values) => Value::List(values.iter().map(canonical).collect()),
        Value::Object(fields) => Value::Object(
            fields
                .iter()
                .map(|(name, value)| (name.clone(), canonical(value)))
                .collect(),
        ),
        _ => value.clone(),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use async_graphql::value;

    #[test]
    fn test_batch_key_normalization() {
        let a = BatchKey::new([
            ("b".to_string(), value!("x")),
            ("a".to_string(), value!(5)),
        ])
        .unwrap();
        let b = BatchKey::new([
            ("a".to_string(), value!(5.0)),
            ("b".to_string(), value!("x")),
        ])
        .unwrap();
        assert_eq!(a, b);
        assert_eq!(a.encoded(), b.encoded());
        assert_eq!(a.column_names().collect::<Vec<_>>(), ["a", "b"]);

        let c = BatchKey::new([("a".to_string(), value!(6))]).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn test_null_key() {
        assert_eq!(BatchKey::new([("a".to_string(), Value::Null)]), None);
        assert_eq!(BatchKey::new([]), None);
    }
}
