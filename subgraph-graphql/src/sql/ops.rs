//! Compilation of GraphQL queries into low-level SQL operations.

use super::db::{Type, Value};
use crate::graphql::{self as gql, backend::QueryError, descriptor::ScalarKind, scalar};
use snafu::Snafu;
use std::fmt::Display;

pub mod batch;
pub mod select;
pub mod union;

/// Errors encountered when executing GraphQL operations.
#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("{error}"))]
    Sql { error: String },

    #[snafu(display("error parsing row: {error}"))]
    ParseRow { error: String },

    #[snafu(display("row has unknown type {name}"))]
    UnknownType { name: String },

    #[snafu(display("type mismatch: {error}"))]
    TypeMismatch { error: String },

    #[snafu(display("{entity} has no column {column}"))]
    UnknownColumn { entity: String, column: String },

    #[snafu(display("invalid argument: {error}"))]
    InvalidArgument { error: String },
}

impl QueryError for Error {
    fn is_internal(&self) -> bool {
        matches!(
            self,
            Self::Sql { .. } | Self::ParseRow { .. } | Self::UnknownType { .. }
        )
    }
}

impl Error {
    /// An error in the SQL layer.
    pub fn sql(error: impl Display) -> Self {
        Self::Sql {
            error: error.to_string(),
        }
    }

    fn mismatch(kind: &ScalarKind, value: impl Display) -> Self {
        Self::TypeMismatch {
            error: format!("expected {kind}, got {value}"),
        }
    }

    fn parse_row(kind: &ScalarKind, value: &Value) -> Self {
        Self::ParseRow {
            error: format!("cannot read {value} as {kind}"),
        }
    }
}

/// The SQL type storing values of the given kind.
pub fn lower_scalar_type(kind: &ScalarKind) -> Type {
    match kind {
        ScalarKind::Boolean => Type::Bool,
        ScalarKind::Int => Type::Int4,
        ScalarKind::Float => Type::Float8,
        ScalarKind::BigInt => Type::Numeric,
        ScalarKind::String | ScalarKind::Id => Type::Text,
        ScalarKind::Bytes => Type::Bytea,
        ScalarKind::List(elem) => Type::Array(Box::new(lower_scalar_type(elem))),
    }
}

/// Convert a GraphQL literal to a SQL [`Value`] of the given kind.
fn scalar_to_value(kind: &ScalarKind, val: &gql::Value) -> Result<Value, Error> {
    use gql::Value as V;

    if *val == V::Null {
        return Ok(Value::Null);
    }
    Ok(match (kind, val) {
        (ScalarKind::Boolean, V::Boolean(b)) => Value::Bool(*b),
        (ScalarKind::Int, V::Number(n)) => {
            let n = n
                .as_i64()
                .and_then(|n| i32::try_from(n).ok())
                .ok_or_else(|| Error::mismatch(kind, n))?;
            Value::Int4(n)
        }
        (ScalarKind::Float, V::Number(n)) => {
            Value::from(n.as_f64().ok_or_else(|| Error::mismatch(kind, n))?)
        }
        (ScalarKind::BigInt, V::Number(n)) => {
            Value::Numeric(n.as_i64().ok_or_else(|| Error::mismatch(kind, n))?.into())
        }
        (ScalarKind::BigInt, val) => {
            Value::Numeric(scalar::parse_big_int(val).ok_or_else(|| Error::mismatch(kind, val))?)
        }
        (ScalarKind::String | ScalarKind::Id, V::String(s)) => Value::Text(s.clone()),
        (ScalarKind::Bytes, val) => {
            Value::Bytea(scalar::parse_bytes(val).ok_or_else(|| Error::mismatch(kind, val))?)
        }
        (ScalarKind::List(elem), V::List(vals)) => Value::Array(
            vals.iter()
                .map(|val| scalar_to_value(elem, val))
                .collect::<Result<_, _>>()?,
        ),
        (kind, val) => return Err(Error::mismatch(kind, val)),
    })
}

/// Convert a SQL [`Value`] read from a column of the given kind to a GraphQL value.
fn value_to_scalar(kind: &ScalarKind, val: Value) -> Result<gql::Value, Error> {
    use gql::Value as V;

    Ok(match (kind, val) {
        (_, Value::Null) => V::Null,
        (ScalarKind::Boolean, Value::Bool(b)) => V::Boolean(b),
        (ScalarKind::Int, Value::Int4(n)) => V::from(n),
        (ScalarKind::Int, Value::Int8(n)) => match i32::try_from(n) {
            Ok(n) => V::from(n),
            Err(_) => return Err(Error::parse_row(kind, &Value::Int8(n))),
        },
        (ScalarKind::Float, Value::Float8(x)) => gql::Number::from_f64(x.0)
            .map(V::Number)
            .unwrap_or(V::Null),
        (ScalarKind::Float, Value::Int4(n)) => V::from(f64::from(n)),
        (ScalarKind::BigInt, Value::Numeric(n)) => scalar::serialize_big_int(&n),
        (ScalarKind::BigInt, Value::Int4(n)) => scalar::serialize_big_int(&n.into()),
        (ScalarKind::BigInt, Value::Int8(n)) => scalar::serialize_big_int(&n.into()),
        // Numeric columns are transferred as text.
        (ScalarKind::BigInt, Value::Text(s)) => match s.parse() {
            Ok(n) => scalar::serialize_big_int(&n),
            Err(_) => return Err(Error::parse_row(kind, &Value::Text(s))),
        },
        (ScalarKind::String | ScalarKind::Id, Value::Text(s)) => V::String(s),
        (ScalarKind::Bytes, Value::Bytea(bytes)) => scalar::serialize_bytes(&bytes),
        (ScalarKind::List(elem), Value::Array(vals)) => V::List(
            vals.into_iter()
                .map(|val| value_to_scalar(elem, val))
                .collect::<Result<_, _>>()?,
        ),
        (kind, val) => return Err(Error::parse_row(kind, &val)),
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::graphql::value;
    use num_bigint::BigInt;

    #[test]
    fn test_scalar_to_value() {
        assert_eq!(
            scalar_to_value(&ScalarKind::Int, &value!(5)).unwrap(),
            Value::Int4(5)
        );
        assert_eq!(
            scalar_to_value(&ScalarKind::BigInt, &value!("123456789012345678901234567890"))
                .unwrap(),
            Value::Numeric("123456789012345678901234567890".parse::<BigInt>().unwrap())
        );
        assert_eq!(
            scalar_to_value(&ScalarKind::Bytes, &value!([1, 255])).unwrap(),
            Value::Bytea(vec![1, 255])
        );
        assert_eq!(
            scalar_to_value(&"[ID]".parse().unwrap(), &value!(["a"])).unwrap(),
            Value::Array(vec!["a".into()])
        );
        assert_eq!(
            scalar_to_value(&ScalarKind::String, &gql::Value::Null).unwrap(),
            Value::Null
        );

        // Out of range and mistyped literals are request errors.
        for (kind, val) in [
            (ScalarKind::Int, value!(5_000_000_000i64)),
            (ScalarKind::String, value!(5)),
            (ScalarKind::BigInt, value!("x")),
            (ScalarKind::Bytes, value!([256])),
        ] {
            let err = scalar_to_value(&kind, &val).unwrap_err();
            assert!(matches!(err, Error::TypeMismatch { .. }), "{err}");
            assert!(!err.is_internal());
        }
    }

    #[test]
    fn test_value_to_scalar() {
        assert_eq!(
            value_to_scalar(&ScalarKind::BigInt, Value::Text("007".into())).unwrap(),
            value!("7")
        );
        assert_eq!(
            value_to_scalar(&ScalarKind::BigInt, Value::Numeric(42.into())).unwrap(),
            value!("42")
        );
        assert_eq!(
            value_to_scalar(
                &"[Int]".parse().unwrap(),
                Value::Array(vec![1.into(), 2.into()])
            )
            .unwrap(),
            value!([1, 2])
        );
        assert_eq!(
            value_to_scalar(&ScalarKind::Int, Value::Null).unwrap(),
            gql::Value::Null
        );

        let err = value_to_scalar(&ScalarKind::Int, Value::Text("x".into())).unwrap_err();
        assert!(err.is_internal());
    }

    #[test]
    fn test_lower_scalar_type() {
        assert_eq!(
            lower_scalar_type(&"[BigInt]".parse().unwrap()).to_string(),
            "numeric[]"
        );
        assert_eq!(lower_scalar_type(&ScalarKind::Id), Type::Text);
    }
}
