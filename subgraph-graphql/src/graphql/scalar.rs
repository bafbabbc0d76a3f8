//! Mapping from column scalar kinds to GraphQL types.

use super::descriptor::ScalarKind;
use async_graphql::{
    dynamic::{Scalar, TypeRef},
    Value,
};
use num_bigint::BigInt;

/// The name of the arbitrary-precision integer scalar.
pub const BIG_INT: &str = "BigInt";

/// The GraphQL type of a value of the given kind, without any nullability wrapper.
///
/// List elements are always non-null.
pub fn base_type(kind: &ScalarKind) -> TypeRef {
    match kind {
        ScalarKind::Boolean => TypeRef::named(TypeRef::BOOLEAN),
        ScalarKind::Int => TypeRef::named(TypeRef::INT),
        ScalarKind::Float => TypeRef::named(TypeRef::FLOAT),
        ScalarKind::BigInt => TypeRef::named(BIG_INT),
        ScalarKind::String => TypeRef::named(TypeRef::STRING),
        ScalarKind::Id => TypeRef::named(TypeRef::ID),
        ScalarKind::Bytes => TypeRef::named_nn_list(TypeRef::INT),
        ScalarKind::List(elem) => {
            TypeRef::List(Box::new(TypeRef::NonNull(Box::new(base_type(elem)))))
        }
    }
}

/// The GraphQL type of a column.
pub fn output_type(kind: &ScalarKind, nullable: bool) -> TypeRef {
    let ty = base_type(kind);
    if nullable {
        ty
    } else {
        TypeRef::NonNull(Box::new(ty))
    }
}

/// The `BigInt` scalar.
///
/// Values are serialized as decimal strings. Only string literals which parse as an integer are
/// accepted as input.
pub fn big_int_scalar() -> Scalar {
    Scalar::new(BIG_INT)
        .description("An arbitrary-precision integer, represented as a decimal string")
        .validator(|value| parse_big_int(value).is_some())
}

/// Interpret a GraphQL input value as a big integer.
pub fn parse_big_int(value: &Value) -> Option<BigInt> {
    match value {
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Represent a big integer as a GraphQL value.
pub fn serialize_big_int(n: &BigInt) -> Value {
    Value::String(n.to_string())
}

/// Represent binary data as a GraphQL value.
pub fn serialize_bytes(bytes: &[u8]) -> Value {
    Value::List(bytes.iter().map(|b| Value::from(*b)).collect())
}

/// Interpret a GraphQL input value as binary data.
pub fn parse_bytes(value: &Value) -> Option<Vec<u8>> {
    match value {
        Value::List(bytes) => bytes
            .iter()
            .map(|b| match b {
                Value::Number(n) => n.as_u64().and_then(|n| u8::try_from(n).ok()),
                _ => None,
            })
            .collect(),
        _ => None,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use async_graphql::value;

    #[test]
    fn test_output_types() {
        assert_eq!(output_type(&ScalarKind::Int, false).to_string(), "Int!");
        assert_eq!(output_type(&ScalarKind::BigInt, true).to_string(), "BigInt");
        assert_eq!(output_type(&ScalarKind::Bytes, false).to_string(), "[Int!]!");
        assert_eq!(
            output_type(&"[[String]]".parse().unwrap(), true).to_string(),
            "[[String!]!]"
        );
    }

    #[test]
    fn test_big_int() {
        let n: BigInt = "123456789012345678901234567890".parse().unwrap();
        assert_eq!(parse_big_int(&serialize_big_int(&n)), Some(n));
        assert_eq!(parse_big_int(&value!(5)), None);
        assert_eq!(parse_big_int(&value!("5.5")), None);
        assert_eq!(parse_big_int(&value!("-5")), Some(BigInt::from(-5)));
    }

    #[test]
    fn test_bytes() {
        assert_eq!(serialize_bytes(&[1, 255]), value!([1, 255]));
        assert_eq!(parse_bytes(&value!([1, 255])), Some(vec![1, 255]));
        assert_eq!(parse_bytes(&value!([256])), None);
    }
}
