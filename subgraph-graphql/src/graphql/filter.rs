//! Filter inputs: the suffix grammar of `where` arguments.
//!
//! Each entity `E` gets an input type `E_filter` whose fields are `{column}{suffix}` pairs, where
//! the suffix selects a comparison operator. Which suffixes are available depends on the scalar
//! family of the column. `and` and `or` fields take lists of the same input type and combine
//! recursively. Sibling keys of one filter value are implicitly combined with AND.
//!
//! At request time, [`parse`] turns a `where` value back into a [`Filter`] tree by matching each key
//! against the *longest* suffix it ends with, so that `x_not_in` is read as `x` with `_not_in`
//! rather than `x_not` with `_in`. The field left over after stripping the suffix must exist; no
//! shorter suffix is tried if it does not.

use super::{
    descriptor::{Entity, Relation, RelationKind, ScalarKind},
    scalar,
};
use async_graphql::{
    dynamic::{Enum, EnumItem, InputObject, InputValue, TypeRef},
    Name, Value,
};
use derive_more::Display;
use snafu::Snafu;

/// Errors in a `where` argument.
#[derive(Clone, Debug, Snafu, PartialEq, Eq)]
pub enum FilterError {
    #[snafu(display("{entity} has no field matching filter {key}"))]
    UnknownField { entity: String, key: String },

    #[snafu(display("filter {key} is not supported on {kind} field"))]
    UnsupportedFilter { key: String, kind: ScalarKind },

    #[snafu(display("malformed filter: {message}"))]
    Malformed { message: String },
}

/// A comparison operator, selected by a filter key suffix.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash)]
pub enum FilterOp {
    #[display(fmt = "=")]
    Eq,
    #[display(fmt = "!=")]
    Not,
    #[display(fmt = "IN")]
    In,
    #[display(fmt = "NOT IN")]
    NotIn,
    #[display(fmt = "HAS")]
    Has,
    #[display(fmt = "NOT HAS")]
    NotHas,
    #[display(fmt = ">")]
    Gt,
    #[display(fmt = "<")]
    Lt,
    #[display(fmt = ">=")]
    Gte,
    #[display(fmt = "<=")]
    Lte,
    #[display(fmt = "CONTAINS")]
    Contains,
    #[display(fmt = "NOT CONTAINS")]
    NotContains,
    #[display(fmt = "STARTS WITH")]
    StartsWith,
    #[display(fmt = "ENDS WITH")]
    EndsWith,
    #[display(fmt = "NOT STARTS WITH")]
    NotStartsWith,
    #[display(fmt = "NOT ENDS WITH")]
    NotEndsWith,
}

impl FilterOp {
    /// Every operator, in the order their fields appear in filter types.
    pub const ALL: [Self; 16] = [
        Self::Eq,
        Self::Not,
        Self::Gt,
        Self::Lt,
        Self::Gte,
        Self::Lte,
        Self::In,
        Self::NotIn,
        Self::Has,
        Self::NotHas,
        Self::Contains,
        Self::NotContains,
        Self::StartsWith,
        Self::NotStartsWith,
        Self::EndsWith,
        Self::NotEndsWith,
    ];

    pub fn suffix(&self) -> &'static str {
        match self {
            Self::Eq => "",
            Self::Not => "_not",
            Self::In => "_in",
            Self::NotIn => "_not_in",
            Self::Has => "_has",
            Self::NotHas => "_not_has",
            Self::Gt => "_gt",
            Self::Lt => "_lt",
            Self::Gte => "_gte",
            Self::Lte => "_lte",
            Self::Contains => "_contains",
            Self::NotContains => "_not_contains",
            Self::StartsWith => "_starts_with",
            Self::EndsWith => "_ends_with",
            Self::NotStartsWith => "_not_starts_with",
            Self::NotEndsWith => "_not_ends_with",
        }
    }

    /// Whether this operator can be applied to a column of the given kind.
    pub fn applies_to(&self, kind: &ScalarKind) -> bool {
        match self {
            Self::Eq | Self::Not => true,
            Self::In | Self::NotIn => !kind.is_list(),
            Self::Has | Self::NotHas => kind.is_list(),
            Self::Gt | Self::Lt | Self::Gte | Self::Lte => kind.is_numeric() || kind.is_textual(),
            Self::Contains
            | Self::NotContains
            | Self::StartsWith
            | Self::EndsWith
            | Self::NotStartsWith
            | Self::NotEndsWith => kind.is_textual(),
        }
    }

    /// The type of the argument of this operator, applied to a column of the given kind.
    pub fn argument_type(&self, kind: &ScalarKind) -> TypeRef {
        match self {
            Self::In | Self::NotIn => {
                TypeRef::List(Box::new(TypeRef::NonNull(Box::new(scalar::base_type(kind)))))
            }
            Self::Has | Self::NotHas => match kind.element() {
                Some(elem) => scalar::base_type(elem),
                None => scalar::base_type(kind),
            },
            _ => scalar::base_type(kind),
        }
    }

    /// Whether a `null` argument is meaningful for this operator.
    pub fn accepts_null(&self) -> bool {
        matches!(self, Self::Eq | Self::Not)
    }

    /// Split a filter key into a field name and operator.
    ///
    /// The longest suffix which leaves a non-empty field name wins.
    pub fn split(key: &str) -> impl '_ + Iterator<Item = (&str, Self)> {
        let mut ops = Self::ALL
            .into_iter()
            .filter(|op| key.len() > op.suffix().len() && key.ends_with(op.suffix()))
            .collect::<Vec<_>>();
        ops.sort_by_key(|op| std::cmp::Reverse(op.suffix().len()));
        ops.into_iter()
            .map(move |op| (&key[..key.len() - op.suffix().len()], op))
    }
}

/// A parsed `where` argument.
#[derive(Clone, Debug, PartialEq)]
pub enum Filter {
    /// All of the sub-filters must hold. Empty means always true.
    All(Vec<Filter>),
    /// At least one of the sub-filters must hold. Empty means always false.
    Any(Vec<Filter>),
    Predicate(Predicate),
}

impl Filter {
    /// Combine filters with AND, collapsing trivial cases.
    pub fn all(filters: impl IntoIterator<Item = Filter>) -> Self {
        let mut filters = filters.into_iter().collect::<Vec<_>>();
        if filters.len() == 1 {
            filters.remove(0)
        } else {
            Self::All(filters)
        }
    }

    /// Combine filters with OR, collapsing trivial cases.
    pub fn any(filters: impl IntoIterator<Item = Filter>) -> Self {
        let mut filters = filters.into_iter().collect::<Vec<_>>();
        if filters.len() == 1 {
            filters.remove(0)
        } else {
            Self::Any(filters)
        }
    }
}

/// A single comparison between a column and a literal.
#[derive(Clone, Debug, PartialEq)]
pub struct Predicate {
    /// The name of the column in the API.
    pub column: String,
    pub kind: ScalarKind,
    pub op: FilterOp,
    pub value: Value,
}

/// The name of the filter input type for an entity or interface.
pub fn filter_type_name(type_name: &str) -> String {
    format!("{type_name}_filter")
}

/// The name of the order-by enumeration for an entity or interface.
pub fn order_by_type_name(type_name: &str) -> String {
    format!("{type_name}_orderBy")
}

/// The name of the ordering direction enumeration.
pub const ORDER_DIRECTION: &str = "OrderDirection";

/// The filter input type for an entity or the intersection of a group.
pub fn filter_type(shape: &Entity) -> InputObject {
    let name = filter_type_name(&shape.name);
    let mut ty = InputObject::new(&name);
    for col in &shape.columns {
        for op in FilterOp::ALL {
            if op.applies_to(&col.kind) {
                ty = ty.field(InputValue::new(
                    format!("{}{}", col.name, op.suffix()),
                    op.argument_type(&col.kind),
                ));
            }
        }
    }
    for (rel, kind) in relation_shorthands(shape) {
        for op in FilterOp::ALL {
            if op.applies_to(kind) {
                ty = ty.field(InputValue::new(
                    format!("{}{}", rel.field, op.suffix()),
                    op.argument_type(kind),
                ));
            }
        }
    }
    ty.field(InputValue::new("and", TypeRef::named_nn_list(&name)))
        .field(InputValue::new("or", TypeRef::named_nn_list(&name)))
}

/// The order-by enumeration for an entity or the intersection of a group.
///
/// Returns [`None`] if there is nothing to order by.
pub fn order_by_type(shape: &Entity) -> Option<Enum> {
    if shape.columns.is_empty() {
        return None;
    }
    Some(
        Enum::new(order_by_type_name(&shape.name))
            .items(shape.columns.iter().map(|col| EnumItem::new(&col.name))),
    )
}

/// The ordering direction enumeration.
pub fn order_direction_type() -> Enum {
    Enum::new(ORDER_DIRECTION)
        .item(EnumItem::new("asc"))
        .item(EnumItem::new("desc"))
}

/// To-one relations which can be filtered on directly, with the kind of their foreign key.
fn relation_shorthands(shape: &Entity) -> impl '_ + Iterator<Item = (&Relation, &ScalarKind)> {
    shape.relations.iter().filter_map(|rel| {
        if rel.kind != RelationKind::One || rel.local.len() != 1 {
            return None;
        }
        // Skip relations which would collide with a column filter.
        if shape.column(&rel.field).is_some() {
            return None;
        }
        let col = shape.column(&rel.local[0])?;
        Some((rel, &col.kind))
    })
}

/// Parse a `where` argument against the shape of the queried entity.
pub fn parse(shape: &Entity, value: &Value) -> Result<Filter, FilterError> {
    let Value::Object(fields) = value else {
        return Err(FilterError::Malformed {
            message: format!("expected an object, got {value}"),
        });
    };
    let mut filters = vec![];
    for (key, value) in fields {
        match key.as_str() {
            "and" => filters.push(Filter::All(parse_list(shape, key, value)?)),
            "or" => filters.push(Filter::Any(parse_list(shape, key, value)?)),
            _ => filters.push(Filter::Predicate(parse_predicate(shape, key, value)?)),
        }
    }
    Ok(Filter::all(filters))
}

fn parse_list(shape: &Entity, key: &Name, value: &Value) -> Result<Vec<Filter>, FilterError> {
    let Value::List(values) = value else {
        return Err(FilterError::Malformed {
            message: format!("{key} expects a list of filters, got {value}"),
        });
    };
    values.iter().map(|value| parse(shape, value)).collect()
}

fn parse_predicate(shape: &Entity, key: &Name, value: &Value) -> Result<Predicate, FilterError> {
    let unknown = || FilterError::UnknownField {
        entity: shape.name.clone(),
        key: key.to_string(),
    };
    let (field, op) = FilterOp::split(key).next().ok_or_else(unknown)?;
    let (column, kind) = match shape.column(field) {
        Some(col) => (col.name.clone(), col.kind.clone()),
        None => {
            // The shorthand compares the local foreign key.
            let (rel, kind) = relation_shorthands(shape)
                .find(|(rel, _)| rel.field == field)
                .ok_or_else(unknown)?;
            (rel.local[0].clone(), kind.clone())
        }
    };

    if !op.applies_to(&kind) {
        return Err(FilterError::UnsupportedFilter {
            key: key.to_string(),
            kind,
        });
    }
    if *value == Value::Null && !op.accepts_null() {
        return Err(FilterError::Malformed {
            message: format!("{key} does not accept null"),
        });
    }
    if matches!(op, FilterOp::In | FilterOp::NotIn) && !matches!(value, Value::List(_)) {
        return Err(FilterError::Malformed {
            message: format!("{key} expects a list, got {value}"),
        });
    }
    Ok(Predicate {
        column,
        kind,
        op,
        value: value.clone(),
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::graphql::descriptor::{test::registry, Target};
    use async_graphql::value;

    fn domain() -> Entity {
        let catalog = registry();
        catalog
            .entity(catalog.entity_named("Domain").unwrap())
            .clone()
    }

    fn pred(column: &str, kind: ScalarKind, op: FilterOp, value: Value) -> Filter {
        Filter::Predicate(Predicate {
            column: column.into(),
            kind,
            op,
            value,
        })
    }

    #[test]
    fn test_longest_suffix() {
        let splits = FilterOp::split("name_not_in").collect::<Vec<_>>();
        assert_eq!(splits[0], ("name", FilterOp::NotIn));
        assert!(splits.contains(&("name_not", FilterOp::In)));

        // A column whose name ends in a suffix is still addressable by equality.
        let splits = FilterOp::split("_not").collect::<Vec<_>>();
        assert_eq!(splits, [("_not", FilterOp::Eq)]);
    }

    #[test]
    fn test_parse() {
        let domain = domain();
        assert_eq!(
            parse(&domain, &value!({"name_not_in": ["a", "b"]})).unwrap(),
            pred(
                "name",
                ScalarKind::String,
                FilterOp::NotIn,
                value!(["a", "b"])
            )
        );
        assert_eq!(
            parse(&domain, &value!({"ttl_gte": 5, "ttl": null})).unwrap(),
            Filter::All(vec![
                pred("ttl", ScalarKind::Int, FilterOp::Gte, value!(5)),
                pred("ttl", ScalarKind::Int, FilterOp::Eq, Value::Null),
            ])
        );
        assert_eq!(
            parse(&domain, &value!({"labels_has": "eth"})).unwrap(),
            pred(
                "labels",
                "[String]".parse().unwrap(),
                FilterOp::Has,
                value!("eth")
            )
        );
    }

    #[test]
    fn test_combinators() {
        let domain = domain();
        let nested = parse(
            &domain,
            &value!({"and": [{"ttl_gt": 1}, {"ttl_lt": 10}]}),
        )
        .unwrap();
        assert_eq!(
            nested,
            Filter::All(vec![
                pred("ttl", ScalarKind::Int, FilterOp::Gt, value!(1)),
                pred("ttl", ScalarKind::Int, FilterOp::Lt, value!(10)),
            ])
        );
        assert_eq!(
            parse(&domain, &value!({"or": []})).unwrap(),
            Filter::Any(vec![])
        );
        assert!(matches!(
            parse(&domain, &value!({"or": {"ttl": 1}})),
            Err(FilterError::Malformed { .. })
        ));
    }

    #[test]
    fn test_relation_shorthand() {
        let domain = domain();
        assert_eq!(
            parse(&domain, &value!({"ownerAccount_in": ["0x1"]})).unwrap(),
            pred("owner", ScalarKind::Id, FilterOp::In, value!(["0x1"]))
        );
        // To-many relations cannot be filtered on.
        assert!(matches!(
            parse(&domain, &value!({"events": "x"})),
            Err(FilterError::UnknownField { .. })
        ));
    }

    #[test]
    fn test_errors() {
        let domain = domain();
        assert!(matches!(
            parse(&domain, &value!({"colour": "red"})),
            Err(FilterError::UnknownField { .. })
        ));
        assert!(matches!(
            parse(&domain, &value!({"ttl_contains": 1})),
            Err(FilterError::UnsupportedFilter { .. })
        ));
        assert!(matches!(
            parse(&domain, &value!({"labels_in": [["a"]]})),
            Err(FilterError::UnsupportedFilter { .. })
        ));
        assert!(matches!(
            parse(&domain, &value!({"name_in": null})),
            Err(FilterError::Malformed { .. })
        ));
    }

    #[test]
    fn test_interface_filter() {
        let catalog = registry();
        let shape = catalog.shape(catalog.lookup("DomainEvent").unwrap());
        assert!(matches!(catalog.lookup("DomainEvent"), Some(Target::Interface(_))));
        assert_eq!(
            parse(shape, &value!({"blockNumber_lte": 7})).unwrap(),
            pred("blockNumber", ScalarKind::Int, FilterOp::Lte, value!(7))
        );
        // Columns of only some implementers are not part of the interface.
        assert!(matches!(
            parse(shape, &value!({"owner": "0x1"})),
            Err(FilterError::UnknownField { .. })
        ));
    }
}
