//! Synthesis of the virtual relation backing a polymorphic group.
//!
//! The relation is a `UNION ALL` with one branch per implementing entity. Every branch selects every
//! column of every implementer under its API name, with a typed `NULL` standing in for the columns
//! its entity lacks, so that the branches line up. Each branch also selects its entity's name as a
//! literal [discriminator](DISCRIMINATOR), which decides the concrete type of each resulting row.

use super::{
    super::db::{Column, FromItem, SelectColumn, SubSelect, Value},
    lower_scalar_type,
    select::{Equalities, DISCRIMINATOR},
    Error,
};
use crate::graphql::descriptor::{to_snake_case, Catalog, Entity, Interface};

/// The `UNION ALL` of the implementers of `interface`.
///
/// `conditions` are applied within each branch, before the union.
pub(super) fn union_all(
    catalog: &Catalog,
    interface: &Interface,
    conditions: &Equalities,
) -> Result<FromItem<'static>, Error> {
    let branches = interface
        .implementers
        .iter()
        .map(|id| branch(interface, catalog.entity(*id), conditions))
        .collect::<Result<_, _>>()?;
    Ok(FromItem::UnionAll {
        alias: to_snake_case(&interface.name).into(),
        branches,
    })
}

fn branch(
    interface: &Interface,
    member: &Entity,
    conditions: &Equalities,
) -> Result<SubSelect<'static>, Error> {
    let mut columns = interface
        .all_columns
        .iter()
        .map(|col| match member.column(&col.name) {
            Some(own) => SelectColumn::Column {
                column: Column::named(own.sql_name.clone()),
                ty: lower_scalar_type(&own.kind),
                alias: Some(col.name.clone().into()),
            },
            None => SelectColumn::Null {
                ty: lower_scalar_type(&col.kind),
                alias: col.name.clone().into(),
            },
        })
        .collect::<Vec<_>>();
    columns.push(SelectColumn::Literal {
        value: Value::Text(member.name.clone()),
        alias: DISCRIMINATOR.into(),
    });

    let filter = if conditions.is_trivial() {
        None
    } else {
        Some(conditions.compile(|name| {
            Ok(member
                .column(name)
                .map(|col| (Column::named(col.sql_name.clone()), col.kind.clone())))
        })?)
    };

    Ok(SubSelect {
        columns,
        table: member.table.clone().into(),
        filter,
    })
}
