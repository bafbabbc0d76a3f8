//! Polymorphic groups: entities which jointly implement an interface type.
//!
//! A group is exposed through two derived views of its members:
//! * the *intersection*, which has only the columns (by name and kind) and to-one relations that
//!   every member has. This determines the fields of the interface type, as well as which fields
//!   can be filtered and ordered on when querying the group as a whole.
//! * the *union* of all columns of all members. This is the shape of the virtual relation which the
//!   backend synthesizes for a group, where each member contributes rows to the union with `NULL`
//!   in place of the columns it lacks.

use super::{
    descriptor::{BuildError, Catalog, Column, Entity, Interface, Relation, RelationKind},
    scalar,
};
use async_graphql::dynamic::{self, InterfaceField, TypeRef};

/// The columns common to all `members`, in the order of the first member.
///
/// A column is nullable in the intersection if it is nullable in any member, and part of the
/// primary key only if it is part of the primary key of every member.
pub fn intersect_columns(members: &[&Entity]) -> Vec<Column> {
    let Some((first, rest)) = members.split_first() else {
        return vec![];
    };
    first
        .columns
        .iter()
        .filter_map(|col| {
            let mut common = Column {
                sql_name: col.name.clone(),
                ..col.clone()
            };
            for member in rest {
                let other = member.column(&col.name)?;
                if other.kind != col.kind {
                    return None;
                }
                common.nullable |= other.nullable;
                common.primary_key &= other.primary_key;
            }
            Some(common)
        })
        .collect()
}

/// All columns of any member, in first-seen order.
///
/// Every column of the union is nullable, since a member which lacks a column contributes `NULL`
/// for it. A column is marked as a primary key if it is part of the primary key of any member.
pub fn union_columns(interface: &str, members: &[&Entity]) -> Result<Vec<Column>, BuildError> {
    let mut columns: Vec<Column> = vec![];
    for member in members {
        for col in &member.columns {
            match columns.iter_mut().find(|existing| existing.name == col.name) {
                Some(existing) => {
                    if existing.kind != col.kind {
                        return Err(BuildError::Interface {
                            interface: interface.into(),
                            error: format!(
                                "column {} has kind {} in one implementer and {} in {}",
                                col.name, existing.kind, col.kind, member.name
                            ),
                        });
                    }
                    existing.primary_key |= col.primary_key;
                }
                None => columns.push(Column {
                    sql_name: col.name.clone(),
                    nullable: true,
                    ..col.clone()
                }),
            }
        }
    }
    Ok(columns)
}

/// The to-one relations shared by all `members`.
pub fn common_relations(members: &[&Entity]) -> Vec<Relation> {
    let Some((first, rest)) = members.split_first() else {
        return vec![];
    };
    first
        .relations
        .iter()
        .filter(|rel| rel.kind == RelationKind::One)
        .filter(|rel| {
            rest.iter()
                .all(|member| member.relation(&rel.field) == Some(*rel))
        })
        .cloned()
        .collect()
}

/// The GraphQL interface type for a group.
pub fn interface_type(catalog: &Catalog, interface: &Interface) -> dynamic::Interface {
    let shape = &interface.intersection;
    let mut ty = dynamic::Interface::new(&interface.name);
    for col in &shape.columns {
        ty = ty.field(InterfaceField::new(
            &col.name,
            scalar::output_type(&col.kind, col.nullable),
        ));
    }
    for rel in &shape.relations {
        ty = ty.field(InterfaceField::new(
            &rel.field,
            TypeRef::named(catalog.type_name(rel.target)),
        ));
    }
    ty
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::graphql::descriptor::{test::registry, ColumnDef, EntityDef, InterfaceDef, Target};

    #[test]
    fn test_intersection_nullability() {
        let catalog = Catalog::build(
            [
                EntityDef::new(
                    "A",
                    [
                        ColumnDef::primary_key("id", "ID"),
                        ColumnDef::new("x", "Int"),
                        ColumnDef::new("y", "Int"),
                    ],
                ),
                EntityDef::new(
                    "B",
                    [
                        ColumnDef::primary_key("id", "ID"),
                        ColumnDef::new("x", "Int").nullable(),
                        ColumnDef::new("y", "String"),
                    ],
                ),
            ],
            [InterfaceDef::new("AB", ["A", "B"])],
        );
        // `y` has conflicting kinds, so the union can't be typed.
        assert!(matches!(catalog, Err(BuildError::Interface { .. })));

        let a = Catalog::build(
            [
                EntityDef::new(
                    "A",
                    [ColumnDef::primary_key("id", "ID"), ColumnDef::new("x", "Int")],
                ),
                EntityDef::new(
                    "B",
                    [
                        ColumnDef::new("id", "ID"),
                        ColumnDef::primary_key("key", "Int"),
                        ColumnDef::new("x", "Int").nullable(),
                    ],
                ),
            ],
            [InterfaceDef::new("AB", ["A", "B"])],
        )
        .unwrap();
        let Some(Target::Interface(id)) = a.lookup("AB") else {
            panic!("AB is not an interface");
        };
        let ab = a.interface(id);
        let x = ab.intersection.column("x").unwrap();
        assert!(x.nullable);
        let id_col = ab.intersection.column("id").unwrap();
        assert!(!id_col.primary_key);
        assert!(ab.all_columns.iter().all(|col| col.nullable));
        assert!(ab.all_columns.iter().find(|col| col.name == "key").unwrap().primary_key);
    }

    #[test]
    fn test_interface_type() {
        let catalog = registry();
        let Some(Target::Interface(id)) = catalog.lookup("DomainEvent") else {
            panic!("DomainEvent is not an interface");
        };
        let ty = interface_type(&catalog, catalog.interface(id));
        assert_eq!(ty.type_name(), "DomainEvent");
    }
}
