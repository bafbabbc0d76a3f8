//! Synthesis of the dynamic GraphQL schema from a [`Catalog`].
//!
//! For every entity `E` the schema contains
//! * an object type `E`, with a field per column and per relation, implementing every interface
//!   `E` participates in,
//! * a filter input type `E_filter` and an order-by enumeration `E_orderBy`,
//! * root query fields `e(<primary key>): E` and `es(where, orderBy, orderDirection, first, skip):
//!   [E!]!`.
//!
//! Every polymorphic group `I` contributes an interface type `I`, filter and order-by types derived
//! from the intersection of its implementers, and a plural root query field.
//!
//! Resolvers do not touch the store directly. Plural fields go through [`DataSource::query`]; all
//! single-row lookups go through the request's [`BatchCache`].

use super::{
    backend::{
        BatchKey, DataSource, EntityRow, OrderDirection, QueryArgs, QueryError, DEFAULT_FIRST,
        MAX_FIRST,
    },
    descriptor::{BuildError, Catalog, Entity, EntityId, Relation, RelationKind, Target},
    filter, interface,
    loader::BatchCache,
    scalar,
};
use async_graphql::{
    dynamic::{
        Field, FieldFuture, FieldValue, InputValue, Object, ObjectAccessor, ResolverContext,
        Schema, TypeRef, ValueAccessor,
    },
    Error, Name, Value,
};
use std::collections::HashSet;
use std::sync::Arc;

/// The name of the root query type.
pub const QUERY: &str = "Query";

/// State shared by all resolvers of a schema.
pub struct Engine<D> {
    catalog: Arc<Catalog>,
    source: Arc<D>,
    debug: bool,
}

impl<D: DataSource> Engine<D> {
    pub fn new(catalog: Arc<Catalog>, source: Arc<D>, debug: bool) -> Self {
        Self {
            catalog,
            source,
            debug,
        }
    }

    /// Convert a data source error into a GraphQL error.
    ///
    /// Internal errors are logged in full, but only reported in full to the client in debug mode.
    fn error(&self, err: &D::Error) -> Error {
        if err.is_internal() {
            tracing::error!("error executing query: {err}");
            if !self.debug {
                return Error::new("internal error");
            }
        }
        Error::new(err.to_string())
    }

    /// Interpret the arguments of a plural field.
    fn query_args(&self, target: Target, args: &ObjectAccessor) -> Result<QueryArgs, Error> {
        let shape = self.catalog.shape(target);
        let mut query = QueryArgs::default();

        if let Some(first) = arg(args, "first") {
            query.first = first.i64()?;
        }
        if query.first < 0 {
            return Err(Error::new(format!(
                "first must be non-negative, got {}",
                query.first
            )));
        }
        if query.first > MAX_FIRST {
            return Err(Error::new(format!(
                "first must be at most {MAX_FIRST}, got {}",
                query.first
            )));
        }

        if let Some(skip) = arg(args, "skip") {
            query.skip = skip.i64()?;
        }
        if query.skip < 0 {
            return Err(Error::new(format!(
                "skip must be non-negative, got {}",
                query.skip
            )));
        }

        if let Some(order_by) = arg(args, "orderBy") {
            let column = order_by.enum_name()?;
            if shape.column(column).is_none() {
                return Err(Error::new(format!("cannot order {} by {column}", shape.name)));
            }
            query.order_by = Some(column.to_string());
        }
        if let Some(direction) = arg(args, "orderDirection") {
            query.order_direction = order_direction(direction.enum_name()?)?;
        }

        if let Some(filter) = arg(args, "where") {
            let filter =
                filter::parse(shape, filter.as_value()).map_err(|err| Error::new(err.to_string()))?;
            query.filter = Some(filter);
        }
        Ok(query)
    }

    /// Run a plural query.
    async fn query(&self, target: Target, args: QueryArgs) -> Result<Vec<EntityRow>, Error> {
        self.source
            .query(&self.catalog, target, args)
            .await
            .map_err(|err| self.error(&err))
    }

    /// Load a single row through the batch cache.
    async fn load(
        &self,
        ctx: &ResolverContext<'_>,
        target: Target,
        key: BatchKey,
    ) -> Result<Option<EntityRow>, Error> {
        let cache = ctx.data::<BatchCache<D>>()?;
        cache
            .load(target, key)
            .await
            .map_err(|err| self.error(&err))
    }

    /// A row as the value of a field of type `target`.
    fn row_value<'a>(&self, target: Target, row: EntityRow) -> FieldValue<'a> {
        match target {
            Target::Entity(_) => FieldValue::owned_any(row),
            Target::Interface(_) => {
                let type_name = self.catalog.entity(row.entity).name.clone();
                FieldValue::owned_any(row).with_type(type_name)
            }
        }
    }
}

/// An argument which was given and is not null.
fn arg<'a>(args: &'a ObjectAccessor, name: &str) -> Option<ValueAccessor<'a>> {
    args.get(name).filter(|arg| !arg.is_null())
}

/// Build the schema serving `catalog` from `source`.
pub fn build<D: DataSource>(
    catalog: Arc<Catalog>,
    source: Arc<D>,
    debug: bool,
) -> Result<Schema, BuildError> {
    let engine = Arc::new(Engine::new(catalog.clone(), source, debug));
    let mut builder = Schema::build(QUERY, None, None)
        .register(scalar::big_int_scalar())
        .register(filter::order_direction_type());
    let mut query = Object::new(QUERY);
    let mut root_fields = HashSet::new();

    for (id, entity) in catalog.entities() {
        tracing::debug!(entity = %entity.name, table = %entity.table, "registering entity");
        builder = builder
            .register(object_type(&engine, id, entity))
            .register(filter::filter_type(entity));
        if let Some(order_by) = filter::order_by_type(entity) {
            builder = builder.register(order_by);
        }
        check_root_field(&mut root_fields, &entity.singular)?;
        check_root_field(&mut root_fields, &entity.plural)?;
        query = query
            .field(singular_field(&engine, id, entity))
            .field(plural_field(&engine, &entity.plural, Target::Entity(id)));
    }

    for (id, group) in catalog.interfaces() {
        tracing::debug!(interface = %group.name, "registering interface");
        builder = builder
            .register(interface::interface_type(&catalog, group))
            .register(filter::filter_type(&group.intersection));
        if let Some(order_by) = filter::order_by_type(&group.intersection) {
            builder = builder.register(order_by);
        }
        check_root_field(&mut root_fields, &group.plural)?;
        query = query.field(plural_field(&engine, &group.plural, Target::Interface(id)));
    }

    builder
        .register(query)
        .finish()
        .map_err(|err| BuildError::Schema {
            error: err.to_string(),
        })
}

fn check_root_field(names: &mut HashSet<String>, name: &str) -> Result<(), BuildError> {
    if !names.insert(name.to_string()) {
        return Err(BuildError::DuplicateField {
            entity: QUERY.into(),
            field: name.into(),
        });
    }
    Ok(())
}

fn object_type<D: DataSource>(engine: &Arc<Engine<D>>, id: EntityId, entity: &Entity) -> Object {
    let mut obj = Object::new(&entity.name);
    for col in &entity.columns {
        let name = col.name.clone();
        obj = obj.field(Field::new(
            &col.name,
            scalar::output_type(&col.kind, col.nullable),
            move |ctx| {
                let name = name.clone();
                FieldFuture::new(async move {
                    let row = ctx.parent_value.try_downcast_ref::<EntityRow>()?;
                    Ok(match row.get(&name) {
                        None | Some(Value::Null) => None,
                        Some(value) => Some(FieldValue::value(value.clone())),
                    })
                })
            },
        ));
    }
    for rel in &entity.relations {
        obj = obj.field(match rel.kind {
            RelationKind::One => to_one_field(engine, rel),
            RelationKind::Many => to_many_field(engine, rel),
        });
    }
    for group in &entity.interfaces {
        obj = obj.implement(&engine.catalog.interface(*group).name);
    }
    tracing::trace!(entity = %entity.name, %id, "built object type");
    obj
}

/// The key of the row on the other end of `rel`, if the foreign key is not null.
fn relation_key(rel: &Relation, row: &EntityRow) -> Option<BatchKey> {
    BatchKey::new(
        rel.column_pairs()
            .map(|(remote, local)| Some((remote.to_string(), row.get(local)?.clone())))
            .collect::<Option<Vec<_>>>()?,
    )
}

fn to_one_field<D: DataSource>(engine: &Arc<Engine<D>>, rel: &Relation) -> Field {
    let engine = engine.clone();
    let type_name = engine.catalog.type_name(rel.target).to_string();
    let rel_ = rel.clone();
    Field::new(&rel.field, TypeRef::named(type_name), move |ctx| {
        let engine = engine.clone();
        let rel = rel_.clone();
        FieldFuture::new(async move {
            let row = ctx.parent_value.try_downcast_ref::<EntityRow>()?;
            let Some(key) = relation_key(&rel, row) else {
                return Ok(None);
            };
            let row = engine.load(&ctx, rel.target, key).await?;
            Ok(row.map(|row| engine.row_value(rel.target, row)))
        })
    })
}

fn to_many_field<D: DataSource>(engine: &Arc<Engine<D>>, rel: &Relation) -> Field {
    let type_name = engine.catalog.type_name(rel.target).to_string();
    let engine_ = engine.clone();
    let rel_ = rel.clone();
    let field = Field::new(&rel.field, TypeRef::named_nn_list_nn(type_name), move |ctx| {
        let engine = engine_.clone();
        let rel = rel_.clone();
        FieldFuture::new(async move {
            let row = ctx.parent_value.try_downcast_ref::<EntityRow>()?;
            let mut args = engine.query_args(rel.target, &ctx.args)?;
            for (remote, local) in rel.column_pairs() {
                match row.get(local) {
                    Some(Value::Null) | None => {
                        return Ok(Some(FieldValue::list(Vec::<FieldValue>::new())))
                    }
                    Some(value) => args.pushdown.push((remote.to_string(), value.clone())),
                }
            }
            let rows = engine.query(rel.target, args).await?;
            Ok(Some(FieldValue::list(
                rows.into_iter().map(|row| engine.row_value(rel.target, row)),
            )))
        })
    });
    plural_arguments(field, &engine.catalog, rel.target)
}

fn singular_field<D: DataSource>(engine: &Arc<Engine<D>>, id: EntityId, entity: &Entity) -> Field {
    let engine_ = engine.clone();
    let key_columns = entity
        .primary_key()
        .map(|col| col.name.clone())
        .collect::<Vec<_>>();
    let mut field = Field::new(&entity.singular, TypeRef::named(&entity.name), move |ctx| {
        let engine = engine_.clone();
        let key_columns = key_columns.clone();
        FieldFuture::new(async move {
            let key = key_columns
                .into_iter()
                .map(|col| {
                    let value = ctx.args.try_get(&col)?.as_value().clone();
                    Ok((col, value))
                })
                .collect::<Result<Vec<_>, Error>>()?;
            let Some(key) = BatchKey::new(key) else {
                return Ok(None);
            };
            let row = engine.load(&ctx, Target::Entity(id), key).await?;
            Ok(row.map(|row| engine.row_value(Target::Entity(id), row)))
        })
    });
    for col in entity.primary_key() {
        field = field.argument(InputValue::new(
            &col.name,
            TypeRef::NonNull(Box::new(scalar::base_type(&col.kind))),
        ));
    }
    field
}

fn plural_field<D: DataSource>(engine: &Arc<Engine<D>>, name: &str, target: Target) -> Field {
    let engine_ = engine.clone();
    let field = Field::new(
        name,
        TypeRef::named_nn_list_nn(engine.catalog.type_name(target)),
        move |ctx| {
            let engine = engine_.clone();
            FieldFuture::new(async move {
                let args = engine.query_args(target, &ctx.args)?;
                let rows = engine.query(target, args).await?;
                Ok(Some(FieldValue::list(
                    rows.into_iter().map(|row| engine.row_value(target, row)),
                )))
            })
        },
    );
    plural_arguments(field, &engine.catalog, target)
}

/// Add the arguments shared by all plural fields.
fn plural_arguments(mut field: Field, catalog: &Catalog, target: Target) -> Field {
    let shape = catalog.shape(target);
    field = field.argument(InputValue::new(
        "where",
        TypeRef::named(filter::filter_type_name(&shape.name)),
    ));
    if !shape.columns.is_empty() {
        field = field.argument(InputValue::new(
            "orderBy",
            TypeRef::named(filter::order_by_type_name(&shape.name)),
        ));
    }
    field
        .argument(
            InputValue::new("orderDirection", TypeRef::named(filter::ORDER_DIRECTION))
                .default_value(Value::Enum(Name::new(OrderDirection::Asc.to_string()))),
        )
        .argument(
            InputValue::new("first", TypeRef::named(TypeRef::INT))
                .default_value(Value::from(DEFAULT_FIRST)),
        )
        .argument(InputValue::new("skip", TypeRef::named(TypeRef::INT)).default_value(Value::from(0)))
}

fn order_direction(name: &str) -> Result<OrderDirection, Error> {
    match name {
        "asc" => Ok(OrderDirection::Asc),
        "desc" => Ok(OrderDirection::Desc),
        other => Err(Error::new(format!("unknown order direction {other}"))),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_order_direction() {
        assert_eq!(order_direction("asc").unwrap(), OrderDirection::Asc);
        assert_eq!(order_direction("desc").unwrap(), OrderDirection::Desc);
        let err = order_direction("sideways").unwrap_err();
        assert_eq!(err.message, "unknown order direction sideways");
    }
}
