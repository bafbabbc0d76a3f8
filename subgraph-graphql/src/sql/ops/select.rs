//! Compilation of plural queries from high-level GraphQL arguments into `SELECT` statements.
//!
//! Every query reads from either the table of an entity, or the discriminated `UNION ALL` of a
//! polymorphic group (see [`union`](super::union)). Either way, the user's `where` filter, ordering
//! and pagination are applied to the combined rows, and the ordering is made total by appending the
//! primary key, so that consecutive pages are disjoint and contiguous.

use super::{
    super::db::{
        Boolean, Clause, CmpOp, Column, Connection, FromItem, Order, OrderBy, Pattern, Row,
        SelectColumn, SelectExt, Value, WhereClause,
    },
    lower_scalar_type, scalar_to_value, union, value_to_scalar, Error,
};
use crate::graphql::{
    self as gql,
    backend::{BatchKey, EntityRow, OrderDirection, QueryArgs, MAX_FIRST},
    descriptor::{Catalog, Entity, ScalarKind, Target},
    filter::{Filter, FilterOp, Predicate},
};
use indexmap::IndexMap;
use std::time::{Duration, Instant};

/// Queries which take longer than this are logged.
pub const SLOW_QUERY_THRESHOLD: Duration = Duration::from_secs(1);

/// The name of the column holding the public type name of each row of a union.
pub const DISCRIMINATOR: &str = "__typename";

/// Search for rows of `target` matching `args`.
pub async fn execute<C: Connection>(
    conn: &C,
    catalog: &Catalog,
    target: Target,
    args: QueryArgs,
) -> Result<Vec<EntityRow>, Error> {
    if !(0..=MAX_FIRST).contains(&args.first) {
        return Err(Error::InvalidArgument {
            error: format!("first must be between 0 and {MAX_FIRST}, got {}", args.first),
        });
    }
    if args.skip < 0 {
        return Err(Error::InvalidArgument {
            error: format!("skip must be non-negative, got {}", args.skip),
        });
    }

    let columns = ColumnMap::new(catalog, target);
    let mut clauses = vec![];

    // Conditions from relation traversal go as deep into the query as possible: into the `WHERE`
    // clause of each branch, for a union.
    let (from, pushdown) = columns.from(&Equalities::all(args.pushdown))?;
    clauses.extend(pushdown.map(Clause::Where));

    if let Some(filter) = &args.filter {
        clauses.push(Clause::Where(compile_filter(filter, &|name: &str| {
            columns.column(name).map(|(col, _)| col)
        })?));
    }
    clauses.push(Clause::OrderBy(
        columns.order(args.order_by.as_deref(), args.order_direction)?,
    ));
    clauses.push(Clause::Limit(args.first as usize));
    if args.skip > 0 {
        clauses.push(Clause::Offset(args.skip as usize));
    }

    fetch(conn, &columns, from, clauses).await
}

/// Run a query and parse the results.
pub(super) async fn fetch<C: Connection>(
    conn: &C,
    columns: &ColumnMap<'_>,
    from: FromItem<'static>,
    clauses: Vec<Clause<'static>>,
) -> Result<Vec<EntityRow>, Error> {
    let start = Instant::now();
    let rows = conn
        .select(&columns.select, from)
        .clauses(clauses)
        .many()
        .await
        .map_err(Error::sql)?;
    let elapsed = start.elapsed();
    if elapsed >= SLOW_QUERY_THRESHOLD {
        tracing::warn!(
            entity = %columns.shape().name,
            rows = rows.len(),
            ?elapsed,
            "slow query"
        );
    }
    rows.iter().map(|row| columns.parse_row(row)).collect()
}

/// Equality conditions on the rows of a target.
///
/// The conditions form a disjunction of conjunctions. Columns are named as in the API.
#[derive(Clone, Debug, PartialEq)]
pub(super) struct Equalities(Vec<Vec<(String, gql::Value)>>);

impl Equalities {
    /// All of the given conditions must hold.
    pub fn all(conditions: impl IntoIterator<Item = (String, gql::Value)>) -> Self {
        Self(vec![conditions.into_iter().collect()])
    }

    /// Rows matching any of `keys`.
    pub fn any_key<'a>(keys: impl IntoIterator<Item = &'a BatchKey>) -> Self {
        Self(keys.into_iter().map(|key| key.columns().to_vec()).collect())
    }

    /// Whether these conditions hold for every row.
    pub fn is_trivial(&self) -> bool {
        self.0.iter().any(|conj| conj.is_empty())
    }

    /// Compile to a `WHERE` clause.
    ///
    /// `resolve` maps a column name to the column in the query and its kind. If it yields
    /// [`None`], the column is absent from the relation being filtered, and reads as `NULL`; a
    /// conjunction involving it is never satisfied.
    pub fn compile(
        &self,
        resolve: impl Fn(&str) -> Result<Option<(Column<'static>, ScalarKind)>, Error>,
    ) -> Result<WhereClause<'static>, Error> {
        let mut disjuncts = vec![];
        'conj: for conj in &self.0 {
            let mut conditions = vec![];
            for (name, value) in conj {
                let Some((column, kind)) = resolve(name)? else {
                    continue 'conj;
                };
                conditions.push(WhereClause::from(match scalar_to_value(&kind, value)? {
                    Value::Null => Boolean::is_null(column),
                    param => Boolean::Cmp {
                        column,
                        op: CmpOp::Eq,
                        param,
                    },
                }));
            }
            disjuncts.push(WhereClause::all(conditions));
        }
        Ok(WhereClause::any(disjuncts))
    }
}

/// The relation a query reads from, and the columns selected from it.
pub(super) struct ColumnMap<'c> {
    catalog: &'c Catalog,
    target: Target,
    /// The selected columns, with their names in the API and kinds.
    fields: Vec<(String, ScalarKind)>,
    select: Vec<SelectColumn<'static>>,
}

impl<'c> ColumnMap<'c> {
    pub fn new(catalog: &'c Catalog, target: Target) -> Self {
        let (fields, select): (Vec<_>, Vec<_>) = match target {
            Target::Entity(id) => catalog
                .entity(id)
                .columns
                .iter()
                .map(|col| {
                    (
                        (col.name.clone(), col.kind.clone()),
                        SelectColumn::column(col.sql_name.clone(), lower_scalar_type(&col.kind)),
                    )
                })
                .unzip(),
            Target::Interface(id) => {
                // The union renames every column to its name in the API, and adds a discriminator.
                let (mut fields, mut select): (Vec<_>, Vec<_>) = catalog
                    .interface(id)
                    .all_columns
                    .iter()
                    .map(|col| {
                        (
                            (col.name.clone(), col.kind.clone()),
                            SelectColumn::column(col.name.clone(), lower_scalar_type(&col.kind)),
                        )
                    })
                    .unzip();
                fields.push((DISCRIMINATOR.into(), ScalarKind::String));
                select.push(SelectColumn::column(
                    DISCRIMINATOR,
                    lower_scalar_type(&ScalarKind::String),
                ));
                (fields, select)
            }
        };
        Self {
            catalog,
            target,
            fields,
            select,
        }
    }

    /// The columns and relations which can be queried.
    pub fn shape(&self) -> &'c Entity {
        self.catalog.shape(self.target)
    }

    /// The relation to select from, and a filter to apply to it.
    ///
    /// `conditions` are pushed into the branches of a union, and returned as a filter otherwise.
    pub fn from(
        &self,
        conditions: &Equalities,
    ) -> Result<(FromItem<'static>, Option<WhereClause<'static>>), Error> {
        match self.target {
            Target::Entity(id) => {
                let entity = self.catalog.entity(id);
                let filter = if conditions.is_trivial() {
                    None
                } else {
                    Some(conditions.compile(|name| self.column(name).map(Some))?)
                };
                Ok((FromItem::table(entity.table.clone()), filter))
            }
            Target::Interface(id) => Ok((
                union::union_all(self.catalog, self.catalog.interface(id), conditions)?,
                None,
            )),
        }
    }

    /// Look up a column of the relation being queried.
    pub fn column(&self, name: &str) -> Result<(Column<'static>, ScalarKind), Error> {
        let col = match self.target {
            Target::Entity(id) => self.catalog.entity(id).column(name).map(|col| {
                (Column::named(col.sql_name.clone()), col.kind.clone())
            }),
            Target::Interface(id) => self
                .catalog
                .interface(id)
                .all_columns
                .iter()
                .find(|col| col.name == name)
                .map(|col| (Column::named(col.name.clone()), col.kind.clone())),
        };
        col.ok_or_else(|| Error::UnknownColumn {
            entity: self.shape().name.clone(),
            column: name.into(),
        })
    }

    /// A total order on rows, starting with the requested one.
    ///
    /// The primary key, then (for a union) the discriminator, break ties in the same direction.
    pub fn order(
        &self,
        order_by: Option<&str>,
        direction: OrderDirection,
    ) -> Result<Vec<OrderBy<'static>>, Error> {
        let order = match direction {
            OrderDirection::Asc => Order::Asc,
            OrderDirection::Desc => Order::Desc,
        };
        let shape = self.shape();

        let mut names = vec![];
        if let Some(name) = order_by {
            if shape.column(name).is_none() {
                return Err(Error::InvalidArgument {
                    error: format!("cannot order {} by {name}", shape.name),
                });
            }
            names.push(name.to_string());
        }
        for col in shape.primary_key() {
            if !names.contains(&col.name) {
                names.push(col.name.clone());
            }
        }
        if let Target::Interface(id) = self.target {
            names.push(DISCRIMINATOR.into());
            // Members may have primary keys which are not common to the whole group.
            for col in &self.catalog.interface(id).all_columns {
                if col.primary_key && !names.contains(&col.name) {
                    names.push(col.name.clone());
                }
            }
        }

        names
            .into_iter()
            .map(|name| {
                let column = if name == DISCRIMINATOR {
                    Column::named(DISCRIMINATOR)
                } else {
                    self.column(&name)?.0
                };
                Ok(OrderBy { column, order })
            })
            .collect()
    }

    /// Reconstruct a row of the API from a row of the query results.
    pub fn parse_row<R: Row>(&self, row: &R) -> Result<EntityRow, Error> {
        let mut values = IndexMap::new();
        for (i, (name, kind)) in self.fields.iter().enumerate() {
            let value = row.column(i).map_err(Error::sql)?;
            values.insert(name.clone(), value_to_scalar(kind, value)?);
        }

        match self.target {
            Target::Entity(entity) => Ok(EntityRow { entity, values }),
            Target::Interface(_) => {
                let name = match values.shift_remove(DISCRIMINATOR) {
                    Some(gql::Value::String(name)) => name,
                    other => {
                        return Err(Error::ParseRow {
                            error: format!("invalid discriminator {other:?}"),
                        })
                    }
                };
                let entity = self
                    .catalog
                    .entity_named(&name)
                    .ok_or(Error::UnknownType { name })?;
                // Drop the columns the concrete type does not have.
                let concrete = self.catalog.entity(entity);
                values.retain(|name, _| concrete.column(name).is_some());
                Ok(EntityRow { entity, values })
            }
        }
    }
}

/// Compile a `where` filter to a `WHERE` clause.
pub(super) fn compile_filter(
    filter: &Filter,
    resolve: &dyn Fn(&str) -> Result<Column<'static>, Error>,
) -> Result<WhereClause<'static>, Error> {
    match filter {
        Filter::All(filters) => Ok(WhereClause::all(
            filters
                .iter()
                .map(|filter| compile_filter(filter, resolve))
                .collect::<Result<Vec<_>, _>>()?,
        )),
        Filter::Any(filters) => Ok(WhereClause::any(
            filters
                .iter()
                .map(|filter| compile_filter(filter, resolve))
                .collect::<Result<Vec<_>, _>>()?,
        )),
        Filter::Predicate(pred) => compile_predicate(pred, resolve(&pred.column)?),
    }
}

fn compile_predicate(pred: &Predicate, column: Column<'static>) -> Result<WhereClause<'static>, Error> {
    let Predicate { kind, op, value, .. } = pred;
    let cmp = |op| -> Result<WhereClause<'static>, Error> {
        Ok(Boolean::Cmp {
            column: column.clone(),
            op,
            param: scalar_to_value(kind, value)?,
        }
        .into())
    };
    let pattern = |pattern, negated| -> Result<WhereClause<'static>, Error> {
        let gql::Value::String(param) = value else {
            return Err(Error::TypeMismatch {
                error: format!("{op} expects a string, got {value}"),
            });
        };
        Ok(Boolean::Pattern {
            column: column.clone(),
            pattern,
            param: param.clone(),
            negated,
        }
        .into())
    };
    let one_of = |negated| -> Result<WhereClause<'static>, Error> {
        let gql::Value::List(values) = value else {
            return Err(Error::TypeMismatch {
                error: format!("{op} expects a list, got {value}"),
            });
        };
        Ok(Boolean::OneOf {
            column: column.clone(),
            params: values
                .iter()
                .map(|value| scalar_to_value(kind, value))
                .collect::<Result<_, _>>()?,
            negated,
        }
        .into())
    };
    let has = |negated| -> Result<WhereClause<'static>, Error> {
        let elem = kind.element().ok_or_else(|| Error::TypeMismatch {
            error: format!("{op} requires a list column, not {kind}"),
        })?;
        Ok(Boolean::ArrayContains {
            column: column.clone(),
            param: scalar_to_value(elem, value)?,
            negated,
        }
        .into())
    };

    match op {
        FilterOp::Eq if *value == gql::Value::Null => Ok(Boolean::is_null(column.clone()).into()),
        FilterOp::Not if *value == gql::Value::Null => Ok(Boolean::IsNull {
            column: column.clone(),
            negated: true,
        }
        .into()),
        _ if *value == gql::Value::Null => Err(Error::TypeMismatch {
            error: format!("{op} does not accept null"),
        }),
        FilterOp::Eq => cmp(CmpOp::Eq),
        FilterOp::Not => cmp(CmpOp::Ne),
        FilterOp::Gt => cmp(CmpOp::Gt),
        FilterOp::Lt => cmp(CmpOp::Lt),
        FilterOp::Gte => cmp(CmpOp::Ge),
        FilterOp::Lte => cmp(CmpOp::Le),
        FilterOp::In => one_of(false),
        FilterOp::NotIn => one_of(true),
        FilterOp::Has => has(false),
        FilterOp::NotHas => has(true),
        FilterOp::Contains => pattern(Pattern::Contains, false),
        FilterOp::NotContains => pattern(Pattern::Contains, true),
        FilterOp::StartsWith => pattern(Pattern::StartsWith, false),
        FilterOp::NotStartsWith => pattern(Pattern::StartsWith, true),
        FilterOp::EndsWith => pattern(Pattern::EndsWith, false),
        FilterOp::NotEndsWith => pattern(Pattern::EndsWith, true),
    }
}
