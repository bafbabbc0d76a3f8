//! Mock instantiation of the abstract [`db`](super) interface.
//!
//! This instantiation is built on a simple in-memory database. It is useful for testing in
//! isolation from an actual database. It follows PostgreSQL semantics where they matter to us:
//! three-valued logic for `NULL`, and `NULL`s sorting after every other value.
#![cfg(any(test, feature = "mocks"))]

use super::{
    Boolean, Clause, CmpOp, Error as _, FromItem, Order, OrderBy, Pattern, SelectColumn, SubSelect,
    Type, Value, WhereClause,
};
use async_std::sync::{Arc, RwLock};
use derive_more::From;
use futures::{
    stream::{self, BoxStream},
    StreamExt, TryFutureExt,
};
use num_bigint::BigInt;
use snafu::Snafu;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt::Display;
use std::sync::atomic::{self, AtomicUsize};

/// Errors returned by the in-memory database.
#[derive(Debug, Snafu, From)]
#[snafu(display("mock DB error: {}", message))]
pub struct Error {
    message: String,
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        s.to_string().into()
    }
}

impl super::Error for Error {
    fn custom(msg: impl Display) -> Self {
        Self {
            message: msg.to_string(),
        }
    }
}

/// The declaration of a column in an in-memory table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SchemaColumn {
    pub name: String,
    pub ty: Type,
}

impl SchemaColumn {
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// The in-memory database.
#[derive(Debug, Default)]
struct Db {
    tables: HashMap<String, Table>,
}

/// An in-memory table.
#[derive(Debug)]
struct Table {
    columns: Vec<SchemaColumn>,
    rows: Vec<Vec<Value>>,
}

/// A row of an intermediate result, keyed by column name.
type Tuple = HashMap<String, Value>;

impl Table {
    fn tuples(&self) -> impl '_ + Iterator<Item = Tuple> {
        self.rows.iter().map(|row| {
            self.columns
                .iter()
                .map(|col| col.name.clone())
                .zip(row.iter().cloned())
                .collect()
        })
    }
}

/// A connection to the in-memory database.
#[derive(Clone, Debug, Default)]
pub struct Connection {
    db: Arc<RwLock<Db>>,
    statements: Arc<AtomicUsize>,
}

impl Connection {
    /// Create a new database and connect to it.
    ///
    /// This will create a connection to a fresh, empty database. It will not be connected or
    /// related to any previous connection or database. Once the database is created, this
    /// connection can be [cloned](Clone) in order to create multiple simultaneous connections to
    /// the same database.
    pub fn create() -> Self {
        Self::default()
    }

    /// Create a table with the given columns and row values.
    ///
    /// Each row must have exactly one value per column.
    pub async fn create_table_with_rows(
        &self,
        table: impl Into<String>,
        columns: impl IntoIterator<Item = SchemaColumn>,
        rows: impl IntoIterator<Item = Vec<Value>>,
    ) -> Result<(), Error> {
        let table = table.into();
        let columns = columns.into_iter().collect::<Vec<_>>();
        let rows = rows.into_iter().collect::<Vec<_>>();
        for row in &rows {
            if row.len() != columns.len() {
                return Err(Error::from(format!(
                    "incorrect width for table {} (found {}, expected {})",
                    table,
                    row.len(),
                    columns.len()
                )));
            }
        }

        let mut db = self.db.write().await;
        if db.tables.contains_key(&table) {
            return Err(Error::from(format!("table {table} already exists")));
        }
        db.tables.insert(table, Table { columns, rows });
        Ok(())
    }

    /// The number of statements executed through this connection or any of its clones.
    pub fn statements(&self) -> usize {
        self.statements.load(atomic::Ordering::SeqCst)
    }
}

impl super::Connection for Connection {
    type Error = Error;
    type Select<'a> = Select<'a>;

    fn select<'a>(&'a self, columns: &'a [SelectColumn<'a>], from: FromItem<'a>) -> Select<'a> {
        Select {
            conn: self,
            columns,
            from,
            clauses: vec![],
        }
    }
}

/// A query against the in-memory database.
pub struct Select<'a> {
    conn: &'a Connection,
    columns: &'a [SelectColumn<'a>],
    from: FromItem<'a>,
    clauses: Vec<Clause<'a>>,
}

impl<'a> super::Select<'a> for Select<'a> {
    type Error = Error;
    type Row = Row;
    type Stream = BoxStream<'a, Result<Self::Row, Self::Error>>;

    fn clause(mut self, clause: Clause<'a>) -> Self {
        self.clauses.push(clause);
        self
    }

    fn stream(self) -> Self::Stream {
        async move {
            self.conn.statements.fetch_add(1, atomic::Ordering::SeqCst);
            let db = self.conn.db.read().await;

            tracing::info!("SELECT {:?} FROM {}", self.columns, self.from);
            let mut tuples = match &self.from {
                FromItem::Table(table) => db.table(table)?.tuples().collect::<Vec<_>>(),
                FromItem::UnionAll { branches, .. } => {
                    let mut tuples = vec![];
                    for branch in branches {
                        tuples.extend(db.sub_select(branch)?);
                    }
                    tuples
                }
            };

            let mut offset = 0;
            let mut limit = None;
            for clause in self.clauses {
                tracing::info!("{clause}");
                match clause {
                    Clause::Where(filter) => {
                        let mut filtered = vec![];
                        for tuple in tuples {
                            if eval(&filter, &tuple)? == Some(true) {
                                filtered.push(tuple);
                            }
                        }
                        tuples = filtered;
                    }
                    Clause::OrderBy(order) => {
                        for term in &order {
                            if tuples.iter().any(|t| !t.contains_key(term.column.name())) {
                                return Err(no_such_column(term.column.name()));
                            }
                        }
                        tuples.sort_by(|a, b| compare_tuples(&order, a, b));
                    }
                    Clause::Limit(n) => limit = Some(n),
                    Clause::Offset(n) => offset = n,
                }
            }

            let rows = tuples
                .into_iter()
                .skip(offset)
                .take(limit.unwrap_or(usize::MAX))
                .map(|tuple| project(self.columns, &tuple).map(Row))
                .collect::<Vec<_>>();
            Ok::<_, Error>(stream::iter(rows))
        }
        .try_flatten_stream()
        .boxed()
    }
}

impl Db {
    fn table(&self, name: &str) -> Result<&Table, Error> {
        self.tables
            .get(name)
            .ok_or_else(|| Error::from(format!("no such table {name}")))
    }

    fn sub_select(&self, branch: &SubSelect) -> Result<Vec<Tuple>, Error> {
        tracing::info!("{branch}");
        let mut tuples = vec![];
        for tuple in self.table(&branch.table)?.tuples() {
            if let Some(filter) = &branch.filter {
                if eval(filter, &tuple)? != Some(true) {
                    continue;
                }
            }
            let values = project(&branch.columns, &tuple)?;
            tuples.push(
                branch
                    .columns
                    .iter()
                    .map(|col| col.name().to_string())
                    .zip(values)
                    .collect(),
            );
        }
        Ok(tuples)
    }
}

fn no_such_column(name: &str) -> Error {
    Error::from(format!("no such column {name}"))
}

fn project(columns: &[SelectColumn], tuple: &Tuple) -> Result<Vec<Value>, Error> {
    columns
        .iter()
        .map(|col| match col {
            SelectColumn::Column { column, .. } => tuple
                .get(column.name())
                .cloned()
                .ok_or_else(|| no_such_column(column.name())),
            SelectColumn::Null { .. } => Ok(Value::Null),
            SelectColumn::Literal { value, .. } => Ok(value.clone()),
        })
        .collect()
}

fn lookup<'t>(tuple: &'t Tuple, column: &super::Column) -> Result<&'t Value, Error> {
    tuple
        .get(column.name())
        .ok_or_else(|| no_such_column(column.name()))
}

/// Evaluate a `WHERE` clause on a tuple, with `None` standing for SQL `NULL`.
fn eval(clause: &WhereClause, tuple: &Tuple) -> Result<Option<bool>, Error> {
    Ok(match clause {
        WhereClause::All(clauses) => {
            let mut result = Some(true);
            for clause in clauses.iter() {
                match eval(clause, tuple)? {
                    Some(false) => return Ok(Some(false)),
                    None => result = None,
                    Some(true) => {}
                }
            }
            result
        }
        WhereClause::Any(clauses) => {
            let mut result = Some(false);
            for clause in clauses.iter() {
                match eval(clause, tuple)? {
                    Some(true) => return Ok(Some(true)),
                    None => result = None,
                    Some(false) => {}
                }
            }
            result
        }
        WhereClause::Not(clause) => eval(clause, tuple)?.map(|b| !b),
        WhereClause::Predicate(b) => eval_boolean(b, tuple)?,
    })
}

fn eval_boolean(b: &Boolean, tuple: &Tuple) -> Result<Option<bool>, Error> {
    let negate = |result: Option<bool>, negated: bool| result.map(|b| b != negated);
    Ok(match b {
        Boolean::Cmp { column, op, param } => {
            let ord = compare(lookup(tuple, column)?, param)?;
            ord.map(|ord| match op {
                CmpOp::Eq => ord == Ordering::Equal,
                CmpOp::Ne => ord != Ordering::Equal,
                CmpOp::Lt => ord == Ordering::Less,
                CmpOp::Le => ord != Ordering::Greater,
                CmpOp::Gt => ord == Ordering::Greater,
                CmpOp::Ge => ord != Ordering::Less,
            })
        }
        Boolean::IsNull { column, negated } => Some(lookup(tuple, column)?.is_null() != *negated),
        Boolean::OneOf {
            column,
            params,
            negated,
        } => {
            let value = lookup(tuple, column)?;
            let mut result = Some(false);
            for param in params {
                match compare(value, param)? {
                    Some(Ordering::Equal) => {
                        result = Some(true);
                        break;
                    }
                    None => result = None,
                    Some(_) => {}
                }
            }
            negate(result, *negated)
        }
        Boolean::ArrayContains {
            column,
            param,
            negated,
        } => match lookup(tuple, column)? {
            Value::Null => None,
            Value::Array(elems) => {
                let mut result = Some(false);
                for elem in elems {
                    match compare(elem, param)? {
                        Some(Ordering::Equal) => {
                            result = Some(true);
                            break;
                        }
                        None => result = None,
                        Some(_) => {}
                    }
                }
                negate(result, *negated)
            }
            value => return Err(Error::from(format!("{value} is not an array"))),
        },
        Boolean::Pattern {
            column,
            pattern,
            param,
            negated,
        } => match lookup(tuple, column)? {
            Value::Null => None,
            Value::Text(s) => {
                let matched = match pattern {
                    Pattern::Contains => s.contains(param.as_str()),
                    Pattern::StartsWith => s.starts_with(param.as_str()),
                    Pattern::EndsWith => s.ends_with(param.as_str()),
                };
                Some(matched != *negated)
            }
            value => return Err(Error::from(format!("{value} is not text"))),
        },
    })
}

/// Compare two values, with `None` if either is `NULL`.
fn compare(lhs: &Value, rhs: &Value) -> Result<Option<Ordering>, Error> {
    Ok(Some(match (lhs, rhs) {
        (Value::Null, _) | (_, Value::Null) => return Ok(None),
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        (Value::Text(a), Value::Text(b)) => a.cmp(b),
        (Value::Bytea(a), Value::Bytea(b)) => a.cmp(b),
        (Value::Float8(a), b) | (b, Value::Float8(a)) if lhs.ty() != rhs.ty() => {
            // Mixed float/integer comparison.
            let b = integer(b).ok_or_else(|| type_error(lhs, rhs))?;
            let ord = a.0.total_cmp(&b.to_string().parse().unwrap_or(f64::NAN));
            if matches!(lhs, Value::Float8(_)) {
                ord
            } else {
                ord.reverse()
            }
        }
        (Value::Float8(a), Value::Float8(b)) => a.cmp(b),
        (Value::Array(a), Value::Array(b)) => {
            for (a, b) in a.iter().zip(b) {
                match compare(a, b)? {
                    Some(Ordering::Equal) => continue,
                    ord => return Ok(ord),
                }
            }
            a.len().cmp(&b.len())
        }
        (a, b) => match (integer(a), integer(b)) {
            (Some(a), Some(b)) => a.cmp(&b),
            _ => return Err(type_error(lhs, rhs)),
        },
    }))
}

fn integer(value: &Value) -> Option<BigInt> {
    match value {
        Value::Int4(x) => Some((*x).into()),
        Value::Int8(x) => Some((*x).into()),
        Value::Numeric(x) => Some(x.clone()),
        _ => None,
    }
}

fn type_error(lhs: &Value, rhs: &Value) -> Error {
    Error::from(format!("cannot compare {lhs} with {rhs}"))
}

/// Order tuples by `order`, with `NULL` greater than any other value.
fn compare_tuples(order: &[OrderBy], a: &Tuple, b: &Tuple) -> Ordering {
    for term in order {
        let (a, b) = (&a[term.column.name()], &b[term.column.name()]);
        let ord = match (a.is_null(), b.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => compare(a, b).ok().flatten().unwrap_or(Ordering::Equal),
        };
        let ord = match term.order {
            Order::Asc => ord,
            Order::Desc => ord.reverse(),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// A row returned from a query against the in-memory database.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Row(Vec<Value>);

impl super::Row for Row {
    type Error = Error;

    fn column(&self, column: usize) -> Result<Value, Self::Error> {
        self.0
            .get(column)
            .cloned()
            .ok_or_else(|| Error::custom(format!("no column {column} in row {:?}", self.0)))
    }
}
