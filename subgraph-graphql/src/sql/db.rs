//! Abstract interface to a SQL database.
//!
//! The interface is read-only: the store is populated by an external indexer, and all we ever do
//! is `SELECT` from it. A query selects a list of [`SelectColumn`]s from a [`FromItem`], which is
//! either a table or a `UNION ALL` of sub-selects over several tables, and is refined by
//! [`Clause`]s.

use async_trait::async_trait;
use derive_more::{Display, From};
use futures::{Stream, TryStreamExt};
use num_bigint::BigInt;
use std::borrow::Cow;
use std::cmp::Ordering;
use std::fmt::{self, Display, Formatter};
use std::hash::{Hash, Hasher};

pub mod mock;
#[cfg(feature = "postgres")]
pub mod postgres;

/// Errors returned by the database.
pub trait Error: Sized + Send + Sync + std::error::Error + 'static {
    /// Wrap a custom message into this error type.
    fn custom(msg: impl Display) -> Self;
}

/// A connection to the database.
pub trait Connection: Send + Sync {
    /// Errors returned from queries.
    type Error: Error;

    /// A `SELECT` query which can be executed against the database.
    type Select<'a>: Select<'a, Error = Self::Error>
    where
        Self: 'a;

    /// Start a `SELECT` query.
    ///
    /// `columns` indicates the columns to include in the query results. The resulting [`Select`]
    /// represents a statement of the form `SELECT columns FROM from`. The query can be refined,
    /// for example by adding a `WHERE` clause, using the appropriate methods on the [`Select`]
    /// object before running it.
    fn select<'a>(&'a self, columns: &'a [SelectColumn<'a>], from: FromItem<'a>) -> Self::Select<'a>;
}

/// A SQL primitive data type.
#[derive(Clone, Debug, Display, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Type {
    #[display(fmt = "bool")]
    Bool,
    #[display(fmt = "int4")]
    Int4,
    #[display(fmt = "int8")]
    Int8,
    #[display(fmt = "float8")]
    Float8,
    #[display(fmt = "numeric")]
    Numeric,
    #[display(fmt = "text")]
    Text,
    #[display(fmt = "bytea")]
    Bytea,
    #[display(fmt = "{}[]", _0)]
    Array(Box<Type>),
}

impl Type {
    /// The type in which values of this type are transferred out of the database.
    ///
    /// Arbitrary-precision numbers are read as text, which all drivers can decode losslessly.
    pub fn wire(&self) -> Type {
        match self {
            Self::Numeric => Self::Text,
            Self::Array(elem) => Self::Array(Box::new(elem.wire())),
            ty => ty.clone(),
        }
    }
}

/// A double-precision float with a total order, so that it can be used in keys.
#[derive(Clone, Copy, Debug, Display, From)]
pub struct Float(pub f64);

impl PartialEq for Float {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Float {}

impl PartialOrd for Float {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Float {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl Hash for Float {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state)
    }
}

/// A primitive value supported by a SQL database.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, From)]
pub enum Value {
    #[from(ignore)]
    Null,
    Bool(bool),
    /// A 4-byte signed integer.
    Int4(i32),
    /// An 8-byte signed integer.
    Int8(i64),
    Float8(Float),
    /// An arbitrary-precision number. We only ever store integers.
    Numeric(BigInt),
    Text(String),
    Bytea(Vec<u8>),
    #[from(ignore)]
    Array(Vec<Value>),
}

impl Value {
    /// The type of this value, if it is not null.
    pub fn ty(&self) -> Option<Type> {
        Some(match self {
            Self::Null => return None,
            Self::Bool(_) => Type::Bool,
            Self::Int4(_) => Type::Int4,
            Self::Int8(_) => Type::Int8,
            Self::Float8(_) => Type::Float8,
            Self::Numeric(_) => Type::Numeric,
            Self::Text(_) => Type::Text,
            Self::Bytea(_) => Type::Bytea,
            Self::Array(elems) => {
                Type::Array(Box::new(elems.iter().find_map(Value::ty).unwrap_or(Type::Text)))
            }
        })
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.into())
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float8(Float(f))
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(T::into).unwrap_or(Self::Null)
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int4(x) => write!(f, "{x}"),
            Self::Int8(x) => write!(f, "{x}"),
            Self::Float8(x) => write!(f, "{x}"),
            Self::Numeric(x) => write!(f, "{x}"),
            Self::Text(s) => write!(f, "{s:?}"),
            Self::Bytea(bytes) => {
                write!(f, "\\x")?;
                for b in bytes {
                    write!(f, "{b:02x}")?;
                }
                Ok(())
            }
            Self::Array(elems) => {
                write!(f, "{{")?;
                for (i, elem) in elems.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{elem}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

/// An identifier of a column in a SQL query.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Column<'a> {
    table: Option<Cow<'a, str>>,
    name: Cow<'a, str>,
}

impl<'a> Column<'a> {
    /// A named column.
    pub fn named(name: impl Into<Cow<'a, str>>) -> Self {
        Self {
            name: name.into(),
            table: None,
        }
    }

    /// A named column, qualified by a table name.
    pub fn qualified(table: impl Into<Cow<'a, str>>, name: impl Into<Cow<'a, str>>) -> Self {
        Self {
            table: Some(table.into()),
            name: name.into(),
        }
    }

    /// The unqualified name of this column.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The table qualifying this column, if any.
    pub fn table(&self) -> Option<&str> {
        self.table.as_deref()
    }

    /// Escape this column name for interpolation into a SQL query.
    pub fn escape(&self) -> String {
        match &self.table {
            Some(table) => format!("{}.{}", escape_ident(table), escape_ident(&self.name)),
            None => escape_ident(&self.name),
        }
    }
}

impl<'a> Display for Column<'a> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        if let Some(table) = &self.table {
            write!(f, "{table}.")?;
        }
        write!(f, "{}", self.name)
    }
}

impl<'a> From<Cow<'a, str>> for Column<'a> {
    fn from(name: Cow<'a, str>) -> Self {
        Self::named(name)
    }
}

impl<'a> From<&'a str> for Column<'a> {
    fn from(name: &'a str) -> Self {
        Self::named(name)
    }
}

impl<'a> From<String> for Column<'a> {
    fn from(name: String) -> Self {
        Self::named(name)
    }
}

/// A column in a list of columns selected from a query.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SelectColumn<'a> {
    /// A column of the queried relation, of type `ty`, optionally renamed.
    Column {
        column: Column<'a>,
        ty: Type,
        alias: Option<Cow<'a, str>>,
    },
    /// A `NULL` of type `ty`.
    Null { ty: Type, alias: Cow<'a, str> },
    /// A constant.
    Literal { value: Value, alias: Cow<'a, str> },
}

impl<'a> SelectColumn<'a> {
    /// Select a column by name.
    pub fn column(column: impl Into<Column<'a>>, ty: Type) -> Self {
        Self::Column {
            column: column.into(),
            ty,
            alias: None,
        }
    }

    /// The name of this column in the query results.
    pub fn name(&self) -> &str {
        match self {
            Self::Column {
                alias: Some(alias), ..
            } => alias,
            Self::Column { column, .. } => column.name(),
            Self::Null { alias, .. } | Self::Literal { alias, .. } => alias,
        }
    }

    /// The type of this column.
    pub fn ty(&self) -> Option<Type> {
        match self {
            Self::Column { ty, .. } | Self::Null { ty, .. } => Some(ty.clone()),
            Self::Literal { value, .. } => value.ty(),
        }
    }
}

impl<'a> Display for SelectColumn<'a> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Self::Column {
                column,
                alias: Some(alias),
                ..
            } => write!(f, "{column} AS {alias}"),
            Self::Column { column, .. } => write!(f, "{column}"),
            Self::Null { ty, alias } => write!(f, "NULL::{ty} AS {alias}"),
            Self::Literal { value, alias } => write!(f, "{value} AS {alias}"),
        }
    }
}

/// A table or virtual relation which can be referenced in the `FROM` clause of a query.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FromItem<'a> {
    /// A table.
    Table(Cow<'a, str>),
    /// A `UNION ALL` of sub-selects, named `alias`.
    ///
    /// Every branch must select the same column names, with the same types, in the same order.
    UnionAll {
        alias: Cow<'a, str>,
        branches: Vec<SubSelect<'a>>,
    },
}

impl<'a> FromItem<'a> {
    pub fn table(name: impl Into<Cow<'a, str>>) -> Self {
        Self::Table(name.into())
    }

    /// The name by which columns of this relation are qualified.
    pub fn name(&self) -> &str {
        match self {
            Self::Table(table) => table,
            Self::UnionAll { alias, .. } => alias,
        }
    }
}

impl<'a> Display for FromItem<'a> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Self::Table(table) => write!(f, "{table}"),
            Self::UnionAll { alias, branches } => {
                write!(f, "(")?;
                for (i, branch) in branches.iter().enumerate() {
                    if i > 0 {
                        write!(f, " UNION ALL ")?;
                    }
                    write!(f, "{branch}")?;
                }
                write!(f, ") AS {alias}")
            }
        }
    }
}

/// One branch of a [`FromItem::UnionAll`].
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubSelect<'a> {
    pub columns: Vec<SelectColumn<'a>>,
    pub table: Cow<'a, str>,
    pub filter: Option<WhereClause<'a>>,
}

impl<'a> Display for SubSelect<'a> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "SELECT ")?;
        for (i, col) in self.columns.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{col}")?;
        }
        write!(f, " FROM {}", self.table)?;
        if let Some(filter) = &self.filter {
            write!(f, " WHERE {filter}")?;
        }
        Ok(())
    }
}

/// A clause modifying a SQL statement.
#[derive(Clone, Debug, Display, PartialEq, Eq, PartialOrd, Ord, Hash, From)]
pub enum Clause<'a> {
    /// A `WHERE` clause.
    #[display(fmt = "WHERE {}", _0)]
    Where(WhereClause<'a>),
    /// An `ORDER BY` clause.
    #[display(fmt = "ORDER BY {}", "display_list(_0)")]
    OrderBy(Vec<OrderBy<'a>>),
    /// A `LIMIT` clause.
    #[from(ignore)]
    #[display(fmt = "LIMIT {}", _0)]
    Limit(usize),
    /// An `OFFSET` clause.
    #[from(ignore)]
    #[display(fmt = "OFFSET {}", _0)]
    Offset(usize),
}

fn display_list(items: &[impl Display]) -> String {
    items
        .iter()
        .map(|item| item.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// A sort direction.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Order {
    /// Ascending, with nulls last.
    #[display(fmt = "ASC")]
    Asc,
    /// Descending, with nulls first.
    #[display(fmt = "DESC")]
    Desc,
}

/// One term of an `ORDER BY` clause.
#[derive(Clone, Debug, Display, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[display(fmt = "{column} {order}")]
pub struct OrderBy<'a> {
    pub column: Column<'a>,
    pub order: Order,
}

/// A `WHERE` clause.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum WhereClause<'a> {
    /// A `WHERE` clause which holds on any row where all of the sub-clauses hold.
    ///
    /// If there are no sub-clauses, it holds on every row.
    All(Box<Vec<WhereClause<'a>>>),
    /// A `WHERE` clause which holds on any row where any of the sub-clauses hold.
    ///
    /// If there are no sub-clauses, it holds on no row.
    Any(Box<Vec<WhereClause<'a>>>),
    /// A `WHERE` clause which holds on any row where the sub-clause is false.
    Not(Box<WhereClause<'a>>),
    /// A `WHERE` clause which holds on any row where a boolean expression is true.
    Predicate(Boolean<'a>),
}

impl<'a> From<Boolean<'a>> for WhereClause<'a> {
    fn from(b: Boolean<'a>) -> Self {
        Self::Predicate(b)
    }
}

impl<'a> WhereClause<'a> {
    /// A `WHERE` clause which holds on any row where all of the sub-clauses hold.
    pub fn all<I>(clauses: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<WhereClause<'a>>,
    {
        let mut clauses = clauses
            .into_iter()
            .map(|clause| clause.into())
            .collect::<Vec<_>>();
        if clauses.len() == 1 {
            clauses.remove(0)
        } else {
            Self::All(Box::new(clauses))
        }
    }

    /// A `WHERE` clause which holds on any row where any of the sub-clauses hold.
    pub fn any<I>(clauses: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<WhereClause<'a>>,
    {
        let mut clauses = clauses
            .into_iter()
            .map(|clause| clause.into())
            .collect::<Vec<_>>();
        if clauses.len() == 1 {
            clauses.remove(0)
        } else {
            Self::Any(Box::new(clauses))
        }
    }

    /// A `WHERE` clause which holds on any row where `clause` is false.
    pub fn not(clause: impl Into<WhereClause<'a>>) -> Self {
        Self::Not(Box::new(clause.into()))
    }
}

impl<'a> Display for WhereClause<'a> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Self::All(clauses) if clauses.is_empty() => write!(f, "TRUE"),
            Self::Any(clauses) if clauses.is_empty() => write!(f, "FALSE"),
            Self::All(clauses) => {
                let clauses = clauses.iter().map(|c| format!("({c})")).collect::<Vec<_>>();
                write!(f, "{}", clauses.join(" AND "))
            }
            Self::Any(clauses) => {
                let clauses = clauses.iter().map(|c| format!("({c})")).collect::<Vec<_>>();
                write!(f, "{}", clauses.join(" OR "))
            }
            Self::Not(clause) => write!(f, "NOT ({clause})"),
            Self::Predicate(b) => write!(f, "{b}"),
        }
    }
}

/// A binary comparison operator.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CmpOp {
    #[display(fmt = "=")]
    Eq,
    #[display(fmt = "<>")]
    Ne,
    #[display(fmt = "<")]
    Lt,
    #[display(fmt = "<=")]
    Le,
    #[display(fmt = ">")]
    Gt,
    #[display(fmt = ">=")]
    Ge,
}

/// A string pattern.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Pattern {
    #[display(fmt = "CONTAINS")]
    Contains,
    #[display(fmt = "STARTS WITH")]
    StartsWith,
    #[display(fmt = "ENDS WITH")]
    EndsWith,
}

/// A boolean expression in a `WHERE` clause.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Boolean<'a> {
    Cmp {
        /// The column to filter.
        column: Column<'a>,
        /// The operation used to filter values of `column`.
        op: CmpOp,
        /// Parameter to `op`.
        param: Value,
    },
    IsNull {
        column: Column<'a>,
        negated: bool,
    },
    OneOf {
        /// The column to filter.
        column: Column<'a>,
        /// Values to match `column` against.
        params: Vec<Value>,
        negated: bool,
    },
    /// Array membership.
    ArrayContains {
        /// An array column.
        column: Column<'a>,
        /// The element to look for.
        param: Value,
        negated: bool,
    },
    /// Substring matching on a text column.
    Pattern {
        column: Column<'a>,
        pattern: Pattern,
        param: String,
        negated: bool,
    },
}

impl<'a> Boolean<'a> {
    /// A boolean expression which compares the value of a column to a constant.
    pub fn cmp(column: impl Into<Column<'a>>, op: CmpOp, param: impl Into<Value>) -> Self {
        Self::Cmp {
            column: column.into(),
            op,
            param: param.into(),
        }
    }

    /// A boolean expression which checks if the value of a column is null.
    pub fn is_null(column: impl Into<Column<'a>>) -> Self {
        Self::IsNull {
            column: column.into(),
            negated: false,
        }
    }
}

impl<'a> Display for Boolean<'a> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let not = |negated: &bool| if *negated { "NOT " } else { "" };
        match self {
            Self::Cmp { column, op, param } => write!(f, "{column} {op} {param}"),
            Self::IsNull { column, negated } => write!(f, "{column} IS {}NULL", not(negated)),
            Self::OneOf {
                column,
                params,
                negated,
            } => write!(f, "{column} {}IN ({})", not(negated), display_list(params)),
            Self::ArrayContains {
                column,
                param,
                negated,
            } => write!(f, "{}{param} = ANY({column})", not(negated)),
            Self::Pattern {
                column,
                pattern,
                param,
                negated,
            } => write!(f, "{column} {}{pattern} {param:?}", not(negated)),
        }
    }
}

/// A `SELECT` query which can be executed against the database.
pub trait Select<'a>: Send {
    /// Errors returned by this query.
    type Error: Error;
    /// Rows returned by this query.
    type Row: Row<Error = Self::Error>;
    /// An asynchronous stream of rows.
    type Stream: Stream<Item = Result<Self::Row, Self::Error>> + Unpin + Send;

    /// Add a clause to the query.
    fn clause(self, clause: Clause<'a>) -> Self;

    /// Run the query and get a stream of results.
    fn stream(self) -> Self::Stream;
}

/// An extension trait for [`Select`] that provides some higher-level functions.
#[async_trait]
pub trait SelectExt<'a>: Select<'a> {
    /// Add a `WHERE` clause to the query.
    fn filter(self, clause: impl Into<WhereClause<'a>>) -> Self;

    /// Add an `ORDER BY` clause to the query.
    fn order_by(self, order: impl IntoIterator<Item = OrderBy<'a>>) -> Self;

    /// Limit the number of results.
    fn limit(self, limit: usize) -> Self;

    /// Skip some number of results.
    fn offset(self, offset: usize) -> Self;

    /// Add multiple clauses to the query.
    fn clauses<I>(self, clauses: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Clause<'a>>;

    /// Run a query and collect the results.
    async fn many(self) -> Result<Vec<Self::Row>, Self::Error>;
}

#[async_trait]
impl<'a, T: Select<'a>> SelectExt<'a> for T {
    fn filter(self, clause: impl Into<WhereClause<'a>>) -> Self {
        self.clause(clause.into().into())
    }

    fn order_by(self, order: impl IntoIterator<Item = OrderBy<'a>>) -> Self {
        self.clause(Clause::OrderBy(order.into_iter().collect()))
    }

    fn limit(self, limit: usize) -> Self {
        self.clause(Clause::Limit(limit))
    }

    fn offset(self, offset: usize) -> Self {
        self.clause(Clause::Offset(offset))
    }

    fn clauses<I>(mut self, clauses: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Clause<'a>>,
    {
        for clause in clauses {
            self = self.clause(clause.into());
        }
        self
    }

    async fn many(self) -> Result<Vec<Self::Row>, Self::Error> {
        self.stream().try_collect().await
    }
}

/// A row in a database table.
pub trait Row: Sized + Send {
    /// Errors returned by row operations.
    type Error: Error;

    /// Get the value of `column` in this row.
    ///
    /// `column` is an index corresponding to the order in which columns were requested in the
    /// `SELECT` statement.
    ///
    /// # Errors
    ///
    /// This method will fail if the specified column does not exist.
    fn column(&self, column: usize) -> Result<Value, Self::Error>;
}

/// Escape an identifier (table name, column name, etc.) for inclusion in a SQL query.
pub fn escape_ident(s: impl AsRef<str>) -> String {
    format!("\"{}\"", s.as_ref().replace('"', "\"\""))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_where_clause_display() {
        let clause = WhereClause::all([
            WhereClause::from(Boolean::cmp("count", CmpOp::Ge, 5)),
            WhereClause::not(Boolean::OneOf {
                column: "id".into(),
                params: vec!["a".into(), "b".into()],
                negated: false,
            }),
            WhereClause::any(Vec::<WhereClause>::new()),
        ]);
        assert_eq!(
            clause.to_string(),
            r#"(count >= 5) AND (NOT (id IN ("a", "b"))) AND (FALSE)"#
        );
        // Singletons collapse.
        assert_eq!(
            WhereClause::any([Boolean::is_null("x")]).to_string(),
            "x IS NULL"
        );
    }

    #[test]
    fn test_wire_type() {
        assert_eq!(Type::Numeric.wire(), Type::Text);
        assert_eq!(
            Type::Array(Box::new(Type::Numeric)).wire().to_string(),
            "text[]"
        );
        assert_eq!(Type::Int4.wire(), Type::Int4);
    }

    #[test]
    fn test_value_order() {
        // Floats are totally ordered.
        assert!(Value::from(f64::NAN) > Value::from(1.0));
        assert_eq!(Value::from(Some(1)), Value::Int4(1));
        assert_eq!(Value::from(None::<i32>), Value::Null);
    }
}
