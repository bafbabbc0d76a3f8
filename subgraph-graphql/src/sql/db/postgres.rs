//! Instantiation of the abstract [`db`](super) interface for PostgreSQL.
//!
//! This instantiation is built on [`async-postgres`].
#![cfg(feature = "postgres")]

use super::{
    escape_ident, Boolean, Clause, Column, FromItem, Order, OrderBy, Pattern, SelectColumn, SubSelect,
    Value, WhereClause,
};
use async_std::task::spawn;
use bytes::BytesMut;
use derive_more::From;
use futures::{stream::BoxStream, StreamExt, TryFutureExt, TryStreamExt};
use itertools::Itertools;
use snafu::Snafu;
use std::fmt::{Debug, Display};
use tokio_postgres::types::{to_sql_checked, FromSql, IsNull, Kind, ToSql, Type};

pub use async_postgres::{Config, Row};

/// Errors returned by a PostgreSQL database.
#[derive(Debug, Snafu, From)]
pub enum Error {
    #[from]
    Sql {
        source: async_postgres::Error,
    },
    Connect {
        source: std::io::Error,
    },
    UnsupportedType {
        ty: Type,
    },
    Custom {
        message: String,
    },
}

impl super::Error for Error {
    fn custom(msg: impl Display) -> Self {
        Self::Custom {
            message: msg.to_string(),
        }
    }
}

/// A connection to a PostgreSQL database.
pub struct Connection(tokio_postgres::Client);

impl Connection {
    /// Establish a new connection with the given [`Config`].
    pub async fn new(config: Config) -> Result<Self, Error> {
        let (client, conn) = async_postgres::connect(config)
            .await
            .map_err(|source| Error::Connect { source })?;
        spawn(conn);
        Ok(Self(client))
    }

    /// Run a batch of semicolon-separated statements, without parameters.
    ///
    /// This is meant for setting up fixtures. Queries served to the API go through
    /// [`select`](super::Connection::select).
    pub async fn batch_execute(&self, statements: &str) -> Result<(), Error> {
        tracing::info!("{}", statements);
        self.0.batch_execute(statements).await?;
        Ok(())
    }

    async fn query<'a, I>(
        &self,
        statement: &str,
        params: I,
    ) -> Result<BoxStream<'static, Result<Row, Error>>, Error>
    where
        I: Debug + IntoIterator<Item = &'a Value>,
        I::IntoIter: ExactSizeIterator,
    {
        tracing::info!(?params, "{}", statement);
        let params = params.into_iter().map(|param| {
            let param: &dyn ToSql = param;
            param
        });
        let stream = self
            .0
            .query_raw(statement, params)
            .await
            .map_err(Error::from)?;
        Ok(stream.map_err(Error::from).boxed())
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

/// A query against a PostgreSQL database.
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
        // The async block is necessary to move data owned by `self` into the future, so we can
        // return the future without returning a reference to a local.
        async move {
            let (statement, params) = render(self.columns, &self.from, &self.clauses);
            let rows = self.conn.query(statement.as_str(), &params).await?;
            Ok(rows)
        }
        .try_flatten_stream()
        .boxed()
    }
}

/// Parameters bound to a statement.
#[derive(Debug, Default)]
struct Params(Vec<Value>);

impl Params {
    /// Bind `value` and get an expression referencing it.
    ///
    /// Every parameter is cast explicitly, so the server never has to infer its type from context
    /// (which fails, for example, for parameters inside a `UNION ALL` branch). Arbitrary-precision
    /// numbers are bound as text.
    fn bind(&mut self, value: &Value) -> String {
        let Some(ty) = value.ty() else {
            return "NULL".into();
        };
        self.0.push(value.clone());
        let n = self.0.len();
        if ty.wire() == ty {
            format!("${n}::{ty}")
        } else {
            format!("${n}::{}::{ty}", ty.wire())
        }
    }
}

/// Render a `SELECT` statement and its parameters.
fn render(columns: &[SelectColumn], from: &FromItem, clauses: &[Clause]) -> (String, Vec<Value>) {
    let mut params = Params::default();

    // Columns in the outermost select are converted to their wire type.
    let columns = columns
        .iter()
        .map(|col| match col {
            SelectColumn::Column { column, ty, alias } if ty.wire() != *ty => format!(
                "{}::{} AS {}",
                column.escape(),
                ty.wire(),
                escape_ident(alias.as_deref().unwrap_or(column.name()))
            ),
            col => render_column(col, &mut params),
        })
        .join(", ");
    let mut statement = format!("SELECT {columns} FROM {}", render_from(from, &mut params));

    let filters = clauses
        .iter()
        .filter_map(|clause| match clause {
            Clause::Where(filter) => Some(filter),
            _ => None,
        })
        .map(|filter| format!("({})", render_where(filter, &mut params)))
        .collect::<Vec<_>>();
    if !filters.is_empty() {
        statement += &format!(" WHERE {}", filters.join(" AND "));
    }

    // Output columns may be converted to their wire type under their own names, and a bare name in
    // `ORDER BY` would sort by the converted value, so qualify sort columns by the input relation.
    let relation = from.name();
    let order = clauses
        .iter()
        .filter_map(|clause| match clause {
            Clause::OrderBy(order) => Some(order),
            _ => None,
        })
        .flatten()
        .map(|order| render_order(order, relation))
        .collect::<Vec<_>>();
    if !order.is_empty() {
        statement += &format!(" ORDER BY {}", order.join(", "));
    }

    // If a clause is given more than once, the last one wins.
    let mut limit = None;
    let mut offset = None;
    for clause in clauses {
        match clause {
            Clause::Limit(n) => limit = Some(n),
            Clause::Offset(n) => offset = Some(n),
            _ => {}
        }
    }
    if let Some(n) = limit {
        statement += &format!(" LIMIT {n}");
    }
    if let Some(n) = offset {
        statement += &format!(" OFFSET {n}");
    }

    (statement, params.0)
}

fn render_column(col: &SelectColumn, params: &mut Params) -> String {
    match col {
        SelectColumn::Column {
            column,
            alias: Some(alias),
            ..
        } => format!("{} AS {}", column.escape(), escape_ident(alias)),
        SelectColumn::Column { column, .. } => column.escape(),
        SelectColumn::Null { ty, alias } => format!("NULL::{ty} AS {}", escape_ident(alias)),
        SelectColumn::Literal { value, alias } => {
            format!("{} AS {}", params.bind(value), escape_ident(alias))
        }
    }
}

fn render_from(from: &FromItem, params: &mut Params) -> String {
    match from {
        FromItem::Table(table) => escape_ident(table),
        FromItem::UnionAll { alias, branches } => {
            let branches = branches
                .iter()
                .map(|branch| render_sub_select(branch, params))
                .join(" UNION ALL ");
            format!("({branches}) AS {}", escape_ident(alias))
        }
    }
}

fn render_sub_select(branch: &SubSelect, params: &mut Params) -> String {
    let columns = branch
        .columns
        .iter()
        .map(|col| render_column(col, params))
        .join(", ");
    let mut statement = format!("SELECT {columns} FROM {}", escape_ident(&branch.table));
    if let Some(filter) = &branch.filter {
        statement += &format!(" WHERE {}", render_where(filter, params));
    }
    statement
}

fn render_order(order: &OrderBy, relation: &str) -> String {
    let column = match order.column.table() {
        Some(_) => order.column.escape(),
        None => Column::qualified(relation, order.column.name()).escape(),
    };
    match order.order {
        Order::Asc => format!("{column} ASC NULLS LAST"),
        Order::Desc => format!("{column} DESC NULLS FIRST"),
    }
}

fn render_where(clause: &WhereClause, params: &mut Params) -> String {
    match clause {
        WhereClause::All(clauses) if clauses.is_empty() => "TRUE".into(),
        WhereClause::Any(clauses) if clauses.is_empty() => "FALSE".into(),
        WhereClause::All(clauses) => clauses
            .iter()
            .map(|clause| format!("({})", render_where(clause, params)))
            .join(" AND "),
        WhereClause::Any(clauses) => clauses
            .iter()
            .map(|clause| format!("({})", render_where(clause, params)))
            .join(" OR "),
        WhereClause::Not(clause) => format!("NOT ({})", render_where(clause, params)),
        WhereClause::Predicate(b) => render_boolean(b, params),
    }
}

fn render_boolean(b: &Boolean, params: &mut Params) -> String {
    let not = |negated: &bool| if *negated { "NOT " } else { "" };
    match b {
        Boolean::Cmp { column, op, param } => {
            format!("{} {op} {}", column.escape(), params.bind(param))
        }
        Boolean::IsNull { column, negated } => {
            format!("{} IS {}NULL", column.escape(), not(negated))
        }
        Boolean::OneOf {
            negated, params: p, ..
        } if p.is_empty() => {
            // `x IN ()` is not valid SQL; an empty list matches nothing.
            let result = if *negated { "TRUE" } else { "FALSE" };
            result.into()
        }
        Boolean::OneOf {
            column,
            params: values,
            negated,
        } => {
            let values = values.iter().map(|value| params.bind(value)).join(", ");
            format!("{} {}IN ({values})", column.escape(), not(negated))
        }
        Boolean::ArrayContains {
            column,
            param,
            negated,
        } => format!(
            "{}({} = ANY({}))",
            not(negated),
            params.bind(param),
            column.escape()
        ),
        Boolean::Pattern {
            column,
            pattern,
            param,
            negated,
        } => {
            let column = column.escape();
            let param = params.bind(&Value::Text(param.clone()));
            let test = match pattern {
                Pattern::Contains => format!("strpos({column}, {param}) > 0"),
                Pattern::StartsWith => format!("starts_with({column}, {param})"),
                Pattern::EndsWith => format!("right({column}, length({param})) = {param}"),
            };
            format!("{}({test})", not(negated))
        }
    }
}

impl super::Row for Row {
    type Error = Error;

    fn column(&self, column: usize) -> Result<Value, Self::Error> {
        Ok(self.try_get(column)?)
    }
}

impl ToSql for Value {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn std::error::Error + Send + Sync + 'static>>
    where
        Self: Sized,
    {
        match self {
            Self::Null => Ok(IsNull::Yes),
            Self::Bool(x) => x.to_sql(ty, out),
            Self::Int4(x) => x.to_sql(ty, out),
            Self::Int8(x) => x.to_sql(ty, out),
            Self::Float8(x) => x.0.to_sql(ty, out),
            // Bound as text; see `Params::bind`.
            Self::Numeric(x) => x.to_string().to_sql(ty, out),
            Self::Text(x) => x.to_sql(ty, out),
            Self::Bytea(x) => x.to_sql(ty, out),
            Self::Array(xs) => xs.to_sql(ty, out),
        }
    }

    fn accepts(ty: &Type) -> bool {
        match ty.kind() {
            Kind::Array(member) => <Value as ToSql>::accepts(member),
            _ => matches!(
                *ty,
                Type::BOOL | Type::INT4 | Type::INT8 | Type::FLOAT8 | Type::TEXT | Type::BYTEA
            ),
        }
    }

    to_sql_checked!();
}

impl<'a> FromSql<'a> for Value {
    fn from_sql(
        ty: &Type,
        raw: &'a [u8],
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync + 'static>> {
        if let Kind::Array(_) = ty.kind() {
            return Ok(Self::Array(Vec::<Value>::from_sql(ty, raw)?));
        }
        match *ty {
            Type::BOOL => Ok(Self::Bool(bool::from_sql(ty, raw)?)),
            Type::INT4 => Ok(Self::Int4(i32::from_sql(ty, raw)?)),
            Type::INT8 => Ok(Self::Int8(i64::from_sql(ty, raw)?)),
            Type::FLOAT8 => Ok(Self::from(f64::from_sql(ty, raw)?)),
            Type::TEXT | Type::VARCHAR => Ok(Self::Text(String::from_sql(ty, raw)?)),
            Type::BYTEA => Ok(Self::Bytea(Vec::<u8>::from_sql(ty, raw)?)),
            _ => Err(Box::new(Error::UnsupportedType { ty: ty.clone() })),
        }
    }

    fn from_sql_null(
        _ty: &Type,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync + 'static>> {
        Ok(Self::Null)
    }

    fn accepts(ty: &Type) -> bool {
        match ty.kind() {
            Kind::Array(member) => <Value as FromSql>::accepts(member),
            _ => matches!(
                *ty,
                Type::BOOL
                    | Type::INT4
                    | Type::INT8
                    | Type::FLOAT8
                    | Type::TEXT
                    | Type::VARCHAR
                    | Type::BYTEA
            ),
        }
    }
}

#[cfg(test)]
mod test {
    use super::super::{CmpOp, Type as SqlType};
    use super::*;
    use crate::init_logging;
    use rand::RngCore;
    use std::env;
    use std::process::Command;
    use std::str;

    #[test]
    fn test_render() {
        let columns = [
            SelectColumn::column("id", SqlType::Text),
            SelectColumn::column("balance", SqlType::Numeric),
        ];
        let clauses = [
            Clause::Where(WhereClause::all([
                WhereClause::from(Boolean::cmp("balance", CmpOp::Gt, Value::Numeric(5.into()))),
                WhereClause::from(Boolean::OneOf {
                    column: "id".into(),
                    params: vec![],
                    negated: false,
                }),
            ])),
            Clause::OrderBy(vec![OrderBy {
                column: Column::named("id"),
                order: Order::Desc,
            }]),
            Clause::Limit(10),
            Clause::Offset(20),
        ];
        let (statement, params) = render(&columns, &FromItem::table("accounts"), &clauses);
        assert_eq!(
            statement,
            "SELECT \"id\", \"balance\"::text AS \"balance\" FROM \"accounts\" \
             WHERE ((\"balance\" > $1::text::numeric) AND (FALSE)) \
             ORDER BY \"accounts\".\"id\" DESC NULLS FIRST LIMIT 10 OFFSET 20"
        );
        assert_eq!(params, [Value::Numeric(5.into())]);
    }

    #[test]
    fn test_render_union() {
        let columns = [SelectColumn::column("id", SqlType::Text)];
        let from = FromItem::UnionAll {
            alias: "events".into(),
            branches: vec![
                SubSelect {
                    columns: vec![
                        SelectColumn::column("id", SqlType::Text),
                        SelectColumn::Literal {
                            value: "Transfer".into(),
                            alias: "__typename".into(),
                        },
                    ],
                    table: "transfer".into(),
                    filter: Some(Boolean::cmp("domain", CmpOp::Eq, "d").into()),
                },
                SubSelect {
                    columns: vec![
                        SelectColumn::Column {
                            column: "event_id".into(),
                            ty: SqlType::Text,
                            alias: Some("id".into()),
                        },
                        SelectColumn::Null {
                            ty: SqlType::Text,
                            alias: "__typename".into(),
                        },
                    ],
                    table: "new_resolver".into(),
                    filter: None,
                },
            ],
        };
        let clauses = [Clause::Where(
            Boolean::Pattern {
                column: Column::named("id"),
                pattern: Pattern::EndsWith,
                param: "x".into(),
                negated: true,
            }
            .into(),
        )];
        let (statement, params) = render(&columns, &from, &clauses);
        assert_eq!(
            statement,
            "SELECT \"id\" FROM (\
             SELECT \"id\", $1::text AS \"__typename\" FROM \"transfer\" WHERE \"domain\" = $2::text \
             UNION ALL \
             SELECT \"event_id\" AS \"id\", NULL::text AS \"__typename\" FROM \"new_resolver\"\
             ) AS \"events\" \
             WHERE (NOT (right(\"id\", length($3::text)) = $3::text))"
        );
        assert_eq!(params, [Value::from("Transfer"), "d".into(), "x".into()]);
    }

    struct Db {
        name: String,
        port: u16,
        password: String,
    }

    impl Db {
        fn create() -> Option<Self> {
            if env::var("POSTGRES_TESTS").is_err() {
                tracing::warn!("skipping postgres test since POSTGRES_TESTS are not enabled");
                return None;
            }

            let name = format!("db{}", rand::thread_rng().next_u64());
            let port = env::var("POSTGRES_TESTS_PORT")
                .map(|port| port.parse().unwrap())
                .unwrap_or(5432);
            let password = env::var("POSTGRES_TESTS_PASSWORD").unwrap_or("password".to_string());
            tracing::info!("Creating test DB {name} on port {port}");

            let output = Command::new("createdb")
                .arg("-h")
                .arg("127.0.0.1")
                .arg("-p")
                .arg(&port.to_string())
                .arg("-U")
                .arg("postgres")
                .arg(&name)
                .env("PGPASSWORD", &password)
                .output()
                .unwrap();
            if !output.status.success() {
                panic!(
                    "createdb failed: {}",
                    str::from_utf8(&output.stderr).unwrap()
                );
            }

            Some(Self {
                name,
                port,
                password,
            })
        }

        async fn connect(&self) -> Connection {
            let mut config = Config::default();
            config
                .dbname(&self.name)
                .user("postgres")
                .password(&self.password)
                .host("localhost")
                .port(self.port);
            Connection::new(config).await.unwrap()
        }
    }

    impl Drop for Db {
        fn drop(&mut self) {
            tracing::info!("Dropping test DB {}", self.name);
            let output = Command::new("dropdb")
                .arg("-h")
                .arg("127.0.0.1")
                .arg("-p")
                .arg(&self.port.to_string())
                .arg("-U")
                .arg("postgres")
                .arg(&self.name)
                .env("PGPASSWORD", &self.password)
                .output()
                .unwrap();
            if !output.status.success() {
                tracing::error!(
                    "dropdb failed: {}",
                    str::from_utf8(&output.stderr).unwrap()
                );
            }
        }
    }

    #[async_std::test]
    async fn test_postgres_select() {
        use super::super::{Connection as _, Row as _, SelectExt};

        init_logging();
        let Some(db) = Db::create() else { return; };
        let conn = db.connect().await;
        conn.batch_execute(
            "CREATE TABLE account (id text PRIMARY KEY, balance numeric, tags text[]);
             INSERT INTO account VALUES
                ('a', 12345678901234567890123, '{x,y}'),
                ('b', 5, '{}'),
                ('c', NULL, NULL);",
        )
        .await
        .unwrap();

        let columns = [
            SelectColumn::column("id", SqlType::Text),
            SelectColumn::column("balance", SqlType::Numeric),
            SelectColumn::column("tags", SqlType::Array(Box::new(SqlType::Text))),
        ];
        let rows = conn
            .select(&columns, FromItem::table("account"))
            .filter(WhereClause::any([
                Boolean::cmp("balance", CmpOp::Gt, Value::Numeric(10.into())),
                Boolean::ArrayContains {
                    column: "tags".into(),
                    param: "y".into(),
                    negated: false,
                },
            ]))
            .many()
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].column(0).unwrap(), Value::from("a"));
        assert_eq!(
            rows[0].column(1).unwrap(),
            Value::from("12345678901234567890123")
        );
        assert_eq!(
            rows[0].column(2).unwrap(),
            Value::Array(vec!["x".into(), "y".into()])
        );

        let rows = conn
            .select(&columns, FromItem::table("account"))
            .filter(Boolean::is_null("balance"))
            .many()
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].column(1).unwrap(), Value::Null);
        assert_eq!(rows[0].column(2).unwrap(), Value::Null);
    }

    #[async_std::test]
    async fn test_postgres_numeric_order() {
        use super::super::{Connection as _, Row as _, SelectExt};

        init_logging();
        let Some(db) = Db::create() else { return; };
        let conn = db.connect().await;
        conn.batch_execute(
            "CREATE TABLE account (id text PRIMARY KEY, balance numeric NOT NULL, score float8);
             INSERT INTO account VALUES
                ('a', 100, 2.5),
                ('b', 9, 10.0),
                ('c', 10, NULL),
                ('d', 123456789012345678901234567890, -1.0);",
        )
        .await
        .unwrap();
        let ids = |rows: Vec<Row>| {
            rows.iter()
                .map(|row| row.column(0).unwrap())
                .collect::<Vec<_>>()
        };

        let columns = [
            SelectColumn::column("id", SqlType::Text),
            SelectColumn::column("balance", SqlType::Numeric),
        ];
        let rows = conn
            .select(&columns, FromItem::table("account"))
            .order_by([OrderBy {
                column: Column::named("balance"),
                order: Order::Asc,
            }])
            .many()
            .await
            .unwrap();
        assert_eq!(ids(rows), ["b", "c", "a", "d"].map(Value::from));

        let columns = [
            SelectColumn::column("id", SqlType::Text),
            SelectColumn::column("score", SqlType::Float8),
        ];
        let rows = conn
            .select(&columns, FromItem::table("account"))
            .order_by([OrderBy {
                column: Column::named("score"),
                order: Order::Desc,
            }])
            .many()
            .await
            .unwrap();
        assert_eq!(ids(rows), ["c", "b", "a", "d"].map(Value::from));

        // Sorting a union by a converted column uses the numeric value of each branch.
        let branch = |filter: WhereClause<'static>| SubSelect {
            columns: vec![
                SelectColumn::column("id", SqlType::Text),
                SelectColumn::column("balance", SqlType::Numeric),
            ],
            table: "account".into(),
            filter: Some(filter),
        };
        let from = FromItem::UnionAll {
            alias: "accounts".into(),
            branches: vec![
                branch(Boolean::cmp("id", CmpOp::Lt, "c").into()),
                branch(Boolean::cmp("id", CmpOp::Ge, "c").into()),
            ],
        };
        let columns = [
            SelectColumn::column("id", SqlType::Text),
            SelectColumn::column("balance", SqlType::Numeric),
        ];
        let rows = conn
            .select(&columns, from)
            .order_by([OrderBy {
                column: Column::named("balance"),
                order: Order::Desc,
            }])
            .many()
            .await
            .unwrap();
        assert_eq!(ids(rows), ["d", "a", "c", "b"].map(Value::from));
    }
}
