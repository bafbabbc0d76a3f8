use clap::Parser;
use subgraph_graphql::{
    graphql::Value,
    prelude::*,
    sql::{db::postgres, PostgresDataSource},
};
use url::Url;

////////////////////////////////////////////////////////////////////////////////////////////////////
// Schema
//

const DESCRIPTORS: &str = r#"{
    "entities": [
        {
            "name": "Account",
            "columns": [
                {"name": "id", "kind": "ID", "primary_key": true},
                {"name": "balance", "kind": "BigInt"}
            ],
            "relations": [
                {"field": "domains", "kind": "many", "target": "Domain", "local": ["id"], "remote": ["owner"]}
            ]
        },
        {
            "name": "Domain",
            "columns": [
                {"name": "id", "kind": "ID", "primary_key": true},
                {"name": "name", "kind": "String"},
                {"name": "labels", "kind": "[String]"},
                {"name": "owner", "kind": "ID"},
                {"name": "expiryDate", "kind": "BigInt", "nullable": true}
            ],
            "relations": [
                {"field": "ownerAccount", "kind": "one", "target": "Account", "local": ["owner"], "remote": ["id"]},
                {"field": "events", "kind": "many", "target": "DomainEvent", "local": ["id"], "remote": ["domain"]}
            ]
        },
        {
            "name": "Transfer",
            "columns": [
                {"name": "id", "kind": "ID", "primary_key": true},
                {"name": "domain", "kind": "ID"},
                {"name": "blockNumber", "kind": "Int"},
                {"name": "owner", "kind": "ID"}
            ],
            "relations": [
                {"field": "parent", "kind": "one", "target": "Domain", "local": ["domain"], "remote": ["id"]}
            ]
        },
        {
            "name": "NewOwner",
            "columns": [
                {"name": "id", "kind": "ID", "primary_key": true},
                {"name": "domain", "kind": "ID"},
                {"name": "blockNumber", "kind": "Int"},
                {"name": "owner", "kind": "ID"},
                {"name": "parentDomain", "kind": "ID", "column": "parent_domain_id"}
            ],
            "relations": [
                {"field": "parent", "kind": "one", "target": "Domain", "local": ["domain"], "remote": ["id"]}
            ]
        },
        {
            "name": "NewResolver",
            "columns": [
                {"name": "id", "kind": "ID", "primary_key": true},
                {"name": "domain", "kind": "ID"},
                {"name": "blockNumber", "kind": "Int"},
                {"name": "resolver", "kind": "Bytes", "nullable": true}
            ],
            "relations": [
                {"field": "parent", "kind": "one", "target": "Domain", "local": ["domain"], "remote": ["id"]}
            ]
        }
    ],
    "interfaces": [
        {"name": "DomainEvent", "implementers": ["Transfer", "NewOwner", "NewResolver"]}
    ]
}"#;

////////////////////////////////////////////////////////////////////////////////////////////////////
// Test data
//

const FIXTURE: &str = r#"
    DROP TABLE IF EXISTS account, domain, transfer, new_owner, new_resolver;

    CREATE TABLE account (id text PRIMARY KEY, balance numeric NOT NULL);
    CREATE TABLE domain (
        id text PRIMARY KEY,
        name text NOT NULL,
        labels text[] NOT NULL,
        owner text NOT NULL,
        expiry_date numeric
    );
    CREATE TABLE transfer (
        id text PRIMARY KEY,
        domain text NOT NULL,
        block_number int4 NOT NULL,
        owner text NOT NULL
    );
    CREATE TABLE new_owner (
        id text PRIMARY KEY,
        domain text NOT NULL,
        block_number int4 NOT NULL,
        owner text NOT NULL,
        parent_domain_id text NOT NULL
    );
    CREATE TABLE new_resolver (
        id text PRIMARY KEY,
        domain text NOT NULL,
        block_number int4 NOT NULL,
        resolver bytea
    );

    INSERT INTO account VALUES
        ('0xa11ce', 1000000000000000000000),
        ('0xb0b', 42);
    INSERT INTO domain VALUES
        ('0x01', 'eth', '{eth}', '0xa11ce', NULL),
        ('0x02', 'alice.eth', '{alice,eth}', '0xa11ce', 1893456000),
        ('0x03', 'bob.eth', '{bob,eth}', '0xb0b', 1735689600);
    INSERT INTO transfer VALUES
        ('0x02-1', '0x02', 100, '0xa11ce'),
        ('0x03-1', '0x03', 104, '0xb0b');
    INSERT INTO new_owner VALUES
        ('0x02-0', '0x02', 99, '0xa11ce', '0x01'),
        ('0x03-0', '0x03', 103, '0xb0b', '0x01');
    INSERT INTO new_resolver VALUES
        ('0x02-2', '0x02', 101, '\xdeadbeef'),
        ('0x02-3', '0x02', 102, NULL);
"#;

#[derive(Clone, Debug, Parser)]
pub struct Options {
    #[clap(
        long,
        env = "EXAMPLE_POSTGRES_URL",
        default_value = "http://localhost:5432"
    )]
    db_url: Url,
    #[clap(long, env = "EXAMPLE_POSTGRES_USER", default_value = "postgres")]
    db_user: String,
    #[clap(long, env = "EXAMPLE_POSTGRES_PASSWORD", default_value = "password")]
    db_password: String,
    /// Report internal error details to clients.
    #[clap(long, env = "EXAMPLE_DEBUG")]
    debug: bool,
    /// The query to run once the service is up.
    #[clap(long, default_value = DEFAULT_QUERY)]
    query: String,
}

const DEFAULT_QUERY: &str = r#"{
    domains(where: {labels_has: "eth", name_not: "eth"}, orderBy: name) {
        name
        ownerAccount { id balance }
        events(orderBy: blockNumber, orderDirection: desc, first: 3) {
            __typename
            blockNumber
            ... on NewResolver { resolver }
        }
    }
}"#;

pub async fn service(opt: &Options) -> Service<PostgresDataSource> {
    // Connect to the database and load some test data.
    let mut config = postgres::Config::default();
    config
        .user(&opt.db_user)
        .password(&opt.db_password)
        .host(opt.db_url.host().unwrap().to_string().as_str());
    if let Some(port) = opt.db_url.port() {
        config.port(port);
    }
    let conn = postgres::Connection::new(config).await.unwrap();
    conn.batch_execute(FIXTURE).await.unwrap();

    let catalog = Catalog::from_json(DESCRIPTORS).unwrap();
    Service::new(
        catalog,
        PostgresDataSource::from(conn),
        Config {
            debug: opt.debug,
            ..Default::default()
        },
    )
    .unwrap()
}

#[async_std::main]
async fn main() {
    subgraph_graphql::init_logging();
    let opt = Options::parse();
    let service = service(&opt).await;
    println!("{}", service.sdl());

    let res = service.execute(opt.query.as_str()).await;
    for err in &res.errors {
        eprintln!("error: {err}");
    }
    if res.data != Value::Null {
        println!("{}", serde_json::to_string_pretty(&res.data).unwrap());
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::env;
    use subgraph_graphql::init_logging;

    macro_rules! test_options {
        () => {{
            if env::var("POSTGRES_TESTS").is_err() {
                tracing::warn!("skipping postgres test since POSTGRES_TESTS are not enabled");
                return;
            }

            let port = env::var("POSTGRES_TESTS_PORT")
                .map(|port| port.parse().unwrap())
                .unwrap_or(5432);
            let password = env::var("POSTGRES_TESTS_PASSWORD").unwrap_or("password".to_string());

            Options {
                db_url: format!("http://localhost:{port}").parse().unwrap(),
                db_user: "postgres".into(),
                db_password: password,
                debug: true,
                query: DEFAULT_QUERY.into(),
            }
        }};
    }

    #[async_std::test]
    async fn test_default_query() {
        init_logging();
        let service = service(&test_options!()).await;

        let res = service.execute(DEFAULT_QUERY).await;
        assert!(res.errors.is_empty(), "{:?}", res.errors);
        assert_eq!(
            res.data,
            value!({
                "domains": [
                    {
                        "name": "alice.eth",
                        "ownerAccount": {"id": "0xa11ce", "balance": "1000000000000000000000"},
                        "events": [
                            {"__typename": "NewResolver", "blockNumber": 102, "resolver": null},
                            {"__typename": "NewResolver", "blockNumber": 101, "resolver": [222, 173, 190, 239]},
                            {"__typename": "Transfer", "blockNumber": 100},
                        ],
                    },
                    {
                        "name": "bob.eth",
                        "ownerAccount": {"id": "0xb0b", "balance": "42"},
                        "events": [
                            {"__typename": "Transfer", "blockNumber": 104},
                            {"__typename": "NewOwner", "blockNumber": 103},
                        ],
                    },
                ]
            })
        );
    }

    #[async_std::test]
    async fn test_interface_pagination() {
        init_logging();
        let service = service(&test_options!()).await;

        let page = |skip: usize, first: usize| {
            let service = &service;
            async move {
                let res = service
                    .execute(format!(
                        "{{ domainEvents(orderBy: domain, skip: {skip}, first: {first}) {{ id }} }}"
                    ))
                    .await;
                assert!(res.errors.is_empty(), "{:?}", res.errors);
                res.data
            }
        };
        let all = page(0, 7).await;
        let mut pages = vec![];
        for skip in [0, 3, 6] {
            let Value::Object(mut data) = page(skip, 3).await else {
                panic!("expected an object");
            };
            let Some(Value::List(ids)) = data.swap_remove("domainEvents") else {
                panic!("expected a list");
            };
            pages.extend(ids);
        }
        assert_eq!(all, value!({ "domainEvents": pages }));
    }
}
