//! Declarative description of the relational store exposed through the API.
//!
//! The indexing pipeline that populates the store declares its tables once, at startup. That
//! declaration reaches us as plain data: a list of [`EntityDef`]s (tables, their columns and their
//! relationships to other tables) and a list of [`InterfaceDef`]s (named groups of entities which
//! jointly implement a polymorphic type). [`Catalog::build`] validates the declaration and
//! normalizes it into an arena of [`Entity`] and [`Interface`] descriptors addressed by stable
//! [`EntityId`] and [`InterfaceId`] indices. Everything downstream (the schema assembler, the
//! filter parser, the SQL backend) works from the [`Catalog`], so new tables can be served without
//! recompiling the engine.
//!
//! Descriptors can be built in code or deserialized from JSON:
//!
//! ```
//! # use subgraph_graphql::graphql::descriptor::Catalog;
//! let catalog = Catalog::from_json(r#"{
//!     "entities": [{
//!         "name": "Widget",
//!         "columns": [
//!             {"name": "id", "kind": "ID", "primary_key": true},
//!             {"name": "count", "kind": "Int"}
//!         ]
//!     }]
//! }"#).unwrap();
//! assert_eq!(catalog.entities().count(), 1);
//! ```

use super::interface;
use convert_case::{Boundary, Case, Casing};
use derive_more::Display;
use serde::Deserialize;
use snafu::Snafu;
use std::collections::{HashMap, HashSet};
use std::fmt::{self, Formatter};
use std::str::FromStr;

/// Errors which prevent a schema from being assembled.
///
/// These are always fatal: a process which cannot build its schema cannot serve requests.
#[derive(Debug, Snafu)]
pub enum BuildError {
    #[snafu(display("column {entity}.{column} has unknown scalar kind {kind}"))]
    UnknownScalar {
        entity: String,
        column: String,
        kind: String,
    },

    #[snafu(display("type {name} is declared more than once"))]
    DuplicateType { name: String },

    #[snafu(display("field {entity}.{field} is declared more than once"))]
    DuplicateField { entity: String, field: String },

    #[snafu(display("entity {entity} has no primary key"))]
    NoPrimaryKey { entity: String },

    #[snafu(display("malformed relation {entity}.{field}: {error}"))]
    Relation {
        entity: String,
        field: String,
        error: String,
    },

    #[snafu(display("malformed interface {interface}: {error}"))]
    Interface { interface: String, error: String },

    #[snafu(display("malformed descriptor document: {error}"))]
    Document { error: String },

    #[snafu(display("error assembling schema: {error}"))]
    Schema { error: String },
}

/// The kind of value stored in a column.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    Boolean,
    /// A 32-bit signed integer.
    Int,
    /// A double-precision float.
    Float,
    /// An arbitrary-precision integer.
    BigInt,
    String,
    /// An identifier, stored as text.
    Id,
    /// Raw binary data.
    Bytes,
    /// A list of scalars of the given kind.
    List(Box<ScalarKind>),
}

impl ScalarKind {
    /// The kind of the elements of a list kind.
    pub fn element(&self) -> Option<&ScalarKind> {
        match self {
            Self::List(elem) => Some(elem),
            _ => None,
        }
    }

    pub fn is_list(&self) -> bool {
        self.element().is_some()
    }

    /// Numeric kinds support ordered comparison.
    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Int | Self::Float | Self::BigInt)
    }

    /// Textual kinds support string patterns and lexicographic comparison.
    pub fn is_textual(&self) -> bool {
        matches!(self, Self::String | Self::Id)
    }
}

impl FromStr for ScalarKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().trim_end_matches('!');
        if let Some(elem) = s.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
            return Ok(Self::List(Box::new(elem.parse()?)));
        }
        match s {
            "Boolean" => Ok(Self::Boolean),
            "Int" => Ok(Self::Int),
            "Float" => Ok(Self::Float),
            "BigInt" => Ok(Self::BigInt),
            "String" => Ok(Self::String),
            "ID" => Ok(Self::Id),
            "Bytes" => Ok(Self::Bytes),
            _ => Err(s.to_string()),
        }
    }
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Self::Boolean => write!(f, "Boolean"),
            Self::Int => write!(f, "Int"),
            Self::Float => write!(f, "Float"),
            Self::BigInt => write!(f, "BigInt"),
            Self::String => write!(f, "String"),
            Self::Id => write!(f, "ID"),
            Self::Bytes => write!(f, "Bytes"),
            Self::List(elem) => write!(f, "[{elem}]"),
        }
    }
}

/// The cardinality of a relationship.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationKind {
    #[display(fmt = "one")]
    One,
    #[display(fmt = "many")]
    Many,
}

/// A column, as declared by the descriptor source.
#[derive(Clone, Debug, Deserialize)]
pub struct ColumnDef {
    /// The name of the column in the API.
    pub name: String,
    /// The textual scalar kind, e.g. `Int` or `[String]`.
    pub kind: String,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default)]
    pub primary_key: bool,
    /// The name of the column in the store, if it differs from the snake_case of `name`.
    #[serde(default)]
    pub column: Option<String>,
}

impl ColumnDef {
    /// A non-null column.
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            nullable: false,
            primary_key: false,
            column: None,
        }
    }

    /// A primary key column.
    pub fn primary_key(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            primary_key: true,
            ..Self::new(name, kind)
        }
    }

    /// Allow the column to hold `null`.
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }
}

/// A relationship, as declared by the descriptor source.
#[derive(Clone, Debug, Deserialize)]
pub struct RelationDef {
    /// The name of the field exposing the relationship.
    pub field: String,
    pub kind: RelationKind,
    /// The related entity or polymorphic group.
    pub target: String,
    /// Columns of the owning entity.
    pub local: Vec<String>,
    /// Columns of the target which must equal `local`, pairwise.
    pub remote: Vec<String>,
}

impl RelationDef {
    /// A to-one relationship following the foreign key `local` to the key `remote` of `target`.
    pub fn one(
        field: impl Into<String>,
        target: impl Into<String>,
        local: impl Into<String>,
        remote: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            kind: RelationKind::One,
            target: target.into(),
            local: vec![local.into()],
            remote: vec![remote.into()],
        }
    }

    /// A to-many relationship collecting the rows of `target` whose `remote` column equals `local`.
    pub fn many(
        field: impl Into<String>,
        target: impl Into<String>,
        local: impl Into<String>,
        remote: impl Into<String>,
    ) -> Self {
        Self {
            kind: RelationKind::Many,
            ..Self::one(field, target, local, remote)
        }
    }
}

/// An entity, as declared by the descriptor source.
#[derive(Clone, Debug, Deserialize)]
pub struct EntityDef {
    pub name: String,
    /// The name of the backing table, if it differs from the snake_case of `name`.
    #[serde(default)]
    pub table: Option<String>,
    /// The name of the plural query field, if it differs from the default.
    #[serde(default)]
    pub plural: Option<String>,
    pub columns: Vec<ColumnDef>,
    #[serde(default)]
    pub relations: Vec<RelationDef>,
}

impl EntityDef {
    pub fn new(name: impl Into<String>, columns: impl IntoIterator<Item = ColumnDef>) -> Self {
        Self {
            name: name.into(),
            table: None,
            plural: None,
            columns: columns.into_iter().collect(),
            relations: vec![],
        }
    }

    pub fn relation(mut self, relation: RelationDef) -> Self {
        self.relations.push(relation);
        self
    }

    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }
}

/// A polymorphic group, as declared by the descriptor source.
#[derive(Clone, Debug, Deserialize)]
pub struct InterfaceDef {
    pub name: String,
    /// The entities implementing this interface.
    pub implementers: Vec<String>,
    #[serde(default)]
    pub plural: Option<String>,
}

impl InterfaceDef {
    pub fn new<I>(name: impl Into<String>, implementers: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        Self {
            name: name.into(),
            implementers: implementers.into_iter().map(|name| name.into()).collect(),
            plural: None,
        }
    }
}

/// A complete descriptor document.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct Document {
    pub entities: Vec<EntityDef>,
    #[serde(default)]
    pub interfaces: Vec<InterfaceDef>,
}

/// Index of an [`Entity`] in a [`Catalog`].
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityId(usize);

/// Index of an [`Interface`] in a [`Catalog`].
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InterfaceId(usize);

/// The thing a query or relationship resolves to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Target {
    Entity(EntityId),
    Interface(InterfaceId),
}

/// A validated column.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Column {
    /// The name of the column in the API.
    pub name: String,
    /// The name of the column in the store.
    pub sql_name: String,
    pub kind: ScalarKind,
    pub nullable: bool,
    pub primary_key: bool,
}

/// A validated relationship.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Relation {
    pub field: String,
    pub kind: RelationKind,
    pub target: Target,
    /// Names (in the API) of columns of the owning entity.
    pub local: Vec<String>,
    /// Names (in the API) of columns of the target.
    pub remote: Vec<String>,
}

impl Relation {
    /// The pairs of remote and local columns which must be equal for rows to be related.
    pub fn column_pairs(&self) -> impl '_ + Iterator<Item = (&str, &str)> {
        self.remote
            .iter()
            .map(String::as_str)
            .zip(self.local.iter().map(String::as_str))
    }
}

/// A validated entity.
///
/// The intersection of a polymorphic group is also represented as an entity (see
/// [`Interface::intersection`]); it has no table of its own.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entity {
    pub name: String,
    pub table: String,
    /// The name of the singular query field.
    pub singular: String,
    /// The name of the plural query field.
    pub plural: String,
    /// Columns, in declaration order.
    pub columns: Vec<Column>,
    pub relations: Vec<Relation>,
    /// The polymorphic groups this entity belongs to.
    pub interfaces: Vec<InterfaceId>,
}

impl Entity {
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|col| col.name == name)
    }

    pub fn relation(&self, field: &str) -> Option<&Relation> {
        self.relations.iter().find(|rel| rel.field == field)
    }

    /// The primary key columns, in declaration order.
    pub fn primary_key(&self) -> impl '_ + Iterator<Item = &Column> {
        self.columns.iter().filter(|col| col.primary_key)
    }
}

/// A validated polymorphic group.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Interface {
    pub name: String,
    pub plural: String,
    pub implementers: Vec<EntityId>,
    /// A synthetic entity standing in for any row of any implementer.
    ///
    /// It has the columns and to-one relations common to all implementers.
    pub intersection: Entity,
    /// Every column of any implementer, in first-seen order.
    pub all_columns: Vec<Column>,
}

/// The validated, normalized form of the descriptor source.
#[derive(Clone, Debug, Default)]
pub struct Catalog {
    entities: Vec<Entity>,
    interfaces: Vec<Interface>,
    by_name: HashMap<String, Target>,
}

impl Catalog {
    /// Validate descriptors and build a catalog from them.
    pub fn build(
        entities: impl IntoIterator<Item = EntityDef>,
        interfaces: impl IntoIterator<Item = InterfaceDef>,
    ) -> Result<Self, BuildError> {
        let entity_defs = entities.into_iter().collect::<Vec<_>>();
        let interface_defs = interfaces.into_iter().collect::<Vec<_>>();
        let mut catalog = Self::default();

        // Assign IDs first, so that relations can refer to types declared after their owner.
        for (i, def) in entity_defs.iter().enumerate() {
            catalog.name(&def.name, Target::Entity(EntityId(i)))?;
        }
        for (i, def) in interface_defs.iter().enumerate() {
            catalog.name(&def.name, Target::Interface(InterfaceId(i)))?;
        }

        for def in &entity_defs {
            catalog.entities.push(build_entity(def)?);
        }

        // Interface columns only depend on entity columns, and relations targeting interfaces are
        // validated against the interface columns, so interfaces come next, but their relations
        // can only be computed once entity relations are done.
        for (i, def) in interface_defs.iter().enumerate() {
            let interface = catalog.build_interface(def)?;
            for member in &interface.implementers {
                catalog.entities[member.0].interfaces.push(InterfaceId(i));
            }
            catalog.interfaces.push(interface);
        }

        for (i, def) in entity_defs.iter().enumerate() {
            let mut relations: Vec<Relation> = vec![];
            for rel in &def.relations {
                if relations.iter().any(|other| other.field == rel.field) {
                    return Err(BuildError::DuplicateField {
                        entity: def.name.clone(),
                        field: rel.field.clone(),
                    });
                }
                relations.push(catalog.build_relation(EntityId(i), rel)?);
            }
            catalog.entities[i].relations = relations;
        }

        for i in 0..catalog.interfaces.len() {
            let members = catalog.interfaces[i]
                .implementers
                .iter()
                .map(|id| &catalog.entities[id.0])
                .collect::<Vec<_>>();
            let relations = interface::common_relations(&members);
            catalog.interfaces[i].intersection.relations = relations;
        }

        tracing::debug!(
            entities = catalog.entities.len(),
            interfaces = catalog.interfaces.len(),
            "built catalog"
        );
        Ok(catalog)
    }

    /// Build a catalog from a JSON [`Document`].
    pub fn from_json(json: &str) -> Result<Self, BuildError> {
        let doc: Document = serde_json::from_str(json).map_err(|err| BuildError::Document {
            error: err.to_string(),
        })?;
        Self::build(doc.entities, doc.interfaces)
    }

    pub fn entity(&self, id: EntityId) -> &Entity {
        &self.entities[id.0]
    }

    pub fn interface(&self, id: InterfaceId) -> &Interface {
        &self.interfaces[id.0]
    }

    pub fn entities(&self) -> impl '_ + Iterator<Item = (EntityId, &Entity)> {
        self.entities
            .iter()
            .enumerate()
            .map(|(i, entity)| (EntityId(i), entity))
    }

    pub fn interfaces(&self) -> impl '_ + Iterator<Item = (InterfaceId, &Interface)> {
        self.interfaces
            .iter()
            .enumerate()
            .map(|(i, interface)| (InterfaceId(i), interface))
    }

    /// Find an entity or interface by name.
    pub fn lookup(&self, name: &str) -> Option<Target> {
        self.by_name.get(name).copied()
    }

    /// Find an entity by name.
    pub fn entity_named(&self, name: &str) -> Option<EntityId> {
        match self.lookup(name)? {
            Target::Entity(id) => Some(id),
            Target::Interface(_) => None,
        }
    }

    /// The entity describing rows of `target`.
    ///
    /// For an interface, this is the synthetic intersection of its implementers.
    pub fn shape(&self, target: Target) -> &Entity {
        match target {
            Target::Entity(id) => self.entity(id),
            Target::Interface(id) => &self.interface(id).intersection,
        }
    }

    /// The name of the GraphQL type of `target`.
    pub fn type_name(&self, target: Target) -> &str {
        &self.shape(target).name
    }

    fn name(&mut self, name: &str, target: Target) -> Result<(), BuildError> {
        if self.by_name.insert(name.to_string(), target).is_some() {
            return Err(BuildError::DuplicateType { name: name.into() });
        }
        Ok(())
    }

    fn build_interface(&self, def: &InterfaceDef) -> Result<Interface, BuildError> {
        let error = |error: String| BuildError::Interface {
            interface: def.name.clone(),
            error,
        };
        if def.implementers.is_empty() {
            return Err(error("no implementing entities".into()));
        }

        let mut implementers = vec![];
        for name in &def.implementers {
            let entity = self
                .entity_named(name)
                .ok_or_else(|| error(format!("unknown implementing entity {name}")))?;
            if implementers.contains(&entity) {
                return Err(error(format!("entity {name} is listed more than once")));
            }
            implementers.push(entity);
        }

        let members = implementers
            .iter()
            .map(|id| &self.entities[id.0])
            .collect::<Vec<_>>();
        let all_columns = interface::union_columns(&def.name, &members)?;
        let intersection = Entity {
            name: def.name.clone(),
            table: String::new(),
            singular: singular_name(&def.name),
            plural: def.plural.clone().unwrap_or_else(|| plural_name(&def.name)),
            columns: interface::intersect_columns(&members),
            relations: vec![],
            interfaces: vec![],
        };
        Ok(Interface {
            name: def.name.clone(),
            plural: intersection.plural.clone(),
            implementers,
            intersection,
            all_columns,
        })
    }

    fn build_relation(&self, owner: EntityId, def: &RelationDef) -> Result<Relation, BuildError> {
        let entity = &self.entities[owner.0];
        let error = |error: String| BuildError::Relation {
            entity: entity.name.clone(),
            field: def.field.clone(),
            error,
        };

        if entity.column(&def.field).is_some() {
            return Err(BuildError::DuplicateField {
                entity: entity.name.clone(),
                field: def.field.clone(),
            });
        }
        if def.local.is_empty() || def.local.len() != def.remote.len() {
            return Err(error(format!(
                "relation must map at least one column and the same number of local ({}) and \
                 remote ({}) columns",
                def.local.len(),
                def.remote.len()
            )));
        }
        for col in &def.local {
            if entity.column(col).is_none() {
                return Err(error(format!("no local column {col}")));
            }
        }

        let target = self
            .lookup(&def.target)
            .ok_or_else(|| error(format!("unknown target {}", def.target)))?;
        let shape = self.shape(target);
        for col in &def.remote {
            if shape.column(col).is_none() {
                return Err(error(format!("target {} has no column {col}", def.target)));
            }
        }

        Ok(Relation {
            field: def.field.clone(),
            kind: def.kind,
            target,
            local: def.local.clone(),
            remote: def.remote.clone(),
        })
    }
}

impl FromStr for Catalog {
    type Err = BuildError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_json(s)
    }
}

fn build_entity(def: &EntityDef) -> Result<Entity, BuildError> {
    let mut seen = HashSet::new();
    let mut columns = vec![];
    for col in &def.columns {
        if !seen.insert(&col.name) {
            return Err(BuildError::DuplicateField {
                entity: def.name.clone(),
                field: col.name.clone(),
            });
        }
        let kind = col.kind.parse().map_err(|kind| BuildError::UnknownScalar {
            entity: def.name.clone(),
            column: col.name.clone(),
            kind,
        })?;
        columns.push(Column {
            name: col.name.clone(),
            sql_name: col.column.clone().unwrap_or_else(|| to_snake_case(&col.name)),
            kind,
            nullable: col.nullable,
            primary_key: col.primary_key,
        });
    }
    if !columns.iter().any(|col| col.primary_key) {
        return Err(BuildError::NoPrimaryKey {
            entity: def.name.clone(),
        });
    }

    Ok(Entity {
        name: def.name.clone(),
        table: def.table.clone().unwrap_or_else(|| to_snake_case(&def.name)),
        singular: singular_name(&def.name),
        plural: def.plural.clone().unwrap_or_else(|| plural_name(&def.name)),
        columns,
        // Filled in once all entities have been created.
        relations: vec![],
        interfaces: vec![],
    })
}

/// The name of the singular query field for a type.
fn singular_name(type_name: &str) -> String {
    type_name.to_case(Case::Camel)
}

/// The name of the plural query field for a type.
fn plural_name(type_name: &str) -> String {
    format!("{}s", singular_name(type_name))
}

/// Convert a string to snake case.
pub(crate) fn to_snake_case(s: &str) -> String {
    use Boundary::*;
    s.with_boundaries(&[Hyphen, Underscore, Space, LowerUpper])
        .to_case(Case::Snake)
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;

    /// Descriptors used throughout the tests: a small domain registry.
    pub fn registry() -> Catalog {
        Catalog::build(
            [
                EntityDef::new(
                    "Account",
                    [
                        ColumnDef::primary_key("id", "ID"),
                        ColumnDef::new("balance", "BigInt"),
                    ],
                )
                .relation(RelationDef::many("domains", "Domain", "id", "owner")),
                EntityDef::new(
                    "Domain",
                    [
                        ColumnDef::primary_key("id", "ID"),
                        ColumnDef::new("name", "String"),
                        ColumnDef::new("labels", "[String]"),
                        ColumnDef::new("owner", "ID"),
                        ColumnDef::new("ttl", "Int").nullable(),
                    ],
                )
                .relation(RelationDef::one("ownerAccount", "Account", "owner", "id"))
                .relation(RelationDef::many("events", "DomainEvent", "id", "domain")),
                EntityDef::new(
                    "Transfer",
                    [
                        ColumnDef::primary_key("id", "ID"),
                        ColumnDef::new("domain", "ID"),
                        ColumnDef::new("blockNumber", "Int"),
                        ColumnDef::new("owner", "ID"),
                    ],
                )
                .relation(RelationDef::one("parent", "Domain", "domain", "id")),
                EntityDef::new(
                    "NewResolver",
                    [
                        ColumnDef::primary_key("id", "ID"),
                        ColumnDef::new("domain", "ID"),
                        ColumnDef::new("blockNumber", "Int"),
                        ColumnDef::new("resolver", "Bytes").nullable(),
                    ],
                )
                .relation(RelationDef::one("parent", "Domain", "domain", "id")),
            ],
            [InterfaceDef::new("DomainEvent", ["Transfer", "NewResolver"])],
        )
        .unwrap()
    }

    #[test]
    fn test_scalar_kinds() {
        assert_eq!("Int".parse(), Ok(ScalarKind::Int));
        assert_eq!("ID!".parse(), Ok(ScalarKind::Id));
        assert_eq!(
            "[[BigInt!]]".parse(),
            Ok(ScalarKind::List(Box::new(ScalarKind::List(Box::new(
                ScalarKind::BigInt
            )))))
        );
        assert_eq!("Timestamp".parse::<ScalarKind>(), Err("Timestamp".into()));
        assert_eq!(
            ScalarKind::List(Box::new(ScalarKind::Id)).to_string(),
            "[ID]"
        );
    }

    #[test]
    fn test_registry() {
        let catalog = registry();
        let domain = catalog.entity(catalog.entity_named("Domain").unwrap());
        assert_eq!(domain.table, "domain");
        assert_eq!(domain.singular, "domain");
        assert_eq!(domain.plural, "domains");
        assert_eq!(
            domain.primary_key().map(|col| &col.name).collect::<Vec<_>>(),
            ["id"]
        );

        let transfer = catalog.entity(catalog.entity_named("Transfer").unwrap());
        assert_eq!(transfer.column("blockNumber").unwrap().sql_name, "block_number");

        let Some(Target::Interface(id)) = catalog.lookup("DomainEvent") else {
            panic!("DomainEvent is not an interface");
        };
        assert_eq!(
            domain.relation("events").unwrap().target,
            Target::Interface(id)
        );
        let events = catalog.interface(id);
        assert_eq!(events.plural, "domainEvents");
        assert_eq!(
            events
                .intersection
                .columns
                .iter()
                .map(|col| col.name.as_str())
                .collect::<Vec<_>>(),
            ["id", "domain", "blockNumber"]
        );
        assert_eq!(
            events
                .all_columns
                .iter()
                .map(|col| col.name.as_str())
                .collect::<Vec<_>>(),
            ["id", "domain", "blockNumber", "owner", "resolver"]
        );
        assert_eq!(
            events
                .intersection
                .relations
                .iter()
                .map(|rel| rel.field.as_str())
                .collect::<Vec<_>>(),
            ["parent"]
        );
        assert_eq!(transfer.interfaces, [id]);
    }

    #[test]
    fn test_unknown_scalar() {
        let err = Catalog::build(
            [EntityDef::new(
                "Widget",
                [
                    ColumnDef::primary_key("id", "ID"),
                    ColumnDef::new("at", "Timestamp"),
                ],
            )],
            [],
        )
        .unwrap_err();
        assert!(matches!(err, BuildError::UnknownScalar { .. }), "{err}");
    }

    #[test]
    fn test_malformed_relation() {
        let mut def = RelationDef::one("ownerAccount", "Account", "owner", "id");
        def.remote.push("balance".into());
        let err = Catalog::build(
            [
                EntityDef::new("Account", [ColumnDef::primary_key("id", "ID")]),
                EntityDef::new(
                    "Widget",
                    [
                        ColumnDef::primary_key("id", "ID"),
                        ColumnDef::new("owner", "ID"),
                    ],
                )
                .relation(def),
            ],
            [],
        )
        .unwrap_err();
        assert!(
            matches!(&err, BuildError::Relation { field, error, .. }
                if field == "ownerAccount" && error.contains("same number")),
            "{err}"
        );

        let err = Catalog::build(
            [EntityDef::new(
                "Widget",
                [
                    ColumnDef::primary_key("id", "ID"),
                    ColumnDef::new("owner", "ID"),
                ],
            )
            .relation(RelationDef::one("owner2", "Account", "owner", "id"))],
            [],
        )
        .unwrap_err();
        assert!(matches!(err, BuildError::Relation { .. }), "{err}");
    }

    #[test]
    fn test_unknown_implementer() {
        let err = Catalog::build(
            [EntityDef::new("Widget", [ColumnDef::primary_key("id", "ID")])],
            [InterfaceDef::new("Thing", ["Widget", "Gadget"])],
        )
        .unwrap_err();
        assert!(matches!(err, BuildError::Interface { .. }), "{err}");
    }

    #[test]
    fn test_no_primary_key() {
        let err = Catalog::build([EntityDef::new("Widget", [ColumnDef::new("id", "ID")])], [])
            .unwrap_err();
        assert!(matches!(err, BuildError::NoPrimaryKey { .. }), "{err}");
    }

    #[test]
    fn test_from_json() {
        let catalog: Catalog = r#"{
            "entities": [
                {
                    "name": "Widget",
                    "table": "widgets",
                    "columns": [
                        {"name": "id", "kind": "ID", "primary_key": true},
                        {"name": "count", "kind": "Int", "nullable": true, "column": "cnt"}
                    ],
                    "relations": [
                        {"field": "self", "kind": "one", "target": "Widget", "local": ["id"], "remote": ["id"]}
                    ]
                }
            ],
            "interfaces": [{"name": "Thing", "implementers": ["Widget"]}]
        }"#
        .parse()
        .unwrap();
        let widget = catalog.entity(catalog.entity_named("Widget").unwrap());
        assert_eq!(widget.table, "widgets");
        assert_eq!(
            widget.column("count").unwrap(),
            &Column {
                name: "count".into(),
                sql_name: "cnt".into(),
                kind: ScalarKind::Int,
                nullable: true,
                primary_key: false,
            }
        );
        assert_eq!(widget.relation("self").unwrap().kind, RelationKind::One);
    }
}
