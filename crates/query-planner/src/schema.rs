//! The composed supergraph schema and its federation metadata.
//!
//! The supergraph is read from SDL annotated with the `join__` directives:
//!
//! ```graphql
//! enum join__Graph {
//!   ACCOUNTS @join__graph(name: "accounts" url: "http://accounts/graphql")
//! }
//!
//! type User @join__owner(graph: ACCOUNTS) @join__type(graph: ACCOUNTS, key: "id") {
//!   id: ID!
//!   reviews: [Review] @join__field(graph: REVIEWS)
//! }
//! ```

use crate::helpers::{self, named_type, SelectionSet, Type};
use crate::QueryPlannerError;
use graphql_parser::query::{OperationDefinition, Value};
use graphql_parser::schema::{self, Definition, Directive, TypeDefinition, TypeExtension};
use indexmap::IndexMap;
use std::collections::HashMap;

const JOIN_GRAPH_ENUM: &str = "join__Graph";
const JOIN_GRAPH_DIRECTIVE: &str = "join__graph";
const JOIN_OWNER_DIRECTIVE: &str = "join__owner";
const JOIN_TYPE_DIRECTIVE: &str = "join__type";
const JOIN_FIELD_DIRECTIVE: &str = "join__field";

type SchemaDirective = Directive<'static, String>;
type SchemaField = schema::Field<'static, String>;

/// The kind of a named type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TypeKind {
    Scalar,
    Object,
    Interface,
    Union,
    Enum,
    InputObject,
}

/// A named type of the supergraph.
#[derive(Clone, Debug)]
pub struct TypeDef {
    pub name: String,
    pub kind: TypeKind,
    pub fields: Vec<FieldDef>,
    pub interfaces: Vec<String>,
    pub members: Vec<String>,
}

impl TypeDef {
    fn new(name: String, kind: TypeKind) -> Self {
        TypeDef {
            name,
            kind,
            fields: Vec::new(),
            interfaces: Vec::new(),
            members: Vec::new(),
        }
    }

    pub fn is_composite(&self) -> bool {
        matches!(
            self.kind,
            TypeKind::Object | TypeKind::Interface | TypeKind::Union
        )
    }

    pub fn is_abstract(&self) -> bool {
        matches!(self.kind, TypeKind::Interface | TypeKind::Union)
    }

    pub fn is_object(&self) -> bool {
        self.kind == TypeKind::Object
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|field| field.name == name)
    }
}

impl PartialEq for TypeDef {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

/// A field definition.
#[derive(Clone, Debug)]
pub struct FieldDef {
    pub name: String,
    pub field_type: Type,
}

impl FieldDef {
    pub(crate) fn new(name: &str, field_type: Type) -> Self {
        FieldDef {
            name: name.to_string(),
            field_type,
        }
    }

    /// The name of the innermost named type of the field.
    pub fn named_type(&self) -> &str {
        named_type(&self.field_type)
    }
}

/// Federation metadata attached to a type.
#[derive(Clone, Debug, Default)]
pub struct TypeMetadata {
    /// Shared, keyless types have no owner.
    pub is_value_type: bool,
    pub graph_name: Option<String>,
    /// Key selections, per graph.
    pub keys: IndexMap<String, Vec<SelectionSet>>,
}

/// Federation metadata attached to a field.
#[derive(Clone, Debug, Default)]
pub struct FieldMetadata {
    pub graph_name: Option<String>,
    pub requires: Option<SelectionSet>,
    pub provides: Option<SelectionSet>,
}

/// A subgraph participating in the supergraph.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Graph {
    pub name: String,
    pub url: String,
}

/// A supergraph schema along with its ownership metadata.
#[derive(Debug)]
pub struct ComposedSchema {
    types: IndexMap<String, TypeDef>,
    query_type: String,
    mutation_type: Option<String>,
    subscription_type: Option<String>,
    possible_types: HashMap<String, Vec<String>>,
    type_metadata: HashMap<String, TypeMetadata>,
    field_metadata: HashMap<String, FieldMetadata>,
    graphs: IndexMap<String, Graph>,
    typename_field: FieldDef,
    schema_field: FieldDef,
    type_field: FieldDef,
}

impl ComposedSchema {
    /// Parse a supergraph SDL.
    pub fn parse(sdl: &str) -> Result<Self, QueryPlannerError> {
        let document = graphql_parser::parse_schema::<String>(sdl)
            .map_err(|err| QueryPlannerError::SchemaParse(err.to_string()))?
            .into_static();

        let mut builder = SchemaBuilder::default();
        for definition in &document.definitions {
            match definition {
                Definition::SchemaDefinition(definition) => {
                    builder.query_type = definition.query.clone();
                    builder.mutation_type = definition.mutation.clone();
                    builder.subscription_type = definition.subscription.clone();
                }
                Definition::TypeDefinition(definition) => builder.add_type(definition)?,
                Definition::TypeExtension(extension) => builder.extend_type(extension)?,
                Definition::DirectiveDefinition(_) => {}
            }
        }
        builder.build()
    }

    pub fn type_by_name(&self, name: &str) -> Option<&TypeDef> {
        self.types.get(name)
    }

    pub(crate) fn type_named(&self, name: &str) -> Result<&TypeDef, QueryPlannerError> {
        self.type_by_name(name)
            .ok_or_else(|| QueryPlannerError::UnknownType(name.to_string()))
    }

    pub fn types(&self) -> impl Iterator<Item = &TypeDef> {
        self.types.values()
    }

    pub fn query_type(&self) -> Option<&TypeDef> {
        self.type_by_name(&self.query_type)
    }

    pub fn mutation_type(&self) -> Option<&TypeDef> {
        self.mutation_type
            .as_deref()
            .and_then(|name| self.type_by_name(name))
    }

    pub fn subscription_type(&self) -> Option<&TypeDef> {
        self.subscription_type
            .as_deref()
            .and_then(|name| self.type_by_name(name))
    }

    pub fn is_root_type(&self, type_def: &TypeDef) -> bool {
        type_def.name == self.query_type
            || self.mutation_type.as_deref() == Some(type_def.name.as_str())
            || self.subscription_type.as_deref() == Some(type_def.name.as_str())
    }

    /// The object types a value of `type_def` may be at runtime.
    pub fn possible_types<'s>(&'s self, type_def: &'s TypeDef) -> Vec<&'s TypeDef> {
        if type_def.is_abstract() {
            self.possible_types
                .get(&type_def.name)
                .map(|names| {
                    names
                        .iter()
                        .filter_map(|name| self.type_by_name(name))
                        .collect()
                })
                .unwrap_or_default()
        } else {
            vec![type_def]
        }
    }

    /// True when `maybe_sub_type` is `abstract_type` itself or one of its possible types.
    pub fn is_sub_type(&self, abstract_type: &TypeDef, maybe_sub_type: &TypeDef) -> bool {
        if abstract_type == maybe_sub_type {
            return true;
        }
        abstract_type.is_abstract()
            && matches!(maybe_sub_type.kind, TypeKind::Object | TypeKind::Interface)
            && self
                .possible_types
                .get(&abstract_type.name)
                .map(|names| names.contains(&maybe_sub_type.name))
                .unwrap_or(false)
    }

    /// Look a field up on a composite type, including the introspection meta fields.
    pub fn field_def<'s>(&'s self, parent_type: &'s TypeDef, name: &str) -> Option<&'s FieldDef> {
        match name {
            helpers::TYPENAME_FIELD_NAME if parent_type.is_composite() => Some(&self.typename_field),
            "__schema" if parent_type.name == self.query_type => Some(&self.schema_field),
            "__type" if parent_type.name == self.query_type => Some(&self.type_field),
            _ => parent_type.field(name),
        }
    }

    pub(crate) fn typename_field_def(&self) -> &FieldDef {
        &self.typename_field
    }

    pub fn type_metadata(&self, type_def: &TypeDef) -> Option<&TypeMetadata> {
        self.type_metadata.get(&type_def.name)
    }

    pub fn field_metadata(&self, parent_type: &TypeDef, field_def: &FieldDef) -> Option<&FieldMetadata> {
        self.field_metadata
            .get(&field_coordinate(&parent_type.name, &field_def.name))
    }

    /// Subgraphs by name.
    pub fn graphs(&self) -> impl Iterator<Item = &Graph> {
        self.graphs.values()
    }
}

pub fn is_introspection_type(name: &str) -> bool {
    name.starts_with("__")
}

fn field_coordinate(type_name: &str, field_name: &str) -> String {
    format!("{}.{}", type_name, field_name)
}

#[derive(Default)]
struct SchemaBuilder {
    types: IndexMap<String, TypeDef>,
    query_type: Option<String>,
    mutation_type: Option<String>,
    subscription_type: Option<String>,
    type_directives: Vec<(String, Vec<SchemaDirective>)>,
    field_directives: Vec<(String, String, Vec<SchemaDirective>)>,
    graph_enum_values: Vec<(String, Vec<SchemaDirective>)>,
}

impl SchemaBuilder {
    fn add_type(&mut self, definition: &TypeDefinition<'static, String>) -> Result<(), QueryPlannerError> {
        let type_def = match definition {
            TypeDefinition::Scalar(scalar) => TypeDef::new(scalar.name.clone(), TypeKind::Scalar),
            TypeDefinition::Object(object) => {
                let mut type_def = TypeDef::new(object.name.clone(), TypeKind::Object);
                type_def.interfaces = object.implements_interfaces.clone();
                self.add_fields(&mut type_def, &object.fields);
                self.type_directives
                    .push((object.name.clone(), object.directives.clone()));
                type_def
            }
            TypeDefinition::Interface(interface) => {
                let mut type_def = TypeDef::new(interface.name.clone(), TypeKind::Interface);
                type_def.interfaces = interface.implements_interfaces.clone();
                self.add_fields(&mut type_def, &interface.fields);
                self.type_directives
                    .push((interface.name.clone(), interface.directives.clone()));
                type_def
            }
            TypeDefinition::Union(union) => {
                let mut type_def = TypeDef::new(union.name.clone(), TypeKind::Union);
                type_def.members = union.types.clone();
                type_def
            }
            TypeDefinition::Enum(enum_type) => {
                if enum_type.name == JOIN_GRAPH_ENUM {
                    self.graph_enum_values.extend(
                        enum_type
                            .values
                            .iter()
                            .map(|value| (value.name.clone(), value.directives.clone())),
                    );
                }
                TypeDef::new(enum_type.name.clone(), TypeKind::Enum)
            }
            TypeDefinition::InputObject(input) => {
                TypeDef::new(input.name.clone(), TypeKind::InputObject)
            }
        };

        if self.types.contains_key(&type_def.name) {
            return Err(QueryPlannerError::SchemaParse(format!(
                "type \"{}\" is defined more than once",
                type_def.name
            )));
        }
        self.types.insert(type_def.name.clone(), type_def);
        Ok(())
    }

    fn extend_type(&mut self, extension: &TypeExtension<'static, String>) -> Result<(), QueryPlannerError> {
        let (name, fields, interfaces, members) = match extension {
            TypeExtension::Object(object) => (
                &object.name,
                object.fields.as_slice(),
                object.implements_interfaces.as_slice(),
                &[][..],
            ),
            TypeExtension::Interface(interface) => (
                &interface.name,
                interface.fields.as_slice(),
                interface.implements_interfaces.as_slice(),
                &[][..],
            ),
            TypeExtension::Union(union) => (&union.name, &[][..], &[][..], union.types.as_slice()),
            _ => return Ok(()),
        };

        let mut type_def = self
            .types
            .shift_remove(name)
            .ok_or_else(|| QueryPlannerError::UnknownType(name.clone()))?;
        self.add_fields(&mut type_def, fields);
        type_def.interfaces.extend(interfaces.iter().cloned());
        type_def.members.extend(members.iter().cloned());
        self.types.insert(name.clone(), type_def);
        Ok(())
    }

    fn add_fields(&mut self, type_def: &mut TypeDef, fields: &[SchemaField]) {
        for field in fields {
            type_def
                .fields
                .push(FieldDef::new(&field.name, field.field_type.clone()));
            self.field_directives.push((
                type_def.name.clone(),
                field.name.clone(),
                field.directives.clone(),
            ));
        }
    }

    fn build(self) -> Result<ComposedSchema, QueryPlannerError> {
        let SchemaBuilder {
            types,
            query_type,
            mutation_type,
            subscription_type,
            type_directives,
            field_directives,
            graph_enum_values,
        } = self;

        let mut graphs = IndexMap::new();
        for (enum_value, directives) in graph_enum_values {
            if let Some(directive) = find_directive(&directives, JOIN_GRAPH_DIRECTIVE) {
                let name = string_argument(directive, "name").unwrap_or_else(|| enum_value.to_lowercase());
                let url = string_argument(directive, "url").unwrap_or_default();
                graphs.insert(enum_value, Graph { name, url });
            }
        }
        let graph_name = |directive: &SchemaDirective| -> Result<Option<String>, QueryPlannerError> {
            match argument(directive, "graph") {
                Some(Value::Enum(value)) | Some(Value::String(value)) => graphs
                    .get(value)
                    .map(|graph| Some(graph.name.clone()))
                    .ok_or_else(|| {
                        QueryPlannerError::SchemaParse(format!("unknown graph \"{}\"", value))
                    }),
                _ => Ok(None),
            }
        };

        let mut type_metadata = HashMap::new();
        for (type_name, directives) in type_directives {
            let mut metadata = TypeMetadata::default();
            let mut has_type_directive = false;
            for directive in &directives {
                match directive.name.as_str() {
                    JOIN_OWNER_DIRECTIVE => metadata.graph_name = graph_name(directive)?,
                    JOIN_TYPE_DIRECTIVE => {
                        has_type_directive = true;
                        if let (Some(graph), Some(key)) =
                            (graph_name(directive)?, string_argument(directive, "key"))
                        {
                            metadata
                                .keys
                                .entry(graph)
                                .or_insert_with(Vec::new)
                                .push(parse_field_set(&key)?);
                        }
                    }
                    _ => {}
                }
            }
            metadata.is_value_type = metadata.graph_name.is_none();
            if metadata.is_value_type && has_type_directive {
                return Err(QueryPlannerError::SchemaParse(format!(
                    "type \"{}\" cannot have a @{} directive without an @{} directive",
                    type_name, JOIN_TYPE_DIRECTIVE, JOIN_OWNER_DIRECTIVE
                )));
            }
            type_metadata.insert(type_name, metadata);
        }

        let mut field_metadata = HashMap::new();
        for (type_name, field_name, directives) in field_directives {
            if let Some(directive) = find_directive(&directives, JOIN_FIELD_DIRECTIVE) {
                let metadata = FieldMetadata {
                    graph_name: graph_name(directive)?,
                    requires: string_argument(directive, "requires")
                        .map(|requires| parse_field_set(&requires))
                        .transpose()?,
                    provides: string_argument(directive, "provides")
                        .map(|provides| parse_field_set(&provides))
                        .transpose()?,
                };
                field_metadata.insert(field_coordinate(&type_name, &field_name), metadata);
            }
        }

        let mut possible_types: HashMap<String, Vec<String>> = HashMap::new();
        for type_def in types.values() {
            match type_def.kind {
                TypeKind::Object => {
                    for interface in &type_def.interfaces {
                        possible_types
                            .entry(interface.clone())
                            .or_default()
                            .push(type_def.name.clone());
                    }
                }
                TypeKind::Union => {
                    possible_types
                        .entry(type_def.name.clone())
                        .or_default()
                        .extend(type_def.members.iter().cloned());
                }
                _ => {}
            }
        }

        let query_type = query_type.unwrap_or_else(|| "Query".to_string());
        if !types.contains_key(&query_type) {
            return Err(QueryPlannerError::SchemaParse(format!(
                "query root type \"{}\" is not defined",
                query_type
            )));
        }
        let mutation_type = mutation_type.or_else(|| {
            types
                .contains_key("Mutation")
                .then(|| "Mutation".to_string())
        });
        let subscription_type = subscription_type.or_else(|| {
            types
                .contains_key("Subscription")
                .then(|| "Subscription".to_string())
        });

        Ok(ComposedSchema {
            types,
            query_type,
            mutation_type,
            subscription_type,
            possible_types,
            type_metadata,
            field_metadata,
            graphs,
            typename_field: FieldDef::new(
                helpers::TYPENAME_FIELD_NAME,
                helpers::non_null(Type::NamedType("String".to_string())),
            ),
            schema_field: FieldDef::new(
                "__schema",
                helpers::non_null(Type::NamedType("__Schema".to_string())),
            ),
            type_field: FieldDef::new("__type", Type::NamedType("__Type".to_string())),
        })
    }
}

fn find_directive<'a>(directives: &'a [SchemaDirective], name: &str) -> Option<&'a SchemaDirective> {
    directives.iter().find(|directive| directive.name == name)
}

fn argument<'a>(directive: &'a SchemaDirective, name: &str) -> Option<&'a Value<'static, String>> {
    directive
        .arguments
        .iter()
        .find(|(argument, _)| argument == name)
        .map(|(_, value)| value)
}

fn string_argument(directive: &SchemaDirective, name: &str) -> Option<String> {
    match argument(directive, name) {
        Some(Value::String(value)) => Some(value.clone()),
        _ => None,
    }
}

/// Parse a `join__FieldSet` such as `"id organization { id }"`.
pub(crate) fn parse_field_set(field_set: &str) -> Result<SelectionSet, QueryPlannerError> {
    let document = graphql_parser::parse_query::<String>(&format!("{{ {} }}", field_set))
        .map_err(|err| {
            QueryPlannerError::SchemaParse(format!("invalid field set \"{}\": {}", field_set, err))
        })?
        .into_static();
    match document.definitions.into_iter().next() {
        Some(graphql_parser::query::Definition::Operation(OperationDefinition::SelectionSet(
            selection_set,
        ))) => Ok(selection_set),
        _ => Err(QueryPlannerError::SchemaParse(format!(
            "invalid field set \"{}\"",
            field_set
        ))),
    }
}
