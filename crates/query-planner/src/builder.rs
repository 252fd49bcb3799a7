//! Turns an operation into a [`QueryPlan`].
//!
//! Fields are split into fetch groups by the service that resolves them. Fields resolved by
//! another service than the one fetching their parent go to a dependent group, joined through
//! the entity keys. Each group then becomes a fetch, wrapped in a flatten when it merges below
//! the root, and sequenced before its dependent groups.

use crate::context::{build_operation_context, Field, FieldSet, QueryPlanningContext};
use crate::field_set::{group_by_response_name, group_by_scope, selection_set_from_field_set};
use crate::groups::{
    FetchGroups, GroupForField, GroupId, ParallelGroupForField, SerialGroupForField,
    SubfieldGroupForField,
};
use crate::helpers::{
    self, non_null, pos, response_name, Definition, Document, FieldNode, FragmentDefinition,
    OperationDefinition, Selection, SelectionSet, Type, Value, VariableDefinition,
    ENTITIES_FIELD_NAME, REPRESENTATIONS_VARIABLE, TYPENAME_FIELD_NAME,
};
use crate::model::{self, FetchNode, FlattenNode, OperationKind, PlanNode, QueryPlan};
use crate::schema::{is_introspection_type, ComposedSchema, TypeDef};
use crate::scope::Scope;
use crate::{QueryPlannerError, QueryPlanningOptions};
use graphql_parser::query::{FragmentSpread, Mutation, Query, Subscription};
use indexmap::IndexMap;
use json_ext::{Path, PathElement};

/// Plan the operation named `operation_name` (or the only one) of `document`.
pub(crate) fn build_query_plan(
    schema: &ComposedSchema,
    document: &Document,
    operation_name: Option<&str>,
    options: &QueryPlanningOptions,
) -> Result<QueryPlan, QueryPlannerError> {
    let operation = build_operation_context(document, operation_name)?;
    let kind = operation.kind;
    let root_type = match kind {
        OperationKind::Subscription => return Err(QueryPlannerError::UnsupportedSubscription),
        OperationKind::Mutation => schema
            .mutation_type()
            .ok_or_else(|| QueryPlannerError::UnknownType("Mutation".to_string()))?,
        OperationKind::Query => schema
            .query_type()
            .ok_or_else(|| QueryPlannerError::UnknownType("Query".to_string()))?,
    };

    let context = QueryPlanningContext::new(schema, operation, options.auto_fragmentization);
    let fields = context.collect_fields(&context.new_scope(root_type), context.operation.selection_set)?;

    let mut groups = FetchGroups::default();
    let root_groups = if kind == OperationKind::Mutation {
        let mut group_for_field = SerialGroupForField::default();
        split_fields(&context, &mut groups, &Path::empty(), fields, &mut group_for_field)?;
        group_for_field.into_groups()
    } else {
        let mut group_for_field = ParallelGroupForField::default();
        split_fields(&context, &mut groups, &Path::empty(), fields, &mut group_for_field)?;
        group_for_field.into_groups()
    };

    let nodes = root_groups
        .into_iter()
        .map(|group| execution_node_for_group(&context, &mut groups, group, Some(root_type)))
        .collect::<Result<Vec<_>, _>>()?;

    if nodes.is_empty() {
        return Ok(QueryPlan { node: None });
    }

    let node = match kind {
        OperationKind::Mutation => flat_wrap(NodeKind::Sequence, nodes)?,
        _ => flat_wrap(NodeKind::Parallel, nodes)?,
    };
    Ok(QueryPlan { node: Some(node) })
}

fn split_fields<'s>(
    context: &QueryPlanningContext<'s, '_>,
    groups: &mut FetchGroups<'s>,
    path: &Path,
    fields: FieldSet<'s>,
    group_for_field: &mut impl GroupForField<'s>,
) -> Result<(), QueryPlannerError> {
    for fields_for_response_name in group_by_response_name(&fields) {
        for fields_for_scope in group_by_scope(fields_for_response_name) {
            let field = fields_for_scope[0];
            let scope = &field.scope;
            let parent_type = scope.parent_type();
            let field_def = field.field_def;

            // resolved by the gateway itself
            if field_def.name == TYPENAME_FIELD_NAME && context.schema.is_root_type(parent_type) {
                continue;
            }
            if is_introspection_type(field_def.named_type()) {
                continue;
            }

            let possible_types = scope.possible_runtime_types();
            let resolved_by_parent =
                parent_type.is_object() && possible_types.contains(&parent_type);
            if resolved_by_parent || !has_overriding_field_defs(context, field, possible_types)? {
                let group = group_for_field.group_for_field(context, groups, field)?;
                let completed = complete_field(context, groups, scope, group, path, &fields_for_scope)?;
                groups[group].fields.push(completed);
                continue;
            }

            // explode the field for every runtime type, batching the types resolved by a group
            let mut runtime_types_by_group: IndexMap<GroupId, Vec<&'s TypeDef>> = IndexMap::new();
            for &runtime_type in possible_types {
                let runtime_field = Field {
                    scope: scope.refine(runtime_type, vec![]),
                    node: field.node.clone(),
                    field_def: context.get_field_def(runtime_type, &field.node)?,
                };
                let group = group_for_field.group_for_field(context, groups, &runtime_field)?;
                runtime_types_by_group
                    .entry(group)
                    .or_default()
                    .push(runtime_type);
            }

            for (group, runtime_types) in runtime_types_by_group {
                for runtime_type in runtime_types {
                    let runtime_fields = fields_for_scope
                        .iter()
                        .map(|field| {
                            Ok(Field {
                                scope: field.scope.clone(),
                                node: field.node.clone(),
                                field_def: context.get_field_def(runtime_type, &field.node)?,
                            })
                        })
                        .collect::<Result<Vec<_>, QueryPlannerError>>()?;
                    let runtime_scope = scope.refine(runtime_type, vec![]);
                    let completed = complete_field(
                        context,
                        groups,
                        &runtime_scope,
                        group,
                        path,
                        &runtime_fields.iter().collect::<Vec<_>>(),
                    )?;
                    groups[group].fields.push(completed);
                }
            }
        }
    }
    Ok(())
}

/// True when a runtime type declares its own owner for the field, so the abstract field has to
/// be resolved per runtime type.
fn has_overriding_field_defs<'s>(
    context: &QueryPlanningContext<'s, '_>,
    field: &Field<'s>,
    possible_types: &[&'s TypeDef],
) -> Result<bool, QueryPlannerError> {
    let mut overriding = false;
    for &runtime_type in possible_types {
        let runtime_field_def = context.get_field_def(runtime_type, &field.node)?;
        if let Some(graph_name) = context
            .schema
            .field_metadata(runtime_type, runtime_field_def)
            .and_then(|metadata| metadata.graph_name.as_deref())
        {
            overriding |= !graph_name.is_empty();
        }
    }
    Ok(overriding)
}

/// Plan the selections of `fields`, which share a response name and a scope, below
/// `parent_group`.
fn complete_field<'s>(
    context: &QueryPlanningContext<'s, '_>,
    groups: &mut FetchGroups<'s>,
    scope: &Scope<'s>,
    parent_group: GroupId,
    path: &Path,
    fields: &[&Field<'s>],
) -> Result<Field<'s>, QueryPlannerError> {
    let field = fields[0];
    let return_type = context.return_type(field.field_def)?;

    if !return_type.is_composite() {
        return Ok(Field {
            scope: scope.clone(),
            node: field.node.clone(),
            field_def: field.field_def,
        });
    }

    let field_path = add_path(path, response_name(&field.node), &field.field_def.field_type);
    let parent_service = groups[parent_group].service_name.clone();
    let provided_fields =
        context.get_provided_fields(scope.parent_type(), field.field_def, &parent_service)?;
    let sub_group = groups.create(&parent_service, field_path.clone(), provided_fields);

    let return_scope = context.new_scope(return_type);
    if return_type.is_abstract() {
        let typename_field = context.typename_field(return_scope.clone());
        groups[sub_group].fields.push(typename_field);
    }

    let mut subfields = Vec::new();
    for field in fields {
        if !field.node.selection_set.items.is_empty() {
            subfields.extend(context.collect_fields(&return_scope, &field.node.selection_set)?);
        }
    }
    split_fields(
        context,
        groups,
        &field_path,
        subfields,
        &mut SubfieldGroupForField::new(sub_group),
    )?;
    groups.merge_dependent_groups(parent_group, sub_group);

    let sub_group_fields = std::mem::take(&mut groups[sub_group].fields);
    let mut selection_set =
        selection_set_from_field_set(context.schema, &sub_group_fields, Some(return_type));

    if context.auto_fragmentization && sub_group_fields.len() > 2 {
        let fragment = context.get_internal_fragment(selection_set, return_type);
        selection_set = helpers::selection_set(vec![Selection::FragmentSpread(FragmentSpread {
            position: pos(),
            fragment_name: fragment.name.clone(),
            directives: vec![],
        })]);
        groups[parent_group]
            .internal_fragments
            .insert(fragment.name.clone(), fragment);
    }

    let sub_group_fragments = std::mem::take(&mut groups[sub_group].internal_fragments);
    groups[parent_group]
        .internal_fragments
        .extend(sub_group_fragments);

    Ok(Field {
        scope: scope.clone(),
        node: FieldNode {
            selection_set,
            ..field.node.clone()
        },
        field_def: field.field_def,
    })
}

/// `path` extended with `response_name`, plus a flatten for every list level of `field_type`.
fn add_path(path: &Path, response_name: &str, field_type: &Type) -> Path {
    let mut path = path.clone();
    path.push(PathElement::Key(response_name.to_string()));
    let mut field_type = field_type;
    loop {
        match field_type {
            Type::NamedType(_) => return path,
            Type::NonNullType(inner) => field_type = inner,
            Type::ListType(inner) => {
                path.push(PathElement::Flatten);
                field_type = inner;
            }
        }
    }
}

fn execution_node_for_group<'s>(
    context: &QueryPlanningContext<'s, '_>,
    groups: &mut FetchGroups<'s>,
    group: GroupId,
    parent_type: Option<&TypeDef>,
) -> Result<PlanNode, QueryPlannerError> {
    let fields = std::mem::take(&mut groups[group].fields);
    let selection_set = selection_set_from_field_set(context.schema, &fields, parent_type);

    let required_fields = std::mem::take(&mut groups[group].required_fields);
    let requires = if required_fields.is_empty() {
        None
    } else {
        Some(selection_set_from_field_set(context.schema, &required_fields, None))
    };

    let internal_fragments = groups[group]
        .internal_fragments
        .values()
        .cloned()
        .collect::<Vec<_>>();
    let variable_definitions = context.get_variable_usages(&selection_set, &internal_fragments)?;
    let variable_usages = variable_definitions
        .iter()
        .map(|definition| definition.name.clone())
        .collect();

    let (operation, operation_kind) = if requires.is_some() {
        (
            operation_for_entities_fetch(selection_set, variable_definitions, internal_fragments)?,
            OperationKind::Query,
        )
    } else {
        let kind = context.operation.kind;
        (
            operation_for_root_fetch(selection_set, variable_definitions, internal_fragments, kind)?,
            kind,
        )
    };

    let fetch = PlanNode::Fetch(FetchNode {
        service_name: groups[group].service_name.clone(),
        requires: requires.map(|requires| trim_selection_nodes(requires.items)),
        variable_usages,
        operation,
        operation_kind,
    });

    let merge_at = groups[group].merge_at.clone();
    let node = if merge_at.is_empty() {
        fetch
    } else {
        PlanNode::Flatten(FlattenNode {
            path: merge_at,
            node: Box::new(fetch),
        })
    };

    let dependent_groups = groups.dependent_groups(group);
    if dependent_groups.is_empty() {
        return Ok(node);
    }

    let dependent_nodes = dependent_groups
        .into_iter()
        .map(|dependent_group| execution_node_for_group(context, groups, dependent_group, None))
        .collect::<Result<Vec<_>, _>>()?;

    flat_wrap(
        NodeKind::Sequence,
        vec![node, flat_wrap(NodeKind::Parallel, dependent_nodes)?],
    )
}

fn operation_for_entities_fetch(
    selection_set: SelectionSet,
    variable_definitions: Vec<VariableDefinition>,
    fragments: Vec<FragmentDefinition>,
) -> Result<String, QueryPlannerError> {
    let representations = VariableDefinition {
        position: pos(),
        name: REPRESENTATIONS_VARIABLE.to_string(),
        var_type: non_null(helpers::list(non_null(Type::NamedType("_Any".to_string())))),
        default_value: None,
    };

    let mut entities = helpers::field_node(ENTITIES_FIELD_NAME);
    entities.arguments = vec![(
        REPRESENTATIONS_VARIABLE.to_string(),
        Value::Variable(REPRESENTATIONS_VARIABLE.to_string()),
    )];
    entities.selection_set = selection_set;

    let mut all_variable_definitions = vec![representations];
    all_variable_definitions.extend(variable_definitions);

    print_operation(
        OperationDefinition::Query(Query {
            position: pos(),
            name: None,
            variable_definitions: all_variable_definitions,
            directives: vec![],
            selection_set: helpers::selection_set(vec![Selection::Field(entities)]),
        }),
        fragments,
    )
}

fn operation_for_root_fetch(
    selection_set: SelectionSet,
    variable_definitions: Vec<VariableDefinition>,
    fragments: Vec<FragmentDefinition>,
    kind: OperationKind,
) -> Result<String, QueryPlannerError> {
    let operation = match kind {
        OperationKind::Query if variable_definitions.is_empty() => {
            OperationDefinition::SelectionSet(selection_set)
        }
        OperationKind::Query => OperationDefinition::Query(Query {
            position: pos(),
            name: None,
            variable_definitions,
            directives: vec![],
            selection_set,
        }),
        OperationKind::Mutation => OperationDefinition::Mutation(Mutation {
            position: pos(),
            name: None,
            variable_definitions,
            directives: vec![],
            selection_set,
        }),
        OperationKind::Subscription => OperationDefinition::Subscription(Subscription {
            position: pos(),
            name: None,
            variable_definitions,
            directives: vec![],
            selection_set,
        }),
    };
    print_operation(operation, fragments)
}

fn print_operation(
    operation: OperationDefinition,
    fragments: Vec<FragmentDefinition>,
) -> Result<String, QueryPlannerError> {
    let mut definitions = vec![Definition::Operation(operation)];
    definitions.extend(fragments.into_iter().map(Definition::Fragment));
    let document = Document { definitions };
    graphql_parser::minify_query(document.to_string())
        .map_err(|err| QueryPlannerError::Print(err.to_string()))
}

/// The selections sent as entity representations: fields without aliases or arguments.
fn trim_selection_nodes(selections: Vec<Selection>) -> model::SelectionSet {
    selections
        .into_iter()
        .filter_map(|selection| match selection {
            Selection::Field(field) => Some(model::Selection::Field(model::Field {
                alias: None,
                name: field.name,
                selections: if field.selection_set.items.is_empty() {
                    None
                } else {
                    Some(trim_selection_nodes(field.selection_set.items))
                },
            })),
            Selection::InlineFragment(fragment) => {
                Some(model::Selection::InlineFragment(model::InlineFragment {
                    type_condition: helpers::type_condition_name(&fragment.type_condition)
                        .map(str::to_string),
                    selections: trim_selection_nodes(fragment.selection_set.items),
                }))
            }
            Selection::FragmentSpread(_) => None,
        })
        .collect()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum NodeKind {
    Sequence,
    Parallel,
}

/// Wrap `nodes` in a node of `kind`, splicing in the children of nested nodes of the same kind.
/// A single node is returned as is.
fn flat_wrap(kind: NodeKind, mut nodes: Vec<PlanNode>) -> Result<PlanNode, QueryPlannerError> {
    match nodes.len() {
        0 => return Err(QueryPlannerError::EmptyNodes),
        1 => return Ok(nodes.remove(0)),
        _ => {}
    }

    let nodes = nodes
        .into_iter()
        .flat_map(|node| match (kind, node) {
            (NodeKind::Sequence, PlanNode::Sequence { nodes })
            | (NodeKind::Parallel, PlanNode::Parallel { nodes }) => nodes,
            (_, node) => vec![node],
        })
        .collect();

    Ok(match kind {
        NodeKind::Sequence => PlanNode::Sequence { nodes },
        NodeKind::Parallel => PlanNode::Parallel { nodes },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fetch(service_name: &str) -> PlanNode {
        PlanNode::Fetch(FetchNode {
            service_name: service_name.to_string(),
            requires: None,
            variable_usages: vec![],
            operation: "{me{id}}".to_string(),
            operation_kind: OperationKind::Query,
        })
    }

    #[test]
    fn flat_wrap_single_node_is_unchanged() {
        let sequence = PlanNode::Sequence {
            nodes: vec![fetch("a"), fetch("b")],
        };
        assert_eq!(
            flat_wrap(NodeKind::Parallel, vec![sequence.clone()]).unwrap(),
            sequence
        );
        assert_eq!(flat_wrap(NodeKind::Sequence, vec![fetch("a")]).unwrap(), fetch("a"));
    }

    #[test]
    fn flat_wrap_splices_same_kind() {
        let wrapped = flat_wrap(
            NodeKind::Parallel,
            vec![
                PlanNode::Parallel {
                    nodes: vec![fetch("a"), fetch("b")],
                },
                PlanNode::Sequence {
                    nodes: vec![fetch("c"), fetch("d")],
                },
                fetch("e"),
            ],
        )
        .unwrap();
        assert_eq!(
            wrapped,
            PlanNode::Parallel {
                nodes: vec![
                    fetch("a"),
                    fetch("b"),
                    PlanNode::Sequence {
                        nodes: vec![fetch("c"), fetch("d")],
                    },
                    fetch("e"),
                ]
            }
        );
    }

    #[test]
    fn flat_wrap_rejects_empty_input() {
        assert_eq!(
            flat_wrap(NodeKind::Sequence, vec![]).unwrap_err(),
            QueryPlannerError::EmptyNodes
        );
    }

    #[test]
    fn paths_flatten_lists() {
        let field_type = non_null(helpers::list(non_null(helpers::list(Type::NamedType(
            "Review".to_string(),
        )))));
        assert_eq!(
            add_path(&Path::from("me"), "reviews", &field_type).to_string(),
            "me.reviews.@.@"
        );
        assert_eq!(
            add_path(&Path::empty(), "me", &Type::NamedType("User".to_string())).to_string(),
            "me"
        );
    }

    #[test]
    fn entities_operation() {
        let selection_set = helpers::selection_set(vec![helpers::inline_fragment(
            "User",
            vec![],
            vec![Selection::Field(helpers::field_node("numberOfReviews"))],
        )]);
        assert_eq!(
            operation_for_entities_fetch(selection_set, vec![], vec![]).unwrap(),
            "query($representations:[_Any!]!){_entities(representations:$representations){...on User{numberOfReviews}}}"
        );
    }
}
