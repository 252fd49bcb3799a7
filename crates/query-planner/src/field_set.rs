use crate::context::Field;
use crate::helpers::{self, response_name, FieldNode, Selection, SelectionSet};
use crate::schema::{ComposedSchema, TypeDef};
use crate::scope::Scope;
use indexmap::IndexMap;
use std::hash::Hash;

/// Group `items` by `key`, keeping the order in which keys are first seen.
pub(crate) fn group_by<T, K, F>(items: impl IntoIterator<Item = T>, key: F) -> Vec<Vec<T>>
where
    K: Hash + Eq,
    F: Fn(&T) -> K,
{
    let mut groups: IndexMap<K, Vec<T>> = IndexMap::new();
    for item in items {
        groups.entry(key(&item)).or_default().push(item);
    }
    groups.into_values().collect()
}

pub(crate) fn group_by_response_name<'a, 's>(
    fields: impl IntoIterator<Item = &'a Field<'s>>,
) -> Vec<Vec<&'a Field<'s>>>
where
    's: 'a,
{
    group_by(fields, |field| response_name(&field.node).to_string())
}

pub(crate) fn group_by_scope<'a, 's>(
    fields: impl IntoIterator<Item = &'a Field<'s>>,
) -> Vec<Vec<&'a Field<'s>>>
where
    's: 'a,
{
    group_by(fields, |field| field.scope.identity_key().to_string())
}

pub(crate) fn matches_field<'a, 's>(field: &'a Field<'s>) -> impl Fn(&Field<'s>) -> bool + 'a {
    move |other| field.field_def.name == other.field_def.name
}

/// Rebuild a selection set from planned fields.
///
/// Fields are merged by response name within a scope, and wrapped in inline fragments whenever
/// their scope narrows `parent_type` (always, when there is no parent type) or carries directives.
pub(crate) fn selection_set_from_field_set(
    schema: &ComposedSchema,
    fields: &[Field],
    parent_type: Option<&TypeDef>,
) -> SelectionSet {
    let mut items = Vec::new();
    for fields_by_scope in group_by_scope(fields) {
        let scope = &fields_by_scope[0].scope;
        let selections = group_by_response_name(fields_by_scope.iter().copied())
            .into_iter()
            .map(|fields_by_response_name| combine_fields(schema, &fields_by_response_name))
            .collect();
        items.extend(wrap_in_inline_fragment_if_needed(
            selections,
            scope,
            parent_type,
        ));
    }
    helpers::selection_set(items)
}

fn wrap_in_inline_fragment_if_needed(
    selections: Vec<Selection>,
    scope: &Scope,
    parent_type: Option<&TypeDef>,
) -> Vec<Selection> {
    let should_wrap = scope.enclosing().is_some()
        || !scope.directives().is_empty()
        || parent_type
            .map(|parent_type| scope.is_strictly_refining(parent_type))
            .unwrap_or(true);

    let selections = if should_wrap {
        vec![helpers::inline_fragment(
            &scope.parent_type().name,
            scope.directives().to_vec(),
            selections,
        )]
    } else {
        selections
    };

    match scope.enclosing() {
        Some(enclosing) => wrap_in_inline_fragment_if_needed(selections, enclosing, parent_type),
        None => selections,
    }
}

/// Combine fields that share a response name into one selection.
fn combine_fields(schema: &ComposedSchema, fields: &[&Field]) -> Selection {
    let field = fields[0];
    let is_composite = schema
        .type_by_name(field.field_def.named_type())
        .map(TypeDef::is_composite)
        .unwrap_or(false);
    if !is_composite {
        return Selection::Field(field.node.clone());
    }

    Selection::Field(FieldNode {
        selection_set: helpers::selection_set(merge_selection_sets(
            fields
                .iter()
                .flat_map(|field| field.node.selection_set.items.iter().cloned()),
        )),
        ..field.node.clone()
    })
}

/// Merge same-named field selections recursively. Fragments are kept as they are, after fields.
pub(crate) fn merge_selection_sets(selections: impl IntoIterator<Item = Selection>) -> Vec<Selection> {
    let mut fields: IndexMap<String, Vec<FieldNode>> = IndexMap::new();
    let mut fragments = Vec::new();
    for selection in selections {
        match selection {
            Selection::Field(field) => fields
                .entry(response_name(&field).to_string())
                .or_default()
                .push(field),
            fragment => fragments.push(fragment),
        }
    }

    fields
        .into_values()
        .map(|mut nodes| {
            let first = nodes.remove(0);
            if first.selection_set.items.is_empty() {
                return Selection::Field(first);
            }
            let mut items = first.selection_set.items.clone();
            items.extend(nodes.into_iter().flat_map(|node| node.selection_set.items));
            Selection::Field(FieldNode {
                selection_set: helpers::selection_set(merge_selection_sets(items)),
                ..first
            })
        })
        .chain(fragments)
        .collect()
}
