use graphql_parser::query;
use graphql_parser::Pos;

pub(crate) type Document = query::Document<'static, String>;
pub(crate) type Definition = query::Definition<'static, String>;
pub(crate) type OperationDefinition = query::OperationDefinition<'static, String>;
pub(crate) type FragmentDefinition = query::FragmentDefinition<'static, String>;
pub(crate) type VariableDefinition = query::VariableDefinition<'static, String>;
pub(crate) type SelectionSet = query::SelectionSet<'static, String>;
pub(crate) type Selection = query::Selection<'static, String>;
pub(crate) type FieldNode = query::Field<'static, String>;
pub(crate) type InlineFragment = query::InlineFragment<'static, String>;
pub(crate) type Directive = query::Directive<'static, String>;
pub(crate) type Value = query::Value<'static, String>;
pub type Type = query::Type<'static, String>;

pub(crate) const TYPENAME_FIELD_NAME: &str = "__typename";
pub(crate) const ENTITIES_FIELD_NAME: &str = "_entities";
pub(crate) const REPRESENTATIONS_VARIABLE: &str = "representations";

pub(crate) fn pos() -> Pos {
    Pos { line: 0, column: 0 }
}

pub(crate) fn span() -> (Pos, Pos) {
    (pos(), pos())
}

pub(crate) fn selection_set(items: Vec<Selection>) -> SelectionSet {
    SelectionSet {
        span: span(),
        items,
    }
}

pub(crate) fn field_node(name: &str) -> FieldNode {
    FieldNode {
        position: pos(),
        alias: None,
        name: name.to_string(),
        arguments: vec![],
        directives: vec![],
        selection_set: selection_set(vec![]),
    }
}

pub(crate) fn inline_fragment(
    type_condition: &str,
    directives: Vec<Directive>,
    items: Vec<Selection>,
) -> Selection {
    Selection::InlineFragment(InlineFragment {
        position: pos(),
        type_condition: Some(query::TypeCondition::On(type_condition.to_string())),
        directives,
        selection_set: selection_set(items),
    })
}

pub(crate) fn non_null(inner: Type) -> Type {
    Type::NonNullType(Box::new(inner))
}

pub(crate) fn list(inner: Type) -> Type {
    Type::ListType(Box::new(inner))
}

/// The key under which a field lands in the response.
pub(crate) fn response_name(field: &FieldNode) -> &str {
    field.alias.as_deref().unwrap_or(&field.name)
}

pub(crate) fn named_type(field_type: &Type) -> &str {
    match field_type {
        Type::NamedType(name) => name,
        Type::ListType(inner) | Type::NonNullType(inner) => named_type(inner),
    }
}

pub(crate) fn type_condition_name<'a>(type_condition: &'a Option<query::TypeCondition<'static, String>>) -> Option<&'a str> {
    type_condition
        .as_ref()
        .map(|query::TypeCondition::On(name)| name.as_str())
}
