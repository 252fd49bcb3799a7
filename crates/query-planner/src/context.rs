use crate::helpers::{
    self, type_condition_name, Definition, Directive, Document, FieldNode, FragmentDefinition,
    OperationDefinition, Selection, SelectionSet, Value, VariableDefinition,
};
use crate::model::OperationKind;
use crate::schema::{ComposedSchema, FieldDef, TypeDef};
use crate::scope::Scope;
use crate::QueryPlannerError;
use graphql_parser::query::TypeCondition;
use indexmap::{IndexMap, IndexSet};
use std::cell::RefCell;
use std::collections::HashMap;

/// The smallest planning unit: a selected field, the scope it was selected in and its definition.
#[derive(Clone, Debug)]
pub(crate) struct Field<'s> {
    pub(crate) scope: Scope<'s>,
    pub(crate) node: FieldNode,
    pub(crate) field_def: &'s FieldDef,
}

pub(crate) type FieldSet<'s> = Vec<Field<'s>>;

/// The operation selected from a query document.
#[derive(Debug)]
pub(crate) struct OperationContext<'q> {
    pub(crate) kind: OperationKind,
    pub(crate) selection_set: &'q SelectionSet,
    pub(crate) variable_definitions: &'q [VariableDefinition],
    pub(crate) fragments: HashMap<&'q str, &'q FragmentDefinition>,
}

/// Pick the operation to plan from `document`.
pub(crate) fn build_operation_context<'q>(
    document: &'q Document,
    operation_name: Option<&str>,
) -> Result<OperationContext<'q>, QueryPlannerError> {
    let mut operations = Vec::new();
    let mut fragments = HashMap::new();
    for definition in &document.definitions {
        match definition {
            Definition::Operation(operation) => operations.push(operation),
            Definition::Fragment(fragment) => {
                fragments.insert(fragment.name.as_str(), fragment);
            }
        }
    }

    let operation = match operation_name {
        Some(name) => operations
            .into_iter()
            .find(|operation| operation_name_of(operation) == Some(name))
            .ok_or_else(|| QueryPlannerError::UnknownOperation(name.to_string()))?,
        None if operations.len() > 1 => return Err(QueryPlannerError::MissingOperationName),
        None => operations
            .into_iter()
            .next()
            .ok_or(QueryPlannerError::MissingOperation)?,
    };

    let (kind, selection_set, variable_definitions) = match operation {
        OperationDefinition::SelectionSet(selection_set) => {
            (OperationKind::Query, selection_set, &[][..])
        }
        OperationDefinition::Query(query) => (
            OperationKind::Query,
            &query.selection_set,
            query.variable_definitions.as_slice(),
        ),
        OperationDefinition::Mutation(mutation) => (
            OperationKind::Mutation,
            &mutation.selection_set,
            mutation.variable_definitions.as_slice(),
        ),
        OperationDefinition::Subscription(subscription) => (
            OperationKind::Subscription,
            &subscription.selection_set,
            subscription.variable_definitions.as_slice(),
        ),
    };

    Ok(OperationContext {
        kind,
        selection_set,
        variable_definitions,
        fragments,
    })
}

fn operation_name_of(operation: &OperationDefinition) -> Option<&str> {
    match operation {
        OperationDefinition::SelectionSet(_) => None,
        OperationDefinition::Query(query) => query.name.as_deref(),
        OperationDefinition::Mutation(mutation) => mutation.name.as_deref(),
        OperationDefinition::Subscription(subscription) => subscription.name.as_deref(),
    }
}

/// Everything needed to plan one operation.
pub(crate) struct QueryPlanningContext<'s, 'q> {
    pub(crate) schema: &'s ComposedSchema,
    pub(crate) operation: OperationContext<'q>,
    pub(crate) auto_fragmentization: bool,
    internal_fragments: RefCell<IndexMap<String, FragmentDefinition>>,
}

impl<'s, 'q> QueryPlanningContext<'s, 'q> {
    pub(crate) fn new(
        schema: &'s ComposedSchema,
        operation: OperationContext<'q>,
        auto_fragmentization: bool,
    ) -> Self {
        QueryPlanningContext {
            schema,
            operation,
            auto_fragmentization,
            internal_fragments: Default::default(),
        }
    }

    pub(crate) fn new_scope(&self, parent_type: &'s TypeDef) -> Scope<'s> {
        Scope::new(self.schema, parent_type, vec![], None)
    }

    pub(crate) fn get_field_def(
        &self,
        parent_type: &'s TypeDef,
        node: &FieldNode,
    ) -> Result<&'s FieldDef, QueryPlannerError> {
        self.schema
            .field_def(parent_type, &node.name)
            .ok_or_else(|| QueryPlannerError::UnknownField {
                field: node.name.clone(),
                type_name: parent_type.name.clone(),
            })
    }

    pub(crate) fn return_type(&self, field_def: &FieldDef) -> Result<&'s TypeDef, QueryPlannerError> {
        self.schema.type_named(field_def.named_type())
    }

    /// Resolve every field of `selection_set`, inlining fragments.
    ///
    /// Fragments whose type condition cannot match any runtime type of the enclosing scope are
    /// dropped.
    pub(crate) fn collect_fields(
        &self,
        scope: &Scope<'s>,
        selection_set: &SelectionSet,
    ) -> Result<FieldSet<'s>, QueryPlannerError> {
        let mut fields = Vec::new();
        self.collect_fields_into(scope, selection_set, &mut fields)?;
        Ok(fields)
    }

    fn collect_fields_into(
        &self,
        scope: &Scope<'s>,
        selection_set: &SelectionSet,
        fields: &mut FieldSet<'s>,
    ) -> Result<(), QueryPlannerError> {
        for selection in &selection_set.items {
            match selection {
                Selection::Field(node) => {
                    let field_def = self.get_field_def(scope.parent_type(), node)?;
                    fields.push(Field {
                        scope: scope.clone(),
                        node: node.clone(),
                        field_def,
                    });
                }
                Selection::InlineFragment(fragment) => {
                    self.collect_fragment_fields(
                        scope,
                        type_condition_name(&fragment.type_condition),
                        &fragment.directives,
                        &fragment.selection_set,
                        fields,
                    )?;
                }
                Selection::FragmentSpread(spread) => {
                    let fragment = self
                        .operation
                        .fragments
                        .get(spread.fragment_name.as_str())
                        .ok_or_else(|| {
                            QueryPlannerError::UnknownFragment(spread.fragment_name.clone())
                        })?;
                    let TypeCondition::On(type_condition) = &fragment.type_condition;
                    self.collect_fragment_fields(
                        scope,
                        Some(type_condition),
                        &spread.directives,
                        &fragment.selection_set,
                        fields,
                    )?;
                }
            }
        }
        Ok(())
    }

    fn collect_fragment_fields(
        &self,
        scope: &Scope<'s>,
        type_condition: Option<&str>,
        directives: &[Directive],
        selection_set: &SelectionSet,
        fields: &mut FieldSet<'s>,
    ) -> Result<(), QueryPlannerError> {
        let type_def = match type_condition {
            Some(name) => self.schema.type_named(name)?,
            None => scope.parent_type(),
        };
        let new_scope = scope.refine(type_def, directives.to_vec());
        if new_scope.possible_runtime_types().is_empty() {
            return Ok(());
        }
        self.collect_fields_into(&new_scope, selection_set, fields)
    }

    /// The service that owns `type_def`. Value types have none.
    pub(crate) fn get_base_service(&self, type_def: &TypeDef) -> Option<&'s str> {
        self.schema
            .type_metadata(type_def)
            .filter(|metadata| !metadata.is_value_type)
            .and_then(|metadata| metadata.graph_name.as_deref())
            .filter(|service| !service.is_empty())
    }

    /// The service that resolves `field_def`: its own metadata wins over the parent type's owner.
    pub(crate) fn get_owning_service(
        &self,
        parent_type: &TypeDef,
        field_def: &FieldDef,
    ) -> Option<&'s str> {
        match self.schema.field_metadata(parent_type, field_def) {
            Some(metadata) => metadata.graph_name.as_deref(),
            None => self
                .schema
                .type_metadata(parent_type)
                .and_then(|metadata| metadata.graph_name.as_deref()),
        }
    }

    /// `__typename` plus, for each runtime type, the first key (or every key with `fetch_all`)
    /// `service_name` declares for it.
    pub(crate) fn get_key_fields(
        &self,
        scope: &Scope<'s>,
        service_name: &str,
        fetch_all: bool,
    ) -> Result<FieldSet<'s>, QueryPlannerError> {
        let mut key_fields = vec![self.typename_field(scope.clone())];

        for runtime_type in scope.possible_runtime_types() {
            let keys = match self.schema.type_metadata(runtime_type) {
                Some(metadata) if !metadata.is_value_type => metadata.keys.get(service_name),
                _ => None,
            };
            let keys = match keys {
                Some(keys) if !keys.is_empty() => keys,
                _ => continue,
            };

            let new_scope = scope.refine(runtime_type, vec![]);
            if fetch_all {
                for key in keys {
                    key_fields.extend(self.collect_fields(&new_scope, key)?);
                }
            } else {
                key_fields.extend(self.collect_fields(&new_scope, &keys[0])?);
            }
        }

        Ok(key_fields)
    }

    /// The fields `service_name` needs to resolve `field_def`: keys plus its `@requires`.
    pub(crate) fn get_required_fields(
        &self,
        scope: &Scope<'s>,
        field_def: &FieldDef,
        service_name: &str,
    ) -> Result<FieldSet<'s>, QueryPlannerError> {
        let mut required_fields = self.get_key_fields(scope, service_name, false)?;
        if let Some(requires) = self
            .schema
            .field_metadata(scope.parent_type(), field_def)
            .and_then(|metadata| metadata.requires.as_ref())
        {
            required_fields.extend(self.collect_fields(scope, requires)?);
        }
        Ok(required_fields)
    }

    /// The fields `service_name` returns alongside `field_def`: every key plus its `@provides`.
    pub(crate) fn get_provided_fields(
        &self,
        parent_type: &TypeDef,
        field_def: &FieldDef,
        service_name: &str,
    ) -> Result<FieldSet<'s>, QueryPlannerError> {
        let return_type = self.return_type(field_def)?;
        if !return_type.is_composite() {
            return Ok(vec![]);
        }

        let scope = self.new_scope(return_type);
        let mut provided_fields = self.get_key_fields(&scope, service_name, true)?;
        if let Some(provides) = self
            .schema
            .field_metadata(parent_type, field_def)
            .and_then(|metadata| metadata.provides.as_ref())
        {
            provided_fields.extend(self.collect_fields(&scope, provides)?);
        }
        Ok(provided_fields)
    }

    pub(crate) fn typename_field(&self, scope: Scope<'s>) -> Field<'s> {
        let field_def = self
            .schema
            .field_def(scope.parent_type(), helpers::TYPENAME_FIELD_NAME);
        Field {
            node: helpers::field_node(helpers::TYPENAME_FIELD_NAME),
            // `__typename` resolves on every composite type
            field_def: field_def.unwrap_or_else(|| self.schema.typename_field_def()),
            scope,
        }
    }

    /// Definitions of the operation variables referenced by `selection_set` and `fragments`, in
    /// order of first use.
    pub(crate) fn get_variable_usages(
        &self,
        selection_set: &SelectionSet,
        fragments: &[FragmentDefinition],
    ) -> Result<Vec<VariableDefinition>, QueryPlannerError> {
        let mut names = IndexSet::new();
        collect_selection_set_variables(selection_set, &mut names);
        for fragment in fragments {
            collect_directive_variables(&fragment.directives, &mut names);
            collect_selection_set_variables(&fragment.selection_set, &mut names);
        }

        names
            .into_iter()
            .map(|name| {
                self.operation
                    .variable_definitions
                    .iter()
                    .find(|definition| definition.name == name)
                    .cloned()
                    .ok_or(QueryPlannerError::MissingVariableDefinition(name))
            })
            .collect()
    }

    /// Get or register the internal fragment for `selection_set` on `type_def`.
    pub(crate) fn get_internal_fragment(
        &self,
        selection_set: SelectionSet,
        type_def: &TypeDef,
    ) -> FragmentDefinition {
        let key = format!("{}:{}", type_def.name, selection_set);
        let mut fragments = self.internal_fragments.borrow_mut();
        let next_index = fragments.len();
        fragments
            .entry(key)
            .or_insert_with(|| FragmentDefinition {
                position: helpers::pos(),
                name: format!("__QueryPlanFragment_{}__", next_index),
                type_condition: TypeCondition::On(type_def.name.clone()),
                directives: vec![],
                selection_set,
            })
            .clone()
    }
}

fn collect_selection_set_variables(selection_set: &SelectionSet, names: &mut IndexSet<String>) {
    for selection in &selection_set.items {
        match selection {
            Selection::Field(field) => {
                for (_, value) in &field.arguments {
                    collect_value_variables(value, names);
                }
                collect_directive_variables(&field.directives, names);
                collect_selection_set_variables(&field.selection_set, names);
            }
            Selection::InlineFragment(fragment) => {
                collect_directive_variables(&fragment.directives, names);
                collect_selection_set_variables(&fragment.selection_set, names);
            }
            Selection::FragmentSpread(spread) => {
                collect_directive_variables(&spread.directives, names);
            }
        }
    }
}

fn collect_directive_variables(directives: &[Directive], names: &mut IndexSet<String>) {
    for directive in directives {
        for (_, value) in &directive.arguments {
            collect_value_variables(value, names);
        }
    }
}

fn collect_value_variables(value: &Value, names: &mut IndexSet<String>) {
    match value {
        Value::Variable(name) => {
            names.insert(name.clone());
        }
        Value::List(values) => {
            for value in values {
                collect_value_variables(value, names);
            }
        }
        Value::Object(fields) => {
            for value in fields.values() {
                collect_value_variables(value, names);
            }
        }
        _ => {}
    }
}
