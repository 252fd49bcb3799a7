use crate::context::{Field, FieldSet, QueryPlanningContext};
use crate::field_set::matches_field;
use crate::helpers::FragmentDefinition;
use crate::QueryPlannerError;
use indexmap::IndexMap;
use json_ext::Path;
use std::collections::BTreeMap;
use std::ops::{Index, IndexMut};

/// Handle to a [`FetchGroup`] stored in [`FetchGroups`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct GroupId(usize);

/// A set of fields fetched from one service in a single request.
#[derive(Debug)]
pub(crate) struct FetchGroup<'s> {
    pub(crate) service_name: String,
    pub(crate) fields: FieldSet<'s>,
    pub(crate) internal_fragments: IndexMap<String, FragmentDefinition>,
    pub(crate) required_fields: FieldSet<'s>,
    pub(crate) provided_fields: FieldSet<'s>,
    pub(crate) merge_at: Path,
    dependent_groups_by_service: BTreeMap<String, GroupId>,
    other_dependent_groups: Vec<GroupId>,
}

/// Every fetch group created while planning one operation.
#[derive(Debug, Default)]
pub(crate) struct FetchGroups<'s> {
    groups: Vec<FetchGroup<'s>>,
}

impl<'s> Index<GroupId> for FetchGroups<'s> {
    type Output = FetchGroup<'s>;

    fn index(&self, id: GroupId) -> &Self::Output {
        &self.groups[id.0]
    }
}

impl<'s> IndexMut<GroupId> for FetchGroups<'s> {
    fn index_mut(&mut self, id: GroupId) -> &mut Self::Output {
        &mut self.groups[id.0]
    }
}

impl<'s> FetchGroups<'s> {
    pub(crate) fn create(
        &mut self,
        service_name: &str,
        merge_at: Path,
        provided_fields: FieldSet<'s>,
    ) -> GroupId {
        self.groups.push(FetchGroup {
            service_name: service_name.to_string(),
            fields: vec![],
            internal_fragments: IndexMap::new(),
            required_fields: vec![],
            provided_fields,
            merge_at,
            dependent_groups_by_service: BTreeMap::new(),
            other_dependent_groups: vec![],
        });
        GroupId(self.groups.len() - 1)
    }

    /// The group fetching from `service_name` after `parent`, created on first use.
    ///
    /// `required_fields` become inputs of the dependent group and are also fetched by `parent`.
    pub(crate) fn dependent_group_for_service(
        &mut self,
        parent: GroupId,
        service_name: &str,
        required_fields: FieldSet<'s>,
    ) -> GroupId {
        let group = match self[parent].dependent_groups_by_service.get(service_name) {
            Some(group) => *group,
            None => {
                let merge_at = self[parent].merge_at.clone();
                let group = self.create(service_name, merge_at, vec![]);
                self[parent]
                    .dependent_groups_by_service
                    .insert(service_name.to_string(), group);
                group
            }
        };

        if !required_fields.is_empty() {
            self[group]
                .required_fields
                .extend(required_fields.iter().cloned());
            self[parent].fields.extend(required_fields);
        }
        group
    }

    /// Dependent groups of `id`: one per service in service name order, then the merged ones.
    pub(crate) fn dependent_groups(&self, id: GroupId) -> Vec<GroupId> {
        let group = &self[id];
        group
            .dependent_groups_by_service
            .values()
            .chain(group.other_dependent_groups.iter())
            .copied()
            .collect()
    }

    /// Move the dependent groups of `from` under `into`, merging groups that target the same
    /// service at the same path.
    pub(crate) fn merge_dependent_groups(&mut self, into: GroupId, from: GroupId) {
        for dependent_group in self.dependent_groups(from) {
            let existing = self.dependent_groups(into).into_iter().find(|group| {
                self[*group].service_name == self[dependent_group].service_name
                    && self[*group].merge_at == self[dependent_group].merge_at
            });
            match existing {
                Some(existing) => self.merge(existing, dependent_group),
                None => self[into].other_dependent_groups.push(dependent_group),
            }
        }
    }

    fn merge(&mut self, into: GroupId, from: GroupId) {
        let fields = std::mem::take(&mut self[from].fields);
        let required_fields = std::mem::take(&mut self[from].required_fields);
        let provided_fields = std::mem::take(&mut self[from].provided_fields);
        let internal_fragments = std::mem::take(&mut self[from].internal_fragments);

        let group = &mut self[into];
        group.fields.extend(fields);
        group.required_fields.extend(required_fields);
        group.provided_fields.extend(provided_fields);
        group.internal_fragments.extend(internal_fragments);

        self.merge_dependent_groups(into, from);
    }
}

/// Picks the fetch group responsible for a field.
pub(crate) trait GroupForField<'s> {
    fn group_for_field(
        &mut self,
        context: &QueryPlanningContext<'s, '_>,
        groups: &mut FetchGroups<'s>,
        field: &Field<'s>,
    ) -> Result<GroupId, QueryPlannerError>;
}

fn owning_service<'s>(
    context: &QueryPlanningContext<'s, '_>,
    field: &Field<'s>,
) -> Result<&'s str, QueryPlannerError> {
    let parent_type = field.scope.parent_type();
    context
        .get_owning_service(parent_type, field.field_def)
        .filter(|service| !service.is_empty())
        .ok_or_else(|| QueryPlannerError::MissingOwningService {
            type_name: parent_type.name.clone(),
            field: field.field_def.name.clone(),
        })
}

/// Root fields of queries: one group per service, listed by service name.
#[derive(Debug, Default)]
pub(crate) struct ParallelGroupForField {
    groups_by_service: BTreeMap<String, GroupId>,
}

impl ParallelGroupForField {
    pub(crate) fn into_groups(self) -> Vec<GroupId> {
        self.groups_by_service.into_values().collect()
    }
}

impl<'s> GroupForField<'s> for ParallelGroupForField {
    fn group_for_field(
        &mut self,
        context: &QueryPlanningContext<'s, '_>,
        groups: &mut FetchGroups<'s>,
        field: &Field<'s>,
    ) -> Result<GroupId, QueryPlannerError> {
        let service_name = owning_service(context, field)?;
        Ok(*self
            .groups_by_service
            .entry(service_name.to_string())
            .or_insert_with(|| groups.create(service_name, Path::empty(), vec![])))
    }
}

/// Root fields of mutations: consecutive fields of one service share a group, so fields run in
/// the order they were selected.
#[derive(Debug, Default)]
pub(crate) struct SerialGroupForField {
    groups: Vec<GroupId>,
}

impl SerialGroupForField {
    pub(crate) fn into_groups(self) -> Vec<GroupId> {
        self.groups
    }
}

impl<'s> GroupForField<'s> for SerialGroupForField {
    fn group_for_field(
        &mut self,
        context: &QueryPlanningContext<'s, '_>,
        groups: &mut FetchGroups<'s>,
        field: &Field<'s>,
    ) -> Result<GroupId, QueryPlannerError> {
        let service_name = owning_service(context, field)?;
        match self.groups.last() {
            Some(group) if groups[*group].service_name == service_name => Ok(*group),
            _ => {
                let group = groups.create(service_name, Path::empty(), vec![]);
                self.groups.push(group);
                Ok(group)
            }
        }
    }
}

/// Fields below a root field: stay in the parent group when it can resolve them, otherwise join
/// through the entity keys into a dependent group.
#[derive(Debug)]
pub(crate) struct SubfieldGroupForField {
    parent: GroupId,
}

impl SubfieldGroupForField {
    pub(crate) fn new(parent: GroupId) -> Self {
        SubfieldGroupForField { parent }
    }
}

impl<'s> GroupForField<'s> for SubfieldGroupForField {
    fn group_for_field(
        &mut self,
        context: &QueryPlanningContext<'s, '_>,
        groups: &mut FetchGroups<'s>,
        field: &Field<'s>,
    ) -> Result<GroupId, QueryPlannerError> {
        let parent = self.parent;
        let scope = &field.scope;
        let parent_type = scope.parent_type();
        let parent_service = groups[parent].service_name.clone();

        let is_value_type = context
            .schema
            .type_metadata(parent_type)
            .map(|metadata| metadata.is_value_type)
            .unwrap_or(false);

        let (base_service, owning_service) = if !parent_type.is_object() || is_value_type {
            (parent_service.clone(), parent_service.clone())
        } else {
            let base_service = context
                .get_base_service(parent_type)
                .ok_or_else(|| QueryPlannerError::MissingBaseService(parent_type.name.clone()))?;
            let owning_service = owning_service(context, field)?;
            (base_service.to_string(), owning_service.to_string())
        };

        if owning_service == base_service {
            if owning_service == parent_service
                || groups[parent]
                    .provided_fields
                    .iter()
                    .any(matches_field(field))
            {
                return Ok(parent);
            }

            // fall back to the owning service's keys when the parent service has none
            let mut key_fields = context.get_key_fields(scope, &parent_service, false)?;
            if key_fields.len() <= 1 {
                key_fields = context.get_key_fields(scope, &owning_service, false)?;
            }
            return Ok(groups.dependent_group_for_service(parent, &owning_service, key_fields));
        }

        // the field is an extension of the type, from another service than the base one
        let required_fields =
            context.get_required_fields(scope, field.field_def, &owning_service)?;

        let provided = &groups[parent].provided_fields;
        if required_fields
            .iter()
            .all(|required_field| provided.iter().any(matches_field(required_field)))
        {
            if owning_service == parent_service {
                return Ok(parent);
            }
            return Ok(groups.dependent_group_for_service(
                parent,
                &owning_service,
                required_fields,
            ));
        }

        // `__typename` alone doesn't identify an entity
        let key_fields = context.get_key_fields(scope, &parent_service, false)?;
        if key_fields.len() <= 1 {
            return Err(QueryPlannerError::MissingKeys {
                type_name: parent_type.name.clone(),
                service: base_service,
            });
        }

        if base_service == parent_service {
            return Ok(groups.dependent_group_for_service(
                parent,
                &owning_service,
                required_fields,
            ));
        }

        let base_group = groups.dependent_group_for_service(parent, &base_service, key_fields);
        Ok(groups.dependent_group_for_service(base_group, &owning_service, required_fields))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dependent_groups_are_created_once_per_service() {
        let mut groups = FetchGroups::default();
        let parent = groups.create("accounts", Path::from("me"), vec![]);
        let reviews = groups.dependent_group_for_service(parent, "reviews", vec![]);
        let products = groups.dependent_group_for_service(parent, "products", vec![]);
        assert_eq!(
            groups.dependent_group_for_service(parent, "reviews", vec![]),
            reviews
        );
        assert_eq!(groups[reviews].merge_at, Path::from("me"));
        assert_eq!(groups.dependent_groups(parent), vec![products, reviews]);
    }

    #[test]
    fn merging_collapses_same_service_and_path() {
        let mut groups = FetchGroups::default();
        let parent = groups.create("accounts", Path::empty(), vec![]);
        let existing = groups.dependent_group_for_service(parent, "reviews", vec![]);

        let sub_group = groups.create("accounts", Path::empty(), vec![]);
        let same = groups.dependent_group_for_service(sub_group, "reviews", vec![]);
        let other_path = groups.create("accounts", Path::from("me"), vec![]);
        let different = groups.dependent_group_for_service(other_path, "reviews", vec![]);
        groups.merge_dependent_groups(sub_group, other_path);

        groups.merge_dependent_groups(parent, sub_group);
        assert_eq!(groups.dependent_groups(parent), vec![existing, different]);
        assert_ne!(same, existing);
    }
}
