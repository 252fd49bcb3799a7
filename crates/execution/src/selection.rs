use crate::FetchError;
use json_ext::{Object, Value, ValueExt};
use query_planner::model::{Field, InlineFragment, Selection};
use query_planner::ComposedSchema;

/// Evaluate a `requires` selection against an entity that is already in the result tree.
///
/// The output is the representation sent to the service owning the rest of the entity.
pub(crate) fn execute_selection_set(
    content: &Object,
    selections: &[Selection],
    schema: &ComposedSchema,
) -> Result<Object, FetchError> {
    let mut output = Object::new();
    for selection in selections {
        match selection {
            Selection::Field(field) => {
                let value = select_field(content, field, schema)?;
                output.insert(response_name(field).to_string(), value);
            }
            Selection::InlineFragment(fragment) => {
                if let Some(value) = select_inline_fragment(content, fragment, schema)? {
                    let mut merged = Value::Object(std::mem::take(&mut output));
                    merged.deep_merge(Value::Object(value));
                    if let Value::Object(merged) = merged {
                        output = merged;
                    }
                }
            }
        }
    }
    Ok(output)
}

fn response_name(field: &Field) -> &str {
    field.alias.as_deref().unwrap_or(&field.name)
}

fn select_field(
    content: &Object,
    field: &Field,
    schema: &ComposedSchema,
) -> Result<Value, FetchError> {
    let name = response_name(field);
    let value = content
        .get(name)
        .ok_or_else(|| FetchError::ExecutionFieldNotFound {
            field: name.to_string(),
        })?;
    let selections = match &field.selections {
        Some(selections) if !selections.is_empty() => selections,
        _ => return Ok(value.clone()),
    };

    select_value(value, selections, schema)
}

fn select_value(
    value: &Value,
    selections: &[Selection],
    schema: &ComposedSchema,
) -> Result<Value, FetchError> {
    match value {
        Value::Object(child) => execute_selection_set(child, selections, schema).map(Value::Object),
        Value::Array(elements) => elements
            .iter()
            .map(|element| select_value(element, selections, schema))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Null => Ok(Value::Null),
        other => Err(FetchError::ExecutionInvalidContent {
            reason: format!("expected an object to select from, found {}", other),
        }),
    }
}

fn select_inline_fragment(
    content: &Object,
    fragment: &InlineFragment,
    schema: &ComposedSchema,
) -> Result<Option<Object>, FetchError> {
    let condition = match &fragment.type_condition {
        Some(condition) => condition,
        None => return Ok(None),
    };
    match content.get("__typename") {
        Some(Value::String(typename)) => {
            if does_type_condition_match(schema, condition, typename) {
                execute_selection_set(content, &fragment.selections, schema).map(Some)
            } else {
                Ok(None)
            }
        }
        None => Err(FetchError::ExecutionFieldNotFound {
            field: "__typename".to_string(),
        }),
        Some(other) => Err(FetchError::ExecutionInvalidContent {
            reason: format!("expected __typename to be a string, found {}", other),
        }),
    }
}

fn does_type_condition_match(schema: &ComposedSchema, condition: &str, typename: &str) -> bool {
    if condition == typename {
        return true;
    }
    match (schema.type_by_name(condition), schema.type_by_name(typename)) {
        (Some(condition), Some(runtime_type)) => {
            condition.is_abstract() && schema.is_sub_type(condition, runtime_type)
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use json_ext::json;

    const SCHEMA: &str = r#"
        type Query { me: User }
        type User { id: ID! job: Job }
        type Job { name: String }
        type Author { id: ID! job: Job }
        type Reviewer { id: ID! job: Job }
        union Person = Author | Reviewer
    "#;

    fn select(type_condition: &str, content: Value) -> Result<Object, FetchError> {
        let schema = ComposedSchema::parse(SCHEMA).unwrap();
        let stub = json!([
            {
                "kind": "InlineFragment",
                "typeCondition": "OtherStuffToIgnore",
                "selections": [],
            },
            {
                "kind": "InlineFragment",
                "typeCondition": type_condition,
                "selections": [
                    {
                        "kind": "Field",
                        "name": "__typename",
                    },
                    {
                        "kind": "Field",
                        "name": "id",
                    },
                    {
                        "kind": "Field",
                        "name": "job",
                        "selections": [
                            {
                                "kind": "Field",
                                "name": "name",
                            }
                        ],
                    }
                  ]
            },
        ]);
        let selection: Vec<Selection> = serde_json::from_value(stub).unwrap();
        execute_selection_set(content.as_object().unwrap(), &selection, &schema)
    }

    #[test]
    fn test_selection() {
        assert_eq!(
            Value::Object(
                select(
                    "User",
                    json!({"__typename": "User", "id":2, "name":"Bob", "job":{"name":"astronaut"}}),
                )
                .unwrap()
            ),
            json!({
                "__typename": "User",
                "id": 2,
                "job": {
                    "name": "astronaut"
                }
            }),
        );
    }

    #[test]
    fn test_selection_subtype() {
        assert_eq!(
            Value::Object(
                select(
                    "Person",
                    json!({"__typename": "Author", "id":2, "name":"Bob", "job":{"name":"astronaut"}}),
                )
                .unwrap()
            ),
            json!({
                "__typename": "Author",
                "id": 2,
                "job": {
                    "name": "astronaut"
                }
            }),
        );
    }

    #[test]
    fn test_selection_type_mismatch() {
        assert!(select(
            "Person",
            json!({"__typename": "User", "id":2, "job":{"name":"astronaut"}}),
        )
        .unwrap()
        .is_empty());
    }

    #[test]
    fn test_selection_missing_field() {
        assert!(matches!(
            select(
                "User",
                json!({"__typename": "User", "name":"Bob", "job":{"name":"astronaut"}}),
            )
            .unwrap_err(),
            FetchError::ExecutionFieldNotFound { field } if field == "id"
        ));
    }

    #[test]
    fn test_selection_lists() {
        let schema = ComposedSchema::parse(SCHEMA).unwrap();
        let selection: Vec<Selection> = serde_json::from_value(json!([
            { "kind": "Field", "name": "jobs", "selections": [{ "kind": "Field", "name": "name" }] },
            { "kind": "Field", "alias": "nick", "name": "nickname" },
        ]))
        .unwrap();
        let content = json!({
            "jobs": [{ "name": "pilot", "since": 1990 }, null],
            "nick": "ada",
        });
        assert_eq!(
            Value::Object(
                execute_selection_set(content.as_object().unwrap(), &selection, &schema).unwrap()
            ),
            json!({ "jobs": [{ "name": "pilot" }, null], "nick": "ada" })
        );
    }

    #[test]
    fn fragments_without_type_condition_are_skipped() {
        let schema = ComposedSchema::parse(SCHEMA).unwrap();
        let selection: Vec<Selection> = serde_json::from_value(json!([
            { "kind": "InlineFragment", "selections": [{ "kind": "Field", "name": "id" }] },
        ]))
        .unwrap();
        let content = json!({ "__typename": "User", "id": "1" });
        assert!(execute_selection_set(content.as_object().unwrap(), &selection, &schema)
            .unwrap()
            .is_empty());
    }
}
