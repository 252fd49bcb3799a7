//! This is the object model for a QueryPlan.
//! It can be used by an executor to create a response stream.
//!
//! QueryPlans are a set of operations that describe how a federated query is processed.

use json_ext::Path;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
/// The root query plan container
pub struct QueryPlan {
    /// The hierarchical nodes that make up the query plan
    pub node: Option<PlanNode>,
}

impl QueryPlan {
    /// Every service the plan fetches from, in name order.
    pub fn service_usage(&self) -> BTreeSet<&str> {
        let mut services = BTreeSet::new();
        if let Some(node) = &self.node {
            node.collect_services(&mut services);
        }
        services
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", tag = "kind")]
/// Query plans are composed of a set of nodes.
pub enum PlanNode {
    /// These nodes must be executed in order.
    Sequence {
        /// The plan nodes that make up the sequence execution.
        nodes: Vec<PlanNode>,
    },

    /// These nodes may be executed in parallel.
    Parallel {
        /// The plan nodes that make up the parallel execution.
        nodes: Vec<PlanNode>,
    },

    /// Fetch some data from a subgraph.
    Fetch(FetchNode),

    /// Merge the current resultset with the response.
    Flatten(FlattenNode),
}

impl PlanNode {
    fn collect_services<'a>(&'a self, services: &mut BTreeSet<&'a str>) {
        match self {
            PlanNode::Sequence { nodes } | PlanNode::Parallel { nodes } => {
                for node in nodes {
                    node.collect_services(services);
                }
            }
            PlanNode::Fetch(fetch) => {
                services.insert(fetch.service_name.as_str());
            }
            PlanNode::Flatten(flatten) => flatten.node.collect_services(services),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// The kind of a GraphQL operation.
pub enum OperationKind {
    #[default]
    Query,
    Mutation,
    Subscription,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// A fetch node.
pub struct FetchNode {
    /// The name of the service or subgraph that the fetch is querying.
    pub service_name: String,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    /// The data that is required for the subgraph fetch.
    pub requires: Option<SelectionSet>,

    /// The variables that are used for the subgraph fetch.
    pub variable_usages: Vec<String>,

    /// The GraphQL subquery that is used for the fetch.
    pub operation: GraphQLQuery,

    #[serde(default)]
    /// The kind of the subquery.
    pub operation_kind: OperationKind,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// A flatten node.
pub struct FlattenNode {
    /// The path when result should be merged.
    pub path: Path,

    /// The child execution plan.
    pub node: Box<PlanNode>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", tag = "kind")]
/// A selection that is part of a fetch.
/// Selections are used to propagate data to subgraph fetches.
pub enum Selection {
    /// A field selection.
    Field(Field),

    /// An inline fragment selection.
    InlineFragment(InlineFragment),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// The field that is used
pub struct Field {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    /// An optional alias for the field.
    pub alias: Option<String>,

    /// The name of the field.
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    /// The selections for the field.
    pub selections: Option<SelectionSet>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// An inline fragment.
pub struct InlineFragment {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    /// The required fragment type.
    pub type_condition: Option<String>,

    /// The selections from the fragment.
    pub selections: SelectionSet,
}

/// A selection set is a list of data required for a fetch.
pub type SelectionSet = Vec<Selection>;

/// A string representing a graphql query.
pub type GraphQLQuery = String;

#[cfg(test)]
mod tests {
    use super::*;

    const TYPENAME_FIELD_NAME: &str = "__typename";

    fn field(name: &str) -> Selection {
        Selection::Field(Field {
            alias: None,
            name: name.to_owned(),
            selections: None,
        })
    }

    fn query_plan() -> QueryPlan {
        QueryPlan {
            node: Some(PlanNode::Sequence {
                nodes: vec![
                    PlanNode::Fetch(FetchNode {
                        service_name: "product".to_owned(),
                        variable_usages: vec![],
                        requires: None,
                        operation: "{topProducts{__typename ...on Book{__typename isbn}}}".to_owned(),
                        operation_kind: OperationKind::Query,
                    }),
                    PlanNode::Parallel {
                        nodes: vec![PlanNode::Flatten(FlattenNode {
                            path: Path::from("topProducts.@"),
                            node: Box::new(PlanNode::Fetch(FetchNode {
                                service_name: "books".to_owned(),
                                variable_usages: vec!["locale".to_owned()],
                                requires: Some(vec![Selection::InlineFragment(InlineFragment {
                                    type_condition: Some("Book".to_owned()),
                                    selections: vec![field(TYPENAME_FIELD_NAME), field("isbn")],
                                })]),
                                operation: "query($representations:[_Any!]!$locale:String){_entities(representations:$representations){...on Book{title(locale:$locale)}}}".to_owned(),
                                operation_kind: OperationKind::Query,
                            })),
                        })],
                    },
                ],
            }),
        }
    }

    #[test]
    fn query_plan_into_json() {
        insta::assert_json_snapshot!(query_plan(), @r###"
        {
          "kind": "QueryPlan",
          "node": {
            "kind": "Sequence",
            "nodes": [
              {
                "kind": "Fetch",
                "serviceName": "product",
                "variableUsages": [],
                "operation": "{topProducts{__typename ...on Book{__typename isbn}}}",
                "operationKind": "query"
              },
              {
                "kind": "Parallel",
                "nodes": [
                  {
                    "kind": "Flatten",
                    "path": [
                      "topProducts",
                      "@"
                    ],
                    "node": {
                      "kind": "Fetch",
                      "serviceName": "books",
                      "requires": [
                        {
                          "kind": "InlineFragment",
                          "typeCondition": "Book",
                          "selections": [
                            {
                              "kind": "Field",
                              "name": "__typename"
                            },
                            {
                              "kind": "Field",
                              "name": "isbn"
                            }
                          ]
                        }
                      ],
                      "variableUsages": [
                        "locale"
                      ],
                      "operation": "query($representations:[_Any!]!$locale:String){_entities(representations:$representations){...on Book{title(locale:$locale)}}}",
                      "operationKind": "query"
                    }
                  }
                ]
              }
            ]
          }
        }
        "###);
    }

    #[test]
    fn query_plan_from_json() {
        let plan = query_plan();
        let json = serde_json::to_string(&plan).unwrap();
        assert_eq!(serde_json::from_str::<QueryPlan>(&json).unwrap(), plan);
    }

    #[test]
    fn operation_kind_defaults_to_query() {
        let node: PlanNode = serde_json::from_value(serde_json::json!({
            "kind": "Fetch",
            "serviceName": "accounts",
            "variableUsages": [],
            "operation": "{me{id}}"
        }))
        .unwrap();
        assert_eq!(
            node,
            PlanNode::Fetch(FetchNode {
                service_name: "accounts".to_owned(),
                requires: None,
                variable_usages: vec![],
                operation: "{me{id}}".to_owned(),
                operation_kind: OperationKind::Query,
            })
        );
    }

    #[test]
    fn service_usage() {
        assert_eq!(
            query_plan().service_usage().into_iter().collect::<Vec<_>>(),
            vec!["books", "product"]
        );
        assert!(QueryPlan::default().service_usage().is_empty());
    }
}
