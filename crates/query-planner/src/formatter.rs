//! Human readable rendering of query plans.
//!
//! ```text
//! QueryPlan {
//!   Sequence {
//!     Fetch(service: "accounts") {
//!       {
//!         me {
//!           __typename
//!           id
//!         }
//!       }
//!     },
//!     Flatten(path: "me") {
//!       Fetch(service: "reviews") {
//!         {
//!           ... on User {
//!             __typename
//!             id
//!           }
//!         } =>
//!         {
//!           ... on User {
//!             numberOfReviews
//!           }
//!         }
//!       },
//!     },
//!   },
//! }
//! ```

use crate::helpers::{
    Definition, OperationDefinition, Selection as SelectionNode, SelectionSet, ENTITIES_FIELD_NAME,
};
use crate::model::{FetchNode, PlanNode, QueryPlan, Selection};
use std::fmt;

const INDENT: &str = "  ";

impl fmt::Display for QueryPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut printer = Printer { out: f, indent: 0 };
        printer.line("QueryPlan {")?;
        if let Some(node) = &self.node {
            printer.indent += 1;
            printer.node(node, ",")?;
            printer.indent -= 1;
        }
        printer.out.write_str("}")
    }
}

impl fmt::Display for PlanNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Printer { out: f, indent: 0 }.node(self, "")
    }
}

struct Printer<'a, 'b> {
    out: &'a mut fmt::Formatter<'b>,
    indent: usize,
}

impl Printer<'_, '_> {
    fn line(&mut self, text: impl fmt::Display) -> fmt::Result {
        writeln!(self.out, "{}{}", INDENT.repeat(self.indent), text)
    }

    fn node(&mut self, node: &PlanNode, suffix: &str) -> fmt::Result {
        match node {
            PlanNode::Sequence { nodes } => self.block("Sequence {", nodes, suffix),
            PlanNode::Parallel { nodes } => self.block("Parallel {", nodes, suffix),
            PlanNode::Flatten(flatten) => {
                self.line(format_args!("Flatten(path: \"{}\") {{", flatten.path))?;
                self.indent += 1;
                self.node(&flatten.node, ",")?;
                self.indent -= 1;
                self.line(format_args!("}}{}", suffix))
            }
            PlanNode::Fetch(fetch) => {
                self.line(format_args!("Fetch(service: \"{}\") {{", fetch.service_name))?;
                self.indent += 1;
                if let Some(requires) = fetch.requires.as_ref().filter(|r| !r.is_empty()) {
                    self.selection_set(requires, " =>")?;
                }
                self.operation(fetch)?;
                self.indent -= 1;
                self.line(format_args!("}}{}", suffix))
            }
        }
    }

    fn block(&mut self, header: &str, nodes: &[PlanNode], suffix: &str) -> fmt::Result {
        self.line(header)?;
        self.indent += 1;
        for node in nodes {
            self.node(node, ",")?;
        }
        self.indent -= 1;
        self.line(format_args!("}}{}", suffix))
    }

    fn selection_set(&mut self, selections: &[Selection], suffix: &str) -> fmt::Result {
        self.line("{")?;
        self.indent += 1;
        for selection in selections {
            self.selection_set_item(selection)?;
        }
        self.indent -= 1;
        self.line(format_args!("}}{}", suffix))
    }

    fn nested_selections(&mut self, selections: &[Selection]) -> fmt::Result {
        self.indent += 1;
        for selection in selections {
            self.selection_set_item(selection)?;
        }
        self.indent -= 1;
        self.line("}")
    }

    fn selection_set_item(&mut self, selection: &Selection) -> fmt::Result {
        match selection {
            Selection::Field(field) => {
                let name = match &field.alias {
                    Some(alias) => format!("{}: {}", alias, field.name),
                    None => field.name.clone(),
                };
                match field.selections.as_ref().filter(|s| !s.is_empty()) {
                    Some(selections) => {
                        self.line(format_args!("{} {{", name))?;
                        self.nested_selections(selections)
                    }
                    None => self.line(name),
                }
            }
            Selection::InlineFragment(fragment) => {
                match &fragment.type_condition {
                    Some(type_condition) => self.line(format_args!("... on {} {{", type_condition))?,
                    None => self.line("... {")?,
                }
                self.nested_selections(&fragment.selections)
            }
        }
    }

    /// The pretty printed operation. Entity fetches only show what is selected on the entities.
    fn operation(&mut self, fetch: &FetchNode) -> fmt::Result {
        let document = match graphql_parser::parse_query::<String>(&fetch.operation) {
            Ok(document) => document.into_static(),
            Err(_) => return self.line(&fetch.operation),
        };

        for definition in &document.definitions {
            let text = match definition {
                Definition::Operation(operation) => match entities_selection_set(operation) {
                    Some(selection_set) => selection_set.to_string(),
                    None => operation.to_string(),
                },
                Definition::Fragment(fragment) => fragment.to_string(),
            };
            for line in text.lines().filter(|line| !line.trim().is_empty()) {
                self.line(line)?;
            }
        }
        Ok(())
    }
}

fn entities_selection_set(operation: &OperationDefinition) -> Option<&SelectionSet> {
    let selection_set = match operation {
        OperationDefinition::Query(query) => &query.selection_set,
        _ => return None,
    };
    match selection_set.items.first() {
        Some(SelectionNode::Field(field)) if field.name == ENTITIES_FIELD_NAME => {
            Some(&field.selection_set)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Field, FlattenNode, InlineFragment, OperationKind};
    use json_ext::Path;

    fn normalize(text: &str) -> String {
        text.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    fn field(name: &str) -> Selection {
        Selection::Field(Field {
            alias: None,
            name: name.to_string(),
            selections: None,
        })
    }

    fn fetch(service_name: &str, operation: &str, requires: Option<Vec<Selection>>) -> PlanNode {
        PlanNode::Fetch(FetchNode {
            service_name: service_name.to_string(),
            requires,
            variable_usages: vec![],
            operation: operation.to_string(),
            operation_kind: OperationKind::Query,
        })
    }

    #[test]
    fn empty_plan() {
        assert_eq!(QueryPlan::default().to_string(), "QueryPlan {\n}");
    }

    #[test]
    fn sequence_with_flatten() {
        let plan = QueryPlan {
            node: Some(PlanNode::Sequence {
                nodes: vec![
                    fetch("accounts", "{me{__typename id}}", None),
                    PlanNode::Flatten(FlattenNode {
                        path: Path::from("me"),
                        node: Box::new(fetch(
                            "reviews",
                            "query($representations:[_Any!]!){_entities(representations:$representations){...on User{numberOfReviews}}}",
                            Some(vec![Selection::InlineFragment(InlineFragment {
                                type_condition: Some("User".to_string()),
                                selections: vec![field("__typename"), field("id")],
                            })]),
                        )),
                    }),
                ],
            }),
        };

        assert_eq!(
            plan.to_string(),
            r#"QueryPlan {
  Sequence {
    Fetch(service: "accounts") {
      {
        me {
          __typename
          id
        }
      }
    },
    Flatten(path: "me") {
      Fetch(service: "reviews") {
        {
          ... on User {
            __typename
            id
          }
        } =>
        {
          ... on User {
            numberOfReviews
          }
        }
      },
    },
  },
}"#
        );
    }

    #[test]
    fn flatten_path_and_fragments() {
        let plan = QueryPlan {
            node: Some(PlanNode::Parallel {
                nodes: vec![
                    PlanNode::Flatten(FlattenNode {
                        path: Path::from("me.@.product"),
                        node: Box::new(fetch("users", "{me{id}}", None)),
                    }),
                    fetch(
                        "products",
                        "query($first:Int){topProducts(first:$first){...__QueryPlanFragment_0__}}fragment __QueryPlanFragment_0__ on Product{upc name price}",
                        None,
                    ),
                ],
            }),
        };

        assert_eq!(
            normalize(&plan.to_string()),
            normalize(
                r#"QueryPlan {
                  Parallel {
                    Flatten(path: "me.@.product") {
                      Fetch(service: "users") {
                        { me { id } }
                      },
                    },
                    Fetch(service: "products") {
                      query($first: Int) {
                        topProducts(first: $first) { ...__QueryPlanFragment_0__ }
                      }
                      fragment __QueryPlanFragment_0__ on Product { upc name price }
                    },
                  },
                }"#
            )
        );
    }
}
