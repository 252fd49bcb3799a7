//! Logic for loading configuration in to an object model
use displaydoc::Display;
use query_planner::QueryPlanningOptions;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;
use typed_builder::TypedBuilder;

/// Configuration error.
#[derive(Debug, Error, Display)]
pub enum ConfigurationError {
    /// could not read configuration file: {0}
    Read(#[from] std::io::Error),

    /// could not deserialize configuration: {0}
    Deserialize(#[from] serde_yaml::Error),

    /// subgraph '{subgraph}' has an empty routing_url
    MissingRoutingUrl { subgraph: String },
}

/// The configuration for the gateway.
/// Maintains a mapping of subgraphs and the query planning options.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize, TypedBuilder)]
#[serde(deny_unknown_fields)]
pub struct Configuration {
    /// Mapping of name to subgraph that the gateway may contact.
    #[serde(default)]
    #[builder(default)]
    pub subgraphs: HashMap<String, Subgraph>,

    /// Options handed to the query planner.
    #[serde(default)]
    #[builder(default)]
    pub query_planning: QueryPlanningOptions,
}

/// A subgraph.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Subgraph {
    /// The url for the subgraph.
    pub routing_url: String,
}

impl Configuration {
    /// Parse and validate a YAML configuration.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigurationError> {
        let configuration: Configuration = serde_yaml::from_str(yaml)?;
        configuration.validate()?;
        Ok(configuration)
    }

    /// Read a YAML configuration file.
    #[tracing::instrument(level = "debug")]
    pub fn from_file(path: &Path) -> Result<Self, ConfigurationError> {
        let yaml = std::fs::read_to_string(path)?;
        let configuration = Self::from_yaml(&yaml)?;
        tracing::debug!(
            subgraphs = configuration.subgraphs.len(),
            "configuration loaded"
        );
        Ok(configuration)
    }

    fn validate(&self) -> Result<(), ConfigurationError> {
        match self
            .subgraphs
            .iter()
            .find(|(_, subgraph)| subgraph.routing_url.trim().is_empty())
        {
            Some((name, _)) => Err(ConfigurationError::MissingRoutingUrl {
                subgraph: name.to_string(),
            }),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use maplit::hashmap;

    use super::*;

    #[test]
    fn test_supergraph_config_serde() {
        let result = Configuration::from_yaml(include_str!("testdata/supergraph_config.yaml"));
        assert_eq!(
            result.unwrap(),
            Configuration {
                subgraphs: hashmap! {
                    "accounts".to_string() => Subgraph {
                        routing_url: "http://localhost:4001/graphql".into()
                    },
                    "reviews".to_string() => Subgraph {
                        routing_url: "http://localhost:4002/graphql".into()
                    },
                    "products".to_string() => Subgraph {
                        routing_url: "http://localhost:4003/graphql".into()
                    },
                    "inventory".to_string() => Subgraph {
                        routing_url: "http://localhost:4004/graphql".into()
                    },
                },
                query_planning: QueryPlanningOptions::builder()
                    .auto_fragmentization(true)
                    .build(),
            }
        )
    }

    #[test]
    fn query_planning_defaults() {
        let configuration = Configuration::from_yaml(
            "subgraphs:\n  accounts:\n    routing_url: http://localhost:4001/graphql\n",
        )
        .unwrap();
        assert_eq!(
            configuration.query_planning,
            QueryPlanningOptions::default()
        );
    }

    #[test]
    fn empty_routing_url() {
        let err = Configuration::from_yaml("subgraphs:\n  accounts:\n    routing_url: ''\n")
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "subgraph 'accounts' has an empty routing_url"
        );
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(matches!(
            Configuration::from_yaml("listen: 127.0.0.1:4000\n"),
            Err(ConfigurationError::Deserialize(_))
        ));
    }

    #[test]
    fn builder() {
        let configuration = Configuration::builder()
            .subgraphs(hashmap! {
                "accounts".to_string() => Subgraph {
                    routing_url: "http://localhost:4001/graphql".into()
                },
            })
            .build();
        assert_eq!(configuration.query_planning, QueryPlanningOptions::default());
        assert_eq!(configuration.subgraphs.len(), 1);
    }
}
