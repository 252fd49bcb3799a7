use crate::{FetchError, HttpDataSource, Request, Response};
use async_trait::async_trait;
use configuration::Configuration;
#[cfg(any(test, feature = "mocks"))]
use mockall::automock;
use query_planner::ComposedSchema;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A data source answers the operations the executor sends to one service.
///
/// It may be a remote subgraph reached over HTTP or a schema executed in process.
#[cfg_attr(any(test, feature = "mocks"), automock)]
#[async_trait]
pub trait DataSource: Send + Sync + fmt::Debug {
    /// Run one operation against the service.
    async fn process(&self, request: Request) -> Result<Response, FetchError>;
}

/// Maintains a map of services to data sources.
#[derive(Clone, Default)]
pub struct ServiceRegistry {
    services: HashMap<String, Arc<dyn DataSource>>,
}

impl fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut debug = f.debug_tuple("ServiceRegistry");
        let mut names = self.services.keys().collect::<Vec<_>>();
        names.sort();
        for name in names {
            debug.field(name);
        }
        debug.finish()
    }
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Default::default()
    }

    /// Builds a registry of [`HttpDataSource`]s from the configured subgraphs.
    pub fn from_configuration(configuration: &Configuration) -> Self {
        configuration
            .subgraphs
            .iter()
            .map(|(name, subgraph)| {
                (
                    name.to_string(),
                    Arc::new(HttpDataSource::new(name, &subgraph.routing_url)) as Arc<dyn DataSource>,
                )
            })
            .collect()
    }

    /// Builds a registry of [`HttpDataSource`]s from the graphs declared by a supergraph.
    pub fn from_schema(schema: &ComposedSchema) -> Self {
        schema
            .graphs()
            .map(|graph| {
                (
                    graph.name.to_string(),
                    Arc::new(HttpDataSource::new(&graph.name, &graph.url)) as Arc<dyn DataSource>,
                )
            })
            .collect()
    }

    pub fn insert(&mut self, name: impl Into<String>, data_source: impl DataSource + 'static) {
        self.services.insert(name.into(), Arc::new(data_source));
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    pub fn contains(&self, name: impl AsRef<str>) -> bool {
        self.services.contains_key(name.as_ref())
    }

    pub fn get(&self, name: impl AsRef<str>) -> Option<&Arc<dyn DataSource>> {
        self.services.get(name.as_ref())
    }
}

impl FromIterator<(String, Arc<dyn DataSource>)> for ServiceRegistry {
    fn from_iter<I: IntoIterator<Item = (String, Arc<dyn DataSource>)>>(iter: I) -> Self {
        ServiceRegistry {
            services: iter.into_iter().collect(),
        }
    }
}
