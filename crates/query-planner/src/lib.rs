//! Plans federated GraphQL operations.
//!
//! A [`ComposedSchema`] records which service owns every type and field of the supergraph.
//! Given an operation, the planner produces a [`model::QueryPlan`]: the tree of fetches to send
//! to those services and where to merge their results.

#[cfg(test)]
use mockall::{automock, predicate::*};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use typed_builder::TypedBuilder;

mod builder;
/// A caching query planner decorator
pub mod caching;
mod context;
mod error;
mod field_set;
mod formatter;
mod groups;
mod helpers;
/// The query plan model
pub mod model;
/// The composed supergraph schema
pub mod schema;
mod scope;

pub use caching::CachingQueryPlanner;
pub use error::QueryPlannerError;
pub use schema::ComposedSchema;

/// Query planning options.
#[derive(
    Clone, Copy, Debug, Default, Eq, Hash, PartialEq, Serialize, Deserialize, TypedBuilder,
)]
#[serde(deny_unknown_fields)]
pub struct QueryPlanningOptions {
    /// Replace sub-selections of more than two fields with named fragments, to shrink the
    /// operations sent to services.
    #[serde(default)]
    #[builder(default)]
    pub auto_fragmentization: bool,
}

/// QueryPlanner can be used to plan queries.
/// Implementations may cache query plans.
#[cfg_attr(test, automock)]
pub trait QueryPlanner: Send + Sync {
    /// Returns a query plan given the query, operation and options.
    /// Implementations may cache query plans.
    #[must_use = "query plan result must be used"]
    fn get(
        &self,
        query: String,
        operation: Option<String>,
        options: QueryPlanningOptions,
    ) -> Result<Arc<model::QueryPlan>, QueryPlannerError>;
}

/// Plans operations against a composed schema.
#[derive(Clone, Debug)]
pub struct FederatedQueryPlanner {
    schema: Arc<ComposedSchema>,
}

impl FederatedQueryPlanner {
    pub fn new(schema: Arc<ComposedSchema>) -> Self {
        FederatedQueryPlanner { schema }
    }

    pub fn schema(&self) -> &Arc<ComposedSchema> {
        &self.schema
    }

    /// Plan the operation named `operation_name` of `query`.
    ///
    /// `operation_name` may be omitted when the query holds a single operation.
    #[tracing::instrument(skip(self, query), level = "debug")]
    pub fn plan(
        &self,
        query: &str,
        operation_name: Option<&str>,
        options: &QueryPlanningOptions,
    ) -> Result<model::QueryPlan, QueryPlannerError> {
        let document = graphql_parser::parse_query::<String>(query)
            .map_err(|err| QueryPlannerError::QueryParse(err.to_string()))?
            .into_static();
        let plan = builder::build_query_plan(&self.schema, &document, operation_name, options)?;
        tracing::debug!("query plan:\n{}", plan);
        Ok(plan)
    }
}

impl QueryPlanner for FederatedQueryPlanner {
    fn get(
        &self,
        query: String,
        operation: Option<String>,
        options: QueryPlanningOptions,
    ) -> Result<Arc<model::QueryPlan>, QueryPlannerError> {
        self.plan(&query, operation.as_deref(), &options).map(Arc::new)
    }
}
