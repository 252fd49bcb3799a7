use crate::model::QueryPlan;
use crate::{QueryPlanner, QueryPlannerError, QueryPlanningOptions};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

type CacheKey = (String, Option<String>, QueryPlanningOptions);

/// A query planner wrapper that caches results.
///
/// Plans are cached by query, operation name and options. Planning errors are cached too.
pub struct CachingQueryPlanner<T: QueryPlanner> {
    delegate: T,
    cached: Mutex<HashMap<CacheKey, Result<Arc<QueryPlan>, QueryPlannerError>>>,
}

impl<T: QueryPlanner> CachingQueryPlanner<T> {
    /// Creates a new query planner that caches the results of another [`QueryPlanner`].
    pub fn new(delegate: T) -> CachingQueryPlanner<T> {
        Self {
            delegate,
            cached: Default::default(),
        }
    }
}

impl<T: QueryPlanner> QueryPlanner for CachingQueryPlanner<T> {
    fn get(
        &self,
        query: String,
        operation: Option<String>,
        options: QueryPlanningOptions,
    ) -> Result<Arc<QueryPlan>, QueryPlannerError> {
        let key = (query, operation, options);
        if let Some(result) = self.cached.lock().get(&key) {
            tracing::trace!("query plan cache hit");
            return result.clone();
        }

        // planning runs unlocked; concurrent misses on one key may plan it more than once
        let (query, operation, options) = key.clone();
        let result = self.delegate.get(query, operation, options);
        self.cached
            .lock()
            .entry(key)
            .or_insert(result)
            .clone()
    }
}
