use crate::selection::execute_selection_set;
use crate::{Error, FetchError, Request, Response, ServiceRegistry};
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::prelude::*;
use json_ext::{Object, Path, PathElement, Value, ValueExt};
use query_planner::model::{FetchNode, FlattenNode, PlanNode, QueryPlan};
use query_planner::ComposedSchema;
use std::borrow::Cow;
use tokio::time::Instant;
use tracing::Instrument;

const REPRESENTATIONS_VARIABLE: &str = "representations";
const ENTITIES_FIELD: &str = "_entities";

/// Runs a [`QueryPlan`] against the services of a [`ServiceRegistry`].
#[async_trait]
pub trait QueryPlanExt {
    /// Validate the entire plan for services used.
    fn validate(&self, service_registry: &ServiceRegistry) -> Result<(), Response>;

    /// Execute the plan and return a [`Response`] whose data is the merged result tree.
    async fn execute(
        &self,
        request: &Request,
        service_registry: &ServiceRegistry,
        schema: &ComposedSchema,
    ) -> Response {
        self.execute_with_deadline(request, service_registry, schema, None)
            .await
    }

    /// Execute the plan, giving up on fetches still in flight once `deadline` is reached.
    ///
    /// Data merged before the deadline is kept.
    async fn execute_with_deadline(
        &self,
        request: &Request,
        service_registry: &ServiceRegistry,
        schema: &ComposedSchema,
        deadline: Option<Instant>,
    ) -> Response;
}

#[async_trait]
impl QueryPlanExt for QueryPlan {
    #[tracing::instrument(skip_all, level = "debug", name = "validate")]
    fn validate(&self, service_registry: &ServiceRegistry) -> Result<(), Response> {
        let early_errors = self
            .service_usage()
            .into_iter()
            .filter(|service| !service_registry.contains(service))
            .map(|service| {
                FetchError::ValidationUnknownServiceError {
                    service: service.to_string(),
                }
                .to_graphql_error(None)
            })
            .collect::<Vec<_>>();

        if !early_errors.is_empty() {
            Err(Response::builder().errors(early_errors).build())
        } else {
            Ok(())
        }
    }

    async fn execute_with_deadline(
        &self,
        request: &Request,
        service_registry: &ServiceRegistry,
        schema: &ComposedSchema,
        deadline: Option<Instant>,
    ) -> Response {
        if let Err(response) = self.validate(service_registry) {
            return response;
        }

        let root = Value::Object(Object::new());
        let node = match &self.node {
            Some(node) => node,
            None => return Response::builder().data(root).build(),
        };

        let parameters = ExecutionParameters {
            request,
            service_registry,
            schema,
            deadline,
        };
        let (merges, mut errors) = execute_recursively(node, &parameters, &Path::empty(), &root)
            .instrument(tracing::info_span!("execution"))
            .await;

        let mut data = root;
        for (path, value) in merges {
            if let Err(err) = merge_at(&mut data, &path, value) {
                errors.push(err.to_graphql_error(Some(path)));
            }
        }

        Response::builder().data(data).errors(errors).build()
    }
}

/// Everything a node needs besides the tree it runs against.
struct ExecutionParameters<'a> {
    request: &'a Request,
    service_registry: &'a ServiceRegistry,
    schema: &'a ComposedSchema,
    deadline: Option<Instant>,
}

impl ExecutionParameters<'_> {
    fn deadline_elapsed(&self) -> bool {
        self.deadline
            .map(|deadline| Instant::now() >= deadline)
            .unwrap_or(false)
    }
}

/// A value to deep merge at a concrete path of the result tree.
type Merge = (Path, Value);

/// Run `node` against `parent_value` and return what the node merges into the tree, in plan
/// order, along with the errors the node produced.
///
/// `parent_value` is never written to: siblings of a parallel node all read the same tree and
/// their merges are applied once every sibling is done.
fn execute_recursively<'a>(
    node: &'a PlanNode,
    parameters: &'a ExecutionParameters<'a>,
    current_dir: &'a Path,
    parent_value: &'a Value,
) -> BoxFuture<'a, (Vec<Merge>, Vec<Error>)> {
    Box::pin(async move {
        tracing::trace!("executing plan:\n{}", node);
        let mut merges = Vec::new();
        let mut errors = Vec::new();

        match node {
            PlanNode::Sequence { nodes } => {
                // later children read what the earlier ones merged
                let mut value = Cow::Borrowed(parent_value);
                let span = tracing::info_span!("sequence");
                for (index, node) in nodes.iter().enumerate() {
                    if index > 0 && parameters.deadline_elapsed() {
                        tracing::debug!(
                            skipped = nodes.len() - index,
                            "deadline elapsed, sequence stopped"
                        );
                        break;
                    }
                    let (m, err) = execute_recursively(node, parameters, current_dir, &*value)
                        .instrument(span.clone())
                        .await;
                    if index + 1 < nodes.len() {
                        for (path, merged) in &m {
                            // reported once the whole plan is merged
                            if let Err(err) = merge_at(value.to_mut(), path, merged.clone()) {
                                tracing::debug!("{} at {}", err, path);
                            }
                        }
                    }
                    merges.extend(m);
                    errors.extend(err.into_iter());
                }
            }
            PlanNode::Parallel { nodes } => {
                let span = tracing::info_span!("parallel");
                let mut stream: stream::FuturesUnordered<_> = nodes
                    .iter()
                    .enumerate()
                    .map(|(index, node)| {
                        execute_recursively(node, parameters, current_dir, parent_value)
                            .map(move |result| (index, result))
                            .instrument(span.clone())
                    })
                    .collect();

                let mut results: Vec<_> = nodes.iter().map(|_| None).collect();
                while let Some((index, result)) = stream.next().await {
                    results[index] = Some(result);
                }
                for (m, err) in results.into_iter().flatten() {
                    merges.extend(m);
                    errors.extend(err.into_iter());
                }
            }
            PlanNode::Flatten(FlattenNode { path, node }) => {
                // this is the only node that actually changes the "current dir"
                let current_dir = current_dir.join(path);
                let (m, err) = execute_recursively(node, parameters, &current_dir, parent_value)
                    .instrument(tracing::trace_span!("flatten", path = %current_dir))
                    .await;

                merges = m;
                errors = err;
            }
            PlanNode::Fetch(fetch_node) => {
                match fetch(fetch_node, parameters, current_dir, parent_value, &mut errors)
                    .instrument(tracing::info_span!(
                        "fetch",
                        service = fetch_node.service_name.as_str()
                    ))
                    .await
                {
                    Ok(m) => {
                        merges = m;
                    }
                    Err(err) => {
                        failfast_error!("Fetch error: {}", err);
                        errors.push(err.to_graphql_error(Some(current_dir.to_owned())));
                    }
                }
            }
        }

        (merges, errors)
    })
}

/// The entities a fetch applies to, with their concrete paths in the tree.
///
/// A list found at the end of the path contributes each of its elements.
fn select_entities<'a>(data: &'a Value, current_dir: &Path) -> Vec<(Path, &'a Value)> {
    let mut entities = Vec::new();
    data.select_values_and_paths(current_dir, |path, value| match value {
        Value::Array(elements) => {
            for (index, element) in elements.iter().enumerate() {
                let mut path = path.clone();
                path.push(PathElement::Index(index));
                entities.push((path, element));
            }
        }
        _ => entities.push((path, value)),
    });
    entities
}

/// Fetch the node's operation and return where the response goes in `data`.
///
/// Errors reported by the service are appended to `errors`; the returned error is for failures
/// that prevent merging anything.
async fn fetch(
    fetch_node: &FetchNode,
    parameters: &ExecutionParameters<'_>,
    current_dir: &Path,
    data: &Value,
    errors: &mut Vec<Error>,
) -> Result<Vec<Merge>, FetchError> {
    let FetchNode {
        service_name,
        requires,
        variable_usages,
        operation,
        ..
    } = fetch_node;

    let service = parameters
        .service_registry
        .get(service_name)
        .ok_or_else(|| FetchError::UnknownService {
            service: service_name.to_string(),
        })?;

    let entities = select_entities(data, current_dir);
    if entities.is_empty() {
        return Ok(Vec::new());
    }

    let mut variables = parameters.request.variables_for(variable_usages);
    let requires = requires.as_deref().unwrap_or_default();

    if requires.is_empty() {
        let received = match send(service, parameters, fetch_node, current_dir, variables, errors)
            .await?
        {
            Some(received) => received,
            None => return Ok(Vec::new()),
        };

        return Ok(entities
            .into_iter()
            .filter(|(_, entity)| entity.is_object())
            .map(|(path, _)| (path, received.clone()))
            .collect());
    }

    let mut representations = Vec::with_capacity(entities.len());
    let mut representation_paths = Vec::with_capacity(entities.len());
    for (path, entity) in entities {
        let entity = match entity {
            Value::Null => continue,
            Value::Object(entity) => entity,
            other => {
                return Err(FetchError::ExecutionInvalidContent {
                    reason: format!("unexpected entity {} at {}", other, path),
                })
            }
        };
        let representation = execute_selection_set(entity, requires, parameters.schema)?;
        if matches!(representation.get("__typename"), Some(typename) if !typename.is_null()) {
            representations.push(Value::Object(representation));
            representation_paths.push(path);
        }
    }

    // No entity matched the type conditions of the requires.
    if representations.is_empty() {
        return Ok(Vec::new());
    }

    if variables.contains_key(REPRESENTATIONS_VARIABLE) {
        return Err(FetchError::ReservedRepresentationsVariable);
    }
    let expected = representations.len();
    variables.insert(
        REPRESENTATIONS_VARIABLE.to_string(),
        Value::Array(representations),
    );

    tracing::trace!(operation = operation.as_str(), "fetching {} entities", expected);
    let received = match send(service, parameters, fetch_node, current_dir, variables, errors)
        .await?
    {
        Some(received) => received,
        None => return Ok(Vec::new()),
    };

    let received_entities = match received {
        Value::Object(mut received) => match received.remove(ENTITIES_FIELD) {
            Some(Value::Array(received_entities)) => received_entities,
            _ => return Err(FetchError::MissingEntities),
        },
        _ => return Err(FetchError::MissingEntities),
    };
    if received_entities.len() != expected {
        return Err(FetchError::EntitiesLengthMismatch { expected });
    }

    Ok(representation_paths
        .into_iter()
        .zip(received_entities)
        .collect())
}

/// Send the operation and attribute the errors the service reports.
///
/// Returns the response data, or `None` when the service sent none.
async fn send(
    service: &std::sync::Arc<dyn crate::DataSource>,
    parameters: &ExecutionParameters<'_>,
    fetch_node: &FetchNode,
    current_dir: &Path,
    variables: Object,
    errors: &mut Vec<Error>,
) -> Result<Option<Value>, FetchError> {
    let service_name = &fetch_node.service_name;
    let request = Request::builder()
        .query(fetch_node.operation.as_str())
        .variables(variables)
        .build();

    let response = match parameters.deadline {
        Some(deadline) => {
            if parameters.deadline_elapsed() {
                return Err(FetchError::DeadlineExceeded {
                    service: service_name.to_string(),
                });
            }
            tokio::time::timeout_at(deadline, service.process(request))
                .await
                .map_err(|_| FetchError::DeadlineExceeded {
                    service: service_name.to_string(),
                })??
        }
        None => service.process(request).await?,
    };

    errors.extend(
        response
            .errors
            .into_iter()
            .map(|error| Error::from_downstream(error, service_name, current_dir)),
    );

    match response.data {
        Value::Null => Ok(None),
        data => Ok(Some(data)),
    }
}

/// Deep merge `merged` into the value found at `path`.
fn merge_at(value: &mut Value, path: &Path, merged: Value) -> Result<(), FetchError> {
    value
        .get_path_mut(path)
        .map_err(|err| FetchError::ExecutionPathNotFound {
            reason: format!("{} at {}", err, path),
        })?
        .deep_merge(merged);
    Ok(())
}
