use displaydoc::Display;
use json_ext::{Object, Path, Value};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const DOWNSTREAM_SERVICE_ERROR: &str = "DOWNSTREAM_SERVICE_ERROR";

/// Error types for execution.
///
/// Note that these are not actually returned to the client, but are instead converted to JSON for
/// [`struct@Error`].
#[derive(Error, Display, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
#[ignore_extra_doc_attributes]
pub enum FetchError {
    /// query references unknown service '{service}'
    ValidationUnknownServiceError {
        /// The service that was unknown.
        service: String,
    },

    /// couldn't find service with name "{service}"
    UnknownService {
        /// The service missing from the registry.
        service: String,
    },

    /// variables cannot contain key "representations"
    ReservedRepresentationsVariable,

    /// expected "data._entities" in response to be an array
    MissingEntities,

    /// expected "data._entities" to contain {expected} elements
    EntitiesLengthMismatch {
        /// Number of representations sent.
        expected: usize,
    },

    /// field "{field}" was not found in response
    ExecutionFieldNotFound {
        /// The field that is not found.
        field: String,
    },

    /// invalid content: {reason}
    ExecutionInvalidContent { reason: String },

    /// could not find path: {reason}
    ExecutionPathNotFound { reason: String },

    /// HTTP fetch failed from '{service}': {reason}
    ///
    /// Note that this relates to a transport error and not a GraphQL error.
    SubrequestHttpError {
        /// The service failed.
        service: String,

        /// The reason the fetch failed.
        reason: String,
    },

    /// service '{service}' response was malformed: {reason}
    SubrequestMalformedResponse {
        /// The service that responded with the malformed response.
        service: String,

        /// The reason the deserialization failed.
        reason: String,
    },

    /// deadline exceeded while fetching from service '{service}'
    DeadlineExceeded {
        /// The service that was being fetched.
        service: String,
    },
}

impl FetchError {
    /// Convert the fetch error to a GraphQL error.
    pub fn to_graphql_error(&self, path: Option<Path>) -> Error {
        let extensions = match serde_json::to_value(self) {
            Ok(Value::Object(extensions)) => extensions,
            _ => Object::new(),
        };
        Error {
            message: self.to_string(),
            locations: Default::default(),
            path,
            extensions,
        }
    }
}

/// Any error.
#[derive(Error, Clone, Debug, Eq, PartialEq, Serialize, Deserialize, Default)]
#[error("{message}")]
#[serde(rename_all = "camelCase")]
pub struct Error {
    /// The error message.
    pub message: String,

    /// The locations of the error from the originating request.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub locations: Vec<Location>,

    /// The path of the error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Path>,

    /// The optional graphql extensions.
    #[serde(default, skip_serializing_if = "Object::is_empty")]
    pub extensions: Object,
}

impl Error {
    /// Attribute an error reported by a subgraph to the service and to the merge path it was
    /// fetched for.
    pub fn from_downstream(error: Error, service: &str, path: &Path) -> Error {
        let message = if error.message.is_empty() {
            format!("error while fetching subquery from service \"{}\"", service)
        } else {
            error.message
        };

        let mut extensions = Object::with_capacity(2 + error.extensions.len());
        extensions.insert(
            "code".to_string(),
            Value::String(DOWNSTREAM_SERVICE_ERROR.to_string()),
        );
        extensions.insert("serviceName".to_string(), Value::String(service.to_string()));
        extensions.extend(error.extensions);

        Error {
            message,
            locations: error.locations,
            path: Some(path.clone()),
            extensions,
        }
    }
}

/// A location in the request that triggered a graphql error.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    /// The line number.
    pub line: i32,

    /// The column number.
    pub column: i32,
}
