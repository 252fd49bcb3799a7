use displaydoc::Display;
use thiserror::Error;

/// Error types for QueryPlanner
#[derive(Error, Display, Debug, Clone, PartialEq, Eq)]
pub enum QueryPlannerError {
    /// Invalid schema: {0}
    SchemaParse(String),

    /// Query could not be parsed: {0}
    QueryParse(String),

    /// Unknown type "{0}"
    UnknownType(String),

    /// cannot query field '{field}' on type '{type_name}'
    UnknownField {
        /// The field that was queried.
        field: String,

        /// The parent type of the field.
        type_name: String,
    },

    /// must provide an operation
    MissingOperation,

    /// must provide operation name if query contains multiple operations
    MissingOperationName,

    /// Unknown operation named "{0}"
    UnknownOperation(String),

    /// Unknown fragment "{0}"
    UnknownFragment(String),

    /// subscription is not supported
    UnsupportedSubscription,

    /// couldn't find base service for type "{0}"
    MissingBaseService(String),

    /// couldn't find owning service for field "{type_name}.{field}"
    MissingOwningService {
        /// The parent type of the field.
        type_name: String,

        /// The field without owner.
        field: String,
    },

    /// couldn't find keys for type "{type_name}" in service "{service}"
    MissingKeys {
        /// The entity type.
        type_name: String,

        /// The service the keys were looked up in.
        service: String,
    },

    /// variable "{0}" is used but not defined by the operation
    MissingVariableDefinition(String),

    /// nodes is 0 length
    EmptyNodes,

    /// could not print operation: {0}
    Print(String),
}
