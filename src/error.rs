//! Structured error types for each component boundary.
//!
//! Library modules return these typed errors; [`crate::application::Application`]'s
//! outermost public methods wrap them in `anyhow::Result` for host application code,
//! matching a library-vs-facade split common in larger crates.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TopicError {
    #[error("topic name is empty")]
    Empty,
    #[error("topic name exceeds {max} octets")]
    TooLong { max: usize },
    #[error("topic name contains a NUL byte")]
    ContainsNul,
    #[error("topic filter level '{level}' mixes a wildcard with other characters")]
    MalformedWildcard { level: String },
    #[error("topic filter contains more than one '#'")]
    MultipleMultiLevelWildcards,
    #[error("'#' must be the last level of a topic filter")]
    MultiLevelWildcardNotLast,
    #[error("topic must not contain a wildcard level")]
    WildcardInTopic,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("gateway id '{0}' does not match ^[A-Za-z][A-Za-z0-9]*$")]
    InvalidId(String),
    #[error("gateway id '{0}' is already registered")]
    DuplicateId(String),
    #[error("gateway is already attached to an application")]
    AlreadyAttached,
    #[error("unknown gateway '{0}'")]
    UnknownGateway(String),
    #[error("gateway '{0}' failed to start: {reason}", reason = .1)]
    StartFailed(String, String),
    #[error("operation not permitted after the application has launched")]
    AfterLaunch,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RouterError {
    #[error(transparent)]
    Topic(#[from] TopicError),
    #[error("filter head '{0}' names an unknown gateway")]
    UnknownGatewayHead(String),
    #[error("filter has no localized portion for gateway '{0}'")]
    MissingLocalizedFilter(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DataItemError {
    #[error("data item '{0}' is not active")]
    NotActive(String),
    #[error("data item '{0}' is read-only")]
    ReadOnly(String),
    #[error("value type mismatch for data item '{0}'")]
    TypeMismatch(String),
    #[error("dependency cycle detected while activating '{0}'")]
    Cycle(String),
    #[error("setDependencies called outside onActivate for '{0}'")]
    DependenciesOutsideActivate(String),
    #[error("data item '{0}' cannot depend on itself")]
    SelfReference(String),
    #[error("dependency '{0}' belongs to a different application")]
    CrossApplication(String),
    #[error("invalid data item id '{0}': expected gatewayId/segment(/segment)*")]
    InvalidId(String),
    #[error("unknown data item '{0}'")]
    UnknownId(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BundleError {
    #[error("serialization failure: {0}")]
    Serialization(String),
}
