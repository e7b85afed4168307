//! Error types for the execution engine.

use thiserror::Error;

/// Failure while building or sending a request.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("invalid URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("invalid HTTP method: {0}")]
    InvalidMethod(String),

    #[error("unsupported auth type: {0}")]
    UnsupportedAuth(String),

    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("failed to serialize request body: {0}")]
    Body(#[from] serde_json::Error),

    #[error("failed to execute request: {0}")]
    Send(#[source] reqwest::Error),

    #[error("failed to read response body: {0}")]
    Read(#[source] reqwest::Error),
}

/// Failure while pulling a value out of a response.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExtractionError {
    #[error("failed to parse JSON body: {0}")]
    InvalidJson(String),

    #[error("key {0} not found")]
    KeyNotFound(String),

    #[error("invalid array index: {0}")]
    InvalidIndex(String),

    #[error("array index out of bounds: {0}")]
    IndexOutOfBounds(usize),

    #[error("cannot access property {property} on {kind}")]
    NotNavigable { property: String, kind: &'static str },

    #[error("header {0} not found")]
    HeaderNotFound(String),

    #[error("invalid regex pattern: {0}")]
    InvalidRegex(String),

    #[error("no matches found for pattern: {0}")]
    NoMatch(String),

    #[error("unsupported extractor: {0}")]
    UnsupportedExtractor(String),

    #[error("unsupported assertion type: {0}")]
    UnsupportedType(String),
}

/// Unrecoverable assertion engine failure.
///
/// Nothing in the current evaluator produces this; misconfigured checks
/// become failed results instead.
#[derive(Error, Debug)]
#[error("assertion engine error: {0}")]
pub struct EngineError(pub String);

/// Structural problem in a scenario definition.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("scenario name is required")]
    MissingName,

    #[error("scenario must have either steps or tests")]
    Empty,

    #[error("{group}: test group must have at least one step")]
    EmptyGroup { group: String },

    #[error("{location}: step name is required")]
    MissingStepName { location: String },

    #[error("{location}: HTTP step URL is required")]
    MissingUrl { location: String },

    #[error("{location}: invalid step type: {kind}")]
    InvalidStepType { location: String, kind: String },

    #[error("{location}: capture '{capture}' must set exactly one of jsonpath, header or regex")]
    AmbiguousCapture { location: String, capture: String },

    #[error("{location}: data-driven source and variable must both be set")]
    IncompleteDataDriven { location: String },
}
