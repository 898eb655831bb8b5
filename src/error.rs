//! Error types for the topic operator

use std::fmt;

/// Result type alias for operator operations
pub type Result<T> = std::result::Result<T, OperatorError>;

/// Recognizable Kafka API error kinds surfaced by the admin client.
///
/// The controller only branches on the first three; everything else travels
/// as `Other` with the broker's error name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KafkaApiKind {
    /// The topic (or one of its partitions) does not exist
    UnknownTopicOrPartition,
    /// A topic with this name already exists
    TopicExists,
    /// Topic deletion is disabled on the Kafka controller
    TopicDeletionDisabled,
    /// Any other API-level rejection, identified by its error name
    Other(String),
}

impl fmt::Display for KafkaApiKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KafkaApiKind::UnknownTopicOrPartition => write!(f, "UNKNOWN_TOPIC_OR_PARTITION"),
            KafkaApiKind::TopicExists => write!(f, "TOPIC_ALREADY_EXISTS"),
            KafkaApiKind::TopicDeletionDisabled => write!(f, "TOPIC_DELETION_DISABLED"),
            KafkaApiKind::Other(name) => write!(f, "{}", name),
        }
    }
}

/// Errors that can occur while reconciling topics.
///
/// Everything except `Interrupted` can become a per-resource status condition;
/// `reason()` is the string written to `status.conditions[].reason`.
/// `Interrupted` signals cooperative cancellation and is surfaced to the batch
/// caller instead of being written to any status.
#[derive(Debug, Clone)]
pub enum OperatorError {
    /// The resource spec is malformed (e.g. a bad config value)
    InvalidResource(String),
    /// A legal request the operator refuses by design
    NotSupported(String),
    /// Another resource owns this topic name
    ResourceConflict(String),
    /// Cluster-side rejection, retaining the Kafka API kind
    KafkaError { kind: KafkaApiKind, message: String },
    /// Kubernetes API error
    KubeApi(String),
    /// Resource not found
    NotFound(String),
    /// Configuration error
    Configuration(String),
    /// Unexpected cause, wrapped
    Internal(String),
    /// Cooperative cancellation; aborts the whole batch
    Interrupted,
}

impl OperatorError {
    /// The `reason` string used in `Ready=False` status conditions.
    pub fn reason(&self) -> &'static str {
        match self {
            OperatorError::InvalidResource(_) => "InvalidResource",
            OperatorError::NotSupported(_) => "NotSupported",
            OperatorError::ResourceConflict(_) => "ResourceConflict",
            OperatorError::KafkaError { .. } => "KafkaError",
            OperatorError::KubeApi(_) => "KubeApi",
            OperatorError::NotFound(_) => "NotFound",
            OperatorError::Configuration(_) => "Configuration",
            OperatorError::Internal(_) => "InternalError",
            OperatorError::Interrupted => "Interrupted",
        }
    }

    /// Whether this error is the cooperative-cancellation signal.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, OperatorError::Interrupted)
    }
}

impl fmt::Display for OperatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperatorError::InvalidResource(msg) => write!(f, "{}", msg),
            OperatorError::NotSupported(msg) => write!(f, "{}", msg),
            OperatorError::ResourceConflict(msg) => write!(f, "{}", msg),
            OperatorError::KafkaError { kind, message } => write!(f, "{} ({})", message, kind),
            OperatorError::KubeApi(msg) => write!(f, "Kubernetes API error: {}", msg),
            OperatorError::NotFound(msg) => write!(f, "Resource not found: {}", msg),
            OperatorError::Configuration(msg) => write!(f, "Configuration error: {}", msg),
            OperatorError::Internal(msg) => write!(f, "Internal error: {}", msg),
            OperatorError::Interrupted => write!(f, "Interrupted"),
        }
    }
}

impl std::error::Error for OperatorError {}

impl From<kube::Error> for OperatorError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(ae) if ae.code == 404 => OperatorError::NotFound(ae.message),
            other => OperatorError::KubeApi(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for OperatorError {
    fn from(err: serde_json::Error) -> Self {
        OperatorError::Internal(err.to_string())
    }
}
