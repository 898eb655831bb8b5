//! Thin contract over the Kafka admin protocol.
//!
//! The controller talks to Kafka exclusively through [`KafkaAdmin`]. Every
//! batch operation returns a per-topic result map (the join of Kafka's
//! per-topic futures), so that one topic failing never hides the outcome of
//! its batch peers.

use crate::error::{KafkaApiKind, OperatorError, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;

/// Sentinel meaning "let the broker pick" for partitions and replicas.
pub const BROKER_DEFAULT: i32 = -1;

/// Per-topic outcome map of one batched admin call.
pub type PerTopic<T> = BTreeMap<String, std::result::Result<T, KafkaApiError>>;

/// A single partition of a topic.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TopicPartition {
    pub topic: String,
    pub partition: i32,
}

impl TopicPartition {
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

impl fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.topic, self.partition)
    }
}

/// Metadata of one partition within a topic description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionDescription {
    pub partition: i32,
    /// Broker ids currently holding a replica
    pub replicas: Vec<i32>,
}

/// Metadata of an existing topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicDescription {
    pub name: String,
    pub topic_id: Option<String>,
    pub partitions: Vec<PartitionDescription>,
}

/// An in-flight replica reassignment of one partition.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PartitionReassignment {
    pub replicas: Vec<i32>,
    pub adding_replicas: Vec<i32>,
    pub removing_replicas: Vec<i32>,
}

impl PartitionReassignment {
    /// The replication factor this reassignment converges to.
    ///
    /// `replicas` already contains the adding replicas, so the target is the
    /// replica set minus the removing replicas.
    pub fn target_replication_factor(&self) -> i32 {
        self.replicas
            .iter()
            .filter(|broker| !self.removing_replicas.contains(broker))
            .count() as i32
    }
}

/// Where a topic config entry comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    /// Set dynamically on this topic; the only source the operator reverts
    DynamicTopicConfig,
    DynamicBrokerConfig,
    StaticBrokerConfig,
    DefaultConfig,
    Unknown,
}

/// One current config entry of a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigEntry {
    pub value: String,
    pub source: ConfigSource,
}

/// Current dynamic config of a topic, keyed by config name.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TopicConfigs {
    pub entries: BTreeMap<String, ConfigEntry>,
}

impl TopicConfigs {
    pub fn get(&self, key: &str) -> Option<&ConfigEntry> {
        self.entries.get(key)
    }

    /// Keys that were set dynamically on this topic.
    pub fn dynamic_topic_keys(&self) -> impl Iterator<Item = &String> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.source == ConfigSource::DynamicTopicConfig)
            .map(|(key, _)| key)
    }
}

/// One incremental config operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlterConfigOp {
    Set { key: String, value: String },
    Delete { key: String },
}

impl AlterConfigOp {
    pub fn key(&self) -> &str {
        match self {
            AlterConfigOp::Set { key, .. } | AlterConfigOp::Delete { key } => key,
        }
    }
}

/// A topic to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTopicRequest {
    pub name: String,
    /// `BROKER_DEFAULT` when the spec leaves the count to the broker
    pub partitions: i32,
    /// `BROKER_DEFAULT` when the spec leaves the factor to the broker
    pub replicas: i32,
    pub configs: BTreeMap<String, String>,
}

/// Identity assigned by the cluster to a freshly created topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedTopic {
    pub topic_id: String,
}

/// A per-topic failure reported by the admin client.
#[derive(Debug, Clone)]
pub enum KafkaApiError {
    /// The broker rejected the operation with a recognizable API error
    Api { kind: KafkaApiKind, message: String },
    /// Anything else (connection loss, timeout, client defect)
    Uncategorized(String),
}

impl KafkaApiError {
    pub fn api(kind: KafkaApiKind, message: impl Into<String>) -> Self {
        KafkaApiError::Api {
            kind,
            message: message.into(),
        }
    }

    /// The API kind, when the broker produced one.
    pub fn kind(&self) -> Option<&KafkaApiKind> {
        match self {
            KafkaApiError::Api { kind, .. } => Some(kind),
            KafkaApiError::Uncategorized(_) => None,
        }
    }

    pub fn is_kind(&self, kind: &KafkaApiKind) -> bool {
        self.kind() == Some(kind)
    }
}

impl fmt::Display for KafkaApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KafkaApiError::Api { kind, message } => write!(f, "{} ({})", message, kind),
            KafkaApiError::Uncategorized(message) => write!(f, "{}", message),
        }
    }
}

/// API errors keep their kind; anything else is wrapped as internal.
impl From<KafkaApiError> for OperatorError {
    fn from(err: KafkaApiError) -> Self {
        match err {
            KafkaApiError::Api { kind, message } => OperatorError::KafkaError { kind, message },
            KafkaApiError::Uncategorized(message) => OperatorError::Internal(message),
        }
    }
}

/// Batched admin operations against the Kafka cluster.
///
/// Implementations report per-topic failures inside the returned maps; the
/// outer `Result` is reserved for cooperative interruption
/// (`OperatorError::Interrupted`), which aborts the whole batch.
#[async_trait]
pub trait KafkaAdmin: Send + Sync {
    /// Value of a cluster-level config key, read from a single broker.
    ///
    /// Broker configs are assumed uniform across the cluster; implementations
    /// must not fan out one describe per broker.
    async fn describe_cluster_config(&self, key: &str) -> Result<Option<String>>;

    /// Topic metadata for each of `names`.
    async fn describe_topics(&self, names: &[String]) -> Result<PerTopic<TopicDescription>>;

    /// Current dynamic configs for each of `names`.
    async fn describe_configs(&self, names: &[String]) -> Result<PerTopic<TopicConfigs>>;

    /// Create the given topics; success carries the assigned topic id.
    async fn create_topics(&self, topics: &[NewTopicRequest]) -> Result<PerTopic<CreatedTopic>>;

    /// Grow each topic to the requested partition count.
    async fn create_partitions(&self, increases: &BTreeMap<String, i32>) -> Result<PerTopic<()>>;

    /// Apply incremental config operations per topic.
    async fn incremental_alter_configs(
        &self,
        ops: &BTreeMap<String, Vec<AlterConfigOp>>,
    ) -> Result<PerTopic<()>>;

    /// In-flight reassignments among the given partitions. Partitions with no
    /// reassignment in progress are absent from the result.
    async fn list_partition_reassignments(
        &self,
        partitions: &[TopicPartition],
    ) -> Result<BTreeMap<TopicPartition, PartitionReassignment>>;

    /// Delete the given topics.
    async fn delete_topics(&self, names: &[String]) -> Result<PerTopic<()>>;
}
