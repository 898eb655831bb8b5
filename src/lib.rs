//! Kafka Topic Operator
//!
//! Reconciliation engine keeping declaratively described topics in sync with
//! the actual topic state inside a Kafka cluster. Batches of KafkaTopic
//! change events enter the [`controllers::BatchingTopicController`], which
//! computes and applies the minimum set of admin operations (create,
//! configure, grow partitions, adjust the replication factor, delete)
//! required to converge the cluster toward the declared state, then writes
//! structured status back to each resource.
//!
//! The event source, work queue, CLI and transports are external
//! collaborators: the Kafka cluster is reached through the
//! [`kafka::KafkaAdmin`] façade, the resource store through
//! [`resources::TopicStore`], and the rebalancing service through
//! [`rebalance::RebalanceClient`].
//!
//! ## Example
//!
//! ```yaml
//! apiVersion: kafka.strimzi.io/v1beta2
//! kind: KafkaTopic
//! metadata:
//!   name: my-topic
//! spec:
//!   partitions: 3
//!   replicas: 2
//!   config:
//!     retention.ms: "7200000"
//! ```

pub mod conditions;
pub mod config;
pub mod controllers;
pub mod crd;
pub mod error;
pub mod kafka;
pub mod metrics;
pub mod model;
pub mod rebalance;
pub mod resources;

pub use config::{AlterableTopicConfig, TopicOperatorConfig};
pub use controllers::BatchingTopicController;
pub use crd::{Condition, KafkaTopic, KafkaTopicSpec, KafkaTopicStatus, ReplicasChange};
pub use error::{KafkaApiKind, OperatorError, Result};
pub use kafka::KafkaAdmin;
pub use metrics::OperatorMetrics;
pub use model::{KubeRef, PartitionedByError, ReconcilableTopic, TopicState};
pub use rebalance::RebalanceClient;
pub use resources::{KubeTopicStore, MetadataEdit, TopicStore};
