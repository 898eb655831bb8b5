//! Custom Resource Definitions for the topic operator
//!
//! A single CRD is managed:
//! - KafkaTopic: a declaratively described Kafka topic

mod topic;

pub use topic::{
    Condition, KafkaTopic, KafkaTopicSpec, KafkaTopicStatus, ReplicasChange, MANAGED_ANNOTATION,
    PAUSED_ANNOTATION,
};
