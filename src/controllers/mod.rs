//! Controllers for the topic operator
//!
//! The batching topic controller reconciles batches of KafkaTopic events
//! against the actual topic state in the Kafka cluster.

mod topic;

pub use topic::{BatchingTopicController, AUTO_CREATE_TOPICS_ENABLE, MIN_INSYNC_REPLICAS};
