//! Kafka admin façade

mod admin;

pub use admin::{
    AlterConfigOp, ConfigEntry, ConfigSource, CreatedTopic, KafkaAdmin, KafkaApiError,
    NewTopicRequest, PartitionDescription, PartitionReassignment, PerTopic, TopicConfigs,
    TopicDescription, TopicPartition, BROKER_DEFAULT,
};
