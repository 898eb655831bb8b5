//! Per-reconciliation value types
//!
//! These bundles live for the duration of one batch: the desired spec coming
//! from the resource, the observed Kafka state, and a stable identity for the
//! source resource. `PartitionedByError` is the pipeline's replacement for
//! thrown exceptions: every item's outcome survives to the status write.

use crate::crd::KafkaTopic;
use crate::error::OperatorError;
use crate::kafka::{TopicConfigs, TopicDescription};
use chrono::{DateTime, Utc};
use kube::ResourceExt;
use std::cmp::Ordering;
use std::fmt;

/// Stable, comparable identity of a topic resource.
///
/// Ordering is by `(creationTime, uid, namespace, name)`: creation time ties
/// ownership, the uid makes arbitration deterministic when two claimants were
/// created in the same instant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KubeRef {
    pub namespace: String,
    pub name: String,
    pub uid: String,
    pub creation_time: DateTime<Utc>,
}

impl KubeRef {
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        uid: impl Into<String>,
        creation_time: DateTime<Utc>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            uid: uid.into(),
            creation_time,
        }
    }
}

impl From<&KafkaTopic> for KubeRef {
    fn from(topic: &KafkaTopic) -> Self {
        Self {
            namespace: topic.namespace().unwrap_or_default(),
            name: topic.name_any(),
            uid: topic.metadata.uid.clone().unwrap_or_default(),
            creation_time: topic
                .metadata
                .creation_timestamp
                .as_ref()
                .map(|ts| ts.0)
                .unwrap_or_default(),
        }
    }
}

impl Ord for KubeRef {
    fn cmp(&self, other: &Self) -> Ordering {
        self.creation_time
            .cmp(&other.creation_time)
            .then_with(|| self.uid.cmp(&other.uid))
            .then_with(|| self.namespace.cmp(&other.namespace))
            .then_with(|| self.name.cmp(&other.name))
    }
}

impl PartialOrd for KubeRef {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for KubeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// A topic resource snapshot under reconciliation, bundled with the Kafka
/// topic name it resolves to. Exists only for the duration of one batch.
#[derive(Debug, Clone)]
pub struct ReconcilableTopic {
    pub resource: KafkaTopic,
    topic_name: String,
}

impl ReconcilableTopic {
    pub fn new(resource: KafkaTopic) -> Self {
        let topic_name = resource.topic_name();
        Self {
            resource,
            topic_name,
        }
    }

    /// The Kafka topic name, resolved once at batch entry.
    pub fn topic_name(&self) -> &str {
        &self.topic_name
    }

    pub fn kube_ref(&self) -> KubeRef {
        KubeRef::from(&self.resource)
    }
}

/// Observed state of an existing Kafka topic.
#[derive(Debug, Clone)]
pub struct TopicState {
    pub description: TopicDescription,
    pub configs: TopicConfigs,
}

impl TopicState {
    pub fn num_partitions(&self) -> i32 {
        self.description.partitions.len() as i32
    }

    /// The replication factor shared by all partitions, or `None` when the
    /// partitions disagree (e.g. mid-reassignment).
    pub fn unique_replication_factor(&self) -> Option<i32> {
        let mut unique = None;
        for partition in &self.description.partitions {
            let rf = partition.replicas.len() as i32;
            match unique {
                None => unique = Some(rf),
                Some(existing) if existing != rf => return None,
                Some(_) => {}
            }
        }
        unique
    }

    /// Ids of the partitions whose replication factor differs from `rf`.
    pub fn partitions_with_different_rf_than(&self, rf: i32) -> Vec<i32> {
        self.description
            .partitions
            .iter()
            .filter(|partition| partition.replicas.len() as i32 != rf)
            .map(|partition| partition.partition)
            .collect()
    }
}

/// Per-item results of one pipeline stage, split into successes and failures
/// while preserving each item's key.
#[derive(Debug)]
pub struct PartitionedByError<K, T> {
    ok: Vec<(K, T)>,
    errors: Vec<(K, OperatorError)>,
}

impl<K, T> PartitionedByError<K, T> {
    pub fn empty() -> Self {
        Self {
            ok: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Split an iterator of per-item results into the two halves.
    pub fn from_results<I>(results: I) -> Self
    where
        I: IntoIterator<Item = (K, Result<T, OperatorError>)>,
    {
        let mut partitioned = Self::empty();
        for (key, result) in results {
            match result {
                Ok(value) => partitioned.ok.push((key, value)),
                Err(err) => partitioned.errors.push((key, err)),
            }
        }
        partitioned
    }

    pub fn ok(&self) -> &[(K, T)] {
        &self.ok
    }

    pub fn errors(&self) -> &[(K, OperatorError)] {
        &self.errors
    }

    pub fn is_empty(&self) -> bool {
        self.ok.is_empty() && self.errors.is_empty()
    }
}

impl<K, T> Default for PartitionedByError<K, T> {
    fn default() -> Self {
        Self::empty()
    }
}
