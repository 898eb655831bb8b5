//! KafkaTopic Custom Resource Definition
//!
//! Declarative description of a Kafka topic, reconciled by the batching topic
//! controller.

use chrono::Utc;
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Annotation controlling whether the operator owns the topic lifecycle.
/// Anything other than the literal `"false"` means managed.
pub const MANAGED_ANNOTATION: &str = "strimzi.io/managed";

/// Annotation that pauses reconciliation of the resource body.
pub const PAUSED_ANNOTATION: &str = "strimzi.io/paused-reconciliation";

/// KafkaTopic is the Schema for the kafkatopics API
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "kafka.strimzi.io",
    version = "v1beta2",
    kind = "KafkaTopic",
    namespaced,
    status = "KafkaTopicStatus",
    shortname = "kt",
    printcolumn = r#"{"name":"Topic","type":"string","jsonPath":".status.topicName"}"#,
    printcolumn = r#"{"name":"Partitions","type":"integer","jsonPath":".spec.partitions"}"#,
    printcolumn = r#"{"name":"Replicas","type":"integer","jsonPath":".spec.replicas"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct KafkaTopicSpec {
    /// Kafka topic name; defaults to the resource name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic_name: Option<String>,

    /// Number of partitions; the broker default applies when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partitions: Option<i32>,

    /// Replication factor; the broker default applies when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// Topic configuration; values are scalars or lists of scalars
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<BTreeMap<String, serde_json::Value>>,
}

/// Status of the KafkaTopic.
///
/// Every field is serialized (no skips): status writes go out as merge
/// patches, and an explicit `null` is what clears a field like
/// `replicasChange` on completion or `topicName` on unmanage.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KafkaTopicStatus {
    /// The generation last acted upon by the operator
    #[serde(default)]
    pub observed_generation: Option<i64>,

    /// The Kafka topic name this resource manages; never changes once set
    #[serde(default)]
    pub topic_name: Option<String>,

    /// The id Kafka assigned to the topic at creation
    #[serde(default)]
    pub topic_id: Option<String>,

    /// Conditions representing the outcome of the last reconciliation
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Tracked replication-factor change, if any
    #[serde(default)]
    pub replicas_change: Option<ReplicasChange>,
}

/// A replication-factor change delegated to the rebalancer.
///
/// Tagged on `state` so that a session id is only representable while the
/// rebalancer is actually working, and "submitted but not yet accepted" is
/// distinct from "previously failed" by the presence of `message`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "state")]
pub enum ReplicasChange {
    /// Submitted but not yet accepted by the rebalancer; a message records a
    /// prior failure awaiting spec revert or retry
    #[serde(rename = "PENDING", rename_all = "camelCase")]
    Pending {
        target_replicas: i32,
        #[serde(default)]
        message: Option<String>,
    },
    /// The rebalancer is working on the change
    #[serde(rename = "ONGOING", rename_all = "camelCase")]
    Ongoing {
        target_replicas: i32,
        session_id: String,
        #[serde(default)]
        message: Option<String>,
    },
}

impl ReplicasChange {
    pub fn is_pending(&self) -> bool {
        matches!(self, ReplicasChange::Pending { .. })
    }

    pub fn is_ongoing(&self) -> bool {
        matches!(self, ReplicasChange::Ongoing { .. })
    }

    /// Pending with a recorded failure, awaiting spec revert or retry.
    pub fn is_failed(&self) -> bool {
        matches!(self, ReplicasChange::Pending { message: Some(_), .. })
    }

    pub fn target_replicas(&self) -> i32 {
        match self {
            ReplicasChange::Pending { target_replicas, .. }
            | ReplicasChange::Ongoing { target_replicas, .. } => *target_replicas,
        }
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            ReplicasChange::Pending { message, .. } | ReplicasChange::Ongoing { message, .. } => {
                message.as_deref()
            }
        }
    }
}

/// Condition of the topic
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition
    pub r#type: String,
    /// Status of the condition (True, False, Unknown)
    pub status: String,
    /// Last time the condition transitioned
    #[serde(default)]
    pub last_transition_time: Option<String>,
    /// Reason for the condition
    #[serde(default)]
    pub reason: Option<String>,
    /// Human-readable message
    #[serde(default)]
    pub message: Option<String>,
}

impl KafkaTopic {
    /// The Kafka topic name this resource describes.
    pub fn topic_name(&self) -> String {
        self.spec
            .topic_name
            .clone()
            .unwrap_or_else(|| self.name_any())
    }

    /// Whether the operator owns this topic's lifecycle.
    pub fn is_managed(&self) -> bool {
        self.annotations()
            .get(MANAGED_ANNOTATION)
            .map(|value| value != "false")
            .unwrap_or(true)
    }

    /// Whether reconciliation of this resource is paused.
    pub fn is_paused(&self) -> bool {
        self.annotations()
            .get(PAUSED_ANNOTATION)
            .map(|value| value == "true")
            .unwrap_or(false)
    }

    /// Whether the resource deletion timestamp has passed.
    pub fn is_for_deletion(&self) -> bool {
        self.metadata
            .deletion_timestamp
            .as_ref()
            .map(|ts| ts.0 <= Utc::now())
            .unwrap_or(false)
    }

    /// Whether the given finalizer is present on the resource.
    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.metadata
            .finalizers
            .as_deref()
            .unwrap_or_default()
            .iter()
            .any(|f| f == finalizer)
    }

    /// Whether the stored status carries a `Ready=True` condition.
    pub fn is_ready(&self) -> bool {
        self.status
            .as_ref()
            .map(|status| {
                status
                    .conditions
                    .iter()
                    .any(|c| c.r#type == "Ready" && c.status == "True")
            })
            .unwrap_or(false)
    }

    /// The tracked replication-factor change, if any.
    pub fn replicas_change(&self) -> Option<&ReplicasChange> {
        self.status.as_ref().and_then(|s| s.replicas_change.as_ref())
    }
}
