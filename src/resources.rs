//! Resource-store façade
//!
//! The controller reads and writes KafkaTopic resources exclusively through
//! [`TopicStore`]: get, status update, and metadata (finalizer) edits.
//! [`KubeTopicStore`] implements it against the Kubernetes API.

use crate::conditions::FINALIZER;
use crate::crd::KafkaTopic;
use crate::error::Result;
use async_trait::async_trait;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, ResourceExt};
use tracing::debug;

/// Metadata edits the controller performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataEdit {
    AddFinalizer,
    RemoveFinalizer,
}

/// Operations on stored topic resources.
///
/// Implementations reserve the error channel's `Interrupted` variant for
/// cooperative shutdown; `NotFound` is surfaced distinctly so the deletion
/// path can tolerate resources that are already gone.
#[async_trait]
pub trait TopicStore: Send + Sync {
    /// Fetch a resource; `None` when it does not exist.
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<KafkaTopic>>;

    /// Write the status subresource, returning the stored resource.
    async fn update_status(&self, topic: &KafkaTopic) -> Result<KafkaTopic>;

    /// Add or remove the operator finalizer, returning the stored resource.
    async fn edit_metadata(&self, topic: &KafkaTopic, edit: MetadataEdit) -> Result<KafkaTopic>;
}

/// Kubernetes-backed store for KafkaTopic resources.
pub struct KubeTopicStore {
    client: Client,
    namespace: String,
}

impl KubeTopicStore {
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    fn api(&self, namespace: &str) -> Api<KafkaTopic> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl TopicStore for KubeTopicStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<KafkaTopic>> {
        Ok(self.api(namespace).get_opt(name).await?)
    }

    async fn update_status(&self, topic: &KafkaTopic) -> Result<KafkaTopic> {
        let namespace = topic.namespace().unwrap_or_else(|| self.namespace.clone());
        let name = topic.name_any();

        debug!(name = %name, namespace = %namespace, "Updating topic status");

        let patch = serde_json::json!({ "status": topic.status });
        let updated = self
            .api(&namespace)
            .patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(updated)
    }

    async fn edit_metadata(&self, topic: &KafkaTopic, edit: MetadataEdit) -> Result<KafkaTopic> {
        let namespace = topic.namespace().unwrap_or_else(|| self.namespace.clone());
        let name = topic.name_any();

        let mut finalizers: Vec<String> = topic
            .metadata
            .finalizers
            .as_deref()
            .unwrap_or_default()
            .iter()
            .filter(|f| f.as_str() != FINALIZER)
            .cloned()
            .collect();
        if edit == MetadataEdit::AddFinalizer {
            finalizers.push(FINALIZER.to_string());
        }

        debug!(name = %name, namespace = %namespace, ?edit, "Editing topic metadata");

        let patch = serde_json::json!({
            "metadata": {
                "finalizers": finalizers
            }
        });
        let updated = self
            .api(&namespace)
            .patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(updated)
    }
}
