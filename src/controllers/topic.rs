//! Batching topic controller
//!
//! Reconciles batches of KafkaTopic events: classifies each item, issues the
//! minimum set of grouped admin operations required to converge the cluster
//! toward the declared state, and writes one terminal status per item.
//!
//! A single controller instance processes batches sequentially; within a
//! batch the admin fan-out is concurrent. Per-item failures are recorded in
//! status, never raised; the only error surfaced to the caller is the
//! cooperative `Interrupted` signal.

use crate::conditions::{
    error_condition, not_configurable_condition, true_condition, CONDITION_PAUSED,
    CONDITION_READY, CONDITION_UNMANAGED, FINALIZER,
};
use crate::config::{AlterableTopicConfig, TopicOperatorConfig};
use crate::crd::{Condition, KafkaTopic, KafkaTopicStatus};
use crate::error::{KafkaApiKind, OperatorError, Result};
use crate::kafka::{
    AlterConfigOp, KafkaAdmin, NewTopicRequest, TopicConfigs, TopicPartition, BROKER_DEFAULT,
};
use crate::metrics::OperatorMetrics;
use crate::model::{KubeRef, PartitionedByError, ReconcilableTopic, TopicState};
use crate::rebalance::RebalanceClient;
use crate::resources::{MetadataEdit, TopicStore};
use kube::ResourceExt;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, warn};

/// Broker config consulted at startup to warn about topic auto-creation.
pub const AUTO_CREATE_TOPICS_ENABLE: &str = "auto.create.topics.enable";

/// Broker/topic config consulted before submitting replication-factor changes.
pub const MIN_INSYNC_REPLICAS: &str = "min.insync.replicas";

type Outcome = std::result::Result<(), OperatorError>;

/// Controller that reconciles batches of KafkaTopic events.
pub struct BatchingTopicController {
    config: TopicOperatorConfig,
    admin: Arc<dyn KafkaAdmin>,
    store: Arc<dyn TopicStore>,
    rebalance: Option<Arc<dyn RebalanceClient>>,
    metrics: OperatorMetrics,
    // topic name -> resources known to manage that name
    topics: HashMap<String, Vec<KubeRef>>,
}

impl BatchingTopicController {
    /// Create the controller, reviewing the cluster configuration unless the
    /// review is skipped.
    pub async fn new(
        config: TopicOperatorConfig,
        admin: Arc<dyn KafkaAdmin>,
        store: Arc<dyn TopicStore>,
        rebalance: Option<Arc<dyn RebalanceClient>>,
    ) -> Result<Self> {
        if config.cruise_control_enabled && rebalance.is_none() {
            return Err(OperatorError::Configuration(
                "cruiseControlEnabled requires a rebalancer client".to_string(),
            ));
        }

        if !config.skip_cluster_config_review {
            let auto_create = admin.describe_cluster_config(AUTO_CREATE_TOPICS_ENABLE).await?;
            if auto_create.as_deref() == Some("true") {
                warn!(
                    "It is recommended that {} is set to 'false' to avoid races between the \
                     operator and Kafka applications auto-creating topics",
                    AUTO_CREATE_TOPICS_ENABLE
                );
            }
        }

        let metrics = OperatorMetrics::new(config.enable_additional_metrics);
        Ok(Self {
            config,
            admin,
            store,
            rebalance,
            metrics,
            topics: HashMap::new(),
        })
    }

    /// Reconcile a batch of upserted resources.
    ///
    /// Returns `Err` only on cooperative interruption; every other failure
    /// becomes a per-item status.
    pub async fn on_update(&mut self, batch: Vec<ReconcilableTopic>) -> Result<()> {
        debug!(batch_size = batch.len(), "Reconciling batch");

        let mut selected = Vec::with_capacity(batch.len());
        for rt in batch {
            if !matches_selector(&self.config.label_selector, rt.resource.labels()) {
                debug!(
                    resource = %rt.kube_ref(),
                    labels = ?rt.resource.labels(),
                    "Ignoring KafkaTopic not matched by the label selector"
                );
                self.forget_topic(rt.topic_name(), &rt.kube_ref());
                continue;
            }
            selected.push(rt);
        }

        let (to_delete, remaining): (Vec<_>, Vec<_>) = selected
            .into_iter()
            .partition(|rt| rt.resource.is_for_deletion());
        if !to_delete.is_empty() {
            debug!(count = to_delete.len(), "metadata.deletionTimestamp has passed, deleting");
            self.delete_internal(to_delete, false).await?;
        }

        self.update_internal(remaining).await
    }

    /// Reconcile a batch of deleted resources.
    pub async fn on_delete(&mut self, batch: Vec<ReconcilableTopic>) -> Result<()> {
        self.delete_internal(batch, true).await
    }

    async fn update_internal(&mut self, batch: Vec<ReconcilableTopic>) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let started = Instant::now();

        let mut items: BTreeMap<KubeRef, ReconcilableTopic> = batch
            .into_iter()
            .map(|rt| (rt.kube_ref(), rt))
            .collect();
        let batch_refs: Vec<KubeRef> = items.keys().cloned().collect();
        let mut results: BTreeMap<KubeRef, Outcome> = BTreeMap::new();

        // Unmanaged resources succeed trivially and release any ownership
        // claim on their topic name.
        let mut managed: Vec<KubeRef> = Vec::new();
        let mut unmanaged: Vec<KubeRef> = Vec::new();
        for (kref, rt) in &items {
            if rt.resource.is_managed() {
                managed.push(kref.clone());
            } else {
                unmanaged.push(kref.clone());
            }
        }
        for kref in unmanaged {
            let topic_name = items[&kref].topic_name().to_string();
            self.forget_topic(&topic_name, &kref);
            // an unmanaged resource does not keep the operator finalizer
            let rt = items.get_mut(&kref).expect("item in batch");
            if rt.resource.has_finalizer(FINALIZER) {
                match self
                    .store
                    .edit_metadata(&rt.resource, MetadataEdit::RemoveFinalizer)
                    .await
                {
                    Ok(updated) => rt.resource = updated,
                    Err(OperatorError::NotFound(_)) => {}
                    Err(e) if e.is_interrupted() => return Err(e),
                    Err(e) => {
                        put_result(&mut results, kref, Err(e));
                        continue;
                    }
                }
            }
            put_result(&mut results, kref, Ok(()));
        }

        // Validation: unchanged topic name, then remember the claim, then
        // ownership arbitration. Failures get their status written here and
        // leave the pipeline.
        let mut may_need_update: Vec<KubeRef> = Vec::new();
        for kref in managed {
            let outcome = {
                let rt = &items[&kref];
                self.validate(rt)
            };
            match outcome {
                Ok(()) => may_need_update.push(kref),
                Err(e) => {
                    let rt = items.get_mut(&kref).expect("item in batch");
                    self.update_status_for_error(rt, e).await?;
                }
            }
        }

        // Paused resources succeed trivially.
        let mut active: Vec<KubeRef> = Vec::new();
        for kref in may_need_update {
            if items[&kref].resource.is_paused() {
                put_result(&mut results, kref, Ok(()));
            } else {
                active.push(kref);
            }
        }

        // Finalizer reconciliation; a failed edit is that item's outcome.
        let mut candidates: Vec<KubeRef> = Vec::new();
        for kref in active {
            let rt = items.get_mut(&kref).expect("item in batch");
            match self.reconcile_finalizer(rt).await {
                Ok(()) => candidates.push(kref),
                Err(e) if e.is_interrupted() => return Err(e),
                Err(e) => put_result(&mut results, kref, Err(e)),
            }
        }

        // Describe current state, then converge.
        let current_states = self.describe_topics_state(&items, &candidates).await?;
        self.create_missing_topics(&mut items, &mut results, &current_states).await?;

        let some_alter_configs = self.config_changes(&items, &mut results, &current_states);
        let some_create_partitions = partition_changes(&items, &mut results, &current_states);

        let alter_results = self.alter_configs(some_alter_configs).await?;
        let create_partitions_results = self.create_partitions(some_create_partitions).await?;
        // The whole batch is scanned here, not just the described items: a
        // tracked replicas change must keep being reconciled even while its
        // resource is paused or errored elsewhere in the pipeline.
        let replicas_results = self
            .check_replicas_changes(&mut items, &batch_refs, &current_states)
            .await?;

        accumulate_results(&mut results, alter_results);
        accumulate_results(&mut results, create_partitions_results);
        accumulate_results(&mut results, replicas_results);

        // One terminal status write per item.
        let count = results.len() as u64;
        for (kref, outcome) in results {
            let rt = items.get_mut(&kref).expect("item in batch");
            match outcome {
                Ok(()) => self.update_status_for_success(rt).await?,
                Err(e) => self.update_status_for_error(rt, e).await?,
            }
        }

        self.metrics.reconciliations(count);
        let elapsed = started.elapsed();
        for _ in 0..count {
            self.metrics.record_reconciliation_duration(elapsed);
        }
        debug!(count, "Reconciled batch of KafkaTopics");
        Ok(())
    }

    async fn delete_internal(
        &mut self,
        batch: Vec<ReconcilableTopic>,
        on_delete_path: bool,
    ) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let started = Instant::now();
        self.metrics.reconciliations(batch.len() as u64);

        let mut items: BTreeMap<KubeRef, ReconcilableTopic> = batch
            .into_iter()
            .map(|rt| (rt.kube_ref(), rt))
            .collect();
        let item_count = items.len() as u64;

        let mut to_delete: Vec<KubeRef> = Vec::new();
        let refs: Vec<KubeRef> = items.keys().cloned().collect();
        for kref in refs {
            if !items[&kref].resource.is_managed() {
                self.delete_unmanaged(&mut items, &kref).await?;
                continue;
            }
            let outcome = {
                let rt = &items[&kref];
                self.validate(rt)
            };
            match outcome {
                Ok(()) => to_delete.push(kref),
                Err(e) => {
                    let rt = items.get_mut(&kref).expect("item in batch");
                    self.update_status_for_error(rt, e).await?;
                }
            }
        }

        if !to_delete.is_empty() {
            let names: Vec<String> = to_delete
                .iter()
                .map(|kref| items[kref].topic_name().to_string())
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
            debug!(topics = ?names, "Admin.delete_topics");
            let timer = Instant::now();
            let mut deleted = self.admin.delete_topics(&names).await?;
            self.metrics.record_external_request("delete_topics", timer.elapsed());

            for kref in to_delete {
                let topic_name = items[&kref].topic_name().to_string();
                let outcome: Outcome = match deleted.remove(&topic_name) {
                    Some(Ok(())) => Ok(()),
                    // deletion is idempotent: an unknown topic is already gone
                    Some(Err(e)) if e.is_kind(&KafkaApiKind::UnknownTopicOrPartition) => Ok(()),
                    Some(Err(e)) => Err(e.into()),
                    None => Ok(()),
                };
                match outcome {
                    Ok(()) => {
                        let rt = items.get_mut(&kref).expect("item in batch");
                        if rt.resource.has_finalizer(FINALIZER) {
                            let timer = Instant::now();
                            match self
                                .store
                                .edit_metadata(&rt.resource, MetadataEdit::RemoveFinalizer)
                                .await
                            {
                                Ok(updated) => {
                                    self.metrics
                                        .record_external_request("edit_metadata", timer.elapsed());
                                    rt.resource = updated;
                                }
                                // on the deletion path the resource may
                                // already be garbage-collected
                                Err(OperatorError::NotFound(_)) if on_delete_path => {}
                                Err(e) if e.is_interrupted() => return Err(e),
                                Err(e) => {
                                    self.update_status_for_error(rt, e).await?;
                                    continue;
                                }
                            }
                        }
                        self.forget_topic(&topic_name, &kref);
                        self.metrics.successful_reconciliation();
                    }
                    Err(e) => {
                        if !self.config.use_finalizer && on_delete_path {
                            // Without finalizers there is no resource left to
                            // carry an error status.
                            if matches!(
                                &e,
                                OperatorError::KafkaError {
                                    kind: KafkaApiKind::TopicDeletionDisabled,
                                    ..
                                }
                            ) {
                                warn!(
                                    resource = %kref,
                                    topic = %topic_name,
                                    "Unable to delete topic from Kafka because topic deletion \
                                     is disabled on the Kafka controller"
                                );
                            } else {
                                warn!(
                                    resource = %kref,
                                    topic = %topic_name,
                                    error = %e,
                                    "Unable to delete topic from Kafka"
                                );
                            }
                            self.metrics.failed_reconciliation();
                        } else {
                            let rt = items.get_mut(&kref).expect("item in batch");
                            self.update_status_for_error(rt, e).await?;
                        }
                    }
                }
            }
        }

        let elapsed = started.elapsed();
        for _ in 0..item_count {
            self.metrics.record_reconciliation_duration(elapsed);
        }
        Ok(())
    }

    async fn delete_unmanaged(
        &mut self,
        items: &mut BTreeMap<KubeRef, ReconcilableTopic>,
        kref: &KubeRef,
    ) -> Result<()> {
        debug!(resource = %kref, "Deleting unmanaged resource; no cluster-side action");
        let rt = items.get_mut(kref).expect("item in batch");
        if rt.resource.has_finalizer(FINALIZER) {
            match self
                .store
                .edit_metadata(&rt.resource, MetadataEdit::RemoveFinalizer)
                .await
            {
                Ok(updated) => rt.resource = updated,
                Err(OperatorError::NotFound(_)) => {}
                Err(e) if e.is_interrupted() => return Err(e),
                Err(e) => {
                    warn!(resource = %kref, error = %e, "Failed to remove finalizer");
                    self.metrics.failed_reconciliation();
                    return Ok(());
                }
            }
        }
        let topic_name = rt.topic_name().to_string();
        self.forget_topic(&topic_name, kref);
        self.metrics.successful_reconciliation();
        Ok(())
    }

    fn validate(&mut self, rt: &ReconcilableTopic) -> Outcome {
        validate_unchanged_topic_name(rt)?;
        self.remember_topic(rt);
        self.validate_single_managing_resource(rt)
    }

    fn remember_topic(&mut self, rt: &ReconcilableTopic) {
        let kref = rt.kube_ref();
        let refs = self.topics.entry(rt.topic_name().to_string()).or_default();
        if !refs.contains(&kref) {
            refs.push(kref);
        }
    }

    fn forget_topic(&mut self, topic_name: &str, kref: &KubeRef) {
        if let Some(refs) = self.topics.get_mut(topic_name) {
            refs.retain(|existing| existing != kref);
            if refs.is_empty() {
                self.topics.remove(topic_name);
            }
        }
    }

    /// Ownership arbitration: among all resources claiming this topic name,
    /// the unique oldest wins; a prior `Ready=True` winner keeps the crown.
    fn validate_single_managing_resource(&self, rt: &ReconcilableTopic) -> Outcome {
        let existing = match self.topics.get(rt.topic_name()) {
            Some(existing) if existing.len() > 1 => existing,
            _ => return Ok(()),
        };
        let mut by_creation: Vec<&KubeRef> = existing.iter().collect();
        by_creation.sort();
        let oldest = by_creation[0];
        let next_oldest = by_creation[1];
        let this_ref = rt.kube_ref();

        if this_ref == *oldest && next_oldest.creation_time != oldest.creation_time {
            // The unique oldest; the others will be put into ResourceConflict
            // as they get reconciled.
            return Ok(());
        }
        if this_ref == *oldest && rt.resource.is_ready() {
            return Ok(());
        }
        Err(OperatorError::ResourceConflict(format!("Managed by {}", oldest)))
    }

    async fn reconcile_finalizer(&self, rt: &mut ReconcilableTopic) -> Result<()> {
        let want = self.config.use_finalizer;
        let has = rt.resource.has_finalizer(FINALIZER);
        if want == has {
            return Ok(());
        }
        let edit = if want {
            MetadataEdit::AddFinalizer
        } else {
            MetadataEdit::RemoveFinalizer
        };
        debug!(resource = %rt.kube_ref(), ?edit, "Reconciling finalizer");
        let timer = Instant::now();
        let updated = self.store.edit_metadata(&rt.resource, edit).await?;
        self.metrics.record_external_request("edit_metadata", timer.elapsed());
        rt.resource = updated;
        Ok(())
    }

    /// Issue the two describe calls concurrently and join them per topic;
    /// the first error encountered on either side becomes the item's error.
    async fn describe_topics_state(
        &self,
        items: &BTreeMap<KubeRef, ReconcilableTopic>,
        candidates: &[KubeRef],
    ) -> Result<PartitionedByError<KubeRef, TopicState>> {
        if candidates.is_empty() {
            return Ok(PartitionedByError::empty());
        }
        let names: Vec<String> = candidates
            .iter()
            .map(|kref| items[kref].topic_name().to_string())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        debug!(topics = ?names, "Admin.describe_topics / Admin.describe_configs");
        let timer = Instant::now();
        let (descriptions, configs) = futures::join!(
            self.admin.describe_topics(&names),
            self.admin.describe_configs(&names)
        );
        let mut descriptions = descriptions?;
        let mut configs = configs?;
        self.metrics.record_external_request("describe_topics", timer.elapsed());
        self.metrics.record_external_request("describe_configs", timer.elapsed());

        let joined: Vec<(KubeRef, std::result::Result<TopicState, OperatorError>)> = candidates
            .iter()
            .map(|kref| {
                let name = items[kref].topic_name();
                let result = match (descriptions.remove(name), configs.remove(name)) {
                    (Some(Ok(description)), Some(Ok(configs))) => {
                        Ok(TopicState { description, configs })
                    }
                    (Some(Err(e)), _) => Err(e.into()),
                    (_, Some(Err(e))) => Err(e.into()),
                    _ => Err(OperatorError::Internal(format!(
                        "Admin client returned no result for topic {}",
                        name
                    ))),
                };
                (kref.clone(), result)
            })
            .collect();
        Ok(PartitionedByError::from_results(joined))
    }

    /// Recreate topics whose describe failed with UnknownTopicOrPartition.
    /// TopicExists coming back from the create is a success: the next
    /// reconciliation picks up the actual state.
    async fn create_missing_topics(
        &self,
        items: &mut BTreeMap<KubeRef, ReconcilableTopic>,
        results: &mut BTreeMap<KubeRef, Outcome>,
        current_states: &PartitionedByError<KubeRef, TopicState>,
    ) -> Result<()> {
        let mut missing: Vec<KubeRef> = Vec::new();
        for (kref, err) in current_states.errors() {
            let unknown = matches!(
                err,
                OperatorError::KafkaError {
                    kind: KafkaApiKind::UnknownTopicOrPartition,
                    ..
                }
            );
            if unknown {
                missing.push(kref.clone());
            } else {
                put_result(results, kref.clone(), Err(err.clone()));
            }
        }
        if missing.is_empty() {
            return Ok(());
        }

        // A bad config value fails the item before the admin call.
        let mut requests: Vec<NewTopicRequest> = Vec::new();
        for kref in &missing {
            let rt = &items[kref];
            match build_new_topic(&rt.resource, rt.topic_name()) {
                Ok(request) => requests.push(request),
                Err(e) => put_result(results, kref.clone(), Err(e)),
            }
        }
        if requests.is_empty() {
            return Ok(());
        }
        let submitted: BTreeSet<String> = requests.iter().map(|r| r.name.clone()).collect();

        debug!(topics = ?submitted, "Admin.create_topics");
        let timer = Instant::now();
        let mut created = self.admin.create_topics(&requests).await?;
        self.metrics.record_external_request("create_topics", timer.elapsed());

        for kref in missing {
            let rt = items.get_mut(&kref).expect("item in batch");
            if !submitted.contains(rt.topic_name()) {
                continue;
            }
            let outcome: Outcome = match created.remove(rt.topic_name()) {
                Some(Ok(topic)) => {
                    rt.resource.status = Some(KafkaTopicStatus {
                        topic_id: Some(topic.topic_id),
                        ..Default::default()
                    });
                    Ok(())
                }
                Some(Err(e)) if e.is_kind(&KafkaApiKind::TopicExists) => Ok(()),
                Some(Err(e)) => Err(e.into()),
                None => Err(OperatorError::Internal(format!(
                    "Admin client returned no result for topic {}",
                    rt.topic_name()
                ))),
            };
            put_result(results, kref, outcome);
        }
        Ok(())
    }

    fn config_changes(
        &self,
        items: &BTreeMap<KubeRef, ReconcilableTopic>,
        results: &mut BTreeMap<KubeRef, Outcome>,
        current_states: &PartitionedByError<KubeRef, TopicState>,
    ) -> Vec<(KubeRef, String, Vec<AlterConfigOp>)> {
        let mut some_alter_configs = Vec::new();
        for (kref, state) in current_states.ok() {
            let rt = &items[kref];
            match build_alter_config_ops(
                &rt.resource,
                &state.configs,
                &self.config.alterable_topic_config,
            ) {
                Ok(ops) if ops.is_empty() => {
                    debug!(resource = %kref, "No config change");
                    put_result(results, kref.clone(), Ok(()));
                }
                Ok(ops) => {
                    debug!(resource = %kref, ?ops, "Config changes");
                    some_alter_configs.push((kref.clone(), rt.topic_name().to_string(), ops));
                }
                Err(e) => put_result(results, kref.clone(), Err(e)),
            }
        }
        some_alter_configs
    }

    async fn alter_configs(
        &self,
        some_alter_configs: Vec<(KubeRef, String, Vec<AlterConfigOp>)>,
    ) -> Result<PartitionedByError<KubeRef, ()>> {
        if some_alter_configs.is_empty() {
            return Ok(PartitionedByError::empty());
        }
        let request: BTreeMap<String, Vec<AlterConfigOp>> = some_alter_configs
            .iter()
            .map(|(_, name, ops)| (name.clone(), ops.clone()))
            .collect();
        debug!(topics = ?request.keys().collect::<Vec<_>>(), "Admin.incremental_alter_configs");
        let timer = Instant::now();
        let mut altered = self.admin.incremental_alter_configs(&request).await?;
        self.metrics
            .record_external_request("incremental_alter_configs", timer.elapsed());

        let joined = some_alter_configs
            .into_iter()
            .map(|(kref, name, _)| {
                let result = match altered.remove(&name) {
                    Some(Ok(())) => Ok(()),
                    Some(Err(e)) => Err(e.into()),
                    None => Err(OperatorError::Internal(format!(
                        "Admin client returned no result for topic {}",
                        name
                    ))),
                };
                (kref, result)
            })
            .collect::<Vec<_>>();
        Ok(PartitionedByError::from_results(joined))
    }

    async fn create_partitions(
        &self,
        some_create_partitions: Vec<(KubeRef, String, i32)>,
    ) -> Result<PartitionedByError<KubeRef, ()>> {
        if some_create_partitions.is_empty() {
            return Ok(PartitionedByError::empty());
        }
        let request: BTreeMap<String, i32> = some_create_partitions
            .iter()
            .map(|(_, name, target)| (name.clone(), *target))
            .collect();
        debug!(increases = ?request, "Admin.create_partitions");
        let timer = Instant::now();
        let mut grown = self.admin.create_partitions(&request).await?;
        self.metrics
            .record_external_request("create_partitions", timer.elapsed());

        let joined = some_create_partitions
            .into_iter()
            .map(|(kref, name, _)| {
                let result = match grown.remove(&name) {
                    Some(Ok(())) => Ok(()),
                    Some(Err(e)) => Err(e.into()),
                    None => Err(OperatorError::Internal(format!(
                        "Admin client returned no result for topic {}",
                        name
                    ))),
                };
                (kref, result)
            })
            .collect::<Vec<_>>();
        Ok(PartitionedByError::from_results(joined))
    }

    /// Reconcile replication-factor changes for the batch.
    ///
    /// With the rebalancer enabled: detect genuine mismatches (reassignments
    /// already converging to the desired factor are pseudo-mismatches and
    /// excluded), submit new and pending changes, poll ongoing ones, and stop
    /// tracking changes that completed or were reverted. Without it, every
    /// detected mismatch is refused as unsupported.
    async fn check_replicas_changes(
        &self,
        items: &mut BTreeMap<KubeRef, ReconcilableTopic>,
        batch_refs: &[KubeRef],
        current_states: &PartitionedByError<KubeRef, TopicState>,
    ) -> Result<PartitionedByError<KubeRef, ()>> {
        let different_rf = self.find_different_rf(items, current_states).await?;
        let mut outcomes: Vec<(KubeRef, Outcome)> = different_rf
            .errors()
            .iter()
            .map(|(kref, e)| (kref.clone(), Err(e.clone())))
            .collect();

        if let (true, Some(rebalance)) =
            (self.config.cruise_control_enabled, self.rebalance.as_ref())
        {
            let different_names: BTreeSet<String> = different_rf
                .ok()
                .iter()
                .map(|(kref, _)| items[kref].topic_name().to_string())
                .collect();

            let mut pending: Vec<KubeRef> = Vec::new();
            let mut ongoing: Vec<KubeRef> = Vec::new();
            for kref in batch_refs {
                match items[kref].resource.replicas_change() {
                    Some(change) if change.is_pending() => pending.push(kref.clone()),
                    Some(change) if change.is_ongoing() => ongoing.push(kref.clone()),
                    _ => {}
                }
            }
            let brand_new: Vec<KubeRef> = different_rf
                .ok()
                .iter()
                .filter(|(kref, _)| items[kref].resource.replicas_change().is_none())
                .map(|(kref, _)| kref.clone())
                .collect();

            let mut to_request = pending.clone();
            to_request.extend(brand_new);
            self.warn_too_large_min_isr(items, &to_request).await?;

            let mut touched: BTreeSet<KubeRef> = BTreeSet::new();

            if !to_request.is_empty() {
                let request: Vec<ReconcilableTopic> =
                    to_request.iter().map(|kref| items[kref].clone()).collect();
                let timer = Instant::now();
                let updated = rebalance.request_pending_changes(request).await?;
                self.metrics
                    .record_external_request("request_pending_changes", timer.elapsed());
                apply_replicas_changes(items, &mut touched, updated);
            }
            if !ongoing.is_empty() {
                let request: Vec<ReconcilableTopic> =
                    ongoing.iter().map(|kref| items[kref].clone()).collect();
                let timer = Instant::now();
                let updated = rebalance.request_ongoing_changes(request).await?;
                self.metrics
                    .record_external_request("request_ongoing_changes", timer.elapsed());
                apply_replicas_changes(items, &mut touched, updated);
            }

            // A pending change whose factor no longer mismatches has
            // completed, or was reverted when it carries a failure message;
            // either way stop tracking it.
            for kref in &pending {
                let topic_name = items[kref].topic_name().to_string();
                if different_names.contains(&topic_name) {
                    continue;
                }
                let rt = items.get_mut(kref).expect("item in batch");
                let reverted = rt
                    .resource
                    .replicas_change()
                    .map(|change| change.is_failed())
                    .unwrap_or(false);
                debug!(resource = %kref, topic = %topic_name, reverted, "Pending but completed replicas change");
                if let Some(status) = rt.resource.status.as_mut() {
                    status.replicas_change = None;
                }
                touched.insert(kref.clone());
            }

            for kref in touched {
                outcomes.push((kref, Ok(())));
            }
        } else {
            for (kref, state) in different_rf.ok() {
                let rt = &items[kref];
                let desired = rt.resource.spec.replicas.unwrap_or(BROKER_DEFAULT);
                let partitions = state.partitions_with_different_rf_than(desired);
                outcomes.push((
                    kref.clone(),
                    Err(OperatorError::NotSupported(format!(
                        "Replication factor change not supported, but required for partitions {:?}",
                        partitions
                    ))),
                ));
            }
        }

        Ok(PartitionedByError::from_results(outcomes))
    }

    async fn find_different_rf(
        &self,
        items: &BTreeMap<KubeRef, ReconcilableTopic>,
        current_states: &PartitionedByError<KubeRef, TopicState>,
    ) -> Result<PartitionedByError<KubeRef, TopicState>> {
        let apparently_different: Vec<(KubeRef, TopicState)> = current_states
            .ok()
            .iter()
            .filter(|(kref, state)| match items[kref].resource.spec.replicas {
                Some(desired) => state.unique_replication_factor() != Some(desired),
                None => false,
            })
            .cloned()
            .collect();
        self.filter_by_reassignment_target_replicas(items, apparently_different)
            .await
    }

    /// Exclude pseudo-mismatches: partitions whose in-progress reassignment
    /// already converges to the desired factor. Without this, an in-flight
    /// reassignment would be re-submitted on every reconciliation.
    async fn filter_by_reassignment_target_replicas(
        &self,
        items: &BTreeMap<KubeRef, ReconcilableTopic>,
        apparently_different: Vec<(KubeRef, TopicState)>,
    ) -> Result<PartitionedByError<KubeRef, TopicState>> {
        if apparently_different.is_empty() {
            return Ok(PartitionedByError::empty());
        }
        let mut mismatched_partitions: Vec<TopicPartition> = Vec::new();
        for (kref, state) in &apparently_different {
            let rt = &items[kref];
            let desired = rt.resource.spec.replicas.unwrap_or(BROKER_DEFAULT);
            for partition in &state.description.partitions {
                if partition.replicas.len() as i32 != desired {
                    mismatched_partitions
                        .push(TopicPartition::new(rt.topic_name(), partition.partition));
                }
            }
        }

        debug!(partitions = ?mismatched_partitions, "Admin.list_partition_reassignments");
        let timer = Instant::now();
        let listed = self
            .admin
            .list_partition_reassignments(&mismatched_partitions)
            .await;
        self.metrics
            .record_external_request("list_partition_reassignments", timer.elapsed());
        let reassignments = match listed {
            Ok(reassignments) => reassignments,
            Err(e) if e.is_interrupted() => return Err(e),
            Err(e) => {
                // the whole listing failed, so every candidate is errored
                return Ok(PartitionedByError::from_results(
                    apparently_different
                        .into_iter()
                        .map(|(kref, _)| (kref, Err(e.clone()))),
                ));
            }
        };

        let genuinely_different = apparently_different
            .into_iter()
            .filter(|(kref, state)| {
                let rt = &items[kref];
                let desired = rt.resource.spec.replicas.unwrap_or(BROKER_DEFAULT);
                state.description.partitions.iter().any(|partition| {
                    if partition.replicas.len() as i32 == desired {
                        return false;
                    }
                    let tp = TopicPartition::new(rt.topic_name(), partition.partition);
                    reassignments
                        .get(&tp)
                        .map(|reassignment| reassignment.target_replication_factor())
                        != Some(desired)
                })
            })
            .map(|(kref, state)| (kref, Ok(state)))
            .collect::<Vec<_>>();
        Ok(PartitionedByError::from_results(genuinely_different))
    }

    /// The rebalancer permits scaling the factor below `min.insync.replicas`,
    /// which can disrupt producers with acks=all; the broker roller silently
    /// ignores such topics. Warn, never block.
    async fn warn_too_large_min_isr(
        &self,
        items: &BTreeMap<KubeRef, ReconcilableTopic>,
        candidates: &[KubeRef],
    ) -> Result<()> {
        if self.config.skip_cluster_config_review || candidates.is_empty() {
            return Ok(());
        }
        let cluster_min_isr = match self.admin.describe_cluster_config(MIN_INSYNC_REPLICAS).await {
            Ok(value) => value,
            Err(e) if e.is_interrupted() => return Err(e),
            Err(e) => {
                warn!(error = %e, "Failed to fetch cluster {}", MIN_INSYNC_REPLICAS);
                None
            }
        };
        for kref in candidates {
            let rt = &items[kref];
            let target_rf = match rt.resource.spec.replicas {
                Some(target_rf) => target_rf,
                None => continue,
            };
            let topic_min_isr = rt
                .resource
                .spec
                .config
                .as_ref()
                .and_then(|config| config.get(MIN_INSYNC_REPLICAS))
                .and_then(|value| {
                    value
                        .as_i64()
                        .map(|n| n as i32)
                        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
                });
            let min_isr = topic_min_isr
                .or_else(|| cluster_min_isr.as_deref().and_then(|v| v.parse().ok()))
                .unwrap_or(1);
            if target_rf < min_isr {
                warn!(
                    resource = %kref,
                    target_rf,
                    min_isr,
                    "The target replication factor is below the configured {}",
                    MIN_INSYNC_REPLICAS
                );
            }
        }
        Ok(())
    }

    async fn update_status_for_success(&self, rt: &mut ReconcilableTopic) -> Result<()> {
        let condition_type = if !rt.resource.is_managed() {
            CONDITION_UNMANAGED
        } else if rt.resource.is_paused() {
            CONDITION_PAUSED
        } else {
            CONDITION_READY
        };
        let mut conditions = vec![true_condition(condition_type)];
        self.add_non_alterable_configs_warning(rt, &mut conditions);

        let mut status = rt.resource.status.clone().unwrap_or_default();
        status.conditions = conditions;
        rt.resource.status = Some(status);
        self.update_status(rt).await?;
        self.metrics.successful_reconciliation();
        Ok(())
    }

    fn add_non_alterable_configs_warning(
        &self,
        rt: &ReconcilableTopic,
        conditions: &mut Vec<Condition>,
    ) {
        let config = match rt.resource.spec.config.as_ref() {
            Some(config) if !config.is_empty() => config,
            _ => return,
        };
        let read_only = self
            .config
            .alterable_topic_config
            .non_alterable_keys(config.keys());
        if !read_only.is_empty() {
            warn!(
                resource = %rt.kube_ref(),
                keys = ?read_only,
                "Some .spec.config properties are not configurable"
            );
            conditions.push(not_configurable_condition(&read_only));
        }
    }

    async fn update_status_for_error(
        &self,
        rt: &mut ReconcilableTopic,
        err: OperatorError,
    ) -> Result<()> {
        warn!(resource = %rt.kube_ref(), error = %err, "Reconciliation failed");
        let mut status = rt.resource.status.clone().unwrap_or_default();
        status.conditions = vec![error_condition(err.reason(), &err.to_string())];
        rt.resource.status = Some(status);
        self.update_status(rt).await?;
        self.metrics.failed_reconciliation();
        Ok(())
    }

    /// Finish and write the status: observedGeneration marks that the
    /// operator saw the last update, topicName is set once and never changes
    /// while the resource stays managed. The write is skipped when the stored
    /// status already matches, and a write failure is logged and swallowed;
    /// the next reconciliation reattempts it.
    async fn update_status(&self, rt: &mut ReconcilableTopic) -> Result<()> {
        let namespace = rt.resource.namespace().unwrap_or_default();
        let name = rt.resource.name_any();
        let stored = match self.store.get(&namespace, &name).await {
            Ok(Some(stored)) => stored,
            Ok(None) => {
                debug!(resource = %rt.kube_ref(), "Resource is gone, skipping status update");
                return Ok(());
            }
            Err(e) if e.is_interrupted() => return Err(e),
            Err(e) => {
                error!(resource = %rt.kube_ref(), error = %e, "Status update failed");
                return Ok(());
            }
        };
        let old_status = stored.status;

        let is_managed = rt.resource.is_managed();
        let derived_name = rt.topic_name().to_string();
        let mut status = rt.resource.status.take().unwrap_or_default();
        status.observed_generation = rt.resource.metadata.generation;
        status.topic_name = if !is_managed {
            None
        } else {
            old_status
                .as_ref()
                .and_then(|old| old.topic_name.clone())
                .or(Some(derived_name))
        };
        let differs = status_differs(old_status.as_ref(), &status);
        rt.resource.status = Some(status);
        if !differs {
            return Ok(());
        }

        debug!(resource = %rt.kube_ref(), status = ?rt.resource.status, "Updating status");
        let timer = Instant::now();
        match self.store.update_status(&rt.resource).await {
            Ok(updated) => {
                self.metrics
                    .record_external_request("update_status", timer.elapsed());
                debug!(
                    resource = %rt.kube_ref(),
                    observed_generation = ?updated.status.as_ref().and_then(|s| s.observed_generation),
                    "Updated status"
                );
            }
            Err(e) if e.is_interrupted() => return Err(e),
            Err(e) => {
                error!(resource = %rt.kube_ref(), error = %e, "Status update failed");
            }
        }
        Ok(())
    }
}

/// Copy the replicas-change statuses the rebalancer returned back onto the
/// batch items.
fn apply_replicas_changes(
    items: &mut BTreeMap<KubeRef, ReconcilableTopic>,
    touched: &mut BTreeSet<KubeRef>,
    updated: Vec<ReconcilableTopic>,
) {
    for returned in updated {
        let kref = returned.kube_ref();
        if let Some(item) = items.get_mut(&kref) {
            let change = returned
                .resource
                .status
                .as_ref()
                .and_then(|status| status.replicas_change.clone());
            item.resource
                .status
                .get_or_insert_with(Default::default)
                .replicas_change = change;
            touched.insert(kref);
        }
    }
}

/// Whether every selector entry is present and equal in the resource labels.
fn matches_selector(
    selector: &BTreeMap<String, String>,
    labels: &BTreeMap<String, String>,
) -> bool {
    selector
        .iter()
        .all(|(key, value)| labels.get(key) == Some(value))
}

fn validate_unchanged_topic_name(rt: &ReconcilableTopic) -> Outcome {
    if let Some(status_name) = rt
        .resource
        .status
        .as_ref()
        .and_then(|status| status.topic_name.as_deref())
    {
        if status_name != rt.topic_name() {
            return Err(OperatorError::NotSupported(
                "Changing spec.topicName is not supported".to_string(),
            ));
        }
    }
    Ok(())
}

/// Record an item outcome; errors win, and the first error is kept.
fn put_result(results: &mut BTreeMap<KubeRef, Outcome>, kref: KubeRef, result: Outcome) {
    let errored = matches!(results.get(&kref), Some(Err(_)));
    if !errored {
        results.insert(kref, result);
    }
}

fn accumulate_results(
    results: &mut BTreeMap<KubeRef, Outcome>,
    partitioned: PartitionedByError<KubeRef, ()>,
) {
    for (kref, _) in partitioned.ok() {
        put_result(results, kref.clone(), Ok(()));
    }
    for (kref, err) in partitioned.errors() {
        put_result(results, kref.clone(), Err(err.clone()));
    }
}

fn build_new_topic(topic: &KafkaTopic, topic_name: &str) -> Result<NewTopicRequest> {
    Ok(NewTopicRequest {
        name: topic_name.to_string(),
        partitions: topic.spec.partitions.unwrap_or(BROKER_DEFAULT),
        replicas: topic.spec.replicas.unwrap_or(BROKER_DEFAULT),
        configs: build_configs_map(topic)?,
    })
}

fn build_configs_map(topic: &KafkaTopic) -> Result<BTreeMap<String, String>> {
    let mut configs = BTreeMap::new();
    if let Some(config) = topic.spec.config.as_ref() {
        for (key, value) in config {
            configs.insert(key.clone(), config_value_as_string(key, value)?);
        }
    }
    Ok(configs)
}

/// Stringify a `.spec.config` value: scalars take their natural string form,
/// lists are joined with commas, anything else is an invalid resource.
fn config_value_as_string(key: &str, value: &serde_json::Value) -> Result<String> {
    match value {
        serde_json::Value::String(s) => Ok(s.clone()),
        serde_json::Value::Bool(b) => Ok(b.to_string()),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        serde_json::Value::Array(values) => {
            let parts: Result<Vec<String>> = values
                .iter()
                .map(|element| config_value_as_string(key, element))
                .collect();
            Ok(parts?.join(","))
        }
        other => Err(OperatorError::InvalidResource(format!(
            "Invalid value for topic config '{}': {}",
            key, other
        ))),
    }
}

/// Diff the declared config against the current one: SET what differs,
/// DELETE dynamic topic entries absent from the spec, then drop whatever the
/// alterable-config policy forbids.
fn build_alter_config_ops(
    topic: &KafkaTopic,
    current: &TopicConfigs,
    policy: &AlterableTopicConfig,
) -> Result<Vec<AlterConfigOp>> {
    let mut ops = Vec::new();
    if let Some(config) = topic.spec.config.as_ref() {
        for (key, value) in config {
            let desired = config_value_as_string(key, value)?;
            let matches = current
                .get(key)
                .map(|entry| entry.value == desired)
                .unwrap_or(false);
            if !matches {
                ops.push(AlterConfigOp::Set {
                    key: key.clone(),
                    value: desired,
                });
            }
        }
    }

    let spec_keys: BTreeSet<&String> = topic
        .spec
        .config
        .as_ref()
        .map(|config| config.keys().collect())
        .unwrap_or_default();
    for key in current.dynamic_topic_keys() {
        if !spec_keys.contains(key) {
            ops.push(AlterConfigOp::Delete { key: key.clone() });
        }
    }

    if !matches!(policy, AlterableTopicConfig::All) {
        ops.retain(|op| policy.is_alterable(op.key()));
    }
    Ok(ops)
}

fn partition_changes(
    items: &BTreeMap<KubeRef, ReconcilableTopic>,
    results: &mut BTreeMap<KubeRef, Outcome>,
    current_states: &PartitionedByError<KubeRef, TopicState>,
) -> Vec<(KubeRef, String, i32)> {
    let mut some_create_partitions = Vec::new();
    for (kref, state) in current_states.ok() {
        let rt = &items[kref];
        match build_partition_increase(&rt.resource, state.num_partitions()) {
            Ok(Some(target)) => {
                debug!(
                    resource = %kref,
                    from = state.num_partitions(),
                    to = target,
                    "Partition increase"
                );
                some_create_partitions.push((kref.clone(), rt.topic_name().to_string(), target));
            }
            Ok(None) => {
                debug!(resource = %kref, "No partition change");
                put_result(results, kref.clone(), Ok(()));
            }
            Err(e) => put_result(results, kref.clone(), Err(e)),
        }
    }
    some_create_partitions
}

fn build_partition_increase(topic: &KafkaTopic, current: i32) -> Result<Option<i32>> {
    let requested = topic.spec.partitions.unwrap_or(BROKER_DEFAULT);
    if requested > current {
        Ok(Some(requested))
    } else if requested != BROKER_DEFAULT && requested < current {
        Err(OperatorError::NotSupported(
            "Decreasing partitions not supported".to_string(),
        ))
    } else {
        Ok(None)
    }
}

/// Compare statuses ignoring condition transition timestamps, which are
/// rebuilt on every pass.
fn status_differs(old: Option<&KafkaTopicStatus>, new: &KafkaTopicStatus) -> bool {
    match old {
        None => true,
        Some(old) => normalized_status(old) != normalized_status(new),
    }
}

fn normalized_status(status: &KafkaTopicStatus) -> serde_json::Value {
    let mut value = serde_json::to_value(status).unwrap_or(serde_json::Value::Null);
    if let Some(conditions) = value.get_mut("conditions").and_then(|c| c.as_array_mut()) {
        for condition in conditions {
            if let Some(object) = condition.as_object_mut() {
                object.remove("lastTransitionTime");
            }
        }
    }
    value
}
