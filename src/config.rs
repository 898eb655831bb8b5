//! Operator configuration
//!
//! The configuration loader (env/CLI) lives with the deployment harness; this
//! module only defines the knobs the controller consumes.

use std::collections::{BTreeMap, BTreeSet};

/// Which topic config keys users may alter through `.spec.config`.
///
/// Parsed from the `alterableTopicConfig` knob: `"ALL"` (no restriction,
/// the default), `"NONE"` (every key is read-only), or a comma-separated
/// allow-list. Useful in standalone mode against Kafka services that restrict
/// alter operations to a subset of topic configurations.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AlterableTopicConfig {
    /// Any key may be altered
    #[default]
    All,
    /// No key may be altered
    None,
    /// Only the listed keys may be altered
    AllowList(BTreeSet<String>),
}

impl AlterableTopicConfig {
    /// Parse the knob value. Blank input means no restriction.
    pub fn parse(value: &str) -> Self {
        let trimmed = value.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("ALL") {
            AlterableTopicConfig::All
        } else if trimmed.eq_ignore_ascii_case("NONE") {
            AlterableTopicConfig::None
        } else {
            AlterableTopicConfig::AllowList(
                trimmed
                    .split(',')
                    .map(|key| key.trim().to_string())
                    .filter(|key| !key.is_empty())
                    .collect(),
            )
        }
    }

    /// Whether `key` may be altered under this policy.
    pub fn is_alterable(&self, key: &str) -> bool {
        match self {
            AlterableTopicConfig::All => true,
            AlterableTopicConfig::None => false,
            AlterableTopicConfig::AllowList(keys) => keys.contains(key),
        }
    }

    /// The subset of `keys` that is read-only under this policy, in input order.
    pub fn non_alterable_keys<'a, I>(&self, keys: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a String>,
    {
        keys.into_iter()
            .filter(|key| !self.is_alterable(key))
            .cloned()
            .collect()
    }
}

/// Knobs consumed by the batching topic controller
#[derive(Debug, Clone)]
pub struct TopicOperatorConfig {
    /// Namespace whose KafkaTopic resources are reconciled
    pub namespace: String,

    /// Only resources whose labels match every entry are reconciled
    pub label_selector: BTreeMap<String, String>,

    /// Guard deletion with the operator finalizer
    pub use_finalizer: bool,

    /// Skip the startup `auto.create.topics.enable` warning and the
    /// `min.insync.replicas` lookup
    pub skip_cluster_config_review: bool,

    /// Record a duration histogram around every admin call
    pub enable_additional_metrics: bool,

    /// Delegate replication-factor changes to Cruise Control
    pub cruise_control_enabled: bool,

    /// Which `.spec.config` keys users may alter
    pub alterable_topic_config: AlterableTopicConfig,
}

impl Default for TopicOperatorConfig {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            label_selector: BTreeMap::new(),
            use_finalizer: true,
            skip_cluster_config_review: false,
            enable_additional_metrics: false,
            cruise_control_enabled: false,
            alterable_topic_config: AlterableTopicConfig::All,
        }
    }
}
