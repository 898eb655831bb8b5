//! Status condition helpers
//!
//! Constants and builder functions for the single terminal condition the
//! controller writes per reconciliation, following the Kubernetes API
//! conventions.

use crate::crd::Condition;
use chrono::Utc;

// Condition status values
pub const CONDITION_TRUE: &str = "True";
pub const CONDITION_FALSE: &str = "False";

// Terminal condition types
pub const CONDITION_READY: &str = "Ready";
pub const CONDITION_UNMANAGED: &str = "Unmanaged";
pub const CONDITION_PAUSED: &str = "ReconciliationPaused";

// Appended alongside the terminal condition when config keys were skipped
pub const CONDITION_WARNING: &str = "Warning";
pub const REASON_NOT_CONFIGURABLE: &str = "NotConfigurable";

// Finalizer guarding cluster-side deletion
pub const FINALIZER: &str = "strimzi.io/topic-operator";

/// Build a `<type>=True` terminal condition with the current timestamp.
pub fn true_condition(condition_type: &str) -> Condition {
    Condition {
        r#type: condition_type.to_string(),
        status: CONDITION_TRUE.to_string(),
        last_transition_time: Some(Utc::now().to_rfc3339()),
        reason: None,
        message: None,
    }
}

/// Build the `Ready=False` condition carrying a reconciliation error.
pub fn error_condition(reason: &str, message: &str) -> Condition {
    Condition {
        r#type: CONDITION_READY.to_string(),
        status: CONDITION_FALSE.to_string(),
        last_transition_time: Some(Utc::now().to_rfc3339()),
        reason: Some(reason.to_string()),
        message: Some(message.to_string()),
    }
}

/// Build the warning condition listing `.spec.config` keys the operator is
/// not allowed to alter.
pub fn not_configurable_condition(read_only_keys: &[String]) -> Condition {
    let message = format!(
        "These .spec.config properties are not configurable: [{}]",
        read_only_keys.join(", ")
    );
    Condition {
        r#type: CONDITION_WARNING.to_string(),
        status: CONDITION_TRUE.to_string(),
        last_transition_time: Some(Utc::now().to_rfc3339()),
        reason: Some(REASON_NOT_CONFIGURABLE.to_string()),
        message: Some(message),
    }
}
