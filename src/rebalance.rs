//! Rebalancer client façade
//!
//! Replication-factor changes are delegated to an external rebalancing
//! service. The controller only submits change requests and polls tracked
//! sessions; the transport lives with the deployment harness.

use crate::error::Result;
use crate::model::ReconcilableTopic;
use async_trait::async_trait;

/// Request/poll API of the external rebalancer.
///
/// Both operations are idempotent across controller restarts: resubmitting a
/// pending change or re-polling a finished session returns the same outcome.
/// Each returned topic carries its updated `status.replicasChange`:
/// `Pending` becomes `Ongoing` with a session id once accepted, or stays
/// `Pending` with a failure message when rejected.
#[async_trait]
pub trait RebalanceClient: Send + Sync {
    /// Submit new and pending replication-factor changes.
    async fn request_pending_changes(
        &self,
        topics: Vec<ReconcilableTopic>,
    ) -> Result<Vec<ReconcilableTopic>>;

    /// Poll the state of changes the rebalancer is already working on.
    async fn request_ongoing_changes(
        &self,
        topics: Vec<ReconcilableTopic>,
    ) -> Result<Vec<ReconcilableTopic>>;
}
