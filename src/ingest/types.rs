// src/ingest/types.rs
use anyhow::Result;

use crate::ingest::retry::RetryPolicy;
use crate::model::RawItem;

/// One source of candidate items.
///
/// `collect` either returns genuine items (possibly none) or fails; it never
/// fills in placeholder data. Engagement pre-filters run inside `collect`.
#[async_trait::async_trait]
pub trait Collector: Send + Sync {
    async fn collect(&self) -> Result<Vec<RawItem>>;

    /// Name used in logs and in the run ledger's `agent_results`.
    fn name(&self) -> &str;

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
    }
}
