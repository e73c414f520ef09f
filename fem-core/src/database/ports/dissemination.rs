use async_trait::async_trait;
use chrono::{DateTime, Utc};

use fem_model::{
    FeatureEntity, FeatureUpdateDisseminationRequest, FeatureUrn, TenantId,
};

use crate::error::Result;

/// An intent that was applied to an existing feature, with the session the
/// feature belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedIntent {
    pub intent: FeatureUpdateDisseminationRequest,
    pub source: String,
    pub session: String,
}

/// Result of planning one page: what to write back in the same unit of work.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PagePlan {
    /// Features whose dissemination records changed.
    pub features: Vec<FeatureEntity>,
    /// Features whose waiting requests must be released.
    pub unblock_urns: Vec<FeatureUrn>,
    pub applied: Vec<AppliedIntent>,
}

/// Pure mutation step run by the store inside a page's transaction.
pub trait PagePlanner: Send + Sync {
    fn plan(
        &self,
        intents: &[FeatureUpdateDisseminationRequest],
        features: Vec<FeatureEntity>,
        now: DateTime<Utc>,
    ) -> PagePlan;
}

/// What one committed page did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppliedPage {
    pub plan: PagePlan,
    pub intents_consumed: u64,
    pub requests_unblocked: u64,
}

#[async_trait]
pub trait DisseminationIntentRepository: Send + Sync {
    async fn save_intents(
        &self,
        tenant: &TenantId,
        intents: Vec<FeatureUpdateDisseminationRequest>,
    ) -> Result<()>;

    async fn count_intents(&self, tenant: &TenantId) -> Result<u64>;

    /// Apply the oldest page of intents created before `created_before` as
    /// one atomic unit: read intents and their features, run `planner`,
    /// write features, release waiting requests, delete the consumed
    /// intents, commit.
    ///
    /// Returns `None` once no eligible intent is left.
    async fn apply_page(
        &self,
        tenant: &TenantId,
        created_before: DateTime<Utc>,
        limit: usize,
        planner: &dyn PagePlanner,
    ) -> Result<Option<AppliedPage>>;
}
