use async_trait::async_trait;

use fem_model::{FeatureEntity, FeatureFile, FeatureUrn, TenantId};

use crate::error::Result;

#[async_trait]
pub trait FeatureRepository: Send + Sync {
    async fn find_by_urns(
        &self,
        tenant: &TenantId,
        urns: &[FeatureUrn],
    ) -> Result<Vec<FeatureEntity>>;

    /// Insert a new feature. An existing row with the same urn is kept.
    async fn insert_feature(
        &self,
        tenant: &TenantId,
        feature: &FeatureEntity,
    ) -> Result<bool>;

    /// Keyed update of a feature's files. Dissemination records are untouched.
    async fn update_files(
        &self,
        tenant: &TenantId,
        urn: &FeatureUrn,
        files: &[FeatureFile],
    ) -> Result<()>;

    async fn delete_by_urns(
        &self,
        tenant: &TenantId,
        urns: &[FeatureUrn],
    ) -> Result<u64>;

    async fn count_features(&self, tenant: &TenantId) -> Result<u64>;
}
