use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use fem_model::TenantId;

use crate::error::Result;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct LeaseId(pub Uuid);

impl Default for LeaseId {
    fn default() -> Self {
        Self::new()
    }
}

impl LeaseId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

/// Exclusive, time-bounded claim on one tenant's named job.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LeaseToken {
    pub lease_id: LeaseId,
    pub tenant: TenantId,
    pub name: String,
    pub owner: String,
    pub expires_at: DateTime<Utc>,
}

impl LeaseToken {
    pub fn new(
        tenant: TenantId,
        name: impl Into<String>,
        owner: impl Into<String>,
        ttl: chrono::Duration,
    ) -> Self {
        Self {
            lease_id: LeaseId::new(),
            tenant,
            name: name.into(),
            owner: owner.into(),
            expires_at: Utc::now() + ttl,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

#[async_trait]
pub trait TenantLease: Send + Sync {
    /// Returns `None` when another holder owns an unexpired lease.
    async fn acquire(
        &self,
        tenant: &TenantId,
        name: &str,
        owner: &str,
        ttl: chrono::Duration,
    ) -> Result<Option<LeaseToken>>;

    /// Releasing an expired or stolen lease is a no-op.
    async fn release(&self, token: &LeaseToken) -> Result<()>;
}
