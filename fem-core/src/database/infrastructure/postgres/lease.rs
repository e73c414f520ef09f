use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use tracing::debug;

use fem_model::TenantId;

use crate::{
    database::ports::{LeaseToken, TenantLease},
    error::{FemError, Result},
};

/// Lease row per (tenant, name). An expired row can be taken over by the
/// next caller.
#[derive(Clone, Debug)]
pub struct PostgresTenantLease {
    pool: PgPool,
}

impl PostgresTenantLease {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TenantLease for PostgresTenantLease {
    async fn acquire(
        &self,
        tenant: &TenantId,
        name: &str,
        owner: &str,
        ttl: chrono::Duration,
    ) -> Result<Option<LeaseToken>> {
        let token = LeaseToken::new(tenant.clone(), name, owner, ttl);
        let acquired: Option<uuid::Uuid> = sqlx::query_scalar(
            r#"
            INSERT INTO tenant_leases (tenant, name, lease_id, owner, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (tenant, name) DO UPDATE
            SET lease_id = EXCLUDED.lease_id,
                owner = EXCLUDED.owner,
                expires_at = EXCLUDED.expires_at
            WHERE tenant_leases.expires_at <= $6
            RETURNING lease_id
            "#,
        )
        .bind(tenant.as_str())
        .bind(name)
        .bind(token.lease_id.0)
        .bind(owner)
        .bind(token.expires_at)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(FemError::database("acquire tenant lease"))?;

        match acquired {
            Some(id) if id == token.lease_id.0 => Ok(Some(token)),
            _ => {
                debug!(%tenant, lease = name, "lease busy");
                Ok(None)
            }
        }
    }

    async fn release(&self, token: &LeaseToken) -> Result<()> {
        sqlx::query(
            "DELETE FROM tenant_leases WHERE tenant = $1 AND name = $2 AND lease_id = $3",
        )
        .bind(token.tenant.as_str())
        .bind(&token.name)
        .bind(token.lease_id.0)
        .execute(&self.pool)
        .await
        .map_err(FemError::database("release tenant lease"))?;
        Ok(())
    }
}
