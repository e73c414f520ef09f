use async_trait::async_trait;
use sqlx::PgPool;

use fem_model::{FeatureEntity, FeatureFile, FeatureUrn, TenantId};

use super::rows::FeatureRow;
use crate::{
    database::ports::FeatureRepository,
    error::{FemError, Result},
};

pub(crate) const FEATURE_COLUMNS: &str = "urn, provider_id, session_owner, session, files, \
     dissemination_info, dissemination_pending, creation_date, last_update";

#[derive(Clone, Debug)]
pub struct PostgresFeatureRepository {
    pool: PgPool,
}

impl PostgresFeatureRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl FeatureRepository for PostgresFeatureRepository {
    async fn find_by_urns(
        &self,
        tenant: &TenantId,
        urns: &[FeatureUrn],
    ) -> Result<Vec<FeatureEntity>> {
        if urns.is_empty() {
            return Ok(Vec::new());
        }
        let urns: Vec<String> = urns.iter().map(ToString::to_string).collect();
        let rows: Vec<FeatureRow> = sqlx::query_as(&format!(
            "SELECT {FEATURE_COLUMNS} FROM features WHERE tenant = $1 AND urn = ANY($2)"
        ))
        .bind(tenant.as_str())
        .bind(urns)
        .fetch_all(self.pool())
        .await
        .map_err(FemError::database("find features by urn"))?;
        rows.into_iter().map(FeatureEntity::try_from).collect()
    }

    async fn insert_feature(
        &self,
        tenant: &TenantId,
        feature: &FeatureEntity,
    ) -> Result<bool> {
        let files = serde_json::to_value(&feature.files)?;
        let dissemination_info =
            serde_json::to_value(&feature.dissemination_info)?;
        let result = sqlx::query(
            r#"
            INSERT INTO features (
                tenant, urn, provider_id, session_owner, session, files,
                dissemination_info, dissemination_pending, creation_date, last_update
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (tenant, urn) DO NOTHING
            "#,
        )
        .bind(tenant.as_str())
        .bind(feature.urn.to_string())
        .bind(&feature.provider_id)
        .bind(&feature.session_owner)
        .bind(&feature.session)
        .bind(files)
        .bind(dissemination_info)
        .bind(feature.dissemination_pending)
        .bind(feature.creation_date)
        .bind(feature.last_update)
        .execute(self.pool())
        .await
        .map_err(FemError::database("insert feature"))?;
        Ok(result.rows_affected() == 1)
    }

    async fn update_files(
        &self,
        tenant: &TenantId,
        urn: &FeatureUrn,
        files: &[FeatureFile],
    ) -> Result<()> {
        let files = serde_json::to_value(files)?;
        sqlx::query(
            r#"
            UPDATE features SET files = $3, last_update = NOW()
            WHERE tenant = $1 AND urn = $2
            "#,
        )
        .bind(tenant.as_str())
        .bind(urn.to_string())
        .bind(files)
        .execute(self.pool())
        .await
        .map_err(FemError::database("update feature files"))?;
        Ok(())
    }

    async fn delete_by_urns(
        &self,
        tenant: &TenantId,
        urns: &[FeatureUrn],
    ) -> Result<u64> {
        if urns.is_empty() {
            return Ok(0);
        }
        let urns: Vec<String> = urns.iter().map(ToString::to_string).collect();
        let result =
            sqlx::query("DELETE FROM features WHERE tenant = $1 AND urn = ANY($2)")
                .bind(tenant.as_str())
                .bind(urns)
                .execute(self.pool())
                .await
                .map_err(FemError::database("delete features"))?;
        Ok(result.rows_affected())
    }

    async fn count_features(&self, tenant: &TenantId) -> Result<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM features WHERE tenant = $1")
                .bind(tenant.as_str())
                .fetch_one(self.pool())
                .await
                .map_err(FemError::database("count features"))?;
        Ok(count.max(0) as u64)
    }
}
