use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::trace;
use uuid::Uuid;

use fem_model::{
    FeatureEntity, FeatureRequestStep, FeatureUpdateDisseminationRequest,
    TenantId,
};

use super::{
    features::FEATURE_COLUMNS,
    rows::{DisseminationIntentRow, FeatureRow},
};
use crate::{
    database::ports::{AppliedPage, DisseminationIntentRepository, PagePlanner},
    error::{FemError, Result},
};

/// Intent queue plus the page unit of work over features and requests.
#[derive(Clone)]
pub struct PostgresDisseminationRepository {
    pool: PgPool,
}

impl fmt::Debug for PostgresDisseminationRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresDisseminationRepository")
            .field("pool_size", &self.pool.size())
            .field("idle_connections", &self.pool.num_idle())
            .finish()
    }
}

impl PostgresDisseminationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DisseminationIntentRepository for PostgresDisseminationRepository {
    async fn save_intents(
        &self,
        tenant: &TenantId,
        intents: Vec<FeatureUpdateDisseminationRequest>,
    ) -> Result<()> {
        if intents.is_empty() {
            return Ok(());
        }
        let mut builder: QueryBuilder<'_, Postgres> = QueryBuilder::new(
            "INSERT INTO feature_dissemination_requests \
             (id, tenant, urn, recipient_label, update_type, ack_required, blocking, creation_date) ",
        );
        builder.push_values(&intents, |mut row, intent| {
            row.push_bind(intent.id.to_uuid())
                .push_bind(tenant.as_str().to_string())
                .push_bind(intent.urn.to_string())
                .push_bind(intent.recipient_label.clone())
                .push_bind(intent.update_type.as_str())
                .push_bind(intent.ack_required)
                .push_bind(intent.blocking)
                .push_bind(intent.creation_date);
        });
        builder
            .build()
            .execute(&self.pool)
            .await
            .map_err(FemError::database("insert dissemination intents"))?;
        Ok(())
    }

    async fn count_intents(&self, tenant: &TenantId) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM feature_dissemination_requests WHERE tenant = $1",
        )
        .bind(tenant.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(FemError::database("count dissemination intents"))?;
        Ok(count.max(0) as u64)
    }

    async fn apply_page(
        &self,
        tenant: &TenantId,
        created_before: DateTime<Utc>,
        limit: usize,
        planner: &dyn PagePlanner,
    ) -> Result<Option<AppliedPage>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(FemError::database("begin dissemination page tx"))?;

        let rows: Vec<DisseminationIntentRow> = sqlx::query_as(
            r#"
            SELECT id, urn, recipient_label, update_type, ack_required, blocking, creation_date
            FROM feature_dissemination_requests
            WHERE tenant = $1 AND creation_date <= $2
            ORDER BY id
            LIMIT $3
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(tenant.as_str())
        .bind(created_before)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&mut *tx)
        .await
        .map_err(FemError::database("select dissemination page"))?;

        if rows.is_empty() {
            drop(tx); // rollback implicit
            return Ok(None);
        }

        let intents = rows
            .into_iter()
            .map(FeatureUpdateDisseminationRequest::try_from)
            .collect::<Result<Vec<_>>>()?;
        let intent_ids: Vec<Uuid> =
            intents.iter().map(|intent| intent.id.to_uuid()).collect();
        let mut urns: Vec<String> =
            intents.iter().map(|intent| intent.urn.to_string()).collect();
        urns.sort();
        urns.dedup();

        let feature_rows: Vec<FeatureRow> = sqlx::query_as(&format!(
            "SELECT {FEATURE_COLUMNS} FROM features \
             WHERE tenant = $1 AND urn = ANY($2) ORDER BY urn FOR UPDATE"
        ))
        .bind(tenant.as_str())
        .bind(&urns)
        .fetch_all(&mut *tx)
        .await
        .map_err(FemError::database("lock page features"))?;
        let features = feature_rows
            .into_iter()
            .map(FeatureEntity::try_from)
            .collect::<Result<Vec<_>>>()?;

        let plan = planner.plan(&intents, features, Utc::now());

        for feature in &plan.features {
            let dissemination_info =
                serde_json::to_value(&feature.dissemination_info)?;
            sqlx::query(
                r#"
                UPDATE features
                SET dissemination_info = $3,
                    dissemination_pending = $4,
                    last_update = $5
                WHERE tenant = $1 AND urn = $2
                "#,
            )
            .bind(tenant.as_str())
            .bind(feature.urn.to_string())
            .bind(dissemination_info)
            .bind(feature.dissemination_pending)
            .bind(feature.last_update)
            .execute(&mut *tx)
            .await
            .map_err(FemError::database("update feature dissemination"))?;
        }

        let mut requests_unblocked = 0;
        if !plan.unblock_urns.is_empty() {
            let unblock: Vec<String> =
                plan.unblock_urns.iter().map(ToString::to_string).collect();
            requests_unblocked = sqlx::query(
                r#"
                UPDATE feature_requests
                SET step = $4, last_update = NOW()
                WHERE tenant = $1 AND urn = ANY($2) AND step = $3
                "#,
            )
            .bind(tenant.as_str())
            .bind(unblock)
            .bind(FeatureRequestStep::WaitingBlockingDissemination.as_str())
            .bind(FeatureRequestStep::LocalDelayed.as_str())
            .execute(&mut *tx)
            .await
            .map_err(FemError::database("release waiting requests"))?
            .rows_affected();
        }

        let deleted = sqlx::query(
            "DELETE FROM feature_dissemination_requests WHERE id = ANY($1)",
        )
        .bind(&intent_ids)
        .execute(&mut *tx)
        .await
        .map_err(FemError::database("delete dissemination page"))?
        .rows_affected();

        tx.commit()
            .await
            .map_err(FemError::database("commit dissemination page tx"))?;

        trace!(
            %tenant,
            intents = intent_ids.len(),
            features = plan.features.len(),
            unblocked = requests_unblocked,
            "dissemination page written"
        );

        Ok(Some(AppliedPage {
            plan,
            intents_consumed: deleted,
            requests_unblocked,
        }))
    }
}
