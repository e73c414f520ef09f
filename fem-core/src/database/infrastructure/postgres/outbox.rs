use async_trait::async_trait;
use serde::Serialize;
use sqlx::{PgPool, Postgres, QueryBuilder};

use fem_model::{FeatureRequestEvent, StepPropertyEvent, TenantId};

use crate::{
    error::{FemError, Result},
    events::{RequestEventPublisher, SessionAgentClient},
};

pub const REQUEST_EVENT_TOPIC: &str = "feature.request";
pub const STEP_EVENT_TOPIC: &str = "session.step";

/// Writes outbound events to `fem_outbox` for a relay to ship.
#[derive(Clone, Debug)]
pub struct PostgresEventOutbox {
    pool: PgPool,
}

impl PostgresEventOutbox {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn append<T: Serialize>(
        &self,
        tenant: &TenantId,
        topic: &'static str,
        events: &[T],
    ) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }
        let payloads = events
            .iter()
            .map(serde_json::to_value)
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut builder: QueryBuilder<'_, Postgres> =
            QueryBuilder::new("INSERT INTO fem_outbox (tenant, topic, payload) ");
        builder.push_values(payloads, |mut row, payload| {
            row.push_bind(tenant.as_str().to_string())
                .push_bind(topic)
                .push_bind(payload);
        });
        builder
            .build()
            .execute(&self.pool)
            .await
            .map_err(FemError::database("append outbox events"))?;
        Ok(())
    }
}

#[async_trait]
impl RequestEventPublisher for PostgresEventOutbox {
    async fn publish_request_events(
        &self,
        tenant: &TenantId,
        events: Vec<FeatureRequestEvent>,
    ) -> Result<()> {
        self.append(tenant, REQUEST_EVENT_TOPIC, &events).await
    }
}

#[async_trait]
impl SessionAgentClient for PostgresEventOutbox {
    async fn publish_step_events(
        &self,
        tenant: &TenantId,
        events: Vec<StepPropertyEvent>,
    ) -> Result<()> {
        self.append(tenant, STEP_EVENT_TOPIC, &events).await
    }
}
