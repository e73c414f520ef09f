use std::{fmt, sync::Arc};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use fem_model::TenantId;

use super::processor::{DisseminationRequestProcessor, DrainReport};
use crate::{
    config::DisseminationConfig, database::ports::TenantLease, error::Result,
    events::DISSEMINATION_STEP,
};

/// Periodically drains every tenant's dissemination queue, one lease holder
/// per tenant at a time.
#[derive(Clone)]
pub struct DisseminationScheduler {
    processor: DisseminationRequestProcessor,
    lease: Arc<dyn TenantLease>,
    tenants: Vec<TenantId>,
    config: DisseminationConfig,
}

impl fmt::Debug for DisseminationScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DisseminationScheduler")
            .field("tenants", &self.tenants)
            .field("config", &self.config)
            .finish()
    }
}

impl DisseminationScheduler {
    pub fn new(
        processor: DisseminationRequestProcessor,
        lease: Arc<dyn TenantLease>,
        tenants: Vec<TenantId>,
        config: DisseminationConfig,
    ) -> Self {
        Self {
            processor,
            lease,
            tenants,
            config,
        }
    }

    /// Drain one tenant if its lease is free. Returns `None` when another
    /// holder owns the lease.
    pub async fn drain_tenant(
        &self,
        tenant: &TenantId,
    ) -> Result<Option<DrainReport>> {
        let Some(token) = self
            .lease
            .acquire(
                tenant,
                DISSEMINATION_STEP,
                &self.config.lease_owner,
                self.config.lease_ttl(),
            )
            .await?
        else {
            debug!(%tenant, "dissemination lease held elsewhere, skipping");
            return Ok(None);
        };

        let outcome = self.processor.handle_requests(tenant).await;

        if let Err(err) = self.lease.release(&token).await {
            warn!(%tenant, "failed to release dissemination lease: {err}");
        }
        outcome.map(Some)
    }

    /// One pass over every tenant. Failures are isolated per tenant.
    pub async fn tick(&self) {
        for tenant in &self.tenants {
            if let Err(err) = self.drain_tenant(tenant).await {
                warn!(%tenant, "dissemination drain failed, intents stay queued: {err}");
            }
        }
    }

    /// Run with a fixed delay between passes until `shutdown` fires.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                tenants = self.tenants.len(),
                page_size = self.config.page_size,
                "dissemination scheduler started"
            );
            let mut delay = self.config.initial_delay();
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("dissemination scheduler shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(delay) => {
                        self.tick().await;
                        delay = self.config.drain_delay();
                    }
                }
            }
        })
    }
}
