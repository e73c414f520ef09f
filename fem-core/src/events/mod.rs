//! Outbound event ports: request state changes and session counters.

pub mod memory;

use async_trait::async_trait;

use fem_model::{FeatureRequestEvent, StepPropertyEvent, TenantId};

use crate::error::Result;

pub use memory::RecordingEventSink;

/// Step name used for every dissemination counter.
pub const DISSEMINATION_STEP: &str = "fem_dissemination";

/// Observers of request state changes (dashboards, request owners).
#[async_trait]
pub trait RequestEventPublisher: Send + Sync {
    async fn publish_request_events(
        &self,
        tenant: &TenantId,
        events: Vec<FeatureRequestEvent>,
    ) -> Result<()>;
}

/// Session agent receiving step property counters.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionAgentClient: Send + Sync {
    async fn publish_step_events(
        &self,
        tenant: &TenantId,
        events: Vec<StepPropertyEvent>,
    ) -> Result<()>;
}
