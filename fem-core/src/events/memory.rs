use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use fem_model::{
    FeatureRequestEvent, RequestState, StepPropertyEvent, TenantId,
};

use super::{RequestEventPublisher, SessionAgentClient};
use crate::error::Result;

/// Keeps every published event in memory. Used by tests and embedded setups
/// that read the events back instead of shipping them.
#[derive(Clone, Debug, Default)]
pub struct RecordingEventSink {
    request_events: Arc<Mutex<Vec<(TenantId, FeatureRequestEvent)>>>,
    step_events: Arc<Mutex<Vec<(TenantId, StepPropertyEvent)>>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn request_events(&self) -> Vec<FeatureRequestEvent> {
        self.request_events
            .lock()
            .await
            .iter()
            .map(|(_, event)| event.clone())
            .collect()
    }

    pub async fn request_events_in(
        &self,
        state: RequestState,
    ) -> Vec<FeatureRequestEvent> {
        self.request_events()
            .await
            .into_iter()
            .filter(|event| event.state == state)
            .collect()
    }

    pub async fn step_events(&self) -> Vec<StepPropertyEvent> {
        self.step_events
            .lock()
            .await
            .iter()
            .map(|(_, event)| event.clone())
            .collect()
    }

    /// Net value of a session property as the session agent would see it.
    pub async fn session_total(
        &self,
        source: &str,
        session: &str,
        property: &str,
    ) -> i64 {
        self.step_events
            .lock()
            .await
            .iter()
            .filter(|(_, e)| {
                e.source == source
                    && e.session == session
                    && e.property == property
            })
            .map(|(_, e)| e.signed_value())
            .sum()
    }
}

#[async_trait]
impl RequestEventPublisher for RecordingEventSink {
    async fn publish_request_events(
        &self,
        tenant: &TenantId,
        events: Vec<FeatureRequestEvent>,
    ) -> Result<()> {
        let mut guard = self.request_events.lock().await;
        guard.extend(events.into_iter().map(|e| (tenant.clone(), e)));
        Ok(())
    }
}

#[async_trait]
impl SessionAgentClient for RecordingEventSink {
    async fn publish_step_events(
        &self,
        tenant: &TenantId,
        events: Vec<StepPropertyEvent>,
    ) -> Result<()> {
        let mut guard = self.step_events.lock().await;
        guard.extend(events.into_iter().map(|e| (tenant.clone(), e)));
        Ok(())
    }
}
