use std::{collections::HashSet, fmt, sync::Arc};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use fem_model::{
    DisseminationAckEvent, FeatureRequest, FeatureUpdateDisseminationRequest,
    FeatureUrn, NotifierEvent, TenantId,
};

use super::{session_metrics, tracker::DisseminationTracker};
use crate::{
    database::ports::{
        AppliedPage, DisseminationIntentRepository, FeatureRepository,
    },
    error::Result,
    events::SessionAgentClient,
};

/// Totals for one drain of a tenant's intent queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub pages: u64,
    pub intents_consumed: u64,
    pub intents_applied: u64,
    pub requests_unblocked: u64,
}

/// Queues dissemination intents and drains them page by page.
#[derive(Clone)]
pub struct DisseminationRequestProcessor {
    intents: Arc<dyn DisseminationIntentRepository>,
    features: Arc<dyn FeatureRepository>,
    session_agent: Arc<dyn SessionAgentClient>,
    tracker: DisseminationTracker,
    page_size: usize,
}

impl fmt::Debug for DisseminationRequestProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DisseminationRequestProcessor")
            .field("page_size", &self.page_size)
            .finish()
    }
}

impl DisseminationRequestProcessor {
    pub fn new(
        intents: Arc<dyn DisseminationIntentRepository>,
        features: Arc<dyn FeatureRepository>,
        session_agent: Arc<dyn SessionAgentClient>,
        page_size: usize,
    ) -> Self {
        Self {
            intents,
            features,
            session_agent,
            tracker: DisseminationTracker::new(),
            page_size: page_size.max(1),
        }
    }

    /// Queue one PUT per recipient for every notified request whose feature
    /// still exists. Returns the number of intents queued.
    pub async fn save_put_requests(
        &self,
        tenant: &TenantId,
        events: &[NotifierEvent],
        requests: &[FeatureRequest],
    ) -> Result<usize> {
        let urns: Vec<FeatureUrn> = requests
            .iter()
            .filter_map(|r| r.urn.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        if urns.is_empty() {
            return Ok(0);
        }
        let existing: HashSet<FeatureUrn> = self
            .features
            .find_by_urns(tenant, &urns)
            .await?
            .into_iter()
            .map(|feature| feature.urn)
            .collect();

        let mut intents = Vec::new();
        for request in requests {
            let Some(urn) = request.urn.as_ref() else {
                continue;
            };
            if !existing.contains(urn) {
                debug!(
                    %tenant,
                    request_id = %request.request_id,
                    %urn,
                    "notified feature no longer exists, no dissemination recorded"
                );
                continue;
            }
            for event in events
                .iter()
                .filter(|e| e.request_id == request.request_id)
            {
                intents.extend(event.recipients.iter().map(|recipient| {
                    FeatureUpdateDisseminationRequest::put(
                        urn.clone(),
                        recipient.label.clone(),
                        recipient.ack_required,
                        recipient.blocking,
                    )
                }));
            }
        }

        let queued = intents.len();
        if queued > 0 {
            self.intents.save_intents(tenant, intents).await?;
        }
        Ok(queued)
    }

    /// Queue ACK intents for acknowledgments naming an existing feature.
    pub async fn save_ack_requests(
        &self,
        tenant: &TenantId,
        events: &[DisseminationAckEvent],
    ) -> Result<usize> {
        let mut parsed = Vec::with_capacity(events.len());
        for event in events {
            match event.urn.parse::<FeatureUrn>() {
                Ok(urn) => parsed.push((urn, event.recipient_label.clone())),
                Err(err) => warn!(
                    %tenant,
                    urn = %event.urn,
                    recipient = %event.recipient_label,
                    "ignoring acknowledgment with invalid urn: {err}"
                ),
            }
        }
        if parsed.is_empty() {
            return Ok(0);
        }

        let urns: Vec<FeatureUrn> =
            parsed.iter().map(|(urn, _)| urn.clone()).collect();
        let existing: HashSet<FeatureUrn> = self
            .features
            .find_by_urns(tenant, &urns)
            .await?
            .into_iter()
            .map(|feature| feature.urn)
            .collect();

        let mut intents = Vec::new();
        for (urn, label) in parsed {
            if existing.contains(&urn) {
                intents.push(FeatureUpdateDisseminationRequest::ack(urn, label));
            } else {
                warn!(
                    %tenant,
                    %urn,
                    recipient = %label,
                    "acknowledgment for unknown feature dropped"
                );
            }
        }

        let queued = intents.len();
        if queued > 0 {
            self.intents.save_intents(tenant, intents).await?;
        }
        Ok(queued)
    }

    /// Apply one page of intents created before `started_at`, then publish
    /// its session counters.
    pub async fn apply_page(
        &self,
        tenant: &TenantId,
        started_at: DateTime<Utc>,
    ) -> Result<Option<AppliedPage>> {
        let Some(page) = self
            .intents
            .apply_page(tenant, started_at, self.page_size, &self.tracker)
            .await?
        else {
            return Ok(None);
        };

        let events = session_metrics::step_events(&page.plan.applied);
        if !events.is_empty()
            && let Err(err) =
                self.session_agent.publish_step_events(tenant, events).await
        {
            warn!(%tenant, "failed to publish dissemination session counters: {err}");
        }

        debug!(
            %tenant,
            consumed = page.intents_consumed,
            applied = page.plan.applied.len(),
            features = page.plan.features.len(),
            unblocked = page.requests_unblocked,
            "dissemination page committed"
        );
        Ok(Some(page))
    }

    /// Drain every intent queued before this call.
    pub async fn handle_requests(&self, tenant: &TenantId) -> Result<DrainReport> {
        let started_at = Utc::now();
        let mut report = DrainReport::default();

        while let Some(page) = self.apply_page(tenant, started_at).await? {
            report.pages += 1;
            report.intents_consumed += page.intents_consumed;
            report.intents_applied += page.plan.applied.len() as u64;
            report.requests_unblocked += page.requests_unblocked;
            if page.intents_consumed == 0 {
                break;
            }
        }

        if report.intents_consumed > 0 {
            info!(
                %tenant,
                pages = report.pages,
                consumed = report.intents_consumed,
                applied = report.intents_applied,
                unblocked = report.requests_unblocked,
                "dissemination queue drained"
            );
        }
        Ok(report)
    }
}
