//! Applies PUT and ACK intents to a feature's per-recipient records.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use fem_model::{
    DisseminationUpdateType, FeatureDisseminationInfo, FeatureEntity,
    FeatureUpdateDisseminationRequest, FeatureUrn,
};

use crate::database::ports::{AppliedIntent, PagePlan, PagePlanner};

/// Effect of one intent on a feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentEffect {
    /// Record written. `released_blocking` is set when a blocking record just
    /// left the awaiting-ack state.
    Applied { released_blocking: bool },
    /// ACK for a recipient the feature has no record of.
    StaleAck,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DisseminationTracker;

impl DisseminationTracker {
    pub fn new() -> Self {
        Self
    }

    pub fn apply_put(
        feature: &mut FeatureEntity,
        label: &str,
        ack_required: bool,
        blocking: bool,
        now: DateTime<Utc>,
    ) -> IntentEffect {
        let was_awaiting = feature
            .dissemination(label)
            .is_none_or(FeatureDisseminationInfo::is_awaiting_ack);

        match feature.dissemination_info.get_mut(label) {
            Some(record) => {
                record.request_date = now;
                record.ack_required = ack_required;
                record.blocking = blocking;
                record.ack_date = if ack_required { None } else { Some(now) };
            }
            None => {
                feature.dissemination_info.insert(
                    label.to_string(),
                    FeatureDisseminationInfo::new(
                        label,
                        ack_required,
                        blocking,
                        now,
                    ),
                );
            }
        }

        IntentEffect::Applied {
            released_blocking: blocking && !ack_required && was_awaiting,
        }
    }

    pub fn apply_ack(
        feature: &mut FeatureEntity,
        label: &str,
        now: DateTime<Utc>,
    ) -> IntentEffect {
        let Some(record) = feature.dissemination_info.get_mut(label) else {
            return IntentEffect::StaleAck;
        };
        if record.ack_date.is_some() {
            return IntentEffect::Applied {
                released_blocking: false,
            };
        }
        let was_awaiting = record.is_awaiting_ack();
        record.ack_date = Some(now);
        IntentEffect::Applied {
            released_blocking: record.blocking && was_awaiting,
        }
    }

    pub fn apply(
        feature: &mut FeatureEntity,
        intent: &FeatureUpdateDisseminationRequest,
        now: DateTime<Utc>,
    ) -> IntentEffect {
        match intent.update_type {
            DisseminationUpdateType::Put => Self::apply_put(
                feature,
                &intent.recipient_label,
                intent.ack_required,
                intent.blocking,
                now,
            ),
            DisseminationUpdateType::Ack => {
                Self::apply_ack(feature, &intent.recipient_label, now)
            }
        }
    }
}

/// Record a page intent targets.
type RecordKey = (FeatureUrn, String);

/// Shape of the last intent applied to a record. A redelivery repeats it
/// exactly; anything in between makes the next intent a fresh one.
type IntentShape = (DisseminationUpdateType, bool, bool);

fn record_key(intent: &FeatureUpdateDisseminationRequest) -> RecordKey {
    (intent.urn.clone(), intent.recipient_label.clone())
}

fn intent_shape(intent: &FeatureUpdateDisseminationRequest) -> IntentShape {
    (intent.update_type, intent.ack_required, intent.blocking)
}

impl PagePlanner for DisseminationTracker {
    fn plan(
        &self,
        intents: &[FeatureUpdateDisseminationRequest],
        features: Vec<FeatureEntity>,
        now: DateTime<Utc>,
    ) -> PagePlan {
        let mut by_urn: HashMap<FeatureUrn, FeatureEntity> = features
            .into_iter()
            .map(|feature| (feature.urn.clone(), feature))
            .collect();

        let mut ordered: Vec<&FeatureUpdateDisseminationRequest> =
            intents.iter().collect();
        ordered.sort_by_key(|intent| intent.id);

        let mut last_applied: HashMap<RecordKey, IntentShape> = HashMap::new();
        let mut touched: BTreeSet<FeatureUrn> = BTreeSet::new();
        let mut released: BTreeSet<FeatureUrn> = BTreeSet::new();
        let mut applied = Vec::new();

        for intent in ordered {
            let Some(feature) = by_urn.get_mut(&intent.urn) else {
                debug!(
                    urn = %intent.urn,
                    recipient = %intent.recipient_label,
                    "dropping dissemination intent for unknown feature"
                );
                continue;
            };
            let shape = intent_shape(intent);
            if last_applied.get(&record_key(intent)) == Some(&shape) {
                debug!(
                    urn = %intent.urn,
                    recipient = %intent.recipient_label,
                    kind = %intent.update_type,
                    "collapsing redelivered dissemination intent"
                );
                continue;
            }

            match Self::apply(feature, intent, now) {
                IntentEffect::StaleAck => {
                    warn!(
                        urn = %intent.urn,
                        recipient = %intent.recipient_label,
                        "acknowledgment for a recipient with no dissemination record, dropped"
                    );
                }
                IntentEffect::Applied { released_blocking } => {
                    last_applied.insert(record_key(intent), shape);
                    touched.insert(intent.urn.clone());
                    if released_blocking {
                        released.insert(intent.urn.clone());
                    }
                    applied.push(AppliedIntent {
                        intent: intent.clone(),
                        source: feature.session_owner.clone(),
                        session: feature.session.clone(),
                    });
                }
            }
        }

        let mut plan = PagePlan {
            applied,
            ..PagePlan::default()
        };
        for urn in touched {
            let Some(mut feature) = by_urn.remove(&urn) else {
                continue;
            };
            feature.refresh_dissemination_pending();
            feature.last_update = now;
            if released.contains(&urn)
                && !feature.has_blocking_dissemination_pending()
            {
                plan.unblock_urns.push(urn);
            }
            plan.features.push(feature);
        }
        plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fem_model::{FeatureFile, UrnEntityType};

    fn feature(provider_id: &str) -> FeatureEntity {
        let urn = FeatureUrn::pseudo_random(
            UrnEntityType::Data,
            "tenant",
            provider_id,
            1,
        )
        .unwrap();
        FeatureEntity::new(
            urn,
            provider_id,
            "source",
            "session",
            vec![FeatureFile::new("c1", "f1", "file:///f1")],
        )
    }

    #[test]
    fn put_without_required_ack_is_acknowledged_immediately() {
        let mut f = feature("p1");
        let now = Utc::now();
        DisseminationTracker::apply_put(&mut f, "r1", false, false, now);

        let record = f.dissemination("r1").unwrap();
        assert_eq!(record.ack_date, Some(now));
        assert!(!record.is_awaiting_ack());
    }

    #[test]
    fn second_ack_keeps_the_first_date() {
        let mut f = feature("p1");
        let t0 = Utc::now();
        DisseminationTracker::apply_put(&mut f, "r1", true, false, t0);
        let t1 = t0 + chrono::Duration::seconds(5);
        let t2 = t1 + chrono::Duration::seconds(5);

        DisseminationTracker::apply_ack(&mut f, "r1", t1);
        DisseminationTracker::apply_ack(&mut f, "r1", t2);

        assert_eq!(f.dissemination("r1").unwrap().ack_date, Some(t1));
    }

    #[test]
    fn ack_without_record_is_stale() {
        let mut f = feature("p1");
        let effect = DisseminationTracker::apply_ack(&mut f, "nobody", Utc::now());
        assert_eq!(effect, IntentEffect::StaleAck);
        assert!(f.dissemination_info.is_empty());
    }

    #[test]
    fn re_put_with_required_ack_waits_again() {
        let mut f = feature("p1");
        let t0 = Utc::now();
        DisseminationTracker::apply_put(&mut f, "r1", true, true, t0);
        DisseminationTracker::apply_ack(&mut f, "r1", t0);
        DisseminationTracker::apply_put(&mut f, "r1", true, true, t0);

        assert!(f.dissemination("r1").unwrap().is_awaiting_ack());
    }

    #[test]
    fn blocking_release_only_on_transition() {
        let mut f = feature("p1");
        let now = Utc::now();

        let put = DisseminationTracker::apply_put(&mut f, "r1", true, true, now);
        assert_eq!(put, IntentEffect::Applied { released_blocking: false });

        let ack = DisseminationTracker::apply_ack(&mut f, "r1", now);
        assert_eq!(ack, IntentEffect::Applied { released_blocking: true });

        let again = DisseminationTracker::apply_ack(&mut f, "r1", now);
        assert_eq!(again, IntentEffect::Applied { released_blocking: false });

        let other = DisseminationTracker::apply_put(&mut f, "r2", false, false, now);
        assert_eq!(other, IntentEffect::Applied { released_blocking: false });
    }

    #[test]
    fn plan_drops_unknown_urns_and_collapses_duplicates() {
        let known = feature("known");
        let unknown = feature("unknown");
        let intents = vec![
            FeatureUpdateDisseminationRequest::put(known.urn.clone(), "r1", true, false),
            FeatureUpdateDisseminationRequest::put(known.urn.clone(), "r1", true, false),
            FeatureUpdateDisseminationRequest::put(unknown.urn.clone(), "r1", true, false),
        ];

        let plan = DisseminationTracker.plan(&intents, vec![known.clone()], Utc::now());

        assert_eq!(plan.applied.len(), 1);
        assert_eq!(plan.features.len(), 1);
        assert!(plan.features[0].dissemination_pending);
        assert!(plan.unblock_urns.is_empty());
    }

    #[test]
    fn plan_applies_re_notification_after_ack() {
        let f = feature("p1");
        let intents = vec![
            FeatureUpdateDisseminationRequest::put(f.urn.clone(), "r1", true, true),
            FeatureUpdateDisseminationRequest::ack(f.urn.clone(), "r1"),
            FeatureUpdateDisseminationRequest::put(f.urn.clone(), "r1", true, true),
        ];

        let plan = DisseminationTracker.plan(&intents, vec![f], Utc::now());

        assert_eq!(plan.applied.len(), 3);
        let stored = &plan.features[0];
        assert!(stored.dissemination("r1").unwrap().is_awaiting_ack());
        assert!(stored.dissemination_pending);
        assert!(stored.has_blocking_dissemination_pending());
        assert!(plan.unblock_urns.is_empty());
    }

    #[test]
    fn plan_keeps_blocked_feature_when_another_blocking_record_waits() {
        let mut f = feature("p1");
        let now = Utc::now();
        DisseminationTracker::apply_put(&mut f, "r1", true, true, now);
        DisseminationTracker::apply_put(&mut f, "r2", true, true, now);

        let intents = vec![FeatureUpdateDisseminationRequest::ack(f.urn.clone(), "r1")];
        let plan = DisseminationTracker.plan(&intents, vec![f.clone()], now);
        assert!(plan.unblock_urns.is_empty());

        let intents = vec![
            FeatureUpdateDisseminationRequest::ack(f.urn.clone(), "r1"),
            FeatureUpdateDisseminationRequest::ack(f.urn.clone(), "r2"),
        ];
        let plan = DisseminationTracker.plan(&intents, vec![f.clone()], now);
        assert_eq!(plan.unblock_urns, vec![f.urn.clone()]);
        assert!(!plan.features[0].dissemination_pending);
    }
}
