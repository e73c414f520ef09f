use std::collections::BTreeMap;

use fem_model::{StepPropertyEvent, StepPropertyEventType};

use crate::{database::ports::AppliedIntent, events::DISSEMINATION_STEP};

/// Counter of products currently awaiting acknowledgment from a recipient.
pub fn running_property(recipient_label: &str) -> String {
    format!("{recipient_label}.running")
}

/// Counter of products a recipient received (and acknowledged when asked to).
pub fn done_property(recipient_label: &str) -> String {
    format!("{recipient_label}.done")
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionDisseminationCounts {
    pub pending: i64,
    pub done: i64,
    pub to_remove_from_pending: i64,
}

/// Fold applied intents into per (source, session, recipient) counters.
pub fn aggregate(
    applied: &[AppliedIntent],
) -> BTreeMap<(String, String, String), SessionDisseminationCounts> {
    let mut groups: BTreeMap<_, SessionDisseminationCounts> = BTreeMap::new();
    for item in applied {
        let counts = groups
            .entry((
                item.source.clone(),
                item.session.clone(),
                item.intent.recipient_label.clone(),
            ))
            .or_default();
        if item.intent.is_put() {
            if item.intent.ack_required {
                counts.pending += 1;
            } else {
                counts.done += 1;
            }
        } else {
            counts.done += 1;
            counts.to_remove_from_pending += 1;
        }
    }
    groups
}

/// Session step events for one page, zero counters omitted.
pub fn step_events(applied: &[AppliedIntent]) -> Vec<StepPropertyEvent> {
    let mut events = Vec::new();
    for ((source, session, label), counts) in aggregate(applied) {
        let mut push = |property: String, value: i64, kind| {
            if value > 0 {
                events.push(StepPropertyEvent {
                    step_id: DISSEMINATION_STEP.to_string(),
                    source: source.clone(),
                    session: session.clone(),
                    property,
                    value,
                    event_type: kind,
                });
            }
        };
        push(
            running_property(&label),
            counts.pending,
            StepPropertyEventType::Inc,
        );
        push(done_property(&label), counts.done, StepPropertyEventType::Inc);
        push(
            running_property(&label),
            counts.to_remove_from_pending,
            StepPropertyEventType::Dec,
        );
    }
    events
}
