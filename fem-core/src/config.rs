use std::time::Duration;

use serde::{Deserialize, Serialize};

use fem_model::TenantId;

/// Global knobs for request lifecycle handling and dissemination draining.
///
/// All fields carry defaults so a deployment only has to spell out what it
/// changes.
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct FemConfig {
    /// Tenants the drain scheduler iterates over.
    pub tenants: Vec<TenantId>,
    /// Intent queue draining (page size, cadence, lease).
    pub dissemination: DisseminationConfig,
    /// Whether completed requests go through the notifier.
    pub notification: NotificationConfig,
    /// Bulk abort limits.
    pub abort: AbortConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DisseminationConfig {
    /// Number of intents applied per atomic page.
    pub page_size: usize,
    /// Delay between two drain passes (ms).
    pub drain_delay_ms: u64,
    /// Initial delay before the first pass (ms).
    pub initial_delay_ms: u64,
    /// TTL of a tenant's drain lease (seconds).
    pub lease_ttl_secs: i64,
    /// Name recorded as the lease holder.
    pub lease_owner: String,
}

impl DisseminationConfig {
    pub fn drain_delay(&self) -> Duration {
        Duration::from_millis(self.drain_delay_ms)
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn lease_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.lease_ttl_secs)
    }
}

impl Default for DisseminationConfig {
    fn default() -> Self {
        Self {
            page_size: 400,
            drain_delay_ms: 1_000,
            initial_delay_ms: 10_000,
            lease_ttl_secs: 60,
            lease_owner: "fem-dissemination".to_string(),
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub active: bool,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self { active: true }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AbortConfig {
    /// Requests touched per abort page.
    pub page_size: usize,
    /// Only requests idle for at least this long can be aborted.
    pub min_age_hours: i64,
    /// Upper bound on pages handled by one abort call.
    pub max_page_loop: usize,
}

impl AbortConfig {
    pub fn min_age(&self) -> chrono::Duration {
        chrono::Duration::hours(self.min_age_hours)
    }
}

impl Default for AbortConfig {
    fn default() -> Self {
        Self {
            page_size: 1_000,
            min_age_hours: 1,
            max_page_loop: 50,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_payload_keeps_defaults() {
        let config: FemConfig = serde_json::from_str(
            r#"{ "tenants": ["project1"], "dissemination": { "page_size": 10 } }"#,
        )
        .unwrap();

        assert_eq!(config.tenants, vec![TenantId::new("project1")]);
        assert_eq!(config.dissemination.page_size, 10);
        assert_eq!(config.dissemination.lease_ttl_secs, 60);
        assert!(config.notification.active);
        assert_eq!(config.abort.page_size, 1_000);
        assert_eq!(config.abort.max_page_loop, 50);
    }
}
