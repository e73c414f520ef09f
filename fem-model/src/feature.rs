use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::urn::FeatureUrn;

/// A place where a copy of a feature file can be fetched.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FeatureFileLocation {
    pub url: String,
    /// `None` until the storage subsystem confirmed where the file lives.
    pub storage: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FeatureFile {
    pub checksum: String,
    pub filename: String,
    pub locations: Vec<FeatureFileLocation>,
}

impl FeatureFile {
    pub fn new(
        checksum: impl Into<String>,
        filename: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            checksum: checksum.into(),
            filename: filename.into(),
            locations: vec![FeatureFileLocation {
                url: url.into(),
                storage: None,
            }],
        }
    }

    /// Record that the file is now stored on `storage` at `url`.
    ///
    /// Locations without a storage are dropped, an existing location on the
    /// same storage is re-pointed and a new one is appended otherwise.
    /// Returns whether anything changed.
    pub fn apply_stored_location(&mut self, storage: &str, url: &str) -> bool {
        let before = self.locations.len();
        self.locations.retain(|loc| loc.storage.is_some());
        let mut changed = before != self.locations.len();

        match self
            .locations
            .iter_mut()
            .find(|loc| loc.storage.as_deref() == Some(storage))
        {
            Some(existing) if existing.url == url => {}
            Some(existing) => {
                existing.url = url.to_string();
                changed = true;
            }
            None => {
                self.locations.push(FeatureFileLocation {
                    url: url.to_string(),
                    storage: Some(storage.to_string()),
                });
                changed = true;
            }
        }
        changed
    }
}

/// Dissemination state of one feature towards one recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FeatureDisseminationInfo {
    pub label: String,
    pub request_date: DateTime<Utc>,
    /// `None` while the recipient still owes an acknowledgment.
    pub ack_date: Option<DateTime<Utc>>,
    pub ack_required: bool,
    pub blocking: bool,
}

impl FeatureDisseminationInfo {
    pub fn new(
        label: impl Into<String>,
        ack_required: bool,
        blocking: bool,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            label: label.into(),
            request_date: now,
            ack_date: if ack_required { None } else { Some(now) },
            ack_required,
            blocking,
        }
    }

    pub fn is_awaiting_ack(&self) -> bool {
        self.ack_required && self.ack_date.is_none()
    }

    pub fn is_blocking_pending(&self) -> bool {
        self.blocking && self.is_awaiting_ack()
    }
}

/// A catalog entity tracked through creation, update, deletion and
/// dissemination.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FeatureEntity {
    pub urn: FeatureUrn,
    pub provider_id: String,
    pub session_owner: String,
    pub session: String,
    pub files: Vec<FeatureFile>,
    /// Dissemination records keyed by recipient label.
    pub dissemination_info: BTreeMap<String, FeatureDisseminationInfo>,
    pub dissemination_pending: bool,
    pub creation_date: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
}

impl FeatureEntity {
    pub fn new(
        urn: FeatureUrn,
        provider_id: impl Into<String>,
        session_owner: impl Into<String>,
        session: impl Into<String>,
        files: Vec<FeatureFile>,
    ) -> Self {
        let now = Utc::now();
        Self {
            urn,
            provider_id: provider_id.into(),
            session_owner: session_owner.into(),
            session: session.into(),
            files,
            dissemination_info: BTreeMap::new(),
            dissemination_pending: false,
            creation_date: now,
            last_update: now,
        }
    }

    pub fn dissemination(
        &self,
        label: &str,
    ) -> Option<&FeatureDisseminationInfo> {
        self.dissemination_info.get(label)
    }

    /// Recompute the derived `dissemination_pending` flag.
    pub fn refresh_dissemination_pending(&mut self) {
        self.dissemination_pending = self
            .dissemination_info
            .values()
            .any(FeatureDisseminationInfo::is_awaiting_ack);
    }

    pub fn has_blocking_dissemination_pending(&self) -> bool {
        self.dissemination_info
            .values()
            .any(FeatureDisseminationInfo::is_blocking_pending)
    }

    /// Apply a storage result to every file with a matching checksum.
    pub fn update_file_locations(
        &mut self,
        checksum: &str,
        storage: &str,
        url: &str,
    ) -> bool {
        let mut changed = false;
        for file in self.files.iter_mut().filter(|f| f.checksum == checksum) {
            changed |= file.apply_stored_location(storage, url);
        }
        if changed {
            self.last_update = Utc::now();
        }
        changed
    }
}
