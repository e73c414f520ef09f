//! Versioned feature identifiers.
//!
//! The textual form is `URN:FEATURE:<ENTITY>:<tenant>:<uuid>:V<version>`.

use std::{fmt, str::FromStr};

use uuid::Uuid;

use crate::error::{ModelError, Result};

const URN_PREFIX: &str = "URN";
const FEATURE_IDENTIFIER: &str = "FEATURE";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum UrnEntityType {
    Data,
    Dataset,
    Collection,
}

impl UrnEntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            UrnEntityType::Data => "DATA",
            UrnEntityType::Dataset => "DATASET",
            UrnEntityType::Collection => "COLLECTION",
        }
    }
}

impl FromStr for UrnEntityType {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "DATA" => Ok(UrnEntityType::Data),
            "DATASET" => Ok(UrnEntityType::Dataset),
            "COLLECTION" => Ok(UrnEntityType::Collection),
            other => Err(ModelError::InvalidUrn(format!(
                "unknown entity type `{other}`"
            ))),
        }
    }
}

/// Unique, versioned identity of a feature.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FeatureUrn {
    entity_type: UrnEntityType,
    tenant: String,
    id: Uuid,
    version: u32,
}

impl FeatureUrn {
    pub fn new(
        entity_type: UrnEntityType,
        tenant: impl Into<String>,
        id: Uuid,
        version: u32,
    ) -> Result<Self> {
        let tenant = tenant.into();
        if tenant.is_empty() || tenant.contains(':') {
            return Err(ModelError::InvalidUrn(format!(
                "tenant segment `{tenant}` is empty or contains ':'"
            )));
        }
        if version == 0 {
            return Err(ModelError::InvalidUrn(
                "version must start at 1".into(),
            ));
        }
        Ok(Self {
            entity_type,
            tenant,
            id,
            version,
        })
    }

    /// Derive a stable urn from a provider identifier so that resubmitting the
    /// same product yields the same identity.
    pub fn pseudo_random(
        entity_type: UrnEntityType,
        tenant: impl Into<String>,
        provider_id: &str,
        version: u32,
    ) -> Result<Self> {
        let tenant = tenant.into();
        let seed = format!("{tenant}:{provider_id}:{version}");
        let id = Uuid::new_v5(&Uuid::NAMESPACE_OID, seed.as_bytes());
        Self::new(entity_type, tenant, id, version)
    }

    pub fn entity_type(&self) -> UrnEntityType {
        self.entity_type
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn version(&self) -> u32 {
        self.version
    }
}

impl fmt::Display for FeatureUrn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{URN_PREFIX}:{FEATURE_IDENTIFIER}:{}:{}:{}:V{}",
            self.entity_type.as_str(),
            self.tenant,
            self.id,
            self.version
        )
    }
}

impl FromStr for FeatureUrn {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(':').collect();
        let [prefix, identifier, entity, tenant, id, version] =
            parts.as_slice()
        else {
            return Err(ModelError::InvalidUrn(format!(
                "`{s}` does not have six segments"
            )));
        };
        if *prefix != URN_PREFIX || *identifier != FEATURE_IDENTIFIER {
            return Err(ModelError::InvalidUrn(format!(
                "`{s}` is not a feature urn"
            )));
        }
        let entity_type = entity.parse()?;
        let id = Uuid::parse_str(id).map_err(|e| {
            ModelError::InvalidUrn(format!("bad uuid in `{s}`: {e}"))
        })?;
        let version = version
            .strip_prefix('V')
            .and_then(|v| v.parse::<u32>().ok())
            .ok_or_else(|| {
                ModelError::InvalidUrn(format!("bad version in `{s}`"))
            })?;
        Self::new(entity_type, *tenant, id, version)
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for FeatureUrn {
    fn serialize<S: serde::Serializer>(
        &self,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for FeatureUrn {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
