//! Data model shared by the feature request and dissemination crates.
#![allow(missing_docs)]

pub mod dissemination;
pub mod error;
pub mod events;
pub mod feature;
pub mod ids;
pub mod request;
pub mod selection;
pub mod urn;

pub use dissemination::{
    DisseminationUpdateType, FeatureUpdateDisseminationRequest,
};
pub use error::{ModelError, Result as ModelResult};
pub use events::{
    DisseminationAckEvent, FeatureRequestEvent, NotificationState,
    NotifierEvent, Recipient, RequestResultInfo, StepPropertyEvent,
    StepPropertyEventType, StoredFileLocation,
};
pub use feature::{
    FeatureDisseminationInfo, FeatureEntity, FeatureFile, FeatureFileLocation,
};
pub use ids::{DisseminationIntentId, FeatureRequestId, TenantId};
pub use request::{
    FeatureRequest, FeatureRequestPayload, FeatureRequestStep,
    FeatureRequestType, PriorityLevel, RequestState,
};
pub use selection::{
    Page, PageResult, RequestSelection, RequestSort, RequestSortField,
    SortDirection,
};
pub use urn::{FeatureUrn, UrnEntityType};
