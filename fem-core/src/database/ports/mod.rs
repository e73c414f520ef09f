//! Repository ports (interfaces) used by the services.
//!
//! Implementations live under `database::infrastructure`: an in-memory adapter
//! for tests and embedding, and the Postgres adapters.

pub mod dissemination;
pub mod features;
pub mod lease;
pub mod requests;

pub use dissemination::{
    AppliedIntent, AppliedPage, DisseminationIntentRepository, PagePlan,
    PagePlanner,
};
pub use features::FeatureRepository;
pub use lease::{LeaseId, LeaseToken, TenantLease};
pub use requests::{FeatureRequestRepository, RequestStateUpdate};
