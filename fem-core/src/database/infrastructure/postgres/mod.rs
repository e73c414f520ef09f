//! Postgres adapters. All statements are built at runtime so the crate
//! compiles without a reachable database.

pub mod dissemination;
pub mod features;
pub mod lease;
pub mod outbox;
pub mod requests;
mod rows;

use std::sync::Arc;

use sqlx::PgPool;

pub use dissemination::PostgresDisseminationRepository;
pub use features::PostgresFeatureRepository;
pub use lease::PostgresTenantLease;
pub use outbox::PostgresEventOutbox;
pub use requests::PostgresFeatureRequestRepository;

use crate::services::FemStores;

/// Wire every port to its Postgres adapter over one pool.
pub fn postgres_stores(pool: PgPool) -> FemStores {
    let outbox = Arc::new(PostgresEventOutbox::new(pool.clone()));
    FemStores {
        requests: Arc::new(PostgresFeatureRequestRepository::new(pool.clone())),
        features: Arc::new(PostgresFeatureRepository::new(pool.clone())),
        intents: Arc::new(PostgresDisseminationRepository::new(pool.clone())),
        lease: Arc::new(PostgresTenantLease::new(pool)),
        request_events: outbox.clone(),
        session_agent: outbox,
    }
}
