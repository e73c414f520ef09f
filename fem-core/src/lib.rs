//! # FEM Core
//!
//! Feature request lifecycle tracking: storage and notifier callback
//! correlation, dissemination tracking towards external recipients, and the
//! session counters derived from it.
//!
//! ## Overview
//!
//! - **Callback correlation**: storage results resolve requests by group id,
//!   notifier results by request id ([`services`]).
//! - **Dissemination**: PUT and ACK intents are queued and applied page by
//!   page, each page atomically ([`dissemination`]).
//! - **Session metrics**: running and done counters per recipient, pushed to
//!   the session agent after each page.
//! - **Operator façade**: listing, retry, delete and abort on selections of
//!   requests ([`services::FeatureRequestService`]).
//!
//! ## Feature Flags
//!
//! - `database`: Postgres adapters (SQLx) and the embedded migrator
//!
//! ## Examples
//!
//! ```no_run
//! use fem_core::{
//!     FemConfig, FeatureRequestService, RecordingEventSink,
//!     database::infrastructure::memory::{InMemoryFemStore, memory_stores},
//! };
//! use fem_model::{RequestResultInfo, TenantId};
//!
//! async fn on_stored() -> fem_core::Result<()> {
//!     let store = InMemoryFemStore::new();
//!     let sink = RecordingEventSink::new();
//!     let service =
//!         FeatureRequestService::new(&memory_stores(&store, &sink), FemConfig::default());
//!
//!     let tenant = TenantId::new("project1");
//!     let results = [RequestResultInfo::success("group-1", "md5", "s3", "s3://bucket/f")];
//!     service.handle_storage_success(&tenant, &results).await?;
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(missing_docs)]

/// Configuration types
pub mod config;

/// Repository ports and their adapters
pub mod database;

/// Intent queue, tracker, session counters and the drain scheduler
pub mod dissemination;

/// Error types
pub mod error;

/// Outbound event ports
pub mod events;

/// Callback correlators and the request façade
pub mod services;

#[cfg(feature = "database")]
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

pub use config::{AbortConfig, DisseminationConfig, FemConfig, NotificationConfig};
pub use dissemination::{
    DisseminationRequestProcessor, DisseminationScheduler, DisseminationTracker,
    DrainReport,
};
pub use error::{FemError, Result};
pub use events::{
    DISSEMINATION_STEP, RecordingEventSink, RequestEventPublisher,
    SessionAgentClient,
};
pub use services::{
    FeatureRequestService, FemStores, NotifierCallbackCorrelator,
    RequestHandledResponse, RequestsInfo, StorageCallbackCorrelator,
};
