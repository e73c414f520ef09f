//! Dissemination tracking: intent intake, page application, session
//! counters and the drain scheduler.

pub mod processor;
pub mod scheduler;
pub mod session_metrics;
pub mod tracker;

pub use processor::{DisseminationRequestProcessor, DrainReport};
pub use scheduler::DisseminationScheduler;
pub use tracker::{DisseminationTracker, IntentEffect};
