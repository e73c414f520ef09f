//! Process wiring for the feature request manager: configuration loading
//! used by the `fem-server` binary.

pub mod config;
