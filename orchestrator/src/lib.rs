//! Concurrent agent fleet orchestration.
//!
//! This crate provisions a batch of ephemeral rooms in one call and starts one
//! agent per room against a rate-limited control plane. A bounded worker pool
//! absorbs throttling with exponential backoff, every state change lands in an
//! append-only transition log, and the run ends with a summary of outcomes.

pub mod backoff;
pub mod client;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod job;
pub mod provision;
pub mod report;
pub mod spawner;
pub mod tracker;
pub mod truncation;

pub use backoff::BackoffPolicy;
pub use dispatcher::AgentDispatcher;
pub use dispatcher::DispatchConfig;
pub use dispatcher::DispatchOutcome;
pub use job::AgentJob;
pub use job::JobId;
pub use job::JobState;
pub use job::RoomDescriptor;
pub use provision::RoomProvisioner;
pub use provision::create_rooms;
pub use report::Summary;
pub use spawner::AgentStarter;
pub use tracker::OutcomeTracker;
