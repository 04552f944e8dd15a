// ABOUTME: shipline library: pipeline stages, their component traits and production adapters.
// ABOUTME: The CLI in main.rs and the integration tests both build on these modules.

pub mod build;
pub mod cluster;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod health;
pub mod output;
pub mod pipeline;
pub mod process;
pub mod registry;
pub mod remote;
pub mod rollout;
pub mod secrets;
pub mod ssh;
pub mod types;
