//! Shared data model, error taxonomy, configuration, and secret handling for
//! the test-probe control plane.
//!
//! Everything above the provider/control layer depends only on this crate —
//! it carries no knowledge of how a bundle is fetched, how a vault answers,
//! or how Cucumber is driven.

pub mod config;
pub mod error;
pub mod secrets;
pub mod types;
