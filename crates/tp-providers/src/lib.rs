//! Storage and vault provider adapters (spec §4.4, §4.5) plus the staging
//! filesystem (spec §4.8) and JAAS string construction (spec §4.9).
//!
//! Only the local/dev providers are implemented end-to-end here — cloud
//! SDK wiring is explicitly out of scope (spec §1) — but the validation
//! pipeline, staging discipline, and retry state machine are the real
//! thing, not a stub.

pub mod jaas;
pub mod staging;
pub mod storage;
pub mod vault;
