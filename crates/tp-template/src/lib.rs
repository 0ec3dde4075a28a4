//! The Rosetta substitution core (spec §4.7) and the credential mapping
//! that directs extraction from a vault response (spec §4.8).

pub mod engine;
pub mod mapping;

pub use engine::{substitute, TemplateError};
pub use mapping::{apply_mappings, MappingError, MappingSpec, Transformation};
