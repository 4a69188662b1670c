//! Prefix-scoped topic registry.
//!
//! Maps logical topic names to the identifiers the authority assigned them.
//! Every remote topic is named `prefix-logical`; the registry persists the
//! mapping and reconciles it with the authority's listing on demand.

mod manager;
mod mapping;

pub use manager::{TopicRegistry, DEFAULT_CONTROL_TOPIC};
pub use mapping::MappingFile;
