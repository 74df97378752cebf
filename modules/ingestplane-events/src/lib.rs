//! Append-only provenance log. Domain-agnostic storage, typed event
//! construction left to callers in `ingestplane-repo`.

pub mod store;
pub mod types;

pub use store::{append_in, ProvenanceLog};
pub use types::{AppendEvent, ProvenanceEvent};
