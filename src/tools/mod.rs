// Tool layer: declarations, profiles, confirmation gate, execution
//
// Mutating tools only run through the confirmation gate; read-only tools
// run as soon as they are planned.

pub mod catalog;
pub mod confirmation;
pub mod executor;
pub mod implementations;
pub mod profiles;
pub mod registry;
pub mod types;

pub use catalog::builtin_registry;
pub use confirmation::{ConfirmationGate, ConfirmationVocabulary, ConfirmedCall, GateDecision};
pub use executor::ExecutionEngine;
pub use profiles::{Profile, ToolProfiles};
pub use registry::{Collaborator, ToolRegistry};
pub use types::{Capability, RecordKind, SourceRecord, ToolCall, ToolInputSchema, ToolOutput, ToolSpec};
