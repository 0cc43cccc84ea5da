// Cerebra - confirmation-gated tool orchestrator for a Jira/Confluence assistant
// Library exports

pub mod attribution; // Claim-to-source binding
pub mod cli;
pub mod config;
pub mod errors;
pub mod orchestrator;
pub mod planner; // Utterance -> tool calls, user-story interview
pub mod session;
pub mod similarity;
pub mod tools; // Registry, profiles, gate, engine, collaborators

pub use errors::{OrchestratorError, OrchestratorResult};
pub use orchestrator::{Orchestrator, OrchestratorBuilder, Response};
