// Collaborator implementations, one per capability

pub mod clock;
pub mod confluence;
pub mod graph;
pub(crate) mod http;
pub mod jira;
pub mod requirements;
mod snapshot;
pub mod tool_catalog;
pub mod web_search;

pub use clock::SystemClock;
pub use confluence::ConfluenceClient;
pub use graph::RequirementGraph;
pub use jira::JiraClient;
pub use requirements::{RecordCollection, RequirementStore, StoredRecord};
pub use tool_catalog::{SharedProfiles, ToolCatalogManager};
pub use web_search::GoogleSearch;
