// Requirement graph - nodes keyed by requirement id, typed directed edges
//
// Optionally persisted as a JSON snapshot; a change becomes visible only
// after its snapshot was written.

use crate::tools::implementations::snapshot;
use crate::tools::registry::Collaborator;
use crate::tools::types::{Capability, RecordKind, SourceRecord, ToolOutput};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info};

static RELATIONSHIP_TYPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z][A-Z0-9_]*$").expect("valid relationship regex"));

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequirementNode {
    pub id: String,
    pub text: String,
    pub properties: Map<String, Value>,
    pub change_date: String,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Relationship {
    pub start_id: String,
    pub relationship_type: String,
    pub end_id: String,
}

impl Relationship {
    fn id(&self) -> String {
        format!("{}-[{}]->{}", self.start_id, self.relationship_type, self.end_id)
    }
}

#[derive(Debug, Clone, Default)]
struct GraphState {
    nodes: BTreeMap<String, RequirementNode>,
    edges: BTreeSet<Relationship>,
}

/// On-disk format
#[derive(Debug, Default, Serialize, Deserialize)]
struct GraphSnapshot {
    version: u32,
    nodes: Vec<RequirementNode>,
    edges: Vec<Relationship>,
}

/// In-process requirement graph
#[derive(Default)]
pub struct RequirementGraph {
    state: RwLock<GraphState>,
    path: Option<PathBuf>,
}

impl RequirementGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Graph persisted at `path`, loading an existing snapshot
    pub fn open(path: &Path) -> Result<Self> {
        let state = match snapshot::load::<GraphSnapshot>(path, "requirement graph")? {
            Some(snapshot) => {
                info!(
                    nodes = snapshot.nodes.len(),
                    edges = snapshot.edges.len(),
                    "Loaded requirement graph from {}",
                    path.display()
                );
                GraphState {
                    nodes: snapshot.nodes.into_iter().map(|n| (n.id.clone(), n)).collect(),
                    edges: snapshot.edges.into_iter().collect(),
                }
            }
            None => {
                debug!("No requirement graph at {}, starting empty", path.display());
                GraphState::default()
            }
        };
        Ok(Self {
            state: RwLock::new(state),
            path: Some(path.to_path_buf()),
        })
    }

    /// Merge a node by id; returns true when it was created
    pub async fn upsert_node(
        &self,
        id: &str,
        text: &str,
        properties: Option<&Value>,
    ) -> Result<(RequirementNode, bool)> {
        if id.trim().is_empty() {
            bail!("Requirement id cannot be empty");
        }
        if text.trim().is_empty() {
            bail!("Requirement text cannot be empty");
        }
        let properties = match properties {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map.clone(),
            Some(_) => bail!("Properties must be a JSON object"),
        };

        let mut state = self.state.write().await;
        let node = RequirementNode {
            id: id.to_string(),
            text: text.to_string(),
            properties,
            change_date: Utc::now().to_rfc3339(),
        };
        let mut next = state.clone();
        let created = next.nodes.insert(id.to_string(), node.clone()).is_none();
        self.commit(&mut state, next)?;
        info!(id, created, "Requirement node merged");
        Ok((node, created))
    }

    /// Add a typed edge; returns false when it already existed
    pub async fn relate(&self, start_id: &str, end_id: &str, relationship_type: &str) -> Result<(Relationship, bool)> {
        let relationship_type = relationship_type.trim().to_uppercase();
        if !RELATIONSHIP_TYPE.is_match(&relationship_type) {
            bail!(
                "Invalid relationship type '{}'. Use letters, digits and underscores, starting with a letter (e.g. DEPENDS_ON)",
                relationship_type
            );
        }

        let mut state = self.state.write().await;
        for id in [start_id, end_id] {
            if !state.nodes.contains_key(id) {
                bail!("Requirement node '{}' not found; add it to the graph first", id);
            }
        }
        let edge = Relationship {
            start_id: start_id.to_string(),
            relationship_type,
            end_id: end_id.to_string(),
        };
        if state.edges.contains(&edge) {
            return Ok((edge, false));
        }
        let mut next = state.clone();
        next.edges.insert(edge.clone());
        self.commit(&mut state, next)?;
        Ok((edge, true))
    }

    /// Edges touching a node, outgoing first
    pub async fn relationships(&self, id: &str) -> Result<Vec<Relationship>> {
        let state = self.state.read().await;
        if !state.nodes.contains_key(id) {
            bail!("Requirement node '{}' not found", id);
        }
        let (mut outgoing, incoming): (Vec<_>, Vec<_>) = state
            .edges
            .iter()
            .filter(|e| e.start_id == id || e.end_id == id)
            .cloned()
            .partition(|e| e.start_id == id);
        outgoing.extend(incoming);
        Ok(outgoing)
    }

    /// Persist `next`, then make it the live state
    fn commit(&self, state: &mut GraphState, next: GraphState) -> Result<()> {
        if let Some(path) = &self.path {
            let snapshot = GraphSnapshot {
                version: 1,
                nodes: next.nodes.values().cloned().collect(),
                edges: next.edges.iter().cloned().collect(),
            };
            snapshot::write(path, &snapshot, "requirement graph")?;
        }
        *state = next;
        Ok(())
    }
}

fn required<'a>(input: &'a Value, key: &str) -> Result<&'a str> {
    input[key]
        .as_str()
        .with_context(|| format!("Missing {} parameter", key))
}

#[async_trait]
impl Collaborator for RequirementGraph {
    fn capability(&self) -> Capability {
        Capability::RequirementGraph
    }

    async fn invoke(&self, tool_name: &str, input: &Value) -> Result<ToolOutput> {
        match tool_name {
            "add_or_update_requirement_node" => {
                let id = required(input, "requirement_id")?;
                let text = required(input, "text")?;
                let (node, created) = self.upsert_node(id, text, input.get("properties")).await?;
                let verb = if created { "added to" } else { "updated in" };
                Ok(ToolOutput::report(format!("Requirement '{}' {} the graph.", node.id, verb))
                    .with_data(serde_json::to_value(&node)?)
                    .affecting(&node.id))
            }
            "add_requirement_relationship" => {
                let start = required(input, "start_id")?;
                let end = required(input, "end_id")?;
                let kind = required(input, "relationship_type")?;
                let (edge, created) = self.relate(start, end, kind).await?;
                let report = if created {
                    format!("Relationship {} added.", edge.id())
                } else {
                    format!("Relationship {} already exists.", edge.id())
                };
                Ok(ToolOutput::report(report)
                    .with_data(serde_json::to_value(&edge)?)
                    .affecting(edge.id()))
            }
            "get_requirement_relationships" => {
                let id = required(input, "requirement_id")?;
                let edges = self.relationships(id).await?;
                if edges.is_empty() {
                    return Ok(ToolOutput::report(format!("Requirement '{}' has no relationships.", id)));
                }
                let lines: Vec<String> = edges.iter().map(|e| format!("  - {}", e.id())).collect();
                Ok(ToolOutput::report(format!("Relationships of {}:\n{}", id, lines.join("\n")))
                    .with_data(json!(edges))
                    .with_records(
                        edges
                            .iter()
                            .map(|e| SourceRecord::new(e.id(), RecordKind::Relationship, e.id())),
                    ))
            }
            other => bail!("Unsupported tool '{}'", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_upsert_merges_by_id() {
        let graph = RequirementGraph::new();
        let (_, created) = graph.upsert_node("REQ-1", "Login", None).await.unwrap();
        assert!(created);
        let (node, created) = graph
            .upsert_node("REQ-1", "Login via email", Some(&json!({"priority": "High"})))
            .await
            .unwrap();
        assert!(!created);
        assert_eq!(node.text, "Login via email");
        assert_eq!(node.properties["priority"], "High");
    }

    #[tokio::test]
    async fn test_empty_node_text_rejected() {
        let graph = RequirementGraph::new();
        let err = graph.upsert_node("REQ-1", "   ", None).await.unwrap_err();
        assert!(err.to_string().contains("text cannot be empty"));
        assert!(graph.relationships("REQ-1").await.is_err());
    }

    #[tokio::test]
    async fn test_graph_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("graph/requirements-graph.json");
        {
            let graph = RequirementGraph::open(&path).unwrap();
            graph.upsert_node("REQ-1", "Login", None).await.unwrap();
            graph.upsert_node("REQ-2", "Password reset", None).await.unwrap();
            graph.relate("REQ-2", "REQ-1", "DEPENDS_ON").await.unwrap();
        }
        assert!(!path.with_extension("tmp").exists());

        let reopened = RequirementGraph::open(&path).unwrap();
        let edges = reopened.relationships("REQ-1").await.unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].id(), "REQ-2-[DEPENDS_ON]->REQ-1");
    }

    #[tokio::test]
    async fn test_failed_graph_write_changes_nothing() {
        let dir = TempDir::new().unwrap();
        let graph_dir = dir.path().join("graph");
        let graph = RequirementGraph::open(&graph_dir.join("graph.json")).unwrap();
        graph.upsert_node("REQ-1", "Login", None).await.unwrap();

        std::fs::remove_dir_all(&graph_dir).unwrap();
        std::fs::write(&graph_dir, "blocker").unwrap();

        assert!(graph.upsert_node("REQ-2", "Reset", None).await.is_err());
        assert!(graph.relationships("REQ-2").await.is_err());
        assert!(graph.relate("REQ-1", "REQ-1", "REFINES").await.is_err());
        assert!(graph.relationships("REQ-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_relationship_requires_both_nodes() {
        let graph = RequirementGraph::new();
        graph.upsert_node("REQ-1", "Login", None).await.unwrap();
        let err = graph.relate("REQ-1", "REQ-2", "DEPENDS_ON").await.unwrap_err();
        assert!(err.to_string().contains("REQ-2"));
    }

    #[tokio::test]
    async fn test_relationship_type_validated_and_idempotent() {
        let graph = RequirementGraph::new();
        graph.upsert_node("REQ-1", "Login", None).await.unwrap();
        graph.upsert_node("REQ-2", "Password reset", None).await.unwrap();

        assert!(graph.relate("REQ-1", "REQ-2", "depends on").await.is_err());

        let (edge, created) = graph.relate("REQ-2", "REQ-1", "depends_on").await.unwrap();
        assert!(created);
        assert_eq!(edge.relationship_type, "DEPENDS_ON");
        let (_, again) = graph.relate("REQ-2", "REQ-1", "DEPENDS_ON").await.unwrap();
        assert!(!again);

        let edges = graph.relationships("REQ-1").await.unwrap();
        assert_eq!(edges.len(), 1);
    }

    #[tokio::test]
    async fn test_invoke_lists_relationships_as_records() {
        let graph = RequirementGraph::new();
        graph.upsert_node("REQ-1", "Login", None).await.unwrap();
        graph.upsert_node("REQ-2", "Reset", None).await.unwrap();
        graph.relate("REQ-1", "REQ-2", "REFINES").await.unwrap();

        let output = graph
            .invoke("get_requirement_relationships", &json!({"requirement_id": "REQ-1"}))
            .await
            .unwrap();
        assert_eq!(output.records.len(), 1);
        assert!(output.report.contains("REQ-1-[REFINES]->REQ-2"));
    }
}
