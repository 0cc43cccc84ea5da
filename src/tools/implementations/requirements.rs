// Requirement store - requirements, acceptance criteria and test cases
//
// In-process similarity store shared by the three record collections.
// Ids are PREFIX-n with n one above the highest existing number. The store
// is optionally persisted as JSON (written to a temp file, then renamed).

use crate::similarity::semantic_similarity;
use crate::tools::implementations::snapshot;
use crate::tools::registry::Collaborator;
use crate::tools::types::{Capability, RecordKind, SourceRecord, ToolOutput};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

const DEFAULT_RESULTS: usize = 3;

/// Record collection within the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordCollection {
    Requirements,
    AcceptanceCriteria,
    TestCases,
}

impl RecordCollection {
    pub fn prefix(&self) -> &'static str {
        match self {
            RecordCollection::Requirements => "REQ-",
            RecordCollection::AcceptanceCriteria => "AC-",
            RecordCollection::TestCases => "TC-",
        }
    }

    /// Value of the `type` metadata field
    pub fn type_name(&self) -> &'static str {
        match self {
            RecordCollection::Requirements => "Requirement",
            RecordCollection::AcceptanceCriteria => "AcceptanceCriterion",
            RecordCollection::TestCases => "TestCase",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            RecordCollection::Requirements => "requirement",
            RecordCollection::AcceptanceCriteria => "acceptance criterion",
            RecordCollection::TestCases => "test case",
        }
    }

    pub fn id_param(&self) -> &'static str {
        match self {
            RecordCollection::Requirements => "requirement_id",
            RecordCollection::AcceptanceCriteria => "criterion_id",
            RecordCollection::TestCases => "test_case_id",
        }
    }

    /// Tool-name suffix, e.g. `acceptance_criterion` / `acceptance_criteria`
    pub fn tool_suffix(&self, plural: bool) -> &'static str {
        match (self, plural) {
            (RecordCollection::Requirements, false) => "requirement",
            (RecordCollection::Requirements, true) => "requirements",
            (RecordCollection::AcceptanceCriteria, false) => "acceptance_criterion",
            (RecordCollection::AcceptanceCriteria, true) => "acceptance_criteria",
            (RecordCollection::TestCases, false) => "test_case",
            (RecordCollection::TestCases, true) => "test_cases",
        }
    }

    /// Collection named by a phrase such as "test cases" or "acceptance criterion"
    pub fn from_phrase(phrase: &str) -> Option<Self> {
        Self::from_suffix(&phrase.trim().to_lowercase().replace(' ', "_"))
    }

    pub fn record_kind(&self) -> RecordKind {
        match self {
            RecordCollection::Requirements => RecordKind::Requirement,
            RecordCollection::AcceptanceCriteria => RecordKind::AcceptanceCriterion,
            RecordCollection::TestCases => RecordKind::TestCase,
        }
    }

    fn from_suffix(suffix: &str) -> Option<Self> {
        match suffix {
            "requirement" | "requirements" => Some(RecordCollection::Requirements),
            "acceptance_criterion" | "acceptance_criteria" => Some(RecordCollection::AcceptanceCriteria),
            "test_case" | "test_cases" => Some(RecordCollection::TestCases),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StoreOp {
    Add,
    Update,
    Delete,
    Similar,
    All,
}

/// Split a tool name into operation and collection
fn parse_tool(tool_name: &str) -> Option<(StoreOp, RecordCollection)> {
    let (op, suffix) = if let Some(rest) = tool_name.strip_prefix("retrieve_similar_") {
        (StoreOp::Similar, rest)
    } else if let Some(rest) = tool_name.strip_prefix("get_all_") {
        (StoreOp::All, rest)
    } else if let Some(rest) = tool_name.strip_prefix("add_") {
        (StoreOp::Add, rest)
    } else if let Some(rest) = tool_name.strip_prefix("update_") {
        (StoreOp::Update, rest)
    } else if let Some(rest) = tool_name.strip_prefix("delete_") {
        (StoreOp::Delete, rest)
    } else {
        return None;
    };
    RecordCollection::from_suffix(suffix).map(|c| (op, c))
}

/// A stored record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl StoredRecord {
    fn source(&self, collection: RecordCollection) -> SourceRecord {
        SourceRecord::new(&self.id, collection.record_kind(), &self.text)
    }

    fn type_name(&self) -> Option<&str> {
        self.metadata.get("type").and_then(|v| v.as_str())
    }

    fn matches_filter(&self, filter: &Map<String, Value>) -> bool {
        filter.iter().all(|(k, v)| self.metadata.get(k) == Some(v))
    }
}

/// On-disk format
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreSnapshot {
    version: u32,
    records: Vec<StoredRecord>,
}

/// Similarity store for requirement-like records
pub struct RequirementStore {
    records: RwLock<BTreeMap<String, StoredRecord>>,
    path: Option<PathBuf>,
}

impl RequirementStore {
    /// Store that lives only in memory
    pub fn in_memory() -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
            path: None,
        }
    }

    /// Store persisted at `path`, loading existing records
    pub fn open(path: &Path) -> Result<Self> {
        let records = match snapshot::load::<StoreSnapshot>(path, "requirement store")? {
            Some(snapshot) => {
                info!("Loaded {} records from {}", snapshot.records.len(), path.display());
                snapshot
                    .records
                    .into_iter()
                    .map(|r| (r.id.clone(), r))
                    .collect()
            }
            None => {
                debug!("No requirement store at {}, starting empty", path.display());
                BTreeMap::new()
            }
        };

        Ok(Self {
            records: RwLock::new(records),
            path: Some(path.to_path_buf()),
        })
    }

    /// Add a record with a generated id
    pub async fn add(
        &self,
        collection: RecordCollection,
        text: &str,
        metadata: Option<&Value>,
    ) -> Result<StoredRecord> {
        if text.trim().is_empty() {
            bail!("{} text cannot be empty", collection.label());
        }
        let mut metadata = parse_metadata(metadata)?;
        metadata.insert("type".into(), json!(collection.type_name()));
        metadata.insert("change_date".into(), json!(Utc::now().to_rfc3339()));

        let mut records = self.records.write().await;
        let id = next_id(collection, &records);
        let record = StoredRecord {
            id: id.clone(),
            text: text.to_string(),
            metadata,
        };
        let mut next = records.clone();
        next.insert(id, record.clone());
        self.commit(&mut records, next)?;
        info!(id = %record.id, "Added {}", collection.label());
        Ok(record)
    }

    /// Update text and/or replace metadata of an existing record
    pub async fn update(
        &self,
        collection: RecordCollection,
        id: &str,
        text: Option<&str>,
        metadata: Option<&Value>,
    ) -> Result<StoredRecord> {
        if text.is_none() && metadata.is_none() {
            bail!("Must provide either new text or new metadata to update");
        }
        if let Some(t) = text {
            if t.trim().is_empty() {
                bail!("New {} text cannot be empty", collection.label());
            }
        }

        let mut records = self.records.write().await;
        let mut next = records.clone();
        let record = next
            .get_mut(id)
            .with_context(|| format!("{} '{}' not found", collection.label(), id))?;
        if record.type_name() != Some(collection.type_name()) {
            bail!(
                "'{}' is not a {} (type: {})",
                id,
                collection.label(),
                record.type_name().unwrap_or("unknown")
            );
        }

        if let Some(t) = text {
            record.text = t.to_string();
        }
        if metadata.is_some() {
            let mut replacement = parse_metadata(metadata)?;
            if replacement.get("type").and_then(|v| v.as_str()) != Some(collection.type_name()) {
                warn!(id, "Metadata update without matching type; keeping {}", collection.type_name());
                replacement.insert("type".into(), json!(collection.type_name()));
            }
            record.metadata = replacement;
        }
        record
            .metadata
            .insert("change_date".into(), json!(Utc::now().to_rfc3339()));

        let updated = record.clone();
        self.commit(&mut records, next)?;
        Ok(updated)
    }

    /// Delete a record of the given collection
    pub async fn delete(&self, collection: RecordCollection, id: &str) -> Result<StoredRecord> {
        let mut records = self.records.write().await;
        match records.get(id) {
            Some(r) if r.type_name() == Some(collection.type_name()) => {}
            Some(_) => bail!("'{}' is not a {}", id, collection.label()),
            None => bail!("{} '{}' not found", collection.label(), id),
        }
        let mut next = records.clone();
        let removed = next
            .remove(id)
            .with_context(|| format!("{} '{}' not found", collection.label(), id))?;
        self.commit(&mut records, next)?;
        Ok(removed)
    }

    /// Records most similar to `query`, best first
    pub async fn similar(
        &self,
        collection: RecordCollection,
        query: &str,
        n_results: usize,
        filter: Option<&Value>,
    ) -> Result<Vec<(StoredRecord, f64)>> {
        if query.trim().is_empty() {
            bail!("Query text cannot be empty");
        }
        if n_results == 0 {
            bail!("Number of results must be positive");
        }
        let filter = parse_metadata(filter)?;

        let records = self.records.read().await;
        let mut scored: Vec<(StoredRecord, f64)> = records
            .values()
            .filter(|r| r.type_name() == Some(collection.type_name()))
            .filter(|r| r.matches_filter(&filter))
            .map(|r| (r.clone(), semantic_similarity(query, &r.text)))
            .filter(|(_, score)| *score > 0.0)
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| id_order(&a.0.id).cmp(&id_order(&b.0.id)))
        });
        scored.truncate(n_results);
        Ok(scored)
    }

    /// All records of a collection in id order
    pub async fn all(&self, collection: RecordCollection) -> Vec<StoredRecord> {
        let records = self.records.read().await;
        let mut list: Vec<StoredRecord> = records
            .values()
            .filter(|r| r.type_name() == Some(collection.type_name()))
            .cloned()
            .collect();
        list.sort_by_key(|r| id_order(&r.id));
        list
    }

    /// Persist `next`, then make it the live map; a failed write changes nothing
    fn commit(
        &self,
        records: &mut BTreeMap<String, StoredRecord>,
        next: BTreeMap<String, StoredRecord>,
    ) -> Result<()> {
        if let Some(path) = &self.path {
            let snapshot = StoreSnapshot {
                version: 1,
                records: next.values().cloned().collect(),
            };
            snapshot::write(path, &snapshot, "requirement store")?;
        }
        *records = next;
        Ok(())
    }
}

/// Sort key: prefix, then numeric suffix (REQ-2 before REQ-10)
fn id_order(id: &str) -> (String, u64) {
    match id.rsplit_once('-') {
        Some((prefix, num)) => (prefix.to_string(), num.parse().unwrap_or(u64::MAX)),
        None => (id.to_string(), u64::MAX),
    }
}

fn next_id(collection: RecordCollection, records: &BTreeMap<String, StoredRecord>) -> String {
    let prefix = collection.prefix();
    let max = records
        .keys()
        .filter_map(|id| id.strip_prefix(prefix))
        .filter_map(|num| num.parse::<u64>().ok())
        .max()
        .unwrap_or(0);
    format!("{}{}", prefix, max + 1)
}

fn parse_metadata(value: Option<&Value>) -> Result<Map<String, Value>> {
    match value {
        None | Some(Value::Null) => Ok(Map::new()),
        Some(Value::Object(map)) => Ok(map.clone()),
        // Metadata may arrive as a JSON string
        Some(Value::String(s)) if !s.trim().is_empty() => {
            match serde_json::from_str::<Value>(s).context("Invalid JSON format provided for metadata")? {
                Value::Object(map) => Ok(map),
                _ => bail!("Metadata must be a JSON object"),
            }
        }
        Some(Value::String(_)) => Ok(Map::new()),
        Some(_) => bail!("Metadata must be a JSON object"),
    }
}

fn record_report(record: &StoredRecord) -> String {
    format!("{}: {}", record.id, record.text)
}

#[async_trait]
impl Collaborator for RequirementStore {
    fn capability(&self) -> Capability {
        Capability::RequirementStore
    }

    async fn invoke(&self, tool_name: &str, input: &Value) -> Result<ToolOutput> {
        let (op, collection) =
            parse_tool(tool_name).with_context(|| format!("Unsupported tool '{}'", tool_name))?;
        let id_param = collection.id_param();

        match op {
            StoreOp::Add => {
                let text = input["text"].as_str().context("Missing text parameter")?;
                let record = self.add(collection, text, input.get("metadata")).await?;
                Ok(ToolOutput::report(format!(
                    "{} '{}' added.",
                    capitalize(collection.label()),
                    record.id
                ))
                .with_data(serde_json::to_value(&record)?)
                .affecting(&record.id))
            }
            StoreOp::Update => {
                let id = input[id_param]
                    .as_str()
                    .with_context(|| format!("Missing {} parameter", id_param))?;
                let record = self
                    .update(collection, id, input["text"].as_str(), input.get("metadata").filter(|v| !v.is_null()))
                    .await?;
                Ok(ToolOutput::report(format!(
                    "{} '{}' updated.",
                    capitalize(collection.label()),
                    record.id
                ))
                .with_data(serde_json::to_value(&record)?)
                .affecting(&record.id))
            }
            StoreOp::Delete => {
                let id = input[id_param]
                    .as_str()
                    .with_context(|| format!("Missing {} parameter", id_param))?;
                let removed = self.delete(collection, id).await?;
                Ok(ToolOutput::report(format!(
                    "{} '{}' deleted.",
                    capitalize(collection.label()),
                    removed.id
                ))
                .affecting(&removed.id))
            }
            StoreOp::Similar => {
                let query = input["query"].as_str().context("Missing query parameter")?;
                let n = input["n_results"]
                    .as_u64()
                    .map(|n| n as usize)
                    .unwrap_or(DEFAULT_RESULTS);
                let matches = self.similar(collection, query, n, input.get("filter")).await?;
                if matches.is_empty() {
                    return Ok(ToolOutput::report(format!("No similar {} records found.", collection.label())));
                }
                let mut lines = vec![format!("Found {} similar record(s):", matches.len())];
                for (record, score) in &matches {
                    lines.push(format!("  - {} (similarity {:.2})", record_report(record), score));
                }
                let data = matches
                    .iter()
                    .map(|(r, s)| json!({"id": r.id, "text": r.text, "similarity": s, "metadata": r.metadata}))
                    .collect();
                Ok(ToolOutput::report(lines.join("\n"))
                    .with_data(Value::Array(data))
                    .with_records(matches.iter().map(|(r, _)| r.source(collection))))
            }
            StoreOp::All => {
                let records = self.all(collection).await;
                if records.is_empty() {
                    return Ok(ToolOutput::report(format!("No {} records stored.", collection.label())));
                }
                let lines: Vec<String> = records.iter().map(|r| format!("  - {}", record_report(r))).collect();
                Ok(ToolOutput::report(format!("{} record(s):\n{}", records.len(), lines.join("\n")))
                    .with_data(serde_json::to_value(&records)?)
                    .with_records(records.iter().map(|r| r.source(collection))))
            }
        }
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}
