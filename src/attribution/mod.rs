// Source attribution
//
// Splits a statement into factual clauses and binds each clause to the
// records that support it. The chosen record set is a greedy minimal cover
// (ties broken by record id). Clauses nothing supports are never emitted
// as fact: they are marked unverified or withheld, per the gap policy.

use crate::errors::OrchestratorError;
use crate::similarity::{coverage, tokenize};
use crate::tools::types::SourceRecord;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, warn};

pub const DEFAULT_SUPPORT_THRESHOLD: f64 = 0.5;
pub const DEFAULT_CONFIDENT_THRESHOLD: f64 = 0.8;

/// What to do with a clause no record supports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GapPolicy {
    /// Keep the clause, prefixed with an unverified marker
    #[default]
    MarkUnverified,
    /// Drop the clause from the rendered statement
    Withhold,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttributionSettings {
    /// Minimum support score for a record to count as a source
    pub support_threshold: f64,
    /// Below this the claim is shown as tentative
    pub confident_threshold: f64,
    pub gap_policy: GapPolicy,
}

impl Default for AttributionSettings {
    fn default() -> Self {
        Self {
            support_threshold: DEFAULT_SUPPORT_THRESHOLD,
            confident_threshold: DEFAULT_CONFIDENT_THRESHOLD,
            gap_policy: GapPolicy::default(),
        }
    }
}

/// Binding of a claim to one record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attribution {
    pub claim_text: String,
    pub source_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimStatus {
    Supported,
    Tentative,
    Unverified,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttributedClause {
    pub text: String,
    /// Cover records supporting this clause, sorted
    pub sources: Vec<String>,
    pub confidence: f64,
    pub status: ClaimStatus,
}

/// A statement with every clause attributed (or flagged)
#[derive(Debug, Clone, Default, Serialize)]
pub struct AttributedStatement {
    pub clauses: Vec<AttributedClause>,
    /// Minimal covering set of record ids, in selection order
    pub cover: Vec<String>,
    #[serde(skip)]
    pub gaps: Vec<OrchestratorError>,
    #[serde(skip)]
    gap_policy: GapPolicy,
}

impl AttributedStatement {
    /// One attribution per (clause, source) pair
    pub fn attributions(&self) -> Vec<Attribution> {
        self.clauses
            .iter()
            .flat_map(|clause| {
                clause.sources.iter().map(move |id| Attribution {
                    claim_text: clause.text.clone(),
                    source_id: id.clone(),
                })
            })
            .collect()
    }

    pub fn has_gaps(&self) -> bool {
        !self.gaps.is_empty()
    }

    pub fn is_tentative(&self) -> bool {
        self.clauses.iter().any(|c| c.status == ClaimStatus::Tentative)
    }

    /// Clauses with their source markers, one per line
    pub fn render(&self) -> String {
        self.clauses
            .iter()
            .filter_map(|clause| match clause.status {
                ClaimStatus::Supported => Some(format!("{} [{}]", clause.text, clause.sources.join(", "))),
                ClaimStatus::Tentative => Some(format!(
                    "(tentative) {} [{}]",
                    clause.text,
                    clause.sources.join(", ")
                )),
                ClaimStatus::Unverified => match self.gap_policy {
                    GapPolicy::MarkUnverified => Some(format!("[unverified] {}", clause.text)),
                    GapPolicy::Withhold => None,
                },
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Clone, Default)]
pub struct SourceAttributor {
    settings: AttributionSettings,
}

impl SourceAttributor {
    pub fn new(settings: AttributionSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &AttributionSettings {
        &self.settings
    }

    /// Records supporting one clause, with their scores
    ///
    /// Records the clause names are checked first: the rest of the clause
    /// must be found in them. A bare mention is full support. When no named
    /// record supports the clause, only records it does not name are scored
    /// on the whole clause.
    fn support(&self, clause: &str, records: &[SourceRecord]) -> Vec<(usize, f64)> {
        let threshold = self.settings.support_threshold;
        let named: Vec<usize> = records
            .iter()
            .enumerate()
            .filter(|(_, record)| names_record(clause, record))
            .map(|(r, _)| r)
            .collect();

        if !named.is_empty() {
            let ids: Vec<&str> = named.iter().map(|&r| records[r].id.as_str()).collect();
            let rest = without_ids(clause, &ids);
            let bare = tokenize(&rest).is_empty();
            let supported: Vec<(usize, f64)> = named
                .iter()
                .map(|&r| {
                    let score = if bare { 1.0 } else { coverage(&rest, &records[r].text) };
                    (r, score)
                })
                .filter(|(_, score)| *score >= threshold)
                .collect();
            if !supported.is_empty() {
                return supported;
            }
            debug!(clause, "Named records do not support clause");
        }

        records
            .iter()
            .enumerate()
            .filter(|(r, _)| !named.contains(r))
            .map(|(r, record)| (r, coverage(clause, &record.text)))
            .filter(|(_, score)| *score >= threshold)
            .collect()
    }

    /// Attribute every factual clause of `statement` to `records`
    pub fn attribute(&self, statement: &str, records: &[SourceRecord]) -> AttributedStatement {
        let clauses = split_clauses(statement);

        // support[i] = (record index, score) pairs at or above the threshold
        let support: Vec<Vec<(usize, f64)>> = clauses
            .iter()
            .map(|clause| self.support(clause, records))
            .collect();

        let cover = greedy_cover(&support, records);
        let cover_set: BTreeSet<usize> = cover.iter().copied().collect();

        let mut gaps = Vec::new();
        let attributed = clauses
            .into_iter()
            .zip(support.iter())
            .map(|(text, supporters)| {
                let chosen: Vec<(usize, f64)> = supporters
                    .iter()
                    .filter(|(r, _)| cover_set.contains(r))
                    .copied()
                    .collect();
                if chosen.is_empty() {
                    warn!(clause = %text, "No source supports clause");
                    gaps.push(OrchestratorError::AttributionGap { clause: text.clone() });
                    return AttributedClause {
                        text,
                        sources: Vec::new(),
                        confidence: 0.0,
                        status: ClaimStatus::Unverified,
                    };
                }

                let confidence = chosen.iter().map(|(_, s)| *s).fold(0.0, f64::max);
                let mut sources: Vec<String> = chosen.iter().map(|(r, _)| records[*r].id.clone()).collect();
                sources.sort();
                sources.dedup();
                let status = if confidence >= self.settings.confident_threshold {
                    ClaimStatus::Supported
                } else {
                    ClaimStatus::Tentative
                };
                AttributedClause {
                    text,
                    sources,
                    confidence,
                    status,
                }
            })
            .collect::<Vec<_>>();

        debug!(
            clauses = attributed.len(),
            sources = cover.len(),
            gaps = gaps.len(),
            "Statement attributed"
        );
        AttributedStatement {
            clauses: attributed,
            cover: cover.into_iter().map(|r| records[r].id.clone()).collect(),
            gaps,
            gap_policy: self.settings.gap_policy,
        }
    }
}

fn names_record(clause: &str, record: &SourceRecord) -> bool {
    !record.id.is_empty() && clause.split_whitespace().any(|word| mentions(word, &record.id))
}

/// Whether a whitespace-separated word is a mention of `id`
fn mentions(word: &str, id: &str) -> bool {
    word.split(|c: char| matches!(c, ',' | ';' | '(' | ')' | '[' | ']' | '"' | '\''))
        .map(|w| w.trim_end_matches(|c: char| matches!(c, '.' | ':' | '!' | '?')))
        .any(|w| w.eq_ignore_ascii_case(id))
}

/// The clause with every mention of `ids` removed
fn without_ids(clause: &str, ids: &[&str]) -> String {
    clause
        .split_whitespace()
        .filter(|word| !ids.iter().any(|id| mentions(word, id)))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Greedy set cover over the clauses that have any support
///
/// Picks the record covering most still-uncovered clauses; ties go to the
/// smaller record id.
fn greedy_cover(support: &[Vec<(usize, f64)>], records: &[SourceRecord]) -> Vec<usize> {
    let mut uncovered: BTreeSet<usize> = support
        .iter()
        .enumerate()
        .filter(|(_, s)| !s.is_empty())
        .map(|(i, _)| i)
        .collect();
    let mut chosen = Vec::new();

    while !uncovered.is_empty() {
        let best = (0..records.len())
            .filter(|r| !chosen.contains(r))
            .map(|r| {
                let gain = uncovered
                    .iter()
                    .filter(|&&clause| support[clause].iter().any(|(s, _)| *s == r))
                    .count();
                (r, gain)
            })
            .filter(|(_, gain)| *gain > 0)
            .max_by(|(ra, ga), (rb, gb)| ga.cmp(gb).then_with(|| records[*rb].id.cmp(&records[*ra].id)));

        let Some((record, _)) = best else {
            break;
        };
        uncovered.retain(|&clause| !support[clause].iter().any(|(s, _)| *s == record));
        chosen.push(record);
    }
    chosen
}

/// Factual clauses of a statement
///
/// Lines are split into sentences; list markers are stripped and heading
/// lines (ending in ':') are skipped.
pub fn split_clauses(statement: &str) -> Vec<String> {
    let mut clauses = Vec::new();
    for line in statement.lines() {
        let line = strip_marker(line.trim());
        if line.is_empty() || line.ends_with(':') {
            continue;
        }
        let mut current = String::new();
        let mut chars = line.chars().peekable();
        while let Some(c) = chars.next() {
            current.push(c);
            let at_boundary = matches!(c, '.' | '!' | '?') && chars.peek().map_or(true, |n| n.is_whitespace());
            if at_boundary {
                push_clause(&mut clauses, &current);
                current.clear();
            }
        }
        push_clause(&mut clauses, &current);
    }
    clauses
}

fn push_clause(clauses: &mut Vec<String>, text: &str) {
    let text = text.trim();
    if !text.is_empty() && text.chars().any(|c| c.is_alphanumeric()) {
        clauses.push(text.to_string());
    }
}

fn strip_marker(line: &str) -> &str {
    let line = line.trim_start_matches(|c: char| c == '-' || c == '*').trim_start();
    match line.split_once(". ") {
        Some((num, rest)) if !num.is_empty() && num.chars().all(|c| c.is_ascii_digit()) => rest,
        _ => line,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::types::RecordKind;

    fn issue(id: &str, text: &str) -> SourceRecord {
        SourceRecord::new(id, RecordKind::Issue, text)
    }

    #[test]
    fn test_split_clauses() {
        let clauses = split_clauses(
            "Issue PROJ-1:\n  Summary: Login page\n- Status is open. Assignee is Alice.\n  1. Version 2.0 ships",
        );
        assert_eq!(
            clauses,
            vec!["Summary: Login page", "Status is open.", "Assignee is Alice.", "Version 2.0 ships"]
        );
    }

    #[test]
    fn test_every_clause_attributed() {
        let records = vec![
            issue("PROJ-1", "Summary: Login page. Status: Open. Assignee: Alice"),
            issue("PROJ-2", "Summary: Export invoices. Status: Done"),
        ];
        let statement = "PROJ-1 status is Open.\nExport invoices status is done.";
        let result = SourceAttributor::default().attribute(statement, &records);

        assert!(!result.has_gaps());
        assert_eq!(result.clauses[0].sources, vec!["PROJ-1"]);
        assert_eq!(result.clauses[0].status, ClaimStatus::Supported);
        assert_eq!(result.clauses[1].sources, vec!["PROJ-2"]);
        assert_eq!(result.attributions().len(), 2);
    }

    #[test]
    fn test_cover_is_minimal() {
        let records = vec![
            issue("A-1", "login page email password"),
            issue("A-2", "login page email password reset link"),
        ];
        let statement = "login page email.\nPassword reset link.";
        let result = SourceAttributor::default().attribute(statement, &records);
        // A-2 alone supports both clauses
        assert_eq!(result.cover, vec!["A-2"]);
        assert!(result.clauses.iter().all(|c| c.sources == vec!["A-2"]));
    }

    #[test]
    fn test_ties_broken_by_record_id() {
        let records = vec![issue("B-2", "status open"), issue("B-1", "status open")];
        let result = SourceAttributor::default().attribute("Status open", &records);
        assert_eq!(result.cover, vec!["B-1"]);
    }

    #[test]
    fn test_weak_support_is_tentative() {
        let records = vec![issue("C-1", "release planned for may")];
        // 2 of 3 words found: 0.67 coverage
        let result = SourceAttributor::default().attribute("Release planned Friday", &records);
        assert_eq!(result.clauses[0].status, ClaimStatus::Tentative);
        assert!(result.is_tentative());
        assert_eq!(result.render(), "(tentative) Release planned Friday [C-1]");
    }

    #[test]
    fn test_unsupported_clause_fails_closed() {
        let records = vec![issue("D-1", "Summary: Login page")];
        let statement = "Summary: Login page\nThe team loves this feature";
        let marked = SourceAttributor::default().attribute(statement, &records);
        assert_eq!(marked.gaps.len(), 1);
        assert!(matches!(marked.gaps[0], OrchestratorError::AttributionGap { .. }));
        assert_eq!(
            marked.render(),
            "Summary: Login page [D-1]\n[unverified] The team loves this feature"
        );

        let withheld = SourceAttributor::new(AttributionSettings {
            gap_policy: GapPolicy::Withhold,
            ..Default::default()
        })
        .attribute(statement, &records);
        assert_eq!(withheld.render(), "Summary: Login page [D-1]");
    }

    #[test]
    fn test_named_record_outranks_word_overlap() {
        let records = vec![
            issue("PROJ-1", "Issue PROJ-1: Summary: Login page"),
            issue("PROJ-2", "Issue PROJ-2: Summary: Login page redesign"),
        ];
        let result = SourceAttributor::default().attribute("PROJ-2 summary is Login page redesign", &records);
        assert_eq!(result.cover, vec!["PROJ-2"]);
        assert_eq!(result.clauses[0].sources, vec!["PROJ-2"]);
    }

    #[test]
    fn test_bare_id_mention_is_supported() {
        let records = vec![issue("PROJ-42", "completely unrelated words")];
        let result = SourceAttributor::default().attribute("PROJ-42.", &records);
        assert_eq!(result.clauses[0].confidence, 1.0);
        assert_eq!(result.clauses[0].status, ClaimStatus::Supported);
    }

    #[test]
    fn test_claim_contradicting_named_record_is_unverified() {
        let records = vec![issue("PROJ-1", "Issue PROJ-1:\n  Summary: Login page\n  Status: Open")];
        let result =
            SourceAttributor::default().attribute("PROJ-1 was deleted by the CEO yesterday", &records);

        assert_eq!(result.clauses[0].status, ClaimStatus::Unverified);
        assert!(result.clauses[0].sources.is_empty());
        assert_eq!(result.gaps.len(), 1);
        assert_eq!(result.render(), "[unverified] PROJ-1 was deleted by the CEO yesterday");
        assert!(result.cover.is_empty());
    }

    #[test]
    fn test_named_record_checked_against_rest_of_clause() {
        let records = vec![issue("PROJ-1", "Issue PROJ-1:\n  Summary: Login page\n  Status: Open")];
        let result = SourceAttributor::default().attribute("PROJ-1 status is Open", &records);
        assert_eq!(result.clauses[0].sources, vec!["PROJ-1"]);
        assert_eq!(result.clauses[0].status, ClaimStatus::Supported);
    }

    #[test]
    fn test_unnamed_record_can_carry_clause() {
        // The viewer report repeats the key; the issue record does not say "opened"
        let records = vec![
            issue("ISSUE-1", "Issue ISSUE-1 updated."),
            SourceRecord::new("call_1_0_view", RecordKind::ToolReport, "Opened ISSUE-1: https://x/browse/ISSUE-1"),
        ];
        let result = SourceAttributor::default()
            .attribute("Opened ISSUE-1: https://x/browse/ISSUE-1", &records);
        assert_eq!(result.clauses[0].sources, vec!["call_1_0_view"]);
    }
}
