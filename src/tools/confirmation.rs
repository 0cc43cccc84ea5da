// Confirmation gate for mutating tool calls
//
// One proposal at a time: Proposed -> Confirmed | Rejected | Expired.
// A `ConfirmedCall` can only be obtained from the Confirmed transition and
// is the only input the executor accepts for mutating calls.

use crate::errors::{OrchestratorError, OrchestratorResult};
use crate::tools::types::{ToolCall, ToolSpec};
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use tracing::{debug, info, warn};

const PREVIEW_VALUE_LIMIT: usize = 200;

pub const DEFAULT_AFFIRMATIVE: &[&str] = &["yes", "y", "confirm", "proceed", "ok", "ja"];
pub const DEFAULT_NEGATIVE: &[&str] = &["no", "n", "cancel", "reject", "abort", "stop", "nein"];

/// State of a pending confirmation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationState {
    Proposed,
    Confirmed,
    Rejected,
    Expired,
}

/// How a reply was classified against the vocabulary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    Affirmative,
    Negative,
    Ambiguous,
}

/// Fixed reply vocabulary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmationVocabulary {
    affirmative: Vec<String>,
    negative: Vec<String>,
}

impl ConfirmationVocabulary {
    pub fn new(affirmative: Vec<String>, negative: Vec<String>) -> Self {
        let normalize = |words: Vec<String>| -> Vec<String> {
            words.iter().map(|w| normalize_reply(w)).filter(|w| !w.is_empty()).collect()
        };
        Self {
            affirmative: normalize(affirmative),
            negative: normalize(negative),
        }
    }

    /// Whole-reply match; anything else is ambiguous
    pub fn classify(&self, reply: &str) -> ReplyKind {
        let reply = normalize_reply(reply);
        if self.affirmative.iter().any(|w| *w == reply) {
            ReplyKind::Affirmative
        } else if self.negative.iter().any(|w| *w == reply) {
            ReplyKind::Negative
        } else {
            ReplyKind::Ambiguous
        }
    }
}

impl Default for ConfirmationVocabulary {
    fn default() -> Self {
        let words = |list: &[&str]| list.iter().map(|w| w.to_string()).collect();
        Self::new(words(DEFAULT_AFFIRMATIVE), words(DEFAULT_NEGATIVE))
    }
}

fn normalize_reply(reply: &str) -> String {
    reply
        .trim()
        .trim_end_matches(|c: char| matches!(c, '.' | '!' | ','))
        .trim()
        .to_lowercase()
}

/// A mutating call awaiting the user's decision
#[derive(Debug, Clone, PartialEq)]
pub struct PendingConfirmation {
    pub tool_call: ToolCall,
    pub preview_text: String,
    pub created_at: DateTime<Utc>,
    pub state: ConfirmationState,
}

/// Token proving a call passed the gate
#[derive(Debug)]
pub struct ConfirmedCall {
    call: ToolCall,
}

impl ConfirmedCall {
    pub fn call(&self) -> &ToolCall {
        &self.call
    }

    pub(crate) fn into_call(self) -> ToolCall {
        self.call
    }
}

/// Result of feeding a reply to the gate
#[derive(Debug)]
pub enum GateDecision {
    /// Explicit affirmative reply; execute the call
    Confirmed(ConfirmedCall),
    /// Explicit negative reply; the proposal is discarded
    Rejected(PendingConfirmation),
    /// Reply not in the vocabulary; state stays Proposed
    Reprompt { preview: String },
}

/// Outcome of proposing a new mutating call
#[derive(Debug)]
pub struct ProposeOutcome {
    pub preview: String,
    /// Earlier unresolved proposal that was superseded (state Expired)
    pub superseded: Option<PendingConfirmation>,
}

/// Gate holding at most one pending confirmation
#[derive(Debug)]
pub struct ConfirmationGate {
    vocabulary: ConfirmationVocabulary,
    timeout: Option<Duration>,
    pending: Option<PendingConfirmation>,
}

impl ConfirmationGate {
    pub fn new(vocabulary: ConfirmationVocabulary) -> Self {
        Self {
            vocabulary,
            timeout: None,
            pending: None,
        }
    }

    /// Expire proposals that are not answered within `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn vocabulary(&self) -> &ConfirmationVocabulary {
        &self.vocabulary
    }

    pub fn pending(&self) -> Option<&PendingConfirmation> {
        self.pending.as_ref()
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Propose a mutating call
    ///
    /// An identical request keeps the existing proposal. Any other pending
    /// proposal is superseded and expires without executing.
    pub fn propose(&mut self, call: ToolCall, spec: &ToolSpec) -> ProposeOutcome {
        self.propose_at(call, spec, Utc::now())
    }

    pub fn propose_at(&mut self, call: ToolCall, spec: &ToolSpec, now: DateTime<Utc>) -> ProposeOutcome {
        debug_assert!(call.mutating, "read-only calls do not need confirmation");

        if let Some(existing) = &self.pending {
            if existing.tool_call.same_request(&call) {
                debug!(tool = %call.name, "Same request re-proposed; keeping pending confirmation");
                return ProposeOutcome {
                    preview: existing.preview_text.clone(),
                    superseded: None,
                };
            }
        }

        let superseded = self.pending.take().map(|mut old| {
            warn!(tool = %old.tool_call.name, "Pending confirmation superseded by a new request");
            old.state = ConfirmationState::Expired;
            old
        });

        let preview = render_preview(&call, spec);
        info!(tool = %call.name, id = %call.id, "Awaiting confirmation");
        self.pending = Some(PendingConfirmation {
            tool_call: call,
            preview_text: preview.clone(),
            created_at: now,
            state: ConfirmationState::Proposed,
        });

        ProposeOutcome { preview, superseded }
    }

    /// Classify a reply and resolve the pending proposal
    pub fn reply(&mut self, text: &str) -> OrchestratorResult<GateDecision> {
        self.reply_at(text, Utc::now())
    }

    pub fn reply_at(&mut self, text: &str, now: DateTime<Utc>) -> OrchestratorResult<GateDecision> {
        self.expire_if_stale(now)?;
        match self.vocabulary.classify(text) {
            ReplyKind::Affirmative => self.accept(),
            ReplyKind::Negative => self.reject().map(GateDecision::Rejected),
            ReplyKind::Ambiguous => {
                let pending = self
                    .pending
                    .as_ref()
                    .ok_or(OrchestratorError::NoPendingConfirmation)?;
                debug!(tool = %pending.tool_call.name, "Ambiguous reply; re-prompting");
                Ok(GateDecision::Reprompt {
                    preview: pending.preview_text.clone(),
                })
            }
        }
    }

    /// Proposed -> Confirmed
    pub fn accept(&mut self) -> OrchestratorResult<GateDecision> {
        let mut pending = self
            .pending
            .take()
            .ok_or(OrchestratorError::NoPendingConfirmation)?;
        pending.state = ConfirmationState::Confirmed;
        info!(tool = %pending.tool_call.name, id = %pending.tool_call.id, "Confirmed");
        Ok(GateDecision::Confirmed(ConfirmedCall {
            call: pending.tool_call,
        }))
    }

    /// Proposed -> Rejected
    pub fn reject(&mut self) -> OrchestratorResult<PendingConfirmation> {
        let mut pending = self
            .pending
            .take()
            .ok_or(OrchestratorError::NoPendingConfirmation)?;
        pending.state = ConfirmationState::Rejected;
        info!(tool = %pending.tool_call.name, id = %pending.tool_call.id, "Rejected");
        Ok(pending)
    }

    /// Proposed -> Expired (session end); never executes
    pub fn expire(&mut self) -> Option<PendingConfirmation> {
        self.pending.take().map(|mut pending| {
            info!(tool = %pending.tool_call.name, "Pending confirmation discarded");
            pending.state = ConfirmationState::Expired;
            pending
        })
    }

    fn expire_if_stale(&mut self, now: DateTime<Utc>) -> OrchestratorResult<()> {
        let (Some(timeout), Some(pending)) = (self.timeout, &self.pending) else {
            return Ok(());
        };
        if now - pending.created_at <= timeout {
            return Ok(());
        }
        let tool_name = pending.tool_call.name.clone();
        self.expire();
        Err(OrchestratorError::ConfirmationExpired { tool_name })
    }
}

impl Default for ConfirmationGate {
    fn default() -> Self {
        Self::new(ConfirmationVocabulary::default())
    }
}

/// Human-readable preview of a mutating call
pub fn render_preview(call: &ToolCall, spec: &ToolSpec) -> String {
    let mut lines = vec![format!("{} ({})", spec.description, call.name)];
    let mut keys: Vec<&String> = call.parameters.keys().collect();
    keys.sort();
    for key in keys {
        let value = match &call.parameters[key.as_str()] {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        lines.push(format!("  {}: {}", key, truncate(&value, PREVIEW_VALUE_LIMIT)));
    }
    lines.join("\n")
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{}...", cut)
}
