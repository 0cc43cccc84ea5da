// Configuration structs

use crate::attribution::AttributionSettings;
use crate::errors::{OrchestratorError, OrchestratorResult};
use crate::tools::confirmation::{DEFAULT_AFFIRMATIVE, DEFAULT_NEGATIVE};
use crate::tools::{ConfirmationVocabulary, Profile};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Jira Cloud credentials
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JiraConfig {
    /// Instance URL, e.g. https://example.atlassian.net
    pub url: String,
    pub email: String,
    pub api_token: String,
}

impl JiraConfig {
    pub fn is_complete(&self) -> bool {
        !self.url.trim().is_empty() && !self.email.trim().is_empty() && !self.api_token.trim().is_empty()
    }
}

/// Confluence Cloud settings; unset fields fall back to the Jira section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfluenceConfig {
    /// Wiki base URL, e.g. https://example.atlassian.net/wiki
    pub url: Option<String>,
    pub email: Option<String>,
    pub api_token: Option<String>,
}

/// Google Custom Search credentials
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub api_key: String,
    pub cse_id: String,
}

impl SearchConfig {
    pub fn is_complete(&self) -> bool {
        !self.api_key.trim().is_empty() && !self.cse_id.trim().is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequirementsConfig {
    /// JSON snapshot of the requirement store; in-memory only when unset
    pub store_path: Option<PathBuf>,
    /// JSON snapshot of the requirement graph; in-memory only when unset
    pub graph_path: Option<PathBuf>,
}

/// Longest accepted confirmation timeout (one week)
pub const MAX_CONFIRMATION_TIMEOUT_SECS: u64 = 7 * 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfirmationConfig {
    pub affirmative: Vec<String>,
    pub negative: Vec<String>,
    /// Seconds before an unanswered proposal expires (never when unset)
    pub timeout_secs: Option<u64>,
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            affirmative: DEFAULT_AFFIRMATIVE.iter().map(|w| w.to_string()).collect(),
            negative: DEFAULT_NEGATIVE.iter().map(|w| w.to_string()).collect(),
            timeout_secs: None,
        }
    }
}

impl ConfirmationConfig {
    pub fn vocabulary(&self) -> ConfirmationVocabulary {
        ConfirmationVocabulary::new(self.affirmative.clone(), self.negative.clone())
    }
}

/// Resolved Confluence connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfluenceCredentials {
    pub url: String,
    pub email: String,
    pub api_token: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Active role; `requirements-engineer` when unset
    pub profile: Option<Profile>,

    /// Launch the system browser from the show_* viewer tools
    pub open_in_browser: bool,

    pub jira: Option<JiraConfig>,
    pub confluence: Option<ConfluenceConfig>,
    pub search: Option<SearchConfig>,
    pub requirements: RequirementsConfig,
    pub confirmation: ConfirmationConfig,
    pub attribution: AttributionSettings,

    /// Response template overrides, keyed by template name
    pub templates: BTreeMap<String, String>,
}

impl Config {
    pub fn profile(&self) -> Profile {
        self.profile.unwrap_or_default()
    }

    /// Jira credentials, if all three values are present
    pub fn jira_credentials(&self) -> Option<&JiraConfig> {
        self.jira.as_ref().filter(|j| j.is_complete())
    }

    /// Confluence connection with Jira fallbacks applied
    pub fn confluence_credentials(&self) -> Option<ConfluenceCredentials> {
        let confluence = self.confluence.clone().unwrap_or_default();
        let jira = self.jira.clone().unwrap_or_default();
        let non_empty = |v: Option<String>| v.filter(|s| !s.trim().is_empty());

        let url = non_empty(confluence.url).or_else(|| {
            non_empty(Some(jira.url.clone()))
                .map(|base| format!("{}/wiki", base.trim_end_matches('/')))
        })?;
        let email = non_empty(confluence.email).or_else(|| non_empty(Some(jira.email.clone())))?;
        let api_token = non_empty(confluence.api_token).or_else(|| non_empty(Some(jira.api_token.clone())))?;
        Some(ConfluenceCredentials { url, email, api_token })
    }

    pub fn search_credentials(&self) -> Option<&SearchConfig> {
        self.search.as_ref().filter(|s| s.is_complete())
    }

    /// Services without usable credentials, with the variables that configure them
    pub fn missing_services(&self) -> Vec<(&'static str, &'static [&'static str])> {
        let mut missing: Vec<(&'static str, &'static [&'static str])> = Vec::new();
        if self.jira_credentials().is_none() {
            missing.push(("Jira", &["JIRA_INSTANCE_URL", "JIRA_EMAIL", "JIRA_API_KEY"]));
        }
        if self.confluence_credentials().is_none() {
            missing.push(("Confluence", &["CONFLUENCE_URL", "JIRA_EMAIL", "JIRA_API_KEY"]));
        }
        if self.search_credentials().is_none() {
            missing.push(("Search", &["GOOGLE_API_KEY", "GOOGLE_CSE_ID"]));
        }
        missing
    }

    /// Reject values no component could work with
    pub fn validate(&self) -> OrchestratorResult<()> {
        let a = &self.attribution;
        for (name, value) in [
            ("support_threshold", a.support_threshold),
            ("confident_threshold", a.confident_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(OrchestratorError::Config(format!(
                    "attribution.{} must be between 0 and 1, got {}",
                    name, value
                )));
            }
        }
        if a.support_threshold > a.confident_threshold {
            return Err(OrchestratorError::Config(
                "attribution.support_threshold must not exceed confident_threshold".to_string(),
            ));
        }
        if self.confirmation.affirmative.is_empty() || self.confirmation.negative.is_empty() {
            return Err(OrchestratorError::Config(
                "confirmation vocabulary needs affirmative and negative words".to_string(),
            ));
        }
        if let Some(secs) = self.confirmation.timeout_secs {
            if secs == 0 || secs > MAX_CONFIRMATION_TIMEOUT_SECS {
                return Err(OrchestratorError::Config(format!(
                    "confirmation.timeout_secs must be between 1 and {}, got {}",
                    MAX_CONFIRMATION_TIMEOUT_SECS, secs
                )));
            }
        }
        let overlap: Vec<&String> = self
            .confirmation
            .affirmative
            .iter()
            .filter(|w| self.confirmation.negative.iter().any(|n| n.eq_ignore_ascii_case(w)))
            .collect();
        if let Some(word) = overlap.first() {
            return Err(OrchestratorError::Config(format!(
                "'{}' is both an affirmative and a negative reply",
                word
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jira() -> JiraConfig {
        JiraConfig {
            url: "https://acme.atlassian.net/".into(),
            email: "dev@acme.io".into(),
            api_token: "secret".into(),
        }
    }

    #[test]
    fn test_confluence_falls_back_to_jira() {
        let config = Config {
            jira: Some(jira()),
            ..Default::default()
        };
        let creds = config.confluence_credentials().unwrap();
        assert_eq!(creds.url, "https://acme.atlassian.net/wiki");
        assert_eq!(creds.email, "dev@acme.io");
    }

    #[test]
    fn test_confluence_section_wins() {
        let config = Config {
            jira: Some(jira()),
            confluence: Some(ConfluenceConfig {
                url: Some("https://wiki.acme.io".into()),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(config.confluence_credentials().unwrap().url, "https://wiki.acme.io");
    }

    #[test]
    fn test_incomplete_jira_is_unconfigured() {
        let config = Config {
            jira: Some(JiraConfig {
                api_token: String::new(),
                ..jira()
            }),
            ..Default::default()
        };
        assert!(config.jira_credentials().is_none());
        assert!(config.confluence_credentials().is_none());
    }

    #[test]
    fn test_validate_thresholds() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.attribution.support_threshold = 0.9;
        assert!(matches!(config.validate(), Err(OrchestratorError::Config(_))));

        config.attribution.support_threshold = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_vocabulary_overlap() {
        let mut config = Config::default();
        config.confirmation.negative.push("OK".into());
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("'ok'"));
    }

    #[test]
    fn test_validate_confirmation_timeout() {
        let mut config = Config::default();
        config.confirmation.timeout_secs = Some(300);
        assert!(config.validate().is_ok());

        config.confirmation.timeout_secs = Some(u64::MAX);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("timeout_secs must be between 1 and 604800"));

        config.confirmation.timeout_secs = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_services() {
        let names: Vec<&str> = Config::default().missing_services().iter().map(|(n, _)| *n).collect();
        assert_eq!(names, vec!["Jira", "Confluence", "Search"]);

        let config = Config {
            jira: Some(jira()),
            ..Default::default()
        };
        let names: Vec<&str> = config.missing_services().iter().map(|(n, _)| *n).collect();
        assert_eq!(names, vec!["Search"]);
    }

    #[test]
    fn test_default_profile() {
        assert_eq!(Config::default().profile(), Profile::RequirementsEngineer);
    }
}
