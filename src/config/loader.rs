// Configuration loader
// Loads settings from ~/.cerebra/config.toml, then fills gaps from the environment

use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use super::settings::{Config, ConfluenceConfig, JiraConfig, SearchConfig};
use crate::errors::config_parse_error;

/// Default config location: ~/.cerebra/config.toml
pub fn config_path() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".cerebra").join("config.toml"))
}

/// Load configuration from the default file (if any) and the environment
pub fn load_config() -> Result<Config> {
    let path = config_path()?;
    let mut config = if path.exists() {
        load_config_from(&path)?
    } else {
        tracing::debug!(path = %path.display(), "No config file; using environment only");
        Config::default()
    };
    apply_env(&mut config, |name| std::env::var(name).ok());
    config.validate()?;
    Ok(config)
}

/// Parse a config file without consulting the environment
pub fn load_config_from(path: &Path) -> Result<Config> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let config: Config =
        toml::from_str(&contents).map_err(|e| anyhow!(config_parse_error(&e.to_string())))?;
    config.validate()?;
    Ok(config)
}

/// Fill unset values from environment variables
///
/// File values always win; `lookup` is `std::env::var` outside tests.
pub fn apply_env(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    let env = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    let jira = config.jira.get_or_insert_with(JiraConfig::default);
    fill(&mut jira.url, env("JIRA_INSTANCE_URL"));
    fill(&mut jira.email, env("JIRA_EMAIL"));
    fill(&mut jira.api_token, env("JIRA_API_KEY"));
    if *jira == JiraConfig::default() {
        config.jira = None;
    }

    if let Some(url) = env("CONFLUENCE_URL") {
        let confluence = config.confluence.get_or_insert_with(ConfluenceConfig::default);
        if confluence.url.is_none() {
            confluence.url = Some(url);
        }
    }

    let search = config.search.get_or_insert_with(SearchConfig::default);
    fill(&mut search.api_key, env("GOOGLE_API_KEY"));
    fill(&mut search.cse_id, env("GOOGLE_CSE_ID"));
    if *search == SearchConfig::default() {
        config.search = None;
    }

    if config.profile.is_none() {
        if let Some(name) = env("CEREBRA_PROFILE") {
            match name.parse() {
                Ok(profile) => config.profile = Some(profile),
                Err(e) => tracing::warn!("Ignoring CEREBRA_PROFILE: {}", e),
            }
        }
    }
}

fn fill(field: &mut String, value: Option<String>) {
    if field.trim().is_empty() {
        if let Some(value) = value {
            *field = value;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribution::GapPolicy;
    use crate::tools::Profile;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_load_full_config() {
        let file = write_config(
            r#"
profile = "product-owner"
open_in_browser = true

[jira]
url = "https://acme.atlassian.net"
email = "po@acme.io"
api_token = "t0k3n"

[requirements]
store_path = "/tmp/cerebra-store.json"
graph_path = "/tmp/cerebra-graph.json"

[confirmation]
affirmative = ["yes", "go"]
negative = ["no"]
timeout_secs = 300

[attribution]
gap_policy = "withhold"

[templates]
rejected = "Okay, dropped {tool}."
"#,
        );
        let config = load_config_from(file.path()).unwrap();
        assert_eq!(config.profile(), Profile::ProductOwner);
        assert!(config.open_in_browser);
        assert_eq!(config.jira_credentials().unwrap().email, "po@acme.io");
        assert_eq!(config.confirmation.timeout_secs, Some(300));
        assert_eq!(
            config.requirements.graph_path.as_deref(),
            Some(std::path::Path::new("/tmp/cerebra-graph.json"))
        );
        assert_eq!(config.attribution.gap_policy, GapPolicy::Withhold);
        // Thresholds keep their defaults
        assert_eq!(config.attribution.support_threshold, 0.5);
        assert_eq!(config.templates["rejected"], "Okay, dropped {tool}.");
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let file = write_config("");
        let config = load_config_from(file.path()).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_unknown_profile_is_parse_error() {
        let file = write_config("profile = \"tester\"\n");
        let err = load_config_from(file.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }

    #[test]
    fn test_invalid_threshold_rejected() {
        let file = write_config("[attribution]\nsupport_threshold = 2.0\n");
        let err = load_config_from(file.path()).unwrap_err();
        assert!(err.to_string().contains("support_threshold"));
    }

    #[test]
    fn test_huge_confirmation_timeout_rejected() {
        let file = write_config("[confirmation]\ntimeout_secs = 9223372036854775807\n");
        let err = load_config_from(file.path()).unwrap_err();
        assert!(err.to_string().contains("timeout_secs"));
    }

    #[test]
    fn test_env_fills_missing_values() {
        let mut config = Config::default();
        apply_env(
            &mut config,
            env_of(&[
                ("JIRA_INSTANCE_URL", "https://env.atlassian.net"),
                ("JIRA_EMAIL", "env@acme.io"),
                ("JIRA_API_KEY", "env-token"),
                ("GOOGLE_API_KEY", "g-key"),
                ("GOOGLE_CSE_ID", "cse"),
                ("CEREBRA_PROFILE", "developer"),
            ]),
        );
        assert_eq!(config.jira_credentials().unwrap().url, "https://env.atlassian.net");
        assert_eq!(config.search_credentials().unwrap().cse_id, "cse");
        assert_eq!(config.profile(), Profile::Developer);
        assert_eq!(
            config.confluence_credentials().unwrap().url,
            "https://env.atlassian.net/wiki"
        );
    }

    #[test]
    fn test_file_values_win_over_env() {
        let file = write_config(
            "profile = \"all\"\n[jira]\nurl = \"https://file.atlassian.net\"\n",
        );
        let mut config = load_config_from(file.path()).unwrap();
        apply_env(
            &mut config,
            env_of(&[
                ("JIRA_INSTANCE_URL", "https://env.atlassian.net"),
                ("JIRA_EMAIL", "env@acme.io"),
                ("JIRA_API_KEY", "env-token"),
                ("CEREBRA_PROFILE", "developer"),
            ]),
        );
        let jira = config.jira_credentials().unwrap();
        assert_eq!(jira.url, "https://file.atlassian.net");
        assert_eq!(jira.email, "env@acme.io");
        assert_eq!(config.profile(), Profile::All);
    }

    #[test]
    fn test_no_env_leaves_services_unset() {
        let mut config = Config::default();
        apply_env(&mut config, env_of(&[]));
        assert!(config.jira.is_none());
        assert!(config.search.is_none());
        assert!(config.confluence.is_none());
    }
}
