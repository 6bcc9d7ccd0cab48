use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use tracing::info;

/// Settings in effect for a single repository: the `default` section merged
/// with the repository's own overrides.
#[derive(Debug, Clone, Deserialize)]
pub struct RepoSettings {
    pub template_dir: PathBuf,
    pub state_dir: PathBuf,
    pub to_email_address: String,
    pub from_email_address: String,
    pub reply_to_email_address: String,
    pub html_email: bool,
    pub group_pull_request_updates: bool,
    pub alert_on_close: bool,
    pub open_subject: String,
    #[serde(default)]
    pub closed_subject: Option<String>,
}

/// Parsed configuration: watched repositories in file order, each with its
/// fully resolved settings. Resolved once per run and handed to the
/// orchestrator; nothing is re-read mid-run.
#[derive(Debug, Clone)]
pub struct Config {
    pub repositories: Vec<(String, RepoSettings)>,
}

/// Keys the `default` section must always provide.
const REQUIRED_KEYS: &[&str] = &[
    "template_dir",
    "state_dir",
    "to_email_address",
    "from_email_address",
    "reply_to_email_address",
    "html_email",
    "group_pull_request_updates",
    "alert_on_close",
    "open_subject",
];

impl Config {
    /// Load and validate configuration from a YAML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config = Self::parse(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))?;

        info!(
            path = %path.display(),
            repositories = config.repositories.len(),
            "Loaded configuration"
        );

        Ok(config)
    }

    /// Parse a YAML configuration document
    pub fn parse(content: &str) -> Result<Self> {
        let doc: Mapping =
            serde_yaml::from_str(content).context("configuration must be a YAML mapping")?;

        let default = doc
            .get("default")
            .and_then(Value::as_mapping)
            .context("there must be a 'default' section")?;

        for key in REQUIRED_KEYS {
            if !default.contains_key(*key) {
                bail!("the 'default' section must contain '{key}'");
            }
        }

        if default.get("alert_on_close").and_then(Value::as_bool) == Some(true)
            && !default.contains_key("closed_subject")
        {
            bail!("the 'default' section must contain 'closed_subject' when 'alert_on_close' is true");
        }

        let mut repositories = Vec::new();
        for (key, value) in &doc {
            let name = key
                .as_str()
                .context("configuration section names must be strings")?;
            if name == "default" {
                continue;
            }

            if !is_valid_repository(name) {
                bail!("repositories must be of the form 'owner' or 'owner/name': {name}");
            }

            let mut merged = default.clone();
            match value {
                Value::Mapping(overrides) => {
                    for (k, v) in overrides {
                        merged.insert(k.clone(), v.clone());
                    }
                }
                Value::Null => {}
                _ => bail!("repository section '{name}' must be a mapping"),
            }

            let settings: RepoSettings = serde_yaml::from_value(Value::Mapping(merged))
                .with_context(|| format!("invalid settings for repository '{name}'"))?;

            // An override may enable close alerts that the default left off.
            if settings.alert_on_close && settings.closed_subject.is_none() {
                bail!("repository '{name}' enables 'alert_on_close' but has no 'closed_subject'");
            }

            repositories.push((name.to_string(), settings));
        }

        if repositories.is_empty() {
            bail!("there must be at least one repository configured (owner/name)");
        }

        Ok(Self { repositories })
    }
}

/// A repository key is `owner` (watch every repository of that owner) or
/// `owner/name`. The owner-only form is expanded by the API collaborator,
/// not here.
fn is_valid_repository(name: &str) -> bool {
    let mut parts = name.split('/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(owner), None, None) => is_valid_segment(owner),
        (Some(owner), Some(repo), None) => is_valid_segment(owner) && is_valid_segment(repo),
        _ => false,
    }
}

fn is_valid_segment(segment: &str) -> bool {
    // All-dot segments (`.`, `..`) would walk out of the state directory
    // and let distinct repositories share a seen-set location.
    !segment.is_empty()
        && !segment.chars().all(|c| c == '.')
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}
