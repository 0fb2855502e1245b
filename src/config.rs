use std::{collections::HashMap, fmt, path::Path, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::{
    actions::{ActionRegistry, SharedForge},
    github::get_github_token,
    render::{DEFAULT_TEMPLATE, TemplateRenderer},
    router::{Router, Trigger},
    types::{DEFAULT_QUORUM, Quorum},
};

pub const DEFAULT_CONFIG_FILE: &str = ".rootinha-bot.yaml";

/// Top-level document; everything lives under `bot`.
#[derive(Debug, Deserialize)]
struct SettingsFile {
    bot: Settings,
}

#[derive(Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GitHubSettings {
    /// API base URL, for GitHub Enterprise. Public GitHub when unset.
    pub url: Option<String>,
    pub token: Option<String>,
}

impl fmt::Debug for GitHubSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitHubSettings")
            .field("url", &self.url)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// One chat trigger: a regex whose named captures become parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConversationSettings {
    pub pattern: String,
    pub action: String,
    #[serde(default = "default_template")]
    pub template: String,
    #[serde(default)]
    pub params: HashMap<String, String>,
}

fn default_template() -> String {
    DEFAULT_TEMPLATE.to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub github: GitHubSettings,
    pub default_quorum: usize,
    pub max_concurrent_reviews: usize,
    pub page_size: u8,
    pub deadline_secs: Option<u64>,
    pub log_level: String,
    pub templates: HashMap<String, String>,
    pub conversations: Vec<ConversationSettings>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            github: GitHubSettings::default(),
            default_quorum: DEFAULT_QUORUM,
            max_concurrent_reviews: 4,
            page_size: 100,
            deadline_secs: None,
            log_level: "info".to_string(),
            templates: HashMap::new(),
            conversations: Vec::new(),
        }
    }
}

impl Settings {
    /// Reads a `.yaml`/`.yml` or `.json` settings file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file '{}'", path.display()))?;

        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_lowercase);

        let settings = match extension.as_deref() {
            Some("yaml" | "yml") => Self::from_yaml_str(&raw),
            Some("json") => Self::from_json_str(&raw),
            _ => anyhow::bail!(
                "Unsupported config format '{}': expected .yaml, .yml or .json",
                path.display()
            ),
        };

        settings.with_context(|| format!("Invalid config file '{}'", path.display()))
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        let file: SettingsFile = serde_yaml::from_str(raw).context("Failed to parse YAML")?;
        file.bot.validate()
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let file: SettingsFile = serde_json::from_str(raw).context("Failed to parse JSON")?;
        file.bot.validate()
    }

    fn validate(self) -> Result<Self> {
        if self.default_quorum == 0 {
            anyhow::bail!("default_quorum must be at least 1");
        }
        if self.max_concurrent_reviews == 0 {
            anyhow::bail!("max_concurrent_reviews must be at least 1");
        }
        if !(1..=100).contains(&self.page_size) {
            anyhow::bail!("page_size must be between 1 and 100, got {}", self.page_size);
        }
        if let Some(raw) = &self.github.url {
            let parsed = url::Url::parse(raw)
                .with_context(|| format!("Invalid github.url: '{}'", raw))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                anyhow::bail!("github.url must be http or https, got: '{}'", raw);
            }
        }
        Ok(self)
    }

    pub fn quorum(&self) -> Quorum {
        Quorum::new(self.default_quorum).unwrap_or_default()
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_secs.map(Duration::from_secs)
    }

    /// The configured token, or one discovered from the environment.
    pub fn token(&self) -> Result<String> {
        match &self.github.token {
            Some(token) if !token.trim().is_empty() => Ok(token.clone()),
            _ => get_github_token().context("Failed to obtain GitHub authentication token"),
        }
    }

    /// Compiles templates, actions and triggers into a router.
    ///
    /// Every problem a dispatch could otherwise hit late (bad regex, unknown
    /// action or template) is reported here.
    pub fn compile(&self, forge: SharedForge) -> Result<Router> {
        let renderer = TemplateRenderer::with_templates(&self.templates)
            .context("Failed to compile response templates")?;

        let triggers = self
            .conversations
            .iter()
            .map(|conversation| {
                if !renderer.contains(&conversation.template) {
                    anyhow::bail!(
                        "Conversation '{}' uses unknown template '{}'",
                        conversation.pattern,
                        conversation.template
                    );
                }
                Trigger::new(
                    &conversation.pattern,
                    conversation.action.clone(),
                    conversation.template.clone(),
                    conversation.params.clone(),
                )
                .with_context(|| format!("Invalid conversation pattern '{}'", conversation.pattern))
            })
            .collect::<Result<Vec<_>>>()?;

        let registry = ActionRegistry::standard(
            forge,
            Arc::new(renderer),
            self.quorum(),
            self.max_concurrent_reviews,
        )?;

        let router = Router::new(registry, triggers)?.with_deadline(self.deadline());
        Ok(router)
    }
}
