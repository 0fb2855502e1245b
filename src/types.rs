use std::{collections::HashMap, fmt, num::NonZeroUsize, str::FromStr};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::{context::ActionContext, error::ActionError};

/// Quorum used when a request does not carry a `qtd` parameter.
pub const DEFAULT_QUORUM: usize = 2;

/// Repository coordinates on the hosting service.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Repo {
    owner: String,
    name: String,
}

impl Repo {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Result<Self, ActionError> {
        let owner = owner.into();
        let name = name.into();
        validate_segment("org", &owner)?;
        validate_segment("repository", &name)?;
        Ok(Self { owner, name })
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

fn validate_segment(param: &str, value: &str) -> Result<(), ActionError> {
    if value.is_empty() {
        return Err(ActionError::invalid_parameter(param, "must not be empty"));
    }
    if value.contains('/') || value.chars().any(char::is_whitespace) {
        return Err(ActionError::invalid_parameter(
            param,
            format!("'{value}' is not a valid name"),
        ));
    }
    Ok(())
}

impl fmt::Display for Repo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// Which pull requests a listing asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateFilter {
    Open,
    Closed,
    All,
}

impl StateFilter {
    pub fn as_str(&self) -> &'static str {
        match self {
            StateFilter::Open => "open",
            StateFilter::Closed => "closed",
            StateFilter::All => "all",
        }
    }
}

impl FromStr for StateFilter {
    type Err = ActionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "open" => Ok(StateFilter::Open),
            "closed" => Ok(StateFilter::Closed),
            "all" => Ok(StateFilter::All),
            other => Err(ActionError::invalid_parameter(
                "state",
                format!("expected one of open, closed, all; got '{other}'"),
            )),
        }
    }
}

impl fmt::Display for StateFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time snapshot of a pull request.
#[derive(Debug, Clone, PartialEq)]
pub struct PullRequest {
    pub repo: Repo,
    pub number: u64,
    pub title: String,
    pub author: String,
    pub state: String,
    pub url: String,
    pub draft: bool,
    pub created_at: Option<DateTime<Utc>>,
}

/// Review verdicts as the hosting service spells them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewState {
    Approved,
    ChangesRequested,
    Commented,
    Pending,
    Dismissed,
    #[serde(other)]
    Unknown,
}

impl ReviewState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewState::Approved => "APPROVED",
            ReviewState::ChangesRequested => "CHANGES_REQUESTED",
            ReviewState::Commented => "COMMENTED",
            ReviewState::Pending => "PENDING",
            ReviewState::Dismissed => "DISMISSED",
            ReviewState::Unknown => "UNKNOWN",
        }
    }
}

/// A single review left on a pull request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Review {
    pub reviewer: String,
    pub state: ReviewState,
}

impl Review {
    pub fn new(reviewer: impl Into<String>, state: ReviewState) -> Self {
        Self {
            reviewer: reviewer.into(),
            state,
        }
    }

    pub fn is_approval(&self) -> bool {
        self.state == ReviewState::Approved
    }
}

/// Minimum number of approving reviews a pull request needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quorum(NonZeroUsize);

impl Quorum {
    pub fn new(count: usize) -> Option<Self> {
        NonZeroUsize::new(count).map(Self)
    }

    /// Parses the `qtd` request parameter.
    pub fn parse(raw: &str) -> Result<Self, ActionError> {
        let count: i64 = raw.trim().parse().map_err(|_| {
            ActionError::invalid_parameter("qtd", format!("'{raw}' is not a number"))
        })?;
        usize::try_from(count)
            .ok()
            .and_then(Self::new)
            .ok_or_else(|| {
                ActionError::invalid_parameter("qtd", format!("must be at least 1, got {count}"))
            })
    }

    pub fn get(&self) -> usize {
        self.0.get()
    }
}

impl Default for Quorum {
    fn default() -> Self {
        Self(NonZeroUsize::MIN.saturating_add(DEFAULT_QUORUM - 1))
    }
}

impl fmt::Display for Quorum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One inbound command, as extracted by the router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionRequest {
    channel: String,
    correlation_id: String,
    template: String,
    params: HashMap<String, String>,
}

impl ActionRequest {
    pub fn new(
        channel: impl Into<String>,
        correlation_id: impl Into<String>,
        template: impl Into<String>,
        params: HashMap<String, String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            correlation_id: correlation_id.into(),
            template: template.into(),
            params,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// Returns a parameter that must be present and non-blank.
    pub fn require(&self, name: &str) -> Result<&str, ActionError> {
        match self.param(name).map(str::trim) {
            Some(value) if !value.is_empty() => Ok(value),
            Some(_) => Err(ActionError::invalid_parameter(name, "must not be empty")),
            None => Err(ActionError::invalid_parameter(name, "is required")),
        }
    }

    /// Builds the single response this request will ever get.
    pub fn respond(&self, text: impl Into<String>) -> ActionResponse {
        ActionResponse {
            channel: self.channel.clone(),
            text: text.into(),
            parent_id: self.correlation_id.clone(),
        }
    }
}

/// What goes back to the chat channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionResponse {
    channel: String,
    text: String,
    parent_id: String,
}

impl ActionResponse {
    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn parent_id(&self) -> &str {
        &self.parent_id
    }
}

/// Read-only queries against a code-review hosting service.
///
/// Implementations must give up promptly once `ctx` is cancelled and must
/// not retry on their own.
#[async_trait]
pub trait Forge {
    async fn list_pull_requests(
        &self,
        ctx: &ActionContext,
        repo: &Repo,
        state: StateFilter,
    ) -> Result<Vec<PullRequest>, ActionError>;

    async fn list_reviews(
        &self,
        ctx: &ActionContext,
        repo: &Repo,
        number: u64,
    ) -> Result<Vec<Review>, ActionError>;
}
