use std::{collections::HashMap, fmt, sync::Arc};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::{
    approval::filter_without_quorum,
    context::ActionContext,
    error::{ActionError, RegistryError},
    render::ResponseRenderer,
    types::{ActionRequest, ActionResponse, Forge, Quorum, Repo, Review, StateFilter},
};

pub const LIST_PRS: &str = "list-prs";
pub const LIST_PRS_WITHOUT_APPROVALS: &str = "list-prs-without-approvals";

pub type SharedForge = Arc<dyn Forge + Send + Sync>;
pub type SharedRenderer = Arc<dyn ResponseRenderer + Send + Sync>;

/// The code behind one chat action.
///
/// Handlers never fail: every error is turned into the response text.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn handle(&self, ctx: &ActionContext, request: &ActionRequest) -> ActionResponse;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StateSource {
    /// Taken from the `state` request parameter.
    Param,
    Fixed(StateFilter),
}

#[derive(Debug, Clone, Copy)]
struct ApprovalPolicy {
    default_quorum: Quorum,
    max_concurrent: usize,
}

/// Lists pull requests, optionally dropping those that already have a
/// quorum of approvals.
///
/// Both built-in actions are instances of this one handler, so the
/// approval path renders the same way the plain listing does.
pub struct PullRequestQuery {
    forge: SharedForge,
    renderer: SharedRenderer,
    state: StateSource,
    approvals: Option<ApprovalPolicy>,
}

impl fmt::Debug for PullRequestQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PullRequestQuery")
            .field("state", &self.state)
            .field("approvals", &self.approvals)
            .finish_non_exhaustive()
    }
}

impl PullRequestQuery {
    /// `list-prs`: requires `org`, `repository` and `state`.
    pub fn listing(forge: SharedForge, renderer: SharedRenderer) -> Self {
        Self {
            forge,
            renderer,
            state: StateSource::Param,
            approvals: None,
        }
    }

    /// `list-prs-without-approvals`: open pull requests with fewer than `qtd`
    /// approvals, `default_quorum` when `qtd` is absent.
    pub fn without_approvals(
        forge: SharedForge,
        renderer: SharedRenderer,
        default_quorum: Quorum,
        max_concurrent: usize,
    ) -> Self {
        Self {
            forge,
            renderer,
            state: StateSource::Fixed(StateFilter::Open),
            approvals: Some(ApprovalPolicy {
                default_quorum,
                max_concurrent: max_concurrent.max(1),
            }),
        }
    }

    async fn execute(
        &self,
        ctx: &ActionContext,
        request: &ActionRequest,
    ) -> Result<String, ActionError> {
        // Everything the request must carry is validated before the first
        // remote call.
        let repo = Repo::new(request.require("org")?, request.require("repository")?)?;
        let state = match self.state {
            StateSource::Param => request.require("state")?.parse()?,
            StateSource::Fixed(state) => state,
        };
        let quorum = self
            .approvals
            .map(|policy| match request.param("qtd") {
                Some(raw) => Quorum::parse(raw),
                None => Ok(policy.default_quorum),
            })
            .transpose()?;
        self.renderer.check(request.template())?;

        debug!(
            owner = repo.owner(),
            repo = repo.name(),
            state = %state,
            quorum = quorum.map(|q| q.get()),
            "querying pull requests"
        );

        let prs = self.forge.list_pull_requests(ctx, &repo, state).await?;

        let prs = match (quorum, self.approvals) {
            (Some(quorum), Some(policy)) => {
                filter_without_quorum(
                    ctx,
                    self.forge.as_ref(),
                    &repo,
                    prs,
                    Review::is_approval,
                    quorum,
                    policy.max_concurrent,
                )
                .await?
            }
            _ => prs,
        };

        self.renderer.render_all(request.template(), &prs)
    }
}

#[async_trait]
impl ActionHandler for PullRequestQuery {
    async fn handle(&self, ctx: &ActionContext, request: &ActionRequest) -> ActionResponse {
        match self.execute(ctx, request).await {
            Ok(text) => request.respond(text),
            Err(err) => {
                warn!(
                    correlation_id = request.correlation_id(),
                    channel = request.channel(),
                    error = %err,
                    "action failed"
                );
                request.respond(err.to_string())
            }
        }
    }
}

/// Collects handlers before the registry is frozen.
#[derive(Default)]
pub struct ActionRegistryBuilder {
    handlers: HashMap<String, Arc<dyn ActionHandler>>,
}

impl fmt::Debug for ActionRegistryBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        ids.sort_unstable();
        f.debug_struct("ActionRegistryBuilder")
            .field("actions", &ids)
            .finish()
    }
}

impl ActionRegistryBuilder {
    pub fn register(
        mut self,
        id: impl Into<String>,
        handler: impl ActionHandler + 'static,
    ) -> Result<Self, RegistryError> {
        let id = id.into();
        if self.handlers.contains_key(&id) {
            return Err(RegistryError::DuplicateAction(id));
        }
        self.handlers.insert(id, Arc::new(handler));
        Ok(self)
    }

    pub fn build(self) -> ActionRegistry {
        ActionRegistry {
            handlers: self.handlers,
        }
    }
}

/// Immutable table from action id to handler.
pub struct ActionRegistry {
    handlers: HashMap<String, Arc<dyn ActionHandler>>,
}

impl fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("actions", &self.ids())
            .finish()
    }
}

impl ActionRegistry {
    pub fn builder() -> ActionRegistryBuilder {
        ActionRegistryBuilder::default()
    }

    /// The two pull request actions, wired to `forge` and `renderer`.
    pub fn standard(
        forge: SharedForge,
        renderer: SharedRenderer,
        default_quorum: Quorum,
        max_concurrent: usize,
    ) -> Result<Self, RegistryError> {
        let registry = Self::builder()
            .register(
                LIST_PRS,
                PullRequestQuery::listing(forge.clone(), renderer.clone()),
            )?
            .register(
                LIST_PRS_WITHOUT_APPROVALS,
                PullRequestQuery::without_approvals(forge, renderer, default_quorum, max_concurrent),
            )?
            .build();
        Ok(registry)
    }

    pub fn resolve(&self, id: &str) -> Result<&dyn ActionHandler, ActionError> {
        self.handlers
            .get(id)
            .map(|handler| handler.as_ref())
            .ok_or_else(|| ActionError::UnknownAction(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.handlers.contains_key(id)
    }

    /// Registered ids, sorted.
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}
