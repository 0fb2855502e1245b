//! Rootinha: a chat bot that answers pull request questions.
//!
//! Chat messages are matched against configured triggers, turned into
//! action requests and dispatched through an immutable action registry.
//! The built-in actions list a repository's pull requests on GitHub and,
//! optionally, drop the ones that already have enough approving reviews.

pub mod actions;
pub mod approval;
pub mod cli;
pub mod config;
pub mod context;
pub mod error;
pub mod github;
pub mod render;
pub mod router;
pub mod types;

pub use actions::{
    ActionHandler, ActionRegistry, LIST_PRS, LIST_PRS_WITHOUT_APPROVALS, PullRequestQuery,
};
pub use cli::{Invocation, Mode, parse_args};
pub use config::Settings;
pub use context::ActionContext;
pub use error::{ActionError, CancelReason, RegistryError, RemoteFailure};
pub use github::GitHub;
pub use render::{ResponseRenderer, TemplateRenderer};
pub use router::{ChatEvent, Router, Trigger};
pub use types::{
    ActionRequest, ActionResponse, Forge, PullRequest, Quorum, Repo, Review, ReviewState,
    StateFilter,
};
