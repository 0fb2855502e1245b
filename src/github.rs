use std::process::Command;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use octocrab::{Octocrab, Page, service::middleware::retry::RetryConfig};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    context::ActionContext,
    error::{ActionError, RemoteFailure},
    types::{Forge, PullRequest, Repo, Review, ReviewState, StateFilter},
};

const LIST_PULLS: &str = "list pull requests";
const LIST_REVIEWS: &str = "list reviews";

/// Resolves an access token when the settings do not carry one.
pub fn get_github_token() -> Result<String> {
    if let Ok(token) = std::env::var("GITHUB_TOKEN") {
        return Ok(token);
    }

    if let Ok(token) = std::env::var("GH_TOKEN") {
        return Ok(token);
    }

    let output = Command::new("gh").args(["auth", "token"]).output()?;

    if !output.status.success() {
        anyhow::bail!("No GitHub token configured. Set github.token, GITHUB_TOKEN, or run 'gh auth login'");
    }

    let token = String::from_utf8(output.stdout)?.trim().to_string();

    if token.is_empty() {
        anyhow::bail!("Empty token returned from gh CLI");
    }

    Ok(token)
}

/// [`Forge`] backed by the GitHub REST API.
#[derive(Debug, Clone)]
pub struct GitHub {
    client: Octocrab,
    page_size: u8,
}

impl GitHub {
    /// Connects to `base_url` (GitHub Enterprise) or the public API when
    /// `None`.
    ///
    /// Every call is sent once; octocrab's own retry layer is switched off.
    pub fn new(base_url: Option<&str>, token: String, page_size: u8) -> Result<Self> {
        let mut builder = Octocrab::builder()
            .add_retry_config(RetryConfig::None)
            .personal_token(token);
        if let Some(url) = base_url {
            builder = builder
                .base_uri(url)
                .with_context(|| format!("Invalid GitHub base URL: '{}'", url))?;
        }
        let client = builder
            .build()
            .context("Attempt to connect to GitHub failed")?;

        info!(url = base_url.unwrap_or("https://api.github.com"), "created GitHub client");

        Ok(Self {
            client,
            page_size: page_size.clamp(1, 100),
        })
    }
}

#[derive(Serialize)]
struct ListPullsQuery<'a> {
    state: &'a str,
    per_page: u8,
}

#[derive(Serialize)]
struct ListReviewsQuery {
    per_page: u8,
}

#[derive(Debug, Deserialize)]
struct WireUser {
    login: String,
}

#[derive(Debug, Deserialize)]
struct WirePullRequest {
    number: u64,
    title: Option<String>,
    html_url: Option<String>,
    state: Option<String>,
    user: Option<WireUser>,
    #[serde(default)]
    draft: Option<bool>,
    created_at: Option<DateTime<Utc>>,
}

impl WirePullRequest {
    fn into_pull_request(self, repo: &Repo) -> PullRequest {
        PullRequest {
            repo: repo.clone(),
            number: self.number,
            title: self.title.unwrap_or_default(),
            author: self
                .user
                .map(|u| u.login)
                .unwrap_or_else(|| "Unknown".to_string()),
            state: self.state.unwrap_or_else(|| "unknown".to_string()),
            url: self.html_url.unwrap_or_default(),
            draft: self.draft.unwrap_or(false),
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireReview {
    user: Option<WireUser>,
    state: Option<ReviewState>,
}

impl From<WireReview> for Review {
    fn from(review: WireReview) -> Self {
        Review {
            reviewer: review
                .user
                .map(|u| u.login)
                .unwrap_or_else(|| "Unknown".to_string()),
            state: review.state.unwrap_or(ReviewState::Unknown),
        }
    }
}

/// Classifies an error status returned by GitHub.
pub fn classify(status: u16, message: &str) -> RemoteFailure {
    match status {
        401 => RemoteFailure::Authentication,
        429 => RemoteFailure::RateLimited,
        403 if message.to_lowercase().contains("rate limit") => RemoteFailure::RateLimited,
        other => RemoteFailure::Api(other),
    }
}

fn first_line(err: &octocrab::Error) -> String {
    err.to_string()
        .lines()
        .next()
        .unwrap_or("unknown error")
        .to_string()
}

/// Maps an octocrab failure onto the error users see in chat.
pub fn remote_error(operation: &'static str, err: octocrab::Error) -> ActionError {
    let (failure, message) = match &err {
        octocrab::Error::GitHub { source, .. } => (
            classify(source.status_code.as_u16(), &source.message),
            source.message.clone(),
        ),
        octocrab::Error::Serde { .. } | octocrab::Error::Json { .. } => {
            (RemoteFailure::Decode, first_line(&err))
        }
        _ => (RemoteFailure::Transport, first_line(&err)),
    };
    ActionError::RemoteQuery {
        operation,
        failure,
        message,
    }
}

#[async_trait]
impl Forge for GitHub {
    async fn list_pull_requests(
        &self,
        ctx: &ActionContext,
        repo: &Repo,
        state: StateFilter,
    ) -> Result<Vec<PullRequest>, ActionError> {
        debug!(owner = repo.owner(), repo = repo.name(), state = %state, "listing pull requests");

        let route = format!("/repos/{}/{}/pulls", repo.owner(), repo.name());
        let query = ListPullsQuery {
            state: state.as_str(),
            per_page: self.page_size,
        };

        let pulls: Vec<WirePullRequest> = ctx
            .run(async {
                self.client
                    .get(route, Some(&query))
                    .await
                    .map_err(|e| remote_error(LIST_PULLS, e))
            })
            .await?;

        Ok(pulls
            .into_iter()
            .map(|pr| pr.into_pull_request(repo))
            .collect())
    }

    async fn list_reviews(
        &self,
        ctx: &ActionContext,
        repo: &Repo,
        number: u64,
    ) -> Result<Vec<Review>, ActionError> {
        debug!(owner = repo.owner(), repo = repo.name(), number, "listing reviews");

        let route = format!("/repos/{}/{}/pulls/{}/reviews", repo.owner(), repo.name(), number);
        let query = ListReviewsQuery {
            per_page: self.page_size,
        };

        // A quorum decision over a truncated review list would be wrong, so
        // every page is fetched.
        let reviews: Vec<WireReview> = ctx
            .run(async {
                let first: Page<WireReview> = self
                    .client
                    .get(route, Some(&query))
                    .await
                    .map_err(|e| remote_error(LIST_REVIEWS, e))?;
                self.client
                    .all_pages(first)
                    .await
                    .map_err(|e| remote_error(LIST_REVIEWS, e))
            })
            .await?;

        Ok(reviews.into_iter().map(Review::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io::{Read, Write},
        net::TcpListener,
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
    };

    use super::*;

    /// Answers every request with `status` and `body`, counting requests.
    fn serve(status: &'static str, body: &'static str) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let base_url = format!("http://{}/", listener.local_addr().unwrap());
        let served = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&served);

        std::thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { break };
                let mut request = Vec::new();
                let mut buffer = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match stream.read(&mut buffer) {
                        Ok(0) | Err(_) => break,
                        Ok(n) => request.extend_from_slice(&buffer[..n]),
                    }
                }
                counter.fetch_add(1, Ordering::SeqCst);
                let response = format!(
                    "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = stream.write_all(response.as_bytes());
            }
        });

        (base_url, served)
    }

    async fn list_against(status: &'static str, body: &'static str) -> (ActionError, usize) {
        let (base_url, served) = serve(status, body);
        let github = GitHub::new(Some(&base_url), "t0ken".to_string(), 10).unwrap();
        let repo = Repo::new("acme", "widgets").unwrap();

        let err = github
            .list_pull_requests(&ActionContext::default(), &repo, StateFilter::Open)
            .await
            .unwrap_err();
        (err, served.load(Ordering::SeqCst))
    }

    #[tokio::test]
    async fn test_server_error_is_not_retried() {
        let (err, served) =
            list_against("500 Internal Server Error", r#"{"message":"boom"}"#).await;

        assert_eq!(served, 1);
        assert_eq!(
            err,
            ActionError::RemoteQuery {
                operation: LIST_PULLS,
                failure: RemoteFailure::Api(500),
                message: "boom".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_rate_limit_is_not_retried() {
        let (err, served) =
            list_against("429 Too Many Requests", r#"{"message":"slow down"}"#).await;

        assert_eq!(served, 1);
        assert!(matches!(
            err,
            ActionError::RemoteQuery {
                failure: RemoteFailure::RateLimited,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_malformed_body_is_a_decode_failure() {
        let (err, _) = list_against("200 OK", r#"{"not":"a list"}"#).await;

        assert!(matches!(
            err,
            ActionError::RemoteQuery {
                operation: LIST_PULLS,
                failure: RemoteFailure::Decode,
                ..
            }
        ));
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify(401, "Bad credentials"), RemoteFailure::Authentication);
        assert_eq!(classify(429, "slow down"), RemoteFailure::RateLimited);
        assert_eq!(
            classify(403, "API rate limit exceeded for user"),
            RemoteFailure::RateLimited
        );
        assert_eq!(
            classify(403, "Resource not accessible by integration"),
            RemoteFailure::Api(403)
        );
        assert_eq!(classify(404, "Not Found"), RemoteFailure::Api(404));
    }

    #[test]
    fn test_wire_pull_request_conversion_fills_gaps() {
        let wire: WirePullRequest = serde_json::from_value(serde_json::json!({
            "number": 42,
            "title": "Add widget",
            "html_url": "https://github.com/acme/widgets/pull/42",
            "state": "open",
            "user": null,
            "created_at": "2025-01-02T03:04:05Z"
        }))
        .unwrap();

        let repo = Repo::new("acme", "widgets").unwrap();
        let pr = wire.into_pull_request(&repo);

        assert_eq!(pr.number, 42);
        assert_eq!(pr.author, "Unknown");
        assert_eq!(pr.state, "open");
        assert!(!pr.draft);
        assert!(pr.created_at.is_some());
    }

    #[test]
    fn test_wire_review_conversion() {
        let wire: WireReview = serde_json::from_value(serde_json::json!({
            "id": 1,
            "user": { "login": "alice", "id": 9 },
            "state": "APPROVED",
            "body": ""
        }))
        .unwrap();

        let review = Review::from(wire);
        assert_eq!(review, Review::new("alice", ReviewState::Approved));
    }
}
