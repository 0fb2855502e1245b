use std::{collections::HashMap, time::Duration};

use regex::Regex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    actions::ActionRegistry,
    context::ActionContext,
    error::RegistryError,
    types::{ActionRequest, ActionResponse},
};

/// A message received from the chat transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatEvent {
    pub channel: String,
    pub text: String,
}

impl ChatEvent {
    pub fn new(channel: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            text: text.into(),
        }
    }
}

/// Maps chat text onto an action.
///
/// Named capture groups in `pattern` become request parameters and take
/// precedence over the fixed `params`.
#[derive(Debug, Clone)]
pub struct Trigger {
    pattern: Regex,
    action: String,
    template: String,
    params: HashMap<String, String>,
}

impl Trigger {
    pub fn new(
        pattern: &str,
        action: impl Into<String>,
        template: impl Into<String>,
        params: HashMap<String, String>,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
            action: action.into(),
            template: template.into(),
            params,
        })
    }

    fn extract(&self, text: &str) -> Option<HashMap<String, String>> {
        let caps = self.pattern.captures(text)?;
        let mut params = self.params.clone();
        for name in self.pattern.capture_names().flatten() {
            if let Some(value) = caps.name(name) {
                params.insert(name.to_string(), value.as_str().to_string());
            }
        }
        Some(params)
    }
}

/// Turns chat events into dispatches against the action registry.
///
/// Shared read-only between concurrent conversations.
#[derive(Debug)]
pub struct Router {
    registry: ActionRegistry,
    triggers: Vec<Trigger>,
    root: ActionContext,
    deadline: Option<Duration>,
}

impl Router {
    /// Fails if a trigger names an action the registry does not have.
    pub fn new(registry: ActionRegistry, triggers: Vec<Trigger>) -> Result<Self, RegistryError> {
        if let Some(trigger) = triggers.iter().find(|t| !registry.contains(&t.action)) {
            return Err(RegistryError::UnknownTriggerAction {
                pattern: trigger.pattern.as_str().to_string(),
                action: trigger.action.clone(),
            });
        }

        info!(
            actions = ?registry.ids(),
            triggers = triggers.len(),
            "router ready"
        );

        Ok(Self {
            registry,
            triggers,
            root: ActionContext::default(),
            deadline: None,
        })
    }

    /// Every dispatch runs in a child of `root`.
    pub fn with_root(mut self, root: ActionContext) -> Self {
        self.root = root;
        self
    }

    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.registry
    }

    /// Cancels every dispatch in flight and any started later.
    pub fn shutdown(&self) {
        self.root.cancel();
    }

    /// Dispatches the first trigger matching `event`, or returns `None` when
    /// nothing matches.
    pub async fn route(&self, event: &ChatEvent) -> Option<ActionResponse> {
        let text = event.text.trim();
        let (trigger, params) = self
            .triggers
            .iter()
            .find_map(|trigger| trigger.extract(text).map(|params| (trigger, params)))?;

        let request = ActionRequest::new(
            event.channel.clone(),
            Uuid::new_v4().to_string(),
            trigger.template.clone(),
            params,
        );
        Some(self.dispatch(&trigger.action, &request).await)
    }

    /// Runs `action` for `request`. Always yields exactly one response; an
    /// unknown action is reported in its text.
    pub async fn dispatch(&self, action: &str, request: &ActionRequest) -> ActionResponse {
        let handler = match self.registry.resolve(action) {
            Ok(handler) => handler,
            Err(err) => {
                warn!(
                    action,
                    correlation_id = request.correlation_id(),
                    channel = request.channel(),
                    "no handler registered"
                );
                return request.respond(err.to_string());
            }
        };

        debug!(
            action,
            correlation_id = request.correlation_id(),
            channel = request.channel(),
            "dispatching"
        );

        let mut ctx = self.root.child();
        if let Some(deadline) = self.deadline {
            ctx = ctx.with_timeout(deadline);
        }
        handler.handle(&ctx, request).await
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::actions::ActionHandler;

    struct ParamDump;

    #[async_trait]
    impl ActionHandler for ParamDump {
        async fn handle(&self, _ctx: &ActionContext, request: &ActionRequest) -> ActionResponse {
            let text = ["org", "repository", "state"]
                .iter()
                .map(|k| format!("{k}={}", request.param(k).unwrap_or("-")))
                .collect::<Vec<_>>()
                .join(" ");
            request.respond(format!("{text} tmpl={}", request.template()))
        }
    }

    fn router() -> Router {
        let registry = ActionRegistry::builder()
            .register("dump", ParamDump)
            .unwrap()
            .build();
        let triggers = vec![
            Trigger::new(
                r"^list (?P<state>\w+) prs in (?P<org>[\w-]+)/(?P<repository>[\w-]+)$",
                "dump",
                "compact",
                HashMap::from([("state".to_string(), "open".to_string())]),
            )
            .unwrap(),
            Trigger::new(
                r"^widgets$",
                "dump",
                "default",
                HashMap::from([
                    ("org".to_string(), "acme".to_string()),
                    ("repository".to_string(), "widgets".to_string()),
                ]),
            )
            .unwrap(),
        ];
        Router::new(registry, triggers).unwrap()
    }

    #[tokio::test]
    async fn test_route_extracts_named_captures_over_fixed_params() {
        let response = router()
            .route(&ChatEvent::new("dev", "  list closed prs in acme/widgets "))
            .await
            .unwrap();
        assert_eq!(
            response.text(),
            "org=acme repository=widgets state=closed tmpl=compact"
        );
        assert_eq!(response.channel(), "dev");
        assert!(!response.parent_id().is_empty());
    }

    #[tokio::test]
    async fn test_route_uses_fixed_params() {
        let response = router()
            .route(&ChatEvent::new("dev", "widgets"))
            .await
            .unwrap();
        assert_eq!(response.text(), "org=acme repository=widgets state=- tmpl=default");
    }

    #[tokio::test]
    async fn test_route_ignores_unmatched_text() {
        assert!(router().route(&ChatEvent::new("dev", "hello")).await.is_none());
    }

    #[tokio::test]
    async fn test_dispatch_unknown_action_is_reported() {
        let request = ActionRequest::new("dev", "c-9", "default", HashMap::new());
        let response = router().dispatch("deploy", &request).await;
        assert_eq!(response.text(), "no such action: 'deploy'");
        assert_eq!(response.parent_id(), "c-9");
    }

    #[test]
    fn test_trigger_with_unknown_action_is_rejected() {
        let registry = ActionRegistry::builder().build();
        let trigger = Trigger::new("^x$", "missing", "default", HashMap::new()).unwrap();
        let err = Router::new(registry, vec![trigger]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "trigger '^x$' refers to unknown action 'missing'"
        );
    }
}
