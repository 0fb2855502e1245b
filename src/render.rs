use std::{collections::HashMap, sync::OnceLock};

use chrono_humanize::HumanTime;
use regex::Regex;

use crate::{error::ActionError, types::PullRequest};

pub const DEFAULT_TEMPLATE: &str = "default";

const BUILTIN_TEMPLATES: &[(&str, &str)] = &[
    (DEFAULT_TEMPLATE, "#{{number}} {{title}} ({{author}}) {{url}}"),
    ("compact", "#{{number}} {{title}}"),
    (
        "markdown",
        "[#{{number}}]({{url}}) {{title}} by {{author}}, opened {{age}}",
    ),
];

/// Formats pull requests for a chat response.
pub trait ResponseRenderer {
    /// Fails with [`ActionError::Template`] unless `template` can be used.
    fn check(&self, template: &str) -> Result<(), ActionError>;

    fn render(&self, template: &str, pr: &PullRequest) -> Result<String, ActionError>;

    /// Renders each pull request in order, one per line.
    fn render_all(&self, template: &str, prs: &[PullRequest]) -> Result<String, ActionError> {
        self.check(template)?;
        let lines = prs
            .iter()
            .map(|pr| self.render(template, pr))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(lines.join("\n"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Number,
    Title,
    Author,
    State,
    Url,
    Repo,
    Draft,
    Age,
}

impl Field {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "number" => Some(Field::Number),
            "title" => Some(Field::Title),
            "author" => Some(Field::Author),
            "state" => Some(Field::State),
            "url" => Some(Field::Url),
            "repo" => Some(Field::Repo),
            "draft" => Some(Field::Draft),
            "age" => Some(Field::Age),
            _ => None,
        }
    }

    fn write(&self, pr: &PullRequest, out: &mut String) {
        match self {
            Field::Number => out.push_str(&pr.number.to_string()),
            Field::Title => out.push_str(&pr.title),
            Field::Author => out.push_str(&pr.author),
            Field::State => out.push_str(&pr.state),
            Field::Url => out.push_str(&pr.url),
            Field::Repo => out.push_str(&pr.repo.to_string()),
            Field::Draft => {
                if pr.draft {
                    out.push_str("draft");
                }
            }
            Field::Age => match pr.created_at {
                Some(created_at) => out.push_str(&HumanTime::from(created_at).to_string()),
                None => out.push_str("unknown"),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Field(Field),
}

/// A parsed `{{field}}` template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    segments: Vec<Segment>,
}

fn placeholder_regex() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z_]+)\s*\}\}").expect("placeholder pattern is valid")
    })
}

impl Template {
    pub fn compile(id: &str, source: &str) -> Result<Self, ActionError> {
        let mut segments = Vec::new();
        let mut last = 0;

        for caps in placeholder_regex().captures_iter(source) {
            let whole = caps.get(0).map_or(0..0, |m| m.range());
            push_literal(id, &source[last..whole.start], &mut segments)?;

            let name = &caps[1];
            let field = Field::from_name(name)
                .ok_or_else(|| ActionError::template(id, format!("unknown field '{name}'")))?;
            segments.push(Segment::Field(field));
            last = whole.end;
        }
        push_literal(id, &source[last..], &mut segments)?;

        Ok(Self { segments })
    }

    pub fn render(&self, pr: &PullRequest) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Field(field) => field.write(pr, &mut out),
            }
        }
        out
    }
}

fn push_literal(id: &str, text: &str, segments: &mut Vec<Segment>) -> Result<(), ActionError> {
    if text.contains("{{") || text.contains("}}") {
        return Err(ActionError::template(id, "unbalanced or malformed '{{ }}'"));
    }
    if !text.is_empty() {
        segments.push(Segment::Literal(text.to_string()));
    }
    Ok(())
}

/// Renderer over a fixed set of named templates, compiled up front.
#[derive(Debug, Clone)]
pub struct TemplateRenderer {
    templates: HashMap<String, Template>,
}

impl TemplateRenderer {
    /// The built-in templates only.
    pub fn builtin() -> Result<Self, ActionError> {
        Self::with_templates(&HashMap::new())
    }

    /// Built-ins plus `custom`, where `custom` wins on name clashes.
    pub fn with_templates(custom: &HashMap<String, String>) -> Result<Self, ActionError> {
        let mut templates = HashMap::new();
        let builtin = BUILTIN_TEMPLATES.iter().map(|(id, src)| (*id, *src));
        let custom = custom.iter().map(|(id, src)| (id.as_str(), src.as_str()));

        for (id, source) in builtin.chain(custom) {
            templates.insert(id.to_string(), Template::compile(id, source)?);
        }

        Ok(Self { templates })
    }

    pub fn contains(&self, template: &str) -> bool {
        self.templates.contains_key(template)
    }

    fn lookup(&self, template: &str) -> Result<&Template, ActionError> {
        self.templates
            .get(template)
            .ok_or_else(|| ActionError::template(template, "no such template"))
    }
}

impl ResponseRenderer for TemplateRenderer {
    fn check(&self, template: &str) -> Result<(), ActionError> {
        self.lookup(template).map(|_| ())
    }

    fn render(&self, template: &str, pr: &PullRequest) -> Result<String, ActionError> {
        Ok(self.lookup(template)?.render(pr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Repo;

    fn pr(number: u64, title: &str) -> PullRequest {
        PullRequest {
            repo: Repo::new("acme", "widgets").unwrap(),
            number,
            title: title.to_string(),
            author: "bob".to_string(),
            state: "open".to_string(),
            url: format!("https://github.com/acme/widgets/pull/{number}"),
            draft: false,
            created_at: None,
        }
    }

    #[test]
    fn test_default_template() {
        let renderer = TemplateRenderer::builtin().unwrap();
        let text = renderer.render(DEFAULT_TEMPLATE, &pr(7, "Fix it")).unwrap();
        assert_eq!(text, "#7 Fix it (bob) https://github.com/acme/widgets/pull/7");
    }

    #[test]
    fn test_render_all_preserves_order() {
        let renderer = TemplateRenderer::builtin().unwrap();
        let text = renderer
            .render_all("compact", &[pr(3, "c"), pr(1, "a"), pr(2, "b")])
            .unwrap();
        assert_eq!(text, "#3 c\n#1 a\n#2 b");
    }

    #[test]
    fn test_unknown_template_fails_even_for_empty_list() {
        let renderer = TemplateRenderer::builtin().unwrap();
        let err = renderer.render_all("fancy", &[]).unwrap_err();
        assert_eq!(err.to_string(), "template 'fancy': no such template");
    }

    #[test]
    fn test_custom_template_with_spacing_and_all_fields() {
        let custom = HashMap::from([(
            "full".to_string(),
            "{{ repo }}#{{number}} [{{state}}] {{draft}} {{ age }}".to_string(),
        )]);
        let renderer = TemplateRenderer::with_templates(&custom).unwrap();

        let mut draft = pr(9, "t");
        draft.draft = true;
        assert_eq!(
            renderer.render("full", &draft).unwrap(),
            "acme/widgets#9 [open] draft unknown"
        );
    }

    #[test]
    fn test_custom_template_overrides_builtin() {
        let custom = HashMap::from([("default".to_string(), "{{url}}".to_string())]);
        let renderer = TemplateRenderer::with_templates(&custom).unwrap();
        assert_eq!(
            renderer.render("default", &pr(1, "x")).unwrap(),
            "https://github.com/acme/widgets/pull/1"
        );
    }

    #[test]
    fn test_compile_rejects_unknown_fields_and_stray_braces() {
        let err = Template::compile("bad", "{{reviewers}}").unwrap_err();
        assert_eq!(err.to_string(), "template 'bad': unknown field 'reviewers'");

        assert!(Template::compile("bad", "{{title").is_err());
        assert!(Template::compile("bad", "title}}").is_err());
        assert!(Template::compile("bad", "{{ }}").is_err());
    }

    #[test]
    fn test_single_braces_are_literal() {
        let template = Template::compile("ok", "{#{{number}}}").unwrap();
        assert_eq!(template.render(&pr(5, "x")), "{#5}");
    }
}
