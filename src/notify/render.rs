// src/notify/render.rs
//! Message bodies from a formatter reference and a flat variable map.
//!
//! Three formatter kinds:
//! - `template`: inline text with `{{ var }}` placeholders
//! - `preset`: one of the built-in templates (`default`, `compact`, `detailed`)
//! - `named`: a closure registered on the renderer at startup
//!
//! Rendering is synchronous and side-effect free. Callers fall back to
//! [`failsafe_message`] on any error.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use super::{NotificationEvent, RenderedMessage};
use crate::config::task::Task;
use crate::error::RenderError;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormatterRef {
    Template(String),
    Preset(String),
    Named(String),
}

impl Default for FormatterRef {
    fn default() -> Self {
        FormatterRef::Preset(DEFAULT_PRESET.to_string())
    }
}

pub const DEFAULT_PRESET: &str = "default";

fn preset(name: &str) -> Option<&'static str> {
    match name {
        "default" => Some(
            "{{ task_name }} has changed.\n\nOld: {{ old_summary }}\nNew: {{ new_summary }}\n\n---\n{{ url }}",
        ),
        "compact" => Some("{{ task_name }}: {{ old_summary }} -> {{ new_summary }}"),
        "detailed" => Some(
            "Task: {{ task_name }}\nURL: {{ url }}\nDetected at: {{ timestamp }}\n\nPrevious value:\n{{ old_summary }}\n\nCurrent value:\n{{ new_summary }}\n\nSnapshot: {{ screenshot_ref }}",
        ),
        _ => None,
    }
}

/// Variables visible to templates and named formatters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TemplateContext {
    vars: BTreeMap<String, String>,
}

impl TemplateContext {
    pub fn from_event(ev: &NotificationEvent) -> Self {
        let mut ctx = Self::default();
        ctx.insert("task_name", &ev.task_name);
        ctx.insert("url", &ev.url);
        ctx.insert("old_summary", &ev.old_value_summary);
        ctx.insert("new_summary", &ev.new_value_summary);
        ctx.insert("screenshot_ref", ev.screenshot_ref.as_deref().unwrap_or("none"));
        ctx.insert("timestamp", ev.timestamp.to_rfc3339());
        ctx
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn vars(&self) -> &BTreeMap<String, String> {
        &self.vars
    }
}

pub trait MessageRenderer: Send + Sync {
    fn render(&self, formatter: &FormatterRef, ctx: &TemplateContext)
        -> Result<String, RenderError>;
}

pub type NamedFormatter = Arc<dyn Fn(&TemplateContext) -> Result<String, String> + Send + Sync>;

#[derive(Clone, Default)]
pub struct DefaultRenderer {
    named: HashMap<String, NamedFormatter>,
}

impl fmt::Debug for DefaultRenderer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.named.keys().collect();
        names.sort();
        f.debug_struct("DefaultRenderer")
            .field("named", &names)
            .finish()
    }
}

impl DefaultRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&TemplateContext) -> Result<String, String> + Send + Sync + 'static,
    {
        self.named.insert(name.into(), Arc::new(f));
        self
    }
}

impl MessageRenderer for DefaultRenderer {
    fn render(
        &self,
        formatter: &FormatterRef,
        ctx: &TemplateContext,
    ) -> Result<String, RenderError> {
        match formatter {
            FormatterRef::Template(t) => fill(t, ctx),
            FormatterRef::Preset(name) => {
                let t = preset(name).ok_or_else(|| RenderError::UnknownPreset(name.clone()))?;
                fill(t, ctx)
            }
            FormatterRef::Named(name) => {
                let f = self
                    .named
                    .get(name)
                    .ok_or_else(|| RenderError::UnknownFormatter(name.clone()))?;
                f(ctx).map_err(|reason| RenderError::FormatterFailed {
                    name: name.clone(),
                    reason,
                })
            }
        }
    }
}

fn placeholder() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("placeholder regex")
    })
}

/// Substitute every `{{ var }}`. An unknown variable is an error, not an empty string.
fn fill(template: &str, ctx: &TemplateContext) -> Result<String, RenderError> {
    let mut missing: Option<String> = None;
    let out = placeholder().replace_all(template, |caps: &Captures<'_>| {
        let key = &caps[1];
        match ctx.get(key) {
            Some(v) => v.to_string(),
            None => {
                missing.get_or_insert_with(|| key.to_string());
                String::new()
            }
        }
    });
    match missing {
        Some(key) => Err(RenderError::Template(format!("unknown variable `{key}`"))),
        None => Ok(out.into_owned()),
    }
}

/// Body used whenever rendering fails.
pub fn failsafe_message(task_name: &str, url: &str) -> String {
    format!("Task '{task_name}' has changed. URL: {url}")
}

/// Title plus rendered body for `task`; never fails.
pub fn compose(
    renderer: &dyn MessageRenderer,
    task: &Task,
    event: NotificationEvent,
    extra: &BTreeMap<String, String>,
) -> RenderedMessage {
    let mut ctx = TemplateContext::from_event(&event);
    for (k, v) in extra {
        ctx.insert(k.clone(), v.clone());
    }
    let formatter = task.formatter.clone().unwrap_or_default();
    let body = match renderer.render(&formatter, &ctx) {
        Ok(body) if !body.trim().is_empty() => body,
        Ok(_) => {
            tracing::warn!(task = %task.name, "formatter produced an empty message; using fallback");
            failsafe_message(&event.task_name, &event.url)
        }
        Err(e) => {
            tracing::warn!(task = %task.name, error = %e, "render failed; using fallback");
            failsafe_message(&event.task_name, &event.url)
        }
    };
    RenderedMessage {
        title: task.title(),
        body,
        event,
    }
}
