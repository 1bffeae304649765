// src/extract/mod.rs
//! Rule-based extraction: pattern (regex), selector (CSS) and path (XPath subset).
//!
//! Rules are written either as a shorthand string (`regex:...`, `css:...::text`,
//! `css:...::attr(href)`, `xpath:...`) or as a table
//! `{ kind = "selector", expr = "a.dl", mode = "attr:href" }`.

pub mod path;
pub mod pattern;
pub mod selector;

use std::fmt;

use scraper::Html;
use serde::{Deserialize, Serialize};

use crate::error::ExtractionError;
use crate::normalize::normalize;

/// What a selector rule returns from the matched element.
///
/// Always explicit: an `<a>` matched in `Text` mode yields its visible text,
/// never its `href`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SelectorMode {
    Text,
    Attr(String),
}

impl SelectorMode {
    fn parse(raw: &str) -> Result<Self, String> {
        let t = raw.trim();
        if t.eq_ignore_ascii_case("text") {
            return Ok(Self::Text);
        }
        if let Some(name) = t.strip_prefix("attr:") {
            let name = name.trim();
            if name.is_empty() {
                return Err("empty attribute name in `attr:`".into());
            }
            return Ok(Self::Attr(name.to_string()));
        }
        Err(format!("unknown selector mode `{t}` (expected `text` or `attr:<name>`)"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RuleKind {
    Pattern(String),
    Selector { css: String, mode: SelectorMode },
    Path(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RuleSpec", into = "String")]
pub struct Rule {
    pub kind: RuleKind,
}

impl Rule {
    pub fn pattern(expr: impl Into<String>) -> Self {
        Self {
            kind: RuleKind::Pattern(expr.into()),
        }
    }

    pub fn selector_text(css: impl Into<String>) -> Self {
        Self {
            kind: RuleKind::Selector {
                css: css.into(),
                mode: SelectorMode::Text,
            },
        }
    }

    pub fn selector_attr(css: impl Into<String>, attr: impl Into<String>) -> Self {
        Self {
            kind: RuleKind::Selector {
                css: css.into(),
                mode: SelectorMode::Attr(attr.into()),
            },
        }
    }

    pub fn path(expr: impl Into<String>) -> Self {
        Self {
            kind: RuleKind::Path(expr.into()),
        }
    }

    /// Parse the shorthand string form.
    pub fn parse(raw: &str) -> Result<Self, ExtractionError> {
        let raw = raw.trim();
        let (prefix, body) = raw
            .split_once(':')
            .ok_or_else(|| ExtractionError::invalid(raw, "missing `kind:` prefix"))?;
        let body = body.trim();
        if body.is_empty() {
            return Err(ExtractionError::invalid(raw, "empty expression"));
        }
        match prefix.trim().to_ascii_lowercase().as_str() {
            "regex" | "pattern" => Ok(Self::pattern(body)),
            "xpath" | "path" => Ok(Self::path(body)),
            "css" | "selector" => {
                if let Some((css, suffix)) = body.rsplit_once("::") {
                    let mode = if suffix.trim() == "text" {
                        SelectorMode::Text
                    } else if let Some(attr) = suffix
                        .trim()
                        .strip_prefix("attr(")
                        .and_then(|s| s.strip_suffix(')'))
                    {
                        SelectorMode::parse(&format!("attr:{attr}"))
                            .map_err(|e| ExtractionError::invalid(raw, e))?
                    } else {
                        return Err(ExtractionError::invalid(
                            raw,
                            format!("unknown selector suffix `::{suffix}`"),
                        ));
                    };
                    Ok(Self {
                        kind: RuleKind::Selector {
                            css: css.trim().to_string(),
                            mode,
                        },
                    })
                } else {
                    Ok(Self::selector_text(body))
                }
            }
            other => Err(ExtractionError::invalid(
                raw,
                format!("unknown rule kind `{other}`"),
            )),
        }
    }

    /// Cheap syntax check without fetched content (used at config load).
    pub fn validate(&self) -> Result<(), ExtractionError> {
        let label = self.to_string();
        match &self.kind {
            RuleKind::Pattern(expr) => pattern::compile(expr)
                .map(|_| ())
                .map_err(|e| ExtractionError::invalid(label, e)),
            RuleKind::Selector { css, .. } => scraper::Selector::parse(css)
                .map(|_| ())
                .map_err(|e| ExtractionError::invalid(label, e)),
            RuleKind::Path(expr) => path::PathExpr::parse(expr)
                .map(|_| ())
                .map_err(|e| ExtractionError::invalid(label, e)),
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            RuleKind::Pattern(e) => write!(f, "regex:{e}"),
            RuleKind::Selector {
                css,
                mode: SelectorMode::Text,
            } => write!(f, "css:{css}::text"),
            RuleKind::Selector {
                css,
                mode: SelectorMode::Attr(a),
            } => write!(f, "css:{css}::attr({a})"),
            RuleKind::Path(e) => write!(f, "xpath:{e}"),
        }
    }
}

impl From<Rule> for String {
    fn from(r: Rule) -> Self {
        r.to_string()
    }
}

/// Config representation: shorthand string or explicit table.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RuleSpec {
    Shorthand(String),
    Table {
        kind: String,
        expr: String,
        #[serde(default)]
        mode: Option<String>,
    },
}

impl TryFrom<RuleSpec> for Rule {
    type Error = ExtractionError;

    fn try_from(spec: RuleSpec) -> Result<Self, Self::Error> {
        match spec {
            RuleSpec::Shorthand(s) => Rule::parse(&s),
            RuleSpec::Table { kind, expr, mode } => {
                let label = format!("{kind}:{expr}");
                if expr.trim().is_empty() {
                    return Err(ExtractionError::invalid(label, "empty expression"));
                }
                match kind.trim().to_ascii_lowercase().as_str() {
                    "pattern" | "regex" | "path" | "xpath" if mode.is_some() => Err(
                        ExtractionError::invalid(label, "`mode` only applies to selector rules"),
                    ),
                    "pattern" | "regex" => Ok(Rule::pattern(expr)),
                    "path" | "xpath" => Ok(Rule::path(expr)),
                    "selector" | "css" => {
                        let mode = match mode {
                            Some(m) => {
                                SelectorMode::parse(&m).map_err(|e| ExtractionError::invalid(&label, e))?
                            }
                            None => SelectorMode::Text,
                        };
                        Ok(Rule {
                            kind: RuleKind::Selector { css: expr, mode },
                        })
                    }
                    other => Err(ExtractionError::invalid(
                        label,
                        format!("unknown rule kind `{other}`"),
                    )),
                }
            }
        }
    }
}

/// Fetched markup, parsed at most once however many rules read it.
pub struct Document<'c> {
    raw: &'c str,
    parsed: Option<Html>,
}

impl<'c> Document<'c> {
    pub fn new(raw: &'c str) -> Self {
        Self { raw, parsed: None }
    }

    pub fn raw(&self) -> &'c str {
        self.raw
    }

    pub fn html(&mut self) -> &Html {
        let raw = self.raw;
        self.parsed.get_or_insert_with(|| Html::parse_document(raw))
    }
}

/// Apply one rule to `content`. Returns the raw (un-normalized) value.
pub fn extract(content: &str, rule: &Rule) -> Result<String, ExtractionError> {
    let mut doc = Document::new(content);
    extract_from(&mut doc, rule)
}

pub fn extract_from(doc: &mut Document<'_>, rule: &Rule) -> Result<String, ExtractionError> {
    let label = rule.to_string();
    let raw = match &rule.kind {
        RuleKind::Pattern(expr) => pattern::extract(doc.raw(), expr)?,
        RuleKind::Selector { css, mode } => selector::extract(doc.html(), css, mode)?,
        RuleKind::Path(expr) => path::extract(doc.html(), expr)?,
    };
    if normalize(&raw).is_empty() {
        return Err(ExtractionError::EmptyResult(label));
    }
    Ok(raw)
}

/// Apply every rule to the same content, joined in declaration order.
pub fn extract_all(content: &str, rules: &[Rule]) -> Result<String, ExtractionError> {
    if rules.is_empty() {
        return Err(ExtractionError::invalid("", "task has no rules"));
    }
    let mut doc = Document::new(content);
    let mut parts = Vec::with_capacity(rules.len());
    for rule in rules {
        parts.push(extract_from(&mut doc, rule)?);
    }
    Ok(parts.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shorthand_parses_all_kinds() {
        assert_eq!(
            Rule::parse("regex:V(\\d+)").unwrap().kind,
            RuleKind::Pattern("V(\\d+)".into())
        );
        assert_eq!(
            Rule::parse("pattern:V(\\d+)").unwrap(),
            Rule::pattern("V(\\d+)")
        );
        assert_eq!(Rule::parse("css:a.dl").unwrap(), Rule::selector_text("a.dl"));
        assert_eq!(
            Rule::parse("css:a.dl::text").unwrap(),
            Rule::selector_text("a.dl")
        );
        assert_eq!(
            Rule::parse("css:a.dl::attr(href)").unwrap(),
            Rule::selector_attr("a.dl", "href")
        );
        assert_eq!(Rule::parse("xpath://h1").unwrap(), Rule::path("//h1"));
    }

    #[test]
    fn shorthand_rejects_unknown() {
        assert!(matches!(
            Rule::parse("jsonpath:$.a"),
            Err(ExtractionError::InvalidRule { .. })
        ));
        assert!(Rule::parse("no prefix").is_err());
        assert!(Rule::parse("css:a::first-line").is_err());
        assert!(Rule::parse("regex:").is_err());
    }

    #[test]
    fn display_round_trips_through_parse() {
        for r in [
            Rule::pattern("V(\\d+)"),
            Rule::selector_text("div > a"),
            Rule::selector_attr("a", "href"),
            Rule::path("//div[@id='x']/a/@href"),
        ] {
            assert_eq!(Rule::parse(&r.to_string()).unwrap(), r);
        }
    }

    #[test]
    fn table_form_requires_explicit_mode_semantics() {
        let json = r#"{"kind":"selector","expr":"a","mode":"attr:href"}"#;
        let r: Rule = serde_json::from_str(json).unwrap();
        assert_eq!(r, Rule::selector_attr("a", "href"));

        let json = r#"{"kind":"selector","expr":"a"}"#;
        let r: Rule = serde_json::from_str(json).unwrap();
        assert_eq!(r, Rule::selector_text("a"));

        let bad = r#"{"kind":"pattern","expr":"a","mode":"text"}"#;
        assert!(serde_json::from_str::<Rule>(bad).is_err());
        let bad = r#"{"kind":"selector","expr":"a","mode":"href"}"#;
        assert!(serde_json::from_str::<Rule>(bad).is_err());
    }

    #[test]
    fn validate_catches_bad_syntax() {
        assert!(Rule::pattern("(unclosed").validate().is_err());
        assert!(Rule::selector_text("a[").validate().is_err());
        assert!(Rule::path("no-slash").validate().is_err());
        assert!(Rule::pattern("V(\\d+)").validate().is_ok());
    }

    #[test]
    fn version_scenario() {
        let rule = Rule::parse(r"pattern:V(\d+\.\d+\.\d+)").unwrap();
        let page = r#"<a href="/dl/Loader_V9.8.0.apk">Download Loader_V9.8.0.apk</a>"#;
        assert_eq!(extract(page, &rule).unwrap(), "9.8.0");
    }

    #[test]
    fn hyperlink_text_vs_attr_is_explicit() {
        let page = r#"<html><body><a class="dl" href="https://x.test/v2.apk">Get v2</a></body></html>"#;
        let text = Rule::parse("css:a.dl::text").unwrap();
        let href = Rule::parse("css:a.dl::attr(href)").unwrap();
        assert_eq!(extract(page, &text).unwrap(), "Get v2");
        assert_eq!(extract(page, &href).unwrap(), "https://x.test/v2.apk");
    }

    #[test]
    fn multi_rule_joins_in_declaration_order() {
        let page = r#"<h1>Title</h1><p class="v">v1.2</p>"#;
        let rules = vec![Rule::selector_text("p.v"), Rule::selector_text("h1")];
        assert_eq!(extract_all(page, &rules).unwrap(), "v1.2\nTitle");
    }

    #[test]
    fn multi_rule_fails_if_any_rule_fails() {
        let page = r#"<h1>Title</h1>"#;
        let rules = vec![Rule::selector_text("h1"), Rule::selector_text("p.missing")];
        assert!(matches!(
            extract_all(page, &rules),
            Err(ExtractionError::NoMatch(_))
        ));
        assert!(matches!(
            extract_all(page, &[]),
            Err(ExtractionError::InvalidRule { .. })
        ));
    }

    #[test]
    fn whitespace_only_result_is_empty() {
        let page = r#"<div id="e">  &nbsp; <span></span> </div>"#;
        let err = extract(page, &Rule::selector_text("#e")).unwrap_err();
        assert!(matches!(err, ExtractionError::EmptyResult(_)));
    }
}
