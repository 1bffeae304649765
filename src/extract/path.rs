// src/extract/path.rs
//! Small XPath subset evaluated over a `scraper` tree.
//!
//! Supported: `/` and `//` steps, name tests and `*`, predicates `[n]`,
//! `[last()]`, `[@a]`, `[@a='v']`, `[contains(@a,'v')]`, `[text()='v']`,
//! `[contains(text(),'v')]`, `[contains(.,'v')]`, and a terminal `text()` or
//! `@attr` step. A leading `.` (`.//div`) is accepted and ignored.

use std::collections::{HashMap, HashSet};

use scraper::{ElementRef, Html};

use crate::error::ExtractionError;
use crate::normalize::normalize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    Child,
    Descendant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum NodeTest {
    Any,
    Name(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Operand {
    Attr(String),
    Text,
    Context,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Predicate {
    Position(usize),
    Last,
    HasAttr(String),
    Equals(Operand, String),
    Contains(Operand, String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Step {
    axis: Axis,
    test: NodeTest,
    predicates: Vec<Predicate>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Terminal {
    Text,
    Attr(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathExpr {
    steps: Vec<Step>,
    terminal: Option<(Axis, Terminal)>,
}

struct Parser<'s> {
    src: &'s str,
    pos: usize,
}

impl<'s> Parser<'s> {
    fn rest(&self) -> &'s str {
        &self.src[self.pos..]
    }

    fn eat(&mut self, tok: &str) -> bool {
        if self.rest().starts_with(tok) {
            self.pos += tok.len();
            true
        } else {
            false
        }
    }

    fn skip_ws(&mut self) {
        let trimmed = self.rest().trim_start();
        self.pos = self.src.len() - trimmed.len();
    }

    fn expect(&mut self, tok: &str) -> Result<(), String> {
        self.skip_ws();
        if self.eat(tok) {
            Ok(())
        } else {
            Err(format!("expected `{tok}` at offset {}", self.pos))
        }
    }

    fn name(&mut self) -> Result<String, String> {
        let rest = self.rest();
        let len = rest
            .char_indices()
            .find(|&(i, c)| {
                !(c.is_ascii_alphabetic()
                    || c == '_'
                    || (i > 0 && (c.is_ascii_digit() || c == '-' || c == ':' || c == '.')))
            })
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        if len == 0 {
            return Err(format!("expected a name at offset {}", self.pos));
        }
        self.pos += len;
        Ok(rest[..len].to_string())
    }

    fn literal(&mut self) -> Result<String, String> {
        self.skip_ws();
        let quote = match self.rest().chars().next() {
            Some(q @ ('\'' | '"')) => q,
            _ => return Err(format!("expected a quoted literal at offset {}", self.pos)),
        };
        self.pos += 1;
        let rest = self.rest();
        let end = rest
            .find(quote)
            .ok_or_else(|| "unterminated literal".to_string())?;
        let lit = rest[..end].to_string();
        self.pos += end + 1;
        Ok(lit)
    }

    fn operand(&mut self) -> Result<Operand, String> {
        self.skip_ws();
        if self.eat("@") {
            Ok(Operand::Attr(self.name()?))
        } else if self.eat("text()") {
            Ok(Operand::Text)
        } else if self.eat(".") {
            Ok(Operand::Context)
        } else {
            Err(format!("expected `@name`, `text()` or `.` at offset {}", self.pos))
        }
    }

    fn predicate(&mut self) -> Result<Predicate, String> {
        self.skip_ws();
        let pred = if self.eat("last()") {
            Predicate::Last
        } else if self.rest().starts_with(|c: char| c.is_ascii_digit()) {
            let digits: String = self.rest().chars().take_while(|c| c.is_ascii_digit()).collect();
            self.pos += digits.len();
            let n: usize = digits.parse().map_err(|_| "bad position".to_string())?;
            if n == 0 {
                return Err("positions are 1-based".into());
            }
            Predicate::Position(n)
        } else if self.eat("contains(") {
            let op = self.operand()?;
            self.expect(",")?;
            let lit = self.literal()?;
            self.expect(")")?;
            Predicate::Contains(op, lit)
        } else {
            let op = self.operand()?;
            self.skip_ws();
            if self.eat("=") {
                Predicate::Equals(op, self.literal()?)
            } else {
                match op {
                    Operand::Attr(a) => Predicate::HasAttr(a),
                    _ => return Err(format!("expected `=` at offset {}", self.pos)),
                }
            }
        };
        self.expect("]")?;
        Ok(pred)
    }

    fn parse(mut self) -> Result<PathExpr, String> {
        if self.src.trim().is_empty() {
            return Err("empty path".into());
        }
        self.skip_ws();
        if self.rest().starts_with("./") {
            self.pos += 1;
        }
        let mut steps = Vec::new();
        let mut terminal = None;
        loop {
            self.skip_ws();
            if self.rest().is_empty() {
                break;
            }
            if terminal.is_some() {
                return Err("`text()` / `@attr` must be the last step".into());
            }
            let axis = if self.eat("//") {
                Axis::Descendant
            } else if self.eat("/") {
                Axis::Child
            } else {
                return Err(format!("expected `/` or `//` at offset {}", self.pos));
            };
            if self.eat("text()") {
                terminal = Some((axis, Terminal::Text));
                continue;
            }
            if self.eat("@") {
                terminal = Some((axis, Terminal::Attr(self.name()?)));
                continue;
            }
            let test = if self.eat("*") {
                NodeTest::Any
            } else {
                NodeTest::Name(self.name()?.to_ascii_lowercase())
            };
            let mut predicates = Vec::new();
            while self.eat("[") {
                predicates.push(self.predicate()?);
            }
            steps.push(Step {
                axis,
                test,
                predicates,
            });
        }
        if steps.is_empty() && terminal.is_none() {
            return Err("path selects nothing".into());
        }
        Ok(PathExpr { steps, terminal })
    }
}

/// Evaluation context: the document node or an element.
#[derive(Clone, Copy)]
enum Ctx<'a> {
    Document,
    Element(ElementRef<'a>),
}

fn children<'a>(doc: &'a Html, ctx: Ctx<'a>) -> Vec<ElementRef<'a>> {
    match ctx {
        Ctx::Document => vec![doc.root_element()],
        Ctx::Element(el) => el.children().filter_map(ElementRef::wrap).collect(),
    }
}

fn self_and_descendants<'a>(doc: &'a Html, ctx: Ctx<'a>) -> Vec<Ctx<'a>> {
    let mut out = vec![ctx];
    let start = match ctx {
        Ctx::Document => doc.root_element(),
        Ctx::Element(el) => el,
    };
    let skip = usize::from(matches!(ctx, Ctx::Element(_)));
    out.extend(
        start
            .descendants()
            .skip(skip)
            .filter_map(ElementRef::wrap)
            .map(Ctx::Element),
    );
    out
}

fn own_text(el: ElementRef<'_>) -> String {
    el.children()
        .filter_map(|n| n.value().as_text().map(|t| t.to_string()))
        .collect()
}

fn operand_value(el: ElementRef<'_>, op: &Operand) -> Option<String> {
    match op {
        Operand::Attr(a) => el.value().attr(a).map(str::to_string),
        Operand::Text => Some(normalize(&own_text(el))),
        Operand::Context => Some(normalize(&el.text().collect::<String>())),
    }
}

fn apply_predicate<'a>(candidates: Vec<ElementRef<'a>>, pred: &Predicate) -> Vec<ElementRef<'a>> {
    match pred {
        Predicate::Position(n) => candidates.into_iter().nth(n - 1).into_iter().collect(),
        Predicate::Last => candidates.into_iter().last().into_iter().collect(),
        Predicate::HasAttr(a) => candidates
            .into_iter()
            .filter(|el| el.value().attr(a).is_some())
            .collect(),
        Predicate::Equals(op, lit) => candidates
            .into_iter()
            .filter(|el| operand_value(*el, op).as_deref() == Some(lit.as_str()))
            .collect(),
        Predicate::Contains(op, lit) => candidates
            .into_iter()
            .filter(|el| {
                operand_value(*el, op)
                    .map(|v| v.contains(lit.as_str()))
                    .unwrap_or(false)
            })
            .collect(),
    }
}

impl PathExpr {
    pub fn parse(src: &str) -> Result<Self, String> {
        Parser { src, pos: 0 }.parse()
    }

    /// Matched elements in document order.
    fn select<'a>(&self, doc: &'a Html) -> Vec<Ctx<'a>> {
        let mut contexts = vec![Ctx::Document];
        for step in &self.steps {
            let bases = match step.axis {
                Axis::Child => contexts,
                Axis::Descendant => contexts
                    .into_iter()
                    .flat_map(|c| self_and_descendants(doc, c))
                    .collect(),
            };
            let mut seen = HashSet::new();
            let mut next = Vec::new();
            for base in bases {
                let mut candidates: Vec<ElementRef<'a>> = children(doc, base)
                    .into_iter()
                    .filter(|el| match &step.test {
                        NodeTest::Any => true,
                        NodeTest::Name(n) => el.value().name().eq_ignore_ascii_case(n),
                    })
                    .collect();
                for pred in &step.predicates {
                    candidates = apply_predicate(candidates, pred);
                }
                for el in candidates {
                    if seen.insert(el.id()) {
                        next.push(el);
                    }
                }
            }
            sort_document_order(doc, &mut next);
            contexts = next.into_iter().map(Ctx::Element).collect();
        }
        contexts
    }

    /// String value of the first matched node.
    pub fn evaluate(&self, doc: &Html) -> Option<String> {
        let nodes = self.select(doc);
        match &self.terminal {
            None => nodes.into_iter().find_map(|c| match c {
                Ctx::Element(el) => Some(el.text().collect::<String>()),
                Ctx::Document => None,
            }),
            Some((axis, term)) => {
                let targets: Vec<ElementRef<'_>> = match axis {
                    Axis::Child => nodes
                        .into_iter()
                        .filter_map(|c| match c {
                            Ctx::Element(el) => Some(el),
                            Ctx::Document => None,
                        })
                        .collect(),
                    Axis::Descendant => {
                        let mut all: Vec<ElementRef<'_>> = nodes
                            .into_iter()
                            .flat_map(|c| self_and_descendants(doc, c))
                            .filter_map(|c| match c {
                                Ctx::Element(el) => Some(el),
                                Ctx::Document => None,
                            })
                            .collect();
                        let mut seen = HashSet::new();
                        all.retain(|el| seen.insert(el.id()));
                        sort_document_order(doc, &mut all);
                        all
                    }
                };
                match term {
                    Terminal::Text => targets
                        .into_iter()
                        .map(own_text)
                        .find(|t| !t.trim().is_empty()),
                    Terminal::Attr(a) => targets
                        .into_iter()
                        .find_map(|el| el.value().attr(a).map(str::to_string)),
                }
            }
        }
    }
}

fn sort_document_order(doc: &Html, nodes: &mut [ElementRef<'_>]) {
    if nodes.len() < 2 {
        return;
    }
    let order: HashMap<_, usize> = doc
        .root_element()
        .descendants()
        .enumerate()
        .map(|(i, n)| (n.id(), i))
        .collect();
    nodes.sort_by_key(|el| order.get(&el.id()).copied().unwrap_or(usize::MAX));
}

pub fn extract(doc: &Html, expr: &str) -> Result<String, ExtractionError> {
    let label = format!("xpath:{expr}");
    let path = PathExpr::parse(expr).map_err(|e| ExtractionError::invalid(&label, e))?;
    path.evaluate(doc).ok_or(ExtractionError::NoMatch(label))
}
