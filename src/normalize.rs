// src/normalize.rs
//! Canonical form of extracted text, used for equality comparison.

use once_cell::sync::OnceCell;
use regex::Regex;

fn re_tags() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| Regex::new(r"(?s)<[^>]+>").expect("tag regex"))
}

fn re_ws() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    // `\s` is Unicode-aware: covers NBSP, tabs, CR/LF.
    RE.get_or_init(|| Regex::new(r"\s+").expect("whitespace regex"))
}

fn pass(s: &str) -> String {
    // 1) HTML entity decode
    let decoded = html_escape::decode_html_entities(s);
    // 2) Strip tags
    let stripped = re_tags().replace_all(&decoded, "");
    // 3) Collapse whitespace + trim
    re_ws().replace_all(&stripped, " ").trim().to_string()
}

/// Decode entities, strip tags, collapse whitespace, trim.
///
/// Runs passes until the output stops changing, so double-escaped markup
/// (`&amp;lt;b&amp;gt;`) ends in the same place whether it is normalized once
/// or twice. Every pass that changes the string makes it strictly shorter, so
/// the loop terminates.
pub fn normalize(text: &str) -> String {
    let mut cur = pass(text);
    loop {
        let next = pass(&cur);
        if next == cur {
            return cur;
        }
        cur = next;
    }
}

/// First `max` chars of `s`, with `...` appended when truncated.
pub fn summarize(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        let mut out: String = s.chars().take(max).collect();
        out.push_str("...");
        out
    } else {
        s.to_string()
    }
}

/// Short, stable fingerprint for logs. Never log persisted values in full.
pub fn fingerprint(s: &str) -> String {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(s.as_bytes());
    let mut out = String::with_capacity(12);
    for b in digest.iter().take(6) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}
