// src/extract/pattern.rs
use regex::{Regex, RegexBuilder};

use crate::error::ExtractionError;

/// Compile with `.` matching newlines: patterns run against raw markup, which
/// is rarely on one line.
pub fn compile(expr: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(expr)
        .dot_matches_new_line(true)
        .size_limit(1 << 20)
        .build()
}

/// First capture group of the first match, or the whole match when the
/// expression has no groups.
pub fn extract(content: &str, expr: &str) -> Result<String, ExtractionError> {
    let label = format!("regex:{expr}");
    let re = compile(expr).map_err(|e| ExtractionError::invalid(&label, e))?;
    let caps = re
        .captures(content)
        .ok_or_else(|| ExtractionError::NoMatch(label.clone()))?;
    let m = if re.captures_len() > 1 {
        // Optional group that did not participate: nothing to monitor.
        caps.get(1)
            .ok_or_else(|| ExtractionError::EmptyResult(label.clone()))?
    } else {
        caps.get(0)
            .ok_or_else(|| ExtractionError::NoMatch(label.clone()))?
    };
    Ok(m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_group_wins() {
        let out = extract("build 12 (rev 34)", r"build (\d+) \(rev (\d+)\)").unwrap();
        assert_eq!(out, "12");
    }

    #[test]
    fn whole_match_without_groups() {
        let out = extract("price: 42 EUR", r"\d+ EUR").unwrap();
        assert_eq!(out, "42 EUR");
    }

    #[test]
    fn first_match_only() {
        let out = extract("v1 v2 v3", r"v(\d)").unwrap();
        assert_eq!(out, "1");
    }

    #[test]
    fn dot_spans_lines() {
        let out = extract("<p>\nhello\n</p>", r"<p>(.*?)</p>").unwrap();
        assert_eq!(out, "\nhello\n");
    }

    #[test]
    fn no_match_and_invalid() {
        assert!(matches!(
            extract("abc", r"\d+"),
            Err(ExtractionError::NoMatch(_))
        ));
        assert!(matches!(
            extract("abc", r"(\d+"),
            Err(ExtractionError::InvalidRule { .. })
        ));
    }

    #[test]
    fn unmatched_optional_group_is_empty() {
        assert!(matches!(
            extract("abc", r"a(\d)?"),
            Err(ExtractionError::EmptyResult(_))
        ));
    }
}
