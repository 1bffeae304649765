// src/extract/selector.rs
use scraper::{Html, Selector};

use super::SelectorMode;
use crate::error::ExtractionError;

/// First element matching `css`; its text or the named attribute, per `mode`.
pub fn extract(doc: &Html, css: &str, mode: &SelectorMode) -> Result<String, ExtractionError> {
    let label = match mode {
        SelectorMode::Text => format!("css:{css}::text"),
        SelectorMode::Attr(a) => format!("css:{css}::attr({a})"),
    };
    let selector = Selector::parse(css).map_err(|e| ExtractionError::invalid(&label, e))?;
    let element = doc
        .select(&selector)
        .next()
        .ok_or_else(|| ExtractionError::NoMatch(label.clone()))?;

    match mode {
        SelectorMode::Text => Ok(element.text().collect::<String>()),
        SelectorMode::Attr(name) => element
            .value()
            .attr(name)
            .map(str::to_string)
            .ok_or(ExtractionError::NoMatch(label)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <html><body>
          <ul id="releases">
            <li><a href="/v/3.1">Release <b>3.1</b></a></li>
            <li><a href="/v/3.0">Release 3.0</a></li>
          </ul>
          <img class="logo" src="/logo.png">
        </body></html>
    "#;

    fn doc() -> Html {
        Html::parse_document(PAGE)
    }

    #[test]
    fn text_of_first_match_includes_nested_nodes() {
        let out = extract(&doc(), "#releases a", &SelectorMode::Text).unwrap();
        assert_eq!(out, "Release 3.1");
    }

    #[test]
    fn attr_mode_on_anchor() {
        let out = extract(&doc(), "#releases a", &SelectorMode::Attr("href".into())).unwrap();
        assert_eq!(out, "/v/3.1");
    }

    #[test]
    fn missing_attribute_is_no_match() {
        let err = extract(&doc(), "img.logo", &SelectorMode::Attr("alt".into())).unwrap_err();
        assert!(matches!(err, ExtractionError::NoMatch(_)));
    }

    #[test]
    fn no_element_is_no_match() {
        let err = extract(&doc(), "table", &SelectorMode::Text).unwrap_err();
        assert!(matches!(err, ExtractionError::NoMatch(_)));
    }

    #[test]
    fn bad_selector_is_invalid_rule() {
        let err = extract(&doc(), "ul[", &SelectorMode::Text).unwrap_err();
        assert!(matches!(err, ExtractionError::InvalidRule { .. }));
    }
}
