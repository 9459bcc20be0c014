//! Pure HTML parsing for listing pages.
//!
//! Extracting links is separated from fetching so the parsing rules are unit
//! testable without network access. The selector logic is deliberately loose:
//! any anchor whose resolved path ends in `.pdf` is a candidate, because the
//! listing markup is an external dependency that drifts.

use std::collections::HashSet;

use scraper::{Html, Selector};
use url::Url;

use super::DocumentLink;

/// Extracts document links from a listing page.
///
/// Every `<a href>` whose target path ends in `.pdf` (case-insensitive) is a
/// candidate. Relative hrefs are resolved against `base`. Results are
/// deduplicated by filename within the page; cross-page and cross-run
/// deduplication happens at the discoverer level by id.
#[must_use]
#[allow(clippy::expect_used)]
pub fn parse_links(html: &str, base: &Url, dataset: u32) -> Vec<DocumentLink> {
    // Static selector, cannot fail to parse.
    let anchors = Selector::parse("a[href]").expect("static selector is valid");

    let document = Html::parse_document(html);
    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for element in document.select(&anchors) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        let Ok(resolved) = base.join(href) else {
            continue;
        };
        if !resolved.path().to_ascii_lowercase().ends_with(".pdf") {
            continue;
        }
        let Some(filename) = last_path_segment(&resolved) else {
            continue;
        };
        if seen.insert(filename.clone()) {
            links.push(DocumentLink::new(resolved.as_str(), dataset, &filename));
        }
    }

    links
}

/// Returns the final non-empty path segment of a URL.
fn last_path_segment(url: &Url) -> Option<String> {
    url.path_segments()?
        .filter(|segment| !segment.is_empty())
        .next_back()
        .map(std::string::ToString::to_string)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://docs.example.gov/disclosures").unwrap()
    }

    #[test]
    fn test_parse_absolute_pdf_link() {
        let html = r#"<a href="https://docs.example.gov/files/REPORT-001.pdf">report</a>"#;
        let links = parse_links(html, &base(), 3);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].filename, "REPORT-001.pdf");
        assert_eq!(links[0].url, "https://docs.example.gov/files/REPORT-001.pdf");
        assert_eq!(links[0].dataset, 3);
        assert_eq!(links[0].id, "3/REPORT-001");
    }

    #[test]
    fn test_parse_relative_pdf_link_resolves_against_base() {
        let html = r#"<a href="/files/doc.pdf">doc</a>"#;
        let links = parse_links(html, &base(), 1);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].url, "https://docs.example.gov/files/doc.pdf");
    }

    #[test]
    fn test_parse_ignores_non_pdf_links() {
        let html = r#"
            <a href="/files/doc.pdf">doc</a>
            <a href="/about">about</a>
            <a href="/files/image.png">image</a>
            <a href="mailto:someone@example.gov">mail</a>
        "#;
        let links = parse_links(html, &base(), 1);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].filename, "doc.pdf");
    }

    #[test]
    fn test_parse_pdf_extension_case_insensitive() {
        let html = r#"<a href="/files/SCAN.PDF">scan</a>"#;
        let links = parse_links(html, &base(), 1);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].filename, "SCAN.PDF");
    }

    #[test]
    fn test_parse_pdf_with_query_string() {
        // The extension check applies to the path, not the full URL.
        let html = r#"<a href="/files/doc.pdf?download=1">doc</a>"#;
        let links = parse_links(html, &base(), 1);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].filename, "doc.pdf");
    }

    #[test]
    fn test_parse_deduplicates_within_page() {
        let html = r#"
            <a href="/files/doc.pdf">first</a>
            <a href="/files/doc.pdf">second mention</a>
        "#;
        let links = parse_links(html, &base(), 1);
        assert_eq!(links.len(), 1);
    }

    #[test]
    fn test_parse_empty_page_yields_no_links() {
        assert!(parse_links("<html><body></body></html>", &base(), 1).is_empty());
    }

    #[test]
    fn test_parse_malformed_html_does_not_panic() {
        let html = "<a href=/files/doc.pdf><div><a></span>";
        let links = parse_links(html, &base(), 1);
        assert_eq!(links.len(), 1);
    }
}
