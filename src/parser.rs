use scraper::{Html, Selector};
use std::collections::BTreeSet;
use url::Url;

use crate::url_utils;

/// Same-domain links of one page, plus a soft warning when extraction gave up.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedLinks {
    pub links: BTreeSet<String>,
    pub warning: Option<String>,
}

impl ExtractedLinks {
    fn failed(warning: String) -> Self {
        Self {
            links: BTreeSet::new(),
            warning: Some(warning),
        }
    }
}

/// Extract every link on `html_body` that stays on the authority of `request_url`.
///
/// Hrefs are resolved against `request_url`; external, empty, non-http and
/// unresolvable hrefs are dropped, as is the request URL itself. Fragments
/// are removed since they never reach the server.
///
/// # Examples
/// ```
/// use crawl_scout::parser::extract_links;
///
/// let html = r#"<a href="/b">B</a><a href="http://other.onion/c">C</a>"#;
/// let extracted = extract_links(html, "http://target.onion/a");
/// assert_eq!(extracted.links.into_iter().collect::<Vec<_>>(), vec!["http://target.onion/b"]);
/// ```
pub fn extract_links(html_body: &str, request_url: &str) -> ExtractedLinks {
    let base = match Url::parse(request_url) {
        Ok(base) => base,
        Err(e) => return ExtractedLinks::failed(format!("unparsable request URL {request_url}: {e}")),
    };
    let selector = match Selector::parse("a[href]") {
        Ok(selector) => selector,
        Err(e) => return ExtractedLinks::failed(format!("link selector rejected: {e}")),
    };

    let own_fingerprint = url_utils::fingerprint(request_url);
    let document = Html::parse_document(html_body);
    let mut links = BTreeSet::new();

    for element in document.select(&selector) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        let href = href.trim();

        // Skip empty links, javascript links, mailto, tel, etc.
        if href.is_empty()
            || href.starts_with('#')
            || href.starts_with("javascript:")
            || href.starts_with("mailto:")
            || href.starts_with("tel:")
            || href.starts_with("data:")
        {
            continue;
        }

        let Ok(mut resolved) = base.join(href) else {
            continue;
        };
        if !matches!(resolved.scheme(), "http" | "https") {
            continue;
        }
        if !url_utils::same_authority(&resolved, &base) {
            continue;
        }
        resolved.set_fragment(None);

        let resolved = resolved.to_string();
        if url_utils::fingerprint(&resolved) == own_fingerprint {
            continue;
        }
        links.insert(resolved);
    }

    ExtractedLinks {
        links,
        warning: None,
    }
}
