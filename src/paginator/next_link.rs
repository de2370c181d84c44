use scraper::{ElementRef, Html, Selector};
use std::sync::OnceLock;
use url::Url;

use crate::error::CrawlResult;
use crate::template::{compile_css, FieldSelector};

/// Common "next page" markup, tried in order when no selector is configured
const NEXT_CANDIDATES: &[&str] = &[
    "a[rel~=next]",
    "li.next a",
    "a.next",
    "a[aria-label=next]",
    "a[aria-label=Next]",
    ".pagination .next a",
    ".pager .next a",
];

/// Anchor texts recognised as "next page"
const NEXT_TEXTS: &[&str] = &["下一页", "下页", "下一頁", "next", "next page", "»", ">", "›"];

/// Find the absolute URL of the next page, if any
///
/// With a configured selector the first match carrying a usable link wins.
/// Without one, well-known pagination markup and anchor texts are tried.
/// The returned URL never carries a fragment.
pub fn find_next_link(html: &str, base: &Url, next_selector: Option<&str>) -> CrawlResult<Option<Url>> {
    let document = Html::parse_document(html);

    match next_selector.map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => {
            let selector = FieldSelector::parse(raw);
            let attribute = selector.attribute.as_deref().unwrap_or("href");
            let css = compile_css(&selector.css)?;
            Ok(document
                .select(&css)
                .find_map(|element| link_from(element, attribute, base)))
        }
        None => Ok(auto_detect(&document, base)),
    }
}

fn auto_detect(document: &Html, base: &Url) -> Option<Url> {
    for candidate in NEXT_CANDIDATES {
        let Ok(selector) = Selector::parse(candidate) else {
            continue;
        };
        if let Some(url) = document.select(&selector).find_map(|el| link_from(el, "href", base)) {
            return Some(url);
        }
    }

    let by_text = document.select(anchor_selector()).find_map(|anchor| {
        let text = anchor.text().collect::<String>();
        let text = text.trim().to_lowercase();
        if NEXT_TEXTS.contains(&text.as_str()) {
            link_from(anchor, "href", base)
        } else {
            None
        }
    });
    if by_text.is_some() {
        return by_text;
    }

    // Last resort: the last usable link of a generic pager block
    document.select(pager_selector()).find_map(|pager| {
        pager
            .select(anchor_selector())
            .filter_map(|anchor| link_from(anchor, "href", base))
            .last()
    })
}

/// Link on the element itself, or on its first descendant anchor
fn link_from(element: ElementRef<'_>, attribute: &str, base: &Url) -> Option<Url> {
    let raw = element.value().attr(attribute).or_else(|| {
        element
            .select(anchor_selector())
            .next()
            .and_then(|a| a.value().attr(attribute))
    })?;

    let raw = raw.trim();
    let lower = raw.to_ascii_lowercase();
    if raw.is_empty() || raw.starts_with('#') || lower.starts_with("javascript:") {
        return None;
    }

    let mut url = base.join(raw).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    url.set_fragment(None);
    Some(url)
}

fn pager_selector() -> &'static Selector {
    static SELECTOR: OnceLock<Selector> = OnceLock::new();
    SELECTOR.get_or_init(|| Selector::parse(".pagination, .pager, .page, .pagenav").expect("static selector"))
}

fn anchor_selector() -> &'static Selector {
    static SELECTOR: OnceLock<Selector> = OnceLock::new();
    SELECTOR.get_or_init(|| Selector::parse("a[href]").expect("static selector"))
}
