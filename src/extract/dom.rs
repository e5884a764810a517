use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Node, Selector};
use url::Url;

static WS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace regex"));

pub static CANONICAL_SEL: Lazy<Selector> =
    Lazy::new(|| Selector::parse("link[rel='canonical'][href]").expect("canonical selector"));
pub static OG_URL_SEL: Lazy<Selector> =
    Lazy::new(|| Selector::parse("meta[property='og:url'][content]").expect("og:url selector"));

const HIDDEN_TAGS: &[&str] = &["script", "style", "noscript", "template", "head", "title"];

const BLOCK_TAGS: &[&str] = &[
    "p", "div", "section", "article", "li", "ul", "ol", "br", "tr", "table", "h1", "h2", "h3",
    "h4", "h5", "h6", "header", "footer", "main", "aside", "blockquote", "dd", "dt", "dl", "pre",
];

/// Whitespace-collapsed visible text of an element (script and style bodies excluded).
pub fn element_text(element: ElementRef<'_>) -> String {
    let mut out = String::new();
    push_text(element, &mut out, false);
    collapse_ws(&out)
}

/// Visible text of an HTML fragment.
pub fn fragment_text(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    element_text(fragment.root_element())
}

pub fn visible_len(html: &str) -> usize {
    fragment_text(html).chars().count()
}

/// Visible text split at block boundaries; blank lines dropped.
pub fn fragment_lines(html: &str) -> Vec<String> {
    let fragment = Html::parse_fragment(html);
    let mut out = String::new();
    push_text(fragment.root_element(), &mut out, true);
    out.lines()
        .map(collapse_ws)
        .filter(|line| !line.is_empty())
        .collect()
}

/// Lowercased, whitespace-collapsed text used as a dedup key.
pub fn normalized_key(html: &str) -> String {
    fragment_text(html).to_lowercase()
}

pub fn collapse_ws(value: &str) -> String {
    WS_RE.replace_all(value, " ").trim().to_string()
}

fn push_text(element: ElementRef<'_>, out: &mut String, line_breaks: bool) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(_) => {
                let Some(child_el) = ElementRef::wrap(child) else {
                    continue;
                };
                let name = child_el.value().name();
                if HIDDEN_TAGS.contains(&name) {
                    continue;
                }
                let sep = if line_breaks && BLOCK_TAGS.contains(&name) {
                    '\n'
                } else if BLOCK_TAGS.contains(&name) {
                    ' '
                } else {
                    '\0'
                };
                if sep != '\0' {
                    out.push(sep);
                }
                push_text(child_el, out, line_breaks);
                if sep != '\0' {
                    out.push(sep);
                }
            }
            _ => {}
        }
    }
}

/// Base URL for resolving relative links: canonical link, then `og:url`, then the part
/// of the page URL before `/products`, then the page origin.
pub fn base_of(document: &Html, page_url: &str) -> String {
    let declared = document
        .select(&CANONICAL_SEL)
        .next()
        .and_then(|el| el.value().attr("href"))
        .or_else(|| {
            document
                .select(&OG_URL_SEL)
                .next()
                .and_then(|el| el.value().attr("content"))
        })
        .map(str::trim)
        .filter(|href| href.starts_with("http"));
    if let Some(href) = declared {
        return href
            .split("/products")
            .next()
            .unwrap_or(href)
            .trim_end_matches('/')
            .to_string();
    }
    if let Some(idx) = page_url.find("/products") {
        return page_url[..idx].trim_end_matches('/').to_string();
    }
    origin_of(page_url).unwrap_or_else(|| page_url.trim_end_matches('/').to_string())
}

pub fn origin_of(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    Some(match parsed.port() {
        Some(port) => format!("{}://{}:{}", parsed.scheme(), host, port),
        None => format!("{}://{}", parsed.scheme(), host),
    })
}

pub fn host_of(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|parsed| parsed.host_str().map(str::to_lowercase))
}

/// Absolute http(s) URL for a raw attribute value.
///
/// Protocol-relative values get `https:`; root-relative values join the base origin;
/// other relative values join the base itself.
pub fn absolutize(base: &str, raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() || raw.starts_with("data:") {
        return None;
    }
    let resolved = if let Some(rest) = raw.strip_prefix("//") {
        format!("https://{rest}")
    } else if raw.starts_with("http://") || raw.starts_with("https://") {
        raw.to_string()
    } else if raw.starts_with('/') {
        let origin = origin_of(base)?;
        Url::parse(&origin).ok()?.join(raw).ok()?.to_string()
    } else {
        let base = format!("{}/", base.trim_end_matches('/'));
        Url::parse(&base).ok()?.join(raw).ok()?.to_string()
    };
    (resolved.starts_with("http://") || resolved.starts_with("https://")).then_some(resolved)
}

/// Lowercased last path segment, without query or fragment.
pub fn filename_of(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.rsplit('/')
        .next()
        .unwrap_or(path)
        .to_lowercase()
}
