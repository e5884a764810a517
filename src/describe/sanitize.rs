use crate::extract::escape_text;
use scraper::{ElementRef, Html, Node};

pub const ALLOWED_TAGS: &[&str] = &[
    "p", "br", "ul", "ol", "li", "b", "strong", "i", "em", "u", "span", "h1", "h2", "h3", "h4",
    "table", "caption", "thead", "tbody", "tfoot", "tr", "th", "td",
];

/// Removed together with everything inside them.
const DROPPED_TAGS: &[&str] = &[
    "script", "style", "iframe", "noscript", "svg", "form", "video", "audio", "object", "embed",
    "template", "colgroup", "col", "head", "title", "meta", "link", "button", "select", "input",
    "textarea",
];

const VOID_TAGS: &[&str] = &["br"];

/// Re-parsing can restructure what one pass emits (a list item nested in a list item,
/// for instance), so passes repeat until the output settles.
const MAX_PASSES: usize = 4;

/// Allow-list sanitation: non-content elements go, inline styles and event handlers go,
/// every other unknown tag becomes a bare `<span>`. Text is never dropped.
///
/// Output is stable under re-sanitation.
pub fn sanitize_html(html: &str) -> String {
    let mut current = sanitize_once(html);
    for _ in 1..MAX_PASSES {
        let next = sanitize_once(&current);
        if next == current {
            break;
        }
        current = next;
    }
    current
}

fn sanitize_once(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    let mut out = String::with_capacity(html.len());
    write_children(fragment.root_element(), &mut out);
    out
}

fn write_children(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => out.push_str(&escape_text(text)),
            Node::Element(_) => {
                if let Some(child_el) = ElementRef::wrap(child) {
                    write_element(child_el, out);
                }
            }
            _ => {}
        }
    }
}

fn write_element(element: ElementRef<'_>, out: &mut String) {
    let name = element.value().name();
    if DROPPED_TAGS.contains(&name) {
        return;
    }
    if !ALLOWED_TAGS.contains(&name) {
        out.push_str("<span>");
        write_children(element, out);
        out.push_str("</span>");
        return;
    }

    out.push('<');
    out.push_str(name);
    let mut attrs: Vec<(&str, &str)> = element
        .value()
        .attrs()
        .filter(|(key, _)| {
            let key = key.to_ascii_lowercase();
            key != "style" && !key.starts_with("on")
        })
        .collect();
    attrs.sort_unstable();
    for (key, value) in attrs {
        out.push(' ');
        out.push_str(key);
        out.push_str("=\"");
        out.push_str(&escape_attr(value));
        out.push('"');
    }
    out.push('>');
    if VOID_TAGS.contains(&name) {
        return;
    }
    write_children(element, out);
    out.push_str("</");
    out.push_str(name);
    out.push('>');
}

fn escape_attr(value: &str) -> String {
    escape_text(value).replace('"', "&quot;")
}
