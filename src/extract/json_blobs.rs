use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use serde_json::Value;

static LD_JSON_SEL: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("script[type='application/ld+json']").expect("ld+json selector")
});
static SCRIPT_SEL: Lazy<Selector> = Lazy::new(|| Selector::parse("script").expect("script selector"));
static IMAGE_URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)(?:https?:)?//[^"'\s<>\\]+?\.(?:png|jpe?g|webp)(?:\?[^"'\s<>\\]*)?"#)
        .expect("image url regex")
});
static DESCRIPTION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""description"\s*:\s*"([^"]+)""#).expect("description regex"));

const SCRIPT_MARKERS: &[&str] = &["\"media\"", "\"images\"", "\"image\"", "\"description\"", "product"];

/// Descriptions and image URLs mined from structured data and inline script payloads.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct JsonFindings {
    pub descriptions: Vec<String>,
    pub images: Vec<String>,
}

pub fn mine(document: &Html) -> JsonFindings {
    let mut findings = JsonFindings::default();
    for script in document.select(&LD_JSON_SEL) {
        let raw = script.text().collect::<String>();
        if let Ok(value) = serde_json::from_str::<Value>(raw.trim()) {
            collect_ld_products(&value, &mut findings);
        }
    }
    for script in document.select(&SCRIPT_SEL) {
        if script.value().attr("type") == Some("application/ld+json") {
            continue;
        }
        let raw = script.text().collect::<String>();
        if !SCRIPT_MARKERS.iter().any(|marker| raw.contains(marker)) {
            continue;
        }
        let raw = raw.replace("\\/", "/");
        for found in IMAGE_URL_RE.find_iter(&raw) {
            findings.images.push(found.as_str().to_string());
        }
        if let Some(caps) = DESCRIPTION_RE.captures(&raw) {
            findings.descriptions.push(unescape_json_str(&caps[1]));
        }
    }
    findings
}

fn collect_ld_products(value: &Value, findings: &mut JsonFindings) {
    match value {
        Value::Array(items) => items.iter().for_each(|item| collect_ld_products(item, findings)),
        Value::Object(map) => {
            if let Some(graph) = map.get("@graph") {
                collect_ld_products(graph, findings);
            }
            if !is_product(map.get("@type")) {
                return;
            }
            if let Some(Value::String(description)) = map.get("description") {
                findings.descriptions.push(description.clone());
            }
            if let Some(image) = map.get("image") {
                collect_image_values(image, &mut findings.images);
            }
        }
        _ => {}
    }
}

fn is_product(kind: Option<&Value>) -> bool {
    match kind {
        Some(Value::String(kind)) => kind.eq_ignore_ascii_case("product"),
        Some(Value::Array(kinds)) => kinds
            .iter()
            .any(|kind| kind.as_str().is_some_and(|k| k.eq_ignore_ascii_case("product"))),
        _ => false,
    }
}

fn collect_image_values(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(url) => out.push(url.clone()),
        Value::Array(items) => items.iter().for_each(|item| collect_image_values(item, out)),
        Value::Object(map) => {
            if let Some(Value::String(url)) = map.get("url").or_else(|| map.get("contentUrl")) {
                out.push(url.clone());
            }
        }
        _ => {}
    }
}

fn unescape_json_str(raw: &str) -> String {
    serde_json::from_str::<String>(&format!("\"{raw}\"")).unwrap_or_else(|_| raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ld_json_product_is_mined() {
        let doc = Html::parse_document(
            r#"<script type="application/ld+json">{"@context":"https://schema.org","@graph":[{"@type":"BreadcrumbList"},{"@type":"Product","description":"Boost description","image":["https://cdn.example/a.jpg",{"url":"https://cdn.example/b.png"}]}]}</script>"#,
        );
        let found = mine(&doc);
        assert_eq!(found.descriptions, vec!["Boost description"]);
        assert_eq!(found.images, vec!["https://cdn.example/a.jpg", "https://cdn.example/b.png"]);
    }

    #[test]
    fn inline_scripts_are_pattern_searched() {
        let doc = Html::parse_document(
            r#"<script>window.meta = {"product":{"description":"Ein Blühstimulator","media":["\/\/cdn.example\/files\/boost_500ml.jpg?v=3"]}};</script><script>var unrelated = 1;</script>"#,
        );
        let found = mine(&doc);
        assert_eq!(found.descriptions, vec!["Ein Blühstimulator"]);
        assert_eq!(found.images, vec!["//cdn.example/files/boost_500ml.jpg?v=3"]);
    }

    #[test]
    fn malformed_ld_json_is_ignored() {
        let doc = Html::parse_document(r#"<script type="application/ld+json">{"@type": "Product",</script>"#);
        assert_eq!(mine(&doc), JsonFindings::default());
    }
}
