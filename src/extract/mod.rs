//! Description blocks and candidate images from one fetched product page.

pub mod dom;
mod json_blobs;

use dom::{absolutize, base_of, element_text, normalized_key, visible_len};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::Serialize;
use std::collections::HashSet;

pub use json_blobs::JsonFindings;

pub const BLOCK_MIN_CHARS: usize = 120;
pub const JSON_DESCRIPTION_MIN_CHARS: usize = 80;
pub const MAX_BLOCKS: usize = 6;
pub const MAX_IMAGE_CANDIDATES: usize = 50;

const DESCRIPTION_SELECTORS: &[&str] = &[
    "#tab-description",
    "#description",
    "div[itemprop='description']",
    ".product-description",
    ".product__description",
    ".product-single__description",
    "section.description",
    "div.description",
    "article.product__description",
    ".rte",
    ".entry-content",
    "main article",
    "div[data-product-description]",
    "section.product-description",
    ".product__tabs",
    ".accordion",
    ".tab-content",
    ".section--description",
];

static DESCRIPTION_SELS: Lazy<Vec<Selector>> = Lazy::new(|| {
    DESCRIPTION_SELECTORS
        .iter()
        .filter_map(|raw| Selector::parse(raw).ok())
        .collect()
});
static LARGEST_BLOCK_SEL: Lazy<Selector> =
    Lazy::new(|| Selector::parse("div, section, article").expect("block selector"));
static GALLERY_SEL: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(
        ".product__media, .product-gallery, .gallery, .fotorama, .swiper, .slick, .thumbnails, .product-media, [class*='gallery']",
    )
    .expect("gallery selector")
});
static IMAGE_NODE_SEL: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(
        "img[src], img[data-src], img[data-zoom-image], img[data-large-image], source[srcset], [data-srcset], [data-bg], [data-background-image]",
    )
    .expect("image node selector")
});
static OG_IMAGE_SEL: Lazy<Selector> =
    Lazy::new(|| Selector::parse("meta[property='og:image'][content]").expect("og:image selector"));
static PRELOAD_SEL: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("link[rel='preload'][as='image'][href]").expect("preload selector")
});
static BG_URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"background-image\s*:\s*url\(\s*['"]?([^'")]+)['"]?\s*\)"#).expect("bg regex")
});
static IMAGE_EXT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\.(?:png|jpe?g|webp)(?:\?|$)").expect("image ext regex"));

const DIRECT_ATTRS: &[&str] = &[
    "data-zoom-image",
    "data-large-image",
    "data-src",
    "src",
    "data-bg",
    "data-background-image",
];

/// Raw, pre-scoring content of one fetch attempt.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExtractionResult {
    pub blocks: Vec<String>,
    pub images: Vec<String>,
}

impl ExtractionResult {
    /// Visible-text length of all blocks joined.
    pub fn desc_len(&self) -> usize {
        if self.blocks.is_empty() {
            return 0;
        }
        visible_len(&self.blocks.join("\n"))
    }

    pub fn is_empty(&self) -> bool {
        self.desc_len() == 0 && self.images.is_empty()
    }
}

pub fn parse_html(html: &str, page_url: &str) -> ExtractionResult {
    let document = Html::parse_document(html);
    let base = base_of(&document, page_url);
    let json = json_blobs::mine(&document);
    ExtractionResult {
        blocks: description_blocks(&document, &json),
        images: image_candidates(&document, &base, &json),
    }
}

fn description_blocks(document: &Html, json: &JsonFindings) -> Vec<String> {
    let mut raw_blocks = Vec::new();
    for selector in DESCRIPTION_SELS.iter() {
        for element in document.select(selector) {
            if element_text(element).chars().count() > BLOCK_MIN_CHARS {
                raw_blocks.push(element.html());
            }
        }
    }
    if raw_blocks.is_empty()
        && let Some(largest) = largest_block(document)
    {
        raw_blocks.push(largest.html());
    }
    for description in &json.descriptions {
        if description.trim().chars().count() > JSON_DESCRIPTION_MIN_CHARS {
            raw_blocks.push(format!("<p>{}</p>", escape_text(description.trim())));
        }
    }
    dedup_blocks(raw_blocks, MAX_BLOCKS)
}

fn largest_block(document: &Html) -> Option<ElementRef<'_>> {
    document
        .select(&LARGEST_BLOCK_SEL)
        .map(|element| (element_text(element).chars().count(), element))
        .filter(|(len, _)| *len > 0)
        .fold(None, |best: Option<(usize, ElementRef<'_>)>, candidate| match best {
            Some(current) if current.0 >= candidate.0 => Some(current),
            _ => Some(candidate),
        })
        .map(|(_, element)| element)
}

/// Keeps the first block for each normalized text, up to `cap`.
pub fn dedup_blocks(blocks: Vec<String>, cap: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    blocks
        .into_iter()
        .filter(|block| {
            let key = normalized_key(block);
            !key.is_empty() && seen.insert(key)
        })
        .take(cap)
        .collect()
}

fn image_candidates(document: &Html, base: &str, json: &JsonFindings) -> Vec<String> {
    let mut raw = Vec::new();
    let galleries: Vec<ElementRef<'_>> = document.select(&GALLERY_SEL).collect();
    if galleries.is_empty() {
        for node in document.select(&IMAGE_NODE_SEL) {
            read_image_attrs(node, &mut raw);
        }
    } else {
        for gallery in galleries {
            for node in gallery.select(&IMAGE_NODE_SEL) {
                read_image_attrs(node, &mut raw);
            }
        }
    }
    raw.extend(
        document
            .select(&OG_IMAGE_SEL)
            .filter_map(|el| el.value().attr("content"))
            .map(str::to_string),
    );
    raw.extend(
        document
            .select(&PRELOAD_SEL)
            .filter_map(|el| el.value().attr("href"))
            .map(str::to_string),
    );
    raw.extend(json.images.iter().cloned());

    let mut seen = HashSet::new();
    raw.iter()
        .filter_map(|candidate| absolutize(base, candidate))
        .filter(|url| IMAGE_EXT_RE.is_match(url))
        .filter(|url| seen.insert(url.clone()))
        .take(MAX_IMAGE_CANDIDATES)
        .collect()
}

fn read_image_attrs(node: ElementRef<'_>, out: &mut Vec<String>) {
    let element = node.value();
    for attr in ["srcset", "data-srcset"] {
        if let Some(srcset) = element.attr(attr) {
            out.extend(
                srcset
                    .split(',')
                    .filter_map(|entry| entry.split_whitespace().next())
                    .map(str::to_string),
            );
        }
    }
    for attr in DIRECT_ATTRS {
        if let Some(value) = element.attr(attr) {
            out.push(value.to_string());
        }
    }
    if let Some(style) = element.attr("style") {
        out.extend(BG_URL_RE.captures_iter(style).map(|caps| caps[1].to_string()));
    }
}

pub fn escape_text(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
