mod rank;
mod sanitize;

use crate::extract::{MAX_BLOCKS, dedup_blocks, escape_text};

pub use rank::{SIBLING_PRODUCT_KEYWORDS, score_block, select_blocks};
pub use sanitize::sanitize_html;

/// Generated heading plus the sanitized body selected from raw blocks.
#[derive(Debug, Clone, PartialEq)]
pub struct ComposedDescription {
    pub heading: String,
    pub body: String,
}

impl ComposedDescription {
    pub fn to_html(&self) -> String {
        if self.body.is_empty() {
            return String::new();
        }
        sanitize_html(&format!("{}{}", self.heading, self.body))
    }

    pub fn with_body(self, body: String) -> Self {
        Self {
            heading: self.heading,
            body: sanitize_html(&body),
        }
    }
}

/// `<h2>brand name – variant</h2>`, every part escaped.
pub fn heading(brand: &str, name: &str, variant: &str) -> String {
    format!(
        "<h2>{} {} – {}</h2>",
        escape_text(brand.trim()),
        escape_text(name.trim()),
        escape_text(variant.trim())
    )
}

/// Ranks, deduplicates and merges blocks. An empty input yields an empty body.
pub fn compose(blocks: &[String], brand: &str, name: &str, variant: &str) -> ComposedDescription {
    let unique = dedup_blocks(blocks.to_vec(), MAX_BLOCKS);
    let selected: Vec<String> = select_blocks(&unique, brand, name)
        .into_iter()
        .cloned()
        .collect();
    let body = dedup_blocks(selected, MAX_BLOCKS).join("\n");
    ComposedDescription {
        heading: heading(brand, name, variant),
        body: sanitize_html(&body),
    }
}
