//! Image ranking: domain affinity, pack-size filename hints, token matches and penalties.

use crate::extract::dom::{filename_of, host_of};
use crate::normalize::{
    SizePatterns, contains_term, size_patterns, split_tokens, variant_synonyms, variant_tokens,
};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

pub const MAX_PICTURES: usize = 12;

const CDN_HOSTS: &[&str] = &["cdn.shopify.com"];
const NEGATIVE_FILENAME_WORDS: &[&str] = &[
    "root", "supervit", "hydro", "coco", "kokos", "bluh", "blüh", "complex", "complexe", "bloom",
    "starter", "kit", "test",
];

static HIRES_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|[_-])(?:1200|1600|1920|2048|2400)(?:x|[_.-])").expect("hires regex")
});

/// Everything image scoring needs to know about the row and its source page.
pub struct ImageQuery {
    brand_tokens: Vec<String>,
    name_tokens: Vec<String>,
    variant_tokens: Vec<String>,
    own_words: String,
    source_host: Option<String>,
    sizes: SizePatterns,
}

impl ImageQuery {
    pub fn new(brand: &str, name: &str, variant: &str, source_url: &str, pack_sizes_ml: &[u32]) -> Self {
        Self {
            brand_tokens: split_tokens(brand),
            name_tokens: split_tokens(name),
            variant_tokens: variant_tokens(variant),
            own_words: format!("{} {}", brand, name).to_lowercase(),
            source_host: host_of(source_url).map(|host| host.trim_start_matches("www.").to_string()),
            sizes: size_patterns(variant, pack_sizes_ml),
        }
    }

    pub fn score(&self, url: &str) -> i32 {
        let filename = filename_of(url);
        let mut score = 0;

        if let Some(host) = host_of(url) {
            if let Some(source) = &self.source_host
                && host.contains(source.as_str())
            {
                score += 6;
            }
            if CDN_HOSTS.contains(&host.as_str()) {
                score += 2;
            }
        }

        if self.sizes.matches_target(&filename) {
            score += 20;
        }
        if self.sizes.matches_other(&filename) {
            score -= 15;
        }

        score += 5 * count_present(&self.brand_tokens, &filename);
        score += 8 * count_present(&self.name_tokens, &filename);
        score += 4 * count_present(&self.variant_tokens, &filename);

        if HIRES_RE.is_match(&filename) {
            score += 2;
        }
        if NEGATIVE_FILENAME_WORDS
            .iter()
            .any(|word| !self.own_words.contains(word) && filename.contains(word))
        {
            score -= 10;
        }
        score
    }

    /// Score descending (URL ascending on ties), one URL per filename, at most 12.
    pub fn rank(&self, urls: &[String]) -> Vec<String> {
        let mut scored: Vec<(i32, &String)> = urls.iter().map(|url| (self.score(url), url)).collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(b.1)));
        let mut seen = HashSet::new();
        scored
            .into_iter()
            .filter(|(_, url)| seen.insert(filename_of(url)))
            .take(MAX_PICTURES)
            .map(|(_, url)| url.clone())
            .collect()
    }
}

fn count_present(tokens: &[String], filename: &str) -> i32 {
    tokens.iter().filter(|token| filename.contains(token.as_str())).count() as i32
}

/// URLs whose filename carries a spelling of the variant label.
pub fn variant_only(urls: &[String], variant: &str) -> Vec<String> {
    let needles: Vec<String> = variant_synonyms(variant)
        .into_iter()
        .map(|synonym| synonym.to_lowercase().replace(' ', ""))
        .filter(|synonym| !synonym.is_empty())
        .collect();
    urls.iter()
        .filter(|url| {
            let filename = filename_of(url);
            needles.iter().any(|needle| contains_term(&filename, needle))
        })
        .cloned()
        .collect()
}

/// Ranked pictures, narrowed to the variant when requested and non-empty.
pub fn select_pictures(
    urls: &[String],
    query: &ImageQuery,
    variant: &str,
    variant_filter: bool,
) -> Vec<String> {
    let ranked = query.rank(urls);
    if !variant_filter {
        return ranked;
    }
    let filtered = variant_only(&ranked, variant);
    if filtered.is_empty() { ranked } else { filtered }
}
