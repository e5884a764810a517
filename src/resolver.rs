//! Finds a product page for a brand/name/variant row.

use crate::config::PipelineConfig;
use crate::extract::dom::absolutize;
use crate::feed::product_handle;
use crate::http::{fetch_html, probe_html};
use crate::models::ItemRow;
use crate::normalize::{litre_repr, parse_size_ml, slugify, split_tokens};
use once_cell::sync::Lazy;
use reqwest::Client;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

static LINK_SEL: Lazy<Selector> = Lazy::new(|| Selector::parse("a[href]").expect("link selector"));

const MANUFACTURER_SEARCH_PATHS: &[&str] = &["/?s=", "/search?q=", "/products?search="];
const PRODUCT_PATH_MARKERS: &[&str] = &["/product", "/products", "/produkt", "/producto", "/shop", "/store"];

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionTier {
    Explicit,
    SlugGuess,
    SearchSuggest,
    SearchPage,
    SecondaryLocale,
    ManufacturerHint,
    ManufacturerSearch,
}

impl ResolutionTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionTier::Explicit => "explicit",
            ResolutionTier::SlugGuess => "slug_guess",
            ResolutionTier::SearchSuggest => "search_suggest",
            ResolutionTier::SearchPage => "search_page",
            ResolutionTier::SecondaryLocale => "secondary_locale",
            ResolutionTier::ManufacturerHint => "manufacturer_hint",
            ResolutionTier::ManufacturerSearch => "manufacturer_search",
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Resolution {
    pub url: String,
    pub tier: ResolutionTier,
}

#[derive(Debug, Default, Deserialize)]
struct SuggestResponse {
    #[serde(default)]
    resources: SuggestResources,
}

#[derive(Debug, Default, Deserialize)]
struct SuggestResources {
    #[serde(default)]
    results: SuggestResults,
}

#[derive(Debug, Default, Deserialize)]
struct SuggestResults {
    #[serde(default)]
    products: Vec<SuggestProduct>,
}

#[derive(Debug, Deserialize)]
struct SuggestProduct {
    #[serde(default)]
    title: String,
    handle: String,
}

pub struct Resolver<'a> {
    client: &'a Client,
    config: &'a PipelineConfig,
}

impl<'a> Resolver<'a> {
    pub fn new(client: &'a Client, config: &'a PipelineConfig) -> Self {
        Self { client, config }
    }

    /// Walks the discovery tiers in order; `None` when all of them come up empty.
    pub async fn resolve(&self, row: &ItemRow) -> Option<Resolution> {
        if let Some(url) = row.explicit_source() {
            return Some(found(url.to_string(), ResolutionTier::Explicit));
        }
        let storefront = &self.config.storefront;

        let guesses = slug_guesses(row, true);
        if let Some(url) = self.first_reachable(&storefront.preferred_base, &guesses).await {
            return Some(found(url, ResolutionTier::SlugGuess));
        }
        if let Some(url) = self.search_suggest(row).await {
            return Some(found(url, ResolutionTier::SearchSuggest));
        }
        if let Some(url) = self.search_page(row).await {
            return Some(found(url, ResolutionTier::SearchPage));
        }

        let short_guesses = slug_guesses(row, false);
        for base in &storefront.secondary_bases {
            if let Some(url) = self.first_reachable(base, &short_guesses).await {
                let url = self.remap_to_preferred(&url).await.unwrap_or(url);
                return Some(found(url, ResolutionTier::SecondaryLocale));
            }
        }

        for hint in self.config.catalog.hints_for(&row.brand, &row.name) {
            if probe_html(self.client, hint, self.config.http.probe_timeout).await {
                return Some(found(hint.clone(), ResolutionTier::ManufacturerHint));
            }
        }

        if let Some(url) = self.manufacturer_search(row).await {
            return Some(found(url, ResolutionTier::ManufacturerSearch));
        }

        debug!(
            target = "autolist.resolver",
            brand = %row.brand,
            name = %row.name,
            variant = %row.variant,
            "no_source_found"
        );
        None
    }

    async fn first_reachable(&self, base: &str, slugs: &[String]) -> Option<String> {
        let base = base.trim_end_matches('/');
        for slug in slugs {
            let url = format!("{base}/products/{slug}");
            if probe_html(self.client, &url, self.config.http.probe_timeout).await {
                return Some(url);
            }
        }
        None
    }

    async fn search_suggest(&self, row: &ItemRow) -> Option<String> {
        let storefront = &self.config.storefront;
        let endpoint = format!("{}/search/suggest.json", storefront.root.trim_end_matches('/'));
        let query = format!("{} {} {}", row.brand, row.name, row.variant);
        let response = self
            .client
            .get(&endpoint)
            .query(&[
                ("q", query.trim()),
                ("resources[type]", "product"),
                ("resources[limit]", "10"),
                ("resources[options][fields]", "title,product_type,variants.title,tag"),
            ])
            .timeout(self.config.http.search_timeout)
            .send()
            .await
            .ok()?;
        if !response.status().is_success() {
            return None;
        }
        let body: SuggestResponse = response.json().await.ok()?;

        let tokens = split_tokens(&format!("{} {}", row.brand, row.name));
        let best = body
            .resources
            .results
            .products
            .iter()
            .map(|product| {
                let title = product.title.to_lowercase();
                let score = tokens.iter().filter(|token| title.contains(token.as_str())).count();
                (score, product)
            })
            .filter(|(score, _)| *score > 0)
            .fold(None, |best: Option<(usize, &SuggestProduct)>, candidate| match best {
                Some(current) if current.0 >= candidate.0 => Some(current),
                _ => Some(candidate),
            })?
            .1;

        let handle = best.handle.trim();
        if handle.is_empty() {
            return None;
        }
        for base in [&storefront.preferred_base, &storefront.root] {
            let url = format!("{}/products/{handle}", base.trim_end_matches('/'));
            if probe_html(self.client, &url, self.config.http.probe_timeout).await {
                return Some(url);
            }
        }
        None
    }

    async fn search_page(&self, row: &ItemRow) -> Option<String> {
        let base = self.config.storefront.preferred_base.trim_end_matches('/');
        let query = format!("{} {} {}", row.brand, row.name, row.variant);
        let url = format!("{base}/search?q={}", urlencoding::encode(query.trim()));
        let html = fetch_html(self.client, &url, self.config.http.search_timeout)
            .await
            .ok()?;
        first_link(&html, base, |href| href.contains("/products/"))
    }

    async fn remap_to_preferred(&self, url: &str) -> Option<String> {
        let handle = product_handle(url)?;
        let preferred = format!(
            "{}/products/{handle}",
            self.config.storefront.preferred_base.trim_end_matches('/')
        );
        if preferred == url {
            return None;
        }
        probe_html(self.client, &preferred, self.config.http.probe_timeout)
            .await
            .then(|| {
                info!(target = "autolist.resolver", from = %url, to = %preferred, "remapped_to_preferred_locale");
                preferred
            })
    }

    async fn manufacturer_search(&self, row: &ItemRow) -> Option<String> {
        let queries = [
            format!("{} {} {}", row.brand, row.name, row.variant),
            format!("{} {}", row.brand, row.name),
            row.name.clone(),
        ];
        for base in self.config.catalog.search_bases_for(&row.brand) {
            let base = base.trim_end_matches('/');
            for query in &queries {
                for path in MANUFACTURER_SEARCH_PATHS {
                    let url = format!("{base}{path}{}", urlencoding::encode(query.trim()));
                    let Ok(html) =
                        fetch_html(self.client, &url, self.config.http.search_timeout).await
                    else {
                        continue;
                    };
                    if let Some(link) = first_link(&html, base, looks_like_product_path) {
                        return Some(link);
                    }
                }
            }
        }
        None
    }
}

fn found(url: String, tier: ResolutionTier) -> Resolution {
    crate::metrics::tier_used(tier.as_str());
    info!(target = "autolist.resolver", tier = tier.as_str(), url = %url, "source_resolved");
    Resolution { url, tier }
}

/// Slug candidates, most specific first. `with_sizes` adds ml and litre spellings of the pack size.
pub fn slug_guesses(row: &ItemRow, with_sizes: bool) -> Vec<String> {
    let mut phrases = vec![
        format!("{} {} {}", row.brand, row.name, row.variant),
        format!("{} {}", row.brand, row.name),
        row.name.clone(),
    ];
    if with_sizes && let Some(ml) = parse_size_ml(&row.variant) {
        phrases.push(format!("{} {} {ml} ml", row.brand, row.name));
        phrases.push(format!("{} {} {} l", row.brand, row.name, litre_repr(ml)));
    }
    let mut slugs: Vec<String> = Vec::new();
    for slug in phrases.iter().map(|phrase| slugify(phrase)) {
        if !slug.is_empty() && !slugs.contains(&slug) {
            slugs.push(slug);
        }
    }
    slugs
}

fn looks_like_product_path(href: &str) -> bool {
    let lowered = href.to_lowercase();
    PRODUCT_PATH_MARKERS.iter().any(|marker| lowered.contains(marker))
}

fn first_link(html: &str, base: &str, accept: impl Fn(&str) -> bool) -> Option<String> {
    let document = Html::parse_document(html);
    document
        .select(&LINK_SEL)
        .filter_map(|link| link.value().attr("href"))
        .filter(|href| accept(href))
        .find_map(|href| absolutize(base, href))
}
