//! Handle-based storefront product feeds (`/products/{handle}.json` and `.js`).

pub mod models;

use crate::config::StorefrontConfig;
use crate::extract::dom::{absolutize, filename_of};
use crate::http::content_type;
use crate::normalize::{contains_term, variant_synonyms, variant_tokens};
use models::{RichEnvelope, RichProduct, SimpleProduct, StructuredProduct};
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;

pub use models::FeedMode;

pub const MAX_VARIANT_IMAGES: usize = 12;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("url has no product handle")]
    NoHandle,
    #[error("request failed: {0}")]
    Request(String),
    #[error("HTTP {0}")]
    Status(u16),
    #[error("unexpected content type `{0}`")]
    ContentType(String),
    #[error("malformed feed body: {0}")]
    Body(String),
}

/// Path segment following `products`, without any feed extension.
pub fn product_handle(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let mut segments = parsed.path_segments()?;
    segments.by_ref().find(|segment| *segment == "products")?;
    let handle = segments.next()?;
    let handle = handle
        .strip_suffix(".json")
        .or_else(|| handle.strip_suffix(".js"))
        .unwrap_or(handle);
    (!handle.is_empty()).then(|| handle.to_string())
}

/// Everything before `/products/`, e.g. `https://hortitec.es/en`.
pub fn shop_base(url: &str) -> Option<String> {
    let idx = url.find("/products/")?;
    Some(url[..idx].trim_end_matches('/').to_string())
}

/// Feed lookups to try for a storefront URL: preferred locale, storefront root, the URL
/// itself, then the fallback mirror. URLs outside the storefront only yield themselves.
pub fn locale_candidates(url: &str, storefront: &StorefrontConfig) -> Vec<String> {
    let Some(handle) = product_handle(url).filter(|_| storefront.owns(url)) else {
        return vec![url.to_string()];
    };
    let mut candidates = vec![
        format!("{}/products/{handle}", storefront.preferred_base.trim_end_matches('/')),
        format!("{}/products/{handle}", storefront.root.trim_end_matches('/')),
        url.to_string(),
    ];
    if let Some(mirror) = storefront.fallback_mirror() {
        candidates.push(format!("{}/products/{handle}", mirror.trim_end_matches('/')));
    }
    let mut unique = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        if !unique.contains(&candidate) {
            unique.push(candidate);
        }
    }
    unique
}

/// Tries the rich `.json` feed, then the simple `.js` feed. `None` when neither works.
pub async fn fetch_product(
    client: &Client,
    page_url: &str,
    timeout: Duration,
) -> Option<StructuredProduct> {
    match fetch_rich(client, page_url, timeout).await {
        Ok(product) => return Some(StructuredProduct::Json(product)),
        Err(err) => {
            debug!(target = "autolist.feed", url = %page_url, error = %err, "json_feed_unavailable");
        }
    }
    match fetch_simple(client, page_url, timeout).await {
        Ok(product) => Some(StructuredProduct::Js(product)),
        Err(err) => {
            debug!(target = "autolist.feed", url = %page_url, error = %err, "js_feed_unavailable");
            None
        }
    }
}

fn feed_url(page_url: &str, extension: &str) -> Result<String, FeedError> {
    let handle = product_handle(page_url).ok_or(FeedError::NoHandle)?;
    let base = shop_base(page_url).ok_or(FeedError::NoHandle)?;
    Ok(format!("{base}/products/{handle}.{extension}"))
}

async fn fetch_body(
    client: &Client,
    url: &str,
    timeout: Duration,
    accepted: &[&str],
) -> Result<String, FeedError> {
    let response = client
        .get(url)
        .timeout(timeout)
        .send()
        .await
        .map_err(|err| FeedError::Request(err.to_string()))?;
    if !response.status().is_success() {
        return Err(FeedError::Status(response.status().as_u16()));
    }
    let kind = content_type(&response);
    if !accepted.iter().any(|prefix| kind.starts_with(prefix)) {
        return Err(FeedError::ContentType(kind));
    }
    response
        .text()
        .await
        .map_err(|err| FeedError::Request(err.to_string()))
}

async fn fetch_rich(
    client: &Client,
    page_url: &str,
    timeout: Duration,
) -> Result<RichProduct, FeedError> {
    let url = feed_url(page_url, "json")?;
    let body = fetch_body(client, &url, timeout, &["application/json"]).await?;
    let envelope: RichEnvelope =
        serde_json::from_str(&body).map_err(|err| FeedError::Body(err.to_string()))?;
    Ok(envelope.product)
}

async fn fetch_simple(
    client: &Client,
    page_url: &str,
    timeout: Duration,
) -> Result<SimpleProduct, FeedError> {
    let url = feed_url(page_url, "js")?;
    let body = fetch_body(
        client,
        &url,
        timeout,
        &["application/javascript", "text/javascript", "application/json"],
    )
    .await?;
    serde_json::from_str(&body).map_err(|err| FeedError::Body(err.to_string()))
}

/// Feed images relevant to `variant`. Simple records return every image, unscored.
pub fn feed_images(product: &StructuredProduct, variant: &str) -> Vec<String> {
    match product {
        StructuredProduct::Json(rich) => images_for_variant(rich, variant),
        StructuredProduct::Js(simple) => simple
            .images
            .iter()
            .filter_map(|src| normalize_src(src))
            .collect(),
    }
}

/// Images tagged with the first variant whose title carries any spelling of `variant`.
///
/// Falls back to ranking all images by variant tokens found in alt text or filename.
pub fn images_for_variant(product: &RichProduct, variant: &str) -> Vec<String> {
    let synonyms: Vec<String> = variant_synonyms(variant)
        .into_iter()
        .map(|synonym| synonym.to_lowercase())
        .collect();
    let matched = product.variants.iter().find(|candidate| {
        let title = candidate.title.to_lowercase();
        synonyms.iter().any(|synonym| contains_term(&title, synonym))
    });
    if let Some(matched) = matched {
        let tagged: Vec<String> = product
            .images
            .iter()
            .filter(|image| image.variant_ids.contains(&matched.id))
            .filter_map(|image| normalize_src(&image.src))
            .collect();
        if !tagged.is_empty() {
            return tagged;
        }
    }

    let tokens = variant_tokens(variant);
    let mut scored: Vec<(usize, String)> = product
        .images
        .iter()
        .filter_map(|image| {
            let src = normalize_src(&image.src)?;
            let haystack = format!(
                "{} {}",
                image.alt.as_deref().unwrap_or("").to_lowercase(),
                filename_of(&src)
            );
            let score = tokens.iter().filter(|token| haystack.contains(token.as_str())).count();
            Some((score, src))
        })
        .collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0));
    scored
        .into_iter()
        .take(MAX_VARIANT_IMAGES)
        .map(|(_, src)| src)
        .collect()
}

fn normalize_src(src: &str) -> Option<String> {
    absolutize("https://cdn.shopify.com", src)
}
