use crate::normalize::slugify;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::skip_serializing_none;

pub const DEFAULT_CATEGORY_ID: &str = "3187";
pub const DEFAULT_CONDITION_ID: &str = "1000";
pub const DEFAULT_VAT_PERCENT: f64 = 19.0;
pub const TITLE_MAX_CHARS: usize = 80;

/// One product row: the immutable input of a single pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ItemRow {
    pub brand: String,
    #[serde(alias = "product_name")]
    pub name: String,
    pub variant: String,
    pub quantity: u32,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default)]
    pub source_url: Option<String>,
    #[serde(default)]
    pub category_id: Option<String>,
    #[serde(default)]
    pub condition_id: Option<String>,
    #[serde(default)]
    pub vat_percent: Option<f64>,
}

impl ItemRow {
    pub fn new(brand: &str, name: &str, variant: &str, quantity: u32) -> Self {
        Self {
            brand: brand.to_string(),
            name: name.to_string(),
            variant: variant.to_string(),
            quantity,
            price: None,
            sku: None,
            source_url: None,
            category_id: None,
            condition_id: None,
            vat_percent: None,
        }
    }

    pub fn validate(&self) -> Result<(), &'static str> {
        if self.brand.trim().is_empty() {
            return Err("brand is required");
        }
        if self.name.trim().is_empty() {
            return Err("name is required");
        }
        if let Some(price) = self.price
            && (!price.is_finite() || price < 0.0)
        {
            return Err("price must be a non-negative number");
        }
        Ok(())
    }

    /// Explicit SKU, or `slug(brand)-slug(name)-slug(variant)`.
    pub fn derived_sku(&self) -> String {
        if let Some(sku) = self.sku.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            return sku.to_string();
        }
        [&self.brand, &self.name, &self.variant]
            .iter()
            .map(|part| slugify(part))
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("-")
    }

    pub fn display_title(&self) -> String {
        listing_title(&[self.brand.as_str(), self.name.as_str(), self.variant.as_str()])
    }

    /// Title shared by every variant of a bundled listing.
    pub fn group_title(&self) -> String {
        listing_title(&[self.brand.as_str(), self.name.as_str()])
    }

    pub fn explicit_source(&self) -> Option<&str> {
        self.source_url
            .as_deref()
            .map(str::trim)
            .filter(|url| url.starts_with("http://") || url.starts_with("https://"))
    }

    pub fn category_or_default(&self) -> String {
        non_empty(self.category_id.as_deref()).unwrap_or(DEFAULT_CATEGORY_ID).to_string()
    }

    pub fn condition_or_default(&self) -> String {
        non_empty(self.condition_id.as_deref()).unwrap_or(DEFAULT_CONDITION_ID).to_string()
    }

    pub fn vat_or_default(&self) -> f64 {
        self.vat_percent.unwrap_or(DEFAULT_VAT_PERCENT)
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

/// Non-empty parts joined by single spaces, then the shop suffix, cut to 80 characters.
fn listing_title(parts: &[&str]) -> String {
    let head = parts
        .iter()
        .map(|part| part.trim())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    let title = format!("{head} | Dünger • Neu");
    title.chars().take(TITLE_MAX_CHARS).collect::<String>().trim_end().to_string()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PriceMode {
    #[default]
    Input,
    Avg10,
}

impl PriceMode {
    pub fn from_str(input: &str) -> Option<Self> {
        match input.trim().to_lowercase().as_str() {
            "input" => Some(PriceMode::Input),
            "avg10" => Some(PriceMode::Avg10),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VariationMode {
    #[default]
    Split,
    Bundle,
}

/// Per-run switches. Resolved from config defaults plus request overrides, then passed by value.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunOptions {
    pub dry_run: bool,
    pub render: bool,
    pub translate: bool,
    pub variant_image_filter: bool,
    pub price_mode: PriceMode,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            dry_run: true,
            render: true,
            translate: true,
            variant_image_filter: true,
            price_mode: PriceMode::Input,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunOptionsOverride {
    #[serde(default)]
    pub dry_run: Option<bool>,
    #[serde(default)]
    pub render: Option<bool>,
    #[serde(default)]
    pub translate: Option<bool>,
    #[serde(default)]
    pub variant_image_filter: Option<bool>,
    #[serde(default)]
    pub price_mode: Option<PriceMode>,
}

impl RunOptionsOverride {
    pub fn apply(&self, defaults: RunOptions) -> RunOptions {
        RunOptions {
            dry_run: self.dry_run.unwrap_or(defaults.dry_run),
            render: self.render.unwrap_or(defaults.render),
            translate: self.translate.unwrap_or(defaults.translate),
            variant_image_filter: self
                .variant_image_filter
                .unwrap_or(defaults.variant_image_filter),
            price_mode: self.price_mode.unwrap_or(defaults.price_mode),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListingRequest {
    #[serde(flatten)]
    pub row: ItemRow,
    #[serde(default)]
    pub options: RunOptionsOverride,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    NoSourceUrl,
    DryOk,
    ListedOk,
    ListedFail,
    ListedGroup,
}

/// The marketplace-facing listing, built once per row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ListingPayload {
    #[serde(rename = "Title")]
    pub title: String,
    #[serde(rename = "DescriptionHTML")]
    pub description_html: String,
    #[serde(rename = "CategoryID")]
    pub category_id: String,
    #[serde(rename = "Price")]
    pub price: f64,
    #[serde(rename = "Currency")]
    pub currency: String,
    #[serde(rename = "Quantity")]
    pub quantity: u32,
    #[serde(rename = "ConditionID")]
    pub condition_id: String,
    #[serde(rename = "SKU")]
    pub sku: String,
    #[serde(rename = "VATPercent")]
    pub vat_percent: f64,
    #[serde(rename = "PictureURLs")]
    pub picture_urls: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub enum SourceUsed {
    #[default]
    #[serde(rename = "page")]
    Page,
    #[serde(rename = "feed:json")]
    FeedJson,
    #[serde(rename = "feed:js")]
    FeedJs,
}

/// Which tier supplied the description that ended up in the payload.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DescriptionSource {
    #[default]
    None,
    Feed,
    Page,
    Render,
    Backfill,
    Curated,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Diagnostics {
    #[serde(rename = "DescLen")]
    pub desc_len: usize,
    #[serde(rename = "Pics")]
    pub pics: usize,
    #[serde(rename = "JSUsed")]
    pub js_used: bool,
    #[serde(rename = "BackfillFrom")]
    pub backfill_from: Option<String>,
    #[serde(rename = "SourceUsed")]
    pub source_used: SourceUsed,
    #[serde(rename = "PreferredEN")]
    pub preferred_locale: bool,
    #[serde(rename = "DescriptionSource")]
    pub description_source: DescriptionSource,
    #[serde(rename = "Translated")]
    pub translated: bool,
    #[serde(rename = "ResolvedBy")]
    pub resolved_by: Option<String>,
}

/// Result envelope for a single row.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
pub struct ListingResult {
    #[serde(rename = "Status")]
    pub status: Status,
    #[serde(rename = "SKU")]
    pub sku: String,
    #[serde(rename = "Preview")]
    pub preview: Option<ListingPayload>,
    #[serde(rename = "SourceURL")]
    pub source_url: Option<String>,
    #[serde(rename = "When")]
    pub when: DateTime<Utc>,
    #[serde(rename = "Message")]
    pub message: Option<String>,
    #[serde(flatten)]
    pub diagnostics: Diagnostics,
    #[serde(rename = "Stages")]
    pub stages: Vec<StageReport>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct VariationEntry {
    #[serde(rename = "SKU")]
    pub sku: String,
    #[serde(rename = "Value")]
    pub value: String,
    #[serde(rename = "Quantity")]
    pub quantity: u32,
    #[serde(rename = "Price")]
    pub price: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct VariantPictures {
    #[serde(rename = "SKU")]
    pub sku: String,
    #[serde(rename = "Pics")]
    pub pics: usize,
}

/// Result envelope for a bundled group of variant rows.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
pub struct GroupResult {
    #[serde(rename = "Status")]
    pub status: Status,
    #[serde(rename = "Group")]
    pub group: String,
    #[serde(rename = "SourceURL")]
    pub source_url: Option<String>,
    #[serde(rename = "When")]
    pub when: DateTime<Utc>,
    #[serde(rename = "Message")]
    pub message: Option<String>,
    #[serde(rename = "PreviewBase")]
    pub preview_base: Option<ListingPayload>,
    /// Name of the item specific the variations differ in, e.g. `Größe`.
    #[serde(rename = "VariationSpecific")]
    pub variation_specific: String,
    #[serde(rename = "Variations")]
    pub variations: Vec<VariationEntry>,
    #[serde(rename = "VariantPictures")]
    pub variant_pictures: Vec<VariantPictures>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum BatchRecord {
    Listing(Box<ListingResult>),
    Group(Box<GroupResult>),
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct StageReport {
    pub name: String,
    pub elapsed_ms: u128,
    pub timestamp: DateTime<Utc>,
    pub output: Value,
}

impl StageReport {
    pub fn new(name: &str, elapsed_ms: u128, output: Value) -> Self {
        Self {
            name: name.to_string(),
            elapsed_ms,
            timestamp: Utc::now(),
            output,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}
