use serde::{Deserialize, Serialize};

/// `{handle}.json` envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct RichEnvelope {
    pub product: RichProduct,
}

/// Feed record with explicit image-to-variant tagging.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RichProduct {
    pub title: String,
    #[serde(default)]
    pub body_html: Option<String>,
    #[serde(default)]
    pub variants: Vec<RichVariant>,
    #[serde(default)]
    pub images: Vec<RichImage>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RichVariant {
    pub id: u64,
    #[serde(default)]
    pub title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RichImage {
    pub src: String,
    #[serde(default)]
    pub alt: Option<String>,
    #[serde(default)]
    pub variant_ids: Vec<u64>,
}

/// `{handle}.js` record: flat image list, no variant linkage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimpleProduct {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub images: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FeedMode {
    Json,
    Js,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum StructuredProduct {
    Json(RichProduct),
    Js(SimpleProduct),
}

impl StructuredProduct {
    pub fn mode(&self) -> FeedMode {
        match self {
            StructuredProduct::Json(_) => FeedMode::Json,
            StructuredProduct::Js(_) => FeedMode::Js,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            StructuredProduct::Json(product) => &product.title,
            StructuredProduct::Js(product) => &product.title,
        }
    }

    pub fn description_html(&self) -> Option<&str> {
        match self {
            StructuredProduct::Json(product) => product.body_html.as_deref(),
            StructuredProduct::Js(product) => product.description.as_deref(),
        }
    }
}
