use crate::models::{PriceMode, RunOptions};
use crate::normalize::DEFAULT_PACK_SIZES_ML;
use serde::Deserialize;
use std::{collections::HashMap, env, path::Path, time::Duration};
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

const DEFAULT_MANUFACTURERS_PATH: &str = "config/manufacturers.yaml";

const HESI_BOOST_FALLBACK: &str = "<p><strong>Hesi Boost</strong> ist ein Blühstimulator für die generative Phase. Er unterstützt die \
Bildung dichter, aromatischer Blüten und sorgt für eine gleichmäßigere Reife. Geeignet für Erde, \
Coco und Hydro.</p><ul><li>Fördert Blütenbildung &amp; Reife</li><li>Für Indoor &amp; Outdoor</li>\
<li>Kombinierbar mit Hesi-Grunddüngern</li></ul>\
<p><em>Hinweis:</em> Bitte Dosier- und Anwendungshinweise des Herstellers beachten.</p>";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read {path}: {message}")]
    Io { path: String, message: String },
    #[error("unable to parse {path}: {message}")]
    Parse { path: String, message: String },
}

/// Everything a pipeline run needs, resolved once at startup and passed down explicitly.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub http: HttpConfig,
    pub run_defaults: RunOptions,
    pub default_currency: String,
    pub storefront: StorefrontConfig,
    pub catalog: ManufacturerCatalog,
    pub render: RenderConfig,
    pub translate: TranslateConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            http: HttpConfig::default(),
            run_defaults: RunOptions::default(),
            default_currency: "EUR".into(),
            storefront: StorefrontConfig::default(),
            catalog: ManufacturerCatalog::default(),
            render: RenderConfig::default(),
            translate: TranslateConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        let run_defaults = RunOptions {
            dry_run: parse_env_bool("DRY_RUN_DEFAULT", true),
            render: parse_env_bool("RENDER_DEFAULT", true),
            translate: parse_env_bool("AUTO_TRANSLATE_TO_DE", true),
            variant_image_filter: parse_env_bool("VARIANT_IMAGE_FILTER_DEFAULT", true),
            price_mode: env::var("PRICE_MODE_DEFAULT")
                .ok()
                .and_then(|value| PriceMode::from_str(&value))
                .unwrap_or_default(),
        };

        let manufacturers_path = env::var("MANUFACTURERS_CONFIG")
            .unwrap_or_else(|_| DEFAULT_MANUFACTURERS_PATH.to_string());
        let catalog = match ManufacturerCatalog::load(Path::new(&manufacturers_path)) {
            Ok(Some(catalog)) => {
                info!(
                    target = "autolist.config",
                    path = %manufacturers_path,
                    brands = catalog.search_bases.len(),
                    "manufacturer catalog loaded"
                );
                catalog
            }
            Ok(None) => {
                debug!(target = "autolist.config", path = %manufacturers_path, "manufacturer catalog absent; using defaults");
                ManufacturerCatalog::default()
            }
            Err(err) => {
                warn!(target = "autolist.config", error = %err, "manufacturer_catalog_invalid");
                ManufacturerCatalog::default()
            }
        };

        Self {
            http: HttpConfig::from_env(),
            run_defaults,
            default_currency: env::var("DEFAULT_CURRENCY")
                .ok()
                .map(|value| value.trim().to_uppercase())
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| "EUR".into()),
            storefront: StorefrontConfig::default(),
            catalog,
            render: RenderConfig::from_env(),
            translate: TranslateConfig::from_env(),
        }
    }
}

/// Process-level settings: the pipeline config plus what the HTTP service itself needs.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub pipeline: PipelineConfig,
    pub port: u16,
    pub request_max_bytes: usize,
    pub queue_capacity: usize,
    pub metrics_key: Option<String>,
    pub session_log: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            pipeline: PipelineConfig::from_env(),
            port: env::var("PORT")
                .ok()
                .and_then(|value| value.parse().ok())
                .unwrap_or(8000),
            request_max_bytes: env_usize("REQUEST_MAX_BYTES").unwrap_or(1024 * 1024),
            queue_capacity: env_usize("QUEUE_CAPACITY").unwrap_or(64),
            metrics_key: env::var("METRICS_KEY").ok().filter(|key| !key.is_empty()),
            session_log: session_log_path(),
        }
    }
}

/// `SESSION_LOG`, or `logs/session.log`. Needed before tracing starts, so it stands alone.
pub fn session_log_path() -> String {
    env::var("SESSION_LOG")
        .ok()
        .filter(|path| !path.trim().is_empty())
        .unwrap_or_else(|| "logs/session.log".into())
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub user_agent: String,
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub probe_timeout: Duration,
    pub search_timeout: Duration,
    pub feed_timeout: Duration,
    pub page_timeout: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout_secs: 30,
            connect_timeout_secs: 5,
            probe_timeout: Duration::from_secs(8),
            search_timeout: Duration::from_secs(10),
            feed_timeout: Duration::from_secs(12),
            page_timeout: Duration::from_secs(20),
        }
    }
}

impl HttpConfig {
    fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            user_agent: env::var("USER_AGENT")
                .ok()
                .filter(|value| !value.trim().is_empty())
                .unwrap_or(defaults.user_agent),
            timeout_secs: env_u64("HTTP_TIMEOUT_SECS").unwrap_or(defaults.timeout_secs),
            connect_timeout_secs: env_u64("HTTP_CONNECT_TIMEOUT_SECS")
                .unwrap_or(defaults.connect_timeout_secs),
            ..defaults
        }
    }
}

/// The storefront family that slug guessing, search and locale remapping target.
#[derive(Debug, Clone)]
pub struct StorefrontConfig {
    /// Preferred-locale base, e.g. `https://hortitec.es/en`.
    pub preferred_base: String,
    /// Storefront root hosting the search-suggestion endpoint.
    pub root: String,
    /// Other locale mirrors, tried after the preferred locale fails.
    pub secondary_bases: Vec<String>,
    /// Substring identifying any host of this storefront family.
    pub host_marker: String,
}

impl Default for StorefrontConfig {
    fn default() -> Self {
        Self {
            preferred_base: "https://hortitec.es/en".into(),
            root: "https://hortitec.es".into(),
            secondary_bases: vec![
                "https://www.hortitec.de".into(),
                "https://hortitec.es".into(),
                "https://www.hortitec.es".into(),
            ],
            host_marker: "hortitec.".into(),
        }
    }
}

impl StorefrontConfig {
    /// Storefront rooted at a single base, with no locale prefix. Handy for mirrors and tests.
    pub fn single(base: &str) -> Self {
        let base = base.trim_end_matches('/').to_string();
        let host_marker = Url::parse(&base)
            .ok()
            .and_then(|url| url.host_str().map(str::to_string))
            .unwrap_or_else(|| base.clone());
        Self {
            preferred_base: base.clone(),
            root: base.clone(),
            secondary_bases: Vec::new(),
            host_marker,
        }
    }

    pub fn owns(&self, url: &str) -> bool {
        Url::parse(url)
            .ok()
            .and_then(|parsed| parsed.host_str().map(str::to_lowercase))
            .is_some_and(|host| host.contains(&self.host_marker.to_lowercase()))
    }

    /// True when `url` lives on the preferred-locale mirror (same host and locale prefix).
    pub fn is_preferred_locale(&self, url: &str) -> bool {
        let (Ok(candidate), Ok(preferred)) = (Url::parse(url), Url::parse(&self.preferred_base))
        else {
            return false;
        };
        let prefix = preferred.path().trim_end_matches('/');
        if prefix.is_empty() {
            return false;
        }
        candidate.host_str() == preferred.host_str()
            && candidate.path().starts_with(&format!("{prefix}/"))
    }

    pub fn fallback_mirror(&self) -> Option<&str> {
        self.secondary_bases.first().map(String::as_str)
    }
}

#[derive(Debug, Clone)]
pub struct RenderConfig {
    pub endpoint: Option<String>,
    pub headless: bool,
    pub timeout: Duration,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            headless: false,
            timeout: Duration::from_millis(26_000),
        }
    }
}

impl RenderConfig {
    fn from_env() -> Self {
        Self {
            endpoint: env::var("RENDER_ENDPOINT")
                .ok()
                .map(|value| value.trim().trim_end_matches('/').to_string())
                .filter(|value| !value.is_empty()),
            headless: parse_env_bool("RENDER_HEADLESS", false),
            timeout: Duration::from_millis(env_u64("RENDER_TIMEOUT_MS").unwrap_or(26_000)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TranslateConfig {
    pub deepl_key: Option<String>,
    pub deepl_endpoint: String,
    pub google_endpoint: String,
    pub timeout: Duration,
}

impl Default for TranslateConfig {
    fn default() -> Self {
        Self {
            deepl_key: None,
            deepl_endpoint: "https://api-free.deepl.com/v2/translate".into(),
            google_endpoint: "https://translate.googleapis.com/translate_a/single".into(),
            timeout: Duration::from_secs(20),
        }
    }
}

impl TranslateConfig {
    fn from_env() -> Self {
        let defaults = Self::default();
        let deepl_key = env::var("DEEPL_API_KEY")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        let deepl_endpoint = env::var("DEEPL_ENDPOINT").ok().unwrap_or_else(|| {
            match deepl_key.as_deref() {
                Some(key) if !key.ends_with(":fx") => "https://api.deepl.com/v2/translate".into(),
                _ => defaults.deepl_endpoint.clone(),
            }
        });
        Self {
            deepl_key,
            deepl_endpoint,
            google_endpoint: env::var("GOOGLE_TRANSLATE_ENDPOINT")
                .unwrap_or(defaults.google_endpoint),
            timeout: defaults.timeout,
        }
    }
}

/// Lowercased `(brand, name)` lookup key.
pub fn product_key(brand: &str, name: &str) -> (String, String) {
    (brand.trim().to_lowercase(), name.trim().to_lowercase())
}

/// Per-manufacturer knowledge: search bases, curated hint pages and static fallback copy.
#[derive(Debug, Clone)]
pub struct ManufacturerCatalog {
    pub search_bases: HashMap<String, Vec<String>>,
    pub hints: HashMap<(String, String), Vec<String>>,
    pub backfill: HashMap<(String, String), Vec<String>>,
    pub curated: HashMap<(String, String), String>,
    pub pack_sizes_ml: Vec<u32>,
}

impl Default for ManufacturerCatalog {
    fn default() -> Self {
        let hesi_pages = vec![
            "https://hesi.nl/de/Boost".to_string(),
            "https://hesi.nl/Boost".to_string(),
        ];
        let mut hints = HashMap::new();
        hints.insert(product_key("hesi", "boost"), hesi_pages.clone());
        let mut backfill = HashMap::new();
        backfill.insert(product_key("hesi", "boost"), hesi_pages);
        let mut curated = HashMap::new();
        curated.insert(
            product_key("hesi", "boost"),
            HESI_BOOST_FALLBACK.to_string(),
        );
        Self {
            search_bases: HashMap::new(),
            hints,
            backfill,
            curated,
            pack_sizes_ml: DEFAULT_PACK_SIZES_ML.to_vec(),
        }
    }
}

impl ManufacturerCatalog {
    /// No hints, no backfill pages, no curated copy.
    pub fn empty() -> Self {
        Self {
            search_bases: HashMap::new(),
            hints: HashMap::new(),
            backfill: HashMap::new(),
            curated: HashMap::new(),
            pack_sizes_ml: DEFAULT_PACK_SIZES_ML.to_vec(),
        }
    }

    /// Reads a catalog file. `Ok(None)` when the file does not exist.
    pub fn load(path: &Path) -> Result<Option<Self>, ConfigError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(ConfigError::Io {
                    path: path.display().to_string(),
                    message: err.to_string(),
                });
            }
        };
        Self::from_yaml(&raw)
            .map(Some)
            .map_err(|message| ConfigError::Parse {
                path: path.display().to_string(),
                message,
            })
    }

    /// Parses either the extended catalog shape or the legacy `{brand: [base_url]}` map.
    pub fn from_yaml(raw: &str) -> Result<Self, String> {
        let file: CatalogFile = serde_yaml::from_str(raw).map_err(|err| err.to_string())?;
        let mut catalog = Self::default();
        match file {
            CatalogFile::Extended(extended) => {
                for (brand, bases) in extended.search_bases {
                    catalog
                        .search_bases
                        .insert(brand.trim().to_lowercase(), bases);
                }
                for entry in extended.hints {
                    catalog
                        .hints
                        .insert(product_key(&entry.brand, &entry.name), entry.urls);
                }
                for entry in extended.backfill {
                    catalog
                        .backfill
                        .insert(product_key(&entry.brand, &entry.name), entry.urls);
                }
                for entry in extended.curated {
                    catalog
                        .curated
                        .insert(product_key(&entry.brand, &entry.name), entry.html);
                }
                if !extended.pack_sizes_ml.is_empty() {
                    catalog.pack_sizes_ml = extended.pack_sizes_ml;
                }
            }
            CatalogFile::Legacy(bases) => {
                for (brand, urls) in bases {
                    catalog.search_bases.insert(brand.trim().to_lowercase(), urls);
                }
            }
        }
        Ok(catalog)
    }

    pub fn search_bases_for(&self, brand: &str) -> &[String] {
        self.search_bases
            .get(&brand.trim().to_lowercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn hints_for(&self, brand: &str, name: &str) -> &[String] {
        self.hints
            .get(&product_key(brand, name))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn backfill_for(&self, brand: &str, name: &str) -> &[String] {
        self.backfill
            .get(&product_key(brand, name))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn curated_for(&self, brand: &str, name: &str) -> Option<&str> {
        self.curated
            .get(&product_key(brand, name))
            .map(String::as_str)
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CatalogFile {
    Extended(ExtendedCatalogFile),
    Legacy(HashMap<String, Vec<String>>),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ExtendedCatalogFile {
    #[serde(default)]
    search_bases: HashMap<String, Vec<String>>,
    #[serde(default)]
    hints: Vec<ProductUrls>,
    #[serde(default)]
    backfill: Vec<ProductUrls>,
    #[serde(default)]
    curated: Vec<CuratedCopy>,
    #[serde(default)]
    pack_sizes_ml: Vec<u32>,
}

#[derive(Debug, Deserialize)]
struct ProductUrls {
    brand: String,
    name: String,
    urls: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct CuratedCopy {
    brand: String,
    name: String,
    html: String,
}

pub fn parse_env_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(value) => matches!(
            value.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => default,
    }
}

pub fn env_u64(key: &str) -> Option<u64> {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|value| *value > 0)
}

pub fn env_usize(key: &str) -> Option<usize> {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<usize>().ok())
        .filter(|value| *value > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_manufacturer_map_is_accepted() {
        let raw = r#"{"Hesi": ["https://hesi.nl"], "biobizz": ["https://biobizz.com"]}"#;
        let catalog = ManufacturerCatalog::from_yaml(raw).expect("legacy json");
        assert_eq!(catalog.search_bases_for("hesi"), ["https://hesi.nl"]);
        assert_eq!(catalog.search_bases_for(" BioBizz "), ["https://biobizz.com"]);
        assert!(catalog.curated_for("Hesi", "Boost").is_some());
    }

    #[test]
    fn extended_catalog_overrides_defaults() {
        let raw = r#"
search_bases:
  canna: ["https://canna.de"]
hints:
  - brand: Canna
    name: PK 13/14
    urls: ["https://canna.de/pk-13-14"]
curated:
  - brand: Hesi
    name: Boost
    html: "<p>kurz</p>"
pack_sizes_ml: [500, 1000]
"#;
        let catalog = ManufacturerCatalog::from_yaml(raw).expect("extended yaml");
        assert_eq!(catalog.hints_for("canna", "pk 13/14"), ["https://canna.de/pk-13-14"]);
        assert_eq!(catalog.curated_for("hesi", "boost"), Some("<p>kurz</p>"));
        assert_eq!(catalog.pack_sizes_ml, vec![500, 1000]);
        assert!(!catalog.backfill_for("hesi", "boost").is_empty());
    }

    #[test]
    fn preferred_locale_requires_host_and_prefix() {
        let storefront = StorefrontConfig::default();
        assert!(storefront.is_preferred_locale("https://hortitec.es/en/products/hesi-boost"));
        assert!(!storefront.is_preferred_locale("https://hortitec.es/products/hesi-boost"));
        assert!(!storefront.is_preferred_locale("https://www.hortitec.de/en/products/hesi-boost"));
        assert!(storefront.owns("https://www.hortitec.de/products/x"));
        assert!(!storefront.owns("https://hesi.nl/Boost"));
    }

    #[test]
    fn single_storefront_has_no_locale() {
        let storefront = StorefrontConfig::single("http://127.0.0.1:4000/");
        assert_eq!(storefront.preferred_base, "http://127.0.0.1:4000");
        assert!(storefront.owns("http://127.0.0.1:4000/products/x"));
        assert!(!storefront.is_preferred_locale("http://127.0.0.1:4000/products/x"));
    }
}
