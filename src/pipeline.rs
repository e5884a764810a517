use crate::config::PipelineConfig;
use crate::extract::ExtractionResult;
use crate::extract::dom::visible_len;
use crate::feed::FeedMode;
use crate::http::build_session;
use crate::marketplace::{StubUploader, build_payload, compute_price};
use crate::models::{
    DescriptionSource, Diagnostics, ItemRow, ListingPayload, ListingRequest, ListingResult,
    RunOptions, SourceUsed, StageReport, Status,
};
use crate::render::Renderer;
use crate::resolver::ResolutionTier;
use chrono::Utc;
use serde_json::{Value, json};
use std::{future::Future, sync::Arc, time::Instant};
use thiserror::Error;
use tracing::info;

/// Below this much visible description text the rendering fallback is worth its cost.
pub const RENDER_MIN_DESC_CHARS: usize = 220;
/// Below this much visible description text the manufacturer backfill runs.
pub const BACKFILL_MIN_DESC_CHARS: usize = 180;

#[derive(Clone)]
pub struct Pipeline {
    pub config: Arc<PipelineConfig>,
    renderer: Arc<Renderer>,
    uploader: StubUploader,
}

/// Orchestrator states, in the order a row moves through them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Resolving,
    FeedFetch,
    HtmlFetch,
    RenderFallback,
    ManufacturerBackfill,
    CuratedFallback,
    Assembling,
    Done,
    NoSource,
}

impl Stage {
    const FALLBACKS: [Stage; 4] = [
        Stage::HtmlFetch,
        Stage::RenderFallback,
        Stage::ManufacturerBackfill,
        Stage::CuratedFallback,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Resolving => "resolving",
            Stage::FeedFetch => "feed_fetch",
            Stage::HtmlFetch => "html_fetch",
            Stage::RenderFallback => "render_fallback",
            Stage::ManufacturerBackfill => "manufacturer_backfill",
            Stage::CuratedFallback => "curated_fallback",
            Stage::Assembling => "assembling",
            Stage::Done => "done",
            Stage::NoSource => "no_source",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Done | Stage::NoSource)
    }
}

/// Content and provenance accumulated while a row moves through the stages.
#[derive(Debug, Clone, Default)]
pub struct RowState {
    pub source_url: String,
    pub resolved_by: Option<ResolutionTier>,
    pub content: ExtractionResult,
    pub description_source: DescriptionSource,
    pub source_used: SourceUsed,
    pub preferred_locale: bool,
    pub js_used: bool,
    pub backfill_from: Option<String>,
    /// Set once the HTML fetch has run, whatever it returned.
    pub page_fetched: bool,
}

impl RowState {
    /// The page only fills what the feed left empty.
    fn merge_page(&mut self, page: ExtractionResult) {
        if self.content.blocks.is_empty() && !page.blocks.is_empty() {
            self.content.blocks = page.blocks;
            self.description_source = DescriptionSource::Page;
        }
        if self.content.images.is_empty() {
            self.content.images = page.images;
        }
    }

    fn merge_rendered(&mut self, rendered: ExtractionResult) {
        if !rendered.blocks.is_empty() && rendered.desc_len() >= self.content.desc_len() {
            self.content.blocks = rendered.blocks;
            self.description_source = DescriptionSource::Render;
        }
        if rendered.images.len() > self.content.images.len() {
            self.content.images = rendered.images;
        }
    }

    fn merge_backfill(&mut self, url: String, backfill: ExtractionResult) {
        let mut used = false;
        if backfill.desc_len() > self.content.desc_len() {
            self.content.blocks = backfill.blocks;
            self.description_source = DescriptionSource::Backfill;
            used = true;
        }
        if self.content.images.is_empty() && !backfill.images.is_empty() {
            self.content.images = backfill.images;
            used = true;
        }
        if used {
            self.backfill_from = Some(url);
        }
    }

    fn diagnostics(&self) -> Diagnostics {
        Diagnostics {
            desc_len: self.content.desc_len(),
            pics: self.content.images.len(),
            js_used: self.js_used,
            backfill_from: self.backfill_from.clone(),
            source_used: self.source_used,
            preferred_locale: self.preferred_locale,
            description_source: self.description_source,
            translated: false,
            resolved_by: self.resolved_by.map(|tier| tier.as_str().to_string()),
        }
    }
}

pub fn needs_html_fetch(content: &ExtractionResult) -> bool {
    content.blocks.is_empty() || content.images.is_empty()
}

/// Rendering only follows a page fetch that left the row short.
pub fn needs_render(content: &ExtractionResult, options: &RunOptions, page_fetched: bool) -> bool {
    page_fetched
        && options.render
        && (content.images.is_empty() || content.desc_len() < RENDER_MIN_DESC_CHARS)
}

/// A confirmed preferred-locale source is never backfilled.
pub fn needs_backfill(content: &ExtractionResult, preferred_locale: bool) -> bool {
    !preferred_locale
        && (content.images.is_empty() || content.desc_len() < BACKFILL_MIN_DESC_CHARS)
}

pub fn needs_curated(content: &ExtractionResult) -> bool {
    content.desc_len() == 0
}

struct Assembled {
    status: Status,
    preview: Option<ListingPayload>,
    message: Option<String>,
    diagnostics: Diagnostics,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        let renderer = Renderer::from_config(&config.render);
        Self::with_renderer(config, renderer)
    }

    pub fn with_renderer(config: PipelineConfig, renderer: Renderer) -> Self {
        Self {
            config: Arc::new(config),
            renderer: Arc::new(renderer),
            uploader: StubUploader,
        }
    }

    pub fn uploader(&self) -> &StubUploader {
        &self.uploader
    }

    pub fn renderer(&self) -> &Renderer {
        &self.renderer
    }

    pub fn run_defaults(&self) -> RunOptions {
        self.config.run_defaults
    }

    pub async fn run(&self, request: ListingRequest) -> Result<ListingResult, PipelineError> {
        let options = request.options.apply(self.config.run_defaults);
        self.run_row(&request.row, options).await
    }

    /// Runs one row through the stage machine. Only invalid input is an `Err`;
    /// every network or parse failure degrades into a later fallback.
    pub async fn run_row(
        &self,
        row: &ItemRow,
        options: RunOptions,
    ) -> Result<ListingResult, PipelineError> {
        row.validate()
            .map_err(|message| PipelineError::invalid_input("validate", message))?;

        let client = build_session(&self.config.http);
        let mut reports = Vec::new();
        let mut state = RowState::default();
        let mut assembled = None;
        let mut stage = Stage::Resolving;

        while !stage.is_terminal() {
            stage = match stage {
                Stage::Resolving => {
                    let resolution = self
                        .capture_stage(
                            stage.name(),
                            &mut reports,
                            stages::resolve(&client, &self.config, row),
                        )
                        .await;
                    match resolution {
                        Some(found) => {
                            state.source_url = found.url;
                            state.resolved_by = Some(found.tier);
                            Stage::FeedFetch
                        }
                        None => Stage::NoSource,
                    }
                }
                Stage::FeedFetch => {
                    let hit = self
                        .capture_stage(
                            stage.name(),
                            &mut reports,
                            stages::fetch_feed(&client, &self.config, &state.source_url, &row.variant),
                        )
                        .await;
                    if let Some(hit) = hit {
                        state.source_url = hit.url;
                        state.source_used = match hit.mode {
                            FeedMode::Json => SourceUsed::FeedJson,
                            FeedMode::Js => SourceUsed::FeedJs,
                        };
                        if !hit.content.blocks.is_empty() {
                            state.description_source = DescriptionSource::Feed;
                        }
                        state.content = hit.content;
                    }
                    state.preferred_locale =
                        self.config.storefront.is_preferred_locale(&state.source_url);
                    self.advance(stage, &state, &options)
                }
                Stage::HtmlFetch => {
                    let page = self
                        .capture_stage(
                            stage.name(),
                            &mut reports,
                            stages::fetch_page(&client, &self.config, &state.source_url),
                        )
                        .await;
                    state.page_fetched = true;
                    if let Some(page) = page {
                        state.merge_page(page);
                    }
                    self.advance(stage, &state, &options)
                }
                Stage::RenderFallback => {
                    let rendered = self
                        .capture_stage(
                            stage.name(),
                            &mut reports,
                            stages::render_page(&client, &self.renderer, &state.source_url),
                        )
                        .await;
                    if let Some(rendered) = rendered {
                        state.js_used = true;
                        state.merge_rendered(rendered);
                    }
                    self.advance(stage, &state, &options)
                }
                Stage::ManufacturerBackfill => {
                    let backfill = self
                        .capture_stage(
                            stage.name(),
                            &mut reports,
                            stages::backfill(&client, &self.config, row),
                        )
                        .await;
                    if let Some((url, content)) = backfill {
                        state.merge_backfill(url, content);
                    }
                    self.advance(stage, &state, &options)
                }
                Stage::CuratedFallback => {
                    let curated = self
                        .capture_stage(stage.name(), &mut reports, async {
                            stages::curated(&self.config, row)
                        })
                        .await;
                    if let Some(html) = curated {
                        state.content.blocks = vec![html];
                        state.description_source = DescriptionSource::Curated;
                    }
                    Stage::Assembling
                }
                Stage::Assembling => {
                    assembled = Some(
                        self.capture_stage(
                            stage.name(),
                            &mut reports,
                            self.assemble(&client, row, &options, &state),
                        )
                        .await,
                    );
                    Stage::Done
                }
                Stage::Done | Stage::NoSource => stage,
            };
        }

        let result = match assembled {
            Some(done) => ListingResult {
                status: done.status,
                sku: row.derived_sku(),
                preview: done.preview,
                source_url: Some(state.source_url),
                when: Utc::now(),
                message: done.message,
                diagnostics: done.diagnostics,
                stages: reports,
            },
            None => ListingResult {
                status: Status::NoSourceUrl,
                sku: row.derived_sku(),
                preview: None,
                source_url: None,
                when: Utc::now(),
                message: None,
                diagnostics: Diagnostics::default(),
                stages: reports,
            },
        };

        info!(
            target: "autolist.session",
            sku = %result.sku,
            status = ?result.status,
            source = result.source_url.as_deref().unwrap_or("-"),
            "{} {} {} processed",
            row.brand,
            row.name,
            row.variant
        );
        Ok(result)
    }

    /// Next fallback stage whose entry condition holds, or assembly.
    fn advance(&self, from: Stage, state: &RowState, options: &RunOptions) -> Stage {
        Stage::FALLBACKS
            .into_iter()
            .filter(|candidate| *candidate > from)
            .find(|candidate| match candidate {
                Stage::HtmlFetch => needs_html_fetch(&state.content),
                Stage::RenderFallback => {
                    needs_render(&state.content, options, state.page_fetched)
                }
                Stage::ManufacturerBackfill => {
                    needs_backfill(&state.content, state.preferred_locale)
                }
                Stage::CuratedFallback => needs_curated(&state.content),
                _ => false,
            })
            .unwrap_or(Stage::Assembling)
    }

    async fn assemble(
        &self,
        client: &reqwest::Client,
        row: &ItemRow,
        options: &RunOptions,
        state: &RowState,
    ) -> StageOutcome<Assembled> {
        let mut diagnostics = state.diagnostics();
        if state.content.is_empty() {
            return StageOutcome::new(
                Assembled {
                    status: Status::ListedFail,
                    preview: None,
                    message: Some("no_content".into()),
                    diagnostics,
                },
                json!({"status": "LISTED_FAIL", "reason": "no_content"}),
            );
        }

        let (description_html, translated) = stages::compose_description(
            client,
            &self.config,
            row,
            &state.content.blocks,
            options.translate,
        )
        .await;
        let pictures = stages::select_images(
            &self.config,
            row,
            &state.source_url,
            &state.content.images,
            options.variant_image_filter,
        );
        let price = compute_price(row, options.price_mode);
        let payload = build_payload(
            row,
            description_html,
            &pictures,
            price,
            &self.config.default_currency,
        );
        diagnostics.desc_len = visible_len(&payload.description_html);
        diagnostics.pics = payload.picture_urls.len();
        diagnostics.translated = translated;

        let (status, message) = if options.dry_run {
            (Status::DryOk, None)
        } else {
            let outcome = self.uploader.upload(&payload).await;
            let status = if outcome.ok {
                Status::ListedOk
            } else {
                Status::ListedFail
            };
            (status, Some(outcome.message))
        };

        let output = json!({
            "status": status,
            "desc_len": diagnostics.desc_len,
            "pictures": diagnostics.pics,
            "translated": translated,
            "price": price,
        });
        StageOutcome::new(
            Assembled {
                status,
                preview: Some(payload),
                message,
                diagnostics,
            },
            output,
        )
    }

    async fn capture_stage<T, Fut>(
        &self,
        name: &'static str,
        stages: &mut Vec<StageReport>,
        fut: Fut,
    ) -> T
    where
        Fut: Future<Output = StageOutcome<T>>,
    {
        let started = Instant::now();
        let outcome = fut.await;
        let elapsed_ms = started.elapsed().as_millis();
        crate::metrics::stage_elapsed(name, elapsed_ms);
        stages.push(StageReport::new(name, elapsed_ms, outcome.output));
        outcome.value
    }
}

#[derive(Debug, Error)]
#[error("stage `{stage}` failed: {message}")]
pub struct PipelineError {
    stage: &'static str,
    message: String,
    kind: PipelineErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineErrorKind {
    InvalidInput,
    Internal,
}

impl PipelineError {
    pub fn invalid_input(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind: PipelineErrorKind::InvalidInput,
        }
    }

    pub fn internal(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind: PipelineErrorKind::Internal,
        }
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }

    pub fn kind(&self) -> PipelineErrorKind {
        self.kind
    }

    pub fn detail(&self) -> &str {
        &self.message
    }
}

#[derive(Debug)]
pub struct StageOutcome<T> {
    pub value: T,
    pub output: Value,
}

impl<T> StageOutcome<T> {
    fn new(value: T, output: Value) -> Self {
        Self { value, output }
    }
}

pub mod stages {
    use super::StageOutcome;
    use crate::config::PipelineConfig;
    use crate::describe;
    use crate::extract::dom::visible_len;
    use crate::extract::{ExtractionResult, parse_html};
    use crate::feed::{self, FeedMode};
    use crate::http::fetch_html;
    use crate::models::ItemRow;
    use crate::render::Renderer;
    use crate::resolver::{Resolution, Resolver};
    use crate::scoring::{ImageQuery, select_pictures};
    use crate::translate::Translator;
    use reqwest::Client;
    use serde_json::json;
    use tracing::{debug, warn};

    /// Feed descriptions must carry more visible text than this to count.
    pub const FEED_MIN_DESC_CHARS: usize = 80;

    #[derive(Debug, Clone)]
    pub struct FeedHit {
        pub url: String,
        pub mode: FeedMode,
        pub content: ExtractionResult,
    }

    pub async fn resolve(
        client: &Client,
        config: &PipelineConfig,
        row: &ItemRow,
    ) -> StageOutcome<Option<Resolution>> {
        let resolution = Resolver::new(client, config).resolve(row).await;
        let output = match &resolution {
            Some(found) => json!({"url": found.url, "tier": found.tier}),
            None => json!({"url": null}),
        };
        StageOutcome::new(resolution, output)
    }

    /// First locale candidate that serves a feed wins and becomes the row's source URL.
    pub async fn fetch_feed(
        client: &Client,
        config: &PipelineConfig,
        url: &str,
        variant: &str,
    ) -> StageOutcome<Option<FeedHit>> {
        let candidates = feed::locale_candidates(url, &config.storefront);
        for candidate in &candidates {
            let Some(product) =
                feed::fetch_product(client, candidate, config.http.feed_timeout).await
            else {
                continue;
            };
            let mut content = ExtractionResult {
                blocks: Vec::new(),
                images: feed::feed_images(&product, variant),
            };
            if let Some(description) = product.description_html()
                && visible_len(description) > FEED_MIN_DESC_CHARS
            {
                content.blocks.push(description.to_string());
            }
            let output = json!({
                "url": candidate,
                "mode": product.mode(),
                "title": product.title(),
                "images": content.images.len(),
                "desc_len": content.desc_len(),
                "candidates": candidates.len(),
            });
            return StageOutcome::new(
                Some(FeedHit {
                    url: candidate.clone(),
                    mode: product.mode(),
                    content,
                }),
                output,
            );
        }
        StageOutcome::new(None, json!({"mode": null, "candidates": candidates.len()}))
    }

    pub async fn fetch_page(
        client: &Client,
        config: &PipelineConfig,
        url: &str,
    ) -> StageOutcome<Option<ExtractionResult>> {
        match fetch_html(client, url, config.http.page_timeout).await {
            Ok(html) => {
                let content = parse_html(&html, url);
                let output = json!({
                    "blocks": content.blocks.len(),
                    "images": content.images.len(),
                    "desc_len": content.desc_len(),
                });
                StageOutcome::new(Some(content), output)
            }
            Err(err) => {
                warn!(target = "autolist.extract", url = %url, error = %err, "page_fetch_failed");
                StageOutcome::new(None, json!({"error": err.to_string()}))
            }
        }
    }

    pub async fn render_page(
        client: &Client,
        renderer: &Renderer,
        url: &str,
    ) -> StageOutcome<Option<ExtractionResult>> {
        if !renderer.is_available() {
            debug!(target = "autolist.render", url = %url, "render_skipped");
            return StageOutcome::new(None, json!({"skipped": "no_backend"}));
        }
        match renderer.render(client, url).await {
            Ok(html) => {
                let content = parse_html(&html, url);
                let output = json!({
                    "backend": renderer.name(),
                    "blocks": content.blocks.len(),
                    "images": content.images.len(),
                });
                StageOutcome::new(Some(content), output)
            }
            Err(err) => {
                warn!(target = "autolist.render", url = %url, error = %err, "render_failed");
                StageOutcome::new(None, json!({"backend": renderer.name(), "error": err.to_string()}))
            }
        }
    }

    /// First configured manufacturer page that yields any content.
    pub async fn backfill(
        client: &Client,
        config: &PipelineConfig,
        row: &ItemRow,
    ) -> StageOutcome<Option<(String, ExtractionResult)>> {
        let urls = config.catalog.backfill_for(&row.brand, &row.name);
        for url in urls {
            match fetch_html(client, url, config.http.page_timeout).await {
                Ok(html) => {
                    let content = parse_html(&html, url);
                    if content.is_empty() {
                        continue;
                    }
                    let output = json!({
                        "url": url,
                        "blocks": content.blocks.len(),
                        "images": content.images.len(),
                    });
                    return StageOutcome::new(Some((url.clone(), content)), output);
                }
                Err(err) => {
                    warn!(target = "autolist.extract", url = %url, error = %err, "backfill_fetch_failed");
                }
            }
        }
        StageOutcome::new(None, json!({"url": null, "candidates": urls.len()}))
    }

    pub fn curated(config: &PipelineConfig, row: &ItemRow) -> StageOutcome<Option<String>> {
        let html = config
            .catalog
            .curated_for(&row.brand, &row.name)
            .map(str::to_string);
        let output = json!({"used": html.is_some()});
        StageOutcome::new(html, output)
    }

    /// Ranked, sanitized description. The body is translated to German when asked;
    /// the generated heading is kept as is.
    pub async fn compose_description(
        client: &Client,
        config: &PipelineConfig,
        row: &ItemRow,
        blocks: &[String],
        translate: bool,
    ) -> (String, bool) {
        let composed = describe::compose(blocks, &row.brand, &row.name, &row.variant);
        if !translate || composed.body.is_empty() {
            return (composed.to_html(), false);
        }
        match Translator::new(client, &config.translate)
            .ensure_german(&composed.body)
            .await
        {
            Some(translation) => (composed.with_body(translation.html).to_html(), true),
            None => (composed.to_html(), false),
        }
    }

    pub fn select_images(
        config: &PipelineConfig,
        row: &ItemRow,
        source_url: &str,
        images: &[String],
        variant_filter: bool,
    ) -> Vec<String> {
        let query = ImageQuery::new(
            &row.brand,
            &row.name,
            &row.variant,
            source_url,
            &config.catalog.pack_sizes_ml,
        );
        select_pictures(images, &query, &row.variant, variant_filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        HttpConfig, ManufacturerCatalog, RenderConfig, StorefrontConfig, TranslateConfig,
    };
    use crate::models::PriceMode;
    use httpmock::prelude::*;
    use std::time::Duration;

    fn offline_options() -> RunOptions {
        RunOptions {
            dry_run: true,
            render: false,
            translate: false,
            variant_image_filter: true,
            price_mode: PriceMode::Input,
        }
    }

    fn offline_config(server: &MockServer) -> PipelineConfig {
        let quick = Duration::from_secs(2);
        PipelineConfig {
            http: HttpConfig {
                probe_timeout: quick,
                search_timeout: quick,
                feed_timeout: quick,
                page_timeout: quick,
                ..HttpConfig::default()
            },
            run_defaults: offline_options(),
            default_currency: "EUR".into(),
            storefront: StorefrontConfig::single(&server.base_url()),
            catalog: ManufacturerCatalog::empty(),
            render: RenderConfig::default(),
            translate: TranslateConfig {
                deepl_key: None,
                deepl_endpoint: server.url("/v2/translate"),
                google_endpoint: server.url("/translate_a/single"),
                timeout: quick,
            },
        }
    }

    fn hesi_boost(source: Option<String>) -> ItemRow {
        ItemRow {
            source_url: source,
            ..ItemRow::new("Hesi", "Boost", "500 ml", 2)
        }
    }

    fn stage_names(result: &ListingResult) -> Vec<&str> {
        result.stages.iter().map(|stage| stage.name.as_str()).collect()
    }

    fn long_copy() -> String {
        "Hesi Boost ist ein Blühstimulator. Anwendung: 2 ml pro Liter Gießwasser. \
         Dosierung während der generativen Phase wöchentlich anpassen und Hinweise beachten. "
            .repeat(2)
    }

    fn content(desc_chars: usize, images: usize) -> ExtractionResult {
        ExtractionResult {
            blocks: if desc_chars == 0 {
                Vec::new()
            } else {
                vec![format!("<p>{}</p>", "x".repeat(desc_chars))]
            },
            images: (0..images).map(|i| format!("https://cdn.example/{i}.jpg")).collect(),
        }
    }

    #[test]
    fn entry_predicates() {
        let mut options = offline_options();
        assert!(needs_html_fetch(&content(300, 0)));
        assert!(needs_html_fetch(&content(0, 3)));
        assert!(!needs_html_fetch(&content(300, 3)));

        assert!(!needs_render(&content(100, 0), &options, true));
        options.render = true;
        assert!(needs_render(&content(219, 3), &options, true));
        assert!(needs_render(&content(400, 0), &options, true));
        assert!(!needs_render(&content(220, 3), &options, true));
        assert!(!needs_render(&content(219, 3), &options, false));

        assert!(needs_backfill(&content(179, 3), false));
        assert!(!needs_backfill(&content(179, 3), true));
        assert!(!needs_backfill(&content(180, 3), false));

        assert!(needs_curated(&content(0, 3)));
        assert!(!needs_curated(&content(1, 0)));
    }

    #[test]
    fn advance_skips_satisfied_stages() {
        let pipeline = Pipeline::new(PipelineConfig::default());
        let options = offline_options();
        let state = RowState {
            content: content(500, 4),
            ..RowState::default()
        };
        assert_eq!(pipeline.advance(Stage::FeedFetch, &state, &options), Stage::Assembling);
        let thin = RowState {
            content: content(100, 4),
            ..RowState::default()
        };
        assert_eq!(pipeline.advance(Stage::FeedFetch, &thin, &options), Stage::ManufacturerBackfill);
        assert_eq!(
            pipeline.advance(Stage::ManufacturerBackfill, &thin, &options),
            Stage::Assembling
        );
    }

    #[test]
    fn merge_rules() {
        let mut state = RowState {
            content: content(100, 2),
            ..RowState::default()
        };
        state.merge_rendered(content(100, 2));
        assert_eq!(state.description_source, DescriptionSource::Render);
        assert_eq!(state.content.images.len(), 2);
        state.merge_rendered(content(50, 5));
        assert_eq!(state.content.desc_len(), 100);
        assert_eq!(state.content.images.len(), 5);

        state.merge_backfill("https://maker.example/a".into(), content(100, 9));
        assert!(state.backfill_from.is_none(), "equal length and existing images: unused");
        state.merge_backfill("https://maker.example/b".into(), content(150, 0));
        assert_eq!(state.backfill_from.as_deref(), Some("https://maker.example/b"));
        assert_eq!(state.description_source, DescriptionSource::Backfill);
        assert_eq!(state.content.images.len(), 5);
    }

    #[tokio::test]
    async fn no_source_when_every_tier_fails() {
        let server = MockServer::start_async().await;
        let mut config = offline_config(&server);
        config
            .catalog
            .curated
            .insert(crate::config::product_key("hesi", "boost"), "<p>kurz</p>".into());
        let pipeline = Pipeline::new(config);
        let result = pipeline
            .run_row(&hesi_boost(None), offline_options())
            .await
            .expect("never an error");
        assert_eq!(result.status, Status::NoSourceUrl);
        assert!(result.preview.is_none());
        assert_eq!(stage_names(&result), vec!["resolving"]);
    }

    #[tokio::test]
    async fn curated_copy_rescues_an_unreachable_source() {
        let server = MockServer::start_async().await;
        let mut config = offline_config(&server);
        config.catalog = ManufacturerCatalog {
            hints: Default::default(),
            backfill: Default::default(),
            ..ManufacturerCatalog::default()
        };
        let pipeline = Pipeline::new(config);
        let row = hesi_boost(Some(server.url("/products/hesi-boost")));
        let result = pipeline.run_row(&row, offline_options()).await.expect("run");

        assert_eq!(result.status, Status::DryOk);
        assert_eq!(result.diagnostics.description_source, DescriptionSource::Curated);
        let preview = result.preview.clone().expect("preview");
        assert!(preview.description_html.starts_with("<h2>Hesi Boost – 500 ml</h2>"));
        assert!(preview.description_html.contains("Blühstimulator"));
        assert!(preview.picture_urls.is_empty());
        assert_eq!(
            stage_names(&result),
            vec!["resolving", "feed_fetch", "html_fetch", "manufacturer_backfill", "curated_fallback", "assembling"]
        );
    }

    #[tokio::test]
    async fn nothing_found_halts_the_row() {
        let server = MockServer::start_async().await;
        let pipeline = Pipeline::new(offline_config(&server));
        let row = hesi_boost(Some(server.url("/products/hesi-boost")));
        let result = pipeline.run_row(&row, offline_options()).await.expect("run");
        assert_eq!(result.status, Status::ListedFail);
        assert_eq!(result.message.as_deref(), Some("no_content"));
        assert!(result.preview.is_none());
    }

    #[tokio::test]
    async fn rich_feed_supplies_variant_images() {
        let server = MockServer::start_async().await;
        let feed = json!({"product": {
            "title": "Hesi Boost",
            "body_html": format!("<p>{}</p>", long_copy()),
            "variants": [{"id": 1, "title": "1 L"}, {"id": 2, "title": "500 ml"}],
            "images": [
                {"src": "//cdn.shopify.com/files/hesi-boost-1l.jpg", "variant_ids": [1]},
                {"src": "//cdn.shopify.com/files/hesi-boost-500ml.jpg", "variant_ids": [2]}
            ]
        }});
        server
            .mock_async(|when, then| {
                when.method(GET).path("/products/hesi-boost.json");
                then.status(200)
                    .header("content-type", "application/json")
                    .body(feed.to_string());
            })
            .await;
        let pipeline = Pipeline::new(offline_config(&server));
        let row = hesi_boost(Some(server.url("/products/hesi-boost")));
        let result = pipeline.run_row(&row, offline_options()).await.expect("run");

        assert_eq!(result.status, Status::DryOk);
        assert_eq!(result.diagnostics.source_used, SourceUsed::FeedJson);
        assert_eq!(result.diagnostics.description_source, DescriptionSource::Feed);
        let preview = result.preview.clone().expect("preview");
        assert_eq!(
            preview.picture_urls,
            vec!["https://cdn.shopify.com/files/hesi-boost-500ml.jpg"]
        );
        assert_eq!(preview.sku, "hesi-boost-500-ml");
        assert_eq!(stage_names(&result), vec!["resolving", "feed_fetch", "assembling"]);
    }

    #[tokio::test]
    async fn sufficient_page_never_renders() {
        let server = MockServer::start_async().await;
        let page = format!(
            r#"<html><body><div class="product__description"><p>{}</p></div>
               <div class="product-gallery"><img src="/files/hesi-boost-500ml.jpg"></div></body></html>"#,
            long_copy()
        );
        server
            .mock_async(|when, then| {
                when.method(GET).path("/products/hesi-boost");
                then.status(200).header("content-type", "text/html").body(page);
            })
            .await;
        let render = server
            .mock_async(|when, then| {
                when.method(POST).path("/render");
                then.status(200).body("<html></html>");
            })
            .await;
        let renderer = Renderer::Remote {
            endpoint: server.url("/render"),
            timeout: Duration::from_secs(2),
        };
        let pipeline = Pipeline::with_renderer(offline_config(&server), renderer);
        let options = RunOptions {
            render: true,
            ..offline_options()
        };
        let row = hesi_boost(Some(server.url("/products/hesi-boost")));
        let result = pipeline.run_row(&row, options).await.expect("run");

        render.assert_hits_async(0).await;
        assert_eq!(result.diagnostics.description_source, DescriptionSource::Page);
        assert!(!result.diagnostics.js_used);
        assert_eq!(stage_names(&result), vec!["resolving", "feed_fetch", "html_fetch", "assembling"]);
        assert_eq!(
            result.preview.expect("preview").picture_urls,
            vec![server.url("/files/hesi-boost-500ml.jpg")]
        );
    }

    #[tokio::test]
    async fn short_feed_with_images_does_not_render_without_a_page_fetch() {
        let server = MockServer::start_async().await;
        let short = "Hesi Boost ist ein Blühstimulator für die Blütephase. \
                     Anwendung: 2 ml pro Liter Gießwasser, einmal pro Woche zugeben.";
        let feed = json!({"product": {
            "title": "Hesi Boost",
            "body_html": format!("<p>{short}</p>"),
            "variants": [{"id": 2, "title": "500 ml"}],
            "images": [{"src": "//cdn.shopify.com/files/hesi-boost-500ml.jpg", "variant_ids": [2]}]
        }});
        server
            .mock_async(|when, then| {
                when.method(GET).path("/products/hesi-boost.json");
                then.status(200)
                    .header("content-type", "application/json")
                    .body(feed.to_string());
            })
            .await;
        let page = server
            .mock_async(|when, then| {
                when.method(GET).path("/products/hesi-boost");
                then.status(200).header("content-type", "text/html").body("<p>page</p>");
            })
            .await;
        let render = server
            .mock_async(|when, then| {
                when.method(POST).path("/render");
                then.status(200).body("<html></html>");
            })
            .await;
        let renderer = Renderer::Remote {
            endpoint: server.url("/render"),
            timeout: Duration::from_secs(2),
        };
        let pipeline = Pipeline::with_renderer(offline_config(&server), renderer);
        let options = RunOptions {
            render: true,
            ..offline_options()
        };
        let row = hesi_boost(Some(server.url("/products/hesi-boost")));
        let result = pipeline.run_row(&row, options).await.expect("run");

        page.assert_hits_async(0).await;
        render.assert_hits_async(0).await;
        assert!(!result.diagnostics.js_used);
        assert_eq!(result.diagnostics.description_source, DescriptionSource::Feed);
        assert_eq!(
            stage_names(&result),
            vec!["resolving", "feed_fetch", "manufacturer_backfill", "assembling"]
        );
    }

    #[tokio::test]
    async fn imageless_page_falls_back_to_rendering() {
        let server = MockServer::start_async().await;
        let copy = long_copy();
        server
            .mock_async(|when, then| {
                when.method(GET).path("/products/hesi-boost");
                then.status(200)
                    .header("content-type", "text/html")
                    .body(format!(r#"<div class="rte"><p>{copy}</p></div>"#));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/render");
                then.status(200).body(format!(
                    r#"<div class="rte"><p>{copy}</p></div><div class="gallery"><img src="https://cdn.shopify.com/hesi-boost-500ml.jpg"></div>"#
                ));
            })
            .await;
        let renderer = Renderer::Remote {
            endpoint: server.url("/render"),
            timeout: Duration::from_secs(2),
        };
        let pipeline = Pipeline::with_renderer(offline_config(&server), renderer);
        let options = RunOptions {
            render: true,
            ..offline_options()
        };
        let row = hesi_boost(Some(server.url("/products/hesi-boost")));
        let result = pipeline.run_row(&row, options).await.expect("run");

        assert!(result.diagnostics.js_used);
        assert_eq!(result.diagnostics.pics, 1);
        assert!(stage_names(&result).contains(&"render_fallback"));
    }

    #[tokio::test]
    async fn preferred_locale_suppresses_backfill() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/en/products/hesi-boost");
                then.status(200)
                    .header("content-type", "text/html")
                    .body(r#"<div class="gallery"><img src="/files/hesi-boost.jpg"></div><p>Kurz.</p>"#);
            })
            .await;
        let maker = server
            .mock_async(|when, then| {
                when.method(GET).path("/maker/boost");
                then.status(200).header("content-type", "text/html").body(format!("<p>{}</p>", long_copy()));
            })
            .await;
        let mut config = offline_config(&server);
        config.storefront = StorefrontConfig {
            preferred_base: server.url("/en"),
            root: server.base_url(),
            secondary_bases: Vec::new(),
            host_marker: "127.0.0.1".into(),
        };
        config
            .catalog
            .backfill
            .insert(crate::config::product_key("hesi", "boost"), vec![server.url("/maker/boost")]);
        let pipeline = Pipeline::new(config);

        let preferred = hesi_boost(Some(server.url("/en/products/hesi-boost")));
        let result = pipeline.run_row(&preferred, offline_options()).await.expect("run");
        assert!(result.diagnostics.preferred_locale);
        assert!(!stage_names(&result).contains(&"manufacturer_backfill"));
        maker.assert_hits_async(0).await;

        let mirror = hesi_boost(Some(server.url("/products/hesi-boost")));
        let result = pipeline.run_row(&mirror, offline_options()).await.expect("run");
        assert!(!result.diagnostics.preferred_locale);
        assert_eq!(result.diagnostics.backfill_from, Some(server.url("/maker/boost")));
        assert_eq!(result.diagnostics.description_source, DescriptionSource::Backfill);
    }

    #[tokio::test]
    async fn translation_keeps_the_heading() {
        let server = MockServer::start_async().await;
        let english = "Hesi Boost is a flowering stimulator for the generative phase. It supports \
                       the formation of dense, aromatic flowers and ensures even ripening. Usage: \
                       add 2 ml per litre of water once a week during flowering.";
        server
            .mock_async(|when, then| {
                when.method(GET).path("/products/hesi-boost");
                then.status(200)
                    .header("content-type", "text/html")
                    .body(format!(
                        r#"<div class="rte"><p>{english}</p></div><div class="gallery"><img src="/hesi-boost.jpg"></div>"#
                    ));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/translate_a/single");
                then.status(200)
                    .header("content-type", "application/json")
                    .body(r#"[[["Hesi Boost ist ein Blühstimulator.","x",null]],null,"en"]"#);
            })
            .await;
        let pipeline = Pipeline::new(offline_config(&server));
        let options = RunOptions {
            translate: true,
            dry_run: false,
            ..offline_options()
        };
        let row = hesi_boost(Some(server.url("/products/hesi-boost")));
        let result = pipeline.run_row(&row, options).await.expect("run");

        assert_eq!(result.status, Status::ListedOk);
        assert_eq!(result.message.as_deref(), Some("OK (Stub)"));
        assert!(result.diagnostics.translated);
        assert_eq!(
            result.preview.expect("preview").description_html,
            "<h2>Hesi Boost – 500 ml</h2><p>Hesi Boost ist ein Blühstimulator.</p>"
        );
    }

    #[tokio::test]
    async fn blank_brand_is_invalid_input() {
        let pipeline = Pipeline::new(PipelineConfig::default());
        let row = ItemRow::new(" ", "Boost", "500 ml", 1);
        let err = pipeline.run_row(&row, offline_options()).await.expect_err("invalid");
        assert_eq!(err.kind(), PipelineErrorKind::InvalidInput);
        assert_eq!(err.stage(), "validate");
    }
}
