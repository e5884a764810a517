mod batch;
mod config;
mod describe;
mod extract;
mod feed;
mod http;
mod idempotency;
mod jobs;
mod marketplace;
mod metrics;
mod models;
mod normalize;
mod pipeline;
mod render;
mod resolver;
mod scoring;
mod translate;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use batch::{BatchError, BatchOptions, DEFAULT_VARIATION_SPECIFIC};
use config::AppConfig;
use eyre::WrapErr;
use idempotency::IdempotencyCache;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use models::{ApiError, ItemRow, ListingRequest, ListingResult, PriceMode, VariationMode};
use pipeline::{Pipeline, PipelineError, PipelineErrorKind};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{fs::OpenOptions, net::SocketAddr, sync::Arc};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{Level, error, info};
use tracing_subscriber::{
    EnvFilter, Layer, filter::Targets, fmt, layer::SubscriberExt, util::SubscriberInitExt,
};

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(target = "autolist.api", "server crashed: {err:?}");
        std::process::exit(1);
    }
}

async fn run() -> eyre::Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing(&config::session_log_path())?;

    let config = AppConfig::from_env();
    let pipeline = Pipeline::new(config.pipeline.clone());
    info!(
        target = "autolist.api",
        renderer = pipeline.renderer().name(),
        dry_run_default = config.pipeline.run_defaults.dry_run,
        "pipeline configured"
    );
    let (queue, _worker) = jobs::JobQueue::spawn(pipeline.clone(), config.queue_capacity);
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .wrap_err("installing prometheus recorder")?;

    let state = AppState {
        pipeline,
        queue,
        openapi: Arc::new(load_openapi()),
        idempotency: IdempotencyCache::default(),
        prometheus_handle,
        metrics_key: config.metrics_key.clone(),
    };
    let app = build_router(state, config.request_max_bytes);

    let addr: SocketAddr = ([0, 0, 0, 0], config.port).into();
    info!(target = "autolist.api", "listening on {addr}");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .wrap_err_with(|| format!("binding {addr}"))?;
    axum::serve(listener, app.into_make_service())
        .await
        .wrap_err("serving http")?;
    Ok(())
}

#[derive(Clone)]
struct AppState {
    pipeline: Pipeline,
    queue: jobs::JobQueue,
    openapi: Arc<serde_json::Value>,
    idempotency: IdempotencyCache,
    prometheus_handle: PrometheusHandle,
    metrics_key: Option<String>,
}

fn build_router(state: AppState, body_limit: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_headers(Any)
        .allow_methods(Any)
        .allow_origin(Any);

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/openapi.json", get(openapi_json))
        .route("/docs", get(swagger_ui))
        .route("/listings", post(create_listing))
        .route("/listings/batch", post(create_batch))
        .route("/jobs/{id}", get(get_job_status).delete(cancel_job))
        .nest(
            "/stages",
            Router::new()
                .route("/resolve_source", post(stage_resolve_source))
                .route("/extract", post(stage_extract))
                .route("/score_images", post(stage_score_images))
                .route("/description", post(stage_description)),
        )
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(axum::extract::DefaultBodyLimit::max(body_limit))
}

fn load_openapi() -> serde_json::Value {
    serde_yaml::from_str(include_str!("../docs/openapi.yaml"))
        .unwrap_or_else(|_| json!({"openapi": "3.0.3"}))
}

/// Stdout logging plus the append-only session log, which only receives
/// `autolist.session` events.
fn init_tracing(session_log: &str) -> eyre::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));

    let path = std::path::Path::new(session_log);
    if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .wrap_err_with(|| format!("creating {}", parent.display()))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .wrap_err_with(|| format!("opening session log {session_log}"))?;
    let session = fmt::layer()
        .with_ansi(false)
        .with_target(false)
        .with_writer(std::sync::Mutex::new(file))
        .with_filter(Targets::new().with_target("autolist.session", Level::INFO));

    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_filter(filter))
        .with(session)
        .try_init();
    Ok(())
}

/// Health and readiness check.
///
/// - Method: `GET`
/// - Path: `/health`
///
/// Returns a small JSON payload with `status` and `service`.
async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "autolist-api-rs",
    }))
}

async fn openapi_json(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json((*state.openapi).clone())
}

async fn swagger_ui() -> Html<&'static str> {
    Html(
        r#"<!doctype html>
<html>
<head>
  <meta charset='utf-8'/>
  <title>Autolist API Docs</title>
  <link rel="stylesheet" href="https://unpkg.com/swagger-ui-dist@5/swagger-ui.css" />
</head>
<body>
  <div id="swagger-ui"></div>
  <script src="https://unpkg.com/swagger-ui-dist@5/swagger-ui-bundle.js"></script>
  <script>
    window.onload = () => {
      window.ui = SwaggerUIBundle({ url: '/openapi.json', dom_id: '#swagger-ui' });
    };
  </script>
</body>
</html>"#,
    )
}

async fn metrics_endpoint(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(secret) = &state.metrics_key {
        let presented = headers
            .get("X-Metrics-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != secret {
            return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
        }
    }
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.prometheus_handle.render(),
    )
        .into_response()
}

/// Run one product row through the listing pipeline.
///
/// - Method: `POST`
/// - Path: `/listings`
/// - Body: `ListingRequest` (row fields plus optional `options`)
/// - Response: `ListingResult` with diagnostics and the per-stage transcript
///
/// An `Idempotency-Key` header replays the stored result for a repeated key.
async fn create_listing(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<ListingRequest>,
) -> Result<Json<ListingResult>, AppError> {
    crate::metrics::inc_requests("/listings");
    info!(
        target = "autolist.api",
        brand = %payload.row.brand,
        name = %payload.row.name,
        variant = %payload.row.variant,
        "listing pipeline invoked",
    );

    let key = headers
        .get("Idempotency-Key")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    if let Some(key) = &key
        && let Some(existing) = state.idempotency.get(key).await
    {
        return Ok(Json(existing));
    }

    let result = state.pipeline.run(payload).await?;
    if let Some(key) = &key {
        state.idempotency.put(key, &result).await;
    }
    Ok(Json(result))
}

#[derive(Debug, Default, Deserialize)]
struct BatchQuery {
    dry_run: Option<bool>,
    render: Option<bool>,
    translate: Option<bool>,
    variant_image_filter: Option<bool>,
    price_mode: Option<PriceMode>,
    variation_mode: Option<VariationMode>,
    variation_specific: Option<String>,
}

impl BatchQuery {
    fn into_options(self, defaults: models::RunOptions) -> BatchOptions {
        let overrides = models::RunOptionsOverride {
            dry_run: self.dry_run,
            render: self.render,
            translate: self.translate,
            variant_image_filter: self.variant_image_filter,
            price_mode: self.price_mode,
        };
        let mut options =
            BatchOptions::new(overrides.apply(defaults), self.variation_mode.unwrap_or_default());
        options.variation_specific = self
            .variation_specific
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| DEFAULT_VARIATION_SPECIFIC.to_string());
        options
    }
}

#[derive(Debug, Serialize)]
struct EnqueueResponse {
    job_id: String,
    rows: usize,
}

/// Validate a CSV batch and queue it.
///
/// - Method: `POST`
/// - Path: `/listings/batch`
/// - Body: CSV text with `Brand, ProductName, Variant, Quantity` columns
/// - Query: run options plus `variation_mode` (`split` | `bundle`)
///
/// Header problems are rejected with 400 before anything is queued.
async fn create_batch(
    State(state): State<AppState>,
    Query(query): Query<BatchQuery>,
    body: String,
) -> Result<(StatusCode, Json<EnqueueResponse>), AppError> {
    crate::metrics::inc_requests("/listings/batch");
    let rows = batch::parse_csv(&body)?;
    if rows.is_empty() {
        return Err(PipelineError::invalid_input("batch", "batch has no rows").into());
    }
    let options = query.into_options(state.pipeline.run_defaults());
    let count = rows.len();
    let id = state
        .queue
        .enqueue_batch(rows, options)
        .await
        .map_err(|err| AppError::Pipeline(PipelineError::internal("enqueue", err.error)))?;
    info!(target = "autolist.api", job = %id, rows = count, "batch queued");
    Ok((
        StatusCode::ACCEPTED,
        Json(EnqueueResponse {
            job_id: id.to_string(),
            rows: count,
        }),
    ))
}

fn parse_job_id(id: &str) -> Result<uuid::Uuid, AppError> {
    uuid::Uuid::parse_str(id)
        .map_err(|_| AppError::Pipeline(PipelineError::invalid_input("jobs", "invalid_job_id")))
}

async fn get_job_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<jobs::JobInfo>, AppError> {
    let uuid = parse_job_id(&id)?;
    state
        .queue
        .get(uuid)
        .await
        .map(Json)
        .ok_or(AppError::NotFound("job"))
}

async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<jobs::JobInfo>, AppError> {
    let uuid = parse_job_id(&id)?;
    state
        .queue
        .cancel(uuid)
        .await
        .map(Json)
        .ok_or(AppError::NotFound("job"))
}

#[derive(Debug)]
enum AppError {
    Pipeline(PipelineError),
    Batch(BatchError),
    NotFound(&'static str),
}

impl From<PipelineError> for AppError {
    fn from(value: PipelineError) -> Self {
        Self::Pipeline(value)
    }
}

impl From<BatchError> for AppError {
    fn from(value: BatchError) -> Self {
        Self::Batch(value)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, payload) = match self {
            AppError::Pipeline(err) => {
                let status = match err.kind() {
                    PipelineErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
                    PipelineErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
                };
                let payload = ApiError {
                    error: err.stage().to_string(),
                    detail: Some(err.detail().to_string()),
                };
                (status, payload)
            }
            AppError::Batch(err) => (
                StatusCode::BAD_REQUEST,
                ApiError {
                    error: "batch".into(),
                    detail: Some(err.to_string()),
                },
            ),
            AppError::NotFound(what) => (
                StatusCode::NOT_FOUND,
                ApiError {
                    error: "not_found".into(),
                    detail: Some(format!("{what} not found")),
                },
            ),
        };
        (status, Json(payload)).into_response()
    }
}

// -------- Stage endpoints (manual granular control) --------

#[derive(Debug, Serialize)]
struct ResolveSourceResponse {
    source: Option<resolver::Resolution>,
    stage: serde_json::Value,
}

async fn stage_resolve_source(
    State(state): State<AppState>,
    Json(row): Json<ItemRow>,
) -> Result<Json<ResolveSourceResponse>, AppError> {
    crate::metrics::inc_requests("/stages/resolve_source");
    row.validate()
        .map_err(|message| PipelineError::invalid_input("resolve_source", message))?;
    let config = &state.pipeline.config;
    let client = http::build_session(&config.http);
    let out = pipeline::stages::resolve(&client, config, &row).await;
    Ok(Json(ResolveSourceResponse {
        source: out.value,
        stage: out.output,
    }))
}

#[derive(Debug, Deserialize)]
struct ExtractRequest {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    html: Option<String>,
}

#[derive(Debug, Serialize)]
struct ExtractResponse {
    #[serde(flatten)]
    content: extract::ExtractionResult,
    desc_len: usize,
}

/// Extract description blocks and image candidates from raw `html`, or from `url`
/// when no markup is supplied. `url` doubles as the base for relative links.
async fn stage_extract(
    State(state): State<AppState>,
    Json(req): Json<ExtractRequest>,
) -> Result<Json<ExtractResponse>, AppError> {
    crate::metrics::inc_requests("/stages/extract");
    let content = match (req.html, req.url) {
        (Some(html), url) => extract::parse_html(&html, url.as_deref().unwrap_or_default()),
        (None, Some(url)) => {
            let config = &state.pipeline.config;
            let client = http::build_session(&config.http);
            pipeline::stages::fetch_page(&client, config, &url)
                .await
                .value
                .unwrap_or_default()
        }
        (None, None) => {
            return Err(PipelineError::invalid_input("extract", "url or html is required").into());
        }
    };
    let desc_len = content.desc_len();
    Ok(Json(ExtractResponse { content, desc_len }))
}

#[derive(Debug, Deserialize)]
struct ScoreImagesRequest {
    brand: String,
    name: String,
    variant: String,
    #[serde(default)]
    source_url: Option<String>,
    images: Vec<String>,
    #[serde(default)]
    variant_filter: Option<bool>,
}

#[derive(Debug, Serialize)]
struct ScoredImage {
    url: String,
    score: i32,
}

#[derive(Debug, Serialize)]
struct ScoreImagesResponse {
    ranked: Vec<ScoredImage>,
    selected: Vec<String>,
}

async fn stage_score_images(
    State(state): State<AppState>,
    Json(req): Json<ScoreImagesRequest>,
) -> Json<ScoreImagesResponse> {
    crate::metrics::inc_requests("/stages/score_images");
    let query = scoring::ImageQuery::new(
        &req.brand,
        &req.name,
        &req.variant,
        req.source_url.as_deref().unwrap_or_default(),
        &state.pipeline.config.catalog.pack_sizes_ml,
    );
    let ranked = query
        .rank(&req.images)
        .into_iter()
        .map(|url| ScoredImage {
            score: query.score(&url),
            url,
        })
        .collect();
    let filter = req
        .variant_filter
        .unwrap_or(state.pipeline.run_defaults().variant_image_filter);
    let selected = scoring::select_pictures(&req.images, &query, &req.variant, filter);
    Json(ScoreImagesResponse { ranked, selected })
}

#[derive(Debug, Deserialize)]
struct DescriptionRequest {
    brand: String,
    name: String,
    variant: String,
    blocks: Vec<String>,
    #[serde(default)]
    translate: Option<bool>,
}

#[derive(Debug, Serialize)]
struct DescriptionResponse {
    description_html: String,
    desc_len: usize,
    translated: bool,
}

async fn stage_description(
    State(state): State<AppState>,
    Json(req): Json<DescriptionRequest>,
) -> Json<DescriptionResponse> {
    crate::metrics::inc_requests("/stages/description");
    let config = &state.pipeline.config;
    let client = http::build_session(&config.http);
    let row = ItemRow::new(&req.brand, &req.name, &req.variant, 1);
    let translate = req
        .translate
        .unwrap_or(state.pipeline.run_defaults().translate);
    let (description_html, translated) =
        pipeline::stages::compose_description(&client, config, &row, &req.blocks, translate).await;
    Json(DescriptionResponse {
        desc_len: extract::dom::visible_len(&description_html),
        description_html,
        translated,
    })
}
