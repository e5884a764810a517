//! CSV batches: header validation, row parsing and sequential processing.

use crate::extract::escape_text;
use crate::marketplace::{build_payload, compute_price};
use crate::models::{
    BatchRecord, Diagnostics, GroupResult, ItemRow, ListingPayload, ListingResult, RunOptions,
    Status, VariantPictures, VariationEntry, VariationMode,
};
use crate::pipeline::{Pipeline, PipelineError};
use chrono::Utc;
use csv::{ReaderBuilder, StringRecord, Trim};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing::{info, warn};

pub const REQUIRED_COLUMNS: [&str; 4] = ["Brand", "ProductName", "Variant", "Quantity"];
pub const DEFAULT_VARIATION_SPECIFIC: &str = "Größe";

#[derive(Debug, Error, PartialEq)]
pub enum BatchError {
    #[error("missing required column `{0}`")]
    MissingColumn(&'static str),
    #[error("row {row}: invalid {column} `{value}`")]
    InvalidValue {
        row: usize,
        column: &'static str,
        value: String,
    },
    #[error("malformed csv: {0}")]
    Csv(String),
}

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub run: RunOptions,
    pub mode: VariationMode,
    pub variation_specific: String,
}

impl BatchOptions {
    pub fn new(run: RunOptions, mode: VariationMode) -> Self {
        Self {
            run,
            mode,
            variation_specific: DEFAULT_VARIATION_SPECIFIC.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub records: Vec<BatchRecord>,
    pub cancelled: bool,
}

struct Columns {
    index: HashMap<String, usize>,
}

impl Columns {
    fn from_headers(headers: &StringRecord) -> Result<Self, BatchError> {
        let index: HashMap<String, usize> = headers
            .iter()
            .enumerate()
            .map(|(idx, name)| (name.trim().to_lowercase(), idx))
            .collect();
        for column in REQUIRED_COLUMNS {
            if !index.contains_key(&column.to_lowercase()) {
                return Err(BatchError::MissingColumn(column));
            }
        }
        Ok(Self { index })
    }

    fn get<'r>(&self, record: &'r StringRecord, column: &str) -> Option<&'r str> {
        let idx = *self.index.get(&column.to_lowercase())?;
        record.get(idx).map(str::trim).filter(|value| !value.is_empty())
    }
}

/// Parses a batch file. Column names match case-insensitively; a missing required
/// column or an unparseable number fails the whole batch before any row runs.
pub fn parse_csv(text: &str) -> Result<Vec<ItemRow>, BatchError> {
    let mut reader = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .from_reader(text.trim_start_matches('\u{feff}').as_bytes());
    let headers = reader
        .headers()
        .map_err(|err| BatchError::Csv(err.to_string()))?
        .clone();
    let columns = Columns::from_headers(&headers)?;

    let mut rows = Vec::new();
    for (idx, record) in reader.records().enumerate() {
        let record = record.map_err(|err| BatchError::Csv(err.to_string()))?;
        let line = idx + 1;
        let text = |column: &str| columns.get(&record, column).map(str::to_string);
        let number = |column: &'static str| -> Result<Option<f64>, BatchError> {
            columns
                .get(&record, column)
                .map(|raw| {
                    parse_decimal(raw).ok_or_else(|| BatchError::InvalidValue {
                        row: line,
                        column,
                        value: raw.to_string(),
                    })
                })
                .transpose()
        };

        let quantity_raw = columns.get(&record, "Quantity").unwrap_or("1");
        let quantity = parse_quantity(quantity_raw).ok_or_else(|| BatchError::InvalidValue {
            row: line,
            column: "Quantity",
            value: quantity_raw.to_string(),
        })?;

        rows.push(ItemRow {
            brand: text("Brand").unwrap_or_default(),
            name: text("ProductName").unwrap_or_default(),
            variant: text("Variant").unwrap_or_default(),
            quantity,
            price: number("Price")?,
            sku: text("SKU"),
            source_url: text("SourceURL"),
            category_id: text("CategoryID"),
            condition_id: text("ConditionID"),
            vat_percent: number("VATPercent")?,
        });
    }
    Ok(rows)
}

/// Accepts `9.99` as well as the comma-decimal `9,99`.
fn parse_decimal(raw: &str) -> Option<f64> {
    raw.replace(',', ".")
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite() && *value >= 0.0)
}

fn parse_quantity(raw: &str) -> Option<u32> {
    if let Ok(quantity) = raw.parse::<u32>() {
        return Some(quantity);
    }
    let value = parse_decimal(raw)?;
    (value.fract() == 0.0 && value <= f64::from(u32::MAX)).then_some(value as u32)
}

/// Rows grouped by lowercase brand and name, in order of first appearance.
pub fn group_rows(rows: &[ItemRow]) -> Vec<Vec<&ItemRow>> {
    let mut order: Vec<(String, String)> = Vec::new();
    let mut groups: HashMap<(String, String), Vec<&ItemRow>> = HashMap::new();
    for row in rows {
        let key = crate::config::product_key(&row.brand, &row.name);
        if !groups.contains_key(&key) {
            order.push(key.clone());
        }
        groups.entry(key).or_default().push(row);
    }
    order
        .into_iter()
        .filter_map(|key| groups.remove(&key))
        .collect()
}

fn percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((done * 100) / total).min(100) as u8
}

/// Processes rows one at a time, reporting integer percent progress after each row.
/// `cancel` is only observed between rows; records finished so far are kept.
pub async fn run_batch(
    pipeline: &Pipeline,
    rows: &[ItemRow],
    options: &BatchOptions,
    mut progress: impl FnMut(u8),
    cancel: &AtomicBool,
) -> BatchOutcome {
    let total = rows.len();
    let mode = if total == 1 {
        VariationMode::Split
    } else {
        options.mode
    };
    info!(target: "autolist.session", rows = total, mode = ?mode, "batch started");

    let mut records = Vec::new();
    let mut done = 0;
    let mut cancelled = false;

    match mode {
        VariationMode::Split => {
            for row in rows {
                if cancel.load(Ordering::SeqCst) {
                    cancelled = true;
                    break;
                }
                let result = run_or_fail(pipeline, row, options.run).await;
                records.push(BatchRecord::Listing(Box::new(result)));
                done += 1;
                progress(percent(done, total));
            }
        }
        VariationMode::Bundle => {
            for group in group_rows(rows) {
                let mut results = Vec::with_capacity(group.len());
                for row in &group {
                    if cancel.load(Ordering::SeqCst) {
                        cancelled = true;
                        break;
                    }
                    // Variants are always previewed; only the group itself is uploaded.
                    let preview_options = RunOptions {
                        dry_run: true,
                        ..options.run
                    };
                    results.push(run_or_fail(pipeline, row, preview_options).await);
                    done += 1;
                    progress(percent(done, total));
                }
                if cancelled {
                    // A group cut short is kept as a preview of the variants already run.
                    if !results.is_empty() {
                        let partial = BatchOptions {
                            run: RunOptions {
                                dry_run: true,
                                ..options.run
                            },
                            ..options.clone()
                        };
                        let mut record =
                            assemble_group(pipeline, &group[..results.len()], &results, &partial)
                                .await;
                        record.message = Some("cancelled".into());
                        records.push(BatchRecord::Group(Box::new(record)));
                    }
                    break;
                }
                let record = assemble_group(pipeline, &group, &results, options).await;
                records.push(BatchRecord::Group(Box::new(record)));
            }
        }
    }

    info!(
        target: "autolist.session",
        rows = total,
        processed = done,
        cancelled,
        "batch finished"
    );
    BatchOutcome { records, cancelled }
}

async fn run_or_fail(pipeline: &Pipeline, row: &ItemRow, options: RunOptions) -> ListingResult {
    match pipeline.run_row(row, options).await {
        Ok(result) => result,
        Err(err) => {
            warn!(target = "autolist.batch", sku = %row.derived_sku(), error = %err, "row_rejected");
            rejected_row(row, &err)
        }
    }
}

fn rejected_row(row: &ItemRow, err: &PipelineError) -> ListingResult {
    ListingResult {
        status: Status::ListedFail,
        sku: row.derived_sku(),
        preview: None,
        source_url: None,
        when: Utc::now(),
        message: Some(err.detail().to_string()),
        diagnostics: Diagnostics::default(),
        stages: Vec::new(),
    }
}

async fn assemble_group(
    pipeline: &Pipeline,
    group: &[&ItemRow],
    results: &[ListingResult],
    options: &BatchOptions,
) -> GroupResult {
    let first = group[0];
    let variations: Vec<VariationEntry> = group
        .iter()
        .map(|row| VariationEntry {
            sku: row.derived_sku(),
            value: row.variant.clone(),
            quantity: row.quantity,
            price: compute_price(row, options.run.price_mode),
        })
        .collect();
    let variant_pictures: Vec<VariantPictures> = group
        .iter()
        .zip(results)
        .map(|(row, result)| VariantPictures {
            sku: row.derived_sku(),
            pics: result
                .preview
                .as_ref()
                .map(|preview| preview.picture_urls.len())
                .unwrap_or(0),
        })
        .collect();
    let first_result = results.first();
    let preview_base = parent_payload(pipeline, first, first_result, options);
    let label = format!("{} {}", first.brand.trim(), first.name.trim());

    let (status, message) = if options.run.dry_run {
        (Status::DryOk, None)
    } else {
        let outcome = pipeline
            .uploader()
            .upload_group(&label, variations.len())
            .await;
        let status = if outcome.ok {
            Status::ListedGroup
        } else {
            Status::ListedFail
        };
        (status, Some(outcome.message))
    };

    GroupResult {
        status,
        group: label,
        source_url: first_result.and_then(|result| result.source_url.clone()),
        when: Utc::now(),
        message,
        preview_base: Some(preview_base),
        variation_specific: options.variation_specific.clone(),
        variations,
        variant_pictures,
    }
}

/// Parent listing of a bundle: the first variant's description and pictures under the
/// group title, or a bare heading when the first variant produced nothing.
fn parent_payload(
    pipeline: &Pipeline,
    first: &ItemRow,
    first_result: Option<&ListingResult>,
    options: &BatchOptions,
) -> ListingPayload {
    let preview = first_result.and_then(|result| result.preview.as_ref());
    let description = preview
        .map(|preview| preview.description_html.clone())
        .filter(|html| !html.is_empty())
        .unwrap_or_else(|| {
            format!(
                "<h2>{} {}</h2>",
                escape_text(first.brand.trim()),
                escape_text(first.name.trim())
            )
        });
    let pictures = preview
        .map(|preview| preview.picture_urls.clone())
        .unwrap_or_default();
    let mut payload = build_payload(
        first,
        description,
        &pictures,
        compute_price(first, options.run.price_mode),
        &pipeline.config.default_currency,
    );
    payload.title = first.group_title();
    payload
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ManufacturerCatalog, PipelineConfig, StorefrontConfig};
    use crate::models::PriceMode;
    use httpmock::prelude::*;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    const CSV: &str = "Brand,ProductName,Variant,Quantity,Price,SourceURL\n\
                       Hesi,Boost,500 ml,2,\"12,50\",\n\
                       Hesi,Boost,1 l,1,19.90,\n\
                       Canna,PK 13/14,250 ml,3,,\n";

    fn options(mode: VariationMode, dry_run: bool) -> BatchOptions {
        BatchOptions::new(
            RunOptions {
                dry_run,
                render: false,
                translate: false,
                variant_image_filter: true,
                price_mode: PriceMode::Input,
            },
            mode,
        )
    }

    fn offline_pipeline(server: &MockServer) -> Pipeline {
        let mut config = PipelineConfig {
            storefront: StorefrontConfig::single(&server.base_url()),
            catalog: ManufacturerCatalog::empty(),
            ..PipelineConfig::default()
        };
        let quick = Duration::from_secs(2);
        config.http.probe_timeout = quick;
        config.http.search_timeout = quick;
        config.http.feed_timeout = quick;
        config.http.page_timeout = quick;
        Pipeline::new(config)
    }

    #[test]
    fn missing_quantity_is_fatal() {
        let err = parse_csv("Brand,ProductName,Variant,Price\nHesi,Boost,500 ml,9.99\n")
            .expect_err("missing column");
        assert_eq!(err, BatchError::MissingColumn("Quantity"));
    }

    #[test]
    fn rows_are_parsed_with_optional_columns() {
        let rows = parse_csv(CSV).expect("valid csv");
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].price, Some(12.5));
        assert_eq!(rows[0].source_url, None);
        assert_eq!(rows[1].variant, "1 l");
        assert_eq!(rows[2].price, None);
        assert_eq!(rows[2].quantity, 3);
    }

    #[test]
    fn headers_match_case_insensitively() {
        let rows = parse_csv("\u{feff}brand, productname ,VARIANT,quantity\nHesi,Boost,500 ml,2.0\n")
            .expect("valid csv");
        assert_eq!(rows[0].name, "Boost");
        assert_eq!(rows[0].quantity, 2);
    }

    #[test]
    fn bad_number_names_row_and_column() {
        let err = parse_csv("Brand,ProductName,Variant,Quantity\nHesi,Boost,500 ml,two\n")
            .expect_err("bad quantity");
        assert_eq!(
            err,
            BatchError::InvalidValue {
                row: 1,
                column: "Quantity",
                value: "two".into()
            }
        );
    }

    #[test]
    fn groups_keep_first_appearance_order() {
        let rows = parse_csv(
            "Brand,ProductName,Variant,Quantity\nCanna,PK,1 l,1\nHesi,Boost,500 ml,1\ncanna, pk ,5 l,1\n",
        )
        .expect("valid csv");
        let groups = group_rows(&rows);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].len(), 2);
        assert_eq!(groups[0][1].variant, "5 l");
        assert_eq!(groups[1][0].brand, "Hesi");
    }

    #[tokio::test]
    async fn split_mode_reports_progress_per_row() {
        let server = MockServer::start_async().await;
        let pipeline = offline_pipeline(&server);
        let rows = parse_csv(CSV).expect("valid csv");
        let mut seen = Vec::new();
        let cancel = AtomicBool::new(false);
        let outcome = run_batch(
            &pipeline,
            &rows,
            &options(VariationMode::Split, true),
            |pct| seen.push(pct),
            &cancel,
        )
        .await;
        assert!(!outcome.cancelled);
        assert_eq!(seen, vec![33, 66, 100]);
        assert_eq!(outcome.records.len(), 3);
        assert!(outcome.records.iter().all(|record| matches!(
            record,
            BatchRecord::Listing(result) if result.status == Status::NoSourceUrl
        )));
    }

    #[tokio::test]
    async fn cancellation_stops_between_rows() {
        let server = MockServer::start_async().await;
        let pipeline = offline_pipeline(&server);
        let rows = parse_csv(CSV).expect("valid csv");
        let cancel = AtomicBool::new(false);
        let outcome = run_batch(
            &pipeline,
            &rows,
            &options(VariationMode::Split, true),
            |_| cancel.store(true, Ordering::SeqCst),
            &cancel,
        )
        .await;
        assert!(outcome.cancelled);
        assert_eq!(outcome.records.len(), 1);
    }

    #[tokio::test]
    async fn cancelled_bundle_keeps_the_partial_group() {
        let server = MockServer::start_async().await;
        let pipeline = offline_pipeline(&server);
        let rows = parse_csv(CSV).expect("valid csv");
        let cancel = AtomicBool::new(false);
        let outcome = run_batch(
            &pipeline,
            &rows,
            &options(VariationMode::Bundle, false),
            |_| cancel.store(true, Ordering::SeqCst),
            &cancel,
        )
        .await;
        assert!(outcome.cancelled);
        assert_eq!(outcome.records.len(), 1);
        let BatchRecord::Group(hesi) = &outcome.records[0] else {
            panic!("expected a group record");
        };
        assert_eq!(hesi.status, Status::DryOk);
        assert_eq!(hesi.message.as_deref(), Some("cancelled"));
        let values: Vec<&str> = hesi.variations.iter().map(|v| v.value.as_str()).collect();
        assert_eq!(values, vec!["500 ml"]);
        assert_eq!(hesi.variant_pictures.len(), 1);
    }

    #[tokio::test]
    async fn bundle_mode_emits_one_record_per_group() {
        let server = MockServer::start_async().await;
        let pipeline = offline_pipeline(&server);
        let rows = parse_csv(CSV).expect("valid csv");
        let cancel = AtomicBool::new(false);
        let outcome = run_batch(
            &pipeline,
            &rows,
            &options(VariationMode::Bundle, false),
            |_| {},
            &cancel,
        )
        .await;
        assert_eq!(outcome.records.len(), 2);
        let BatchRecord::Group(hesi) = &outcome.records[0] else {
            panic!("expected a group record");
        };
        assert_eq!(hesi.status, Status::ListedGroup);
        assert_eq!(hesi.group, "Hesi Boost");
        assert_eq!(hesi.variation_specific, "Größe");
        let values: Vec<&str> = hesi.variations.iter().map(|v| v.value.as_str()).collect();
        assert_eq!(values, vec!["500 ml", "1 l"]);
        assert_eq!(hesi.variations[0].price, 12.5);
        let base = hesi.preview_base.as_ref().expect("parent payload");
        assert_eq!(base.title, "Hesi Boost | Dünger • Neu");
        assert_eq!(base.description_html, "<h2>Hesi Boost</h2>");
    }

    #[tokio::test]
    async fn single_row_batch_is_always_split() {
        let server = MockServer::start_async().await;
        let pipeline = offline_pipeline(&server);
        let rows = vec![ItemRow::new("Hesi", "Boost", "500 ml", 1)];
        let cancel = AtomicBool::new(false);
        let outcome = run_batch(
            &pipeline,
            &rows,
            &options(VariationMode::Bundle, true),
            |_| {},
            &cancel,
        )
        .await;
        assert!(matches!(outcome.records.as_slice(), [BatchRecord::Listing(_)]));
    }
}
