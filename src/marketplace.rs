use crate::models::{ItemRow, ListingPayload, PriceMode};
use crate::scoring::MAX_PICTURES;
use tracing::info;

pub const DEFAULT_PRICE: f64 = 9.99;

pub fn compute_price(row: &ItemRow, mode: PriceMode) -> f64 {
    let base = row.price.filter(|price| *price > 0.0).unwrap_or(DEFAULT_PRICE);
    match mode {
        PriceMode::Input => base,
        // Placeholder for a marketplace-average lookup: 10% under the row price.
        PriceMode::Avg10 => (base * 0.9 * 100.0).round() / 100.0,
    }
}

pub fn build_payload(
    row: &ItemRow,
    description_html: String,
    pictures: &[String],
    price: f64,
    currency: &str,
) -> ListingPayload {
    ListingPayload {
        title: row.display_title(),
        description_html,
        category_id: row.category_or_default(),
        price,
        currency: currency.to_string(),
        quantity: row.quantity,
        condition_id: row.condition_or_default(),
        sku: row.derived_sku(),
        vat_percent: row.vat_or_default(),
        picture_urls: pictures.iter().take(MAX_PICTURES).cloned().collect(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOutcome {
    pub ok: bool,
    pub message: String,
}

/// Stand-in for the marketplace API: accepts every payload.
#[derive(Debug, Clone, Default)]
pub struct StubUploader;

impl StubUploader {
    pub async fn upload(&self, payload: &ListingPayload) -> UploadOutcome {
        info!(
            target = "autolist.marketplace",
            sku = %payload.sku,
            pictures = payload.picture_urls.len(),
            "upload_stubbed"
        );
        UploadOutcome {
            ok: true,
            message: "OK (Stub)".into(),
        }
    }

    pub async fn upload_group(&self, group: &str, variations: usize) -> UploadOutcome {
        info!(target = "autolist.marketplace", group = %group, variations, "group_upload_stubbed");
        UploadOutcome {
            ok: true,
            message: "OK (Stub)".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn price_modes() {
        let mut row = ItemRow::new("Hesi", "Boost", "500 ml", 1);
        assert_eq!(compute_price(&row, PriceMode::Input), DEFAULT_PRICE);
        row.price = Some(20.0);
        assert_eq!(compute_price(&row, PriceMode::Input), 20.0);
        assert_eq!(compute_price(&row, PriceMode::Avg10), 18.0);
        row.price = Some(9.99);
        assert_eq!(compute_price(&row, PriceMode::Avg10), 8.99);
    }

    #[test]
    fn payload_carries_defaults_and_caps_pictures() {
        let row = ItemRow::new("Hesi", "Boost", "500 ml", 4);
        let pictures: Vec<String> = (0..20).map(|i| format!("https://cdn.example/{i}.jpg")).collect();
        let payload = build_payload(&row, "<p>x</p>".into(), &pictures, 9.99, "EUR");
        assert_eq!(payload.category_id, "3187");
        assert_eq!(payload.condition_id, "1000");
        assert_eq!(payload.sku, "hesi-boost-500-ml");
        assert_eq!(payload.quantity, 4);
        assert_eq!(payload.picture_urls.len(), MAX_PICTURES);
    }

    #[tokio::test]
    async fn stub_upload_always_succeeds() {
        let row = ItemRow::new("Hesi", "Boost", "500 ml", 1);
        let payload = build_payload(&row, String::new(), &[], 9.99, "EUR");
        let outcome = StubUploader.upload(&payload).await;
        assert!(outcome.ok);
        assert_eq!(outcome.message, "OK (Stub)");
    }
}
