use super::TranslateError;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct DeeplResponse {
    translations: Vec<DeeplTranslation>,
}

#[derive(Debug, Deserialize)]
struct DeeplTranslation {
    text: String,
}

pub async fn translate(
    client: &Client,
    endpoint: &str,
    api_key: &str,
    text: &str,
    timeout: Duration,
) -> Result<String, TranslateError> {
    let response = client
        .post(endpoint)
        .header("Authorization", format!("DeepL-Auth-Key {api_key}"))
        .form(&[("text", text), ("target_lang", "DE")])
        .timeout(timeout)
        .send()
        .await
        .map_err(|err| TranslateError::Http(err.to_string()))?;

    if !response.status().is_success() {
        return Err(TranslateError::Http(format!("HTTP {}", response.status())));
    }

    let payload: DeeplResponse = response
        .json()
        .await
        .map_err(|err| TranslateError::InvalidResponse(err.to_string()))?;
    payload
        .translations
        .into_iter()
        .next()
        .map(|item| item.text)
        .filter(|text| !text.trim().is_empty())
        .ok_or_else(|| TranslateError::InvalidResponse("missing translation".into()))
}
