use crate::config::HttpConfig;
use reqwest::{Client, Response, header};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("HTTP {0}")]
    Status(u16),
    #[error("unexpected content type `{0}`")]
    ContentType(String),
}

/// One isolated session per row: fixed user agent, bounded timeouts.
pub fn build_session(config: &HttpConfig) -> Client {
    let mut headers = header::HeaderMap::new();
    if let Ok(value) = header::HeaderValue::from_str(&config.user_agent) {
        headers.insert(header::USER_AGENT, value);
    }
    Client::builder()
        .default_headers(headers)
        .timeout(Duration::from_secs(config.timeout_secs))
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .build()
        .unwrap_or_else(|_| Client::new())
}

pub fn content_type(response: &Response) -> String {
    response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("")
        .to_lowercase()
}

/// GET a page and return its body only when it is a successful HTML response.
pub async fn fetch_html(
    client: &Client,
    url: &str,
    timeout: Duration,
) -> Result<String, FetchError> {
    let response = client
        .get(url)
        .timeout(timeout)
        .send()
        .await
        .map_err(|err| FetchError::Request(err.to_string()))?;
    if !response.status().is_success() {
        return Err(FetchError::Status(response.status().as_u16()));
    }
    let kind = content_type(&response);
    if !kind.contains("text/html") {
        return Err(FetchError::ContentType(kind));
    }
    response
        .text()
        .await
        .map_err(|err| FetchError::Request(err.to_string()))
}

/// Lightweight existence check: success status and an HTML content type.
pub async fn probe_html(client: &Client, url: &str, timeout: Duration) -> bool {
    match client.get(url).timeout(timeout).send().await {
        Ok(response) => {
            response.status().is_success() && content_type(&response).contains("text/html")
        }
        Err(_) => false,
    }
}
