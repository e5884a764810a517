//! JavaScript-rendering fallback. Every backend is bounded by the configured timeout.

use crate::config::RenderConfig;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("no rendering backend configured")]
    Unavailable,
    #[error("render timed out after {0:?}")]
    Timeout(Duration),
    #[error("render request failed: {0}")]
    Http(String),
    #[error("browser error: {0}")]
    Browser(String),
}

#[derive(Debug, Clone)]
pub enum Renderer {
    Disabled,
    /// POSTs `{url, timeout_ms}` and expects the rendered markup back.
    Remote { endpoint: String, timeout: Duration },
    #[cfg(feature = "headless")]
    Headless { timeout: Duration },
}

#[derive(Debug, Serialize)]
struct RenderRequest<'a> {
    url: &'a str,
    timeout_ms: u64,
}

impl Renderer {
    pub fn from_config(config: &RenderConfig) -> Self {
        if let Some(endpoint) = &config.endpoint {
            return Renderer::Remote {
                endpoint: endpoint.clone(),
                timeout: config.timeout,
            };
        }
        headless_backend(config).unwrap_or(Renderer::Disabled)
    }

    pub fn is_available(&self) -> bool {
        !matches!(self, Renderer::Disabled)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Renderer::Disabled => "disabled",
            Renderer::Remote { .. } => "remote",
            #[cfg(feature = "headless")]
            Renderer::Headless { .. } => "headless",
        }
    }

    pub async fn render(&self, client: &Client, url: &str) -> Result<String, RenderError> {
        match self {
            Renderer::Disabled => Err(RenderError::Unavailable),
            Renderer::Remote { endpoint, timeout } => {
                let request = client
                    .post(endpoint)
                    .json(&RenderRequest {
                        url,
                        timeout_ms: timeout.as_millis() as u64,
                    })
                    .timeout(*timeout)
                    .send();
                let response = tokio::time::timeout(*timeout, request)
                    .await
                    .map_err(|_| RenderError::Timeout(*timeout))?
                    .map_err(|err| RenderError::Http(err.to_string()))?;
                if !response.status().is_success() {
                    return Err(RenderError::Http(format!("HTTP {}", response.status())));
                }
                response
                    .text()
                    .await
                    .map_err(|err| RenderError::Http(err.to_string()))
            }
            #[cfg(feature = "headless")]
            Renderer::Headless { timeout } => {
                let url = url.to_string();
                let timeout = *timeout;
                let task = tokio::task::spawn_blocking(move || render_headless(&url, timeout));
                tokio::time::timeout(timeout, task)
                    .await
                    .map_err(|_| RenderError::Timeout(timeout))?
                    .map_err(|err| RenderError::Browser(err.to_string()))?
            }
        }
    }
}

#[cfg(feature = "headless")]
fn headless_backend(config: &RenderConfig) -> Option<Renderer> {
    config.headless.then_some(Renderer::Headless {
        timeout: config.timeout,
    })
}

#[cfg(not(feature = "headless"))]
fn headless_backend(_config: &RenderConfig) -> Option<Renderer> {
    None
}

#[cfg(feature = "headless")]
fn render_headless(url: &str, timeout: Duration) -> Result<String, RenderError> {
    use headless_chrome::{Browser, LaunchOptions};

    let options = LaunchOptions::default_builder()
        .headless(true)
        .sandbox(false)
        .idle_browser_timeout(timeout)
        .build()
        .map_err(|err| RenderError::Browser(err.to_string()))?;
    let browser = Browser::new(options).map_err(|err| RenderError::Browser(err.to_string()))?;
    let tab = browser
        .new_tab()
        .map_err(|err| RenderError::Browser(err.to_string()))?;
    tab.set_default_timeout(timeout);
    tab.navigate_to(url)
        .map_err(|err| RenderError::Browser(err.to_string()))?;
    if tab.wait_until_navigated().is_err() {
        tracing::warn!(target = "autolist.render", url = %url, "navigation_wait_timed_out");
    }
    tab.get_content()
        .map_err(|err| RenderError::Browser(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HttpConfig;
    use crate::http::build_session;
    use httpmock::prelude::*;

    #[test]
    fn disabled_without_endpoint() {
        let renderer = Renderer::from_config(&RenderConfig::default());
        assert!(!renderer.is_available());
        assert_eq!(renderer.name(), "disabled");
    }

    #[tokio::test]
    async fn remote_backend_posts_url_and_budget() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/render")
                    .json_body(serde_json::json!({"url": "https://shop.example/products/x", "timeout_ms": 1500}));
                then.status(200).body("<html><body>rendered</body></html>");
            })
            .await;
        let renderer = Renderer::from_config(&RenderConfig {
            endpoint: Some(server.url("/render")),
            headless: false,
            timeout: Duration::from_millis(1500),
        });
        let client = build_session(&HttpConfig::default());
        let html = renderer
            .render(&client, "https://shop.example/products/x")
            .await
            .expect("rendered");
        mock.assert_async().await;
        assert!(html.contains("rendered"));
    }

    #[tokio::test]
    async fn remote_failure_is_an_error_value() {
        let server = MockServer::start_async().await;
        let renderer = Renderer::Remote {
            endpoint: server.url("/render"),
            timeout: Duration::from_secs(1),
        };
        let client = build_session(&HttpConfig::default());
        let err = renderer.render(&client, "https://shop.example/").await.unwrap_err();
        assert!(matches!(err, RenderError::Http(_)));
    }
}
