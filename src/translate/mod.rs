//! German output for description bodies: detect, then DeepL, then the Google endpoint.

mod deepl;
mod detect;
mod google;

use crate::config::TranslateConfig;
use crate::extract::dom::fragment_lines;
use crate::extract::escape_text;
use reqwest::Client;
use thiserror::Error;
use tracing::{debug, warn};

pub use detect::{Detected, detect_language};

#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("http error: {0}")]
    Http(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Translation {
    pub html: String,
    pub provider: &'static str,
}

pub struct Translator<'a> {
    client: &'a Client,
    config: &'a TranslateConfig,
}

impl<'a> Translator<'a> {
    pub fn new(client: &'a Client, config: &'a TranslateConfig) -> Self {
        Self { client, config }
    }

    /// German paragraphs for `html`, or `None` when it is already German or no provider answered.
    pub async fn ensure_german(&self, html: &str) -> Option<Translation> {
        let lines = fragment_lines(html);
        if lines.is_empty() {
            return None;
        }
        let text = lines.join("\n");
        let detected = detect_language(&text);
        if detected == Detected::German {
            debug!(target = "autolist.translate", "already_german");
            return None;
        }

        let (translated, provider) = self.translate_text(&text).await?;
        let html = translated
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| format!("<p>{}</p>", escape_text(line)))
            .collect::<String>();
        (!html.is_empty()).then_some(Translation { html, provider })
    }

    async fn translate_text(&self, text: &str) -> Option<(String, &'static str)> {
        if let Some(key) = self.config.deepl_key.as_deref() {
            match deepl::translate(
                self.client,
                &self.config.deepl_endpoint,
                key,
                text,
                self.config.timeout,
            )
            .await
            {
                Ok(translated) => return Some((translated, "deepl")),
                Err(err) => {
                    warn!(target = "autolist.translate", provider = "deepl", error = %err, "translation_failed");
                }
            }
        }
        match google::translate(self.client, &self.config.google_endpoint, text, self.config.timeout)
            .await
        {
            Ok(translated) => Some((translated, "google")),
            Err(err) => {
                warn!(target = "autolist.translate", provider = "google", error = %err, "translation_failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HttpConfig;
    use crate::http::build_session;
    use httpmock::prelude::*;
    use std::time::Duration;

    const ENGLISH: &str = "<p>Hesi Boost is a flowering stimulator for the generative phase.</p>\
        <p>It supports the formation of dense, aromatic flowers and an even ripening.</p>";

    fn config(server: &MockServer, deepl_key: Option<&str>) -> TranslateConfig {
        TranslateConfig {
            deepl_key: deepl_key.map(str::to_string),
            deepl_endpoint: server.url("/v2/translate"),
            google_endpoint: server.url("/translate_a/single"),
            timeout: Duration::from_secs(2),
        }
    }

    #[tokio::test]
    async fn deepl_is_tried_first() {
        let server = MockServer::start_async().await;
        let deepl = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v2/translate")
                    .header("authorization", "DeepL-Auth-Key secret");
                then.status(200)
                    .header("content-type", "application/json")
                    .body(r#"{"translations":[{"text":"Hesi Boost ist ein Blühstimulator.\nEr fördert <dichte> Blüten."}]}"#);
            })
            .await;
        let config = config(&server, Some("secret"));
        let client = build_session(&HttpConfig::default());
        let translation = Translator::new(&client, &config)
            .ensure_german(ENGLISH)
            .await
            .expect("translated");
        deepl.assert_async().await;
        assert_eq!(translation.provider, "deepl");
        assert_eq!(
            translation.html,
            "<p>Hesi Boost ist ein Blühstimulator.</p><p>Er fördert &lt;dichte&gt; Blüten.</p>"
        );
    }

    #[tokio::test]
    async fn google_is_the_fallback() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v2/translate");
                then.status(403);
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/translate_a/single").query_param("tl", "de");
                then.status(200)
                    .header("content-type", "application/json")
                    .body(r#"[[["Hesi Boost ist ein Blühstimulator.","x",null]],null,"en"]"#);
            })
            .await;
        let config = config(&server, Some("secret"));
        let client = build_session(&HttpConfig::default());
        let translation = Translator::new(&client, &config)
            .ensure_german(ENGLISH)
            .await
            .expect("translated");
        assert_eq!(translation.provider, "google");
    }

    #[tokio::test]
    async fn both_failing_keeps_original() {
        let server = MockServer::start_async().await;
        let config = config(&server, None);
        let client = build_session(&HttpConfig::default());
        assert!(Translator::new(&client, &config).ensure_german(ENGLISH).await.is_none());
    }

    #[tokio::test]
    async fn german_text_short_circuits() {
        let server = MockServer::start_async().await;
        let google = server
            .mock_async(|when, then| {
                when.path("/translate_a/single");
                then.status(500);
            })
            .await;
        let config = config(&server, None);
        let client = build_session(&HttpConfig::default());
        let german = "<p>Hesi Boost ist ein Blühstimulator für die generative Phase. Er unterstützt \
                      die Bildung dichter, aromatischer Blüten und sorgt für eine gleichmäßigere Reife.</p>";
        assert!(Translator::new(&client, &config).ensure_german(german).await.is_none());
        google.assert_hits_async(0).await;
    }
}
