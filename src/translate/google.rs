use super::TranslateError;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

/// Public `translate_a/single` endpoint; the answer is a nested array of segment pairs.
pub async fn translate(
    client: &Client,
    endpoint: &str,
    text: &str,
    timeout: Duration,
) -> Result<String, TranslateError> {
    let response = client
        .post(endpoint)
        .query(&[("client", "gtx"), ("sl", "auto"), ("tl", "de"), ("dt", "t")])
        .form(&[("q", text)])
        .timeout(timeout)
        .send()
        .await
        .map_err(|err| TranslateError::Http(err.to_string()))?;

    if !response.status().is_success() {
        return Err(TranslateError::Http(format!("HTTP {}", response.status())));
    }

    let payload: Value = response
        .json()
        .await
        .map_err(|err| TranslateError::InvalidResponse(err.to_string()))?;
    join_segments(&payload)
        .ok_or_else(|| TranslateError::InvalidResponse("unexpected response shape".into()))
}

fn join_segments(payload: &Value) -> Option<String> {
    let segments = payload.get(0)?.as_array()?;
    let joined: String = segments
        .iter()
        .filter_map(|segment| segment.get(0).and_then(Value::as_str))
        .collect();
    (!joined.trim().is_empty()).then_some(joined)
}
