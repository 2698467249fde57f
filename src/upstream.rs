use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use crate::config::UpstreamConfig;
use crate::error::UpstreamError;

const INFO_PATH: &str = "/get-info-rapidapi";

/// Raw provider response. Read-only input to [`crate::normalize::normalize`].
pub type UpstreamPayload = Value;

/// Issues one lookup per call against the media-info provider. Holds no
/// per-request state, so clones can be used from concurrent handlers.
#[derive(Clone)]
pub struct UpstreamResolver {
    config: UpstreamConfig,
    client: reqwest::Client,
}

impl UpstreamResolver {
    pub fn new(config: UpstreamConfig, client: reqwest::Client) -> Self {
        Self { config, client }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.config.timeout_ms)
    }

    /// Look up `url` once. No retries and no caching: repeating the call
    /// repeats the round trip.
    pub async fn resolve(&self, url: &str) -> Result<UpstreamPayload, UpstreamError> {
        if !self.config.is_configured() {
            return Err(UpstreamError::NotConfigured);
        }

        let timeout_ms = self.config.timeout_ms;
        match tokio::time::timeout(self.timeout(), self.request(url)).await {
            Ok(result) => result,
            Err(_) => Err(UpstreamError::Timeout { timeout_ms }),
        }
    }

    async fn request(&self, url: &str) -> Result<UpstreamPayload, UpstreamError> {
        let endpoint = format!("{}{INFO_PATH}", self.config.base_url);
        debug!("Resolving {} via {endpoint}", preview(url));

        let resp = self
            .client
            .get(&endpoint)
            .query(&[("url", url)])
            .header("X-RapidAPI-Key", &self.config.api_key)
            .header("X-RapidAPI-Host", &self.config.api_host)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(UpstreamError::Status(status));
        }

        let body = resp.bytes().await?;
        let data: Value =
            serde_json::from_slice(&body).map_err(|e| UpstreamError::Decode(e.to_string()))?;
        if !data.is_object() {
            return Err(UpstreamError::Decode(format!(
                "expected object, got {}",
                json_kind(&data)
            )));
        }
        Ok(data)
    }
}

fn preview(url: &str) -> String {
    url.chars().take(50).collect()
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Query;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::get;
    use axum::{Json, Router};
    use std::collections::HashMap;

    async fn spawn_stub(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn resolver(base_url: String, timeout_ms: u64) -> UpstreamResolver {
        UpstreamResolver::new(
            UpstreamConfig {
                api_key: "test-key".into(),
                api_host: "media.example".into(),
                base_url,
                timeout_ms,
            },
            reqwest::Client::new(),
        )
    }

    #[tokio::test]
    async fn test_resolve_sends_url_and_auth_headers() {
        let app = Router::new().route(
            INFO_PATH,
            get(
                |Query(q): Query<HashMap<String, String>>, headers: HeaderMap| async move {
                    Json(serde_json::json!({
                        "echo_url": q.get("url"),
                        "key": headers.get("x-rapidapi-key").and_then(|v| v.to_str().ok()),
                        "host": headers.get("x-rapidapi-host").and_then(|v| v.to_str().ok()),
                    }))
                },
            ),
        );
        let base = spawn_stub(app).await;

        let data = resolver(base, 2_000)
            .resolve("https://instagram.com/p/ABC123?x=1&y=2")
            .await
            .unwrap();
        assert_eq!(data["echo_url"], "https://instagram.com/p/ABC123?x=1&y=2");
        assert_eq!(data["key"], "test-key");
        assert_eq!(data["host"], "media.example");
    }

    #[tokio::test]
    async fn test_resolve_times_out() {
        let app = Router::new().route(
            INFO_PATH,
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Json(serde_json::json!({}))
            }),
        );
        let base = spawn_stub(app).await;

        let err = resolver(base, 100)
            .resolve("https://instagram.com/p/ABC123")
            .await
            .unwrap_err();
        assert!(matches!(err, UpstreamError::Timeout { timeout_ms: 100 }));
    }

    #[tokio::test]
    async fn test_resolve_non_success_status() {
        let app = Router::new().route(INFO_PATH, get(|| async { StatusCode::TOO_MANY_REQUESTS }));
        let base = spawn_stub(app).await;

        let err = resolver(base, 2_000)
            .resolve("https://instagram.com/p/ABC123")
            .await
            .unwrap_err();
        assert!(matches!(err, UpstreamError::Status(s) if s == StatusCode::TOO_MANY_REQUESTS));
    }

    #[tokio::test]
    async fn test_resolve_rejects_non_object_body() {
        let app = Router::new().route(INFO_PATH, get(|| async { Json(serde_json::json!([1, 2])) }));
        let base = spawn_stub(app).await;

        let err = resolver(base, 2_000)
            .resolve("https://instagram.com/p/ABC123")
            .await
            .unwrap_err();
        assert!(matches!(err, UpstreamError::Decode(_)));
    }

    #[tokio::test]
    async fn test_resolve_without_credentials() {
        let mut r = resolver("http://127.0.0.1:9".into(), 2_000);
        r.config.api_key.clear();
        let err = r.resolve("https://instagram.com/p/ABC123").await.unwrap_err();
        assert!(matches!(err, UpstreamError::NotConfigured));
    }
}
