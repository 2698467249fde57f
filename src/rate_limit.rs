use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tokio::sync::Mutex;
use tracing::warn;

use crate::config::RateLimitConfig;
use crate::error::ApiError;

const LIMITED_PREFIX: &str = "/api/";
const MAX_TRACKED_CLIENTS: usize = 10_000;
const UNKNOWN_CLIENT: &str = "unknown";

const LIMIT_HEADER: HeaderName = HeaderName::from_static("ratelimit-limit");
const REMAINING_HEADER: HeaderName = HeaderName::from_static("ratelimit-remaining");

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    hits: u32,
}

/// Fixed-window request counter keyed by client address.
#[derive(Clone)]
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    trust_proxy_headers: bool,
    max_clients: usize,
    windows: Arc<Mutex<HashMap<String, Window>>>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig, trust_proxy_headers: bool) -> Self {
        Self {
            max_requests: config.max_requests,
            window: Duration::from_secs(config.window_secs),
            trust_proxy_headers,
            max_clients: MAX_TRACKED_CLIENTS,
            windows: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Count one request for `client`. `Ok` carries the requests left in the
    /// current window, `Err` the seconds until it resets.
    pub async fn check(&self, client: &str, now: Instant) -> Result<u32, u64> {
        let mut windows = self.windows.lock().await;

        if windows.len() >= self.max_clients && !windows.contains_key(client) {
            let window = self.window;
            windows.retain(|_, w| now.duration_since(w.started) < window);

            // Still full of live windows: drop the one that started first.
            if windows.len() >= self.max_clients {
                let oldest = windows
                    .iter()
                    .min_by_key(|(_, w)| w.started)
                    .map(|(key, _)| key.clone());
                if let Some(key) = oldest {
                    windows.remove(&key);
                }
            }
        }

        let slot = windows.entry(client.to_string()).or_insert(Window {
            started: now,
            hits: 0,
        });
        if now.duration_since(slot.started) >= self.window {
            *slot = Window {
                started: now,
                hits: 0,
            };
        }

        if slot.hits >= self.max_requests {
            let reset_in = self.window.saturating_sub(now.duration_since(slot.started));
            return Err(reset_in.as_secs().max(1));
        }

        slot.hits += 1;
        Ok(self.max_requests - slot.hits)
    }

    fn client_key(&self, req: &Request) -> String {
        if self.trust_proxy_headers {
            if let Some(ip) = forwarded_for(req.headers()) {
                return ip;
            }
        }
        req.extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
            .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
    }
}

fn forwarded_for(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")?
        .to_str()
        .ok()?
        .split(',')
        .map(str::trim)
        .find(|hop| !hop.is_empty())
        .map(ToString::to_string)
}

/// Middleware enforcing the limiter on every `/api/` path.
pub async fn enforce(State(limiter): State<RateLimiter>, req: Request, next: Next) -> Response {
    if !req.uri().path().starts_with(LIMITED_PREFIX) {
        return next.run(req).await;
    }

    let client = limiter.client_key(&req);
    match limiter.check(&client, Instant::now()).await {
        Ok(remaining) => {
            let mut response = next.run(req).await;
            let headers = response.headers_mut();
            headers.insert(LIMIT_HEADER, HeaderValue::from(limiter.max_requests));
            headers.insert(REMAINING_HEADER, HeaderValue::from(remaining));
            response
        }
        Err(retry_after_secs) => {
            warn!("Rate limit exceeded for {client}");
            let mut response = ApiError::RateLimited { retry_after_secs }.into_response();
            let headers = response.headers_mut();
            headers.insert(LIMIT_HEADER, HeaderValue::from(limiter.max_requests));
            headers.insert(REMAINING_HEADER, HeaderValue::from(0u32));
            response
        }
    }
}
