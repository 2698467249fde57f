mod config;
mod error;
mod history;
mod normalize;
mod rate_limit;
mod upstream;
mod validator;

use std::net::SocketAddr;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Form, FromRequest, Json, Request, State};
use axum::http::{header, HeaderName, HeaderValue, Method};
use axum::middleware;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use chrono::{SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

use config::Settings;
use error::ApiError;
use history::{HistoryLog, NewHistoryEntry, SharedHistory, DEFAULT_RECENT};
use rate_limit::RateLimiter;
use upstream::UpstreamResolver;

const DEV_ORIGINS: [&str; 2] = ["http://localhost:3000", "http://localhost:5173"];

// ============= Application State =============

#[derive(Clone)]
pub struct AppState {
    pub resolver: UpstreamResolver,
    pub history: SharedHistory,
}

// ============= Request Models =============

#[derive(Deserialize, Default)]
struct FetchMediaRequest {
    url: Option<String>,
    format: Option<String>,
}

#[derive(Deserialize, Default)]
struct DownloadRequest {
    url: Option<String>,
    format: Option<String>,
    resolution: Option<String>,
}

/// Request body accepted as JSON or as a urlencoded form. A missing or
/// blank body, or one without either content type, reads as an empty object
/// so it fails on the missing `url` instead.
struct RequestBody<T>(T);

impl<S, T> FromRequest<S> for RequestBody<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Default + Send,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let content_type = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();

        if content_type.starts_with("application/x-www-form-urlencoded") {
            let Form(v) = Form::<T>::from_request(req, state).await.map_err(|e| {
                warn!("Rejected form body: {e}");
                ApiError::InvalidBody
            })?;
            return Ok(Self(v));
        }

        if !is_json(&content_type) {
            return Ok(Self(T::default()));
        }

        let bytes = Bytes::from_request(req, state).await.map_err(|e| {
            warn!("Failed to read request body: {e}");
            ApiError::InvalidBody
        })?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self(T::default()));
        }
        serde_json::from_slice(&bytes).map(Self).map_err(|e| {
            warn!("Rejected JSON body: {e}");
            ApiError::InvalidBody
        })
    }
}

fn is_json(content_type: &str) -> bool {
    let essence = content_type.split(';').next().unwrap_or_default().trim();
    essence == "application/json" || essence.ends_with("+json")
}

/// Only an absent or empty `url` is missing; anything else goes on as sent.
fn required_url(url: Option<String>) -> Result<String, ApiError> {
    url.filter(|u| !u.is_empty()).ok_or(ApiError::MissingUrl)
}

fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

// ============= Handlers =============

/// GET /api/health
async fn health_handler() -> Json<Value> {
    Json(json!({
        "status": "OK",
        "message": "Instagram Downloader API is running",
        "timestamp": now_iso(),
    }))
}

/// POST /api/fetch-media: validate, resolve upstream, normalize
async fn fetch_media_handler(
    State(state): State<AppState>,
    RequestBody(req): RequestBody<FetchMediaRequest>,
) -> Result<Json<Value>, ApiError> {
    let url = required_url(req.url)?;

    if !validator::is_supported_url(&url) {
        warn!("Rejected unsupported URL: {url}");
        return Err(ApiError::InvalidUrl);
    }

    let payload = state.resolver.resolve(&url).await.map_err(|e| {
        error!("Upstream lookup failed for {url}: {e}");
        ApiError::from(e)
    })?;

    let media = normalize::normalize(&payload, req.format.as_deref());
    Ok(Json(json!({ "success": true, "media": media })))
}

/// POST /api/download: record the requested download; no bytes are moved
async fn download_handler(
    State(state): State<AppState>,
    RequestBody(req): RequestBody<DownloadRequest>,
) -> Result<Json<Value>, ApiError> {
    let url = required_url(req.url)?;

    let entry = state.history.lock().await.record(NewHistoryEntry {
        url,
        format: req.format,
        resolution: req.resolution,
    });
    info!("Recorded download #{} for {}", entry.id, entry.url);

    Ok(Json(json!({ "success": true, "message": "Download initiated" })))
}

/// GET /api/history: most recent downloads, newest first
async fn history_handler(State(state): State<AppState>) -> Json<Value> {
    let history = state.history.lock().await.recent_reversed(DEFAULT_RECENT);
    Json(json!({ "success": true, "history": history }))
}

async fn not_found_handler() -> impl IntoResponse {
    ApiError::NotFound
}

// ============= Router =============

fn build_cors_layer(settings: &Settings) -> CorsLayer {
    let base = CorsLayer::new().allow_methods([Method::GET, Method::POST, Method::OPTIONS]);

    if settings.production && settings.frontend_url.trim() == "*" {
        return base.allow_origin(Any).allow_headers(Any);
    }

    let configured: Vec<&str> = if settings.production {
        settings.frontend_url.split(',').map(str::trim).collect()
    } else {
        DEV_ORIGINS.to_vec()
    };
    let origins: Vec<HeaderValue> = configured
        .into_iter()
        .filter(|o| !o.is_empty())
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!("Ignoring invalid CORS origin {o:?}: {e}");
                None
            }
        })
        .collect();
    info!("CORS allow-list loaded with {} origin(s)", origins.len());

    base.allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true)
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT])
}

fn build_router(state: AppState, limiter: RateLimiter, settings: &Settings) -> Router {
    Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/fetch-media", post(fetch_media_handler))
        .route("/api/download", post(download_handler))
        .route("/api/history", get(history_handler))
        .fallback(not_found_handler)
        .layer(middleware::from_fn_with_state(limiter, rate_limit::enforce))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("SAMEORIGIN"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::REFERRER_POLICY,
            HeaderValue::from_static("no-referrer"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_DNS_PREFETCH_CONTROL,
            HeaderValue::from_static("off"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            HeaderName::from_static("cross-origin-resource-policy"),
            HeaderValue::from_static("same-origin"),
        ))
        .layer(build_cors_layer(settings))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .with_state(state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

// ============= Main =============

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("insta_fetch=info,tower_http=info")),
        )
        .init();

    let settings = Settings::from_env();

    if !settings.upstream.is_configured() {
        warn!("RAPIDAPI_KEY / RAPIDAPI_HOST not set; media lookups will fail");
    }
    info!("Upstream: {}", settings.upstream.base_url);
    info!("Upstream timeout: {}ms", settings.upstream.timeout_ms);
    info!(
        "Rate limit: {} requests / {}s per client",
        settings.rate_limit.max_requests, settings.rate_limit.window_secs
    );

    // The resolver enforces its own bound; this one only catches stuck sockets.
    let http_client = reqwest::Client::builder()
        .timeout(Duration::from_millis(settings.upstream.timeout_ms * 2))
        .connect_timeout(Duration::from_secs(10))
        .pool_max_idle_per_host(20)
        .build()
        .expect("Failed to create HTTP client");

    let state = AppState {
        resolver: UpstreamResolver::new(settings.upstream.clone(), http_client),
        history: HistoryLog::shared(),
    };
    let limiter = RateLimiter::new(&settings.rate_limit, settings.trust_proxy_headers);
    let app = build_router(state, limiter, &settings);

    let addr = settings.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind listener");
    info!("🚀 Server running on http://{addr}");

    if let Err(e) = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    {
        error!("Server error: {e}");
    }
    info!("Server closed");
}
