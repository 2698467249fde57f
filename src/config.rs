use std::env;

pub const DEFAULT_UPSTREAM_TIMEOUT_MS: u64 = 15_000;

/// Connection details for the media-info provider.
#[derive(Clone, Debug)]
pub struct UpstreamConfig {
    pub api_key: String,
    pub api_host: String,
    /// Scheme + authority the info path is appended to, without a trailing slash.
    pub base_url: String,
    pub timeout_ms: u64,
}

impl UpstreamConfig {
    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty() && !self.api_host.is_empty()
    }
}

#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 100,
            window_secs: 15 * 60,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub production: bool,
    pub frontend_url: String,
    pub trust_proxy_headers: bool,
    pub upstream: UpstreamConfig,
    pub rate_limit: RateLimitConfig,
}

impl Settings {
    pub fn from_env() -> Self {
        let api_host = env_str("RAPIDAPI_HOST", "");
        let base_url = env::var("UPSTREAM_BASE_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| format!("https://{api_host}"));
        let app_env = env::var("NODE_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_default();

        Self {
            host: env_str("HOST", "0.0.0.0"),
            port: env_parse("PORT", 5000),
            production: app_env.eq_ignore_ascii_case("production"),
            frontend_url: env_str("FRONTEND_URL", "*"),
            trust_proxy_headers: env_parse("TRUST_PROXY_HEADERS", false),
            upstream: UpstreamConfig {
                api_key: env_str("RAPIDAPI_KEY", ""),
                api_host,
                base_url: base_url.trim_end_matches('/').to_string(),
                timeout_ms: env_parse("UPSTREAM_TIMEOUT_MS", DEFAULT_UPSTREAM_TIMEOUT_MS),
            },
            rate_limit: RateLimitConfig {
                max_requests: env_parse("RATE_LIMIT_MAX", 100),
                window_secs: env_parse("RATE_LIMIT_WINDOW_SECS", 15 * 60),
            },
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn env_str(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
