//! Gateway configuration, read once from the process environment.

use std::time::Duration;

/// Runtime settings for the gateway process.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub bind_addr: String,
    pub jwt_secret: String,
    pub problem_service: String,
    pub submission_service: String,
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
    pub store_timeout: Duration,
    pub rate_limit: RateLimitConfig,
    pub cors_origins: Vec<String>,
}

/// Token bucket settings, applied per client key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub requests_per_second: u32,
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_second: 20,
            burst: 40,
        }
    }
}

impl RateLimitConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3004".to_string(),
            jwt_secret: "dev-secret".to_string(),
            problem_service: "http://localhost:3000".to_string(),
            submission_service: "http://localhost:3002".to_string(),
            database_url: None,
            redis_url: None,
            store_timeout: Duration::from_secs(2),
            rate_limit: RateLimitConfig::default(),
            cors_origins: vec!["http://localhost:*".to_string()],
        }
    }
}

impl GatewayConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset keys keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let jwt_secret = lookup("JWT_SECRET")
            .or_else(|| lookup("SECRET_KEY"))
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| {
                tracing::warn!("JWT_SECRET not set; using insecure dev default");
                defaults.jwt_secret.clone()
            });

        let rate_limit = RateLimitConfig {
            enabled: parse_or(&lookup, "RATE_LIMIT_ENABLED", defaults.rate_limit.enabled),
            requests_per_second: parse_or(
                &lookup,
                "RATE_LIMIT_RPS",
                defaults.rate_limit.requests_per_second,
            ),
            burst: parse_or(&lookup, "RATE_LIMIT_BURST", defaults.rate_limit.burst),
        };

        let cors_origins = lookup("CORS_ALLOWED_ORIGINS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|o| !o.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or(defaults.cors_origins);

        Self {
            bind_addr: lookup("PORT")
                .map(|p| bind_addr_from_port(&p))
                .unwrap_or(defaults.bind_addr),
            jwt_secret,
            problem_service: lookup("PROBLEM_SERVICE").unwrap_or(defaults.problem_service),
            submission_service: lookup("SUBMISSION_SERVICE")
                .unwrap_or(defaults.submission_service),
            database_url: lookup("DATABASE_URL").filter(|s| !s.is_empty()),
            redis_url: lookup("REDIS_URL").filter(|s| !s.is_empty()),
            store_timeout: Duration::from_millis(parse_or(
                &lookup,
                "STORE_TIMEOUT_MS",
                defaults.store_timeout.as_millis() as u64,
            )),
            rate_limit,
            cors_origins,
        }
    }
}

/// `PORT` may be `3004`, `:3004` or a full `host:port`.
fn bind_addr_from_port(port: &str) -> String {
    let port = port.trim();
    if let Some(bare) = port.strip_prefix(':') {
        format!("0.0.0.0:{bare}")
    } else if port.contains(':') {
        port.to_string()
    } else {
        format!("0.0.0.0:{port}")
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: std::str::FromStr,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "unparseable config value; using default");
            default
        }),
        None => default,
    }
}
