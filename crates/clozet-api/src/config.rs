//! API configuration.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    /// Allowed browser origins; `*` allows any
    pub cors_origins: Vec<String>,
    /// Sustained requests per second, per client IP
    pub rate_limit_rps: u32,
    pub rate_limit_burst: u32,
    pub request_timeout: Duration,
    pub max_body_size: usize,
    /// `production` hides internal error details
    pub environment: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_origins: vec!["*".to_string()],
            rate_limit_rps: 10,
            rate_limit_burst: 20,
            request_timeout: Duration::from_secs(30),
            // Bodies are ids and a small options map
            max_body_size: 64 * 1024,
            environment: "development".to_string(),
        }
    }
}

/// Parsed value of `var`, or `default` when unset or unparseable.
fn env_or<T: FromStr>(var: &str, default: T) -> T {
    std::env::var(var)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

impl ApiConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let cors_origins = match std::env::var("CORS_ORIGINS") {
            Ok(list) => list
                .split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .map(String::from)
                .collect(),
            Err(_) => defaults.cors_origins,
        };

        Self {
            host: env_or("HOST", defaults.host),
            port: env_or("PORT", defaults.port),
            cors_origins,
            rate_limit_rps: env_or("RATE_LIMIT_RPS", defaults.rate_limit_rps),
            rate_limit_burst: env_or("RATE_LIMIT_BURST", defaults.rate_limit_burst),
            request_timeout: Duration::from_secs(env_or(
                "REQUEST_TIMEOUT_SECS",
                defaults.request_timeout.as_secs(),
            )),
            max_body_size: env_or("MAX_BODY_SIZE", defaults.max_body_size),
            environment: env_or("ENVIRONMENT", defaults.environment),
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_from_env() {
        std::env::set_var("PORT", "9000");
        std::env::set_var("CORS_ORIGINS", "https://clozet.app, https://admin.clozet.app,");
        std::env::set_var("RATE_LIMIT_RPS", "many");
        std::env::set_var("ENVIRONMENT", "Production");

        let config = ApiConfig::from_env();
        assert_eq!(config.port, 9000);
        assert_eq!(
            config.cors_origins,
            vec!["https://clozet.app", "https://admin.clozet.app"]
        );
        assert_eq!(config.rate_limit_rps, 10);
        assert!(config.is_production());
        assert_eq!(config.bind_addr().unwrap().port(), 9000);

        for var in ["PORT", "CORS_ORIGINS", "RATE_LIMIT_RPS", "ENVIRONMENT"] {
            std::env::remove_var(var);
        }
    }
}
