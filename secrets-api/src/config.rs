//! Service Configuration Module
//!
//! Every knob is read from the environment with a default suitable for a
//! pod running next to its peers. Values that are present but malformed are
//! reported as [`ConfigError::InvalidValue`] instead of silently falling back.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use secrets_core::{ConfigError, DEFAULT_REPLICAS};

/// Default histogram buckets for request latency, in seconds.
pub const DEFAULT_LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
];

/// How the application listener derives keys and renders responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheMode {
    /// `POST {"secret_name": ...}` lookups; only successes are cached.
    Secret,
    /// Any request is keyed by `method + " " + uri` and forwarded to an
    /// upstream origin; error statuses are cached for the error ttl.
    Proxy,
}

impl CacheMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheMode::Secret => "secret",
            CacheMode::Proxy => "proxy",
        }
    }
}

impl std::str::FromStr for CacheMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "secret" => Ok(CacheMode::Secret),
            "proxy" => Ok(CacheMode::Proxy),
            other => Err(format!("unknown cache mode '{}', expected secret or proxy", other)),
        }
    }
}

/// Full service configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    // ========================================================================
    // Application listener
    // ========================================================================
    pub listen_addr: SocketAddr,
    /// Route served in secret mode.
    pub app_route: String,
    pub mode: CacheMode,
    /// Ttl of successfully loaded values.
    pub cache_ttl: Duration,
    /// Ttl of proxied responses with status >= 400.
    pub cache_error_ttl: Duration,

    // ========================================================================
    // Health and metrics listeners
    // ========================================================================
    pub health_addr: SocketAddr,
    pub health_path: String,
    pub metrics_addr: SocketAddr,
    pub metrics_path: String,
    pub metrics_namespace: String,
    pub latency_buckets: Vec<f64>,

    // ========================================================================
    // Cache group and peers
    // ========================================================================
    pub group_name: String,
    pub peer_addr: SocketAddr,
    pub cache_bytes: usize,
    pub purge_expired: bool,
    pub purge_interval: Duration,
    pub peer_timeout: Duration,
    pub replicas: usize,
    /// Endpoint other nodes use to reach this node's peer listener.
    pub self_url: String,
    /// Static peer endpoints; the discovery hook may replace them at runtime.
    pub peers: Vec<String>,
    /// Label selector handed to the discovery sidecar.
    pub label_selector: String,

    // ========================================================================
    // Loaders
    // ========================================================================
    pub secrets_dir: PathBuf,
    pub upstream_url: Option<String>,
    pub http_client_timeout: Duration,
}

impl ServiceConfig {
    /// Create ServiceConfig from environment variables.
    ///
    /// Environment variables:
    /// - `LISTEN_ADDR`: application listener (default: `:8080`)
    /// - `APP_ROUTE`: secret-mode route (default: `/secret`)
    /// - `CACHE_MODE`: `secret` or `proxy` (default: `secret`)
    /// - `CACHE_TTL` / `CACHE_ERROR_TTL`: value and error ttls (default: 600s / 60s)
    /// - `HEALTH_ADDR` / `HEALTH_PATH`: health listener (default: `:8888` / `/health`)
    /// - `METRICS_ADDR` / `METRICS_PATH`: metrics listener (default: `:3000` / `/metrics`)
    /// - `METRICS_NAMESPACE`, `METRICS_BUCKETS_LATENCY_HTTP`
    /// - `GROUPCACHE_GROUP`, `GROUPCACHE_PORT`, `GROUPCACHE_SIZE_BYTES`,
    ///   `GROUPCACHE_PURGE_EXPIRED`, `GROUPCACHE_PURGE_INTERVAL`,
    ///   `GROUPCACHE_PEER_TIMEOUT`, `GROUPCACHE_REPLICAS`,
    ///   `GROUPCACHE_SELF_URL`, `GROUPCACHE_PEERS`
    /// - `KUBEGROUP_LABEL_SELECTOR` (default: `app=secrets`)
    /// - `SECRETS_DIR`, `UPSTREAM_URL`, `HTTP_CLIENT_TIMEOUT`
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };

        let mode = env.parse("CACHE_MODE", CacheMode::Secret, |s| s.parse())?;
        let peer_addr = env.addr("GROUPCACHE_PORT", ":5000")?;
        let upstream_url = env.string_opt("UPSTREAM_URL");
        if mode == CacheMode::Proxy && upstream_url.is_none() {
            return Err(ConfigError::MissingRequired {
                field: "UPSTREAM_URL".to_string(),
            });
        }

        let self_url = env.string_opt("GROUPCACHE_SELF_URL").unwrap_or_else(|| {
            let host = env
                .string_opt("POD_IP")
                .or_else(|| env.string_opt("HOSTNAME"))
                .unwrap_or_else(|| "127.0.0.1".to_string());
            format!("http://{}:{}", host, peer_addr.port())
        });

        let peers = env
            .string_opt("GROUPCACHE_PEERS")
            .map(|s| {
                s.split(',')
                    .map(|p| p.trim().to_string())
                    .filter(|p| !p.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            listen_addr: env.addr("LISTEN_ADDR", ":8080")?,
            app_route: env.string("APP_ROUTE", "/secret"),
            mode,
            cache_ttl: env.duration("CACHE_TTL", Duration::from_secs(600))?,
            cache_error_ttl: env.duration("CACHE_ERROR_TTL", Duration::from_secs(60))?,
            health_addr: env.addr("HEALTH_ADDR", ":8888")?,
            health_path: env.string("HEALTH_PATH", "/health"),
            metrics_addr: env.addr("METRICS_ADDR", ":3000")?,
            metrics_path: env.string("METRICS_PATH", "/metrics"),
            metrics_namespace: env.string("METRICS_NAMESPACE", ""),
            latency_buckets: env.parse(
                "METRICS_BUCKETS_LATENCY_HTTP",
                DEFAULT_LATENCY_BUCKETS.to_vec(),
                parse_buckets,
            )?,
            group_name: env.string("GROUPCACHE_GROUP", "secrets"),
            peer_addr,
            cache_bytes: env.parse("GROUPCACHE_SIZE_BYTES", 1_000_000, |s| {
                s.parse::<usize>().map_err(|e| e.to_string())
            })?,
            purge_expired: env.parse("GROUPCACHE_PURGE_EXPIRED", true, parse_bool)?,
            purge_interval: env.duration("GROUPCACHE_PURGE_INTERVAL", Duration::from_secs(60))?,
            peer_timeout: env.duration("GROUPCACHE_PEER_TIMEOUT", Duration::from_secs(2))?,
            replicas: env.parse("GROUPCACHE_REPLICAS", DEFAULT_REPLICAS, |s| {
                match s.parse::<usize>() {
                    Ok(0) => Err("must be at least 1".to_string()),
                    Ok(n) => Ok(n),
                    Err(e) => Err(e.to_string()),
                }
            })?,
            self_url,
            peers,
            label_selector: env.string("KUBEGROUP_LABEL_SELECTOR", "app=secrets"),
            secrets_dir: PathBuf::from(env.string("SECRETS_DIR", "/var/run/secrets/app")),
            upstream_url,
            http_client_timeout: env.duration("HTTP_CLIENT_TIMEOUT", Duration::from_secs(5))?,
        })
    }
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string_opt(&self, name: &str) -> Option<String> {
        (self.lookup)(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn string(&self, name: &str, default: &str) -> String {
        self.string_opt(name).unwrap_or_else(|| default.to_string())
    }

    fn parse<T, P>(&self, name: &str, default: T, parser: P) -> Result<T, ConfigError>
    where
        P: Fn(&str) -> Result<T, String>,
    {
        match self.string_opt(name) {
            None => Ok(default),
            Some(value) => parser(&value).map_err(|reason| ConfigError::InvalidValue {
                field: name.to_string(),
                value,
                reason,
            }),
        }
    }

    fn duration(&self, name: &str, default: Duration) -> Result<Duration, ConfigError> {
        self.parse(name, default, parse_duration)
    }

    fn addr(&self, name: &str, default: &str) -> Result<SocketAddr, ConfigError> {
        let value = self.string(name, default);
        parse_listen_addr(&value).map_err(|reason| ConfigError::InvalidValue {
            field: name.to_string(),
            value,
            reason,
        })
    }
}

/// Parse a duration such as `250ms`, `2s`, `10m`, `1h` or bare seconds.
pub fn parse_duration(value: &str) -> Result<Duration, String> {
    let value = value.trim();
    let split = value
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(value.len());
    let (number, unit) = value.split_at(split);
    let number: f64 = number
        .parse()
        .map_err(|_| format!("'{}' is not a duration", value))?;
    let seconds = match unit.trim() {
        "" | "s" => number,
        "ms" => number / 1000.0,
        "m" => number * 60.0,
        "h" => number * 3600.0,
        other => return Err(format!("unknown duration unit '{}'", other)),
    };
    Duration::try_from_secs_f64(seconds).map_err(|e| e.to_string())
}

/// Parse a listen address. A bare `:port` binds every interface.
pub fn parse_listen_addr(value: &str) -> Result<SocketAddr, String> {
    let value = value.trim();
    let full = if value.starts_with(':') {
        format!("0.0.0.0{}", value)
    } else {
        value.to_string()
    };
    full.parse::<SocketAddr>()
        .map_err(|e| format!("invalid listen address: {}", e))
}

/// Parse booleans the way operators tend to write them.
pub fn parse_bool(value: &str) -> Result<bool, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "t" | "true" | "yes" | "on" => Ok(true),
        "0" | "f" | "false" | "no" | "off" => Ok(false),
        other => Err(format!("'{}' is not a boolean", other)),
    }
}

/// Parse a comma-separated, strictly increasing list of bucket bounds.
pub fn parse_buckets(value: &str) -> Result<Vec<f64>, String> {
    let buckets = value
        .split(',')
        .map(|b| b.trim())
        .filter(|b| !b.is_empty())
        .map(|b| b.parse::<f64>().map_err(|_| format!("'{}' is not a number", b)))
        .collect::<Result<Vec<_>, _>>()?;
    if buckets.is_empty() {
        return Err("at least one bucket is required".to_string());
    }
    if buckets.windows(2).any(|pair| pair[0] >= pair[1]) {
        return Err("buckets must be strictly increasing".to_string());
    }
    Ok(buckets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Result<ServiceConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServiceConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() -> Result<(), ConfigError> {
        let config = config_from(&[])?;
        assert_eq!(config.listen_addr, "0.0.0.0:8080".parse().expect("addr"));
        assert_eq!(config.peer_addr.port(), 5000);
        assert_eq!(config.health_addr.port(), 8888);
        assert_eq!(config.metrics_addr.port(), 3000);
        assert_eq!(config.app_route, "/secret");
        assert_eq!(config.mode, CacheMode::Secret);
        assert_eq!(config.cache_ttl, Duration::from_secs(600));
        assert_eq!(config.cache_error_ttl, Duration::from_secs(60));
        assert_eq!(config.cache_bytes, 1_000_000);
        assert!(config.purge_expired);
        assert_eq!(config.replicas, DEFAULT_REPLICAS);
        assert_eq!(config.self_url, "http://127.0.0.1:5000");
        assert!(config.peers.is_empty());
        assert_eq!(config.label_selector, "app=secrets");
        assert_eq!(config.latency_buckets, DEFAULT_LATENCY_BUCKETS.to_vec());
        Ok(())
    }

    #[test]
    fn test_overrides() -> Result<(), ConfigError> {
        let config = config_from(&[
            ("CACHE_TTL", "10m"),
            ("GROUPCACHE_PEER_TIMEOUT", "250ms"),
            ("GROUPCACHE_PORT", ":5100"),
            ("POD_IP", "10.0.0.7"),
            ("GROUPCACHE_PEERS", "http://10.0.0.7:5100, http://10.0.0.8:5100,,"),
            ("GROUPCACHE_PURGE_EXPIRED", "false"),
        ])?;
        assert_eq!(config.cache_ttl, Duration::from_secs(600));
        assert_eq!(config.peer_timeout, Duration::from_millis(250));
        assert_eq!(config.self_url, "http://10.0.0.7:5100");
        assert_eq!(
            config.peers,
            vec!["http://10.0.0.7:5100".to_string(), "http://10.0.0.8:5100".to_string()]
        );
        assert!(!config.purge_expired);
        Ok(())
    }

    #[test]
    fn test_invalid_value_is_reported() {
        let err = config_from(&[("CACHE_TTL", "ten")]).expect_err("bad ttl");
        assert!(matches!(
            err,
            ConfigError::InvalidValue { ref field, .. } if field == "CACHE_TTL"
        ));
    }

    #[test]
    fn test_proxy_mode_requires_upstream() {
        let err = config_from(&[("CACHE_MODE", "proxy")]).expect_err("no upstream");
        assert_eq!(
            err,
            ConfigError::MissingRequired {
                field: "UPSTREAM_URL".to_string()
            }
        );

        let config = config_from(&[("CACHE_MODE", "Proxy"), ("UPSTREAM_URL", "http://origin")])
            .expect("proxy config");
        assert_eq!(config.mode, CacheMode::Proxy);
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("5"), Ok(Duration::from_secs(5)));
        assert_eq!(parse_duration("1.5s"), Ok(Duration::from_millis(1500)));
        assert_eq!(parse_duration("2h"), Ok(Duration::from_secs(7200)));
        assert!(parse_duration("5d").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn test_parse_listen_addr() {
        assert_eq!(
            parse_listen_addr(":8080"),
            Ok("0.0.0.0:8080".parse().expect("addr"))
        );
        assert_eq!(
            parse_listen_addr("127.0.0.1:9000"),
            Ok("127.0.0.1:9000".parse().expect("addr"))
        );
        assert!(parse_listen_addr("localhost").is_err());
    }

    #[test]
    fn test_parse_buckets() {
        assert_eq!(parse_buckets("0.1, 0.5,1"), Ok(vec![0.1, 0.5, 1.0]));
        assert!(parse_buckets("1,0.5").is_err());
        assert!(parse_buckets("fast").is_err());
    }
}
