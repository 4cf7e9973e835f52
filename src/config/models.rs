// src/config/models.rs
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("no endpoints configured")]
    NoEndpoints,

    #[error("malformed endpoint {0:?}: {1}")]
    InvalidEndpoint(String, &'static str),

    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),

    #[error("health check path {0:?} must start with '/'")]
    InvalidHealthPath(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub listen: ListenConfig,
    pub endpoints: Vec<String>,
    #[serde(default)]
    pub health_check: HealthCheckConfig,
    #[serde(default = "default_admission")]
    pub admission: HashMap<String, String>,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Config {
    /// Checks everything the core depends on. Admission keys are left to the
    /// admission factory since they are algorithm specific.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.endpoint_addrs()?;
        self.health_check.validate()
    }

    /// Parses the configured endpoint list, preserving its order.
    pub fn endpoint_addrs(&self) -> Result<Vec<EndpointAddr>, ConfigError> {
        if self.endpoints.is_empty() {
            return Err(ConfigError::NoEndpoints);
        }
        self.endpoints.iter().map(|raw| raw.parse()).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenConfig {
    #[serde(default = "default_listen_host")]
    pub host: String,
    #[serde(default = "default_listen_port")]
    pub port: u16,
}

impl ListenConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            host: default_listen_host(),
            port: default_listen_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_health_path")]
    pub path: String,
}

impl HealthCheckConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_secs == 0 {
            return Err(ConfigError::ZeroDuration("health_check.interval_secs"));
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::ZeroDuration("health_check.timeout_secs"));
        }
        if !self.path.starts_with('/') {
            return Err(ConfigError::InvalidHealthPath(self.path.clone()));
        }
        Ok(())
    }
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            timeout_secs: default_timeout_secs(),
            path: default_health_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
            path: default_metrics_path(),
        }
    }
}

/// A backend address as written in the config: `host:port` or
/// `scheme://host:port`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointAddr {
    pub scheme: String,
    pub host: String,
    pub port: u16,
}

impl FromStr for EndpointAddr {
    type Err = ConfigError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let invalid = |reason| ConfigError::InvalidEndpoint(raw.to_string(), reason);

        let trimmed = raw.trim();
        let (scheme, rest) = match trimmed.split_once("://") {
            Some((scheme, rest)) => (scheme.to_ascii_lowercase(), rest),
            None => ("http".to_string(), trimmed),
        };
        if scheme != "http" && scheme != "https" {
            return Err(invalid("scheme must be http or https"));
        }

        let (host, port) = rest.rsplit_once(':').ok_or_else(|| invalid("expected host:port"))?;
        if host.is_empty() {
            return Err(invalid("host is empty"));
        }
        if host.contains(|c: char| c == '/' || c.is_whitespace()) {
            return Err(invalid("host contains invalid characters"));
        }
        let port: u16 = port.parse().map_err(|_| invalid("port is not a number"))?;
        if port == 0 {
            return Err(invalid("port must be non-zero"));
        }

        // Anything the URL parser would reject or reinterpret (userinfo,
        // stray brackets, illegal host characters) can never be forwarded to.
        let parsed = Url::parse(&format!("{scheme}://{host}:{port}"))
            .map_err(|_| invalid("not a valid URL authority"))?;
        match parsed.host_str() {
            Some(resolved) if resolved.eq_ignore_ascii_case(host) => {}
            _ => return Err(invalid("host does not survive URL parsing")),
        }

        Ok(Self {
            scheme,
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for EndpointAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}

fn default_listen_host() -> String {
    "0.0.0.0".to_string()
}

fn default_listen_port() -> u16 {
    8080
}

fn default_interval_secs() -> u64 {
    5
}

fn default_timeout_secs() -> u64 {
    5
}

fn default_health_path() -> String {
    "/health".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

fn default_admission() -> HashMap<String, String> {
    HashMap::from([("algo".to_string(), "dummy".to_string())])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(endpoints: &[&str]) -> Config {
        Config {
            listen: ListenConfig::default(),
            endpoints: endpoints.iter().map(|s| s.to_string()).collect(),
            health_check: HealthCheckConfig::default(),
            admission: default_admission(),
            metrics: MetricsConfig::default(),
        }
    }

    #[test]
    fn test_endpoint_defaults_to_http() {
        let addr: EndpointAddr = "localhost:8081".parse().unwrap();
        assert_eq!(addr.scheme, "http");
        assert_eq!(addr.host, "localhost");
        assert_eq!(addr.port, 8081);
        assert_eq!(addr.to_string(), "http://localhost:8081");
    }

    #[test]
    fn test_endpoint_with_scheme() {
        let addr: EndpointAddr = "HTTPS://api.internal:8443".parse().unwrap();
        assert_eq!(addr.scheme, "https");
        assert_eq!(addr.host, "api.internal");
        assert_eq!(addr.port, 8443);
    }

    #[test]
    fn test_bracketed_ipv6_endpoint() {
        let addr: EndpointAddr = "[::1]:8081".parse().unwrap();
        assert_eq!(addr.host, "[::1]");
        assert_eq!(addr.port, 8081);
    }

    #[test]
    fn test_unresolvable_endpoint_fails_validation() {
        let config = config_with(&["localhost:8081", "user@host:80"]);
        assert!(matches!(config.validate(), Err(ConfigError::InvalidEndpoint(..))));
    }

    #[test]
    fn test_malformed_endpoints_rejected() {
        for raw in [
            "localhost",
            ":8080",
            "localhost:abc",
            "localhost:0",
            "localhost:70000",
            "ftp://localhost:21",
            "local host:80",
            "::1:8080",
            "a<b:80",
            "[::1:80",
            "exa%mple:80",
            "user@host:80",
        ] {
            assert!(
                matches!(raw.parse::<EndpointAddr>(), Err(ConfigError::InvalidEndpoint(..))),
                "{raw} should be rejected"
            );
        }
    }

    #[test]
    fn test_empty_pool_rejected() {
        assert_eq!(config_with(&[]).validate(), Err(ConfigError::NoEndpoints));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let mut config = config_with(&["localhost:8081"]);
        config.health_check.interval_secs = 0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::ZeroDuration("health_check.interval_secs"))
        );
    }

    #[test]
    fn test_health_path_must_be_absolute() {
        let mut config = config_with(&["localhost:8081"]);
        config.health_check.path = "health".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::InvalidHealthPath(_))));
    }

    #[test]
    fn test_yaml_defaults() {
        let yaml = "endpoints:\n  - localhost:8081\n  - localhost:8082\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        config.validate().unwrap();

        assert_eq!(config.listen.address(), "0.0.0.0:8080");
        assert_eq!(config.health_check.interval(), Duration::from_secs(5));
        assert_eq!(config.health_check.path, "/health");
        assert_eq!(config.admission.get("algo").map(String::as_str), Some("dummy"));
        assert!(!config.metrics.enabled);
        assert_eq!(config.endpoint_addrs().unwrap().len(), 2);
    }

    #[test]
    fn test_json_admission_map() {
        let json = r#"{
            "endpoints": ["localhost:8081"],
            "admission": {"algo": "token_bucket", "bucket_capacity": "10", "token_push_interval": "1s"}
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.admission.len(), 3);
        assert_eq!(
            config.admission.get("bucket_capacity").map(String::as_str),
            Some("10")
        );
    }
}
