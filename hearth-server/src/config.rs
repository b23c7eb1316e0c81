use serde::{Deserialize, Serialize};

/// Server configuration loaded from YAML file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub server: ServerSettings,
    pub export: ExportSettings,
    pub oauth: OauthSettings,
    pub log: LogSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Externally visible base URL; defaults to http://{host}:{port}
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportSettings {
    pub max_concurrent_jobs: usize,
    pub job_ttl_hours: u64,
    /// Path prefix for export status/data URLs
    pub base_path: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OauthSettings {
    pub authorize_url: String,
    pub token_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub level: String,
    /// Bounded request-log channel capacity
    pub request_log_capacity: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            base_url: None,
        }
    }
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 4,
            job_ttl_hours: 24,
            base_path: "/fhir".to_string(),
        }
    }
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            request_log_capacity: 1024,
        }
    }
}

impl ServerConfig {
    /// Load configuration from a YAML file
    pub fn load_from_file(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let config: ServerConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration with priority: env vars > config file > defaults
    pub fn load(config_path: Option<&str>) -> Result<Self, Box<dyn std::error::Error>> {
        let mut config = if let Some(path) = config_path {
            Self::load_from_file(path)?
        } else {
            Self::default()
        };

        if let Ok(port) = std::env::var("HEARTH_PORT")
            && let Ok(port_num) = port.parse()
        {
            config.server.port = port_num;
        }

        if let Ok(host) = std::env::var("HEARTH_HOST") {
            config.server.host = host;
        }

        if let Ok(base_url) = std::env::var("HEARTH_BASE_URL") {
            config.server.base_url = Some(base_url);
        }

        Ok(config)
    }

    /// The externally visible base URL.
    pub fn base_url(&self) -> String {
        self.server.base_url.clone().unwrap_or_else(|| {
            format!("http://{}:{}", self.server.host, self.server.port)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.export.max_concurrent_jobs, 4);
        assert_eq!(config.export.base_path, "/fhir");
        assert!(config.oauth.authorize_url.is_empty());
    }

    #[test]
    fn test_base_url_fallback() {
        let mut config = ServerConfig::default();
        assert_eq!(config.base_url(), "http://0.0.0.0:8080");

        config.server.base_url = Some("https://fhir.example.org".to_string());
        assert_eq!(config.base_url(), "https://fhir.example.org");
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
server:
  host: 127.0.0.1
  port: 9090
export:
  max_concurrent_jobs: 2
oauth:
  authorize_url: https://auth.example.org/authorize
"#;
        let config: ServerConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.export.max_concurrent_jobs, 2);
        // unset sections fall back to defaults
        assert_eq!(config.export.job_ttl_hours, 24);
        assert_eq!(config.oauth.authorize_url, "https://auth.example.org/authorize");
    }
}
