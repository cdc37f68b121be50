// src/config/mod.rs
mod models;

pub use models::*;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a file (YAML or JSON)
pub async fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    let contents = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read config file {}", path.display()))?;

    parse_config(&contents, is_yaml(path))
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|s| s.to_str()),
        Some("yaml") | Some("yml")
    )
}

pub fn parse_config(contents: &str, yaml: bool) -> Result<Config> {
    let config: Config = if yaml {
        serde_yaml::from_str(contents).context("Failed to parse YAML config")?
    } else {
        serde_json::from_str(contents).context("Failed to parse JSON config")?
    };

    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yaml_defaults_are_filled_in() {
        let yaml = r#"
backends:
  - name: server1
    url: "http://127.0.0.1:8081"
  - name: server2
    url: "http://127.0.0.1:8082"
health_check:
  interval_secs: 5
"#;
        let config = parse_config(yaml, true).unwrap();
        assert_eq!(config.listen_port, 8080);
        assert_eq!(config.backends.len(), 2);
        assert_eq!(config.backends[1].name, "server2");
        assert_eq!(config.health_check.path, "/healthcheck");
        assert_eq!(config.health_check.timeout_secs, 2);
        assert!(config.health_check.assume_healthy_on_start);
        assert_eq!(config.proxy.request_timeout_secs, 30);
    }

    #[test]
    fn json_config_parses() {
        let json = r#"{
            "listen_port": 9000,
            "backends": [{ "name": "a", "url": "http://localhost:9001" }],
            "health_check": { "interval_secs": 1, "assume_healthy_on_start": false },
            "proxy": { "request_timeout_secs": 3 }
        }"#;
        let config = parse_config(json, false).unwrap();
        assert_eq!(config.listen_port, 9000);
        assert!(!config.health_check.assume_healthy_on_start);
        assert_eq!(config.proxy.request_timeout_secs, 3);
    }

    #[test]
    fn zero_interval_is_rejected() {
        let yaml = r#"
backends:
  - { name: a, url: "http://127.0.0.1:1" }
health_check:
  interval_secs: 0
"#;
        let err = parse_config(yaml, true).unwrap_err();
        assert_eq!(
            err.downcast_ref::<ConfigError>(),
            Some(&ConfigError::NonPositive("health_check.interval_secs"))
        );
    }

    #[test]
    fn empty_backend_list_is_rejected() {
        let yaml = "backends: []\nhealth_check:\n  interval_secs: 1\n";
        let err = parse_config(yaml, true).unwrap_err();
        assert_eq!(err.downcast_ref::<ConfigError>(), Some(&ConfigError::NoBackends));
    }

    #[test]
    fn probe_path_must_be_absolute() {
        let yaml = r#"
backends:
  - { name: a, url: "http://127.0.0.1:1" }
health_check:
  interval_secs: 1
  path: healthcheck
"#;
        let err = parse_config(yaml, true).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::InvalidProbePath(_))
        ));
    }
}
