use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use fanout_sfu::{RtcConfiguration, SfuConfig};
use serde::Deserialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;

/// Process configuration, read from unprefixed environment variables
/// (`SFU_ID`, `SIGNAL_SERVER_URL`, `RTC_CONFIG`, ...).
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub sfu_id: String,
    pub signal_server_url: String,
    /// Raw JSON: an `iceServers` array or an object carrying one
    pub rtc_config: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default)]
    pub log_file: Option<String>,
    /// Empty disables the HTTP listener
    #[serde(default = "default_http_addr")]
    pub http_addr: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_http_addr() -> String {
    "0.0.0.0:8080".to_string()
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl AppConfig {
    /// Load configuration with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        Self::load_from(config_file, None)
    }

    /// Like [`AppConfig::load`], reading variables from `env` instead of the
    /// process environment when given.
    pub fn load_from(
        config_file: Option<&str>,
        env: Option<HashMap<String, String>>,
    ) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        builder = builder.add_source(Environment::default().source(env));

        builder.build()?.try_deserialize()
    }

    /// Check values that deserialized but cannot be used.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.sfu_id.trim().is_empty() {
            errors.push("SFU_ID must not be empty".to_string());
        }
        if self.signal_server_url.trim().is_empty() {
            errors.push("SIGNAL_SERVER_URL must not be empty".to_string());
        } else if !self.signal_server_url.starts_with("ws://")
            && !self.signal_server_url.starts_with("wss://")
        {
            errors.push(format!(
                "SIGNAL_SERVER_URL must be a ws:// or wss:// URL, got {}",
                self.signal_server_url
            ));
        }
        if let Err(e) = RtcConfiguration::from_json(&self.rtc_config) {
            errors.push(format!("RTC_CONFIG is not a valid ICE configuration: {e}"));
        }
        if !matches!(self.log_format.as_str(), "json" | "pretty") {
            errors.push(format!("LOG_FORMAT must be json or pretty, got {}", self.log_format));
        }
        if let Err(e) = self.http_address() {
            errors.push(e);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Listener address, or `None` when the listener is disabled
    pub fn http_address(&self) -> Result<Option<SocketAddr>, String> {
        let addr = self.http_addr.trim();
        if addr.is_empty() {
            return Ok(None);
        }
        addr.parse()
            .map(Some)
            .map_err(|e| format!("HTTP_ADDR {addr} is not a socket address: {e}"))
    }

    #[must_use]
    pub fn logging(&self) -> LoggingConfig {
        LoggingConfig {
            level: self.log_level.clone(),
            format: self.log_format.clone(),
            file_path: self.log_file.clone().filter(|path| !path.is_empty()),
        }
    }

    pub fn sfu_config(&self) -> anyhow::Result<SfuConfig> {
        let rtc_configuration = RtcConfiguration::from_json(&self.rtc_config)?;
        Ok(SfuConfig::new(self.sfu_id.trim(), rtc_configuration))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    fn required() -> Vec<(&'static str, &'static str)> {
        vec![
            ("SFU_ID", "sfu-1"),
            ("SIGNAL_SERVER_URL", "wss://signal.example.org"),
            ("RTC_CONFIG", r#"[{"urls":"stun:stun.example.org:3478"}]"#),
        ]
    }

    #[test]
    fn test_load_required_with_defaults() {
        let config = AppConfig::load_from(None, Some(env(&required()))).unwrap();

        assert_eq!(config.sfu_id, "sfu-1");
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_format, "pretty");
        assert!(config.validate().is_ok());
        assert_eq!(
            config.http_address().unwrap(),
            Some("0.0.0.0:8080".parse().unwrap())
        );

        let sfu = config.sfu_config().unwrap();
        assert_eq!(sfu.sfu_id.as_str(), "sfu-1");
        assert_eq!(sfu.rtc_configuration.ice_servers.len(), 1);
    }

    #[test]
    fn test_missing_required_is_error() {
        let mut vars = required();
        vars.retain(|(k, _)| *k != "RTC_CONFIG");

        assert!(AppConfig::load_from(None, Some(env(&vars))).is_err());
    }

    #[test]
    fn test_validate_reports_every_problem() {
        let mut vars = required();
        vars.retain(|(k, _)| *k != "RTC_CONFIG" && *k != "SIGNAL_SERVER_URL");
        vars.push(("RTC_CONFIG", "not json"));
        vars.push(("SIGNAL_SERVER_URL", "http://signal.example.org"));
        vars.push(("HTTP_ADDR", "nowhere"));
        vars.push(("LOG_FORMAT", "xml"));

        let config = AppConfig::load_from(None, Some(env(&vars))).unwrap();
        let errors = config.validate().unwrap_err();

        assert_eq!(errors.len(), 4);
        assert!(errors.iter().any(|e| e.contains("RTC_CONFIG")));
    }

    #[test]
    fn test_empty_http_addr_disables_listener() {
        let mut vars = required();
        vars.push(("HTTP_ADDR", ""));
        vars.push(("LOG_FILE", ""));

        let config = AppConfig::load_from(None, Some(env(&vars))).unwrap();
        assert_eq!(config.http_address().unwrap(), None);
        assert!(config.logging().file_path.is_none());
    }

    #[test]
    fn test_numeric_sfu_id_kept_as_text() {
        let mut vars = required();
        vars.retain(|(k, _)| *k != "SFU_ID");
        vars.push(("SFU_ID", "42"));

        let config = AppConfig::load_from(None, Some(env(&vars))).unwrap();
        assert_eq!(config.sfu_id, "42");
    }
}
