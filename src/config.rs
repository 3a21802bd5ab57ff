use std::env;

use anyhow::{anyhow, Result};

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub network_cap: usize,
    pub websocket_cap: usize,
    pub max_request_bytes: Option<usize>,
    pub log_file: Option<String>,
    pub extension_token: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let port = parse_optional_u64("OBSERVE_PORT")?.unwrap_or(8080) as u16;
        let network_cap = parse_optional_u64("OBSERVE_NETWORK_CAP")?.unwrap_or(500) as usize;
        let websocket_cap = parse_optional_u64("OBSERVE_WEBSOCKET_CAP")?.unwrap_or(500) as usize;
        let max_request_bytes =
            parse_optional_u64("OBSERVE_MAX_REQUEST_BYTES")?.map(|v| v as usize);
        let log_file = env::var("OBSERVE_LOG_FILE").ok();
        let extension_token = env::var("OBSERVE_EXTENSION_TOKEN").ok();

        Ok(Self {
            port,
            network_cap,
            websocket_cap,
            max_request_bytes,
            log_file,
            extension_token,
        })
    }
}

fn parse_optional_u64(var: &str) -> Result<Option<u64>> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| anyhow!("{} must be a positive integer", var)),
        Ok(_) => Ok(None),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use once_cell::sync::Lazy;
    use std::sync::Mutex;

    static ENV_MUTEX: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

    #[test]
    fn parses_environment_defaults() {
        let _guard = ENV_MUTEX.lock().unwrap();
        std::env::remove_var("OBSERVE_PORT");
        std::env::remove_var("OBSERVE_NETWORK_CAP");
        std::env::remove_var("OBSERVE_WEBSOCKET_CAP");
        std::env::remove_var("OBSERVE_MAX_REQUEST_BYTES");
        std::env::remove_var("OBSERVE_LOG_FILE");
        std::env::remove_var("OBSERVE_EXTENSION_TOKEN");

        let cfg = AppConfig::from_env().unwrap();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.network_cap, 500);
        assert_eq!(cfg.websocket_cap, 500);
        assert!(cfg.max_request_bytes.is_none());
        assert!(cfg.log_file.is_none());
    }

    #[test]
    fn parses_full_configuration() {
        let _guard = ENV_MUTEX.lock().unwrap();
        std::env::set_var("OBSERVE_PORT", "9090");
        std::env::set_var("OBSERVE_NETWORK_CAP", "200");
        std::env::set_var("OBSERVE_WEBSOCKET_CAP", "300");
        std::env::set_var("OBSERVE_MAX_REQUEST_BYTES", "65536");
        std::env::set_var("OBSERVE_LOG_FILE", "/tmp/observe.log");
        std::env::set_var("OBSERVE_EXTENSION_TOKEN", "dev-token");

        let cfg = AppConfig::from_env().unwrap();
        assert_eq!(cfg.port, 9090);
        assert_eq!(cfg.network_cap, 200);
        assert_eq!(cfg.websocket_cap, 300);
        assert_eq!(cfg.max_request_bytes, Some(65536));
        assert_eq!(cfg.log_file.as_deref(), Some("/tmp/observe.log"));
        assert_eq!(cfg.extension_token.as_deref(), Some("dev-token"));

        std::env::remove_var("OBSERVE_PORT");
        std::env::remove_var("OBSERVE_NETWORK_CAP");
        std::env::remove_var("OBSERVE_WEBSOCKET_CAP");
        std::env::remove_var("OBSERVE_MAX_REQUEST_BYTES");
        std::env::remove_var("OBSERVE_LOG_FILE");
        std::env::remove_var("OBSERVE_EXTENSION_TOKEN");
    }

    #[test]
    fn rejects_non_numeric_port() {
        let _guard = ENV_MUTEX.lock().unwrap();
        std::env::set_var("OBSERVE_PORT", "not-a-number");
        assert!(AppConfig::from_env().is_err());
        std::env::remove_var("OBSERVE_PORT");
    }
}
