//! Environment variable loading.
//!
//! `.env` files are applied by the binary before this runs, so values here
//! already include them; real environment variables win over `.env`.

use std::env;
use std::str::FromStr;

use crate::core::capture::CapturePolicy;

/// Values read from `VOCATA_*` environment variables. Unset variables are `None`.
#[derive(Debug, Clone, Default)]
pub(crate) struct EnvConfig {
    pub api_url: Option<String>,
    pub ws_url: Option<String>,
    pub token: Option<String>,
    pub connect_timeout_secs: Option<u64>,
    pub reconnect_max_attempts: Option<u32>,
    pub ping_interval_secs: Option<u64>,
    pub capture_policy: Option<CapturePolicy>,
    pub vad_threshold: Option<f32>,
}

impl EnvConfig {
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        Ok(Self {
            api_url: read_string("VOCATA_API_URL"),
            ws_url: read_string("VOCATA_WS_URL"),
            token: read_string("VOCATA_TOKEN"),
            connect_timeout_secs: read_parsed("VOCATA_CONNECT_TIMEOUT_SECS")?,
            reconnect_max_attempts: read_parsed("VOCATA_RECONNECT_MAX_ATTEMPTS")?,
            ping_interval_secs: read_parsed("VOCATA_PING_INTERVAL_SECS")?,
            capture_policy: read_string("VOCATA_CAPTURE_POLICY")
                .map(|value| value.parse::<CapturePolicy>())
                .transpose()
                .map_err(|e| format!("Invalid VOCATA_CAPTURE_POLICY: {e}"))?,
            vad_threshold: read_parsed("VOCATA_VAD_THRESHOLD")?,
        })
    }
}

/// Non-empty, trimmed value of `key`.
fn read_string(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn read_parsed<T>(key: &str) -> Result<Option<T>, Box<dyn std::error::Error>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match read_string(key) {
        Some(value) => value
            .parse::<T>()
            .map(Some)
            .map_err(|e| format!("Invalid {key} '{value}': {e}").into()),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn cleanup_env_vars() {
        unsafe {
            env::remove_var("VOCATA_API_URL");
            env::remove_var("VOCATA_WS_URL");
            env::remove_var("VOCATA_TOKEN");
            env::remove_var("VOCATA_CONNECT_TIMEOUT_SECS");
            env::remove_var("VOCATA_RECONNECT_MAX_ATTEMPTS");
            env::remove_var("VOCATA_PING_INTERVAL_SECS");
            env::remove_var("VOCATA_CAPTURE_POLICY");
            env::remove_var("VOCATA_VAD_THRESHOLD");
        }
    }

    #[test]
    #[serial]
    fn test_env_config_unset() {
        cleanup_env_vars();
        let config = EnvConfig::load().unwrap();
        assert!(config.api_url.is_none());
        assert!(config.token.is_none());
        assert!(config.capture_policy.is_none());
    }

    #[test]
    #[serial]
    fn test_env_config_values() {
        cleanup_env_vars();
        unsafe {
            env::set_var("VOCATA_API_URL", " https://api.example.com ");
            env::set_var("VOCATA_TOKEN", "");
            env::set_var("VOCATA_RECONNECT_MAX_ATTEMPTS", "7");
            env::set_var("VOCATA_CAPTURE_POLICY", "full_utterance");
            env::set_var("VOCATA_VAD_THRESHOLD", "4.5");
        }

        let config = EnvConfig::load().unwrap();
        assert_eq!(config.api_url, Some("https://api.example.com".to_string()));
        assert!(config.token.is_none());
        assert_eq!(config.reconnect_max_attempts, Some(7));
        assert_eq!(config.capture_policy, Some(CapturePolicy::FullUtterance));
        assert_eq!(config.vad_threshold, Some(4.5));

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_env_config_invalid_number() {
        cleanup_env_vars();
        unsafe {
            env::set_var("VOCATA_CONNECT_TIMEOUT_SECS", "soon");
        }

        let err = EnvConfig::load().unwrap_err();
        assert!(err.to_string().contains("VOCATA_CONNECT_TIMEOUT_SECS"));

        cleanup_env_vars();
    }
}
