use serde::Deserialize;
use std::path::PathBuf;

/// Complete YAML configuration structure
///
/// All fields are optional so a file may override only part of the
/// configuration. Values present here take precedence over environment
/// variables.
///
/// # Example YAML structure
/// ```yaml
/// server:
///   api_url: "https://api.vocata.example"
///   ws_url: "wss://api.vocata.example"
///
/// auth:
///   token: "eyJhbGciOi..."
///
/// transport:
///   connect_timeout_secs: 10
///   ping_interval_secs: 30
///   reconnect:
///     enabled: true
///     max_attempts: 5
///     initial_delay_ms: 2000
///
/// capture:
///   policy: "vad_gated"
///   timeslice_ms: 200
///   flush_spacing_ms: 10
///
/// vad:
///   enabled: true
///   volume_threshold: 3.0
///   activation_frames: 2
///   deactivation_frames: 5
///   max_buffered_segments: 5
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub server: Option<ServerYaml>,
    pub auth: Option<AuthYaml>,
    pub transport: Option<TransportYaml>,
    pub capture: Option<CaptureYaml>,
    pub vad: Option<VadYaml>,
}

/// Backend endpoints from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ServerYaml {
    pub api_url: Option<String>,
    /// Defaults to `api_url` with the scheme switched to ws/wss
    pub ws_url: Option<String>,
}

/// Authentication from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AuthYaml {
    pub token: Option<String>,
}

/// Session transport settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TransportYaml {
    pub connect_timeout_secs: Option<u64>,
    /// 0 disables the heartbeat
    pub ping_interval_secs: Option<u64>,
    pub reconnect: Option<ReconnectYaml>,
}

/// Reconnection policy from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ReconnectYaml {
    pub enabled: Option<bool>,
    pub max_attempts: Option<u32>,
    pub initial_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    pub backoff_multiplier: Option<f32>,
    pub jitter: Option<bool>,
}

/// Capture settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct CaptureYaml {
    /// "vad_gated" or "full_utterance"
    pub policy: Option<String>,
    pub timeslice_ms: Option<u32>,
    pub flush_spacing_ms: Option<u64>,
}

/// Voice activity detection settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct VadYaml {
    pub enabled: Option<bool>,
    pub volume_threshold: Option<f32>,
    pub activation_frames: Option<u32>,
    pub deactivation_frames: Option<u32>,
    pub max_buffered_segments: Option<usize>,
}

impl YamlConfig {
    /// Load configuration from a YAML file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or the YAML is malformed.
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {e}", path.display()))?;

        let config: YamlConfig = serde_yaml::from_str(&contents)
            .map_err(|e| format!("Failed to parse YAML config: {e}"))?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_yaml_config_full() {
        let yaml = r#"
server:
  api_url: "https://api.example.com"
  ws_url: "wss://ws.example.com"

auth:
  token: "yaml-token"

transport:
  connect_timeout_secs: 15
  ping_interval_secs: 0
  reconnect:
    enabled: true
    max_attempts: 3
    initial_delay_ms: 500

capture:
  policy: "full_utterance"
  timeslice_ms: 100

vad:
  volume_threshold: 12.5
  activation_frames: 3
"#;

        let config: YamlConfig = serde_yaml::from_str(yaml).unwrap();

        let server = config.server.unwrap();
        assert_eq!(server.api_url, Some("https://api.example.com".to_string()));
        assert_eq!(server.ws_url, Some("wss://ws.example.com".to_string()));
        assert_eq!(config.auth.unwrap().token, Some("yaml-token".to_string()));

        let transport = config.transport.unwrap();
        assert_eq!(transport.connect_timeout_secs, Some(15));
        assert_eq!(transport.ping_interval_secs, Some(0));
        let reconnect = transport.reconnect.unwrap();
        assert_eq!(reconnect.max_attempts, Some(3));
        assert_eq!(reconnect.initial_delay_ms, Some(500));
        assert!(reconnect.max_delay_ms.is_none());

        let capture = config.capture.unwrap();
        assert_eq!(capture.policy, Some("full_utterance".to_string()));
        assert_eq!(capture.timeslice_ms, Some(100));
        assert!(capture.flush_spacing_ms.is_none());

        let vad = config.vad.unwrap();
        assert_eq!(vad.volume_threshold, Some(12.5));
        assert_eq!(vad.activation_frames, Some(3));
        assert!(vad.enabled.is_none());
    }

    #[test]
    fn test_yaml_config_empty() {
        let config: YamlConfig = serde_yaml::from_str("{}").unwrap();
        assert!(config.server.is_none());
        assert!(config.auth.is_none());
        assert!(config.transport.is_none());
        assert!(config.capture.is_none());
        assert!(config.vad.is_none());
    }

    #[test]
    fn test_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        fs::write(&config_path, "server:\n  api_url: \"http://localhost:3000\"\n").unwrap();

        let config = YamlConfig::from_file(&config_path).unwrap();
        assert_eq!(
            config.server.as_ref().unwrap().api_url,
            Some("http://localhost:3000".to_string())
        );
    }

    #[test]
    fn test_from_file_not_found() {
        let path = PathBuf::from("/nonexistent/config.yaml");
        let result = YamlConfig::from_file(&path);

        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Failed to read config file")
        );
    }

    #[test]
    fn test_from_file_invalid_yaml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("invalid.yaml");

        fs::write(&config_path, "invalid: yaml: content:").unwrap();

        let result = YamlConfig::from_file(&config_path);

        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Failed to parse YAML")
        );
    }
}
