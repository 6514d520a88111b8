use serde::Deserialize;
use std::path::PathBuf;
use std::process::Command;

use crate::markup::RenderOptions;

/// Environment variable consulted when no `api_key_cmd` yields a key.
pub const API_KEY_ENV: &str = "CHATWIDGET_API_KEY";

#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Verbose logging, same as `--debug`.
    pub debug: bool,
    pub endpoint: EndpointConfig,
    pub render: RenderConfig,
    pub history: HistoryConfig,
    pub theme: ThemeConfig,
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct EndpointConfig {
    pub base_url: String,
    pub endpoint_id: String,
    /// Command run via `sh -c` whose stdout is the API key.
    pub api_key_cmd: Option<String>,
    /// Sent comma-joined in the feature-flag header.
    pub feature_flags: Vec<String>,
    /// Request a streamed response.
    pub streaming: bool,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            endpoint_id: "default".to_string(),
            api_key_cmd: None,
            feature_flags: Vec::new(),
            streaming: true,
        }
    }
}

impl EndpointConfig {
    /// Resolve the API key from `api_key_cmd`, then `CHATWIDGET_API_KEY`.
    /// Endpoints may be unauthenticated, so a missing key is not an error.
    pub fn resolve_api_key(&self) -> Option<String> {
        if let Some(cmd) = &self.api_key_cmd {
            match Command::new("sh").arg("-c").arg(cmd).output() {
                Ok(output) if output.status.success() => {
                    let key = String::from_utf8_lossy(&output.stdout).trim().to_string();
                    if !key.is_empty() {
                        return Some(key);
                    }
                }
                Ok(output) => log::warn!("api_key_cmd exited with {}", output.status),
                Err(e) => log::warn!("api_key_cmd failed to run: {e}"),
            }
        }

        std::env::var(API_KEY_ENV).ok().filter(|k| !k.is_empty())
    }
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct RenderConfig {
    /// Escape raw HTML and drop unsafe link schemes.
    pub sanitize: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self { sanitize: true }
    }
}

impl RenderConfig {
    pub fn options(&self) -> RenderOptions {
        RenderOptions {
            sanitize: self.sanitize,
        }
    }
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct HistoryConfig {
    pub enabled: bool,
    /// Custom history file. Defaults to ~/.local/share/chatwidget/history.jsonl.
    pub path: Option<String>,
    /// Messages kept on load and after compaction.
    pub max_messages: usize,
    /// Prior messages sent along with a new prompt.
    pub context_messages: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
            max_messages: 100,
            context_messages: 20,
        }
    }
}

impl HistoryConfig {
    /// Resolve the history file, using the configured path or the XDG default.
    pub fn resolve_path(&self) -> PathBuf {
        if let Some(ref custom) = self.path {
            return PathBuf::from(custom);
        }

        let base = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
                PathBuf::from(home).join(".local").join("share")
            });
        base.join("chatwidget").join("history.jsonl")
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ThemeConfig {
    /// CSS color used for citations and links.
    pub accent_color: String,
    pub dark_mode: bool,
}

impl Default for ThemeConfig {
    fn default() -> Self {
        Self {
            accent_color: "#2563eb".to_string(),
            dark_mode: false,
        }
    }
}

impl Config {
    pub fn load_or_default() -> Self {
        let path = config_path();
        match std::fs::read_to_string(&path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                log::warn!("failed to parse {}: {e}", path.display());
                Config::default()
            }),
            Err(_) => Config::default(),
        }
    }
}

fn config_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("chatwidget").join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let cfg = Config::default();
        assert!(!cfg.debug);
        assert_eq!(cfg.endpoint.base_url, "http://localhost:8080");
        assert!(cfg.endpoint.streaming);
        assert!(cfg.render.sanitize);
        assert!(cfg.history.enabled);
        assert_eq!(cfg.history.max_messages, 100);
        assert_eq!(cfg.history.context_messages, 20);
        assert!(!cfg.theme.dark_mode);
    }

    #[test]
    fn parse_empty_toml() {
        let cfg: Config = toml::from_str("").unwrap();
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn parse_endpoint_config() {
        let toml_str = r#"
debug = true

[endpoint]
base_url = "https://chat.example.com"
endpoint_id = "support"
api_key_cmd = "pass show chat"
feature_flags = ["inline_sources", "beta"]
streaming = false
"#;
        let cfg: Config = toml::from_str(toml_str).unwrap();
        assert!(cfg.debug);
        assert_eq!(cfg.endpoint.base_url, "https://chat.example.com");
        assert_eq!(cfg.endpoint.endpoint_id, "support");
        assert_eq!(cfg.endpoint.api_key_cmd.as_deref(), Some("pass show chat"));
        assert_eq!(cfg.endpoint.feature_flags, vec!["inline_sources", "beta"]);
        assert!(!cfg.endpoint.streaming);
    }

    #[test]
    fn parse_render_and_theme() {
        let toml_str = r##"
[render]
sanitize = false

[theme]
accent_color = "#ff0000"
dark_mode = true
"##;
        let cfg: Config = toml::from_str(toml_str).unwrap();
        assert!(!cfg.render.options().sanitize);
        assert_eq!(cfg.theme.accent_color, "#ff0000");
        assert!(cfg.theme.dark_mode);
    }

    #[test]
    fn parse_history_partial_uses_defaults() {
        let toml_str = r#"
[history]
max_messages = 10
"#;
        let cfg: Config = toml::from_str(toml_str).unwrap();
        assert!(cfg.history.enabled);
        assert_eq!(cfg.history.max_messages, 10);
        assert_eq!(cfg.history.context_messages, 20);
    }

    #[test]
    fn resolve_history_path_custom() {
        let cfg = HistoryConfig {
            path: Some("/custom/history.jsonl".to_string()),
            ..Default::default()
        };
        assert_eq!(cfg.resolve_path(), PathBuf::from("/custom/history.jsonl"));
    }

    #[test]
    fn resolve_history_path_default() {
        let path = HistoryConfig::default().resolve_path();
        assert!(path.to_string_lossy().ends_with("chatwidget/history.jsonl"));
    }

    #[test]
    fn resolve_api_key_from_cmd() {
        let cfg = EndpointConfig {
            api_key_cmd: Some("echo test_key_123".to_string()),
            ..Default::default()
        };
        assert_eq!(cfg.resolve_api_key().as_deref(), Some("test_key_123"));
    }

    #[test]
    fn resolve_api_key_cmd_failure_does_not_panic() {
        let cfg = EndpointConfig {
            api_key_cmd: Some("exit 1".to_string()),
            ..Default::default()
        };
        // Falls back to the environment, which may or may not be set.
        let _ = cfg.resolve_api_key();
    }
}
