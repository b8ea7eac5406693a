use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_HTTP_PORT: u16 = 8020;
pub const DEFAULT_HTTP_BIND: &str = "127.0.0.1";

/// Top-level config (prompter.toml + PROMPTER_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PrompterConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub history: HistoryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_HTTP_PORT,
            bind: DEFAULT_HTTP_BIND.to_string(),
        }
    }
}

/// How many recent turns each history field preloads on context load.
///
/// These map to the storage's last-N subscription windows; explicit key
/// sets and full preloading remain available programmatically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    #[serde(default = "default_window")]
    pub labels: usize,
    #[serde(default = "default_window")]
    pub requests: usize,
    #[serde(default = "default_window")]
    pub responses: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            labels: default_window(),
            requests: default_window(),
            responses: default_window(),
        }
    }
}

impl PrompterConfig {
    /// Load config: explicit path > PROMPTER_CONFIG env > ~/.prompter/prompter.toml.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: PrompterConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("PROMPTER_").split("_"))
            .extract()
            .map_err(|e| crate::error::CoreError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.prompter/prompter.toml", home)
}

fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.prompter/dialogs.db", home)
}

fn default_port() -> u16 {
    DEFAULT_HTTP_PORT
}

fn default_bind() -> String {
    DEFAULT_HTTP_BIND.to_string()
}

fn default_window() -> usize {
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = PrompterConfig::default();
        assert_eq!(config.http.port, DEFAULT_HTTP_PORT);
        assert_eq!(config.history.labels, 1);
        assert_eq!(config.history.requests, 1);
        assert_eq!(config.history.responses, 1);
    }
}
