mod file_config;

pub use file_config::{BackendConfig, EventdConfig, ExchangeConfig, FileConfig};

use anyhow::{bail, Result};
use std::path::PathBuf;

/// Default instance-name prefix joining DB records to backend instances.
pub const DEFAULT_BACKEND_PREFIX: &str = "snf-";

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_path: Option<PathBuf>,
    pub backend_url: Option<String>,
    pub backend_username: Option<String>,
    pub backend_password: Option<String>,
    pub backend_prefix: Option<String>,
    pub backend_timeout_sec: u64,
    pub exchange_url: Option<String>,
    pub exchange_vhost: Option<String>,
    pub exchange_name: Option<String>,
    pub exchange_username: Option<String>,
    pub exchange_password: Option<String>,
    pub exchange_timeout_sec: u64,
    pub reconnect_delay_sec: u64,
    pub queue_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    // Core settings
    pub db_path: Option<PathBuf>,
    pub backend_prefix: String,

    // Backend (Ganeti RAPI) settings, required by the reconciler only
    pub backend: Option<BackendSettings>,

    // Message exchange settings
    pub exchange: ExchangeSettings,

    // Event daemon settings
    pub queue_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct BackendSettings {
    pub url: String,
    pub username: String,
    pub password: String,
    pub timeout_sec: u64,
}

#[derive(Debug, Clone)]
pub struct ExchangeSettings {
    pub url: String,
    pub vhost: String,
    pub name: String,
    pub username: String,
    pub password: String,
    pub timeout_sec: u64,
    pub reconnect_delay_sec: u64,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        // TOML overrides CLI for each field
        let db_path = file.db_path.map(PathBuf::from).or_else(|| cli.db_path.clone());

        let backend_prefix = file
            .backend_prefix
            .or_else(|| cli.backend_prefix.clone())
            .unwrap_or_else(|| DEFAULT_BACKEND_PREFIX.to_string());
        if backend_prefix.is_empty() {
            bail!("backend_prefix must not be empty");
        }
        // Without the separating dash, the prefix would match instance
        // names it does not own and mis-scope the orphan repair.
        if !backend_prefix.contains('-') {
            bail!(
                "backend_prefix '{}' must contain the '-' separator (e.g. '{}')",
                backend_prefix,
                DEFAULT_BACKEND_PREFIX
            );
        }

        let backend_file = file.backend.unwrap_or_default();
        let backend = backend_file
            .url
            .or_else(|| cli.backend_url.clone())
            .map(|url| BackendSettings {
                url,
                username: backend_file
                    .username
                    .or_else(|| cli.backend_username.clone())
                    .unwrap_or_default(),
                password: backend_file
                    .password
                    .or_else(|| cli.backend_password.clone())
                    .unwrap_or_default(),
                timeout_sec: backend_file.timeout_sec.unwrap_or(cli.backend_timeout_sec),
            });

        let exchange_file = file.exchange.unwrap_or_default();
        let exchange = ExchangeSettings {
            url: exchange_file
                .url
                .or_else(|| cli.exchange_url.clone())
                .unwrap_or_else(|| "http://localhost:15672".to_string()),
            vhost: exchange_file
                .vhost
                .or_else(|| cli.exchange_vhost.clone())
                .unwrap_or_else(|| "/".to_string()),
            name: exchange_file
                .name
                .or_else(|| cli.exchange_name.clone())
                .unwrap_or_else(|| "ganeti".to_string()),
            username: exchange_file
                .username
                .or_else(|| cli.exchange_username.clone())
                .unwrap_or_else(|| "guest".to_string()),
            password: exchange_file
                .password
                .or_else(|| cli.exchange_password.clone())
                .unwrap_or_else(|| "guest".to_string()),
            timeout_sec: exchange_file.timeout_sec.unwrap_or(cli.exchange_timeout_sec),
            reconnect_delay_sec: exchange_file
                .reconnect_delay_sec
                .unwrap_or(cli.reconnect_delay_sec),
        };

        let eventd_file = file.eventd.unwrap_or_default();
        let queue_dir = eventd_file
            .queue_dir
            .map(PathBuf::from)
            .or_else(|| cli.queue_dir.clone());

        Ok(Self {
            db_path,
            backend_prefix,
            backend,
            exchange,
            queue_dir,
        })
    }

    /// Server database path, required by the reconciler only.
    pub fn db_path(&self) -> Result<&PathBuf> {
        self.db_path
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("db_path must be specified via --db or in config file"))
    }

    /// Backend endpoint settings, required by the reconciler only.
    pub fn backend(&self) -> Result<&BackendSettings> {
        self.backend.as_ref().ok_or_else(|| {
            anyhow::anyhow!("Backend URL must be specified via --backend-url or [backend] url")
        })
    }

    /// Job queue directory, required by the event daemon only.
    pub fn queue_dir(&self) -> Result<&PathBuf> {
        self.queue_dir.as_ref().ok_or_else(|| {
            anyhow::anyhow!("queue_dir must be specified via --queue-dir or [eventd] queue_dir")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_cli() -> CliConfig {
        CliConfig {
            db_path: Some(PathBuf::from("/var/lib/gnt-sync/server.db")),
            backend_url: Some("https://ganeti-master:5080".to_string()),
            backend_username: Some("synnefo".to_string()),
            backend_password: Some("secret".to_string()),
            backend_timeout_sec: 30,
            exchange_timeout_sec: 30,
            reconnect_delay_sec: 5,
            ..Default::default()
        }
    }

    #[test]
    fn test_resolve_cli_only() {
        let config = AppConfig::resolve(&base_cli(), None).unwrap();

        assert_eq!(
            config.db_path().unwrap(),
            &PathBuf::from("/var/lib/gnt-sync/server.db")
        );
        assert_eq!(config.backend_prefix, "snf-");
        let backend = config.backend().unwrap();
        assert_eq!(backend.url, "https://ganeti-master:5080");
        assert_eq!(backend.username, "synnefo");
        assert_eq!(backend.timeout_sec, 30);
        assert_eq!(config.exchange.vhost, "/");
        assert_eq!(config.exchange.name, "ganeti");
        assert_eq!(config.exchange.reconnect_delay_sec, 5);
        assert!(config.queue_dir.is_none());
    }

    #[test]
    fn test_resolve_toml_overrides_cli() {
        let file_config = FileConfig {
            backend_prefix: Some("cloud-".to_string()),
            backend: Some(BackendConfig {
                url: Some("https://other-master:5080".to_string()),
                timeout_sec: Some(10),
                ..Default::default()
            }),
            exchange: Some(ExchangeConfig {
                vhost: Some("synnefo".to_string()),
                reconnect_delay_sec: Some(2),
                ..Default::default()
            }),
            ..Default::default()
        };

        let config = AppConfig::resolve(&base_cli(), Some(file_config)).unwrap();

        // TOML values should override CLI
        assert_eq!(config.backend_prefix, "cloud-");
        let backend = config.backend().unwrap();
        assert_eq!(backend.url, "https://other-master:5080");
        assert_eq!(backend.timeout_sec, 10);
        assert_eq!(config.exchange.vhost, "synnefo");
        assert_eq!(config.exchange.reconnect_delay_sec, 2);
        // CLI value used when TOML doesn't specify
        assert_eq!(backend.username, "synnefo");
    }

    #[test]
    fn test_missing_db_path_surfaces_on_access() {
        let cli = CliConfig {
            backend_url: Some("https://ganeti-master:5080".to_string()),
            ..Default::default()
        };
        let config = AppConfig::resolve(&cli, None).unwrap();
        assert!(config
            .db_path()
            .unwrap_err()
            .to_string()
            .contains("db_path must be specified"));
    }

    #[test]
    fn test_missing_backend_url_surfaces_on_access() {
        let cli = CliConfig {
            db_path: Some(PathBuf::from("/tmp/server.db")),
            ..Default::default()
        };
        let config = AppConfig::resolve(&cli, None).unwrap();
        assert!(config
            .backend()
            .unwrap_err()
            .to_string()
            .contains("Backend URL must be specified"));
    }

    #[test]
    fn test_resolve_rejects_empty_prefix() {
        let file_config = FileConfig {
            backend_prefix: Some(String::new()),
            ..Default::default()
        };
        let result = AppConfig::resolve(&base_cli(), Some(file_config));
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("backend_prefix must not be empty"));
    }

    #[test]
    fn test_resolve_rejects_dashless_prefix() {
        for prefix in ["snf", "cloud"] {
            let file_config = FileConfig {
                backend_prefix: Some(prefix.to_string()),
                ..Default::default()
            };
            let result = AppConfig::resolve(&base_cli(), Some(file_config));
            assert!(
                result
                    .unwrap_err()
                    .to_string()
                    .contains("must contain the '-' separator"),
                "prefix '{}' should be rejected",
                prefix
            );
        }
    }

    #[test]
    fn test_queue_dir_required_for_eventd() {
        let config = AppConfig::resolve(&base_cli(), None).unwrap();
        assert!(config.queue_dir().is_err());

        let mut cli = base_cli();
        cli.queue_dir = Some(PathBuf::from("/var/lib/ganeti/queue"));
        let config = AppConfig::resolve(&cli, None).unwrap();
        assert_eq!(
            config.queue_dir().unwrap(),
            &PathBuf::from("/var/lib/ganeti/queue")
        );
    }

    #[test]
    fn test_file_config_parses_sections() {
        let toml = r#"
            db_path = "/data/server.db"
            backend_prefix = "snf-"

            [backend]
            url = "https://master:5080"
            username = "rapi"
            password = "pw"

            [exchange]
            url = "http://broker:15672"
            name = "ganeti"

            [eventd]
            queue_dir = "/var/lib/ganeti/queue"
        "#;
        let file: FileConfig = toml::from_str(toml).unwrap();
        let config = AppConfig::resolve(&CliConfig::default(), Some(file)).unwrap();

        assert_eq!(config.db_path().unwrap(), &PathBuf::from("/data/server.db"));
        assert_eq!(config.backend().unwrap().url, "https://master:5080");
        assert_eq!(config.exchange.url, "http://broker:15672");
        assert_eq!(
            config.queue_dir().unwrap(),
            &PathBuf::from("/var/lib/ganeti/queue")
        );
    }
}
