//! Service configuration.
//!
//! # Purpose
//! Reads settings from `KEYGATE_*` environment variables, then applies an
//! optional YAML override file named by `KEYGATE_CONFIG`.
//!
//! The memory backend is meant for development and tests. Since keys are
//! issued elsewhere, the YAML file's `memory_keys` list is the only way to make
//! keys known to a memory-backed binary; the Postgres backend ignores it.
//!
//! # Security considerations
//! - `KEYGATE_POSTGRES_URL` may carry credentials; it is never logged.
use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;

pub const DEFAULT_BIND: &str = "0.0.0.0:8443";
pub const DEFAULT_METRICS_BIND: &str = "0.0.0.0:8080";
pub const DEFAULT_PG_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_PG_CONNECT_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_PG_ACQUIRE_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Postgres,
}

impl StorageBackend {
    fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StorageBackend::Memory),
            "postgres" | "postgresql" => Ok(StorageBackend::Postgres),
            other => bail!("unknown storage backend: {other}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PostgresConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
}

fn default_max_connections() -> u32 {
    DEFAULT_PG_MAX_CONNECTIONS
}

fn default_connect_timeout_ms() -> u64 {
    DEFAULT_PG_CONNECT_TIMEOUT_MS
}

fn default_acquire_timeout_ms() -> u64 {
    DEFAULT_PG_ACQUIRE_TIMEOUT_MS
}

/// A key registered with the memory backend at startup.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MemoryKey {
    pub workspace_id: String,
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ControlPlaneConfig {
    pub bind_addr: SocketAddr,
    pub metrics_bind: SocketAddr,
    pub storage: StorageBackend,
    pub postgres: Option<PostgresConfig>,
    pub memory_keys: Vec<MemoryKey>,
}

#[derive(Debug, Deserialize)]
struct ControlPlaneConfigOverride {
    bind_addr: Option<String>,
    metrics_bind: Option<String>,
    storage: Option<StorageBackend>,
    postgres: Option<PostgresConfig>,
    memory_keys: Option<Vec<MemoryKey>>,
}

fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(value) => value.trim().parse().with_context(|| format!("parse {key}")),
        Err(_) => Ok(default),
    }
}

impl ControlPlaneConfig {
    pub fn from_env() -> Result<Self> {
        let bind_addr = std::env::var("KEYGATE_BIND")
            .unwrap_or_else(|_| DEFAULT_BIND.to_string())
            .parse()
            .with_context(|| "parse KEYGATE_BIND")?;
        let metrics_bind = std::env::var("KEYGATE_METRICS_BIND")
            .unwrap_or_else(|_| DEFAULT_METRICS_BIND.to_string())
            .parse()
            .with_context(|| "parse KEYGATE_METRICS_BIND")?;
        let storage = match std::env::var("KEYGATE_STORAGE") {
            Ok(value) => StorageBackend::parse(&value).with_context(|| "parse KEYGATE_STORAGE")?,
            Err(_) => StorageBackend::Memory,
        };
        let postgres = match std::env::var("KEYGATE_POSTGRES_URL") {
            Ok(url) => Some(PostgresConfig {
                url,
                max_connections: env_parse(
                    "KEYGATE_POSTGRES_MAX_CONNECTIONS",
                    DEFAULT_PG_MAX_CONNECTIONS,
                )?,
                connect_timeout_ms: env_parse(
                    "KEYGATE_POSTGRES_CONNECT_TIMEOUT_MS",
                    DEFAULT_PG_CONNECT_TIMEOUT_MS,
                )?,
                acquire_timeout_ms: env_parse(
                    "KEYGATE_POSTGRES_ACQUIRE_TIMEOUT_MS",
                    DEFAULT_PG_ACQUIRE_TIMEOUT_MS,
                )?,
            }),
            Err(_) => None,
        };
        Ok(Self {
            bind_addr,
            metrics_bind,
            storage,
            postgres,
            memory_keys: Vec::new(),
        })
    }

    pub fn from_env_or_yaml() -> Result<Self> {
        let mut config = Self::from_env()?;
        if let Ok(path) = std::env::var("KEYGATE_CONFIG") {
            let contents =
                fs::read_to_string(&path).with_context(|| format!("read KEYGATE_CONFIG: {path}"))?;
            config.apply_yaml(&contents)?;
        }
        Ok(config)
    }

    fn apply_yaml(&mut self, contents: &str) -> Result<()> {
        let override_cfg: ControlPlaneConfigOverride =
            serde_yaml::from_str(contents).with_context(|| "parse keygate config yaml")?;
        if let Some(value) = override_cfg.bind_addr {
            self.bind_addr = value.parse().with_context(|| "parse bind_addr")?;
        }
        if let Some(value) = override_cfg.metrics_bind {
            self.metrics_bind = value.parse().with_context(|| "parse metrics_bind")?;
        }
        if let Some(value) = override_cfg.storage {
            self.storage = value;
        }
        if let Some(value) = override_cfg.postgres {
            self.postgres = Some(value);
        }
        if let Some(keys) = override_cfg.memory_keys {
            if let Some(blank) = keys
                .iter()
                .find(|key| key.workspace_id.trim().is_empty() || key.id.trim().is_empty())
            {
                bail!("memory_keys entry needs workspace_id and id: {blank:?}");
            }
            self.memory_keys = keys;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const KEYS: [&str; 8] = [
        "KEYGATE_BIND",
        "KEYGATE_METRICS_BIND",
        "KEYGATE_STORAGE",
        "KEYGATE_POSTGRES_URL",
        "KEYGATE_POSTGRES_MAX_CONNECTIONS",
        "KEYGATE_POSTGRES_CONNECT_TIMEOUT_MS",
        "KEYGATE_POSTGRES_ACQUIRE_TIMEOUT_MS",
        "KEYGATE_CONFIG",
    ];

    fn clear_env() {
        for key in KEYS {
            unsafe {
                std::env::remove_var(key);
            }
        }
    }

    fn set(key: &str, value: &str) {
        unsafe {
            std::env::set_var(key, value);
        }
    }

    #[test]
    #[serial]
    fn defaults_to_memory_backend() {
        clear_env();
        let config = ControlPlaneConfig::from_env().expect("config");
        assert_eq!(config.bind_addr, DEFAULT_BIND.parse().unwrap());
        assert_eq!(config.metrics_bind, DEFAULT_METRICS_BIND.parse().unwrap());
        assert_eq!(config.storage, StorageBackend::Memory);
        assert!(config.postgres.is_none());
    }

    #[test]
    #[serial]
    fn reads_postgres_settings() {
        clear_env();
        set("KEYGATE_STORAGE", "Postgres");
        set("KEYGATE_POSTGRES_URL", "postgres://localhost/keygate");
        set("KEYGATE_POSTGRES_MAX_CONNECTIONS", "4");
        let config = ControlPlaneConfig::from_env().expect("config");
        clear_env();
        assert_eq!(config.storage, StorageBackend::Postgres);
        let pg = config.postgres.expect("postgres");
        assert_eq!(pg.max_connections, 4);
        assert_eq!(pg.acquire_timeout_ms, DEFAULT_PG_ACQUIRE_TIMEOUT_MS);
    }

    #[test]
    #[serial]
    fn rejects_bad_values() {
        clear_env();
        set("KEYGATE_STORAGE", "sqlite");
        assert!(ControlPlaneConfig::from_env().is_err());
        clear_env();
        set("KEYGATE_BIND", "not-an-addr");
        let err = ControlPlaneConfig::from_env().unwrap_err();
        clear_env();
        assert!(err.to_string().contains("KEYGATE_BIND"));
    }

    #[test]
    #[serial]
    fn yaml_overrides_env() {
        clear_env();
        let mut config = ControlPlaneConfig::from_env().expect("config");
        config
            .apply_yaml(
                "bind_addr: 127.0.0.1:9000\nstorage: postgres\npostgres:\n  url: postgres://db/keygate\n",
            )
            .expect("yaml");
        assert_eq!(config.bind_addr, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(config.storage, StorageBackend::Postgres);
        let pg = config.postgres.expect("postgres");
        assert_eq!(pg.url, "postgres://db/keygate");
        assert_eq!(pg.max_connections, DEFAULT_PG_MAX_CONNECTIONS);
        assert!(config.memory_keys.is_empty());
    }

    #[test]
    #[serial]
    fn yaml_lists_memory_keys() {
        clear_env();
        let mut config = ControlPlaneConfig::from_env().expect("config");
        config
            .apply_yaml(
                "memory_keys:\n  - workspace_id: ws_1\n    id: key_1\n    name: primary\n  - workspace_id: ws_2\n    id: key_2\n",
            )
            .expect("yaml");
        assert_eq!(
            config.memory_keys,
            vec![
                MemoryKey {
                    workspace_id: "ws_1".to_string(),
                    id: "key_1".to_string(),
                    name: Some("primary".to_string()),
                },
                MemoryKey {
                    workspace_id: "ws_2".to_string(),
                    id: "key_2".to_string(),
                    name: None,
                },
            ]
        );

        let err = config
            .apply_yaml("memory_keys:\n  - workspace_id: ws_1\n    id: \"  \"\n")
            .unwrap_err();
        assert!(err.to_string().contains("memory_keys"));
        assert_eq!(config.memory_keys.len(), 2);
    }

    #[test]
    #[serial]
    fn yaml_file_is_loaded_from_env_path() {
        clear_env();
        let path = std::env::temp_dir().join(format!("keygate-{}.yaml", std::process::id()));
        fs::write(&path, "metrics_bind: 127.0.0.1:9100\n").expect("write");
        set("KEYGATE_CONFIG", path.to_str().expect("utf8 path"));
        let config = ControlPlaneConfig::from_env_or_yaml().expect("config");
        clear_env();
        let _ = fs::remove_file(&path);
        assert_eq!(config.metrics_bind, "127.0.0.1:9100".parse().unwrap());

        set("KEYGATE_CONFIG", "/nonexistent/keygate.yaml");
        let err = ControlPlaneConfig::from_env_or_yaml().unwrap_err();
        clear_env();
        assert!(err.to_string().contains("KEYGATE_CONFIG"));
    }
}
