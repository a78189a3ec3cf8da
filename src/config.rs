use anyhow::{Context, Result, anyhow};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const APP_DIR: &str = "rs_mail_sync";

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub imap: ImapConfig,
    pub store: StoreConfig,
    pub sync: SyncConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Security {
    Tls,
    StartTls,
    Plain,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ImapConfig {
    pub host: String,
    pub port: u16,
    pub security: Security,
    pub username: String,
    /// Looked up in the keyring, then prompted for, when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    pub mailbox: String,
    /// Time between the starts of two sync cycles, e.g. "5 minutes".
    pub interval: String,
    pub max_messages: usize,
}

impl Default for ImapConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 993,
            security: Security::Tls,
            username: String::new(),
            password: None,
            mailbox: "INBOX".to_string(),
            interval: "5 minutes".to_string(),
            max_messages: 15_000,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    #[default]
    Sqlite,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct StoreConfig {
    pub engine: Engine,
    /// Database file; defaults to `maildir.db` in the config directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub table: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            engine: Engine::Sqlite,
            path: None,
            table: "message".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct SyncConfig {
    /// How far back each search reaches, e.g. "2 days".
    pub since: String,
    /// IANA zone the search boundary date is computed in.
    pub timezone: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            since: "2 days".to_string(),
            timezone: "Asia/Taipei".to_string(),
        }
    }
}

impl SyncConfig {
    pub fn tz(&self) -> Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|e| anyhow!("invalid timezone {:?}: {e}", self.timezone))
    }
}

fn config_dir() -> Result<PathBuf> {
    Ok(dirs::config_dir()
        .ok_or_else(|| anyhow!("no config dir available"))?
        .join(APP_DIR))
}

pub fn default_config_path() -> Result<PathBuf> {
    let mut p = config_dir()?;
    fs::create_dir_all(&p)?;
    p.push("config.toml");
    Ok(p)
}

pub fn default_db_path() -> Result<PathBuf> {
    let mut p = config_dir()?;
    fs::create_dir_all(&p)?;
    p.push("maildir.db");
    Ok(p)
}

/// Read the config file, writing a template and failing if there is none.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => default_config_path()?,
    };
    if !path.exists() {
        let sample = Config {
            imap: ImapConfig {
                host: "imap.example.com".to_string(),
                username: "you".to_string(),
                ..ImapConfig::default()
            },
            ..Config::default()
        };
        let tom = toml::to_string_pretty(&sample)?;
        fs::write(&path, tom)
            .with_context(|| format!("writing config template to {}", path.display()))?;
        return Err(anyhow!(
            "Created template config at {}, edit it and run again",
            path.display()
        ));
    }
    let s = fs::read_to_string(&path)?;
    parse_config(&s).with_context(|| format!("reading {}", path.display()))
}

pub fn parse_config(s: &str) -> Result<Config> {
    let cfg: Config = toml::from_str(s)?;
    cfg.sync.tz()?;
    if cfg.store.table.is_empty()
        || !cfg
            .store
            .table
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(anyhow!(
            "store.table must be a plain identifier, got {:?}",
            cfg.store.table
        ));
    }
    Ok(cfg)
}

pub fn resolve_db_path(cfg: &StoreConfig) -> Result<PathBuf> {
    if let Some(p) = &cfg.path {
        Ok(PathBuf::from(p))
    } else {
        default_db_path()
    }
}
