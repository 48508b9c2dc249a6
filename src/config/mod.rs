use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;
use url::Url;

use crate::infrastructure::logging::{LogFormat, LogOutput, LoggingConfig};
use crate::infrastructure::network::NetworkConfig;
use crate::storage::{StorageConfig, StorageType};
use crate::sync::{AuthorMergePolicy, SyncConfig, PER_PAGE};

const ENV_PREFIX: &str = "COMMIT_SYNC_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base: String,
    pub owner: String,
    pub repo: String,
    pub per_page: u32,
    /// `sqlite://...`，或 `memory` 表示不落盘
    pub database_url: String,
    pub max_connections: u32,
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub user_agent: Option<String>,
    pub watermark_epsilon_secs: i64,
    pub author_policy: AuthorMergePolicy,
    pub log_level: String,
    pub log_format: String,
    pub log_file: Option<String>,
    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            api_base: "https://api.github.com".to_string(),
            owner: "apple".to_string(),
            repo: "swift".to_string(),
            per_page: PER_PAGE,
            database_url: "sqlite://commits.db".to_string(),
            max_connections: 5,
            request_timeout_secs: 30,
            connect_timeout_secs: 10,
            user_agent: None,
            watermark_epsilon_secs: 1,
            author_policy: AuthorMergePolicy::KeepExisting,
            log_level: "info".to_string(),
            log_format: "compact".to_string(),
            log_file: None,
            debug: false,
        }
    }
}

impl Config {
    /// 按 默认值 → 配置文件 → .env → 环境变量 → 命令行 的顺序加载并校验
    pub fn load(args: &crate::cli::args::Args) -> anyhow::Result<Self> {
        Self::load_from_env_file();
        Self::load_with(args, |key| env::var(key).ok())
    }

    /// 与 `load` 相同，但环境变量从 `lookup` 读取
    pub fn load_with<F>(args: &crate::cli::args::Args, lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match &args.config {
            Some(path) => Self::from_file(path)?,
            None => Config::default(),
        };

        config.load_from_vars(lookup)?;
        config.update_from_args(args)?;
        config.validate()?;

        Ok(config)
    }

    /// 从 TOML 文件加载，未出现的字段取默认值
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn load_from_env_file() {
        // 尝试从用户主目录加载
        if let Ok(home) = env::var("HOME") {
            let user_env_path = PathBuf::from(format!("{}/.commit-sync/.env", home));
            if user_env_path.exists() {
                dotenvy::from_path(user_env_path).ok();
            }
        }

        // 尝试从当前目录加载
        dotenvy::dotenv().ok();
    }

    /// 读取 `COMMIT_SYNC_*` 变量
    pub fn load_from_vars<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = env_var(&lookup, "API_BASE") {
            self.api_base = value;
        }
        if let Some(value) = env_var(&lookup, "OWNER") {
            self.owner = value;
        }
        if let Some(value) = env_var(&lookup, "REPO") {
            self.repo = value;
        }
        if let Some(value) = env_parse(&lookup, "PER_PAGE")? {
            self.per_page = value;
        }
        if let Some(value) = env_var(&lookup, "DATABASE_URL") {
            self.database_url = value;
        }
        if let Some(value) = env_parse(&lookup, "MAX_CONNECTIONS")? {
            self.max_connections = value;
        }
        if let Some(value) = env_parse(&lookup, "REQUEST_TIMEOUT_SECS")? {
            self.request_timeout_secs = value;
        }
        if let Some(value) = env_parse(&lookup, "CONNECT_TIMEOUT_SECS")? {
            self.connect_timeout_secs = value;
        }
        if let Some(value) = env_var(&lookup, "USER_AGENT") {
            self.user_agent = Some(value);
        }
        if let Some(value) = env_parse(&lookup, "WATERMARK_EPSILON_SECS")? {
            self.watermark_epsilon_secs = value;
        }
        if let Some(value) = env_var(&lookup, "AUTHOR_POLICY") {
            self.author_policy = value.parse().map_err(anyhow::Error::msg)?;
        }
        if let Some(value) = env_var(&lookup, "LOG_LEVEL") {
            self.log_level = value;
        }
        if let Some(value) = env_var(&lookup, "LOG_FORMAT") {
            self.log_format = value;
        }
        if let Some(value) = env_var(&lookup, "LOG_FILE") {
            self.log_file = Some(value);
        }
        if let Some(value) = env_parse(&lookup, "DEBUG")? {
            self.debug = value;
        }
        Ok(())
    }

    pub fn update_from_args(&mut self, args: &crate::cli::args::Args) -> anyhow::Result<()> {
        // 命令行参数优先级最高
        if let Some(database) = &args.database {
            self.database_url = database.clone();
        }
        if let Some(repo) = &args.repo {
            let (owner, name) = repo
                .split_once('/')
                .with_context(|| format!("Repository must look like owner/name, got `{}`", repo))?;
            self.owner = owner.to_string();
            self.repo = name.to_string();
        }
        if let Some(api_base) = &args.api_base {
            self.api_base = api_base.clone();
        }
        if let Some(level) = &args.log_level {
            self.log_level = level.clone();
        }
        if let Some(format) = &args.log_format {
            self.log_format = format.clone();
        }
        if let Some(policy) = &args.author_policy {
            self.author_policy = policy.parse().map_err(anyhow::Error::msg)?;
        }
        if args.debug {
            self.debug = true;
        }
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.owner.trim().is_empty() || self.repo.trim().is_empty() {
            anyhow::bail!("Repository owner and name must not be empty. Please set COMMIT_SYNC_OWNER and COMMIT_SYNC_REPO or pass --repo");
        }
        if !(1..=PER_PAGE).contains(&self.per_page) {
            anyhow::bail!("per_page must be between 1 and {}, got {}", PER_PAGE, self.per_page);
        }
        if self.watermark_epsilon_secs <= 0 {
            anyhow::bail!(
                "watermark_epsilon_secs must be positive, got {}",
                self.watermark_epsilon_secs
            );
        }
        if self.max_connections == 0 {
            anyhow::bail!("max_connections must be at least 1");
        }
        Url::parse(&self.api_base).with_context(|| format!("Invalid api_base `{}`", self.api_base))?;
        LogFormat::from_str(&self.log_format)?;
        self.level()?;
        Ok(())
    }

    fn level(&self) -> anyhow::Result<Level> {
        if self.debug {
            return Ok(Level::DEBUG);
        }
        Level::from_str(&self.log_level)
            .map_err(|_| anyhow::anyhow!("Unsupported log level: {}", self.log_level))
    }

    pub fn network_config(&self) -> NetworkConfig {
        let mut network = NetworkConfig {
            timeout: Duration::from_secs(self.request_timeout_secs),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            ..NetworkConfig::default()
        };
        if let Some(user_agent) = &self.user_agent {
            network.user_agent = user_agent.clone();
        }
        network
    }

    pub fn storage_config(&self) -> StorageConfig {
        let provider = if self.database_url == "memory" || self.database_url.starts_with("memory:") {
            StorageType::Memory
        } else {
            StorageType::SQLite
        };

        StorageConfig {
            provider,
            connection_string: self.database_url.clone(),
            max_connections: self.max_connections,
        }
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            watermark_epsilon: chrono::Duration::seconds(self.watermark_epsilon_secs),
            author_policy: self.author_policy,
        }
    }

    pub fn logging_config(&self) -> anyhow::Result<LoggingConfig> {
        Ok(LoggingConfig {
            level: self.level()?,
            format: LogFormat::from_str(&self.log_format)?,
            output: match &self.log_file {
                Some(path) => LogOutput::File(path.clone()),
                None => LogOutput::Stderr,
            },
            include_file_location: self.debug,
            ..LoggingConfig::default()
        })
    }
}

fn env_var(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(&format!("{}{}", ENV_PREFIX, key))
}

fn env_parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_var(lookup, key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("Invalid value for {}{}: {}", ENV_PREFIX, key, e)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::args::Args;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_config_defaults() {
        let config = Config::default();
        assert_eq!(config.api_base, "https://api.github.com");
        assert_eq!(config.owner, "apple");
        assert_eq!(config.repo, "swift");
        assert_eq!(config.per_page, 100);
        assert_eq!(config.author_policy, AuthorMergePolicy::KeepExisting);
        assert!(config.validate().is_ok());
        assert_eq!(config.storage_config().provider, StorageType::SQLite);
    }

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_config_from_env() {
        let mut config = Config::default();
        config
            .load_from_vars(vars(&[
                ("COMMIT_SYNC_OWNER", "rust-lang"),
                ("COMMIT_SYNC_WATERMARK_EPSILON_SECS", "5"),
                ("COMMIT_SYNC_AUTHOR_POLICY", "prefer-incoming-email"),
                ("OWNER", "ignored-without-prefix"),
            ]))
            .unwrap();

        assert_eq!(config.owner, "rust-lang");
        assert_eq!(config.watermark_epsilon_secs, 5);
        assert_eq!(config.author_policy, AuthorMergePolicy::PreferIncomingEmail);
        assert_eq!(config.sync_config().watermark_epsilon, chrono::Duration::seconds(5));

        let mut config = Config::default();
        assert!(config
            .load_from_vars(vars(&[("COMMIT_SYNC_PER_PAGE", "many")]))
            .is_err());
    }

    #[test]
    fn test_load_layers_file_env_and_args() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "owner = \"octocat\"\nrepo = \"hello\"\nper_page = 50").unwrap();

        let args = Args {
            config: Some(file.path().to_path_buf()),
            api_base: Some("http://localhost:8080".to_string()),
            ..Args::default()
        };
        let config = Config::load_with(
            &args,
            vars(&[
                ("COMMIT_SYNC_OWNER", "rust-lang"),
                ("COMMIT_SYNC_API_BASE", "https://ghe.example.com/api/v3"),
            ]),
        )
        .unwrap();

        // 环境变量覆盖文件，命令行覆盖环境变量
        assert_eq!(config.owner, "rust-lang");
        assert_eq!(config.repo, "hello");
        assert_eq!(config.per_page, 50);
        assert_eq!(config.api_base, "http://localhost:8080");

        let invalid = Config::load_with(&args, vars(&[("COMMIT_SYNC_PER_PAGE", "0")]));
        assert!(invalid.is_err());
    }

    #[test]
    fn test_config_from_file_and_args() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "owner = \"octocat\"\nper_page = 50\ndatabase_url = \"memory\"").unwrap();

        let mut config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.owner, "octocat");
        assert_eq!(config.per_page, 50);
        assert_eq!(config.repo, "swift");
        assert_eq!(config.storage_config().provider, StorageType::Memory);

        let args = Args {
            repo: Some("tokio-rs/tokio".to_string()),
            debug: true,
            ..Args::default()
        };
        config.update_from_args(&args).unwrap();
        assert_eq!(config.owner, "tokio-rs");
        assert_eq!(config.repo, "tokio");
        assert_eq!(config.logging_config().unwrap().level, Level::DEBUG);

        let bad = Args {
            repo: Some("no-slash".to_string()),
            ..Args::default()
        };
        assert!(config.update_from_args(&bad).is_err());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        config.per_page = 0;
        assert!(config.validate().is_err());
        config.per_page = 100;

        config.watermark_epsilon_secs = 0;
        assert!(config.validate().is_err());
        config.watermark_epsilon_secs = 1;

        config.api_base = "not a url".to_string();
        assert!(config.validate().is_err());
        config.api_base = "https://api.github.com".to_string();

        config.log_format = "xml".to_string();
        assert!(config.validate().is_err());
        config.log_format = "json".to_string();

        config.repo = " ".to_string();
        assert!(config.validate().is_err());
    }
}
