use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thinkion_core::downloads::DownloadArea;
use thinkion_core::report::AccountDefaults;
use thinkion_runner::download::DownloadWait;
use thinkion_runner::{DriverConfig, PortalCredentials};
use thinkion_worker::SupervisorConfig;

/// A missing or malformed environment variable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{var} is invalid: {reason}")]
    Invalid { var: &'static str, reason: String },
}

/// HTTP server settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `8000`).
    pub port: u16,
    /// Allowed CORS origins from comma-separated `CORS_ORIGINS`; `*` allows any.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// Time given to in-flight jobs once the server stops (default: `30`).
    pub shutdown_timeout_secs: u64,
}

impl ServerConfig {
    fn from_lookup(env: &Lookup<'_>) -> Result<Self, ConfigError> {
        Ok(Self {
            host: env.get("HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: env.parse("PORT", 8000)?,
            cors_origins: env
                .get("CORS_ORIGINS")
                .unwrap_or_else(|| "*".into())
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            request_timeout_secs: env.parse("REQUEST_TIMEOUT_SECS", 30)?,
            shutdown_timeout_secs: env.parse("SHUTDOWN_TIMEOUT_SECS", 30)?,
        })
    }

    /// `true` when any origin is allowed.
    pub fn allows_any_origin(&self) -> bool {
        self.cors_origins.is_empty() || self.cors_origins.iter().any(|o| o == "*")
    }
}

/// Worker pool settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobsConfig {
    pub max_concurrent_jobs: usize,
    pub job_timeout_secs: u64,
    pub cancel_grace_secs: u64,
}

/// Where files go and how long they stay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    pub downloads_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub retain_downloads: bool,
    pub download_wait_secs: u64,
}

/// POS portal account.
#[derive(Clone, PartialEq, Eq)]
pub struct PortalConfig {
    pub url: String,
    pub username: String,
    pub password: String,
    pub account_id: i64,
    pub web_group_selector: String,
}

impl fmt::Debug for PortalConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortalConfig")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("account_id", &self.account_id)
            .field("web_group_selector", &self.web_group_selector)
            .finish()
    }
}

/// Browser driver executable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverCommand {
    pub command: String,
    pub args: Vec<String>,
}

/// Complete service configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub jobs: JobsConfig,
    pub storage: StorageConfig,
    pub portal: PortalConfig,
    pub driver: DriverCommand,
    /// Optional JSON file with the initial report catalog.
    pub reports_config_path: Option<PathBuf>,
}

impl AppConfig {
    /// Load configuration from the process environment.
    ///
    /// | Env Var                  | Default          |
    /// |--------------------------|------------------|
    /// | `HOST`                   | `0.0.0.0`        |
    /// | `PORT`                   | `8000`           |
    /// | `CORS_ORIGINS`           | `*`              |
    /// | `REQUEST_TIMEOUT_SECS`   | `30`             |
    /// | `SHUTDOWN_TIMEOUT_SECS`  | `30`             |
    /// | `MAX_CONCURRENT_JOBS`    | `1`              |
    /// | `JOB_TIMEOUT_SECS`       | `300`            |
    /// | `JOB_CANCEL_GRACE_SECS`  | `10`             |
    /// | `DOWNLOADS_DIR`          | `data/downloads` |
    /// | `LOGS_DIR`               | `data/logs`      |
    /// | `RETAIN_DOWNLOADS`       | `true`           |
    /// | `DOWNLOAD_WAIT_SECS`     | `30`             |
    /// | `POS_URL`                | required         |
    /// | `POS_USERNAME`           | required         |
    /// | `POS_PASSWORD`           | required         |
    /// | `POS_ACCOUNT_ID`         | `1`              |
    /// | `POS_WEB_GROUP_SELECTOR` | required         |
    /// | `DRIVER_COMMAND`         | required         |
    /// | `DRIVER_ARGS`            | empty            |
    /// | `REPORTS_CONFIG_PATH`    | unset            |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup`, which returns the raw value of
    /// a variable if it is set.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Lookup(&lookup);

        let jobs = JobsConfig {
            max_concurrent_jobs: env.parse("MAX_CONCURRENT_JOBS", 1)?,
            job_timeout_secs: env.parse("JOB_TIMEOUT_SECS", 300)?,
            cancel_grace_secs: env.parse("JOB_CANCEL_GRACE_SECS", 10)?,
        };
        if jobs.max_concurrent_jobs == 0 {
            return Err(invalid("MAX_CONCURRENT_JOBS", "must be at least 1"));
        }
        if jobs.job_timeout_secs == 0 {
            return Err(invalid("JOB_TIMEOUT_SECS", "must be at least 1"));
        }

        let storage = StorageConfig {
            downloads_dir: env.get("DOWNLOADS_DIR").unwrap_or_else(|| "data/downloads".into()).into(),
            logs_dir: env.get("LOGS_DIR").unwrap_or_else(|| "data/logs".into()).into(),
            retain_downloads: env.flag("RETAIN_DOWNLOADS", true)?,
            download_wait_secs: env.parse("DOWNLOAD_WAIT_SECS", 30)?,
        };

        let url = env.required("POS_URL")?;
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(invalid("POS_URL", "must start with http:// or https://"));
        }
        let portal = PortalConfig {
            url,
            username: env.required("POS_USERNAME")?,
            password: env.required("POS_PASSWORD")?,
            account_id: env.parse("POS_ACCOUNT_ID", 1)?,
            web_group_selector: env.required("POS_WEB_GROUP_SELECTOR")?,
        };
        if portal.account_id < 1 {
            return Err(invalid("POS_ACCOUNT_ID", "must be a positive integer"));
        }

        let driver = DriverCommand {
            command: env.required("DRIVER_COMMAND")?,
            args: env
                .get("DRIVER_ARGS")
                .map(|args| args.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
        };

        Ok(Self {
            server: ServerConfig::from_lookup(&env)?,
            jobs,
            storage,
            portal,
            driver,
            reports_config_path: env.get("REPORTS_CONFIG_PATH").map(PathBuf::from),
        })
    }

    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            max_concurrent: self.jobs.max_concurrent_jobs,
            job_timeout: Duration::from_secs(self.jobs.job_timeout_secs),
            cancel_grace: Duration::from_secs(self.jobs.cancel_grace_secs),
        }
    }

    pub fn account_defaults(&self) -> AccountDefaults {
        AccountDefaults {
            account_id: self.portal.account_id,
            web_group_selector: self.portal.web_group_selector.clone(),
        }
    }

    pub fn credentials(&self) -> PortalCredentials {
        PortalCredentials {
            login_url: self.portal.url.clone(),
            username: self.portal.username.clone(),
            password: self.portal.password.clone(),
        }
    }

    pub fn driver_config(&self) -> DriverConfig {
        DriverConfig {
            program: self.driver.command.clone(),
            args: self.driver.args.clone(),
            downloads: DownloadArea::new(&self.storage.downloads_dir),
            download_wait: DownloadWait {
                timeout: Duration::from_secs(self.storage.download_wait_secs),
                ..DownloadWait::default()
            },
            retain_downloads: self.storage.retain_downloads,
        }
    }
}

fn invalid(var: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        var,
        reason: reason.into(),
    }
}

/// Typed access to a variable lookup. Blank values count as unset.
struct Lookup<'a>(&'a dyn Fn(&str) -> Option<String>);

impl Lookup<'_> {
    fn get(&self, name: &str) -> Option<String> {
        (self.0)(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, name: &'static str) -> Result<String, ConfigError> {
        self.get(name).ok_or(ConfigError::Missing(name))
    }

    fn parse<T>(&self, name: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match self.get(name) {
            None => Ok(default),
            Some(raw) => raw
                .parse()
                .map_err(|e: T::Err| invalid(name, format!("'{raw}': {e}"))),
        }
    }

    fn flag(&self, name: &'static str, default: bool) -> Result<bool, ConfigError> {
        match self.get(name).map(|v| v.to_ascii_lowercase()).as_deref() {
            None => Ok(default),
            Some("1" | "true" | "yes" | "on") => Ok(true),
            Some("0" | "false" | "no" | "off") => Ok(false),
            Some(other) => Err(invalid(name, format!("'{other}' is not a boolean"))),
        }
    }
}
