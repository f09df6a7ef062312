use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

/// Default configuration file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "janitor.toml";

/// Prefix for environment overrides, e.g. `JANITOR__STORAGE__DSN`.
pub const ENV_PREFIX: &str = "JANITOR__";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// s3://[access_key:secret_key@]host[:port]/bucket[?region=...]
    pub dsn: String,
    /// Time allowed to establish a connection to the store
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Time allowed for a single API operation, including SDK retries
    #[serde(with = "humantime_serde")]
    pub operation_timeout: Duration,
    /// Attempts the SDK makes per request before giving up
    pub max_attempts: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dsn: String::new(),
            connect_timeout: Duration::from_secs(5),
            operation_timeout: Duration::from_secs(60),
            max_attempts: 3,
        }
    }
}

/// What to do with an upload that vanished between listing and acting on it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingUploadPolicy {
    /// Log it and move on; another writer or cleaner already resolved it.
    #[default]
    Skip,
    /// Fail the whole run.
    Fail,
}

/// Multipart cleanup behaviour.
///
/// Env: JANITOR__CLEANUP__DRY_RUN, JANITOR__CLEANUP__ON_MISSING_UPLOAD,
/// JANITOR__CLEANUP__REPORT_SIZES
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CleanupConfig {
    /// Log uploads that would be aborted without aborting them.
    #[serde(default)]
    pub dry_run: bool,

    #[serde(default)]
    pub on_missing_upload: MissingUploadPolicy,

    /// Walk the parts of each upload to report its size.
    ///
    /// The walk is skipped anyway when INFO logging is disabled.
    #[serde(default = "default_report_sizes")]
    pub report_sizes: bool,
}

fn default_report_sizes() -> bool {
    true
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            on_missing_upload: MissingUploadPolicy::default(),
            report_sizes: default_report_sizes(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Pause between two cleanup passes in watch mode
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3600),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Configuration {
    /// Object storage connection
    pub storage: StorageConfig,
    /// Cleanup behaviour
    pub cleanup: CleanupConfig,
    /// Watch mode scheduling
    pub watch: WatchConfig,
}

impl Configuration {
    pub fn load() -> Result<Self, Box<figment::Error>> {
        Self::figment(Toml::file(DEFAULT_CONFIG_FILE))
            .extract()
            .map_err(Box::new)
    }

    pub fn load_from_path(path: &Path) -> Result<Self, Box<figment::Error>> {
        if !path.is_file() {
            return Err(Box::new(figment::Error::from(format!(
                "configuration file {} does not exist",
                path.display()
            ))));
        }

        Self::figment(Toml::file_exact(path))
            .extract()
            .map_err(Box::new)
    }

    fn figment(file: figment::providers::Data<Toml>) -> Figment {
        Figment::from(Serialized::defaults(Configuration::default()))
            .merge(file)
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate the configuration.
    ///
    /// Checks:
    /// - Storage DSN parses and names a bucket
    /// - Max attempts is positive
    /// - Watch interval is positive
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.storage.dsn.is_empty() {
            anyhow::bail!("storage.dsn cannot be empty");
        }

        crate::storage::S3Location::from_dsn(&self.storage.dsn)?;

        if self.storage.max_attempts == 0 {
            anyhow::bail!(
                "storage.max_attempts must be positive, got {}",
                self.storage.max_attempts
            );
        }

        if self.watch.interval.is_zero() {
            anyhow::bail!("watch.interval must be positive");
        }

        Ok(())
    }

    /// The DSN with any password replaced, for display.
    pub fn redacted_dsn(&self) -> String {
        match url::Url::parse(&self.storage.dsn) {
            Ok(mut url) if url.password().is_some() => {
                // Only fails for cannot-be-a-base URLs, which carry no password.
                let _ = url.set_password(Some("****"));
                url.to_string()
            }
            _ => self.storage.dsn.clone(),
        }
    }
}
