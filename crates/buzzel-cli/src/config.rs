//! Server configuration.
//!
//! Sources, lowest precedence first: built-in defaults, an optional config
//! file, `BUZZEL_*` environment variables (`BUZZEL_CACHE_DISK_DIR` sets
//! `cache.disk.dir`), then command-line flags.

use buzzel_cache::S3Options;
use ::config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;

/// Default in-memory cache capacity: 64 MiB.
pub const DEFAULT_MAX: u64 = 64 * 1024 * 1024;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub log: LogConfig,
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// Filter directive, e.g. `info` or `buzzel_cache=debug`.
    pub level: String,
    /// Human-readable output; JSON lines otherwise.
    pub pretty: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    pub addr: String,
    /// Capacity of the in-memory cache in bytes.
    pub max: u64,
    pub disk: DiskConfig,
    pub s3: S3Config,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiskConfig {
    pub dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    pub bucket: String,
    #[serde(default)]
    pub endpoint: Option<String>,
}

/// Values given on the command line.
#[derive(Debug, Default)]
pub struct Overrides {
    pub file: Option<PathBuf>,
    pub log_level: Option<String>,
    pub log_pretty: Option<bool>,
    pub addr: Option<String>,
    pub max: Option<u64>,
    pub disk_dir: Option<PathBuf>,
    pub s3_bucket: Option<String>,
    pub s3_endpoint: Option<String>,
}

impl ServerConfig {
    /// Load configuration from every source.
    pub fn load(overrides: &Overrides) -> Result<Self, ConfigError> {
        Self::load_with_env(Environment::with_prefix("BUZZEL").separator("_"), overrides)
    }

    fn load_with_env(env: Environment, overrides: &Overrides) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("log.level", "info")?
            .set_default("log.pretty", true)?
            .set_default("cache.addr", "0.0.0.0:8080")?
            .set_default("cache.max", DEFAULT_MAX.to_string())?
            .set_default("cache.disk.dir", "./")?
            .set_default("cache.s3.bucket", "")?;

        if let Some(file) = &overrides.file {
            builder = builder.add_source(File::from(file.as_path()));
        }

        builder
            .add_source(env)
            .set_override_option("log.level", overrides.log_level.clone())?
            .set_override_option("log.pretty", overrides.log_pretty)?
            .set_override_option("cache.addr", overrides.addr.clone())?
            .set_override_option("cache.max", overrides.max.map(|max| max.to_string()))?
            .set_override_option(
                "cache.disk.dir",
                overrides.disk_dir.as_ref().map(|dir| dir.display().to_string()),
            )?
            .set_override_option("cache.s3.bucket", overrides.s3_bucket.clone())?
            .set_override_option("cache.s3.endpoint", overrides.s3_endpoint.clone())?
            .build()?
            .try_deserialize()
    }

    pub fn s3_options(&self) -> S3Options {
        S3Options {
            bucket: self.cache.s3.bucket.clone(),
            endpoint: self.cache.s3.endpoint.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> Environment {
        let source: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Environment::with_prefix("BUZZEL")
            .separator("_")
            .source(Some(source))
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::load_with_env(env(&[]), &Overrides::default()).unwrap();

        assert_eq!(config.log.level, "info");
        assert!(config.log.pretty);
        assert_eq!(config.cache.addr, "0.0.0.0:8080");
        assert_eq!(config.cache.max, DEFAULT_MAX);
        assert_eq!(config.cache.disk.dir, PathBuf::from("./"));
        assert_eq!(config.cache.s3.bucket, "");
        assert_eq!(config.cache.s3.endpoint, None);
    }

    #[test]
    fn test_environment_overrides_defaults() {
        let vars = [
            ("BUZZEL_CACHE_ADDR", "127.0.0.1:9090"),
            ("BUZZEL_CACHE_MAX", "1024"),
            ("BUZZEL_CACHE_DISK_DIR", "/srv/cache"),
            ("BUZZEL_LOG_PRETTY", "false"),
        ];
        let config = ServerConfig::load_with_env(env(&vars), &Overrides::default()).unwrap();

        assert_eq!(config.cache.addr, "127.0.0.1:9090");
        assert_eq!(config.cache.max, 1024);
        assert_eq!(config.cache.disk.dir, PathBuf::from("/srv/cache"));
        assert!(!config.log.pretty);
    }

    #[test]
    fn test_flags_override_environment() {
        let overrides = Overrides {
            max: Some(0),
            s3_bucket: Some("artifacts".to_string()),
            s3_endpoint: Some("http://localhost:9000".to_string()),
            ..Default::default()
        };
        let vars = [("BUZZEL_CACHE_MAX", "1024"), ("BUZZEL_CACHE_S3_BUCKET", "other")];
        let config = ServerConfig::load_with_env(env(&vars), &overrides).unwrap();

        assert_eq!(config.cache.max, 0);
        let s3 = config.s3_options();
        assert_eq!(s3.bucket, "artifacts");
        assert_eq!(s3.endpoint.as_deref(), Some("http://localhost:9000"));
    }

    #[test]
    fn test_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("buzzel.toml");
        std::fs::write(&path, "[log]\nlevel = \"debug\"\n\n[cache]\nmax = 4096\n").unwrap();

        let overrides = Overrides {
            file: Some(path),
            ..Default::default()
        };
        let config = ServerConfig::load_with_env(env(&[("BUZZEL_CACHE_MAX", "2048")]), &overrides)
            .unwrap();

        assert_eq!(config.log.level, "debug");
        assert_eq!(config.cache.max, 2048);
    }
}
