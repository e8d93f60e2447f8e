use crate::image_reference::normalize_registry;
use anyhow::{Context, Result, anyhow};
use clap::Parser;
use globset::{Glob, GlobSet, GlobSetBuilder};
use regex::Regex;
use serde::Deserialize;
use std::{env, fs, path::Path, path::PathBuf, time::Duration};

/// Command line flags, each of which can also be given through the environment
#[derive(Debug, Parser)]
#[command(version, about)]
pub struct Args {
    /// Path to a YAML configuration file
    #[arg(long, env = "IMAGE_MIRROR_CONFIG")]
    pub config: Option<PathBuf>,
    /// Registry host mirrored images are pushed to
    #[arg(long = "registry", env = "IMAGE_MIRROR_REGISTRY")]
    pub trusted_registry: Option<String>,
    /// Top-level repository mirrored images are pushed under
    #[arg(long = "repository", env = "IMAGE_MIRROR_REPOSITORY")]
    pub trusted_repository: Option<String>,
    /// Logging level (trace, debug, info, warn, error)
    #[arg(long, env = "IMAGE_MIRROR_LOG_LEVEL")]
    pub log_level: Option<String>,
}

impl Args {
    /// Where the configuration came from, reported once logging is up.
    pub fn config_source(&self) -> String {
        match &self.config {
            Some(path) => format!("file {}", path.display()),
            None => "defaults".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    pub trusted_registry: String,
    pub trusted_repository: String,
    pub log_level: String,
    pub excluded_namespaces: Vec<String>,
    pub webserver: Webserver,
    pub commit: Commit,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct Webserver {
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct Commit {
    pub max_attempts: u32,
    pub backoff_millis: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            trusted_registry: "index.docker.io".to_string(),
            trusted_repository: "evkuzin".to_string(),
            log_level: "info".to_string(),
            excluded_namespaces: vec!["kube-system".to_string()],
            webserver: Webserver::default(),
            commit: Commit::default(),
        }
    }
}

impl Default for Webserver {
    fn default() -> Self {
        Self { port: 8080 }
    }
}

impl Default for Commit {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_millis: 10,
        }
    }
}

impl Commit {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_millis)
    }
}

impl Config {
    pub fn from_args(args: &Args) -> Result<Self> {
        let mut config = match &args.config {
            Some(path) => load_config(path)?,
            None => Config::default(),
        };
        if let Some(registry) = &args.trusted_registry {
            config.trusted_registry = registry.clone();
        }
        if let Some(repository) = &args.trusted_repository {
            config.trusted_repository = repository.clone();
        }
        if let Some(level) = &args.log_level {
            config.log_level = level.clone();
        }
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.trusted_registry.is_empty() {
            anyhow::bail!("trustedRegistry must not be empty");
        }
        if self.trusted_repository.is_empty() || self.trusted_repository.contains('/') {
            anyhow::bail!(
                "trustedRepository must be a single path segment, got '{}'",
                self.trusted_repository
            );
        }
        if self.commit.max_attempts == 0 {
            anyhow::bail!("commit.maxAttempts must be at least 1");
        }
        Ok(())
    }
}

/// Where mirrored images live and which namespaces are never touched.
#[derive(Debug, Clone)]
pub struct TrustPolicy {
    pub registry: String,
    pub repository: String,
    excluded_namespaces: GlobSet,
}

impl TrustPolicy {
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in &config.excluded_namespaces {
            let glob = Glob::new(pattern)
                .with_context(|| format!("Invalid excluded namespace pattern '{}'", pattern))?;
            builder.add(glob);
        }
        Ok(Self {
            registry: normalize_registry(&config.trusted_registry).to_string(),
            repository: config.trusted_repository.clone(),
            excluded_namespaces: builder
                .build()
                .context("Failed to compile excluded namespace patterns")?,
        })
    }

    pub fn is_excluded(&self, namespace: &str) -> bool {
        self.excluded_namespaces.is_match(namespace)
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let yaml_str = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

    let expanded = expand_env_vars(&yaml_str)?;

    let config = serde_yaml_ng::from_str(&expanded)
        .context("Failed to parse YAML config after environment variable expansion")?;

    Ok(config)
}

/// Replaces `${VAR}` placeholders with environment variables values.
/// Returns an error naming the first variable that is not set.
fn expand_env_vars(input: &str) -> Result<String> {
    let re =
        Regex::new(r"\$\{([^}]+)}").context("Invalid regex pattern for env var substitution")?;

    let mut missing = None;
    let result = re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        env::var(var_name).unwrap_or_else(|_| {
            missing.get_or_insert_with(|| var_name.to_string());
            String::new()
        })
    });

    match missing {
        Some(var_name) => Err(anyhow!("Missing environment variable: {}", var_name)),
        None => Ok(result.into_owned()),
    }
}
