use crate::image_reference::DEFAULT_REGISTRY;
use crate::secret_string::SecretString;
use anyhow::{Context, Result};
use base64::Engine;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::{env, fs};
use tracing::debug;

const DOCKER_HUB_ALIASES: [&str; 3] = [
    "https://index.docker.io/v1/",
    "index.docker.io",
    "docker.io",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: SecretString,
}

#[derive(Debug, Default, Deserialize)]
struct DockerConfig {
    #[serde(default)]
    auths: HashMap<String, AuthEntry>,
}

#[derive(Debug, Default, Deserialize)]
struct AuthEntry {
    auth: Option<String>,
    username: Option<String>,
    password: Option<SecretString>,
}

/// Resolves registry credentials the way the docker CLI stores them, so the
/// controller picks up whatever the pod or host has been configured with.
#[derive(Debug, Clone, Default)]
pub struct Keychain {
    config_path: Option<PathBuf>,
}

impl Keychain {
    /// `$DOCKER_CONFIG/config.json`, falling back to `$HOME/.docker/config.json`.
    pub fn from_env() -> Self {
        let config_path = env::var_os("DOCKER_CONFIG")
            .map(PathBuf::from)
            .or_else(|| env::var_os("HOME").map(|home| PathBuf::from(home).join(".docker")))
            .map(|dir| dir.join("config.json"));
        Self { config_path }
    }

    #[cfg(test)]
    pub fn with_config_path(path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: Some(path.into()),
        }
    }

    /// Returns `None` for anonymous access. The config file is re-read on every
    /// call so rotated secrets are picked up without a restart.
    pub fn resolve(&self, registry: &str) -> Result<Option<Credentials>> {
        let Some(path) = self.config_path.as_deref() else {
            return Ok(None);
        };
        if !path.exists() {
            debug!("No docker config at {}, using anonymous access", path.display());
            return Ok(None);
        }
        let config = read_docker_config(path)?;
        lookup(&config, registry)
    }
}

fn read_docker_config(path: &Path) -> Result<DockerConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read docker config {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse docker config {}", path.display()))
}

fn lookup(config: &DockerConfig, registry: &str) -> Result<Option<Credentials>> {
    let mut keys = vec![
        registry.to_string(),
        format!("https://{}", registry),
        format!("https://{}/v1/", registry),
    ];
    if registry == DEFAULT_REGISTRY {
        keys.extend(DOCKER_HUB_ALIASES.iter().map(|alias| alias.to_string()));
    }

    let Some(entry) = keys.iter().find_map(|key| config.auths.get(key)) else {
        return Ok(None);
    };

    if let (Some(username), Some(password)) = (&entry.username, &entry.password) {
        return Ok(Some(Credentials {
            username: username.clone(),
            password: password.clone(),
        }));
    }

    match &entry.auth {
        Some(auth) if !auth.is_empty() => {
            let decoded = base64::engine::general_purpose::STANDARD
                .decode(auth.trim())
                .with_context(|| format!("Invalid base64 auth entry for registry {}", registry))?;
            let decoded = String::from_utf8(decoded)
                .with_context(|| format!("Auth entry for registry {} is not UTF-8", registry))?;
            let (username, password) = decoded.split_once(':').with_context(|| {
                format!("Auth entry for registry {} is not 'user:password'", registry)
            })?;
            Ok(Some(Credentials {
                username: username.to_string(),
                password: SecretString::new(password),
            }))
        }
        _ => Ok(None),
    }
}
