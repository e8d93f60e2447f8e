use std::fmt;

pub const DEFAULT_REGISTRY: &str = "index.docker.io";
const LEGACY_DEFAULT_REGISTRY: &str = "docker.io";
const DEFAULT_TAG: &str = "latest";
const OFFICIAL_REPOSITORY_PREFIX: &str = "library/";
const MAX_TAG_LENGTH: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageReference {
    pub registry: String,
    pub repository: String,
    pub version: Version,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Version {
    Tag(String),
    Digest(String),
}

#[derive(Debug, PartialEq, Eq)]
pub enum ParseError {
    Empty,
    MissingRepository,
    InvalidRepository(String),
    InvalidTag(String),
    InvalidDigest(String),
}

impl std::error::Error for ParseError {}
impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Empty => write!(f, "image reference is empty"),
            ParseError::MissingRepository => write!(f, "repository is missing"),
            ParseError::InvalidRepository(repo) => write!(f, "invalid repository: {}", repo),
            ParseError::InvalidTag(tag) => write!(f, "invalid tag: {}", tag),
            ParseError::InvalidDigest(digest) => write!(f, "invalid digest: {}", digest),
        }
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Version::Tag(tag) => write!(f, "{}/{}:{}", self.registry, self.repository, tag),
            Version::Digest(digest) => {
                write!(f, "{}/{}@{}", self.registry, self.repository, digest)
            }
        }
    }
}

impl ImageReference {
    pub fn parse(s: &str) -> Result<Self, ParseError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ParseError::Empty);
        }

        let (name, version) = match s.split_once('@') {
            Some((name, digest)) => {
                validate_digest(digest)?;
                // `name:tag@digest` pins by digest, the tag is informational only
                let (name, _) = split_tag(name)?;
                (name, Version::Digest(digest.to_string()))
            }
            None => split_tag(s)?,
        };

        // The first component only names a registry when it looks like a host
        let (registry, repository) = match name.split_once('/') {
            Some((host, rest)) if looks_like_registry(host) => (host, rest.to_string()),
            _ => (DEFAULT_REGISTRY, name.to_string()),
        };
        let registry = normalize_registry(registry);

        if repository.is_empty() {
            return Err(ParseError::MissingRepository);
        }
        validate_repository(&repository)?;

        let repository = if registry == DEFAULT_REGISTRY && !repository.contains('/') {
            format!("{}{}", OFFICIAL_REPOSITORY_PREFIX, repository)
        } else {
            repository
        };

        Ok(Self {
            registry: registry.to_string(),
            repository,
            version,
        })
    }

    /// First `/`-separated segment of the repository path.
    pub fn top_level_segment(&self) -> &str {
        self.repository
            .split('/')
            .next()
            .unwrap_or(self.repository.as_str())
    }

    /// Second `/`-separated segment of the repository path, the name a mirrored copy is stored under.
    pub fn derived_name(&self) -> Option<&str> {
        self.repository.split('/').nth(1).filter(|s| !s.is_empty())
    }
}

/// Maps the legacy Docker Hub host onto the one references are parsed to.
pub fn normalize_registry(registry: &str) -> &str {
    match registry {
        LEGACY_DEFAULT_REGISTRY => DEFAULT_REGISTRY,
        other => other,
    }
}

fn split_tag(s: &str) -> Result<(&str, Version), ParseError> {
    // A colon only starts a tag when it follows the last slash, otherwise it is a registry port
    let last_slash = s.rfind('/');
    match s.rfind(':') {
        Some(pos) if last_slash.is_none_or(|slash| pos > slash) => {
            let tag = &s[pos + 1..];
            validate_tag(tag)?;
            Ok((&s[..pos], Version::Tag(tag.to_string())))
        }
        _ => Ok((s, Version::Tag(DEFAULT_TAG.to_string()))),
    }
}

fn looks_like_registry(component: &str) -> bool {
    component.contains('.') || component.contains(':') || component == "localhost"
}

fn validate_repository(repository: &str) -> Result<(), ParseError> {
    let valid = repository.split('/').all(|component| {
        !component.is_empty()
            && component.chars().all(|c| {
                c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-')
            })
    });
    match valid {
        true => Ok(()),
        false => Err(ParseError::InvalidRepository(repository.to_string())),
    }
}

fn validate_tag(tag: &str) -> Result<(), ParseError> {
    let mut chars = tag.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphanumeric() || first == '_')
                && tag.len() <= MAX_TAG_LENGTH
                && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        }
        None => false,
    };
    match valid {
        true => Ok(()),
        false => Err(ParseError::InvalidTag(tag.to_string())),
    }
}

fn validate_digest(digest: &str) -> Result<(), ParseError> {
    let invalid = || ParseError::InvalidDigest(digest.to_string());
    let (algorithm, encoded) = digest.split_once(':').ok_or_else(invalid)?;
    if algorithm.is_empty()
        || encoded.len() < 32
        || !encoded.chars().all(|c| c.is_ascii_hexdigit())
    {
        return Err(invalid());
    }
    Ok(())
}
