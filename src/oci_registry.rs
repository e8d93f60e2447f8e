use crate::credentials::Keychain;
use crate::image_reference::{ImageReference, Version};
use anyhow::{Context, Result};
use async_trait::async_trait;
use oci_distribution::client::{ClientConfig, Config as ImageConfig, ImageLayer};
use oci_distribution::manifest::{self, OciImageManifest};
use oci_distribution::secrets::RegistryAuth;
use oci_distribution::{Client, Reference};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

const ACCEPTED_LAYER_MEDIA_TYPES: [&str; 4] = [
    manifest::IMAGE_LAYER_MEDIA_TYPE,
    manifest::IMAGE_LAYER_GZIP_MEDIA_TYPE,
    manifest::IMAGE_DOCKER_LAYER_TAR_MEDIA_TYPE,
    manifest::IMAGE_DOCKER_LAYER_GZIP_MEDIA_TYPE,
];

/// An image held in memory between pull and push.
#[derive(Clone)]
pub struct PulledImage {
    pub source: ImageReference,
    /// Algorithm-prefixed manifest digest as reported by the source registry.
    pub manifest_digest: Option<String>,
    pub manifest: Option<OciImageManifest>,
    pub layers: Vec<ImageLayer>,
    pub config: Option<ImageConfig>,
}

#[async_trait]
pub trait Registry: Send + Sync {
    async fn pull(&self, reference: &ImageReference) -> Result<PulledImage>;
    async fn push(&self, image: &PulledImage, target: &ImageReference) -> Result<()>;
}

/// Lowercase hex content hash of the image, without the `sha256:` prefix.
pub fn content_digest(image: &PulledImage) -> Result<String> {
    if let Some(digest) = &image.manifest_digest {
        let (_, encoded) = digest
            .split_once(':')
            .with_context(|| format!("Digest {} has no algorithm prefix", digest))?;
        if encoded.is_empty() || !encoded.chars().all(|c| c.is_ascii_hexdigit()) {
            anyhow::bail!("Digest {} is not hex encoded", digest);
        }
        return Ok(encoded.to_ascii_lowercase());
    }

    let manifest = image.manifest.as_ref().with_context(|| {
        format!(
            "Registry returned neither digest nor manifest for {}",
            image.source
        )
    })?;
    let bytes = serde_json::to_vec(manifest).context("Failed to serialize image manifest")?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

pub struct OciRegistry {
    client: Client,
    keychain: Keychain,
}

pub fn create_client(keychain: Keychain) -> OciRegistry {
    info!("Initializing OCI registry client");
    OciRegistry {
        client: Client::new(ClientConfig::default()),
        keychain,
    }
}

impl OciRegistry {
    fn auth_for(&self, registry: &str) -> Result<RegistryAuth> {
        let auth = match self.keychain.resolve(registry)? {
            Some(credentials) => {
                debug!(
                    "Using credentials of user {} for registry {}",
                    credentials.username, registry
                );
                RegistryAuth::Basic(
                    credentials.username,
                    credentials.password.expose_secret().to_string(),
                )
            }
            None => RegistryAuth::Anonymous,
        };
        Ok(auth)
    }
}

#[async_trait]
impl Registry for OciRegistry {
    async fn pull(&self, source: &ImageReference) -> Result<PulledImage> {
        let auth = self.auth_for(&source.registry)?;
        info!("Pulling image {}", source);
        let image = self
            .client
            .pull(
                &to_oci_reference(source),
                &auth,
                ACCEPTED_LAYER_MEDIA_TYPES.to_vec(),
            )
            .await
            .with_context(|| format!("Failed to pull image {}", source))?;

        debug!(
            "Pulled image {} with {} layers and digest {:?}",
            source,
            image.layers.len(),
            image.digest
        );

        Ok(PulledImage {
            source: source.clone(),
            manifest_digest: image.digest,
            manifest: image.manifest,
            layers: image.layers,
            config: Some(image.config),
        })
    }

    async fn push(&self, image: &PulledImage, target: &ImageReference) -> Result<()> {
        let auth = self.auth_for(&target.registry)?;
        let config = image
            .config
            .clone()
            .with_context(|| format!("Image {} has no config blob", image.source))?;

        info!("Pushing image {} as {}", image.source, target);
        let response = self
            .client
            .push(
                &to_oci_reference(target),
                &image.layers,
                config,
                &auth,
                image.manifest.clone(),
            )
            .await
            .with_context(|| format!("Failed to push image {}", target))?;
        debug!("Pushed manifest to {}", response.manifest_url);

        Ok(())
    }
}

fn to_oci_reference(reference: &ImageReference) -> Reference {
    let registry = reference.registry.clone();
    let repository = reference.repository.clone();
    match &reference.version {
        Version::Tag(tag) => Reference::with_tag(registry, repository, tag.clone()),
        Version::Digest(digest) => Reference::with_digest(registry, repository, digest.clone()),
    }
}
