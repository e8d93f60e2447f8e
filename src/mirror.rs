use crate::cache::MirrorCache;
use crate::config::TrustPolicy;
use crate::event::EventContext;
use crate::image_reference::ImageReference;
use crate::oci_registry::{Registry, content_digest};
use anyhow::{Context, Result};
use tracing::{debug, error, info};

/// Resolves a mirrored reference for every candidate and writes it into the
/// candidate's container slot.
///
/// A candidate that cannot be mirrored keeps its original image; the remaining
/// candidates are still processed.
pub async fn mirror(
    mut ctx: EventContext,
    registry: &dyn Registry,
    cache: &MirrorCache,
    policy: &TrustPolicy,
) -> EventContext {
    for candidate in &ctx.candidates {
        let mirrored = match cache.lookup(&candidate.original) {
            Some(mirrored) => {
                info!(
                    "Image {} was mirrored before, reusing {}",
                    candidate.original, mirrored
                );
                mirrored
            }
            None => match mirror_image(&candidate.reference, registry, policy).await {
                Ok(mirrored) => {
                    info!("Image {} mirrored as {}", candidate.original, mirrored);
                    cache.store(candidate.original.clone(), mirrored.clone());
                    mirrored
                }
                Err(e) => {
                    error!("Failed to mirror image {}: {:#}", candidate.original, e);
                    continue;
                }
            },
        };

        ctx.containers[candidate.slot].image = Some(mirrored.clone());
        ctx.resolved.insert(candidate.original.clone(), mirrored);
    }

    debug!(
        "Resolved {} of {} candidates, {} images known to the mirror cache",
        ctx.resolved.len(),
        ctx.candidates.len(),
        cache.len()
    );
    ctx
}

async fn mirror_image(
    source: &ImageReference,
    registry: &dyn Registry,
    policy: &TrustPolicy,
) -> Result<String> {
    let image = registry
        .pull(source)
        .await
        .context("Failed to get remote image")?;
    let digest = content_digest(&image).context("Failed to get image digest")?;
    let target = mirror_target(source, &digest, policy).context("Failed to create a new tag")?;
    registry
        .push(&image, &target)
        .await
        .context("Failed to push image")?;
    Ok(target.to_string())
}

/// `<trusted registry>/<trusted repository>/<image name>:<hex digest>`
pub fn mirror_target(
    source: &ImageReference,
    digest_hex: &str,
    policy: &TrustPolicy,
) -> Result<ImageReference> {
    let name = source.derived_name().with_context(|| {
        format!(
            "Repository {} has no image name below its top-level segment",
            source.repository
        )
    })?;
    let target = format!(
        "{}/{}/{}:{}",
        policy.registry, policy.repository, name, digest_hex
    );
    ImageReference::parse(&target).with_context(|| format!("Invalid target reference {}", target))
}
