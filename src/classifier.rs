use crate::config::TrustPolicy;
use crate::event::{Candidate, EventContext};
use crate::image_reference::ImageReference;
use anyhow::Context;
use tracing::{debug, info};

pub enum Classification {
    /// Nothing to mirror; the event ends here.
    Skipped(EventContext),
    Candidates(EventContext),
}

/// Collects the containers of the watched object and marks every image outside the
/// trusted registry and repository as a candidate for mirroring.
///
/// A malformed image reference fails the whole event before anything was mirrored.
pub fn classify(mut ctx: EventContext, policy: &TrustPolicy) -> anyhow::Result<Classification> {
    if !ctx.change.drives_mirroring() {
        debug!("Skipping {} notification", ctx.change);
        return Ok(Classification::Skipped(ctx));
    }

    let namespace = ctx.namespace();
    if policy.is_excluded(&namespace) {
        debug!(
            "Skipping {} {} in excluded namespace {}",
            ctx.kind(),
            ctx.name(),
            namespace
        );
        return Ok(Classification::Skipped(ctx));
    }

    ctx.containers = ctx.object.containers().to_vec();

    let mut candidates = Vec::new();
    for (slot, container) in ctx.containers.iter().enumerate() {
        let Some(image) = container.image.as_deref() else {
            debug!("Skipping container {} without image", container.name);
            continue;
        };
        let reference = ImageReference::parse(image).with_context(|| {
            format!(
                "Container {} has a malformed image reference '{}'",
                container.name, image
            )
        })?;

        if is_trusted(&reference, policy) {
            debug!(
                "Skipping container {}, image {} is already in {}/{}",
                container.name, reference, policy.registry, policy.repository
            );
            continue;
        }

        info!(
            "Container {} image {} from registry {} needs mirroring",
            container.name, reference.repository, reference.registry
        );
        candidates.push(Candidate {
            slot,
            original: image.to_string(),
            reference,
        });
    }

    if candidates.is_empty() {
        debug!("No containers to mirror");
        return Ok(Classification::Skipped(ctx));
    }
    ctx.candidates = candidates;
    Ok(Classification::Candidates(ctx))
}

fn is_trusted(reference: &ImageReference, policy: &TrustPolicy) -> bool {
    reference.top_level_segment() == policy.repository && reference.registry == policy.registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::event::ChangeKind;
    use crate::image_reference::Version;
    use crate::testing::{daemon_set, deployment, policy};

    fn candidates(classification: Classification) -> EventContext {
        match classification {
            Classification::Candidates(ctx) => ctx,
            Classification::Skipped(_) => panic!("expected candidates"),
        }
    }

    fn skipped(classification: Classification) -> EventContext {
        match classification {
            Classification::Skipped(ctx) => ctx,
            Classification::Candidates(_) => panic!("expected skip"),
        }
    }

    #[test]
    fn test_foreign_repository_is_a_candidate() {
        let object = deployment("web", "shop", &[("nginx", "index.docker.io/someoss/nginx:1.21")]);
        let ctx = EventContext::new(ChangeKind::Added, object.into());

        let ctx = candidates(classify(ctx, &policy()).unwrap());
        assert_eq!(ctx.candidates.len(), 1);
        assert_eq!(ctx.candidates[0].slot, 0);
        assert_eq!(ctx.candidates[0].original, "index.docker.io/someoss/nginx:1.21");
        assert_eq!(ctx.candidates[0].reference.top_level_segment(), "someoss");
    }

    #[test]
    fn test_trusted_image_is_left_alone() {
        let object = deployment("app", "shop", &[("app", "index.docker.io/evkuzin/app:2.0")]);
        let ctx = EventContext::new(ChangeKind::Modified, object.into());

        let ctx = skipped(classify(ctx, &policy()).unwrap());
        assert!(ctx.candidates.is_empty());
        assert_eq!(ctx.containers[0].image.as_deref(), Some("index.docker.io/evkuzin/app:2.0"));
    }

    #[test]
    fn test_trusted_repository_on_other_registry_is_a_candidate() {
        let object = daemon_set("agent", "ops", &[("agent", "quay.io/evkuzin/agent:1.0")]);
        let ctx = EventContext::new(ChangeKind::Added, object.into());

        let ctx = candidates(classify(ctx, &policy()).unwrap());
        assert_eq!(ctx.candidates[0].reference.registry, "quay.io");
    }

    #[test]
    fn test_tag_and_digest_reference_is_a_digest_candidate() {
        let digest = "sha256:5f5dbc2d8b29cd31bc83b2e4ff20a9c2e2a7da7b6b1e8a27b52bbd9a0ee9e0c1";
        let image = format!("nginx:1.21@{}", digest);
        let object = deployment("web", "shop", &[("nginx", image.as_str())]);
        let ctx = EventContext::new(ChangeKind::Added, object.into());

        let ctx = candidates(classify(ctx, &policy()).unwrap());
        assert_eq!(ctx.candidates[0].original, image);
        assert_eq!(ctx.candidates[0].reference.repository, "library/nginx");
        assert_eq!(
            ctx.candidates[0].reference.version,
            Version::Digest(digest.to_string())
        );
    }

    #[test]
    fn test_legacy_docker_hub_trusted_registry_matches_mirrored_images() {
        let config = Config {
            trusted_registry: "docker.io".to_string(),
            ..Config::default()
        };
        let policy = TrustPolicy::from_config(&config).unwrap();
        let object = deployment("web", "shop", &[("nginx", "docker.io/evkuzin/nginx:abc")]);
        let ctx = EventContext::new(ChangeKind::Modified, object.into());

        let ctx = skipped(classify(ctx, &policy).unwrap());
        assert!(ctx.candidates.is_empty());
    }

    #[test]
    fn test_candidates_keep_container_slots() {
        let object = deployment(
            "web",
            "shop",
            &[
                ("a", "index.docker.io/evkuzin/a:1"),
                ("b", "redis:7"),
                ("c", "index.docker.io/evkuzin/c:1"),
                ("d", "ghcr.io/org/d:1"),
            ],
        );
        let ctx = EventContext::new(ChangeKind::Added, object.into());

        let ctx = candidates(classify(ctx, &policy()).unwrap());
        let slots: Vec<_> = ctx.candidates.iter().map(|c| c.slot).collect();
        assert_eq!(slots, vec![1, 3]);
        assert_eq!(ctx.containers.len(), 4);
    }

    #[test]
    fn test_excluded_namespace_never_produces_candidates() {
        let object = deployment("coredns", "kube-system", &[("dns", "someoss/coredns:1.0")]);
        let ctx = EventContext::new(ChangeKind::Added, object.into());

        let ctx = skipped(classify(ctx, &policy()).unwrap());
        assert!(ctx.containers.is_empty());
        assert!(ctx.candidates.is_empty());
    }

    #[test]
    fn test_deleted_notification_is_skipped() {
        let object = deployment("web", "shop", &[("nginx", "someoss/nginx:1.21")]);
        let ctx = EventContext::new(ChangeKind::Deleted, object.into());

        assert!(matches!(
            classify(ctx, &policy()).unwrap(),
            Classification::Skipped(_)
        ));
    }

    #[test]
    fn test_malformed_reference_fails_the_event() {
        let object = deployment(
            "web",
            "shop",
            &[("ok", "someoss/nginx:1.21"), ("bad", "Not A Valid/Image")],
        );
        let ctx = EventContext::new(ChangeKind::Added, object.into());

        let err = classify(ctx, &policy()).err().expect("expected a parse failure");
        assert!(err.to_string().contains("Container bad"));
    }
}
