use std::str::FromStr;

use pep440_rs::Version;
use pep508_rs::Requirement;
use tracing::trace;

use gannet_normalize::PackageName;
use gannet_store::{BackingIndex, BuildDetail, MetadataStore, Platform};

use crate::requirement::satisfied_by;
use crate::ResolveError;

/// Select the best release for a requirement across an ordered index set:
/// candidates from every index are unioned (first index wins on version
/// ties), iterated in descending version order, and the first
/// non-prerelease version the requirement accepts is materialized as a
/// build placeholder.
pub(crate) async fn find_best_release(
    store: &MetadataStore,
    indexes: &[BackingIndex],
    platform: &Platform,
    requirement: &Requirement,
) -> Result<BuildDetail, ResolveError> {
    let name = PackageName::new(&requirement.name).map_err(|err| {
        ResolveError::BadRequirement {
            line: requirement.to_string(),
            message: err.to_string(),
        }
    })?;

    let mut candidates: Vec<(Version, gannet_store::Release)> = Vec::new();
    for index in indexes {
        let Some(package) = store.package_by_slug(index.id, &name).await? else {
            continue;
        };
        for release in store.releases_for_package(package.id).await? {
            // Versions the version scheme cannot order cannot be compared
            // against the specifiers either; skip them.
            if let Ok(version) = Version::from_str(&release.version) {
                candidates.push((version, release));
            }
        }
    }

    // Stable sort keeps index priority for duplicated versions.
    candidates.sort_by(|(a, _), (b, _)| b.cmp(a));
    candidates.dedup_by(|(a, _), (b, _)| a == b);

    for (version, release) in &candidates {
        if version.any_prerelease() {
            continue;
        }
        if satisfied_by(requirement, version) {
            trace!("selected {} {} for {}", name, release.version, requirement);
            let build = store.get_or_create_build(release.id, platform.id).await?;
            return store.build_detail(build.id).await?.ok_or_else(|| {
                ResolveError::Store(gannet_store::StoreError::NotFound("build"))
            });
        }
    }

    candidates.sort_by(|(a, _), (b, _)| a.cmp(b));
    Err(ResolveError::UnsatisfiedDependency {
        requirement: requirement.to_string(),
        candidates: candidates
            .into_iter()
            .map(|(_, release)| release.version)
            .collect(),
    })
}
