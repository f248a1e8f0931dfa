//! Pure requirement manipulation: parsing input lines, evaluating markers
//! against a platform environment, and merging two requirements for the
//! same package.

use std::str::FromStr;

use pep440_rs::{Version, VersionSpecifiers};
use pep508_rs::{MarkerEnvironment, Requirement, VersionOrUrl};
use url::Url;

use gannet_normalize::PackageName;

use crate::ResolveError;

/// Parse the free-form requirement text of a compile request: one
/// requirement per line, `#` comments and blank lines skipped. A bare URL
/// line is promoted to a direct-URL requirement named by its `#egg=`
/// fragment.
pub(crate) fn parse_requirements(text: &str) -> Result<Vec<Requirement>, ResolveError> {
    let mut requirements = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let requirement = if line.starts_with("https://") || line.starts_with("http://") {
            let url = Url::parse(line).map_err(|err| ResolveError::BadRequirement {
                line: line.to_string(),
                message: err.to_string(),
            })?;
            let (name, _version) = egg_fragment(&url).ok_or_else(|| {
                ResolveError::BadRequirement {
                    line: line.to_string(),
                    message: "bare URLs need an `#egg=name==version` fragment".to_string(),
                }
            })?;
            Requirement {
                name: name.to_string(),
                extras: None,
                version_or_url: Some(VersionOrUrl::Url(url)),
                marker: None,
            }
        } else {
            Requirement::from_str(line).map_err(|err| ResolveError::BadRequirement {
                line: line.to_string(),
                message: err.to_string(),
            })?
        };
        requirements.push(requirement);
    }
    Ok(requirements)
}

/// Evaluate a requirement's marker against the platform environment.
/// Matching (or markerless) requirements come back stripped of their
/// marker; non-matching ones are dropped.
pub(crate) fn evaluate_marker(
    requirement: Requirement,
    environment: &MarkerEnvironment,
    extras: &[String],
) -> Option<Requirement> {
    if let Some(marker) = &requirement.marker {
        let extras: Vec<&str> = extras.iter().map(String::as_str).collect();
        if !marker.evaluate(environment, &extras) {
            return None;
        }
    }
    Some(Requirement {
        marker: None,
        ..requirement
    })
}

/// Merge two requirements for the same normalized name: intersect
/// specifier sets, union extras, and adopt a URL if either side carries
/// one. Two different URLs, or a URL whose pinned version falls outside the
/// merged specifiers, are incompatible. Markers must have been evaluated
/// away by the caller.
pub(crate) fn merge_requirements(
    a: &Requirement,
    b: &Requirement,
) -> Result<Requirement, ResolveError> {
    debug_assert!(a.marker.is_none() && b.marker.is_none());
    debug_assert_eq!(
        PackageName::new(&a.name).ok(),
        PackageName::new(&b.name).ok(),
    );

    let mut extras: Vec<String> = Vec::new();
    for extra in [&a.extras, &b.extras].into_iter().flatten().flatten() {
        if !extras.contains(extra) {
            extras.push(extra.clone());
        }
    }
    extras.sort();

    let mut url = None;
    let mut specifiers: Vec<pep440_rs::VersionSpecifier> = Vec::new();
    let mut seen: Vec<String> = Vec::new();
    for requirement in [a, b] {
        match &requirement.version_or_url {
            Some(VersionOrUrl::Url(this_url)) => {
                if url.as_ref().is_some_and(|other| other != this_url) {
                    return Err(incompatible(a, b));
                }
                url = Some(this_url.clone());
                // The pinned `#egg=name==version` fragment still
                // participates in the specifier intersection.
                let Some((_, version)) = egg_fragment(this_url) else {
                    return Err(incompatible(a, b));
                };
                push_specifiers(
                    &mut specifiers,
                    &mut seen,
                    &format!("=={version}")
                        .parse::<VersionSpecifiers>()
                        .map_err(|_| incompatible(a, b))?,
                );
            }
            Some(VersionOrUrl::VersionSpecifier(specs)) => {
                push_specifiers(&mut specifiers, &mut seen, specs);
            }
            None => {}
        }
    }

    if let Some(url) = url {
        // A URL pins one exact version; the merged specifiers must accept it.
        let (_, version) = egg_fragment(&url).ok_or_else(|| incompatible(a, b))?;
        let version = Version::from_str(&version).map_err(|_| incompatible(a, b))?;
        let merged: VersionSpecifiers = specifiers.clone().into_iter().collect();
        if !merged.contains(&version) {
            return Err(incompatible(a, b));
        }
        return Ok(Requirement {
            name: a.name.clone(),
            extras: if extras.is_empty() { None } else { Some(extras) },
            version_or_url: Some(VersionOrUrl::Url(url)),
            marker: None,
        });
    }

    let version_or_url = if specifiers.is_empty() {
        None
    } else {
        Some(VersionOrUrl::VersionSpecifier(
            specifiers.into_iter().collect(),
        ))
    };
    Ok(Requirement {
        name: a.name.clone(),
        extras: if extras.is_empty() { None } else { Some(extras) },
        version_or_url,
        marker: None,
    })
}

fn push_specifiers(
    specifiers: &mut Vec<pep440_rs::VersionSpecifier>,
    seen: &mut Vec<String>,
    new: &VersionSpecifiers,
) {
    for specifier in new.iter() {
        let rendered = specifier.to_string();
        if !seen.contains(&rendered) {
            seen.push(rendered);
            specifiers.push(specifier.clone());
        }
    }
}

fn incompatible(a: &Requirement, b: &Requirement) -> ResolveError {
    ResolveError::IncompatibleRequirements {
        requirements: vec![a.to_string(), b.to_string()],
    }
}

/// `(name, version)` from a URL's `#egg=name==version` fragment.
pub(crate) fn egg_fragment(url: &Url) -> Option<(PackageName, String)> {
    let egg = url
        .fragment()?
        .split('&')
        .find_map(|pair| pair.strip_prefix("egg="))?;
    let (name, version) = egg.split_once("==")?;
    let name = PackageName::new(name).ok()?;
    if version.is_empty() {
        return None;
    }
    Some((name, version.to_string()))
}

/// Whether a requirement's specifiers accept the given version.
pub(crate) fn satisfied_by(requirement: &Requirement, version: &Version) -> bool {
    match &requirement.version_or_url {
        Some(VersionOrUrl::VersionSpecifier(specifiers)) => specifiers.contains(version),
        Some(VersionOrUrl::Url(_)) | None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn requirement(line: &str) -> Requirement {
        Requirement::from_str(line).unwrap()
    }

    #[test]
    fn merge_intersects_specifiers() {
        let merged = merge_requirements(&requirement("lib>=2"), &requirement("lib<3")).unwrap();
        let version = Version::from_str("2.1").unwrap();
        let outside = Version::from_str("3.0").unwrap();
        assert!(satisfied_by(&merged, &version));
        assert!(!satisfied_by(&merged, &outside));
    }

    #[test]
    fn merge_unions_extras() {
        let merged =
            merge_requirements(&requirement("lib[foo]>=1"), &requirement("lib[bar]")).unwrap();
        assert_eq!(
            merged.extras,
            Some(vec!["bar".to_string(), "foo".to_string()])
        );
    }

    #[test]
    fn merge_is_idempotent() {
        let a = requirement("lib>=2,<3");
        let merged = merge_requirements(&a, &requirement("lib>=2,<3")).unwrap();
        assert_eq!(merged.to_string(), a.to_string());
    }

    #[test]
    fn merge_adopts_a_compatible_url() {
        let url = requirement("pkg @ https://example.com/pkg-1.0.tar.gz#egg=pkg==1.0");
        let merged = merge_requirements(&url, &requirement("pkg>=0.5")).unwrap();
        assert!(matches!(
            merged.version_or_url,
            Some(VersionOrUrl::Url(_))
        ));
    }

    #[test]
    fn merge_rejects_url_outside_specifiers() {
        let url = requirement("pkg @ https://example.com/pkg-1.0.tar.gz#egg=pkg==1.0");
        let err = merge_requirements(&url, &requirement("pkg==2.0")).unwrap_err();
        assert!(matches!(
            err,
            ResolveError::IncompatibleRequirements { .. }
        ));
    }

    #[test]
    fn merge_rejects_two_different_urls() {
        let a = requirement("pkg @ https://example.com/a.tar.gz#egg=pkg==1.0");
        let b = requirement("pkg @ https://example.com/b.tar.gz#egg=pkg==1.0");
        assert!(merge_requirements(&a, &b).is_err());
    }

    #[test]
    fn markers_filter_against_the_environment() {
        let environment: MarkerEnvironment = serde_json::from_value(serde_json::json!({
            "implementation_name": "cpython",
            "implementation_version": "3.11.6",
            "os_name": "posix",
            "platform_machine": "x86_64",
            "platform_python_implementation": "CPython",
            "platform_release": "",
            "platform_system": "Linux",
            "platform_version": "",
            "python_full_version": "3.11.6",
            "python_version": "3.11",
            "sys_platform": "linux"
        }))
        .unwrap();

        let windows = requirement("pywin32; sys_platform == 'win32'");
        assert!(evaluate_marker(windows, &environment, &[]).is_none());

        let linux = requirement("sdnotify; sys_platform == 'linux'");
        let stripped = evaluate_marker(linux, &environment, &[]).unwrap();
        assert!(stripped.marker.is_none());
    }

    #[test]
    fn parse_lines_with_comments_and_bare_urls() {
        let requirements = parse_requirements(
            "# top-level\napp==1.0\n\nhttps://example.com/pkg-1.0.tar.gz#egg=pkg==1.0\n",
        )
        .unwrap();
        assert_eq!(requirements.len(), 2);
        assert_eq!(requirements[0].name, "app");
        assert!(matches!(
            requirements[1].version_or_url,
            Some(VersionOrUrl::Url(_))
        ));
    }

    #[test]
    fn bare_url_without_egg_is_rejected() {
        let err = parse_requirements("https://example.com/pkg-1.0.tar.gz\n").unwrap_err();
        assert!(matches!(err, ResolveError::BadRequirement { .. }));
    }
}
