use std::str::FromStr;

use pep508_rs::{MarkerEnvironment, MarkerTree, Requirement};
use serde::Deserialize;

use gannet_normalize::ExtraName;

use crate::BuildError;

#[derive(Debug, Deserialize)]
struct RunRequires {
    #[serde(default)]
    run_requires: Vec<RequirementGroup>,
}

/// One `run_requires` group of the builder-emitted metadata blob: a list of
/// requirement strings, optionally gated on an extra and/or an environment
/// marker.
#[derive(Debug, Deserialize)]
struct RequirementGroup {
    #[serde(default)]
    extra: Option<String>,
    #[serde(default)]
    environment: Option<String>,
    requires: Vec<String>,
}

/// The runtime requirements a built distribution declares, filtered to the
/// given extras and the platform's marker environment.
///
/// Per-requirement markers are left in place; evaluating them is the
/// resolver's job.
pub fn run_requirements(
    metadata: &serde_json::Value,
    extras: &[String],
    environment: &MarkerEnvironment,
) -> Result<Vec<Requirement>, BuildError> {
    let run_requires: RunRequires = serde_json::from_value(metadata.clone())
        .map_err(|err| BuildError::BadMetadata(err.to_string()))?;

    let extras: Vec<ExtraName> = extras
        .iter()
        .map(|extra| ExtraName::new(extra))
        .collect::<Result<_, _>>()
        .map_err(|err| BuildError::BadMetadata(err.to_string()))?;

    let mut requirements = Vec::new();
    for group in run_requires.run_requires {
        if let Some(extra) = &group.extra {
            let extra = ExtraName::new(extra)
                .map_err(|err| BuildError::BadMetadata(err.to_string()))?;
            if !extras.contains(&extra) {
                continue;
            }
        }
        if let Some(marker) = &group.environment {
            let marker = MarkerTree::from_str(marker)
                .map_err(|err| BuildError::BadMetadata(err.to_string()))?;
            let extra_strs: Vec<&str> = extras.iter().map(ExtraName::as_str).collect();
            if !marker.evaluate(environment, &extra_strs) {
                continue;
            }
        }
        for requirement in &group.requires {
            let requirement = Requirement::from_str(requirement).map_err(|err| {
                BuildError::BadMetadata(format!("bad requirement {requirement:?}: {err}"))
            })?;
            requirements.push(requirement);
        }
    }
    Ok(requirements)
}
