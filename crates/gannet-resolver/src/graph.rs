//! The dependency graph and its round-based compilation.
//!
//! Nodes live in an ordered arena keyed by normalized package name; referers
//! are remembered by name and pin, never by reference, so removal is always
//! safe. Compilation alternates ADD rounds (select and build every node
//! without a build, folding its requirements back in) and REMOVE rounds
//! (drop nodes that are neither declared nor still required) until a round
//! changes nothing.

use std::fmt::Write;

use indexmap::IndexMap;
use pep508_rs::{MarkerEnvironment, Requirement, VersionOrUrl};
use tracing::debug;

use gannet_build::{run_requirements, ContainerSpec};
use gannet_normalize::PackageName;
use gannet_store::{BackingIndex, MetadataStore, Platform};

use crate::driver::{BuildDriver, BuildKey, ResolvedBuild};
use crate::finder::find_best_release;
use crate::requirement::{evaluate_marker, merge_requirements, parse_requirements};
use crate::ResolveError;

/// Bail out after this many rounds; a well-formed input converges long
/// before.
const MAX_ROUNDS: usize = 50;

#[derive(Debug)]
pub(crate) struct DependencyNode {
    pub(crate) requirement: Requirement,
    pub(crate) build: Option<ResolvedBuild>,
    pub(crate) declared: bool,
    pub(crate) required_by: Vec<BuildKey>,
}

impl DependencyNode {
    /// Fold another requirement into this node. Returns whether the merged
    /// requirement differs from the previous one; if it does, the selected
    /// build is cleared to force re-selection in the next ADD round.
    fn merge(
        &mut self,
        requirement: &Requirement,
        required_by: Option<BuildKey>,
    ) -> Result<bool, ResolveError> {
        let merged = merge_requirements(&self.requirement, requirement)?;
        match required_by {
            Some(key) => {
                if !self.required_by.contains(&key) {
                    self.required_by.push(key);
                }
            }
            None => self.declared = true,
        }

        if merged.to_string() == self.requirement.to_string() {
            return Ok(false);
        }
        self.requirement = merged;
        self.build = None;
        Ok(true)
    }
}

pub struct DependencyGraph<'a> {
    store: &'a MetadataStore,
    driver: &'a dyn BuildDriver,
    indexes: Vec<BackingIndex>,
    platform: Platform,
    environment: MarkerEnvironment,
    nodes: IndexMap<PackageName, DependencyNode>,
    log: String,
}

impl<'a> DependencyGraph<'a> {
    /// The marker environment comes from the platform's container spec.
    pub fn new(
        store: &'a MetadataStore,
        driver: &'a dyn BuildDriver,
        indexes: Vec<BackingIndex>,
        platform: Platform,
    ) -> Result<Self, ResolveError> {
        let environment = ContainerSpec::from_platform(&platform)
            .map_err(|err| ResolveError::Metadata(err.to_string()))?
            .environment;
        Ok(Self {
            store,
            driver,
            indexes,
            platform,
            environment,
            nodes: IndexMap::new(),
            log: String::new(),
        })
    }

    /// The accumulated compilation log, also available after a failure.
    pub fn log(&self) -> &str {
        &self.log
    }

    pub(crate) fn nodes(&self) -> impl Iterator<Item = (&PackageName, &DependencyNode)> {
        self.nodes.iter()
    }

    /// Compile the given requirement text to a pinned transitive closure.
    pub async fn compile(&mut self, requirements: &str) -> Result<(), ResolveError> {
        self.nodes.clear();
        self.log.clear();

        let _ = writeln!(self.log, "Using indexes:");
        for index in &self.indexes {
            let _ = writeln!(self.log, " - {}: {}", index.slug, index.url);
        }
        let _ = writeln!(self.log);

        for requirement in parse_requirements(requirements)? {
            self.add_requirement(requirement)?;
        }

        for round in 1..=MAX_ROUNDS {
            let _ = writeln!(self.log, "ROUND {round}");
            let _ = writeln!(self.log, "Current constraints:");
            let mut constraints: Vec<String> = self
                .nodes
                .values()
                .map(|node| node.requirement.to_string())
                .collect();
            constraints.sort_by_key(|constraint| constraint.to_lowercase());
            for constraint in constraints {
                let _ = writeln!(self.log, "  {constraint}");
            }
            let _ = writeln!(self.log);

            let mut tainted = self.add_round().await?;
            tainted |= self.remove_orphaned();

            let _ = writeln!(self.log, "--------------------------------------------");
            if tainted {
                let _ = writeln!(self.log, "ROUND {round}: not stable\n");
            } else {
                let _ = writeln!(self.log, "ROUND {round}: stable, done\n");
                debug!(rounds = round, nodes = self.nodes.len(), "compiled");
                return Ok(());
            }
        }

        Err(ResolveError::CompilationDidNotConverge { rounds: MAX_ROUNDS })
    }

    /// Seed a top-level requirement, dropping it if its marker does not
    /// match the platform environment.
    fn add_requirement(&mut self, requirement: Requirement) -> Result<(), ResolveError> {
        let Some(requirement) = evaluate_marker(requirement, &self.environment, &[]) else {
            return Ok(());
        };
        self.update_requirement(&requirement, None)?;
        Ok(())
    }

    /// Insert or merge a requirement. Returns whether the graph changed.
    fn update_requirement(
        &mut self,
        requirement: &Requirement,
        required_by: Option<BuildKey>,
    ) -> Result<bool, ResolveError> {
        let name = PackageName::new(&requirement.name).map_err(|err| {
            ResolveError::BadRequirement {
                line: requirement.to_string(),
                message: err.to_string(),
            }
        })?;
        match self.nodes.get_mut(&name) {
            Some(node) => node.merge(requirement, required_by),
            None => {
                let (declared, required_by) = match required_by {
                    Some(key) => (false, vec![key]),
                    None => (true, Vec::new()),
                };
                self.nodes.insert(
                    name,
                    DependencyNode {
                        requirement: requirement.clone(),
                        build: None,
                        declared,
                        required_by,
                    },
                );
                Ok(true)
            }
        }
    }

    /// Select and build every node without a build, folding each build's
    /// requirements back into the graph. Nodes added mid-round wait for the
    /// next round.
    async fn add_round(&mut self) -> Result<bool, ResolveError> {
        let mut tainted = false;
        let _ = writeln!(self.log, "Adding new dependencies:");

        let snapshot: Vec<PackageName> = self.nodes.keys().cloned().collect();
        for name in snapshot {
            let Some(node) = self.nodes.get(&name) else {
                continue;
            };
            if node.build.is_some() {
                continue;
            }

            let requirement = node.requirement.clone();
            let build = match &requirement.version_or_url {
                Some(VersionOrUrl::Url(url)) => {
                    let external = self.driver.build_external(&self.platform, url).await?;
                    ResolvedBuild::External(external)
                }
                _ => {
                    let detail = match find_best_release(
                        self.store,
                        &self.indexes,
                        &self.platform,
                        &requirement,
                    )
                    .await
                    {
                        Ok(detail) => detail,
                        Err(ResolveError::UnsatisfiedDependency {
                            requirement,
                            candidates,
                        }) => {
                            let _ = writeln!(
                                self.log,
                                "Could not find a version that matches {requirement}"
                            );
                            let _ =
                                writeln!(self.log, "Tried: {}", candidates.join(", "));
                            return Err(ResolveError::UnsatisfiedDependency {
                                requirement,
                                candidates,
                            });
                        }
                        Err(err) => return Err(err),
                    };
                    let detail = self.driver.ensure_built(detail).await?;
                    ResolvedBuild::Registry(detail)
                }
            };

            tainted |= self.fold_requirements(&name, build).await?;
        }

        Ok(tainted)
    }

    /// Attach the freshly selected build to its node and merge the
    /// requirements it declares.
    async fn fold_requirements(
        &mut self,
        name: &PackageName,
        build: ResolvedBuild,
    ) -> Result<bool, ResolveError> {
        let extras = self
            .nodes
            .get(name)
            .and_then(|node| node.requirement.extras.clone())
            .unwrap_or_default();
        let key = BuildKey::of(&build);
        let pinned = build.pinned();
        let requirements = run_requirements(build.metadata()?, &extras, &self.environment)
            .map_err(|err| ResolveError::Metadata(err.to_string()))?;

        if let Some(node) = self.nodes.get_mut(name) {
            node.build = Some(build);
        }

        let mut tainted = false;
        for requirement in requirements {
            let Some(requirement) = evaluate_marker(requirement, &self.environment, &extras)
            else {
                continue;
            };
            if self.update_requirement(&requirement, Some(key.clone()))? {
                let _ = writeln!(self.log, "  adding {requirement}\n    from {pinned}");
                tainted = true;
            }
        }
        Ok(tainted)
    }

    /// Drop referers that are no longer represented, then nodes that are
    /// neither declared nor required, repeating until a pass removes
    /// nothing.
    fn remove_orphaned(&mut self) -> bool {
        let mut tainted = false;
        loop {
            let mut removed = false;
            let snapshot: Vec<PackageName> = self.nodes.keys().cloned().collect();
            for name in snapshot {
                let Some(node) = self.nodes.get(&name) else {
                    continue;
                };
                let required_by: Vec<BuildKey> = node
                    .required_by
                    .iter()
                    .filter(|key| self.represents(key))
                    .cloned()
                    .collect();
                if !node.declared && required_by.is_empty() {
                    let _ = writeln!(self.log, "removing {}", node.requirement);
                    self.nodes.shift_remove(&name);
                    removed = true;
                } else if required_by.len() != node.required_by.len() {
                    if let Some(node) = self.nodes.get_mut(&name) {
                        node.required_by = required_by;
                    }
                }
            }
            if !removed {
                break;
            }
            tainted = true;
        }
        tainted
    }

    /// Whether a referer key still stands: its node must exist, and its
    /// selected build (if any) must still match the key's pin.
    fn represents(&self, key: &BuildKey) -> bool {
        let Ok(name) = PackageName::new(key.name()) else {
            return false;
        };
        let Some(node) = self.nodes.get(&name) else {
            return false;
        };
        match (&node.build, key) {
            (None, _) => true,
            (Some(ResolvedBuild::Registry(detail)), BuildKey::Registry { version, .. }) => {
                detail.release.version == *version
            }
            (Some(ResolvedBuild::External(external)), BuildKey::External { url, .. }) => {
                external.external_url.as_str() == url
            }
            _ => false,
        }
    }
}
