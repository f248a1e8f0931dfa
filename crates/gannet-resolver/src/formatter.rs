use std::collections::BTreeSet;

use gannet_normalize::PackageName;

use crate::driver::BuildKey;
use crate::graph::DependencyGraph;

/// Emit a compiled graph as a pinned requirement file: URL requirements
/// first, then `name==version` lines sorted case-insensitively, with
/// `# via` annotations on transitive entries, and "unsafe" packages
/// commented out at the end.
#[derive(Debug, Clone)]
pub struct GraphFormatter {
    unsafe_packages: BTreeSet<PackageName>,
    header_comment: Option<String>,
}

impl Default for GraphFormatter {
    fn default() -> Self {
        let mut unsafe_packages = BTreeSet::new();
        if let Ok(setuptools) = PackageName::new("setuptools") {
            unsafe_packages.insert(setuptools);
        }
        Self {
            unsafe_packages,
            header_comment: None,
        }
    }
}

impl GraphFormatter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the unsafe set (`UNSAFE_PACKAGES`).
    #[must_use]
    pub fn unsafe_packages(mut self, packages: BTreeSet<PackageName>) -> Self {
        self.unsafe_packages = packages;
        self
    }

    #[must_use]
    pub fn header_comment(mut self, comment: impl Into<String>) -> Self {
        self.header_comment = Some(comment.into());
        self
    }

    pub fn format(&self, graph: &DependencyGraph) -> String {
        let mut out = String::new();

        if let Some(comment) = &self.header_comment {
            for line in comment.lines() {
                out.push_str("# ");
                out.push_str(line);
                out.push('\n');
            }
        }

        let mut wrote_url = false;
        for (_, node) in graph.nodes() {
            let Some(build) = &node.build else { continue };
            if !build.is_external() {
                continue;
            }
            if let crate::driver::ResolvedBuild::External(external) = build {
                out.push_str(external.external_url.as_str());
                self.push_via(&mut out, node.declared, &node.required_by);
                out.push('\n');
                wrote_url = true;
            }
        }
        if wrote_url {
            out.push('\n');
        }

        let mut pinned: Vec<(&PackageName, &crate::graph::DependencyNode)> = graph
            .nodes()
            .filter(|(_, node)| {
                node.build.as_ref().is_some_and(|build| !build.is_external())
            })
            .collect();
        pinned.sort_by_key(|(name, _)| name.as_str().to_lowercase());

        let mut unsafe_nodes = Vec::new();
        for (name, node) in pinned {
            if self.unsafe_packages.contains(name) {
                unsafe_nodes.push(node);
                continue;
            }
            let Some(build) = &node.build else { continue };
            out.push_str(&build.pinned());
            self.push_via(&mut out, node.declared, &node.required_by);
            out.push('\n');
        }

        if !unsafe_nodes.is_empty() {
            out.push('\n');
            out.push_str(
                "# The following packages are commented out because they are\n\
                 # considered to be unsafe in a requirements file:\n",
            );
            for node in unsafe_nodes {
                let Some(build) = &node.build else { continue };
                out.push_str("# ");
                out.push_str(&build.pinned());
                self.push_via(&mut out, node.declared, &node.required_by);
                out.push('\n');
            }
        }

        out
    }

    fn push_via(&self, out: &mut String, declared: bool, required_by: &[BuildKey]) {
        if declared || required_by.is_empty() {
            return;
        }
        let mut parents: Vec<&str> = required_by.iter().map(BuildKey::name).collect();
        parents.sort_unstable();
        parents.dedup();
        out.push_str("   # via ");
        out.push_str(&parents.join(", "));
    }
}
