//! The project manifest: the Blackboard's root-level singleton describing
//! the project being generated and its layer policy.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

/// One entry in the layer policy: a layer's description and the set of
/// layers its atoms are permitted to depend on (including itself, when the
/// policy allows same-layer dependencies).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerRule {
    pub description: String,
    pub allowed_dependency_layers: BTreeSet<String>,
}

/// Map from layer name to its rule. Typically `Core ⊂ Infrastructure ⊂
/// Presentation`: Core depends on nothing, Infrastructure may depend on
/// Core, Presentation may depend on both.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LayerPolicy {
    pub layers: BTreeMap<String, LayerRule>,
}

impl LayerPolicy {
    /// The conventional three-layer policy used by the worked examples in
    /// the design (§8, scenario 1-2): Core has zero external dependencies,
    /// Infrastructure depends only on Core, Presentation depends on both.
    pub fn standard_three_layer() -> Self {
        let mut layers = BTreeMap::new();
        layers.insert(
            "Core".to_string(),
            LayerRule {
                description: "Pure domain types; zero external dependencies.".to_string(),
                allowed_dependency_layers: BTreeSet::new(),
            },
        );
        layers.insert(
            "Infrastructure".to_string(),
            LayerRule {
                description: "Implementations of Core abstractions.".to_string(),
                allowed_dependency_layers: ["Core".to_string()].into_iter().collect(),
            },
        );
        layers.insert(
            "Presentation".to_string(),
            LayerRule {
                description: "Entry points composing Infrastructure over Core.".to_string(),
                allowed_dependency_layers: ["Core".to_string(), "Infrastructure".to_string()]
                    .into_iter()
                    .collect(),
            },
        );
        Self { layers }
    }

    /// Whether `dependency_layer` is a permitted dependency of `layer`.
    /// Unknown layers are never permitted (fails closed).
    pub fn allows(&self, layer: &str, dependency_layer: &str) -> bool {
        self.layers
            .get(layer)
            .is_some_and(|rule| rule.allowed_dependency_layers.contains(dependency_layer))
    }

    /// Layers ordered from innermost (fewest allowed dependencies) to
    /// outermost, used by the Planner's layer-repair pass to find the next
    /// layer permissive enough to admit a misclassified atom's deps.
    pub fn layers_by_permissiveness(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.layers.keys().map(String::as_str).collect();
        names.sort_by_key(|name| {
            self.layers
                .get(*name)
                .map(|r| r.allowed_dependency_layers.len())
                .unwrap_or(0)
        });
        names
    }

    /// Render the short rules block injected into the Context Assembler's
    /// Global tier, e.g. `"Core has zero external dependencies;
    /// Infrastructure depends only on Core; ..."`.
    pub fn rules_block(&self) -> String {
        self.layers
            .iter()
            .map(|(layer, rule)| {
                if rule.allowed_dependency_layers.is_empty() {
                    format!("{layer} has zero external dependencies")
                } else {
                    let deps: Vec<&str> = rule
                        .allowed_dependency_layers
                        .iter()
                        .map(String::as_str)
                        .collect();
                    format!("{layer} depends only on {}", deps.join(", "))
                }
            })
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectMetadata {
    pub name: String,
    pub root_namespace: String,
    pub target_framework: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectManifest {
    pub metadata: ProjectMetadata,
    pub layer_policy: LayerPolicy,
    /// Reverse index of completed source files, keyed by atom id.
    pub completed_files: BTreeMap<String, PathBuf>,
}

impl ProjectManifest {
    pub fn new(metadata: ProjectMetadata, layer_policy: LayerPolicy) -> Self {
        Self {
            metadata,
            layer_policy,
            completed_files: BTreeMap::new(),
        }
    }

    pub fn record_completed_file(&mut self, atom_id: impl Into<String>, path: PathBuf) {
        self.completed_files.insert(atom_id.into(), path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_policy_core_has_no_deps() {
        let policy = LayerPolicy::standard_three_layer();
        assert!(!policy.allows("Core", "Infrastructure"));
        assert!(!policy.allows("Core", "Core"));
    }

    #[test]
    fn standard_policy_infrastructure_depends_on_core() {
        let policy = LayerPolicy::standard_three_layer();
        assert!(policy.allows("Infrastructure", "Core"));
        assert!(!policy.allows("Infrastructure", "Presentation"));
    }

    #[test]
    fn unknown_layer_fails_closed() {
        let policy = LayerPolicy::standard_three_layer();
        assert!(!policy.allows("Ghost", "Core"));
    }

    #[test]
    fn layers_by_permissiveness_orders_core_first() {
        let policy = LayerPolicy::standard_three_layer();
        let ordered = policy.layers_by_permissiveness();
        assert_eq!(ordered[0], "Core");
        assert_eq!(ordered[2], "Presentation");
    }

    #[test]
    fn rules_block_mentions_every_layer() {
        let policy = LayerPolicy::standard_three_layer();
        let block = policy.rules_block();
        assert!(block.contains("Core has zero external dependencies"));
        assert!(block.contains("Infrastructure depends only on Core"));
    }

    #[test]
    fn manifest_records_completed_files() {
        let mut manifest = ProjectManifest::new(
            ProjectMetadata {
                name: "demo".to_string(),
                root_namespace: "Demo".to_string(),
                target_framework: "net8.0".to_string(),
            },
            LayerPolicy::standard_three_layer(),
        );
        manifest.record_completed_file("a1", PathBuf::from("src/Core/data-shapes/UserDto.cs"));
        assert_eq!(manifest.completed_files.len(), 1);
    }
}
