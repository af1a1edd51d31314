// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 shipflow contributors

//! Pipeline graph builder
//!
//! Builds and validates the stage dependency graph for one run: detects
//! cycles and unknown dependencies, produces a deterministic topological
//! order (ties broken by declaration order), and checks the bootstrap
//! policy so a compute service is never declared against an image tag that
//! nothing publishes.

use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;

use crate::errors::ShipflowError;
use crate::pipeline::{BootstrapPolicy, Pipeline};

/// Validated dependency graph of stages, read-only during execution
pub struct PipelineGraph {
    graph: DiGraph<usize, ()>,
    name_to_index: HashMap<String, NodeIndex>,
    index_to_name: HashMap<NodeIndex, String>,
    order: Vec<usize>,
}

impl PipelineGraph {
    /// Build a graph from a pipeline, validating structure and bootstrap
    pub fn build(pipeline: &Pipeline) -> Result<Self, ShipflowError> {
        let mut graph = DiGraph::new();
        let mut name_to_index = HashMap::new();
        let mut index_to_name = HashMap::new();

        // Add all stages as nodes, keyed by declaration index
        for (idx, stage) in pipeline.stages.iter().enumerate() {
            let node = graph.add_node(idx);
            if name_to_index.insert(stage.name.clone(), node).is_some() {
                return Err(ShipflowError::InvalidStage {
                    stage: stage.name.clone(),
                    reason: "duplicate stage name".to_string(),
                });
            }
            index_to_name.insert(node, stage.name.clone());
        }

        // Add dependency edges
        for stage in &pipeline.stages {
            let stage_node = name_to_index[&stage.name];

            for dep_name in &stage.depends_on {
                let dep_node = name_to_index.get(dep_name).ok_or_else(|| {
                    ShipflowError::UnknownDependency {
                        stage: stage.name.clone(),
                        dependency: dep_name.clone(),
                    }
                })?;

                if !graph.contains_edge(*dep_node, stage_node) {
                    graph.add_edge(*dep_node, stage_node, ());
                }
            }
        }

        let order = Self::deterministic_order(&graph, &index_to_name)?;

        let built = Self {
            graph,
            name_to_index,
            index_to_name,
            order,
        };

        built.validate_bootstrap(pipeline)?;

        Ok(built)
    }

    /// Kahn's algorithm, always picking the ready node with the smallest
    /// declaration index. Exactly one order per graph.
    fn deterministic_order(
        graph: &DiGraph<usize, ()>,
        index_to_name: &HashMap<NodeIndex, String>,
    ) -> Result<Vec<usize>, ShipflowError> {
        let mut in_degree: HashMap<NodeIndex, usize> = graph
            .node_indices()
            .map(|n| (n, graph.neighbors_directed(n, petgraph::Direction::Incoming).count()))
            .collect();

        let mut order = Vec::with_capacity(graph.node_count());

        while order.len() < graph.node_count() {
            // Ready node with the smallest declaration index
            let next = graph
                .node_indices()
                .filter(|n| in_degree.get(n) == Some(&0))
                .min_by_key(|n| graph[*n]);

            let Some(next) = next else {
                // No ready node left but nodes remain: everything unvisited
                // sits on a cycle
                let mut stages: Vec<String> = in_degree
                    .iter()
                    .filter(|(_, deg)| **deg > 0)
                    .map(|(n, _)| index_to_name[n].clone())
                    .collect();
                stages.sort();
                return Err(ShipflowError::CycleDetected { stages });
            };

            order.push(graph[next]);
            in_degree.remove(&next);

            for succ in graph.neighbors_directed(next, petgraph::Direction::Outgoing) {
                if let Some(deg) = in_degree.get_mut(&succ) {
                    *deg -= 1;
                }
            }
        }

        Ok(order)
    }

    /// Check the bootstrap property for the active policy.
    ///
    /// A stage that provisions compute service must either transitively
    /// depend on a publish stage (so the service is created against a tag
    /// that exists), or — under the placeholder policy — be covered by an
    /// update_service stage that transitively depends on a publish stage.
    fn validate_bootstrap(&self, pipeline: &Pipeline) -> Result<(), ShipflowError> {
        let publishers: Vec<&str> = pipeline
            .stages
            .iter()
            .filter(|s| s.publishes_artifact())
            .map(|s| s.name.as_str())
            .collect();

        for stage in pipeline.stages.iter().filter(|s| s.provisions_service()) {
            let sees_artifact = publishers
                .iter()
                .any(|p| self.depends_transitively(&stage.name, p));

            if sees_artifact {
                continue;
            }

            let repointed_later = matches!(pipeline.bootstrap, BootstrapPolicy::Placeholder { .. })
                && pipeline.stages.iter().any(|s| {
                    s.updates_service()
                        && publishers.iter().any(|p| self.depends_transitively(&s.name, p))
                });

            if !repointed_later {
                return Err(ShipflowError::AmbiguousBootstrap {
                    stage: stage.name.clone(),
                });
            }
        }

        Ok(())
    }

    /// Deterministic topological order as stage declaration indices
    pub fn topological_order(&self) -> &[usize] {
        &self.order
    }

    /// Stages grouped by dependency depth.
    ///
    /// Stages within one level have no dependency relation and may execute
    /// concurrently; levels execute strictly in order.
    pub fn levels(&self) -> Vec<Vec<usize>> {
        let mut depth: HashMap<NodeIndex, usize> = HashMap::new();
        let mut levels: Vec<Vec<usize>> = Vec::new();

        // Nodes are added in declaration order, so node index i carries
        // stage index i. The order is topological, so every predecessor has
        // a depth already.
        for &idx in &self.order {
            let node = NodeIndex::new(idx);

            let d = self
                .graph
                .neighbors_directed(node, petgraph::Direction::Incoming)
                .map(|p| depth[&p] + 1)
                .max()
                .unwrap_or(0);

            depth.insert(node, d);

            if levels.len() <= d {
                levels.resize_with(d + 1, Vec::new);
            }
            levels[d].push(idx);
        }

        levels
    }

    /// Get direct dependencies for a stage (stages that must run before it)
    pub fn dependencies(&self, stage_name: &str) -> Option<Vec<String>> {
        let node = self.name_to_index.get(stage_name)?;
        let mut deps: Vec<String> = self
            .graph
            .neighbors_directed(*node, petgraph::Direction::Incoming)
            .map(|n| self.index_to_name[&n].clone())
            .collect();
        deps.sort();
        Some(deps)
    }

    /// Get direct dependents for a stage (stages that depend on it)
    pub fn dependents(&self, stage_name: &str) -> Option<Vec<String>> {
        let node = self.name_to_index.get(stage_name)?;
        let mut deps: Vec<String> = self
            .graph
            .neighbors_directed(*node, petgraph::Direction::Outgoing)
            .map(|n| self.index_to_name[&n].clone())
            .collect();
        deps.sort();
        Some(deps)
    }

    /// Check if stage A depends (directly or transitively) on stage B
    pub fn depends_transitively(&self, stage_a: &str, stage_b: &str) -> bool {
        let Some(node_a) = self.name_to_index.get(stage_a) else {
            return false;
        };
        let Some(node_b) = self.name_to_index.get(stage_b) else {
            return false;
        };

        petgraph::algo::has_path_connecting(&self.graph, *node_b, *node_a, None)
    }

    /// Generate Mermaid diagram of the graph
    pub fn to_mermaid(&self) -> String {
        let mut out = String::from("graph TD\n");

        for name in self.name_to_index.keys() {
            out.push_str(&format!("    {}[{}]\n", name, name));
        }

        for edge in self.graph.edge_indices() {
            if let Some((from, to)) = self.graph.edge_endpoints(edge) {
                out.push_str(&format!(
                    "    {} --> {}\n",
                    self.index_to_name[&from], self.index_to_name[&to]
                ));
            }
        }

        out
    }

    /// Generate DOT diagram of the graph
    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph pipeline {\n");
        out.push_str("    rankdir=TB;\n");
        out.push_str("    node [shape=box, style=rounded];\n\n");

        for edge in self.graph.edge_indices() {
            if let Some((from, to)) = self.graph.edge_endpoints(edge) {
                out.push_str(&format!(
                    "    \"{}\" -> \"{}\";\n",
                    self.index_to_name[&from], self.index_to_name[&to]
                ));
            }
        }

        for (name, node) in &self.name_to_index {
            if self.graph.neighbors_undirected(*node).count() == 0 {
                out.push_str(&format!("    \"{}\";\n", name));
            }
        }

        out.push_str("}\n");
        out
    }

    /// Generate text representation of execution order
    pub fn to_text(&self, pipeline: &Pipeline) -> String {
        let mut out = String::new();

        for (i, idx) in self.order.iter().enumerate() {
            let stage = &pipeline.stages[*idx];
            let deps = self.dependencies(&stage.name).unwrap_or_default();

            out.push_str(&format!("{}. {} ({})", i + 1, stage.name, stage.action_name()));

            if !deps.is_empty() {
                out.push_str(&format!(" [depends: {}]", deps.join(", ")));
            }

            out.push('\n');
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{Action, BootstrapPolicy, ProvisionScope, Stage, ValueSource};
    use std::collections::HashMap;

    fn test_stage(name: &str, deps: Vec<&str>, action: Action) -> Stage {
        Stage {
            name: name.into(),
            description: None,
            action,
            depends_on: deps.into_iter().map(String::from).collect(),
            env: HashMap::new(),
        }
    }

    fn test_action() -> Action {
        Action::Test {
            command: "true".into(),
            shell: "bash".into(),
        }
    }

    fn make_pipeline(stages: Vec<Stage>, bootstrap: BootstrapPolicy) -> Pipeline {
        Pipeline {
            version: "1".into(),
            name: "test".into(),
            description: None,
            environment: "dev".into(),
            bootstrap,
            stages,
        }
    }

    fn make_test_pipeline(stages: Vec<(&str, Vec<&str>)>) -> Pipeline {
        make_pipeline(
            stages
                .into_iter()
                .map(|(name, deps)| test_stage(name, deps, test_action()))
                .collect(),
            BootstrapPolicy::default(),
        )
    }

    #[test]
    fn test_linear_order() {
        let pipeline =
            make_test_pipeline(vec![("a", vec![]), ("b", vec!["a"]), ("c", vec!["b"])]);

        let graph = PipelineGraph::build(&pipeline).unwrap();
        assert_eq!(graph.topological_order(), &[0, 1, 2]);
    }

    #[test]
    fn test_diamond_ties_broken_by_declaration_order() {
        let pipeline = make_test_pipeline(vec![
            ("a", vec![]),
            ("c", vec!["a"]),
            ("b", vec!["a"]),
            ("d", vec!["b", "c"]),
        ]);

        let graph = PipelineGraph::build(&pipeline).unwrap();
        // c declared before b, so c wins the tie
        assert_eq!(graph.topological_order(), &[0, 1, 2, 3]);
    }

    #[test]
    fn test_levels_group_independent_stages() {
        let pipeline = make_test_pipeline(vec![
            ("a", vec![]),
            ("b", vec!["a"]),
            ("c", vec!["a"]),
            ("d", vec!["b", "c"]),
        ]);

        let graph = PipelineGraph::build(&pipeline).unwrap();
        let levels = graph.levels();

        assert_eq!(levels.len(), 3);
        assert_eq!(levels[0], vec![0]);
        assert_eq!(levels[1], vec![1, 2]);
        assert_eq!(levels[2], vec![3]);
    }

    #[test]
    fn test_cycle_detection() {
        let pipeline = make_test_pipeline(vec![("a", vec!["b"]), ("b", vec!["a"])]);

        let result = PipelineGraph::build(&pipeline);
        match result {
            Err(ShipflowError::CycleDetected { stages }) => {
                assert_eq!(stages, vec!["a".to_string(), "b".to_string()]);
            }
            other => panic!("Expected CycleDetected, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_duplicate_stage_names_rejected() {
        let pipeline = make_test_pipeline(vec![("dup", vec![]), ("dup", vec![])]);

        let result = PipelineGraph::build(&pipeline);
        match result {
            Err(ShipflowError::InvalidStage { stage, .. }) => {
                assert_eq!(stage, "dup");
            }
            other => panic!("Expected InvalidStage, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_unknown_dependency() {
        let pipeline = make_test_pipeline(vec![("a", vec!["nonexistent"])]);

        let result = PipelineGraph::build(&pipeline);
        assert!(matches!(result, Err(ShipflowError::UnknownDependency { .. })));
    }

    #[test]
    fn test_depends_transitively() {
        let pipeline =
            make_test_pipeline(vec![("a", vec![]), ("b", vec!["a"]), ("c", vec!["b"])]);

        let graph = PipelineGraph::build(&pipeline).unwrap();

        assert!(graph.depends_transitively("c", "a"));
        assert!(graph.depends_transitively("c", "b"));
        assert!(!graph.depends_transitively("a", "c"));
    }

    fn provision(scope: ProvisionScope) -> Action {
        Action::Provision {
            dir: "infra".into(),
            scope,
            targets: vec![],
        }
    }

    fn publish() -> Action {
        Action::Publish {
            context: ".".into(),
            dockerfile: None,
            destination: ValueSource::FromOutput {
                from_output: "registry_uri".into(),
            },
            artifact_name: None,
        }
    }

    fn update_service() -> Action {
        Action::UpdateService {
            service: ValueSource::FromOutput {
                from_output: "service_id".into(),
            },
            artifact_from: None,
        }
    }

    #[test]
    fn test_service_without_publish_path_is_ambiguous() {
        // Scenario C: a compute-service stage with no dependency on publish
        // and nothing repointing it later
        let pipeline = make_pipeline(
            vec![
                test_stage("provision", vec![], provision(ProvisionScope::Full)),
                test_stage("publish", vec!["provision"], publish()),
            ],
            BootstrapPolicy::Reorder,
        );

        let result = PipelineGraph::build(&pipeline);
        match result {
            Err(ShipflowError::AmbiguousBootstrap { stage }) => {
                assert_eq!(stage, "provision");
            }
            other => panic!("Expected AmbiguousBootstrap, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_placeholder_policy_accepts_update_stage() {
        let pipeline = make_pipeline(
            vec![
                test_stage("provision", vec![], provision(ProvisionScope::Full)),
                test_stage("publish", vec!["provision"], publish()),
                test_stage("deploy", vec!["publish"], update_service()),
            ],
            BootstrapPolicy::default(),
        );

        assert!(PipelineGraph::build(&pipeline).is_ok());
    }

    #[test]
    fn test_placeholder_policy_without_update_stage_is_ambiguous() {
        let pipeline = make_pipeline(
            vec![
                test_stage("provision", vec![], provision(ProvisionScope::Full)),
                test_stage("publish", vec!["provision"], publish()),
            ],
            BootstrapPolicy::default(),
        );

        assert!(matches!(
            PipelineGraph::build(&pipeline),
            Err(ShipflowError::AmbiguousBootstrap { .. })
        ));
    }

    #[test]
    fn test_reorder_policy_accepts_service_after_publish() {
        let pipeline = make_pipeline(
            vec![
                test_stage("registry", vec![], provision(ProvisionScope::Registry)),
                test_stage("publish", vec!["registry"], publish()),
                test_stage("service", vec!["publish"], provision(ProvisionScope::Service)),
            ],
            BootstrapPolicy::Reorder,
        );

        let graph = PipelineGraph::build(&pipeline).unwrap();
        assert_eq!(graph.topological_order(), &[0, 1, 2]);
    }

    #[test]
    fn test_registry_only_provision_needs_no_publish_path() {
        let pipeline = make_pipeline(
            vec![
                test_stage("registry", vec![], provision(ProvisionScope::Registry)),
                test_stage("publish", vec!["registry"], publish()),
            ],
            BootstrapPolicy::Reorder,
        );

        assert!(PipelineGraph::build(&pipeline).is_ok());
    }

    #[test]
    fn test_mermaid_output() {
        let pipeline = make_test_pipeline(vec![("a", vec![]), ("b", vec!["a"])]);

        let graph = PipelineGraph::build(&pipeline).unwrap();
        let mermaid = graph.to_mermaid();

        assert!(mermaid.contains("graph TD"));
        assert!(mermaid.contains("a --> b"));
    }

    #[test]
    fn test_dot_output_includes_isolated_nodes() {
        let pipeline = make_test_pipeline(vec![("a", vec![]), ("b", vec![])]);

        let graph = PipelineGraph::build(&pipeline).unwrap();
        let dot = graph.to_dot();

        assert!(dot.contains("\"a\";"));
        assert!(dot.contains("\"b\";"));
    }
}
