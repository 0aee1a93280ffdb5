// Copyright (C) 2025 Category Labs, Inc.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

use crate::classifier::NodeTranslator;
use crate::config::ConverterConfig;
use crate::dependency::{convert_ctrl_dep_to_data_dep, RecordTree};
use crate::error::{ConvertError, Result};
use crate::id_assigner::UniqueIdAssigner;
use crate::record::RecordGraph;
use crate::sanitizer::{identify_cyclic_dependencies, remove_dangling_nodes};
use crate::splitter::split_cpu_nodes_with_gpu_child;
use crate::writer::{persist_trace, TraceMetadata};
use chakra_format::Node;
use pytorch_trace_format::PyTorchTrace;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversionSummary {
    pub input_nodes: usize,
    pub splits: usize,
    pub data_deps: usize,
    pub dangling_removed: usize,
    pub output_nodes: usize,
}

/// A converted trace, ready to be written.
#[derive(Debug, Clone)]
pub struct ChakraTrace {
    pub metadata: TraceMetadata,
    pub nodes: BTreeMap<u64, Node>,
    pub summary: ConversionSummary,
}

pub struct ChakraConverter {
    config: ConverterConfig,
}

impl ChakraConverter {
    pub fn new(config: ConverterConfig) -> Self {
        Self { config }
    }

    pub fn convert_trace(&self, trace: PyTorchTrace) -> Result<ChakraTrace> {
        let metadata = TraceMetadata::from_trace(&trace);
        let mut summary = ConversionSummary {
            input_nodes: trace.nodes.len(),
            ..Default::default()
        };
        let next_id = trace.max_node_id().map_or(0, |max| max + 1);

        let mut graph = RecordGraph::build(trace.nodes, &self.config)?;
        let mut ids = UniqueIdAssigner::new(next_id);
        summary.splits = split_cpu_nodes_with_gpu_child(&mut graph, &mut ids)?.len();

        tracing::info!("converting pytorch nodes to chakra nodes");
        let translator = NodeTranslator::new(&self.config, &graph.arena);
        let mut nodes: BTreeMap<u64, Node> = BTreeMap::new();
        for key in graph.breadth_first_order() {
            let node = translator.translate(key, &nodes);
            if let Some(existing) = nodes.get(&node.id) {
                let err = ConvertError::DuplicateIdentity {
                    id: node.id,
                    first: existing.name.clone(),
                    second: node.name,
                };
                tracing::error!(error = %err, "node id assigned twice");
                return Err(err);
            }
            nodes.insert(node.id, node);
        }

        let mut roots: Vec<u64> = graph
            .roots
            .iter()
            .filter_map(|&key| graph.arena.get(key))
            .map(|record| record.id)
            .filter(|id| nodes.contains_key(id))
            .collect();
        roots.sort_unstable();
        roots.dedup();
        if roots.is_empty() {
            tracing::warn!("no root node found, data dependencies will be empty");
        }

        let tree = RecordTree::new(&graph);
        for &root in &roots {
            summary.data_deps += convert_ctrl_dep_to_data_dep(root, &tree, &mut nodes);
        }
        tracing::info!(
            roots = roots.len(),
            data_deps = summary.data_deps,
            "converted control dependencies to data dependencies"
        );

        summary.dangling_removed = remove_dangling_nodes(&mut nodes).len();
        identify_cyclic_dependencies(&nodes)?;
        summary.output_nodes = nodes.len();

        tracing::info!(
            input_nodes = summary.input_nodes,
            output_nodes = summary.output_nodes,
            splits = summary.splits,
            dangling_removed = summary.dangling_removed,
            "conversion complete"
        );
        Ok(ChakraTrace {
            metadata,
            nodes,
            summary,
        })
    }

    /// Loads `input`, converts it and atomically writes the result to `output`.
    pub fn convert_file(&self, input: &Path, output: &Path) -> Result<ConversionSummary> {
        tracing::info!(input = %input.display(), "loading pytorch execution trace");
        let trace = PyTorchTrace::load(input)?;
        let converted = self.convert_trace(trace)?;
        persist_trace(
            output,
            &converted.metadata,
            converted.nodes.into_values().collect(),
        )?;
        Ok(converted.summary)
    }
}

impl Default for ChakraConverter {
    fn default() -> Self {
        Self::new(ConverterConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::tests::{cpu, gpu, root};
    use chakra_format::NodeType;
    use pytorch_trace_format::PyTorchNode;

    fn trace(nodes: Vec<PyTorchNode>) -> PyTorchTrace {
        PyTorchTrace::builder()
            .schema("1.0.1")
            .pid(42)
            .time("2024-05-01 10:00:00")
            .start_ts(1)
            .finish_ts(2)
            .nodes(nodes)
            .build()
    }

    fn by_name<'a>(converted: &'a ChakraTrace, name: &str) -> Vec<&'a Node> {
        converted
            .nodes
            .values()
            .filter(|node| node.name == name)
            .collect()
    }

    #[test]
    fn cpu_node_with_gpu_child_is_split() {
        let converted = ChakraConverter::default()
            .convert_trace(trace(vec![root(0), cpu(1, 0, 0, 100), gpu(2, 1, 40, 50)]))
            .unwrap();

        assert_eq!(converted.nodes.keys().copied().collect::<Vec<_>>(), vec![3, 4, 5, 6]);
        let segments = by_name(&converted, "aten::op1");
        assert_eq!(segments.len(), 2);
        let (first, second) = (segments[0], segments[1]);
        let kernel = by_name(&converted, "kernel2")[0];

        assert_eq!(first.duration_micros, 40);
        assert_eq!(second.duration_micros, 60);
        assert_eq!(first.data_deps, vec![3]);
        assert_eq!(kernel.data_deps, vec![first.id]);
        assert_eq!(second.data_deps, vec![first.id]);
        assert_eq!(kernel.ctrl_deps, vec![first.id]);
        assert_eq!(second.ctrl_deps, vec![first.id]);
        assert_eq!(converted.summary.splits, 1);
        assert_eq!(converted.summary.data_deps, 3);
    }

    #[test]
    fn unreachable_nodes_are_pruned() {
        let stray = PyTorchNode::builder()
            .id(7)
            .name("aten::stray")
            .op_schema("aten::stray() -> ()")
            .build();
        let converted = ChakraConverter::default()
            .convert_trace(trace(vec![root(1), cpu(2, 1, 0, 10), stray]))
            .unwrap();

        assert!(by_name(&converted, "aten::stray").is_empty());
        assert_eq!(converted.summary.dangling_removed, 1);
        assert_eq!(converted.summary.output_nodes, 2);
        assert_eq!(converted.metadata.pid, 42);
    }

    #[test]
    fn ids_start_past_the_largest_input_id() {
        let converted = ChakraConverter::default()
            .convert_trace(trace(vec![root(10), cpu(3, 10, 0, 10)]))
            .unwrap();
        assert_eq!(converted.nodes.keys().copied().collect::<Vec<_>>(), vec![11, 12]);
        assert_eq!(converted.nodes[&11].r#type(), NodeType::InvalidNode);
        assert_eq!(converted.nodes[&12].r#type(), NodeType::CompNode);
    }

    #[test]
    fn bad_split_aborts_the_conversion() {
        let err = ChakraConverter::default()
            .convert_trace(trace(vec![root(0), cpu(1, 0, 50, 100), gpu(2, 1, 40, 50)]))
            .unwrap_err();
        assert!(matches!(err, ConvertError::TimestampInconsistency { id: 1, .. }));
    }

    #[test]
    fn trace_without_roots_produces_no_nodes() {
        let converted = ChakraConverter::default()
            .convert_trace(trace(vec![cpu(1, 0, 0, 10), cpu(2, 1, 0, 5)]))
            .unwrap();
        assert!(converted.nodes.is_empty());
    }
}
