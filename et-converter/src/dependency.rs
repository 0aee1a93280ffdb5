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

//! Encodes the call tree as a chain of data dependencies.
//!
//! PyTorch traces only record which operator called which. Chakra consumers expect
//! explicit "runs after" edges, so the call tree under each root is walked depth
//! first and every visited node is made to depend on the node visited before it:
//!
//! - CPU and label nodes depend on the last CPU or label node visited, since host
//!   control flow only waits on host work.
//! - GPU nodes depend on the last node of any kind visited, since a kernel can
//!   consume the result of either a host operator or an earlier kernel.

use crate::record::{RecordGraph, RecordKey};
use chakra_format::Node;
use pytorch_trace_format::PyTorchNodeType;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Call-tree view over node IDs.
pub trait CallTree {
    /// `None` for IDs the tree does not know.
    fn op_type(&self, id: u64) -> Option<PyTorchNodeType>;
    fn children(&self, id: u64) -> Vec<u64>;
}

/// [`CallTree`] over the records of a converted trace, addressed by current ID.
pub struct RecordTree<'a> {
    graph: &'a RecordGraph,
    by_id: HashMap<u64, RecordKey>,
}

impl<'a> RecordTree<'a> {
    pub fn new(graph: &'a RecordGraph) -> Self {
        Self {
            graph,
            by_id: graph.id_index(),
        }
    }
}

impl CallTree for RecordTree<'_> {
    fn op_type(&self, id: u64) -> Option<PyTorchNodeType> {
        self.by_id
            .get(&id)
            .map(|&key| self.graph.arena[key].op_type())
    }

    fn children(&self, id: u64) -> Vec<u64> {
        let Some(&key) = self.by_id.get(&id) else {
            return Vec::new();
        };
        self.graph.arena[key]
            .children
            .iter()
            .filter_map(|&child| self.graph.arena.get(child))
            .map(|child| child.id)
            .collect()
    }
}

/// Walks the tree below `root` and appends data dependencies to `nodes`.
///
/// Children are pushed onto the stack in descending ID order, so siblings are
/// visited in ascending ID order. Returns the number of edges added.
pub fn convert_ctrl_dep_to_data_dep(
    root: u64,
    tree: &impl CallTree,
    nodes: &mut BTreeMap<u64, Node>,
) -> usize {
    let mut visited: HashSet<u64> = HashSet::new();
    let mut stack = vec![root];
    let mut last_visited_non_gpu: Option<u64> = None;
    let mut last_visited_any: Option<u64> = None;
    let mut edges = 0;

    while let Some(id) = stack.pop() {
        if !visited.insert(id) {
            continue;
        }
        let Some(op_type) = tree.op_type(id) else {
            continue;
        };
        let Some(node) = nodes.get_mut(&id) else {
            continue;
        };

        let predecessor = match op_type {
            PyTorchNodeType::GpuOp => last_visited_any,
            PyTorchNodeType::CpuOp | PyTorchNodeType::Label => last_visited_non_gpu,
        };
        if let Some(dep) = predecessor {
            if !node.data_deps.contains(&dep) {
                node.data_deps.push(dep);
                edges += 1;
                tracing::debug!(node = id, ?op_type, depends_on = dep, "added data dependency");
            }
        }
        if op_type != PyTorchNodeType::GpuOp {
            last_visited_non_gpu = Some(id);
        }
        last_visited_any = Some(id);

        let mut children: Vec<u64> = tree
            .children(id)
            .into_iter()
            .filter(|child| nodes.contains_key(child) && !visited.contains(child))
            .collect();
        children.sort_unstable_by(|a, b| b.cmp(a));
        stack.extend(children);
    }

    edges
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    #[derive(Default)]
    pub(crate) struct TestTree {
        ops: HashMap<u64, PyTorchNodeType>,
        children: HashMap<u64, Vec<u64>>,
    }

    impl TestTree {
        pub(crate) fn add(&mut self, id: u64, parent: Option<u64>, op_type: PyTorchNodeType) {
            self.ops.insert(id, op_type);
            if let Some(parent) = parent {
                self.children.entry(parent).or_default().push(id);
            }
        }

        pub(crate) fn nodes(&self) -> BTreeMap<u64, Node> {
            self.ops
                .keys()
                .map(|&id| {
                    (
                        id,
                        Node {
                            id,
                            name: format!("n{id}"),
                            ..Default::default()
                        },
                    )
                })
                .collect()
        }
    }

    impl CallTree for TestTree {
        fn op_type(&self, id: u64) -> Option<PyTorchNodeType> {
            self.ops.get(&id).copied()
        }

        fn children(&self, id: u64) -> Vec<u64> {
            self.children.get(&id).cloned().unwrap_or_default()
        }
    }

    use PyTorchNodeType::{CpuOp, GpuOp, Label};

    #[test]
    fn linear_cpu_chain() {
        let mut tree = TestTree::default();
        tree.add(1, None, CpuOp);
        tree.add(2, Some(1), CpuOp);
        tree.add(3, Some(2), CpuOp);
        let mut nodes = tree.nodes();

        assert_eq!(convert_ctrl_dep_to_data_dep(1, &tree, &mut nodes), 2);
        assert!(nodes[&1].data_deps.is_empty());
        assert_eq!(nodes[&2].data_deps, vec![1]);
        assert_eq!(nodes[&3].data_deps, vec![2]);
    }

    #[test]
    fn gpu_node_follows_last_any_and_cpu_skips_it() {
        // A -> B -> {D (gpu), C -> E}
        let mut tree = TestTree::default();
        tree.add(1, None, CpuOp);
        tree.add(2, Some(1), CpuOp);
        tree.add(3, Some(2), GpuOp);
        tree.add(4, Some(2), CpuOp);
        tree.add(5, Some(4), CpuOp);
        let mut nodes = tree.nodes();
        convert_ctrl_dep_to_data_dep(1, &tree, &mut nodes);

        assert_eq!(nodes[&2].data_deps, vec![1]);
        assert_eq!(nodes[&3].data_deps, vec![2]);
        assert_eq!(nodes[&4].data_deps, vec![2]);
        assert_eq!(nodes[&5].data_deps, vec![4]);
    }

    #[test]
    fn gpu_after_gpu_chains_through_gpu() {
        let mut tree = TestTree::default();
        tree.add(1, None, Label);
        tree.add(2, Some(1), GpuOp);
        tree.add(3, Some(1), GpuOp);
        tree.add(4, Some(1), CpuOp);
        let mut nodes = tree.nodes();
        convert_ctrl_dep_to_data_dep(1, &tree, &mut nodes);

        assert_eq!(nodes[&2].data_deps, vec![1]);
        assert_eq!(nodes[&3].data_deps, vec![2]);
        assert_eq!(nodes[&4].data_deps, vec![1]);
    }

    #[test]
    fn siblings_are_visited_in_ascending_id_order() {
        let mut tree = TestTree::default();
        tree.add(1, None, Label);
        tree.add(9, Some(1), CpuOp);
        tree.add(4, Some(1), CpuOp);
        tree.add(6, Some(1), CpuOp);
        let mut nodes = tree.nodes();
        convert_ctrl_dep_to_data_dep(1, &tree, &mut nodes);

        assert_eq!(nodes[&4].data_deps, vec![1]);
        assert_eq!(nodes[&6].data_deps, vec![4]);
        assert_eq!(nodes[&9].data_deps, vec![6]);
    }

    #[test]
    fn shared_child_is_visited_once() {
        let mut tree = TestTree::default();
        tree.add(1, None, Label);
        tree.add(2, Some(1), CpuOp);
        tree.add(3, Some(1), CpuOp);
        tree.add(4, Some(2), CpuOp);
        tree.children.entry(3).or_default().push(4);
        let mut nodes = tree.nodes();
        convert_ctrl_dep_to_data_dep(1, &tree, &mut nodes);

        assert_eq!(nodes[&4].data_deps, vec![2]);
        assert_eq!(nodes[&3].data_deps, vec![4]);
    }

    #[test]
    fn existing_dependencies_are_not_duplicated() {
        let mut tree = TestTree::default();
        tree.add(1, None, CpuOp);
        tree.add(2, Some(1), CpuOp);
        let mut nodes = tree.nodes();
        convert_ctrl_dep_to_data_dep(1, &tree, &mut nodes);
        assert_eq!(convert_ctrl_dep_to_data_dep(1, &tree, &mut nodes), 0);
        assert_eq!(nodes[&2].data_deps, vec![1]);
    }

    #[test]
    fn children_missing_from_output_are_skipped() {
        let mut tree = TestTree::default();
        tree.add(1, None, CpuOp);
        tree.add(2, Some(1), CpuOp);
        tree.add(3, Some(2), CpuOp);
        let mut nodes = tree.nodes();
        nodes.remove(&2);
        convert_ctrl_dep_to_data_dep(1, &tree, &mut nodes);
        assert!(nodes[&3].data_deps.is_empty());
    }
}
