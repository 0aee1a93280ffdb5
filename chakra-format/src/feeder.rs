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

//! Issues the nodes of a Chakra trace in dependency order.
//!
//! A node becomes issuable once every node in its `data_deps` has been issued and
//! freed. Among issuable nodes the lowest ID goes first.

use crate::{
    attribute_proto, ChakraFormatError, ChakraStreamReader, CollectiveCommType, GlobalMetadata,
    Node, NodeType, Result,
};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

#[derive(Debug, Default)]
struct FeederEntry {
    node: Node,
    children: Vec<u64>,
    pending_parents: usize,
}

#[derive(Debug)]
pub struct ChakraFeeder {
    metadata: GlobalMetadata,
    graph: HashMap<u64, FeederEntry>,
    issuable: BinaryHeap<Reverse<u64>>,
    queued: HashSet<u64>,
    freed: HashSet<u64>,
}

impl ChakraFeeder {
    /// Loads the whole trace and resolves every node's parents.
    pub fn new(mut reader: ChakraStreamReader) -> Result<Self> {
        let metadata = reader.read_global_metadata()?;
        let mut graph: HashMap<u64, FeederEntry> = HashMap::new();
        for node in reader {
            let node = node?;
            let id = node.id;
            let entry = FeederEntry {
                node,
                ..Default::default()
            };
            if graph.insert(id, entry).is_some() {
                return Err(ChakraFormatError::DuplicateNode { id });
            }
        }

        let mut links = Vec::new();
        for (&id, entry) in &graph {
            let mut parents = entry.node.data_deps.clone();
            parents.sort_unstable();
            parents.dedup();
            for dep in parents {
                if !graph.contains_key(&dep) {
                    return Err(ChakraFormatError::UnresolvedDependency { id, dep });
                }
                links.push((dep, id));
            }
        }
        links.sort_unstable();
        for (parent, child) in links {
            if let Some(entry) = graph.get_mut(&parent) {
                entry.children.push(child);
            }
            if let Some(entry) = graph.get_mut(&child) {
                entry.pending_parents += 1;
            }
        }

        let mut feeder = Self {
            metadata,
            graph,
            issuable: BinaryHeap::new(),
            queued: HashSet::new(),
            freed: HashSet::new(),
        };
        let roots: Vec<u64> = feeder
            .graph
            .iter()
            .filter(|(_, entry)| entry.pending_parents == 0)
            .map(|(&id, _)| id)
            .collect();
        for id in roots {
            feeder.push_back_issuable_node(id);
        }
        Ok(feeder)
    }

    pub fn metadata(&self) -> &GlobalMetadata {
        &self.metadata
    }

    /// Takes the next node whose parents have all been freed.
    pub fn next_issuable_node(&mut self) -> Option<&Node> {
        while let Some(Reverse(id)) = self.issuable.pop() {
            self.queued.remove(&id);
            if let Some(entry) = self.graph.get(&id) {
                return Some(&entry.node);
            }
        }
        None
    }

    /// Puts a loaded node back into the issuable queue.
    pub fn push_back_issuable_node(&mut self, id: u64) {
        if self.graph.contains_key(&id) && self.queued.insert(id) {
            self.issuable.push(Reverse(id));
        }
    }

    /// Marks `id` as completed. Children left without pending parents become
    /// issuable. Freeing a node twice has no further effect.
    pub fn free_children_nodes(&mut self, id: u64) {
        if !self.freed.insert(id) {
            return;
        }
        let children = match self.graph.get(&id) {
            Some(entry) => entry.children.clone(),
            None => return,
        };
        for child in children {
            let Some(entry) = self.graph.get_mut(&child) else {
                continue;
            };
            entry.pending_parents = entry.pending_parents.saturating_sub(1);
            if entry.pending_parents == 0 {
                self.push_back_issuable_node(child);
            }
        }
    }

    /// Drops an issued node from the graph.
    pub fn remove_node(&mut self, id: u64) -> Option<Node> {
        self.queued.remove(&id);
        self.graph.remove(&id).map(|entry| entry.node)
    }

    pub fn lookup_node(&self, id: u64) -> Result<&Node> {
        self.graph
            .get(&id)
            .map(|entry| &entry.node)
            .ok_or(ChakraFormatError::UnknownNode { id })
    }

    pub fn children(&self, id: u64) -> &[u64] {
        self.graph
            .get(&id)
            .map(|entry| entry.children.as_slice())
            .unwrap_or_default()
    }

    /// True while nodes remain loaded or queued.
    pub fn has_nodes_to_issue(&self) -> bool {
        !self.graph.is_empty() || !self.issuable.is_empty()
    }

    /// Number of loaded nodes not yet removed.
    pub fn remaining(&self) -> usize {
        self.graph.len()
    }
}

/// Issues, frees and removes one node per step. Stops early if the remaining
/// nodes wait on each other.
impl Iterator for ChakraFeeder {
    type Item = Node;

    fn next(&mut self) -> Option<Node> {
        let id = self.next_issuable_node()?.id;
        self.free_children_nodes(id);
        self.remove_node(id)
    }
}

impl Node {
    fn int_attribute(&self, name: &str) -> Option<i64> {
        use attribute_proto::Value;
        match self.attribute(name)? {
            Value::Int32Val(v) | Value::Sint32Val(v) | Value::Sfixed32Val(v) => Some(i64::from(*v)),
            Value::Uint32Val(v) | Value::Fixed32Val(v) => Some(i64::from(*v)),
            Value::Int64Val(v) | Value::Sint64Val(v) | Value::Sfixed64Val(v) => Some(*v),
            Value::Uint64Val(v) | Value::Fixed64Val(v) => i64::try_from(*v).ok(),
            Value::BoolVal(v) => Some(i64::from(*v)),
            _ => None,
        }
    }

    /// Nodes without an `is_cpu_op` attribute count as CPU operators.
    pub fn is_cpu_op(&self) -> bool {
        self.int_attribute("is_cpu_op").map_or(true, |v| v != 0)
    }

    pub fn runtime(&self) -> u64 {
        self.duration_micros
    }

    pub fn is_comm(&self) -> bool {
        matches!(
            self.r#type(),
            NodeType::CommCollNode | NodeType::CommSendNode | NodeType::CommRecvNode
        )
    }

    pub fn comm_type(&self) -> Option<CollectiveCommType> {
        let value = self.int_attribute("comm_type")?;
        CollectiveCommType::try_from(i32::try_from(value).ok()?).ok()
    }

    pub fn comm_size(&self) -> Option<i64> {
        self.int_attribute("comm_size")
    }

    pub fn comm_src(&self) -> Option<i64> {
        self.int_attribute("comm_src")
    }

    pub fn comm_dst(&self) -> Option<i64> {
        self.int_attribute("comm_dst")
    }

    pub fn comm_tag(&self) -> Option<i64> {
        self.int_attribute("comm_tag")
    }

    pub fn comm_priority(&self) -> Option<i64> {
        self.int_attribute("comm_priority")
    }

    pub fn involved_dim(&self) -> Option<&[bool]> {
        match self.attribute("involved_dim")? {
            attribute_proto::Value::BoolList(list) => Some(&list.values),
            _ => None,
        }
    }
}
