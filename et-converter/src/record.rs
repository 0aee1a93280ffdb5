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

//! Operator records and the call tree linking them.
//!
//! Records live in a [`RecordArena`] and refer to each other through [`RecordKey`]s.
//! A key stays valid for the life of the record even when the record's ID is
//! reassigned, so relinking after a split never has to chase IDs.

use crate::config::ConverterConfig;
use crate::error::{ConvertError, Result};
use pytorch_trace_format::{PyTorchNode, PyTorchNodeType};
use std::collections::HashMap;
use std::ops::{Index, IndexMut};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey(usize);

#[derive(Debug, Clone)]
pub struct OperatorRecord {
    /// Current ID. Starts as the operator ID and is replaced by the identity assigner.
    pub id: u64,
    pub original_id: u64,
    pub parent: Option<RecordKey>,
    pub children: Vec<RecordKey>,
    pub gpu_child: Option<RecordKey>,
    pub record_param_comms: Option<RecordKey>,
    pub nccl: Option<RecordKey>,
    pub timestamp: i64,
    pub duration: Option<i64>,
    /// Fields carried through to the output unchanged.
    pub data: PyTorchNode,
}

impl OperatorRecord {
    pub fn new(data: PyTorchNode) -> Self {
        Self {
            id: data.id,
            original_id: data.id,
            parent: None,
            children: Vec::new(),
            gpu_child: None,
            record_param_comms: None,
            nccl: None,
            timestamp: data.ts,
            duration: data.dur,
            data,
        }
    }

    pub fn name(&self) -> &str {
        &self.data.name
    }

    pub fn op_type(&self) -> PyTorchNodeType {
        self.data.op_type()
    }

    pub fn is_gpu_op(&self) -> bool {
        self.data.is_gpu_op()
    }

    pub fn duration_or_zero(&self) -> i64 {
        self.duration.unwrap_or(0)
    }
}

/// Slot storage for records. Removed records leave a hole so keys are never reused.
#[derive(Debug, Default)]
pub struct RecordArena {
    slots: Vec<Option<OperatorRecord>>,
}

impl RecordArena {
    pub fn insert(&mut self, record: OperatorRecord) -> RecordKey {
        self.slots.push(Some(record));
        RecordKey(self.slots.len() - 1)
    }

    pub fn get(&self, key: RecordKey) -> Option<&OperatorRecord> {
        self.slots.get(key.0).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, key: RecordKey) -> Option<&mut OperatorRecord> {
        self.slots.get_mut(key.0).and_then(Option::as_mut)
    }

    pub fn remove(&mut self, key: RecordKey) -> Option<OperatorRecord> {
        self.slots.get_mut(key.0).and_then(Option::take)
    }

    pub fn contains(&self, key: RecordKey) -> bool {
        self.get(key).is_some()
    }

    /// Live records in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (RecordKey, &OperatorRecord)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|record| (RecordKey(i), record)))
    }

    pub fn keys(&self) -> Vec<RecordKey> {
        self.iter().map(|(key, _)| key).collect()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn parent_id(&self, key: RecordKey) -> Option<u64> {
        self.get(key)
            .and_then(|record| record.parent)
            .and_then(|parent| self.get(parent))
            .map(|parent| parent.id)
    }
}

impl Index<RecordKey> for RecordArena {
    type Output = OperatorRecord;

    fn index(&self, key: RecordKey) -> &Self::Output {
        match self.get(key) {
            Some(record) => record,
            None => panic!("record {key:?} was removed from the arena"),
        }
    }
}

impl IndexMut<RecordKey> for RecordArena {
    fn index_mut(&mut self, key: RecordKey) -> &mut Self::Output {
        match self.get_mut(key) {
            Some(record) => record,
            None => panic!("record {key:?} was removed from the arena"),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecordCounts {
    pub total_op: usize,
    pub cpu_op: usize,
    pub gpu_op: usize,
    pub record_param_comms_op: usize,
    pub nccl_op: usize,
    pub root_op: usize,
}

/// The call tree of one trace.
#[derive(Debug, Default)]
pub struct RecordGraph {
    pub arena: RecordArena,
    pub roots: Vec<RecordKey>,
    pub counts: RecordCounts,
}

impl RecordGraph {
    /// Links every record to its parent, collects children, and tags the GPU,
    /// parameter-communication and collective-library children of each record.
    pub fn build(trace_nodes: Vec<PyTorchNode>, config: &ConverterConfig) -> Result<Self> {
        let mut graph = RecordGraph::default();
        let mut by_id: HashMap<u64, RecordKey> = HashMap::with_capacity(trace_nodes.len());

        for node in trace_nodes {
            let id = node.id;
            let key = graph.arena.insert(OperatorRecord::new(node));
            if by_id.insert(id, key).is_some() {
                tracing::error!(id, "operator id appears more than once");
                return Err(ConvertError::DuplicateOperator { id });
            }
        }

        for key in graph.arena.keys() {
            let record = &graph.arena[key];
            let parent_key = record
                .data
                .parent
                .filter(|&parent| parent != record.id)
                .and_then(|parent| by_id.get(&parent).copied());
            let is_gpu = record.is_gpu_op();
            let is_param_comms = record.data.is_record_param_comms_op();
            let is_nccl = record.data.is_nccl_op();
            let is_root = config.is_root_name(record.name());
            let is_cpu = record.data.is_cpu_op();

            if let Some(parent_key) = parent_key {
                graph.arena[key].parent = Some(parent_key);
                let parent = &mut graph.arena[parent_key];
                parent.children.push(key);
                if is_gpu {
                    parent.gpu_child = Some(key);
                }
                if is_param_comms {
                    parent.record_param_comms = Some(key);
                }
                if is_nccl {
                    parent.nccl = Some(key);
                }
            }

            if is_root {
                graph.roots.push(key);
                graph.counts.root_op += 1;
            }
            graph.counts.total_op += 1;
            if is_cpu {
                graph.counts.cpu_op += 1;
            }
            if is_gpu {
                graph.counts.gpu_op += 1;
            }
            if is_param_comms {
                graph.counts.record_param_comms_op += 1;
            }
            if is_nccl {
                graph.counts.nccl_op += 1;
            }
        }

        let counts = &graph.counts;
        tracing::info!(
            total_op = counts.total_op,
            cpu_op = counts.cpu_op,
            gpu_op = counts.gpu_op,
            record_param_comms_op = counts.record_param_comms_op,
            nccl_op = counts.nccl_op,
            root_op = counts.root_op,
            "established parent-child relationships"
        );
        Ok(graph)
    }

    /// Maps every live record's current ID to its key.
    pub fn id_index(&self) -> HashMap<u64, RecordKey> {
        self.arena.iter().map(|(key, record)| (record.id, key)).collect()
    }

    /// Live records ordered from the parentless records outward, breadth first.
    ///
    /// Records caught in a parent loop are unreachable from any parentless record and
    /// are appended afterwards in ID order.
    pub fn breadth_first_order(&self) -> Vec<RecordKey> {
        let mut order = Vec::with_capacity(self.arena.len());
        let mut seen = vec![false; self.arena.slots.len()];
        let mut queue: std::collections::VecDeque<RecordKey> = self
            .arena
            .iter()
            .filter(|(_, record)| record.parent.is_none_or(|p| !self.arena.contains(p)))
            .map(|(key, _)| key)
            .collect();

        while let Some(key) = queue.pop_front() {
            if std::mem::replace(&mut seen[key.0], true) {
                continue;
            }
            order.push(key);
            for &child in &self.arena[key].children {
                if self.arena.contains(child) && !seen[child.0] {
                    queue.push_back(child);
                }
            }
        }

        let mut leftover: Vec<RecordKey> = self
            .arena
            .iter()
            .filter(|(key, _)| !seen[key.0])
            .map(|(key, _)| key)
            .collect();
        leftover.sort_by_key(|&key| self.arena[key].id);
        order.extend(leftover);
        order
    }

    /// Checks that every child points back at the record listing it.
    pub fn links_are_consistent(&self) -> bool {
        self.arena.iter().all(|(key, record)| {
            record
                .children
                .iter()
                .all(|&child| self.arena.get(child).is_some_and(|c| c.parent == Some(key)))
        })
    }
}
