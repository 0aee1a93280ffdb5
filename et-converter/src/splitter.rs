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

//! Splits CPU records that launch a GPU kernel so the overlap becomes explicit.
//!
//! ```text
//! before:  |------------ CPU record ------------|
//!                              |--- GPU record ---|
//!
//! after:   |-- first segment --|- second segment -|
//!                              |--- GPU record ---|
//! ```
//!
//! The first segment becomes the parent of both the GPU record and the second
//! segment, and the second segment inherits the original record's other children.

use crate::error::{ConvertError, Result, SplitSegment};
use crate::id_assigner::UniqueIdAssigner;
use crate::record::{OperatorRecord, RecordGraph, RecordKey};
use pytorch_trace_format::PyTorchNodeType;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitRecords {
    pub first: RecordKey,
    pub second: RecordKey,
    pub gpu: RecordKey,
}

/// Bounds of the two segments a CPU record splits into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitBounds {
    pub first_start: i64,
    pub first_duration: i64,
    pub second_start: i64,
    pub second_duration: i64,
}

impl SplitBounds {
    pub fn compute(record: &OperatorRecord, gpu_start: i64) -> Result<Self> {
        let cpu_start = record.timestamp;
        let cpu_duration = record.duration_or_zero();
        // Durations that overflow an i64 are reported saturated.
        let first_duration = gpu_start.checked_sub(cpu_start);
        let second_duration = first_duration.and_then(|first| cpu_duration.checked_sub(first));

        let invalid = |segment, segment_start, segment_duration| {
            let err = ConvertError::TimestampInconsistency {
                id: record.id,
                name: record.name().to_string(),
                segment,
                cpu_start,
                cpu_duration,
                gpu_start,
                segment_start,
                segment_duration,
            };
            tracing::error!(error = %err, "cannot split cpu node");
            err
        };

        let first_duration = match first_duration {
            Some(duration) if cpu_start < gpu_start && duration > 0 => duration,
            _ => {
                return Err(invalid(
                    SplitSegment::First,
                    cpu_start,
                    gpu_start.saturating_sub(cpu_start),
                ))
            }
        };
        let second_duration = match second_duration {
            Some(duration) if duration > 0 => duration,
            _ => {
                return Err(invalid(
                    SplitSegment::Second,
                    gpu_start,
                    cpu_duration.saturating_sub(first_duration),
                ))
            }
        };
        Ok(SplitBounds {
            first_start: cpu_start,
            first_duration,
            second_start: gpu_start,
            second_duration,
        })
    }
}

/// Gives every live record a fresh ID, splitting CPU and label records that
/// launched a GPU kernel.
///
/// Records are processed in insertion order. GPU records that are nobody's tagged
/// GPU child are re-identified last.
pub fn split_cpu_nodes_with_gpu_child(
    graph: &mut RecordGraph,
    ids: &mut UniqueIdAssigner,
) -> Result<Vec<SplitRecords>> {
    tracing::info!("decomposing cpu nodes with gpu child nodes");
    let mut splits = Vec::new();
    let mut reassigned: HashSet<RecordKey> = HashSet::new();

    for key in graph.arena.keys() {
        let Some(record) = graph.arena.get(key) else {
            continue;
        };
        if record.op_type() == PyTorchNodeType::GpuOp {
            continue;
        }

        match record.gpu_child.filter(|&gpu| graph.arena.contains(gpu)) {
            Some(gpu) => {
                let split = split_cpu_node(graph, key, gpu, ids)?;
                reassigned.extend([split.first, split.second, split.gpu]);
                splits.push(split);
            }
            None => {
                let record = &mut graph.arena[key];
                record.id = ids.assign(record.original_id);
                reassigned.insert(key);
            }
        }
    }

    for key in graph.arena.keys() {
        if !reassigned.contains(&key) {
            let record = &mut graph.arena[key];
            record.id = ids.assign(record.original_id);
        }
    }

    tracing::info!(splits = splits.len(), "split cpu nodes");
    Ok(splits)
}

/// Replaces the CPU record at `key` with two segments around the GPU record at `gpu`.
///
/// The original key is removed from the arena. On error nothing has been modified.
pub fn split_cpu_node(
    graph: &mut RecordGraph,
    key: RecordKey,
    gpu: RecordKey,
    ids: &mut UniqueIdAssigner,
) -> Result<SplitRecords> {
    let gpu_start = graph.arena[gpu].timestamp;
    let bounds = SplitBounds::compute(&graph.arena[key], gpu_start)?;

    let original = match graph.arena.remove(key) {
        Some(record) => record,
        None => panic!("record {key:?} split twice"),
    };
    tracing::debug!(
        id = original.id,
        name = original.name(),
        duration = original.duration_or_zero(),
        gpu_id = graph.arena[gpu].id,
        gpu_name = graph.arena[gpu].name(),
        "splitting cpu node"
    );

    let first_id = ids.assign(original.original_id);
    let gpu_id = ids.assign(graph.arena[gpu].original_id);
    let second_id = ids.assign(original.original_id);

    let first = OperatorRecord {
        id: first_id,
        parent: original.parent,
        children: Vec::new(),
        gpu_child: Some(gpu),
        timestamp: bounds.first_start,
        duration: Some(bounds.first_duration),
        ..original.clone()
    };
    let adopted: Vec<RecordKey> = original
        .children
        .iter()
        .copied()
        .filter(|&child| child != gpu)
        .collect();
    let second = OperatorRecord {
        id: second_id,
        parent: None,
        children: adopted,
        gpu_child: None,
        timestamp: bounds.second_start,
        duration: Some(bounds.second_duration),
        ..original
    };

    let first_key = graph.arena.insert(first);
    let second_key = graph.arena.insert(second);

    if let Some(parent) = graph.arena[first_key].parent {
        let siblings = &mut graph.arena[parent].children;
        siblings.retain(|&child| child != key);
        if !siblings.contains(&first_key) {
            siblings.push(first_key);
        }
    }
    for root in graph.roots.iter_mut().filter(|root| **root == key) {
        *root = first_key;
    }

    let gpu_record = &mut graph.arena[gpu];
    gpu_record.id = gpu_id;
    gpu_record.parent = Some(first_key);

    graph.arena[second_key].parent = Some(first_key);
    for child in graph.arena[second_key].children.clone() {
        graph.arena[child].parent = Some(second_key);
    }
    graph.arena[first_key].children = vec![second_key, gpu];

    tracing::debug!(
        first_id,
        first_duration = bounds.first_duration,
        second_id,
        second_duration = bounds.second_duration,
        gpu_id,
        "split cpu node"
    );

    Ok(SplitRecords {
        first: first_key,
        second: second_key,
        gpu,
    })
}
