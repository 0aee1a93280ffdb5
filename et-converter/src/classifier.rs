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

use crate::config::{CollectiveMarkers, ConverterConfig};
use crate::record::{OperatorRecord, RecordArena, RecordKey};
use chakra_format::{create_attribute, AttrValue, CollectiveCommType, IoInfo, Node, NodeType};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Invalid,
    Compute,
    CollectiveComm,
}

impl From<NodeKind> for NodeType {
    fn from(kind: NodeKind) -> Self {
        match kind {
            NodeKind::Invalid => NodeType::InvalidNode,
            NodeKind::Compute => NodeType::CompNode,
            NodeKind::CollectiveComm => NodeType::CommCollNode,
        }
    }
}

pub fn classify(record: &OperatorRecord, markers: &CollectiveMarkers) -> NodeKind {
    let data = &record.data;
    if data.is_gpu_op() {
        if markers.is_gpu_collective(&data.name) {
            NodeKind::CollectiveComm
        } else {
            NodeKind::Compute
        }
    } else if markers.is_cpu_collective(&data.name) {
        NodeKind::CollectiveComm
    } else if !data.op_schema.is_empty() || data.has_outputs() {
        NodeKind::Compute
    } else {
        NodeKind::Invalid
    }
}

const COMM_TYPE_BY_KERNEL: [(&str, CollectiveCommType); 5] = [
    ("AllReduce", CollectiveCommType::AllReduce),
    ("AllGather", CollectiveCommType::AllGather),
    ("Broadcast", CollectiveCommType::Broadcast),
    ("AllToAll", CollectiveCommType::AllToAll),
    ("ReduceScatter", CollectiveCommType::ReduceScatter),
];

/// Collective type encoded in a collective kernel name such as
/// `ncclDevKernel_AllGather_RING_LL`.
pub fn collective_comm_type(kernel_name: &str) -> Option<CollectiveCommType> {
    COMM_TYPE_BY_KERNEL
        .iter()
        .find(|(marker, _)| kernel_name.contains(marker))
        .map(|&(_, comm_type)| comm_type)
}

fn render(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Turns records into Chakra nodes.
pub struct NodeTranslator<'a> {
    config: &'a ConverterConfig,
    arena: &'a RecordArena,
}

impl<'a> NodeTranslator<'a> {
    pub fn new(config: &'a ConverterConfig, arena: &'a RecordArena) -> Self {
        Self { config, arena }
    }

    /// Translates the record at `key`. `translated` holds the nodes emitted so far
    /// and decides whether the structural parent becomes a control dependency.
    pub fn translate(&self, key: RecordKey, translated: &BTreeMap<u64, Node>) -> Node {
        let record = &self.arena[key];
        let data = &record.data;
        let kind = classify(record, &self.config.markers);
        tracing::debug!(id = record.id, name = record.name(), ?kind, "converting node");

        let ctrl_deps = self
            .arena
            .parent_id(key)
            .filter(|parent| translated.contains_key(parent))
            .into_iter()
            .collect();

        let mut attr = vec![
            create_attribute("rf_id", AttrValue::Int64(data.rf_id)),
            create_attribute("fw_parent", AttrValue::Int64(data.fw_parent)),
            create_attribute("seq_id", AttrValue::Int64(data.seq_id)),
            create_attribute("scope", AttrValue::Int64(data.scope)),
            create_attribute("tid", AttrValue::Int64(data.tid)),
            create_attribute("fw_tid", AttrValue::Int64(data.fw_tid)),
            create_attribute("op_schema", AttrValue::String(data.op_schema.clone())),
            create_attribute("is_cpu_op", AttrValue::Int32(i32::from(!data.is_gpu_op()))),
            create_attribute("ts", AttrValue::Int64(record.timestamp)),
        ];
        if kind == NodeKind::CollectiveComm && record.is_gpu_op() {
            attr.extend(self.collective_attributes(key));
        }

        Node {
            id: record.id,
            name: data.name.clone(),
            r#type: NodeType::from(kind) as i32,
            ctrl_deps,
            data_deps: Vec::new(),
            duration_micros: record.duration_or_zero().max(0) as u64,
            inputs: Some(IoInfo {
                values: render(&data.inputs),
                shapes: render(&data.input_shapes),
                types: render(&data.input_types),
            }),
            outputs: Some(IoInfo {
                values: render(&data.outputs),
                shapes: render(&data.output_shapes),
                types: render(&data.output_types),
            }),
            attr,
            ..Default::default()
        }
    }

    fn collective_attributes(&self, key: RecordKey) -> [chakra_format::AttributeProto; 3] {
        let record = &self.arena[key];
        let comm_type = collective_comm_type(record.name()).unwrap_or_else(|| {
            tracing::warn!(
                id = record.id,
                name = record.name(),
                "unknown collective kernel, assuming all-reduce"
            );
            CollectiveCommType::AllReduce
        });
        [
            create_attribute("comm_type", AttrValue::Int64(comm_type as i64)),
            create_attribute("comm_size", AttrValue::Int64(self.comm_size(key))),
            create_attribute(
                "involved_dim",
                AttrValue::BoolList(vec![true; self.config.num_dims]),
            ),
        ]
    }

    /// Bytes moved by a collective kernel.
    ///
    /// Prefers an explicit size on the kernel, then the tensors handed to the
    /// parameter-communication record of the launching operator.
    fn comm_size(&self, key: RecordKey) -> i64 {
        let record = &self.arena[key];
        if let Some(size) = record.data.comm_size {
            return size;
        }
        let launcher = record.parent.and_then(|parent| self.arena.get(parent));
        let param_comms = launcher.and_then(|launcher| {
            if launcher.data.is_record_param_comms_op() {
                Some(launcher)
            } else {
                launcher
                    .record_param_comms
                    .and_then(|comms| self.arena.get(comms))
            }
        });
        match param_comms {
            Some(comms) => comms
                .data
                .comm_size
                .unwrap_or_else(|| comms.data.input_tensor_bytes()),
            None => record.data.input_tensor_bytes(),
        }
    }
}
