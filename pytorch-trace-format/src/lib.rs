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

//! # PyTorch Execution Trace Format
//!
//! This crate provides Rust types for the PyTorch execution trace, the JSON document
//! written by the PyTorch execution trace observer and, once merged with a Kineto
//! profile, enriched with GPU kernel records.
//!
//! ## Format Overview
//!
//! A trace is a single JSON object carrying trace-level metadata and a flat array of
//! operator records:
//!
//! ```json
//! {
//!   "schema": "1.0.1", "pid": 7, "time": "2023-09-01 10:00:00",
//!   "start_ts": 100, "finish_ts": 900,
//!   "nodes": [
//!     {"id": 2, "name": "[pytorch|profiler|execution_trace|thread]", "parent": 1},
//!     {"id": 3, "name": "aten::mm", "parent": 2, "op_schema": "aten::mm(...)", "ts": 0, "dur": 100}
//!   ]
//! }
//! ```
//!
//! ## Operator Kinds
//!
//! Records form a call tree through their `parent` field. Each record falls into one
//! of three kinds, see [`PyTorchNodeType`]:
//! - **GPU operators** carry a Kineto category (`cat`) and are launched by a CPU operator
//! - **CPU operators** have a call schema or produce outputs
//! - **Labels** are everything else: thread roots, record-function scopes, annotations
//!
//! ## Timestamps
//!
//! `ts` and `dur` are in microseconds. Records captured only by the execution trace
//! observer may lack them, in which case `ts` reads as zero and `dur` as absent.

use bon::Builder;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::{BufReader, Read};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PyTorchTraceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed execution trace: {0}")]
    Json(#[from] serde_json::Error),
}

/// The top-level PyTorch execution trace document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
pub struct PyTorchTrace {
    /// Schema version tag written by the trace observer, for example "1.0.1".
    #[builder(into)]
    pub schema: String,

    /// Process ID of the traced program.
    pub pid: u64,

    /// Wall-clock time at which the trace was captured, as a free-form string.
    #[serde(default)]
    #[builder(default, into)]
    pub time: String,

    /// Timestamp at which collection started.
    #[serde(default)]
    #[builder(default)]
    pub start_ts: u64,

    /// Timestamp at which collection finished.
    #[serde(default)]
    #[builder(default)]
    pub finish_ts: u64,

    /// Operator records in the order the observer emitted them.
    pub nodes: Vec<PyTorchNode>,
}

impl PyTorchTrace {
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, PyTorchTraceError> {
        Ok(serde_json::from_reader(BufReader::new(reader))?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, PyTorchTraceError> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(file)
    }

    /// Largest operator ID in the trace, if there are any operators.
    pub fn max_node_id(&self) -> Option<u64> {
        self.nodes.iter().map(|node| node.id).max()
    }
}

impl std::str::FromStr for PyTorchTrace {
    type Err = PyTorchTraceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(serde_json::from_str(s)?)
    }
}

/// Kind of an operator record, derived from its fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PyTorchNodeType {
    /// Host-side operator with a call schema or outputs.
    CpuOp,
    /// Device kernel or memory operation captured by Kineto.
    GpuOp,
    /// Scope marker without a schema or outputs, such as a thread root.
    Label,
}

/// A single operator record.
///
/// Value, shape and type triples are kept as raw JSON. Their structure depends on the
/// operator and is only inspected to size communication buffers, see
/// [`PyTorchNode::input_tensor_bytes`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
pub struct PyTorchNode {
    /// Operator ID, unique within the trace.
    pub id: u64,

    /// Operator or kernel name, for example `aten::mm` or `ncclDevKernel_AllReduce_Sum_f32`.
    #[builder(into)]
    pub name: String,

    /// ID of the calling operator. Absent for the outermost records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<u64>,

    /// Record function ID linking the operator to the profiler's record function.
    #[serde(default)]
    #[builder(default)]
    pub rf_id: i64,

    /// ID of the forward operator this backward operator was derived from.
    #[serde(default)]
    #[builder(default)]
    pub fw_parent: i64,

    /// Autograd sequence number.
    #[serde(default)]
    #[builder(default)]
    pub seq_id: i64,

    /// Record scope (function, backward function, user scope and so on).
    #[serde(default)]
    #[builder(default)]
    pub scope: i64,

    /// Thread ID on which the operator ran.
    #[serde(default)]
    #[builder(default)]
    pub tid: i64,

    /// Thread ID of the forward operator, for backward operators.
    #[serde(default)]
    #[builder(default)]
    pub fw_tid: i64,

    /// Call schema of the operator. Empty for labels and kernels.
    #[serde(default)]
    #[builder(default, into)]
    pub op_schema: String,

    #[serde(default)]
    #[builder(default)]
    pub inputs: Value,

    #[serde(default)]
    #[builder(default)]
    pub input_shapes: Value,

    #[serde(default)]
    #[builder(default)]
    pub input_types: Value,

    #[serde(default)]
    #[builder(default)]
    pub outputs: Value,

    #[serde(default)]
    #[builder(default)]
    pub output_shapes: Value,

    #[serde(default)]
    #[builder(default)]
    pub output_types: Value,

    /// Kineto category. Present only on GPU-side records ("kernel", "gpu_memcpy", ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(into)]
    pub cat: Option<String>,

    /// Start timestamp in microseconds.
    #[serde(default)]
    #[builder(default)]
    pub ts: i64,

    /// Duration in microseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dur: Option<i64>,

    /// Explicit communication size in bytes for collective records.
    ///
    /// When absent the size is derived from the tensors passed to the
    /// parameter-communication record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comm_size: Option<i64>,
}

impl PyTorchNode {
    pub fn op_type(&self) -> PyTorchNodeType {
        if self.is_gpu_op() {
            PyTorchNodeType::GpuOp
        } else if !self.op_schema.is_empty() || self.has_outputs() {
            PyTorchNodeType::CpuOp
        } else {
            PyTorchNodeType::Label
        }
    }

    pub fn is_gpu_op(&self) -> bool {
        self.cat.is_some()
    }

    pub fn is_cpu_op(&self) -> bool {
        self.op_type() == PyTorchNodeType::CpuOp
    }

    pub fn is_record_param_comms_op(&self) -> bool {
        self.name.contains("record_param_comms")
    }

    pub fn is_nccl_op(&self) -> bool {
        self.name.contains("nccl:")
    }

    pub fn has_outputs(&self) -> bool {
        is_non_empty(&self.outputs)
    }

    /// Total size in bytes of the tensors among this operator's inputs.
    ///
    /// Inputs typed `Tensor(<dtype>)` contribute the product of their shape times the
    /// element size; `GenericList[...]` inputs contribute the sum over their members.
    /// Scalars and tensors of unknown element type contribute nothing. Sizes that
    /// do not fit an `i64` saturate at `i64::MAX`.
    pub fn input_tensor_bytes(&self) -> i64 {
        let (Some(types), Some(shapes)) =
            (self.input_types.as_array(), self.input_shapes.as_array())
        else {
            return 0;
        };
        types
            .iter()
            .zip(shapes)
            .map(|(ty, shape)| ty.as_str().map_or(0, |ty| value_bytes(ty, shape)))
            .fold(0, i64::saturating_add)
    }
}

fn is_non_empty(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
        Value::String(s) => !s.is_empty(),
        Value::Bool(_) | Value::Number(_) => true,
    }
}

fn value_bytes(ty: &str, shape: &Value) -> i64 {
    if let Some(members) = ty
        .strip_prefix("GenericList[")
        .and_then(|rest| rest.strip_suffix(']'))
    {
        let Some(shapes) = shape.as_array() else {
            return 0;
        };
        return members
            .split(',')
            .zip(shapes)
            .map(|(member, shape)| value_bytes(member.trim(), shape))
            .fold(0, i64::saturating_add);
    }

    let Some(dtype) = ty
        .strip_prefix("Tensor(")
        .and_then(|rest| rest.strip_suffix(')'))
    else {
        return 0;
    };
    let Some(element_size) = element_size(dtype) else {
        return 0;
    };
    let Some(dims) = shape.as_array() else {
        return 0;
    };
    dims.iter()
        .filter_map(Value::as_i64)
        .try_fold(element_size, i64::checked_mul)
        .unwrap_or(i64::MAX)
}

/// Size in bytes of one element of a tensor dtype as spelled in `input_types`.
pub fn element_size(dtype: &str) -> Option<i64> {
    let dtype = dtype.strip_prefix("c10::").unwrap_or(dtype);
    let size = match dtype {
        "double" | "long" | "long int" | "int64_t" | "complex<float>" | "ComplexFloat" => 8,
        "float" | "int" | "int32_t" | "unsigned int" => 4,
        "Half" | "BFloat16" | "half" | "short" | "int16_t" => 2,
        "bool" | "char" | "signed char" | "unsigned char" | "uint8_t" | "int8_t"
        | "Float8_e4m3fn" | "Float8_e5m2" => 1,
        "complex<double>" | "ComplexDouble" => 16,
        _ => return None,
    };
    Some(size)
}
