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

use crate::error::{ConvertError, Result};
use chakra_format::{create_attribute, AttrValue, ChakraStreamWriter, GlobalMetadata, Node};
use pytorch_trace_format::PyTorchTrace;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Trace-level fields copied from the input into the output header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TraceMetadata {
    pub schema: String,
    pub pid: u64,
    pub time: String,
    pub start_ts: u64,
    pub finish_ts: u64,
}

impl TraceMetadata {
    pub fn from_trace(trace: &PyTorchTrace) -> Self {
        Self {
            schema: trace.schema.clone(),
            pid: trace.pid,
            time: trace.time.clone(),
            start_ts: trace.start_ts,
            finish_ts: trace.finish_ts,
        }
    }

    pub fn to_global_metadata(&self) -> GlobalMetadata {
        GlobalMetadata {
            version: String::new(),
            attr: vec![
                create_attribute("schema", AttrValue::String(self.schema.clone())),
                create_attribute("pid", AttrValue::Uint64(self.pid)),
                create_attribute("time", AttrValue::String(self.time.clone())),
                create_attribute("start_ts", AttrValue::Uint64(self.start_ts)),
                create_attribute("finish_ts", AttrValue::Uint64(self.finish_ts)),
            ],
        }
    }
}

/// Sorts `nodes` by ID and fails on the first repeated ID.
fn sorted_unique(mut nodes: Vec<Node>) -> Result<Vec<Node>> {
    nodes.sort_by_key(|node| node.id);
    if let Some(pair) = nodes.windows(2).find(|pair| pair[0].id == pair[1].id) {
        let err = ConvertError::DuplicateIdentity {
            id: pair[0].id,
            first: pair[0].name.clone(),
            second: pair[1].name.clone(),
        };
        tracing::error!(error = %err, "refusing to write trace");
        return Err(err);
    }
    Ok(nodes)
}

/// Writes the header and then every node in ascending ID order.
///
/// Duplicate IDs are rejected before anything reaches `writer`. Returns the
/// number of nodes written.
pub fn write_trace<W: Write>(
    writer: &mut ChakraStreamWriter<W>,
    metadata: &TraceMetadata,
    nodes: Vec<Node>,
) -> Result<u64> {
    let nodes = sorted_unique(nodes)?;
    writer.write_global_metadata(&metadata.to_global_metadata())?;
    for node in &nodes {
        writer.write_node(node)?;
    }
    writer.flush()?;
    Ok(nodes.len() as u64)
}

/// Writes the trace to `path`, replacing any existing file only on success.
pub fn persist_trace(path: &Path, metadata: &TraceMetadata, nodes: Vec<Node>) -> Result<u64> {
    let nodes = sorted_unique(nodes)?;
    let persist_err = |source: std::io::Error| ConvertError::Persist {
        path: path.to_path_buf(),
        source,
    };

    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let temp = tempfile::NamedTempFile::new_in(dir).map_err(persist_err)?;
    let mut writer = ChakraStreamWriter::new(BufWriter::new(temp));
    let written = write_trace(&mut writer, metadata, nodes)?;

    let temp = writer
        .into_inner()
        .into_inner()
        .map_err(|e| persist_err(e.into_error()))?;
    temp.persist(path).map_err(|e| persist_err(e.error))?;
    tracing::info!(path = %path.display(), nodes = written, "wrote chakra trace");
    Ok(written)
}
