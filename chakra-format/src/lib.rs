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

//! # Chakra Execution Trace Format
//!
//! Message definitions for the Chakra execution trace and a streaming codec for it.
//!
//! A Chakra trace file is a sequence of length-delimited protobuf messages: one
//! [`GlobalMetadata`] record followed by any number of [`Node`] records. Every
//! message is prefixed by its encoded length as a varint, so consumers can decode
//! the file sequentially without an index.

use bytes::{Buf, Bytes, BytesMut};
use prost::Message;
use std::io::Write;
use std::path::Path;
use thiserror::Error;

#[allow(clippy::all)]
#[rustfmt::skip]
pub mod chakra {
    include!(concat!(env!("OUT_DIR"), "/chakra_proto_msg.rs"));
}

pub mod feeder;

pub use chakra::*;
pub use feeder::ChakraFeeder;

#[derive(Error, Debug)]
pub enum ChakraFormatError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode message: {0}")]
    Encode(#[from] prost::EncodeError),
    #[error("failed to decode message at byte offset {offset}: {source}")]
    Decode {
        offset: usize,
        #[source]
        source: prost::DecodeError,
    },
    #[error("trace does not start with a global metadata record")]
    MissingMetadata,
    #[error("node {id} is not loaded")]
    UnknownNode { id: u64 },
    #[error("node {id} depends on node {dep}, which is not in the trace")]
    UnresolvedDependency { id: u64, dep: u64 },
    #[error("node {id} appears more than once")]
    DuplicateNode { id: u64 },
}

pub type Result<T> = std::result::Result<T, ChakraFormatError>;

/// Writes Chakra records to `W`, one length-delimited message at a time.
pub struct ChakraStreamWriter<W: Write> {
    writer: W,
    node_count: u64,
}

impl<W: Write> ChakraStreamWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            node_count: 0,
        }
    }

    pub fn write_global_metadata(&mut self, metadata: &GlobalMetadata) -> Result<()> {
        self.write_message(metadata)
    }

    pub fn write_node(&mut self, node: &Node) -> Result<()> {
        self.write_message(node)?;
        self.node_count += 1;
        Ok(())
    }

    pub fn write_message(&mut self, message: &impl Message) -> Result<()> {
        let mut buf = BytesMut::with_capacity(message.encoded_len() + 10);
        message.encode_length_delimited(&mut buf)?;
        self.writer.write_all(&buf)?;
        Ok(())
    }

    pub fn node_count(&self) -> u64 {
        self.node_count
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

/// Sequential decoder over an in-memory Chakra trace.
pub struct ChakraStreamReader {
    buf: Bytes,
    total_len: usize,
}

impl ChakraStreamReader {
    pub fn new(buf: impl Into<Bytes>) -> Self {
        let buf = buf.into();
        let total_len = buf.len();
        Self { buf, total_len }
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read(path)?;
        Ok(Self::new(contents))
    }

    fn offset(&self) -> usize {
        self.total_len - self.buf.remaining()
    }

    pub fn read_global_metadata(&mut self) -> Result<GlobalMetadata> {
        if !self.buf.has_remaining() {
            return Err(ChakraFormatError::MissingMetadata);
        }
        let offset = self.offset();
        GlobalMetadata::decode_length_delimited(&mut self.buf)
            .map_err(|source| ChakraFormatError::Decode { offset, source })
    }

    /// Returns the next node, or `None` once the buffer is exhausted.
    pub fn next_node(&mut self) -> Result<Option<Node>> {
        if !self.buf.has_remaining() {
            return Ok(None);
        }
        let offset = self.offset();
        Node::decode_length_delimited(&mut self.buf)
            .map(Some)
            .map_err(|source| ChakraFormatError::Decode { offset, source })
    }
}

impl Iterator for ChakraStreamReader {
    type Item = Result<Node>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_node().transpose()
    }
}

impl Node {
    pub fn attribute(&self, name: &str) -> Option<&attribute_proto::Value> {
        self.attr
            .iter()
            .find(|attr| attr.name == name)
            .and_then(|attr| attr.value.as_ref())
    }
}

pub fn create_attribute(name: &str, value: AttrValue) -> AttributeProto {
    AttributeProto {
        name: name.to_string(),
        value: Some(match value {
            AttrValue::String(s) => attribute_proto::Value::StringVal(s),
            AttrValue::Int32(i) => attribute_proto::Value::Int32Val(i),
            AttrValue::Int64(i) => attribute_proto::Value::Int64Val(i),
            AttrValue::Uint64(u) => attribute_proto::Value::Uint64Val(u),
            AttrValue::Bool(b) => attribute_proto::Value::BoolVal(b),
            AttrValue::BoolList(values) => {
                attribute_proto::Value::BoolList(BoolList { values })
            }
        }),
        ..Default::default()
    }
}

#[derive(Debug, Clone)]
pub enum AttrValue {
    String(String),
    Int32(i32),
    Int64(i64),
    Uint64(u64),
    Bool(bool),
    BoolList(Vec<bool>),
}
