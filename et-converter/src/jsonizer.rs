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

//! Renders Chakra records as JSON in the canonical protobuf JSON mapping:
//! lowerCamelCase field names, 64-bit integers as strings, enums by name and
//! default-valued fields omitted.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chakra_format::attribute_proto::Value as AttrVal;
use chakra_format::{AttributeProto, ChakraStreamReader, GlobalMetadata, IoInfo, Node, NodeType};
use serde_json::{json, Map, Value};
use std::io::Write;

fn put(map: &mut Map<String, Value>, key: &str, value: Value) {
    let is_default = match &value {
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Null => true,
        _ => false,
    };
    if !is_default {
        map.insert(key.to_string(), value);
    }
}

fn put_u64(map: &mut Map<String, Value>, key: &str, value: u64) {
    if value != 0 {
        map.insert(key.to_string(), Value::String(value.to_string()));
    }
}

fn u64_list(values: &[u64]) -> Value {
    values.iter().map(|v| Value::String(v.to_string())).collect()
}

fn float(value: f64) -> Value {
    if value.is_nan() {
        json!("NaN")
    } else if value.is_infinite() {
        json!(if value > 0.0 { "Infinity" } else { "-Infinity" })
    } else {
        json!(value)
    }
}

fn int64(value: impl ToString) -> Value {
    Value::String(value.to_string())
}

fn bytes(value: &[u8]) -> Value {
    Value::String(BASE64.encode(value))
}

/// A repeated-value wrapper message such as `Int64List`.
fn list<T>(values: &[T], render: impl Fn(&T) -> Value) -> Value {
    let mut map = Map::new();
    put(&mut map, "values", values.iter().map(render).collect());
    Value::Object(map)
}

fn attribute_value_to_json(value: &AttrVal) -> (&'static str, Value) {
    match value {
        AttrVal::DoubleVal(v) => ("doubleVal", float(*v)),
        AttrVal::DoubleList(l) => ("doubleList", list(&l.values, |v| float(*v))),
        AttrVal::FloatVal(v) => ("floatVal", float(f64::from(*v))),
        AttrVal::FloatList(l) => ("floatList", list(&l.values, |v| float(f64::from(*v)))),
        AttrVal::Int32Val(v) => ("int32Val", json!(v)),
        AttrVal::Int32List(l) => ("int32List", list(&l.values, |v| json!(v))),
        AttrVal::Int64Val(v) => ("int64Val", int64(v)),
        AttrVal::Int64List(l) => ("int64List", list(&l.values, |v| int64(v))),
        AttrVal::Uint32Val(v) => ("uint32Val", json!(v)),
        AttrVal::Uint32List(l) => ("uint32List", list(&l.values, |v| json!(v))),
        AttrVal::Uint64Val(v) => ("uint64Val", int64(v)),
        AttrVal::Uint64List(l) => ("uint64List", list(&l.values, |v| int64(v))),
        AttrVal::Sint32Val(v) => ("sint32Val", json!(v)),
        AttrVal::Sint32List(l) => ("sint32List", list(&l.values, |v| json!(v))),
        AttrVal::Sint64Val(v) => ("sint64Val", int64(v)),
        AttrVal::Sint64List(l) => ("sint64List", list(&l.values, |v| int64(v))),
        AttrVal::Fixed32Val(v) => ("fixed32Val", json!(v)),
        AttrVal::Fixed32List(l) => ("fixed32List", list(&l.values, |v| json!(v))),
        AttrVal::Fixed64Val(v) => ("fixed64Val", int64(v)),
        AttrVal::Fixed64List(l) => ("fixed64List", list(&l.values, |v| int64(v))),
        AttrVal::Sfixed32Val(v) => ("sfixed32Val", json!(v)),
        AttrVal::Sfixed32List(l) => ("sfixed32List", list(&l.values, |v| json!(v))),
        AttrVal::Sfixed64Val(v) => ("sfixed64Val", int64(v)),
        AttrVal::Sfixed64List(l) => ("sfixed64List", list(&l.values, |v| int64(v))),
        AttrVal::BoolVal(v) => ("boolVal", json!(v)),
        AttrVal::BoolList(l) => ("boolList", list(&l.values, |v| json!(v))),
        AttrVal::StringVal(v) => ("stringVal", json!(v)),
        AttrVal::StringList(l) => ("stringList", list(&l.values, |v| json!(v))),
        AttrVal::BytesVal(v) => ("bytesVal", bytes(v)),
        AttrVal::BytesList(l) => ("bytesList", list(&l.values, |v| bytes(v))),
    }
}

fn attribute_to_json(attr: &AttributeProto) -> Value {
    let mut map = Map::new();
    put(&mut map, "name", json!(attr.name));
    put(&mut map, "docString", json!(attr.doc_string));
    if let Some(value) = &attr.value {
        // A set oneof member is always emitted, even at its default value.
        let (key, value) = attribute_value_to_json(value);
        map.insert(key.to_string(), value);
    }
    Value::Object(map)
}

fn io_info_to_json(io: &IoInfo) -> Value {
    let mut map = Map::new();
    put(&mut map, "values", json!(io.values));
    put(&mut map, "shapes", json!(io.shapes));
    put(&mut map, "types", json!(io.types));
    Value::Object(map)
}

pub fn metadata_to_json(metadata: &GlobalMetadata) -> Value {
    let mut map = Map::new();
    put(&mut map, "version", json!(metadata.version));
    put(
        &mut map,
        "attr",
        metadata.attr.iter().map(attribute_to_json).collect(),
    );
    Value::Object(map)
}

pub fn node_to_json(node: &Node) -> Value {
    let mut map = Map::new();
    put_u64(&mut map, "id", node.id);
    put(&mut map, "name", json!(node.name));
    if node.r#type != NodeType::InvalidNode as i32 {
        // Unknown enum values are rendered as their number.
        let node_type = NodeType::try_from(node.r#type)
            .map(|t| json!(t.as_str_name()))
            .unwrap_or_else(|_| json!(node.r#type));
        map.insert("type".to_string(), node_type);
    }
    put(&mut map, "ctrlDeps", u64_list(&node.ctrl_deps));
    put(&mut map, "dataDeps", u64_list(&node.data_deps));
    put_u64(&mut map, "startTimeMicros", node.start_time_micros);
    put_u64(&mut map, "durationMicros", node.duration_micros);
    if let Some(inputs) = &node.inputs {
        map.insert("inputs".to_string(), io_info_to_json(inputs));
    }
    if let Some(outputs) = &node.outputs {
        map.insert("outputs".to_string(), io_info_to_json(outputs));
    }
    put(
        &mut map,
        "attr",
        node.attr.iter().map(attribute_to_json).collect(),
    );
    Value::Object(map)
}

/// Decodes every record of `reader` and writes one JSON object per line,
/// metadata first. Returns the number of nodes written.
pub fn jsonize<W: Write>(mut reader: ChakraStreamReader, mut writer: W) -> eyre::Result<u64> {
    let metadata = reader.read_global_metadata()?;
    serde_json::to_writer(&mut writer, &metadata_to_json(&metadata))?;
    writer.write_all(b"\n")?;

    let mut count = 0;
    for node in reader {
        serde_json::to_writer(&mut writer, &node_to_json(&node?))?;
        writer.write_all(b"\n")?;
        count += 1;
    }
    writer.flush()?;
    tracing::debug!(nodes = count, "decoded chakra trace");
    Ok(count)
}
