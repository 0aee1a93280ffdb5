//! Writes a three-node Chakra trace and reads it back.
//!
//! Usage: streaming [output_file]

use chakra_format::{
    create_attribute, AttrValue, ChakraStreamReader, ChakraStreamWriter, GlobalMetadata, Node,
    NodeType,
};
use std::fs::File;
use std::io::BufWriter;

fn node(id: u64, name: &str, node_type: NodeType, data_deps: Vec<u64>, dur: u64) -> Node {
    Node {
        id,
        name: name.to_string(),
        r#type: node_type as i32,
        data_deps,
        duration_micros: dur,
        attr: vec![create_attribute(
            "is_cpu_op",
            AttrValue::Int32(i32::from(node_type != NodeType::CommCollNode)),
        )],
        ..Default::default()
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "streaming_example.et".to_string());

    let mut writer = ChakraStreamWriter::new(BufWriter::new(File::create(&path)?));
    writer.write_global_metadata(&GlobalMetadata {
        attr: vec![
            create_attribute("schema", AttrValue::String("1.0.1".to_string())),
            create_attribute("pid", AttrValue::Uint64(u64::from(std::process::id()))),
        ],
        ..Default::default()
    })?;
    writer.write_node(&node(1, "aten::mm", NodeType::CompNode, vec![], 40))?;
    writer.write_node(&node(2, "ncclDevKernel_AllReduce", NodeType::CommCollNode, vec![1], 25))?;
    writer.write_node(&node(3, "aten::add", NodeType::CompNode, vec![1], 10))?;
    writer.flush()?;
    println!("wrote {} nodes to {path}", writer.node_count());

    let mut reader = ChakraStreamReader::open(&path)?;
    let metadata = reader.read_global_metadata()?;
    println!("metadata: {} attributes", metadata.attr.len());
    for node in reader {
        let node = node?;
        println!(
            "{:>3} {:<28} {:<15} deps={:?}",
            node.id,
            node.name,
            node.r#type().as_str_name(),
            node.data_deps
        );
    }
    Ok(())
}
