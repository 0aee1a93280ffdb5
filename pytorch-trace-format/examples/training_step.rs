//! Builds a small PyTorch execution trace with one kernel launch and one
//! all-reduce, and writes it as JSON.
//!
//! Usage: training_step <output_file>

use pytorch_trace_format::*;
use serde_json::json;
use std::env;

const ROOT: &str = "[pytorch|profiler|execution_trace|thread]";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();
    let output_file = if args.len() > 1 {
        &args[1]
    } else {
        eprintln!("Usage: {} <output_file>", args[0]);
        std::process::exit(1);
    };

    let nodes = vec![
        PyTorchNode::builder().id(1).name(ROOT).tid(1).build(),
        PyTorchNode::builder()
            .id(2)
            .name("aten::mm")
            .parent(1)
            .op_schema("aten::mm(Tensor self, Tensor mat2) -> Tensor")
            .input_shapes(json!([[128, 256], [256, 64]]))
            .input_types(json!(["Tensor(float)", "Tensor(float)"]))
            .outputs(json!([[3, 0, 8192, 8192, 4, "cuda:0"]]))
            .tid(1)
            .ts(100)
            .dur(40)
            .build(),
        PyTorchNode::builder()
            .id(3)
            .name("ampere_sgemm_128x64_nn")
            .parent(2)
            .cat("kernel")
            .tid(7)
            .ts(120)
            .dur(55)
            .build(),
        PyTorchNode::builder()
            .id(4)
            .name("nccl:all_reduce")
            .parent(1)
            .tid(1)
            .ts(150)
            .dur(30)
            .build(),
        PyTorchNode::builder()
            .id(5)
            .name("record_param_comms")
            .parent(4)
            .input_shapes(json!([[[128, 64]]]))
            .input_types(json!(["GenericList[Tensor(float)]"]))
            .tid(1)
            .ts(152)
            .dur(2)
            .build(),
        PyTorchNode::builder()
            .id(6)
            .name("ncclDevKernel_AllReduce_Sum_f32_RING_LL")
            .parent(4)
            .cat("kernel")
            .tid(8)
            .ts(170)
            .dur(80)
            .build(),
    ];

    let trace = PyTorchTrace::builder()
        .schema("1.0.1")
        .pid(std::process::id() as u64)
        .time("2024-05-01 10:00:00")
        .start_ts(100)
        .finish_ts(250)
        .nodes(nodes)
        .build();

    for node in &trace.nodes {
        println!(
            "{:>2} {:<40} {:?} input bytes={}",
            node.id,
            node.name,
            node.op_type(),
            node.input_tensor_bytes()
        );
    }

    std::fs::write(output_file, serde_json::to_string_pretty(&trace)?)?;
    println!("wrote {} nodes to {output_file}", trace.nodes.len());
    Ok(())
}
