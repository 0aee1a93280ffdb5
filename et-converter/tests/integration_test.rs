use chakra_format::attribute_proto::Value as AttrVal;
use chakra_format::{
    BoolList, ChakraFeeder, ChakraStreamReader, CollectiveCommType, GlobalMetadata, Node, NodeType,
};
use et_converter::{ChakraConverter, ConvertError, ConverterConfig};
use eyre::{Context, Result};
use rstest::{fixture, rstest};
use serde_json::{json, Value};
use std::fs;
use std::path::PathBuf;
use std::process::{Command, Output};
use tempfile::TempDir;

const ROOT: &str = "[pytorch|profiler|execution_trace|thread]";

struct TestSetup {
    _temp_dir: TempDir,
    input_path: PathBuf,
    output_path: PathBuf,
    json_path: PathBuf,
    config_path: PathBuf,
}

impl TestSetup {
    fn new() -> Result<Self> {
        let temp_dir = TempDir::new()?;
        Ok(TestSetup {
            input_path: temp_dir.path().join("trace.json"),
            output_path: temp_dir.path().join("trace.et"),
            json_path: temp_dir.path().join("trace.et.json"),
            config_path: temp_dir.path().join("converter.toml"),
            _temp_dir: temp_dir,
        })
    }

    fn write_input(&self, nodes: Value) -> Result<()> {
        let trace = json!({
            "schema": "1.0.1",
            "pid": 7,
            "time": "2024-05-01 10:00:00",
            "start_ts": 1000,
            "finish_ts": 2000,
            "nodes": nodes,
        });
        fs::write(&self.input_path, serde_json::to_vec_pretty(&trace)?)?;
        Ok(())
    }

    fn read_output(&self) -> Result<(GlobalMetadata, Vec<Node>)> {
        let mut reader = ChakraStreamReader::open(&self.output_path)
            .with_context(|| format!("failed to open {}", self.output_path.display()))?;
        let metadata = reader.read_global_metadata()?;
        let nodes = reader.collect::<Result<Vec<_>, _>>()?;
        Ok((metadata, nodes))
    }

    fn run_converter(&self, extra: &[&str]) -> Result<Output> {
        let output = Command::new(env!("CARGO_BIN_EXE_et-converter"))
            .arg("--input")
            .arg(&self.input_path)
            .arg("--output")
            .arg(&self.output_path)
            .args(extra)
            .output()
            .context("failed to spawn et-converter")?;
        Ok(output)
    }
}

#[fixture]
fn setup() -> TestSetup {
    TestSetup::new().expect("failed to create test setup")
}

fn root(id: u64) -> Value {
    json!({ "id": id, "name": ROOT, "ts": 0 })
}

fn cpu_op(id: u64, parent: u64, name: &str, ts: i64, dur: i64) -> Value {
    json!({
        "id": id,
        "name": name,
        "parent": parent,
        "op_schema": format!("{name}(Tensor self) -> Tensor"),
        "tid": 1,
        "ts": ts,
        "dur": dur,
        "inputs": [[id, 0, 16, 16, 4, "cuda:0"]],
        "input_shapes": [[16]],
        "input_types": ["Tensor(float)"],
        "outputs": [],
        "output_shapes": [],
        "output_types": [],
    })
}

fn kernel(id: u64, parent: u64, name: &str, ts: i64, dur: i64) -> Value {
    json!({
        "id": id,
        "name": name,
        "parent": parent,
        "cat": "kernel",
        "tid": 7,
        "ts": ts,
        "dur": dur,
    })
}

fn named<'a>(nodes: &'a [Node], name: &str) -> Vec<&'a Node> {
    nodes.iter().filter(|node| node.name == name).collect()
}

#[rstest]
fn cpu_op_launching_kernel_is_split(setup: TestSetup) -> Result<()> {
    setup.write_input(json!([
        root(0),
        cpu_op(1, 0, "aten::mm", 0, 100),
        kernel(2, 1, "ampere_sgemm_128x64_nn", 40, 50),
    ]))?;

    let summary = ChakraConverter::default().convert_file(&setup.input_path, &setup.output_path)?;
    assert_eq!(summary.splits, 1);
    assert_eq!(summary.output_nodes, 4);

    let (metadata, nodes) = setup.read_output()?;
    let attr_names: Vec<&str> = metadata.attr.iter().map(|a| a.name.as_str()).collect();
    assert_eq!(attr_names, vec!["schema", "pid", "time", "start_ts", "finish_ts"]);

    let ids: Vec<u64> = nodes.iter().map(|node| node.id).collect();
    assert_eq!(ids, vec![3, 4, 5, 6]);

    let root = named(&nodes, ROOT)[0];
    let segments = named(&nodes, "aten::mm");
    assert_eq!(segments.len(), 2);
    let (first, second) = (segments[0], segments[1]);
    let gpu = named(&nodes, "ampere_sgemm_128x64_nn")[0];

    assert_eq!(first.data_deps, vec![root.id]);
    assert_eq!(gpu.data_deps, vec![first.id]);
    assert_eq!(second.data_deps, vec![first.id]);
    assert_eq!(first.duration_micros, 40);
    assert_eq!(second.duration_micros, 60);
    assert_eq!(gpu.r#type(), NodeType::CompNode);
    assert_eq!(gpu.attribute("is_cpu_op"), Some(&AttrVal::Int32Val(0)));
    assert_eq!(first.attribute("ts"), Some(&AttrVal::Int64Val(0)));
    assert_eq!(second.attribute("ts"), Some(&AttrVal::Int64Val(40)));
    Ok(())
}

#[rstest]
#[case::compute_kernel("ampere_sgemm_128x64_nn", NodeType::CompNode)]
#[case::collective_kernel("ncclDevKernel_AllReduce_Sum_f32_RING_LL", NodeType::CommCollNode)]
fn root_launching_kernel_yields_three_nodes(
    setup: TestSetup,
    #[case] kernel_name: &str,
    #[case] kernel_type: NodeType,
) -> Result<()> {
    setup.write_input(json!([
        { "id": 1, "name": ROOT, "ts": 0, "dur": 100 },
        kernel(2, 1, kernel_name, 40, 50),
    ]))?;

    let summary = ChakraConverter::default().convert_file(&setup.input_path, &setup.output_path)?;
    assert_eq!(summary.splits, 1);
    assert_eq!(summary.output_nodes, 3);

    let (_, nodes) = setup.read_output()?;
    let ids: Vec<u64> = nodes.iter().map(|node| node.id).collect();
    assert_eq!(ids, vec![3, 4, 5]);

    let segments = named(&nodes, ROOT);
    assert_eq!(segments.len(), 2);
    let (first, second) = (segments[0], segments[1]);
    let gpu = named(&nodes, kernel_name)[0];
    assert_eq!(first.id, 3);
    assert!(first.data_deps.is_empty());
    assert_eq!(gpu.data_deps, vec![3]);
    assert_eq!(second.data_deps, vec![3]);
    assert_eq!(gpu.r#type(), kernel_type);
    if kernel_type == NodeType::CommCollNode {
        assert_eq!(gpu.comm_type(), Some(CollectiveCommType::AllReduce));
    } else {
        assert!(gpu.attribute("comm_type").is_none());
    }

    let feeder = ChakraFeeder::new(ChakraStreamReader::open(&setup.output_path)?)?;
    let order: Vec<u64> = feeder.map(|node| node.id).collect();
    assert_eq!(order, vec![3, 4, 5]);
    Ok(())
}

#[rstest]
fn collective_kernel_gets_comm_attributes(setup: TestSetup) -> Result<()> {
    setup.write_input(json!([
        root(0),
        { "id": 1, "name": "nccl:all_reduce", "parent": 0, "ts": 0, "dur": 100 },
        {
            "id": 2,
            "name": "record_param_comms",
            "parent": 1,
            "ts": 5,
            "dur": 10,
            "input_shapes": [[1024]],
            "input_types": ["Tensor(float)"],
        },
        kernel(3, 1, "ncclKernel_AllReduce_RING_LL_Sum_float", 30, 40),
    ]))?;

    let config = ConverterConfig {
        num_dims: 2,
        ..Default::default()
    };
    ChakraConverter::new(config).convert_file(&setup.input_path, &setup.output_path)?;
    let (_, nodes) = setup.read_output()?;

    let gpu = named(&nodes, "ncclKernel_AllReduce_RING_LL_Sum_float")[0];
    assert_eq!(gpu.r#type(), NodeType::CommCollNode);
    assert_eq!(
        gpu.attribute("comm_type"),
        Some(&AttrVal::Int64Val(CollectiveCommType::AllReduce as i64))
    );
    assert_eq!(gpu.attribute("comm_size"), Some(&AttrVal::Int64Val(4096)));
    assert_eq!(
        gpu.attribute("involved_dim"),
        Some(&AttrVal::BoolList(BoolList {
            values: vec![true, true]
        }))
    );

    for launch in named(&nodes, "nccl:all_reduce") {
        assert_eq!(launch.r#type(), NodeType::CommCollNode);
        assert!(launch.attribute("comm_type").is_none());
    }
    let comms = named(&nodes, "record_param_comms")[0];
    assert_eq!(comms.data_deps.len(), 1);
    Ok(())
}

#[rstest]
fn call_tree_is_chained_depth_first(setup: TestSetup) -> Result<()> {
    setup.write_input(json!([
        root(0),
        cpu_op(1, 0, "aten::linear", 0, 40),
        cpu_op(2, 1, "aten::addmm", 5, 30),
        cpu_op(3, 0, "aten::relu", 50, 10),
    ]))?;

    ChakraConverter::default().convert_file(&setup.input_path, &setup.output_path)?;
    let (_, nodes) = setup.read_output()?;

    let linear = named(&nodes, "aten::linear")[0];
    let addmm = named(&nodes, "aten::addmm")[0];
    let relu = named(&nodes, "aten::relu")[0];
    assert_eq!(linear.data_deps, vec![named(&nodes, ROOT)[0].id]);
    assert_eq!(addmm.data_deps, vec![linear.id]);
    assert_eq!(addmm.ctrl_deps, vec![linear.id]);
    assert_eq!(relu.data_deps, vec![addmm.id]);
    Ok(())
}

#[rstest]
#[case::kernel_starts_when_cpu_op_ends(40, 10, 50)]
#[case::kernel_starts_before_cpu_op(50, 10, 40)]
#[case::kernel_starts_after_cpu_op_ends(0, 30, 60)]
#[case::kernel_starts_with_cpu_op(0, 30, 0)]
fn inconsistent_timestamps_leave_no_output(
    setup: TestSetup,
    #[case] cpu_ts: i64,
    #[case] cpu_dur: i64,
    #[case] gpu_ts: i64,
) -> Result<()> {
    setup.write_input(json!([
        root(0),
        cpu_op(1, 0, "aten::mm", cpu_ts, cpu_dur),
        kernel(2, 1, "ampere_sgemm_128x64_nn", gpu_ts, 5),
    ]))?;

    let err = ChakraConverter::default()
        .convert_file(&setup.input_path, &setup.output_path)
        .unwrap_err();
    assert!(matches!(err, ConvertError::TimestampInconsistency { id: 1, .. }));
    assert!(!setup.output_path.exists());
    Ok(())
}

#[rstest]
fn malformed_input_is_a_load_error(setup: TestSetup) -> Result<()> {
    fs::write(&setup.input_path, "{ \"schema\": ")?;
    let err = ChakraConverter::default()
        .convert_file(&setup.input_path, &setup.output_path)
        .unwrap_err();
    assert!(matches!(err, ConvertError::Load(_)));
    assert!(!setup.output_path.exists());
    Ok(())
}

#[rstest]
fn binaries_convert_and_jsonize(setup: TestSetup) -> Result<()> {
    setup.write_input(json!([
        root(0),
        cpu_op(1, 0, "aten::mm", 0, 100),
        kernel(2, 1, "ncclDevKernel_AllGather_RING_LL", 40, 50),
    ]))?;
    fs::write(&setup.config_path, "num_dims = 3\n")?;

    let output = setup.run_converter(&["--config", setup.config_path.to_str().unwrap_or_default()])?;
    assert!(
        output.status.success(),
        "et-converter failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let output = Command::new(env!("CARGO_BIN_EXE_et-jsonizer"))
        .arg("--input")
        .arg(&setup.output_path)
        .arg("--output")
        .arg(&setup.json_path)
        .output()
        .context("failed to spawn et-jsonizer")?;
    assert!(
        output.status.success(),
        "et-jsonizer failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let text = fs::read_to_string(&setup.json_path)?;
    let records: Vec<Value> = text
        .lines()
        .map(serde_json::from_str)
        .collect::<Result<_, _>>()?;
    assert_eq!(records.len(), 5);
    assert_eq!(records[0]["attr"][1], json!({ "name": "pid", "uint64Val": "7" }));

    let ids: Vec<u64> = records[1..]
        .iter()
        .filter_map(|record| record["id"].as_str()?.parse().ok())
        .collect();
    assert_eq!(ids, vec![3, 4, 5, 6]);

    let gpu = records
        .iter()
        .find(|record| record["name"] == "ncclDevKernel_AllGather_RING_LL")
        .cloned()
        .unwrap_or_default();
    assert_eq!(gpu["type"], "COMM_COLL_NODE");
    assert_eq!(gpu["dataDeps"], json!(["4"]));
    let involved = gpu["attr"]
        .as_array()
        .and_then(|attrs| attrs.iter().find(|attr| attr["name"] == "involved_dim"))
        .cloned()
        .unwrap_or_default();
    assert_eq!(involved["boolList"]["values"], json!([true, true, true]));
    Ok(())
}

#[rstest]
fn converter_binary_reports_failures(setup: TestSetup) -> Result<()> {
    setup.write_input(json!([
        root(0),
        cpu_op(1, 0, "aten::mm", 50, 10),
        kernel(2, 1, "ampere_sgemm_128x64_nn", 40, 5),
    ]))?;

    let output = setup.run_converter(&[])?;
    assert!(!output.status.success());
    assert!(!setup.output_path.exists());
    Ok(())
}
