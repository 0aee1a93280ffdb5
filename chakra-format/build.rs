use std::io::Result;

fn main() -> Result<()> {
    println!("cargo:rerun-if-changed=protos/et_def.proto");
    prost_build::compile_protos(&["protos/et_def.proto"], &["protos/"])?;
    Ok(())
}
