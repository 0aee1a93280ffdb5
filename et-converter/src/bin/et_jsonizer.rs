use chakra_format::ChakraStreamReader;
use clap::Parser;
use eyre::{Context, Result};
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::sync::OnceLock;

static LONG_VERSION: OnceLock<String> = OnceLock::new();

fn get_long_version() -> &'static str {
    LONG_VERSION.get_or_init(|| {
        format!(
            "{} (commit: {})",
            env!("CARGO_PKG_VERSION"),
            env!("GIT_REVISION")
        )
    })
}

#[derive(Parser)]
#[command(name = "et-jsonizer")]
#[command(about = "decode a chakra execution trace into json lines")]
#[command(version = None, long_version = get_long_version())]
struct Args {
    #[arg(short, long, help = "chakra execution trace")]
    input: PathBuf,

    #[arg(short, long, help = "output file, one json object per record")]
    output: PathBuf,
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let reader = ChakraStreamReader::open(&args.input)
        .with_context(|| format!("failed to read trace path={}", args.input.display()))?;
    let file = File::create(&args.output)
        .with_context(|| format!("failed to create output path={}", args.output.display()))?;
    let nodes = et_converter::jsonizer::jsonize(reader, BufWriter::new(file))
        .wrap_err_with(|| format!("failed to decode {}", args.input.display()))?;

    tracing::info!(output = %args.output.display(), nodes, "jsonized trace");
    Ok(())
}
