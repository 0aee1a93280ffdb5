use clap::Parser;
use et_converter::{ChakraConverter, ConverterConfig};
use eyre::{Context, Result};
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

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
#[command(name = "et-converter")]
#[command(about = "convert a pytorch execution trace into a chakra execution trace")]
#[command(version = None, long_version = get_long_version())]
struct Args {
    #[arg(short, long, help = "pytorch execution trace (json)")]
    input: PathBuf,

    #[arg(short, long, help = "output chakra execution trace")]
    output: PathBuf,

    #[arg(long, help = "length of involved_dim on collective nodes")]
    num_dims: Option<usize>,

    #[arg(short, long, help = "converter configuration file path (toml format)")]
    config: Option<PathBuf>,

    #[arg(
        long,
        default_value = "info",
        help = "log filter used when RUST_LOG is not set"
    )]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))
        .wrap_err_with(|| format!("invalid log level {}", args.log_level))?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = match &args.config {
        Some(path) => ConverterConfig::load(path)
            .with_context(|| format!("failed to load config path={}", path.display()))?,
        None => ConverterConfig::default(),
    };
    if let Some(num_dims) = args.num_dims {
        config.num_dims = num_dims;
    }

    let start = Instant::now();
    let summary = ChakraConverter::new(config)
        .convert_file(&args.input, &args.output)
        .wrap_err_with(|| format!("failed to convert {}", args.input.display()))?;

    tracing::info!(
        output = %args.output.display(),
        nodes = summary.output_nodes,
        splits = summary.splits,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "conversion complete"
    );
    Ok(())
}
