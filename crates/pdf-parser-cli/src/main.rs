use std::path::PathBuf;
use std::time::Duration;

use clap::Parser as ClapParser;
use tracing_subscriber::EnvFilter;

use pdf_parser_core::config_file::{self, ConfigFile};
use pdf_parser_core::{Backend, Kind, ParseOptions, Parser, Settings};

mod output;

use output::ColorMode;

/// Extract text or figures from scientific PDFs with GROBID, Science Parse,
/// CERMINE, pdffigures or pdffigures2
#[derive(ClapParser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Input directory or input PDF file
    input_path: PathBuf,

    /// Output directory (created when missing)
    output_path: PathBuf,

    /// Backend to use
    #[arg(short, long, default_value = "grobid")]
    backend: String,

    /// Type of content: text or figure
    #[arg(short = 't', long = "type", default_value = "text")]
    kind: String,

    /// Number of workers for directory inputs (0 picks the backend default)
    #[arg(short = 'n', long)]
    threads: Option<usize>,

    /// Path to a TOML config file (default: ./.pdf-parser.toml over the
    /// platform config)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host of the GROBID or Science Parse server
    #[arg(long)]
    host: Option<String>,

    /// Port of the GROBID or Science Parse server
    #[arg(long)]
    port: Option<u16>,

    /// Java executable for CERMINE and pdffigures2
    #[arg(long)]
    java: Option<PathBuf>,

    /// Parent directory for scratch directories
    #[arg(long)]
    scratch_dir: Option<PathBuf>,

    /// Re-process inputs whose output already exists
    #[arg(long)]
    force: bool,

    /// Ask GROBID to generate xml:id attributes
    #[arg(long)]
    generate_ids: bool,

    /// Ask GROBID to consolidate the header against external metadata
    #[arg(long)]
    consolidate_header: bool,

    /// Ask GROBID to consolidate citations against external metadata
    #[arg(long)]
    consolidate_citations: bool,

    /// Ask GROBID for element coordinates in the TEI output
    #[arg(long)]
    tei_coordinates: bool,

    /// Shuffle directory inputs before batching
    #[arg(long, conflicts_with = "no_shuffle")]
    shuffle: bool,

    /// Keep directory inputs in sorted order
    #[arg(long)]
    no_shuffle: bool,

    /// Seconds to wait between attempts while GROBID is overloaded
    #[arg(long)]
    sleep_secs: Option<u64>,

    /// Give up on a document after this many overloaded answers
    #[arg(long)]
    max_busy_retries: Option<u32>,

    /// More logging (-v debug, -vv trace); RUST_LOG overrides
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let backend: Backend = cli.backend.parse()?;
    let kind: Kind = cli.kind.parse()?;

    // Resolve configuration: CLI flags > env vars > config file > defaults
    let file = match &cli.config {
        Some(path) => config_file::load_from_path(path).ok_or_else(|| {
            anyhow::anyhow!("Could not read config file {}", path.display())
        })?,
        None => config_file::load_config(),
    };
    let layered = config_file::merge(file, config_file::from_env(|name| std::env::var(name).ok()));
    let settings = resolve_settings(&cli, backend, &layered);
    let threads = cli.threads.or(layered.threads()).unwrap_or(0);

    let options = ParseOptions {
        force: cli.force,
        generate_ids: cli.generate_ids,
        consolidate_header: cli.consolidate_header,
        consolidate_citations: cli.consolidate_citations,
        tei_coordinates: cli.tei_coordinates,
        shuffle: match (cli.shuffle, cli.no_shuffle) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        },
    };

    let parser = Parser::with_backend(backend, &settings).await;
    if !parser.health().is_healthy() {
        tracing::warn!(backend = %backend, "backend is not available, no file will be processed");
    }

    let stats = parser
        .parse(
            kind.as_str(),
            &cli.input_path,
            &cli.output_path,
            threads,
            &options,
        )
        .await?;

    let color = ColorMode(!cli.no_color);
    output::print_summary(&mut std::io::stdout(), &stats, color)?;
    Ok(())
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Defaults, overlaid by the config layers, overlaid by flags.
fn resolve_settings(cli: &Cli, backend: Backend, layered: &ConfigFile) -> Settings {
    let mut settings = Settings::default();
    layered.apply(&mut settings);

    // --host/--port address whichever server the chosen backend talks to.
    match backend {
        Backend::ScienceParse => {
            if let Some(host) = &cli.host {
                settings.scienceparse.host = host.clone();
            }
            if let Some(port) = cli.port {
                settings.scienceparse.port = port;
            }
        }
        _ => {
            if let Some(host) = &cli.host {
                settings.grobid.host = host.clone();
            }
            if let Some(port) = cli.port {
                settings.grobid.port = port;
            }
        }
    }
    if let Some(java) = &cli.java {
        settings.java.java = java.clone();
    }
    if let Some(dir) = &cli.scratch_dir {
        settings.scratch_root = Some(dir.clone());
    }
    if let Some(secs) = cli.sleep_secs {
        settings.grobid.sleep = Duration::from_secs(secs);
    }
    if cli.max_busy_retries.is_some() {
        settings.grobid.max_busy_retries = cli.max_busy_retries;
    }
    settings
}
