use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use label_scan::config::ScanConfig;
use label_scan::pipeline::extraction::Variant;
use label_scan::Orchestrator;

#[derive(Parser)]
#[command(name = "label-scan")]
#[command(about = "Extract nutrition and ingredient data from a food package photo")]
#[command(version)]
struct Cli {
    /// Photo of the package (JPEG, PNG, TIFF, BMP or GIF)
    image: PathBuf,

    /// Tesseract language set, e.g. `eng` or `tur+eng`
    #[arg(short, long)]
    lang: Option<String>,

    /// Preprocessing variants, comma separated
    #[arg(long, value_delimiter = ',')]
    variants: Option<Vec<Variant>>,

    /// Skip barcode detection and go straight to OCR
    #[arg(long)]
    no_barcode: bool,

    /// Product database endpoint
    #[arg(long)]
    lookup_url: Option<String>,

    /// Pretty-print the JSON result
    #[arg(short, long)]
    pretty: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    label_scan::init_tracing();
    let cli = Cli::parse();

    let mut config = ScanConfig::from_env();
    if let Some(lang) = cli.lang {
        config.languages = lang;
    }
    if let Some(variants) = cli.variants.filter(|v| !v.is_empty()) {
        config.variants = variants;
    }
    if cli.no_barcode {
        config.barcode_enabled = false;
    }
    if let Some(url) = cli.lookup_url {
        config.lookup_base_url = url;
    }

    let bytes = match tokio::fs::read(&cli.image).await {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("Cannot read {}: {e}", cli.image.display());
            return ExitCode::from(2);
        }
    };

    let orchestrator = match Orchestrator::from_config(config) {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            eprintln!("Cannot initialize scanner: {e}");
            return ExitCode::FAILURE;
        }
    };

    match orchestrator.scan(&bytes).await {
        Ok(result) => {
            let json = if cli.pretty {
                serde_json::to_string_pretty(&result)
            } else {
                serde_json::to_string(&result)
            };
            match json {
                Ok(json) => {
                    println!("{json}");
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    eprintln!("Cannot serialize result: {e}");
                    ExitCode::FAILURE
                }
            }
        }
        Err(e) => {
            eprintln!("Scan failed: {e}");
            ExitCode::FAILURE
        }
    }
}
