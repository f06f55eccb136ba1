//! Standalone rasterisation tool.
//!
//! A thin shim over the library's renderer: rasterise one page of a
//! document to `<output-prefix>.png` and print the elapsed time. Exit
//! codes are part of the contract for callers that shell out to this
//! tool: `0` success, `2` the output file could not be opened, `3` PNG
//! encoding failed.

use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;
use pagelens::{DocumentRenderer, PageError, PdfiumRenderer};
use tracing_subscriber::EnvFilter;

/// Rasterise a document page to a PNG file.
#[derive(Parser, Debug)]
#[command(
    name = "rasterize",
    version,
    about = "Rasterise a document page to a PNG file",
    arg_required_else_help = true
)]
struct Cli {
    /// Path to the input document.
    input: PathBuf,

    /// Output prefix; the image is written to `<prefix>.png`.
    output_prefix: String,

    /// Zero-based page index to rasterise.
    #[arg(long, default_value_t = 0)]
    page: usize,

    /// Magnification factor applied to both page axes.
    #[arg(long, default_value_t = 4.0)]
    scale: f32,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let start = Instant::now();

    let image = match PdfiumRenderer
        .render_page(&cli.input, cli.page, cli.scale)
        .await
    {
        Ok(image) => image,
        Err(PageError::EncodeFailed { detail, .. }) => {
            eprintln!("rasterize: PNG encoding failed: {detail}");
            return ExitCode::from(3);
        }
        Err(e) => {
            eprintln!("rasterize: {e}");
            return ExitCode::FAILURE;
        }
    };

    let out_name = format!("{}.png", cli.output_prefix);
    if let Err(e) = write_output(&out_name, &image.png) {
        eprintln!("rasterize: cannot open {out_name}: {e}");
        return ExitCode::from(2);
    }

    println!(
        "rasterize yielded {} ({}x{}) in {:.3} s",
        out_name,
        image.width,
        image.height,
        start.elapsed().as_secs_f64()
    );
    ExitCode::SUCCESS
}

fn write_output(path: &str, png: &[u8]) -> io::Result<()> {
    let mut file = std::fs::File::create(path)?;
    file.write_all(png)?;
    file.flush()
}
