//! Converts a binary model artifact to the portable JSON dump.

use std::path::PathBuf;

use clap::Parser;

use ai_ml_service::{init_tracing, model::artifact};

#[derive(Parser)]
#[command(name = "pima-convert")]
#[command(about = "Convert a diabetes model blob to JSON", version)]
struct Cli {
    /// Model blob to read
    #[arg(default_value = "pima-indians-diabetes.bin")]
    input: PathBuf,

    /// Destination; defaults to the input path with a .json extension
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let written = artifact::convert(&cli.input, cli.output.as_deref())?;
    println!("Saved file: {}", written.display());
    Ok(())
}
