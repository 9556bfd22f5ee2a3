//! Builds the SQLite database behind the `/data/geonames` routes from the
//! Geonames dumps `countryInfo.txt` and `allCountries.txt`.

use std::path::PathBuf;

use clap::Parser;

use ai_ml_service::{
    geonames::{self, ImportOptions},
    init_tracing,
};

#[derive(Parser)]
#[command(name = "geonames-import")]
#[command(about = "Import Geonames dumps into SQLite", version)]
struct Cli {
    /// Directory holding countryInfo.txt and allCountries.txt
    #[arg(short, long, default_value = ".")]
    data_dir: PathBuf,

    /// Database file to create
    #[arg(short, long, default_value = "geonames.sqlite")]
    output: PathBuf,

    /// Fail instead of replacing an existing database
    #[arg(long)]
    no_recreate: bool,
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut options = ImportOptions::from_data_dir(&cli.data_dir, cli.output);
    options.recreate = !cli.no_recreate;

    let summary = geonames::import(&options)?;
    println!(
        "Imported {} countries and {} places into {}",
        summary.countries,
        summary.places,
        options.output.display()
    );
    Ok(())
}
