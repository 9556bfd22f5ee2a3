//! Loads a saved diabetes model and prints predictions for a few records.

use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::Parser;

use ai_ml_service::{
    init_tracing,
    model::{ArtifactFormat, artifact},
    training::REFERENCE_RECORDS,
};

#[derive(Parser)]
#[command(name = "pima-check")]
#[command(about = "Print predictions from a saved diabetes model", version)]
struct Cli {
    /// Model artifact (blob or JSON)
    #[arg(default_value = "pima-indians-diabetes.json")]
    model: PathBuf,

    /// Artifact format; inferred from the extension if omitted
    #[arg(short, long)]
    format: Option<ArtifactFormat>,

    /// Comma separated record, repeatable, e.g. 1,89,66,23,94,28.1,0.167,21
    #[arg(short, long)]
    record: Vec<String>,
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let format = cli
        .format
        .unwrap_or_else(|| ArtifactFormat::from_path(&cli.model));
    let model = artifact::load(&cli.model, format)
        .with_context(|| format!("loading {}", cli.model.display()))?;

    let records: Vec<Vec<f64>> = if cli.record.is_empty() {
        REFERENCE_RECORDS.iter().map(|r| r.to_vec()).collect()
    } else {
        cli.record
            .iter()
            .map(|raw| parse_record(raw, model.n_features()))
            .collect::<anyhow::Result<_>>()?
    };

    println!("Model: {} ({format})", cli.model.display());
    println!("Coefficients: {:?}", model.coef[0]);
    println!("Intercept: {}", model.intercept[0]);
    for record in &records {
        let prediction = model.predict(record)?;
        let probability = model.predict_proba(record)?;
        println!("{record:?} -> {prediction} ({:.2}%)", 100.0 * probability);
    }
    Ok(())
}

/// Parses one `--record` value; its length must match the model.
fn parse_record(raw: &str, n_features: usize) -> anyhow::Result<Vec<f64>> {
    let record = raw
        .split(',')
        .map(|field| {
            field
                .trim()
                .parse::<f64>()
                .with_context(|| format!("record '{raw}': '{field}' is not a number"))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    if record.len() != n_features {
        bail!(
            "record '{raw}' has {} values, the model expects {n_features}",
            record.len()
        );
    }
    Ok(record)
}
