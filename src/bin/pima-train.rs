//! Trains the Pima Indians diabetes logistic regression model from the
//! header-less CSV and saves the best fit.

use std::{fs, path::PathBuf};

use anyhow::Context;
use clap::Parser;

use ai_ml_service::{
    evaluation::{ConfusionMatrix, Scoring},
    init_tracing,
    model::ArtifactFormat,
    training::{Dataset, NullMethod, Trainer, TrainingOptions, TrainingReport},
};

#[derive(Parser)]
#[command(name = "pima-train")]
#[command(about = "Train the diabetes risk classifier", version)]
struct Cli {
    /// Header-less CSV with eight features and the outcome
    #[arg(short, long, default_value = "pima-indians-diabetes.csv")]
    data: PathBuf,

    /// Where the best model is written
    #[arg(short, long, default_value = "pima-indians-diabetes.bin")]
    output: PathBuf,

    /// Artifact format (blob, json); inferred from the output path if omitted
    #[arg(short, long)]
    format: Option<ArtifactFormat>,

    /// Missing value handling (median, drop-rows, ignore)
    #[arg(long, default_value = "median")]
    null_method: NullMethod,

    /// Search the C grid with cross validation before training
    #[arg(long)]
    search: bool,

    /// Score used by the search and cross validation (accuracy, roc_auc)
    #[arg(long, default_value = "accuracy")]
    scoring: Scoring,

    /// Number of random train/test splits to fit
    #[arg(short, long, default_value_t = 1)]
    loops: usize,

    /// Skip the confusion matrix over every record
    #[arg(long)]
    no_confusion: bool,

    /// Seed for reproducible splits
    #[arg(long)]
    seed: Option<u64>,

    /// Also write the full report as JSON
    #[arg(long)]
    report: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let data = Dataset::from_csv(&cli.data)
        .with_context(|| format!("loading {}", cli.data.display()))?;

    let options = TrainingOptions {
        null_method: cli.null_method,
        hyperparameter_search: cli.search,
        scoring: cli.scoring,
        loop_count: cli.loops,
        test_all_records: !cli.no_confusion,
        seed: cli.seed,
        output_format: cli
            .format
            .unwrap_or_else(|| ArtifactFormat::from_path(&cli.output)),
        output_path: cli.output,
        ..TrainingOptions::default()
    };
    let report = Trainer::new(options).run(data)?;
    print_report(&report);

    if let Some(path) = cli.report {
        fs::write(&path, serde_json::to_string_pretty(&report)?)
            .with_context(|| format!("writing {}", path.display()))?;
        println!("Report written to {}", path.display());
    }
    Ok(())
}

fn print_report(report: &TrainingReport) {
    println!("Rows: {} (null method: {})", report.rows, report.null_method);
    if let Some(search) = &report.grid_search {
        println!("Hyperparameter search ({}):", report.scoring);
        for (c, score) in &search.scores {
            println!("  C={c:<10} {:.2}%", 100.0 * score);
        }
    }
    println!("C: {}", report.c);
    println!(
        "Accuracy over {} loop(s): mean {:.2}%, min {:.2}%, max {:.2}%, best {:.2}%",
        report.loop_count,
        100.0 * report.accuracy.mean,
        100.0 * report.accuracy.min,
        100.0 * report.accuracy.max,
        100.0 * report.best_accuracy,
    );
    println!(
        "Cross validation ({}): {:.2}% (+/- {:.2}%)",
        report.scoring,
        100.0 * report.cross_validation_summary.mean,
        200.0 * report.cross_validation_summary.std,
    );
    println!("Saved model: {}", report.saved_path.display());
    println!("Coefficients: {:?}", report.coefficients);
    println!("Intercept: {}", report.intercept);

    println!("Reference records:");
    for reference in &report.reference_predictions {
        println!(
            "  {:?} -> {} ({:.2}%)",
            reference.record,
            reference.prediction,
            100.0 * reference.probability
        );
    }

    if let Some(matrix) = &report.confusion {
        println!(
            "All records: {} positive, {} negative",
            matrix.total_positives(),
            matrix.total_negatives()
        );
        print!("{matrix}");
        let correct = matrix.true_positives + matrix.true_negatives;
        println!(
            "Correct: {correct} of {} ({} %)",
            report.rows,
            ConfusionMatrix::percent(correct, report.rows)
        );
    }
}
