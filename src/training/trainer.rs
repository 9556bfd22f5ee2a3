use std::path::PathBuf;

use rand::{SeedableRng, rngs::StdRng};
use serde::Serialize;
use tracing::info;

use crate::{
    error::ServiceError,
    evaluation::{self, ConfusionMatrix, Scoring, SummaryStats},
    model::{ArtifactFormat, LogisticParams, LogisticRegression, artifact},
    training::{
        dataset::{Dataset, NullMethod},
        split::{stratified_k_fold, train_test_split},
    },
};

/// Inverse regularization strengths tried by the hyperparameter search.
pub const DEFAULT_C_GRID: [f64; 11] = [
    1e-6, 1e-5, 1e-4, 1e-3, 1e-2, 1e-1, 1.0, 10.0, 100.0, 1000.0, 10000.0,
];

/// Records checked after training: expected outcomes 0, 1 and 0. The last
/// one has several unmeasured fields and tends to flip between runs.
pub const REFERENCE_RECORDS: [[f64; 8]; 3] = [
    [1.0, 89.0, 66.0, 23.0, 94.0, 28.1, 0.167, 21.0],
    [5.0, 166.0, 72.0, 19.0, 175.0, 25.8, 0.587, 51.0],
    [10.0, 115.0, 0.0, 0.0, 0.0, 35.3, 0.134, 29.0],
];

#[derive(Debug, Clone)]
pub struct TrainingOptions {
    pub null_method: NullMethod,
    pub hyperparameter_search: bool,
    pub c_grid: Vec<f64>,
    pub scoring: Scoring,
    pub loop_count: usize,
    pub test_fraction: f64,
    pub search_folds: usize,
    pub cv_folds: usize,
    pub test_all_records: bool,
    pub seed: Option<u64>,
    pub output_path: PathBuf,
    pub output_format: ArtifactFormat,
}

impl Default for TrainingOptions {
    fn default() -> Self {
        Self {
            null_method: NullMethod::Median,
            hyperparameter_search: false,
            c_grid: DEFAULT_C_GRID.to_vec(),
            scoring: Scoring::Accuracy,
            loop_count: 1,
            test_fraction: 0.25,
            search_folds: 5,
            cv_folds: 10,
            test_all_records: true,
            seed: None,
            output_path: PathBuf::from("pima-indians-diabetes.bin"),
            output_format: ArtifactFormat::Blob,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GridSearchResult {
    pub best_c: f64,
    pub best_score: f64,
    pub scores: Vec<(f64, f64)>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReferencePrediction {
    pub record: Vec<f64>,
    pub prediction: i64,
    pub probability: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrainingReport {
    pub rows: usize,
    pub null_method: NullMethod,
    pub scoring: Scoring,
    pub grid_search: Option<GridSearchResult>,
    pub c: f64,
    pub loop_count: usize,
    pub accuracy: SummaryStats,
    pub best_accuracy: f64,
    pub saved_path: PathBuf,
    pub coefficients: Vec<f64>,
    pub intercept: f64,
    pub cross_validation: Vec<f64>,
    pub cross_validation_summary: SummaryStats,
    pub reference_predictions: Vec<ReferencePrediction>,
    pub confusion: Option<ConfusionMatrix>,
}

/// Scores every `C` by mean fold score over `folds` stratified folds and
/// returns the best. The first candidate wins ties.
pub fn grid_search(
    data: &Dataset,
    grid: &[f64],
    folds: usize,
    scoring: Scoring,
) -> Result<GridSearchResult, ServiceError> {
    if grid.is_empty() {
        return Err(ServiceError::BadRequest("hyperparameter grid is empty".into()));
    }
    let mut scores = Vec::with_capacity(grid.len());
    let mut best: Option<(f64, f64)> = None;
    for &c in grid {
        let fold_scores = cross_val_score(data, &LogisticParams::with_c(c), folds, scoring)?;
        let score = evaluation::mean(fold_scores);
        tracing::debug!(c, score, "grid candidate scored");
        scores.push((c, score));
        if best.is_none_or(|(_, best_score)| score > best_score) {
            best = Some((c, score));
        }
    }
    let (best_c, best_score) =
        best.ok_or_else(|| ServiceError::Other("grid search scored nothing".into()))?;
    Ok(GridSearchResult {
        best_c,
        best_score,
        scores,
    })
}

pub fn cross_val_score(
    data: &Dataset,
    params: &LogisticParams,
    folds: usize,
    scoring: Scoring,
) -> Result<Vec<f64>, ServiceError> {
    stratified_k_fold(data.labels.view(), folds)?
        .into_iter()
        .map(|(train, test)| {
            let train = data.select(&train);
            let test = data.select(&test);
            let model = LogisticRegression::fit(train.features.view(), train.labels.view(), params)?;
            scoring.score(&model, test.features.view(), test.labels.view())
        })
        .collect()
}

pub struct Trainer {
    options: TrainingOptions,
}

impl Trainer {
    pub fn new(options: TrainingOptions) -> Self {
        Self { options }
    }

    /// Fits `loop_count` models on fresh random splits and saves each one
    /// that beats every earlier split's test accuracy.
    pub fn run(&self, data: Dataset) -> Result<TrainingReport, ServiceError> {
        let options = &self.options;
        if options.loop_count == 0 {
            return Err(ServiceError::BadRequest("loop count must be at least 1".into()));
        }

        let data = data.impute(options.null_method);
        let mut rng = match options.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let grid = if options.hyperparameter_search {
            let (train, _) = train_test_split(data.len(), options.test_fraction, &mut rng)?;
            let result = grid_search(
                &data.select(&train),
                &options.c_grid,
                options.search_folds,
                options.scoring,
            )?;
            info!(
                best_c = result.best_c,
                best_score = %format!("{:.2}%", 100.0 * result.best_score),
                "hyperparameter search finished"
            );
            Some(result)
        } else {
            None
        };
        let params = grid
            .as_ref()
            .map_or_else(LogisticParams::default, |g| LogisticParams::with_c(g.best_c));

        let mut accuracies = Vec::with_capacity(options.loop_count);
        let mut best: Option<(f64, LogisticRegression)> = None;
        for count in 0..options.loop_count {
            let (train, test) = train_test_split(data.len(), options.test_fraction, &mut rng)?;
            let train = data.select(&train);
            let test = data.select(&test);
            let model =
                LogisticRegression::fit(train.features.view(), train.labels.view(), &params)?;
            let acc = evaluation::accuracy(
                &model.predict_rows(test.features.view())?,
                test.labels.view(),
            );
            accuracies.push(acc);

            if count % 500 == 0 {
                info!(evaluated = count, "training progress");
            }
            if best.as_ref().is_none_or(|(best_acc, _)| acc > *best_acc) {
                artifact::save(&model, &options.output_path, options.output_format)?;
                info!(
                    accuracy = %format!("{:.2}%", 100.0 * acc),
                    coef = ?model.coef[0],
                    "saved new model"
                );
                best = Some((acc, model));
            }
        }
        let (best_accuracy, model) =
            best.ok_or_else(|| ServiceError::Other("no model was fitted".into()))?;

        let cross_validation = cross_val_score(&data, &params, options.cv_folds, options.scoring)?;
        let cross_validation_summary = summary(&cross_validation)?;
        info!(
            scoring = %options.scoring,
            mean = %format!("{:.2}%", 100.0 * cross_validation_summary.mean),
            spread = %format!("{:.2}%", 200.0 * cross_validation_summary.std),
            "cross validation"
        );

        let reference_predictions = REFERENCE_RECORDS
            .iter()
            .map(|record| {
                Ok(ReferencePrediction {
                    record: record.to_vec(),
                    prediction: model.predict(record)?,
                    probability: model.predict_proba(record)?,
                })
            })
            .collect::<Result<Vec<_>, ServiceError>>()?;

        let confusion = if options.test_all_records {
            let predicted = model.predict_rows(data.features.view())?;
            Some(ConfusionMatrix::from_predictions(
                &predicted,
                data.labels.view(),
            ))
        } else {
            None
        };

        Ok(TrainingReport {
            rows: data.len(),
            null_method: options.null_method,
            scoring: options.scoring,
            grid_search: grid,
            c: params.c,
            loop_count: options.loop_count,
            accuracy: summary(&accuracies)?,
            best_accuracy,
            saved_path: options.output_path.clone(),
            coefficients: model.coef[0].clone(),
            intercept: model.intercept[0],
            cross_validation,
            cross_validation_summary,
            reference_predictions,
            confusion,
        })
    }
}

fn summary(values: &[f64]) -> Result<SummaryStats, ServiceError> {
    SummaryStats::from_values(values)
        .ok_or_else(|| ServiceError::Other("no scores to summarize".into()))
}
