use std::{fmt, str::FromStr};

use ndarray::{ArrayView1, ArrayView2};
use serde::Serialize;

use crate::{error::ServiceError, model::LogisticRegression};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Scoring {
    Accuracy,
    RocAuc,
}

impl FromStr for Scoring {
    type Err = ServiceError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_lowercase().as_str() {
            "accuracy" => Ok(Scoring::Accuracy),
            "roc_auc" | "roc-auc" => Ok(Scoring::RocAuc),
            other => Err(ServiceError::BadRequest(format!(
                "unknown scoring '{other}' (expected accuracy or roc_auc)"
            ))),
        }
    }
}

impl fmt::Display for Scoring {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scoring::Accuracy => f.write_str("accuracy"),
            Scoring::RocAuc => f.write_str("roc_auc"),
        }
    }
}

impl Scoring {
    pub fn score(
        &self,
        model: &LogisticRegression,
        rows: ArrayView2<f64>,
        labels: ArrayView1<f64>,
    ) -> Result<f64, ServiceError> {
        match self {
            Scoring::Accuracy => Ok(accuracy(&model.predict_rows(rows)?, labels)),
            Scoring::RocAuc => {
                let scores = model.decision_rows(rows)?.to_vec();
                roc_auc(&scores, labels).ok_or_else(|| {
                    ServiceError::BadRequest("roc_auc needs both classes in every fold".into())
                })
            }
        }
    }
}

pub fn accuracy(predicted: &[i64], labels: ArrayView1<f64>) -> f64 {
    let matches = compute_match_rate(
        predicted
            .iter()
            .zip(labels.iter())
            .map(|(&p, &y)| p as f64 == y),
    );
    matches.unwrap_or(0.0)
}

/// Area under the ROC curve from the rank-sum statistic, averaging ranks
/// over ties. `None` when only one class is present.
pub fn roc_auc(scores: &[f64], labels: ArrayView1<f64>) -> Option<f64> {
    let positives = labels.iter().filter(|&&y| y == 1.0).count();
    let negatives = labels.len() - positives;
    if positives == 0 || negatives == 0 || scores.len() != labels.len() {
        return None;
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    let mut ranks = vec![0.0; scores.len()];
    let mut start = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && scores[order[end]] == scores[order[start]] {
            end += 1;
        }
        // 1-based ranks start+1..=end share their average.
        let shared = (start + 1 + end) as f64 / 2.0;
        for &idx in &order[start..end] {
            ranks[idx] = shared;
        }
        start = end;
    }

    let positive_rank_sum: f64 = ranks
        .iter()
        .zip(labels.iter())
        .filter(|&(_, &y)| y == 1.0)
        .map(|(rank, _)| rank)
        .sum();
    let p = positives as f64;
    let n = negatives as f64;
    Some((positive_rank_sum - p * (p + 1.0) / 2.0) / (p * n))
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConfusionMatrix {
    pub true_positives: usize,
    pub false_negatives: usize,
    pub true_negatives: usize,
    pub false_positives: usize,
}

impl ConfusionMatrix {
    pub fn from_predictions(predicted: &[i64], labels: ArrayView1<f64>) -> Self {
        let mut matrix = Self::default();
        for (&p, &y) in predicted.iter().zip(labels.iter()) {
            match (y == 1.0, p == 1) {
                (true, true) => matrix.true_positives += 1,
                (true, false) => matrix.false_negatives += 1,
                (false, false) => matrix.true_negatives += 1,
                (false, true) => matrix.false_positives += 1,
            }
        }
        matrix
    }

    pub fn total_positives(&self) -> usize {
        self.true_positives + self.false_negatives
    }

    pub fn total_negatives(&self) -> usize {
        self.true_negatives + self.false_positives
    }

    /// Percentage of `count` within `total`, rounded to two places.
    pub fn percent(count: usize, total: usize) -> f64 {
        if total == 0 {
            0.0
        } else {
            (count as f64 / total as f64 * 10_000.0).round() / 100.0
        }
    }
}

impl fmt::Display for ConfusionMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pos = self.total_positives();
        let neg = self.total_negatives();
        let lines = [
            ("True Positives", self.true_positives, pos),
            ("False Negatives", self.false_negatives, pos),
            ("True Negatives", self.true_negatives, neg),
            ("False Positives", self.false_positives, neg),
        ];
        for (name, count, total) in lines {
            writeln!(
                f,
                "{name}: {count} of {total} ({} %)",
                Self::percent(count, total)
            )?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryStats {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    /// Population standard deviation.
    pub std: f64,
}

impl SummaryStats {
    pub fn from_values(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let avg = mean(values.iter().copied());
        let variance = mean(values.iter().map(|v| (v - avg).powi(2)));
        Some(Self {
            count: values.len(),
            min: values.iter().copied().fold(f64::INFINITY, f64::min),
            max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            mean: avg,
            std: variance.sqrt(),
        })
    }
}

pub(crate) fn mean<I>(values: I) -> f64
where
    I: IntoIterator<Item = f64>,
{
    let mut count = 0usize;
    let mut acc = 0.0;
    for value in values {
        count += 1;
        acc += value;
    }
    if count == 0 { 0.0 } else { acc / count as f64 }
}

fn compute_match_rate<I>(values: I) -> Option<f64>
where
    I: IntoIterator<Item = bool>,
{
    let mut count = 0usize;
    let mut matches = 0usize;
    for value in values {
        count += 1;
        if value {
            matches += 1;
        }
    }
    if count == 0 {
        None
    } else {
        Some(matches as f64 / count as f64)
    }
}
