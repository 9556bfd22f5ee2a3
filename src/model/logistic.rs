use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, concatenate};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ServiceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Penalty {
    L1,
    L2,
    ElasticNet,
    None,
}

/// Hyperparameters, named the way the JSON dump names them. Keys this
/// crate does not use (`dual`, `n_jobs`, ...) are accepted and dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticParams {
    #[serde(rename = "C", default = "default_c")]
    pub c: f64,
    #[serde(default = "default_penalty")]
    pub penalty: Option<Penalty>,
    #[serde(default = "default_fit_intercept")]
    pub fit_intercept: bool,
    #[serde(default = "default_max_iter")]
    pub max_iter: usize,
    #[serde(default = "default_tol")]
    pub tol: f64,
    #[serde(default = "default_solver")]
    pub solver: String,
}

fn default_c() -> f64 {
    1.0
}

fn default_penalty() -> Option<Penalty> {
    Some(Penalty::L2)
}

fn default_fit_intercept() -> bool {
    true
}

fn default_max_iter() -> usize {
    100
}

fn default_tol() -> f64 {
    1e-4
}

fn default_solver() -> String {
    "newton".to_string()
}

impl Default for LogisticParams {
    fn default() -> Self {
        Self {
            c: default_c(),
            penalty: default_penalty(),
            fit_intercept: default_fit_intercept(),
            max_iter: default_max_iter(),
            tol: default_tol(),
            solver: default_solver(),
        }
    }
}

impl LogisticParams {
    pub fn with_c(c: f64) -> Self {
        Self {
            c,
            ..Self::default()
        }
    }
}

/// Binary logistic regression with a single coefficient row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticRegression {
    pub params: LogisticParams,
    #[serde(rename = "classes_")]
    pub classes: Vec<i64>,
    #[serde(rename = "coef_")]
    pub coef: Vec<Vec<f64>>,
    #[serde(rename = "intercept_")]
    pub intercept: Vec<f64>,
    #[serde(rename = "n_iter_", default)]
    pub n_iter: Vec<usize>,
}

impl LogisticRegression {
    pub fn validate(&self) -> Result<(), ServiceError> {
        if self.classes.len() != 2 {
            return Err(ServiceError::Artifact(format!(
                "expected 2 classes, found {}",
                self.classes.len()
            )));
        }
        if self.coef.len() != 1 || self.coef[0].is_empty() {
            return Err(ServiceError::Artifact(
                "expected exactly one non-empty coefficient row".into(),
            ));
        }
        if self.intercept.len() != 1 {
            return Err(ServiceError::Artifact(format!(
                "expected 1 intercept, found {}",
                self.intercept.len()
            )));
        }
        let all_finite = self.coef[0]
            .iter()
            .chain(self.intercept.iter())
            .all(|v| v.is_finite());
        if !all_finite {
            return Err(ServiceError::Artifact(
                "coefficients must be finite".into(),
            ));
        }
        Ok(())
    }

    pub fn n_features(&self) -> usize {
        self.coef.first().map_or(0, Vec::len)
    }

    fn weights(&self) -> ArrayView1<'_, f64> {
        ArrayView1::from(self.coef[0].as_slice())
    }

    pub fn decision_function(&self, record: &[f64]) -> Result<f64, ServiceError> {
        if record.len() != self.n_features() {
            return Err(ServiceError::BadRequest(format!(
                "expected {} values, got {}",
                self.n_features(),
                record.len()
            )));
        }
        Ok(self.weights().dot(&ArrayView1::from(record)) + self.intercept[0])
    }

    /// Probability of the second class.
    pub fn predict_proba(&self, record: &[f64]) -> Result<f64, ServiceError> {
        self.decision_function(record).map(sigmoid)
    }

    pub fn predict(&self, record: &[f64]) -> Result<i64, ServiceError> {
        let score = self.decision_function(record)?;
        Ok(self.label_for(score))
    }

    pub fn decision_rows(&self, rows: ArrayView2<f64>) -> Result<Array1<f64>, ServiceError> {
        if rows.ncols() != self.n_features() {
            return Err(ServiceError::BadRequest(format!(
                "expected {} columns, got {}",
                self.n_features(),
                rows.ncols()
            )));
        }
        Ok(rows.dot(&self.weights()) + self.intercept[0])
    }

    pub fn predict_rows(&self, rows: ArrayView2<f64>) -> Result<Vec<i64>, ServiceError> {
        Ok(self
            .decision_rows(rows)?
            .iter()
            .map(|&score| self.label_for(score))
            .collect())
    }

    fn label_for(&self, score: f64) -> i64 {
        if score > 0.0 {
            self.classes[1]
        } else {
            self.classes[0]
        }
    }

    /// Fits on `rows` against 0/1 `labels` with damped Newton steps on
    /// `0.5 * |w|^2 + C * sum(logloss)`. The intercept is never penalized.
    pub fn fit(
        rows: ArrayView2<f64>,
        labels: ArrayView1<f64>,
        params: &LogisticParams,
    ) -> Result<Self, ServiceError> {
        let (n_samples, n_features) = rows.dim();
        if n_samples == 0 || n_features == 0 {
            return Err(ServiceError::BadRequest("cannot fit on an empty dataset".into()));
        }
        if labels.len() != n_samples {
            return Err(ServiceError::BadRequest(format!(
                "{} rows but {} labels",
                n_samples,
                labels.len()
            )));
        }
        if labels.iter().any(|&y| y != 0.0 && y != 1.0) {
            return Err(ServiceError::BadRequest("labels must be 0 or 1".into()));
        }
        let positives = labels.iter().filter(|&&y| y == 1.0).count();
        if positives == 0 || positives == n_samples {
            return Err(ServiceError::BadRequest(
                "both classes must be present to fit".into(),
            ));
        }
        if !(params.c > 0.0 && params.c.is_finite()) {
            return Err(ServiceError::BadRequest(format!(
                "C must be positive, got {}",
                params.c
            )));
        }
        let l2 = match params.penalty {
            Some(Penalty::L2) => 1.0,
            Some(Penalty::None) | None => 0.0,
            Some(other) => {
                return Err(ServiceError::BadRequest(format!(
                    "penalty {other:?} is not supported for fitting"
                )));
            }
        };

        let design = if params.fit_intercept {
            let ones = Array2::<f64>::ones((n_samples, 1));
            concatenate(Axis(1), &[rows.view(), ones.view()])
                .map_err(|e| ServiceError::Other(e.to_string()))?
        } else {
            rows.to_owned()
        };
        let dim = design.ncols();
        let mut reg = Array1::<f64>::from_elem(dim, l2);
        if params.fit_intercept {
            reg[dim - 1] = 0.0;
        }

        let c = params.c;
        let objective = |theta: &Array1<f64>| -> f64 {
            let z = design.dot(theta);
            let loss: f64 = z
                .iter()
                .zip(labels.iter())
                .map(|(&z, &y)| softplus(z) - y * z)
                .sum();
            0.5 * (&reg * theta).dot(theta) + c * loss
        };

        let gradient_scale = c * n_samples as f64;
        let mut theta = Array1::<f64>::zeros(dim);
        let mut current = objective(&theta);
        let mut iterations = 0usize;
        let mut converged = false;

        for iteration in 1..=params.max_iter {
            let probs = design.dot(&theta).mapv(sigmoid);
            let residual = &probs - &labels;
            let grad = &reg * &theta + design.t().dot(&residual) * c;

            let grad_max = grad.iter().fold(0.0_f64, |acc, g| acc.max(g.abs()));
            if grad_max <= params.tol * gradient_scale {
                converged = true;
                break;
            }

            let weights = probs.mapv(|p| p * (1.0 - p));
            let weighted = &design * &weights.view().insert_axis(Axis(1));
            let mut hessian = design.t().dot(&weighted) * c;
            for j in 0..dim {
                hessian[[j, j]] += reg[j] + 1e-10;
            }

            let Some(direction) = solve(hessian, grad.clone()) else {
                warn!(iteration, "singular hessian, stopping early");
                break;
            };

            let slope = grad.dot(&direction);
            let mut step = 1.0;
            let mut accepted = None;
            for _ in 0..40 {
                let candidate = &theta - &(&direction * step);
                let value = objective(&candidate);
                if value.is_finite() && value <= current - 1e-4 * step * slope {
                    accepted = Some((candidate, value));
                    break;
                }
                step *= 0.5;
            }
            iterations = iteration;
            match accepted {
                Some((next, value)) => {
                    theta = next;
                    current = value;
                }
                None => {
                    debug!(iteration, "line search made no progress");
                    converged = true;
                    break;
                }
            }
        }

        if !converged {
            warn!(
                max_iter = params.max_iter,
                "logistic regression did not converge"
            );
        }

        let (coef, intercept) = if params.fit_intercept {
            (theta.slice(ndarray::s![..n_features]).to_vec(), theta[n_features])
        } else {
            (theta.to_vec(), 0.0)
        };

        Ok(Self {
            params: params.clone(),
            classes: vec![0, 1],
            coef: vec![coef],
            intercept: vec![intercept],
            n_iter: vec![iterations],
        })
    }
}

pub fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

/// `ln(1 + e^z)` without overflow.
fn softplus(z: f64) -> f64 {
    if z > 0.0 {
        z + (-z).exp().ln_1p()
    } else {
        z.exp().ln_1p()
    }
}

/// Gaussian elimination with partial pivoting. `None` when singular.
fn solve(mut a: Array2<f64>, mut b: Array1<f64>) -> Option<Array1<f64>> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n).max_by(|&i, &j| a[[i, col]].abs().total_cmp(&a[[j, col]].abs()))?;
        if a[[pivot, col]].abs() < 1e-300 {
            return None;
        }
        if pivot != col {
            for k in 0..n {
                a.swap([pivot, k], [col, k]);
            }
            b.swap(pivot, col);
        }
        for row in col + 1..n {
            let factor = a[[row, col]] / a[[col, col]];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[[row, k]] -= factor * a[[col, k]];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = Array1::<f64>::zeros(n);
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|k| a[[row, k]] * x[k]).sum();
        x[row] = (b[row] - tail) / a[[row, row]];
    }
    x.iter().all(|v| v.is_finite()).then_some(x)
}
