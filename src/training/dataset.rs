use std::{fmt, fs::File, io::Read, path::Path, str::FromStr};

use csv::{ReaderBuilder, Trim};
use ndarray::{Array1, Array2, ArrayView1, Axis};
use serde::Serialize;
use tracing::{info, warn};

use crate::error::ServiceError;

/// Column order of `pima-indians-diabetes.csv`; the last one is the label.
pub const COLUMNS: [&str; 9] = [
    "Pregnancies",
    "Glucose",
    "BloodPressure",
    "SkinThickness",
    "Insulin",
    "BMI",
    "DiabetesPedigreeFunction",
    "Age",
    "Outcome",
];

/// Feature columns where a recorded 0 means "not measured".
pub const ZERO_AS_MISSING: [usize; 5] = [1, 2, 3, 4, 5];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum NullMethod {
    Median,
    DropRows,
    Ignore,
}

impl FromStr for NullMethod {
    type Err = ServiceError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_lowercase().as_str() {
            "median" => Ok(NullMethod::Median),
            "drop-rows" | "drop_rows" => Ok(NullMethod::DropRows),
            "ignore" => Ok(NullMethod::Ignore),
            other => Err(ServiceError::BadRequest(format!(
                "unknown null method '{other}' (expected median, drop-rows or ignore)"
            ))),
        }
    }
}

impl fmt::Display for NullMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NullMethod::Median => f.write_str("median"),
            NullMethod::DropRows => f.write_str("drop-rows"),
            NullMethod::Ignore => f.write_str("ignore"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Dataset {
    pub features: Array2<f64>,
    pub labels: Array1<f64>,
}

impl Dataset {
    pub fn from_csv(path: &Path) -> Result<Self, ServiceError> {
        if !path.exists() {
            return Err(ServiceError::BadRequest(format!(
                "dataset not found: {}",
                path.display()
            )));
        }
        let dataset = Self::from_reader(File::open(path)?)?;
        info!(
            path = %path.display(),
            rows = dataset.len(),
            cols = COLUMNS.len(),
            "dataset loaded"
        );
        Ok(dataset)
    }

    /// Reads header-less rows of nine numeric columns.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, ServiceError> {
        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .trim(Trim::All)
            .flexible(true)
            .from_reader(reader);

        let mut values = Vec::new();
        let mut labels = Vec::new();
        for result in reader.records() {
            let record = result?;
            let line = record.position().map_or(0, |p| p.line());
            if record.len() == 1 && record[0].is_empty() {
                continue;
            }
            if record.len() != COLUMNS.len() {
                return Err(ServiceError::BadRequest(format!(
                    "line {line}: expected {} columns, found {}",
                    COLUMNS.len(),
                    record.len()
                )));
            }
            for (idx, field) in record.iter().enumerate() {
                let value: f64 = field.parse().map_err(|_| {
                    ServiceError::BadRequest(format!(
                        "line {line}: column {} is not numeric: '{field}'",
                        COLUMNS[idx]
                    ))
                })?;
                if idx == COLUMNS.len() - 1 {
                    labels.push(value);
                } else {
                    values.push(value);
                }
            }
        }

        if labels.is_empty() {
            return Err(ServiceError::BadRequest("dataset has no rows".into()));
        }
        let features = Array2::from_shape_vec((labels.len(), COLUMNS.len() - 1), values)
            .map_err(|e| ServiceError::Other(e.to_string()))?;
        Ok(Self {
            features,
            labels: Array1::from(labels),
        })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn select(&self, indices: &[usize]) -> Dataset {
        Dataset {
            features: self.features.select(Axis(0), indices),
            labels: self.labels.select(Axis(0), indices),
        }
    }

    /// Applies the missing-value policy to the zero-as-missing columns.
    pub fn impute(self, method: NullMethod) -> Dataset {
        match method {
            NullMethod::Ignore => self,
            NullMethod::DropRows => {
                let keep: Vec<usize> = self
                    .features
                    .outer_iter()
                    .enumerate()
                    .filter(|(_, row)| ZERO_AS_MISSING.iter().all(|&col| row[col] != 0.0))
                    .map(|(idx, _)| idx)
                    .collect();
                info!(
                    dropped = self.len() - keep.len(),
                    kept = keep.len(),
                    "dropped rows with missing values"
                );
                self.select(&keep)
            }
            NullMethod::Median => {
                let mut features = self.features;
                for &col in &ZERO_AS_MISSING {
                    let mut column = features.column_mut(col);
                    let Some(median) = median_ignoring_zeros(column.view()) else {
                        warn!(column = COLUMNS[col], "no recorded values, leaving zeros");
                        continue;
                    };
                    let mut replaced = 0usize;
                    column.iter_mut().filter(|v| **v == 0.0).for_each(|v| {
                        *v = median;
                        replaced += 1;
                    });
                    info!(column = COLUMNS[col], median, replaced, "filled missing values");
                }
                Dataset {
                    features,
                    labels: self.labels,
                }
            }
        }
    }
}

fn median_ignoring_zeros(column: ArrayView1<f64>) -> Option<f64> {
    let mut present: Vec<f64> = column.iter().copied().filter(|&v| v != 0.0).collect();
    if present.is_empty() {
        return None;
    }
    present.sort_by(f64::total_cmp);
    let mid = present.len() / 2;
    Some(if present.len() % 2 == 0 {
        (present[mid - 1] + present[mid]) / 2.0
    } else {
        present[mid]
    })
}
