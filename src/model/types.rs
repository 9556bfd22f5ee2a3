use serde::Serialize;
use serde_json::Value;

use crate::error::ServiceError;

/// Entry form field names, in the column order the model was fitted on.
pub const DIABETES_FIELDS: [&str; 8] = [
    "pregnancies",
    "glucose",
    "bloodPressure",
    "skinThickness",
    "insulin",
    "bmi",
    "diabetesPedigreeFunction",
    "age",
];

/// A diabetes prediction request. Accepts either
/// `{"values": [1, 89, 66, 23, 94, 28.1, 0.167, 21]}` or the entry form
/// object `{"pregnancies": "1", "glucose": "89", ...}` whose values may be
/// strings or numbers.
#[derive(Debug, Clone, PartialEq)]
pub struct DiabetesRequest {
    pub record: Vec<f64>,
}

impl DiabetesRequest {
    pub fn from_value(value: &Value) -> Result<Self, ServiceError> {
        let object = value
            .as_object()
            .ok_or_else(|| ServiceError::BadRequest("request body must be a JSON object".into()))?;

        let record = if let Some(values) = object.get("values") {
            let items = values
                .as_array()
                .ok_or_else(|| ServiceError::BadRequest("'values' must be an array".into()))?;
            items
                .iter()
                .enumerate()
                .map(|(idx, item)| number_from(item, &format!("values[{idx}]")))
                .collect::<Result<Vec<_>, _>>()?
        } else {
            DIABETES_FIELDS
                .iter()
                .map(|field| {
                    let item = object.get(*field).ok_or_else(|| {
                        ServiceError::BadRequest(format!("missing field '{field}'"))
                    })?;
                    number_from(item, field)
                })
                .collect::<Result<Vec<_>, _>>()?
        };

        if record.len() != DIABETES_FIELDS.len() {
            return Err(ServiceError::BadRequest(format!(
                "expected {} values, got {}",
                DIABETES_FIELDS.len(),
                record.len()
            )));
        }
        Ok(Self { record })
    }
}

fn number_from(value: &Value, name: &str) -> Result<f64, ServiceError> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed
        .filter(|v| v.is_finite())
        .ok_or_else(|| ServiceError::BadRequest(format!("field '{name}' is not a number")))
}

#[derive(Debug, Clone, Serialize)]
pub struct DiabetesPrediction {
    pub prediction: i64,
    pub probability: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImagePrediction {
    pub wordnet: String,
    pub label: String,
    pub probability: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImagePredictionResponse {
    pub predictions: Vec<ImagePrediction>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelMetadata {
    pub name: String,
    pub kind: String,
    pub artifact: String,
    pub format: String,
    pub size_bytes: u64,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn parses_values_array() {
        let request =
            DiabetesRequest::from_value(&json!({"values": [1, 89, 66, 23, 94, 28.1, 0.167, 21]}))
                .unwrap();
        assert_eq!(request.record, vec![1.0, 89.0, 66.0, 23.0, 94.0, 28.1, 0.167, 21.0]);
    }

    #[test]
    fn parses_entry_form_strings() {
        let body = json!({
            "pregnancies": "7", "glucose": "195", "bloodPressure": "70",
            "skinThickness": "33", "insulin": "145", "bmi": "25.1",
            "diabetesPedigreeFunction": "0.163", "age": 55
        });
        let request = DiabetesRequest::from_value(&body).unwrap();
        assert_eq!(request.record, vec![7.0, 195.0, 70.0, 33.0, 145.0, 25.1, 0.163, 55.0]);
    }

    #[test]
    fn reports_missing_and_malformed_fields() {
        let err = DiabetesRequest::from_value(&json!({"pregnancies": "1"})).unwrap_err();
        assert!(err.to_string().contains("glucose"));

        let err = DiabetesRequest::from_value(&json!({"values": [1, "x", 3, 4, 5, 6, 7, 8]}))
            .unwrap_err();
        assert!(err.to_string().contains("values[1]"));

        let err = DiabetesRequest::from_value(&json!({"values": [1, 2, 3]})).unwrap_err();
        assert!(err.to_string().contains("expected 8"));

        assert!(DiabetesRequest::from_value(&json!([1, 2, 3])).is_err());
    }
}
