use std::sync::Arc;

use tokio::task;

use crate::{
    config::AppConfig,
    error::ServiceError,
    model::{
        DiabetesPrediction, ImageClassifier, ImagePrediction, ModelMetadata, TabularClassifier,
        loader::ModelArtifacts,
    },
};

pub struct ModelRegistry {
    artifacts: Arc<ModelArtifacts>,
}

impl ModelRegistry {
    pub fn initialize(config: &AppConfig) -> Self {
        Self::from_artifacts(ModelArtifacts::load(config))
    }

    pub fn from_artifacts(artifacts: ModelArtifacts) -> Self {
        Self {
            artifacts: Arc::new(artifacts),
        }
    }

    pub fn metadata(&self) -> (Option<ModelMetadata>, Option<ModelMetadata>) {
        let image = self.artifacts.image.as_ref().map(|m| m.metadata());
        let tabular = self.artifacts.tabular.as_ref().map(|m| m.metadata());
        (image, tabular)
    }

    pub async fn classify_image(
        &self,
        image_bytes: Vec<u8>,
    ) -> Result<Vec<ImagePrediction>, ServiceError> {
        let model: Arc<ImageClassifier> = self.artifacts.image.clone().ok_or_else(|| {
            ServiceError::ModelUnavailable("image classifier is not loaded".into())
        })?;
        task::spawn_blocking(move || model.classify(&image_bytes))
            .await
            .map_err(|err| ServiceError::Inference(format!("inference task failed: {err}")))?
    }

    pub async fn predict_diabetes(
        &self,
        record: Vec<f64>,
    ) -> Result<DiabetesPrediction, ServiceError> {
        let model: Arc<TabularClassifier> = self.artifacts.tabular.clone().ok_or_else(|| {
            ServiceError::ModelUnavailable("diabetes model is not loaded".into())
        })?;
        task::spawn_blocking(move || model.predict(&record))
            .await
            .map_err(|err| ServiceError::Inference(format!("inference task failed: {err}")))?
    }
}
