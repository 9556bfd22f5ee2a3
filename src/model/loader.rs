use std::{fs, path::Path, sync::Arc, time::Instant};

#[cfg(feature = "tch-backend")]
use parking_lot::Mutex;
#[cfg(feature = "tch-backend")]
use tch::{Device, Kind, Tensor, no_grad};
use tracing::{info, warn};

use crate::{
    config::AppConfig,
    error::ServiceError,
    model::{
        ArtifactFormat, DiabetesPrediction, ImagePrediction, LogisticRegression, ModelMetadata,
        OutputKind, Preprocessing, artifact,
        imagenet::{self, ClassIndex},
    },
};

/// Runs the network on one preprocessed 1x3x224x224 image and returns one
/// score per class.
pub trait ImageBackend: Send + Sync {
    fn forward(&self, input: &[f32]) -> Result<Vec<f32>, ServiceError>;
}

#[cfg(feature = "tch-backend")]
pub struct TorchBackend {
    device: Device,
    module: Mutex<tch::CModule>,
}

#[cfg(feature = "tch-backend")]
impl TorchBackend {
    pub fn load(module_path: &Path, device: Device) -> Result<Self, ServiceError> {
        if !module_path.exists() {
            return Err(ServiceError::Artifact(format!(
                "model artifact missing: {}",
                module_path.display()
            )));
        }
        let mut module = tch::CModule::load_on_device(module_path, device)
            .map_err(|e| ServiceError::Inference(e.to_string()))?;
        module.set_eval();
        Ok(Self {
            device,
            module: Mutex::new(module),
        })
    }
}

#[cfg(feature = "tch-backend")]
impl ImageBackend for TorchBackend {
    fn forward(&self, input: &[f32]) -> Result<Vec<f32>, ServiceError> {
        let side = imagenet::INPUT_SIZE as i64;
        no_grad(|| {
            let tensor = Tensor::from_slice(input)
                .reshape([1, 3, side, side])
                .to(self.device);
            let output = self
                .module
                .lock()
                .forward_ts(&[tensor])
                .map_err(|e| ServiceError::Inference(e.to_string()))?;
            let scores = output
                .to_kind(Kind::Float)
                .to(Device::Cpu)
                .flatten(0, -1);
            Vec::<f32>::try_from(&scores).map_err(|e| ServiceError::Inference(e.to_string()))
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ClassifierSettings {
    pub preprocessing: Preprocessing,
    pub output_kind: OutputKind,
    pub top_k: usize,
    pub min_probability: f32,
}

impl ClassifierSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            preprocessing: config.preprocessing,
            output_kind: config.output_kind,
            top_k: config.top_k,
            min_probability: config.min_probability,
        }
    }
}

pub struct ImageClassifier {
    backend: Box<dyn ImageBackend>,
    classes: ClassIndex,
    settings: ClassifierSettings,
    metadata: ModelMetadata,
}

impl ImageClassifier {
    pub fn new(
        backend: Box<dyn ImageBackend>,
        classes: ClassIndex,
        settings: ClassifierSettings,
        metadata: ModelMetadata,
    ) -> Self {
        Self {
            backend,
            classes,
            settings,
            metadata,
        }
    }

    pub fn metadata(&self) -> ModelMetadata {
        self.metadata.clone()
    }

    pub fn classify(&self, image_bytes: &[u8]) -> Result<Vec<ImagePrediction>, ServiceError> {
        let input = self.settings.preprocessing.prepare(image_bytes)?;

        let start = Instant::now();
        let scores = self.backend.forward(&input)?;
        let probabilities = match self.settings.output_kind {
            OutputKind::Logits => imagenet::softmax(&scores),
            OutputKind::Probabilities => scores,
        };
        let predictions = imagenet::decode_predictions(
            &probabilities,
            &self.classes,
            self.settings.top_k,
            self.settings.min_probability,
        )?;

        tracing::debug!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            top = predictions.first().map(|p| p.label.as_str()),
            "image classified"
        );
        Ok(predictions)
    }
}

pub struct TabularClassifier {
    model: LogisticRegression,
    metadata: ModelMetadata,
}

impl TabularClassifier {
    pub fn load(path: &Path, format: ArtifactFormat) -> Result<Self, ServiceError> {
        let model = artifact::load(path, format)?;
        let size_bytes = fs::metadata(path)?.len();
        Ok(Self::new(
            model,
            ModelMetadata {
                name: "pima-indians-diabetes".to_string(),
                kind: "logistic-regression".to_string(),
                artifact: path.display().to_string(),
                format: format.to_string(),
                size_bytes,
            },
        ))
    }

    pub fn new(model: LogisticRegression, metadata: ModelMetadata) -> Self {
        Self { model, metadata }
    }

    pub fn metadata(&self) -> ModelMetadata {
        self.metadata.clone()
    }

    pub fn model(&self) -> &LogisticRegression {
        &self.model
    }

    pub fn predict(&self, record: &[f64]) -> Result<DiabetesPrediction, ServiceError> {
        Ok(DiabetesPrediction {
            prediction: self.model.predict(record)?,
            probability: self.model.predict_proba(record)?,
        })
    }
}

pub struct ModelArtifacts {
    pub image: Option<Arc<ImageClassifier>>,
    pub tabular: Option<Arc<TabularClassifier>>,
}

impl ModelArtifacts {
    /// Loads every model it can. A model that fails is logged and left out
    /// so the other one can still be served.
    pub fn load(config: &AppConfig) -> Self {
        let start = Instant::now();
        let tabular = match TabularClassifier::load(&config.pima_model_path, config.pima_model_format)
        {
            Ok(classifier) => {
                info!(path = %config.pima_model_path.display(), "tabular model loaded");
                Some(Arc::new(classifier))
            }
            Err(err) => {
                warn!(error = %err, "tabular model unavailable");
                None
            }
        };

        let image = match load_image_classifier(config) {
            Ok(classifier) => {
                info!(
                    path = %config.resnet_module_path.display(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "image model loaded"
                );
                Some(Arc::new(classifier))
            }
            Err(err) => {
                warn!(error = %err, "image model unavailable");
                None
            }
        };

        Self { image, tabular }
    }
}

#[cfg(feature = "tch-backend")]
fn load_image_classifier(config: &AppConfig) -> Result<ImageClassifier, ServiceError> {
    let classes = ClassIndex::load(&config.class_index_path)?;
    let backend = TorchBackend::load(&config.resnet_module_path, config.device)?;
    let size_bytes = fs::metadata(&config.resnet_module_path)?.len();
    Ok(ImageClassifier::new(
        Box::new(backend),
        classes,
        ClassifierSettings::from_config(config),
        ModelMetadata {
            name: "resnet50".to_string(),
            kind: "image-classifier".to_string(),
            artifact: config.resnet_module_path.display().to_string(),
            format: "torchscript".to_string(),
            size_bytes,
        },
    ))
}

#[cfg(not(feature = "tch-backend"))]
fn load_image_classifier(config: &AppConfig) -> Result<ImageClassifier, ServiceError> {
    ClassIndex::load(&config.class_index_path)?;
    Err(ServiceError::ModelUnavailable(
        "built without the tch-backend feature".into(),
    ))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::model::LogisticParams;

    /// Returns fixed scores for any correctly sized input.
    pub(crate) struct StubBackend {
        pub scores: Vec<f32>,
    }

    impl ImageBackend for StubBackend {
        fn forward(&self, input: &[f32]) -> Result<Vec<f32>, ServiceError> {
            let side = imagenet::INPUT_SIZE as usize;
            assert_eq!(input.len(), 3 * side * side);
            Ok(self.scores.clone())
        }
    }

    pub(crate) fn stub_classifier(scores: Vec<f32>, output_kind: OutputKind) -> ImageClassifier {
        let classes = ClassIndex::from_json(
            r#"{"0": ["n02112018", "Pomeranian"], "1": ["n02510455", "giant_panda"], "2": ["n04228054", "ski"]}"#,
        )
        .unwrap();
        ImageClassifier::new(
            Box::new(StubBackend { scores }),
            classes,
            ClassifierSettings {
                preprocessing: Preprocessing::Torch,
                output_kind,
                top_k: 5,
                min_probability: 0.1,
            },
            ModelMetadata {
                name: "stub".to_string(),
                kind: "image-classifier".to_string(),
                artifact: "memory".to_string(),
                format: "stub".to_string(),
                size_bytes: 0,
            },
        )
    }

    pub(crate) fn pima_classifier() -> TabularClassifier {
        TabularClassifier::new(
            LogisticRegression {
                params: LogisticParams::default(),
                classes: vec![0, 1],
                coef: vec![vec![0.12, 0.035, -0.013, 0.0006, -0.0012, 0.09, 0.94, 0.015]],
                intercept: vec![-8.4],
                n_iter: vec![30],
            },
            ModelMetadata {
                name: "pima-indians-diabetes".to_string(),
                kind: "logistic-regression".to_string(),
                artifact: "memory".to_string(),
                format: "json".to_string(),
                size_bytes: 0,
            },
        )
    }

    pub(crate) fn png_bytes() -> Vec<u8> {
        let img = image::RgbImage::from_pixel(8, 8, image::Rgb([200, 120, 40]));
        let mut encoded = std::io::Cursor::new(Vec::new());
        img.write_to(&mut encoded, image::ImageFormat::Png).unwrap();
        encoded.into_inner()
    }

    #[test]
    fn classify_applies_softmax_to_logits() {
        let classifier = stub_classifier(vec![1.0, 5.0, 3.0], OutputKind::Logits);
        let predictions = classifier.classify(&png_bytes()).unwrap();
        assert_eq!(predictions[0].label, "giant_panda");
        assert!(predictions[0].probability > 0.8);
        assert!(predictions.iter().all(|p| p.probability >= 0.1));
        assert_eq!(predictions.len(), 2);
    }

    #[test]
    fn classify_passes_probabilities_through() {
        let classifier = stub_classifier(vec![0.05, 0.05, 0.9], OutputKind::Probabilities);
        let predictions = classifier.classify(&png_bytes()).unwrap();
        assert_eq!(predictions.len(), 1);
        assert_eq!(predictions[0].wordnet, "n04228054");
        assert!((predictions[0].probability - 0.9).abs() < 1e-6);
    }

    #[test]
    fn classify_rejects_garbage_uploads() {
        let classifier = stub_classifier(vec![0.2, 0.3, 0.5], OutputKind::Probabilities);
        assert!(matches!(
            classifier.classify(b"GIF89a-but-not-really"),
            Err(ServiceError::Image(_))
        ));
    }

    #[test]
    fn tabular_prediction_reports_label_and_probability() {
        let classifier = pima_classifier();
        let high = classifier.predict(&[7.0, 195.0, 70.0, 33.0, 145.0, 25.1, 0.163, 55.0]).unwrap();
        assert_eq!(high.prediction, 1);
        assert!(high.probability > 0.5);

        let low = classifier.predict(&[1.0, 89.0, 66.0, 23.0, 94.0, 28.1, 0.167, 21.0]).unwrap();
        assert_eq!(low.prediction, 0);
        assert!(low.probability < 0.5);
    }

    #[test]
    fn tabular_load_reads_artifact_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pima.json");
        artifact::save(pima_classifier().model(), &path, ArtifactFormat::Json).unwrap();

        let loaded = TabularClassifier::load(&path, ArtifactFormat::Json).unwrap();
        let metadata = loaded.metadata();
        assert!(metadata.size_bytes > 0);
        assert_eq!(metadata.format, "json");
    }
}
