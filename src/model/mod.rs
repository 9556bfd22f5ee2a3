pub mod artifact;
pub mod imagenet;
mod loader;
mod logistic;
mod registry;
mod types;

pub use artifact::ArtifactFormat;
pub use imagenet::{ClassIndex, OutputKind, Preprocessing};
#[cfg(feature = "tch-backend")]
pub use loader::TorchBackend;
pub use loader::{
    ClassifierSettings, ImageBackend, ImageClassifier, ModelArtifacts, TabularClassifier,
};
pub use logistic::{LogisticParams, LogisticRegression, Penalty, sigmoid};
pub use registry::ModelRegistry;
pub use types::{
    DIABETES_FIELDS, DiabetesPrediction, DiabetesRequest, ImagePrediction,
    ImagePredictionResponse, ModelMetadata,
};

#[cfg(test)]
pub(crate) use loader::tests as test_support;
