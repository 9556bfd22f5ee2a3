pub mod dataset;
pub mod split;
mod trainer;

pub use dataset::{Dataset, NullMethod};
pub use trainer::{
    DEFAULT_C_GRID, GridSearchResult, REFERENCE_RECORDS, ReferencePrediction, Trainer,
    TrainingOptions, TrainingReport, cross_val_score, grid_search,
};
