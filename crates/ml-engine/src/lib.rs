//! Random-forest price prediction over technical features.
//!
//! A classifier votes on direction and a regressor estimates the
//! close ratio `horizon` bars ahead. Both are fitted with smartcore
//! on a chronological split and kept in a [`ModelRegistry`].

pub mod features;
pub mod predictor;
pub mod registry;

pub use features::{FeatureBuilder, FeatureRow, LabeledDataset, FEATURE_NAMES};
pub use predictor::{ModelParams, PricePredictor, TrainedModel, TrainingReport, MIN_TRAINING_ROWS, MODEL_TYPE};
pub use registry::{ModelRegistry, ModelSummary};
