use analysis_core::{AnalysisError, Bar, PredictionLabel, PredictionResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use smartcore::ensemble::random_forest_classifier::{RandomForestClassifier, RandomForestClassifierParameters};
use smartcore::ensemble::random_forest_regressor::{RandomForestRegressor, RandomForestRegressorParameters};
use smartcore::linalg::basic::matrix::DenseMatrix;

use crate::features::{FeatureBuilder, LabeledDataset, FEATURE_NAMES};

pub const MIN_TRAINING_ROWS: usize = 60;
pub const MODEL_TYPE: &str = "random_forest";

/// Predicted moves smaller than this (percent) read as NEUTRAL
const NEUTRAL_MOVE_PERCENT: f64 = 0.25;
const DISAGREEMENT_PENALTY: f64 = 0.6;

type Classifier = RandomForestClassifier<f64, u32, DenseMatrix<f64>, Vec<u32>>;
type Regressor = RandomForestRegressor<f64, f64, DenseMatrix<f64>, Vec<f64>>;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelParams {
    pub n_trees: usize,
    pub max_depth: u16,
    pub min_samples_split: usize,
    pub test_fraction: f64,
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_depth: 8,
            min_samples_split: 5,
            test_fraction: 0.2,
        }
    }
}

impl ModelParams {
    pub fn validate(&self) -> Result<(), AnalysisError> {
        if !(1..=500).contains(&self.n_trees) {
            return Err(AnalysisError::InvalidData("n_trees must be between 1 and 500".to_string()));
        }
        if !(1..=32).contains(&self.max_depth) {
            return Err(AnalysisError::InvalidData("max_depth must be between 1 and 32".to_string()));
        }
        if self.min_samples_split < 2 {
            return Err(AnalysisError::InvalidData("min_samples_split must be at least 2".to_string()));
        }
        if !(0.05..=0.5).contains(&self.test_fraction) {
            return Err(AnalysisError::InvalidData("test_fraction must be between 0.05 and 0.5".to_string()));
        }
        Ok(())
    }
}

/// Holdout evaluation of a fitted model pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingReport {
    pub symbol: String,
    pub horizon_days: usize,
    pub train_rows: usize,
    pub test_rows: usize,
    /// Direction accuracy on the holdout
    pub accuracy: f64,
    /// Share of holdout "up" calls that were right
    pub up_precision: f64,
    /// Mean absolute error of the predicted move, in percent
    pub mae_percent: f64,
    pub rmse_percent: f64,
    pub features: Vec<String>,
    pub params: ModelParams,
    pub trained_at: DateTime<Utc>,
}

/// Single-class training windows (e.g. a straight rally) get a constant vote
enum DirectionModel {
    Forest(Box<Classifier>),
    Constant(u32),
}

impl DirectionModel {
    fn predict(&self, x: &DenseMatrix<f64>, rows: usize) -> Result<Vec<u32>, AnalysisError> {
        match self {
            DirectionModel::Forest(model) => model.predict(x).map_err(model_error),
            DirectionModel::Constant(class) => Ok(vec![*class; rows]),
        }
    }
}

/// Fitted classifier and regressor for one (symbol, horizon)
pub struct TrainedModel {
    direction: DirectionModel,
    regressor: Regressor,
    pub report: TrainingReport,
}

fn model_error(e: impl std::fmt::Display) -> AnalysisError {
    AnalysisError::ModelError(e.to_string())
}

fn matrix(rows: &[Vec<f64>]) -> Result<DenseMatrix<f64>, AnalysisError> {
    DenseMatrix::from_2d_vec(&rows.to_vec()).map_err(|e| model_error(format!("Matrix error: {}", e)))
}

fn fit_direction(x: &DenseMatrix<f64>, y: &[u32], params: &ModelParams) -> Result<DirectionModel, AnalysisError> {
    let first = y.first().copied().unwrap_or(0);
    if y.iter().all(|&c| c == first) {
        return Ok(DirectionModel::Constant(first));
    }

    let rf_params = RandomForestClassifierParameters::default()
        .with_n_trees(params.n_trees.try_into().unwrap_or_default())
        .with_max_depth(params.max_depth)
        .with_min_samples_split(params.min_samples_split);
    let model = RandomForestClassifier::fit(x, &y.to_vec(), rf_params).map_err(model_error)?;
    Ok(DirectionModel::Forest(Box::new(model)))
}

fn fit_regressor(x: &DenseMatrix<f64>, y: &[f64], params: &ModelParams) -> Result<Regressor, AnalysisError> {
    let rf_params = RandomForestRegressorParameters::default()
        .with_n_trees(params.n_trees.try_into().unwrap_or_default())
        .with_max_depth(params.max_depth)
        .with_min_samples_split(params.min_samples_split);
    RandomForestRegressor::fit(x, &y.to_vec(), rf_params).map_err(model_error)
}

pub struct PricePredictor;

impl PricePredictor {
    /// Fit on the oldest (1 - test_fraction) of rows, score on the rest
    pub fn train(symbol: &str, bars: &[Bar], horizon_days: usize, params: ModelParams) -> Result<TrainedModel, AnalysisError> {
        params.validate()?;
        if horizon_days == 0 || horizon_days > 60 {
            return Err(AnalysisError::InvalidData("horizon_days must be between 1 and 60".to_string()));
        }

        let data = FeatureBuilder::labeled(bars, horizon_days);
        if data.len() < MIN_TRAINING_ROWS {
            return Err(AnalysisError::InsufficientData(format!(
                "Need at least {} training rows for {}, got {} from {} bars",
                MIN_TRAINING_ROWS,
                symbol,
                data.len(),
                bars.len()
            )));
        }

        let test_rows = ((data.len() as f64 * params.test_fraction).round() as usize).max(1);
        let split = data.len() - test_rows;
        let LabeledDataset {
            rows,
            direction,
            target_ratio,
            ..
        } = data;

        let x_train = matrix(&rows[..split])?;
        let x_test = matrix(&rows[split..])?;

        let direction_model = fit_direction(&x_train, &direction[..split], &params)?;
        let regressor = fit_regressor(&x_train, &target_ratio[..split], &params)?;

        let predicted_direction = direction_model.predict(&x_test, test_rows)?;
        let predicted_ratio = regressor.predict(&x_test).map_err(model_error)?;

        let actual_direction = &direction[split..];
        let actual_ratio = &target_ratio[split..];

        let correct = predicted_direction
            .iter()
            .zip(actual_direction)
            .filter(|(p, a)| p == a)
            .count();
        let up_calls = predicted_direction.iter().filter(|&&p| p == 1).count();
        let up_hits = predicted_direction
            .iter()
            .zip(actual_direction)
            .filter(|(&p, &a)| p == 1 && a == 1)
            .count();

        let errors: Vec<f64> = predicted_ratio
            .iter()
            .zip(actual_ratio)
            .map(|(p, a)| (p - a) * 100.0)
            .collect();
        let mae_percent = errors.iter().map(|e| e.abs()).sum::<f64>() / errors.len() as f64;
        let rmse_percent = (errors.iter().map(|e| e * e).sum::<f64>() / errors.len() as f64).sqrt();

        let report = TrainingReport {
            symbol: symbol.to_string(),
            horizon_days,
            train_rows: split,
            test_rows,
            accuracy: correct as f64 / test_rows as f64,
            up_precision: if up_calls > 0 { up_hits as f64 / up_calls as f64 } else { 0.0 },
            mae_percent,
            rmse_percent,
            features: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
            params,
            trained_at: Utc::now(),
        };

        tracing::info!(
            "Trained {} model for {} (h={}): {} train / {} test rows, accuracy {:.1}%, MAE {:.2}%",
            MODEL_TYPE,
            symbol,
            horizon_days,
            report.train_rows,
            report.test_rows,
            report.accuracy * 100.0,
            report.mae_percent
        );

        Ok(TrainedModel {
            direction: direction_model,
            regressor,
            report,
        })
    }

    /// Train and predict in one step
    pub fn fit_predict(symbol: &str, bars: &[Bar], horizon_days: usize, params: ModelParams) -> Result<PredictionResult, AnalysisError> {
        Self::train(symbol, bars, horizon_days, params)?.predict(symbol, bars)
    }
}

impl TrainedModel {
    pub fn horizon_days(&self) -> usize {
        self.report.horizon_days
    }

    /// Predict from the latest bar's features
    pub fn predict(&self, symbol: &str, bars: &[Bar]) -> Result<PredictionResult, AnalysisError> {
        let latest = FeatureBuilder::latest(bars).ok_or_else(|| {
            AnalysisError::InsufficientData(format!("Latest bar of {} has incomplete features", symbol))
        })?;

        let x = matrix(std::slice::from_ref(&latest.values))?;
        let up = self.direction.predict(&x, 1)?.first().copied().unwrap_or(0) == 1;
        let ratio = self
            .regressor
            .predict(&x)
            .map_err(model_error)?
            .first()
            .copied()
            .ok_or_else(|| model_error("No prediction returned"))?;

        let current_price = latest.close;
        let predicted_price = current_price * ratio;
        let change_percent = (ratio - 1.0) * 100.0;
        let regressor_up = change_percent > 0.0;
        let agree = up == regressor_up;

        let prediction = if change_percent.abs() < NEUTRAL_MOVE_PERCENT || !agree {
            PredictionLabel::Neutral
        } else if up {
            PredictionLabel::Bullish
        } else {
            PredictionLabel::Bearish
        };

        let mut confidence = self.report.accuracy;
        if !agree {
            confidence *= DISAGREEMENT_PENALTY;
        }
        let confidence = confidence.clamp(0.05, 0.99);

        Ok(PredictionResult {
            symbol: symbol.to_string(),
            prediction,
            current_price,
            predicted_price,
            predicted_change_percent: change_percent,
            confidence,
            model_type: MODEL_TYPE.to_string(),
            horizon_days: self.report.horizon_days,
            metrics: json!({
                "classifier_direction": if up { "up" } else { "down" },
                "models_agree": agree,
                "holdout_accuracy": self.report.accuracy,
                "up_precision": self.report.up_precision,
                "mae_percent": self.report.mae_percent,
                "rmse_percent": self.report.rmse_percent,
                "train_rows": self.report.train_rows,
                "test_rows": self.report.test_rows,
                "trained_at": self.report.trained_at,
                "as_of": latest.date,
            }),
            generated_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn noisy_trend(n: usize) -> Vec<Bar> {
        (0..n)
            .map(|i| {
                let x = i as f64;
                let close = 50.0 + x * 0.15 + (x * 0.45).sin() * 2.5 + (x * 1.7).cos() * 0.8;
                Bar {
                    timestamp: Utc.with_ymd_and_hms(2021, 1, 4, 0, 0, 0).unwrap() + Duration::days(i as i64),
                    open: close - 0.2,
                    high: close + 0.9,
                    low: close - 0.9,
                    close,
                    volume: 2_000_000.0 + (x * 0.3).sin() * 400_000.0,
                }
            })
            .collect()
    }

    fn small_params() -> ModelParams {
        ModelParams {
            n_trees: 15,
            max_depth: 6,
            ..ModelParams::default()
        }
    }

    #[test]
    fn test_insufficient_rows() {
        let err = PricePredictor::train("TEST", &noisy_trend(100), 5, small_params()).err().unwrap();
        assert!(matches!(err, AnalysisError::InsufficientData(_)));
    }

    #[test]
    fn test_invalid_params_rejected() {
        let params = ModelParams {
            n_trees: 0,
            ..ModelParams::default()
        };
        assert!(matches!(
            PricePredictor::train("TEST", &noisy_trend(300), 5, params).err().unwrap(),
            AnalysisError::InvalidData(_)
        ));
        assert!(PricePredictor::train("TEST", &noisy_trend(300), 0, small_params()).is_err());
    }

    #[test]
    fn test_train_and_predict_fields_in_range() {
        let bars = noisy_trend(300);
        let model = PricePredictor::train("TEST", &bars, 5, small_params()).unwrap();

        let report = &model.report;
        assert_eq!(report.train_rows + report.test_rows, 300 - 49 - 5);
        assert!((0.0..=1.0).contains(&report.accuracy));
        assert!((0.0..=1.0).contains(&report.up_precision));
        assert!(report.mae_percent >= 0.0);
        assert!(report.rmse_percent >= report.mae_percent);

        let prediction = model.predict("TEST", &bars).unwrap();
        assert_eq!(prediction.model_type, "random_forest");
        assert_eq!(prediction.horizon_days, 5);
        assert!((0.05..=0.99).contains(&prediction.confidence));
        assert!((prediction.current_price - bars[299].close).abs() < 1e-12);
        assert!(prediction.predicted_price > 0.0);
        let implied = (prediction.predicted_price / prediction.current_price - 1.0) * 100.0;
        assert!((implied - prediction.predicted_change_percent).abs() < 1e-9);
        if prediction.predicted_change_percent.abs() < 0.25 {
            assert_eq!(prediction.prediction, PredictionLabel::Neutral);
        }
    }

    #[test]
    fn test_straight_rally_uses_constant_direction() {
        let bars: Vec<Bar> = (0..200)
            .map(|i| {
                let close = 100.0 * 1.01_f64.powi(i);
                Bar {
                    timestamp: Utc.with_ymd_and_hms(2021, 1, 4, 0, 0, 0).unwrap() + Duration::days(i as i64),
                    open: close,
                    high: close * 1.005,
                    low: close * 0.995,
                    close,
                    volume: 1_000_000.0,
                }
            })
            .collect();

        let model = PricePredictor::train("UP", &bars, 3, small_params()).unwrap();
        assert_eq!(model.report.accuracy, 1.0);

        let prediction = model.predict("UP", &bars).unwrap();
        assert_eq!(prediction.metrics["classifier_direction"], "up");
    }
}
