use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::Serialize;

use crate::predictor::{TrainedModel, TrainingReport};

/// Trained models keyed by (symbol, horizon), replaced once stale
pub struct ModelRegistry {
    models: DashMap<(String, usize), Arc<TrainedModel>>,
    max_age: Duration,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelSummary {
    pub symbol: String,
    pub horizon_days: usize,
    pub accuracy: f64,
    pub mae_percent: f64,
    pub train_rows: usize,
    pub trained_at: DateTime<Utc>,
    pub stale: bool,
}

fn key(symbol: &str, horizon_days: usize) -> (String, usize) {
    (symbol.to_uppercase(), horizon_days)
}

impl ModelRegistry {
    pub fn new(max_age: Duration) -> Self {
        Self {
            models: DashMap::new(),
            max_age,
        }
    }

    pub fn insert(&self, model: TrainedModel) -> Arc<TrainedModel> {
        let model = Arc::new(model);
        let report = &model.report;
        self.models
            .insert(key(&report.symbol, report.horizon_days), Arc::clone(&model));
        model
    }

    /// Model trained within max_age, if any
    pub fn get_fresh(&self, symbol: &str, horizon_days: usize) -> Option<Arc<TrainedModel>> {
        let entry = self.models.get(&key(symbol, horizon_days))?;
        (!self.is_stale(&entry.report, Utc::now())).then(|| Arc::clone(entry.value()))
    }

    pub fn get(&self, symbol: &str, horizon_days: usize) -> Option<Arc<TrainedModel>> {
        self.models
            .get(&key(symbol, horizon_days))
            .map(|entry| Arc::clone(entry.value()))
    }

    pub fn remove(&self, symbol: &str, horizon_days: usize) -> bool {
        self.models.remove(&key(symbol, horizon_days)).is_some()
    }

    pub fn list(&self) -> Vec<ModelSummary> {
        let now = Utc::now();
        let mut summaries: Vec<ModelSummary> = self
            .models
            .iter()
            .map(|entry| {
                let report = &entry.value().report;
                ModelSummary {
                    symbol: report.symbol.clone(),
                    horizon_days: report.horizon_days,
                    accuracy: report.accuracy,
                    mae_percent: report.mae_percent,
                    train_rows: report.train_rows,
                    trained_at: report.trained_at,
                    stale: self.is_stale(report, now),
                }
            })
            .collect();
        summaries.sort_by(|a, b| a.symbol.cmp(&b.symbol).then(a.horizon_days.cmp(&b.horizon_days)));
        summaries
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    fn is_stale(&self, report: &TrainingReport, now: DateTime<Utc>) -> bool {
        now - report.trained_at > self.max_age
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new(Duration::hours(24))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predictor::{ModelParams, PricePredictor};
    use analysis_core::Bar;
    use chrono::TimeZone;

    fn bars(n: usize) -> Vec<Bar> {
        (0..n)
            .map(|i| {
                let x = i as f64;
                let close = 80.0 + x * 0.05 + (x * 0.4).sin() * 3.0;
                Bar {
                    timestamp: Utc.with_ymd_and_hms(2022, 6, 1, 0, 0, 0).unwrap() + Duration::days(i as i64),
                    open: close,
                    high: close + 0.5,
                    low: close - 0.5,
                    close,
                    volume: 500_000.0 + (x * 0.9).sin() * 50_000.0,
                }
            })
            .collect()
    }

    fn trained(symbol: &str, horizon: usize) -> TrainedModel {
        let params = ModelParams {
            n_trees: 5,
            max_depth: 4,
            ..ModelParams::default()
        };
        PricePredictor::train(symbol, &bars(220), horizon, params).unwrap()
    }

    #[test]
    fn test_insert_and_lookup_case_insensitive() {
        let registry = ModelRegistry::default();
        registry.insert(trained("AAPL", 5));

        assert!(registry.get_fresh("aapl", 5).is_some());
        assert!(registry.get_fresh("AAPL", 10).is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_stale_model_not_fresh() {
        let registry = ModelRegistry::new(Duration::hours(1));
        let mut model = trained("MSFT", 5);
        model.report.trained_at = Utc::now() - Duration::hours(2);
        registry.insert(model);

        assert!(registry.get_fresh("MSFT", 5).is_none());
        assert!(registry.get("MSFT", 5).is_some());
        assert!(registry.list()[0].stale);
    }

    #[test]
    fn test_list_sorted_and_remove() {
        let registry = ModelRegistry::default();
        registry.insert(trained("MSFT", 5));
        registry.insert(trained("AAPL", 10));
        registry.insert(trained("AAPL", 5));

        let listed: Vec<(String, usize)> = registry
            .list()
            .into_iter()
            .map(|s| (s.symbol, s.horizon_days))
            .collect();
        assert_eq!(
            listed,
            vec![("AAPL".to_string(), 5), ("AAPL".to_string(), 10), ("MSFT".to_string(), 5)]
        );

        assert!(registry.remove("aapl", 10));
        assert!(!registry.remove("aapl", 10));
        assert_eq!(registry.len(), 2);
    }
}
