pub mod forest;
pub mod gridsearch;
pub mod historical;
pub mod lagged;

use chrono::NaiveDateTime;

use crate::config::{depth_limit, RunConfig};
use crate::series::TimeSeries;

pub use gridsearch::{GridSearchResult, ParamGrid};
pub use historical::{historical_forecasts, HistoricalOptions};
pub use lagged::{LaggedForest, ModelParams};

pub trait Forecaster: Send + Sync {
    fn name(&self) -> &'static str;

    fn params(&self) -> serde_json::Value;

    fn fit(
        &mut self,
        series: &TimeSeries,
        past: Option<&TimeSeries>,
        future: Option<&TimeSeries>,
    ) -> anyhow::Result<()>;

    fn predict(
        &self,
        n: usize,
        past: Option<&TimeSeries>,
        future: Option<&TimeSeries>,
    ) -> anyhow::Result<TimeSeries>;

    /// `n` steps continuing after an arbitrary `history` of the target.
    fn predict_after(
        &self,
        history: &TimeSeries,
        n: usize,
        past: Option<&TimeSeries>,
        future: Option<&TimeSeries>,
    ) -> anyhow::Result<TimeSeries>;
}

pub trait ModelBackend: Sync {
    /// Unfitted model. `use_past_covariates = false` forces the past lag to
    /// `None` whatever was requested.
    fn create_model(
        &self,
        cfg: &RunConfig,
        lags: usize,
        lags_past: Option<usize>,
        lags_future: &[i64],
        horizon: usize,
        use_past_covariates: bool,
    ) -> anyhow::Result<Box<dyn Forecaster>>;

    #[allow(clippy::too_many_arguments)]
    fn run_gridsearch(
        &self,
        cfg: &RunConfig,
        train: &TimeSeries,
        train_past: Option<&TimeSeries>,
        train_future: Option<&TimeSeries>,
        val: &TimeSeries,
        val_past: Option<&TimeSeries>,
        val_future: Option<&TimeSeries>,
        use_past_covariates: bool,
    ) -> anyhow::Result<(Box<dyn Forecaster>, serde_json::Value)>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ForestBackend;

impl ForestBackend {
    pub fn default_params(
        cfg: &RunConfig,
        lags: usize,
        lags_past: Option<usize>,
        lags_future: &[i64],
        horizon: usize,
        use_past_covariates: bool,
    ) -> ModelParams {
        ModelParams {
            lags,
            lags_past_covariates: if use_past_covariates { lags_past } else { None },
            lags_future_covariates: lags_future.to_vec(),
            output_chunk_length: horizon,
            n_estimators: cfg.default_n_estimators,
            max_depth: cfg.default_depth_limit(),
            min_samples_split: 2,
            min_samples_leaf: 1,
            random_state: cfg.random_seed,
        }
    }
}

impl ModelBackend for ForestBackend {
    fn create_model(
        &self,
        cfg: &RunConfig,
        lags: usize,
        lags_past: Option<usize>,
        lags_future: &[i64],
        horizon: usize,
        use_past_covariates: bool,
    ) -> anyhow::Result<Box<dyn Forecaster>> {
        if lags == 0 {
            anyhow::bail!("lags must be > 0");
        }
        if horizon == 0 {
            anyhow::bail!("output_chunk_length must be > 0");
        }
        let params =
            Self::default_params(cfg, lags, lags_past, lags_future, horizon, use_past_covariates);
        Ok(Box::new(LaggedForest::new(params)))
    }

    fn run_gridsearch(
        &self,
        cfg: &RunConfig,
        train: &TimeSeries,
        train_past: Option<&TimeSeries>,
        train_future: Option<&TimeSeries>,
        val: &TimeSeries,
        val_past: Option<&TimeSeries>,
        val_future: Option<&TimeSeries>,
        use_past_covariates: bool,
    ) -> anyhow::Result<(Box<dyn Forecaster>, serde_json::Value)> {
        let grid = ParamGrid {
            lags: cfg.lags,
            lags_past_covariates: use_past_covariates.then_some(cfg.lags_past_covariates),
            lags_future_covariates: cfg.lags_future_covariates.clone(),
            output_chunk_length: cfg.output_chunk_length,
            n_estimators: cfg.grid.n_estimators.clone(),
            max_depth: cfg.grid.max_depth.iter().map(|&d| depth_limit(d)).collect(),
            min_samples_split: cfg.grid.min_samples_split.clone(),
            min_samples_leaf: cfg.grid.min_samples_leaf.clone(),
            random_state: cfg.random_seed,
        };

        let past = join_optional(train_past, val_past)?;
        let future = join_optional(train_future, val_future)?;
        let result = gridsearch::search(
            &grid,
            train,
            val,
            past.as_ref(),
            future.as_ref(),
            &gridsearch::SearchOptions {
                start: cfg.grid.start,
                horizon: cfg.grid.horizon,
                fallback_split: cfg.train_test_split,
                n_jobs: cfg.grid.n_jobs,
                verbose: cfg.grid.verbose,
            },
        )?;

        let best_params = serde_json::to_value(&result.best)?;
        Ok((Box::new(LaggedForest::new(result.best)), best_params))
    }
}

fn join_optional(
    a: Option<&TimeSeries>,
    b: Option<&TimeSeries>,
) -> anyhow::Result<Option<TimeSeries>> {
    Ok(match (a, b) {
        (Some(a), Some(b)) => Some(a.concatenate(b)?),
        (Some(s), None) | (None, Some(s)) => Some(s.clone()),
        (None, None) => None,
    })
}

/// Timestamps of the `n` steps after `history`: the future covariate index
/// if it reaches far enough, then the past covariate index, else the
/// history's last step repeated.
pub(crate) fn forecast_index(
    history: &TimeSeries,
    n: usize,
    past: Option<&TimeSeries>,
    future: Option<&TimeSeries>,
) -> anyhow::Result<Vec<NaiveDateTime>> {
    let Some(last) = history.last_timestamp() else {
        anyhow::bail!("cannot forecast after an empty history");
    };

    for source in [future, past].into_iter().flatten() {
        let from = source.count_through(last);
        let ahead = &source.index()[from..];
        if ahead.len() >= n {
            return Ok(ahead[..n].to_vec());
        }
    }

    let Some(step) = history.last_step() else {
        anyhow::bail!(
            "cannot infer forecast timestamps from a single-point history without covariates"
        );
    };
    Ok((1..=n as i32).map(|i| last + step * i).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GridConfig, RollingConfig};
    use chrono::{Duration, NaiveDate};
    use std::path::PathBuf;

    fn cfg() -> RunConfig {
        RunConfig {
            raw_csv: PathBuf::from("in.csv"),
            series_column: "in".to_string(),
            past_covariates: vec!["weather".to_string()],
            future_covariates: Vec::new(),
            lags: 24,
            lags_past_covariates: 24,
            lags_future_covariates: vec![0],
            output_chunk_length: 1,
            train_test_split: 0.7,
            random_seed: 42,
            results_dir: PathBuf::from("results"),
            experiment_prefix: "out".to_string(),
            default_n_estimators: 100,
            default_max_depth: 15,
            do_gridsearch: false,
            fail_fast: false,
            grid: GridConfig::default(),
            rolling: RollingConfig {
                enabled: true,
                ..RollingConfig::default()
            },
        }
    }

    fn hours(start: i64, n: usize) -> Vec<NaiveDateTime> {
        let base = NaiveDate::from_ymd_opt(2024, 2, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .unwrap();
        (0..n)
            .map(|i| base + Duration::hours(start + i as i64))
            .collect()
    }

    #[test]
    fn past_lag_is_dropped_without_past_covariates() -> anyhow::Result<()> {
        let model = ForestBackend.create_model(&cfg(), 24, Some(24), &[0], 1, false)?;
        assert!(model.params()["lags_past_covariates"].is_null());
        let model = ForestBackend.create_model(&cfg(), 24, Some(24), &[0], 1, true)?;
        assert_eq!(model.params()["lags_past_covariates"], 24);
        Ok(())
    }

    #[test]
    fn default_model_uses_configured_hyperparameters() -> anyhow::Result<()> {
        let model = ForestBackend.create_model(&cfg(), 12, None, &[-1, 0], 2, false)?;
        let p = model.params();
        assert_eq!(p["n_estimators"], 100);
        assert_eq!(p["max_depth"], 15);
        assert_eq!(p["random_state"], 42);
        assert_eq!(p["output_chunk_length"], 2);
        Ok(())
    }

    #[test]
    fn forecast_index_prefers_future_covariates() -> anyhow::Result<()> {
        let history = TimeSeries::univariate("in", hours(0, 3), vec![1.0; 3])?;
        // Gap between hour 5 and hour 9 must be followed, not extrapolated.
        let mut idx = hours(0, 6);
        idx.push(hours(9, 1)[0]);
        let future = TimeSeries::new(idx, Vec::new(), Vec::new())?;
        let got = forecast_index(&history, 4, None, Some(&future))?;
        assert_eq!(got[3], hours(9, 1)[0]);
        Ok(())
    }

    #[test]
    fn forecast_index_extrapolates_last_step() -> anyhow::Result<()> {
        let history = TimeSeries::univariate("in", hours(0, 3), vec![1.0; 3])?;
        let got = forecast_index(&history, 2, None, None)?;
        assert_eq!(got, hours(3, 2));
        Ok(())
    }
}
