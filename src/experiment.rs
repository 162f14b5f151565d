//! One ablation configuration end to end:
//! LOAD -> SPLIT -> BUILD_MODEL -> FIT -> PREDICT -> PERSIST.

use std::fmt;
use std::path::PathBuf;

use anyhow::Context as _;
use serde::Serialize;
use tracing::{debug, info};

use crate::metrics::{compute_metrics, ForecastMetrics};
use crate::model::{historical_forecasts, Forecaster, HistoricalOptions, ModelBackend};
use crate::persist::{append_metrics_summary, save_predictions, SummaryRow};
use crate::prepare::{build_series, PreparedTable};
use crate::run_context::RunContext;
use crate::schema::{ROLLING_START_FRACTION, ROLLING_SUFFIX, TRAIN_RATIO, VAL_RATIO};
use crate::series::TimeSeries;
use crate::split::{split, SplitSet};

/// A named subset of the past covariates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExperimentSpec {
    pub name: String,
    pub past_covariates: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Load,
    Split,
    BuildModel,
    Fit,
    Predict,
    Persist,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Load => "LOAD",
            Stage::Split => "SPLIT",
            Stage::BuildModel => "BUILD_MODEL",
            Stage::Fit => "FIT",
            Stage::Predict => "PREDICT",
            Stage::Persist => "PERSIST",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of one experiment, tagged with the stage it happened in.
#[derive(Debug)]
pub struct ExperimentFailure {
    pub stage: Stage,
    pub error: anyhow::Error,
}

impl fmt::Display for ExperimentFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {:#}", self.stage, self.error)
    }
}

impl std::error::Error for ExperimentFailure {}

trait AtStage<T> {
    fn at(self, stage: Stage) -> Result<T, ExperimentFailure>;
}

impl<T> AtStage<T> for anyhow::Result<T> {
    fn at(self, stage: Stage) -> Result<T, ExperimentFailure> {
        self.map_err(|error| ExperimentFailure { stage, error })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExperimentOutcome {
    pub metrics: ForecastMetrics,
    pub rolling: Option<ForecastMetrics>,
    pub best_params: Option<serde_json::Value>,
    pub predictions_path: PathBuf,
}

/// Optional series split alongside the target.
struct Segments {
    target: SplitSet,
    past: Option<SplitSet>,
    future: SplitSet,
}

pub fn run_experiment(
    ctx: &RunContext,
    table: &PreparedTable,
    spec: &ExperimentSpec,
    backend: &dyn ModelBackend,
) -> Result<ExperimentOutcome, ExperimentFailure> {
    let cfg = &ctx.config;
    info!(experiment = %spec.name, past_covariates = ?spec.past_covariates, "experiment started");

    let set = build_series(
        table,
        &cfg.series_column,
        &spec.past_covariates,
        &cfg.future_covariates,
    )
    .with_context(|| format!("build series for {}", spec.name))
    .at(Stage::Load)?;
    debug!(experiment = %spec.name, stage = %Stage::Load, rows = set.target.len(), "series built");

    let segments = split_all(&set.target, set.past.as_ref(), &set.future).at(Stage::Split)?;
    info!(
        experiment = %spec.name,
        stage = %Stage::Split,
        train = segments.target.train.len(),
        val = segments.target.val.len(),
        test = segments.target.test.len(),
        "series split"
    );

    let use_past = set.past.is_some();
    let (mut model, best_params) = if cfg.do_gridsearch {
        let past = segments.past.as_ref();
        let (model, best) = backend
            .run_gridsearch(
                cfg,
                &segments.target.train,
                past.map(|p| &p.train),
                Some(&segments.future.train),
                &segments.target.val,
                past.map(|p| &p.val),
                Some(&segments.future.val),
                use_past,
            )
            .context("grid search")
            .at(Stage::BuildModel)?;
        (model, Some(best))
    } else {
        let model = backend
            .create_model(
                cfg,
                cfg.lags,
                Some(cfg.lags_past_covariates),
                &cfg.lags_future_covariates,
                cfg.output_chunk_length,
                use_past,
            )
            .context("create model")
            .at(Stage::BuildModel)?;
        (model, None)
    };
    debug!(experiment = %spec.name, stage = %Stage::BuildModel, model = model.name(), params = %model.params(), "model built");

    fit_on_train_val(model.as_mut(), &segments).at(Stage::Fit)?;
    info!(experiment = %spec.name, stage = %Stage::Fit, "model fitted");

    let test = &segments.target.test;
    if test.is_empty() {
        return Err(ExperimentFailure {
            stage: Stage::Predict,
            error: anyhow::anyhow!("test segment is empty"),
        });
    }
    let predicted = model
        .predict(test.len(), set.past.as_ref(), Some(&set.future))
        .context("direct forecast")
        .at(Stage::Predict)?;
    let metrics = compute_metrics(test, &predicted)
        .context("score direct forecast")
        .at(Stage::Predict)?;

    let rolling = if cfg.rolling.enabled {
        let opts = HistoricalOptions {
            start_fraction: ROLLING_START_FRACTION,
            forecast_horizon: cfg.rolling.forecast_horizon,
            stride: 1,
            retrain: cfg.rolling.retrain_per_step,
        };
        let forecast = historical_forecasts(
            model.as_mut(),
            &set.target,
            set.past.as_ref(),
            Some(&set.future),
            &opts,
        )
        .context("walk-forward forecast")
        .at(Stage::Predict)?;
        let actual = actual_at(&set.target, &forecast).at(Stage::Predict)?;
        let m = compute_metrics(&actual, &forecast)
            .context("score walk-forward forecast")
            .at(Stage::Predict)?;
        Some((forecast, actual, m))
    } else {
        None
    };
    info!(
        experiment = %spec.name,
        stage = %Stage::Predict,
        mae = metrics.mae,
        mse = metrics.mse,
        rolling_mae = rolling.as_ref().map(|r| r.2.mae),
        "forecast scored"
    );

    let predictions_path = ctx.predictions_path(&spec.name);
    save_predictions(&predictions_path, &predicted, test).at(Stage::Persist)?;
    let best_params_text = best_params
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .context("serialize best_params")
        .at(Stage::Persist)?;
    append_metrics_summary(
        &ctx.summary_path(),
        &SummaryRow {
            experiment: spec.name.clone(),
            metrics,
            best_params: best_params_text,
        },
    )
    .at(Stage::Persist)?;

    if let Some((forecast, actual, m)) = &rolling {
        let path = ctx.predictions_path(&format!("{}{ROLLING_SUFFIX}", spec.name));
        save_predictions(&path, forecast, actual).at(Stage::Persist)?;
        append_metrics_summary(
            &ctx.rolling_summary_path(),
            &SummaryRow {
                experiment: spec.name.clone(),
                metrics: *m,
                best_params: None,
            },
        )
        .at(Stage::Persist)?;
    }
    info!(experiment = %spec.name, stage = %Stage::Persist, path = %predictions_path.display(), "experiment done");

    Ok(ExperimentOutcome {
        metrics,
        rolling: rolling.map(|r| r.2),
        best_params,
        predictions_path,
    })
}

fn split_all(
    target: &TimeSeries,
    past: Option<&TimeSeries>,
    future: &TimeSeries,
) -> anyhow::Result<Segments> {
    Ok(Segments {
        target: split(target, TRAIN_RATIO, VAL_RATIO).context("split target")?,
        past: past
            .map(|p| split(p, TRAIN_RATIO, VAL_RATIO))
            .transpose()
            .context("split past covariates")?,
        future: split(future, TRAIN_RATIO, VAL_RATIO).context("split future covariates")?,
    })
}

fn fit_on_train_val(model: &mut dyn Forecaster, segments: &Segments) -> anyhow::Result<()> {
    let target = segments.target.train_val().context("join target train+val")?;
    let past = segments
        .past
        .as_ref()
        .map(SplitSet::train_val)
        .transpose()
        .context("join past covariates train+val")?;
    let future = segments
        .future
        .train_val()
        .context("join future covariates train+val")?;
    model.fit(&target, past.as_ref(), Some(&future))
}

/// Observed values at the forecast's timestamps.
fn actual_at(series: &TimeSeries, forecast: &TimeSeries) -> anyhow::Result<TimeSeries> {
    let values = series.values();
    let picked = forecast
        .index()
        .iter()
        .map(|ts| {
            series
                .position_of(*ts)
                .map(|i| values[i])
                .with_context(|| format!("no observed value at {ts}"))
        })
        .collect::<anyhow::Result<Vec<f64>>>()?;
    TimeSeries::univariate(
        series.columns().first().map(String::as_str).unwrap_or("actual"),
        forecast.index().to_vec(),
        picked,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_labels() {
        assert_eq!(Stage::BuildModel.to_string(), "BUILD_MODEL");
        assert_eq!(
            serde_json::to_value(Stage::BuildModel).unwrap(),
            serde_json::json!("BUILD_MODEL")
        );
    }

    #[test]
    fn failure_message_names_the_stage() {
        let f: Result<(), _> = Err::<(), _>(anyhow::anyhow!("boom")).at(Stage::Fit);
        let msg = f.unwrap_err().to_string();
        assert!(msg.starts_with("FIT failed"));
        assert!(msg.contains("boom"));
    }
}
