use std::path::{Path, PathBuf};

use anyhow::Context as _;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::experiment::{run_experiment, ExperimentSpec, Stage};
use crate::metrics::ForecastMetrics;
use crate::model::ModelBackend;
use crate::prepare::{load, preprocess};
use crate::run_context::{now_ms, RunContext};
use crate::schema::{FILE_BATCH_REPORT_JSON, SCHEMA_VERSION};

/// `<prefix>_no_weather`, `<prefix>_full_weather`, then one
/// `<prefix>_drop_<col>` per covariate with the rest kept in order.
pub fn build_matrix(prefix: &str, past_covariates: &[String]) -> Vec<ExperimentSpec> {
    let mut out = Vec::with_capacity(2 + past_covariates.len());
    out.push(ExperimentSpec {
        name: format!("{prefix}_no_weather"),
        past_covariates: Vec::new(),
    });
    out.push(ExperimentSpec {
        name: format!("{prefix}_full_weather"),
        past_covariates: past_covariates.to_vec(),
    });
    for col in past_covariates {
        let rest = past_covariates.iter().filter(|c| *c != col).cloned().collect();
        out.push(ExperimentSpec {
            name: format!("{prefix}_drop_{col}"),
            past_covariates: rest,
        });
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentStatus {
    Ok,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExperimentRecord {
    pub name: String,
    pub past_covariates: Vec<String>,
    pub status: ExperimentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<ForecastMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rolling_metrics: Option<ForecastMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_params: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub predictions_path: Option<PathBuf>,
}

impl ExperimentRecord {
    fn unfinished(spec: &ExperimentSpec, status: ExperimentStatus) -> Self {
        Self {
            name: spec.name.clone(),
            past_covariates: spec.past_covariates.clone(),
            status,
            stage: None,
            error: None,
            metrics: None,
            rolling_metrics: None,
            best_params: None,
            predictions_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub schema_version: String,
    pub run_id: String,
    pub started_ts_unix_ms: u64,
    pub finished_ts_unix_ms: u64,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub experiments: Vec<ExperimentRecord>,
}

impl BatchReport {
    pub fn all_ok(&self) -> bool {
        self.failed == 0 && self.skipped == 0
    }

    pub fn write_to_dir(&self, dir: &Path) -> anyhow::Result<()> {
        let out_path = dir.join(FILE_BATCH_REPORT_JSON);
        let json = serde_json::to_vec_pretty(self).context("serialize batch_report.json")?;
        std::fs::write(&out_path, json).with_context(|| format!("write {}", out_path.display()))?;
        Ok(())
    }
}

/// Loads the input once and runs every configuration in order. Without
/// `fail_fast` a failed configuration is recorded and the next one runs;
/// with it the remaining ones are marked skipped.
pub fn run_ablation(ctx: &RunContext, backend: &dyn ModelBackend) -> anyhow::Result<BatchReport> {
    let cfg = &ctx.config;
    let raw = load(&cfg.raw_csv).context("load raw csv")?;
    let table = preprocess(&raw).context("preprocess raw csv")?;
    drop(raw);

    let matrix = build_matrix(&cfg.experiment_prefix, &cfg.past_covariates);
    info!(
        run_id = %ctx.run_id,
        experiments = matrix.len(),
        fail_fast = cfg.fail_fast,
        "ablation started"
    );

    let mut records = Vec::with_capacity(matrix.len());
    let mut halted = false;
    for spec in &matrix {
        if halted {
            records.push(ExperimentRecord::unfinished(spec, ExperimentStatus::Skipped));
            continue;
        }

        match run_experiment(ctx, &table, spec, backend) {
            Ok(outcome) => records.push(ExperimentRecord {
                metrics: Some(outcome.metrics),
                rolling_metrics: outcome.rolling,
                best_params: outcome.best_params,
                predictions_path: Some(outcome.predictions_path),
                ..ExperimentRecord::unfinished(spec, ExperimentStatus::Ok)
            }),
            Err(failure) => {
                error!(
                    experiment = %spec.name,
                    stage = %failure.stage,
                    error = %format!("{:#}", failure.error),
                    "experiment failed"
                );
                records.push(ExperimentRecord {
                    stage: Some(failure.stage),
                    error: Some(format!("{:#}", failure.error)),
                    ..ExperimentRecord::unfinished(spec, ExperimentStatus::Failed)
                });
                if cfg.fail_fast {
                    warn!(experiment = %spec.name, "fail-fast: skipping remaining experiments");
                    halted = true;
                }
            }
        }
    }

    let count = |s: ExperimentStatus| records.iter().filter(|r| r.status == s).count();
    let report = BatchReport {
        schema_version: SCHEMA_VERSION.to_string(),
        run_id: ctx.run_id.clone(),
        started_ts_unix_ms: ctx.start_ts_ms,
        finished_ts_unix_ms: now_ms(),
        total: records.len(),
        succeeded: count(ExperimentStatus::Ok),
        failed: count(ExperimentStatus::Failed),
        skipped: count(ExperimentStatus::Skipped),
        experiments: records,
    };
    report.write_to_dir(&ctx.results_dir)?;
    info!(
        total = report.total,
        succeeded = report.succeeded,
        failed = report.failed,
        skipped = report.skipped,
        "ablation finished"
    );
    Ok(report)
}
