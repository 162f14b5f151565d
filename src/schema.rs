use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context as _;
use serde::Serialize;

pub const SCHEMA_VERSION: &str = "ablation_v1";

pub const DIR_PREDICTIONS: &str = "predictions";
pub const DIR_METRICS: &str = "metrics";

pub const FILE_SUMMARY: &str = "summary.csv";
pub const FILE_ROLLING_SUMMARY: &str = "rolling_summary.csv";
pub const FILE_RUN_CONFIG: &str = "run_config.toml";
pub const FILE_RUN_META_JSON: &str = "run_meta.json";
pub const FILE_BATCH_REPORT_JSON: &str = "batch_report.json";
pub const FILE_SCHEMA_VERSION: &str = "schema_version.json";

/// Suffix appended to the experiment name for walk-forward prediction files.
pub const ROLLING_SUFFIX: &str = "_rolling";

/// Raw input uses this value for "no observation".
pub const MISSING_SENTINEL: f64 = -9999.0;

pub const COL_YEAR: &str = "year";
pub const COL_MONTH: &str = "month";
pub const COL_DAY: &str = "date";
pub const COL_HOUR: &str = "time";

pub const TIME_KEY_COLUMNS: [&str; 4] = [COL_YEAR, COL_MONTH, COL_DAY, COL_HOUR];

pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub const PREDICTIONS_HEADER: [&str; 3] = ["datetime", "prediction", "actual"];

pub const SUMMARY_COL_EXPERIMENT: &str = "experiment";
pub const SUMMARY_COL_MAE: &str = "MAE";
pub const SUMMARY_COL_MSE: &str = "MSE";
pub const SUMMARY_COL_BEST_PARAMS: &str = "best_params";

/// Chronological cut points used by every experiment run.
pub const TRAIN_RATIO: f64 = 0.70;
pub const VAL_RATIO: f64 = 0.15;

/// Fraction of the full series where walk-forward evaluation starts.
pub const ROLLING_START_FRACTION: f64 = 0.85;

#[derive(Debug, Serialize)]
struct SchemaVersionFile {
    schema_version: String,
    generated_at_unix_ms: u64,
    files: BTreeMap<String, String>,
}

pub fn write_schema_version_json(
    results_dir: &Path,
    generated_at_unix_ms: u64,
) -> anyhow::Result<()> {
    let mut files = BTreeMap::new();
    files.insert(format!("{DIR_METRICS}/{FILE_SUMMARY}"), "v1".to_string());
    files.insert(
        format!("{DIR_METRICS}/{FILE_ROLLING_SUMMARY}"),
        "v1".to_string(),
    );
    files.insert(format!("{DIR_PREDICTIONS}/*.csv"), "v1".to_string());
    files.insert(FILE_BATCH_REPORT_JSON.to_string(), "v1".to_string());

    let payload = SchemaVersionFile {
        schema_version: SCHEMA_VERSION.to_string(),
        generated_at_unix_ms,
        files,
    };

    let out_path = results_dir.join(FILE_SCHEMA_VERSION);
    let json = serde_json::to_vec_pretty(&payload).context("serialize schema_version.json")?;
    std::fs::write(&out_path, json).with_context(|| format!("write {}", out_path.display()))?;
    Ok(())
}
