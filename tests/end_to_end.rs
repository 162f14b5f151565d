mod common;

use std::path::Path;

use clap::Parser;
use ridership_ablation::ablation::{run_ablation, ExperimentStatus};
use ridership_ablation::config::Args;
use ridership_ablation::experiment::Stage;
use ridership_ablation::model::ForestBackend;
use ridership_ablation::persist::read_summary;
use ridership_ablation::run_context::{create_run_context, RunContext};
use ridership_ablation::run_meta::RunMeta;
use ridership_ablation::schema::{FILE_BATCH_REPORT_JSON, FILE_RUN_CONFIG, FILE_RUN_META_JSON};

fn context(dir: &Path, extra: &[&str]) -> anyhow::Result<RunContext> {
    let raw = common::write_ridership_csv(dir, 120);
    let results = dir.join("results");
    let mut argv = vec![
        "ablation".to_string(),
        "--raw-csv".to_string(),
        raw.display().to_string(),
        "--results-dir".to_string(),
        results.display().to_string(),
        "--lags".to_string(),
        "4".to_string(),
        "--lags-past-covariates".to_string(),
        "2".to_string(),
        "--default-n-estimators".to_string(),
        "5".to_string(),
        "--default-max-depth".to_string(),
        "6".to_string(),
        "--rolling-forecast".to_string(),
    ];
    argv.extend(extra.iter().map(|s| s.to_string()));
    let cfg = Args::try_parse_from(argv)?.into_run_config()?;
    create_run_context(cfg)
}

#[test]
fn full_matrix_writes_predictions_and_summaries() -> anyhow::Result<()> {
    let dir = common::tmp_dir("e2e_full");
    let ctx = context(
        &dir,
        &["--past-covariates", "weather", "temp", "--future-covariates", "holiday"],
    )?;
    let report = run_ablation(&ctx, &ForestBackend)?;
    assert!(report.all_ok(), "{report:?}");
    assert_eq!(report.total, 4);

    let summary = read_summary(&ctx.summary_path())?;
    assert_eq!(summary.columns, ["experiment", "MAE", "MSE"]);
    let names: Vec<&str> = (0..summary.rows.len())
        .filter_map(|i| summary.get(i, "experiment"))
        .collect();
    assert_eq!(
        names,
        ["out_no_weather", "out_full_weather", "out_drop_weather", "out_drop_temp"]
    );

    // 120 rows: test segment is the last 18.
    let preds = std::fs::read_to_string(ctx.predictions_path("out_full_weather"))?;
    let mut lines = preds.lines();
    assert_eq!(lines.next(), Some("datetime,prediction,actual"));
    assert_eq!(lines.clone().count(), 18);
    assert_eq!(lines.next().map(|l| &l[..19]), Some("2024-01-05 06:00:00"));

    let rolling = read_summary(&ctx.rolling_summary_path())?;
    assert_eq!(rolling.rows.len(), 4);
    assert!(ctx.predictions_path("out_no_weather_rolling").exists());
    assert!(ctx.results_dir.join(FILE_RUN_CONFIG).exists());
    assert!(ctx.results_dir.join(FILE_BATCH_REPORT_JSON).exists());
    assert_eq!(
        report.experiments[1].predictions_path.as_deref(),
        Some(ctx.predictions_path("out_full_weather").as_path())
    );
    assert!(report.experiments.iter().all(|e| e.best_params.is_none()));
    Ok(())
}

#[test]
fn one_bad_configuration_does_not_stop_the_rest() -> anyhow::Result<()> {
    let dir = common::tmp_dir("e2e_isolate");
    let ctx = context(&dir, &["--past-covariates", "weather", "bogus"])?;
    let report = run_ablation(&ctx, &ForestBackend)?;

    let status: Vec<ExperimentStatus> = report.experiments.iter().map(|e| e.status).collect();
    assert_eq!(
        status,
        [
            ExperimentStatus::Ok,
            ExperimentStatus::Failed,
            ExperimentStatus::Failed,
            ExperimentStatus::Ok
        ]
    );
    assert_eq!(report.experiments[1].stage, Some(Stage::Load));
    assert!(report.experiments[1]
        .error
        .as_deref()
        .is_some_and(|e| e.contains("bogus")));
    assert!(!report.all_ok());
    assert_eq!(read_summary(&ctx.summary_path())?.rows.len(), 2);
    Ok(())
}

#[test]
fn fail_fast_skips_the_remaining_configurations() -> anyhow::Result<()> {
    let dir = common::tmp_dir("e2e_failfast");
    let ctx = context(&dir, &["--past-covariates", "weather", "bogus", "--fail-fast"])?;
    let report = run_ablation(&ctx, &ForestBackend)?;
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(report.skipped, 2);
    Ok(())
}

#[test]
fn grid_search_records_best_params() -> anyhow::Result<()> {
    let dir = common::tmp_dir("e2e_grid");
    let ctx = context(
        &dir,
        &[
            "--do-gridsearch",
            "--param-n-estimators",
            "3",
            "--param-max-depth",
            "2",
            "5",
            "--grid-n-jobs",
            "1",
        ],
    )?;
    let report = run_ablation(&ctx, &ForestBackend)?;
    assert!(report.all_ok(), "{report:?}");

    let summary = read_summary(&ctx.summary_path())?;
    assert_eq!(summary.columns, ["experiment", "MAE", "MSE", "best_params"]);
    let params: serde_json::Value =
        serde_json::from_str(summary.get(0, "best_params").unwrap_or_default())?;
    assert_eq!(params["n_estimators"], 3);
    assert!(params["lags_past_covariates"].is_null());
    assert_eq!(report.experiments[0].best_params.as_ref(), Some(&params));
    Ok(())
}

#[test]
fn missing_rolling_flag_is_a_config_error() {
    let argv = ["ablation", "--raw-csv", "x.csv"];
    let err = Args::try_parse_from(argv)
        .map_err(anyhow::Error::from)
        .and_then(Args::into_run_config)
        .unwrap_err();
    assert!(err.to_string().contains("rolling-forecast"));
}

#[test]
fn run_meta_describes_the_run() -> anyhow::Result<()> {
    let dir = common::tmp_dir("e2e_meta");
    let ctx = context(&dir, &["--past-covariates", "weather"])?;
    RunMeta::from_context(&ctx, None).write_to_dir(&ctx.results_dir)?;

    let raw = std::fs::read_to_string(ctx.results_dir.join(FILE_RUN_META_JSON))?;
    let meta: RunMeta = serde_json::from_str(&raw)?;
    assert_eq!(meta.run_id, ctx.run_id);
    assert_eq!(meta.raw_csv, ctx.config.raw_csv.display().to_string());
    assert_eq!(meta.past_covariates, ["weather"]);
    assert_eq!(meta.config_path, None);
    assert_eq!(meta.crate_version, env!("CARGO_PKG_VERSION"));
    Ok(())
}
