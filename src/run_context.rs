use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Context as _;
use chrono::{DateTime, Utc};

use crate::config::RunConfig;
use crate::schema::{DIR_METRICS, DIR_PREDICTIONS, FILE_ROLLING_SUMMARY, FILE_RUN_CONFIG, FILE_SUMMARY};

/// Everything one batch run shares: the validated config, its id and the
/// output locations. Built once in `main` and passed by reference.
#[derive(Clone, Debug)]
pub struct RunContext {
    pub config: RunConfig,
    pub run_id: String,
    pub results_dir: PathBuf,
    pub predictions_dir: PathBuf,
    pub metrics_dir: PathBuf,
    pub start_ts_ms: u64,
}

impl RunContext {
    pub fn summary_path(&self) -> PathBuf {
        self.metrics_dir.join(FILE_SUMMARY)
    }

    pub fn rolling_summary_path(&self) -> PathBuf {
        self.metrics_dir.join(FILE_ROLLING_SUMMARY)
    }

    pub fn predictions_path(&self, file_stem: &str) -> PathBuf {
        self.predictions_dir.join(format!("{file_stem}.csv"))
    }
}

/// Creates the results layout and snapshots the config into it.
pub fn create_run_context(config: RunConfig) -> anyhow::Result<RunContext> {
    let results_dir = config.results_dir.clone();
    let predictions_dir = results_dir.join(DIR_PREDICTIONS);
    let metrics_dir = results_dir.join(DIR_METRICS);
    for dir in [&results_dir, &predictions_dir, &metrics_dir] {
        std::fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    }

    let start_ts_ms = now_ms();
    let run_id = format_run_id(start_ts_ms, std::process::id());
    write_config_snapshot(&results_dir, &config)?;

    Ok(RunContext {
        config,
        run_id,
        results_dir,
        predictions_dir,
        metrics_dir,
        start_ts_ms,
    })
}

fn write_config_snapshot(results_dir: &Path, config: &RunConfig) -> anyhow::Result<()> {
    let path = results_dir.join(FILE_RUN_CONFIG);
    let body = config.to_toml()?;
    std::fs::write(&path, body).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn format_run_id(start_ts_ms: u64, pid: u32) -> String {
    let ts = DateTime::<Utc>::from_timestamp_millis(start_ts_ms as i64).unwrap_or_default();
    format!("run_{}_{pid}", ts.format("%Y%m%d_%H%M%S"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_id_format_is_stable() {
        // 2023-11-14 22:13:20 UTC
        assert_eq!(
            format_run_id(1_700_000_000_000, 1234),
            "run_20231114_221320_1234"
        );
    }
}
