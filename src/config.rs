use std::path::{Path, PathBuf};

use anyhow::Context as _;
use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::schema::ROLLING_SUFFIX;

// Flags that set a RunConfig field other than raw_csv.
const RUN_PARAMETER_ARGS: [&str; 26] = [
    "series_column",
    "past_covariates",
    "future_covariates",
    "lags",
    "lags_past_covariates",
    "lags_future_covariates",
    "output_chunk_length",
    "train_test_split",
    "random_seed",
    "results_dir",
    "experiment_prefix",
    "default_n_estimators",
    "default_max_depth",
    "do_gridsearch",
    "param_n_estimators",
    "param_max_depth",
    "param_min_samples_split",
    "param_min_samples_leaf",
    "grid_start",
    "grid_horizon",
    "grid_n_jobs",
    "grid_verbose",
    "rolling_forecast",
    "forecast_horizon",
    "retrain_per_step",
    "fail_fast",
];

/// Command-line surface of the `ablation` binary.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "ablation",
    version,
    about = "Covariate ablation study for transit ridership forecasting"
)]
pub struct Args {
    /// Raw ridership CSV (required unless --config is given).
    #[arg(long, required_unless_present = "config")]
    pub raw_csv: Option<PathBuf>,

    /// Load run parameters from a TOML file (e.g. a previous run_config.toml).
    /// Only --raw-csv and the logging flags may be combined with it.
    #[arg(long, conflicts_with_all = RUN_PARAMETER_ARGS)]
    pub config: Option<PathBuf>,

    /// Target column.
    #[arg(long, default_value = "in")]
    pub series_column: String,

    #[arg(long, num_args = 0..)]
    pub past_covariates: Vec<String>,

    #[arg(long, num_args = 0..)]
    pub future_covariates: Vec<String>,

    #[arg(long, default_value_t = 24)]
    pub lags: usize,

    #[arg(long, default_value_t = 24)]
    pub lags_past_covariates: usize,

    #[arg(long, num_args = 0.., allow_negative_numbers = true, default_values_t = [0i64])]
    pub lags_future_covariates: Vec<i64>,

    /// Steps predicted by one model invocation.
    #[arg(long, default_value_t = 1)]
    pub output_chunk_length: usize,

    #[arg(long, default_value_t = 0.7)]
    pub train_test_split: f64,

    #[arg(long, default_value_t = 42)]
    pub random_seed: u64,

    #[arg(long, default_value = "results")]
    pub results_dir: PathBuf,

    /// Prefix of generated experiment names (`<prefix>_no_weather`, ...).
    #[arg(long, default_value = "out")]
    pub experiment_prefix: String,

    #[arg(long, default_value_t = 100)]
    pub default_n_estimators: usize,

    /// 0 means unlimited depth.
    #[arg(long, default_value_t = 15)]
    pub default_max_depth: usize,

    #[arg(long)]
    pub do_gridsearch: bool,

    #[arg(long, num_args = 0.., default_values_t = [50usize, 100, 200])]
    pub param_n_estimators: Vec<usize>,

    #[arg(long, num_args = 0.., default_values_t = [5usize, 10])]
    pub param_max_depth: Vec<usize>,

    /// Empty means the backend default (2).
    #[arg(long, num_args = 0..)]
    pub param_min_samples_split: Vec<usize>,

    /// Empty means the backend default (1).
    #[arg(long, num_args = 0..)]
    pub param_min_samples_leaf: Vec<usize>,

    /// First backtest point when grid search has no validation segment.
    /// 0 falls back to --train-test-split.
    #[arg(long, default_value_t = 32)]
    pub grid_start: usize,

    #[arg(long, default_value_t = 3)]
    pub grid_horizon: usize,

    /// Worker threads for grid search; -1 or 0 uses every core.
    #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
    pub grid_n_jobs: i32,

    #[arg(long)]
    pub grid_verbose: bool,

    #[arg(long, default_value = "INFO")]
    pub log_level: String,

    #[arg(long)]
    pub log_file: Option<PathBuf>,

    #[arg(long)]
    pub rolling_forecast: bool,

    #[arg(long, default_value_t = 1)]
    pub forecast_horizon: usize,

    #[arg(long)]
    pub retrain_per_step: bool,

    /// Stop the ablation matrix at the first failed experiment.
    #[arg(long)]
    pub fail_fast: bool,
}

impl Args {
    /// Resolve the run parameters, either from `--config` or from the flags.
    pub fn into_run_config(self) -> anyhow::Result<RunConfig> {
        let cfg = match &self.config {
            Some(path) => {
                let mut cfg = RunConfig::load(path)?;
                if let Some(raw_csv) = self.raw_csv {
                    cfg.raw_csv = raw_csv;
                }
                cfg
            }
            None => {
                let raw_csv = self
                    .raw_csv
                    .context("--raw-csv is required (or pass --config)")?;
                RunConfig {
                    raw_csv,
                    series_column: self.series_column,
                    past_covariates: self.past_covariates,
                    future_covariates: self.future_covariates,
                    lags: self.lags,
                    lags_past_covariates: self.lags_past_covariates,
                    lags_future_covariates: self.lags_future_covariates,
                    output_chunk_length: self.output_chunk_length,
                    train_test_split: self.train_test_split,
                    random_seed: self.random_seed,
                    results_dir: self.results_dir,
                    experiment_prefix: self.experiment_prefix,
                    default_n_estimators: self.default_n_estimators,
                    default_max_depth: self.default_max_depth,
                    do_gridsearch: self.do_gridsearch,
                    fail_fast: self.fail_fast,
                    grid: GridConfig {
                        n_estimators: self.param_n_estimators,
                        max_depth: self.param_max_depth,
                        min_samples_split: self.param_min_samples_split,
                        min_samples_leaf: self.param_min_samples_leaf,
                        start: self.grid_start,
                        horizon: self.grid_horizon,
                        n_jobs: self.grid_n_jobs,
                        verbose: self.grid_verbose,
                    },
                    rolling: RollingConfig {
                        enabled: self.rolling_forecast,
                        forecast_horizon: self.forecast_horizon,
                        retrain_per_step: self.retrain_per_step,
                    },
                }
            }
        };
        cfg.validate()?;
        Ok(cfg)
    }
}

/// Immutable parameters shared by every experiment of one run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunConfig {
    pub raw_csv: PathBuf,
    #[serde(default = "default_series_column")]
    pub series_column: String,
    #[serde(default)]
    pub past_covariates: Vec<String>,
    #[serde(default)]
    pub future_covariates: Vec<String>,
    #[serde(default = "default_lags")]
    pub lags: usize,
    #[serde(default = "default_lags")]
    pub lags_past_covariates: usize,
    #[serde(default = "default_lags_future_covariates")]
    pub lags_future_covariates: Vec<i64>,
    #[serde(default = "default_output_chunk_length")]
    pub output_chunk_length: usize,
    #[serde(default = "default_train_test_split")]
    pub train_test_split: f64,
    #[serde(default = "default_random_seed")]
    pub random_seed: u64,
    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,
    #[serde(default = "default_experiment_prefix")]
    pub experiment_prefix: String,
    #[serde(default = "default_n_estimators")]
    pub default_n_estimators: usize,
    /// 0 means unlimited depth.
    #[serde(default = "default_max_depth")]
    pub default_max_depth: usize,
    #[serde(default)]
    pub do_gridsearch: bool,
    #[serde(default)]
    pub fail_fast: bool,
    #[serde(default)]
    pub grid: GridConfig,
    #[serde(default)]
    pub rolling: RollingConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GridConfig {
    #[serde(default = "default_grid_n_estimators")]
    pub n_estimators: Vec<usize>,
    #[serde(default = "default_grid_max_depth")]
    pub max_depth: Vec<usize>,
    #[serde(default)]
    pub min_samples_split: Vec<usize>,
    #[serde(default)]
    pub min_samples_leaf: Vec<usize>,
    #[serde(default = "default_grid_start")]
    pub start: usize,
    #[serde(default = "default_grid_horizon")]
    pub horizon: usize,
    #[serde(default = "default_grid_n_jobs")]
    pub n_jobs: i32,
    #[serde(default)]
    pub verbose: bool,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            n_estimators: default_grid_n_estimators(),
            max_depth: default_grid_max_depth(),
            min_samples_split: Vec::new(),
            min_samples_leaf: Vec::new(),
            start: default_grid_start(),
            horizon: default_grid_horizon(),
            n_jobs: default_grid_n_jobs(),
            verbose: false,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RollingConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_forecast_horizon")]
    pub forecast_horizon: usize,
    #[serde(default)]
    pub retrain_per_step: bool,
}

impl Default for RollingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            forecast_horizon: default_forecast_horizon(),
            retrain_per_step: false,
        }
    }
}

fn default_series_column() -> String {
    "in".to_string()
}

fn default_lags() -> usize {
    24
}

fn default_lags_future_covariates() -> Vec<i64> {
    vec![0]
}

fn default_output_chunk_length() -> usize {
    1
}

fn default_train_test_split() -> f64 {
    0.7
}

fn default_random_seed() -> u64 {
    42
}

fn default_results_dir() -> PathBuf {
    PathBuf::from("results")
}

fn default_experiment_prefix() -> String {
    "out".to_string()
}

fn default_n_estimators() -> usize {
    100
}

fn default_max_depth() -> usize {
    15
}

fn default_grid_n_estimators() -> Vec<usize> {
    vec![50, 100, 200]
}

fn default_grid_max_depth() -> Vec<usize> {
    vec![5, 10]
}

fn default_grid_start() -> usize {
    32
}

fn default_grid_horizon() -> usize {
    3
}

fn default_grid_n_jobs() -> i32 {
    -1
}

fn default_forecast_horizon() -> usize {
    1
}

impl RunConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parse config {}", path.display()))
    }

    pub fn to_toml(&self) -> anyhow::Result<String> {
        toml::to_string_pretty(self).context("serialize run config")
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.raw_csv.as_os_str().is_empty() {
            anyhow::bail!("raw_csv must not be empty");
        }
        if self.series_column.trim().is_empty() {
            anyhow::bail!("series_column must not be empty");
        }
        check_file_stem("experiment_prefix", &self.experiment_prefix)?;
        for (i, c) in self.past_covariates.iter().enumerate() {
            check_file_stem("past_covariates", c)?;
            if self.past_covariates[..i].contains(c) {
                anyhow::bail!("past_covariates contains duplicate {c}");
            }
        }
        // `<exp>_rolling` predictions must not overwrite another experiment's file.
        for c in &self.past_covariates {
            let rolled = format!("{c}{ROLLING_SUFFIX}");
            if self.past_covariates.contains(&rolled) {
                anyhow::bail!("past_covariates {c} and {rolled} would write the same predictions file");
            }
        }
        if self.past_covariates.iter().any(|c| c == &self.series_column) {
            anyhow::bail!(
                "past_covariates must not contain the target column {}",
                self.series_column
            );
        }
        if self.lags == 0 {
            anyhow::bail!("invalid lags=0 (must be > 0)");
        }
        if self.lags_past_covariates == 0 {
            anyhow::bail!("invalid lags_past_covariates=0 (must be > 0)");
        }
        if self.output_chunk_length == 0 {
            anyhow::bail!("invalid output_chunk_length=0 (must be > 0)");
        }
        if !self.train_test_split.is_finite() || !(0.0..=1.0).contains(&self.train_test_split) {
            anyhow::bail!(
                "train_test_split must be finite in [0,1], got {}",
                self.train_test_split
            );
        }
        if self.default_n_estimators == 0 {
            anyhow::bail!("invalid default_n_estimators=0 (must be > 0)");
        }

        fn check_candidates(name: &str, values: &[usize], allow_empty: bool) -> anyhow::Result<()> {
            if values.is_empty() && !allow_empty {
                anyhow::bail!("{name} needs at least one candidate");
            }
            if values.iter().any(|&v| v == 0) {
                anyhow::bail!("{name} candidates must be > 0, got {values:?}");
            }
            Ok(())
        }

        if self.do_gridsearch {
            check_candidates("grid.n_estimators", &self.grid.n_estimators, false)?;
            check_candidates("grid.max_depth", &self.grid.max_depth, false)?;
            check_candidates("grid.min_samples_split", &self.grid.min_samples_split, true)?;
            check_candidates("grid.min_samples_leaf", &self.grid.min_samples_leaf, true)?;
            if self.grid.min_samples_split.iter().any(|&v| v < 2) {
                anyhow::bail!("grid.min_samples_split candidates must be >= 2");
            }
            if self.grid.horizon == 0 {
                anyhow::bail!("invalid grid.horizon=0 (must be > 0)");
            }
        }

        if !self.rolling.enabled {
            anyhow::bail!(
                "predict step requires rolling-forecast mode enabled (pass --rolling-forecast)"
            );
        }
        if self.rolling.forecast_horizon == 0 {
            anyhow::bail!("invalid rolling.forecast_horizon=0 (must be > 0)");
        }

        Ok(())
    }

    /// Depth limit for the default model, `None` when unlimited.
    pub fn default_depth_limit(&self) -> Option<usize> {
        depth_limit(self.default_max_depth)
    }
}

// Experiment names built from these values become file names.
fn check_file_stem(field: &str, name: &str) -> anyhow::Result<()> {
    if name.trim().is_empty() {
        anyhow::bail!("{field} entry must not be empty");
    }
    if name == "." || name == ".." {
        anyhow::bail!("{field} entry {name:?} is not a valid file name");
    }
    if name
        .chars()
        .any(|ch| matches!(ch, '/' | '\\' | ':') || ch.is_control())
    {
        anyhow::bail!("{field} entry {name:?} must not contain path separators or control characters");
    }
    Ok(())
}

pub fn depth_limit(v: usize) -> Option<usize> {
    (v > 0).then_some(v)
}
