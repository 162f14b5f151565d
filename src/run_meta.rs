use std::path::Path;

use anyhow::Context as _;
use serde::{Deserialize, Serialize};

use crate::run_context::RunContext;
use crate::schema::{FILE_RUN_META_JSON, SCHEMA_VERSION};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMeta {
    pub run_id: String,
    pub schema_version: String,
    pub crate_version: String,
    pub start_ts_unix_ms: u64,
    pub raw_csv: String,
    pub config_path: Option<String>,
    pub series_column: String,
    pub past_covariates: Vec<String>,
    pub future_covariates: Vec<String>,
}

impl RunMeta {
    pub fn from_context(ctx: &RunContext, config_path: Option<&Path>) -> Self {
        Self {
            run_id: ctx.run_id.clone(),
            schema_version: SCHEMA_VERSION.to_string(),
            crate_version: env!("CARGO_PKG_VERSION").to_string(),
            start_ts_unix_ms: ctx.start_ts_ms,
            raw_csv: ctx.config.raw_csv.display().to_string(),
            config_path: config_path.map(|p| p.display().to_string()),
            series_column: ctx.config.series_column.clone(),
            past_covariates: ctx.config.past_covariates.clone(),
            future_covariates: ctx.config.future_covariates.clone(),
        }
    }

    pub fn write_to_dir(&self, dir: &Path) -> anyhow::Result<()> {
        let out_path = dir.join(FILE_RUN_META_JSON);
        let json = serde_json::to_vec_pretty(self).context("serialize run_meta.json")?;
        std::fs::write(&out_path, json).with_context(|| format!("write {}", out_path.display()))?;
        Ok(())
    }
}
