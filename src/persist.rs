use std::path::Path;

use anyhow::Context as _;

use crate::metrics::{check_aligned, ForecastMetrics};
use crate::schema::{
    DATETIME_FORMAT, PREDICTIONS_HEADER, SUMMARY_COL_BEST_PARAMS, SUMMARY_COL_EXPERIMENT,
    SUMMARY_COL_MAE, SUMMARY_COL_MSE,
};
use crate::series::TimeSeries;

/// One row of `metrics/summary.csv` (or the rolling summary).
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryRow {
    pub experiment: String,
    pub metrics: ForecastMetrics,
    /// Serialized best hyperparameters, only when grid search ran.
    pub best_params: Option<String>,
}

impl SummaryRow {
    fn cells(&self) -> Vec<(&'static str, String)> {
        let mut out = vec![
            (SUMMARY_COL_EXPERIMENT, self.experiment.clone()),
            (SUMMARY_COL_MAE, fmt_f64(self.metrics.mae)),
            (SUMMARY_COL_MSE, fmt_f64(self.metrics.mse)),
        ];
        if let Some(p) = &self.best_params {
            out.push((SUMMARY_COL_BEST_PARAMS, p.clone()));
        }
        out
    }
}

/// A summary file as stored: header plus string rows of equal width.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SummaryTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl SummaryTable {
    pub fn get(&self, row: usize, column: &str) -> Option<&str> {
        let c = self.columns.iter().position(|h| h == column)?;
        self.rows.get(row)?.get(c).map(String::as_str)
    }

    fn column_or_insert(&mut self, name: &str) -> usize {
        if let Some(c) = self.columns.iter().position(|h| h == name) {
            return c;
        }
        self.columns.push(name.to_string());
        for r in &mut self.rows {
            r.push(String::new());
        }
        self.columns.len() - 1
    }
}

/// `datetime,prediction,actual` for every forecast step.
pub fn save_predictions(
    path: &Path,
    predicted: &TimeSeries,
    actual: &TimeSeries,
) -> anyhow::Result<()> {
    check_aligned(actual, predicted)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create {}", parent.display()))?;
    }

    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .with_context(|| format!("open {}", path.display()))?;
    wtr.write_record(PREDICTIONS_HEADER)
        .context("write predictions header")?;

    for ((ts, p), a) in predicted
        .index()
        .iter()
        .zip(predicted.values())
        .zip(actual.values())
    {
        wtr.write_record([
            ts.format(DATETIME_FORMAT).to_string(),
            fmt_f64(*p),
            fmt_f64(*a),
        ])
        .context("write predictions row")?;
    }

    wtr.flush()
        .with_context(|| format!("flush {}", path.display()))?;
    Ok(())
}

pub fn read_summary(path: &Path) -> anyhow::Result<SummaryTable> {
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("open {}", path.display()))?;
    let columns: Vec<String> = rdr
        .headers()
        .with_context(|| format!("read header {}", path.display()))?
        .iter()
        .map(str::to_string)
        .collect();

    let mut rows = Vec::new();
    for (i, record) in rdr.records().enumerate() {
        let record = record.with_context(|| format!("read {} row {}", path.display(), i + 1))?;
        let mut row: Vec<String> = record.iter().map(str::to_string).collect();
        row.resize(columns.len(), String::new());
        rows.push(row);
    }
    Ok(SummaryTable { columns, rows })
}

/// Read-modify-write append. Columns are the union of the existing header
/// and the new row's, in first-seen order; the file keeps one header.
pub fn append_metrics_summary(path: &Path, row: &SummaryRow) -> anyhow::Result<()> {
    let mut table = if path.exists() {
        read_summary(path)?
    } else {
        SummaryTable::default()
    };

    let cells = row.cells();
    let mut new_row = vec![String::new(); table.columns.len()];
    for (name, value) in cells {
        let c = table.column_or_insert(name);
        if c >= new_row.len() {
            new_row.resize(c + 1, String::new());
        }
        new_row[c] = value;
    }
    new_row.resize(table.columns.len(), String::new());
    table.rows.push(new_row);

    write_summary(path, &table)
}

fn write_summary(path: &Path, table: &SummaryTable) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create {}", parent.display()))?;
    }
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .with_context(|| format!("open {}", path.display()))?;
    wtr.write_record(&table.columns)
        .context("write summary header")?;
    for r in &table.rows {
        wtr.write_record(r).context("write summary row")?;
    }
    wtr.flush()
        .with_context(|| format!("flush {}", path.display()))?;
    Ok(())
}

fn fmt_f64(v: f64) -> String {
    if !v.is_finite() {
        return "NaN".to_string();
    }
    format!("{v:.6}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_dir(tag: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let dir = std::env::temp_dir().join(format!(
            "ablation_persist_{tag}_{}_{nanos}",
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn row(name: &str, mae: f64, best: Option<&str>) -> SummaryRow {
        SummaryRow {
            experiment: name.to_string(),
            metrics: ForecastMetrics { mae, mse: mae * mae },
            best_params: best.map(str::to_string),
        }
    }

    #[test]
    fn best_params_column_is_added_once_seen() -> anyhow::Result<()> {
        let path = temp_dir("union").join("summary.csv");
        append_metrics_summary(&path, &row("out_no_weather", 1.0, None))?;
        append_metrics_summary(&path, &row("out_full_weather", 2.0, Some("{\"lags\":24}")))?;
        append_metrics_summary(&path, &row("out_drop_temp", 3.0, None))?;

        let t = read_summary(&path)?;
        assert_eq!(t.columns, ["experiment", "MAE", "MSE", "best_params"]);
        assert_eq!(t.rows.len(), 3);
        assert_eq!(t.get(0, "best_params"), Some(""));
        assert_eq!(t.get(1, "best_params"), Some("{\"lags\":24}"));
        assert_eq!(t.get(2, "experiment"), Some("out_drop_temp"));

        let raw = std::fs::read_to_string(&path)?;
        assert_eq!(raw.matches("experiment,MAE,MSE").count(), 1);
        Ok(())
    }

    #[test]
    fn missing_parent_dir_is_created() -> anyhow::Result<()> {
        let path = temp_dir("nested").join("metrics").join("summary.csv");
        append_metrics_summary(&path, &row("a", 0.5, None))?;
        assert!(path.exists());
        Ok(())
    }
}
