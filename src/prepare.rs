use std::path::Path;

use anyhow::Context as _;
use chrono::{NaiveDate, NaiveDateTime};
use tracing::{info, warn};

use crate::schema::{COL_DAY, COL_HOUR, COL_MONTH, COL_YEAR, MISSING_SENTINEL, TIME_KEY_COLUMNS};
use crate::series::TimeSeries;

#[derive(Debug, Clone)]
pub struct RawTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PreparedTable {
    pub index: Vec<NaiveDateTime>,
    pub columns: Vec<String>,
    // None is missing.
    pub values: Vec<Vec<Option<f64>>>,
    pub non_numeric: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct TimeSeriesSet {
    pub target: TimeSeries,
    // None when no past covariates were requested.
    pub past: Option<TimeSeries>,
    // zero columns means no future covariates
    pub future: TimeSeries,
}

pub fn load(path: &Path) -> anyhow::Result<RawTable> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("open {}", path.display()))?;

    let columns: Vec<String> = rdr
        .headers()
        .with_context(|| format!("read header {}", path.display()))?
        .iter()
        .map(str::to_string)
        .collect();
    if columns.iter().all(|c| c.is_empty()) {
        anyhow::bail!("{} has no header row", path.display());
    }

    let mut rows = Vec::new();
    for (i, record) in rdr.records().enumerate() {
        let record = record.with_context(|| format!("read {} row {}", path.display(), i + 1))?;
        rows.push(record.iter().map(str::to_string).collect());
    }

    info!(path = %path.display(), rows = rows.len(), columns = columns.len(), "loaded raw table");
    Ok(RawTable { columns, rows })
}

pub fn preprocess(raw: &RawTable) -> anyhow::Result<PreparedTable> {
    let key_idx = TIME_KEY_COLUMNS
        .iter()
        .map(|name| {
            raw.columns
                .iter()
                .position(|c| c == *name)
                .with_context(|| format!("missing time key column: {name}"))
        })
        .collect::<anyhow::Result<Vec<usize>>>()?;

    let mut keyed: Vec<(NaiveDateTime, usize)> = Vec::with_capacity(raw.rows.len());
    for (row_no, row) in raw.rows.iter().enumerate() {
        let ts = synthesize_timestamp(row, &key_idx)
            .with_context(|| format!("row {}: cannot build timestamp", row_no + 1))?;
        keyed.push((ts, row_no));
    }
    keyed.sort_by_key(|(ts, _)| *ts);
    if let Some(w) = keyed.windows(2).find(|w| w[0].0 == w[1].0) {
        anyhow::bail!(
            "duplicate timestamp {} (rows {} and {})",
            w[0].0,
            w[0].1 + 1,
            w[1].1 + 1
        );
    }

    let mut columns = Vec::new();
    let mut values = Vec::new();
    let mut non_numeric = Vec::new();
    for (c, name) in raw.columns.iter().enumerate() {
        if key_idx.contains(&c) {
            continue;
        }
        let parsed: Option<Vec<Option<f64>>> = keyed
            .iter()
            .map(|&(_, r)| parse_cell(raw.rows[r].get(c).map(String::as_str).unwrap_or("")))
            .collect();
        match parsed {
            Some(col) => {
                columns.push(name.clone());
                values.push(col);
            }
            None => non_numeric.push(name.clone()),
        }
    }

    let table = PreparedTable {
        index: keyed.into_iter().map(|(ts, _)| ts).collect(),
        columns,
        values,
        non_numeric,
    }
    .impute();

    let unresolved = table.unresolved_columns();
    if !unresolved.is_empty() {
        warn!(columns = ?unresolved, "columns still missing after fill; unusable as series");
    }
    if !table.non_numeric.is_empty() {
        warn!(columns = ?table.non_numeric, "skipping non-numeric columns");
    }
    info!(
        rows = table.index.len(),
        columns = ?table.columns,
        "preprocessed table"
    );
    Ok(table)
}

impl PreparedTable {
    /// Forward-fill then backward-fill every column. Only a column with no
    /// observation at all keeps missing cells.
    pub fn impute(mut self) -> Self {
        for col in &mut self.values {
            let mut last = None;
            for cell in col.iter_mut() {
                if cell.is_some() {
                    last = *cell;
                } else {
                    *cell = last;
                }
            }
            let mut next = None;
            for cell in col.iter_mut().rev() {
                if cell.is_some() {
                    next = *cell;
                } else {
                    *cell = next;
                }
            }
        }
        self
    }

    pub fn unresolved_columns(&self) -> Vec<&str> {
        self.columns
            .iter()
            .zip(&self.values)
            .filter(|(_, col)| col.iter().any(Option::is_none))
            .map(|(name, _)| name.as_str())
            .collect()
    }

    fn column_idx(&self, name: &str) -> anyhow::Result<usize> {
        if self.non_numeric.iter().any(|c| c == name) {
            anyhow::bail!("column {name} is not numeric");
        }
        self.columns
            .iter()
            .position(|c| c == name)
            .with_context(|| format!("missing column: {name}"))
    }
}

pub fn build_series(
    table: &PreparedTable,
    target_col: &str,
    past_cols: &[String],
    future_cols: &[String],
) -> anyhow::Result<TimeSeriesSet> {
    let target_idx = table.column_idx(target_col)?;
    let keep: Vec<usize> = table.values[target_idx]
        .iter()
        .enumerate()
        .filter(|(_, v)| v.is_some())
        .map(|(i, _)| i)
        .collect();
    if keep.is_empty() {
        anyhow::bail!("target column {target_col} has no observations");
    }
    let index: Vec<NaiveDateTime> = keep.iter().map(|&i| table.index[i]).collect();

    let gather = |names: &[String]| -> anyhow::Result<TimeSeries> {
        let mut values = Vec::with_capacity(names.len());
        for name in names {
            let c = table.column_idx(name)?;
            let col = keep
                .iter()
                .map(|&i| table.values[c][i])
                .collect::<Option<Vec<f64>>>()
                .with_context(|| format!("unresolvable missing values in column {name}"))?;
            values.push(col);
        }
        TimeSeries::new(index.clone(), names.to_vec(), values)
    };

    let target = gather(&[target_col.to_string()])?;
    let past = if past_cols.is_empty() {
        None
    } else {
        Some(gather(past_cols)?)
    };
    let future = gather(future_cols)?;

    Ok(TimeSeriesSet {
        target,
        past,
        future,
    })
}

fn synthesize_timestamp(row: &[String], key_idx: &[usize]) -> anyhow::Result<NaiveDateTime> {
    let field = |pos: usize, name: &str| -> anyhow::Result<u32> {
        let raw = row.get(key_idx[pos]).map(String::as_str).unwrap_or("");
        parse_integral(raw).with_context(|| format!("invalid {name} value {raw:?}"))
    };
    let year = field(0, COL_YEAR)?;
    let month = field(1, COL_MONTH)?;
    let day = field(2, COL_DAY)?;
    let hour = field(3, COL_HOUR)?;

    let year = i32::try_from(year).context("year out of range")?;
    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|d| d.and_hms_opt(hour, 0, 0))
        .with_context(|| format!("no such time {year}-{month}-{day} {hour}:00"))
}

/// Accepts `7` and `7.0`, rejects fractions and negatives.
fn parse_integral(s: &str) -> Option<u32> {
    if let Ok(v) = s.parse::<u32>() {
        return Some(v);
    }
    let f = s.parse::<f64>().ok()?;
    if f.is_finite() && f >= 0.0 && f.fract() == 0.0 && f <= f64::from(u32::MAX) {
        Some(f as u32)
    } else {
        None
    }
}

/// `Some(None)` is a missing cell, outer `None` is text.
fn parse_cell(s: &str) -> Option<Option<f64>> {
    let s = s.trim();
    if s.is_empty() || s.eq_ignore_ascii_case("na") || s.eq_ignore_ascii_case("nan") {
        return Some(None);
    }
    let v = s.parse::<f64>().ok()?;
    if !v.is_finite() || v == MISSING_SENTINEL {
        Some(None)
    } else {
        Some(Some(v))
    }
}
