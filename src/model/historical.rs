use anyhow::Context as _;
use tracing::debug;

use super::Forecaster;
use crate::series::TimeSeries;

#[derive(Debug, Clone, Copy)]
pub struct HistoricalOptions {
    pub start_fraction: f64,
    pub forecast_horizon: usize,
    pub stride: usize,
    pub retrain: bool,
}

/// Keeps the last point of each forecast made from `series[..p]`, starting
/// at `p = floor((len - 1) * start_fraction)`.
pub fn historical_forecasts(
    model: &mut dyn Forecaster,
    series: &TimeSeries,
    past: Option<&TimeSeries>,
    future: Option<&TimeSeries>,
    opts: &HistoricalOptions,
) -> anyhow::Result<TimeSeries> {
    if !(0.0..=1.0).contains(&opts.start_fraction) {
        anyhow::bail!(
            "start_fraction must be in [0,1], got {}",
            opts.start_fraction
        );
    }
    let h = opts.forecast_horizon;
    if h == 0 || opts.stride == 0 {
        anyhow::bail!("forecast_horizon and stride must be > 0");
    }
    let n = series.len();
    let start = (((n.saturating_sub(1)) as f64) * opts.start_fraction).floor() as usize;
    let start = start.max(1);
    if start + h > n {
        anyhow::bail!(
            "series of length {n} leaves no room for a {h}-step forecast from point {start}"
        );
    }

    let mut index = Vec::new();
    let mut values = Vec::new();
    let mut p = start;
    while p + h <= n {
        let history = series.slice(0..p);
        if opts.retrain {
            model
                .fit(&history, past, future)
                .with_context(|| format!("refit at point {p}"))?;
        }
        let pred = model
            .predict_after(&history, h, past, future)
            .with_context(|| format!("forecast from point {p}"))?;
        let (Some(&ts), Some(&v)) = (pred.index().last(), pred.values().last()) else {
            anyhow::bail!("empty forecast from point {p}");
        };
        index.push(ts);
        values.push(v);
        p += opts.stride;
    }

    debug!(
        start,
        points = values.len(),
        retrain = opts.retrain,
        "historical forecasts done"
    );
    let name = series
        .columns()
        .first()
        .map(String::as_str)
        .unwrap_or("prediction");
    TimeSeries::univariate(name, index, values)
}
