use serde::Serialize;

use crate::series::TimeSeries;

/// Accuracy of one forecast against the observed values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ForecastMetrics {
    pub mae: f64,
    pub mse: f64,
}

/// MAE and MSE over aligned (actual, predicted) pairs. Both series must
/// cover exactly the same timestamps.
pub fn compute_metrics(actual: &TimeSeries, predicted: &TimeSeries) -> anyhow::Result<ForecastMetrics> {
    check_aligned(actual, predicted)?;
    if actual.is_empty() {
        anyhow::bail!("cannot score an empty forecast");
    }

    let n = actual.len() as f64;
    let (abs_sum, sq_sum) = actual
        .values()
        .iter()
        .zip(predicted.values())
        .fold((0.0f64, 0.0f64), |(a, s), (y, p)| {
            let e = y - p;
            (a + e.abs(), s + e * e)
        });

    Ok(ForecastMetrics {
        mae: abs_sum / n,
        mse: sq_sum / n,
    })
}

pub fn mae(actual: &TimeSeries, predicted: &TimeSeries) -> anyhow::Result<f64> {
    compute_metrics(actual, predicted).map(|m| m.mae)
}

pub fn check_aligned(actual: &TimeSeries, predicted: &TimeSeries) -> anyhow::Result<()> {
    if actual.len() != predicted.len() {
        anyhow::bail!(
            "forecast length {} does not match actual length {}",
            predicted.len(),
            actual.len()
        );
    }
    if let Some(i) = actual
        .index()
        .iter()
        .zip(predicted.index())
        .position(|(a, p)| a != p)
    {
        anyhow::bail!(
            "forecast timestamp {} does not match actual timestamp {} at position {i}",
            predicted.index()[i],
            actual.index()[i]
        );
    }
    Ok(())
}
