use anyhow::Context as _;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::lagged::{LaggedForest, ModelParams};
use super::Forecaster;
use crate::metrics::mae;
use crate::series::TimeSeries;
use crate::split::split2;

#[derive(Debug, Clone, Serialize)]
pub struct ParamGrid {
    pub lags: usize,
    pub lags_past_covariates: Option<usize>,
    pub lags_future_covariates: Vec<i64>,
    pub output_chunk_length: usize,
    pub n_estimators: Vec<usize>,
    pub max_depth: Vec<Option<usize>>,
    /// Empty means 2.
    pub min_samples_split: Vec<usize>,
    /// Empty means 1.
    pub min_samples_leaf: Vec<usize>,
    pub random_state: u64,
}

impl ParamGrid {
    pub fn candidates(&self) -> Vec<ModelParams> {
        let or_default = |v: &[usize], d: usize| if v.is_empty() { vec![d] } else { v.to_vec() };
        let splits = or_default(&self.min_samples_split, 2);
        let leaves = or_default(&self.min_samples_leaf, 1);

        let mut out = Vec::new();
        for &n_estimators in &self.n_estimators {
            for &max_depth in &self.max_depth {
                for &min_samples_split in &splits {
                    for &min_samples_leaf in &leaves {
                        out.push(ModelParams {
                            lags: self.lags,
                            lags_past_covariates: self.lags_past_covariates,
                            lags_future_covariates: self.lags_future_covariates.clone(),
                            output_chunk_length: self.output_chunk_length,
                            n_estimators,
                            max_depth,
                            min_samples_split,
                            min_samples_leaf,
                            random_state: self.random_state,
                        });
                    }
                }
            }
        }
        out
    }
}

#[derive(Debug, Clone)]
pub struct SearchOptions {
    // 0 means the `fallback_split` cut.
    pub start: usize,
    pub horizon: usize,
    pub fallback_split: f64,
    // -1 or 0 means every core.
    pub n_jobs: i32,
    pub verbose: bool,
}

#[derive(Debug, Clone)]
pub struct GridSearchResult {
    pub best: ModelParams,
    pub best_score: f64,
    pub evaluated: usize,
}

/// Lowest MAE wins; ties go to the earlier candidate.
pub fn search(
    grid: &ParamGrid,
    train: &TimeSeries,
    val: &TimeSeries,
    past: Option<&TimeSeries>,
    future: Option<&TimeSeries>,
    opts: &SearchOptions,
) -> anyhow::Result<GridSearchResult> {
    let candidates = grid.candidates();
    if candidates.is_empty() {
        anyhow::bail!("grid search has no candidates");
    }

    let backtest_start = if val.is_empty() {
        let start = if opts.start > 0 {
            opts.start
        } else {
            split2(train, opts.fallback_split)?.0.len()
        };
        if start >= train.len() {
            anyhow::bail!(
                "grid search backtest start {start} leaves no points in a train series of length {}",
                train.len()
            );
        }
        Some(start)
    } else {
        None
    };

    let threads = if opts.n_jobs > 0 { opts.n_jobs as usize } else { 0 };
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .context("build grid search thread pool")?;

    let mode = if backtest_start.is_some() {
        "backtest"
    } else {
        "validation"
    };
    info!(
        candidates = candidates.len(),
        threads = pool.current_num_threads(),
        mode,
        "grid search started"
    );

    let scores: Vec<Option<f64>> = pool.install(|| {
        candidates
            .par_iter()
            .enumerate()
            .map(|(i, params)| {
                let scored = match backtest_start {
                    None => score_on_validation(params, train, val, past, future),
                    Some(start) => score_by_backtest(params, train, past, future, start, opts.horizon),
                };
                match scored {
                    Ok(score) => {
                        if opts.verbose {
                            info!(candidate = i, ?params, mae = score, "grid candidate scored");
                        } else {
                            debug!(candidate = i, mae = score, "grid candidate scored");
                        }
                        Some(score)
                    }
                    Err(e) => {
                        warn!(candidate = i, error = %format!("{e:#}"), "grid candidate failed");
                        None
                    }
                }
            })
            .collect()
    });

    let mut best: Option<(usize, f64)> = None;
    for (i, score) in scores.iter().enumerate() {
        let Some(score) = *score else { continue };
        if !score.is_finite() {
            continue;
        }
        if best.map_or(true, |(_, b)| score < b) {
            best = Some((i, score));
        }
    }
    let evaluated = scores.iter().filter(|s| s.is_some()).count();
    let Some((idx, best_score)) = best else {
        anyhow::bail!("grid search produced no valid candidate");
    };

    let best = candidates[idx].clone();
    info!(best_score, evaluated, params = ?best, "grid search finished");
    Ok(GridSearchResult {
        best,
        best_score,
        evaluated,
    })
}

fn score_on_validation(
    params: &ModelParams,
    train: &TimeSeries,
    val: &TimeSeries,
    past: Option<&TimeSeries>,
    future: Option<&TimeSeries>,
) -> anyhow::Result<f64> {
    let mut model = LaggedForest::new(params.clone());
    model.fit(train, past, future)?;
    let pred = model.predict(val.len(), past, future)?;
    mae(val, &pred)
}

fn score_by_backtest(
    params: &ModelParams,
    train: &TimeSeries,
    past: Option<&TimeSeries>,
    future: Option<&TimeSeries>,
    start: usize,
    horizon: usize,
) -> anyhow::Result<f64> {
    let horizon = horizon.max(1);
    let mut abs_sum = 0.0;
    let mut count = 0usize;
    let mut p = start;
    while p < train.len() {
        let k = horizon.min(train.len() - p);
        let history = train.slice(0..p);
        let actual = train.slice(p..p + k);

        let mut model = LaggedForest::new(params.clone());
        model.fit(&history, past, future)?;
        let pred = model.predict(k, past, future)?;
        abs_sum += mae(&actual, &pred)? * k as f64;
        count += k;
        p += horizon;
    }
    if count == 0 {
        anyhow::bail!("backtest produced no forecasts");
    }
    Ok(abs_sum / count as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate, NaiveDateTime};

    fn index(n: usize) -> Vec<NaiveDateTime> {
        let base = NaiveDate::from_ymd_opt(2024, 4, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .unwrap();
        (0..n).map(|i| base + Duration::hours(i as i64)).collect()
    }

    fn grid() -> ParamGrid {
        ParamGrid {
            lags: 4,
            lags_past_covariates: None,
            lags_future_covariates: vec![0],
            output_chunk_length: 1,
            n_estimators: vec![3, 5],
            max_depth: vec![Some(1), Some(6)],
            min_samples_split: Vec::new(),
            min_samples_leaf: Vec::new(),
            random_state: 42,
        }
    }

    fn opts() -> SearchOptions {
        SearchOptions {
            start: 0,
            horizon: 3,
            fallback_split: 0.7,
            n_jobs: 2,
            verbose: false,
        }
    }

    fn series(n: usize) -> TimeSeries {
        let values = (0..n).map(|i| ((i % 6) * 10) as f64).collect();
        TimeSeries::univariate("in", index(n), values).unwrap()
    }

    #[test]
    fn empty_candidate_lists_use_backend_defaults() {
        let c = grid().candidates();
        assert_eq!(c.len(), 4);
        assert!(c.iter().all(|p| p.min_samples_split == 2 && p.min_samples_leaf == 1));
        assert_eq!(c[0].n_estimators, 3);
        assert_eq!(c[0].max_depth, Some(1));
        assert_eq!(c[1].max_depth, Some(6));
    }

    #[test]
    fn deeper_trees_win_on_a_nonlinear_pattern() -> anyhow::Result<()> {
        let s = series(90);
        let (train, val) = (s.slice(0..70), s.slice(70..90));
        let res = search(&grid(), &train, &val, None, None, &opts())?;
        assert_eq!(res.evaluated, 4);
        assert_eq!(res.best.max_depth, Some(6));
        Ok(())
    }

    #[test]
    fn search_is_deterministic() -> anyhow::Result<()> {
        let s = series(60);
        let (train, val) = (s.slice(0..45), s.slice(45..60));
        let a = search(&grid(), &train, &val, None, None, &opts())?;
        let b = search(&grid(), &train, &val, None, None, &opts())?;
        assert_eq!(a.best, b.best);
        assert_eq!(a.best_score, b.best_score);
        Ok(())
    }

    #[test]
    fn empty_validation_falls_back_to_backtest() -> anyhow::Result<()> {
        let s = series(40);
        let empty = s.slice(40..40);
        let res = search(&grid(), &s, &empty, None, None, &opts())?;
        assert_eq!(res.evaluated, 4);
        Ok(())
    }

    #[test]
    fn all_candidates_failing_is_an_error() {
        let s = series(30);
        let mut g = grid();
        g.lags_past_covariates = Some(2);
        let err = search(&g, &s.slice(0..20), &s.slice(20..30), None, None, &opts()).unwrap_err();
        assert!(err.to_string().contains("no valid candidate"));
    }
}
