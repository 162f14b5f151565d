use anyhow::Context as _;
use chrono::NaiveDateTime;
use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::forest::{RandomForest, TreeParams};
use super::Forecaster;
use crate::series::TimeSeries;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelParams {
    pub lags: usize,
    pub lags_past_covariates: Option<usize>,
    pub lags_future_covariates: Vec<i64>,
    pub output_chunk_length: usize,
    pub n_estimators: usize,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub random_state: u64,
}

#[derive(Debug, Clone)]
struct Layout {
    past_lags: usize,
    past_columns: Vec<String>,
    future_lags: Vec<i64>,
    future_columns: Vec<String>,
}

#[derive(Debug, Clone)]
struct Fitted {
    forest: RandomForest,
    layout: Layout,
    series: TimeSeries,
}

#[derive(Debug, Clone)]
pub struct LaggedForest {
    params: ModelParams,
    fitted: Option<Fitted>,
}

impl LaggedForest {
    pub fn new(params: ModelParams) -> Self {
        Self {
            params,
            fitted: None,
        }
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }

    fn tree_params(&self) -> TreeParams {
        TreeParams {
            max_depth: self.params.max_depth,
            min_samples_split: self.params.min_samples_split,
            min_samples_leaf: self.params.min_samples_leaf,
        }
    }

    fn layout_for(
        &self,
        past: Option<&TimeSeries>,
        future: Option<&TimeSeries>,
    ) -> anyhow::Result<Layout> {
        let past = past.filter(|p| p.width() > 0);
        let future = future.filter(|f| f.width() > 0);

        let (past_lags, past_columns) = match (self.params.lags_past_covariates, past) {
            (Some(l), Some(p)) => (l, p.columns().to_vec()),
            (Some(l), None) => anyhow::bail!(
                "model was built with lags_past_covariates={l} but no past covariates were supplied"
            ),
            (None, Some(p)) => anyhow::bail!(
                "past covariates {:?} supplied but lags_past_covariates is unset",
                p.columns()
            ),
            (None, None) => (0, Vec::new()),
        };

        let (future_lags, future_columns) = match future {
            Some(f) if self.params.lags_future_covariates.is_empty() => anyhow::bail!(
                "future covariates {:?} supplied but lags_future_covariates is empty",
                f.columns()
            ),
            Some(f) => (
                self.params.lags_future_covariates.clone(),
                f.columns().to_vec(),
            ),
            None => (Vec::new(), Vec::new()),
        };

        Ok(Layout {
            past_lags,
            past_columns,
            future_lags,
            future_columns,
        })
    }

    // Target lags from `history`, past lags strictly before `t0`, future
    // values at `t0` shifted by each lag. Covariates are looked up by
    // timestamp. `None` when a lag falls outside the data.
    fn features(
        &self,
        layout: &Layout,
        history: &[f64],
        t0: NaiveDateTime,
        past: Option<&TimeSeries>,
        future: Option<&TimeSeries>,
    ) -> Option<Vec<f64>> {
        let lags = self.params.lags;
        let p = history.len();
        if p < lags {
            return None;
        }
        let mut out = Vec::with_capacity(
            lags + layout.past_lags * layout.past_columns.len()
                + layout.future_lags.len() * layout.future_columns.len(),
        );
        out.extend((1..=lags).map(|j| history[p - j]));

        if layout.past_lags > 0 {
            let past = past?;
            let k = past.index().partition_point(|t| *t < t0);
            if k < layout.past_lags {
                return None;
            }
            for c in 0..past.width() {
                let col = past.column(c);
                out.extend((1..=layout.past_lags).map(|j| col[k - j]));
            }
        }

        if !layout.future_lags.is_empty() {
            let future = future?;
            let k = future.position_of(t0)? as i64;
            for c in 0..future.width() {
                let col = future.column(c);
                for &l in &layout.future_lags {
                    let i = k + l;
                    if i < 0 || i as usize >= col.len() {
                        return None;
                    }
                    out.push(col[i as usize]);
                }
            }
        }

        Some(out)
    }

    fn check_columns(
        layout: &Layout,
        past: Option<&TimeSeries>,
        future: Option<&TimeSeries>,
    ) -> anyhow::Result<()> {
        let past_cols = past.map(TimeSeries::columns).unwrap_or(&[]);
        if past_cols != layout.past_columns.as_slice() {
            anyhow::bail!(
                "past covariates {:?} differ from the fitted ones {:?}",
                past_cols,
                layout.past_columns
            );
        }
        let future_cols = future.map(TimeSeries::columns).unwrap_or(&[]);
        if future_cols != layout.future_columns.as_slice() {
            anyhow::bail!(
                "future covariates {:?} differ from the fitted ones {:?}",
                future_cols,
                layout.future_columns
            );
        }
        Ok(())
    }
}

impl Forecaster for LaggedForest {
    fn name(&self) -> &'static str {
        "lagged_random_forest"
    }

    fn params(&self) -> serde_json::Value {
        serde_json::to_value(&self.params).unwrap_or(serde_json::Value::Null)
    }

    fn fit(
        &mut self,
        series: &TimeSeries,
        past: Option<&TimeSeries>,
        future: Option<&TimeSeries>,
    ) -> anyhow::Result<()> {
        if series.width() != 1 {
            anyhow::bail!("target series must be univariate, got {:?}", series.columns());
        }
        let layout = self.layout_for(past, future)?;
        let past = past.filter(|p| p.width() > 0);
        let future = future.filter(|f| f.width() > 0);

        let h = self.params.output_chunk_length;
        if h == 0 {
            anyhow::bail!("output_chunk_length must be > 0");
        }
        let values = series.values();
        let mut x_flat = Vec::new();
        let mut y_flat = Vec::new();
        let mut n_rows = 0usize;
        let mut n_features = 0usize;
        for p in 0..values.len().saturating_sub(h - 1) {
            let t0 = series.index()[p];
            if let Some(f) = self.features(&layout, &values[..p], t0, past, future) {
                n_features = f.len();
                x_flat.extend(f);
                y_flat.extend_from_slice(&values[p..p + h]);
                n_rows += 1;
            }
        }
        if n_rows == 0 {
            anyhow::bail!(
                "series of length {} is too short for lags={} output_chunk_length={} with the supplied covariates",
                values.len(),
                self.params.lags,
                h
            );
        }
        let x = Array2::from_shape_vec((n_rows, n_features), x_flat).context("shape feature matrix")?;
        let y = Array2::from_shape_vec((n_rows, h), y_flat).context("shape target matrix")?;

        let forest = RandomForest::fit(
            x.view(),
            y.view(),
            self.params.n_estimators,
            self.tree_params(),
            self.params.random_state,
        )
        .context("fit random forest")?;
        debug!(
            samples = n_rows,
            features = n_features,
            trees = forest.n_trees(),
            depth = forest.max_depth(),
            "fitted lagged forest"
        );

        self.fitted = Some(Fitted {
            forest,
            layout,
            series: series.clone(),
        });
        Ok(())
    }

    fn predict(
        &self,
        n: usize,
        past: Option<&TimeSeries>,
        future: Option<&TimeSeries>,
    ) -> anyhow::Result<TimeSeries> {
        let fitted = self.fitted.as_ref().context("model is not fitted")?;
        self.predict_after(&fitted.series, n, past, future)
    }

    fn predict_after(
        &self,
        history: &TimeSeries,
        n: usize,
        past: Option<&TimeSeries>,
        future: Option<&TimeSeries>,
    ) -> anyhow::Result<TimeSeries> {
        let fitted = self.fitted.as_ref().context("model is not fitted")?;
        let past = past.filter(|p| p.width() > 0);
        let future_features = future.filter(|f| f.width() > 0);
        Self::check_columns(&fitted.layout, past, future_features)?;

        let index = super::forecast_index(history, n, past, future)?;
        let mut working = history.values().to_vec();
        let mut out = Vec::with_capacity(n);
        while out.len() < n {
            let t0 = index[out.len()];
            let f = self
                .features(&fitted.layout, &working, t0, past, future_features)
                .with_context(|| format!("not enough history or covariates to forecast {t0}"))?;
            let chunk = fitted.forest.predict(ArrayView1::from(&f));
            let take = chunk.len().min(n - out.len());
            working.extend(chunk.iter().take(take));
            out.extend(chunk.iter().take(take));
        }

        let name = history
            .columns()
            .first()
            .map(String::as_str)
            .unwrap_or("prediction");
        TimeSeries::univariate(name, index, out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};

    fn index(n: usize) -> Vec<NaiveDateTime> {
        let base = NaiveDate::from_ymd_opt(2024, 5, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .unwrap();
        (0..n).map(|i| base + Duration::hours(i as i64)).collect()
    }

    fn params() -> ModelParams {
        ModelParams {
            lags: 3,
            lags_past_covariates: None,
            lags_future_covariates: vec![0],
            output_chunk_length: 1,
            n_estimators: 10,
            max_depth: Some(6),
            min_samples_split: 2,
            min_samples_leaf: 1,
            random_state: 42,
        }
    }

    fn periodic(n: usize) -> TimeSeries {
        let values = (0..n).map(|i| [10.0, 20.0, 30.0, 40.0][i % 4]).collect();
        TimeSeries::univariate("in", index(n), values).unwrap()
    }

    #[test]
    fn learns_a_periodic_pattern() -> anyhow::Result<()> {
        let series = periodic(80);
        let mut model = LaggedForest::new(params());
        model.fit(&series.slice(0..60), None, None)?;
        let pred = model.predict(8, None, None)?;
        assert_eq!(pred.index(), &series.index()[60..68]);
        for (p, a) in pred.values().iter().zip(&series.values()[60..68]) {
            assert!((p - a).abs() < 1.0, "pred {p} actual {a}");
        }
        Ok(())
    }

    #[test]
    fn past_lags_without_past_series_is_rejected() {
        let mut model = LaggedForest::new(ModelParams {
            lags_past_covariates: Some(2),
            ..params()
        });
        let err = model.fit(&periodic(30), None, None).unwrap_err();
        assert!(err.to_string().contains("lags_past_covariates"));
    }

    #[test]
    fn past_series_without_past_lags_is_rejected() -> anyhow::Result<()> {
        let series = periodic(30);
        let past = TimeSeries::univariate("temp", series.index().to_vec(), vec![1.0; 30])?;
        let mut model = LaggedForest::new(params());
        assert!(model.fit(&series, Some(&past), None).is_err());
        Ok(())
    }

    #[test]
    fn empty_future_series_means_no_future_covariates() -> anyhow::Result<()> {
        let series = periodic(30);
        let future = TimeSeries::new(series.index().to_vec(), Vec::new(), Vec::new())?;
        let mut model = LaggedForest::new(params());
        model.fit(&series.slice(0..25), None, Some(&future.slice(0..25)))?;
        let pred = model.predict(5, None, Some(&future.slice(25..30)))?;
        assert_eq!(pred.index(), &series.index()[25..30]);
        Ok(())
    }

    #[test]
    fn multi_step_chunks_cover_longer_horizons() -> anyhow::Result<()> {
        let series = periodic(60);
        let mut model = LaggedForest::new(ModelParams {
            output_chunk_length: 3,
            ..params()
        });
        model.fit(&series, None, None)?;
        assert_eq!(model.predict(7, None, None)?.len(), 7);
        Ok(())
    }

    #[test]
    fn too_short_series_is_a_model_error() {
        let mut model = LaggedForest::new(params());
        assert!(model.fit(&periodic(3), None, None).is_err());
    }

    #[test]
    fn predict_before_fit_fails() {
        let model = LaggedForest::new(params());
        assert!(!model.is_fitted());
        assert!(model.predict(1, None, None).is_err());
    }
}
