use crate::series::TimeSeries;

/// Chronological train/validation/test segments of one series.
#[derive(Debug, Clone)]
pub struct SplitSet {
    pub train: TimeSeries,
    pub val: TimeSeries,
    pub test: TimeSeries,
}

impl SplitSet {
    /// Train immediately followed by validation.
    pub fn train_val(&self) -> anyhow::Result<TimeSeries> {
        self.train.concatenate(&self.val)
    }
}

/// Cut points are `floor(total * train_ratio)` and that plus
/// `floor(total * val_ratio)`. The test segment may come out empty.
pub fn split(
    series: &TimeSeries,
    train_ratio: f64,
    val_ratio: f64,
) -> anyhow::Result<SplitSet> {
    check_ratio("train_ratio", train_ratio)?;
    check_ratio("val_ratio", val_ratio)?;
    if train_ratio + val_ratio > 1.0 {
        anyhow::bail!("train_ratio + val_ratio must be <= 1, got {train_ratio} + {val_ratio}");
    }

    let total = series.len();
    let train_end = floor_count(total, train_ratio);
    let val_end = (train_end + floor_count(total, val_ratio)).min(total);

    Ok(SplitSet {
        train: series.slice(0..train_end),
        val: series.slice(train_end..val_end),
        test: series.slice(val_end..total),
    })
}

/// Two-way variant with the same floor-based cut.
pub fn split2(series: &TimeSeries, ratio: f64) -> anyhow::Result<(TimeSeries, TimeSeries)> {
    check_ratio("ratio", ratio)?;
    let total = series.len();
    let cut = floor_count(total, ratio);
    Ok((series.slice(0..cut), series.slice(cut..total)))
}

fn floor_count(total: usize, ratio: f64) -> usize {
    ((total as f64) * ratio).floor() as usize
}

fn check_ratio(name: &str, v: f64) -> anyhow::Result<()> {
    if !v.is_finite() || !(0.0..=1.0).contains(&v) {
        anyhow::bail!("{name} must be finite in [0,1], got {v}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};

    fn series(n: usize) -> TimeSeries {
        let base = NaiveDate::from_ymd_opt(2024, 3, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .unwrap();
        let index = (0..n).map(|i| base + Duration::hours(i as i64)).collect();
        TimeSeries::univariate("y", index, (0..n).map(|i| i as f64).collect()).unwrap()
    }

    #[test]
    fn hundred_rows_split_70_15_15() -> anyhow::Result<()> {
        let s = split(&series(100), 0.7, 0.15)?;
        assert_eq!(s.train.len(), 70);
        assert_eq!(s.val.len(), 15);
        assert_eq!(s.test.len(), 15);
        assert_eq!(s.val.values()[0], 70.0);
        assert_eq!(s.test.values()[0], 85.0);
        Ok(())
    }

    #[test]
    fn segments_partition_the_series_in_order() -> anyhow::Result<()> {
        for total in [0usize, 1, 2, 7, 33, 101, 250] {
            for (tr, va) in [(0.1, 0.1), (0.5, 0.25), (0.7, 0.15), (0.9, 0.1), (0.33, 0.33)] {
                let src = series(total);
                let s = split(&src, tr, va)?;
                assert_eq!(s.train.len() + s.val.len() + s.test.len(), total);
                let joined = s.train_val()?.concatenate(&s.test)?;
                assert_eq!(joined, src);
            }
        }
        Ok(())
    }

    #[test]
    fn full_ratio_leaves_empty_test() -> anyhow::Result<()> {
        let s = split(&series(10), 0.5, 0.5)?;
        assert_eq!(s.train.len(), 5);
        assert_eq!(s.val.len(), 5);
        assert!(s.test.is_empty());
        Ok(())
    }

    #[test]
    fn ratios_over_one_are_rejected() {
        assert!(split(&series(10), 0.8, 0.3).is_err());
        assert!(split(&series(10), -0.1, 0.3).is_err());
    }

    #[test]
    fn two_way_split_floors_the_cut() -> anyhow::Result<()> {
        let (train, test) = split2(&series(9), 0.7)?;
        assert_eq!(train.len(), 6);
        assert_eq!(test.len(), 3);
        Ok(())
    }

    #[test]
    fn split_does_not_touch_input() -> anyhow::Result<()> {
        let src = series(20);
        let before = src.clone();
        let _ = split(&src, 0.6, 0.2)?;
        assert_eq!(src, before);
        Ok(())
    }
}
