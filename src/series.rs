use std::ops::Range;

use chrono::{Duration, NaiveDateTime};

#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeries {
    index: Vec<NaiveDateTime>,
    columns: Vec<String>,
    // values[c][t]
    values: Vec<Vec<f64>>,
}

impl TimeSeries {
    pub fn new(
        index: Vec<NaiveDateTime>,
        columns: Vec<String>,
        values: Vec<Vec<f64>>,
    ) -> anyhow::Result<Self> {
        if columns.len() != values.len() {
            anyhow::bail!(
                "series has {} column names but {} value columns",
                columns.len(),
                values.len()
            );
        }
        for (name, col) in columns.iter().zip(&values) {
            if col.len() != index.len() {
                anyhow::bail!(
                    "column {name} has {} values for {} timestamps",
                    col.len(),
                    index.len()
                );
            }
        }
        if let Some(pos) = index.windows(2).position(|w| w[1] <= w[0]) {
            anyhow::bail!(
                "series index must be strictly increasing (at {} -> {})",
                index[pos],
                index[pos + 1]
            );
        }
        Ok(Self {
            index,
            columns,
            values,
        })
    }

    pub fn univariate(
        name: &str,
        index: Vec<NaiveDateTime>,
        values: Vec<f64>,
    ) -> anyhow::Result<Self> {
        Self::new(index, vec![name.to_string()], vec![values])
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn index(&self) -> &[NaiveDateTime] {
        &self.index
    }

    pub fn column(&self, c: usize) -> &[f64] {
        &self.values[c]
    }

    pub fn first_timestamp(&self) -> Option<NaiveDateTime> {
        self.index.first().copied()
    }

    pub fn last_timestamp(&self) -> Option<NaiveDateTime> {
        self.index.last().copied()
    }

    pub fn values(&self) -> &[f64] {
        self.values.first().map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn position_of(&self, ts: NaiveDateTime) -> Option<usize> {
        self.index.binary_search(&ts).ok()
    }

    // timestamps <= ts
    pub fn count_through(&self, ts: NaiveDateTime) -> usize {
        self.index.partition_point(|t| *t <= ts)
    }

    pub fn slice(&self, range: Range<usize>) -> TimeSeries {
        let end = range.end.min(self.len());
        let range = range.start.min(end)..end;
        TimeSeries {
            index: self.index[range.clone()].to_vec(),
            columns: self.columns.clone(),
            values: self.values.iter().map(|c| c[range.clone()].to_vec()).collect(),
        }
    }

    // `next` must start strictly after `self` ends.
    pub fn concatenate(&self, next: &TimeSeries) -> anyhow::Result<TimeSeries> {
        if self.columns != next.columns {
            anyhow::bail!(
                "cannot concatenate series with columns {:?} and {:?}",
                self.columns,
                next.columns
            );
        }
        if let (Some(end), Some(start)) = (self.last_timestamp(), next.first_timestamp()) {
            if start <= end {
                anyhow::bail!("concatenated series overlap: {start} is not after {end}");
            }
        }

        let mut index = self.index.clone();
        index.extend_from_slice(&next.index);
        let values = self
            .values
            .iter()
            .zip(&next.values)
            .map(|(a, b)| {
                let mut c = a.clone();
                c.extend_from_slice(b);
                c
            })
            .collect();
        Ok(TimeSeries {
            index,
            columns: self.columns.clone(),
            values,
        })
    }

    pub fn last_step(&self) -> Option<Duration> {
        let n = self.index.len();
        (n >= 2).then(|| self.index[n - 1] - self.index[n - 2])
    }
}
