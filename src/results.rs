//! Percentile summaries over a completed run's loadings.
//!
//! Percentiles use linear interpolation between order statistics (the
//! `PERCENTILE_CONT` definition): for `n` sorted values the rank of `p` is
//! `p / 100 * (n - 1)`.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::AggregateError;
use crate::run::{ResultValue, RunRecord};

/// Dimension to group loadings by before taking a percentile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grouping {
    Year,
    Well,
}

/// One requested percentile across all years of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultPercentile {
    pub percentile: f64,
    /// Indexed by year
    pub values: Vec<f64>,
}

/// Stateless; every call reads only the record it is given.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResultAggregator;

impl ResultAggregator {
    /// Percentile of every loading in the run.
    pub fn percentile(&self, record: &RunRecord, p: f64) -> Result<f64, AggregateError> {
        check_percentile(p)?;
        let values = stored_values(record)?;
        let mut loadings: Vec<f64> = values.iter().map(|v| v.loading).collect();
        Ok(interpolate(&mut loadings, p))
    }

    /// Percentile per year or per well, keyed by the group index.
    pub fn percentile_by(
        &self,
        record: &RunRecord,
        p: f64,
        grouping: Grouping,
    ) -> Result<BTreeMap<u32, f64>, AggregateError> {
        check_percentile(p)?;
        let values = stored_values(record)?;

        let mut groups: BTreeMap<u32, Vec<f64>> = BTreeMap::new();
        for value in values {
            let key = match grouping {
                Grouping::Year => value.year,
                Grouping::Well => value.well,
            };
            groups.entry(key).or_default().push(value.loading);
        }

        Ok(groups
            .into_iter()
            .map(|(key, mut loadings)| (key, interpolate(&mut loadings, p)))
            .collect())
    }

    /// Yearly series for each requested percentile.
    pub fn percentiles(
        &self,
        record: &RunRecord,
        percentiles: &[f64],
    ) -> Result<Vec<ResultPercentile>, AggregateError> {
        percentiles
            .iter()
            .map(|&p| {
                let by_year = self.percentile_by(record, p, Grouping::Year)?;
                Ok(ResultPercentile {
                    percentile: p,
                    values: by_year.into_values().collect(),
                })
            })
            .collect()
    }
}

fn check_percentile(p: f64) -> Result<(), AggregateError> {
    if (0.0..=100.0).contains(&p) {
        Ok(())
    } else {
        Err(AggregateError::InvalidPercentile(p))
    }
}

fn stored_values(record: &RunRecord) -> Result<&[ResultValue], AggregateError> {
    match record.result.as_deref() {
        Some(values) if !values.is_empty() => Ok(values),
        _ => Err(AggregateError::NotComplete),
    }
}

/// Sorts in place. `values` must be non-empty and `p` within 0..=100.
fn interpolate(values: &mut [f64], p: f64) -> f64 {
    values.sort_by(f64::total_cmp);
    let rank = p / 100.0 * (values.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let fraction = rank - lower as f64;
    values[lower] + (values[upper] - values[lower]) * fraction
}
