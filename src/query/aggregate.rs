//! Aggregation functions applied to a strictly timestamp-ordered point
//! stream (spec.md §4.9 step 4).
//!
//! Each [`Aggregate`] variant is a design contract translated directly
//! from spec.md's aggregation table, not a reimplementation of the
//! original source's C macros. Two of the spec's open wordings are
//! resolved explicitly here rather than left ambiguous:
//!
//! - `median`/`median_low`/`median_high` on an even-length stream: `median`
//!   averages the two middle values (linear interpolation, matching the
//!   spec's note that "median over a double series uses linear
//!   interpolation"); `median_low`/`median_high` pick the lower/upper
//!   middle exactly, for callers that want a value that actually occurred
//!   in the stream.
//! - `variance` vs. `pvariance`: spec.md §4.9 states plainly that
//!   `variance` *is* population variance, so both names compute the same
//!   population variance (divide by `n`); `stddev` is its square root.

use super::QueryError;
use crate::shard::{Point, PointValue};

/// One aggregation to apply to a series' point stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Aggregate {
    Count,
    Sum,
    Min,
    Max,
    Mean,
    Median,
    MedianLow,
    MedianHigh,
    Variance,
    PVariance,
    StdDev,
    First,
    Last,
    Difference,
    /// Divides successive `Δvalue` by `Δt / timespan`.
    Derivative(i64),
    Limit(usize),
    Filter(Filter),
}

/// A `filter(op, value)` clause.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Numeric comparison against integer or float series.
    Compare(FilterOp, f64),
    /// Regex match against a string series.
    Regex(String),
}

/// Comparison operator for a numeric [`Filter::Compare`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl FilterOp {
    fn matches(self, lhs: f64, rhs: f64) -> bool {
        match self {
            FilterOp::Eq => lhs == rhs,
            FilterOp::Ne => lhs != rhs,
            FilterOp::Lt => lhs < rhs,
            FilterOp::Le => lhs <= rhs,
            FilterOp::Gt => lhs > rhs,
            FilterOp::Ge => lhs >= rhs,
        }
    }
}

/// Result of applying an [`Aggregate`] to a point stream: either a single
/// scalar (`count`, `sum`, `mean`, …) or a transformed point stream
/// (`first`, `difference`, `limit`, `filter`, …).
#[derive(Debug, Clone, PartialEq)]
pub enum AggregateOutput {
    Scalar(f64),
    Points(Vec<Point>),
}

fn as_f64(value: &PointValue) -> Result<f64, QueryError> {
    match value {
        PointValue::Integer(v) => Ok(*v as f64),
        PointValue::Float(v) => Ok(*v),
        PointValue::String(_) => Err(QueryError::NotNumeric),
    }
}

fn numeric_values(points: &[Point]) -> Result<Vec<f64>, QueryError> {
    points.iter().map(|p| as_f64(&p.value)).collect()
}

fn mean_of(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn population_variance(values: &[f64]) -> f64 {
    let mean = mean_of(values);
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64
}

/// Applies `agg` to `points`, which must already be in ascending
/// timestamp order.
pub fn apply(agg: &Aggregate, points: &[Point]) -> Result<AggregateOutput, QueryError> {
    if points.is_empty() && !matches!(agg, Aggregate::Count | Aggregate::Limit(_) | Aggregate::Filter(_)) {
        return Err(QueryError::EmptySeries);
    }

    match agg {
        Aggregate::Count => Ok(AggregateOutput::Scalar(points.len() as f64)),
        Aggregate::Sum => Ok(AggregateOutput::Scalar(numeric_values(points)?.iter().sum())),
        Aggregate::Min => {
            let values = numeric_values(points)?;
            Ok(AggregateOutput::Scalar(values.into_iter().fold(f64::INFINITY, f64::min)))
        }
        Aggregate::Max => {
            let values = numeric_values(points)?;
            Ok(AggregateOutput::Scalar(values.into_iter().fold(f64::NEG_INFINITY, f64::max)))
        }
        Aggregate::Mean => Ok(AggregateOutput::Scalar(mean_of(&numeric_values(points)?))),
        Aggregate::Median => {
            let mut values = numeric_values(points)?;
            values.sort_by(|a, b| a.partial_cmp(b).unwrap());
            let mid = values.len() / 2;
            let median = if values.len() % 2 == 0 { (values[mid - 1] + values[mid]) / 2.0 } else { values[mid] };
            Ok(AggregateOutput::Scalar(median))
        }
        Aggregate::MedianLow => {
            let mut values = numeric_values(points)?;
            values.sort_by(|a, b| a.partial_cmp(b).unwrap());
            let mid = values.len() / 2;
            let idx = if values.len() % 2 == 0 { mid - 1 } else { mid };
            Ok(AggregateOutput::Scalar(values[idx]))
        }
        Aggregate::MedianHigh => {
            let mut values = numeric_values(points)?;
            values.sort_by(|a, b| a.partial_cmp(b).unwrap());
            Ok(AggregateOutput::Scalar(values[values.len() / 2]))
        }
        Aggregate::Variance | Aggregate::PVariance => {
            Ok(AggregateOutput::Scalar(population_variance(&numeric_values(points)?)))
        }
        Aggregate::StdDev => Ok(AggregateOutput::Scalar(population_variance(&numeric_values(points)?).sqrt())),
        Aggregate::First => Ok(AggregateOutput::Points(vec![points[0].clone()])),
        Aggregate::Last => Ok(AggregateOutput::Points(vec![points[points.len() - 1].clone()])),
        Aggregate::Difference => {
            let mut out = Vec::with_capacity(points.len().saturating_sub(1));
            for pair in points.windows(2) {
                let delta = as_f64(&pair[1].value)? - as_f64(&pair[0].value)?;
                out.push(Point { ts: pair[1].ts, value: PointValue::Float(delta) });
            }
            Ok(AggregateOutput::Points(out))
        }
        Aggregate::Derivative(timespan) => {
            let timespan = *timespan as f64;
            let mut out = Vec::with_capacity(points.len().saturating_sub(1));
            for pair in points.windows(2) {
                let dv = as_f64(&pair[1].value)? - as_f64(&pair[0].value)?;
                let dt = (pair[1].ts - pair[0].ts) as f64;
                if dt == 0.0 {
                    continue;
                }
                out.push(Point { ts: pair[1].ts, value: PointValue::Float(dv / (dt / timespan)) });
            }
            Ok(AggregateOutput::Points(out))
        }
        Aggregate::Limit(n) => Ok(AggregateOutput::Points(points.iter().take(*n).cloned().collect())),
        Aggregate::Filter(filter) => {
            let mut out = Vec::new();
            match filter {
                Filter::Compare(op, rhs) => {
                    for point in points {
                        let lhs = as_f64(&point.value)?;
                        if op.matches(lhs, *rhs) {
                            out.push(point.clone());
                        }
                    }
                }
                Filter::Regex(pattern) => {
                    let re = regex::Regex::new(pattern).map_err(|e| QueryError::BadPattern(e.to_string()))?;
                    for point in points {
                        let PointValue::String(s) = &point.value else {
                            return Err(QueryError::NotString);
                        };
                        if re.is_match(s) {
                            out.push(point.clone());
                        }
                    }
                }
            }
            Ok(AggregateOutput::Points(out))
        }
    }
}
