//! Pass/fail predicates over request latencies.
//!
//! A [`Threshold`] is written like `p(95)<1000`: an aggregate over all recorded request durations
//! in milliseconds, a comparison operator and a limit. Thresholds are evaluated once, after the
//! run has completed.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error returned when a threshold expression cannot be parsed.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid threshold `{expression}`: {reason}")]
pub struct ThresholdParseError {
    expression: String,
    reason: &'static str,
}

/// The statistic a [`Threshold`] compares against its limit.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Aggregate {
    /// The arithmetic mean.
    Avg,
    /// The fastest sample.
    Min,
    /// The slowest sample.
    Max,
    /// The median, equivalent to `p(50)`.
    Med,
    /// A percentile in `0..=100`.
    Percentile(f64),
}

impl Aggregate {
    /// Computes this statistic over `sorted` sample values.
    ///
    /// Returns `None` if there are no samples.
    pub fn compute(&self, sorted: &[f64]) -> Option<f64> {
        let (first, last) = (sorted.first()?, sorted.last()?);
        Some(match *self {
            Aggregate::Avg => sorted.iter().sum::<f64>() / sorted.len() as f64,
            Aggregate::Min => *first,
            Aggregate::Max => *last,
            Aggregate::Med => percentile(sorted, 50.0),
            Aggregate::Percentile(p) => percentile(sorted, p),
        })
    }
}

impl fmt::Display for Aggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Aggregate::Avg => f.write_str("avg"),
            Aggregate::Min => f.write_str("min"),
            Aggregate::Max => f.write_str("max"),
            Aggregate::Med => f.write_str("med"),
            Aggregate::Percentile(p) => write!(f, "p({p})"),
        }
    }
}

/// Linear interpolation between the closest ranks.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    let rank = p / 100.0 * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let weight = rank - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * weight
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Operator {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl Operator {
    // Two-character operators first so `<=` is not read as `<`.
    const ALL: [(&'static str, Operator); 6] = [
        ("<=", Operator::Le),
        (">=", Operator::Ge),
        ("==", Operator::Eq),
        ("!=", Operator::Ne),
        ("<", Operator::Lt),
        (">", Operator::Gt),
    ];

    fn holds(self, lhs: f64, rhs: f64) -> bool {
        match self {
            Operator::Lt => lhs < rhs,
            Operator::Le => lhs <= rhs,
            Operator::Gt => lhs > rhs,
            Operator::Ge => lhs >= rhs,
            Operator::Eq => lhs == rhs,
            Operator::Ne => lhs != rhs,
        }
    }

    fn as_str(self) -> &'static str {
        Self::ALL
            .iter()
            .find(|(_, op)| *op == self)
            .map_or("?", |&(s, _)| s)
    }
}

/// A latency objective such as `p(95)<1000`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Threshold {
    aggregate: Aggregate,
    operator: Operator,
    limit_ms: f64,
}

impl Threshold {
    /// The default objective: 95% of requests complete in under one second.
    pub fn default_slo() -> Self {
        Self {
            aggregate: Aggregate::Percentile(95.0),
            operator: Operator::Lt,
            limit_ms: 1000.0,
        }
    }

    /// The statistic this threshold is computed from.
    pub fn aggregate(&self) -> Aggregate {
        self.aggregate
    }

    /// Evaluates this threshold over `sorted` latencies in milliseconds.
    ///
    /// A threshold without any samples fails.
    pub fn evaluate(&self, sorted: &[f64]) -> ThresholdResult {
        let observed = self.aggregate.compute(sorted);
        let passed = observed.is_some_and(|value| self.operator.holds(value, self.limit_ms));

        ThresholdResult {
            threshold: self.clone(),
            observed: observed.map(|millis| Duration::from_secs_f64(millis.max(0.0) / 1000.0)),
            passed,
        }
    }
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}",
            self.aggregate,
            self.operator.as_str(),
            self.limit_ms
        )
    }
}

impl FromStr for Threshold {
    type Err = ThresholdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let error = |reason| ThresholdParseError {
            expression: s.to_owned(),
            reason,
        };

        let (position, token, operator) = Operator::ALL
            .iter()
            .filter_map(|&(token, op)| s.find(token).map(|pos| (pos, token, op)))
            .min_by_key(|&(pos, token, _)| (pos, std::cmp::Reverse(token.len())))
            .ok_or_else(|| error("missing comparison operator"))?;

        let lhs = s[..position].trim();
        let rhs = s[position + token.len()..].trim();

        let aggregate = match lhs {
            "avg" => Aggregate::Avg,
            "min" => Aggregate::Min,
            "max" => Aggregate::Max,
            "med" => Aggregate::Med,
            _ => {
                let inner = lhs
                    .strip_prefix("p(")
                    .and_then(|rest| rest.strip_suffix(')'))
                    .ok_or_else(|| error("unknown aggregate, expected avg, min, max, med or p(N)"))?;
                let p: f64 = inner
                    .trim()
                    .parse()
                    .map_err(|_| error("percentile is not a number"))?;
                if !(0.0..=100.0).contains(&p) {
                    return Err(error("percentile must be between 0 and 100"));
                }
                Aggregate::Percentile(p)
            }
        };

        let limit_ms: f64 = rhs.parse().map_err(|_| error("limit is not a number"))?;
        if !limit_ms.is_finite() {
            return Err(error("limit must be finite"));
        }

        Ok(Self {
            aggregate,
            operator,
            limit_ms,
        })
    }
}

impl TryFrom<String> for Threshold {
    type Error = ThresholdParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Threshold> for String {
    fn from(value: Threshold) -> Self {
        value.to_string()
    }
}

/// The outcome of evaluating a [`Threshold`] at the end of a run.
#[derive(Clone, Debug)]
pub struct ThresholdResult {
    /// The evaluated threshold.
    pub threshold: Threshold,
    /// The observed aggregate, or `None` if no latencies were recorded.
    pub observed: Option<Duration>,
    /// Whether the observed value satisfied the threshold.
    pub passed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(values: &[f64]) -> Vec<f64> {
        let mut values = values.to_vec();
        values.sort_by(f64::total_cmp);
        values
    }

    #[test]
    fn parses_expressions() {
        let threshold: Threshold = "p(95)<1000".parse().unwrap();
        assert_eq!(threshold.aggregate, Aggregate::Percentile(95.0));
        assert_eq!(threshold.operator, Operator::Lt);
        assert_eq!(threshold.limit_ms, 1000.0);
        assert_eq!(threshold.to_string(), "p(95)<1000");

        let threshold: Threshold = " avg <= 250.5 ".parse().unwrap();
        assert_eq!(threshold.aggregate, Aggregate::Avg);
        assert_eq!(threshold.operator, Operator::Le);
        assert_eq!(threshold.limit_ms, 250.5);

        let threshold: Threshold = "p(99.9)>=1".parse().unwrap();
        assert_eq!(threshold.aggregate, Aggregate::Percentile(99.9));
        assert_eq!(threshold.operator, Operator::Ge);

        assert_eq!("med!=3".parse::<Threshold>().unwrap().operator, Operator::Ne);
        assert_eq!("max==3".parse::<Threshold>().unwrap().operator, Operator::Eq);
    }

    #[test]
    fn rejects_malformed_expressions() {
        for expression in [
            "p(95)",
            "p95<1000",
            "p(101)<1000",
            "p(x)<1000",
            "rate<0.1",
            "p(95)<fast",
            "p(95)<inf",
            "",
        ] {
            assert!(
                expression.parse::<Threshold>().is_err(),
                "`{expression}` should not parse"
            );
        }
    }

    #[test]
    fn percentiles_interpolate_between_ranks() {
        let samples = ms(&[10.0, 20.0, 30.0, 40.0, 50.0]);
        assert_eq!(Aggregate::Percentile(0.0).compute(&samples), Some(10.0));
        assert_eq!(Aggregate::Percentile(100.0).compute(&samples), Some(50.0));
        assert_eq!(Aggregate::Med.compute(&samples), Some(30.0));
        let p95 = Aggregate::Percentile(95.0).compute(&samples).unwrap();
        assert!((p95 - 48.0).abs() < 1e-9, "{p95}");
        assert_eq!(Aggregate::Avg.compute(&samples), Some(30.0));
        assert_eq!(Aggregate::Min.compute(&samples), Some(10.0));
        assert_eq!(Aggregate::Max.compute(&samples), Some(50.0));
        assert_eq!(Aggregate::Avg.compute(&[]), None);
    }

    #[test]
    fn p95_under_one_second() {
        let threshold: Threshold = "p(95)<1000".parse().unwrap();

        let fast = ms(&[999.0; 100]);
        assert!(threshold.evaluate(&fast).passed);

        // 5 of 100 slow samples are not enough to push p95 over the limit
        let mut mostly_fast = vec![100.0; 95];
        mostly_fast.extend([5000.0; 5]);
        let result = threshold.evaluate(&ms(&mostly_fast));
        assert!(result.passed, "{result:?}");

        let mut slow = vec![100.0; 90];
        slow.extend([1000.0; 10]);
        let result = threshold.evaluate(&ms(&slow));
        assert!(!result.passed);
        assert_eq!(result.observed, Some(Duration::from_secs(1)));
    }

    #[test]
    fn no_samples_fails() {
        let threshold: Threshold = "p(95)<1000".parse().unwrap();
        let result = threshold.evaluate(&[]);
        assert!(!result.passed);
        assert_eq!(result.observed, None);
    }

    #[test]
    fn deserializes_from_strings() {
        let thresholds: Vec<Threshold> = serde_json::from_str(r#"["p(95)<1000", "max<5000"]"#).unwrap();
        assert_eq!(thresholds.len(), 2);
        assert!(serde_json::from_str::<Vec<Threshold>>(r#"["p(95)"]"#).is_err());
    }
}
