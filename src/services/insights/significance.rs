use serde::{Deserialize, Serialize};

use super::summary::{DistributionStats, DistributionSummary};
use crate::error::{EngineError, EngineResult};

pub const DEFAULT_MIN_SAMPLE_SIZE: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExtremeSide {
    High,
    Low,
    #[default]
    Either,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Lt,
    Lte,
    Gt,
    Gte,
    Eq,
    Neq,
}

/// Right-hand side of a custom numeric predicate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Operand {
    Constant {
        value: f64,
    },
    Mean {
        #[serde(default)]
        offset: f64,
    },
    Min,
    Max,
    Percentile {
        percentile: f64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PublishPredicate {
    AbovePercentile {
        percentile: f64,
    },
    BelowPercentile {
        percentile: f64,
    },
    IsAllTimeExtreme {
        #[serde(default)]
        direction: ExtremeSide,
    },
    CustomNumeric {
        op: CompareOp,
        operand: Operand,
    },
}

fn default_min_sample_size() -> usize {
    DEFAULT_MIN_SAMPLE_SIZE
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignificanceConfig {
    pub predicate: PublishPredicate,
    #[serde(default = "default_min_sample_size")]
    pub min_sample_size: usize,
    /// Window key the predicate is evaluated against; first window when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window: Option<String>,
}

impl SignificanceConfig {
    pub fn new(predicate: PublishPredicate) -> Self {
        Self {
            predicate,
            min_sample_size: DEFAULT_MIN_SAMPLE_SIZE,
            window: None,
        }
    }

    pub fn validate(&self) -> EngineResult<()> {
        let check_percentile = |p: f64, what: &str| {
            if p.is_finite() && p > 0.0 && p < 100.0 {
                Ok(())
            } else {
                Err(EngineError::invalid_window(format!(
                    "{what}.percentile must be within (0, 100), got {p}"
                )))
            }
        };
        match &self.predicate {
            PublishPredicate::AbovePercentile { percentile } => {
                check_percentile(*percentile, "above_percentile")?
            }
            PublishPredicate::BelowPercentile { percentile } => {
                check_percentile(*percentile, "below_percentile")?
            }
            PublishPredicate::IsAllTimeExtreme { .. } => {}
            PublishPredicate::CustomNumeric { operand, .. } => match operand {
                Operand::Constant { value } if !value.is_finite() => {
                    return Err(EngineError::invalid_window(
                        "custom_numeric.operand.value must be finite",
                    ))
                }
                Operand::Mean { offset } if !offset.is_finite() => {
                    return Err(EngineError::invalid_window(
                        "custom_numeric.operand.offset must be finite",
                    ))
                }
                Operand::Percentile { percentile } => {
                    check_percentile(*percentile, "custom_numeric.operand")?
                }
                _ => {}
            },
        }
        if self.min_sample_size == 0 {
            return Err(EngineError::invalid_window("min_sample_size must be >= 1"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Significance {
    None,
    Notable,
    Exceptional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    InsufficientData,
    ThresholdNotMet,
    AbovePercentile,
    BelowPercentile,
    RecordHigh,
    RecordLow,
    CustomPredicateMet,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignificanceVerdict {
    pub is_publish_worthy: bool,
    pub reason_code: ReasonCode,
    pub significance: Significance,
    pub sample_size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold_value: Option<f64>,
    /// Relative distance past the threshold in percent of its magnitude.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exceeded_threshold_pct: Option<f64>,
}

impl SignificanceVerdict {
    pub fn insufficient_data(sample_size: usize) -> Self {
        Self {
            is_publish_worthy: false,
            reason_code: ReasonCode::InsufficientData,
            significance: Significance::None,
            sample_size,
            threshold_value: None,
            exceeded_threshold_pct: None,
        }
    }

    fn not_met(sample_size: usize, threshold_value: Option<f64>) -> Self {
        Self {
            is_publish_worthy: false,
            reason_code: ReasonCode::ThresholdNotMet,
            significance: Significance::None,
            sample_size,
            threshold_value,
            exceeded_threshold_pct: None,
        }
    }
}

/// Decides whether `value` is worth publishing relative to `distribution`.
pub fn evaluate(
    value: f64,
    distribution: &DistributionSummary,
    config: &SignificanceConfig,
) -> SignificanceVerdict {
    let Some(stats) = distribution.stats() else {
        return SignificanceVerdict::insufficient_data(0);
    };
    if stats.count < config.min_sample_size.max(1) || !value.is_finite() {
        return SignificanceVerdict::insufficient_data(stats.count);
    }
    let n = stats.count;

    match config.predicate {
        PublishPredicate::AbovePercentile { percentile } => {
            let Some(threshold) = stats.percentile(percentile) else {
                return SignificanceVerdict::insufficient_data(n);
            };
            if value > threshold {
                met(
                    ReasonCode::AbovePercentile,
                    level(is_exceptional_high(value, stats)),
                    n,
                    threshold,
                    exceeded_pct(value - threshold, threshold),
                )
            } else {
                SignificanceVerdict::not_met(n, Some(threshold))
            }
        }
        PublishPredicate::BelowPercentile { percentile } => {
            let Some(threshold) = stats.percentile(percentile) else {
                return SignificanceVerdict::insufficient_data(n);
            };
            if value < threshold {
                met(
                    ReasonCode::BelowPercentile,
                    level(is_exceptional_low(value, stats)),
                    n,
                    threshold,
                    exceeded_pct(threshold - value, threshold),
                )
            } else {
                SignificanceVerdict::not_met(n, Some(threshold))
            }
        }
        PublishPredicate::IsAllTimeExtreme { direction } => {
            let high = matches!(direction, ExtremeSide::High | ExtremeSide::Either)
                && value >= stats.max;
            let low =
                matches!(direction, ExtremeSide::Low | ExtremeSide::Either) && value <= stats.min;
            if high {
                met(
                    ReasonCode::RecordHigh,
                    Significance::Exceptional,
                    n,
                    stats.max,
                    exceeded_pct(value - stats.max, stats.max),
                )
            } else if low {
                met(
                    ReasonCode::RecordLow,
                    Significance::Exceptional,
                    n,
                    stats.min,
                    exceeded_pct(stats.min - value, stats.min),
                )
            } else {
                let threshold = match direction {
                    ExtremeSide::Low => stats.min,
                    ExtremeSide::High | ExtremeSide::Either => stats.max,
                };
                SignificanceVerdict::not_met(n, Some(threshold))
            }
        }
        PublishPredicate::CustomNumeric { op, operand } => {
            let Some(threshold) = operand_value(operand, stats) else {
                return SignificanceVerdict::insufficient_data(n);
            };
            if compare(value, op, threshold) {
                let exceptional = is_exceptional_high(value, stats) || is_exceptional_low(value, stats);
                met(
                    ReasonCode::CustomPredicateMet,
                    level(exceptional),
                    n,
                    threshold,
                    exceeded_pct((value - threshold).abs(), threshold),
                )
            } else {
                SignificanceVerdict::not_met(n, Some(threshold))
            }
        }
    }
}

fn met(
    reason_code: ReasonCode,
    significance: Significance,
    sample_size: usize,
    threshold: f64,
    exceeded_threshold_pct: Option<f64>,
) -> SignificanceVerdict {
    SignificanceVerdict {
        is_publish_worthy: true,
        reason_code,
        significance,
        sample_size,
        threshold_value: Some(threshold),
        exceeded_threshold_pct,
    }
}

fn level(exceptional: bool) -> Significance {
    if exceptional {
        Significance::Exceptional
    } else {
        Significance::Notable
    }
}

fn is_exceptional_high(value: f64, stats: &DistributionStats) -> bool {
    value >= stats.max || stats.ladder(99.0).is_some_and(|p99| value > p99)
}

fn is_exceptional_low(value: f64, stats: &DistributionStats) -> bool {
    value <= stats.min || stats.ladder(1.0).is_some_and(|p01| value < p01)
}

fn exceeded_pct(distance: f64, threshold: f64) -> Option<f64> {
    if threshold.abs() <= f64::EPSILON {
        return None;
    }
    let pct = distance / threshold.abs() * 100.0;
    pct.is_finite().then_some(pct)
}

fn operand_value(operand: Operand, stats: &DistributionStats) -> Option<f64> {
    match operand {
        Operand::Constant { value } => Some(value),
        Operand::Mean { offset } => Some(stats.mean + offset),
        Operand::Min => Some(stats.min),
        Operand::Max => Some(stats.max),
        Operand::Percentile { percentile } => stats.percentile(percentile),
    }
}

pub fn compare(value: f64, op: CompareOp, threshold: f64) -> bool {
    match op {
        CompareOp::Lt => value < threshold,
        CompareOp::Lte => value <= threshold,
        CompareOp::Gt => value > threshold,
        CompareOp::Gte => value >= threshold,
        CompareOp::Eq => (value - threshold).abs() <= f64::EPSILON,
        CompareOp::Neq => (value - threshold).abs() > f64::EPSILON,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::insights::summary::summarize;

    fn hundred() -> DistributionSummary {
        summarize((1..=100).map(f64::from))
    }

    #[test]
    fn empty_or_small_distribution_is_insufficient() {
        let config = SignificanceConfig::new(PublishPredicate::AbovePercentile { percentile: 95.0 });
        let verdict = evaluate(10.0, &DistributionSummary::Empty, &config);
        assert!(!verdict.is_publish_worthy);
        assert_eq!(verdict.reason_code, ReasonCode::InsufficientData);

        let verdict = evaluate(10.0, &summarize(vec![1.0, 2.0]), &config);
        assert_eq!(verdict.reason_code, ReasonCode::InsufficientData);
        assert_eq!(verdict.sample_size, 2);
    }

    #[test]
    fn crossing_p95_is_notable_and_beyond_p99_is_exceptional() {
        let config = SignificanceConfig::new(PublishPredicate::AbovePercentile { percentile: 95.0 });
        let dist = hundred();

        let notable = evaluate(97.0, &dist, &config);
        assert!(notable.is_publish_worthy);
        assert_eq!(notable.reason_code, ReasonCode::AbovePercentile);
        assert_eq!(notable.significance, Significance::Notable);
        // p95 over 1..=100 is 95.05
        assert!((notable.threshold_value.expect("threshold") - 95.05).abs() < 1e-9);
        assert!(notable.exceeded_threshold_pct.expect("pct") > 0.0);

        let exceptional = evaluate(99.5, &dist, &config);
        assert_eq!(exceptional.significance, Significance::Exceptional);

        let quiet = evaluate(50.0, &dist, &config);
        assert!(!quiet.is_publish_worthy);
        assert_eq!(quiet.reason_code, ReasonCode::ThresholdNotMet);
        assert_eq!(quiet.significance, Significance::None);
    }

    #[test]
    fn below_percentile_mirrors_above() {
        let config = SignificanceConfig::new(PublishPredicate::BelowPercentile { percentile: 5.0 });
        let dist = hundred();
        let notable = evaluate(3.0, &dist, &config);
        assert_eq!(notable.reason_code, ReasonCode::BelowPercentile);
        assert_eq!(notable.significance, Significance::Notable);
        let record = evaluate(0.5, &dist, &config);
        assert_eq!(record.significance, Significance::Exceptional);
    }

    #[test]
    fn all_time_extreme_counts_ties_with_the_record() {
        let config = SignificanceConfig::new(PublishPredicate::IsAllTimeExtreme {
            direction: ExtremeSide::High,
        });
        let may = summarize(vec![18.0, 20.0, 19.0, 25.0, 17.0]);
        let verdict = evaluate(25.0, &may, &config);
        assert!(verdict.is_publish_worthy);
        assert_eq!(verdict.reason_code, ReasonCode::RecordHigh);
        assert_eq!(verdict.significance, Significance::Exceptional);
        assert_eq!(verdict.threshold_value, Some(25.0));

        let verdict = evaluate(24.0, &may, &config);
        assert!(!verdict.is_publish_worthy);
    }

    #[test]
    fn either_direction_detects_record_low() {
        let config = SignificanceConfig::new(PublishPredicate::IsAllTimeExtreme {
            direction: ExtremeSide::Either,
        });
        let verdict = evaluate(-4.0, &hundred(), &config);
        assert_eq!(verdict.reason_code, ReasonCode::RecordLow);
    }

    #[test]
    fn custom_numeric_against_mean_offset() {
        let config = SignificanceConfig::new(PublishPredicate::CustomNumeric {
            op: CompareOp::Gte,
            operand: Operand::Mean { offset: 10.0 },
        });
        let dist = hundred();
        let verdict = evaluate(61.0, &dist, &config);
        assert!(verdict.is_publish_worthy);
        assert_eq!(verdict.reason_code, ReasonCode::CustomPredicateMet);
        assert_eq!(verdict.significance, Significance::Notable);
        assert!(!evaluate(60.0, &dist, &config).is_publish_worthy);
    }

    #[test]
    fn custom_numeric_is_exceptional_at_the_window_edges() {
        let dist = hundred();
        let above = SignificanceConfig::new(PublishPredicate::CustomNumeric {
            op: CompareOp::Gt,
            operand: Operand::Constant { value: 50.0 },
        });
        assert_eq!(evaluate(80.0, &dist, &above).significance, Significance::Notable);
        // p99 of 1..=100 is 99.01.
        assert_eq!(evaluate(99.5, &dist, &above).significance, Significance::Exceptional);
        let at_max = evaluate(100.0, &dist, &above);
        assert!(at_max.is_publish_worthy);
        assert_eq!(at_max.reason_code, ReasonCode::CustomPredicateMet);
        assert_eq!(at_max.significance, Significance::Exceptional);

        let below = SignificanceConfig::new(PublishPredicate::CustomNumeric {
            op: CompareOp::Lt,
            operand: Operand::Constant { value: 10.0 },
        });
        assert_eq!(evaluate(5.0, &dist, &below).significance, Significance::Notable);
        assert_eq!(evaluate(1.5, &dist, &below).significance, Significance::Exceptional);
    }

    #[test]
    fn evaluation_is_deterministic() {
        let config = SignificanceConfig::new(PublishPredicate::AbovePercentile { percentile: 90.0 });
        let dist = hundred();
        assert_eq!(evaluate(93.3, &dist, &config), evaluate(93.3, &dist, &config));
    }

    #[test]
    fn validation_rejects_out_of_range_percentiles() {
        let config = SignificanceConfig::new(PublishPredicate::AbovePercentile { percentile: 100.0 });
        assert!(config.validate().is_err());
        let config = SignificanceConfig::new(PublishPredicate::CustomNumeric {
            op: CompareOp::Gt,
            operand: Operand::Percentile { percentile: 0.0 },
        });
        assert!(config.validate().is_err());
        let mut config = SignificanceConfig::new(PublishPredicate::IsAllTimeExtreme {
            direction: ExtremeSide::Either,
        });
        assert!(config.validate().is_ok());
        config.min_sample_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn parses_predicate_json() {
        let config: SignificanceConfig = serde_json::from_str(
            r#"{"predicate": {"kind": "custom_numeric", "op": "gt", "operand": {"type": "constant", "value": 30}}}"#,
        )
        .expect("parse");
        assert_eq!(config.min_sample_size, DEFAULT_MIN_SAMPLE_SIZE);
        assert_eq!(
            config.predicate,
            PublishPredicate::CustomNumeric {
                op: CompareOp::Gt,
                operand: Operand::Constant { value: 30.0 }
            }
        );
    }
}
