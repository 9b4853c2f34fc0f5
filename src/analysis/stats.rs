//! Numeric helpers and significance tests.
//!
//! Every function here returns finite values or `None`; NaN and infinity
//! never leave this module.

use crate::models::{SignificanceTest, StatisticalSignificance};
use statrs::distribution::{ContinuousCDF, Normal, StudentsT};

/// Tolerance for threshold comparisons on floats.
pub const EPSILON: f64 = 1e-9;

/// Two-sided confidence level used for intervals.
const CONFIDENCE_LEVEL: f64 = 0.95;

/// `numerator / denominator`, with `0.0` for a zero or non-finite result.
pub fn safe_ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        return 0.0;
    }
    let ratio = numerator / denominator;
    if ratio.is_finite() {
        ratio
    } else {
        0.0
    }
}

/// Compare two floats within [`EPSILON`].
pub fn approx_eq(a: f64, b: f64) -> bool {
    (a - b).abs() <= EPSILON
}

/// Map an anomaly magnitude to a starting confidence in `[0.3, 0.8]`.
///
/// `reference` is the magnitude that saturates the scale.
pub fn initial_confidence(magnitude: f64, reference: f64) -> f64 {
    let normalized = if magnitude.is_finite() && reference > 0.0 {
        (magnitude.max(0.0) / reference).min(1.0)
    } else {
        0.0
    };
    (0.3 + 0.5 * normalized).clamp(0.0, 1.0)
}

/// Arithmetic mean, `None` for an empty slice.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Unbiased sample variance, `None` below two observations.
pub fn sample_variance(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let ss: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
    Some(ss / (values.len() - 1) as f64)
}

/// Two-proportion z-test of `x1/n1` against `x2/n2`.
///
/// The p-value uses the pooled standard error; the interval on
/// `p1 - p2` uses the unpooled one.
pub fn two_proportion_test(
    x1: f64,
    n1: f64,
    x2: f64,
    n2: f64,
) -> Option<StatisticalSignificance> {
    if n1 <= 0.0 || n2 <= 0.0 || x1 < 0.0 || x2 < 0.0 || x1 > n1 || x2 > n2 {
        return None;
    }

    let p1 = x1 / n1;
    let p2 = x2 / n2;
    let pooled = (x1 + x2) / (n1 + n2);
    let pooled_se = (pooled * (1.0 - pooled) * (1.0 / n1 + 1.0 / n2)).sqrt();
    let normal = Normal::new(0.0, 1.0).ok()?;

    let p_value = if pooled_se > 0.0 && pooled_se.is_finite() {
        let z = (p1 - p2) / pooled_se;
        finite_probability(2.0 * (1.0 - normal.cdf(z.abs())))
    } else {
        None
    };

    let unpooled_se = (p1 * (1.0 - p1) / n1 + p2 * (1.0 - p2) / n2).sqrt();
    let z_crit = normal.inverse_cdf(1.0 - (1.0 - CONFIDENCE_LEVEL) / 2.0);
    let confidence_interval = interval(p1 - p2, z_crit * unpooled_se);

    significance(
        SignificanceTest::TwoProportionZ,
        p_value,
        confidence_interval,
        n1,
        n2,
    )
}

/// Welch's two-sample t-test on the means of `a` and `b`.
pub fn welch_t_test(a: &[f64], b: &[f64]) -> Option<StatisticalSignificance> {
    let (m1, v1) = (mean(a)?, sample_variance(a)?);
    let (m2, v2) = (mean(b)?, sample_variance(b)?);
    let (n1, n2) = (a.len() as f64, b.len() as f64);

    let q1 = v1 / n1;
    let q2 = v2 / n2;
    let se = (q1 + q2).sqrt();
    if !(se > 0.0 && se.is_finite()) {
        return None;
    }

    let df = (q1 + q2).powi(2) / (q1.powi(2) / (n1 - 1.0) + q2.powi(2) / (n2 - 1.0));
    if !(df > 0.0 && df.is_finite()) {
        return None;
    }

    let dist = StudentsT::new(0.0, 1.0, df).ok()?;
    let t = (m1 - m2) / se;
    let p_value = finite_probability(2.0 * (1.0 - dist.cdf(t.abs())));
    let t_crit = dist.inverse_cdf(1.0 - (1.0 - CONFIDENCE_LEVEL) / 2.0);
    let confidence_interval = interval(m1 - m2, t_crit * se);

    significance(SignificanceTest::WelchT, p_value, confidence_interval, n1, n2)
}

fn finite_probability(p: f64) -> Option<f64> {
    p.is_finite().then(|| p.clamp(0.0, 1.0))
}

fn interval(center: f64, margin: f64) -> Option<[f64; 2]> {
    if !(center.is_finite() && margin.is_finite()) {
        return None;
    }
    let margin = margin.abs();
    Some([center - margin, center + margin])
}

fn significance(
    test: SignificanceTest,
    p_value: Option<f64>,
    confidence_interval: Option<[f64; 2]>,
    target_sample: f64,
    comparison_sample: f64,
) -> Option<StatisticalSignificance> {
    if p_value.is_none() && confidence_interval.is_none() {
        return None;
    }
    Some(StatisticalSignificance {
        test,
        p_value,
        confidence_interval,
        target_sample,
        comparison_sample,
    })
}
