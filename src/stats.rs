//! Small NA-aware statistics used by the SES engine and the post-processors.
//!
//! Every function here treats `NaN` as a missing value and skips it rather
//! than letting it poison the result.

/// Mean of the defined values, `NaN` when there are none.
pub fn mean(values: &[f64]) -> f64 {
    let (sum, n) = values
        .iter()
        .filter(|v| !v.is_nan())
        .fold((0.0, 0usize), |(s, n), &v| (s + v, n + 1));
    if n == 0 { f64::NAN } else { sum / n as f64 }
}

/// Sample standard deviation (n - 1) of the defined values.
///
/// `NaN` with fewer than two defined values.
pub fn sd(values: &[f64]) -> f64 {
    let m = mean(values);
    let defined: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    if defined.len() < 2 {
        return f64::NAN;
    }
    let ss: f64 = defined.iter().map(|&v| (v - m).powi(2)).sum();
    (ss / (defined.len() - 1) as f64).sqrt()
}

/// Average rank (1-based) of `observed` within `{observed} ∪ others`.
///
/// Ties share the mean of the ranks they span, so an observed value equal to
/// `k` of the others gets `less + 1 + k / 2`. Undefined entries of `others`
/// are dropped. Returns `(rank, n)` where `n` counts the defined values
/// including `observed`; `rank` is `NaN` when `observed` is undefined.
pub fn average_rank(observed: f64, others: &[f64]) -> (f64, usize) {
    let mut less = 0usize;
    let mut ties = 0usize;
    let mut n = 1usize;
    for &v in others.iter().filter(|v| !v.is_nan()) {
        n += 1;
        if v < observed {
            less += 1;
        } else if v == observed {
            ties += 1;
        }
    }
    if observed.is_nan() {
        return (f64::NAN, n);
    }
    (less as f64 + 1.0 + ties as f64 / 2.0, n)
}

/// Quantile of pre-sorted data by linear interpolation between order
/// statistics (Hyndman & Fan type 7).
pub fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => f64::NAN,
        1 => sorted[0],
        n => {
            let h = (n - 1) as f64 * q;
            let lo = h.floor() as usize;
            let hi = h.ceil() as usize;
            sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo])
        }
    }
}

/// Benjamini-Hochberg adjustment.
///
/// Sorts the defined p-values, adjusts as `p * m / rank`, enforces
/// monotonicity from right to left and clamps to 1. Undefined inputs stay
/// undefined and do not count towards `m`.
pub fn benjamini_hochberg(p_values: &[f64]) -> Vec<f64> {
    let mut indices: Vec<usize> = (0..p_values.len()).filter(|&i| !p_values[i].is_nan()).collect();
    indices.sort_by(|&a, &b| p_values[a].total_cmp(&p_values[b]));

    let m = indices.len() as f64;
    let mut adjusted = vec![f64::NAN; p_values.len()];
    let mut prev = f64::INFINITY;
    for (pos, &idx) in indices.iter().enumerate().rev() {
        let rank = (pos + 1) as f64;
        let adj = (p_values[idx] * m / rank).min(1.0).min(prev);
        adjusted[idx] = adj;
        prev = adj;
    }
    adjusted
}
