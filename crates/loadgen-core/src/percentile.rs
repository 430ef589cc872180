use crate::error::PercentileError;

/// Linear-interpolation percentile of `samples` at `p` in `[0, 1]`.
///
/// The samples are sorted ascending, the real rank is `p * (n - 1)` and the
/// result interpolates between the two neighbouring samples.
pub fn percentile(samples: &[f64], p: f64) -> Result<f64, PercentileError> {
    let mut sorted = samples.to_vec();
    sorted.sort_by(f64::total_cmp);
    percentile_sorted(&sorted, p)
}

/// Same as [`percentile`] for input that is already sorted ascending.
pub fn percentile_sorted(sorted: &[f64], p: f64) -> Result<f64, PercentileError> {
    if sorted.is_empty() {
        return Err(PercentileError::Empty);
    }
    if !(0.0..=1.0).contains(&p) {
        return Err(PercentileError::OutOfRange(p.to_string()));
    }

    let rank = p * (sorted.len() - 1) as f64;
    let index = rank.floor() as usize;
    let frac = rank - index as f64;

    if index + 1 < sorted.len() {
        Ok(sorted[index] * (1.0 - frac) + sorted[index + 1] * frac)
    } else {
        Ok(sorted[index])
    }
}
