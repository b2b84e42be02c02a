//! Statistical functions for image analysis

/// Calculate median of a slice of f64 values
///
/// This function computes the median while filtering out NaN values but including
/// infinite values (±inf). For even-length data, returns the average of the two
/// middle values.
///
/// # Arguments
///
/// * `values` - Slice of f64 values to compute median from
///
/// # Returns
///
/// * `Ok(median)` - The median value
/// * `Err(message)` - If no valid values remain after filtering NaN
pub fn median(values: &[f64]) -> Result<f64, String> {
    let mut valid_values: Vec<f64> = values.iter().filter(|v| !v.is_nan()).copied().collect();

    if valid_values.is_empty() {
        return Err(format!(
            "Insufficient data points to compute median: {} total values, 0 valid (all NaN)",
            values.len()
        ));
    }

    let n = valid_values.len();
    let mid = n / 2;
    let (lower, upper, _) = valid_values.select_nth_unstable_by(mid, f64::total_cmp);
    let upper = *upper;

    let median_value = if n % 2 == 0 {
        let below = lower.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        (below + upper) / 2.0
    } else {
        upper
    };

    Ok(median_value)
}
