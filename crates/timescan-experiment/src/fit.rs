//! Quadratic least-squares fit and goodness-of-fit diagnostics.
//!
//! The fit solves the 3x3 normal equations by Cramer's rule on pixels that
//! have been centred and scaled, then maps the coefficients back to raw
//! pixel units.

use std::collections::BTreeMap;

use timescan_core::error::{TimescanError, TsResult};

/// Evaluate `a + b*x + c*x^2`.
pub fn evaluate(coefficients: &[f64; 3], x: f64) -> f64 {
    let [a, b, c] = *coefficients;
    a + b * x + c * x * x
}

/// Least-squares fit of `y = a + b*x + c*x^2`.
///
/// # Errors
/// - [`TimescanError::CalibrationInsufficientData`] for fewer than three
///   samples, mismatched lengths, or every `x` identical
/// - [`TimescanError::CalibrationFitFailure`] when the normal system is
///   singular (fewer than three distinct `x`) or the result is not finite
pub fn fit_quadratic(x: &[f64], y: &[f64]) -> TsResult<[f64; 3]> {
    if x.len() != y.len() {
        return Err(TimescanError::CalibrationInsufficientData(format!(
            "{} pixel values but {} delay values",
            x.len(),
            y.len()
        )));
    }
    if x.len() < 3 {
        return Err(TimescanError::CalibrationInsufficientData(format!(
            "{} samples, need at least 3",
            x.len()
        )));
    }
    if x.iter().chain(y).any(|v| !v.is_finite()) {
        return Err(TimescanError::CalibrationFitFailure("non-finite sample".into()));
    }

    let n = x.len() as f64;
    let mean = x.iter().sum::<f64>() / n;
    let scale = x.iter().map(|v| (v - mean).abs()).fold(0.0, f64::max);
    if scale == 0.0 {
        return Err(TimescanError::CalibrationInsufficientData(format!(
            "all {} samples share pixel value {}",
            x.len(),
            mean
        )));
    }

    let mut sum_u = 0.0;
    let mut sum_u2 = 0.0;
    let mut sum_u3 = 0.0;
    let mut sum_u4 = 0.0;
    let mut sum_y = 0.0;
    let mut sum_uy = 0.0;
    let mut sum_u2y = 0.0;
    for (&xi, &yi) in x.iter().zip(y) {
        let u = (xi - mean) / scale;
        let u2 = u * u;
        sum_u += u;
        sum_u2 += u2;
        sum_u3 += u2 * u;
        sum_u4 += u2 * u2;
        sum_y += yi;
        sum_uy += u * yi;
        sum_u2y += u2 * yi;
    }

    let denom = n * (sum_u2 * sum_u4 - sum_u3 * sum_u3) - sum_u * (sum_u * sum_u4 - sum_u2 * sum_u3)
        + sum_u2 * (sum_u * sum_u3 - sum_u2 * sum_u2);

    // The normal matrix is positive semi-definite, so its determinant is
    // bounded by the product of its diagonal.
    if denom.abs() <= 1e-12 * n * sum_u2 * sum_u4 {
        return Err(TimescanError::CalibrationFitFailure(
            "normal equations are singular (fewer than 3 distinct pixel values)".into(),
        ));
    }

    let a_u = (sum_y * (sum_u2 * sum_u4 - sum_u3 * sum_u3) - sum_u * (sum_uy * sum_u4 - sum_u2y * sum_u3)
        + sum_u2 * (sum_uy * sum_u3 - sum_u2y * sum_u2))
        / denom;
    let b_u = (n * (sum_uy * sum_u4 - sum_u2y * sum_u3) - sum_y * (sum_u * sum_u4 - sum_u2 * sum_u3)
        + sum_u2 * (sum_u * sum_u2y - sum_u2 * sum_uy))
        / denom;
    let c_u = (n * (sum_u2 * sum_u2y - sum_u3 * sum_uy) - sum_u * (sum_u * sum_u2y - sum_u2 * sum_uy)
        + sum_y * (sum_u * sum_u3 - sum_u2 * sum_u2))
        / denom;

    // u = (x - mean) / scale
    let a = a_u - b_u * mean / scale + c_u * mean * mean / (scale * scale);
    let b = b_u / scale - 2.0 * c_u * mean / (scale * scale);
    let c = c_u / (scale * scale);

    let coefficients = [a, b, c];
    if coefficients.iter().any(|v| !v.is_finite()) {
        return Err(TimescanError::CalibrationFitFailure(format!(
            "fit produced non-finite coefficients {:?}",
            coefficients
        )));
    }
    Ok(coefficients)
}

/// Fit quality over one pixel bin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BinnedError {
    /// Bin index, counted from the smallest pixel
    pub bin: usize,
    /// Samples in the bin
    pub count: usize,
    /// Mean pixel of the samples
    pub mean_pixel: f64,
    /// Mean fitted delay of the samples
    pub mean_fit: f64,
    /// Root-mean-square residual of the samples
    pub rmse: f64,
}

/// Goodness-of-fit summary.
#[derive(Debug, Clone, PartialEq)]
pub struct FitDiagnostics {
    /// Coefficient of determination
    pub r_squared: f64,
    /// Root-mean-square residual over all samples
    pub rmse: f64,
    /// Per-bin errors, ordered by bin; empty bins are omitted
    pub bins: Vec<BinnedError>,
}

/// R^2 and binned local RMSE of `coefficients` against `(x, y)`.
///
/// Samples fall in bin `floor((x - min(x)) / bin_size)`. When every `y` is
/// identical R^2 is 1 for a perfect fit and 0 otherwise.
pub fn fit_errors(
    x: &[f64],
    y: &[f64],
    coefficients: &[f64; 3],
    bin_size: f64,
) -> TsResult<FitDiagnostics> {
    if x.len() != y.len() || x.is_empty() {
        return Err(TimescanError::CalibrationInsufficientData(format!(
            "cannot evaluate fit on {} pixel / {} delay values",
            x.len(),
            y.len()
        )));
    }
    if !(bin_size > 0.0 && bin_size.is_finite()) {
        return Err(TimescanError::InvalidParameter(format!(
            "bin size must be positive, got {}",
            bin_size
        )));
    }

    let n = x.len() as f64;
    let y_mean = y.iter().sum::<f64>() / n;
    let fitted: Vec<f64> = x.iter().map(|&xi| evaluate(coefficients, xi)).collect();

    let ss_tot: f64 = y.iter().map(|yi| (yi - y_mean).powi(2)).sum();
    let ss_res: f64 = y.iter().zip(&fitted).map(|(yi, fi)| (yi - fi).powi(2)).sum();

    let r_squared = if ss_tot > 0.0 {
        1.0 - ss_res / ss_tot
    } else if ss_res <= f64::EPSILON * n * y_mean.abs().max(1.0).powi(2) {
        1.0
    } else {
        0.0
    };

    let x_min = x.iter().copied().fold(f64::INFINITY, f64::min);

    #[derive(Default)]
    struct Acc {
        count: usize,
        sum_x: f64,
        sum_fit: f64,
        sum_sq: f64,
    }

    let mut bins: BTreeMap<usize, Acc> = BTreeMap::new();
    for ((&xi, &yi), &fi) in x.iter().zip(y).zip(&fitted) {
        let index = ((xi - x_min) / bin_size).floor() as usize;
        let acc = bins.entry(index).or_default();
        acc.count += 1;
        acc.sum_x += xi;
        acc.sum_fit += fi;
        acc.sum_sq += (yi - fi).powi(2);
    }

    let bins = bins
        .into_iter()
        .map(|(bin, acc)| {
            let count = acc.count as f64;
            BinnedError {
                bin,
                count: acc.count,
                mean_pixel: acc.sum_x / count,
                mean_fit: acc.sum_fit / count,
                rmse: (acc.sum_sq / count).sqrt(),
            }
        })
        .collect();

    Ok(FitDiagnostics {
        r_squared,
        rmse: (ss_res / n).sqrt(),
        bins,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64, tol: f64) -> bool {
        (a - b).abs() <= tol
    }

    #[test]
    fn test_recovers_exact_quadratic() {
        let truth = [1.5e-3, -2.5e-6, 4.0e-10];
        let x: Vec<f64> = (0..50).map(|i| 100.0 + 15.0 * f64::from(i)).collect();
        let y: Vec<f64> = x.iter().map(|&xi| evaluate(&truth, xi)).collect();

        let coeffs = fit_quadratic(&x, &y).unwrap();
        for (&fit, &exp) in coeffs.iter().zip(&truth) {
            assert!(close(fit, exp, 1e-6 * exp.abs()), "{coeffs:?} vs {truth:?}");
        }

        let diag = fit_errors(&x, &y, &coeffs, 1.0).unwrap();
        assert!(close(diag.r_squared, 1.0, 1e-9));
        assert!(diag.rmse < 1e-12);
    }

    #[test]
    fn test_mean_predictor_has_zero_r_squared() {
        let x = [0.0, 1.0, 2.0, 3.0];
        let y = [1.0, 3.0, 2.0, 6.0];
        let mean = y.iter().sum::<f64>() / 4.0;
        let diag = fit_errors(&x, &y, &[mean, 0.0, 0.0], 1.0).unwrap();
        assert!(close(diag.r_squared, 0.0, 1e-12));
    }

    #[test]
    fn test_constant_y_r_squared() {
        let x = [0.0, 1.0, 2.0];
        let y = [2.0, 2.0, 2.0];
        assert_eq!(fit_errors(&x, &y, &[2.0, 0.0, 0.0], 1.0).unwrap().r_squared, 1.0);
        assert_eq!(fit_errors(&x, &y, &[2.5, 0.0, 0.0], 1.0).unwrap().r_squared, 0.0);
    }

    #[test]
    fn test_too_few_samples() {
        let err = fit_quadratic(&[1.0, 2.0], &[1.0, 2.0]).unwrap_err();
        assert!(matches!(err, TimescanError::CalibrationInsufficientData(_)));
    }

    #[test]
    fn test_identical_pixels_are_insufficient() {
        let err = fit_quadratic(&[4.0, 4.0, 4.0, 4.0], &[1.0, 2.0, 3.0, 4.0]).unwrap_err();
        assert!(matches!(err, TimescanError::CalibrationInsufficientData(_)));
    }

    #[test]
    fn test_two_distinct_pixels_are_singular() {
        let err = fit_quadratic(&[1.0, 1.0, 2.0, 2.0], &[1.0, 1.0, 2.0, 2.0]).unwrap_err();
        assert!(matches!(err, TimescanError::CalibrationFitFailure(_)));
    }

    #[test]
    fn test_clustered_pixels_with_outlier_fit() {
        // 1e5 samples over half a pixel, one far away: tiny but well-posed determinant
        let truth = [-1.25e-3, 2.5e-6, 1e-10];
        let mut x: Vec<f64> = (0..100_000)
            .map(|i| 500.0 + (i % 1000) as f64 / 1000.0 * 0.5)
            .collect();
        x.push(1000.0);
        let y: Vec<f64> = x.iter().map(|&p| evaluate(&truth, p)).collect();

        let [a, b, c] = fit_quadratic(&x, &y).unwrap();
        assert!(close(a, truth[0], 1e-6 * truth[0].abs()), "a {a}");
        assert!(close(b, truth[1], 1e-6 * truth[1]), "b {b}");
        assert!(close(c, truth[2], 1e-6 * truth[2]), "c {c}");
    }

    #[test]
    fn test_single_sample_bins_have_zero_rmse() {
        let truth = [0.0, 1.0, 0.0];
        let x = [0.0, 1.0, 2.0, 3.0];
        let y = [0.1, 1.0, 2.3, 3.0];
        let diag = fit_errors(&x, &y, &truth, 1.0).unwrap();
        assert_eq!(diag.bins.len(), 4);
        assert!(close(diag.bins[0].rmse, 0.1, 1e-12));
        assert_eq!(diag.bins[1].rmse, 0.0);
        assert_eq!(diag.bins[3].rmse, 0.0);
    }

    #[test]
    fn test_empty_bins_are_skipped() {
        let x = [0.0, 0.5, 10.0];
        let y = [0.0, 0.5, 10.0];
        let diag = fit_errors(&x, &y, &[0.0, 1.0, 0.0], 1.0).unwrap();
        assert_eq!(diag.bins.len(), 2);
        assert_eq!(diag.bins[0].bin, 0);
        assert_eq!(diag.bins[0].count, 2);
        assert!(close(diag.bins[0].mean_pixel, 0.25, 1e-12));
        assert_eq!(diag.bins[1].bin, 10);
        assert!(diag.bins.iter().all(|b| b.count > 0));
    }

    #[test]
    fn test_bad_bin_size() {
        assert!(fit_errors(&[0.0], &[0.0], &[0.0, 0.0, 0.0], 0.0).is_err());
    }
}
