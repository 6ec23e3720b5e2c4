use common::{Error, Result, Template};

use crate::encoder::Encoding;

/// Cosine similarity of two equal-length vectors rescaled from `[-1, 1]` to
/// `[0, 100]`. A zero-magnitude vector on either side scores 0.
pub fn similarity(window: &[f64], weights: &[f64]) -> Result<f64> {
    if window.len() != weights.len() {
        return Err(Error::VectorLengthMismatch {
            left: window.len(),
            right: weights.len(),
        });
    }

    let (dot, norm_a, norm_b) = window
        .iter()
        .zip(weights)
        .fold((0.0, 0.0, 0.0), |(dot, na, nb), (&a, &b)| {
            (dot + a * b, na + a * a, nb + b * b)
        });

    if norm_a == 0.0 || norm_b == 0.0 {
        return Ok(0.0);
    }

    let cosine = dot / (norm_a.sqrt() * norm_b.sqrt());
    Ok(((cosine + 1.0) * 50.0).clamp(0.0, 100.0))
}

/// Score an encoded window against a template's weight matrix.
///
/// The grid shapes must agree exactly; candidates of another shape are meant
/// to be filtered out before this is called.
pub fn score_template(encoding: &Encoding, template: &Template) -> Result<f64> {
    if encoding.grid != template.grid {
        return Err(Error::GridShapeMismatch {
            expected: template.grid,
            got: encoding.grid,
        });
    }
    similarity(&encoding.indicator, &template.weights)
}
