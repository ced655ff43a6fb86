//! Scalar vector math over `f32` cells with `f64` accumulation.
//!
//! Scores and norms accumulate in `f64` so that hundreds of columns of
//! `f32` cells do not lose low-order bits; the tight loops are written so
//! LLVM auto-vectorizes them.

/// Dot product. For unit vectors this equals their cosine similarity.
#[inline]
pub fn dot(a: &[f32], b: &[f32]) -> f64 {
    debug_assert_eq!(a.len(), b.len());
    a.iter()
        .zip(b)
        .map(|(&x, &y)| f64::from(x) * f64::from(y))
        .sum()
}

/// Squared Euclidean distance. No square root; ordering is preserved.
#[inline]
pub fn squared_distance(a: &[f32], b: &[f32]) -> f64 {
    debug_assert_eq!(a.len(), b.len());
    a.iter()
        .zip(b)
        .map(|(&x, &y)| {
            let delta = f64::from(x) - f64::from(y);
            delta * delta
        })
        .sum()
}

/// Euclidean norm.
#[inline]
pub fn norm(v: &[f32]) -> f64 {
    v.iter().map(|&x| f64::from(x) * f64::from(x)).sum::<f64>().sqrt()
}

/// Scale `v` to unit length in place. A vector with exactly zero norm is
/// left untouched.
pub fn normalize(v: &mut [f32]) {
    let norm = norm(v);
    if norm == 0.0 {
        return;
    }
    for value in v {
        *value = (f64::from(*value) / norm) as f32;
    }
}
