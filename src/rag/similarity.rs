/// Cosine similarity of two embeddings, computed in double precision.
///
/// Returns 0.0 when either vector has zero norm. When lengths differ, the
/// dot product covers the common prefix while each norm covers its whole
/// vector; mixing embedding models makes the score meaningless anyway.
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    let dot: f64 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b = b.iter().map(|y| y * y).sum::<f64>().sqrt();
    let denom = norm_a * norm_b;
    if denom == 0.0 || !denom.is_finite() {
        return 0.0;
    }
    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-12;

    #[test]
    fn identical_vectors() {
        let v = [0.3, -1.2, 4.5, 0.0, 2.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < EPS);
    }

    #[test]
    fn orthogonal_vectors() {
        assert!(cosine_similarity(&[1.0, 0.0, 0.0], &[0.0, 3.0, 0.0]).abs() < EPS);
        assert!(cosine_similarity(&[1.0, 1.0], &[1.0, -1.0]).abs() < EPS);
    }

    #[test]
    fn opposite_vectors() {
        assert!((cosine_similarity(&[1.0, 2.0], &[-2.0, -4.0]) + 1.0).abs() < EPS);
    }

    #[test]
    fn zero_vector_scores_zero() {
        let v = [0.5, 0.25, 1.0];
        assert_eq!(cosine_similarity(&v, &[0.0, 0.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0, 0.0], &v), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn magnitude_does_not_matter() {
        let a = [1.0, 2.0, 3.0];
        let b = [10.0, 20.0, 30.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < EPS);
    }
}
