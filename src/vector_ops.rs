use crate::config::Number;
use wide::f64x4;

/// Squared Euclidean distance between two vectors using SIMD operations.
/// Returns `None` when the lengths differ.
pub fn squared_euclidean_simd(a: &[Number], b: &[Number]) -> Option<Number> {
    if a.len() != b.len() {
        return None;
    }

    let mut acc = f64x4::splat(0.0);

    let len = a.len();
    let simd_len = len - (len % 4);

    for i in (0..simd_len).step_by(4) {
        let va = f64x4::new([a[i], a[i + 1], a[i + 2], a[i + 3]]);
        let vb = f64x4::new([b[i], b[i + 1], b[i + 2], b[i + 3]]);
        let diff = va - vb;
        acc += diff * diff;
    }

    let mut sum = acc.reduce_add();

    // Handle remaining elements
    for i in simd_len..len {
        let diff = a[i] - b[i];
        sum += diff * diff;
    }

    Some(sum)
}

/// Dot product using SIMD operations. Returns `None` when the lengths differ.
pub fn dot_simd(a: &[Number], b: &[Number]) -> Option<Number> {
    if a.len() != b.len() {
        return None;
    }

    let mut acc = f64x4::splat(0.0);

    let len = a.len();
    let simd_len = len - (len % 4);

    for i in (0..simd_len).step_by(4) {
        let va = f64x4::new([a[i], a[i + 1], a[i + 2], a[i + 3]]);
        let vb = f64x4::new([b[i], b[i + 1], b[i + 2], b[i + 3]]);
        acc += va * vb;
    }

    let mut sum = acc.reduce_add();
    for i in simd_len..len {
        sum += a[i] * b[i];
    }

    Some(sum)
}

/// Euclidean distance. Falls back to a rescaled sum when the squared sum
/// overflows, so any pair of finite vectors gets a finite answer.
pub fn euclidean_distance(a: &[Number], b: &[Number]) -> Option<Number> {
    let squared = squared_euclidean_simd(a, b)?;
    if squared.is_finite() {
        return Some(squared.sqrt());
    }

    let largest = a
        .iter()
        .zip(b)
        .map(|(x, y)| (x - y).abs())
        .fold(0.0, Number::max);
    if !largest.is_finite() {
        return Some(largest);
    }
    let sum: Number = a
        .iter()
        .zip(b)
        .map(|(x, y)| {
            let d = (x - y) / largest;
            d * d
        })
        .sum();
    Some(largest * sum.sqrt())
}

/// Index of the closest centroid. Ties resolve to the lowest index.
///
/// Centroids are ranked by `|c|^2 - 2 x.c`, which orders them the same way
/// as the squared distance but drops the `|x|^2` term that would swamp the
/// difference for rows far from every centroid. Returns `None` on a length
/// mismatch or when a score is not finite.
pub fn nearest_centroid(vector: &[Number], centroids: &[Vec<Number>]) -> Option<usize> {
    let mut best: Option<(usize, Number)> = None;
    for (idx, centroid) in centroids.iter().enumerate() {
        let score = dot_simd(centroid, centroid)? - 2.0 * dot_simd(vector, centroid)?;
        if !score.is_finite() {
            return None;
        }
        match best {
            Some((_, best_score)) if score >= best_score => {}
            _ => best = Some((idx, score)),
        }
    }
    best.map(|(idx, _)| idx)
}

/// Monotonic map from a centroid distance onto `(0, 1]`. Not a probability.
pub fn distance_to_confidence(distance: Number) -> Number {
    1.0 / (1.0 + distance)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_squared_distance_full_lane() {
        let a = [1.0; 8];
        let b = [0.0; 8];
        assert_eq!(squared_euclidean_simd(&a, &b), Some(8.0));
    }

    #[test]
    fn test_squared_distance_with_remainder() {
        let a = [3.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 4.0];
        let b = [0.0; 10];
        assert_eq!(squared_euclidean_simd(&a, &b), Some(25.0));
        assert_eq!(euclidean_distance(&a, &b), Some(5.0));
    }

    #[test]
    fn test_dot_product() {
        let a = [1.0, 2.0, 3.0, 4.0, 5.0];
        let b = [2.0, 0.0, 1.0, 0.0, 2.0];
        assert_eq!(dot_simd(&a, &b), Some(15.0));
        assert_eq!(dot_simd(&a, &b[..4]), None);
    }

    #[test]
    fn test_distance_survives_overflowing_squares() {
        let d = euclidean_distance(&[3.0e200, 4.0e200], &[0.0, 0.0]).unwrap();
        assert!(d.is_finite());
        assert!((d / 5.0e200 - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_length_mismatch() {
        assert_eq!(squared_euclidean_simd(&[1.0, 2.0], &[1.0]), None);
    }

    #[test]
    fn test_nearest_centroid() {
        let centroids = vec![vec![0.0, 0.0], vec![10.0, 10.0], vec![-5.0, 5.0]];
        assert_eq!(nearest_centroid(&[9.0, 8.0], &centroids), Some(1));
        assert_eq!(nearest_centroid(&[-4.0, 4.0], &centroids), Some(2));
        assert_eq!(nearest_centroid(&[0.1, -0.1], &centroids), Some(0));
    }

    #[test]
    fn test_nearest_centroid_tie_takes_lowest_index() {
        let centroids = vec![vec![-1.0], vec![1.0]];
        assert_eq!(nearest_centroid(&[0.0], &centroids), Some(0));
    }

    #[test]
    fn test_nearest_centroid_far_rows() {
        let centroids = vec![vec![1.0, 1.0], vec![-1.0, -1.0]];
        assert_eq!(nearest_centroid(&[-5.0e36, 0.0], &centroids), Some(1));
        assert_eq!(nearest_centroid(&[5.0e36, 0.0], &centroids), Some(0));
        assert_eq!(nearest_centroid(&[-1.0e200, 3.0], &centroids), Some(1));
        assert_eq!(nearest_centroid(&[Number::INFINITY, 0.0], &centroids), None);
        assert_eq!(nearest_centroid(&[Number::MAX, 0.0], &centroids), None);
    }

    #[test]
    fn test_nearest_centroid_empty() {
        assert_eq!(nearest_centroid(&[1.0], &[]), None);
    }

    #[test]
    fn test_confidence_range() {
        assert_eq!(distance_to_confidence(0.0), 1.0);
        assert!((distance_to_confidence(1.0) - 0.5).abs() < 1e-6);
        assert!(distance_to_confidence(1000.0) > 0.0);
        assert!(distance_to_confidence(5.0e36) > 0.0);
    }
}
