//! Pairwise cosine similarity over program embeddings

/// Norm floor that keeps zero vectors from dividing by zero.
pub const NORM_FLOOR: f64 = 1e-10;

/// Cosine-similarity matrix for `vectors`.
///
/// Each vector is scaled by `1 / max(‖v‖, NORM_FLOOR)` and
/// `matrix[i][j] = dot(v̂ᵢ, v̂ⱼ)`. Vectors of unequal length are compared
/// over their common prefix. Returns an empty matrix for fewer than two
/// vectors.
#[must_use]
pub fn cosine_matrix(vectors: &[Vec<f64>]) -> Vec<Vec<f64>> {
    if vectors.len() < 2 {
        return Vec::new();
    }

    let normalized: Vec<Vec<f64>> = vectors
        .iter()
        .map(|v| {
            let norm = v.iter().map(|x| x * x).sum::<f64>().sqrt().max(NORM_FLOOR);
            v.iter().map(|x| x / norm).collect()
        })
        .collect();

    let n = normalized.len();
    let mut matrix = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in i..n {
            let dot: f64 = normalized[i]
                .iter()
                .zip(&normalized[j])
                .map(|(a, b)| a * b)
                .sum();
            matrix[i][j] = dot;
            matrix[j][i] = dot;
        }
    }
    matrix
}
