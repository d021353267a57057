// crates/vlt-server/src/vector.rs
// Pure vector arithmetic: blob serialization, cosine similarity, top-k ranking

/// Embedding dimensions produced by the default embedding model.
pub const EMBEDDING_DIM: usize = 1536;

/// Serialize a vector as little-endian packed f32 bytes.
pub fn embedding_to_bytes(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for v in vector {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Deserialize little-endian packed f32 bytes back into a vector.
///
/// Trailing bytes that do not form a full f32 are ignored.
pub fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Cosine similarity between two vectors. Returns 0.0 when either norm is
/// zero or the lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Rank candidates by cosine similarity to the query, descending, top-k.
///
/// Candidates with an empty blob are skipped.
pub fn search_memory(
    query: &[f32],
    candidates: &[(String, Vec<u8>)],
    top_k: usize,
) -> Vec<(String, f32)> {
    let mut results: Vec<(String, f32)> = candidates
        .iter()
        .filter(|(_, blob)| !blob.is_empty())
        .map(|(id, blob)| {
            let vec = bytes_to_embedding(blob);
            (id.clone(), cosine_similarity(query, &vec))
        })
        .collect();

    results.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    results.truncate(top_k);
    results
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_roundtrip_unit_vector() {
        // 1536-float unit vector survives the blob roundtrip within 1e-6
        let dim = EMBEDDING_DIM;
        let raw: Vec<f32> = (0..dim).map(|i| ((i % 13) as f32) - 6.0).collect();
        let norm: f32 = raw.iter().map(|v| v * v).sum::<f32>().sqrt();
        let unit: Vec<f32> = raw.iter().map(|v| v / norm).collect();

        let bytes = embedding_to_bytes(&unit);
        assert_eq!(bytes.len(), dim * 4);

        let back = bytes_to_embedding(&bytes);
        assert_eq!(back.len(), dim);
        for (a, b) in unit.iter().zip(back.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_cosine_zero_norm() {
        let zero = vec![0.0f32; 4];
        let other = vec![1.0f32, 0.0, 0.0, 0.0];
        assert_eq!(cosine_similarity(&zero, &other), 0.0);
        assert_eq!(cosine_similarity(&other, &zero), 0.0);
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![0.5f32, 0.5, 0.5, 0.5];
        let sim = cosine_similarity(&v, &v);
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = vec![1.0f32, 0.0];
        let b = vec![0.0f32, 1.0];
        assert!((cosine_similarity(&a, &b)).abs() < 1e-6);
    }

    #[test]
    fn test_search_memory_top_k() {
        let query = vec![1.0f32, 0.0];
        let candidates = vec![
            ("exact".to_string(), embedding_to_bytes(&[1.0, 0.0])),
            ("orthogonal".to_string(), embedding_to_bytes(&[0.0, 1.0])),
            ("close".to_string(), embedding_to_bytes(&[0.9, 0.1])),
            ("empty".to_string(), Vec::new()),
        ];

        let results = search_memory(&query, &candidates, 2);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, "exact");
        assert_eq!(results[1].0, "close");
    }
}
