use wellspring_core::constants::{EMBED_DIM, EMBED_SEED};

/// An embedding model. Neural adapters implement this behind the same
/// interface; the deterministic fallback below is always available.
pub trait Embedder: Send + Sync {
    /// Model identifier recorded in index configuration thoughts.
    fn id(&self) -> &str;

    fn dim(&self) -> usize;

    fn embed(&self, text: &str) -> Vec<f32>;
}

/// Deterministic fallback embedder: tokenizes text into words plus character
/// 2- and 3-grams, projects each token's seeded BLAKE3 stream into a dense
/// accumulator, and L2-normalizes. Partial token overlap yields partial
/// cosine similarity, and any two implementations sharing the seed produce
/// identical vectors.
pub struct HashEmbedder {
    dim: usize,
    seed: u64,
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self { dim: EMBED_DIM, seed: EMBED_SEED }
    }
}

impl HashEmbedder {
    pub fn new(dim: usize, seed: u64) -> Self {
        Self { dim, seed }
    }

    fn tokens(text: &str) -> Vec<String> {
        let mut out = Vec::new();
        for word in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            out.push(word.to_string());
            let chars: Vec<char> = word.chars().collect();
            for n in [2usize, 3] {
                if chars.len() < n {
                    continue;
                }
                for window in chars.windows(n) {
                    out.push(window.iter().collect());
                }
            }
        }
        out
    }

    fn project(&self, token: &str, acc: &mut [f32]) {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.seed.to_le_bytes());
        hasher.update(token.as_bytes());
        let mut reader = hasher.finalize_xof();
        let mut buf = vec![0u8; self.dim];
        reader.fill(&mut buf);
        for (slot, byte) in acc.iter_mut().zip(buf) {
            *slot += (byte as f32 - 127.5) / 127.5;
        }
    }
}

impl Embedder for HashEmbedder {
    fn id(&self) -> &str {
        "hash-ngram/1"
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn embed(&self, text: &str) -> Vec<f32> {
        let mut acc = vec![0f32; self.dim];
        for token in Self::tokens(text) {
            self.project(&token, &mut acc);
        }
        let norm = acc.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut acc {
                *x /= norm;
            }
        }
        acc
    }
}

/// Cosine similarity of two equal-length vectors. Unit-normalized inputs
/// reduce this to a dot product, but the denominator guards mixed callers.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    f64::from(dot / (na * nb))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedding_is_deterministic() {
        let a = HashEmbedder::default();
        let b = HashEmbedder::default();
        assert_eq!(a.embed("bloom filters enable sync"), b.embed("bloom filters enable sync"));
    }

    #[test]
    fn different_seeds_differ() {
        let a = HashEmbedder::new(64, 1);
        let b = HashEmbedder::new(64, 2);
        assert_ne!(a.embed("same text"), b.embed("same text"));
    }

    #[test]
    fn vectors_are_unit_length() {
        let e = HashEmbedder::default();
        let v = e.embed("content addressed thoughts");
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[test]
    fn overlap_scores_higher_than_unrelated() {
        let e = HashEmbedder::default();
        let query = e.embed("trust graph vouch revocation");
        let near = e.embed("revocation of a vouch in the trust graph");
        let far = e.embed("quarterly croissant procurement memo");
        assert!(cosine_similarity(&query, &near) > cosine_similarity(&query, &far));
    }

    #[test]
    fn empty_text_is_zero_vector() {
        let e = HashEmbedder::default();
        let v = e.embed("");
        assert!(v.iter().all(|x| *x == 0.0));
        assert_eq!(cosine_similarity(&v, &v), 0.0);
    }
}
