use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::errors::AnalysisError;

pub const DEFAULT_MODEL_ID: &str = "local-hash-v1";
pub const DEFAULT_EMBEDDING_DIM: usize = 384;
pub const DEFAULT_NORMALIZATION: &str = "l2";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingModelConfig {
    pub model_id: String,
    pub dimensions: usize,
    pub normalization: String,
}

pub fn resolve_model_config(model_id: &str, dimensions: usize) -> EmbeddingModelConfig {
    let trimmed = model_id.trim();
    EmbeddingModelConfig {
        model_id: if trimmed.is_empty() {
            DEFAULT_MODEL_ID.to_string()
        } else {
            trimmed.to_string()
        },
        dimensions: dimensions.max(8),
        normalization: DEFAULT_NORMALIZATION.to_string(),
    }
}

/// Produces one fixed-dimension vector per input text, index aligned.
pub trait EmbeddingService {
    fn model_id(&self) -> &str;

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AnalysisError>;
}

/// Deterministic hashed bag-of-features embedder. Runs offline.
#[derive(Debug, Clone)]
pub struct LocalHashEmbedder {
    config: EmbeddingModelConfig,
}

impl LocalHashEmbedder {
    pub fn new(config: EmbeddingModelConfig) -> Self {
        Self { config }
    }
}

impl EmbeddingService for LocalHashEmbedder {
    fn model_id(&self) -> &str {
        &self.config.model_id
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AnalysisError> {
        Ok(texts
            .iter()
            .map(|text| embed_text_local(text, self.config.dimensions))
            .collect())
    }
}

/// Result of embedding a list of texts batch by batch. A failed batch leaves
/// `None` for each of its items and a message in `failures`.
#[derive(Debug, Default)]
pub struct EmbeddedTexts {
    pub vectors: Vec<Option<Vec<f32>>>,
    pub failures: Vec<String>,
}

impl EmbeddedTexts {
    pub fn failed_count(&self) -> usize {
        self.vectors.iter().filter(|value| value.is_none()).count()
    }
}

pub fn embed_in_batches(
    service: &dyn EmbeddingService,
    texts: &[String],
    batch_size: usize,
) -> EmbeddedTexts {
    let batch_size = batch_size.max(1);
    let mut out = EmbeddedTexts {
        vectors: Vec::with_capacity(texts.len()),
        failures: Vec::new(),
    };

    for (batch_index, batch) in texts.chunks(batch_size).enumerate() {
        let reply = service.embed(batch).and_then(|vectors| {
            if vectors.len() == batch.len() {
                Ok(vectors)
            } else {
                Err(AnalysisError::external(
                    service.model_id(),
                    format!(
                        "returned {} vectors for {} texts",
                        vectors.len(),
                        batch.len()
                    ),
                ))
            }
        });

        match reply {
            Ok(vectors) => out.vectors.extend(vectors.into_iter().map(Some)),
            Err(err) => {
                warn!(
                    model_id = %service.model_id(),
                    batch = batch_index,
                    items = batch.len(),
                    error = %err,
                    "embedding batch failed"
                );
                out.failures.push(format!("batch {batch_index}: {err}"));
                out.vectors.extend(batch.iter().map(|_| None));
            }
        }
    }

    out
}

pub fn normalize_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<&str>>().join(" ")
}

pub fn embed_text_local(payload: &str, dimensions: usize) -> Vec<f32> {
    let dims = dimensions.max(8);
    let mut vector = vec![0_f32; dims];
    let tokens = tokenize_payload(payload);

    if tokens.is_empty() {
        return vector;
    }

    for token in tokens {
        let hash = stable_hash(&token);
        let index = (hash as usize) % dims;
        let sign = if (hash >> 63) & 1 == 0 { 1.0 } else { -1.0 };
        let weight = 1.0 + (((hash >> 48) & 0xFF) as f32 / 255.0);
        vector[index] += sign * weight;
    }

    normalize_vector(&mut vector);
    vector
}

/// Cosine similarity in [-1, 1]; 0 for empty, zero-norm or mismatched
/// vectors.
pub fn cosine_similarity(left: &[f32], right: &[f32]) -> f64 {
    if left.len() != right.len() || left.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0_f64;
    let mut left_norm = 0.0_f64;
    let mut right_norm = 0.0_f64;
    for (left_value, right_value) in left.iter().zip(right) {
        let (l, r) = (f64::from(*left_value), f64::from(*right_value));
        dot += l * r;
        left_norm += l * l;
        right_norm += r * r;
    }

    if left_norm <= 0.0 || right_norm <= 0.0 {
        return 0.0;
    }

    (dot / (left_norm.sqrt() * right_norm.sqrt())).clamp(-1.0, 1.0)
}

/// Dense row-major similarity scores between two item lists.
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityMatrix {
    rows: usize,
    cols: usize,
    values: Vec<f64>,
}

impl SimilarityMatrix {
    #[cfg(test)]
    pub fn from_rows(rows: Vec<Vec<f64>>) -> Result<Self, AnalysisError> {
        let row_count = rows.len();
        let col_count = rows.first().map(Vec::len).unwrap_or(0);
        let mut values = Vec::with_capacity(row_count * col_count);
        for (index, row) in rows.into_iter().enumerate() {
            if row.len() != col_count {
                return Err(AnalysisError::shape(
                    format!("similarity row {index}"),
                    format!("{col_count} columns"),
                    format!("{} columns", row.len()),
                ));
            }
            values.extend(row);
        }
        Ok(Self {
            rows: row_count,
            cols: col_count,
            values,
        })
    }

    /// Pairwise cosine scores; a missing vector scores NaN against everything.
    pub fn cross(left: &[Option<Vec<f32>>], right: &[Option<Vec<f32>>]) -> Self {
        let mut values = Vec::with_capacity(left.len() * right.len());
        for left_vector in left {
            for right_vector in right {
                let score = match (left_vector, right_vector) {
                    (Some(l), Some(r)) => cosine_similarity(l, r),
                    _ => f64::NAN,
                };
                values.push(score);
            }
        }
        Self {
            rows: left.len(),
            cols: right.len(),
            values,
        }
    }

    /// Item-against-itself scores with the self-similarity diagonal zeroed.
    pub fn self_similarity(vectors: &[Option<Vec<f32>>]) -> Self {
        let mut matrix = Self::cross(vectors, vectors);
        matrix.zero_diagonal();
        matrix
    }

    pub fn zero_diagonal(&mut self) {
        for index in 0..self.rows.min(self.cols) {
            self.values[index * self.cols + index] = 0.0;
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn is_square(&self) -> bool {
        self.rows == self.cols
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.values[row * self.cols + col]
    }

    pub fn row(&self, row: usize) -> &[f64] {
        &self.values[row * self.cols..(row + 1) * self.cols]
    }
}

fn stable_hash(value: &str) -> u64 {
    let digest = Sha256::digest(value.as_bytes());
    let mut bytes = [0_u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}

fn tokenize_payload(payload: &str) -> Vec<String> {
    let normalized = normalize_whitespace(payload);
    if normalized.is_empty() {
        return Vec::new();
    }

    let words = normalized
        .split(' ')
        .map(|value| {
            value
                .chars()
                .filter(|character| character.is_alphanumeric())
                .flat_map(char::to_lowercase)
                .collect::<String>()
        })
        .filter(|value| !value.is_empty())
        .collect::<Vec<String>>();

    if words.is_empty() {
        return Vec::new();
    }

    let mut features = Vec::<String>::with_capacity(words.len() * 4);
    for (index, word) in words.iter().enumerate() {
        features.push(format!("w:{word}"));
        if let Some(next) = words.get(index + 1) {
            features.push(format!("b:{word}_{next}"));
        }
        let chars = word.chars().collect::<Vec<char>>();
        if chars.len() > 3 {
            for window in chars.windows(3) {
                features.push(format!("t:{}", window.iter().collect::<String>()));
            }
        }
    }
    features
}

fn normalize_vector(values: &mut [f32]) {
    let squared_norm = values
        .iter()
        .map(|value| f64::from(*value) * f64::from(*value))
        .sum::<f64>();

    if squared_norm <= 0.0 {
        return;
    }

    let norm = squared_norm.sqrt() as f32;
    if norm == 0.0 {
        return;
    }

    for value in values {
        *value /= norm;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ShortReplyService;

    impl EmbeddingService for ShortReplyService {
        fn model_id(&self) -> &str {
            "short-reply"
        }

        fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AnalysisError> {
            if texts.iter().any(|text| text == "poison") {
                return Ok(Vec::new());
            }
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    #[test]
    fn local_embedding_is_deterministic_and_normalized() {
        let first = embed_text_local("Heating boiler gas", 64);
        let second = embed_text_local("heating   BOILER gas", 64);
        assert_eq!(first, second);

        let norm = first.iter().map(|value| value * value).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
        assert!((cosine_similarity(&first, &second) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn related_labels_score_above_unrelated_ones() {
        let boiler = embed_text_local("heating boiler", 384);
        let boilers = embed_text_local("heating boilers gas", 384);
        let elevator = embed_text_local("passenger elevator", 384);

        assert!(cosine_similarity(&boiler, &boilers) > cosine_similarity(&boiler, &elevator));
    }

    #[test]
    fn cosine_handles_degenerate_vectors() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 0.0], &[-2.0, 0.0]) + 1.0).abs() < 1e-12);
    }

    #[test]
    fn self_similarity_has_zero_diagonal() {
        let vectors = vec![Some(vec![1.0, 0.0]), Some(vec![1.0, 0.0]), None];
        let matrix = SimilarityMatrix::self_similarity(&vectors);

        assert_eq!(matrix.rows(), 3);
        for index in 0..3 {
            assert_eq!(matrix.get(index, index), 0.0);
        }
        assert!((matrix.get(0, 1) - 1.0).abs() < 1e-12);
        assert!(matrix.get(0, 2).is_nan());
    }

    #[test]
    fn from_rows_rejects_ragged_input() {
        let result = SimilarityMatrix::from_rows(vec![vec![0.0, 1.0], vec![1.0]]);
        assert!(matches!(result, Err(AnalysisError::ShapeMismatch { .. })));
    }

    #[test]
    fn malformed_batches_are_marked_per_item() {
        let texts = ["a", "b", "poison", "c"]
            .iter()
            .map(|value| value.to_string())
            .collect::<Vec<_>>();

        let embedded = embed_in_batches(&ShortReplyService, &texts, 2);
        assert_eq!(embedded.vectors.len(), 4);
        assert!(embedded.vectors[0].is_some());
        assert!(embedded.vectors[1].is_some());
        assert!(embedded.vectors[2].is_none());
        assert!(embedded.vectors[3].is_none());
        assert_eq!(embedded.failed_count(), 2);
        assert_eq!(embedded.failures.len(), 1);
    }
}
