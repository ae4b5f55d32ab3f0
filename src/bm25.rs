//! Keyword scoring for hybrid search.
//!
//! Used only when the hybrid weight is below 1.0: each candidate passage's
//! text is scored against the query with a BM25-style term-overlap function
//! and fused with the vector similarity. The scorer sees one text at a time
//! (it is a collaborator, not an inverted index), so term saturation and
//! length normalization apply but corpus-level IDF does not.

/// Keyword-scoring collaborator.
pub trait KeywordScorer: Send + Sync {
    /// Score `text` against `query`; higher is better, 0.0 means no overlap.
    fn score(&self, query: &str, text: &str) -> f64;
}

/// BM25-style scorer: per-term frequency saturation with document-length
/// normalization.
#[derive(Debug, Clone)]
pub struct Bm25Scorer {
    /// Term-frequency saturation (BM25 `k1`).
    pub k1: f64,
    /// Length-normalization strength (BM25 `b`).
    pub b: f64,
    /// Expected document length in tokens, standing in for the corpus
    /// average a full inverted index would maintain.
    pub avg_len: f64,
}

impl Default for Bm25Scorer {
    fn default() -> Self {
        Self {
            k1: 1.2,
            b: 0.75,
            avg_len: 64.0,
        }
    }
}

/// Lowercased alphanumeric tokens.
fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

impl KeywordScorer for Bm25Scorer {
    fn score(&self, query: &str, text: &str) -> f64 {
        let query_terms = tokenize(query);
        if query_terms.is_empty() {
            return 0.0;
        }
        let doc_terms = tokenize(text);
        if doc_terms.is_empty() {
            return 0.0;
        }

        let doc_len = doc_terms.len() as f64;
        let norm = 1.0 - self.b + self.b * doc_len / self.avg_len;

        let mut score = 0.0;
        let mut seen: Vec<&str> = Vec::new();
        for term in &query_terms {
            // Repeated query terms contribute once.
            if seen.contains(&term.as_str()) {
                continue;
            }
            seen.push(term);
            let tf = doc_terms.iter().filter(|t| *t == term).count() as f64;
            if tf > 0.0 {
                score += tf * (self.k1 + 1.0) / (tf + self.k1 * norm);
            }
        }
        score
    }
}
