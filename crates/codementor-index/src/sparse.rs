//! Local BM25 sparse encoder for the lexical half of hybrid search.
//!
//! Terms hash into a 32-bit index space (first four bytes of BLAKE3), so the
//! encoder needs no vocabulary and document and query vectors line up by
//! construction.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::SparseVector;

const DEFAULT_K1: f32 = 1.2;
const DEFAULT_B: f32 = 0.75;
const DEFAULT_AVGDL: f32 = 64.0;

/// BM25 parameters, optionally fitted on a corpus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bm25Params {
    #[serde(default = "default_k1")]
    pub k1: f32,
    #[serde(default = "default_b")]
    pub b: f32,
    #[serde(default = "default_avgdl")]
    pub avgdl: f32,
    #[serde(default)]
    pub n_docs: u64,
    /// Document frequency per term index.
    #[serde(default)]
    pub doc_freq: HashMap<u32, u64>,
}

fn default_k1() -> f32 {
    DEFAULT_K1
}

fn default_b() -> f32 {
    DEFAULT_B
}

fn default_avgdl() -> f32 {
    DEFAULT_AVGDL
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self {
            k1: DEFAULT_K1,
            b: DEFAULT_B,
            avgdl: DEFAULT_AVGDL,
            n_docs: 0,
            doc_freq: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Bm25Encoder {
    params: Bm25Params,
}

impl Bm25Encoder {
    #[must_use]
    pub fn new(params: Bm25Params) -> Self {
        Self { params }
    }

    /// Load parameters previously written with [`Bm25Encoder::save`].
    ///
    /// # Errors
    ///
    /// Returns `Io` or `Json` if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let params: Bm25Params = serde_json::from_str(&raw)?;
        Ok(Self::new(params))
    }

    /// # Errors
    ///
    /// Returns `Io` if the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        let raw = serde_json::to_string(&self.params)?;
        std::fs::write(path, raw)?;
        Ok(())
    }

    /// Compute average length and document frequencies from `corpus`.
    #[must_use]
    pub fn fit<S: AsRef<str>>(corpus: &[S]) -> Self {
        let mut doc_freq: HashMap<u32, u64> = HashMap::new();
        let mut total_len = 0usize;
        for doc in corpus {
            let counts = term_counts(doc.as_ref());
            total_len += counts.values().map(|c| *c as usize).sum::<usize>();
            for index in counts.keys() {
                *doc_freq.entry(*index).or_default() += 1;
            }
        }
        let n_docs = corpus.len();
        #[allow(clippy::cast_precision_loss)]
        let avgdl = if n_docs == 0 || total_len == 0 {
            DEFAULT_AVGDL
        } else {
            total_len as f32 / n_docs as f32
        };
        Self::new(Bm25Params {
            avgdl,
            n_docs: n_docs as u64,
            doc_freq,
            ..Bm25Params::default()
        })
    }

    #[must_use]
    pub fn params(&self) -> &Bm25Params {
        &self.params
    }

    /// BM25 term-frequency weights for a stored document.
    #[must_use]
    pub fn encode_document(&self, text: &str) -> SparseVector {
        let counts = term_counts(text);
        let doc_len: u32 = counts.values().sum();
        let Bm25Params { k1, b, avgdl, .. } = self.params;
        #[allow(clippy::cast_precision_loss)]
        let norm = k1 * (1.0 - b + b * doc_len as f32 / avgdl.max(f32::EPSILON));
        let mut vector = SparseVector::default();
        for (index, tf) in counts {
            #[allow(clippy::cast_precision_loss)]
            let tf = tf as f32;
            vector.indices.push(index);
            vector.values.push(tf * (k1 + 1.0) / (tf + norm));
        }
        vector
    }

    #[must_use]
    pub fn encode_documents<S: AsRef<str>>(&self, texts: &[S]) -> Vec<SparseVector> {
        texts
            .iter()
            .map(|t| self.encode_document(t.as_ref()))
            .collect()
    }

    /// Query weights: IDF when fitted, normalized term frequency otherwise.
    #[must_use]
    pub fn encode_query(&self, text: &str) -> SparseVector {
        let counts = term_counts(text);
        let fitted = self.params.n_docs > 0 && !self.params.doc_freq.is_empty();
        #[allow(clippy::cast_precision_loss)]
        let weights: Vec<(u32, f32)> = counts
            .iter()
            .map(|(index, tf)| {
                let weight = if fitted {
                    let n = self.params.n_docs as f32;
                    let df = self.params.doc_freq.get(index).copied().unwrap_or(0) as f32;
                    ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
                } else {
                    *tf as f32
                };
                (*index, weight)
            })
            .collect();
        let total: f32 = weights.iter().map(|(_, w)| w).sum();
        let mut vector = SparseVector::default();
        if total <= 0.0 {
            return vector;
        }
        for (index, weight) in weights {
            vector.indices.push(index);
            vector.values.push(weight / total);
        }
        vector
    }
}

/// Lowercase runs of alphanumerics and underscores.
fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

fn term_index(term: &str) -> u32 {
    let hash = blake3::hash(term.as_bytes());
    let bytes = hash.as_bytes();
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Sorted, unique term indices with their counts.
fn term_counts(text: &str) -> BTreeMap<u32, u32> {
    let mut counts = BTreeMap::new();
    for term in tokenize(text) {
        *counts.entry(term_index(&term)).or_insert(0) += 1;
    }
    counts
}
