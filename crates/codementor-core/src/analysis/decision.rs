use std::sync::LazyLock;

use regex::Regex;

static TOP_K_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\btop[\s_-]?k\b\D{0,20}?(\d+)").unwrap());
static TOP_N_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\btop[\s_-]?n\b\D{0,20}?(\d+)").unwrap());

const CODEBASE_PHRASES: [&str; 3] = ["in my codebase", "in my code", "in my project"];

/// Bounds for the retrieval sizes a decision may recommend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrievalLimits {
    pub default_top_k: usize,
    pub default_top_n: usize,
    pub max_top_k: usize,
}

impl Default for RetrievalLimits {
    fn default() -> Self {
        Self {
            default_top_k: 20,
            default_top_n: 10,
            max_top_k: 100,
        }
    }
}

impl RetrievalLimits {
    /// Clamp recommended sizes into `[1, max_top_k]` with `top_n <= top_k`.
    #[must_use]
    pub fn resolve(&self, top_k: Option<usize>, top_n: Option<usize>) -> (usize, usize) {
        let max = self.max_top_k.max(1);
        let top_k = top_k.unwrap_or(self.default_top_k).clamp(1, max);
        let top_n = top_n.unwrap_or(self.default_top_n).clamp(1, max).min(top_k);
        (top_k, top_n)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RagDecision {
    pub use_rag: bool,
    pub reasoning: String,
    pub top_k: usize,
    pub top_n: usize,
}

fn mentions_codebase(text: &str) -> bool {
    let lower = text.to_lowercase();
    CODEBASE_PHRASES.iter().any(|p| lower.contains(p))
}

fn capture(re: &Regex, text: &str) -> Option<usize> {
    re.captures(text)?.get(1)?.as_str().parse().ok()
}

/// Interpret a free-text retrieval decision.
///
/// Retrieval is skipped only when the reply opens with `False` and neither
/// query refers to the user's own code. Anything else, including an
/// unreadable reply, keeps retrieval on.
#[must_use]
pub fn parse_decision(
    reply: &str,
    original_query: &str,
    reformulated_query: &str,
    limits: &RetrievalLimits,
) -> RagDecision {
    let first = reply
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .trim_matches(|c: char| !c.is_alphanumeric());
    let declined = first.eq_ignore_ascii_case("false");
    let use_rag =
        !declined || mentions_codebase(original_query) || mentions_codebase(reformulated_query);

    let (top_k, top_n) = limits.resolve(capture(&TOP_K_RE, reply), capture(&TOP_N_RE, reply));
    RagDecision {
        use_rag,
        reasoning: reply.trim().to_owned(),
        top_k,
        top_n,
    }
}
