//! Shared vocabulary for the whole pipeline.
//!
//! The synonym table and stopword list are used identically by the entity
//! resolver, the knowledge retriever's lexical filter and the tool
//! guardrails. They live here as a single lookup to avoid drift between
//! components.

/// Canonical product term -> surface-form aliases (cross-lingual, typo tolerant).
const SYNONYMS: &[(&str, &[&str])] = &[
    ("cá hồi", &["ca hoi", "salmon", "cá hồi na uy", "phi lê cá hồi"]),
    ("cá thu", &["ca thu", "mackerel", "cá thu nhật"]),
    ("thịt bò", &["thit bo", "beef", "bò mỹ", "bò úc", "bò"]),
    ("thịt heo", &["thit heo", "pork", "thịt lợn", "heo", "ba chỉ"]),
    ("gà", &["ga", "chicken", "thịt gà", "gà ta", "đùi gà"]),
    ("tôm", &["tom", "shrimp", "tôm sú", "tôm thẻ"]),
    ("mực", &["muc", "squid", "mực ống", "mực lá"]),
    ("trứng", &["trung", "egg", "trứng gà", "trứng vịt"]),
    ("rau củ", &["rau cu", "vegetable", "rau", "củ quả", "rau xanh"]),
    ("sữa", &["sua", "milk", "sữa tươi", "sữa bò"]),
    ("nước mắm", &["nuoc mam", "fish sauce", "mắm"]),
];

/// Tokens carrying no product information. Stripped before entity extraction
/// and before the lexical relevance filter.
const STOPWORDS: &[&str] = &[
    "tôi", "toi", "mình", "minh", "muốn", "muon", "cần", "can", "mua", "xem",
    "tìm", "tim", "cho", "hình", "hinh", "ảnh", "anh", "của", "cua", "và",
    "va", "là", "la", "có", "co", "không", "khong", "gì", "gi", "bao",
    "nhiêu", "nhieu", "giá", "gia", "shop", "ơi", "oi", "nhé", "nhe", "với",
    "voi", "này", "nay", "the", "a", "an", "of", "i", "me", "my", "want",
    "to", "buy", "show", "find", "image", "picture", "photo", "please",
    "with", "for", "how", "much", "is",
];

/// Keyword family marking statistics/reporting vocabulary. Used by the
/// router's sub-query decomposition.
const STATISTIC_TERMS: &[&str] = &[
    "doanh", "thu", "thống", "kê", "thong", "ke", "báo", "cáo", "bao", "cao",
    "theo", "tháng", "thang", "quý", "quy", "năm", "nam", "tổng", "tong",
    "revenue", "sales", "statistics", "report", "month", "monthly", "total",
    "quarter", "by",
];

/// Keyword family marking product-search vocabulary.
const PRODUCT_TERMS: &[&str] = &[
    "sản", "phẩm", "san", "pham", "món", "mon", "đặt", "dat", "product",
    "dish", "item", "order",
];

/// Single-source-of-truth lookup over the embedded vocabulary tables.
#[derive(Debug, Default, Clone)]
pub struct Lexicon;

impl Lexicon {
    pub fn new() -> Self {
        Self
    }

    /// Lowercase and strip punctuation, collapsing whitespace.
    pub fn normalize(&self, text: &str) -> String {
        let lowered = text.to_lowercase();
        let cleaned: String = lowered
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { ' ' })
            .collect();
        cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    pub fn is_stopword(&self, token: &str) -> bool {
        STOPWORDS.contains(&token)
    }

    pub fn is_statistic_term(&self, token: &str) -> bool {
        STATISTIC_TERMS.contains(&token)
    }

    pub fn is_product_term(&self, token: &str) -> bool {
        PRODUCT_TERMS.contains(&token)
    }

    /// Normalized tokens of `text`.
    pub fn tokens(&self, text: &str) -> Vec<String> {
        self.normalize(text)
            .split_whitespace()
            .map(|t| t.to_string())
            .collect()
    }

    /// Normalized tokens with stopwords removed.
    pub fn content_tokens(&self, text: &str) -> Vec<String> {
        self.tokens(text)
            .into_iter()
            .filter(|t| !self.is_stopword(t))
            .collect()
    }

    /// Map a phrase onto its canonical synonym-table key.
    ///
    /// A phrase matches a canonical entry when it equals the canonical term
    /// or one of its aliases, or when a substring relation holds in either
    /// direction. Returns `None` when no entry is related.
    pub fn canonical_for(&self, phrase: &str) -> Option<&'static str> {
        let phrase = self.normalize(phrase);
        if phrase.is_empty() {
            return None;
        }
        for (canonical, aliases) in SYNONYMS {
            if *canonical == phrase {
                return Some(canonical);
            }
            for alias in *aliases {
                if *alias == phrase {
                    return Some(canonical);
                }
            }
        }
        // Substring relation, canonical terms first so "phi lê cá hồi tươi"
        // still resolves to "cá hồi".
        for (canonical, aliases) in SYNONYMS {
            if phrase.contains(canonical) || canonical.contains(phrase.as_str()) {
                return Some(canonical);
            }
            for alias in *aliases {
                if phrase.contains(alias) || alias.contains(phrase.as_str()) {
                    return Some(canonical);
                }
            }
        }
        None
    }

    /// Map a phrase onto a canonical key by fuzzy overlap: the best entry
    /// whose canonical term or alias reaches `threshold` token ratio.
    pub fn fuzzy_canonical_for(&self, phrase: &str, threshold: f32) -> Option<&'static str> {
        let phrase = self.normalize(phrase);
        if phrase.is_empty() {
            return None;
        }
        let mut best: Option<(&'static str, f32)> = None;
        for (canonical, aliases) in SYNONYMS {
            let mut ratio = self.token_ratio(&phrase, canonical);
            for alias in *aliases {
                ratio = ratio.max(self.token_ratio(&phrase, alias));
            }
            if ratio >= threshold && best.is_none_or(|(_, b)| ratio > b) {
                best = Some((canonical, ratio));
            }
        }
        best.map(|(canonical, _)| canonical)
    }

    /// True when `phrase` and `product_name` resolve to the same canonical
    /// synonym-table entry.
    pub fn synonym_match(&self, phrase: &str, product_name: &str) -> bool {
        match (self.canonical_for(phrase), self.canonical_for(product_name)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    /// Normalized Levenshtein similarity in [0, 1].
    pub fn token_ratio(&self, a: &str, b: &str) -> f32 {
        let a = self.normalize(a);
        let b = self.normalize(b);
        if a.is_empty() && b.is_empty() {
            return 1.0;
        }
        let max_len = a.chars().count().max(b.chars().count());
        if max_len == 0 {
            return 1.0;
        }
        let dist = levenshtein(&a, &b);
        1.0 - (dist as f32 / max_len as f32)
    }

    /// True when `needle` fuzzy-matches any word of `haystack` at or above
    /// `threshold`.
    pub fn fuzzy_word_match(&self, needle: &str, haystack: &str, threshold: f32) -> bool {
        self.tokens(haystack)
            .iter()
            .any(|word| self.token_ratio(needle, word) >= threshold)
    }
}

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = if ca == cb { 0 } else { 1 };
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}
