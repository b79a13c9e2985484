use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::normalization::terms;

/// Lowercase term to non-negative importance.
pub type KeywordScoreMap = BTreeMap<String, f32>;

pub trait KeywordScorer: Send + Sync {
    /// An empty map is a valid answer.
    fn score(&self, text: &str, language: &str) -> KeywordScoreMap;
}

/// How a block's keyword map collapses to one scalar.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeywordAggregation {
    Max,
    Mean,
    /// `ln(1 + n) * sum`, favoring blocks with many important terms.
    #[default]
    LogSum,
}

impl KeywordAggregation {
    pub fn aggregate(&self, scores: &KeywordScoreMap) -> f32 {
        let values = scores.values().copied().filter(|v| v.is_finite() && *v > 0.0);
        let (count, sum, max) = values.fold((0usize, 0f32, 0f32), |(n, s, m), v| {
            (n + 1, s + v, m.max(v))
        });
        if count == 0 {
            return 0.0;
        }
        match self {
            Self::Max => max,
            Self::Mean => sum / count as f32,
            Self::LogSum => (1.0 + count as f32).ln() * sum,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TermFrequencyConfig {
    pub max_terms: usize,
    pub min_term_len: usize,
    /// Upper n-gram length, counted in non-stopword words.
    pub max_ngram: usize,
}

impl Default for TermFrequencyConfig {
    fn default() -> Self {
        Self {
            max_terms: 20,
            min_term_len: 3,
            max_ngram: 3,
        }
    }
}

/// Stopword-filtered term frequency with an early-position boost.
#[derive(Debug, Clone, Default)]
pub struct TermFrequencyScorer {
    config: TermFrequencyConfig,
}

impl TermFrequencyScorer {
    pub fn new(config: TermFrequencyConfig) -> Self {
        Self { config }
    }

    fn keep(&self, word: &str, language: &str) -> bool {
        word.chars().count() >= self.config.min_term_len
            && !word.chars().all(|c| c.is_numeric())
            && !is_stopword(word, language)
    }
}

impl KeywordScorer for TermFrequencyScorer {
    fn score(&self, text: &str, language: &str) -> KeywordScoreMap {
        let words = terms(text);
        if words.is_empty() {
            return KeywordScoreMap::new();
        }
        let total = words.len() as f32;
        let mut weights: HashMap<String, (f32, usize)> = HashMap::new();
        // Runs of kept words form the candidate phrases, as in keyphrase extractors.
        let mut run: Vec<(usize, &str)> = Vec::new();
        let mut flush = |run: &mut Vec<(usize, &str)>| {
            for start in 0..run.len() {
                for len in 1..=self.config.max_ngram.max(1) {
                    if start + len > run.len() {
                        break;
                    }
                    let phrase = run[start..start + len]
                        .iter()
                        .map(|(_, w)| *w)
                        .collect::<Vec<_>>()
                        .join(" ");
                    let position = run[start].0 as f32;
                    let boost = 1.0 + (1.0 - position / total);
                    let entry = weights.entry(phrase).or_insert((0.0, run[start].0));
                    entry.0 += boost / len as f32;
                }
            }
            run.clear();
        };
        for (position, word) in words.iter().enumerate() {
            if self.keep(word, language) {
                run.push((position, word.as_str()));
            } else {
                flush(&mut run);
            }
        }
        flush(&mut run);

        let mut ranked: Vec<(String, f32, usize)> = weights
            .into_iter()
            .map(|(term, (weight, first))| (term, weight / total.sqrt(), first))
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.2.cmp(&b.2)).then(a.0.cmp(&b.0)));
        ranked.truncate(self.config.max_terms);
        ranked.into_iter().map(|(term, score, _)| (term, score)).collect()
    }
}

const ENGLISH_STOPWORDS: &[&str] = &[
    "about", "above", "after", "again", "against", "all", "also", "and", "any", "are", "because",
    "been", "before", "being", "below", "between", "both", "but", "can", "could", "did", "does",
    "doing", "down", "during", "each", "few", "for", "from", "further", "had", "has", "have",
    "having", "her", "here", "hers", "herself", "him", "himself", "his", "how", "into", "its",
    "itself", "just", "more", "most", "must", "myself", "nor", "not", "now", "off", "once",
    "only", "other", "our", "ours", "ourselves", "out", "over", "own", "same", "she", "should",
    "some", "such", "than", "that", "the", "their", "theirs", "them", "themselves", "then",
    "there", "these", "they", "this", "those", "through", "too", "under", "until", "very",
    "was", "were", "what", "when", "where", "which", "while", "who", "whom", "why", "will",
    "with", "would", "you", "your", "yours", "yourself", "yourselves",
];

/// Only English carries a list; other language codes filter nothing.
fn is_stopword(word: &str, language: &str) -> bool {
    match language {
        "en" | "english" => ENGLISH_STOPWORDS.binary_search(&word).is_ok(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stopword_list_is_sorted() {
        assert!(ENGLISH_STOPWORDS.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn scores_repeated_terms_higher() {
        let scorer = TermFrequencyScorer::default();
        let map = scorer.score(
            "Beaches of Nice. The beaches near Antibes are quieter than city beaches.",
            "en",
        );
        let beaches = map["beaches"];
        assert!(map.values().all(|v| *v >= 0.0));
        assert!(beaches >= map["antibes"]);
        assert!(!map.contains_key("the"));
        assert!(!map.contains_key("are"));
    }

    #[test]
    fn keeps_multi_word_phrases() {
        let scorer = TermFrequencyScorer::default();
        let map = scorer.score("Coastal adventures await", "en");
        assert!(map.contains_key("coastal adventures"));
        assert!(map.contains_key("coastal adventures await"));
    }

    #[test]
    fn stopword_only_text_scores_nothing() {
        let scorer = TermFrequencyScorer::default();
        let map = scorer.score("and the of to it", "en");
        assert!(map.is_empty());
        assert_eq!(KeywordAggregation::LogSum.aggregate(&map), 0.0);
    }

    #[test]
    fn caps_term_count() {
        let scorer = TermFrequencyScorer::new(TermFrequencyConfig {
            max_terms: 3,
            ..TermFrequencyConfig::default()
        });
        let map = scorer.score("alpha beta gamma delta epsilon zeta eta theta", "en");
        assert_eq!(map.len(), 3);
    }

    #[test]
    fn other_languages_pass_through() {
        let scorer = TermFrequencyScorer::default();
        let map = scorer.score("the with", "fr");
        assert!(map.contains_key("the"));
    }

    #[test]
    fn aggregations() {
        let map: KeywordScoreMap = [("a".to_string(), 1.0), ("b".to_string(), 3.0)]
            .into_iter()
            .collect();
        assert_eq!(KeywordAggregation::Max.aggregate(&map), 3.0);
        assert_eq!(KeywordAggregation::Mean.aggregate(&map), 2.0);
        let expected = 3.0f32.ln() * 4.0;
        assert!((KeywordAggregation::LogSum.aggregate(&map) - expected).abs() < 1e-6);
    }
}
