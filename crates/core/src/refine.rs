use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::normalization::terms;

static SENTENCE_END: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[.!?]+(?:\s+|$)").expect("sentence regex"));

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefinerConfig {
    pub max_sentences: usize,
    /// Singular directions kept for scoring.
    pub dimensions: usize,
    pub power_iterations: usize,
}

impl Default for RefinerConfig {
    fn default() -> Self {
        Self {
            max_sentences: 2,
            dimensions: 3,
            power_iterations: 64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefinedSection {
    pub document_id: String,
    pub page_number: u32,
    pub refined_text: String,
}

#[derive(Debug, Clone, Default)]
pub struct Refiner {
    config: RefinerConfig,
}

impl Refiner {
    pub fn new(config: RefinerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RefinerConfig {
        &self.config
    }

    pub fn refine_default(&self, text: &str) -> String {
        self.refine(text, self.config.max_sentences)
    }

    pub fn refine(&self, text: &str, max_sentences: usize) -> String {
        let sentences = split_sentences(text);
        if sentences.is_empty() || sentences.len() <= max_sentences || max_sentences == 0 {
            return text.to_string();
        }
        let scores = self.sentence_scores(&sentences);
        let mut order: Vec<usize> = (0..sentences.len()).collect();
        order.sort_by(|a, b| scores[*b].total_cmp(&scores[*a]).then(a.cmp(b)));
        let mut chosen: Vec<usize> = order.into_iter().take(max_sentences).collect();
        chosen.sort_unstable();
        chosen
            .into_iter()
            .map(|idx| sentences[idx])
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn sentence_scores(&self, sentences: &[&str]) -> Vec<f64> {
        let matrix = term_matrix(sentences);
        let n = sentences.len();
        if matrix.iter().all(|row| row.is_empty()) {
            return vec![0.0; n];
        }
        // Gram matrix over sentences; its eigenpairs are (sigma^2, v).
        let mut gram = vec![vec![0f64; n]; n];
        for i in 0..n {
            for j in i..n {
                let value = sparse_dot(&matrix[i], &matrix[j]);
                gram[i][j] = value;
                gram[j][i] = value;
            }
        }
        let mut scores = vec![0f64; n];
        for component in 0..self.config.dimensions.min(n) {
            let Some((eigenvalue, vector)) =
                dominant_eigenpair(&gram, self.config.power_iterations, component)
            else {
                break;
            };
            for (score, v) in scores.iter_mut().zip(&vector) {
                *score += eigenvalue * v * v;
            }
            // Deflate so the next pass finds the following direction.
            for i in 0..n {
                for j in 0..n {
                    gram[i][j] -= eigenvalue * vector[i] * vector[j];
                }
            }
        }
        scores.into_iter().map(|s| s.max(0.0).sqrt()).collect()
    }
}

pub fn split_sentences(text: &str) -> Vec<&str> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }
    let mut sentences = Vec::new();
    let mut last_end = 0;
    for found in SENTENCE_END.find_iter(text) {
        let sentence = text[last_end..found.end()].trim();
        if !sentence.is_empty() {
            sentences.push(sentence);
        }
        last_end = found.end();
    }
    if last_end < text.len() {
        let rest = text[last_end..].trim();
        if !rest.is_empty() {
            sentences.push(rest);
        }
    }
    sentences
}

/// Per-sentence term weights `0.3 + 0.7 * tf / max_tf`, keyed by term column.
fn term_matrix(sentences: &[&str]) -> Vec<HashMap<usize, f64>> {
    let mut columns: HashMap<String, usize> = HashMap::new();
    sentences
        .iter()
        .map(|sentence| {
            let mut counts: HashMap<usize, f64> = HashMap::new();
            for term in terms(sentence) {
                if term.chars().count() < 2 {
                    continue;
                }
                let next = columns.len();
                let column = *columns.entry(term).or_insert(next);
                *counts.entry(column).or_insert(0.0) += 1.0;
            }
            let max = counts.values().copied().fold(0.0, f64::max);
            if max > 0.0 {
                for value in counts.values_mut() {
                    *value = 0.3 + 0.7 * (*value / max);
                }
            }
            counts
        })
        .collect()
}

fn sparse_dot(a: &HashMap<usize, f64>, b: &HashMap<usize, f64>) -> f64 {
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    small
        .iter()
        .filter_map(|(column, x)| large.get(column).map(|y| x * y))
        .sum()
}

fn dominant_eigenpair(
    matrix: &[Vec<f64>],
    iterations: usize,
    seed: usize,
) -> Option<(f64, Vec<f64>)> {
    let n = matrix.len();
    let mut vector: Vec<f64> = (0..n)
        .map(|i| 1.0 + ((i + seed) % 7) as f64 * 0.1)
        .collect();
    let mut eigenvalue = 0.0;
    for _ in 0..iterations.max(1) {
        let mut next: Vec<f64> = matrix
            .iter()
            .map(|row| row.iter().zip(&vector).map(|(m, v)| m * v).sum())
            .collect();
        let norm = next.iter().map(|v| v * v).sum::<f64>().sqrt();
        if norm < 1e-12 {
            return None;
        }
        next.iter_mut().for_each(|v| *v /= norm);
        eigenvalue = norm;
        vector = next;
    }
    (eigenvalue > 1e-9).then_some((eigenvalue, vector))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_returned_unchanged() {
        let refiner = Refiner::default();
        let text = "Visit the old port.  Then walk to the castle!";
        assert_eq!(refiner.refine(text, 3), text);
        assert_eq!(refiner.refine(text, 2), text);
    }

    #[test]
    fn degenerate_input_is_verbatim() {
        let refiner = Refiner::default();
        assert_eq!(refiner.refine("   ", 2), "   ");
        assert_eq!(refiner.refine("", 2), "");
    }

    #[test]
    fn picks_central_sentences_in_original_order() {
        let refiner = Refiner::default();
        let text = "Nice has beautiful beaches and a lively old town with great food. \
                    It rained. \
                    The beaches of Nice and the old town draw many visitors with great food. \
                    Parking costs.";
        let summary = refiner.refine(text, 2);
        assert_eq!(
            summary,
            "Nice has beautiful beaches and a lively old town with great food. \
             The beaches of Nice and the old town draw many visitors with great food."
        );
    }

    #[test]
    fn output_sentences_come_from_input() {
        let refiner = Refiner::default();
        let text = "One fish. Two fish. Red fish. Blue fish. Old fish. New fish.";
        let summary = refiner.refine(text, 3);
        let picked = split_sentences(&summary);
        assert_eq!(picked.len(), 3);
        assert!(picked.iter().all(|s| text.contains(s)));
    }

    #[test]
    fn splits_on_terminal_punctuation() {
        assert_eq!(
            split_sentences("Hello there. How are you?! Fine"),
            vec!["Hello there.", "How are you?!", "Fine"]
        );
        assert_eq!(split_sentences("version 2.5 is out"), vec!["version 2.5 is out"]);
    }
}
