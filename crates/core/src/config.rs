use std::time::Duration;

use persona_rank_index::IndexConfig;
use serde::{Deserialize, Serialize};

use crate::classify::ClassifierConfig;
use crate::error::{RankError, Result};
use crate::extract::ExtractConfig;
use crate::rank::FusionConfig;
use crate::refine::RefinerConfig;

/// What to do when extraction runs past the time budget.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutPolicy {
    /// Skip the remaining documents and rank what was gathered.
    #[default]
    RankPartial,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub embed_batch_size: usize,
    pub workers: usize,
    pub time_budget_secs: Option<u64>,
    pub timeout_policy: TimeoutPolicy,
    /// Passed through to keyword scoring.
    pub language: String,
    pub classifier: ClassifierConfig,
    pub fusion: FusionConfig,
    pub refiner: RefinerConfig,
    pub index: IndexConfig,
    pub extract: ExtractConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            embed_batch_size: 64,
            workers: default_workers(),
            time_budget_secs: None,
            timeout_policy: TimeoutPolicy::RankPartial,
            language: "en".to_string(),
            classifier: ClassifierConfig::default(),
            fusion: FusionConfig::default(),
            refiner: RefinerConfig::default(),
            index: IndexConfig::default(),
            extract: ExtractConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn time_budget(&self) -> Option<Duration> {
        self.time_budget_secs.map(Duration::from_secs)
    }

    pub fn validate(&self) -> Result<()> {
        let alpha = self.fusion.alpha;
        if !(0.0..=1.0).contains(&alpha) {
            return Err(RankError::InvalidConfig(format!(
                "alpha must lie in [0, 1], got {alpha}"
            )));
        }
        if self.fusion.top_k == 0 {
            return Err(RankError::InvalidConfig("top_k must be at least 1".into()));
        }
        if self.fusion.max_per_document == Some(0) {
            return Err(RankError::InvalidConfig(
                "max_per_document must be at least 1 when set".into(),
            ));
        }
        if self.embed_batch_size == 0 {
            return Err(RankError::InvalidConfig(
                "embed_batch_size must be at least 1".into(),
            ));
        }
        if self.workers == 0 {
            return Err(RankError::InvalidConfig("workers must be at least 1".into()));
        }
        let classifier = &self.classifier;
        if classifier.footnote_ratio >= classifier.heading_ratio {
            return Err(RankError::InvalidConfig(
                "footnote_ratio must be below heading_ratio".into(),
            ));
        }
        Ok(())
    }
}

/// `min(4, available cores)`.
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = PipelineConfig::default();
        config.validate().unwrap();
        assert!(config.workers >= 1 && config.workers <= 4);
        assert_eq!(config.fusion.alpha, 0.8);
        assert_eq!(config.embed_batch_size, 64);
    }

    #[test]
    fn rejects_out_of_range_alpha() {
        let mut config = PipelineConfig::default();
        config.fusion.alpha = 1.5;
        assert!(matches!(config.validate(), Err(RankError::InvalidConfig(_))));
    }

    #[test]
    fn rejects_zero_sizes() {
        let mut config = PipelineConfig::default();
        config.fusion.top_k = 0;
        assert!(config.validate().is_err());
        let mut config = PipelineConfig::default();
        config.workers = 0;
        assert!(config.validate().is_err());
        let mut config = PipelineConfig::default();
        config.embed_batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{"fusion": {"alpha": 0.5}, "timeout_policy": "fail"}"#).unwrap();
        assert_eq!(config.fusion.alpha, 0.5);
        assert_eq!(config.fusion.top_k, 15);
        assert_eq!(config.timeout_policy, TimeoutPolicy::Fail);
        assert_eq!(config.classifier.sample_pages, Some(5));
    }
}
