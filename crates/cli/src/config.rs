use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use clap::{Args, ValueEnum};
use persona_rank_core::{PipelineConfig, TimeoutPolicy};
use serde::Deserialize;

pub const DEFAULT_CONFIG: &str = "persona-rank.toml";
pub const DEFAULT_PATTERN: &str = "*/challenge1b_input.json";
pub const DEFAULT_OUTPUT_NAME: &str = "challenge1b_output.json";

#[derive(Debug, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub batch: BatchDefaults,
}

#[derive(Debug, Default, Deserialize)]
pub struct BatchDefaults {
    pub pattern: Option<String>,
    pub output_name: Option<String>,
}

impl BatchDefaults {
    pub fn pattern(&self, cli: Option<String>) -> String {
        cli.or_else(|| self.pattern.clone())
            .unwrap_or_else(|| DEFAULT_PATTERN.to_string())
    }

    pub fn output_name(&self, cli: Option<String>) -> String {
        cli.or_else(|| self.output_name.clone())
            .unwrap_or_else(|| DEFAULT_OUTPUT_NAME.to_string())
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutArg {
    /// Skip the remaining documents and rank what was gathered
    RankPartial,
    /// Fail the run
    Fail,
}

impl From<TimeoutArg> for TimeoutPolicy {
    fn from(value: TimeoutArg) -> Self {
        match value {
            TimeoutArg::RankPartial => TimeoutPolicy::RankPartial,
            TimeoutArg::Fail => TimeoutPolicy::Fail,
        }
    }
}

/// Flags that override `[pipeline]` values from the config file.
#[derive(Args, Debug, Clone, Default)]
pub struct PipelineArgs {
    #[arg(long)]
    pub alpha: Option<f32>,
    #[arg(long = "top-k")]
    pub top_k: Option<usize>,
    #[arg(long = "candidate-pool")]
    pub candidate_pool: Option<usize>,
    #[arg(long = "max-per-document")]
    pub max_per_document: Option<usize>,
    #[arg(long)]
    pub workers: Option<usize>,
    #[arg(long = "batch-size")]
    pub batch_size: Option<usize>,
    #[arg(long = "time-budget-secs")]
    pub time_budget_secs: Option<u64>,
    #[arg(long = "on-timeout", value_enum)]
    pub on_timeout: Option<TimeoutArg>,
    #[arg(long)]
    pub language: Option<String>,
}

pub fn load_config(path: &Path) -> Result<AppConfig> {
    if !path.exists() {
        return Ok(AppConfig::default());
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    toml::from_str(&contents).map_err(|e| anyhow!("invalid config: {e}"))
}

pub fn resolve_pipeline_config(cli: &PipelineArgs, file: &PipelineConfig) -> Result<PipelineConfig> {
    let mut config = file.clone();
    if let Some(alpha) = cli.alpha {
        config.fusion.alpha = alpha;
    }
    if let Some(top_k) = cli.top_k {
        config.fusion.top_k = top_k;
    }
    if let Some(pool) = cli.candidate_pool {
        config.fusion.candidate_pool = Some(pool);
    }
    if let Some(cap) = cli.max_per_document {
        config.fusion.max_per_document = Some(cap);
    }
    if let Some(workers) = cli.workers {
        config.workers = workers;
    }
    if let Some(batch_size) = cli.batch_size {
        config.embed_batch_size = batch_size;
    }
    if let Some(budget) = cli.time_budget_secs {
        config.time_budget_secs = Some(budget);
    }
    if let Some(policy) = cli.on_timeout {
        config.timeout_policy = policy.into();
    }
    if let Some(language) = &cli.language {
        config.language = language.clone();
    }
    config.validate()?;
    Ok(config)
}
