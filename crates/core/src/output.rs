use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::normalization::truncate_chars;
use crate::rank::ScoredSection;
use crate::refine::RefinedSection;
use crate::request::CollectionRequest;

pub const MAX_TITLE_CHARS: usize = 120;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputMetadata {
    pub input_documents: Vec<String>,
    pub persona: String,
    pub job_to_be_done: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedSection {
    pub document: String,
    pub section_title: String,
    pub importance_rank: usize,
    pub page_number: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubsectionAnalysis {
    pub document: String,
    pub refined_text: String,
    pub page_number: u32,
}

/// The result payload. Field order is part of the format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionOutput {
    pub metadata: OutputMetadata,
    pub extracted_sections: Vec<ExtractedSection>,
    pub subsection_analysis: Vec<SubsectionAnalysis>,
}

impl CollectionOutput {
    pub fn assemble(
        request: &CollectionRequest,
        sections: &[ScoredSection],
        refined: Vec<RefinedSection>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            metadata: OutputMetadata {
                input_documents: request.document_ids(),
                persona: request.persona.clone(),
                job_to_be_done: request.job_to_be_done.clone(),
                timestamp: format_timestamp(timestamp),
            },
            extracted_sections: sections
                .iter()
                .map(|section| ExtractedSection {
                    document: section.document_id.clone(),
                    section_title: truncate_chars(&section.section_title, MAX_TITLE_CHARS),
                    importance_rank: section.rank,
                    page_number: section.page_number.max(1),
                })
                .collect(),
            subsection_analysis: refined
                .into_iter()
                .map(|refined| SubsectionAnalysis {
                    document: refined.document_id,
                    refined_text: refined.refined_text,
                    page_number: refined.page_number.max(1),
                })
                .collect(),
        }
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, self.to_json_pretty()?)?;
        Ok(())
    }
}

/// ISO-8601 in UTC with microseconds and a `Z` suffix.
pub fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}
