use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{RankError, Result};

/// Directory next to the input file that holds the collection's PDFs.
pub const DEFAULT_PDF_DIR: &str = "PDFs";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChallengeInfo {
    pub challenge_id: Option<String>,
    pub test_case_name: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputDocument {
    pub filename: String,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Persona {
    pub role: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobToBeDone {
    pub task: String,
}

/// On-disk collection description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub challenge_info: Option<ChallengeInfo>,
    #[serde(default)]
    pub documents: Vec<InputDocument>,
    pub persona: Persona,
    pub job_to_be_done: JobToBeDone,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DocumentRef {
    pub path: PathBuf,
    pub document_id: String,
    pub title: Option<String>,
}

/// One persona/task query over a list of documents.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionRequest {
    pub persona: String,
    pub job_to_be_done: String,
    pub documents: Vec<DocumentRef>,
}

impl CollectionRequest {
    pub fn new(persona: impl Into<String>, job_to_be_done: impl Into<String>) -> Self {
        Self {
            persona: persona.into(),
            job_to_be_done: job_to_be_done.into(),
            documents: Vec::new(),
        }
    }

    pub fn with_document(mut self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let document_id = crate::extract::document_id_for(&path);
        self.documents.push(DocumentRef {
            path,
            document_id,
            title: None,
        });
        self
    }

    /// Text embedded as the search query.
    pub fn query(&self) -> String {
        format!("{} {}", self.persona, self.job_to_be_done)
    }

    pub fn document_ids(&self) -> Vec<String> {
        self.documents.iter().map(|d| d.document_id.clone()).collect()
    }

    pub fn from_input(input: CollectionInput, pdf_dir: &Path) -> Self {
        let documents = input
            .documents
            .into_iter()
            .map(|doc| DocumentRef {
                path: pdf_dir.join(&doc.filename),
                document_id: doc.filename,
                title: doc.title,
            })
            .collect();
        Self {
            persona: input.persona.role,
            job_to_be_done: input.job_to_be_done.task,
            documents,
        }
    }

    /// Reads an input file; PDFs resolve against `pdf_dir` or the sibling `PDFs/`.
    pub fn from_input_file(path: &Path, pdf_dir: Option<&Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        let input: CollectionInput = serde_json::from_str(&raw)?;
        if input.documents.iter().any(|d| d.filename.trim().is_empty()) {
            return Err(RankError::InvalidConfig(format!(
                "{} lists a document without a filename",
                path.display()
            )));
        }
        let pdf_dir = match pdf_dir {
            Some(dir) => dir.to_path_buf(),
            None => path
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join(DEFAULT_PDF_DIR),
        };
        Ok(Self::from_input(input, &pdf_dir))
    }
}
