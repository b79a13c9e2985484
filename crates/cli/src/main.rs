mod config;

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use glob::glob;
use persona_rank_core::{
    truncate_chars, BlockStore, CollectionPipeline, CollectionRequest, DocumentInfo, Extractor,
    FontStatClassifier, FontStats, PdfExtractor, PipelineConfig, RunReport, StructuralTag,
};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{load_config, resolve_pipeline_config, PipelineArgs, DEFAULT_CONFIG};

#[derive(Parser)]
#[command(
    name = "persona-rank",
    version,
    about = "Rank PDF sections for a persona and a job to be done"
)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rank one collection described by an input JSON file
    Run {
        input: PathBuf,
        /// Directory holding the listed PDFs (defaults to `PDFs/` next to the input)
        #[arg(long = "pdf-dir")]
        pdf_dir: Option<PathBuf>,
        #[arg(long)]
        out: Option<PathBuf>,
        /// Write the stage history, per-document results and warnings as JSON
        #[arg(long = "report-out")]
        report_out: Option<PathBuf>,
        /// Write one warning per line
        #[arg(long = "warnings-out")]
        warnings_out: Option<PathBuf>,
        #[command(flatten)]
        pipeline: PipelineArgs,
    },
    /// Rank every collection under a root directory
    Batch {
        root: PathBuf,
        /// Glob relative to the root that finds input files
        #[arg(long)]
        pattern: Option<String>,
        /// File name written next to each input
        #[arg(long = "output-name")]
        output_name: Option<String>,
        /// Mirror outputs under this directory instead of next to each input
        #[arg(long = "out-dir")]
        out_dir: Option<PathBuf>,
        #[command(flatten)]
        pipeline: PipelineArgs,
    },
    /// Print the metadata, outline, blocks and structural tags of one PDF
    Inspect {
        pdf: PathBuf,
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));
    let file_config = load_config(&config_path)?;

    match cli.command {
        Commands::Run {
            input,
            pdf_dir,
            out,
            report_out,
            warnings_out,
            pipeline,
        } => {
            let resolved = resolve_pipeline_config(&pipeline, &file_config.pipeline)?;
            let out = out.unwrap_or_else(|| {
                sibling(&input, &file_config.batch.output_name(None))
            });
            let report = run_collection(&input, pdf_dir.as_deref(), &out, resolved)?;
            if let Some(path) = report_out {
                write_report(&report, &path)?;
            }
            if let Some(path) = warnings_out {
                let mut lines = report.warnings.join("\n");
                if !lines.is_empty() {
                    lines.push('\n');
                }
                fs::write(&path, lines)
                    .with_context(|| format!("failed to write {}", path.display()))?;
            }
            println!(
                "wrote {} ({} warnings)",
                out.display(),
                report.warnings.len()
            );
        }
        Commands::Batch {
            root,
            pattern,
            output_name,
            out_dir,
            pipeline,
        } => {
            let resolved = resolve_pipeline_config(&pipeline, &file_config.pipeline)?;
            let pattern = file_config.batch.pattern(pattern);
            let output_name = file_config.batch.output_name(output_name);
            let inputs = gather_inputs(&root, &pattern)?;
            if inputs.is_empty() {
                return Err(anyhow!(
                    "no input files match {} under {}",
                    pattern,
                    root.display()
                ));
            }
            let mut failed = Vec::new();
            for input in &inputs {
                let out = match &out_dir {
                    Some(dir) => mirrored(&root, dir, input, &output_name),
                    None => sibling(input, &output_name),
                };
                match run_collection(input, None, &out, resolved.clone()) {
                    Ok(report) => info!(
                        input = %input.display(),
                        out = %out.display(),
                        warnings = report.warnings.len(),
                        "collection ranked"
                    ),
                    Err(err) => {
                        warn!(input = %input.display(), error = %err, "collection failed");
                        failed.push(input.display().to_string());
                    }
                }
            }
            println!(
                "ranked {}/{} collections",
                inputs.len() - failed.len(),
                inputs.len()
            );
            if !failed.is_empty() {
                return Err(anyhow!("failed collections: {}", failed.join(", ")));
            }
        }
        Commands::Inspect { pdf, json } => {
            inspect_pdf(&pdf, json, &file_config.pipeline)?;
        }
    }

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run_collection(
    input: &Path,
    pdf_dir: Option<&Path>,
    out: &Path,
    config: PipelineConfig,
) -> Result<RunReport> {
    let request = CollectionRequest::from_input_file(input, pdf_dir)
        .with_context(|| format!("failed to read input {}", input.display()))?;
    let pipeline = CollectionPipeline::with_defaults(config)?;
    let run = match pipeline.run(&request) {
        Ok(run) => run,
        Err(failure) => {
            for warning in &failure.warnings {
                eprintln!("warning: {warning}");
            }
            return Err(anyhow!(failure));
        }
    };
    for warning in &run.report.warnings {
        eprintln!("warning: {warning}");
    }
    run.output
        .write_json(out)
        .with_context(|| format!("failed to write {}", out.display()))?;
    Ok(run.report)
}

fn write_report(report: &RunReport, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(report)?;
    fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

fn gather_inputs(root: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    let full = root.join(pattern);
    let mut files = Vec::new();
    for entry in glob(&full.to_string_lossy())? {
        let path = entry?;
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn sibling(input: &Path, name: &str) -> PathBuf {
    input
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(name)
}

fn mirrored(root: &Path, out_dir: &Path, input: &Path, name: &str) -> PathBuf {
    let relative = input
        .parent()
        .and_then(|parent| parent.strip_prefix(root).ok())
        .unwrap_or_else(|| Path::new(""));
    out_dir.join(relative).join(name)
}

#[derive(Serialize)]
struct InspectRow<'a> {
    page_number: u32,
    order_index: usize,
    font_size: f32,
    is_bold: bool,
    tag: StructuralTag,
    heading_level: Option<u8>,
    text: &'a str,
}

#[derive(Serialize)]
struct InspectReport<'a> {
    #[serde(flatten)]
    info: DocumentInfo,
    processing_ms: u128,
    font_stats: &'a FontStats,
    blocks: Vec<InspectRow<'a>>,
}

fn inspect_pdf(pdf: &Path, json: bool, config: &PipelineConfig) -> Result<()> {
    let started = Instant::now();
    let extractor = PdfExtractor::new(config.extract.clone());
    let info = extractor.document_info(pdf)?;
    let blocks = extractor.extract(pdf)?;
    let mut store = BlockStore::new();
    store.insert_document(&info.document_id, blocks);
    let classification = FontStatClassifier::new(config.classifier.clone()).classify(&store);

    let rows: Vec<InspectRow<'_>> = store
        .blocks()
        .iter()
        .zip(&classification.tags)
        .zip(&classification.heading_levels)
        .map(|((block, tag), level)| InspectRow {
            page_number: block.page_number,
            order_index: block.order_index,
            font_size: block.font_size,
            is_bold: block.is_bold,
            tag: *tag,
            heading_level: *level,
            text: &block.text,
        })
        .collect();

    let processing_ms = started.elapsed().as_millis();
    let stats = &classification.stats;
    if json {
        let report = InspectReport {
            info,
            processing_ms,
            font_stats: stats,
            blocks: rows,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    println!(
        "{} ({} pages, {} ms)",
        info.title, info.page_count, processing_ms
    );
    if let Some(author) = &info.author {
        println!("author: {author}");
    }
    for entry in &info.outline {
        println!(
            "{}{} (p{})",
            "  ".repeat(entry.level.saturating_sub(1)),
            entry.title,
            entry.page_number
        );
    }
    println!(
        "{} blocks, mean size {:.2}, std dev {:.2}, bold {:.0}%{}",
        rows.len(),
        stats.mean,
        stats.std_dev,
        stats.bold_fraction * 100.0,
        if stats.is_uniform() { ", uniform" } else { "" }
    );
    for row in &rows {
        let tag = match (row.tag, row.heading_level) {
            (StructuralTag::Heading, Some(level)) => format!("H{level}"),
            (StructuralTag::Heading, None) => "H".to_string(),
            (StructuralTag::Paragraph, _) => "P".to_string(),
            (StructuralTag::Footnote, _) => "F".to_string(),
        };
        println!(
            "p{:<3} #{:<4} {:<3} {:>5.1}{} {}",
            row.page_number,
            row.order_index,
            tag,
            row.font_size,
            if row.is_bold { "b" } else { " " },
            truncate_chars(row.text, 80)
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TimeoutArg;

    #[test]
    fn outputs_land_next_to_inputs() {
        let input = Path::new("collections/travel/challenge1b_input.json");
        assert_eq!(
            sibling(input, "challenge1b_output.json"),
            PathBuf::from("collections/travel/challenge1b_output.json")
        );
    }

    #[test]
    fn mirrored_outputs_keep_collection_dirs() {
        let out = mirrored(
            Path::new("collections"),
            Path::new("out"),
            Path::new("collections/travel/challenge1b_input.json"),
            "ranked.json",
        );
        assert_eq!(out, PathBuf::from("out/travel/ranked.json"));
    }

    #[test]
    fn gathers_inputs_in_sorted_order() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b", "a", "c"] {
            let collection = dir.path().join(name);
            fs::create_dir_all(&collection).unwrap();
            if name != "c" {
                fs::write(collection.join("challenge1b_input.json"), "{}").unwrap();
            }
        }
        let found = gather_inputs(dir.path(), config::DEFAULT_PATTERN).unwrap();
        let names: Vec<String> = found
            .iter()
            .map(|p| {
                p.parent()
                    .and_then(|d| d.file_name())
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default()
            })
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn cli_parses_run_overrides() {
        let cli = Cli::try_parse_from([
            "persona-rank",
            "run",
            "input.json",
            "--alpha",
            "0.5",
            "--top-k",
            "7",
            "--on-timeout",
            "fail",
        ])
        .unwrap();
        match cli.command {
            Commands::Run { input, pipeline, .. } => {
                assert_eq!(input, PathBuf::from("input.json"));
                assert_eq!(pipeline.alpha, Some(0.5));
                assert_eq!(pipeline.top_k, Some(7));
                assert_eq!(pipeline.on_timeout, Some(TimeoutArg::Fail));
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn cli_rejects_unknown_timeout_policy() {
        let parsed = Cli::try_parse_from([
            "persona-rank",
            "batch",
            "collections",
            "--on-timeout",
            "later",
        ]);
        assert!(parsed.is_err());
        let cli = Cli::try_parse_from([
            "persona-rank",
            "batch",
            "collections",
            "--on-timeout",
            "rank-partial",
        ])
        .unwrap();
        match cli.command {
            Commands::Batch { pipeline, .. } => {
                assert_eq!(pipeline.on_timeout, Some(TimeoutArg::RankPartial));
            }
            _ => panic!("expected batch"),
        }
    }
}
