//! Markdown and JSON report generation.
//!
//! This module renders a [`Report`] as a human-readable Markdown document
//! or as pretty-printed JSON.

use super::{Report, ReportMetadata};
use crate::models::{
    AggregateResult, AudioResult, DocumentResult, ImageResult, Modality, ModalityFailure,
    SafetyReport,
};
use anyhow::Result;
use std::io::Write;
use std::path::Path;

/// Most key-value pairs listed in the Markdown report.
const MAX_LISTED_PAIRS: usize = 20;

/// Generate a complete Markdown report.
pub fn generate_markdown_report(report: &Report) -> String {
    let mut output = String::new();

    output.push_str("# DocInsight Report\n\n");
    output.push_str(&generate_metadata_section(&report.metadata));
    output.push_str(&generate_outcome_section(&report.metadata, &report.analysis));

    if let Some(ref document) = report.analysis.document_analysis {
        output.push_str(&generate_document_section(document));
    }
    if let Some(ref image) = report.analysis.image_analysis {
        output.push_str(&generate_image_section(image));
    }
    if let Some(ref audio) = report.analysis.audio_analysis {
        output.push_str(&generate_audio_section(audio));
    }

    output.push_str(&generate_safety_section(&report.analysis));
    output.push_str(&generate_failures_section(&report.analysis.failures));
    output.push_str(&generate_footer());

    output
}

/// Generate the metadata section.
fn generate_metadata_section(metadata: &ReportMetadata) -> String {
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    if let Some(ref job_id) = metadata.job_id {
        section.push_str(&format!("- **Job:** `{}`\n", job_id));
    }
    section.push_str(&format!(
        "- **Generated:** {}\n",
        metadata.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    section.push_str(&format!(
        "- **Requested:** {}\n",
        list_modalities(&metadata.requested)
    ));
    if let Some(ref language) = metadata.target_language {
        section.push_str(&format!("- **Translation Target:** {}\n", language));
    }
    section.push_str(&format!(
        "- **Duration:** {:.1}s\n",
        metadata.duration_seconds
    ));
    section.push('\n');

    section
}

fn list_modalities(modalities: &[Modality]) -> String {
    if modalities.is_empty() {
        return "none".to_string();
    }
    modalities
        .iter()
        .map(|m| m.label())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Generate the per-modality outcome table.
fn generate_outcome_section(metadata: &ReportMetadata, analysis: &AggregateResult) -> String {
    let mut section = String::new();

    section.push_str("## Summary\n\n");
    if metadata.requested.is_empty() {
        section.push_str("No inputs were provided.\n\n");
        return section;
    }

    section.push_str("| Modality | Outcome |\n");
    section.push_str("|----------|---------|\n");
    for modality in &metadata.requested {
        let outcome = if analysis.contains(*modality) {
            "✅ Analyzed".to_string()
        } else if let Some(failure) = analysis.failures.iter().find(|f| f.modality == *modality) {
            format!("❌ Failed ({})", failure.kind)
        } else {
            "➖ No result".to_string()
        };
        section.push_str(&format!("| {} | {} |\n", modality.label(), outcome));
    }
    section.push('\n');

    section
}

/// Generate the document section.
fn generate_document_section(document: &DocumentResult) -> String {
    let mut section = String::new();

    section.push_str("## Document\n\n");
    let lines: usize = document.pages.iter().map(|p| p.lines.len()).sum();
    section.push_str(&format!("- **Pages:** {}\n", document.pages.len()));
    section.push_str(&format!("- **Lines:** {}\n", lines));
    section.push_str(&format!("- **Tables:** {}\n", document.tables.len()));
    section.push_str(&format!("- **Paragraphs:** {}\n", document.paragraphs.len()));
    if !document.entities.is_empty() {
        section.push_str(&format!("- **Entities:** {}\n", document.entities.len()));
    }
    if let Some(ref url) = document.translated_document_url {
        section.push_str(&format!("- **Translated Document:** [download]({})\n", url));
    }
    section.push('\n');

    if !document.key_value_pairs.is_empty() {
        section.push_str("### Key-Value Pairs\n\n");
        section.push_str("| Key | Value | Confidence |\n");
        section.push_str("|-----|-------|------------|\n");
        for pair in document.key_value_pairs.iter().take(MAX_LISTED_PAIRS) {
            let value = pair
                .value
                .as_ref()
                .map(|v| escape_cell(&v.content))
                .unwrap_or_default();
            section.push_str(&format!(
                "| {} | {} | {} |\n",
                escape_cell(&pair.key.content),
                value,
                format_confidence(pair.confidence)
            ));
        }
        if document.key_value_pairs.len() > MAX_LISTED_PAIRS {
            section.push_str(&format!(
                "\n*{} more pairs in the JSON report.*\n",
                document.key_value_pairs.len() - MAX_LISTED_PAIRS
            ));
        }
        section.push('\n');
    }

    section
}

/// Generate the image section.
fn generate_image_section(image: &ImageResult) -> String {
    let mut section = String::new();

    section.push_str("## Image\n\n");
    if image.redacted {
        section.push_str("> ⚠️ Caption and text were withheld because the image failed moderation.\n\n");
    }
    if let Some(ref caption) = image.caption {
        section.push_str(&format!(
            "- **Caption:** {} ({})\n",
            caption.text,
            format_confidence(caption.confidence)
        ));
    }
    if !image.tags.is_empty() {
        let tags: Vec<_> = image.tags.iter().map(|t| t.name.as_str()).collect();
        section.push_str(&format!("- **Tags:** {}\n", tags.join(", ")));
    }
    if !image.objects.is_empty() {
        let objects: Vec<_> = image
            .objects
            .iter()
            .map(|o| o.name.as_deref().unwrap_or("unknown"))
            .collect();
        section.push_str(&format!("- **Objects:** {}\n", objects.join(", ")));
    }
    section.push_str(&format!("- **People:** {}\n", image.people.len()));
    section.push('\n');

    if let Some(ref text) = image.text {
        section.push_str("### Text\n\n");
        section.push_str("```\n");
        section.push_str(text);
        section.push_str("\n```\n\n");
    }

    section
}

/// Generate the audio section.
fn generate_audio_section(audio: &AudioResult) -> String {
    let mut section = String::new();

    section.push_str("## Audio\n\n");
    if audio.redacted {
        section.push_str("> ⚠️ Transcript, summary and entities were withheld because the audio failed moderation.\n\n");
    }
    if let Some(ref language) = audio.language {
        section.push_str(&format!("- **Language:** {}\n", language));
    }
    if let Some(duration) = audio.duration_seconds {
        section.push_str(&format!("- **Duration:** {:.1}s\n", duration));
    }
    if let Some(ref summary) = audio.summary {
        section.push_str(&format!("- **Summary:** {}\n", summary));
    }
    section.push('\n');

    if let Some(ref transcription) = audio.transcription {
        section.push_str("### Transcript\n\n");
        for line in transcription.lines() {
            section.push_str(&format!("> {}\n", line));
        }
        section.push('\n');
    }

    if !audio.entities.is_empty() {
        section.push_str("### Entities\n\n");
        for entity in &audio.entities {
            let category = match entity.sub_category {
                Some(ref sub) => format!("{}/{}", entity.category, sub),
                None => entity.category.clone(),
            };
            section.push_str(&format!("- **{}** ({})\n", entity.text, category));
        }
        section.push('\n');
    }

    section
}

/// Generate the moderation table.
fn generate_safety_section(analysis: &AggregateResult) -> String {
    let reports = analysis.safety_reports();
    if reports.is_empty() {
        return String::new();
    }

    let mut section = String::new();
    section.push_str("## Content Safety\n\n");
    for (modality, report) in reports {
        section.push_str(&generate_safety_table(modality, report));
    }

    section
}

fn generate_safety_table(modality: Modality, report: &SafetyReport) -> String {
    let mut table = String::new();

    let verdict = if report.is_safe { "🟢 Safe" } else { "🔴 Unsafe" };
    table.push_str(&format!("### {}: {}\n\n", modality.label(), verdict));

    if report.categories.is_empty() {
        table.push_str("No categories reported.\n\n");
        return table;
    }

    table.push_str("| Category | Severity |\n");
    table.push_str("|----------|----------|\n");
    for category in &report.categories {
        table.push_str(&format!("| {} | {} |\n", category.category, category.severity));
    }
    table.push('\n');

    table
}

/// Generate the failures section.
fn generate_failures_section(failures: &[ModalityFailure]) -> String {
    if failures.is_empty() {
        return String::new();
    }

    let mut section = String::new();
    section.push_str("## Failures\n\n");
    for failure in failures {
        section.push_str(&format!(
            "- **{}** `{}` ({}): {}\n",
            failure.modality.label(),
            failure.reference,
            failure.kind,
            failure.message
        ));
    }
    section.push('\n');

    section
}

fn format_confidence(confidence: Option<f64>) -> String {
    match confidence {
        Some(c) => format!("{:.0}%", c * 100.0),
        None => "n/a".to_string(),
    }
}

fn escape_cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}

/// Generate the footer.
fn generate_footer() -> String {
    "---\n\n*Report generated by DocInsight*\n".to_string()
}

/// Generate a JSON report.
pub fn generate_json_report(report: &Report) -> Result<String> {
    serde_json::to_string_pretty(report).map_err(Into::into)
}

/// Write already-rendered report content to a file.
pub fn write_report(content: &str, path: &Path) -> Result<()> {
    let mut file = std::fs::File::create(path)?;
    file.write_all(content.as_bytes())?;

    Ok(())
}
