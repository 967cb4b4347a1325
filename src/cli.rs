//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use clap::Parser;
use std::path::PathBuf;

/// DocInsight - multi-modal document, image and audio analysis
///
/// Sends a document, an image and an audio file to cloud AI services
/// concurrently and merges their results into one report. Inputs may be
/// URLs or local files; local document and image files are staged to blob
/// storage first.
///
/// Examples:
///   docinsight --document https://example.com/invoice.pdf
///   docinsight --document ./contract.pdf --translate-to es
///   docinsight --image ./photo.jpg --audio ./memo.wav --format json
///   docinsight --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Document to analyze (URL or local file)
    ///
    /// Supported local types: pdf, docx, xlsx, pptx, html, jpg, png, bmp, tiff.
    #[arg(short, long, value_name = "URL|PATH")]
    pub document: Option<String>,

    /// Image to analyze (URL or local file)
    #[arg(short, long, value_name = "URL|PATH")]
    pub image: Option<String>,

    /// Audio file to transcribe (local wav or ogg)
    #[arg(short, long, value_name = "PATH")]
    pub audio: Option<PathBuf>,

    /// Translate the document into this language (e.g. es, fr, de)
    #[arg(short, long, value_name = "LANG", requires = "document")]
    pub translate_to: Option<String>,

    /// Output file path for the report
    #[arg(
        short,
        long,
        default_value = "docinsight_report.md",
        value_name = "FILE"
    )]
    pub output: PathBuf,

    /// Output format (markdown, json)
    #[arg(long, default_value = "markdown", value_name = "FORMAT")]
    pub format: OutputFormat,

    /// Path to configuration file
    ///
    /// If not specified, looks for .docinsight.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Per-analysis timeout in seconds
    ///
    /// A modality whose analysis takes longer is reported as failed.
    /// Default: from config or 300s.
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Keep caption, OCR text and transcripts of content that failed moderation
    #[arg(long)]
    pub no_redact: bool,

    /// Exit with code 2 if any content failed moderation
    #[arg(long)]
    pub fail_on_unsafe: bool,

    /// Exit with code 2 if any requested modality failed
    #[arg(long)]
    pub strict: bool,

    /// Do not delete staged uploads after the run
    #[arg(long)]
    pub keep_staged: bool,

    /// Generate a default .docinsight.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

/// Output format for the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Markdown format (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Returns true if at least one input was given.
    pub fn has_inputs(&self) -> bool {
        let present = |value: &Option<String>| value.as_deref().is_some_and(|v| !v.trim().is_empty());
        present(&self.document) || present(&self.image) || self.audio.is_some()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        // Skip validation for --init-config
        if self.init_config {
            return Ok(());
        }

        if !self.has_inputs() {
            return Err("At least one of --document, --image or --audio is required".to_string());
        }

        // Check for conflicting options
        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        // Validate timeout if provided
        if let Some(timeout) = self.timeout {
            if timeout == 0 {
                return Err("Timeout must be at least 1 second".to_string());
            }
        }

        // Validate language code shape
        if let Some(ref language) = self.translate_to {
            let valid = (2..=10).contains(&language.len())
                && language.chars().all(|c| c.is_ascii_alphabetic() || c == '-');
            if !valid {
                return Err(format!("Invalid language code: {}", language));
            }
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}
