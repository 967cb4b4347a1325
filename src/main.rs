//! DocInsight - multi-modal document, image and audio analysis
//!
//! A CLI tool that sends a document, an image and an audio recording to
//! cloud AI services concurrently and merges the results into one report.
//!
//! Exit codes:
//!   0 - Success (at least one modality analyzed)
//!   1 - Runtime error, or every requested modality failed
//!   2 - A modality failed under --strict, or unsafe content under --fail-on-unsafe

mod analysis;
mod cli;
mod config;
mod error;
mod models;
mod report;
mod services;
mod staging;
mod storage;
mod translation;

use analysis::{Aggregator, JobTracker};
use anyhow::{Context, Result};
use cli::{Args, OutputFormat};
use config::{Config, JobStoreKind, JobsConfig, ServiceAccess, StorageConfig, CONFIG_FILE};
use indicatif::{ProgressBar, ProgressStyle};
use models::{AggregateResult, AnalysisRequest, JobRecord, JobStatus};
use report::Report;
use services::http::{PollSettings, ServiceClient};
use services::{
    AudioAnalyzer, BatchTranslatorClient, ContentSafetyClient, DocumentAnalyzer,
    FormRecognizerClient, ImageAnalyzer, LanguageClient, SafetyChecker, SpeechAudioAnalyzer,
    SpeechClient, TextAnalyzer, Unconfigured, VisionClient, VisionImageAnalyzer,
};
use staging::{Stager, StagingConfig};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use storage::{AzureBlobStore, BlobStore, FileJobStore, InMemoryJobStore, JobStore, SasSigner, StorageCredentials};
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;
use translation::TranslationFlow;

/// How often the job status is checked while waiting.
const STATUS_INTERVAL: Duration = Duration::from_millis(250);

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    // Initialize logging
    init_logging(&args);

    info!("DocInsight v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    match run(args).await {
        Ok(exit_code) => {
            std::process::exit(exit_code);
        }
        Err(e) => {
            error!("Analysis failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .docinsight.toml.
fn handle_init_config() -> Result<()> {
    let path = Path::new(CONFIG_FILE);

    if path.exists() {
        eprintln!("⚠️  {} already exists. Remove it first or edit it manually.", CONFIG_FILE);
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content).with_context(|| format!("Failed to write {}", CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", CONFIG_FILE);
    println!("   Service keys are read from the environment variables named in each section.");
    Ok(())
}

/// Initialize logging based on verbosity settings.
fn init_logging(args: &Args) {
    let level = args.log_level();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

/// Run the complete analysis workflow. Returns the exit code.
async fn run(args: Args) -> Result<i32> {
    let start_time = Instant::now();

    // Load configuration
    let mut config = load_config(&args)?;
    config.merge_with_args(&args);

    let request = build_request(&args);
    let requested = request.requested_modalities();

    // Step 1: Connect to services
    println!("🔌 Connecting to services...");
    let blob_store = build_blob_store(&config.storage, config.aggregator.timeout_seconds)?;
    let aggregator = build_aggregator(&config, blob_store.clone())?;
    let job_store = build_job_store(&config.jobs).await?;
    let tracker = JobTracker::new(
        Arc::new(aggregator),
        job_store,
        chrono::Duration::minutes(config.jobs.retention_minutes),
    );

    // Step 2: Stage local inputs
    println!("📤 Preparing inputs...");
    let mut stager = Stager::new(blob_store, StagingConfig::from(&config.storage));
    let staged = stager.stage(&request).await;

    // Step 3: Run the analysis as a tracked job
    let outcome = if staged.request.is_empty() {
        warn!("No input could be staged, skipping analysis");
        Ok((None, AggregateResult::default()))
    } else {
        println!(
            "\n🔬 Analyzing {} input(s), timeout {}s each...",
            staged.request.requested_modalities().len(),
            config.aggregator.timeout_seconds
        );
        run_job(&tracker, staged.request.clone(), args.quiet).await
    };

    if args.keep_staged {
        info!("Keeping {} staged upload(s)", stager.staged().len());
    } else {
        stager.cleanup().await;
    }

    let (job_id, mut analysis) = outcome?;
    analysis.failures.extend(staged.failures);
    analysis.failures.sort_by_key(|f| f.modality);

    // Step 4: Build and save the report
    println!("\n📝 Generating report...");

    let duration = start_time.elapsed().as_secs_f64();
    let report = Report::new(
        job_id,
        requested.clone(),
        request.target_language.clone(),
        analysis,
        duration,
    );

    let output = match args.format {
        OutputFormat::Json => report::generate_json_report(&report)?,
        OutputFormat::Markdown => report::generate_markdown_report(&report),
    };
    let output_path = Path::new(&config.general.output);
    report::write_report(&output, output_path)?;

    print_summary(&report);
    println!(
        "\n✅ Analysis complete! Report saved to: {}",
        output_path.display()
    );

    Ok(exit_code(&args, &report))
}

/// Submit the request, wait for the job to finish and return its result.
/// Ctrl-C cancels the job.
async fn run_job(
    tracker: &JobTracker,
    request: AnalysisRequest,
    quiet: bool,
) -> Result<(Option<String>, AggregateResult)> {
    let job_id = tracker
        .submit(request)
        .await
        .context("Failed to submit analysis job")?;

    let spinner = if quiet {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    };

    let record = wait_for_job(tracker, &job_id, &spinner).await;
    spinner.finish_and_clear();
    let record = record?;

    match record.status {
        JobStatus::Cancelled => anyhow::bail!("Job {} was cancelled", job_id),
        JobStatus::Failed => {
            if let Some(ref e) = record.error {
                warn!("Job {} failed: {}", job_id, e);
            }
        }
        _ => {}
    }

    Ok((Some(job_id), record.result.unwrap_or_default()))
}

async fn wait_for_job(tracker: &JobTracker, job_id: &str, spinner: &ProgressBar) -> Result<JobRecord> {
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;
    let mut interval = tokio::time::interval(STATUS_INTERVAL);

    loop {
        tokio::select! {
            _ = &mut ctrl_c, if !interrupted => {
                interrupted = true;
                warn!("Interrupted, cancelling job {}", job_id);
                tracker.cancel(job_id);
            }
            _ = interval.tick() => {}
        }

        let record = tracker
            .status(job_id)
            .await
            .context("Failed to read job status")?
            .with_context(|| format!("Job {} is no longer tracked", job_id))?;

        spinner.set_message(format!("Job {}: {}", job_id, record.status));
        if record.status.is_terminal() {
            return Ok(record);
        }
    }
}

/// Exit code for a finished run.
fn exit_code(args: &Args, report: &Report) -> i32 {
    let metadata = &report.metadata;

    if !metadata.requested.is_empty() && metadata.succeeded.is_empty() {
        eprintln!("\n⛔ Every requested modality failed (exit code 1).");
        return 1;
    }

    if args.strict && !metadata.failed.is_empty() {
        eprintln!("\n⛔ {} modality(ies) failed. Failing (exit code 2).", metadata.failed.len());
        return 2;
    }

    if args.fail_on_unsafe {
        if let Some(e) = report.analysis.moderation_error() {
            eprintln!("\n⛔ {}. Failing (exit code 2).", e);
            return 2;
        }
    }

    0
}

fn print_summary(report: &Report) {
    println!("\n📊 Analysis Summary:");
    for modality in &report.metadata.requested {
        if report.analysis.contains(*modality) {
            println!("   ✅ {}", modality.label());
        } else if let Some(failure) = report.analysis.failures.iter().find(|f| f.modality == *modality) {
            println!("   ❌ {}: {}", modality.label(), failure.message);
        }
    }
    for (modality, safety) in report.analysis.safety_reports() {
        if !safety.is_safe {
            println!("   ⚠️  {} flagged: {}", modality.label(), safety.flagged_summary());
        }
    }
    if let Some(url) = report
        .analysis
        .document_analysis
        .as_ref()
        .and_then(|d| d.translated_document_url.as_deref())
    {
        println!("   🌐 Translated document: {}", models::sanitize_reference(url));
    }
    println!("   Duration: {:.1}s", report.metadata.duration_seconds);
}

fn build_request(args: &Args) -> AnalysisRequest {
    let mut request = AnalysisRequest::new();
    if let Some(ref document) = args.document {
        request = request.with_document(document.trim());
    }
    if let Some(ref image) = args.image {
        request = request.with_image(image.trim());
    }
    if let Some(ref audio) = args.audio {
        request = request.with_audio(audio.clone());
    }
    if let Some(ref language) = args.translate_to {
        request = request.with_target_language(language.clone());
    }
    request
}

fn service_client(
    service: &'static str,
    access: Option<ServiceAccess>,
    timeout_seconds: u64,
) -> Result<Option<ServiceClient>> {
    match access {
        Some(access) => {
            debug!("{} endpoint: {}", service, access.endpoint);
            let client = ServiceClient::new(service, &access.endpoint, &access.key, timeout_seconds)?;
            Ok(Some(client))
        }
        None => {
            info!("{} is not configured", service);
            Ok(None)
        }
    }
}

/// Wire the service clients into an aggregator. Services without an
/// endpoint or key are replaced by stand-ins that fail their modality.
fn build_aggregator(config: &Config, blob_store: Option<Arc<dyn BlobStore>>) -> Result<Aggregator> {
    let timeout = config.aggregator.timeout_seconds;
    let poll = PollSettings {
        interval: Duration::from_millis(config.aggregator.poll_interval_ms),
        max_attempts: config.aggregator.max_polls,
    };

    let safety: Arc<dyn SafetyChecker> =
        match service_client("content safety", config.safety.access(), timeout)? {
            Some(client) => Arc::new(ContentSafetyClient::new(client, &config.safety.api_version)),
            None => Arc::new(Unconfigured::new("content safety")),
        };

    let document: Arc<dyn DocumentAnalyzer> =
        match service_client("document intelligence", config.document.access(), timeout)? {
            Some(client) => Arc::new(FormRecognizerClient::new(
                client,
                &config.document.api_version,
                &config.document.model,
                poll,
            )),
            None => Arc::new(Unconfigured::new("document intelligence")),
        };

    let image: Arc<dyn ImageAnalyzer> =
        match service_client("vision", config.vision.access(), timeout)? {
            Some(client) => Arc::new(VisionImageAnalyzer::new(
                Arc::new(VisionClient::new(client, &config.vision.api_version)),
                safety.clone(),
            )),
            None => Arc::new(Unconfigured::new("vision")),
        };

    let text: Arc<dyn TextAnalyzer> =
        match service_client("language", config.language.access(), timeout)? {
            Some(client) => Arc::new(LanguageClient::new(
                client,
                &config.language.api_version,
                &config.language.language,
                poll,
            )),
            None => Arc::new(Unconfigured::new("language")),
        };

    let audio: Arc<dyn AudioAnalyzer> =
        match service_client("speech", config.speech.access(), timeout)? {
            Some(client) => Arc::new(SpeechAudioAnalyzer::new(
                Arc::new(SpeechClient::new(client, &config.speech.language)),
                text,
                safety,
            )),
            None => Arc::new(Unconfigured::new("speech")),
        };

    let mut aggregator = Aggregator::new(document, image, audio)
        .with_timeout(Duration::from_secs(timeout))
        .with_redaction(config.aggregator.redact_unsafe);

    let translator = service_client("translator", config.translation.access(), timeout)?;
    match (blob_store, translator) {
        (Some(store), Some(client)) => {
            let translator = Arc::new(BatchTranslatorClient::new(client, poll));
            let flow = TranslationFlow::new(store, translator, config.storage.container.clone());
            aggregator = aggregator.with_translation(Arc::new(flow));
        }
        (None, Some(_)) => warn!("Translation needs blob storage, which is not configured"),
        _ => {}
    }

    Ok(aggregator)
}

fn build_blob_store(config: &StorageConfig, timeout_seconds: u64) -> Result<Option<Arc<dyn BlobStore>>> {
    let Some(connection_string) = config.connection_string() else {
        info!("blob storage is not configured");
        return Ok(None);
    };

    let credentials = StorageCredentials::from_connection_string(&connection_string)?;
    info!("Using storage account {}", credentials.account_name);

    let signer = SasSigner::new(
        credentials,
        chrono::Duration::minutes(config.grant_ttl_minutes),
        chrono::Duration::minutes(config.clock_skew_minutes),
    );
    let store = AzureBlobStore::new(signer, timeout_seconds)?;
    Ok(Some(Arc::new(store)))
}

async fn build_job_store(config: &JobsConfig) -> Result<Arc<dyn JobStore>> {
    match config.store {
        JobStoreKind::Memory => Ok(Arc::new(InMemoryJobStore::new())),
        JobStoreKind::File => {
            let store = FileJobStore::open(&config.directory)
                .await
                .with_context(|| format!("Failed to open job store at {}", config.directory.display()))?;
            Ok(Arc::new(store))
        }
    }
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<Config> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        return Config::load(config_path);
    }

    // Try default location
    match Config::load_default() {
        Ok(Some(config)) => {
            info!("Loaded default config from {}", CONFIG_FILE);
            Ok(config)
        }
        Ok(None) => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
        Err(e) => {
            warn!("Failed to load config: {}", e);
            Ok(Config::default())
        }
    }
}
