//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.docinsight.toml` files. Service keys are normally not written to the
//! file: each section names the environment variable holding its key and
//! endpoint.

use crate::services::SpeechClient;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default configuration file name.
pub const CONFIG_FILE: &str = ".docinsight.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Aggregation settings.
    #[serde(default)]
    pub aggregator: AggregatorConfig,

    /// Document understanding service.
    #[serde(default)]
    pub document: DocumentConfig,

    /// Image understanding service.
    #[serde(default)]
    pub vision: VisionConfig,

    /// Text analytics service.
    #[serde(default)]
    pub language: LanguageConfig,

    /// Speech-to-text service.
    #[serde(default)]
    pub speech: SpeechConfig,

    /// Content moderation service.
    #[serde(default)]
    pub safety: SafetyConfig,

    /// Document translation service.
    #[serde(default)]
    pub translation: TranslationConfig,

    /// Blob storage for staging and translation.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Job tracking.
    #[serde(default)]
    pub jobs: JobsConfig,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Default output file path.
    #[serde(default = "default_output")]
    pub output: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            output: default_output(),
        }
    }
}

fn default_output() -> String {
    "docinsight_report.md".to_string()
}

/// Aggregation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatorConfig {
    /// Bound on each modality's analysis, in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// Strip text content from results that fail moderation.
    #[serde(default = "default_true")]
    pub redact_unsafe: bool,

    /// Interval between long-running operation polls, in milliseconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Maximum polls per long-running operation.
    #[serde(default = "default_max_polls")]
    pub max_polls: usize,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout(),
            redact_unsafe: true,
            poll_interval_ms: default_poll_interval(),
            max_polls: default_max_polls(),
        }
    }
}

fn default_timeout() -> u64 {
    300
}

fn default_true() -> bool {
    true
}

fn default_poll_interval() -> u64 {
    1000
}

fn default_max_polls() -> usize {
    120
}

/// Endpoint and key of a configured service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceAccess {
    pub endpoint: String,
    pub key: String,
}

/// Inline value if set, else the named environment variable. Blank values
/// count as unset.
fn resolve(
    inline: &Option<String>,
    env_name: &str,
    lookup: &dyn Fn(&str) -> Option<String>,
) -> Option<String> {
    inline
        .clone()
        .or_else(|| lookup(env_name))
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_lookup(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn service_access(
    endpoint: &Option<String>,
    endpoint_env: &str,
    key: &Option<String>,
    key_env: &str,
    lookup: &dyn Fn(&str) -> Option<String>,
) -> Option<ServiceAccess> {
    Some(ServiceAccess {
        endpoint: resolve(endpoint, endpoint_env, lookup)?,
        key: resolve(key, key_env, lookup)?,
    })
}

/// Document understanding settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentConfig {
    pub endpoint: Option<String>,
    pub endpoint_env: String,
    pub key: Option<String>,
    pub key_env: String,
    pub api_version: String,
    pub model: String,
}

impl Default for DocumentConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            endpoint_env: "FORM_RECOGNIZER_ENDPOINT".to_string(),
            key: None,
            key_env: "FORM_RECOGNIZER_KEY".to_string(),
            api_version: crate::services::document::DEFAULT_API_VERSION.to_string(),
            model: crate::services::document::DEFAULT_MODEL.to_string(),
        }
    }
}

impl DocumentConfig {
    pub fn access(&self) -> Option<ServiceAccess> {
        self.access_with(&env_lookup)
    }

    fn access_with(&self, lookup: &dyn Fn(&str) -> Option<String>) -> Option<ServiceAccess> {
        service_access(&self.endpoint, &self.endpoint_env, &self.key, &self.key_env, lookup)
    }
}

/// Image understanding settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionConfig {
    pub endpoint: Option<String>,
    pub endpoint_env: String,
    pub key: Option<String>,
    pub key_env: String,
    pub api_version: String,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            endpoint_env: "VISION_ENDPOINT".to_string(),
            key: None,
            key_env: "VISION_KEY".to_string(),
            api_version: crate::services::vision::DEFAULT_API_VERSION.to_string(),
        }
    }
}

impl VisionConfig {
    pub fn access(&self) -> Option<ServiceAccess> {
        service_access(&self.endpoint, &self.endpoint_env, &self.key, &self.key_env, &env_lookup)
    }
}

/// Text analytics settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LanguageConfig {
    pub endpoint: Option<String>,
    pub endpoint_env: String,
    pub key: Option<String>,
    pub key_env: String,
    pub api_version: String,
    /// Language hint sent with transcripts.
    pub language: String,
}

impl Default for LanguageConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            endpoint_env: "TEXT_ANALYTICS_ENDPOINT".to_string(),
            key: None,
            key_env: "TEXT_ANALYTICS_KEY".to_string(),
            api_version: crate::services::language::DEFAULT_API_VERSION.to_string(),
            language: "en".to_string(),
        }
    }
}

impl LanguageConfig {
    pub fn access(&self) -> Option<ServiceAccess> {
        service_access(&self.endpoint, &self.endpoint_env, &self.key, &self.key_env, &env_lookup)
    }
}

/// Speech-to-text settings. The endpoint is derived from the region unless
/// given explicitly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    pub region: Option<String>,
    pub region_env: String,
    pub endpoint: Option<String>,
    pub key: Option<String>,
    pub key_env: String,
    /// Recognition locale.
    pub language: String,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            region: None,
            region_env: "SPEECH_REGION".to_string(),
            endpoint: None,
            key: None,
            key_env: "SPEECH_KEY".to_string(),
            language: "en-US".to_string(),
        }
    }
}

impl SpeechConfig {
    pub fn access(&self) -> Option<ServiceAccess> {
        self.access_with(&env_lookup)
    }

    fn access_with(&self, lookup: &dyn Fn(&str) -> Option<String>) -> Option<ServiceAccess> {
        let endpoint = match self.endpoint.as_deref().map(str::trim).filter(|e| !e.is_empty()) {
            Some(endpoint) => endpoint.to_string(),
            None => SpeechClient::endpoint_for_region(&resolve(&self.region, &self.region_env, lookup)?),
        };
        Some(ServiceAccess {
            endpoint,
            key: resolve(&self.key, &self.key_env, lookup)?,
        })
    }
}

/// Content moderation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    pub endpoint: Option<String>,
    pub endpoint_env: String,
    pub key: Option<String>,
    pub key_env: String,
    pub api_version: String,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            endpoint_env: "CONTENT_SAFETY_ENDPOINT".to_string(),
            key: None,
            key_env: "CONTENT_SAFETY_KEY".to_string(),
            api_version: crate::services::safety::DEFAULT_API_VERSION.to_string(),
        }
    }
}

impl SafetyConfig {
    pub fn access(&self) -> Option<ServiceAccess> {
        service_access(&self.endpoint, &self.endpoint_env, &self.key, &self.key_env, &env_lookup)
    }
}

/// Document translation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslationConfig {
    pub endpoint: Option<String>,
    pub endpoint_env: String,
    pub key: Option<String>,
    pub key_env: String,
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            endpoint_env: "DOCUMENT_TRANSLATION_ENDPOINT".to_string(),
            key: None,
            key_env: "DOCUMENT_TRANSLATION_KEY".to_string(),
        }
    }
}

impl TranslationConfig {
    pub fn access(&self) -> Option<ServiceAccess> {
        service_access(&self.endpoint, &self.endpoint_env, &self.key, &self.key_env, &env_lookup)
    }
}

/// Blob storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub connection_string: Option<String>,
    pub connection_string_env: String,
    /// Container for staged inputs and translated documents.
    pub container: String,
    /// Lifetime of read grants, in minutes.
    pub grant_ttl_minutes: i64,
    /// How far in the past grants start, in minutes.
    pub clock_skew_minutes: i64,
    /// Largest local input accepted, in MiB.
    pub max_upload_mb: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            connection_string: None,
            connection_string_env: "STORAGE_CONNECTION_STRING".to_string(),
            container: "docinsight-staging".to_string(),
            grant_ttl_minutes: 60,
            clock_skew_minutes: 5,
            max_upload_mb: 50,
        }
    }
}

impl StorageConfig {
    pub fn connection_string(&self) -> Option<String> {
        resolve(&self.connection_string, &self.connection_string_env, &env_lookup)
    }
}

/// Where job records are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStoreKind {
    #[default]
    Memory,
    File,
}

/// Job tracking settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    pub store: JobStoreKind,
    /// Directory for the file store.
    pub directory: PathBuf,
    /// How long finished jobs stay queryable, in minutes.
    pub retention_minutes: i64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            store: JobStoreKind::Memory,
            directory: PathBuf::from(".docinsight/jobs"),
            retention_minutes: 60,
        }
    }
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Reject values that would make every call fail immediately.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.aggregator.timeout_seconds > 0,
            "aggregator.timeout_seconds must be at least 1"
        );
        anyhow::ensure!(self.aggregator.max_polls > 0, "aggregator.max_polls must be at least 1");
        anyhow::ensure!(
            self.storage.grant_ttl_minutes > 0,
            "storage.grant_ttl_minutes must be at least 1"
        );
        anyhow::ensure!(self.storage.clock_skew_minutes >= 0, "storage.clock_skew_minutes must not be negative");
        anyhow::ensure!(self.storage.max_upload_mb > 0, "storage.max_upload_mb must be at least 1");
        anyhow::ensure!(self.jobs.retention_minutes >= 0, "jobs.retention_minutes must not be negative");
        Ok(())
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings.
    /// This method only overrides config when CLI provides explicit values.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        // The CLI default only applies when the file sets no other path
        if args.output != PathBuf::from(default_output()) {
            self.general.output = args.output.display().to_string();
        }

        if let Some(timeout) = args.timeout {
            self.aggregator.timeout_seconds = timeout;
        }

        // Flags always override
        if args.no_redact {
            self.aggregator.redact_unsafe = false;
        }
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Args, OutputFormat};
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| vars.get(name).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.aggregator.timeout_seconds, 300);
        assert!(config.aggregator.redact_unsafe);
        assert_eq!(config.document.key_env, "FORM_RECOGNIZER_KEY");
        assert_eq!(config.storage.connection_string_env, "STORAGE_CONNECTION_STRING");
        assert_eq!(config.storage.max_upload_mb, 50);
        assert_eq!(config.jobs.store, JobStoreKind::Memory);
    }

    #[test]
    fn test_parse_config() {
        let toml_content = r#"
[general]
output = "custom_report.md"

[aggregator]
timeout_seconds = 60
redact_unsafe = false

[vision]
endpoint = "https://vision.example.com"
key_env = "MY_VISION_KEY"

[jobs]
store = "file"
directory = "/tmp/jobs"
"#;

        let config: Config = toml::from_str(toml_content).unwrap();
        assert_eq!(config.general.output, "custom_report.md");
        assert_eq!(config.aggregator.timeout_seconds, 60);
        assert!(!config.aggregator.redact_unsafe);
        assert_eq!(config.aggregator.max_polls, 120);
        assert_eq!(config.vision.endpoint.as_deref(), Some("https://vision.example.com"));
        assert_eq!(config.vision.key_env, "MY_VISION_KEY");
        assert_eq!(config.vision.endpoint_env, "VISION_ENDPOINT");
        assert_eq!(config.jobs.store, JobStoreKind::File);
        assert_eq!(config.jobs.retention_minutes, 60);
    }

    #[test]
    fn test_service_access_resolution() {
        let mut document = DocumentConfig::default();
        let lookup = lookup_from(&[
            ("FORM_RECOGNIZER_ENDPOINT", "https://fr.example.com"),
            ("FORM_RECOGNIZER_KEY", "env-key"),
        ]);

        let access = document.access_with(&lookup).unwrap();
        assert_eq!(access.endpoint, "https://fr.example.com");
        assert_eq!(access.key, "env-key");

        // Inline values win over the environment
        document.key = Some("inline-key".to_string());
        assert_eq!(document.access_with(&lookup).unwrap().key, "inline-key");

        // Missing or blank key means not configured
        document.key = Some("  ".to_string());
        let no_key = lookup_from(&[("FORM_RECOGNIZER_ENDPOINT", "https://fr.example.com")]);
        assert!(document.access_with(&no_key).is_none());
    }

    #[test]
    fn test_speech_endpoint_from_region() {
        let speech = SpeechConfig::default();
        let lookup = lookup_from(&[("SPEECH_REGION", "westeurope"), ("SPEECH_KEY", "k")]);
        assert_eq!(
            speech.access_with(&lookup).unwrap().endpoint,
            "https://westeurope.stt.speech.microsoft.com"
        );
        assert!(speech.access_with(&lookup_from(&[("SPEECH_KEY", "k")])).is_none());
    }

    #[test]
    fn test_merge_with_args() {
        let args = Args {
            document: Some("a.pdf".to_string()),
            image: None,
            audio: None,
            translate_to: None,
            output: PathBuf::from("out.md"),
            format: OutputFormat::Markdown,
            config: None,
            verbose: true,
            quiet: false,
            timeout: Some(45),
            no_redact: true,
            fail_on_unsafe: false,
            strict: false,
            keep_staged: false,
            init_config: false,
        };

        let mut config = Config::default();
        config.merge_with_args(&args);
        assert_eq!(config.aggregator.timeout_seconds, 45);
        assert!(!config.aggregator.redact_unsafe);
        assert_eq!(config.general.output, "out.md");

        // The default output path leaves the configured one alone
        let mut config = Config::default();
        config.general.output = "from_file.md".to_string();
        config.merge_with_args(&Args {
            output: PathBuf::from("docinsight_report.md"),
            ..args
        });
        assert_eq!(config.general.output, "from_file.md");
    }

    #[test]
    fn test_zero_timeout_rejected() {
        assert!(Config::default().validate().is_ok());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "[aggregator]\ntimeout_seconds = 0\n").unwrap();

        let err = Config::load(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("timeout_seconds must be at least 1"));

        std::fs::write(&path, "[aggregator]\ntimeout_seconds = 10\n").unwrap();
        assert_eq!(Config::load(&path).unwrap().aggregator.timeout_seconds, 10);

        let mut config = Config::default();
        config.storage.max_upload_mb = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_toml_generation() {
        let toml_str = Config::default_toml();
        assert!(toml_str.contains("[general]"));
        assert!(toml_str.contains("[aggregator]"));
        assert!(toml_str.contains("[storage]"));
        assert!(toml_str.contains("key_env = \"VISION_KEY\""));

        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.speech.language, "en-US");
    }
}
