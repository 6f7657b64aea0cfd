//! Configuration management for mnemo
//!
//! One TOML file describes storage, the embedding model, retrieval scoring,
//! the worker executable and the pool size. Named profiles and `MNEMO_*`
//! environment variables override individual values.

use crate::embedding::{EmbedderOptions, DEFAULT_MAX_INPUT_CHARS};
use crate::error::{MnemoError, Result};
use crate::prompt::ChatTemplate;
use crate::retrieval::{KeywordBoost, Language, SimilarityWeights, StopWordLevel};
use crate::worker::{PauseTier, PauseTiers, SamplingParams, WorkerSpec};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

mod validator;

pub use validator::ConfigValidator;

pub const SCHEMA_VERSION: &str = "1.0.0";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: MetaConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub profiles: HashMap<String, ProfileOverrides>,
}

/// Metadata about the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    pub schema_version: String,
    #[serde(default = "current_timestamp")]
    pub created_at: String,
    #[serde(default = "current_timestamp")]
    pub last_modified: String,
}

fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    /// Database file name inside `data_dir`
    pub database: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("~/.mnemo"),
            database: "fragments.db".to_string(),
        }
    }
}

impl StorageConfig {
    pub fn database_path(&self) -> Result<PathBuf> {
        Ok(expand_tilde(&self.data_dir)?.join(&self.database))
    }
}

/// Embedding model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub model_path: PathBuf,
    pub tokenizer_path: PathBuf,
    pub dimension: usize,
    pub max_sequence_length: usize,
    pub batch_size: usize,
    pub low_memory: bool,
    pub intra_threads: usize,
    pub max_input_chars: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_name: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("~/.mnemo/models/all-MiniLM-L6-v2/model.onnx"),
            tokenizer_path: PathBuf::from("~/.mnemo/models/all-MiniLM-L6-v2/tokenizer.json"),
            dimension: 384,
            max_sequence_length: 256,
            batch_size: 32,
            low_memory: false,
            intra_threads: 1,
            max_input_chars: DEFAULT_MAX_INPUT_CHARS,
            output_name: None,
        }
    }
}

impl EmbeddingConfig {
    pub fn to_options(&self) -> Result<EmbedderOptions> {
        Ok(EmbedderOptions {
            model_path: expand_tilde(&self.model_path)?,
            tokenizer_path: expand_tilde(&self.tokenizer_path)?,
            dimension: self.dimension,
            max_sequence_length: self.max_sequence_length,
            batch_size: self.batch_size,
            low_memory: self.low_memory,
            intra_threads: self.intra_threads,
            max_input_chars: self.max_input_chars,
            output_name: self.output_name.clone(),
        })
    }
}

/// Retrieval scoring configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
    pub min_relevance_score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_fragment_chars: Option<usize>,
    pub language: Language,
    pub stop_words: StopWordLevel,
    pub weights: SimilarityWeights,
    pub keyword_boost: KeywordBoost,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            min_relevance_score: 0.5,
            max_fragment_chars: Some(1200),
            language: Language::English,
            stop_words: StopWordLevel::Auto,
            weights: SimilarityWeights::default(),
            keyword_boost: KeywordBoost::default(),
        }
    }
}

/// One `[[worker.pause_tiers]]` row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PauseTierConfig {
    pub min_timeout: String,
    pub pause: String,
}

/// Worker executable configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub executable: PathBuf,
    pub model_path: PathBuf,
    pub extra_args: Vec<String>,
    pub request_timeout: String,
    pub poll_interval: String,
    pub chat_template: ChatTemplate,
    pub system_prompt: String,
    pub sampling: SamplingParams,
    pub pause_tiers: Vec<PauseTierConfig>,
    pub pause_fallback: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        let defaults = PauseTiers::default();
        Self {
            executable: PathBuf::from("llama-cli"),
            model_path: PathBuf::from("~/.mnemo/models/qwen2.5-1.5b-instruct-q4_k_m.gguf"),
            extra_args: vec!["--no-display-prompt".to_string(), "-no-cnv".to_string()],
            request_timeout: "120s".to_string(),
            poll_interval: "100ms".to_string(),
            chat_template: ChatTemplate::ChatMl,
            system_prompt: "You are a helpful assistant. Answer using the provided context when it is relevant."
                .to_string(),
            sampling: SamplingParams::default(),
            pause_tiers: defaults
                .tiers()
                .iter()
                .map(|tier| PauseTierConfig {
                    min_timeout: format_duration(tier.min_timeout),
                    pause: format_duration(tier.pause),
                })
                .collect(),
            pause_fallback: format_duration(defaults.fallback()),
        }
    }
}

impl WorkerConfig {
    pub fn pause_tiers(&self) -> Result<PauseTiers> {
        let tiers = self
            .pause_tiers
            .iter()
            .enumerate()
            .map(|(i, tier)| -> Result<PauseTier> {
                Ok(PauseTier {
                    min_timeout: parse_duration_at(
                        &tier.min_timeout,
                        &format!("worker.pause_tiers[{}].min_timeout", i),
                    )?,
                    pause: parse_duration_at(&tier.pause, &format!("worker.pause_tiers[{}].pause", i))?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let fallback = parse_duration_at(&self.pause_fallback, "worker.pause_fallback")?;
        Ok(PauseTiers::new(tiers, fallback))
    }

    /// Build the spec every pool handle is bound to
    pub fn to_spec(&self) -> Result<WorkerSpec> {
        Ok(WorkerSpec {
            executable: expand_tilde(&self.executable)?,
            model_path: expand_tilde(&self.model_path)?,
            extra_args: self.extra_args.clone(),
            sampling: self.sampling.clone(),
            request_timeout: parse_duration_at(&self.request_timeout, "worker.request_timeout")?,
            poll_interval: parse_duration_at(&self.poll_interval, "worker.poll_interval")?,
            pause_tiers: self.pause_tiers()?,
        })
    }
}

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub max_instances: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self { max_instances: 2 }
    }
}

/// Profile-specific configuration overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_model: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_executable: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_template: Option<ChatTemplate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_timeout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_instances: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub low_memory: Option<bool>,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = Self::read(path)?;

        // Apply environment variable overrides
        config.apply_env_overrides();

        ConfigValidator::validate(&config)?;
        Ok(config)
    }

    fn read(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(MnemoError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| MnemoError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        Ok(toml::from_str(&content)?)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| MnemoError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Load configuration with a specific profile applied
    ///
    /// The profile is applied before environment overrides, so `MNEMO_*`
    /// variables still win.
    pub fn load_with_profile(path: &Path, profile: &str) -> Result<Self> {
        let mut config = Self::read(path)?;
        config.apply_profile(profile)?;
        config.apply_env_overrides();
        ConfigValidator::validate(&config)?;
        Ok(config)
    }

    /// Apply a profile's overrides to the configuration
    pub fn apply_profile(&mut self, profile: &str) -> Result<()> {
        let overrides = self
            .profiles
            .get(profile)
            .cloned()
            .ok_or_else(|| MnemoError::Config(format!("Unknown profile: {}", profile)))?;

        if let Some(model) = overrides.worker_model {
            self.worker.model_path = model;
        }
        if let Some(executable) = overrides.worker_executable {
            self.worker.executable = executable;
        }
        if let Some(template) = overrides.chat_template {
            self.worker.chat_template = template;
        }
        if let Some(timeout) = overrides.request_timeout {
            self.worker.request_timeout = timeout;
        }
        if let Some(max_instances) = overrides.max_instances {
            self.pool.max_instances = max_instances;
        }
        if let Some(low_memory) = overrides.low_memory {
            self.embedding.low_memory = low_memory;
        }
        tracing::debug!("Applied profile {}", profile);
        Ok(())
    }

    /// Apply environment variable overrides
    /// Environment variables in format: MNEMO_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(std::env::vars());
    }

    /// Apply `MNEMO_*` overrides from an arbitrary key/value source
    pub fn apply_overrides_from<I>(&mut self, vars: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            if let Some(config_key) = key.strip_prefix("MNEMO_") {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        match path {
            "STORAGE__DATA_DIR" => self.storage.data_dir = PathBuf::from(value),
            "EMBEDDING__MODEL_PATH" => self.embedding.model_path = PathBuf::from(value),
            "EMBEDDING__TOKENIZER_PATH" => self.embedding.tokenizer_path = PathBuf::from(value),
            "EMBEDDING__DIMENSION" => self.embedding.dimension = parse_env(path, value)?,
            "EMBEDDING__LOW_MEMORY" => self.embedding.low_memory = parse_env(path, value)?,
            "RETRIEVAL__TOP_K" => self.retrieval.top_k = parse_env(path, value)?,
            "RETRIEVAL__MIN_RELEVANCE_SCORE" => {
                self.retrieval.min_relevance_score = parse_env(path, value)?
            }
            "RETRIEVAL__LANGUAGE" => {
                self.retrieval.language =
                    value
                        .parse()
                        .map_err(|message| MnemoError::InvalidConfigValue {
                            path: path.to_string(),
                            message,
                        })?
            }
            "WORKER__EXECUTABLE" => self.worker.executable = PathBuf::from(value),
            "WORKER__MODEL_PATH" => self.worker.model_path = PathBuf::from(value),
            "WORKER__REQUEST_TIMEOUT" => self.worker.request_timeout = value.to_string(),
            "POOL__MAX_INSTANCES" => self.pool.max_instances = parse_env(path, value)?,
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| MnemoError::Config("Cannot determine config directory".to_string()))?;

        Ok(config_dir.join("mnemo").join("config.toml"))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            meta: MetaConfig {
                schema_version: SCHEMA_VERSION.to_string(),
                created_at: current_timestamp(),
                last_modified: current_timestamp(),
            },
            storage: StorageConfig::default(),
            embedding: EmbeddingConfig::default(),
            retrieval: RetrievalConfig::default(),
            worker: WorkerConfig::default(),
            pool: PoolConfig::default(),
            profiles: HashMap::new(),
        }
    }
}

fn parse_env<T: std::str::FromStr>(path: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| MnemoError::InvalidConfigValue {
        path: path.to_string(),
        message: format!("Cannot parse '{}'", value),
    })
}

/// Parse duration strings like "100ms", "5s", "2m", "1h"; bare numbers are seconds
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    let (number, unit) = match s.find(|c: char| !c.is_ascii_digit()) {
        Some(split) => s.split_at(split),
        None => (s, "s"),
    };
    let value: u64 = number.parse().ok()?;

    match unit {
        "ms" => Some(Duration::from_millis(value)),
        "s" => Some(Duration::from_secs(value)),
        "m" => Some(Duration::from_secs(value * 60)),
        "h" => Some(Duration::from_secs(value * 3600)),
        _ => None,
    }
}

fn parse_duration_at(s: &str, path: &str) -> Result<Duration> {
    parse_duration(s).ok_or_else(|| MnemoError::InvalidConfigValue {
        path: path.to_string(),
        message: format!("Invalid duration format: {}", s),
    })
}

/// Inverse of [`parse_duration`] for whole seconds and milliseconds
pub fn format_duration(duration: Duration) -> String {
    if duration.subsec_millis() == 0 {
        format!("{}s", duration.as_secs())
    } else {
        format!("{}ms", duration.as_millis())
    }
}

/// Expand a leading `~/` to the home directory
pub fn expand_tilde(path: &Path) -> Result<PathBuf> {
    match path.strip_prefix("~") {
        Ok(rest) => {
            let home = dirs::home_dir()
                .ok_or_else(|| MnemoError::Config("Cannot determine home directory".to_string()))?;
            Ok(home.join(rest))
        }
        Err(_) => Ok(path.to_path_buf()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("100ms"), Some(Duration::from_millis(100)));
        assert_eq!(parse_duration("5s"), Some(Duration::from_secs(5)));
        assert_eq!(parse_duration("2m"), Some(Duration::from_secs(120)));
        assert_eq!(parse_duration("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration("30"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("fast"), None);
        assert_eq!(parse_duration("5d"), None);
        assert_eq!(parse_duration(""), None);
    }

    #[test]
    fn test_format_duration_round_trips_defaults() {
        for d in [Duration::from_secs(120), Duration::from_millis(100)] {
            assert_eq!(parse_duration(&format_duration(d)), Some(d));
        }
    }

    #[test]
    fn test_expand_tilde() {
        let home = dirs::home_dir().unwrap();
        assert_eq!(
            expand_tilde(Path::new("~/models/a.gguf")).unwrap(),
            home.join("models/a.gguf")
        );
        assert_eq!(
            expand_tilde(Path::new("/abs/path")).unwrap(),
            PathBuf::from("/abs/path")
        );
    }

    #[test]
    fn test_default_worker_spec() {
        let spec = Config::default().worker.to_spec().unwrap();
        assert_eq!(spec.request_timeout, Duration::from_secs(120));
        assert_eq!(spec.poll_interval, Duration::from_millis(100));
        assert_eq!(spec.pause_tiers, PauseTiers::default());
        assert_eq!(spec.pause_threshold(), Duration::from_secs(10));
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");

        let mut config = Config::default();
        config.pool.max_instances = 3;
        config.retrieval.language = Language::German;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.pool.max_instances, 3);
        assert_eq!(loaded.retrieval.language, Language::German);
        assert_eq!(loaded.worker.pause_tiers.len(), 3);
    }

    #[test]
    fn test_minimal_file_uses_section_defaults() {
        let config: Config = toml::from_str(
            r#"
            [_meta]
            schema_version = "1.0.0"

            [worker]
            model_path = "/models/phi3.gguf"
            chat_template = "phi3"
            "#,
        )
        .unwrap();

        assert_eq!(config.worker.model_path, PathBuf::from("/models/phi3.gguf"));
        assert_eq!(config.worker.chat_template, ChatTemplate::Phi3);
        assert_eq!(config.worker.request_timeout, "120s");
        assert_eq!(config.pool.max_instances, 2);
        assert_eq!(config.embedding.dimension, 384);
    }

    #[test]
    fn test_missing_file() {
        let err = Config::load(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, MnemoError::ConfigNotFound { .. }));
    }

    #[test]
    fn test_profile_overrides() {
        let mut config = Config::default();
        config.profiles.insert(
            "small".to_string(),
            ProfileOverrides {
                worker_model: Some(PathBuf::from("/models/tiny.gguf")),
                max_instances: Some(1),
                low_memory: Some(true),
                ..ProfileOverrides::default()
            },
        );

        config.apply_profile("small").unwrap();
        assert_eq!(config.worker.model_path, PathBuf::from("/models/tiny.gguf"));
        assert_eq!(config.pool.max_instances, 1);
        assert!(config.embedding.low_memory);

        assert!(config.apply_profile("missing").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_overrides_from(vec![
            ("MNEMO_POOL__MAX_INSTANCES".to_string(), "4".to_string()),
            ("MNEMO_RETRIEVAL__MIN_RELEVANCE_SCORE".to_string(), "0.25".to_string()),
            ("MNEMO_RETRIEVAL__LANGUAGE".to_string(), "de".to_string()),
            ("MNEMO_WORKER__REQUEST_TIMEOUT".to_string(), "30s".to_string()),
            ("MNEMO_EMBEDDING__DIMENSION".to_string(), "not-a-number".to_string()),
            ("OTHER_VAR".to_string(), "ignored".to_string()),
        ]);

        assert_eq!(config.pool.max_instances, 4);
        assert_eq!(config.retrieval.min_relevance_score, 0.25);
        assert_eq!(config.retrieval.language, Language::German);
        assert_eq!(config.worker.request_timeout, "30s");
        // unparsable values are skipped
        assert_eq!(config.embedding.dimension, 384);
    }
}
