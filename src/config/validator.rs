use crate::config::{parse_duration, Config, SCHEMA_VERSION};
use crate::error::{MnemoError, Result, ValidationError};

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        // Validate schema version
        Self::validate_schema_version(config, &mut errors);

        // Validate storage settings
        Self::validate_storage(config, &mut errors);

        // Validate embedding settings
        Self::validate_embedding(config, &mut errors);

        // Validate retrieval scoring
        Self::validate_retrieval(config, &mut errors);

        // Validate worker settings
        Self::validate_worker(config, &mut errors);

        if config.pool.max_instances == 0 {
            errors.push(ValidationError::new(
                "pool.max_instances",
                "Pool size must be greater than 0",
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(MnemoError::ConfigValidation { errors })
        }
    }

    fn validate_schema_version(config: &Config, errors: &mut Vec<ValidationError>) {
        let version = &config.meta.schema_version;
        if version != SCHEMA_VERSION {
            errors.push(ValidationError::new(
                "_meta.schema_version",
                format!("Unsupported schema version: {}", version),
            ));
        }
    }

    fn validate_storage(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.storage.data_dir.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "storage.data_dir",
                "Data directory cannot be empty",
            ));
        }

        if config.storage.database.is_empty() {
            errors.push(ValidationError::new(
                "storage.database",
                "Database file name cannot be empty",
            ));
        }
    }

    fn validate_embedding(config: &Config, errors: &mut Vec<ValidationError>) {
        // Model files are checked when the embedder is created, after ~ expansion
        let embedding = &config.embedding;
        let positive = [
            ("embedding.dimension", embedding.dimension),
            ("embedding.max_sequence_length", embedding.max_sequence_length),
            ("embedding.batch_size", embedding.batch_size),
            ("embedding.intra_threads", embedding.intra_threads),
            ("embedding.max_input_chars", embedding.max_input_chars),
        ];
        for (path, value) in positive {
            if value == 0 {
                errors.push(ValidationError::new(path, "Value must be greater than 0"));
            }
        }

        if embedding.max_sequence_length < 2 {
            // room for [CLS] and [SEP]
            errors.push(ValidationError::new(
                "embedding.max_sequence_length",
                "Sequence length must leave room for special tokens",
            ));
        }
    }

    fn validate_retrieval(config: &Config, errors: &mut Vec<ValidationError>) {
        let retrieval = &config.retrieval;

        if retrieval.top_k == 0 {
            errors.push(ValidationError::new(
                "retrieval.top_k",
                "top_k must be greater than 0",
            ));
        }

        let score = retrieval.min_relevance_score;
        if !(0.0..=1.0).contains(&score) {
            errors.push(ValidationError::new(
                "retrieval.min_relevance_score",
                format!("Score must be between 0.0 and 1.0, got {}", score),
            ));
        }

        if retrieval.max_fragment_chars == Some(0) {
            errors.push(ValidationError::new(
                "retrieval.max_fragment_chars",
                "Character cap must be greater than 0 when set",
            ));
        }

        let weights = &retrieval.weights;
        let parts = [
            ("retrieval.weights.category", weights.category),
            ("retrieval.weights.content", weights.content),
            ("retrieval.weights.combined", weights.combined),
        ];
        for (path, weight) in parts {
            if !weight.is_finite() || weight < 0.0 {
                errors.push(ValidationError::new(
                    path,
                    format!("Weight must be a non-negative number, got {}", weight),
                ));
            }
        }
        if weights.combined <= 0.0 {
            errors.push(ValidationError::new(
                "retrieval.weights.combined",
                "Combined weight must be greater than 0",
            ));
        }

        let boost = &retrieval.keyword_boost;
        for (path, value) in [
            ("retrieval.keyword_boost.exact", boost.exact),
            ("retrieval.keyword_boost.fuzzy", boost.fuzzy),
        ] {
            if !(0.0..=1.0).contains(&value) {
                errors.push(ValidationError::new(
                    path,
                    format!("Boost must be between 0.0 and 1.0, got {}", value),
                ));
            }
        }
    }

    fn validate_worker(config: &Config, errors: &mut Vec<ValidationError>) {
        let worker = &config.worker;

        if worker.executable.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "worker.executable",
                "Worker executable cannot be empty",
            ));
        }

        if worker.model_path.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "worker.model_path",
                "Model path cannot be empty",
            ));
        }

        Self::check_duration("worker.request_timeout", &worker.request_timeout, errors);
        Self::check_duration("worker.poll_interval", &worker.poll_interval, errors);
        Self::check_duration("worker.pause_fallback", &worker.pause_fallback, errors);
        for (i, tier) in worker.pause_tiers.iter().enumerate() {
            Self::check_duration(
                &format!("worker.pause_tiers[{}].min_timeout", i),
                &tier.min_timeout,
                errors,
            );
            Self::check_duration(&format!("worker.pause_tiers[{}].pause", i), &tier.pause, errors);
        }

        let sampling = &worker.sampling;
        if !(0.0..=2.0).contains(&sampling.temperature) {
            errors.push(ValidationError::new(
                "worker.sampling.temperature",
                format!(
                    "Temperature must be between 0.0 and 2.0, got {}",
                    sampling.temperature
                ),
            ));
        }

        if !(0.0..=1.0).contains(&sampling.top_p) || sampling.top_p == 0.0 {
            errors.push(ValidationError::new(
                "worker.sampling.top_p",
                format!("top_p must be in (0.0, 1.0], got {}", sampling.top_p),
            ));
        }

        if sampling.max_tokens == 0 {
            errors.push(ValidationError::new(
                "worker.sampling.max_tokens",
                "max_tokens must be greater than 0",
            ));
        }
    }

    fn check_duration(path: &str, value: &str, errors: &mut Vec<ValidationError>) {
        match parse_duration(value) {
            Some(d) if !d.is_zero() => {}
            Some(_) => errors.push(ValidationError::new(path, "Duration must be greater than 0")),
            None => errors.push(ValidationError::new(
                path,
                format!("Invalid duration format: {}", value),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn errors_of(config: &Config) -> Vec<String> {
        match ConfigValidator::validate(config) {
            Err(MnemoError::ConfigValidation { errors }) => {
                errors.into_iter().map(|e| e.path).collect()
            }
            Err(other) => panic!("unexpected error: {}", other),
            Ok(()) => Vec::new(),
        }
    }

    #[test]
    fn test_valid_config() {
        let config = Config::default();
        assert!(ConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn test_zero_pool_size() {
        let mut config = Config::default();
        config.pool.max_instances = 0;
        assert_eq!(errors_of(&config), vec!["pool.max_instances"]);
    }

    #[test]
    fn test_bad_durations() {
        let mut config = Config::default();
        config.worker.request_timeout = "soon".to_string();
        config.worker.poll_interval = "0ms".to_string();
        assert_eq!(
            errors_of(&config),
            vec!["worker.request_timeout", "worker.poll_interval"]
        );
    }

    #[test]
    fn test_score_out_of_range() {
        let mut config = Config::default();
        config.retrieval.min_relevance_score = 1.5;
        config.worker.sampling.temperature = 3.0;
        let errors = errors_of(&config);
        assert!(errors.contains(&"retrieval.min_relevance_score".to_string()));
        assert!(errors.contains(&"worker.sampling.temperature".to_string()));
    }

    #[test]
    fn test_empty_model_path() {
        let mut config = Config::default();
        config.worker.model_path = PathBuf::new();
        assert_eq!(errors_of(&config), vec!["worker.model_path"]);
    }

    #[test]
    fn test_negative_weight() {
        let mut config = Config::default();
        config.retrieval.weights.category = -0.1;
        assert_eq!(errors_of(&config), vec!["retrieval.weights.category"]);
    }
}
