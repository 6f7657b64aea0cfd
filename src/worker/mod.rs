//! Language-model worker processes
//!
//! A bounded pool of worker handles gates access to an external inference
//! executable. Each request spawns the executable, streams its output through
//! the marker state machine in [`adapter`], and returns cleaned text.
//! Architecture:
//! - `WorkerPool` owns the handles and the admission semaphore
//! - `WorkerHandle` serializes requests and tracks health
//! - `ProcessAdapter` runs one request against one child process

mod adapter;
mod handle;
pub mod markers;
mod pool;
mod timing;

pub use adapter::{AdapterState, Generation, ProcessAdapter};
pub use handle::WorkerHandle;
pub use pool::{PoolStats, WorkerLease, WorkerPool};
pub use timing::{PauseTier, PauseTiers};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Sampling parameters forwarded to the worker executable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingParams {
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub repeat_penalty: f32,
    pub presence_penalty: f32,
    pub frequency_penalty: f32,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            max_tokens: 512,
            temperature: 0.7,
            top_p: 0.9,
            top_k: 40,
            repeat_penalty: 1.1,
            presence_penalty: 0.0,
            frequency_penalty: 0.0,
        }
    }
}

/// Everything needed to launch a worker: binary, model and request limits
///
/// The pool binds every handle to one spec; swapping the active model means
/// reinitializing the pool with a new spec.
#[derive(Debug, Clone)]
pub struct WorkerSpec {
    pub executable: PathBuf,
    pub model_path: PathBuf,
    pub extra_args: Vec<String>,
    pub sampling: SamplingParams,
    pub request_timeout: Duration,
    pub poll_interval: Duration,
    pub pause_tiers: PauseTiers,
}

impl WorkerSpec {
    pub fn new(executable: impl Into<PathBuf>, model_path: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            model_path: model_path.into(),
            extra_args: Vec::new(),
            sampling: SamplingParams::default(),
            request_timeout: Duration::from_secs(120),
            poll_interval: Duration::from_millis(100),
            pause_tiers: PauseTiers::default(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_pause_tiers(mut self, tiers: PauseTiers) -> Self {
        self.pause_tiers = tiers;
        self
    }

    pub fn with_sampling(mut self, sampling: SamplingParams) -> Self {
        self.sampling = sampling;
        self
    }

    pub fn with_extra_args(mut self, args: Vec<String>) -> Self {
        self.extra_args = args;
        self
    }

    /// Silence threshold that ends a streaming response for this spec
    pub fn pause_threshold(&self) -> Duration {
        self.pause_tiers.pause_for(self.request_timeout)
    }

    /// Command-line arguments for one request
    pub fn command_args(&self, prompt: &str, params: &SamplingParams) -> Vec<String> {
        let mut args = vec![
            "-m".to_string(),
            self.model_path.to_string_lossy().into_owned(),
            "-p".to_string(),
            prompt.to_string(),
            "-n".to_string(),
            params.max_tokens.to_string(),
            "--temp".to_string(),
            params.temperature.to_string(),
            "--top-p".to_string(),
            params.top_p.to_string(),
            "--top-k".to_string(),
            params.top_k.to_string(),
            "--repeat-penalty".to_string(),
            params.repeat_penalty.to_string(),
            "--presence-penalty".to_string(),
            params.presence_penalty.to_string(),
            "--frequency-penalty".to_string(),
            params.frequency_penalty.to_string(),
        ];
        args.extend(self.extra_args.iter().cloned());
        args
    }
}

/// Resolve an executable path, searching `PATH` for bare names
pub fn resolve_executable(executable: &Path) -> Option<PathBuf> {
    if executable.components().count() > 1 || executable.is_absolute() {
        return executable.is_file().then(|| executable.to_path_buf());
    }

    let search_path = std::env::var_os("PATH")?;
    std::env::split_paths(&search_path)
        .map(|dir| dir.join(executable))
        .find(|candidate| candidate.is_file())
}
