// Worker handle: one serialized request slot bound to a worker spec

use super::{resolve_executable, Generation, ProcessAdapter, SamplingParams, WorkerSpec};
use crate::error::{MnemoError, Result};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Owned reference to one worker and its health metadata
///
/// Requests on one handle never overlap: `generate` holds the handle's
/// in-flight lock for the whole request.
#[derive(Debug)]
pub struct WorkerHandle {
    id: Uuid,
    adapter: ProcessAdapter,
    generation: u64,
    healthy: AtomicBool,
    disposed: AtomicBool,
    last_used: Mutex<DateTime<Utc>>,
    in_flight: tokio::sync::Mutex<()>,
}

impl WorkerHandle {
    /// Create a handle after checking that the executable and model exist
    pub async fn create(spec: Arc<WorkerSpec>, generation: u64) -> Result<Self> {
        if resolve_executable(&spec.executable).is_none() {
            return Err(MnemoError::ModelFileMissing {
                kind: "worker executable",
                path: spec.executable.clone(),
            });
        }

        let model_exists = tokio::fs::try_exists(&spec.model_path)
            .await
            .unwrap_or(false);
        if !model_exists {
            return Err(MnemoError::ModelFileMissing {
                kind: "language model",
                path: spec.model_path.clone(),
            });
        }

        let handle = Self {
            id: Uuid::new_v4(),
            adapter: ProcessAdapter::new(spec),
            generation,
            healthy: AtomicBool::new(true),
            disposed: AtomicBool::new(false),
            last_used: Mutex::new(Utc::now()),
            in_flight: tokio::sync::Mutex::new(()),
        };
        debug!("Created worker handle {} (generation {})", handle.id, generation);
        Ok(handle)
    }

    /// Run a request with the spec's sampling parameters
    pub async fn generate(&self, prompt: &str) -> Result<Generation> {
        let params = self.adapter.spec().sampling.clone();
        self.generate_with(prompt, &params).await
    }

    /// Run a request, marking the handle unhealthy if the worker failed
    pub async fn generate_with(&self, prompt: &str, params: &SamplingParams) -> Result<Generation> {
        if self.is_disposed() {
            return Err(MnemoError::Worker(format!(
                "worker handle {} has been disposed",
                self.id
            )));
        }

        let _guard = self.in_flight.lock().await;
        self.touch();

        let result = self.adapter.run_with(prompt, params).await;
        match &result {
            Ok(generation) if generation.crashed => {
                warn!("Worker {} crashed (exit code {:?})", self.id, generation.exit_code);
                self.mark_unhealthy();
            }
            Err(e) => {
                warn!("Worker {} request failed: {}", self.id, e);
                self.mark_unhealthy();
            }
            Ok(_) => {}
        }

        self.touch();
        result
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire) && !self.is_disposed()
    }

    pub fn mark_unhealthy(&self) {
        self.healthy.store(false, Ordering::Release);
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Retire the handle; later requests fail
    ///
    /// Worker processes live only for the duration of a request, and the
    /// adapter kills them on every exit path, so nothing is left to reap.
    pub fn dispose(&self) {
        if !self.disposed.swap(true, Ordering::AcqRel) {
            debug!("Disposed worker handle {}", self.id);
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Pool generation the handle was created in
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn spec(&self) -> &WorkerSpec {
        self.adapter.spec()
    }

    pub fn request_timeout(&self) -> Duration {
        self.adapter.spec().request_timeout
    }

    pub fn last_used(&self) -> DateTime<Utc> {
        *self.last_used.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn touch(&self) {
        *self.last_used.lock().unwrap_or_else(PoisonError::into_inner) = Utc::now();
    }
}
