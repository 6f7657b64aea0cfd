//! Question answering over stored fragments
//!
//! Ranks fragments for the question, renders them into the worker's chat
//! template and runs the prompt on a pooled worker.

use crate::config::{Config, RetrievalConfig};
use crate::error::{MnemoError, Result};
use crate::prompt::ChatTemplate;
use crate::retrieval::{RankedResult, RetrievalQuery, RetrievalRanker};
use crate::storage::FragmentStore;
use crate::worker::{AdapterState, Generation, WorkerPool};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Prompt and retrieval settings for the assistant
#[derive(Debug, Clone)]
pub struct AssistantSettings {
    pub template: ChatTemplate,
    pub system_prompt: String,
    pub retrieval: RetrievalConfig,
}

impl AssistantSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            template: config.worker.chat_template,
            system_prompt: config.worker.system_prompt.clone(),
            retrieval: config.retrieval.clone(),
        }
    }
}

/// A generated answer and the fragments it was grounded on
#[derive(Debug, Clone)]
pub struct Answer {
    pub text: String,
    pub sources: Vec<RankedResult>,
    pub generation: Generation,
}

pub struct Assistant {
    store: FragmentStore,
    ranker: Arc<RetrievalRanker>,
    pool: WorkerPool,
    settings: AssistantSettings,
}

impl Assistant {
    pub fn new(
        store: FragmentStore,
        ranker: RetrievalRanker,
        pool: WorkerPool,
        settings: AssistantSettings,
    ) -> Self {
        Self {
            store,
            ranker: Arc::new(ranker),
            pool,
            settings,
        }
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Query for a question with the configured retrieval defaults
    pub fn query(&self, question: &str) -> RetrievalQuery {
        RetrievalQuery::from_config(question, &self.settings.retrieval)
    }

    /// Rank on the blocking pool; embedding and SQLite calls are synchronous
    pub async fn retrieve(&self, query: RetrievalQuery) -> Result<Vec<RankedResult>> {
        let store = self.store.clone();
        let ranker = Arc::clone(&self.ranker);
        tokio::task::spawn_blocking(move || ranker.search(&store, &query))
            .await
            .map_err(|e| MnemoError::Other(e.into()))?
    }

    pub async fn ask(&self, question: &str) -> Result<Answer> {
        self.ask_with(self.query(question), std::future::pending::<()>())
            .await
    }

    /// Answer `query.text`, giving up the wait for a worker when `cancel` completes
    pub async fn ask_with<F>(&self, query: RetrievalQuery, cancel: F) -> Result<Answer>
    where
        F: Future<Output = ()>,
    {
        let question = query.text.clone();
        let sources = self.retrieve(query).await?;
        info!("Retrieved {} fragments for question", sources.len());

        let fragments: Vec<_> = sources.iter().map(|r| r.fragment.clone()).collect();
        let prompt = self
            .settings
            .template
            .render(&self.settings.system_prompt, &fragments, &question);
        debug!("Prompt is {} bytes", prompt.len());

        let lease = self.pool.acquire_until(cancel).await?;
        let generation = lease.generate(&prompt).await;
        lease.release();
        let generation = generation?;

        if !generation.is_usable() {
            warn!(
                "Worker finished in state {} without a usable response",
                generation.state
            );
            return Err(MnemoError::EmptyResponse);
        }
        if generation.state == AdapterState::TimedOut {
            warn!("Response was cut off by the request timeout");
        }

        Ok(Answer {
            text: generation.text.clone(),
            sources,
            generation,
        })
    }
}
