//! Library-side run configuration, built by the CLI from flags and env vars.

use crate::retry::RetryPolicy;
use crate::source::DEFAULT_SEARCH_LIMIT;
use crate::sweep::UnreadablePolicy;

pub const DEFAULT_CONCURRENCY: usize = 4;
pub const DEFAULT_QUALITY: &str = "192";

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Worker threads shared by every phase.
    pub concurrency: usize,
    /// Audio quality handed to the fetch backend (kbps, or a VBR level 0-10).
    pub quality: String,
    pub search_limit: usize,
    pub retry: RetryPolicy,
    pub unreadable: UnreadablePolicy,
}

impl PipelineConfig {
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_quality(mut self, quality: impl Into<String>) -> Self {
        self.quality = quality.into();
        self
    }

    pub fn with_unreadable(mut self, policy: UnreadablePolicy) -> Self {
        self.unreadable = policy;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            quality: DEFAULT_QUALITY.to_string(),
            search_limit: DEFAULT_SEARCH_LIMIT,
            retry: RetryPolicy::default(),
            unreadable: UnreadablePolicy::default(),
        }
    }
}
