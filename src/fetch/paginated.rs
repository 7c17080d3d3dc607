//! Multi-page retrieval for one named query.
//!
//! Page 1 is fetched first and reported immediately. The remaining pages are
//! split into chunks: the first chunk starts right away, every later chunk is
//! armed at a cumulative offset from the start of the fetch. Chunk timers are
//! independent, so a slow chunk never holds back the next one. Once every
//! chunk has resolved, all records are reported once more as the final batch.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, warn};

use crate::fetch::pagination::{
    caller_per_page, caller_pins_page, effective_per_page, paginate_endpoint, PagePlan,
};
use crate::fetch::transport::{HttpTransport, TransportError};
use crate::query::definition::{response_total, QueryDefinition, Record, ResponseExtractor};

/// Default spacing between page chunks (5 minutes).
pub const DEFAULT_PAGE_INTERVAL: Duration = Duration::from_millis(300_000);

/// Default number of pages fetched together.
pub const DEFAULT_PAGE_CHUNK_SIZE: usize = 5;

/// Fetcher tuning.
#[derive(Debug, Clone)]
pub struct FetchSettings {
    /// Requested page size, already clamped to `[100, 1000]`.
    pub per_page: u64,

    /// Pages per chunk.
    pub chunk_size: usize,

    /// Offset between consecutive chunk starts.
    pub query_interval: Duration,

    /// Extractor for queries that do not bring their own.
    pub extractor: ResponseExtractor,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            per_page: effective_per_page(Some(500)),
            chunk_size: DEFAULT_PAGE_CHUNK_SIZE,
            query_interval: DEFAULT_PAGE_INTERVAL,
            extractor: ResponseExtractor::default(),
        }
    }
}

/// A chunk of pages whose records were left out of the final batch.
#[derive(Debug, Clone)]
pub struct ChunkFailure {
    pub index: usize,
    pub pages: Vec<u64>,
    pub error: TransportError,
}

/// What a completed fetch did.
#[derive(Debug, Clone, Default)]
pub struct FetchSummary {
    /// `total` reported by the first page.
    pub total: u64,
    pub pages_requested: usize,
    /// Records delivered in the final batch.
    pub records: usize,
    pub failed_chunks: Vec<ChunkFailure>,
}

impl FetchSummary {
    /// True when no chunk was dropped from the final batch.
    pub fn is_complete(&self) -> bool {
        self.failed_chunks.is_empty()
    }
}

pub struct PaginatedFetcher {
    transport: Arc<dyn HttpTransport>,
    settings: FetchSettings,
}

impl PaginatedFetcher {
    pub fn new(transport: Arc<dyn HttpTransport>, settings: FetchSettings) -> Self {
        Self {
            transport,
            settings,
        }
    }

    pub fn settings(&self) -> &FetchSettings {
        &self.settings
    }

    /// Fetch every page of `query`, reporting batches through `on_batch(items, partial)`.
    ///
    /// `on_batch` is called once with `partial = false` when page 1 already holds
    /// everything, or when the endpoint carries its own `page` parameter. Otherwise it is called with page 1 and `partial = true`, then
    /// exactly once more with all records and `partial = false`. A failed page 1
    /// is returned as an error without any callback; failed later chunks are
    /// recorded in the summary and skipped.
    pub async fn fetch<F>(
        &self,
        query: &QueryDefinition,
        mut on_batch: F,
    ) -> Result<FetchSummary, TransportError>
    where
        F: FnMut(Vec<Record>, bool),
    {
        let started = Instant::now();
        let extractor = query.extractor.as_ref().unwrap_or(&self.settings.extractor);
        let per_page = caller_per_page(&query.endpoint).unwrap_or(self.settings.per_page);

        let raw = self.request_page(query, 1).await?;
        let first = extractor.extract(&raw);
        let total = response_total(&raw);

        let mut summary = FetchSummary {
            total,
            pages_requested: 1,
            ..Default::default()
        };

        // An endpoint that pins its own page is a single page by definition.
        if total == 0 || total <= first.len() as u64 || caller_pins_page(&query.endpoint) {
            summary.records = first.len();
            on_batch(first, false);
            return Ok(summary);
        }

        on_batch(first.clone(), true);

        let plan = PagePlan::new(total, per_page, self.settings.chunk_size);
        debug!(
            key = %query.key,
            total,
            per_page,
            remaining = plan.page_count(),
            chunks = plan.chunks.len(),
            "Paginating"
        );

        let interval = self.settings.query_interval;
        let chunk_futures = plan.chunks.iter().enumerate().map(|(index, pages)| {
            let start_at = started + interval * index as u32;
            async move {
                if index > 0 {
                    sleep_until(start_at).await;
                }
                debug!(key = %query.key, index, ?pages, "Fetching page chunk");

                let responses =
                    join_all(pages.iter().map(|&page| self.request_page(query, page))).await;

                let mut items = Vec::new();
                for response in responses {
                    match response {
                        Ok(raw) => items.extend(extractor.extract(&raw)),
                        Err(error) => {
                            return Err(ChunkFailure {
                                index,
                                pages: pages.clone(),
                                error,
                            })
                        }
                    }
                }
                Ok(items)
            }
        });

        let mut all = first;
        for outcome in join_all(chunk_futures).await {
            match outcome {
                Ok(items) => all.extend(items),
                Err(failure) => {
                    warn!(
                        key = %query.key,
                        chunk = failure.index,
                        pages = ?failure.pages,
                        "Page chunk failed, leaving it out: {}",
                        failure.error
                    );
                    summary.failed_chunks.push(failure);
                }
            }
        }

        summary.pages_requested += plan.page_count();
        summary.records = all.len();
        on_batch(all, false);

        Ok(summary)
    }

    async fn request_page(
        &self,
        query: &QueryDefinition,
        page: u64,
    ) -> Result<serde_json::Value, TransportError> {
        let url = paginate_endpoint(&query.endpoint, page, self.settings.per_page);
        self.transport
            .request(&query.method, &url, &query.params)
            .await
    }
}
