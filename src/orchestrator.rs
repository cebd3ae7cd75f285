use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Instant;

use serde::Serialize;
use tracing::{info, info_span, warn};

use crate::app::{ProgressEvent, ProgressSink};
use crate::domain::{Batch, EntityId, Feature, SearchMode, SearchTerm, dedup_ordered, partition};
use crate::error::KiraError;
use crate::query::{FEATURE_ENDPOINT, FeatureQuery};
use crate::rate_limit::RateLimiter;
use crate::retry::{ApiStatsSnapshot, CallOutcome, FailureKind, RetryClient};
use crate::transport::FeatureTransport;

#[derive(Debug, Clone)]
pub struct SearchSettings {
    /// Mode for terms without an entry in `term_modes`.
    pub mode: SearchMode,
    pub term_modes: BTreeMap<SearchTerm, SearchMode>,
    pub batch_size: usize,
    pub max_workers: usize,
    pub result_limit: usize,
    pub endpoint: String,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            mode: SearchMode::Gene,
            term_modes: BTreeMap::new(),
            batch_size: 30,
            max_workers: 12,
            result_limit: 1000,
            endpoint: FEATURE_ENDPOINT.to_string(),
        }
    }
}

impl SearchSettings {
    pub fn mode_for(&self, term: &SearchTerm) -> SearchMode {
        self.term_modes.get(term).copied().unwrap_or(self.mode)
    }
}

/// Outcome of one (term, batch) request. Failures carry no features.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub term: SearchTerm,
    pub batch_index: usize,
    pub entities: Vec<EntityId>,
    pub success: bool,
    /// The reply filled the whole result limit, so later features may be missing.
    pub truncated: bool,
    pub features: Vec<Feature>,
    pub hits: BTreeMap<EntityId, usize>,
    pub failure: Option<FailureKind>,
}

impl SearchResult {
    pub fn from_outcome(term: SearchTerm, batch: &Batch, outcome: CallOutcome) -> Self {
        let mut hits = BTreeMap::new();
        if outcome.success {
            for feature in &outcome.features {
                let Some(entity) = feature.entity_id() else {
                    continue;
                };
                if batch.entities.contains(&entity) {
                    *hits.entry(entity).or_insert(0) += 1;
                }
            }
        }
        Self {
            term,
            batch_index: batch.index,
            entities: batch.entities.clone(),
            success: outcome.success,
            truncated: false,
            features: outcome.features,
            hits,
            failure: outcome.failure,
        }
    }

    pub fn feature_count(&self) -> usize {
        self.hits.values().sum()
    }
}

#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Run-wide counters. Only ever increase.
#[derive(Debug, Default)]
pub struct ProgressCounters {
    completed_batches: AtomicU64,
    failed_batches: AtomicU64,
    features: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ProgressSnapshot {
    pub completed_batches: u64,
    pub failed_batches: u64,
    pub features: u64,
}

impl ProgressCounters {
    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            completed_batches: self.completed_batches.load(Ordering::SeqCst),
            failed_batches: self.failed_batches.load(Ordering::SeqCst),
            features: self.features.load(Ordering::SeqCst),
        }
    }

    fn record(&self, result: &SearchResult) {
        self.completed_batches.fetch_add(1, Ordering::SeqCst);
        if !result.success {
            self.failed_batches.fetch_add(1, Ordering::SeqCst);
        }
        self.features
            .fetch_add(result.feature_count() as u64, Ordering::SeqCst);
    }
}

pub struct BatchOrchestrator<T: FeatureTransport> {
    client: RetryClient<T>,
    limiter: RateLimiter,
    progress: ProgressCounters,
}

impl<T: FeatureTransport> BatchOrchestrator<T> {
    pub fn new(client: RetryClient<T>, limiter: RateLimiter) -> Self {
        Self {
            client,
            limiter,
            progress: ProgressCounters::default(),
        }
    }

    pub fn stats(&self) -> ApiStatsSnapshot {
        self.client.stats().snapshot()
    }

    pub fn progress(&self) -> ProgressSnapshot {
        self.progress.snapshot()
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn search(
        &self,
        terms: &[SearchTerm],
        entities: &[EntityId],
        settings: &SearchSettings,
        sink: &dyn ProgressSink,
        cancel: &CancelToken,
    ) -> Result<Vec<SearchResult>, KiraError> {
        let mut results = Vec::new();
        self.search_each(terms, entities, settings, sink, cancel, |result| {
            results.push(result)
        })?;
        Ok(results)
    }

    /// Like [`search`](Self::search) but hands each result to `on_result` as
    /// soon as it is collected, on the calling thread.
    pub fn search_each<F>(
        &self,
        terms: &[SearchTerm],
        entities: &[EntityId],
        settings: &SearchSettings,
        sink: &dyn ProgressSink,
        cancel: &CancelToken,
        mut on_result: F,
    ) -> Result<(), KiraError>
    where
        F: FnMut(SearchResult),
    {
        if terms.is_empty() {
            return Err(KiraError::EmptyTerms);
        }
        if entities.is_empty() {
            return Err(KiraError::EmptyRoster);
        }
        if settings.max_workers == 0 {
            return Err(KiraError::InvalidWorkerCount);
        }
        let entities = dedup_ordered(entities);
        let batches = partition(&entities, settings.batch_size)?;
        let terms = dedup_ordered(terms);

        for (index, term) in terms.iter().enumerate() {
            if cancel.is_cancelled() {
                warn!(term = %term, "run cancelled, skipping remaining terms");
                break;
            }
            sink.event(ProgressEvent {
                message: format!(
                    "phase=Search; term {}/{}: {} ({}) across {} batches",
                    index + 1,
                    terms.len(),
                    term,
                    settings.mode_for(term),
                    batches.len()
                ),
                elapsed: None,
            });
            self.run_term(term, &batches, settings, sink, cancel, &mut on_result);
        }
        Ok(())
    }

    fn run_term<F>(
        &self,
        term: &SearchTerm,
        batches: &[Batch],
        settings: &SearchSettings,
        sink: &dyn ProgressSink,
        cancel: &CancelToken,
        on_result: &mut F,
    ) where
        F: FnMut(SearchResult),
    {
        let started = Instant::now();
        let cursor = AtomicUsize::new(0);
        let workers = settings.max_workers.min(batches.len()).max(1);
        let (tx, rx) = mpsc::channel::<SearchResult>();

        let mut completed = 0usize;
        let mut failed = 0usize;
        let mut term_features = 0usize;

        thread::scope(|scope| {
            for _ in 0..workers {
                let tx = tx.clone();
                let cursor = &cursor;
                scope.spawn(move || {
                    loop {
                        if cancel.is_cancelled() {
                            break;
                        }
                        let next = cursor.fetch_add(1, Ordering::SeqCst);
                        let Some(batch) = batches.get(next) else {
                            break;
                        };
                        let result = self.dispatch(term, batch, settings);
                        if tx.send(result).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(tx);

            for result in rx {
                self.progress.record(&result);
                completed += 1;
                if !result.success {
                    failed += 1;
                }
                term_features += result.feature_count();
                let totals = self.progress.snapshot();
                sink.event(ProgressEvent {
                    message: format!(
                        "phase=Search; {} batch {} done ({}/{}); {} features for term, {} total",
                        term,
                        result.batch_index + 1,
                        completed,
                        batches.len(),
                        term_features,
                        totals.features
                    ),
                    elapsed: Some(started.elapsed()),
                });
                on_result(result);
            }
        });

        info!(
            term = %term,
            batches = batches.len(),
            completed,
            failed,
            features = term_features,
            elapsed_s = started.elapsed().as_secs_f64(),
            "term finished"
        );
    }

    fn dispatch(&self, term: &SearchTerm, batch: &Batch, settings: &SearchSettings) -> SearchResult {
        let span = info_span!("batch", term = %term, batch = batch.index + 1);
        let _guard = span.enter();

        self.limiter.acquire();
        let query = FeatureQuery::for_batch(
            term,
            settings.mode_for(term),
            batch,
            settings.result_limit,
        );
        let outcome = self.client.call(&settings.endpoint, query.as_str());
        if outcome.success {
            self.limiter.record_success();
        } else {
            self.limiter.record_failure();
            warn!(failure = ?outcome.failure, "batch recorded as zero-hit");
        }
        let mut result = SearchResult::from_outcome(term.clone(), batch, outcome);
        if result.success && result.features.len() >= settings.result_limit {
            warn!(
                limit = settings.result_limit,
                "reply filled the result limit, later genomes may be missing"
            );
            result.truncated = true;
        }
        result
    }
}
