use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::aggregate::{AggregateSummary, Aggregator};
use crate::domain::{EntityId, SearchMode, SearchTerm};
use crate::error::KiraError;
use crate::orchestrator::{BatchOrchestrator, CancelToken, ProgressSnapshot, SearchSettings};
use crate::retry::ApiStatsSnapshot;
use crate::transport::FeatureTransport;

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

#[derive(Debug, Clone)]
pub struct ScanRequest {
    pub terms: Vec<SearchTerm>,
    pub entities: Vec<EntityId>,
    pub settings: SearchSettings,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanMeta {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed_secs: f64,
    pub cancelled: bool,
    pub mode: SearchMode,
    pub term_modes: BTreeMap<SearchTerm, SearchMode>,
    pub batch_size: usize,
    pub max_workers: usize,
    pub summary: AggregateSummary,
    pub api_stats: ApiStatsSnapshot,
    pub api_success_rate: f64,
    pub progress: ProgressSnapshot,
    pub rate_limited_calls: u64,
}

#[derive(Debug, Clone)]
pub struct ScanReport {
    pub meta: ScanMeta,
    pub aggregator: Aggregator,
}

pub struct App<T: FeatureTransport> {
    orchestrator: BatchOrchestrator<T>,
}

impl<T: FeatureTransport> App<T> {
    pub fn new(orchestrator: BatchOrchestrator<T>) -> Self {
        Self { orchestrator }
    }

    pub fn orchestrator(&self) -> &BatchOrchestrator<T> {
        &self.orchestrator
    }

    pub fn scan(
        &self,
        request: &ScanRequest,
        sink: &dyn ProgressSink,
        cancel: &CancelToken,
    ) -> Result<ScanReport, KiraError> {
        let started_at = Utc::now();
        let started = Instant::now();
        info!(
            terms = request.terms.len(),
            genomes = request.entities.len(),
            batch_size = request.settings.batch_size,
            workers = request.settings.max_workers,
            "starting scan"
        );

        let mut aggregator = Aggregator::new(&request.entities, &request.terms);
        self.orchestrator.search_each(
            &request.terms,
            &request.entities,
            &request.settings,
            sink,
            cancel,
            |result| aggregator.merge(&result),
        )?;

        let api_stats = self.orchestrator.stats();
        let meta = ScanMeta {
            started_at,
            finished_at: Utc::now(),
            elapsed_secs: started.elapsed().as_secs_f64(),
            cancelled: cancel.is_cancelled(),
            mode: request.settings.mode,
            term_modes: request
                .terms
                .iter()
                .map(|term| (term.clone(), request.settings.mode_for(term)))
                .collect(),
            batch_size: request.settings.batch_size,
            max_workers: request.settings.max_workers,
            summary: aggregator.summary(),
            api_success_rate: api_stats.success_rate(),
            api_stats,
            progress: self.orchestrator.progress(),
            rate_limited_calls: self.orchestrator.limiter().calls(),
        };
        info!(
            cells_present = meta.summary.cells_present,
            features = meta.summary.total_features,
            failed_batches = meta.summary.failed_batches,
            truncated_batches = meta.summary.truncated_batches,
            "scan finished"
        );
        Ok(ScanReport { meta, aggregator })
    }
}
