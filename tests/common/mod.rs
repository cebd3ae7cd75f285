#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use kira_feature_scan::app::{ProgressEvent, ProgressSink};
use kira_feature_scan::domain::{EntityId, SearchTerm};
use kira_feature_scan::rate_limit::RateLimitPolicy;
use kira_feature_scan::retry::RetryPolicy;
use kira_feature_scan::transport::{FeatureTransport, TransportError, TransportResponse};

pub type Reply = Result<TransportResponse, TransportError>;

pub fn status(code: u16) -> Reply {
    Ok(TransportResponse {
        status: code,
        body: String::new(),
    })
}

pub fn json(body: &str) -> Reply {
    Ok(TransportResponse {
        status: 200,
        body: body.to_string(),
    })
}

/// Replays a fixed script, then repeats `fallback` forever.
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Reply>>,
    fallback: Reply,
    calls: AtomicUsize,
    timeouts: Mutex<Vec<Duration>>,
}

impl ScriptedTransport {
    pub fn new(script: Vec<Reply>, fallback: Reply) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback,
            calls: AtomicUsize::new(0),
            timeouts: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn timeouts(&self) -> Vec<Duration> {
        self.timeouts.lock().clone()
    }
}

impl FeatureTransport for ScriptedTransport {
    fn get(&self, _endpoint: &str, _query: &str, timeout: Duration) -> Reply {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.timeouts.lock().push(timeout);
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

/// Answers each request from the query string.
pub struct FnTransport<F>
where
    F: Fn(&str) -> Reply + Send + Sync,
{
    respond: F,
    calls: AtomicUsize,
}

impl<F> FnTransport<F>
where
    F: Fn(&str) -> Reply + Send + Sync,
{
    pub fn new(respond: F) -> Self {
        Self {
            respond,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl<F> FeatureTransport for FnTransport<F>
where
    F: Fn(&str) -> Reply + Send + Sync,
{
    fn get(&self, _endpoint: &str, query: &str, _timeout: Duration) -> Reply {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.respond)(query)
    }
}

pub fn fast_retry(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        base_timeout: Duration::from_secs(30),
        max_timeout: Duration::from_secs(120),
        base_delay: Duration::ZERO,
        max_delay: Duration::ZERO,
        jitter: Duration::ZERO,
    }
}

pub fn no_rate_limit() -> RateLimitPolicy {
    RateLimitPolicy {
        base_delay: Duration::ZERO,
        jitter: Duration::ZERO,
        ..RateLimitPolicy::default()
    }
}

pub fn ids(raw: &[&str]) -> Vec<EntityId> {
    raw.iter().map(|id| id.parse().unwrap()).collect()
}

pub fn terms(raw: &[&str]) -> Vec<SearchTerm> {
    raw.iter().map(|term| term.parse().unwrap()).collect()
}

pub fn feature_json(genome_ids: &[&str]) -> String {
    let items = genome_ids
        .iter()
        .enumerate()
        .map(|(index, id)| {
            format!(
                r#"{{"genome_id":"{id}","accession":"NC_{index:06}","patric_id":"fig|{id}.peg.{index}","feature_type":"CDS","start":{start},"end":{end},"strand":"+","gene":"copA","product":"Copper-translocating P-type ATPase"}}"#,
                start = 100 + index * 1000,
                end = 900 + index * 1000
            )
        })
        .collect::<Vec<_>>();
    format!("[{}]", items.join(","))
}

pub struct NoopSink;

impl ProgressSink for NoopSink {
    fn event(&self, _event: ProgressEvent) {}
}

#[derive(Default)]
pub struct RecordingSink {
    pub events: Mutex<Vec<ProgressEvent>>,
}

impl ProgressSink for RecordingSink {
    fn event(&self, event: ProgressEvent) {
        self.events.lock().push(event);
    }
}
