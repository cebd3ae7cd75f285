use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Serialize;
use tracing::info;

use crate::aggregate::{FeatureRecord, PresenceMatrix};
use crate::app::{ProgressEvent, ProgressSink, ScanMeta};
use crate::error::KiraError;

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_report(meta: &ScanMeta) -> io::Result<()> {
        Self::print_json(meta)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value)
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Forwards progress events to the log, every `every`-th batch event only.
pub struct LogProgress {
    every: usize,
    seen: AtomicUsize,
}

impl LogProgress {
    pub fn new(every: usize) -> Self {
        Self {
            every: every.max(1),
            seen: AtomicUsize::new(0),
        }
    }
}

impl ProgressSink for LogProgress {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            None => info!("{}", event.message),
            Some(elapsed) => {
                let seen = self.seen.fetch_add(1, Ordering::Relaxed) + 1;
                if seen % self.every == 0 {
                    info!(elapsed_s = elapsed.as_secs_f64(), "{}", event.message);
                }
            }
        }
    }
}

pub fn write_matrix_csv(matrix: &PresenceMatrix, path: &Path) -> Result<(), KiraError> {
    let mut writer = csv_writer(path)?;
    let mut header = vec!["genome_id".to_string()];
    header.extend(matrix.terms().iter().map(|term| term.to_string()));
    writer
        .write_record(&header)
        .map_err(|err| KiraError::Output(err.to_string()))?;

    for (entity, row) in matrix.rows() {
        let mut record = vec![entity.to_string()];
        record.extend(
            matrix
                .terms()
                .iter()
                .map(|term| row.get(term).copied().unwrap_or(0).to_string()),
        );
        writer
            .write_record(&record)
            .map_err(|err| KiraError::Output(err.to_string()))?;
    }
    writer
        .flush()
        .map_err(|err| KiraError::Output(err.to_string()))
}

const FEATURE_COLUMNS: &[&str] = &[
    "search_term",
    "genome_id",
    "accession",
    "patric_id",
    "feature_type",
    "start",
    "end",
    "strand",
    "gene",
    "product",
];

pub fn write_features_csv<'a, I>(records: I, path: &Path) -> Result<usize, KiraError>
where
    I: IntoIterator<Item = FeatureRecord<'a>>,
{
    let mut writer = csv_writer(path)?;
    writer
        .write_record(FEATURE_COLUMNS)
        .map_err(|err| KiraError::Output(err.to_string()))?;

    let mut rows = 0;
    for record in records {
        let feature = record.feature;
        let text = |value: &Option<String>| value.clone().unwrap_or_default();
        let number = |value: Option<u64>| value.map(|v| v.to_string()).unwrap_or_default();
        writer
            .write_record([
                record.search_term.to_string(),
                text(&feature.genome_id),
                text(&feature.accession),
                text(&feature.patric_id),
                text(&feature.feature_type),
                number(feature.start),
                number(feature.end),
                text(&feature.strand),
                text(&feature.gene),
                text(&feature.product),
            ])
            .map_err(|err| KiraError::Output(err.to_string()))?;
        rows += 1;
    }
    writer
        .flush()
        .map_err(|err| KiraError::Output(err.to_string()))?;
    Ok(rows)
}

pub fn write_report_json(meta: &ScanMeta, path: &Path) -> Result<(), KiraError> {
    ensure_parent(path)?;
    let json =
        serde_json::to_string_pretty(meta).map_err(|err| KiraError::Output(err.to_string()))?;
    fs::write(path, json).map_err(|err| KiraError::Filesystem(err.to_string()))
}

fn csv_writer(path: &Path) -> Result<csv::Writer<File>, KiraError> {
    ensure_parent(path)?;
    csv::Writer::from_path(path).map_err(|err| KiraError::Output(err.to_string()))
}

fn ensure_parent(path: &Path) -> Result<(), KiraError> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|err| KiraError::Filesystem(err.to_string()))?;
    }
    Ok(())
}
