use std::collections::HashSet;
use std::path::Path;

use serde::Serialize;
use tracing::{debug, info};

use crate::domain::EntityId;
use crate::error::KiraError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RosterEntry {
    pub id: EntityId,
    pub name: String,
}

/// Reads a tab-separated genome roster: header row, then `id<TAB>name[...]`.
/// Short or blank rows are skipped, duplicate ids keep their first row.
/// Quote characters are plain text.
pub fn load_entities(path: &Path, limit: Option<usize>) -> Result<Vec<RosterEntry>, KiraError> {
    let read_err = |message: String| KiraError::RosterRead {
        path: path.to_path_buf(),
        message,
    };
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .quoting(false)
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .map_err(|err| read_err(err.to_string()))?;

    let mut seen = HashSet::new();
    let mut entries = Vec::new();
    for (line, record) in reader.records().enumerate() {
        if limit.is_some_and(|limit| entries.len() >= limit) {
            break;
        }
        let record = record.map_err(|err| read_err(err.to_string()))?;
        let (Some(raw_id), Some(name)) = (record.get(0), record.get(1)) else {
            debug!(line = line + 2, "skipping short roster row");
            continue;
        };
        let Ok(id) = raw_id.parse::<EntityId>() else {
            continue;
        };
        let name = name.trim();
        if name.is_empty() || !seen.insert(id.clone()) {
            continue;
        }
        entries.push(RosterEntry {
            id,
            name: name.to_string(),
        });
    }

    info!(path = %path.display(), genomes = entries.len(), "loaded genome roster");
    Ok(entries)
}

pub fn entity_ids(entries: &[RosterEntry]) -> Vec<EntityId> {
    entries.iter().map(|entry| entry.id.clone()).collect()
}
