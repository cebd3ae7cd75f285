use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::KiraError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    /// Exact match on the feature `gene` field.
    #[default]
    Gene,
    /// Free-text keyword match over the feature record.
    Keyword,
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchMode::Gene => write!(f, "gene"),
            SearchMode::Keyword => write!(f, "keyword"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SearchTerm(String);

impl SearchTerm {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SearchTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SearchTerm {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(KiraError::InvalidSearchTerm(value.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

impl TryFrom<String> for SearchTerm {
    type Error = KiraError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SearchTerm> for String {
    fn from(value: SearchTerm) -> Self {
        value.0
    }
}

/// Genome identifier. Treated as an opaque token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityId(String);

impl EntityId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EntityId {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(KiraError::InvalidEntityId(value.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

impl TryFrom<String> for EntityId {
    type Error = KiraError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<EntityId> for String {
    fn from(value: EntityId) -> Self {
        value.0
    }
}

/// One record returned by `genome_feature`. Provenance fields are passed
/// through untouched; anything not named here lands in `extra`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Feature {
    #[serde(default, deserialize_with = "string_or_number")]
    pub genome_id: Option<String>,
    #[serde(default)]
    pub accession: Option<String>,
    #[serde(default)]
    pub patric_id: Option<String>,
    #[serde(default)]
    pub feature_type: Option<String>,
    #[serde(default)]
    pub start: Option<u64>,
    #[serde(default)]
    pub end: Option<u64>,
    #[serde(default)]
    pub strand: Option<String>,
    #[serde(default)]
    pub gene: Option<String>,
    #[serde(default)]
    pub product: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Feature {
    pub fn entity_id(&self) -> Option<EntityId> {
        self.genome_id.as_deref().and_then(|id| id.parse().ok())
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(text)) => Some(text),
        Some(Value::Number(number)) => Some(number.to_string()),
        _ => None,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub index: usize,
    pub entities: Vec<EntityId>,
}

/// Drops repeated values, keeping the first occurrence of each.
pub fn dedup_ordered<T: Clone + Ord>(values: &[T]) -> Vec<T> {
    let mut seen = BTreeSet::new();
    values
        .iter()
        .filter(|value| seen.insert(*value))
        .cloned()
        .collect()
}

pub fn partition(entities: &[EntityId], batch_size: usize) -> Result<Vec<Batch>, KiraError> {
    if batch_size == 0 {
        return Err(KiraError::InvalidBatchSize);
    }
    Ok(entities
        .chunks(batch_size)
        .enumerate()
        .map(|(index, chunk)| Batch {
            index,
            entities: chunk.to_vec(),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn ids(raw: &[&str]) -> Vec<EntityId> {
        raw.iter().map(|id| id.parse().unwrap()).collect()
    }

    #[test]
    fn partition_leaves_short_tail() {
        let batches = partition(&ids(&["E1", "E2", "E3"]), 2).unwrap();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].entities, ids(&["E1", "E2"]));
        assert_eq!(batches[1].entities, ids(&["E3"]));
        assert_eq!(batches[1].index, 1);
    }

    #[test]
    fn partition_rejects_zero_batch_size() {
        let err = partition(&ids(&["E1"]), 0).unwrap_err();
        assert_matches!(err, KiraError::InvalidBatchSize);
    }

    #[test]
    fn dedup_keeps_first_occurrence_order() {
        assert_eq!(
            dedup_ordered(&ids(&["E2", "E1", "E2", "E3", "E1"])),
            ids(&["E2", "E1", "E3"])
        );
    }

    #[test]
    fn blank_term_is_rejected() {
        let err = "  ".parse::<SearchTerm>().unwrap_err();
        assert_matches!(err, KiraError::InvalidSearchTerm(_));
    }

    #[test]
    fn numeric_genome_id_is_accepted() {
        let feature: Feature =
            serde_json::from_str(r#"{"genome_id": 83332, "product": "SodA", "na_length": 621}"#)
                .unwrap();
        assert_eq!(feature.genome_id.as_deref(), Some("83332"));
        assert_eq!(feature.extra.get("na_length"), Some(&Value::from(621)));
    }
}
