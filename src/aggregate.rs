use std::cmp::Ordering;
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::Serialize;
use tracing::debug;

use crate::domain::{EntityId, Feature, SearchTerm, dedup_ordered};
use crate::orchestrator::SearchResult;

/// Dense genome x term table of 0/1 cells.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceMatrix {
    entities: Vec<EntityId>,
    terms: Vec<SearchTerm>,
    entity_index: HashMap<EntityId, usize>,
    term_index: HashMap<SearchTerm, usize>,
    cells: Vec<u8>,
}

impl PresenceMatrix {
    pub fn new(entities: &[EntityId], terms: &[SearchTerm]) -> Self {
        let entities = dedup_ordered(entities);
        let terms = dedup_ordered(terms);
        let entity_index = entities
            .iter()
            .enumerate()
            .map(|(index, id)| (id.clone(), index))
            .collect();
        let term_index = terms
            .iter()
            .enumerate()
            .map(|(index, term)| (term.clone(), index))
            .collect();
        let cells = vec![0; entities.len() * terms.len()];
        Self {
            entities,
            terms,
            entity_index,
            term_index,
            cells,
        }
    }

    pub fn entities(&self) -> &[EntityId] {
        &self.entities
    }

    pub fn terms(&self) -> &[SearchTerm] {
        &self.terms
    }

    pub fn get(&self, entity: &EntityId, term: &SearchTerm) -> Option<u8> {
        self.offset(entity, term).map(|offset| self.cells[offset])
    }

    /// Sets the cell to 1. Cells are never cleared.
    pub fn mark(&mut self, entity: &EntityId, term: &SearchTerm) -> bool {
        match self.offset(entity, term) {
            Some(offset) => {
                self.cells[offset] = 1;
                true
            }
            None => false,
        }
    }

    pub fn row(&self, entity: &EntityId) -> Option<BTreeMap<SearchTerm, u8>> {
        let row = *self.entity_index.get(entity)?;
        Some(self.row_at(row))
    }

    /// Rows in roster order. Each call starts a fresh pass.
    pub fn rows(&self) -> impl Iterator<Item = (EntityId, BTreeMap<SearchTerm, u8>)> + '_ {
        self.entities
            .iter()
            .enumerate()
            .map(|(row, entity)| (entity.clone(), self.row_at(row)))
    }

    pub fn ones(&self) -> usize {
        self.cells.iter().filter(|cell| **cell == 1).count()
    }

    fn row_at(&self, row: usize) -> BTreeMap<SearchTerm, u8> {
        let width = self.terms.len();
        self.terms
            .iter()
            .enumerate()
            .map(|(column, term)| (term.clone(), self.cells[row * width + column]))
            .collect()
    }

    fn offset(&self, entity: &EntityId, term: &SearchTerm) -> Option<usize> {
        let row = self.entity_index.get(entity)?;
        let column = self.term_index.get(term)?;
        Some(row * self.terms.len() + column)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FeatureRecord<'a> {
    pub search_term: &'a SearchTerm,
    #[serde(flatten)]
    pub feature: &'a Feature,
}

/// The result kept for one `(term, batch)` key. Hits and features always come
/// from the same result.
#[derive(Debug, Clone)]
struct MergedBatch {
    success: bool,
    truncated: bool,
    hits: BTreeMap<EntityId, usize>,
    features: Vec<Feature>,
}

impl MergedBatch {
    fn from_result(result: &SearchResult) -> Self {
        Self {
            success: result.success,
            truncated: result.truncated,
            hits: result.hits.clone(),
            features: result.features.clone(),
        }
    }

    fn rank(&self) -> (bool, usize, usize) {
        (self.success, self.hits.values().sum(), self.features.len())
    }

    /// Total order over candidates: success, then attributed hits, then
    /// feature count, then the serialized feature list.
    fn outranks(&self, other: &Self) -> bool {
        match self.rank().cmp(&other.rank()) {
            Ordering::Equal => canonical(&self.features) > canonical(&other.features),
            ordering => ordering == Ordering::Greater,
        }
    }
}

fn canonical(features: &[Feature]) -> String {
    serde_json::to_string(features).unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TermSummary {
    pub term: SearchTerm,
    pub batches: usize,
    pub failed_batches: usize,
    pub truncated_batches: usize,
    pub entities_hit: usize,
    pub features: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntitySummary {
    pub entity: EntityId,
    pub terms_hit: usize,
    pub features: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggregateSummary {
    pub entities: usize,
    pub terms: usize,
    pub batches: usize,
    pub failed_batches: usize,
    pub truncated_batches: usize,
    pub cells_present: usize,
    pub total_features: usize,
    pub per_term: Vec<TermSummary>,
    pub per_entity: Vec<EntitySummary>,
}

/// Folds [`SearchResult`]s into a presence matrix and per-(term, genome)
/// counts. Results are keyed by `(term, batch_index)`, so merging the same
/// result again or in another order leaves the state unchanged.
#[derive(Debug, Clone)]
pub struct Aggregator {
    matrix: PresenceMatrix,
    merged: BTreeMap<(SearchTerm, usize), MergedBatch>,
}

impl Aggregator {
    pub fn new(entities: &[EntityId], terms: &[SearchTerm]) -> Self {
        Self {
            matrix: PresenceMatrix::new(entities, terms),
            merged: BTreeMap::new(),
        }
    }

    pub fn merge(&mut self, result: &SearchResult) {
        if !self.matrix.term_index.contains_key(&result.term) {
            debug!(term = %result.term, "ignoring result for undeclared term");
            return;
        }
        let candidate = MergedBatch::from_result(result);
        match self.merged.entry((result.term.clone(), result.batch_index)) {
            Entry::Vacant(slot) => {
                slot.insert(candidate);
            }
            Entry::Occupied(mut slot) => {
                if candidate.outranks(slot.get()) {
                    slot.insert(candidate);
                }
            }
        }

        if !result.success {
            return;
        }
        for (entity, count) in &result.hits {
            if *count > 0 && !self.matrix.mark(entity, &result.term) {
                debug!(entity = %entity, "ignoring hit for undeclared genome");
            }
        }
    }

    pub fn merge_all<'a, I>(&mut self, results: I)
    where
        I: IntoIterator<Item = &'a SearchResult>,
    {
        for result in results {
            self.merge(result);
        }
    }

    pub fn matrix(&self) -> &PresenceMatrix {
        &self.matrix
    }

    pub fn into_matrix(self) -> PresenceMatrix {
        self.matrix
    }

    pub fn count(&self, term: &SearchTerm, entity: &EntityId) -> usize {
        self.batches_for(term)
            .filter_map(|batch| batch.hits.get(entity))
            .sum()
    }

    /// Term-tagged features in (term, batch) order. Re-iterable.
    pub fn features(&self) -> impl Iterator<Item = FeatureRecord<'_>> + '_ {
        self.merged.iter().flat_map(|((term, _), batch)| {
            batch.features.iter().map(move |feature| FeatureRecord {
                search_term: term,
                feature,
            })
        })
    }

    pub fn summary(&self) -> AggregateSummary {
        let per_term = self
            .matrix
            .terms()
            .iter()
            .map(|term| {
                let mut batches = 0;
                let mut failed_batches = 0;
                let mut truncated_batches = 0;
                let mut features = 0;
                let mut hit = BTreeSet::new();
                for batch in self.batches_for(term) {
                    batches += 1;
                    if !batch.success {
                        failed_batches += 1;
                    }
                    if batch.truncated {
                        truncated_batches += 1;
                    }
                    for (entity, count) in &batch.hits {
                        if self.matrix.entity_index.contains_key(entity) {
                            features += count;
                            if *count > 0 {
                                hit.insert(entity);
                            }
                        }
                    }
                }
                TermSummary {
                    term: term.clone(),
                    batches,
                    failed_batches,
                    truncated_batches,
                    entities_hit: hit.len(),
                    features,
                }
            })
            .collect::<Vec<_>>();

        let per_entity = self
            .matrix
            .entities()
            .iter()
            .map(|entity| {
                let terms_hit = self
                    .matrix
                    .terms()
                    .iter()
                    .filter(|term| self.matrix.get(entity, term) == Some(1))
                    .count();
                let features: usize = self
                    .matrix
                    .terms()
                    .iter()
                    .map(|term| self.count(term, entity))
                    .sum();
                EntitySummary {
                    entity: entity.clone(),
                    terms_hit,
                    features,
                }
            })
            .collect::<Vec<_>>();

        AggregateSummary {
            entities: self.matrix.entities().len(),
            terms: self.matrix.terms().len(),
            batches: self.merged.len(),
            failed_batches: self.merged.values().filter(|batch| !batch.success).count(),
            truncated_batches: self.merged.values().filter(|batch| batch.truncated).count(),
            cells_present: self.matrix.ones(),
            total_features: per_term.iter().map(|term| term.features).sum(),
            per_term,
            per_entity,
        }
    }

    fn batches_for<'a>(&'a self, term: &'a SearchTerm) -> impl Iterator<Item = &'a MergedBatch> + 'a {
        self.merged
            .range((term.clone(), 0)..=(term.clone(), usize::MAX))
            .map(|(_, batch)| batch)
    }
}
