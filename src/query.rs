use crate::domain::{Batch, SearchMode, SearchTerm};

pub const FEATURE_ENDPOINT: &str = "genome_feature/";

const SELECT_FIELDS: &[&str] = &[
    "genome_id",
    "genome_name",
    "accession",
    "feature_type",
    "patric_id",
    "refseq_locus_tag",
    "start",
    "end",
    "strand",
    "na_length",
    "gene",
    "product",
    "organism_name",
    "taxon_id",
];

/// RQL query for one (term, batch) request against `genome_feature`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureQuery(String);

impl FeatureQuery {
    pub fn for_batch(term: &SearchTerm, mode: SearchMode, batch: &Batch, limit: usize) -> Self {
        let ids = batch
            .entities
            .iter()
            .map(|id| id.as_str())
            .collect::<Vec<_>>()
            .join(",");
        let needle = term.as_str().replace('"', "");
        let predicate = match mode {
            SearchMode::Gene => format!("eq(gene,\"{needle}\")"),
            SearchMode::Keyword => format!("keyword(\"{needle}\")"),
        };
        Self(format!(
            "and(in(genome_id,({ids})),{predicate})&select({})&limit({limit})",
            SELECT_FIELDS.join(",")
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EntityId, partition};

    #[test]
    fn gene_query_lists_batch_ids() {
        let ids: Vec<EntityId> = vec!["83332.12".parse().unwrap(), "511145.12".parse().unwrap()];
        let batches = partition(&ids, 10).unwrap();
        let batch = &batches[0];
        let term: SearchTerm = "copA".parse().unwrap();
        let query = FeatureQuery::for_batch(&term, SearchMode::Gene, batch, 200);
        assert!(
            query
                .as_str()
                .starts_with("and(in(genome_id,(83332.12,511145.12)),eq(gene,\"copA\"))&select(")
        );
        assert!(query.as_str().ends_with("&limit(200)"));
    }

    #[test]
    fn keyword_query_strips_quotes() {
        let ids: Vec<EntityId> = vec!["1.1".parse().unwrap()];
        let batches = partition(&ids, 1).unwrap();
        let batch = &batches[0];
        let term: SearchTerm = "copper \"resistance\"".parse().unwrap();
        let query = FeatureQuery::for_batch(&term, SearchMode::Keyword, batch, 50);
        assert!(query.as_str().contains("keyword(\"copper resistance\")"));
    }
}
