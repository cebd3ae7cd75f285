use std::time::Duration;

use assert_matches::assert_matches;

use kira_feature_scan::config::{Config, ConfigLoader};
use kira_feature_scan::domain::SearchMode;
use kira_feature_scan::error::KiraError;

#[test]
fn defaults_apply_when_fields_are_missing() {
    let resolved = ConfigLoader::resolve_config(Config::default()).unwrap();
    assert_eq!(resolved.schema_version, 1);
    assert!(resolved.terms.is_empty());
    assert_eq!(resolved.search.mode, SearchMode::Gene);
    assert_eq!(resolved.search.batch_size, 30);
    assert_eq!(resolved.search.max_workers, 12);
    assert_eq!(resolved.retry.max_retries, 3);
    assert_eq!(resolved.retry.base_timeout, Duration::from_secs(30));
    assert_eq!(resolved.rate_limit.base_delay, Duration::from_millis(300));
    assert_eq!(resolved.base_url, "https://www.bv-brc.org/api");
}

#[test]
fn file_values_override_defaults() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("kira-fs.json");
    std::fs::write(
        &path,
        r#"{
            "terms": ["copA", "sodA"],
            "mode": "keyword",
            "roster": "reps_converted.tsv",
            "batch_size": 20,
            "max_workers": 4,
            "retry": { "max_retries": 8, "base_delay": 0.5 },
            "rate_limit": { "base_delay": 0.1, "tier2_factor": 3.0 }
        }"#,
    )
    .unwrap();

    let resolved = ConfigLoader::resolve(Some(path.to_str().unwrap())).unwrap();
    assert_eq!(resolved.terms.len(), 2);
    assert_eq!(resolved.search.mode, SearchMode::Keyword);
    assert_eq!(resolved.search.batch_size, 20);
    assert_eq!(resolved.search.max_workers, 4);
    assert_eq!(resolved.retry.max_retries, 8);
    assert_eq!(resolved.retry.base_delay, Duration::from_millis(500));
    assert_eq!(resolved.retry.max_delay, Duration::from_secs(5));
    assert_eq!(resolved.rate_limit.base_delay, Duration::from_millis(100));
    assert_eq!(resolved.rate_limit.tier2_factor, 3.0);
    assert_eq!(
        resolved.roster.as_deref(),
        Some(std::path::Path::new("reps_converted.tsv"))
    );
}

#[test]
fn invalid_values_are_rejected() {
    let config: Config = serde_json::from_str(r#"{"batch_size": 0}"#).unwrap();
    assert_matches!(
        ConfigLoader::resolve_config(config),
        Err(KiraError::InvalidBatchSize)
    );

    let config: Config = serde_json::from_str(r#"{"retry": {"base_delay": -1.0}}"#).unwrap();
    assert_matches!(
        ConfigLoader::resolve_config(config),
        Err(KiraError::InvalidConfig(_))
    );

    let config: Config = serde_json::from_str(r#"{"terms": ["copA", "  "]}"#).unwrap();
    assert_matches!(
        ConfigLoader::resolve_config(config),
        Err(KiraError::InvalidSearchTerm(_))
    );
}

#[test]
fn unreadable_config_path_is_reported() {
    let err = ConfigLoader::resolve(Some("/nonexistent/kira-fs.json")).unwrap_err();
    assert_matches!(err, KiraError::ConfigRead(_));
}

#[test]
fn terms_can_carry_their_own_mode() {
    let config: Config = serde_json::from_str(
        r#"{
            "mode": "gene",
            "terms": ["copA", {"term": "copper homeostasis", "mode": "keyword"}, {"term": "cusA"}]
        }"#,
    )
    .unwrap();

    let resolved = ConfigLoader::resolve_config(config).unwrap();
    assert_eq!(resolved.terms.len(), 3);
    let modes = resolved
        .terms
        .iter()
        .map(|term| resolved.search.mode_for(term))
        .collect::<Vec<_>>();
    assert_eq!(
        modes,
        vec![SearchMode::Gene, SearchMode::Keyword, SearchMode::Gene]
    );
}

#[test]
fn overrides_are_checked_again() {
    let mut resolved = ConfigLoader::resolve_config(Config::default()).unwrap();
    resolved.search.result_limit = 0;
    assert_matches!(resolved.validate(), Err(KiraError::InvalidConfig(_)));

    resolved.search.result_limit = 50;
    resolved.search.max_workers = 0;
    assert_matches!(resolved.validate(), Err(KiraError::InvalidWorkerCount));
}

#[test]
fn oversized_durations_are_rejected() {
    let config: Config =
        serde_json::from_str(r#"{"retry": {"base_timeout": 1e300}}"#).unwrap();
    assert_matches!(
        ConfigLoader::resolve_config(config),
        Err(KiraError::InvalidConfig(_))
    );
}
