use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum KiraError {
    #[error("invalid search term: {0:?}")]
    InvalidSearchTerm(String),

    #[error("invalid genome id: {0:?}")]
    InvalidEntityId(String),

    #[error("no search terms given")]
    #[diagnostic(help("pass --term or list terms in kira-fs.json"))]
    EmptyTerms,

    #[error("genome roster is empty")]
    #[diagnostic(help("check the roster TSV has a header row and at least one data row"))]
    EmptyRoster,

    #[error("batch size must be greater than zero")]
    InvalidBatchSize,

    #[error("worker count must be greater than zero")]
    InvalidWorkerCount,

    #[error("missing config file kira-fs.json in current directory")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid config value: {0}")]
    InvalidConfig(String),

    #[error("failed to read genome roster at {path}: {message}")]
    RosterRead { path: PathBuf, message: String },

    #[error("BV-BRC client setup failed: {0}")]
    HttpSetup(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("failed to write output: {0}")]
    Output(String),
}
