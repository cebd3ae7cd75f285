pub mod aggregate;
pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod orchestrator;
pub mod output;
pub mod query;
pub mod rate_limit;
pub mod retry;
pub mod roster;
pub mod transport;
