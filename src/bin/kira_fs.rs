use std::path::PathBuf;
use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use kira_feature_scan::app::{App, ScanReport, ScanRequest};
use kira_feature_scan::config::{CONFIG_FILE, Config, ConfigLoader, ResolvedConfig};
use kira_feature_scan::domain::{SearchMode, SearchTerm, partition};
use kira_feature_scan::error::KiraError;
use kira_feature_scan::orchestrator::{BatchOrchestrator, CancelToken};
use kira_feature_scan::output::{
    JsonOutput, LogProgress, OutputMode, write_features_csv, write_matrix_csv, write_report_json,
};
use kira_feature_scan::query::FeatureQuery;
use kira_feature_scan::rate_limit::RateLimiter;
use kira_feature_scan::retry::RetryClient;
use kira_feature_scan::roster::{entity_ids, load_entities};
use kira_feature_scan::transport::BvBrcHttpClient;

#[derive(Parser)]
#[command(name = "kira-fs")]
#[command(about = "Batched BV-BRC genome feature search and presence matrices")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    non_interactive: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Search terms across a genome roster")]
    Scan(ScanArgs),
}

#[derive(Args, Clone)]
struct ScanArgs {
    #[arg(long)]
    config: Option<String>,

    #[arg(long)]
    roster: Option<PathBuf>,

    #[arg(long = "term")]
    terms: Vec<String>,

    /// Free-text phrase searched in keyword mode, whatever `--mode` says.
    #[arg(long = "keyword")]
    keywords: Vec<String>,

    #[arg(long)]
    mode: Option<SearchMode>,

    #[arg(long)]
    batch_size: Option<usize>,

    #[arg(long)]
    workers: Option<usize>,

    #[arg(long)]
    limit: Option<usize>,

    #[arg(long)]
    result_limit: Option<usize>,

    #[arg(long, default_value = "kira-fs-out")]
    out_dir: Utf8PathBuf,

    #[arg(long, default_value_t = 10)]
    progress_every: usize,

    #[arg(long)]
    dry_run: bool,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(kira) = report.downcast_ref::<KiraError>() {
            return ExitCode::from(map_exit_code(kira));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &KiraError) -> u8 {
    match error {
        KiraError::EmptyTerms | KiraError::EmptyRoster | KiraError::MissingConfig => 2,
        KiraError::HttpSetup(_) => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };

    match cli.command {
        Commands::Scan(args) => run_scan(args, output_mode),
    }
}

fn resolve(args: &ScanArgs) -> Result<ResolvedConfig, KiraError> {
    let mut resolved = match args.config.as_deref() {
        Some(path) => ConfigLoader::resolve(Some(path))?,
        None if PathBuf::from(CONFIG_FILE).exists() => ConfigLoader::resolve(None)?,
        None => ConfigLoader::resolve_config(Config::default())?,
    };

    if !args.terms.is_empty() || !args.keywords.is_empty() {
        resolved.terms = args
            .terms
            .iter()
            .map(|term| term.parse())
            .collect::<Result<Vec<SearchTerm>, _>>()?;
        resolved.search.term_modes.clear();
        for phrase in &args.keywords {
            let term: SearchTerm = phrase.parse()?;
            resolved
                .search
                .term_modes
                .entry(term.clone())
                .or_insert(SearchMode::Keyword);
            resolved.terms.push(term);
        }
    }
    if let Some(roster) = &args.roster {
        resolved.roster = Some(roster.clone());
    }
    if let Some(mode) = args.mode {
        resolved.search.mode = mode;
    }
    if let Some(batch_size) = args.batch_size {
        resolved.search.batch_size = batch_size;
    }
    if let Some(workers) = args.workers {
        resolved.search.max_workers = workers;
    }
    if let Some(limit) = args.limit {
        resolved.limit = Some(limit);
    }
    if let Some(result_limit) = args.result_limit {
        resolved.search.result_limit = result_limit;
    }
    resolved.validate()?;
    Ok(resolved)
}

fn run_scan(args: ScanArgs, output_mode: OutputMode) -> miette::Result<()> {
    let resolved = resolve(&args)?;
    if resolved.terms.is_empty() {
        return Err(KiraError::EmptyTerms.into());
    }
    let roster_path = resolved.roster.clone().ok_or_else(|| {
        KiraError::InvalidConfig("no genome roster given (use --roster or \"roster\")".to_string())
    })?;
    let roster = load_entities(&roster_path, resolved.limit)?;
    let entities = entity_ids(&roster);
    if entities.is_empty() {
        return Err(KiraError::EmptyRoster.into());
    }

    if args.dry_run {
        let batches = partition(&entities, resolved.search.batch_size)?;
        println!(
            "{} terms x {} genomes -> {} batches per term, {} requests",
            resolved.terms.len(),
            entities.len(),
            batches.len(),
            batches.len() * resolved.terms.len()
        );
        if let (Some(term), Some(batch)) = (resolved.terms.first(), batches.first()) {
            let query = FeatureQuery::for_batch(
                term,
                resolved.search.mode_for(term),
                batch,
                resolved.search.result_limit,
            );
            println!("first query: {}", query.as_str());
        }
        return Ok(());
    }

    let transport = BvBrcHttpClient::with_base_url(&resolved.base_url)?;
    let orchestrator = BatchOrchestrator::new(
        RetryClient::new(transport, resolved.retry.clone()),
        RateLimiter::new(resolved.rate_limit.clone()),
    );
    let app = App::new(orchestrator);
    let request = ScanRequest {
        terms: resolved.terms.clone(),
        entities,
        settings: resolved.search.clone(),
    };
    let cancel = CancelToken::new();

    let report = match output_mode {
        OutputMode::Interactive => {
            app.scan(&request, &LogProgress::new(args.progress_every), &cancel)?
        }
        OutputMode::NonInteractive => app.scan(&request, &JsonOutput, &cancel)?,
    };

    write_outputs(&report, &args.out_dir)?;
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_report(&report.meta).into_diagnostic()?,
        OutputMode::Interactive => print_summary(&report, &args.out_dir),
    }
    Ok(())
}

fn write_outputs(report: &ScanReport, out_dir: &Utf8PathBuf) -> Result<(), KiraError> {
    std::fs::create_dir_all(out_dir.as_std_path())
        .map_err(|err| KiraError::Filesystem(format!("create {out_dir}: {err}")))?;
    write_matrix_csv(
        report.aggregator.matrix(),
        out_dir.join("presence_matrix.csv").as_std_path(),
    )?;
    write_features_csv(
        report.aggregator.features(),
        out_dir.join("features.csv").as_std_path(),
    )?;
    write_report_json(&report.meta, out_dir.join("report.json").as_std_path())
}

fn print_summary(report: &ScanReport, out_dir: &Utf8PathBuf) {
    let meta = &report.meta;
    let stats = &meta.api_stats;
    println!("Scan finished in {:.1}s", meta.elapsed_secs);
    println!(
        "  genomes: {}  terms: {}  present cells: {}  features: {}",
        meta.summary.entities,
        meta.summary.terms,
        meta.summary.cells_present,
        meta.summary.total_features
    );
    for term in &meta.summary.per_term {
        println!(
            "  {}: {} genomes hit, {} features, {}/{} batches failed",
            term.term, term.entities_hit, term.features, term.failed_batches, term.batches
        );
        if term.truncated_batches > 0 {
            println!(
                "    {} batches filled the result limit; raise --result-limit or lower --batch-size",
                term.truncated_batches
            );
        }
    }
    println!(
        "  api: {} calls, {} ok ({:.1}%), {} timeouts, {} http errors, {} retries",
        stats.total_calls,
        stats.successful_calls,
        meta.api_success_rate,
        stats.timeout_errors,
        stats.http_errors,
        stats.retry_attempts
    );
    if meta.cancelled {
        println!("  run was cancelled; results are partial");
    }
    println!("  outputs written to {out_dir}");
}
