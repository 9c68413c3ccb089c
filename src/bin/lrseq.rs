use std::process::ExitCode;

use camino::Utf8PathBuf;
use chrono::{NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use lrseq_db::app::{App, FetchResult, ProgressSink};
use lrseq_db::config::{self, CiCredentials, ConfigLoader, DatasetRequest, ResolvedConfig};
use lrseq_db::dashboard::{Column, Filters, PlatformFilter};
use lrseq_db::domain::{Platform, ResponseFormat, TaxonId, WorkflowRun, WriteMode, WriteModeKind};
use lrseq_db::ena::{EnaClient, EnaHttpClient, Fetcher, SearchQuery};
use lrseq_db::error::LrseqError;
use lrseq_db::miner::{CiClient, GithubHttpClient};
use lrseq_db::output::{ConsoleProgress, JsonOutput, OutputMode};
use lrseq_db::tui::Tui;

const DEFAULT_EXPORT: &str = "lrseq_export.tsv";

#[derive(Parser)]
#[command(name = "lrseq")]
#[command(about = "Long-read sequencing metadata from ENA: fetch, track over time, explore")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    non_interactive: bool,

    /// Path to lrseq.json (defaults to ./lrseq.json when present)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Fetch ENA read runs and write the dataset files")]
    Fetch(FetchArgs),
    #[command(about = "Mine CI logs into the sample-count history and re-plot")]
    History(HistoryArgs),
    #[command(about = "Record today's local sample counts into the history")]
    Record(RecordArgs),
    #[command(about = "Render the sample-count history chart")]
    Plot(PlotArgs),
    #[command(about = "Open the dashboard, or summarize/export it non-interactively")]
    Dashboard(DashboardArgs),
}

#[derive(Args, Clone)]
struct FetchArgs {
    /// Instrument platform(s) to query; repeat for several
    #[arg(long = "platform", value_enum)]
    platforms: Vec<Platform>,

    #[arg(long)]
    tax_id: Option<TaxonId>,

    /// Maximum rows per platform (0 = all)
    #[arg(long)]
    limit: Option<u64>,

    #[arg(long)]
    output: Option<Utf8PathBuf>,

    #[arg(long, value_enum)]
    mode: Option<WriteModeKind>,

    #[arg(long)]
    chunk_size: Option<usize>,

    /// Name used in the "Saved <n> <label> samples" line
    #[arg(long)]
    label: Option<String>,

    #[arg(long, value_enum)]
    format: Option<ResponseFormat>,
}

#[derive(Args)]
struct HistoryArgs {
    #[arg(long)]
    csv: Option<Utf8PathBuf>,

    #[arg(long)]
    plot: Option<Utf8PathBuf>,

    /// Workflow file name or id whose runs are mined
    #[arg(long)]
    workflow: Option<String>,
}

#[derive(Args)]
struct RecordArgs {
    #[arg(long)]
    wgs: Option<Utf8PathBuf>,

    #[arg(long)]
    mgx: Option<Utf8PathBuf>,

    #[arg(long)]
    csv: Option<Utf8PathBuf>,

    #[arg(long)]
    plot: Option<Utf8PathBuf>,
}

#[derive(Args)]
struct PlotArgs {
    #[arg(long)]
    csv: Option<Utf8PathBuf>,

    #[arg(long)]
    output: Option<Utf8PathBuf>,
}

#[derive(Args, Default)]
struct DashboardArgs {
    #[arg(long)]
    data: Option<Utf8PathBuf>,

    /// Exact scientific name to keep; repeat for several
    #[arg(long = "organism")]
    organisms: Vec<String>,

    /// "All" or an instrument platform
    #[arg(long)]
    platform: Option<PlatformFilter>,

    #[arg(long)]
    search: Option<String>,

    #[arg(long = "column", value_enum)]
    columns: Vec<Column>,

    /// Write the filtered table as TSV
    #[arg(long)]
    export: Option<Utf8PathBuf>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<LrseqError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &LrseqError) -> u8 {
    match error {
        LrseqError::InvalidTaxonId(_)
        | LrseqError::InvalidPlatform(_)
        | LrseqError::InvalidChunkSize
        | LrseqError::InvalidPattern(_)
        | LrseqError::ConfigRead(_)
        | LrseqError::ConfigParse(_) => 2,
        LrseqError::EnaHttp(_)
        | LrseqError::EnaStatus { .. }
        | LrseqError::GithubHttp(_)
        | LrseqError::GithubStatus { .. }
        | LrseqError::MissingCredentials(_) => 3,
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

    let resolved = ConfigLoader::resolve(cli.config.as_deref())?;

    match cli.command {
        Some(Commands::Fetch(args)) => run_fetch(args, &resolved, output_mode),
        Some(Commands::History(args)) => run_history(args, &resolved, output_mode),
        Some(Commands::Record(args)) => run_record(args, &resolved, output_mode),
        Some(Commands::Plot(args)) => run_plot(args, &resolved, output_mode),
        Some(Commands::Dashboard(args)) => run_dashboard(args, &resolved, output_mode),
        None => match output_mode {
            OutputMode::Interactive => {
                run_dashboard(DashboardArgs::default(), &resolved, output_mode)
            }
            OutputMode::NonInteractive => {
                Err(miette::Report::msg("command required (try `lrseq --help`)"))
            }
        },
    }
}

fn sink_for(output_mode: OutputMode) -> &'static dyn ProgressSink {
    match output_mode {
        OutputMode::Interactive => &ConsoleProgress,
        OutputMode::NonInteractive => &JsonOutput,
    }
}

fn run_fetch(
    args: FetchArgs,
    resolved: &ResolvedConfig,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let requests = build_requests(&args, resolved)?;
    let app: App<_, NopCi> = App::new(Fetcher::new(EnaHttpClient::new()?), None);
    let results = app.fetch_all(&requests, sink_for(output_mode))?;

    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_fetch(&results).into_diagnostic()?,
        OutputMode::Interactive => print_fetch_summary(&results),
    }
    Ok(())
}

/// Any of `--platform`, `--tax-id`, `--output` or `--label` narrows the run
/// to one dataset built on the first configured one; otherwise every
/// configured dataset is fetched. The remaining flags apply to all.
fn build_requests(
    args: &FetchArgs,
    resolved: &ResolvedConfig,
) -> Result<Vec<DatasetRequest>, LrseqError> {
    let adhoc = !args.platforms.is_empty()
        || args.tax_id.is_some()
        || args.output.is_some()
        || args.label.is_some();

    let mut requests = if adhoc {
        let mut request = resolved
            .datasets
            .first()
            .cloned()
            .or_else(|| config::default_datasets().into_iter().next())
            .ok_or_else(|| LrseqError::Dataset("no dataset configured".to_string()))?;
        if !args.platforms.is_empty() {
            request.platforms = args.platforms.clone();
        }
        if let Some(taxon) = &args.tax_id {
            request.taxon = taxon.clone();
        }
        if let Some(output) = &args.output {
            request.output = output.clone();
        }
        if let Some(label) = &args.label {
            request.name = label.to_ascii_lowercase();
            request.label = label.clone();
        }
        vec![request]
    } else {
        resolved.datasets.clone()
    };

    for request in &mut requests {
        if let Some(limit) = args.limit {
            request.limit = limit;
        }
        if let Some(format) = args.format {
            request.format = format;
        }
        if args.mode.is_some() || args.chunk_size.is_some() {
            let current_chunk = match request.mode {
                WriteMode::Chunked { chunk_size } => Some(chunk_size),
                _ => None,
            };
            let kind = args.mode.unwrap_or(request.mode.kind());
            request.mode = WriteMode::resolve(kind, args.chunk_size.or(current_chunk))?;
        }
    }
    Ok(requests)
}

fn run_history(
    args: HistoryArgs,
    resolved: &ResolvedConfig,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let mut settings = resolved.history.clone();
    if let Some(csv) = args.csv {
        settings.csv = csv;
    }
    if let Some(plot) = args.plot {
        settings.plot = plot;
    }
    if let Some(workflow) = args.workflow {
        settings.workflow = workflow;
    }

    let ci = CiCredentials::from_env()
        .map(|credentials| GithubHttpClient::new(&credentials, &settings.workflow))
        .transpose()?;
    let app = App::new(Fetcher::new(NopEna), ci);
    let result = app.update_history(&settings, sink_for(output_mode))?;

    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_history(&result).into_diagnostic()?,
        OutputMode::Interactive => {
            if let Some(reason) = &result.mining_skipped {
                println!("Log mining skipped: {reason}");
            } else {
                println!(
                    "Listed {} runs, mined {}, skipped {}",
                    result.listed,
                    result.mined.len(),
                    result.skipped.len()
                );
            }
            println!("{} updated ({} rows)", result.csv, result.rows);
            println!("Plot saved to {}", result.plot);
        }
    }
    Ok(())
}

fn run_record(
    args: RecordArgs,
    resolved: &ResolvedConfig,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let mut settings = resolved.history.clone();
    if let Some(wgs) = args.wgs {
        settings.wgs_dataset = wgs;
    }
    if let Some(mgx) = args.mgx {
        settings.mgx_dataset = mgx;
    }
    if let Some(csv) = args.csv {
        settings.csv = csv;
    }
    if let Some(plot) = args.plot {
        settings.plot = plot;
    }

    let run_id = config::local_run_id(|key| std::env::var(key).ok());
    let today: NaiveDate = Utc::now().date_naive();
    let app: App<NopEna, NopCi> = App::new(Fetcher::new(NopEna), None);
    let result = app.record_local(&settings, run_id, today, sink_for(output_mode))?;

    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_record(&result).into_diagnostic()?,
        OutputMode::Interactive => {
            println!(
                "Found {} WGS samples and {} MGx samples.",
                result.row.wgs_samples, result.row.mgx_samples
            );
            if result.recorded {
                println!("{} updated.", result.csv);
            } else {
                println!("No new data found (counts are 0).");
            }
            println!("Plot saved to {}", result.plot);
        }
    }
    Ok(())
}

fn run_plot(
    args: PlotArgs,
    resolved: &ResolvedConfig,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let csv = args.csv.unwrap_or_else(|| resolved.history.csv.clone());
    let output = args.output.unwrap_or_else(|| resolved.history.plot.clone());
    let app: App<NopEna, NopCi> = App::new(Fetcher::new(NopEna), None);
    let result = app.plot(&csv, &output, sink_for(output_mode))?;

    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_plot(&result).into_diagnostic()?,
        OutputMode::Interactive => {
            println!("Plot saved to {} ({} rows)", result.output, result.rows)
        }
    }
    Ok(())
}

fn run_dashboard(
    args: DashboardArgs,
    resolved: &ResolvedConfig,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let data = args.data.unwrap_or_else(|| resolved.dashboard_data.clone());
    let mut filters = Filters {
        organisms: args.organisms.into_iter().collect(),
        platform: args.platform.unwrap_or_default(),
        search: args.search.filter(|value| !value.trim().is_empty()),
        ..Filters::default()
    };
    if !args.columns.is_empty() {
        filters.columns = args.columns;
    }

    let batch = matches!(output_mode, OutputMode::NonInteractive) || args.export.is_some();
    if batch {
        let app: App<NopEna, NopCi> = App::new(Fetcher::new(NopEna), None);
        let result = app.dashboard(
            &data,
            filters,
            args.export.as_deref(),
            sink_for(output_mode),
        )?;
        match output_mode {
            OutputMode::NonInteractive => JsonOutput::print_dashboard(&result).into_diagnostic()?,
            OutputMode::Interactive => {
                println!("{} of {} samples match", result.visible, result.records);
                if let Some(path) = &result.export {
                    println!("Exported to {path}");
                }
            }
        }
        return Ok(());
    }

    let state = lrseq_db::app::load_dashboard(&data, filters);
    let export = Utf8PathBuf::from(DEFAULT_EXPORT);
    let mut tui = Tui::new(state, &data, &export);
    tui.run()
}

fn print_fetch_summary(results: &[FetchResult]) {
    let green = "\x1b[32m";
    let yellow = "\x1b[33m";
    let cyan = "\x1b[36m";
    let reset = "\x1b[0m";

    println!("{cyan}lrseq fetch summary{reset}");
    for result in results {
        println!("{green}{}{reset}", result.message);
        for platform in &result.platforms {
            match &platform.error {
                Some(error) => println!(
                    "{yellow}   {}: no records after {} attempts ({error}){reset}",
                    platform.platform, platform.attempts
                ),
                None => println!("   {}: {} records", platform.platform, platform.records),
            }
        }
        if let Some(index) = &result.index {
            println!("   index: {index}");
        }
    }
}

struct NopEna;
struct NopCi;

impl EnaClient for NopEna {
    fn search(&self, _query: &SearchQuery) -> Result<String, LrseqError> {
        Err(LrseqError::EnaHttp("not available".to_string()))
    }
}

impl CiClient for NopCi {
    fn list_runs(&self, _since: Option<NaiveDate>) -> Result<Vec<WorkflowRun>, LrseqError> {
        Err(LrseqError::GithubHttp("not available".to_string()))
    }

    fn download_logs(&self, _run_id: u64) -> Result<Vec<u8>, LrseqError> {
        Err(LrseqError::GithubHttp("not available".to_string()))
    }
}
