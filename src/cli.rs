use std::error::Error;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use clap::{Args, Parser, Subcommand, error::ErrorKind};

use crate::config::ClientConfig;
use crate::constants::import::BATCH_SIZE;
use crate::constants::upstream::{ENV_ANON_KEY, ENV_URL};
use crate::controller::{FilterController, SelectionChange};
use crate::data::{FilterValue, FloodRecord};
use crate::errors::FloodError;
use crate::filters::{DimensionOptions, FilterDimension};
use crate::import::BatchImporter;
use crate::notices::NoticeBoard;
use crate::query_builder::{Combinator, Condition, ConditionGroup};
use crate::source::{RestSource, TableSource};
use crate::stats::{DEFAULT_TOP_CAUSES, FloodStats};
use crate::submissions::{SubmissionDraft, SubmissionService};

#[derive(Debug, Parser)]
#[command(
    name = "floodmap",
    disable_help_subcommand = true,
    about = "Browse and correct the historical flood record of Greece",
    long_about = "Query filter options, flood records, and summary figures from the hosted flood table, submit community corrections, and bulk-import prepared records.",
    after_help = "Connection settings come from SUPABASE_URL and SUPABASE_ANON_KEY; FLOODMAP_PAGE_SIZE and FLOODMAP_CACHE_TTL_SECS are optional."
)]
struct FloodmapCli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the selectable values of every filter under the given selection
    Options(SelectionArgs),
    /// Print the records matching the selection and conditions
    Records {
        #[command(flatten)]
        selection: SelectionArgs,
        #[command(flatten)]
        conditions: ConditionArgs,
        #[arg(long, help = "Print at most this many records (the count is always exact)")]
        limit: Option<usize>,
    },
    /// Print summary figures for the matching records
    Stats {
        #[command(flatten)]
        selection: SelectionArgs,
        #[command(flatten)]
        conditions: ConditionArgs,
        #[arg(long, default_value_t = DEFAULT_TOP_CAUSES, help = "Number of causes to list")]
        top: usize,
    },
    /// Submit a correction or a new flood for review
    Submit(SubmitArgs),
    /// Insert records from a JSON array file into the flood table
    Import {
        #[arg(value_name = "FILE")]
        path: PathBuf,
        #[arg(
            long = "batch-size",
            default_value_t = BATCH_SIZE,
            value_parser = parse_positive_usize,
            help = "Rows per insert request"
        )]
        batch_size: usize,
    },
}

#[derive(Debug, Clone)]
struct Selection {
    dim: FilterDimension,
    value: FilterValue,
}

#[derive(Debug, Args)]
struct SelectionArgs {
    #[arg(
        long = "where",
        value_name = "DIM=VALUE",
        value_parser = parse_selection_arg,
        help = "Select a filter value (year, location, cause, event, deaths); repeat as needed"
    )]
    selections: Vec<Selection>,
}

#[derive(Debug, Args)]
struct ConditionArgs {
    #[arg(
        long = "cond",
        value_name = "COLUMN OP [VALUE]",
        value_parser = parse_condition_arg,
        help = "Free-form condition such as \"location_name contains ath\"; repeat as needed"
    )]
    conditions: Vec<Condition>,
    #[arg(long, help = "Match any condition instead of all of them")]
    any: bool,
}

impl ConditionArgs {
    fn group(&self) -> Option<ConditionGroup> {
        if self.conditions.is_empty() {
            return None;
        }
        let combinator = if self.any {
            Combinator::Or
        } else {
            Combinator::And
        };
        Some(
            self.conditions
                .iter()
                .cloned()
                .fold(ConditionGroup::new(combinator), ConditionGroup::with),
        )
    }
}

#[derive(Debug, Args)]
struct SubmitArgs {
    #[arg(long, help = "Contributor email")]
    contributor: String,
    #[arg(long = "flood-id", help = "Flood being corrected; omit to propose a new flood")]
    flood_id: Option<i64>,
    #[arg(long)]
    year: Option<i32>,
    #[arg(long)]
    location: Option<String>,
    #[arg(long)]
    cause: Option<String>,
    #[arg(long)]
    event: Option<String>,
    #[arg(long)]
    deaths: Option<u32>,
    #[arg(long, allow_negative_numbers = true)]
    lat: Option<f64>,
    #[arg(long, allow_negative_numbers = true)]
    lon: Option<f64>,
    #[arg(long)]
    notes: Option<String>,
    #[arg(long = "source-url")]
    source_url: Option<String>,
}

impl From<SubmitArgs> for SubmissionDraft {
    fn from(args: SubmitArgs) -> Self {
        SubmissionDraft {
            contributor: args.contributor,
            flood_id: args.flood_id,
            year: args.year,
            location_name: args.location,
            cause_of_flood: args.cause,
            flood_event_name: args.event,
            deaths_toll: args.deaths,
            latitude: args.lat,
            longitude: args.lon,
            notes: args.notes,
            source_url: args.source_url,
        }
    }
}

/// Run the `floodmap` command line against the hosted table API.
///
/// Connection settings are read from the environment; a configuration
/// problem is printed as a banner and returned as an error.
pub fn run<I>(args_iter: I) -> Result<(), Box<dyn Error>>
where
    I: Iterator<Item = String>,
{
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let Some(cli) = parse_cli::<FloodmapCli, _>(std::iter::once("floodmap".to_string()).chain(args_iter))?
    else {
        return Ok(());
    };

    let config = match ClientConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            print_banner(&err);
            return Err(err.into());
        }
    };
    let source: Arc<dyn TableSource> = Arc::new(RestSource::new(&config)?);
    let stdout = io::stdout();
    let mut out = stdout.lock();
    execute(cli.command, source, config, &mut out)
}

/// Run the command line against an explicit source, writing to `out`.
pub fn run_with_source<I, W>(
    args_iter: I,
    source: Arc<dyn TableSource>,
    config: ClientConfig,
    out: &mut W,
) -> Result<(), Box<dyn Error>>
where
    I: Iterator<Item = String>,
    W: Write,
{
    let Some(cli) = parse_cli::<FloodmapCli, _>(std::iter::once("floodmap".to_string()).chain(args_iter))?
    else {
        return Ok(());
    };
    execute(cli.command, source, config, out)
}

fn parse_cli<T, I>(args: I) -> Result<Option<T>, Box<dyn Error>>
where
    T: Parser,
    I: IntoIterator,
    I::Item: Into<std::ffi::OsString> + Clone,
{
    match T::try_parse_from(args) {
        Ok(cli) => Ok(Some(cli)),
        Err(err) => match err.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                err.print()?;
                Ok(None)
            }
            _ => Err(err.into()),
        },
    }
}

fn print_banner(err: &FloodError) {
    let mut board = NoticeBoard::new();
    let notice = board.push_error(err, Utc::now());
    eprintln!("[{}] {}", notice.level, notice.message);
    eprintln!("set {ENV_URL} and {ENV_ANON_KEY} to enable data access");
}

fn execute<W: Write>(
    command: Command,
    source: Arc<dyn TableSource>,
    config: ClientConfig,
    out: &mut W,
) -> Result<(), Box<dyn Error>> {
    match command {
        Command::Options(selection) => {
            let controller = controller_for(source, config, &selection);
            let outcome = controller.refresh_options();
            let options = outcome.options().cloned().unwrap_or_else(|| controller.options());
            for dim in FilterDimension::ALL {
                match options.get(dim) {
                    Some(DimensionOptions::Ready(values)) => {
                        let listed: Vec<String> = values.iter().map(ToString::to_string).collect();
                        writeln!(out, "{dim} ({}): {}", values.len(), listed.join(", "))?;
                    }
                    Some(DimensionOptions::Unavailable(reason)) => {
                        writeln!(out, "{dim}: unavailable ({reason})")?;
                    }
                    None => writeln!(out, "{dim}: not loaded")?,
                }
            }
            write_notices(&controller, out)?;
        }
        Command::Records {
            selection,
            conditions,
            limit,
        } => {
            let controller = controller_for(source, config, &selection);
            let group = conditions.group();
            let total = controller.record_count(group.as_ref())?;
            let records = controller.load_records(group.as_ref())?;
            writeln!(out, "matching records: {total}")?;
            for record in records.iter().take(limit.unwrap_or(usize::MAX)) {
                writeln!(out, "{}", describe(record))?;
            }
        }
        Command::Stats {
            selection,
            conditions,
            top,
        } => {
            let controller = controller_for(source, config, &selection);
            let records = controller.load_records(conditions.group().as_ref())?;
            let stats = FloodStats::from_records(&records, top);
            writeln!(out, "events: {}", stats.total_events)?;
            writeln!(out, "with coordinates: {}", stats.with_coordinates)?;
            writeln!(out, "recorded deaths: {}", stats.total_deaths)?;
            if let (Some(earliest), Some(latest)) = (stats.earliest_year, stats.latest_year) {
                writeln!(out, "years: {earliest}-{latest}")?;
            }
            for (cause, count) in &stats.top_causes {
                writeln!(out, "cause: {cause} ({count})")?;
            }
        }
        Command::Submit(args) => {
            let service = SubmissionService::new(source, &config);
            let draft = SubmissionDraft::from(args);
            match service.submit(&draft, Utc::now()) {
                Ok(receipt) => writeln!(
                    out,
                    "submission accepted for {}; {} more allowed this window",
                    receipt.contributor, receipt.remaining
                )?,
                Err(FloodError::Validation(problems)) => {
                    writeln!(out, "submission rejected:")?;
                    for problem in &problems {
                        writeln!(out, "- {problem}")?;
                    }
                    return Err(FloodError::Validation(problems).into());
                }
                Err(err) => return Err(err.into()),
            }
        }
        Command::Import { path, batch_size } => {
            let raw = std::fs::read_to_string(&path).map_err(FloodError::from)?;
            let records: Vec<FloodRecord> =
                serde_json::from_str(&raw).map_err(|err| FloodError::Decode {
                    table: path.display().to_string(),
                    reason: err.to_string(),
                })?;
            let importer = BatchImporter::new(source, &config).with_batch_size(batch_size);
            let summary = importer.import(records);
            writeln!(
                out,
                "inserted: {}, failed: {}, skipped: {}, converted: {}, batches: {}",
                summary.inserted,
                summary.failed,
                summary.skipped,
                summary.converted,
                summary.batches
            )?;
            if !summary.is_clean() {
                return Err(format!("{} records failed to import", summary.failed).into());
            }
        }
    }
    Ok(())
}

fn controller_for(
    source: Arc<dyn TableSource>,
    config: ClientConfig,
    selection: &SelectionArgs,
) -> FilterController {
    let controller = FilterController::new(source, config);
    for Selection { dim, value } in &selection.selections {
        controller.stage(SelectionChange::Select(*dim, value.clone()));
    }
    controller
}

fn write_notices<W: Write>(controller: &FilterController, out: &mut W) -> io::Result<()> {
    for notice in controller.notices() {
        writeln!(out, "! {}: {}", notice.level, notice.message)?;
    }
    Ok(())
}

fn describe(record: &FloodRecord) -> String {
    let text = |value: &Option<String>| {
        value
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or("-")
            .to_string()
    };
    let position = match (record.latitude, record.longitude) {
        (Some(lat), Some(lon)) if record.has_coordinates() => format!("({lat:.4}, {lon:.4})"),
        _ => "(no position)".to_string(),
    };
    format!(
        "#{} {} {} | {} | {} | deaths {} {}",
        record.id,
        text(&record.year),
        text(&record.location_name),
        text(&record.flood_event_name),
        text(&record.cause_of_flood),
        text(&record.deaths_toll),
        position
    )
}

fn parse_selection_arg(raw: &str) -> Result<Selection, String> {
    let (dim, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected DIM=VALUE, got '{raw}'"))?;
    let dim: FilterDimension = dim.parse().map_err(|err: FloodError| err.to_string())?;
    let value = dim
        .parse_value(value)
        .ok_or_else(|| format!("value for {dim} must not be empty"))?;
    Ok(Selection { dim, value })
}

fn parse_condition_arg(raw: &str) -> Result<Condition, String> {
    raw.parse::<Condition>().map_err(|err| err.to_string())
}

fn parse_positive_usize(raw: &str) -> Result<usize, String> {
    let value: usize = raw
        .trim()
        .parse()
        .map_err(|_| format!("expected a positive integer, got '{raw}'"))?;
    if value == 0 {
        return Err("value must be greater than zero".to_string());
    }
    Ok(value)
}
