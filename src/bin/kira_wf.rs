use std::process::ExitCode;

use camino::Utf8PathBuf;
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use kira_wellframe::agg::AggType;
use kira_wellframe::config::{ConfigLoader, QuickSettings, ResolvedConfig};
use kira_wellframe::domain::{Generation, RunRef, Severity, TimeWindow};
use kira_wellframe::error::KiraError;
use kira_wellframe::identifier::Identifier;
use kira_wellframe::namer::NamingPolicy;
use kira_wellframe::output::{
    ConcernsResult, FetchSummary, InvalidateResult, JsonOutput, StimSummary,
};
use kira_wellframe::query::Expression;
use kira_wellframe::quick::{Caches, FetchRequest, Quick};
use kira_wellframe::source::Catalog;
use kira_wellframe::store::Store;

#[derive(Parser)]
#[command(name = "kira-wf")]
#[command(about = "Fetch validated, repaired per-well time-series frames from recorded runs")]
#[command(version, author)]
struct Cli {
    /// Catalog root holding runs/, batteries/ and audio/
    #[arg(long, global = true, default_value = "data")]
    data: Utf8PathBuf,

    #[arg(long, global = true)]
    config: Option<String>,

    #[arg(long, global = true)]
    cache_dir: Option<Utf8PathBuf>,

    #[arg(long, global = true)]
    generation: Option<Generation>,

    /// Upper bound on run time for --where queries (RFC 3339)
    #[arg(long, global = true)]
    as_of: Option<DateTime<Utc>>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Build or load a well frame and print its summary")]
    Fetch(FetchArgs),
    #[command(about = "Scan runs for data-quality concerns")]
    Concerns(ConcernsArgs),
    #[command(about = "Delete cached artifacts for runs")]
    Invalidate(TargetArgs),
    #[command(about = "Print the stimulus timeline of a battery")]
    Stim(StimArgs),
}

#[derive(Args, Clone)]
struct TargetArgs {
    /// Run ids, names, tag:<tag> or submission hashes
    ids: Vec<String>,

    #[arg(long = "where")]
    wheres: Vec<String>,
}

#[derive(Args, Clone)]
struct WindowArgs {
    #[arg(long)]
    start_ms: Option<u64>,

    #[arg(long)]
    end_ms: Option<u64>,
}

#[derive(Args)]
struct FetchArgs {
    #[command(flatten)]
    target: TargetArgs,

    #[command(flatten)]
    window: WindowArgs,

    #[arg(long, default_value = "none")]
    agg: AggType,

    #[arg(long)]
    namer: Option<NamingPolicy>,

    /// Skip the well cache and rebuild from recordings
    #[arg(long)]
    no_cache: bool,
}

#[derive(Args)]
struct ConcernsArgs {
    #[command(flatten)]
    target: TargetArgs,

    #[arg(long, default_value = "caution")]
    min_severity: Severity,

    #[arg(long)]
    snapshot: Option<Utf8PathBuf>,
}

#[derive(Args)]
struct StimArgs {
    battery: u32,

    #[command(flatten)]
    window: WindowArgs,

    #[arg(long, conflicts_with = "no_audio_waveform")]
    audio_waveform: bool,

    #[arg(long)]
    no_audio_waveform: bool,
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
        KiraError::RunNotFound(_)
        | KiraError::NoRuns(_)
        | KiraError::BatteryNotFound(_)
        | KiraError::SensorNotFound { .. }
        | KiraError::AudioNotFound(_)
        | KiraError::VideoNotFound(_)
        | KiraError::RefusingRequest(_)
        | KiraError::ContradictoryRequest(_)
        | KiraError::MissingConfig => 2,
        KiraError::MultipleGenerations { .. }
        | KiraError::IncompatibleGeneration { .. }
        | KiraError::NoFeatures(_)
        | KiraError::RaggedFrame(_)
        | KiraError::MultipleFrameRates(_)
        | KiraError::InvalidSampleRate(_) => 3,
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
    let resolved = load_config(cli.config.as_deref())?;
    let mut settings = resolved.settings;
    if let Some(generation) = cli.generation {
        settings = QuickSettings::for_generation(generation, settings.as_of)
            .using()
            .enable_checks(settings.enable_checks)
            .auto_fix(settings.auto_fix)
            .discard_controls(settings.discard_controls)
            .well_namer(settings.well_namer)
            .min_log_severity(settings.min_log_severity)
            .build();
    }
    if cli.as_of.is_some() {
        settings = settings.using().as_of(cli.as_of).build();
    }

    let store = match cli.cache_dir.or(resolved.cache_dir) {
        Some(root) => Store::new_with_root(root),
        None => Store::new()?,
    };
    let catalog = Catalog::open_dir(&cli.data)?;

    match cli.command {
        Commands::Fetch(args) => {
            let caches = if args.no_cache {
                Caches::new(store).without_well_cache()
            } else {
                Caches::new(store)
            };
            let quick = Quick::new(settings, catalog, caches);
            let request = FetchRequest {
                window: window(&args.window),
                namer: args.namer,
                agg: args.agg,
            };
            let outcome = quick.fetch_with(identifier(&args.target)?, &request)?;
            JsonOutput::print_fetch(&FetchSummary::of(&outcome)).into_diagnostic()?;
        }
        Commands::Concerns(args) => {
            let quick = Quick::new(settings, catalog, Caches::new(store));
            let concerns = quick.list_concerns(
                identifier(&args.target)?,
                args.min_severity,
                args.snapshot.as_deref(),
            )?;
            JsonOutput::print_concerns(&ConcernsResult {
                total: concerns.len(),
                snapshot: args.snapshot.map(|path| path.to_string()),
                concerns,
            })
            .into_diagnostic()?;
        }
        Commands::Invalidate(args) => {
            let quick = Quick::new(settings, catalog, Caches::new(store));
            let target = identifier(&args)?;
            let runs = quick
                .query_runs(target.clone())?
                .into_iter()
                .map(|run| run.id)
                .collect();
            let removed_entries = quick.invalidate(target)?;
            JsonOutput::print_invalidate(&InvalidateResult {
                runs,
                removed_entries,
            })
            .into_diagnostic()?;
        }
        Commands::Stim(args) => {
            let quick = Quick::new(settings, catalog, Caches::new(store));
            let audio_waveform = match (args.audio_waveform, args.no_audio_waveform) {
                (true, _) => Some(true),
                (_, true) => Some(false),
                _ => None,
            };
            let stimframes = quick.stimframes(args.battery, window(&args.window), audio_waveform)?;
            JsonOutput::print_stim(&StimSummary::of(&stimframes)).into_diagnostic()?;
        }
    }
    Ok(())
}

/// An explicit --config must exist; otherwise a missing kira-wf.json means defaults.
fn load_config(path: Option<&str>) -> Result<ResolvedConfig, KiraError> {
    match ConfigLoader::resolve(path) {
        Err(KiraError::MissingConfig) if path.is_none() => {
            ConfigLoader::resolve_config(Default::default())
        }
        other => other,
    }
}

fn identifier(target: &TargetArgs) -> Result<Identifier, KiraError> {
    let refs = target
        .ids
        .iter()
        .map(|id| id.parse::<RunRef>())
        .collect::<Result<Vec<_>, _>>()?;
    let wheres = target
        .wheres
        .iter()
        .map(|expr| expr.parse::<Expression>())
        .collect::<Result<Vec<_>, _>>()?;
    Identifier::from_parts(refs, wheres)
}

fn window(args: &WindowArgs) -> TimeWindow {
    TimeWindow::new(args.start_ms, args.end_ms)
}
