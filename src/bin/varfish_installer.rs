use std::path::PathBuf;
use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use varfish_installer::app::{App, ProgressSinkKind, SyncOptions, SyncResult};
use varfish_installer::config::{Config, ConfigLoader, ResolvedConfig};
use varfish_installer::domain::{Dataset, DownloadSubset, GenomeRelease, resolve_datasets};
use varfish_installer::error::InstallerError;
use varfish_installer::output::{JsonOutput, OutputMode};
use varfish_installer::store::Store;
use varfish_installer::transfer::HttpTransfer;
use varfish_installer::tui::Tui;

#[derive(Parser)]
#[command(name = "varfish-installer")]
#[command(about = "Installs VarFish reference data, fetching only what the manifests say is missing")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    non_interactive: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Download or repair datasets below a destination directory")]
    Download(SyncArgs),
    #[command(about = "Show what a download would do, without transferring data files")]
    Status(SyncArgs),
    #[command(about = "Parse a hashdeep manifest and summarize it")]
    Manifest(ManifestArgs),
    #[command(about = "List datasets recorded as installed")]
    List(ListArgs),
}

#[derive(Args, Clone)]
struct SyncArgs {
    dst_path: PathBuf,

    #[arg(long)]
    config: Option<String>,

    /// Restrict to these datasets (repeatable); default is every dataset.
    #[arg(long = "dataset")]
    datasets: Vec<Dataset>,

    #[arg(long = "release")]
    releases: Vec<GenomeRelease>,

    /// Dataset version as DATASET=VERSION (repeatable); overrides the config file.
    #[arg(long = "version-of", value_name = "DATASET=VERSION")]
    versions: Vec<String>,

    #[arg(long)]
    subset: Option<DownloadSubset>,

    #[arg(long)]
    dry_run: bool,

    #[arg(long)]
    strict_digests: bool,
}

#[derive(Args)]
struct ManifestArgs {
    path: PathBuf,

    #[arg(long)]
    strict_digests: bool,
}

#[derive(Args)]
struct ListArgs {
    dst_path: PathBuf,

    #[arg(long)]
    config: Option<String>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<InstallerError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &InstallerError) -> u8 {
    match error {
        err if err.is_configuration() => 2,
        InstallerError::TransferHttp(_)
        | InstallerError::TransferStatus { .. }
        | InstallerError::DigestMismatch { .. }
        | InstallerError::SizeMismatch { .. } => 3,
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
        Commands::Download(args) => run_sync(args, output_mode, false),
        Commands::Status(args) => run_sync(args, output_mode, true),
        Commands::Manifest(args) => run_manifest(args),
        Commands::List(args) => run_list(args, output_mode),
    }
}

/// Reads the config file, treating an absent default file as an empty config.
fn load_config(path: Option<&str>) -> Result<ResolvedConfig, InstallerError> {
    match ConfigLoader::resolve(path) {
        Err(InstallerError::MissingConfig) if path.is_none() => {
            ConfigLoader::resolve_config(Config::default())
        }
        other => other,
    }
}

fn apply_overrides(mut resolved: ResolvedConfig, args: &SyncArgs) -> Result<ResolvedConfig, InstallerError> {
    if !args.datasets.is_empty() {
        resolved.datasets = args.datasets.clone();
    }
    if !args.releases.is_empty() {
        resolved.releases = args.releases.clone();
    }
    if let Some(subset) = args.subset {
        resolved.remote.subset = subset;
    }
    for raw in &args.versions {
        let (name, version) = raw.split_once('=').ok_or_else(|| InstallerError::InvalidVersion {
            dataset: raw.clone(),
            message: "expected DATASET=VERSION".to_string(),
        })?;
        resolved
            .versions
            .insert(name.trim().parse::<Dataset>()?, version.trim().to_string());
    }
    Ok(resolved)
}

fn store_for(dst_path: &std::path::Path, resolved: &ResolvedConfig) -> miette::Result<Store> {
    let base = Utf8PathBuf::from_path_buf(dst_path.join(&resolved.base_dir))
        .map_err(|path| miette::Report::msg(format!("non-UTF-8 path: {}", path.display())))?;
    Ok(Store::new(base, &resolved.remote.static_infix))
}

fn run_sync(args: SyncArgs, output_mode: OutputMode, status_only: bool) -> miette::Result<()> {
    let resolved = apply_overrides(load_config(args.config.as_deref())?, &args)?;
    let catalog = resolve_datasets(&resolved.datasets, &resolved.releases, &resolved.versions)?;
    let store = store_for(&args.dst_path, &resolved)?;
    let transfer = HttpTransfer::new(&resolved.remote)?;
    let app = App::new(store, resolved.remote.clone(), transfer);
    let options = SyncOptions {
        dry_run: args.dry_run,
        strict_digests: args.strict_digests,
    };

    match (output_mode, status_only) {
        (OutputMode::NonInteractive, true) => {
            let result = app.status(&catalog, options, &JsonOutput)?;
            JsonOutput::print_status(&result).into_diagnostic()?;
            Ok(())
        }
        (OutputMode::NonInteractive, false) => {
            let result = app.sync(&catalog, options, &JsonOutput)?;
            JsonOutput::print_sync(&result).into_diagnostic()?;
            fail_on_dataset_errors(&result)
        }
        (OutputMode::Interactive, true) => {
            let mut tui = Tui::new(ProgressSinkKind::Status);
            let result = tui.run(move |sink| app.status(&catalog, options, sink))?;
            tui.finish_status(&result)
        }
        (OutputMode::Interactive, false) => {
            let mut tui = Tui::new(ProgressSinkKind::Sync);
            let result = tui.run(move |sink| app.sync(&catalog, options, sink))?;
            tui.finish_sync(&result)?;
            print_sync_summary(&result);
            fail_on_dataset_errors(&result)
        }
    }
}

fn fail_on_dataset_errors(result: &SyncResult) -> miette::Result<()> {
    match result.failures() {
        0 => Ok(()),
        count => Err(miette::Report::msg(format!(
            "{count} of {} datasets failed",
            result.items.len()
        ))),
    }
}

fn run_manifest(args: ManifestArgs) -> miette::Result<()> {
    let options = SyncOptions {
        dry_run: true,
        strict_digests: args.strict_digests,
    };
    let report = App::<HttpTransfer>::inspect_manifest(&args.path, options)?;
    JsonOutput::print_manifest(&report).into_diagnostic()?;
    Ok(())
}

fn run_list(args: ListArgs, output_mode: OutputMode) -> miette::Result<()> {
    let resolved = load_config(args.config.as_deref())?;
    let store = store_for(&args.dst_path, &resolved)?;
    let transfer = HttpTransfer::new(&resolved.remote)?;
    let app = App::new(store, resolved.remote.clone(), transfer);

    match output_mode {
        OutputMode::NonInteractive => {
            let result = app.list(&JsonOutput)?;
            JsonOutput::print_list(&result).into_diagnostic()?;
            Ok(())
        }
        OutputMode::Interactive => {
            let mut tui = Tui::new(ProgressSinkKind::List);
            let result = tui.run(move |sink| app.list(sink))?;
            tui.finish_list(&result)
        }
    }
}

fn print_sync_summary(result: &SyncResult) {
    let green = "\x1b[32m";
    let yellow = "\x1b[33m";
    let cyan = "\x1b[36m";
    let red = "\x1b[31m";
    let reset = "\x1b[0m";

    println!("{cyan}varfish-installer summary{reset}");
    println!("{green}datasets processed: {}{reset}", result.items.len());
    let failures = result.failures();
    let color = if failures == 0 { green } else { red };
    println!("{color}errors: {failures}{reset}");

    for item in &result.items {
        let release = item.release.as_deref().unwrap_or("-");
        let color = match item.action.as_str() {
            "up-to-date" => green,
            "failed" => red,
            _ => cyan,
        };
        println!("{color}{} {release} ({}){reset}", item.dataset, item.action);
        println!("{color}   path: {}{reset}", item.path);
        if item.fetched_files > 0 {
            println!(
                "{color}   fetched: {} files, {} bytes{reset}",
                item.fetched_files, item.fetched_bytes
            );
        }
        for stale in &item.stale {
            println!("{yellow}   not in manifest: {}{reset}", stale.name);
        }
        if let Some(err) = &item.error {
            println!("{red}   error: {err}{reset}");
        }
    }
}
