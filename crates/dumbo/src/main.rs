use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Result;
use clap::{Args, CommandFactory, Parser, Subcommand};
use dumbo_core::config::load_config;
use dumbo_core::driver::{MigrateOptions, MigrationReport, migrate_archive};
use dumbo_core::error::exit_code_for;
use dumbo_core::runtime::{
    ArchivePaths, ResolutionContext, inspect_archive, normalize_for_display, resolve_paths,
};
use dumbo_core::status::{MigrationStatus, migration_status};

#[derive(Debug, Parser)]
#[command(
    name = "dumbo",
    version,
    about = "Move an exported tweet archive to a Mastodon account, one reviewed post at a time"
)]
struct Cli {
    #[arg(
        long,
        global = true,
        value_name = "PATH",
        help = "Config file (default: <archive>/dumbo.toml)"
    )]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Enable debug logging")]
    debug: bool,
    #[arg(long, global = true, help = "Print resolved path diagnostics")]
    diagnostics: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Review and post every pending archive entry")]
    Migrate(MigrateArgs),
    #[command(about = "Summarize migration progress without network access")]
    Status(StatusArgs),
}

#[derive(Debug, Args)]
struct MigrateArgs {
    #[arg(value_name = "ARCHIVE_DIR", help = "Extracted archive (the folder containing data/)")]
    archive_dir: PathBuf,
    #[arg(long, value_name = "URL", help = "Mastodon server, e.g. https://mastodon.social")]
    host: Option<String>,
    #[arg(long, help = "Offer edits for already posted entries whose text changed")]
    edit: bool,
}

#[derive(Debug, Args)]
struct StatusArgs {
    #[arg(value_name = "ARCHIVE_DIR")]
    archive_dir: PathBuf,
    #[arg(long, help = "Print the summary as JSON")]
    json: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(error) = init_tracing(cli.debug) {
        eprintln!("error: {error:#}");
        return ExitCode::FAILURE;
    }

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {error:#}");
            ExitCode::from(exit_code_for(&error))
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let options = PathOptions {
        config: cli.config,
        diagnostics: cli.diagnostics,
    };
    match cli.command {
        Some(Commands::Migrate(args)) => run_migrate(&options, args),
        Some(Commands::Status(args)) => run_status(&options, args),
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

#[derive(Debug, Clone)]
struct PathOptions {
    config: Option<PathBuf>,
    diagnostics: bool,
}

fn run_migrate(options: &PathOptions, args: MigrateArgs) -> Result<()> {
    let paths = resolve_archive_paths(options, &args.archive_dir)?;
    let config = load_config(&paths.config_path)?;
    let host = config.host(args.host.as_deref())?;
    let archive = inspect_archive(&paths)?;

    println!("migrate");
    println!("archive_dir: {}", normalize_for_display(&paths.archive_dir));
    println!("host: {host}");
    println!("edit: {}", args.edit);
    println!("config: {}", format_flag(archive.config_exists));
    println!("ledger.size_bytes: {}", format_size(archive.ledger_size_bytes));
    print_warnings(&archive.warnings);
    if options.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }
    println!();

    let report = migrate_archive(
        &paths,
        &config,
        host,
        &MigrateOptions { edit: args.edit },
    )?;
    print_migration_report(&report);
    Ok(())
}

fn run_status(options: &PathOptions, args: StatusArgs) -> Result<()> {
    let paths = resolve_archive_paths(options, &args.archive_dir)?;
    let status = migration_status(&paths)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("archive status");
    println!("archive_dir: {}", normalize_for_display(&paths.archive_dir));
    print_migration_status(&status);
    if options.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }
    Ok(())
}

fn print_migration_report(report: &MigrationReport) {
    println!("considered: {}", report.considered);
    println!("excluded.retweets: {}", report.excluded_retweets);
    println!("excluded.mentions: {}", report.excluded_mentions);
    println!("excluded.replies: {}", report.excluded_replies);
    println!("previously_skipped: {}", report.previously_skipped);
    println!("previously_posted: {}", report.previously_posted);
    println!("unchanged: {}", report.unchanged);
    println!("created: {}", report.created);
    println!("edited: {}", report.edited);
    println!("declined: {}", report.declined);
    println!("passed: {}", report.passed);
    println!("prompts: {}", report.prompts);
    println!("request_count: {}", report.request_count);
}

fn print_migration_status(status: &MigrationStatus) {
    println!("posts.total: {}", status.total_posts);
    println!("posts.retweets: {}", status.retweets);
    println!("posts.mentions: {}", status.mentions);
    println!("posts.orphan_replies: {}", status.orphan_replies);
    println!("posts.posted: {}", status.posted);
    println!("posts.skipped: {}", status.skipped);
    println!("posts.pending: {}", status.pending);
    println!("ledger.entries: {}", status.ledger_entries);
    println!("ledger.size_bytes: {}", format_size(status.ledger_size_bytes));
    println!("credential_cached: {}", format_flag(status.credential_cached));
    println!("config: {}", format_flag(status.config_exists));
    print_warnings(&status.warnings);
}

fn print_warnings(warnings: &[String]) {
    if !warnings.is_empty() {
        println!("warnings:");
        for warning in warnings {
            println!("  - {warning}");
        }
    }
}

fn format_size(size: Option<u64>) -> String {
    size.map_or_else(|| "<none>".to_string(), |bytes| bytes.to_string())
}

fn resolve_archive_paths(options: &PathOptions, archive_dir: &Path) -> Result<ArchivePaths> {
    dotenvy::dotenv().ok();

    let context = ResolutionContext::from_process()?;
    let paths = resolve_paths(&context, archive_dir, options.config.as_deref())?;
    let archive_env = paths.archive_dir.join(".env");
    if archive_env.exists() {
        let _ = dotenvy::from_path_override(&archive_env);
    }
    Ok(paths)
}

fn init_tracing(debug: bool) -> Result<()> {
    let level = if debug { "debug" } else { "warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_env("DUMBO_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|error| anyhow::anyhow!("failed to initialize tracing subscriber: {error}"))?;
    Ok(())
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
