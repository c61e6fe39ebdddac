use std::process::ExitCode;

use camino::{Utf8Path, Utf8PathBuf};
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use morb_fetch::app::App;
use morb_fetch::config::{ConfigLoader, user_config_dir};
use morb_fetch::error::MorbError;
use morb_fetch::output::{JsonOutput, LogProgress};
use morb_fetch::remote::HttpSource;
use morb_fetch::store::Store;
use morb_fetch::toolkit::Toolkit;

#[derive(Parser)]
#[command(name = "morb-fetch")]
#[command(about = "Fetch and verify benchmark examples from the MORB repository")]
#[command(version, author)]
struct Cli {
    /// Config file to use instead of the discovered one
    #[arg(long, global = true)]
    config: Option<Utf8PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Create, show, list or delete config files")]
    Config(ConfigArgs),
    #[command(about = "List example ids in the index")]
    List,
    #[command(about = "Show the index record of an example")]
    Info(IdArgs),
    #[command(about = "Retrieve an example into the cache and summarize its dataset")]
    Fetch(IdArgs),
    #[command(about = "List or fetch MATLAB toolkit releases")]
    Toolkit(ToolkitArgs),
}

#[derive(Args)]
struct ConfigArgs {
    #[command(subcommand)]
    command: ConfigCommand,
}

#[derive(Subcommand)]
enum ConfigCommand {
    #[command(about = "Write a config template into DIR (default: current dir; `user` for the user config dir)")]
    Create { target: Option<String> },
    #[command(about = "Print the resolved settings")]
    Print,
    #[command(about = "List existing config files")]
    List,
    #[command(about = "Delete a config file, or `all` of them")]
    Delete { target: String },
}

#[derive(Args)]
struct IdArgs {
    id: String,
}

#[derive(Args)]
struct ToolkitArgs {
    #[command(subcommand)]
    command: ToolkitCommand,
}

#[derive(Subcommand)]
enum ToolkitCommand {
    #[command(about = "List known releases of a toolkit")]
    List { name: String },
    #[command(about = "Download and extract a toolkit release")]
    Fetch { name: String, version: String },
}

#[derive(Serialize)]
struct ConfigFileResult {
    path: String,
    changed: bool,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(morb) = report.downcast_ref::<MorbError>() {
            return ExitCode::from(map_exit_code(morb));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &MorbError) -> u8 {
    match error {
        MorbError::NotFound { .. }
        | MorbError::MissingMetadata { .. }
        | MorbError::UnknownToolkit(_)
        | MorbError::UnknownToolkitVersion { .. } => 2,
        MorbError::RemoteUnavailable { .. }
        | MorbError::Integrity { .. }
        | MorbError::ReleaseArchive(_) => 3,
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
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Config(args) => run_config(args.command, config_path),
        Commands::List => {
            let app = open_app(config_path)?;
            JsonOutput::print_list(&app.list(&LogProgress)).into_diagnostic()
        }
        Commands::Info(args) => {
            let app = open_app(config_path)?;
            let result = app.info(&args.id, &LogProgress)?;
            JsonOutput::print_info(&result).into_diagnostic()
        }
        Commands::Fetch(args) => {
            let app = open_app(config_path)?;
            let result = app.fetch(&args.id, &LogProgress)?;
            JsonOutput::print_fetch(&result).into_diagnostic()
        }
        Commands::Toolkit(args) => run_toolkit(args.command, config_path),
    }
}

fn open_app(config_path: Option<&Utf8Path>) -> miette::Result<App<HttpSource>> {
    let settings = ConfigLoader::resolve(config_path)?;
    let remote = HttpSource::new()?;
    Ok(App::open(settings, remote, &LogProgress)?)
}

fn run_config(command: ConfigCommand, config_path: Option<&Utf8Path>) -> miette::Result<()> {
    match command {
        ConfigCommand::Create { target } => {
            let dir = match target.as_deref() {
                Some("user") => user_config_dir().ok_or_else(|| {
                    MorbError::Filesystem("no user config directory on this platform".to_string())
                })?,
                Some(dir) => Utf8PathBuf::from(dir),
                None => Utf8PathBuf::from("."),
            };
            let (path, created) = ConfigLoader::create(&dir)?;
            if !created {
                tracing::warn!(%path, "config file already exists, left unchanged");
            }
            JsonOutput::print_json(&ConfigFileResult {
                path: path.to_string(),
                changed: created,
            })
            .into_diagnostic()
        }
        ConfigCommand::Print => {
            let settings = ConfigLoader::resolve(config_path)?;
            JsonOutput::print_json(&settings.to_config()).into_diagnostic()
        }
        ConfigCommand::List => {
            let paths: Vec<String> = ConfigLoader::list().iter().map(ToString::to_string).collect();
            JsonOutput::print_json(&paths).into_diagnostic()
        }
        ConfigCommand::Delete { target } => {
            let paths = if target == "all" {
                ConfigLoader::list()
            } else {
                vec![Utf8PathBuf::from(target)]
            };
            let mut results = Vec::new();
            for path in paths {
                let deleted = ConfigLoader::delete(&path)?;
                if !deleted {
                    tracing::warn!(%path, "config file does not exist");
                }
                results.push(ConfigFileResult {
                    path: path.to_string(),
                    changed: deleted,
                });
            }
            JsonOutput::print_json(&results).into_diagnostic()
        }
    }
}

fn run_toolkit(command: ToolkitCommand, config_path: Option<&Utf8Path>) -> miette::Result<()> {
    match command {
        ToolkitCommand::List { name } => {
            let toolkit = Toolkit::by_name(&name)?;
            JsonOutput::print_toolkit_versions(&toolkit.versions()).into_diagnostic()
        }
        ToolkitCommand::Fetch { name, version } => {
            let toolkit = Toolkit::by_name(&name)?;
            // Reject unknown versions before touching config or network.
            toolkit.doi(&version)?;
            let settings = ConfigLoader::resolve(config_path)?;
            let store = Store::new(settings.cache().to_path_buf());
            let remote = HttpSource::new()?;
            let result = toolkit.retrieve_version(&version, &store, &remote, &LogProgress)?;
            JsonOutput::print_toolkit(&result).into_diagnostic()
        }
    }
}
