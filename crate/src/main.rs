use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use labelsync::{
    provision, Conf, Error, ImportStorageOptions, ProjectSlot, ServiceConnection,
    StorageCoordinator, StorageUpdate, DEFAULT_REGEX_FILTER,
};
use labelsync_waiter::{wait_for_service, DEFAULT_MAX_ATTEMPTS};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(author, version, about = "Provision and sync a labeling project from local images")]
struct Args {
    #[arg(long, default_value = "labelsync.toml")]
    config_file: Vec<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Ensure project and storage exist, then validate and sync the storage
    Provision(ProvisionArgs),
    /// Resolve (or create) the configured project and print it
    Project,
    /// Inspect or change the project's local storages
    #[command(subcommand)]
    Storage(StorageCommand),
    /// Import tasks from a JSON file holding an array of task data objects
    ImportTasks {
        #[arg(long)]
        file: PathBuf,
    },
}

#[derive(Debug, ClapArgs)]
struct ProvisionArgs {
    /// Wait for the service health check before provisioning
    #[arg(long)]
    wait: bool,
    #[arg(long, default_value_t = DEFAULT_MAX_ATTEMPTS)]
    max_attempts: u32,
    /// Seconds between health checks
    #[arg(long, default_value_t = 5)]
    interval: u64,
}

#[derive(Debug, Subcommand)]
enum StorageCommand {
    /// List storages attached to the project
    List,
    /// Show a single storage
    Show {
        #[arg(long)]
        id: i64,
    },
    /// Show the service's import statistics for a storage
    Stats {
        #[arg(long)]
        id: i64,
    },
    /// Scan the storage directory into tasks
    Sync {
        #[arg(long)]
        id: i64,
        #[arg(long)]
        scan_all: bool,
    },
    /// Change storage settings; only the given fields are sent
    Update(UpdateArgs),
    /// Delete a storage
    Delete {
        #[arg(long)]
        id: i64,
    },
    /// Register the import directory using its path relative to the document root
    SetupImport {
        #[arg(long, default_value = "Local File Storage")]
        title: String,
        #[arg(long, default_value = DEFAULT_REGEX_FILTER)]
        regex_filter: String,
        /// Embed file contents instead of serving them by reference
        #[arg(long)]
        no_blob_urls: bool,
    },
}

#[derive(Debug, ClapArgs)]
struct UpdateArgs {
    #[arg(long)]
    id: i64,
    #[arg(long)]
    title: Option<String>,
    #[arg(long)]
    path: Option<String>,
    #[arg(long)]
    regex_filter: Option<String>,
    #[arg(long)]
    use_blob_urls: Option<bool>,
    #[arg(long)]
    presign: Option<bool>,
    #[arg(long)]
    description: Option<String>,
}

impl From<UpdateArgs> for StorageUpdate {
    fn from(args: UpdateArgs) -> Self {
        StorageUpdate {
            title: args.title,
            path: args.path,
            regex_filter: args.regex_filter,
            use_blob_urls: args.use_blob_urls,
            presign: args.presign,
            description: args.description,
        }
    }
}

fn setup_tracing(log_format: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match log_format {
        "json" => builder.json().try_init(),
        _ => builder.try_init(),
    }
    .map_err(|err| anyhow::anyhow!(err))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<ExitCode> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    let conf = Conf::new(&args.config_file).context("reading configuration")?;
    setup_tracing(&conf.log_format).context("setting up tracing")?;

    match args.command {
        Command::Provision(provision_args) => run_provision(&conf, provision_args).await,
        Command::Project => {
            let mut slot = ProjectSlot::new();
            let connection = ServiceConnection::connect(&conf, &mut slot).await?;
            let project_id = connection.get_project_id(&mut slot).await?;
            let title = connection
                .project_title(&mut slot, Some(project_id))
                .await
                .unwrap_or_default();
            println!("Project {project_id}: {title}");
            Ok(ExitCode::SUCCESS)
        }
        Command::Storage(command) => run_storage(&conf, command).await,
        Command::ImportTasks { file } => run_import_tasks(&conf, &file).await,
    }
}

async fn run_provision(conf: &Conf, args: ProvisionArgs) -> Result<ExitCode> {
    if args.wait {
        let url = conf.require_service()?.url;
        if !wait_for_service(&url, args.max_attempts, Duration::from_secs(args.interval)).await {
            return Ok(ExitCode::FAILURE);
        }
    }

    match provision(conf).await? {
        Some(outcome) => {
            println!("Storage ID:  {}", outcome.storage_id);
            println!("Validation:  {}", outcome.validation);
            println!("Sync:        {}", outcome.sync);
            Ok(ExitCode::SUCCESS)
        }
        None => {
            tracing::warn!("Local storage was not configured");
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn run_storage(conf: &Conf, command: StorageCommand) -> Result<ExitCode> {
    let local = conf.local_files()?;
    let mut slot = ProjectSlot::new();
    let connection = ServiceConnection::connect(conf, &mut slot).await?;
    let project_id = connection.get_project_id(&mut slot).await?;

    let session = connection.session();
    let title = connection.settings().project_name.as_str();
    let document_root = local.document_root.as_path();
    let coordinator = || async move {
        StorageCoordinator::new(session.clone(), project_id, document_root)
            .await
            .map(|coordinator| coordinator.with_title(title))
    };

    match command {
        StorageCommand::List => {
            print_json(&coordinator().await?.list_storages(project_id).await?)?;
        }
        StorageCommand::Show { id } => {
            print_json(&coordinator().await?.get_storage(id).await?)?;
        }
        StorageCommand::Stats { id } => {
            print_json(&coordinator().await?.storage_stats(id).await?)?;
        }
        StorageCommand::Sync { id, scan_all } => {
            print_json(&coordinator().await?.sync_storage(id, scan_all).await?)?;
        }
        StorageCommand::Update(update) => {
            let id = update.id;
            let update = StorageUpdate::from(update);
            print_json(&coordinator().await?.update_storage(id, &update).await?)?;
        }
        StorageCommand::Delete { id } => {
            if !coordinator().await?.delete_storage(id).await? {
                return Err(Error::NotFound(format!("storage {id} was not deleted")).into());
            }
            println!("Deleted storage {id}");
        }
        StorageCommand::SetupImport {
            title,
            regex_filter,
            no_blob_urls,
        } => {
            let options = ImportStorageOptions {
                title,
                regex_filter,
                use_blob_urls: !no_blob_urls,
            };
            let storage = connection
                .setup_import_storage(project_id, &local.document_root, &options)
                .await?;
            print_json(&storage)?;
        }
    }

    Ok(ExitCode::SUCCESS)
}

async fn run_import_tasks(conf: &Conf, file: &Path) -> Result<ExitCode> {
    let raw = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("reading tasks file {}", file.display()))?;
    let tasks: Vec<serde_json::Value> = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not a JSON array of tasks", file.display()))?;

    let mut slot = ProjectSlot::new();
    let connection = ServiceConnection::connect(conf, &mut slot).await?;
    let project_id = connection.get_project_id(&mut slot).await?;
    print_json(&connection.create_tasks(project_id, &tasks).await?)?;
    Ok(ExitCode::SUCCESS)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
