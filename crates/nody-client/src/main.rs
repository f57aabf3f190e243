//! nody: command-line client for the Nody canvas backend.
//!
//! Uses the same nody-core sync engine a canvas view would, over the HTTP
//! backend configured from the environment.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::io::Write;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use nody_client::{Config, HttpBackend};
use nody_core::console::EXECUTING_PLACEHOLDER;
use nody_core::records::{EdgeRecord, FileRecord, FolderRecord, Metadata, OutputLevel};
use nody_core::{
    list_projects, Backend, CanvasEvent, CanvasPoller, CommandEntry, CommandStatus, Console,
    EventBus, NodeForm, NodeFormInit, NodeKind, OutputTail, RefreshOutcome, SyncHook,
};

#[derive(Parser, Debug)]
#[command(name = "nody")]
#[command(about = "Command-line client for the Nody canvas")]
struct Args {
    /// Enable verbose logging
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll the canvas and output log, logging every change until Ctrl+C
    Watch,

    /// Fetch the canvas once and print it as JSON
    Snapshot,

    /// Run a terminal command on the backend and stream its output
    Exec {
        #[arg(required = true, trailing_var_arg = true)]
        command: Vec<String>,
    },

    /// Set a node's description
    Describe { node_id: String, description: String },

    /// Create a file node
    NewFile {
        name: String,

        #[arg(short, long, default_value = "")]
        description: String,
    },

    /// List or create projects
    Projects {
        #[command(subcommand)]
        action: ProjectsAction,
    },
}

#[derive(Subcommand, Debug)]
enum ProjectsAction {
    /// List existing projects
    List,

    /// Create a project
    Create {
        name: String,

        /// JSON request body
        #[arg(long, default_value = "{}")]
        body: String,
    },
}

type SharedBackend = Arc<HttpBackend>;

#[derive(Serialize)]
struct SnapshotView<'a> {
    files: &'a [FileRecord],
    metadata: &'a Metadata,
    folders: &'a [FolderRecord],
    edges: &'a [EdgeRecord],
}

/// Echoes the unprinted tail of a running command's output.
#[derive(Default)]
struct TerminalEcho {
    printed: Mutex<(usize, usize)>,
}

impl TerminalEcho {
    fn update(&self, entry: &CommandEntry) {
        let output = match entry.output.as_str() {
            EXECUTING_PLACEHOLDER => "",
            output => output,
        };
        let mut printed = self.printed.lock().unwrap_or_else(|e| e.into_inner());
        let (out_len, err_len) = &mut *printed;

        if let Some(fresh) = output.get(*out_len..) {
            print!("{}", fresh);
            let _ = std::io::stdout().flush();
        }
        *out_len = output.len();

        let error = entry.error.as_deref().unwrap_or("");
        if let Some(fresh) = error.get(*err_len..) {
            eprint!("{}", fresh);
        }
        *err_len = error.len();
    }
}

fn log_event(event: &CanvasEvent) {
    match event {
        CanvasEvent::FilesChanged { count } => info!("Files changed ({} total)", count),
        CanvasEvent::MetadataChanged { count } => info!("Metadata changed ({} entries)", count),
        CanvasEvent::FoldersChanged { count } => info!("Folders changed ({} total)", count),
        CanvasEvent::EdgesChanged { count } => info!("Edges changed ({} total)", count),
        CanvasEvent::PollFailed { message } => warn!("{}", message),
        CanvasEvent::CommandUpdated { entry } => {
            debug!("Command {} is {:?}", entry.id, entry.status)
        }
    }
}

async fn watch(backend: SharedBackend, config: &Config) -> Result<()> {
    let events = Arc::new(EventBus::new());
    let _subscription = events.subscribe(|event| log_event(&event));

    let poller = Arc::new(CanvasPoller::new(Arc::clone(&backend), Arc::clone(&events)));
    let mut handle = poller.spawn(config.poll_interval);

    let mut tail = OutputTail::new();
    let mut output_ticker = tokio::time::interval(config.output_interval);
    output_ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    info!("Watching {}. Press Ctrl+C to stop.", config.api_url);

    loop {
        tokio::select! {
            _ = output_ticker.tick() => {
                match backend.output().await {
                    Ok(log) => {
                        for message in tail.ingest(&log) {
                            match message.level {
                                OutputLevel::Info => info!("[{}] {}", message.timestamp, message.message),
                                OutputLevel::Success => info!("[{}] ✓ {}", message.timestamp, message.message),
                                OutputLevel::Error => error!("[{}] {}", message.timestamp, message.message),
                                OutputLevel::Debug => debug!("[{}] {}", message.timestamp, message.message),
                            }
                        }
                    }
                    Err(e) => debug!("Failed to fetch output: {}", e),
                }
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    handle.shutdown();
    Ok(())
}

async fn snapshot(backend: SharedBackend) -> Result<()> {
    let hook = SyncHook::new(backend, Arc::new(EventBus::new()));
    match hook.refresh().await? {
        RefreshOutcome::Applied(changes) => debug!("Refreshed: {:?}", changes),
        RefreshOutcome::Skipped => debug!("Refresh skipped"),
    }

    let state = hook.state();
    let view = SnapshotView {
        files: state.files(),
        metadata: state.metadata(),
        folders: state.folders(),
        edges: state.edges(),
    };
    println!("{}", serde_json::to_string_pretty(&view)?);
    Ok(())
}

async fn exec(backend: SharedBackend, command: &str) -> Result<()> {
    let events = Arc::new(EventBus::new());
    let echo = Arc::new(TerminalEcho::default());
    let _subscription = {
        let echo = Arc::clone(&echo);
        events.subscribe(move |event| {
            if let CanvasEvent::CommandUpdated { entry } = event {
                echo.update(&entry);
            }
        })
    };

    let console = Console::new(backend, events);
    let Some(entry) = console.execute(command).await else {
        bail!("Command is empty");
    };
    println!();

    if entry.status == CommandStatus::Failed {
        bail!("Command '{}' failed", entry.command);
    }
    Ok(())
}

async fn describe(backend: SharedBackend, node_id: &str, description: &str) -> Result<()> {
    let hook = SyncHook::new(backend, Arc::new(EventBus::new()));
    hook.update_description(node_id, description)
        .await
        .with_context(|| format!("Failed to update description of {}", node_id))?;
    info!("Updated description of {}", node_id);
    Ok(())
}

async fn new_file(backend: SharedBackend, name: String, description: String) -> Result<()> {
    let mut form = NodeForm::new();
    form.open(NodeFormInit {
        kind: NodeKind::File,
        file_name: Some(name),
        description,
        ..NodeFormInit::default()
    });

    let mut config = None;
    form.submit(|submitted| config = Some(submitted))?;
    let request = config
        .and_then(|config| config.to_file_create())
        .context("Form produced no file")?;

    info!("Creating {} ({})", request.file_path, request.file_type);
    let created = backend
        .create_file(&request)
        .await
        .with_context(|| format!("Failed to create {}", request.file_path))?;
    println!("{}", serde_json::to_string_pretty(&created)?);
    Ok(())
}

async fn projects(backend: SharedBackend, action: ProjectsAction) -> Result<()> {
    match action {
        ProjectsAction::List => {
            for project in list_projects(&*backend).await {
                match project.path {
                    Some(path) => println!("{}\t{}", project.name, path),
                    None => println!("{}", project.name),
                }
            }
        }
        ProjectsAction::Create { name, body } => {
            let body: serde_json::Value =
                serde_json::from_str(&body).context("--body must be valid JSON")?;
            let response = nody_core::create_project(&*backend, &name, &body).await;
            println!("{}", serde_json::to_string_pretty(&response.body)?);
            if !response.is_success() {
                bail!("Project creation failed with status {}", response.status);
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,nody_core=debug,nody_client=debug"
    } else {
        "info,nody_core=info,nody_client=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = Config::from_env()?;
    debug!("Backend: {}", config.api_url);
    let backend = Arc::new(HttpBackend::new(&config.api_url)?);

    match args.command {
        Command::Watch => watch(backend, &config).await,
        Command::Snapshot => snapshot(backend).await,
        Command::Exec { command } => exec(backend, &command.join(" ")).await,
        Command::Describe {
            node_id,
            description,
        } => describe(backend, &node_id, &description).await,
        Command::NewFile { name, description } => new_file(backend, name, description).await,
        Command::Projects { action } => projects(backend, action).await,
    }
}
