// worktrack: command-line companion for tracking time against project tasks
//
// Commands:
//   worktrack tasks [--search <query>] [--refresh] [--json]
//   worktrack start <task-id> [--description <text>]
//   worktrack stop
//   worktrack status [--json]
//   worktrack describe <text>
//   worktrack watch
//
// Every invocation restores the persisted session and bootstraps the task
// cache first, exactly like an app launch.

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};
use worktrack_lib::logging;
use worktrack_lib::tracking::config::Config;
use worktrack_lib::tracking::http_gateway::HttpTaskGateway;
use worktrack_lib::{
    Clock, FileStore, KeyValueStore, SessionTracker, SessionView, SystemClock, Task, TaskCache,
    TaskGateway,
};

/// Track time against project tasks
#[derive(Parser, Debug)]
#[command(name = "worktrack", author, version, about, long_about = None)]
struct Cli {
    /// Enable debug logging on stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List tasks (served from cache when fresh)
    Tasks {
        /// Only show tasks whose title or description contains this text
        #[arg(short, long)]
        search: Option<String>,
        /// Reload from the server even if the cache is fresh
        #[arg(short, long)]
        refresh: bool,
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
    /// Start tracking time on a task
    Start {
        /// Task id as shown by `worktrack tasks`
        task_id: String,
        /// What you are working on
        #[arg(short, long)]
        description: Option<String>,
    },
    /// Stop the active session
    Stop,
    /// Show the active session, if any
    Status {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
    /// Change the description of the active session (local only)
    Describe {
        /// New description
        text: String,
    },
    /// Show a live elapsed-time counter until Ctrl-C
    Watch,
}

struct App {
    tracker: SessionTracker,
    cache: TaskCache,
}

impl App {
    async fn launch(config: &Config) -> Result<Self> {
        config
            .ensure_dirs()
            .with_context(|| format!("Failed to create {}", config.state_dir().display()))?;

        let gateway: Arc<dyn TaskGateway> = Arc::new(
            HttpTaskGateway::new(
                &config.api_url,
                config.api_token.as_deref(),
                config.http_timeout,
            )
            .context("Failed to set up the API client")?,
        );
        let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::new(config.store_file()));
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let tracker = SessionTracker::new(
            Arc::clone(&gateway),
            Arc::clone(&store),
            Arc::clone(&clock),
        );
        let cache = TaskCache::new(gateway, store, clock);

        let view = tracker.restore().await;
        debug!(is_tracking = view.is_tracking, "session restored");

        Ok(Self { tracker, cache })
    }

    /// Bootstrap the cache; a failed fetch is only fatal when nothing is cached
    async fn load_tasks(&self) -> Result<()> {
        if let Err(e) = self.cache.bootstrap().await {
            if self.cache.state().tasks.is_empty() {
                return Err(anyhow!(e)).context("Failed to load tasks");
            }
            warn!(error = %e, "showing cached tasks");
        }
        Ok(())
    }

    async fn resolve_task(&self, task_id: &str) -> Result<Task> {
        self.load_tasks().await?;
        if let Some(task) = self.cache.find(task_id) {
            return Ok(task);
        }

        // The task may be newer than the cached list
        self.cache
            .refresh()
            .await
            .context("Failed to refresh tasks")?;
        self.cache
            .find(task_id)
            .ok_or_else(|| anyhow!("Unknown task: {}", task_id))
    }
}

fn format_elapsed(seconds: u64) -> String {
    format!(
        "{:02}:{:02}:{:02}",
        seconds / 3600,
        (seconds % 3600) / 60,
        seconds % 60
    )
}

fn print_view(view: &SessionView) {
    match &view.active_session {
        Some(session) => {
            println!("Tracking task {} (session {})", session.task_id, session.id);
            println!("  Elapsed:     {}", format_elapsed(view.elapsed_seconds));
            if !view.description.is_empty() {
                println!("  Description: {}", view.description);
            }
            if let Some(error) = &view.error {
                println!("  Last error:  {}", error);
            }
        }
        None => println!("Not tracking"),
    }
}

fn view_json(view: &SessionView) -> serde_json::Value {
    json!({
        "isTracking": view.is_tracking,
        "activeSession": view.active_session,
        "elapsedSeconds": view.elapsed_seconds,
        "description": view.description,
        "error": view.error,
    })
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::from_env();
    let app = App::launch(&config).await?;

    match cli.command {
        Command::Tasks {
            search,
            refresh,
            json,
        } => {
            app.load_tasks().await?;
            if refresh {
                if let Err(e) = app.cache.refresh().await {
                    warn!(error = %e, "refresh failed, showing cached tasks");
                }
            }
            let tasks = app.cache.search(search.as_deref().unwrap_or(""));

            if json {
                println!("{}", serde_json::to_string_pretty(&tasks)?);
            } else if tasks.is_empty() {
                println!("No tasks");
            } else {
                for task in &tasks {
                    let marker = if task.is_tracking == Some(true) { "*" } else { " " };
                    println!(
                        "{} {:<12} {:<9} {:<12} {}",
                        marker,
                        task.id,
                        task.priority.to_string(),
                        task.status.to_string(),
                        task.title
                    );
                }
            }
        }
        Command::Start {
            task_id,
            description,
        } => {
            let task = app.resolve_task(&task_id).await?;
            let session = app
                .tracker
                .start(&task, description.as_deref())
                .await
                .with_context(|| format!("Failed to start tracking '{}'", task.title))?;
            println!("Started tracking '{}' (session {})", task.title, session.id);
        }
        Command::Stop => {
            let elapsed = app.tracker.view().elapsed_seconds;
            let session = app.tracker.stop().await?;
            println!(
                "Stopped session {} after {}",
                session.id,
                format_elapsed(elapsed)
            );
        }
        Command::Status { json } => {
            let view = app.tracker.view();
            if json {
                println!("{}", serde_json::to_string_pretty(&view_json(&view))?);
            } else {
                print_view(&view);
            }
        }
        Command::Describe { text } => {
            if !app.tracker.save_description(text).await {
                bail!("No active tracking to describe");
            }
            println!("Description updated");
        }
        Command::Watch => {
            let mut rx = app.tracker.subscribe();
            if !rx.borrow().is_tracking {
                bail!("No active tracking to watch");
            }

            loop {
                let elapsed = rx.borrow_and_update().elapsed_seconds;
                print!("\r{}", format_elapsed(elapsed));
                std::io::Write::flush(&mut std::io::stdout())?;

                tokio::select! {
                    changed = rx.changed() => {
                        if changed.is_err() || !rx.borrow().is_tracking {
                            break;
                        }
                    }
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
            println!();
        }
    }

    app.tracker.shutdown();
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = logging::init(cli.verbose) {
        eprintln!("{:#}", e);
    }

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
