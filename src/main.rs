//! # TeleClaw CLI
//!
//! Manage posting/monitoring tasks and run the scheduling daemon.
//!
//! Usage:
//!   teleclaw task create --type group_posting -a acc1 -t group1 --interval 30
//!   teleclaw task list --status running
//!   teleclaw task start <id>
//!   teleclaw run                     # restore running tasks, stop all on Ctrl-C
//!   teleclaw cleanup --days 30

mod dry_run;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use teleclaw_core::TeleclawConfig;
use teleclaw_core::traits::RecordStore;
use teleclaw_core::types::{
    NewTask, PrecheckPolicy, Task, TaskConfig, TaskExecutionRecord, TaskStatus, TaskType,
    TaskUpdate, TimeRange,
};
use teleclaw_scheduler::{
    BroadcastSink, FanoutSink, HistorySink, SqliteStore, TaskScheduler, TracingSink,
};
use tracing_subscriber::EnvFilter;

use dry_run::{DryRunTransport, OpenResolver};

#[derive(Parser)]
#[command(
    name = "teleclaw",
    version,
    about = "📣 TeleClaw — per-account group posting and channel monitoring"
)]
struct Cli {
    /// Config file (default: ~/.teleclaw/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Manage tasks
    #[command(subcommand)]
    Task(TaskCommand),
    /// Show execution history of a task
    History {
        id: String,
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
    /// Execution statistics for a task or an account
    Stats {
        #[arg(long, conflicts_with = "account")]
        task: Option<String>,
        #[arg(long)]
        account: Option<String>,
    },
    /// Most recent failed executions
    Failed {
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
    /// Delete execution records older than N days
    Cleanup {
        #[arg(long)]
        days: u32,
    },
    /// Run the scheduler daemon (dry-run transport)
    Run,
}

#[derive(Subcommand)]
enum TaskCommand {
    /// Create a task
    Create(CreateArgs),
    /// List tasks
    List {
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        account: Option<String>,
    },
    /// Show one task as JSON
    Show { id: String },
    /// Update a stopped task from a JSON patch file
    Update {
        id: String,
        /// JSON file with any of: name, account_ids, target_ids, config, priority
        #[arg(long)]
        json: PathBuf,
    },
    /// Delete a task (stops it first)
    Delete { id: String },
    /// Precheck and mark a task running; `teleclaw run` attaches it
    Start { id: String },
    /// Mark a task stopped
    Stop { id: String },
    /// Alias of stop
    Pause { id: String },
}

#[derive(Args)]
struct CreateArgs {
    /// group_posting or channel_monitoring
    #[arg(long = "type")]
    task_type: String,
    #[arg(short, long)]
    name: Option<String>,
    #[arg(short = 'a', long = "account", required = true)]
    accounts: Vec<String>,
    #[arg(short = 't', long = "target", required = true)]
    targets: Vec<String>,
    /// Minutes between posts (group_posting)
    #[arg(long)]
    interval: Option<u32>,
    /// Chance of commenting on a post, 0.0-1.0 (channel_monitoring)
    #[arg(long)]
    probability: Option<f64>,
    /// Maximum random delay before each action, in minutes
    #[arg(long)]
    delay: Option<f64>,
    /// Daily window, e.g. 08:00-22:00
    #[arg(long)]
    window: Option<String>,
    #[arg(long)]
    priority: Option<u8>,
    /// Retry failed sends up to N times
    #[arg(long)]
    retries: Option<u32>,
    /// Refuse to start if any pair is blocked
    #[arg(long)]
    strict: bool,
    #[arg(long)]
    no_auto_join: bool,
    /// Content template, repeatable. Placeholders: {account} {target} {date} {time} {post}
    #[arg(long = "template")]
    templates: Vec<String>,
}

impl CreateArgs {
    fn into_new_task(self) -> Result<NewTask> {
        let task_type: TaskType = self.task_type.parse()?;
        let time_range = match &self.window {
            Some(window) => {
                let (start, end) = window
                    .split_once('-')
                    .with_context(|| format!("window '{window}' must look like 08:00-22:00"))?;
                Some(TimeRange::new(start.trim(), end.trim()))
            }
            None => None,
        };
        Ok(NewTask {
            name: self.name.unwrap_or_default(),
            task_type,
            account_ids: self.accounts,
            target_ids: self.targets,
            config: TaskConfig {
                interval: self.interval,
                comment_probability: self.probability,
                random_delay: self.delay,
                retry_on_error: self.retries.is_some(),
                max_retries: self.retries.unwrap_or(3),
                auto_join_enabled: !self.no_auto_join,
                precheck_policy: if self.strict {
                    PrecheckPolicy::Strict
                } else {
                    PrecheckPolicy::Partial
                },
                time_range,
                templates: self.templates,
            },
            priority: self.priority,
        })
    }
}

fn init_logging(config: &TeleclawConfig, verbose: bool) {
    let default = if verbose {
        "teleclaw=debug,teleclaw_scheduler=debug".to_string()
    } else {
        config.logging.level.clone()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    if config.logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => TeleclawConfig::load_from(path)?,
        None => TeleclawConfig::load()?,
    };
    init_logging(&config, cli.verbose);

    let db_path = config.database_path();
    let store: Arc<dyn RecordStore> = Arc::new(
        SqliteStore::open(&db_path)
            .with_context(|| format!("opening database {}", db_path.display()))?,
    );

    let history_sink = Arc::new(HistorySink::new(config.scheduler.status_history));
    let broadcast = Arc::new(BroadcastSink::new(config.scheduler.status_history));
    let mut sink = FanoutSink::new(Vec::new());
    sink.push(Arc::new(TracingSink));
    sink.push(history_sink);
    sink.push(broadcast);

    let scheduler = TaskScheduler::new(
        Arc::clone(&store),
        Arc::new(OpenResolver),
        Arc::new(DryRunTransport::new()),
    )
    .with_sink(Arc::new(sink))
    .with_dedup_capacity(config.scheduler.dedup_capacity);

    match cli.command {
        Command::Task(cmd) => run_task_command(&scheduler, cmd).await?,
        Command::History { id, limit } => {
            let records = scheduler.history().get_task_history(&id, Some(limit)).await?;
            print_records(&records);
        }
        Command::Stats { task, account } => {
            let history = scheduler.history();
            let (label, stats) = match (task, account) {
                (Some(id), _) => (format!("task {id}"), history.get_task_execution_stats(&id).await?),
                (None, Some(id)) => (
                    format!("account {id}"),
                    history.get_account_execution_stats(&id).await?,
                ),
                (None, None) => anyhow::bail!("pass --task or --account"),
            };
            println!("📊 Execution stats for {label}");
            println!("   Total:     {}", stats.total);
            println!("   Succeeded: {}", stats.succeeded);
            println!("   Failed:    {}", stats.failed);
            println!("   Success:   {:.1}%", stats.success_rate * 100.0);
            if let Some(at) = stats.last_executed_at {
                println!("   Last run:  {}", at.format("%Y-%m-%d %H:%M:%S"));
            }
        }
        Command::Failed { limit } => {
            let records = scheduler.history().get_failed_executions(limit).await?;
            print_records(&records);
        }
        Command::Cleanup { days } => {
            let removed = scheduler.history().cleanup_old_executions(days).await?;
            println!("🧹 Removed {removed} execution records older than {days} days");
        }
        Command::Run => run_daemon(&scheduler, &config).await?,
    }

    Ok(())
}

async fn run_task_command(scheduler: &TaskScheduler, cmd: TaskCommand) -> Result<()> {
    match cmd {
        TaskCommand::Create(args) => {
            let task = scheduler.create_task(args.into_new_task()?).await?;
            println!("✅ Created {} ({})", task.id, task.task_type);
        }
        TaskCommand::List { status, account } => {
            let tasks = match (status, account) {
                (Some(status), _) => {
                    let status: TaskStatus = status.parse()?;
                    scheduler.get_tasks_by_status(status).await?
                }
                (None, Some(account)) => scheduler.get_tasks_by_account_id(&account).await?,
                (None, None) => scheduler.get_all_tasks().await?,
            };
            print_tasks(&tasks);
        }
        TaskCommand::Show { id } => match scheduler.get_task(&id).await? {
            Some(task) => println!("{}", serde_json::to_string_pretty(&task)?),
            None => anyhow::bail!("task {id} not found"),
        },
        TaskCommand::Update { id, json } => {
            let content = std::fs::read_to_string(&json)
                .with_context(|| format!("reading {}", json.display()))?;
            let update: TaskUpdate = serde_json::from_str(&content)?;
            let task = scheduler.update_task(&id, update).await?;
            println!("✏️ Updated {}", task.id);
        }
        TaskCommand::Delete { id } => {
            scheduler.delete_task(&id).await?;
            println!("🗑️ Deleted {id}");
        }
        TaskCommand::Start { id } => {
            let outcome = scheduler.enable_task(&id).await?;
            if outcome.already_running {
                println!("ℹ️ {}", outcome.message);
            } else {
                println!("▶️ {}", outcome.message);
                println!("   The daemon picks it up on its next start (teleclaw run).");
            }
        }
        TaskCommand::Stop { id } | TaskCommand::Pause { id } => {
            if scheduler.stop_task(&id).await? {
                println!("⏹️ Stopped {id}");
            } else {
                println!("ℹ️ {id} was not running");
            }
        }
    }
    Ok(())
}

async fn run_daemon(scheduler: &TaskScheduler, config: &TeleclawConfig) -> Result<()> {
    println!("📣 TeleClaw v{}", env!("CARGO_PKG_VERSION"));
    println!("   🗄️  Database: {}", config.database_path().display());
    println!("   🚚 Transport: dry-run");
    println!();

    if config.scheduler.restore_on_start {
        let report = scheduler.restore_running_tasks().await?;
        for id in &report.restored {
            println!("   ✅ resumed {id}");
        }
        for failure in &report.failed {
            println!("   ❌ {} stopped: {}", failure.task_id, failure.reason);
        }
    }

    tracing::info!("⏰ Scheduler running, Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    tracing::info!("🛑 Shutting down");
    let report = scheduler.stop_all_tasks().await;
    for (id, error) in &report.failures {
        tracing::warn!("⚠️ {id} did not stop cleanly: {error}");
    }
    println!("⏹️ Stopped {} tasks", report.stopped);
    Ok(())
}

fn print_tasks(tasks: &[Task]) {
    if tasks.is_empty() {
        println!("No tasks.");
        return;
    }
    println!(
        "{:<38} {:<20} {:<9} {:>3} {:>4} {:>4}  NAME",
        "ID", "TYPE", "STATUS", "PRI", "ACC", "TGT"
    );
    for task in tasks {
        println!(
            "{:<38} {:<20} {:<9} {:>3} {:>4} {:>4}  {}",
            task.id,
            task.task_type,
            task.status,
            task.priority,
            task.account_ids.len(),
            task.target_ids.len(),
            task.name
        );
    }
}

fn print_records(records: &[TaskExecutionRecord]) {
    if records.is_empty() {
        println!("No executions.");
        return;
    }
    for r in records {
        let mark = if r.success { "✅" } else { "❌" };
        let detail = r.error_message.as_deref().unwrap_or(&r.content);
        println!(
            "{mark} {} {} → {} (retries {}) {}",
            r.executed_at.format("%Y-%m-%d %H:%M:%S"),
            r.account_id,
            r.target_id,
            r.retry_count,
            detail
        );
    }
}
