//! taskq CLI: operator interface to a queue collection.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use secrecy::ExposeSecret;
use taskq::config::Config;
use taskq::db::Db;
use taskq::sweeper::TimeoutSweeper;
use taskq::telemetry::{TelemetryConfig, init_telemetry};
use taskq::{
    AddOptions, Direction, Queue, RescheduleOptions, ReserveOptions, SearchOptions, Sort, SortKey,
    Task, TaskFields, TaskId,
};

#[derive(Parser)]
#[command(name = "taskq", about = "Priority work queue over PostgreSQL")]
struct Cli {
    /// Collection to operate on (overrides TASKQ_COLLECTION)
    #[arg(long, global = true)]
    collection: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the tasks table and indexes
    Migrate,
    /// Add a task
    Add {
        /// JSON object of task fields
        #[arg(long, default_value = "{}")]
        fields: String,
        /// Priority (epoch seconds); defaults to now
        #[arg(long, allow_hyphen_values = true)]
        priority: Option<i64>,
    },
    /// Reserve the next eligible task and print it
    Reserve {
        /// Visibility horizon; defaults to now
        #[arg(long, allow_hyphen_values = true)]
        max_priority: Option<i64>,
    },
    /// Release a reserved task
    Reschedule {
        id: TaskId,
        /// New priority; defaults to the current one
        #[arg(long, allow_hyphen_values = true)]
        priority: Option<i64>,
    },
    /// Remove a task
    Remove { id: TaskId },
    /// Release reservations older than the timeout
    Timeout {
        /// Seconds; defaults to TASKQ_TIMEOUT_SECS or 120
        #[arg(long)]
        secs: Option<i64>,
    },
    /// Search tasks
    Search {
        /// JSON object of field equalities
        #[arg(long, default_value = "{}")]
        query: String,
        /// Only reserved (true) or only available (false) tasks
        #[arg(long)]
        reserved: Option<bool>,
        /// Sort keys, e.g. `priority`, `reserved_at:desc`, `name`
        #[arg(long, value_delimiter = ',')]
        sort: Vec<String>,
        #[arg(long)]
        limit: Option<u64>,
        #[arg(long)]
        skip: Option<u64>,
        /// Caller fields to return
        #[arg(long, value_delimiter = ',')]
        fields: Option<Vec<String>>,
    },
    /// Show a task
    Peek { id: TaskId },
    /// Count all tasks
    Size,
    /// Count available tasks
    Waiting,
    /// Run the timeout sweep periodically until Ctrl-C
    Sweep {
        /// Seconds between sweeps; defaults to TASKQ_SWEEP_INTERVAL_SECS or 30
        #[arg(long)]
        interval: Option<u64>,
        /// Reservation timeout in seconds
        #[arg(long)]
        secs: Option<i64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut config = Config::from_env()?;
    if let Some(collection) = cli.collection {
        config.queue.collection = collection;
    }

    let db = Db::connect(config.database_url.expose_secret()).await?;
    let queue = Queue::with_settings(Arc::new(db.clone()), &config.queue);

    match cli.command {
        Command::Migrate => {
            db.migrate().await?;
            println!("Migrations applied.");
        }
        Command::Add { fields, priority } => {
            let fields = TaskFields::from_value(serde_json::from_str(&fields)?)?;
            let id = queue.add_task(fields, AddOptions { priority }).await?;
            println!("{id}");
        }
        Command::Reserve { max_priority } => {
            match queue.reserve_task(ReserveOptions { max_priority }).await? {
                Some(task) => print_task(&task)?,
                None => println!("No task available."),
            }
        }
        Command::Reschedule { id, priority } => {
            let task = find(&queue, id).await?;
            queue
                .reschedule_task(&task, RescheduleOptions { priority })
                .await?;
            println!("Rescheduled {}", id.short());
        }
        Command::Remove { id } => {
            queue.remove_id(id).await?;
            println!("Removed {}", id.short());
        }
        Command::Timeout { secs } => {
            let released = queue.apply_timeout(secs).await?;
            println!("Released {released} task(s).");
        }
        Command::Search {
            query,
            reserved,
            sort,
            limit,
            skip,
            fields,
        } => {
            let query = TaskFields::from_value(serde_json::from_str(&query)?)?;
            let options = SearchOptions {
                reserved,
                sort: parse_sort(&sort)?,
                limit,
                skip,
                fields,
            };
            let tasks = queue.search(query, options).await?;
            for task in &tasks {
                println!("{}", serde_json::to_string(task)?);
            }
            eprintln!("{} task(s)", tasks.len());
        }
        Command::Peek { id } => match queue.peek_id(id).await?.into_iter().next() {
            Some(task) => print_task(&task)?,
            None => anyhow::bail!("no task with id {id}"),
        },
        Command::Size => println!("{}", queue.size().await?),
        Command::Waiting => println!("{}", queue.waiting().await?),
        Command::Sweep { interval, secs } => {
            let _guard = init_telemetry(TelemetryConfig {
                endpoint: config.otel_endpoint.clone(),
                service_name: "taskq".to_string(),
                log_level: config.log_level.clone(),
            })?;

            if let Some(interval) = interval {
                config.queue.sweep_interval_secs = interval.max(1);
            }
            let mut sweeper = TimeoutSweeper::with_settings(queue, &config.queue);
            if let Some(secs) = secs {
                sweeper = sweeper.timeout_secs(secs);
            }

            let handle = sweeper.clone();
            tokio::spawn(async move {
                tokio::signal::ctrl_c().await.ok();
                handle.shutdown();
            });

            let total = sweeper.run().await;
            println!("Released {total} task(s) in total.");
        }
    }

    Ok(())
}

async fn find(queue: &Queue, id: TaskId) -> anyhow::Result<Task> {
    queue
        .peek_id(id)
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("no task with id {id}"))
}

fn print_task(task: &Task) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(task)?);
    Ok(())
}

/// Parse `key[:asc|:desc]` entries. `priority` and `reserved_at` name the
/// metadata columns; anything else is a caller field.
fn parse_sort(specs: &[String]) -> anyhow::Result<Sort> {
    let mut sort = Sort::none();
    for spec in specs {
        let (name, direction) = match spec.split_once(':') {
            Some((name, "asc")) => (name, Direction::Ascending),
            Some((name, "desc")) => (name, Direction::Descending),
            Some((_, other)) => anyhow::bail!("invalid sort direction '{other}' in '{spec}'"),
            None => (spec.as_str(), Direction::Ascending),
        };
        let key = match name {
            "priority" => SortKey::Priority,
            "reserved_at" => SortKey::ReservedAt,
            field => SortKey::Field(field.to_string()),
        };
        sort = sort.then(key, direction);
    }
    Ok(sort)
}
