// crates/arborcli/src/main.rs

use anyhow::{Context, Result};
use arborcore::{Event, EventKind, LogLevel, Node, Value};
use arborruntime::{
    context, validate_node, ErrorMergeStrategy, ExecutionMode, Outcome, RuntimeConfig, TreeRuntime,
    TreeView,
};
use arbortasks::FnTask;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const DEMO_CHILDREN: [&str; 3] = ["alpha", "beta", "gamma"];

#[derive(Parser)]
#[command(name = "arbor")]
#[command(about = "Execution tree runtime CLI", long_about = None)]
struct Cli {
    /// Show debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a small tree of three children and print what it reports
    Demo {
        /// Run the children concurrently
        #[arg(long)]
        concurrent: bool,

        /// Make the named child fail (repeatable)
        #[arg(long = "fail", value_name = "NAME")]
        fail: Vec<String>,

        /// Merge concurrent failures into one error
        #[arg(long)]
        merge_errors: bool,

        /// Runtime configuration JSON file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Print events and the final tree as JSON
        #[arg(long)]
        json: bool,
    },

    /// Verify a serialized tree and print its outline
    Inspect {
        /// Path to a tree JSON file
        file: PathBuf,
    },

    /// Print the default runtime configuration
    Config,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Demo {
            concurrent,
            fail,
            merge_errors,
            config,
            json,
        } => {
            let mut config = match config {
                Some(path) => load_config(&path)?,
                None => RuntimeConfig::default(),
            };
            if concurrent {
                config.task.mode = ExecutionMode::Concurrent;
            }
            if merge_errors {
                config.task.merge = ErrorMergeStrategy::merged();
            }
            run_demo(config, fail, json).await?;
        }

        Commands::Inspect { file } => {
            inspect_tree(&file)?;
        }

        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&RuntimeConfig::default())?);
        }
    }

    Ok(())
}

fn load_config(path: &Path) -> Result<RuntimeConfig> {
    tracing::debug!(path = %path.display(), "loading runtime config");
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read config {}", path.display()))?;
    RuntimeConfig::from_json(&text).with_context(|| format!("parse config {}", path.display()))
}

async fn run_demo(config: RuntimeConfig, fail: Vec<String>, json: bool) -> Result<()> {
    let task_options = config.task.clone().with_name("demo");
    let merge = task_options.merge.clone();
    let runtime = TreeRuntime::with_config(config);
    let mut events = runtime.subscribe_events();

    let root = runtime.root("demo")?;
    root.info(format!("spawning {} children", DEMO_CHILDREN.len()));

    let mut children = Vec::new();
    for (index, name) in DEMO_CHILDREN.iter().enumerate() {
        let fails = fail.iter().any(|f| f == name);
        let delay = Duration::from_millis(20 * (DEMO_CHILDREN.len() - index) as u64);
        let task = FnTask::new(*name, move |unit| async move {
            unit.step("work", async {
                tokio::time::sleep(delay).await;
                context::log(LogLevel::Info, format!("slept {}ms", delay.as_millis()))?;
                if fails {
                    anyhow::bail!("{} was told to fail", unit.name());
                }
                Ok(Value::from(unit.name()))
            })
            .await
            .map_err(anyhow::Error::from)
        })?;
        children.push(task.into_runnable());
    }

    let report = root
        .spawn_report(task_options, || async move { anyhow::Ok(children) })
        .await?;
    tracing::info!(
        succeeded = report.succeeded(),
        failed = report.failed(),
        cancelled = report.cancelled(),
        "demo finished"
    );

    // Every event is on the bus by the time the task returns
    while let Ok(event) = events.try_recv() {
        if json {
            println!("{}", serde_json::to_string(&event)?);
        } else {
            println!("{}", describe(&event));
        }
    }

    let tree = root.node();
    if json {
        println!("{}", serde_json::to_string_pretty(&tree)?);
    } else {
        println!();
        for child in &report.children {
            match &child.outcome {
                Outcome::Completed(value) => println!("  ok    {} -> {}", child.unit.name(), value.to_json()),
                Outcome::Failed(err) => println!("  fail  {} -> {}", child.unit.name(), err),
                Outcome::Cancelled => println!("  skip  {}", child.unit.name()),
            }
        }
        println!();
        print!("{}", tree.outline());
    }

    report.into_result(&merge, &root)?;
    Ok(())
}

fn describe(event: &Event) -> String {
    let detail = match &event.kind {
        EventKind::StepStart { step } => format!("step '{}' started", step.name),
        EventKind::StepEnd { step, duration_ms } => {
            format!("step '{}' {} in {}ms", step.name, step.status, duration_ms)
        }
        EventKind::TaskStart { task, children } => {
            format!("task '{}' started with {} children", task, children)
        }
        EventKind::TaskEnd { task, succeeded, failed } => {
            format!("task '{}' ended: {} ok, {} failed", task, succeeded, failed)
        }
        EventKind::ChildAttached { child, .. } => format!("attached {}", child.name),
        EventKind::ChildDetached { child, .. } => format!("detached {}", child.name),
        EventKind::StateSnapshot { state } => format!("state {} fields", state.len()),
        EventKind::TreeUpdated { .. } => "tree updated".to_string(),
        EventKind::Error { error } => format!("error: {}", error.message),
    };
    format!("[{}] {:<14} {}", event.node.name, event.name(), detail)
}

fn inspect_tree(file: &Path) -> Result<()> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("read tree {}", file.display()))?;
    let node: Node = serde_json::from_str(&text)
        .with_context(|| format!("parse tree {}", file.display()))?;

    let problems = validate_node(&node);
    if !problems.is_empty() {
        for problem in &problems {
            eprintln!("  {}", problem);
        }
        anyhow::bail!("{} has {} structural problems", file.display(), problems.len());
    }

    let view = TreeView::from_node(&node);
    println!("{} nodes, root {}", view.len(), node.info());
    print!("{}", node.outline());
    Ok(())
}
