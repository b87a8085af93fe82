use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use arbor_core::TreeSnapshot;
use arbor_runtime::{
  ChannelNotifier, RuntimeBuilder, RuntimeConfig, RuntimeEvent, TracingInterceptor,
};
use bytes::Bytes;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod demo;

use demo::{DemoCounter, DemoProps, increment};

/// The demo stops once no event arrived for this long.
const IDLE_TIMEOUT: Duration = Duration::from_millis(250);

/// Arbor - a runtime for trees of composable workflows
#[derive(Parser)]
#[command(name = "arbor")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Log filter used when RUST_LOG is not set
  #[arg(long, global = true, default_value = "warn")]
  log_level: String,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Run the bundled counter tree
  Demo {
    /// Increments to send to the root counter
    #[arg(long, default_value_t = 3)]
    increments: u32,

    /// Ticks the ticker child's worker emits
    #[arg(long, default_value_t = 2)]
    ticks: u32,

    /// Write the final tree snapshot to this file
    #[arg(long)]
    snapshot_out: Option<PathBuf>,

    /// Restore the tree from a snapshot file
    #[arg(long)]
    restore: Option<PathBuf>,

    /// Runtime configuration file (JSON)
    #[arg(long)]
    config: Option<PathBuf>,
  },

  /// Work with tree snapshot files
  Snapshot {
    #[command(subcommand)]
    action: SnapshotAction,
  },
}

#[derive(Subcommand)]
enum SnapshotAction {
  /// Print the structure of a snapshot file
  Inspect {
    /// Path to the snapshot file
    file: PathBuf,
  },
}

struct DemoOptions {
  increments: u32,
  ticks: u32,
  restore: Option<PathBuf>,
  config: Option<PathBuf>,
}

/// What a demo run ended with.
#[derive(Debug)]
struct DemoSummary {
  renderings: Vec<String>,
  outputs: Vec<i32>,
  snapshot: Bytes,
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  let filter =
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_target(false)
    .with_writer(std::io::stderr)
    .init();

  match cli.command {
    Some(Commands::Demo {
      increments,
      ticks,
      snapshot_out,
      restore,
      config,
    }) => {
      let options = DemoOptions {
        increments,
        ticks,
        restore,
        config,
      };
      let rt = tokio::runtime::Runtime::new()?;
      let summary = rt.block_on(run_demo(options))?;

      for rendering in &summary.renderings {
        println!("{}", rendering);
      }
      for output in &summary.outputs {
        println!("milestone reached: {}", output);
      }
      if let Some(path) = snapshot_out {
        std::fs::write(&path, &summary.snapshot)
          .with_context(|| format!("failed to write snapshot: {}", path.display()))?;
        eprintln!("Snapshot written to {}", path.display());
      }
    }
    Some(Commands::Snapshot {
      action: SnapshotAction::Inspect { file },
    }) => {
      print!("{}", inspect_snapshot_file(&file)?);
    }
    None => {
      println!("arbor - use --help to see available commands");
    }
  }

  Ok(())
}

fn load_config(path: Option<&Path>) -> Result<RuntimeConfig> {
  let Some(path) = path else {
    return Ok(RuntimeConfig::default());
  };
  let content = std::fs::read_to_string(path)
    .with_context(|| format!("failed to read config file: {}", path.display()))?;
  RuntimeConfig::from_json(&content)
    .with_context(|| format!("failed to parse config file: {}", path.display()))
}

async fn run_demo(options: DemoOptions) -> Result<DemoSummary> {
  let config = load_config(options.config.as_deref())?;
  let mut builder = RuntimeBuilder::new(DemoCounter, DemoProps { ticks: options.ticks })
    .config(config)
    .interceptor(Arc::new(TracingInterceptor));
  if let Some(path) = &options.restore {
    let bytes = std::fs::read(path)
      .with_context(|| format!("failed to read snapshot: {}", path.display()))?;
    builder = builder.snapshot_bytes(bytes);
  }
  let runtime = builder.build().context("failed to start demo tree")?;

  let sink = runtime.root_sink();
  for _ in 0..options.increments {
    sink.send(increment());
  }

  let (notifier, mut events) = ChannelNotifier::channel();
  let cancel = CancellationToken::new();
  let handle = tokio::spawn(runtime.run(notifier, cancel.clone()));

  let mut summary = DemoSummary {
    renderings: Vec::new(),
    outputs: Vec::new(),
    snapshot: Bytes::new(),
  };
  while let Ok(Some(event)) = tokio::time::timeout(IDLE_TIMEOUT, events.recv()).await {
    match event {
      RuntimeEvent::Rendered(update) => {
        summary.renderings.push(update.rendering.to_string());
        summary.snapshot = update.snapshot.to_bytes();
      }
      RuntimeEvent::Output(count) => summary.outputs.push(count),
    }
  }

  cancel.cancel();
  handle
    .await
    .context("demo runtime task panicked")?
    .context("demo runtime failed")?;
  info!(renderings = summary.renderings.len(), "demo finished");
  Ok(summary)
}

fn inspect_snapshot_file(path: &Path) -> Result<String> {
  let bytes =
    std::fs::read(path).with_context(|| format!("failed to read snapshot: {}", path.display()))?;
  let snapshot = TreeSnapshot::parse(bytes)
    .with_context(|| format!("failed to parse snapshot: {}", path.display()))?;

  let mut out = String::new();
  describe_tree(&snapshot, "root", 0, &mut out)
    .with_context(|| format!("failed to parse snapshot: {}", path.display()))?;
  Ok(out)
}

/// Append one line per node: its position and the size of its own state.
fn describe_tree(
  snapshot: &TreeSnapshot,
  label: &str,
  depth: usize,
  out: &mut String,
) -> Result<()> {
  let own = match snapshot.workflow_snapshot()? {
    Some(own) => format!("{} bytes", own.bytes().len()),
    None => "no state".to_string(),
  };
  writeln!(out, "{:indent$}{}: {}", "", label, own, indent = depth * 2)?;
  for (id, child) in &snapshot.child_snapshots()? {
    describe_tree(child, &id.to_string(), depth + 1, out)?;
  }
  Ok(())
}
