use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tessera_config::{BackendConfig, TesseraConfig};
use tessera_graph::{Add, Args, Backends, OperatorError, OperatorRegistry, Session, Value};
use tessera_service::{Service, ServiceHost};
use tessera_worker::{WorkerOptions, WorkerPool};

/// Tessera - lazy task graphs executed by a fleet of workers
#[derive(Parser)]
#[command(name = "tessera")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the config file (default: ~/.tessera/config.json)
  #[arg(long, global = true)]
  config: Option<PathBuf>,

  /// Use the Redis backend at this URL, overriding the config file
  #[arg(long, global = true)]
  redis_url: Option<String>,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Execute dispatched nodes until interrupted
  Worker {
    /// Number of worker threads (default: worker.concurrency)
    #[arg(long)]
    concurrency: Option<usize>,

    /// Consumer name used for crash recovery (default: worker.consumer)
    #[arg(long)]
    consumer: Option<String>,
  },

  /// Build a small graph and print its results
  Demo,

  /// Serve a service that replies with its own arguments
  EchoService {
    #[arg(long, default_value = "echo")]
    service_id: String,
  },

  /// Remove every key of a task
  Purge {
    #[arg(long)]
    task_id: String,
  },
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_writer(std::io::stderr)
    .init();

  let mut config = load_config(cli.config)?;
  if let Some(url) = cli.redis_url {
    config.backend = BackendConfig::Redis { url };
  }

  match cli.command {
    Some(Commands::Worker {
      concurrency,
      consumer,
    }) => {
      if let Some(consumer) = consumer {
        config.worker.consumer = Some(consumer);
      }
      let concurrency = concurrency.unwrap_or(config.worker.concurrency);
      run_worker(&config, concurrency)?;
    }
    Some(Commands::Demo) => run_demo(&config)?,
    Some(Commands::EchoService { service_id }) => run_echo_service(&config, service_id)?,
    Some(Commands::Purge { task_id }) => {
      let backends = connect(&config)?;
      backends
        .store
        .purge_task(&task_id)
        .with_context(|| format!("failed to purge task '{}'", task_id))?;
      eprintln!("Purged task {}", task_id);
    }
    None => {
      println!("tessera - use --help to see available commands");
    }
  }

  Ok(())
}

fn load_config(path: Option<PathBuf>) -> Result<TesseraConfig> {
  match path {
    Some(path) => TesseraConfig::load(&path)
      .with_context(|| format!("failed to load config: {}", path.display())),
    None => {
      let Some(home) = dirs::home_dir() else {
        return Ok(TesseraConfig::default());
      };
      let path = home.join(".tessera").join("config.json");
      TesseraConfig::load_or_default(&path)
        .with_context(|| format!("failed to load config: {}", path.display()))
    }
  }
}

fn connect(config: &TesseraConfig) -> Result<Backends> {
  Backends::from_config(config).context("failed to connect backends")
}

fn registry(config: &TesseraConfig) -> Result<Arc<OperatorRegistry>> {
  let mut registry = OperatorRegistry::with_builtins();
  Service::register(&mut registry, config.service.rpc_timeout())?;
  Ok(Arc::new(registry))
}

/// Cancel `cancel` on ctrl-c.
fn cancel_on_interrupt(cancel: &CancellationToken) {
  let cancel = cancel.clone();
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      info!("interrupt received, shutting down");
      cancel.cancel();
    }
  });
}

fn run_worker(config: &TesseraConfig, concurrency: usize) -> Result<()> {
  let rt = tokio::runtime::Runtime::new()?;
  rt.block_on(async { run_worker_async(config, concurrency).await })
}

async fn run_worker_async(config: &TesseraConfig, concurrency: usize) -> Result<()> {
  let backends = connect(config)?;
  let cancel = CancellationToken::new();
  cancel_on_interrupt(&cancel);

  let pool = WorkerPool::spawn(
    backends,
    registry(config)?,
    WorkerOptions::from_config(&config.worker),
    concurrency,
    cancel,
  )
  .context("failed to start workers")?;

  let stats = tokio::task::spawn_blocking(move || pool.join())
    .await
    .context("worker pool join failed")?
    .context("worker stopped with an error")?;

  eprintln!(
    "Executed {} nodes ({} failed, {} duplicates, {} deferred, {} retried)",
    stats.executed(),
    stats.failed,
    stats.duplicates,
    stats.deferred,
    stats.retried
  );
  Ok(())
}

fn run_demo(config: &TesseraConfig) -> Result<()> {
  let backends = connect(config)?;
  let registry = registry(config)?;

  // In-memory backends are private to this process, so it runs its own workers.
  let pool = match config.backend {
    BackendConfig::Memory => Some(
      WorkerPool::spawn(
        backends.clone(),
        registry.clone(),
        WorkerOptions::from_config(&config.worker),
        config.worker.concurrency,
        CancellationToken::new(),
      )
      .context("failed to start workers")?,
    ),
    BackendConfig::Redis { .. } => None,
  };

  let session = Session::builder(backends)
    .registry(registry)
    .purge_on_close(true)
    .build();
  eprintln!("Task: {}", session.task_id());

  let r1 = session.invoke(&Add, [1, 2])?;
  let r2 = session.invoke(&Add, [3, 4])?;
  let r3 = &r1 * &r2;
  let r4 = &r1 + &r2 * &r3;

  for (name, future) in [("r1", &r1), ("r2", &r2), ("r3", &r3), ("r4", &r4)] {
    let value = future
      .result()
      .with_context(|| format!("node {} failed", name))?;
    println!("{} = {}", name, value);
  }

  if let Some(pool) = pool {
    pool.shutdown().context("worker stopped with an error")?;
  }
  Ok(())
}

fn run_echo_service(config: &TesseraConfig, service_id: String) -> Result<()> {
  let rt = tokio::runtime::Runtime::new()?;
  rt.block_on(async { run_echo_service_async(config, service_id).await })
}

async fn run_echo_service_async(config: &TesseraConfig, service_id: String) -> Result<()> {
  let backends = connect(config)?;
  let cancel = CancellationToken::new();
  cancel_on_interrupt(&cancel);

  let host = ServiceHost::new(
    backends,
    service_id,
    |args: Args| -> Result<Value, OperatorError> {
      Ok(Value::map([
        ("args", Value::List(args.positional)),
        ("kwargs", Value::Map(args.named)),
      ]))
    },
  );

  let served = tokio::task::spawn_blocking(move || host.run(&cancel))
    .await
    .context("service host join failed")?
    .context("service host stopped with an error")?;
  eprintln!("Served {} requests", served);
  Ok(())
}
