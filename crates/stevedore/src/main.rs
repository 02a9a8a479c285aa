mod local;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use stevedore_core::{ExecutorId, FrameworkId, PodKey};
use stevedore_executor::{Executor, ExecutorConfig, MockRuntime};
use stevedore_scheduler::{
    FrameworkScheduler, OfferRegistryConfig, SchedulerPlugin, StateClient,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Parser)]
#[command(name = "stevedore", about = "Two-level pod scheduler for a cluster resource manager")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run scheduler and executor in one process against a mock runtime
    Local {
        /// Path to a YAML pod manifest to schedule (a demo pod if omitted)
        #[arg(long)]
        pod: Option<PathBuf>,
        /// CPUs carried by the synthetic offer
        #[arg(long, default_value_t = 4.0)]
        offer_cpus: f64,
        /// Memory (MB) carried by the synthetic offer
        #[arg(long, default_value_t = 4096.0)]
        offer_mem: f64,
        /// Config source name stamped into bound pods
        #[arg(long, default_value = "stevedore")]
        source_name: String,
    },
    /// Enumerate slaves from the resource manager's state endpoint
    Slaves {
        /// Master endpoint as host:port
        #[arg(long)]
        master: String,
        /// Only list slaves running an executor with this source name
        #[arg(long)]
        source: Option<String>,
        /// Executor id to probe for, together with --source
        #[arg(long, default_value = "stevedore-executor")]
        executor_id: String,
    },
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Local {
            pod,
            offer_cpus,
            offer_mem,
            source_name,
        } => run_local(pod.as_deref(), offer_cpus, offer_mem, &source_name).await,
        Commands::Slaves {
            master,
            source,
            executor_id,
        } => run_slaves(&master, source.as_deref(), &executor_id).await,
    }
}

/// Wait for either SIGINT (ctrl-c) or SIGTERM, returning which one fired.
async fn shutdown_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => "SIGINT",
        _ = sigterm.recv() => "SIGTERM",
    }
}

/// Run the full in-process pipeline: scheduler plugin, executor, mock
/// runtime, and the channel pumps joining them.
async fn run_local(
    pod_manifest: Option<&std::path::Path>,
    offer_cpus: f64,
    offer_mem: f64,
    source_name: &str,
) -> miette::Result<()> {
    info!("Starting stevedore in local mode");

    let pod = match pod_manifest {
        Some(path) => local::load_pod_manifest(path)?,
        None => local::demo_pod(),
    };
    let key = PodKey::from_pod(&pod)
        .map_err(|e| miette::miette!("Pod manifest is missing its identity: {}", e))?;

    // Channels joining the two halves
    let (driver_tx, driver_rx) = mpsc::unbounded_channel();
    let (status_tx, status_rx) = mpsc::unbounded_channel();
    let (update_tx, update_rx) = mpsc::unbounded_channel();

    // Executor side
    let runtime = Arc::new(MockRuntime::new());
    let executor_driver = Arc::new(local::ChannelExecutorDriver::new(status_tx));
    let executor = Arc::new(Executor::new(
        executor_driver,
        runtime.clone(),
        update_tx,
        ExecutorConfig {
            source_name: source_name.to_string(),
            ..Default::default()
        },
    ));
    executor.registered().await;

    // Framework side
    let scheduler_driver = Arc::new(local::ChannelSchedulerDriver::new(driver_tx));
    let scheduler = Arc::new(FrameworkScheduler::new(
        scheduler_driver,
        ExecutorId::new("stevedore-executor"),
        OfferRegistryConfig::default(),
    ));
    scheduler.registered(FrameworkId::new("local-framework")).await;

    let control_plane = Arc::new(local::LocalControlPlane::new());
    control_plane.insert_pod(key.clone(), pod.clone());

    let plugin = Arc::new(SchedulerPlugin::new(
        scheduler.clone(),
        control_plane,
        source_name,
    ));

    // Feed the pod and a synthetic offer
    plugin.store.add(key.clone(), pod);
    scheduler
        .resource_offers(vec![local::local_offer(offer_cpus, offer_mem)])
        .await;

    let token = CancellationToken::new();

    let plugin_handle = {
        let plugin = plugin.clone();
        let token = token.clone();
        tokio::spawn(async move { plugin.run(token).await })
    };
    let expiry_handle = {
        let scheduler = scheduler.clone();
        let token = token.clone();
        tokio::spawn(async move { scheduler.offers.run_expiry(token).await })
    };
    let driver_pump = tokio::spawn(local::pump_driver_calls(
        executor.clone(),
        driver_rx,
        token.clone(),
    ));
    let status_pump = tokio::spawn(local::pump_status_updates(
        scheduler.clone(),
        status_rx,
        token.clone(),
    ));
    let runtime_pump = tokio::spawn(local::pump_runtime_updates(
        runtime,
        update_rx,
        token.clone(),
    ));

    info!(pod = %key, "Local pipeline running; press ctrl-c to stop");

    let sig = shutdown_signal().await;
    info!("Received {}, shutting down gracefully...", sig);
    executor.shutdown().await;
    token.cancel();

    let shutdown_timeout = std::time::Duration::from_secs(5);
    let _ = tokio::time::timeout(shutdown_timeout, async {
        let _ = tokio::join!(
            plugin_handle,
            expiry_handle,
            driver_pump,
            status_pump,
            runtime_pump,
        );
    })
    .await;

    info!("Shutdown complete");
    Ok(())
}

/// Query the resource manager's state endpoint for slaves
async fn run_slaves(
    master: &str,
    source: Option<&str>,
    executor_id: &str,
) -> miette::Result<()> {
    let client = StateClient::new(master);
    let token = CancellationToken::new();

    let hosts = match source {
        Some(source) => client
            .enlisted_slaves(source, executor_id, &token)
            .await
            .map_err(|e| miette::miette!("Failed to enumerate enlisted slaves: {}", e))?,
        None => client
            .enumerate_slaves(&token)
            .await
            .map_err(|e| miette::miette!("Failed to enumerate slaves: {}", e))?,
    };

    if hosts.is_empty() {
        println!("no slaves found");
    } else {
        for host in hosts {
            println!("{}", host);
        }
    }
    Ok(())
}
