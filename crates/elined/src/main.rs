//! elined - E-Line circuit daemon
//!
//! Loads circuits from the store, keeps them deployed and reacts to topology
//! events published on Redis.

use anyhow::{Context, Result};
use clap::Parser;
use elined::clients::{
    CircuitStore, HttpFlowManager, HttpPathFinder, HttpTopologySource, HttpTraceService,
    MemoryCircuitStore, RedisCircuitStore,
};
use elined::{
    CircuitRegistry, ConsistencyLoop, DynamicPathManager, ElineConfig, EventRouter, EvcContext,
    EvcSettings, Notifier, StoreBackend, TopologyCache, TopologyEvent, DEFAULT_CONFIG_PATH,
};
use futures::StreamExt;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// E-Line circuit daemon
#[derive(Parser, Debug)]
#[command(name = "elined")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short = 'c', long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(&args.log_level);

    info!("--- Starting elined ---");
    match run(args).await {
        Ok(()) => {
            info!("elined exiting");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = ?e, "elined failed");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();
}

async fn run(args: Args) -> Result<()> {
    let config = ElineConfig::load_or_default(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    config.validate().context("invalid configuration")?;

    let http = reqwest::Client::builder()
        .timeout(config.http_timeout())
        .build()
        .context("building HTTP client")?;

    let topology = Arc::new(TopologyCache::new());
    let snapshot = HttpTopologySource::new(http.clone(), &config.services.topology_url)
        .fetch_snapshot()
        .await
        .context("fetching topology snapshot")?;
    topology.load_snapshot(snapshot);

    let store: Arc<dyn CircuitStore> = match config.database.backend {
        StoreBackend::Redis => Arc::new(
            RedisCircuitStore::connect(&config.database)
                .await
                .context("connecting circuit store")?,
        ),
        StoreBackend::Memory => {
            warn!("Using in-memory circuit store, circuits will not survive a restart");
            Arc::new(MemoryCircuitStore::new())
        }
    };

    let notifier = Notifier::new(config.events.notification_capacity);
    let ctx = EvcContext {
        topology: topology.clone(),
        tags: topology.clone(),
        flow_manager: Arc::new(HttpFlowManager::new(
            http.clone(),
            &config.services.flow_manager_url,
        )),
        paths: DynamicPathManager::new(
            Arc::new(HttpPathFinder::new(http.clone(), &config.services.pathfinder_url)),
            topology.clone(),
            config.paths.dynamic_max_paths,
            config.paths.disjoint_path_cutoff,
        ),
        store,
        notifier: notifier.clone(),
        settings: Arc::new(EvcSettings::from_config(&config)),
    };

    let registry = Arc::new(CircuitRegistry::new(ctx));
    let loaded = registry.load_all().await.context("loading circuits")?;
    info!(circuits = loaded, "Circuits loaded from store");

    let cancel = CancellationToken::new();
    let tasks = TaskTracker::new();

    tasks.spawn(log_notifications(notifier, cancel.clone()));

    if config.consistency.enabled {
        let sweeper = Arc::new(ConsistencyLoop::new(
            registry.clone(),
            Arc::new(HttpTraceService::new(http.clone(), &config.services.sdntrace_cp_url)),
            config.trace_timeout(),
        ));
        tasks.spawn(sweeper.run(config.deploy_evcs_interval(), cancel.clone()));
    } else {
        info!("Consistency loop disabled");
    }

    let (router, deferred) = EventRouter::new(registry.clone(), topology, &config);
    tasks.spawn(router.clone().run_deferred(deferred, cancel.clone()));

    if config.events.topology_channel.is_empty() {
        info!("No topology channel configured, topology events disabled");
    } else {
        let redis = redis::Client::open(config.database.connection_url())
            .context("opening Redis client for topology events")?;
        let channel = config.events.topology_channel.clone();
        let token = cancel.clone();
        tasks.spawn(async move {
            if let Err(e) = consume_topology_events(redis, channel, router, token).await {
                error!(error = ?e, "Topology event consumer stopped");
            }
        });
    }
    tasks.close();

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("Shutdown requested");
    cancel.cancel();
    tasks.wait().await;
    Ok(())
}

/// Decodes JSON topology events from a Redis pub/sub channel.
async fn consume_topology_events(
    client: redis::Client,
    channel: String,
    router: Arc<EventRouter>,
    cancel: CancellationToken,
) -> Result<()> {
    let mut pubsub = client
        .get_async_pubsub()
        .await
        .context("connecting to Redis pub/sub")?;
    pubsub
        .subscribe(&channel)
        .await
        .with_context(|| format!("subscribing to {channel}"))?;
    info!(channel = %channel, "Listening for topology events");

    let mut messages = pubsub.on_message();
    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => break,
            message = messages.next() => match message {
                Some(message) => message,
                None => anyhow::bail!("pub/sub stream closed"),
            },
        };
        let payload: String = match message.get_payload() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "Ignoring non-text topology message");
                continue;
            }
        };
        match serde_json::from_str::<TopologyEvent>(&payload) {
            Ok(event) => router.handle(event).await,
            Err(e) => warn!(error = %e, payload = %payload, "Ignoring malformed topology event"),
        }
    }
    Ok(())
}

async fn log_notifications(notifier: Notifier, cancel: CancellationToken) {
    let mut rx = notifier.subscribe();
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = rx.recv() => event,
        };
        match event {
            Ok(event) => info!(
                kind = %event.kind,
                evc = %event.evc_id,
                name = %event.name,
                active = event.active,
                "Circuit event"
            ),
            Err(RecvError::Lagged(skipped)) => debug!(skipped, "Notification log lagging"),
            Err(RecvError::Closed) => break,
        }
    }
}
