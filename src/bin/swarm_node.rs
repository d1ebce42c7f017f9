// bin/swarm_node.rs - Swarm Node Binary

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use swarm_coordination::actor::{ActorHandle, ActorRuntime};
use swarm_coordination::agents::{BuildConsumer, Explorer, ResourceProducer};
use swarm_coordination::bus::MessageBus;
use swarm_coordination::config::SwarmConfig;
use swarm_coordination::lifecycle::ActorLifecycleState;
use swarm_coordination::message::{topics, Message};
use swarm_coordination::observability::{
    init_metrics, init_tracing, MetricsConfig, MetricsHandle, TracingFormat,
};
use swarm_coordination::persistence::PersistenceManager;
use swarm_coordination::strategy::{standard_blueprints, standard_exploration, standard_mining};

const NODE: &str = "swarm-node";

/// Swarm coordination node: an explorer, a producer and a consumer on a shared bus
#[derive(Parser, Debug)]
#[command(name = "swarm-node")]
#[command(version)]
#[command(about = "Explores for a site, then gathers materials and builds on it", long_about = None)]
struct Args {
    /// Config file path (TOML, JSON or YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); overrides the config filter
    #[arg(long)]
    log_level: Option<String>,

    /// Log format (pretty, compact, json)
    #[arg(long)]
    log_format: Option<TracingFormat>,

    /// Checkpoint directory; overrides persistence.storage_path
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Blueprint to build; overrides agents.consumer.template
    #[arg(short, long)]
    template: Option<String>,

    /// Column to explore around as x,z; defaults to agents.explorer.home
    #[arg(long, value_parser = parse_column)]
    site: Option<(i64, i64)>,

    /// Give up after this many seconds
    #[arg(long, default_value = "120")]
    timeout_secs: u64,

    /// Print Prometheus metrics on exit
    #[arg(long)]
    metrics: bool,
}

fn parse_column(s: &str) -> Result<(i64, i64), String> {
    let parts: Vec<i64> = s
        .split(',')
        .map(|part| part.trim().parse::<i64>())
        .collect::<Result<_, _>>()
        .map_err(|e| format!("invalid site '{s}': {e}"))?;
    match parts.as_slice() {
        [x, z] => Ok((*x, *z)),
        _ => Err(format!("site must be x,z, got '{s}'")),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = SwarmConfig::load(args.config.as_deref()).context("loading configuration")?;
    if let Some(level) = &args.log_level {
        config.tracing.filter = format!("{level},swarm_coordination={level}");
    }
    if let Some(format) = &args.log_format {
        config.tracing.with_ansi = *format != TracingFormat::Json;
        config.tracing.format = format.clone();
    }
    if let Some(dir) = &args.data_dir {
        config.persistence.storage_path = dir.clone();
    }
    if let Some(template) = &args.template {
        config.agents.consumer.template = template.to_lowercase();
    }

    init_tracing(config.tracing.clone());
    info!(version = swarm_coordination::VERSION, "Starting swarm node");

    let metrics = if args.metrics {
        match init_metrics(MetricsConfig::default()) {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(error = %e, "Failed to initialize metrics");
                None
            }
        }
    } else {
        None
    };

    let bus = Arc::new(MessageBus::new(config.bus_config())?);
    let persistence = PersistenceManager::new(config.persistence_config())
        .await
        .context("opening checkpoint storage")?;
    info!(
        enabled = persistence.is_enabled(),
        path = ?config.persistence.storage_path,
        "Checkpoint storage ready"
    );

    let exploration = standard_exploration().resolve(&config.agents.explorer.exploration)?;
    let mining = standard_mining().resolve(&config.agents.producer.mining)?;
    let blueprints = standard_blueprints();
    if !blueprints.contains(&config.agents.consumer.template) {
        let known: Vec<&str> = blueprints.keys().collect();
        anyhow::bail!(
            "unknown template '{}' (known: {})",
            config.agents.consumer.template,
            known.join(", ")
        );
    }

    let (scan_x, scan_z) = config.agents.explorer.home;
    let explorer = Explorer::new(config.agents.explorer.name.as_str(), exploration)
        .with_home(scan_x, scan_z)
        .with_scan_range(config.agents.explorer.scan_range);
    let (home_x, home_z) = config.agents.producer.home;
    let producer = ResourceProducer::new(
        config.agents.producer.name.as_str(),
        config.resources.coordinator(),
        mining,
    )
    .with_home(home_x, home_z);
    let consumer = BuildConsumer::new(
        config.agents.consumer.name.as_str(),
        config.agents.consumer.supplier.as_str(),
        config.resources.coordinator(),
        blueprints,
    )
    .with_template(config.agents.consumer.template.as_str());

    let (completed_tx, mut completed_rx) = mpsc::unbounded_channel();
    bus.subscribe(topics::BUILD_COMPLETED, move |msg| {
        let tx = completed_tx.clone();
        async move {
            let _ = tx.send(msg);
            Ok(())
        }
    });

    let (map_tx, mut map_rx) = mpsc::unbounded_channel();
    bus.subscribe(topics::MAP, move |msg| {
        let tx = map_tx.clone();
        async move {
            if msg.payload().get("status").and_then(|s| s.as_str()) == Some("complete") {
                let _ = tx.send(msg);
            }
            Ok(())
        }
    });

    let runtime_config = config.runtime_config();
    let explorer =
        ActorRuntime::new(explorer, bus.clone(), persistence.clone(), runtime_config.clone()).spawn();
    let producer =
        ActorRuntime::new(producer, bus.clone(), persistence.clone(), runtime_config.clone()).spawn();
    let consumer = ActorRuntime::new(consumer, bus.clone(), persistence.clone(), runtime_config).spawn();

    for name in [explorer.name(), producer.name(), consumer.name()] {
        info!(actor = name, "Actor spawned");
    }
    let startup = Duration::from_secs(5);
    if !explorer.wait_for(ActorLifecycleState::Running, startup).await
        || !producer.wait_for(ActorLifecycleState::Running, startup).await
        || !consumer.wait_for(ActorLifecycleState::Running, startup).await
    {
        warn!(
            explorer = %explorer.state(),
            producer = %producer.state(),
            consumer = %consumer.state(),
            "Actors not running yet; a restored checkpoint may have left them paused"
        );
    }

    let start = match args.site {
        Some((x, z)) => json!({ "x": x, "z": z }),
        None => json!({}),
    };
    bus.publish(
        Message::new(topics::EXPLORER_START, NODE, explorer.name()).with_payload_value(start)?,
    )?;
    info!(site = ?args.site, "Exploration requested");
    info!("Press Ctrl+C to shutdown");

    let deadline = tokio::time::sleep(Duration::from_secs(args.timeout_secs));
    tokio::pin!(deadline);

    tokio::select! {
        Some(map) = map_rx.recv() => {
            let spots = map.payload().get("flat_spots").and_then(|s| s.as_array()).map_or(0, Vec::len);
            info!(spots, center = %map.payload().get("center").cloned().unwrap_or_default(), "Map received");
            bus.wait_idle(Duration::from_secs(1)).await;
            bus.publish(Message::new(topics::BUILDER_BUILD, NODE, consumer.name()))?;
            info!(template = %config.agents.consumer.template, "Build requested");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
            return finish(explorer, producer, consumer, &bus, metrics).await;
        }
        _ = &mut deadline => {
            warn!(timeout_secs = args.timeout_secs, "Timed out waiting for a map");
            return finish(explorer, producer, consumer, &bus, metrics).await;
        }
    }

    tokio::select! {
        Some(done) = completed_rx.recv() => {
            info!(
                template = %done.payload().get("template").cloned().unwrap_or_default(),
                site = %done.payload().get("site").cloned().unwrap_or_default(),
                "Build completed"
            );
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
        _ = &mut deadline => {
            warn!(timeout_secs = args.timeout_secs, "Timed out waiting for the build");
        }
    }

    finish(explorer, producer, consumer, &bus, metrics).await
}

async fn finish(
    explorer: ActorHandle<Explorer>,
    producer: ActorHandle<ResourceProducer>,
    consumer: ActorHandle<BuildConsumer>,
    bus: &MessageBus,
    metrics: Option<MetricsHandle>,
) -> Result<()> {
    shutdown(explorer).await;
    shutdown(producer).await;
    shutdown(consumer).await;
    bus.wait_idle(Duration::from_secs(2)).await;

    if let Some(handle) = metrics {
        println!("{}", handle.render());
    }

    info!(messages = bus.history_len(), "Node stopped");
    Ok(())
}

async fn shutdown<A: swarm_coordination::Actor>(handle: ActorHandle<A>) {
    let name = handle.name().to_string();
    if let Err(e) = handle.stop("node shutdown").await {
        warn!(actor = %name, error = %e, "Stop failed");
    }
    match handle.join().await {
        Ok(exit) => match exit.result {
            Ok(state) => info!(actor = %name, %state, "Actor exited"),
            Err(e) => error!(actor = %name, error = %e, "Actor exited with error"),
        },
        Err(e) => error!(actor = %name, error = %e, "Actor task failed"),
    }
}
