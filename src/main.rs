//! WolfKube - Leader-Aware Cached Cluster Client
//!
//! Command-line entry point: configuration management and a demo node that
//! runs the cache, the election and a watch against an in-memory backend.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wolfkube::backend::InMemoryBackend;
use wolfkube::client::ClusterClient;
use wolfkube::config::{LoggingConfig, WolfKubeConfig};
use wolfkube::error::{Error, Result};
use wolfkube::resource::{LabelSelector, MetricSample, Resource};

/// WolfKube - Leader-Aware Cached Cluster Client
#[derive(Parser)]
#[command(name = "wolfkube")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "wolfkube.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a client node against the in-memory backend
    Run {
        /// Namespace to list and watch
        #[arg(short, long, default_value = "default")]
        namespace: String,

        /// Seconds between status reports
        #[arg(long, default_value_t = 5)]
        report_interval: u64,
    },

    /// Initialize a new configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "wolfkube.toml")]
        output: PathBuf,

        /// Election name
        #[arg(long, default_value = "wolfkube-leader")]
        election_name: String,
    },

    /// Validate configuration file
    Validate,

    /// Show effective configuration
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let logging = WolfKubeConfig::from_file(&cli.config)
        .map(|config| config.logging)
        .unwrap_or_default();
    init_logging(cli.log_level.as_deref().unwrap_or(&logging.level), &logging);

    match cli.command {
        Commands::Run { namespace, report_interval } => {
            run_node(cli.config, namespace, Duration::from_secs(report_interval.max(1))).await
        }
        Commands::Init { output, election_name } => run_init(output, election_name),
        Commands::Validate => run_validate(cli.config),
        Commands::Info => run_info(cli.config),
    }
}

/// Initialize logging
fn init_logging(level: &str, logging: &LoggingConfig) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    let registry = tracing_subscriber::registry().with(env_filter);
    if logging.format == "compact" {
        registry.with(tracing_subscriber::fmt::layer().compact()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Run a client node until Ctrl+C
async fn run_node(config_path: PathBuf, namespace: String, report_interval: Duration) -> Result<()> {
    let config = match WolfKubeConfig::from_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Failed to load configuration from {:?}: {}", config_path, e);
            return Err(e);
        }
    };

    let backend = Arc::new(InMemoryBackend::new());
    seed_demo_backend(&backend, &namespace).await;

    let client = ClusterClient::new(config.clone(), backend.clone())?;
    if config.election.enabled {
        client.start_leader_election().await?;
        tracing::info!("Participating in election '{}'", config.election.name);
    } else {
        tracing::info!("Leader election disabled; running read-only");
    }

    let watch_cancel = CancellationToken::new();
    client
        .watch_resource("pods", &namespace, watch_cancel.clone(), |event_type, pod: &Resource| {
            tracing::info!("Watch event {} for pod {}", event_type, pod.id());
        })
        .await?;

    let everything = LabelSelector::everything();
    let mut ticker = tokio::time::interval(report_interval);
    let mut heartbeat = 0u64;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match client.get_resource_enhanced("pods", &namespace, &everything, true).await {
                    Ok(pods) => {
                        let with_metrics = pods.iter().filter(|p| p.has_metrics()).count();
                        tracing::info!(
                            "Role {} | {} pods ({} with metrics)",
                            client
                                .leadership()
                                .map(|state| state.to_string())
                                .unwrap_or_else(|| "STANDALONE".to_string()),
                            pods.len(),
                            with_metrics
                        );
                    }
                    Err(e) => tracing::error!("Failed to list pods: {}", e),
                }

                if client.is_leader() {
                    heartbeat += 1;
                    if let Err(e) = write_heartbeat(&client, &namespace, heartbeat).await {
                        tracing::warn!("Heartbeat write failed: {}", e);
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received shutdown signal");
                break;
            }
        }
    }

    watch_cancel.cancel();
    client.stop().await;
    tracing::info!("WolfKube shutdown complete");
    Ok(())
}

/// Leader-only write exercising the fenced mutation path
async fn write_heartbeat(client: &ClusterClient, namespace: &str, beat: u64) -> Result<()> {
    let resource = Resource::new("configmaps", namespace, "wolfkube-heartbeat")
        .with_spec(serde_json::json!({ "beat": beat }));

    match client.update(resource.clone()).await {
        Err(Error::NotFound(_)) => client.create(resource).await.map(|_| ()),
        other => other.map(|_| ()),
    }
}

/// Populate the in-memory backend with a few pods and usage samples
async fn seed_demo_backend(backend: &InMemoryBackend, namespace: &str) {
    let mut samples = Vec::new();
    for (i, app) in ["web", "web", "worker"].iter().enumerate() {
        let name = format!("{}-{}", app, i);
        backend
            .insert(Resource::new("pods", namespace, name.as_str()).with_label("app", *app))
            .await;
        if *app == "web" {
            samples.push(MetricSample {
                namespace: namespace.to_string(),
                name,
                cpu: format!("{}m", 100 + i * 50),
                memory: "64Mi".to_string(),
            });
        }
    }
    backend.set_metrics(samples).await;
}

/// Initialize a new configuration file
fn run_init(output: PathBuf, election_name: String) -> Result<()> {
    if output.exists() {
        return Err(Error::Config(format!(
            "Configuration file already exists: {}",
            output.display()
        )));
    }

    let config_content = format!(r#"# WolfKube Configuration

[client]
request_timeout_secs = 30

[cache]
# Lifetime of cached list results
default_ttl_secs = 300
# How often expired entries are removed
sweep_interval_secs = 600

[election]
enabled = true
name = "{election_name}"
namespace = "default"
# holder_identity = "replica-1"   # defaults to POD_NAME / HOSTNAME
lease_duration_secs = 15
renew_deadline_secs = 10
retry_period_secs = 2

[logging]
level = "info"
format = "pretty"
"#);

    std::fs::write(&output, config_content)?;
    println!("Configuration file created: {}", output.display());
    println!("Then start with: wolfkube --config {} run", output.display());

    Ok(())
}

/// Validate configuration
fn run_validate(config_path: PathBuf) -> Result<()> {
    match WolfKubeConfig::from_file(&config_path) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!("  Cache TTL:      {} s", config.cache.default_ttl_secs);
            println!("  Election:       {}", if config.election.enabled { config.election.name.as_str() } else { "(disabled)" });
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration error: {}", e);
            Err(e)
        }
    }
}

/// Show effective configuration
fn run_info(config_path: PathBuf) -> Result<()> {
    let config = WolfKubeConfig::from_file(&config_path)?;

    println!("WolfKube Client Information");
    println!("===========================");
    println!();
    println!("Client:");
    println!("  Request Timeout: {} s", config.client.request_timeout_secs);
    println!();
    println!("Cache:");
    println!("  Default TTL:     {} s", config.cache.default_ttl_secs);
    println!("  Sweep Interval:  {} s", config.cache.sweep_interval_secs);
    println!();
    println!("Election:");
    println!("  Enabled:         {}", config.election.enabled);
    if config.election.enabled {
        println!("  Name:            {}/{}", config.election.namespace, config.election.name);
        println!("  Identity:        {}", config.holder_identity());
        println!("  Lease Duration:  {} s", config.election.lease_duration_secs);
        println!("  Renew Deadline:  {} s", config.election.renew_deadline_secs);
        println!("  Retry Period:    {} s", config.election.retry_period_secs);
    }

    Ok(())
}
