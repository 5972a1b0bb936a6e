use anyhow::{Context, Result};
use sslmon_common::types::{CreateDomainRequest, DEFAULT_PORT};
use sslmon_storage::{CertificateSink, DomainRegistry, MemoryStore};
use std::sync::Arc;
use tokio::signal;
use tracing_subscriber::EnvFilter;

use sslmon_server::cert::coordinator::BulkCoordinator;
use sslmon_server::cert::inspector::CertificateInspector;
use sslmon_server::cert::pool::WorkerPool;
use sslmon_server::cert::scheduler::CheckScheduler;
use sslmon_server::cert::CertificateProbe;
use sslmon_server::config::MonitorConfig;

/// Relative to the working directory, like the shipped `config/` folder.
const DEFAULT_CONFIG_PATH: &str = "config/sslmon.toml";

#[allow(clippy::print_stderr)]
fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  sslmon-server [config.toml]                          Run scheduled certificate checks");
    eprintln!("  sslmon-server check <config.toml> <host[:port]>...   Check the given endpoints once and print JSON");
}

#[allow(clippy::print_stdout)]
fn print_json(json: &str) {
    println!("{json}");
}

#[tokio::main]
async fn main() -> Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|e| anyhow::anyhow!("Failed to install default CryptoProvider: {e:?}"))?;

    sslmon_common::id::init(1, 1);

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("sslmon=info".parse()?))
        .init();

    let args: Vec<String> = std::env::args().collect();

    match args.get(1).map(|s| s.as_str()) {
        Some("check") => {
            let config_path = args.get(2).ok_or_else(|| {
                print_usage();
                anyhow::anyhow!("check requires <config.toml> and at least one <host[:port]>")
            })?;
            if args.len() < 4 {
                print_usage();
                anyhow::bail!("check requires at least one <host[:port]> argument");
            }
            run_check(config_path, &args[3..]).await
        }
        Some("--help" | "-h") => {
            print_usage();
            Ok(())
        }
        _ => {
            let config_path = args
                .get(1)
                .map(|s| s.as_str())
                .unwrap_or(DEFAULT_CONFIG_PATH);
            run_monitor(config_path).await
        }
    }
}

struct Engine {
    store: Arc<MemoryStore>,
    probe: Arc<dyn CertificateProbe>,
    coordinator: BulkCoordinator,
}

fn build_engine(config: &MonitorConfig) -> Result<Engine> {
    let inspector = CertificateInspector::new(&config.inspector, config.thresholds)?;
    let probe: Arc<dyn CertificateProbe> = Arc::new(inspector);
    let pool = WorkerPool::new(&config.pool).context("Failed to start worker pool")?;
    let coordinator = BulkCoordinator::new(probe.clone(), Arc::new(pool), config.bulk.clone());
    Ok(Engine {
        store: Arc::new(MemoryStore::new()),
        probe,
        coordinator,
    })
}

/// Splits `host[:port]`. A bare IPv6 literal is taken as a host.
fn parse_target(target: &str) -> Result<CreateDomainRequest> {
    let (host, port) = match target.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') => {
            let port: u16 = port
                .parse()
                .with_context(|| format!("Invalid port in '{target}'"))?;
            (host, port)
        }
        _ => (target, DEFAULT_PORT),
    };
    Ok(CreateDomainRequest::new(host).with_port(port))
}

/// One-shot inspection of the given endpoints.
async fn run_check(config_path: &str, targets: &[String]) -> Result<()> {
    let config = MonitorConfig::load(config_path)?;
    let engine = build_engine(&config)?;

    let mut domains = Vec::with_capacity(targets.len());
    for target in targets {
        let req = parse_target(target)?;
        let domain = engine
            .store
            .insert_domain(&req)
            .await
            .with_context(|| format!("Invalid target '{target}'"))?;
        domains.push(domain);
    }

    let records = engine.coordinator.check_all(&domains).await?;
    for record in &records {
        engine.store.append(record).await?;
    }

    print_json(&serde_json::to_string_pretty(&records)?);
    Ok(())
}

async fn run_monitor(config_path: &str) -> Result<()> {
    let config = MonitorConfig::load(config_path)?;
    let engine = build_engine(&config)?;

    for seed in &config.domains {
        match engine.store.insert_domain(&CreateDomainRequest::from(seed)).await {
            Ok(domain) => {
                tracing::info!(domain = %domain.endpoint(), id = %domain.id, "Domain registered")
            }
            Err(e) => tracing::warn!(domain = %seed.name, error = %e, "Skipping seed domain"),
        }
    }

    let counts = engine.store.count_by_active().await?;
    tracing::info!(
        active = counts.active,
        inactive = counts.inactive,
        critical_days = config.thresholds.critical_days,
        flag_untrusted = config.inspector.flag_untrusted,
        "Certificate monitor starting"
    );

    let registry: Arc<dyn DomainRegistry> = engine.store.clone();
    let sink: Arc<dyn CertificateSink> = engine.store.clone();
    let scheduler = Arc::new(CheckScheduler::new(
        registry,
        sink,
        engine.coordinator,
        engine.probe,
        config.thresholds,
        config.schedule.clone(),
    ));
    let handles = scheduler.spawn_jobs()?;

    signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutting down gracefully");

    for handle in handles {
        handle.abort();
    }
    tracing::info!("Certificate monitor stopped");

    Ok(())
}
