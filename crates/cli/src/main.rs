use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use k8s_openapi::api::apps::v1::ReplicaSet;
use kube::{runtime::reflector, Api, Client, CustomResourceExt, Resource};
use metrics::counter;
use sluice_core::{crd::Experiment, crd::Rollout, ErrorSink, Ingress, OwnerKind};
use sluice_dispatch::{enqueue, enqueue_parent_object, spawn_workers, PrometheusMetrics, ReconcileMetrics};
use sluice_kubehub::{ensure_served, watch_children, watch_parents};
use sluice_queue::{RateLimiterConfig, RateLimitingQueue};
use tokio::signal;
use tracing::{error, info, warn};

mod handler;

use handler::ObserveHandler;

#[derive(Parser, Debug)]
#[command(name = "sluicectl", version, about = "Rollout/Experiment work-dispatch controller")]
struct Cli {
    /// Kubernetes namespace to watch (default: all namespaces)
    #[arg(long = "ns", global = true, env = "SLUICE_NAMESPACE")]
    namespace: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Watch Rollouts, Experiments and their ReplicaSets and run the workers
    Run(RunArgs),
    /// Print the CustomResourceDefinitions for the reconciled kinds
    Crds,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Workers per queue
    #[arg(long, env = "SLUICE_WORKERS", default_value_t = 2)]
    workers: usize,
    /// Overall requeue rate
    #[arg(long, env = "SLUICE_QPS", default_value_t = 10.0, value_parser = parse_qps)]
    qps: f64,
    #[arg(long, env = "SLUICE_BURST", default_value_t = 100)]
    burst: u32,
    /// First per-key retry delay
    #[arg(long = "base-delay-ms", env = "SLUICE_BASE_DELAY_MS", default_value_t = 5)]
    base_delay_ms: u64,
    /// Cap on the per-key retry delay
    #[arg(long = "max-delay-secs", env = "SLUICE_MAX_DELAY_SECS", default_value_t = 1000)]
    max_delay_secs: u64,
    /// Start even if the CRDs are not served
    #[arg(long = "skip-crd-check", action = ArgAction::SetTrue)]
    skip_crd_check: bool,
}

fn parse_qps(s: &str) -> Result<f64, String> {
    let qps: f64 = s.parse().map_err(|e| format!("{e}"))?;
    if qps.is_finite() && qps > 0.0 {
        Ok(qps)
    } else {
        Err(format!("must be a positive number, got {s}"))
    }
}

impl RunArgs {
    fn rate_limiter(&self) -> RateLimiterConfig {
        RateLimiterConfig {
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_secs(self.max_delay_secs),
            qps: self.qps,
            burst: self.burst,
        }
    }
}

fn init_tracing() {
    let env = std::env::var("SLUICE_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("SLUICE_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid SLUICE_METRICS_ADDR; expected host:port");
        }
    }
}

fn api_for<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<DynamicType = (), Scope = k8s_openapi::NamespaceResourceScope>,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    match cli.command {
        Commands::Crds => {
            println!("{}", serde_json::to_string_pretty(&Rollout::crd())?);
            println!("{}", serde_json::to_string_pretty(&Experiment::crd())?);
        }
        Commands::Run(args) => run(cli.namespace.as_deref(), args).await?,
    }

    Ok(())
}

async fn run(namespace: Option<&str>, args: RunArgs) -> Result<()> {
    let client = Client::try_default().await.context("building kube client")?;
    if args.skip_crd_check {
        warn!("skipping CRD check");
    } else {
        ensure_served::<Rollout>(client.clone()).await?;
        ensure_served::<Experiment>(client.clone()).await?;
    }

    let cfg = args.rate_limiter();
    info!(workers = args.workers, ?cfg, ns = ?namespace, "starting controller");
    let rollouts = RateLimitingQueue::with_config("Rollouts", &cfg);
    let experiments = RateLimitingQueue::with_config("Experiments", &cfg);
    let errors = ErrorSink::new().with_handler(|e| {
        counter!("dispatch_errors_total", 1u64, "error" => e.kind());
    });

    let (rollout_store, rollout_writer) = reflector::store::<Rollout>();
    let (experiment_store, experiment_writer) = reflector::store::<Experiment>();

    let mut watchers = Vec::new();
    watchers.push(tokio::spawn({
        let (api, queue, errors) = (api_for::<Rollout>(&client, namespace), rollouts.clone(), errors.clone());
        async move {
            if let Err(e) = watch_parents(api, rollout_writer, queue, errors).await {
                error!(error = %e, "rollout watcher failed");
            }
        }
    }));
    watchers.push(tokio::spawn({
        let (api, queue, errors) = (api_for::<Experiment>(&client, namespace), experiments.clone(), errors.clone());
        async move {
            if let Err(e) = watch_parents(api, experiment_writer, queue, errors).await {
                error!(error = %e, "experiment watcher failed");
            }
        }
    }));
    watchers.push(tokio::spawn({
        let api = api_for::<ReplicaSet>(&client, namespace);
        let (rollout_store, experiment_store) = (rollout_store.clone(), experiment_store.clone());
        let (rollouts, experiments, errors) = (rollouts.clone(), experiments.clone(), errors.clone());
        async move {
            let on_event = move |rs: &Ingress<ReplicaSet>| {
                enqueue_parent_object(rs, OwnerKind::Rollout, &rollout_store, &errors, |ro: Arc<Rollout>| {
                    enqueue(&*ro, &rollouts, &errors)
                });
                enqueue_parent_object(rs, OwnerKind::Experiment, &experiment_store, &errors, |ex: Arc<Experiment>| {
                    enqueue(&*ex, &experiments, &errors)
                });
            };
            if let Err(e) = watch_children(api, on_event).await {
                error!(error = %e, "replicaset watcher failed");
            }
        }
    }));

    let metrics: Option<Arc<dyn ReconcileMetrics>> = Some(Arc::new(PrometheusMetrics));
    let mut workers = spawn_workers(args.workers, &rollouts, "Rollouts", ObserveHandler::new(rollout_store), metrics.clone());
    workers.extend(spawn_workers(
        args.workers,
        &experiments,
        "Experiments",
        ObserveHandler::new(experiment_store),
        metrics,
    ));

    signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    info!("Ctrl-C received; shutting down");
    rollouts.shutdown();
    experiments.shutdown();
    for w in watchers {
        w.abort();
    }
    for w in workers {
        if let Err(e) = w.await {
            warn!(error = %e, "worker task failed");
        }
    }
    info!(dropped = rollouts.dropped() + experiments.dropped(), "controller stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_defaults_match_controller_limiter() {
        let cli = Cli::try_parse_from(["sluicectl", "run"]).unwrap();
        let Commands::Run(args) = cli.command else { panic!("expected run") };
        assert_eq!(args.workers, 2);
        assert_eq!(args.rate_limiter(), RateLimiterConfig::default());
    }

    #[test]
    fn non_positive_qps_is_rejected() {
        for qps in ["0", "-3", "NaN", "inf", "fast"] {
            assert!(Cli::try_parse_from(["sluicectl", "run", "--qps", qps]).is_err(), "{qps}");
        }
        assert!(Cli::try_parse_from(["sluicectl", "run", "--qps", "0.5"]).is_ok());
    }

    #[test]
    fn run_flags_map_onto_limiter() {
        let cli = Cli::try_parse_from([
            "sluicectl",
            "--ns",
            "team-a",
            "run",
            "--workers",
            "4",
            "--qps",
            "2.5",
            "--burst",
            "7",
            "--base-delay-ms",
            "50",
            "--max-delay-secs",
            "30",
        ])
        .unwrap();
        assert_eq!(cli.namespace.as_deref(), Some("team-a"));
        let Commands::Run(args) = cli.command else { panic!("expected run") };
        assert_eq!(args.workers, 4);
        assert_eq!(
            args.rate_limiter(),
            RateLimiterConfig {
                base_delay: Duration::from_millis(50),
                max_delay: Duration::from_secs(30),
                qps: 2.5,
                burst: 7,
            }
        );
    }
}
