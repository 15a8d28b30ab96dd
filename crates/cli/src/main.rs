use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use converge_kubehub::{KubeStore, ResourceStore};
use converge_readiness::ReadinessRegistry;
use converge_reconcile::{run, Reconciler, RunOptions};
use converge_tenancy::{owned_kinds, tenant_hooks, TenancyDefaults, TenantNamespace};
use kube::CustomResourceExt;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "converge", version, about = "Declarative convergence operator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output {
    Yaml,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the TenantNamespace controller against the current cluster
    Run(RunArgs),
    /// Print the TenantNamespace CustomResourceDefinition
    Crd {
        #[arg(short = 'o', long = "output", value_enum, default_value_t = Output::Yaml)]
        output: Output,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Owners reconciled concurrently
    #[arg(long, env = "CONVERGE_WORKERS", default_value_t = 4)]
    workers: u16,
    /// Field manager recorded on every write
    #[arg(long, env = "CONVERGE_FIELD_MANAGER", default_value = "converge")]
    field_manager: String,
    /// Hold namespaced children until their namespace is active
    #[arg(long, env = "CONVERGE_WAIT_FOR_NAMESPACE", action = ArgAction::SetTrue)]
    wait_for_namespace: bool,
    #[command(flatten)]
    defaults: DefaultArgs,
}

/// Quantities applied where a TenantNamespace leaves them out.
#[derive(Args, Debug)]
struct DefaultArgs {
    #[arg(long, env = "CONVERGE_DEFAULT_LIMITS_CPU", default_value = "250m")]
    default_limits_cpu: String,
    #[arg(long, env = "CONVERGE_DEFAULT_LIMITS_MEMORY", default_value = "64Mi")]
    default_limits_memory: String,
    #[arg(long, env = "CONVERGE_DEFAULT_REQUESTS_CPU", default_value = "250m")]
    default_requests_cpu: String,
    #[arg(long, env = "CONVERGE_DEFAULT_REQUESTS_MEMORY", default_value = "64Mi")]
    default_requests_memory: String,
    #[arg(long, env = "CONVERGE_DEFAULT_MAX_CPU", default_value = "500m")]
    default_max_cpu: String,
    #[arg(long, env = "CONVERGE_DEFAULT_MAX_MEMORY", default_value = "256Mi")]
    default_max_memory: String,
    #[arg(long, env = "CONVERGE_DEFAULT_QUOTA_REQUESTS_CPU", default_value = "2000m")]
    default_quota_requests_cpu: String,
    #[arg(long, env = "CONVERGE_DEFAULT_QUOTA_REQUESTS_MEMORY", default_value = "4Gi")]
    default_quota_requests_memory: String,
    #[arg(long, env = "CONVERGE_DEFAULT_QUOTA_LIMITS_CPU", default_value = "2000m")]
    default_quota_limits_cpu: String,
    #[arg(long, env = "CONVERGE_DEFAULT_QUOTA_LIMITS_MEMORY", default_value = "4Gi")]
    default_quota_limits_memory: String,
}

impl From<DefaultArgs> for TenancyDefaults {
    fn from(a: DefaultArgs) -> Self {
        Self {
            limits_cpu: a.default_limits_cpu,
            limits_memory: a.default_limits_memory,
            requests_cpu: a.default_requests_cpu,
            requests_memory: a.default_requests_memory,
            max_cpu: a.default_max_cpu,
            max_memory: a.default_max_memory,
            quota_requests_cpu: a.default_quota_requests_cpu,
            quota_requests_memory: a.default_quota_requests_memory,
            quota_limits_cpu: a.default_quota_limits_cpu,
            quota_limits_memory: a.default_quota_limits_memory,
        }
    }
}

fn init_tracing() {
    let env = std::env::var("CONVERGE_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("CONVERGE_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid CONVERGE_METRICS_ADDR; expected host:port");
        }
    }
}

fn render_crd(output: Output) -> Result<String> {
    let crd = TenantNamespace::crd();
    Ok(match output {
        Output::Yaml => serde_yaml::to_string(&crd)?,
        Output::Json => serde_json::to_string_pretty(&crd)?,
    })
}

async fn run_controller(args: RunArgs) -> Result<()> {
    let store = KubeStore::try_default().await.context("connecting to cluster")?;
    let client = store.client();
    let store: Arc<dyn ResourceStore> = Arc::new(store);
    let readiness = ReadinessRegistry::with_defaults();
    let hooks = tenant_hooks(args.defaults.into(), args.wait_for_namespace, store.clone(), readiness.clone());
    let reconciler = Reconciler::builder(store, hooks)
        .readiness(readiness)
        .field_manager(args.field_manager.clone())
        .build();
    info!(
        workers = args.workers,
        field_manager = %args.field_manager,
        wait_for_namespace = args.wait_for_namespace,
        "starting converge"
    );
    run(client, Arc::new(reconciler), RunOptions { workers: args.workers, owns: owned_kinds() }).await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => {
            init_metrics();
            run_controller(args).await?;
        }
        Commands::Crd { output } => print!("{}", render_crd(output)?),
    }
    Ok(())
}
