use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use virtnet_controller::{
    ApiClient, BindingPluginRegistry, InstanceClient, MockInstanceStore, NetworkController,
    NetworkControllerConfig,
};
use virtnet_core::{Instance, Pod, VirtualMachine};

#[derive(Parser)]
#[command(name = "virtnet", about = "VM network interface reconciliation")]
struct Cli {
    /// Registered binding plugins, as <plugin> or <plugin>=<namespace>/<attachment>
    #[arg(
        long = "binding-plugin",
        global = true,
        env = "VIRTNET_BINDING_PLUGINS",
        value_delimiter = ','
    )]
    binding_plugins: Vec<String>,
    /// Seconds a pending migration waits before it is forced
    #[arg(
        long,
        global = true,
        env = "VIRTNET_MIGRATION_GRACE_SECS",
        default_value_t = virtnet_controller::config::DEFAULT_MIGRATION_GRACE_SECS
    )]
    migration_grace_secs: i64,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Push the VM's interface requests to its instance
    Sync {
        /// VM record (JSON or YAML)
        #[arg(long)]
        vm: PathBuf,
        /// Instance record (JSON or YAML)
        #[arg(long)]
        instance: PathBuf,
        /// API server URL; without it the patch is applied to an in-memory copy
        #[arg(long, env = "VIRTNET_API_URL")]
        api_url: Option<String>,
    },
    /// Rebuild the instance interface status from its pod
    Status {
        #[arg(long)]
        instance: PathBuf,
        #[arg(long)]
        pod: PathBuf,
    },
    /// Evaluate and record the migration-required condition
    Evaluate {
        #[arg(long)]
        instance: PathBuf,
        /// Evaluation time (RFC 3339), defaults to now
        #[arg(long)]
        now: Option<DateTime<Utc>>,
    },
    /// Print the networks the running domain should attach or detach
    Domain {
        #[arg(long)]
        instance: PathBuf,
    },
    /// Print the pod annotations for the instance and any selection update
    Annotations {
        #[arg(long)]
        instance: PathBuf,
        #[arg(long)]
        pod: PathBuf,
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
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = build_config(&cli.binding_plugins, cli.migration_grace_secs)?;

    match cli.command {
        Commands::Sync {
            vm,
            instance,
            api_url,
        } => run_sync(config, &vm, &instance, api_url.as_deref()).await,
        Commands::Status { instance, pod } => run_status(config, &instance, &pod),
        Commands::Evaluate { instance, now } => run_evaluate(config, &instance, now),
        Commands::Domain { instance } => run_domain(config, &instance),
        Commands::Annotations { instance, pod } => run_annotations(config, &instance, &pod),
    }
}

fn build_config(
    binding_plugins: &[String],
    migration_grace_secs: i64,
) -> miette::Result<NetworkControllerConfig> {
    if migration_grace_secs < 0 {
        return Err(miette::miette!(
            "Migration grace period must not be negative, got {}",
            migration_grace_secs
        ));
    }
    let binding_plugins = BindingPluginRegistry::from_entries(binding_plugins)
        .map_err(|e| miette::miette!("Invalid binding plugin configuration: {}", e))?;
    Ok(NetworkControllerConfig {
        binding_plugins,
        migration_grace_period: chrono::Duration::seconds(migration_grace_secs),
    })
}

fn load<T: for<'de> serde::Deserialize<'de>>(path: &Path) -> miette::Result<T> {
    virtnet_core::from_file(path)
        .map_err(|e| miette::miette!("Failed to load '{}': {}", path.display(), e))
}

fn print_json<T: serde::Serialize>(record: &T) -> miette::Result<()> {
    let json = virtnet_core::to_json_pretty(record)
        .map_err(|e| miette::miette!("Failed to encode output: {}", e))?;
    println!("{}", json);
    Ok(())
}

/// Run the hotplug reconciler against the API server, or against an
/// in-memory store seeded with the instance file for a dry run
async fn run_sync(
    config: NetworkControllerConfig,
    vm_path: &Path,
    instance_path: &Path,
    api_url: Option<&str>,
) -> miette::Result<()> {
    let vm: VirtualMachine = load(vm_path)?;
    let instance: Instance = load(instance_path)?;

    let client: Arc<dyn InstanceClient> = match api_url {
        Some(url) => {
            info!("Syncing against API server at {}", url);
            Arc::new(ApiClient::new(url))
        }
        None => {
            info!("No API server given, syncing against an in-memory copy");
            let store = MockInstanceStore::new();
            store.insert(instance.clone()).await;
            Arc::new(store)
        }
    };
    let controller = NetworkController::new(client.clone(), config);

    let vm = match controller.sync(&vm, Some(&instance)).await {
        Ok(vm) => vm,
        Err(e) => {
            warn!("Sync failed ({}), requeue required", e.reason());
            print_json(e.vm())?;
            return Err(miette::miette!("{}", e));
        }
    };

    let updated = client
        .get_instance(instance.namespace(), instance.name())
        .await
        .map_err(|e| miette::miette!("Failed to read back instance: {}", e))?;

    print_json(&serde_json::json!({ "vm": vm, "instance": updated }))
}

fn run_status(
    config: NetworkControllerConfig,
    instance_path: &Path,
    pod_path: &Path,
) -> miette::Result<()> {
    let mut instance: Instance = load(instance_path)?;
    let pod: Pod = load(pod_path)?;

    let controller = NetworkController::new(Arc::new(MockInstanceStore::new()), config);
    controller
        .update_status(&mut instance, &pod)
        .map_err(|e| miette::miette!("Failed to update interface status: {}", e))?;

    print_json(&instance)
}

fn run_evaluate(
    config: NetworkControllerConfig,
    instance_path: &Path,
    now: Option<DateTime<Utc>>,
) -> miette::Result<()> {
    let mut instance: Instance = load(instance_path)?;

    let controller = NetworkController::new(Arc::new(MockInstanceStore::new()), config);
    let signal = controller.evaluate_migration(&mut instance, now.unwrap_or_else(Utc::now));

    print_json(&serde_json::json!({
        "migrationRequired": signal,
        "conditions": instance.status.conditions,
    }))
}

fn run_domain(config: NetworkControllerConfig, instance_path: &Path) -> miette::Result<()> {
    let instance: Instance = load(instance_path)?;

    let controller = NetworkController::new(Arc::new(MockInstanceStore::new()), config);
    print_json(&controller.domain_plan(&instance))
}

fn run_annotations(
    config: NetworkControllerConfig,
    instance_path: &Path,
    pod_path: &Path,
) -> miette::Result<()> {
    let instance: Instance = load(instance_path)?;
    let pod: Pod = load(pod_path)?;

    let controller = NetworkController::new(Arc::new(MockInstanceStore::new()), config);
    let annotations = controller
        .pod_annotations(&instance, &pod)
        .map_err(|e| miette::miette!("Failed to generate pod annotations: {}", e))?;
    let selection_update = controller
        .selection_update(&instance, &pod)
        .map_err(|e| miette::miette!("Failed to compute selection update: {}", e))?;

    print_json(&serde_json::json!({
        "annotations": annotations,
        "selectionUpdate": selection_update,
    }))
}
