use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use opal_peer::bucketmeta::NoopNotifier;
use opal_peer::config::PeerConfig;
use opal_peer::iam::MemoryIamStore;
use opal_peer::object::MemoryObjectLayer;
use opal_peer::server::run_server;
use opal_peer::state::PeerServices;

#[derive(Parser)]
#[command(name = "opal-peer")]
#[command(about = "Opal object-storage peer control plane")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the peer node
    Server {
        /// Address to bind the HTTP listener to
        #[arg(long, default_value = "0.0.0.0:9100")]
        bind: String,

        /// Node name reported in streams and probes
        #[arg(long, default_value = "opal-node")]
        node_name: String,

        /// Cluster shared key, hex encoded
        #[arg(long, default_value = "")]
        shared_key: String,

        /// Path to the dynamically reloadable configuration file
        #[arg(long)]
        dynamic_config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "opal_peer=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Server {
            bind,
            node_name,
            shared_key,
            dynamic_config,
        } => {
            let config = PeerConfig {
                bind_addr: bind,
                node_name,
                shared_key_hex: shared_key,
                dynamic_config_path: dynamic_config,
                ..Default::default()
            }
            .with_env_overrides();

            let (services, signal_rx) = PeerServices::new(
                config,
                Arc::new(MemoryIamStore::new()),
                Arc::new(NoopNotifier),
            );
            // The embedded development layer; production nodes attach the
            // storage engine before serving.
            services.set_object_layer(Arc::new(MemoryObjectLayer::new()));

            if let Err(e) = run_server(services, signal_rx).await {
                tracing::error!("server error: {}", e);
                std::process::exit(1);
            }
        }
    }
}
