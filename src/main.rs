use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use concord_node::assistant::GeminiClient;
use concord_node::chat::{ChatNode, NodeDeps};
use concord_node::config;
use concord_node::console::run_console;
use concord_node::network::Libp2pLink;
use concord_node::presence::{HttpRegistry, MemoryRegistry, RegistryStore};
use concord_node::storage::{ClientDatabase, ensure_parent_dir};
use concord_node::time::SystemClock;
use dotenvy::dotenv;
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(
    name = "concord-node",
    version,
    about = "Peer-to-peer chat node with a shared presence registry"
)]
struct Cli {
    /// Path to JSON config file
    #[arg(long, default_value = config::DEFAULT_CONFIG_PATH, value_name = "FILE")]
    config: String,
    /// URL of the shared presence document (overrides the config file)
    #[arg(long, value_name = "URL")]
    registry_url: Option<String>,
    /// Write the effective configuration to the config path and exit
    #[arg(long)]
    write_config: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenv().ok();
    env_logger::init();

    let cli = Cli::parse();
    let mut app_config = config::load_config(&cli.config);
    if let Some(url) = cli.registry_url {
        app_config.registry.url = Some(url);
    }
    if cli.write_config {
        config::save_config(&cli.config, &app_config)?;
        log::info!("Configuration written to {}", cli.config);
        return Ok(());
    }

    ensure_parent_dir(&app_config.storage.path)?;
    let db = ClientDatabase::with_path(&app_config.storage.path)?;

    let registry: Arc<dyn RegistryStore> = match &app_config.registry.url {
        Some(url) => Arc::new(HttpRegistry::new(
            url,
            &app_config.registry.headers,
            Duration::from_millis(app_config.registry.timeout_ms),
        )?),
        None => {
            log::warn!(
                "No registry url configured (set {} or --registry-url); presence stays in this process",
                config::REGISTRY_URL_ENV
            );
            Arc::new(MemoryRegistry::new())
        }
    };

    let (link_tx, link_rx) = mpsc::unbounded_channel();
    let link = Libp2pLink::spawn(&app_config.transport, link_tx)?;
    let completion = Arc::new(GeminiClient::new(&app_config.assistant)?);

    // Console -> node
    let (cmd_tx, cmd_rx) = mpsc::channel(100);
    // Node -> console
    let (event_tx, event_rx) = mpsc::unbounded_channel();

    let node = ChatNode::new(NodeDeps {
        config: app_config,
        db,
        registry,
        link: Box::new(link),
        link_events: link_rx,
        completion,
        clock: Arc::new(SystemClock),
        events: event_tx,
    });
    let node_task = tokio::spawn(node.run(cmd_rx));

    run_console(cmd_tx, event_rx).await;

    // Dropping the command sender stops the node loop.
    if let Err(err) = node_task.await {
        log::error!("Chat node terminated: {err}");
    }
    Ok(())
}
