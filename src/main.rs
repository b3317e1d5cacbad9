pub mod address;
pub mod block;
pub mod config;
pub mod crypto;
pub mod error;
pub mod events;
pub mod ledger;
pub mod merkle;
pub mod mesh;
pub mod network_type;
pub mod peers;
pub mod shutdown;
pub mod storage;
pub mod types;
pub mod utxo_set;

use crate::block::genesis::{GenesisConfig, GenesisMetadata, NetworkParams};
use crate::config::Config;
use crate::crypto::NodeIdentity;
use crate::error::NodeError;
use crate::events::EventBus;
use crate::ledger::LedgerService;
use crate::mesh::duty_cycle::DutyCycle;
use crate::mesh::protocol::MeshProtocol;
use crate::mesh::wire::read_envelope;
use crate::network_type::NetworkType;
use crate::peers::discovery::{DiscoveryConfig, PeerDiscovery};
use crate::peers::manager::{PeerManager, PeerManagerConfig};
use crate::peers::pool::PoolConfig;
use crate::shutdown::ShutdownManager;
use crate::storage::{keys, KvStore, SledStore};
use crate::types::now_ms;
use clap::Parser;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Mutex;

#[derive(Parser, Debug)]
#[command(name = "lorad")]
#[command(about = "Lorachain mesh node daemon", long_about = None)]
struct Args {
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    #[arg(long)]
    listen_addr: Option<String>,

    #[arg(short, long)]
    verbose: bool,

    #[arg(long)]
    generate_config: bool,
}

fn init_tracing(level: &str, verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let directive = if verbose { "debug" } else { level };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(directive.to_string()));
    fmt().with_env_filter(filter).init();
}

/// Load the node keypair from storage or mint and persist a fresh one.
async fn load_identity(
    store: &dyn KvStore,
    network: NetworkType,
) -> Result<NodeIdentity, NodeError> {
    let probe = NodeIdentity::generate(network);
    let address = probe.address().to_string();
    // A prior run stored its keypair under its own address; scan for any
    let existing = store
        .scan_prefix(b"keypair/")
        .await
        .map_err(|e| NodeError::Transient(format!("keypair scan: {e}")))?;

    if let Some((_, raw)) = existing.into_iter().next() {
        let record: crate::crypto::KeypairRecord = bincode::deserialize(&raw)
            .map_err(|e| NodeError::Fatal(format!("corrupt keypair record: {e}")))?;
        let identity = NodeIdentity::from_record(&record, network);
        tracing::info!(address = %identity.address(), "🔑 Loaded node identity");
        return Ok(identity);
    }

    store
        .put(
            keys::keypair(&address),
            bincode::serialize(&probe.to_record())
                .map_err(|e| NodeError::Transient(format!("keypair serialization: {e}")))?,
        )
        .await
        .map_err(|e| NodeError::Transient(format!("keypair persist: {e}")))?;
    tracing::info!(address = %address, "🔑 Generated node identity");
    Ok(probe)
}

/// Load the configured chain's genesis record, creating a development
/// genesis when none exists yet.
async fn load_genesis(store: &dyn KvStore, config: &Config) -> Result<GenesisConfig, NodeError> {
    match GenesisConfig::load(store, &config.node.chain_id).await {
        Ok(genesis) => Ok(genesis),
        Err(NodeError::NotFound { .. }) => {
            tracing::warn!(
                chain_id = %config.node.chain_id,
                "No genesis record found, creating a development genesis"
            );
            let genesis = GenesisConfig {
                chain_id: config.node.chain_id.clone(),
                network_name: config.node.name.clone(),
                version: "1.0.0".to_string(),
                initial_allocations: vec![],
                total_supply: 21_000_000_000,
                network_params: NetworkParams {
                    initial_difficulty: 3,
                    target_block_time_s: 180,
                    adjustment_period: 10,
                    max_difficulty_ratio: 4,
                    max_block_size: 1024 * 1024,
                    mining_reward: 50_000_000,
                    halving_interval: 210_000,
                },
                metadata: GenesisMetadata {
                    timestamp: crate::types::now_secs(),
                    creator: config.node.name.clone(),
                    network_type: config.node.network.clone(),
                },
            };
            genesis.save(store).await?;
            Ok(genesis)
        }
        Err(e) => Err(e),
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if args.generate_config {
        let config = Config::default();
        match config.save_to_file(&args.config) {
            Ok(_) => println!("✅ Generated default config at: {}", args.config),
            Err(e) => eprintln!("Failed to generate config: {e}"),
        }
        return;
    }

    let config = Config::load_from_file(&args.config).unwrap_or_else(|_| {
        eprintln!("No config at {}, using defaults", args.config);
        Config::default()
    });
    init_tracing(&config.logging.level, args.verbose);

    if let Ok(hostname) = hostname::get() {
        tracing::info!(
            host = %hostname.to_string_lossy(),
            started_at = %chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
            "🖥️  Starting lorad"
        );
    }

    let network = config.node.network_type();
    let store: Arc<dyn KvStore> = match SledStore::open(&config.storage.db_path) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            tracing::error!("Cannot open database {}: {e}", config.storage.db_path);
            return;
        }
    };

    let identity = match load_identity(store.as_ref(), network).await {
        Ok(identity) => Arc::new(identity),
        Err(e) => {
            tracing::error!("Identity setup failed: {e}");
            return;
        }
    };

    let genesis = match load_genesis(store.as_ref(), &config).await {
        Ok(genesis) => genesis,
        Err(e) => {
            tracing::error!("Genesis setup failed: {e}");
            return;
        }
    };

    let ledger = match LedgerService::bootstrap(genesis, store.clone()).await {
        Ok(ledger) => Arc::new(ledger),
        Err(e) => {
            tracing::error!("Ledger bootstrap failed: {e}");
            return;
        }
    };

    let events = EventBus::new();
    let mut peer_manager = PeerManager::new(
        PeerManagerConfig {
            max_discovery_peers: config.peers.max_discovery_peers,
            pool: PoolConfig {
                max_outbound: config.peers.max_outbound,
                max_inbound: config.peers.max_inbound,
                ..PoolConfig::default()
            },
            ..PeerManagerConfig::default()
        },
        events.clone(),
    );
    if let Ok(restored) = peer_manager.ban_list_mut().restore(store.as_ref()).await {
        if restored > 0 {
            tracing::info!(restored, "🚫 Restored persisted bans");
        }
    }

    let mut discovery = PeerDiscovery::new(DiscoveryConfig {
        dns_seeds: config.peers.dns_seeds.clone(),
        default_port: network.default_p2p_port(),
        max_discovery_peers: config.peers.max_discovery_peers,
    });
    if let Ok(restored) = discovery.restore(store.as_ref()).await {
        if restored > 0 {
            tracing::info!(restored, "🌱 Restored discovery cache");
        }
    }
    let discovery = Arc::new(Mutex::new(discovery));

    let duty_cycle = DutyCycle::new(config.mesh.region(), config.mesh.effective_bps);
    let mut mesh = MeshProtocol::new(
        identity.clone(),
        config.node.node_class(),
        config.mesh.fragmenter_config(),
        config.queue.queue_config(),
        duty_cycle,
        config.routing.routing_config(),
        peer_manager,
        ledger.clone(),
        events.clone(),
    );

    // Restore half-received transfers from the previous run
    if let Ok(sessions) = store.scan_prefix(keys::SESSION_PREFIX).await {
        let restored = mesh.restore_sessions(sessions.into_iter().map(|(_, v)| v).collect());
        if restored > 0 {
            tracing::info!(restored, "📦 Restored reassembly sessions");
        }
    }

    let mesh = Arc::new(Mutex::new(mesh));
    let mut shutdown = ShutdownManager::new();

    // Periodic housekeeping: retransmissions, retries, expiries, peer
    // maintenance
    {
        let mesh = mesh.clone();
        let token = shutdown.token();
        shutdown.register_task(tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(1));
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        let mut mesh = mesh.lock().await;
                        let _control = mesh.tick(now_ms());
                        let _replies = mesh.drain_outbox();
                        let _frames = mesh.pump_transmissions(now_ms());
                        // Control envelopes, replies and frames go to the
                        // transport driver; the radio backend is wired
                        // externally
                    }
                }
            }
        }));
    }

    // Periodic beacon
    {
        let mesh = mesh.clone();
        let token = shutdown.token();
        shutdown.register_task(tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(30));
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        let mut mesh = mesh.lock().await;
                        if let Err(e) = mesh.make_beacon().await {
                            tracing::debug!("Beacon build failed: {e}");
                        }
                    }
                }
            }
        }));
    }

    // Discovery rounds
    {
        let discovery = discovery.clone();
        let token = shutdown.token();
        shutdown.register_task(tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(120));
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        discovery.lock().await.dns_round().await;
                    }
                }
            }
        }));
    }

    // TCP acceptor for well-connected peers
    let listen = args.listen_addr.unwrap_or_else(|| {
        format!(
            "{}:{}",
            config.mesh.listen_address,
            network.default_p2p_port()
        )
    });
    match TcpListener::bind(&listen).await {
        Ok(listener) => {
            tracing::info!(addr = %listen, "📡 Listening for peer connections");
            let mesh = mesh.clone();
            let token = shutdown.token();
            shutdown.register_task(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        accepted = listener.accept() => {
                            let Ok((mut socket, peer_addr)) = accepted else { continue };
                            let mesh = mesh.clone();
                            tokio::spawn(async move {
                                loop {
                                    match read_envelope(&mut socket).await {
                                        Ok(Some(envelope)) => {
                                            let mut mesh = mesh.lock().await;
                                            if let Err(e) = mesh.handle_envelope(&envelope).await {
                                                tracing::debug!(peer = %peer_addr, "Rejected message: {e}");
                                                if matches!(e, NodeError::ProtocolViolation { .. }) {
                                                    break; // disconnect
                                                }
                                            }
                                        }
                                        Ok(None) => break,
                                        Err(_) => break,
                                    }
                                }
                            });
                        }
                    }
                }
            }));
        }
        Err(e) => {
            tracing::error!(addr = %listen, "Cannot bind listener: {e}");
        }
    }

    tracing::info!(
        node = %hex::encode(identity.node_id()),
        height = ledger.height().await,
        "✅ Node ready"
    );

    shutdown.wait_for_shutdown().await;

    // Persist mesh and peer state for the next run
    {
        let mut mesh = mesh.lock().await;
        let drained = mesh.drain_for_shutdown();
        if drained > 0 {
            tracing::info!(drained, "💀 Drained pending deliveries to dead-letter");
        }
        for (id, snapshot) in mesh.persist_sessions() {
            let _ = store.put(keys::session(&id), snapshot).await;
        }
        if let Err(e) = mesh
            .peers_mut()
            .ban_list_mut()
            .persist(store.as_ref())
            .await
        {
            tracing::warn!("Ban list persist failed: {e}");
        }
    }
    if let Err(e) = discovery.lock().await.persist(store.as_ref()).await {
        tracing::warn!("Discovery cache persist failed: {e}");
    }
    tracing::info!("👋 Shutdown complete");
}
