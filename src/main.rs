//! Profile Sync - avatar profile replica for the content network

use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use profile_sync::{
    cache::{
        spawn_occupancy_task, DistributedCache, HotProfileCache, MemoryDistributedCache,
        NatsKvCache, ProfileL2,
    },
    config::{Args, LogFormat},
    db::{ProfileStore, SqliteProfileStore, SyncStateStore},
    network::{CatalystClient, ContentClient},
    services::{
        EntityPersister, FailedFetchRecorder, NotFoundHandler, OwnershipValidatorJob,
        ProfileSanitizer, SnapshotsConfig, SnapshotsHandler, Synchronizer,
    },
    shutdown::Shutdown,
    tracker::DeploymentTracker,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    init_tracing(&args);

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  Profile Sync");
    info!("======================================");
    for (i, server) in args.content_server_list().iter().enumerate() {
        info!("  content-{}: {}", i, server);
    }
    info!("Lambdas: {}", args.lambdas_url);
    info!("Database: {}", args.database_path);
    info!("L2: {}", args.nats_url.as_deref().unwrap_or("in-process"));
    info!("L1 capacity: {}", args.hot_cache_max_entries);
    info!("======================================");

    let shutdown = Shutdown::new();

    let sqlite = Arc::new(SqliteProfileStore::open(&args.database_path)?);
    let store: Arc<dyn ProfileStore> = sqlite.clone();
    let state_store: Arc<dyn SyncStateStore> = sqlite;

    let l2_backend: Arc<dyn DistributedCache> = match &args.nats_url {
        Some(url) => match NatsKvCache::connect(url, &args.nats_kv_bucket, args.l2_ttl()).await {
            Ok(cache) => Arc::new(cache),
            Err(e) => {
                warn!("NATS L2 unavailable, using in-process L2: {}", e);
                Arc::new(MemoryDistributedCache::new(args.l2_ttl()))
            }
        },
        None => Arc::new(MemoryDistributedCache::new(args.l2_ttl())),
    };
    let l2 = ProfileL2::new(l2_backend);

    let client: Arc<dyn ContentClient> = Arc::new(CatalystClient::new(args.catalyst_config())?);

    let tracker = Arc::new(DeploymentTracker::with_defaults());
    let hot = Arc::new(HotProfileCache::new(args.cache_config()));
    let occupancy_handle = spawn_occupancy_task(Arc::clone(&hot), shutdown.clone());

    let persister = Arc::new(EntityPersister::new(
        tracker,
        Arc::clone(&hot),
        l2.clone(),
        Arc::clone(&store),
        args.write_queue_config(),
    ));
    let sanitizer = Arc::new(ProfileSanitizer::new(
        Arc::clone(&client),
        args.sanitizer_config(),
    ));
    let recorder: Arc<dyn NotFoundHandler> = Arc::new(FailedFetchRecorder::new(Arc::clone(&store)));

    let snapshots = SnapshotsHandler::new(
        Arc::clone(&client),
        Arc::clone(&sanitizer),
        Arc::clone(&persister),
        Arc::clone(&store),
        Arc::clone(&recorder),
        SnapshotsConfig::default(),
        shutdown.clone(),
    );

    let synchronizer = Arc::new(Synchronizer::new(
        Arc::clone(&client),
        sanitizer,
        persister,
        snapshots,
        Arc::clone(&store),
        state_store,
        Arc::clone(&hot),
        recorder,
        args.synchronizer_config(),
        shutdown.clone(),
    ));

    let validator = Arc::new(OwnershipValidatorJob::new(
        client,
        hot,
        store,
        l2,
        args.ownership_config(),
        shutdown.clone(),
    ));

    let sync_handle = {
        let synchronizer = Arc::clone(&synchronizer);
        tokio::spawn(async move { synchronizer.run().await })
    };
    let validator_handle = Arc::clone(&validator).spawn();

    info!("Press Ctrl+C to stop.");
    wait_for_signal().await;
    info!("Shutting down...");

    validator.stop();
    shutdown.trigger();
    for (name, handle) in [
        ("synchronizer", sync_handle),
        ("ownership validator", validator_handle),
        ("occupancy reporter", occupancy_handle),
    ] {
        if let Err(e) = handle.await {
            error!("{} task failed: {}", name, e);
        }
    }

    // Loops are gone; flush queued writes and persist the final cursor
    synchronizer.stop().await;

    info!("Profile Sync stopped");
    Ok(())
}

fn init_tracing(args: &Args) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("profile_sync={},info", args.log_level).into());
    let registry = tracing_subscriber::registry().with(filter);

    match args.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        Err(e) => {
            warn!("SIGTERM handler unavailable: {}", e);
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    tokio::signal::ctrl_c().await.ok();
}
