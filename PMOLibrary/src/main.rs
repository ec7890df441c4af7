use pmoconfig::get_config;
use pmocontent::config_ext::ImportConfigExt;
use pmocontent::{ContentManager, Context, FeedService};
use pmodatabase::DatabaseConfigExt;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ========== PHASE 1 : Configuration et journalisation ==========

    let config = get_config();
    let min_level = config
        .get_log_min_level()
        .unwrap_or_else(|_| "INFO".to_string());
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(min_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("🚀 Starting {}...", config.get_server_name());
    let udn = config.get_server_udn()?;
    info!(udn = %udn, "Server identity");

    // ========== PHASE 2 : Base de données et cœur d'importation ==========

    let database = config.open_database()?;

    let mut context = Context::new(config.clone(), database);
    #[cfg(target_os = "linux")]
    if config.get_autoscan_use_inotify() {
        match pmocontent::inotify::InotifySource::new(false) {
            Ok(source) => context = context.with_watch_source(Box::new(source)),
            Err(e) => warn!("⚠️ inotify unavailable, falling back to timed scans: {e}"),
        }
    }

    let content = ContentManager::new(context);

    // Enregistrer les services en ligne déclarés dans la configuration
    for feed in config.get_online_feeds() {
        let name = feed.name.clone();
        let service = FeedService::new(feed, Arc::clone(content.clock()));
        match content.register_online_service(Arc::new(service)) {
            Ok(()) => info!("📡 Online feed '{name}' registered"),
            Err(e) => warn!("⚠️ Failed to register online feed '{name}': {e}"),
        }
    }

    content.start()?;

    // ========== PHASE 3 : Imports demandés en ligne de commande ==========

    for arg in std::env::args().skip(1) {
        match content.add_file(arg.as_str(), true, true, true) {
            Ok(task) => info!(task, path = %arg, "Import queued"),
            Err(e) => warn!(path = %arg, "Import refused: {e}"),
        }
    }

    info!("✅ {} ready, press Ctrl+C to stop", config.get_server_name());
    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    content.shutdown();
    Ok(())
}
