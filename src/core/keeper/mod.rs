pub mod connection;
pub mod debug_logger;
pub mod orchestrator;
pub mod proxy_pool;
pub mod session_store;
pub mod sources;
pub mod transport;
pub mod types;
pub mod window;

// Re-export commonly used items
pub use connection::{ClockTrait, PairConnection, PairContext, PairFailure, SystemClock};
pub use debug_logger::{get_logger, KeeperLogger};
pub use orchestrator::{Orchestrator, OrchestratorSettings, RunSummary};
pub use proxy_pool::{PoolSource, ProxyPool};
pub use session_store::SessionStore;
pub use transport::{HttpClientTrait, IsahcHttpClient, Transport, TransportError};
pub use types::*;

use crate::config::Config;
use std::sync::Arc;

/// Build a ready-to-run orchestrator from `config`
///
/// Loads the token list, the proxy pool and the session cache. Every input
/// problem that would leave nothing to schedule is `StartupFatal`.
pub async fn bootstrap(
    config: &Config,
    client: Arc<dyn HttpClientTrait>,
) -> Result<Orchestrator, KeeperError> {
    let logger = get_logger();

    let credentials = sources::load_tokens(&config.files.token_file).await?;

    let pool = ProxyPool::load(config.pool_source()?, client.clone()).await?;
    let store = SessionStore::open(config.session_path()?).await;
    logger.info(
        "Keeper",
        &format!(
            "Session cache {} holds {} sessions",
            store.path().display(),
            store.len().await
        ),
    );

    let transport = Transport::new(client)
        .with_policy(config.retry_policy())
        .with_profile(config.request_profile());

    let context = PairContext {
        transport: Arc::new(transport),
        store: Arc::new(store),
        clock: Arc::new(SystemClock),
        endpoints: config.endpoints(),
        settings: config.heartbeat_settings(),
    };

    Ok(Orchestrator::new(
        credentials,
        Arc::new(pool),
        Arc::new(context),
        config.orchestrator_settings(),
    ))
}
