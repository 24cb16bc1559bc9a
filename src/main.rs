use pulsekeeper::cli::Cli;
use pulsekeeper::config::Config;
use pulsekeeper::core::keeper::{bootstrap, get_logger, IsahcHttpClient};
use std::sync::Arc;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse_args();

    // Handle configuration commands
    if cli.init {
        let path = match &cli.config {
            Some(path) => path.clone(),
            None => Config::default_path()?,
        };
        if Config::init_at(&path)? {
            println!("Created config at {}", path.display());
        } else {
            println!("Config already exists at {}", path.display());
        }
        return Ok(());
    }

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    cli.apply_to(&mut config);

    if cli.print {
        config.print()?;
        return Ok(());
    }

    config.check()?;
    if cli.check {
        println!("✓ Configuration valid");
        return Ok(());
    }

    let logger = get_logger();
    logger.info(
        "Main",
        &format!(
            "pulsekeeper {} starting (run {})",
            env!("CARGO_PKG_VERSION"),
            logger.run_id()
        ),
    );

    let client = Arc::new(IsahcHttpClient::new()?);
    let orchestrator = bootstrap(&config, client).await?;

    let summary = orchestrator
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                get_logger().error("Main", &format!("Cannot listen for Ctrl-C: {}", e));
                std::future::pending::<()>().await;
            }
        })
        .await;

    logger.info(
        "Main",
        &format!(
            "Stopped after {} sweeps: {} pairs admitted, {} evicted, {} proxies removed, {} active at shutdown",
            summary.sweeps,
            summary.pairs_admitted,
            summary.pairs_evicted,
            summary.proxies_removed,
            summary.active_at_shutdown
        ),
    );
    Ok(())
}
