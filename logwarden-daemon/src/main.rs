use anyhow::Result;
use clap::Parser;

use logwarden_core::config::LogwardenConfig;
use logwarden_daemon::cli::DaemonCli;
use logwarden_daemon::logging;
use logwarden_daemon::orchestrator::Orchestrator;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = DaemonCli::parse();

    // file -> environment -> command line
    let mut config = LogwardenConfig::from_file(&cli.config)
        .await
        .map_err(|e| anyhow::anyhow!("failed to load {}: {}", cli.config.display(), e))?;
    config.apply_env_overrides();
    cli.apply_overrides(&mut config);
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;

    if cli.validate {
        println!("configuration OK: {}", cli.config.display());
        return Ok(());
    }

    logging::init_tracing(&config.general)?;

    tracing::info!(
        config = %cli.config.display(),
        node_name = %config.general.node_name,
        "logwarden-daemon starting"
    );

    let mut orchestrator = Orchestrator::build_from_config(config).await?;

    if cli.relocate {
        let summary = orchestrator.relocate().await?;
        println!(
            "relocated {} events: {} changed, {} errors",
            summary.processed, summary.changed, summary.errors
        );
        return Ok(());
    }

    orchestrator.run().await?;

    tracing::info!("logwarden-daemon shut down");
    Ok(())
}
