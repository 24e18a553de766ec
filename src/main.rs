use clap::Parser;
use page_snapshot::{load_config, setup_logging, Cli, CliRunner};
use tokio::signal;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    setup_logging(args.verbose);

    info!("Starting page-snapshot v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args).await?;
    let runner = CliRunner::new(config, &args)?;

    let result = tokio::select! {
        result = runner.run(&args) => result,
        _ = signal::ctrl_c() => {
            info!("Received shutdown signal");
            Ok(false)
        }
    };

    match result {
        Ok(true) => Ok(()),
        Ok(false) => std::process::exit(1),
        Err(e) => {
            error!("Capture failed: {:#}", e);
            std::process::exit(1);
        }
    }
}
