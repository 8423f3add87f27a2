use anyhow::Result;
use clap::Parser;
use slothfs_mgmt::cli::{Cli, Command};
use slothfs_mgmt::{init_tracing, Application, SlothConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.log_json)?;
    let config = cli.load_config()?;

    match cli.command {
        Command::Run => run(config).await,
        Command::Scan => scan(config).await,
    }
}

async fn run(config: SlothConfig) -> Result<()> {
    tracing::info!("SlothFS storage daemon starting...");
    let mut app = Application::new(config)?;
    app.start();

    tokio::signal::ctrl_c().await?;
    tracing::info!("interrupted");
    app.shutdown();
    Ok(())
}

async fn scan(config: SlothConfig) -> Result<()> {
    let app = Application::new(config)?;
    let report = app.scan().await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
