use anyhow::Result;
use clap::Parser;
use substrate_app::{Cli, run};
use tracing::{info, warn};

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    info!(budget = ?cli.budget()?, "Starting substrate run");
    match run(&cli)? {
        Some(summary) => info!(
            tick = %summary.tick,
            population = summary.population,
            births = summary.births,
            collisions = summary.collisions,
            "Final tick"
        ),
        None => warn!("No ticks were run"),
    }
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}
